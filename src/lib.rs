//! useaid — a local daemon for hash-chained, tamper-evident session logging.
//!
//! Clients (IDE plugins, CLI wrappers, editor extensions) call `session_start`,
//! `useai_heartbeat`, and `session_end` over a local JSON-RPC endpoint; each
//! call appends a signed, hash-linked record to an append-only per-session
//! log. A single-actor coordinator owns the session registry so every
//! mutation is totally ordered, even under concurrent HTTP connections.
//!
//! # Quick start
//!
//! ```no_run
//! use useaid::config::load_config;
//!
//! # fn example() {
//! let config = load_config(std::path::Path::new("/tmp/useai-root")).unwrap();
//! println!("{}", config.port);
//! # }
//! ```

/// Compile-time build/version metadata.
pub mod build_info;
/// Canonical JSON serialization and SHA-256 hashing for the hash chain.
pub mod canonical;
/// Hash-chained append-only session log records and storage.
pub mod chain;
/// Command-line argument parsing.
pub mod cli;
/// Config loading, defaults, and root-directory resolution.
pub mod config;
/// Lifecycle coordinator: the single-actor protocol engine.
pub mod coordinator;
/// Error types used across crate modules.
pub mod error;
/// Persistent sessions/milestones/connection-map indices.
pub mod index;
/// Ed25519 keypair generation, persistence, and signing.
pub mod keystore;
/// Shared data model: session seals and milestones.
pub mod model;
/// Startup bind-retry and `doctor` diagnostics.
pub mod preflight;
/// Local read/delete query surface over the persisted indices.
pub mod query;
/// In-memory session registry (the coordinator's live state).
pub mod registry;
/// Local JSON-RPC + REST HTTP transport.
pub mod transport;
