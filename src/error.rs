//! Unified error types for the daemon.
//!
//! Hand-rolled `Display` + `std::error::Error` + `From` impls, matching the
//! error taxonomy in the design notes: some classes are caller-visible
//! (surfaced as a JSON-RPC error), others are resolved silently inside the
//! coordinator and never escape as an `Err`.

use std::fmt;

// ---------------------------------------------------------------------------
// KeystoreError
// ---------------------------------------------------------------------------

/// Errors from key generation, persistence, or signing.
#[derive(Debug)]
pub enum KeystoreError {
    Io(std::io::Error),
    Crypto(String),
}

impl fmt::Display for KeystoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Crypto(msg) => write!(f, "crypto: {msg}"),
        }
    }
}

impl std::error::Error for KeystoreError {}

impl From<std::io::Error> for KeystoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// ChainError
// ---------------------------------------------------------------------------

/// Errors from the chain store (append/read/seal).
#[derive(Debug)]
pub enum ChainError {
    /// Append or rename failed (TransientIO): caller-visible, no mutation occurred.
    Io(std::io::Error),
    /// A chain record could not be parsed as JSON (MalformedRecord): the read
    /// path skips the offending line rather than returning this as a hard error,
    /// but it is kept so callers that want strict reads can opt in.
    MalformedRecord { line_number: usize, detail: String },
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::MalformedRecord { line_number, detail } => {
                write!(f, "malformed record at line {line_number}: {detail}")
            }
        }
    }
}

impl std::error::Error for ChainError {}

impl From<std::io::Error> for ChainError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// IndexError
// ---------------------------------------------------------------------------

/// Errors reading/writing the sessions/milestones/connection-map indices.
#[derive(Debug)]
pub enum IndexError {
    Io(std::io::Error),
    Serde(serde_json::Error),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Serde(e) => write!(f, "serde: {e}"),
        }
    }
}

impl std::error::Error for IndexError {}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e)
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading or parsing configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Json(e) => write!(f, "json: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

// ---------------------------------------------------------------------------
// CoordinatorError — caller-visible lifecycle-operation failures
// ---------------------------------------------------------------------------

/// Caller-visible failures from a lifecycle operation.
///
/// `StaleConnection` and `KeystoreUnavailable` are deliberately absent: the
/// design notes classify both as silently-handled internal conditions that
/// never escape to a JSON-RPC caller.
#[derive(Debug)]
pub enum CoordinatorError {
    /// A chain append or rename failed; no state mutation occurred.
    TransientIo(ChainError),
    /// An index (sessions/milestones/connection-map) read or rewrite
    /// failed. Same caller-visible class as `TransientIo` — both are
    /// "a disk operation failed, nothing was mutated, retry" conditions.
    IndexFailure(IndexError),
    /// The call referenced a connection with no live context and no
    /// persisted mapping.
    UnknownSession,
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientIo(e) => write!(f, "transient io: {e}"),
            Self::IndexFailure(e) => write!(f, "transient io: {e}"),
            Self::UnknownSession => write!(f, "Session not found"),
        }
    }
}

impl std::error::Error for CoordinatorError {}

impl From<ChainError> for CoordinatorError {
    fn from(e: ChainError) -> Self {
        Self::TransientIo(e)
    }
}

impl From<IndexError> for CoordinatorError {
    fn from(e: IndexError) -> Self {
        Self::IndexFailure(e)
    }
}

/// JSON-RPC error code for [`CoordinatorError::UnknownSession`].
pub const RPC_CODE_UNKNOWN_SESSION: i64 = -32000;
/// JSON-RPC error code for [`CoordinatorError::TransientIo`].
pub const RPC_CODE_TRANSIENT_IO: i64 = -32001;

impl CoordinatorError {
    /// JSON-RPC error code for this caller-visible class.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::TransientIo(_) | Self::IndexFailure(_) => RPC_CODE_TRANSIENT_IO,
            Self::UnknownSession => RPC_CODE_UNKNOWN_SESSION,
        }
    }
}

// ---------------------------------------------------------------------------
// DaemonError — top-level
// ---------------------------------------------------------------------------

/// Top-level error type for daemon startup and query-surface operations.
#[derive(Debug)]
pub enum DaemonError {
    Keystore(KeystoreError),
    Chain(ChainError),
    Index(IndexError),
    Config(ConfigError),
    Coordinator(CoordinatorError),
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keystore(e) => write!(f, "keystore: {e}"),
            Self::Chain(e) => write!(f, "chain: {e}"),
            Self::Index(e) => write!(f, "index: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Coordinator(e) => write!(f, "coordinator: {e}"),
        }
    }
}

impl std::error::Error for DaemonError {}

impl From<KeystoreError> for DaemonError {
    fn from(e: KeystoreError) -> Self {
        Self::Keystore(e)
    }
}

impl From<ChainError> for DaemonError {
    fn from(e: ChainError) -> Self {
        Self::Chain(e)
    }
}

impl From<IndexError> for DaemonError {
    fn from(e: IndexError) -> Self {
        Self::Index(e)
    }
}

impl From<ConfigError> for DaemonError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<CoordinatorError> for DaemonError {
    fn from(e: CoordinatorError) -> Self {
        Self::Coordinator(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_unknown_session_message_matches_spec() {
        assert_eq!(CoordinatorError::UnknownSession.to_string(), "Session not found");
        assert_eq!(CoordinatorError::UnknownSession.rpc_code(), -32000);
    }

    #[test]
    fn config_error_invalid_message() {
        let e = ConfigError::Invalid("port already in use".into());
        assert_eq!(e.to_string(), "invalid config: port already in use");
    }

    #[test]
    fn daemon_error_from_chain_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e = DaemonError::from(ChainError::from(io_err));
        assert!(e.to_string().starts_with("chain: io:"));
    }
}
