//! Binary-local orchestration: wires CLI subcommands to the library's
//! config/keystore/chain/coordinator/transport layers and picks an exit code.

use std::sync::Arc;

use useaid::chain::ChainStore;
use useaid::cli::{Args, Command};
use useaid::config;
use useaid::coordinator::{self, CoordinatorDeps, CoordinatorHandle};
use useaid::index::{ConnectionMap, MilestonesIndex, SessionsIndex};
use useaid::keystore::Keystore;
use useaid::preflight::{self, BindOutcome};
use useaid::transport::{self, TransportDeps};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

/// Run the CLI and return the process exit code.
pub async fn run(args: Args) -> i32 {
    let root_dir = match config::resolve_root_dir(args.root.as_deref()) {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("useaid: {err}");
            return 1;
        }
    };

    match args.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => serve(root_dir, port).await,
        Command::Status => status(root_dir).await,
        Command::Keygen { reset } => keygen(root_dir, reset),
        Command::Doctor => doctor(root_dir),
    }
}

async fn serve(root_dir: std::path::PathBuf, port_override: Option<u16>) -> i32 {
    init_tracing();

    if let Err(err) = config::ensure_root_dir(&root_dir) {
        eprintln!("useaid: failed to prepare root directory: {err}");
        return 1;
    }

    let mut config = match config::load_config(&root_dir) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("useaid: failed to load config: {err}");
            return 1;
        }
    };
    if let Some(port) = port_override {
        config.port = port;
    }

    let keystore = match Keystore::load_or_generate(root_dir.join("keystore.json")) {
        Ok(keystore) => Arc::new(keystore),
        Err(err) => {
            eprintln!("useaid: failed to load keystore: {err}");
            return 1;
        }
    };
    let chain = match ChainStore::open(root_dir.join("data")) {
        Ok(chain) => chain,
        Err(err) => {
            eprintln!("useaid: failed to open chain store: {err}");
            return 1;
        }
    };
    let sessions_index = SessionsIndex::open(root_dir.join("sessions.json"));
    let milestones_index = MilestonesIndex::open(root_dir.join("milestones.json"));
    let connection_map = ConnectionMap::open(root_dir.join("connection_map.json"));

    if let Err(err) = sessions_index.dedupe_on_disk() {
        tracing::warn!(error = %err, "startup dedup of sessions index failed");
    }

    tracing::info!(version = useaid::build_info::VERSION, port = config.port, "starting useaid");

    let coordinator = coordinator::spawn(CoordinatorDeps {
        chain: chain.clone(),
        keystore,
        sessions_index: sessions_index.clone(),
        milestones_index: milestones_index.clone(),
        connection_map,
        config: config.clone(),
    });

    let listener = match preflight::acquire_listener(config.port).await {
        BindOutcome::Ready(listener) => listener,
        BindOutcome::YieldToOther => {
            tracing::info!("yielding to an already-running instance");
            return 0;
        }
    };

    let shutdown_coordinator = coordinator.clone();
    let router = transport::build_router(TransportDeps {
        coordinator,
        chain,
        sessions_index,
        milestones_index,
        config,
        root_dir,
    });

    if let Err(err) = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(shutdown_coordinator)).await {
        eprintln!("useaid: server error: {err}");
        return 1;
    }
    0
}

/// Wait for ctrl-c or SIGTERM, then run the coordinator's shutdown sweep
/// (seal unmapped live sessions, spec.md §9 "Graceful shutdown") before
/// letting `axum::serve` drain in-flight requests and return.
async fn shutdown_signal(coordinator: CoordinatorHandle) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, sealing unmapped sessions");
    coordinator.shutdown_sweep().await;
}

async fn status(root_dir: std::path::PathBuf) -> i32 {
    let config = config::load_config(&root_dir).unwrap_or_default();
    let url = format!("http://127.0.0.1:{}/health", config.port);
    match reqwest::get(&url).await {
        Ok(response) => match response.json::<serde_json::Value>().await {
            Ok(body) => {
                println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
                0
            }
            Err(err) => {
                eprintln!("useaid: malformed health response: {err}");
                1
            }
        },
        Err(err) => {
            eprintln!("useaid: daemon not reachable on port {}: {err}", config.port);
            1
        }
    }
}

fn keygen(root_dir: std::path::PathBuf, reset: bool) -> i32 {
    if let Err(err) = config::ensure_root_dir(&root_dir) {
        eprintln!("useaid: failed to prepare root directory: {err}");
        return 1;
    }
    let path = root_dir.join("keystore.json");
    let result = if reset { Keystore::regenerate(path) } else { Keystore::load_or_generate(path) };
    match result {
        Ok(keystore) => {
            println!("keypair ready: {}", keystore.public_key_hex());
            0
        }
        Err(err) => {
            eprintln!("useaid: keygen failed: {err}");
            1
        }
    }
}

fn doctor(root_dir: std::path::PathBuf) -> i32 {
    let config = config::load_config(&root_dir).unwrap_or_default();
    let results = preflight::run_doctor(&root_dir, config.port);
    let mut all_ok = true;
    for check in &results {
        all_ok &= check.ok;
        println!("[{}] {}: {}", if check.ok { "ok" } else { "FAIL" }, check.name, check.detail);
    }
    if all_ok {
        0
    } else {
        1
    }
}
