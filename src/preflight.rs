//! Startup resilience: bind-retry-then-exit-0, and the `doctor` checks.
//!
//! On bind failure the daemon never wants to look like a crash loop to a
//! service manager (systemd, launchd): if another instance is already
//! listening and reports the same build version via its own `/health`, this
//! instance exits cleanly; otherwise it kills the occupant and retries a
//! bounded number of times before giving up quietly.

use std::time::Duration;

use tokio::net::TcpListener;

const MAX_BIND_RETRIES: u32 = 3;
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);
const RETRY_BACKOFF: Duration = Duration::from_millis(300);

/// Outcome of [`acquire_listener`].
pub enum BindOutcome {
    /// Bound successfully; the daemon should proceed to serve.
    Ready(TcpListener),
    /// Another live instance already owns the port at the same version, or
    /// the retry budget was exhausted. The caller should exit(0) quietly.
    YieldToOther,
}

/// Attempt to bind `127.0.0.1:port`, recovering from bind contention per
/// spec.md §5's startup-resilience rule.
pub async fn acquire_listener(port: u16) -> BindOutcome {
    for attempt in 0..=MAX_BIND_RETRIES {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => return BindOutcome::Ready(listener),
            Err(err) if attempt == MAX_BIND_RETRIES => {
                tracing::warn!(port, error = %err, "giving up on bind contention, exiting cleanly");
                return BindOutcome::YieldToOther;
            }
            Err(err) => {
                tracing::info!(port, attempt, error = %err, "port in use, checking occupant");
                if other_instance_matches_our_version(port).await {
                    tracing::info!(port, "another instance of the same version is already serving");
                    return BindOutcome::YieldToOther;
                }
                kill_occupant(port);
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
    }
    BindOutcome::YieldToOther
}

async fn other_instance_matches_our_version(port: u16) -> bool {
    let url = format!("http://127.0.0.1:{port}/health");
    let Ok(client) = reqwest::Client::builder().timeout(HEALTH_CHECK_TIMEOUT).build() else {
        return false;
    };
    let Ok(response) = client.get(&url).send().await else {
        return false;
    };
    let Ok(body) = response.json::<serde_json::Value>().await else {
        return false;
    };
    body.get("version").and_then(|v| v.as_str()) == Some(crate::build_info::VERSION)
}

/// Best-effort: kill whatever process holds `port` so the next bind attempt
/// can succeed. No dedicated process-table dependency is in the stack, so
/// this shells out to the platform's own tool and tolerates its absence.
fn kill_occupant(port: u16) {
    #[cfg(unix)]
    {
        let _ = std::process::Command::new("fuser").arg("-k").arg(format!("{port}/tcp")).output();
    }
    #[cfg(not(unix))]
    {
        let _ = port;
    }
}

/// One named check result for `useaid doctor`.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

/// Run the startup-health checks surfaced by the `doctor` CLI subcommand:
/// root directory writable, port free, keystore loadable.
pub fn run_doctor(root_dir: &std::path::Path, port: u16) -> Vec<CheckResult> {
    vec![check_root_dir_writable(root_dir), check_port_free(port), check_keystore_loadable(root_dir)]
}

fn check_root_dir_writable(root_dir: &std::path::Path) -> CheckResult {
    let probe = root_dir.join(".doctor-write-probe");
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            CheckResult { name: "root_dir_writable", ok: true, detail: root_dir.display().to_string() }
        }
        Err(err) => CheckResult { name: "root_dir_writable", ok: false, detail: err.to_string() },
    }
}

fn check_port_free(port: u16) -> CheckResult {
    match std::net::TcpListener::bind(("127.0.0.1", port)) {
        Ok(_listener) => CheckResult { name: "port_free", ok: true, detail: format!("port {port} is free") },
        Err(err) => CheckResult { name: "port_free", ok: false, detail: format!("port {port}: {err}") },
    }
}

fn check_keystore_loadable(root_dir: &std::path::Path) -> CheckResult {
    let path = root_dir.join("keystore.json");
    match crate::keystore::Keystore::load_or_generate(path) {
        Ok(_) => CheckResult { name: "keystore_loadable", ok: true, detail: "keystore OK".to_string() },
        Err(err) => CheckResult { name: "keystore_loadable", ok: false, detail: err.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_reports_writable_root_dir() {
        let dir = tempfile::tempdir().unwrap();
        let results = run_doctor(dir.path(), 0);
        let root_check = results.iter().find(|c| c.name == "root_dir_writable").unwrap();
        assert!(root_check.ok, "{root_check:?}");
        let keystore_check = results.iter().find(|c| c.name == "keystore_loadable").unwrap();
        assert!(keystore_check.ok, "{keystore_check:?}");
    }

    #[test]
    fn doctor_reports_unwritable_root_dir() {
        let results = run_doctor(std::path::Path::new("/nonexistent/useai-doctor-probe"), 0);
        let root_check = results.iter().find(|c| c.name == "root_dir_writable").unwrap();
        assert!(!root_check.ok);
    }
}
