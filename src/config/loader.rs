//! `config.json` load/save.
//!
//! Grounded on `session.rs`'s write-to-`.tmp`-then-`rename` idiom, reused
//! here for the daemon's own `config.json` (also reused directly by
//! `crate::index` for the sessions/milestones/connection-map files).

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::env::apply_env_overrides;
use super::types::DaemonConfig;

/// Load `config.json` from `root_dir`, falling back to defaults if absent,
/// then apply environment overrides.
pub fn load_config(root_dir: &Path) -> Result<DaemonConfig, ConfigError> {
    load_config_from_sources(root_dir, |name| std::env::var(name).ok())
}

pub(super) fn load_config_from_sources<FEnv>(
    root_dir: &Path,
    env_lookup: FEnv,
) -> Result<DaemonConfig, ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    let path = config_path(root_dir);
    let mut config = match std::fs::read_to_string(&path) {
        Ok(text) if text.trim().is_empty() => DaemonConfig::default(),
        Ok(text) => serde_json::from_str(&text)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => DaemonConfig::default(),
        Err(err) => return Err(ConfigError::from(err)),
    };
    apply_env_overrides(&mut config, &env_lookup)?;
    Ok(config)
}

/// Persist `config.json` atomically (write to a sibling `.tmp`, then rename).
pub fn save_config(root_dir: &Path, config: &DaemonConfig) -> Result<(), ConfigError> {
    let path = config_path(root_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(config)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600));
    }
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

pub fn config_path(root_dir: &Path) -> PathBuf {
    root_dir.join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from_sources(dir.path(), |_| None).unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DaemonConfig::default();
        config.sync_enabled = true;
        config.user_profile.display_name = Some("Ada".to_string());
        save_config(dir.path(), &config).unwrap();

        let loaded = load_config_from_sources(dir.path(), |_| None).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn env_override_wins_over_file_port() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DaemonConfig::default();
        config.port = 9000;
        save_config(dir.path(), &config).unwrap();

        let loaded = load_config_from_sources(dir.path(), |name| {
            (name == super::super::env::ENV_PORT).then(|| "9999".to_string())
        })
        .unwrap();
        assert_eq!(loaded.port, 9999);
    }
}
