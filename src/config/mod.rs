//! Daemon configuration.
//!
//! `config.json` holds everything except the two values documented in
//! spec.md §6 as environment-overridable: the remote sync base URL and the
//! bind port. Root directory resolution lives here too since it gates where
//! `config.json` itself is read from.

mod defaults;
mod env;
mod loader;
mod types;

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub use defaults::{default_root_dir, DEFAULT_PORT, ROOT_DIR_NAME};
pub use env::{ENV_PORT, ENV_SYNC_BASE_URL};
pub use loader::{config_path, load_config, save_config};
pub use types::{DaemonConfig, EvaluationConfig, UserProfile};

/// Resolve the effective root directory: `override_dir` if given, else
/// `~/.useai`.
pub fn resolve_root_dir(override_dir: Option<&str>) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = override_dir {
        return Ok(PathBuf::from(dir));
    }
    default_root_dir().ok_or_else(|| {
        ConfigError::Invalid("unable to resolve home directory for the default root (~/.useai)".to_string())
    })
}

/// Ensure the root directory and its `data/{active,sealed}` subdirectories
/// exist with restrictive permissions (`0o700`), matching `auth/store.rs`'s
/// directory-hardening habit.
pub fn ensure_root_dir(root_dir: &Path) -> Result<(), ConfigError> {
    for sub in [Path::new(""), Path::new("data/active"), Path::new("data/sealed")] {
        let dir = root_dir.join(sub);
        std::fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_root_dir_creates_data_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("useai-root");
        ensure_root_dir(&root).unwrap();
        assert!(root.join("data/active").is_dir());
        assert!(root.join("data/sealed").is_dir());
    }

    #[test]
    fn resolve_root_dir_honours_explicit_override() {
        let resolved = resolve_root_dir(Some("/tmp/custom-useai")).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/custom-useai"));
    }
}
