//! Built-in default values for daemon configuration.

/// Default RPC/REST bind port (127.0.0.1 only; see `crate::transport`).
pub const DEFAULT_PORT: u16 = 47912;

pub(super) fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Stable subdirectory name under the user's home directory.
pub const ROOT_DIR_NAME: &str = ".useai";

/// Resolve the default root directory: `~/.useai`.
///
/// Falls back to `dirs::data_local_dir()` if the home directory can't be
/// resolved (unusual, but the teacher's `config_root_dir` has the same
/// fallback shape for `$XDG_CONFIG_HOME`).
pub fn default_root_dir() -> Option<std::path::PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(ROOT_DIR_NAME))
        .or_else(|| dirs::data_local_dir().map(|dir| dir.join("useai")))
}
