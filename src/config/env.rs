//! Environment variable overrides.
//!
//! Per spec.md §6: "One environment variable selects the remote sync base
//! URL; one selects the port override; all other configuration lives in
//! `config.json`."

use crate::error::ConfigError;

use super::types::DaemonConfig;

pub const ENV_SYNC_BASE_URL: &str = "USEAID_SYNC_BASE_URL";
pub const ENV_PORT: &str = "USEAID_PORT";

pub(super) fn apply_env_overrides<FEnv>(
    config: &mut DaemonConfig,
    env_lookup: &FEnv,
) -> Result<(), ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    if let Some(url) = env_lookup(ENV_SYNC_BASE_URL) {
        config.sync_base_url = Some(url);
    }
    if let Some(port) = env_lookup(ENV_PORT) {
        let parsed = port
            .parse::<u16>()
            .map_err(|_| ConfigError::Invalid(format!("invalid {ENV_PORT} value `{port}`: expected 0-65535")))?;
        config.port = parsed;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_base_url_env_override_applies() {
        let mut config = DaemonConfig::default();
        apply_env_overrides(&mut config, &|name| {
            (name == ENV_SYNC_BASE_URL).then(|| "https://sync.example/v1".to_string())
        })
        .unwrap();
        assert_eq!(config.sync_base_url.as_deref(), Some("https://sync.example/v1"));
    }

    #[test]
    fn invalid_port_env_is_rejected() {
        let mut config = DaemonConfig::default();
        let err = apply_env_overrides(&mut config, &|name| {
            (name == ENV_PORT).then(|| "not-a-port".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains(ENV_PORT));
    }
}
