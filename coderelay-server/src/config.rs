use coderelay_collab::ServerConfig;

/// Prefix for every environment variable the server reads.
pub const ENV_PREFIX: &str = "CODERELAY_";

/// Load server configuration from `CODERELAY_*` environment variables.
///
/// `app.env` is read first if present, otherwise `.env`. Variables already
/// set in the environment take precedence over both files.
pub fn load() -> Result<ServerConfig, ConfigError> {
    if std::path::Path::new("app.env").exists() {
        dotenvy::from_filename("app.env").ok();
    } else {
        dotenvy::dotenv().ok();
    }

    match envy::prefixed(ENV_PREFIX).from_env::<ServerConfig>() {
        Ok(config) => {
            log::info!("Configuration loaded");
            Ok(config)
        }
        Err(e) => {
            log::error!("Failed to load configuration: {e}");
            Err(ConfigError::EnvError(e))
        }
    }
}

/// Same as [`load`] but over explicit key/value pairs, without touching
/// dotenv files.
pub fn load_from_iter<I>(vars: I) -> Result<ServerConfig, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    envy::prefixed(ENV_PREFIX)
        .from_iter(vars)
        .map_err(ConfigError::EnvError)
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = load_from_iter(Vec::new()).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.heartbeat_interval_secs, 15);
        assert_eq!(config.heartbeat_timeout_secs, 45);
        assert!(config.max_document_bytes.is_none());
    }

    #[test]
    fn test_prefixed_overrides() {
        let config = load_from_iter(vars(&[
            ("CODERELAY_BIND_ADDR", "0.0.0.0:4000"),
            ("CODERELAY_BROADCAST_CAPACITY", "64"),
            ("CODERELAY_MAX_DOCUMENT_BYTES", "65536"),
            ("BIND_ADDR", "ignored:1"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:4000");
        assert_eq!(config.broadcast_capacity, 64);
        assert_eq!(config.max_document_bytes, Some(65536));
    }

    #[test]
    fn test_bad_number_is_an_error() {
        let err = load_from_iter(vars(&[("CODERELAY_HEARTBEAT_INTERVAL_SECS", "soon")])).unwrap_err();
        assert!(err.to_string().starts_with("Environment variable error"));
    }
}
