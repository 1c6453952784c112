const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{store} database URL is not configured (set {variable} or DATABASE_URL)")]
    MissingDatabaseUrl {
        store: &'static str,
        variable: &'static str,
    },
}

/// Connection settings for the reader and writer stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub reader_url: String,
    pub writer_url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `DATABASE_READER_URL` / `DATABASE_WRITER_URL`, each falling back to
    /// `DATABASE_URL`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let shared = non_blank("DATABASE_URL");

        let reader_url = non_blank("DATABASE_READER_URL")
            .or_else(|| shared.clone())
            .ok_or(ConfigError::MissingDatabaseUrl {
                store: "reader",
                variable: "DATABASE_READER_URL",
            })?;
        let writer_url = non_blank("DATABASE_WRITER_URL")
            .or(shared)
            .ok_or(ConfigError::MissingDatabaseUrl {
                store: "writer",
                variable: "DATABASE_WRITER_URL",
            })?;

        let max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .and_then(|v| v.trim().parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        Ok(Self {
            reader_url,
            writer_url,
            max_connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from(pairs: &[(&str, &str)]) -> Result<DatabaseConfig, ConfigError> {
        let env: HashMap<&str, &str> = pairs.iter().copied().collect();
        DatabaseConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn shared_url_serves_both_stores() {
        let config = from(&[("DATABASE_URL", "postgres://db/registry")]).unwrap();
        assert_eq!(config.reader_url, "postgres://db/registry");
        assert_eq!(config.writer_url, "postgres://db/registry");
        assert_eq!(config.max_connections, 10);
    }

    #[test]
    fn dedicated_urls_win() {
        let config = from(&[
            ("DATABASE_URL", "postgres://db/shared"),
            ("DATABASE_READER_URL", "postgres://replica/mcp_registry"),
            ("DATABASE_WRITER_URL", "postgres://primary/wind_mcp_server"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
        ])
        .unwrap();
        assert_eq!(config.reader_url, "postgres://replica/mcp_registry");
        assert_eq!(config.writer_url, "postgres://primary/wind_mcp_server");
        assert_eq!(config.max_connections, 4);
    }

    #[test]
    fn missing_writer_is_reported() {
        let err = from(&[("DATABASE_READER_URL", "postgres://replica/x")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingDatabaseUrl {
                store: "writer",
                variable: "DATABASE_WRITER_URL",
            }
        );
    }
}
