//! Pool configuration

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection pool settings.
///
/// Deserializes from TOML with every field optional:
///
/// ```toml
/// max_connections = 8
/// min_connections = 2
/// checkout_timeout_ms = 5000
/// extensions = ["algo"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on open connections (available + active)
    pub max_connections: usize,

    /// Connections opened eagerly at construction
    pub min_connections: usize,

    /// How long a saturated checkout waits before failing
    pub checkout_timeout_ms: u64,

    /// Engine extensions installed and loaded once at construction
    pub extensions: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: num_cpus::get(),
            min_connections: 0,
            checkout_timeout_ms: 30_000,
            extensions: Vec::new(),
        }
    }
}

impl PoolConfig {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            ..Self::default()
        }
    }

    pub fn with_min_connections(mut self, min_connections: usize) -> Self {
        self.min_connections = min_connections;
        self
    }

    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.push(name.into());
        self
    }

    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_millis(self.checkout_timeout_ms)
    }

    /// Parse from a TOML document; missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> DbResult<Self> {
        toml::from_str(source).map_err(|e| DbError::Configuration(e.to_string()))
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.max_connections == 0 {
            return Err(DbError::Configuration(
                "max_connections must be greater than 0".to_string(),
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(DbError::Configuration(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }

        if self.checkout_timeout_ms == 0 {
            return Err(DbError::Configuration(
                "checkout_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, num_cpus::get());
        assert_eq!(config.min_connections, 0);
        assert_eq!(config.checkout_timeout(), Duration::from_secs(30));
        assert!(config.extensions.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_setters() {
        let config = PoolConfig::new(4)
            .with_min_connections(2)
            .with_checkout_timeout(Duration::from_millis(250))
            .with_extension("algo");

        assert_eq!(config.max_connections, 4);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.checkout_timeout_ms, 250);
        assert_eq!(config.extensions, vec!["algo".to_string()]);
    }

    #[test]
    fn test_from_toml() {
        let config = PoolConfig::from_toml_str(
            r#"
            max_connections = 8
            extensions = ["algo", "fts"]
            "#,
        )
        .unwrap();

        assert_eq!(config.max_connections, 8);
        assert_eq!(config.min_connections, 0);
        assert_eq!(config.checkout_timeout_ms, 30_000);
        assert_eq!(config.extensions.len(), 2);
    }

    #[test]
    fn test_from_toml_rejects_bad_types() {
        let err = PoolConfig::from_toml_str("max_connections = \"many\"").unwrap_err();
        assert!(matches!(err, DbError::Configuration(_)));
    }

    #[test]
    fn test_validation() {
        assert!(PoolConfig::new(0).validate().is_err());
        assert!(PoolConfig::new(2).with_min_connections(3).validate().is_err());
        assert!(PoolConfig::new(2)
            .with_checkout_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(PoolConfig::new(2).with_min_connections(2).validate().is_ok());
    }
}
