//! Runtime configuration.
//!
//! Each thread hosts an independent reactive graph, so configuration is
//! thread-local as well. Configure once at startup (or per test).

use std::cell::RefCell;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of times one job may run within a single flush.
pub const DEFAULT_RECURSION_LIMIT: usize = 100;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How many times the same job may run during one flush before it is
    /// reported as a runaway feedback loop and skipped.
    pub recursion_limit: usize,

    /// Emit a warning when a write through a readonly handle is rejected.
    pub warn_on_readonly_write: bool,

    /// Invoke `on_track` / `on_trigger` debugger hooks.
    pub dev_diagnostics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            warn_on_readonly_write: true,
            dev_diagnostics: true,
        }
    }
}

/// Errors from loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("recursion_limit must be at least 1")]
    ZeroRecursionLimit,
}

impl Config {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recursion_limit == 0 {
            return Err(ConfigError::ZeroRecursionLimit);
        }
        Ok(())
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_dev_diagnostics(mut self, enabled: bool) -> Self {
        self.dev_diagnostics = enabled;
        self
    }

    pub fn with_readonly_warnings(mut self, enabled: bool) -> Self {
        self.warn_on_readonly_write = enabled;
        self
    }
}

thread_local! {
    static CONFIG: RefCell<Config> = RefCell::new(Config::default());
}

/// Replace the current thread's configuration.
pub fn configure(config: Config) -> Result<(), ConfigError> {
    config.validate()?;
    tracing::debug!(?config, "reactive runtime configured");
    CONFIG.with(|slot| *slot.borrow_mut() = config);
    Ok(())
}

/// A copy of the current thread's configuration.
pub fn config() -> Config {
    with_config(Config::clone)
}

pub(crate) fn with_config<R>(f: impl FnOnce(&Config) -> R) -> R {
    CONFIG.with(|slot| f(&slot.borrow()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.recursion_limit, 100);
        assert!(config.warn_on_readonly_write);
        assert!(config.dev_diagnostics);
    }

    #[test]
    fn from_json_fills_missing_fields() {
        let config = Config::from_json(r#"{ "recursion_limit": 5 }"#).unwrap();
        assert_eq!(config.recursion_limit, 5);
        assert!(config.dev_diagnostics);
    }

    #[test]
    fn from_json_rejects_zero_limit() {
        let err = Config::from_json(r#"{ "recursion_limit": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroRecursionLimit));
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(matches!(
            Config::from_json("not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn configure_is_thread_local() {
        configure(Config::default().with_recursion_limit(3)).unwrap();
        assert_eq!(config().recursion_limit, 3);

        let other = std::thread::spawn(|| config().recursion_limit).join().unwrap();
        assert_eq!(other, DEFAULT_RECURSION_LIMIT);

        configure(Config::default()).unwrap();
    }
}
