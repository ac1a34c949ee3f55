//! Process-wide configuration for the pool and the router.
//!
//! Configuration is read once at process start, usually from the
//! environment, and is immutable afterwards. Malformed values are errors;
//! they are never replaced by defaults silently.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Environment variable for the router's default deadline.
pub const DEFAULT_DEADLINE_ENV: &str = "SHIFTBOOK_DEFAULT_DEADLINE";

/// Bounds of the shared connection pool.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use shiftbook_persistence::config::PoolConfig;
///
/// let config = PoolConfig::default()
///     .with_max_connections(8)
///     .with_acquire_timeout(Duration::from_secs(5));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of concurrently open connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum number of idle connections kept open.
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,

    /// Connections older than this are closed instead of reused.
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime: Duration,

    /// How long `acquire` waits for a free connection.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: Duration,
}

fn default_max_connections() -> usize {
    5
}

fn default_max_idle() -> usize {
    2
}

fn default_max_lifetime() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_idle: default_max_idle(),
            max_lifetime: default_max_lifetime(),
            acquire_timeout: default_acquire_timeout(),
        }
    }
}

impl PoolConfig {
    /// A pool with exactly one connection.
    pub fn single_connection() -> Self {
        Self {
            max_connections: 1,
            max_idle: 1,
            ..Default::default()
        }
    }

    /// Sets the maximum number of connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self.max_idle = self.max_idle.min(max);
        self
    }

    /// Sets the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the maximum connection lifetime.
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Reads overrides from `{prefix}MAX_CONNECTIONS`, `{prefix}MAX_IDLE`,
    /// `{prefix}MAX_LIFETIME` and `{prefix}ACQUIRE_TIMEOUT`. Durations use
    /// humantime syntax such as `30s` or `15m`.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(max) = parse_var(&lookup, &format!("{prefix}MAX_CONNECTIONS"))? {
            config.max_connections = max;
        }
        if let Some(idle) = parse_var(&lookup, &format!("{prefix}MAX_IDLE"))? {
            config.max_idle = idle;
        }
        if let Some(lifetime) = duration_var(&lookup, &format!("{prefix}MAX_LIFETIME"))? {
            config.max_lifetime = lifetime;
        }
        if let Some(timeout) = duration_var(&lookup, &format!("{prefix}ACQUIRE_TIMEOUT"))? {
            config.acquire_timeout = timeout;
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the bounds are consistent.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_connections == 0 {
            return Err(ValidationError::InvalidConfig {
                key: "max_connections".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_idle > self.max_connections {
            return Err(ValidationError::InvalidConfig {
                key: "max_idle".to_string(),
                message: format!(
                    "{} exceeds max_connections ({})",
                    self.max_idle, self.max_connections
                ),
            });
        }
        if self.max_lifetime.is_zero() {
            return Err(ValidationError::InvalidConfig {
                key: "max_lifetime".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Router-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Deadline applied when neither the request nor the tenant overrides it.
    #[serde(default = "default_deadline")]
    pub default_deadline: Duration,
}

fn default_deadline() -> Duration {
    Duration::from_secs(30)
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_deadline: default_deadline(),
        }
    }
}

impl RouterConfig {
    /// Sets the default deadline.
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// Reads `SHIFTBOOK_DEFAULT_DEADLINE` from the process environment.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`RouterConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(deadline) = duration_var(&lookup, DEFAULT_DEADLINE_ENV)? {
            if deadline.is_zero() {
                return Err(ValidationError::InvalidConfig {
                    key: DEFAULT_DEADLINE_ENV.to_string(),
                    message: "the default deadline must be greater than zero".to_string(),
                });
            }
            config.default_deadline = deadline;
        }
        Ok(config)
    }
}

pub(crate) fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ValidationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ValidationError::InvalidConfig {
                key: key.to_string(),
                message: format!("'{}': {}", raw, e),
            }),
    }
}

pub(crate) fn duration_var<F>(lookup: &F, key: &str) -> Result<Option<Duration>, ValidationError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => humantime::parse_duration(raw.trim())
            .map(Some)
            .map_err(|e| ValidationError::InvalidConfig {
                key: key.to_string(),
                message: format!("'{}': {}", raw, e),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_pool_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.max_idle, 2);
        assert_eq!(config.max_lifetime, Duration::from_secs(1800));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_from_lookup() {
        let config = PoolConfig::from_lookup(
            "SHIFTBOOK_PG_",
            lookup(&[
                ("SHIFTBOOK_PG_MAX_CONNECTIONS", "3"),
                ("SHIFTBOOK_PG_MAX_IDLE", "1"),
                ("SHIFTBOOK_PG_MAX_LIFETIME", "15m"),
                ("SHIFTBOOK_PG_ACQUIRE_TIMEOUT", "500ms"),
            ]),
        )
        .unwrap();

        assert_eq!(config.max_connections, 3);
        assert_eq!(config.max_idle, 1);
        assert_eq!(config.max_lifetime, Duration::from_secs(900));
        assert_eq!(config.acquire_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_malformed_values_are_errors() {
        let err = PoolConfig::from_lookup(
            "SHIFTBOOK_PG_",
            lookup(&[("SHIFTBOOK_PG_MAX_CONNECTIONS", "many")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("SHIFTBOOK_PG_MAX_CONNECTIONS"));

        let err = PoolConfig::from_lookup(
            "SHIFTBOOK_PG_",
            lookup(&[("SHIFTBOOK_PG_MAX_LIFETIME", "forever")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("SHIFTBOOK_PG_MAX_LIFETIME"));
    }

    #[test]
    fn test_idle_above_max_is_rejected() {
        let err = PoolConfig::from_lookup(
            "SHIFTBOOK_PG_",
            lookup(&[
                ("SHIFTBOOK_PG_MAX_CONNECTIONS", "1"),
                ("SHIFTBOOK_PG_MAX_IDLE", "4"),
            ]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_idle"));
    }

    #[test]
    fn test_router_from_lookup() {
        let config =
            RouterConfig::from_lookup(lookup(&[(DEFAULT_DEADLINE_ENV, "5s")])).unwrap();
        assert_eq!(config.default_deadline, Duration::from_secs(5));

        assert!(RouterConfig::from_lookup(lookup(&[(DEFAULT_DEADLINE_ENV, "0s")])).is_err());
        assert_eq!(
            RouterConfig::from_lookup(lookup(&[])).unwrap(),
            RouterConfig::default()
        );
    }
}
