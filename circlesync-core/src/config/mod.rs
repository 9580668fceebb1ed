//! Configuration for the sync engine
//!
//! Defaults mirror the freshness windows the mobile clients shipped with.
//! A config can be loaded from a TOML file or from `CIRCLESYNC_<SECTION>_<KEY>`
//! environment variables, and is validated before use.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

use crate::logging::{LogConfig, LogLevel};

/// Main engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Freshness windows per cache
    pub cache: CacheTtls,

    /// Optimistic overlay behavior
    pub overlay: OverlayConfig,

    /// Remote call bounds
    pub remote: RemoteConfig,

    /// Session lifecycle
    pub session: SessionConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Time-to-live of each cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
    #[serde(with = "humantime_serde")]
    pub circles: Duration,

    #[serde(with = "humantime_serde")]
    pub nearby: Duration,

    #[serde(with = "humantime_serde")]
    pub joined: Duration,

    #[serde(with = "humantime_serde")]
    pub member_requests: Duration,

    #[serde(with = "humantime_serde")]
    pub friends: Duration,

    #[serde(with = "humantime_serde")]
    pub outgoing: Duration,

    #[serde(with = "humantime_serde")]
    pub incoming: Duration,

    #[serde(with = "humantime_serde")]
    pub blocked: Duration,

    /// Derived relationship map
    #[serde(with = "humantime_serde")]
    pub relationships: Duration,
}

/// Overlay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Grace added to the remote timeout before an orphaned optimistic
    /// transform expires
    #[serde(with = "humantime_serde")]
    pub settle_expiry: Duration,

    /// Minimum spacing between two expiry sweeps
    #[serde(with = "humantime_serde")]
    pub sweep_tick_floor: Duration,
}

/// Remote configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Upper bound on a single remote mutation or fetch
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long shutdown waits for background tasks
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            circles: Duration::from_secs(60),
            nearby: Duration::from_secs(60),
            joined: Duration::from_secs(60),
            member_requests: Duration::from_secs(30),
            friends: Duration::from_secs(30),
            outgoing: Duration::from_secs(30),
            incoming: Duration::from_secs(30),
            blocked: Duration::from_secs(60),
            relationships: Duration::from_secs(10),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            settle_expiry: Duration::from_secs(1),
            sweep_tick_floor: Duration::from_millis(50),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(15),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Convert to the logging module's builder
    pub fn to_log_config(&self) -> Result<LogConfig, ConfigError> {
        let level = LogLevel::from_str(&self.level).map_err(|e| ConfigError::InvalidValue {
            key: "logging.level".to_string(),
            reason: e.to_string(),
        })?;
        Ok(LogConfig::new(level)
            .with_json(self.json_format)
            .with_timestamp(self.with_timestamp)
            .with_target(self.with_target))
    }
}

impl SyncConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: CIRCLESYNC_<SECTION>_<KEY>
    /// Example: CIRCLESYNC_CACHE_FRIENDS=45s
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let vars = EnvVars { lookup: &lookup };

        let cache = &mut config.cache;
        vars.duration("CIRCLESYNC_CACHE_CIRCLES", &mut cache.circles)?;
        vars.duration("CIRCLESYNC_CACHE_NEARBY", &mut cache.nearby)?;
        vars.duration("CIRCLESYNC_CACHE_JOINED", &mut cache.joined)?;
        vars.duration("CIRCLESYNC_CACHE_MEMBER_REQUESTS", &mut cache.member_requests)?;
        vars.duration("CIRCLESYNC_CACHE_FRIENDS", &mut cache.friends)?;
        vars.duration("CIRCLESYNC_CACHE_OUTGOING", &mut cache.outgoing)?;
        vars.duration("CIRCLESYNC_CACHE_INCOMING", &mut cache.incoming)?;
        vars.duration("CIRCLESYNC_CACHE_BLOCKED", &mut cache.blocked)?;
        vars.duration("CIRCLESYNC_CACHE_RELATIONSHIPS", &mut cache.relationships)?;

        vars.duration("CIRCLESYNC_OVERLAY_SETTLE_EXPIRY", &mut config.overlay.settle_expiry)?;
        vars.duration(
            "CIRCLESYNC_OVERLAY_SWEEP_TICK_FLOOR",
            &mut config.overlay.sweep_tick_floor,
        )?;
        vars.duration("CIRCLESYNC_REMOTE_CALL_TIMEOUT", &mut config.remote.call_timeout)?;
        vars.duration(
            "CIRCLESYNC_SESSION_SHUTDOWN_GRACE",
            &mut config.session.shutdown_grace,
        )?;

        if let Some(level) = lookup("CIRCLESYNC_LOGGING_LEVEL") {
            config.logging.level = level;
        }
        vars.parsed("CIRCLESYNC_LOGGING_JSON_FORMAT", &mut config.logging.json_format)?;
        vars.parsed(
            "CIRCLESYNC_LOGGING_WITH_TIMESTAMP",
            &mut config.logging.with_timestamp,
        )?;
        vars.parsed("CIRCLESYNC_LOGGING_WITH_TARGET", &mut config.logging.with_target)?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ttls = [
            ("cache.circles", self.cache.circles),
            ("cache.nearby", self.cache.nearby),
            ("cache.joined", self.cache.joined),
            ("cache.member_requests", self.cache.member_requests),
            ("cache.friends", self.cache.friends),
            ("cache.outgoing", self.cache.outgoing),
            ("cache.incoming", self.cache.incoming),
            ("cache.blocked", self.cache.blocked),
            ("cache.relationships", self.cache.relationships),
        ];
        if let Some((name, _)) = ttls.iter().find(|(_, ttl)| ttl.is_zero()) {
            return Err(ConfigError::ValidationFailed(format!(
                "{} must be greater than 0",
                name
            )));
        }

        if self.remote.call_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "remote.call_timeout must be greater than 0".to_string(),
            ));
        }

        if self.overlay.sweep_tick_floor > self.overlay.settle_expiry {
            return Err(ConfigError::ValidationFailed(
                "overlay.sweep_tick_floor must not exceed overlay.settle_expiry".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

struct EnvVars<'a, F> {
    lookup: &'a F,
}

impl<F> EnvVars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn duration(&self, key: &str, target: &mut Duration) -> Result<(), ConfigError> {
        if let Some(raw) = (self.lookup)(key) {
            *target = humantime_serde::re::humantime::parse_duration(&raw).map_err(|e| {
                ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(())
    }

    fn parsed<T>(&self, key: &str, target: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(raw) = (self.lookup)(key) {
            *target = raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}
