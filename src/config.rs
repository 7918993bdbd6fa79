// Configuration File Support
//
// TOML configuration for the ticketgate server with environment variable
// overrides. Loaded from --config or the XDG config directory:
// ~/.config/ticketgate/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::organizer::Organizer;
use crate::throttle::PlanLimits;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// HTTP listener
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Throttling behaviour and limits
    pub throttle: ThrottleConfig,

    /// Organizer token verification
    pub auth: AuthConfig,

    /// Abuse log sink
    pub abuse_log: AbuseLogConfig,

    /// Admin routes
    pub admin: AdminConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,

    /// Organizers known to the in-memory directory
    pub organizers: Vec<Organizer>,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Take client addresses from X-Forwarded-For; enable only behind a
    /// proxy that overwrites the header
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            trust_forwarded_for: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Throttle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThrottleConfig {
    /// When false, identity is still required but nothing is counted
    pub enabled: bool,

    /// Seconds between expired-counter sweeps
    pub cleanup_interval_secs: u64,

    /// Plan x window limit table
    pub limits: PlanLimits,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cleanup_interval_secs: 60,
            limits: PlanLimits::default(),
        }
    }
}

/// Organizer token configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret; bearer tokens are ignored when unset
    pub jwt_secret: Option<String>,
}

/// Abuse log configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AbuseLogConfig {
    /// JSON-lines file; in-memory only when unset
    pub path: Option<PathBuf>,

    /// Entries kept in memory
    pub memory_capacity: usize,

    /// Entries waiting for the writer; further rejections are not logged
    pub queue_capacity: usize,
}

impl Default for AbuseLogConfig {
    fn default() -> Self {
        Self {
            path: None,
            memory_capacity: crate::abuse_log::DEFAULT_MEMORY_CAPACITY,
            queue_capacity: crate::abuse_log::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Admin route configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Expected `x-admin-token` value; admin routes are off when unset
    pub token: Option<String>,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to serve /metrics
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Shortest accepted JWT secret, in bytes
const MIN_JWT_SECRET_LEN: usize = 32;

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path())
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or if
    /// the result fails validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/ticketgate/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "ticketgate", "ticketgate") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("ticketgate")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - TICKETGATE_HOST
    /// - TICKETGATE_PORT
    /// - TICKETGATE_TRUST_FORWARDED_FOR
    /// - TICKETGATE_LOG_LEVEL
    /// - TICKETGATE_LOG_FORMAT
    /// - TICKETGATE_THROTTLE_ENABLED
    /// - TICKETGATE_CLEANUP_INTERVAL_SECS
    /// - TICKETGATE_JWT_SECRET
    /// - TICKETGATE_ABUSE_LOG_PATH
    /// - TICKETGATE_ADMIN_TOKEN
    /// - TICKETGATE_METRICS_ENABLED
    pub fn apply_env_overrides(self) -> Self {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_env_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(host) = lookup("TICKETGATE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("TICKETGATE_PORT").and_then(|v| v.parse::<u16>().ok()) {
            self.server.port = port;
        }
        if let Some(trust) = lookup("TICKETGATE_TRUST_FORWARDED_FOR") {
            self.server.trust_forwarded_for =
                trust.parse().unwrap_or(self.server.trust_forwarded_for);
        }

        // Logging overrides
        if let Some(level) = lookup("TICKETGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TICKETGATE_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Throttle overrides
        if let Some(enabled) = lookup("TICKETGATE_THROTTLE_ENABLED") {
            self.throttle.enabled = enabled.parse().unwrap_or(self.throttle.enabled);
        }
        if let Some(interval) =
            lookup("TICKETGATE_CLEANUP_INTERVAL_SECS").and_then(|v| v.parse::<u64>().ok())
        {
            if interval > 0 {
                self.throttle.cleanup_interval_secs = interval;
            }
        }

        // Secrets
        if let Some(secret) = lookup("TICKETGATE_JWT_SECRET") {
            self.auth.jwt_secret = Some(secret);
        }
        if let Some(token) = lookup("TICKETGATE_ADMIN_TOKEN") {
            self.admin.token = Some(token);
        }

        if let Some(path) = lookup("TICKETGATE_ABUSE_LOG_PATH") {
            self.abuse_log.path = Some(PathBuf::from(path));
        }

        // Metrics overrides
        if let Some(enabled) = lookup("TICKETGATE_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        self.listen_addr()?;

        if self.throttle.cleanup_interval_secs == 0 {
            anyhow::bail!("Cleanup interval must be > 0");
        }

        if let Some(secret) = &self.auth.jwt_secret {
            if secret.len() < MIN_JWT_SECRET_LEN {
                anyhow::bail!("JWT secret must be at least {} bytes", MIN_JWT_SECRET_LEN);
            }
        }

        if matches!(&self.admin.token, Some(token) if token.trim().is_empty()) {
            anyhow::bail!("Admin token must not be empty");
        }

        if self.abuse_log.memory_capacity == 0 {
            anyhow::bail!("Abuse log memory capacity must be > 0");
        }

        if self.abuse_log.queue_capacity == 0 {
            anyhow::bail!("Abuse log queue capacity must be > 0");
        }

        let mut seen = std::collections::HashSet::new();
        for organizer in &self.organizers {
            if organizer.id.trim().is_empty() {
                anyhow::bail!("Organizer '{}' has an empty id", organizer.name);
            }
            if !seen.insert(organizer.id.as_str()) {
                anyhow::bail!("Organizer id '{}' is listed more than once", organizer.id);
            }
        }

        Ok(())
    }

    /// Socket address to listen on
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid listen address {}:{}",
                    self.server.host, self.server.port
                )
            })
    }

    /// Interval between counter sweeps
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.throttle.cleanup_interval_secs)
    }
}
