//! Configuration management
//!
//! Configuration is loaded from `config.yml` and can be overridden with
//! `NALU_*` environment variables. Missing values fall back to defaults, so
//! the service starts with no configuration file at all.

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Staff console authentication
    #[serde(default)]
    pub auth: AuthConfig,
    /// Voucher store cache settings
    #[serde(default)]
    pub store: StoreConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (the console sends the session cookie)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/nalu.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Staff credential and session settings
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Staff username
    #[serde(default = "default_username")]
    pub username: String,
    /// Plaintext staff password, hashed once at startup
    #[serde(default = "default_password")]
    pub password: String,
    /// Argon2 PHC hash of the staff password; takes precedence over `password`
    #[serde(default)]
    pub password_hash: Option<String>,
    /// Key for signing session tokens. A random key is generated when unset,
    /// which signs out every console on restart.
    #[serde(default)]
    pub session_secret: Option<String>,
    /// Session lifetime in hours
    #[serde(default = "default_session_hours")]
    pub session_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: default_password(),
            password_hash: None,
            session_secret: None,
            session_hours: default_session_hours(),
        }
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("password_hash", &self.password_hash.as_ref().map(|_| "<redacted>"))
            .field("session_secret", &self.session_secret.as_ref().map(|_| "<redacted>"))
            .field("session_hours", &self.session_hours)
            .finish()
    }
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "nalubeach2025".to_string()
}

fn default_session_hours() -> i64 {
    8
}

/// Voucher store cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How often the cached voucher list is reloaded from the database
    /// (0 disables periodic reloads)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,
    /// Capacity of the change-notification channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: default_refresh_interval(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_event_buffer() -> usize {
    256
}

/// Longest accepted session lifetime, one year
pub const MAX_SESSION_HOURS: i64 = 24 * 365;

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// A missing or empty file yields the defaults. Invalid YAML is an error
    /// that names the file and the failing location.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: format_yaml_error(&e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Recognised variables:
    /// - NALU_SERVER_HOST, NALU_SERVER_PORT, NALU_SERVER_CORS_ORIGIN
    /// - NALU_DATABASE_DRIVER, NALU_DATABASE_URL
    /// - NALU_AUTH_USERNAME, NALU_AUTH_PASSWORD, NALU_AUTH_PASSWORD_HASH,
    ///   NALU_AUTH_SESSION_SECRET, NALU_AUTH_SESSION_HOURS
    /// - NALU_STORE_REFRESH_INTERVAL_SECONDS, NALU_STORE_EVENT_BUFFER
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.username.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.username must not be empty".to_string(),
            ));
        }
        if self.auth.session_hours <= 0 {
            return Err(ConfigError::ValidationError(
                "auth.session_hours must be positive".to_string(),
            ));
        }
        if self.auth.session_hours > MAX_SESSION_HOURS {
            return Err(ConfigError::ValidationError(format!(
                "auth.session_hours must be at most {}",
                MAX_SESSION_HOURS
            )));
        }
        if self.store.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "store.event_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("NALU_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("NALU_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("NALU_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        if let Ok(driver) = std::env::var("NALU_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {}
            }
        }
        if let Ok(url) = std::env::var("NALU_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(username) = std::env::var("NALU_AUTH_USERNAME") {
            self.auth.username = username;
        }
        if let Ok(password) = std::env::var("NALU_AUTH_PASSWORD") {
            self.auth.password = password;
        }
        if let Ok(hash) = std::env::var("NALU_AUTH_PASSWORD_HASH") {
            self.auth.password_hash = Some(hash);
        }
        if let Ok(secret) = std::env::var("NALU_AUTH_SESSION_SECRET") {
            self.auth.session_secret = Some(secret);
        }
        if let Ok(hours) = std::env::var("NALU_AUTH_SESSION_HOURS") {
            if let Ok(hours) = hours.parse::<i64>() {
                self.auth.session_hours = hours;
            }
        }

        if let Ok(interval) = std::env::var("NALU_STORE_REFRESH_INTERVAL_SECONDS") {
            if let Ok(interval) = interval.parse::<u64>() {
                self.store.refresh_interval_seconds = interval;
            }
        }
        if let Ok(buffer) = std::env::var("NALU_STORE_EVENT_BUFFER") {
            if let Ok(buffer) = buffer.parse::<usize>() {
                self.store.event_buffer = buffer;
            }
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
