// Configuration management

use crate::auth::password::{validate_cost, DEFAULT_COST};
use crate::auth::token::{TokenCodec, MIN_SECRET_LEN};
use crate::core::errors::IdentityError;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Source of raw configuration values
///
/// `get_int` returns `None` when the value is absent or not an integer.
pub trait ConfigurationProvider: Send + Sync {
    fn get_string(&self, name: &str) -> Option<String>;

    fn get_int(&self, name: &str) -> Option<i64> {
        self.get_string(name)?.trim().parse().ok()
    }
}

/// Reads the process environment, after loading `.env` if present
pub struct EnvConfigProvider;

impl EnvConfigProvider {
    pub fn new() -> Self {
        // Skip in test environment to avoid interfering with test environment variables
        #[cfg(not(test))]
        {
            dotenv::dotenv().ok(); // Ignore errors (file may not exist)
        }
        Self
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationProvider for EnvConfigProvider {
    fn get_string(&self, name: &str) -> Option<String> {
        env::var(name).ok()
    }
}

/// In-memory provider, mostly for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MapConfigProvider {
    values: HashMap<String, String>,
}

impl MapConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    pub fn remove(&mut self, name: &str) {
        self.values.remove(name);
    }
}

impl ConfigurationProvider for MapConfigProvider {
    fn get_string(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Credentials for the administrator created on an empty store
pub struct AdminBootstrap {
    pub username: String,
    pub password: SecretString,
    pub email: String,
}

impl std::fmt::Debug for AdminBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminBootstrap")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("email", &self.email)
            .finish()
    }
}

/// Application configuration
///
/// Built once at startup from a `ConfigurationProvider` and threaded into
/// every constructor. Nothing reads ambient state after this point.
/// All values are validated on load with clear error messages.
#[derive(Debug)]
pub struct Config {
    // Backends
    pub database_url: String,
    pub redis_url: String,
    pub db_max_connections: u32,
    pub backend_timeout_secs: u64,

    // Credentials
    pub jwt_secret: SecretString, // hex encoded
    pub hash_cost: u8,
    pub admin: Option<AdminBootstrap>,
    pub ticket_ttl_secs: u64,

    // Logging configuration
    pub log_level: String,
    pub log_format: String, // "json" or "text"
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Supports `.env` file loading in development (via dotenv crate).
    pub fn from_env() -> Result<Self, IdentityError> {
        Self::from_provider(&EnvConfigProvider::new())
    }

    /// Load and validate configuration from any provider
    pub fn from_provider(provider: &dyn ConfigurationProvider) -> Result<Self, IdentityError> {
        let config = Self {
            database_url: Self::get_required(provider, "JUTZO_DB_URL")?,
            redis_url: Self::get_or_default(provider, "JUTZO_REDIS_URL", "redis://localhost"),
            db_max_connections: Self::parse_u32_or_default(provider, "JUTZO_DB_MAX_CONNECTIONS", 10)?,
            backend_timeout_secs: Self::parse_u64_or_default(provider, "JUTZO_BACKEND_TIMEOUT_SECS", 5)?,
            jwt_secret: SecretString::new(Self::get_required(provider, "JUTZO_JWT_SECRET")?),
            hash_cost: Self::parse_hash_cost(provider)?,
            admin: Self::parse_admin(provider)?,
            ticket_ttl_secs: Self::parse_u64_or_default(provider, "JUTZO_TICKET_TTL_SECS", 24 * 60 * 60)?,
            log_level: Self::get_or_default(provider, "JUTZO_LOG_LEVEL", "info"),
            log_format: Self::get_or_default(provider, "JUTZO_LOG_FORMAT", "json"),
        };

        // Post-load validation
        config.validate()?;

        Ok(config)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn ticket_ttl(&self) -> Duration {
        Duration::from_secs(self.ticket_ttl_secs)
    }

    /// Token codec keyed with the configured secret
    pub fn token_codec(&self) -> Result<TokenCodec, IdentityError> {
        TokenCodec::from_hex(self.jwt_secret.expose_secret())
    }

    /// Get value or return default
    fn get_or_default(provider: &dyn ConfigurationProvider, key: &str, default: &str) -> String {
        Self::get_optional(provider, key).unwrap_or_else(|| default.to_string())
    }

    /// Get optional value; empty counts as absent
    fn get_optional(provider: &dyn ConfigurationProvider, key: &str) -> Option<String> {
        provider.get_string(key).filter(|value| !value.is_empty())
    }

    fn get_required(provider: &dyn ConfigurationProvider, key: &str) -> Result<String, IdentityError> {
        Self::get_optional(provider, key)
            .ok_or_else(|| IdentityError::Configuration(format!("required configuration {} is missing", key)))
    }

    /// Parse u64 or return default; zero is rejected
    fn parse_u64_or_default(
        provider: &dyn ConfigurationProvider,
        key: &str,
        default: u64,
    ) -> Result<u64, IdentityError> {
        match Self::get_optional(provider, key) {
            Some(value) => {
                let parsed = value.trim().parse::<u64>().map_err(|e| {
                    IdentityError::Configuration(format!("Invalid {} value '{}': {}", key, value, e))
                })?;

                if parsed == 0 {
                    return Err(IdentityError::Configuration(format!(
                        "{} must be greater than 0",
                        key
                    )));
                }

                Ok(parsed)
            }
            None => Ok(default),
        }
    }

    /// Parse u32 or return default; zero and out-of-range values are rejected
    fn parse_u32_or_default(
        provider: &dyn ConfigurationProvider,
        key: &str,
        default: u32,
    ) -> Result<u32, IdentityError> {
        let value = Self::parse_u64_or_default(provider, key, default as u64)?;
        u32::try_from(value).map_err(|_| {
            IdentityError::Configuration(format!("{} value {} is too large", key, value))
        })
    }

    fn parse_hash_cost(provider: &dyn ConfigurationProvider) -> Result<u8, IdentityError> {
        if Self::get_optional(provider, "JUTZO_HASH_COST").is_none() {
            return Ok(DEFAULT_COST);
        }
        let cost = provider.get_int("JUTZO_HASH_COST").ok_or_else(|| {
            IdentityError::Configuration("JUTZO_HASH_COST must be an integer".to_string())
        })?;
        validate_cost(cost).map_err(|e| IdentityError::Configuration(format!("Invalid JUTZO_HASH_COST: {}", e)))
    }

    /// The admin triple is all-or-nothing
    fn parse_admin(provider: &dyn ConfigurationProvider) -> Result<Option<AdminBootstrap>, IdentityError> {
        let username = Self::get_optional(provider, "JUTZO_ADMIN_USER");
        let password = Self::get_optional(provider, "JUTZO_ADMIN_PASS");
        let email = Self::get_optional(provider, "JUTZO_ADMIN_EMAIL");

        match (username, password, email) {
            (Some(username), Some(password), Some(email)) => Ok(Some(AdminBootstrap {
                username,
                password: SecretString::new(password),
                email,
            })),
            (None, None, None) => Ok(None),
            _ => Err(IdentityError::Configuration(
                "JUTZO_ADMIN_USER, JUTZO_ADMIN_PASS and JUTZO_ADMIN_EMAIL must be set together".to_string(),
            )),
        }
    }

    /// Validate all configuration values
    fn validate(&self) -> Result<(), IdentityError> {
        Self::validate_url(&self.database_url, "Database")?;
        Self::validate_redis_url(&self.redis_url)?;
        Self::validate_secret(self.jwt_secret.expose_secret())?;

        if self.db_max_connections == 0 {
            return Err(IdentityError::Configuration(
                "JUTZO_DB_MAX_CONNECTIONS must be greater than 0".to_string(),
            ));
        }

        Self::validate_log_level(&self.log_level)?;
        Self::validate_log_format(&self.log_format)?;

        Ok(())
    }

    /// Validate URL format
    fn validate_url(url: &str, description: &str) -> Result<url::Url, IdentityError> {
        url::Url::parse(url).map_err(|e| {
            IdentityError::Configuration(format!(
                "Invalid {} URL '{}': {}",
                description,
                crate::utils::redact_url(url),
                e
            ))
        })
    }

    fn validate_redis_url(url: &str) -> Result<(), IdentityError> {
        let parsed = Self::validate_url(url, "Redis")?;
        match parsed.scheme() {
            "redis" | "rediss" => Ok(()),
            scheme => Err(IdentityError::Configuration(format!(
                "Invalid JUTZO_REDIS_URL scheme '{}': must be 'redis' or 'rediss'",
                scheme
            ))),
        }
    }

    fn validate_secret(secret_hex: &str) -> Result<(), IdentityError> {
        let bytes = hex::decode(secret_hex.trim()).map_err(|e| {
            IdentityError::Configuration(format!("JUTZO_JWT_SECRET is not valid hex: {}", e))
        })?;
        if bytes.len() < MIN_SECRET_LEN {
            return Err(IdentityError::Configuration(format!(
                "JUTZO_JWT_SECRET must decode to at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        Ok(())
    }

    /// Validate log level
    fn validate_log_level(level: &str) -> Result<(), IdentityError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(IdentityError::Configuration(format!(
                "Invalid JUTZO_LOG_LEVEL '{}': must be one of {}",
                level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }

    /// Validate log format
    fn validate_log_format(format: &str) -> Result<(), IdentityError> {
        if format != "json" && format != "text" {
            return Err(IdentityError::Configuration(format!(
                "Invalid JUTZO_LOG_FORMAT '{}': must be 'json' or 'text'",
                format
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Create a test configuration
    ///
    /// Bypasses provider loading. Uses the cheapest hash cost so tests stay fast.
    pub fn test_config() -> Self {
        Self {
            database_url: "postgres://jutzo@localhost/jutzo_test".to_string(),
            redis_url: "redis://localhost".to_string(),
            db_max_connections: 5,
            backend_timeout_secs: 5,
            jwt_secret: SecretString::new("ab".repeat(32)),
            hash_cost: crate::auth::password::MIN_COST,
            admin: Some(AdminBootstrap {
                username: "admin".to_string(),
                password: SecretString::new("admin-password".to_string()),
                email: "admin@example.com".to_string(),
            }),
            ticket_ttl_secs: 24 * 60 * 60,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}
