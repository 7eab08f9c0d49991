//! Gatekeeper Configuration System
//!
//! TOML-based configuration with `GATEKEEPER_*` environment variable overrides.
//! Signing-key material and the bootstrap password are expected to arrive
//! through the environment (or a secret file) and are never serialized back out.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Reject everything except health and login with 503
    pub maintenance_mode: bool,

    /// Enable development mode (lenient defaults, verbose errors in logs)
    pub dev_mode: bool,

    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            request_timeout_secs: 30,
        }
    }
}

/// Principal / audit store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite URL, or `memory` for a process-local store
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://gatekeeper.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url.eq_ignore_ascii_case("memory")
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Allow anonymous self-registration (new accounts get the Viewer role)
    pub allow_registration: bool,

    pub jwt: JwtConfig,
    pub registry: RegistryConfig,
    pub password: PasswordConfig,
    pub bootstrap: BootstrapConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt: JwtConfig::default(),
            registry: RegistryConfig::default(),
            password: PasswordConfig::default(),
            bootstrap: BootstrapConfig::default(),
            allow_registration: true,
        }
    }
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,

    /// HS256 shared secret
    #[serde(skip_serializing)]
    pub secret: String,

    /// File holding the HS256 secret (used when `secret` is empty)
    pub secret_file: String,

    /// RS256 key pair; takes precedence over the shared secret when both are set
    pub private_key_path: String,
    pub public_key_path: String,

    pub access_token_expiry_secs: u64,
    pub refresh_token_expiry_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: "gatekeeper".to_string(),
            audience: "gatekeeper-dashboard".to_string(),
            secret: String::new(),
            secret_file: String::new(),
            private_key_path: String::new(),
            public_key_path: String::new(),
            access_token_expiry_secs: 1800,     // 30 minutes
            refresh_token_expiry_secs: 604_800, // 7 days
        }
    }
}

impl JwtConfig {
    pub fn has_key_pair(&self) -> bool {
        !self.private_key_path.is_empty() && !self.public_key_path.is_empty()
    }

    pub fn has_key_material(&self) -> bool {
        self.has_key_pair() || !self.secret.is_empty() || !self.secret_file.is_empty()
    }

    /// Resolve the HS256 secret, reading `secret_file` when no inline secret is set.
    pub fn resolve_secret(&self) -> Result<Option<String>, ConfigError> {
        if !self.secret.is_empty() {
            return Ok(Some(self.secret.clone()));
        }
        if self.secret_file.is_empty() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.secret_file)?;
        let secret = content.trim().to_string();
        if secret.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "JWT secret file {} is empty",
                self.secret_file
            )));
        }
        Ok(Some(secret))
    }
}

/// Refresh-token registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// `memory` or `redis`
    pub backend: String,
    pub key_prefix: String,
    /// Upper bound on any single registry call; on expiry the request is denied
    pub operation_timeout_ms: u64,
    /// How often expired registry entries are purged
    pub cleanup_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            key_prefix: "gk".to_string(),
            operation_timeout_ms: 2000,
            cleanup_interval_secs: 3600,
        }
    }
}

/// Password policy selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// `strict` or `lenient`
    pub policy: String,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            policy: "strict".to_string(),
        }
    }
}

/// First administrator, created at start-up when no principal has that username
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub admin_username: String,
    pub admin_email: String,
    #[serde(skip_serializing)]
    pub admin_password: String,
}

impl BootstrapConfig {
    pub fn is_enabled(&self) -> bool {
        !self.admin_username.is_empty()
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Check cross-field constraints. Called once at start-up.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let jwt = &self.auth.jwt;

        if !jwt.has_key_material() {
            return Err(ConfigError::ValidationError(
                "no JWT signing key configured: set GATEKEEPER_JWT_SECRET, \
                 GATEKEEPER_JWT_SECRET_FILE or an RS256 key pair"
                    .to_string(),
            ));
        }
        if jwt.private_key_path.is_empty() != jwt.public_key_path.is_empty() {
            return Err(ConfigError::ValidationError(
                "RS256 requires both private_key_path and public_key_path".to_string(),
            ));
        }
        if jwt.access_token_expiry_secs == 0 {
            return Err(ConfigError::ValidationError(
                "access_token_expiry_secs must be positive".to_string(),
            ));
        }
        if jwt.refresh_token_expiry_secs <= jwt.access_token_expiry_secs {
            return Err(ConfigError::ValidationError(
                "refresh_token_expiry_secs must exceed access_token_expiry_secs".to_string(),
            ));
        }

        match self.auth.registry.backend.as_str() {
            "memory" | "redis" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown registry backend '{}', expected memory or redis",
                    other
                )))
            }
        }
        if self.auth.registry.operation_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "registry operation_timeout_ms must be positive".to_string(),
            ));
        }

        match self.auth.password.policy.as_str() {
            "strict" | "lenient" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown password policy '{}', expected strict or lenient",
                    other
                )))
            }
        }

        let bootstrap = &self.auth.bootstrap;
        if bootstrap.is_enabled() && (bootstrap.admin_password.is_empty() || bootstrap.admin_email.is_empty()) {
            return Err(ConfigError::ValidationError(
                "bootstrap admin requires admin_email and admin_password".to_string(),
            ));
        }

        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Gatekeeper Configuration
# Environment variables (GATEKEEPER_*) override these settings.
# Signing secrets belong in the environment, not in this file.

maintenance_mode = false
dev_mode = false

[http]
host = "0.0.0.0"
port = 8000
cors_origins = ["http://localhost:3000", "http://localhost:5173"]
request_timeout_secs = 30

[database]
url = "sqlite://gatekeeper.db?mode=rwc"  # or "memory"
max_connections = 5

[redis]
url = "redis://localhost:6379"

[auth]
allow_registration = true

[auth.jwt]
issuer = "gatekeeper"
audience = "gatekeeper-dashboard"
secret_file = ""
private_key_path = ""
public_key_path = ""
access_token_expiry_secs = 1800
refresh_token_expiry_secs = 604800

[auth.registry]
backend = "memory"  # memory or redis
key_prefix = "gk"
operation_timeout_ms = 2000
cleanup_interval_secs = 3600

[auth.password]
policy = "strict"  # strict or lenient

[auth.bootstrap]
admin_username = ""
admin_email = ""
"#
        .to_string()
    }
}
