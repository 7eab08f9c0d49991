//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "gatekeeper.toml",
    "config.toml",
    "./config/gatekeeper.toml",
    "/etc/gatekeeper/config.toml",
];

const ENV_PREFIX: &str = "GATEKEEPER_";

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an explicit variable source.
    pub fn load_with<F>(&self, lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file(&lookup) {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, &lookup);

        Ok(config)
    }

    fn find_config_file<F>(&self, lookup: &F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured config file does not exist");
        }

        if let Some(path) = lookup("GATEKEEPER_CONFIG").map(PathBuf::from) {
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn var<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.is_empty())
}

fn parsed<F, T>(lookup: &F, name: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = var(lookup, name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = %format!("{}{}", ENV_PREFIX, name), "Ignoring unparseable override");
            None
        }
    }
}

fn flag<F>(lookup: &F, name: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    var(lookup, name).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

/// Apply `GATEKEEPER_*` overrides on top of file/default values
fn apply_overrides<F>(config: &mut AppConfig, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    // HTTP
    if let Some(val) = var(lookup, "HTTP_HOST") {
        config.http.host = val;
    }
    if let Some(port) = parsed(lookup, "HTTP_PORT") {
        config.http.port = port;
    }
    if let Some(val) = var(lookup, "CORS_ORIGINS") {
        config.http.cors_origins = val
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Some(secs) = parsed(lookup, "REQUEST_TIMEOUT_SECS") {
        config.http.request_timeout_secs = secs;
    }

    // Stores
    if let Some(val) = var(lookup, "DATABASE_URL") {
        config.database.url = val;
    }
    if let Some(val) = var(lookup, "REDIS_URL") {
        config.redis.url = val;
    }

    // JWT
    if let Some(val) = var(lookup, "JWT_ISSUER") {
        config.auth.jwt.issuer = val;
    }
    if let Some(val) = var(lookup, "JWT_AUDIENCE") {
        config.auth.jwt.audience = val;
    }
    if let Some(val) = var(lookup, "JWT_SECRET") {
        config.auth.jwt.secret = val;
    }
    if let Some(val) = var(lookup, "JWT_SECRET_FILE") {
        config.auth.jwt.secret_file = val;
    }
    if let Some(val) = var(lookup, "JWT_PRIVATE_KEY_PATH") {
        config.auth.jwt.private_key_path = val;
    }
    if let Some(val) = var(lookup, "JWT_PUBLIC_KEY_PATH") {
        config.auth.jwt.public_key_path = val;
    }
    if let Some(secs) = parsed(lookup, "ACCESS_TOKEN_EXPIRY_SECS") {
        config.auth.jwt.access_token_expiry_secs = secs;
    }
    if let Some(secs) = parsed(lookup, "REFRESH_TOKEN_EXPIRY_SECS") {
        config.auth.jwt.refresh_token_expiry_secs = secs;
    }

    // Registry
    if let Some(val) = var(lookup, "REGISTRY_BACKEND") {
        config.auth.registry.backend = val.to_ascii_lowercase();
    }
    if let Some(val) = var(lookup, "REGISTRY_KEY_PREFIX") {
        config.auth.registry.key_prefix = val;
    }
    if let Some(ms) = parsed(lookup, "REGISTRY_TIMEOUT_MS") {
        config.auth.registry.operation_timeout_ms = ms;
    }
    if let Some(secs) = parsed(lookup, "REGISTRY_CLEANUP_INTERVAL_SECS") {
        config.auth.registry.cleanup_interval_secs = secs;
    }

    // Accounts
    if let Some(val) = var(lookup, "PASSWORD_POLICY") {
        config.auth.password.policy = val.to_ascii_lowercase();
    }
    if let Some(enabled) = flag(lookup, "ALLOW_REGISTRATION") {
        config.auth.allow_registration = enabled;
    }
    if let Some(val) = var(lookup, "ADMIN_USERNAME") {
        config.auth.bootstrap.admin_username = val;
    }
    if let Some(val) = var(lookup, "ADMIN_EMAIL") {
        config.auth.bootstrap.admin_email = val;
    }
    if let Some(val) = var(lookup, "ADMIN_PASSWORD") {
        config.auth.bootstrap.admin_password = val;
    }

    // General
    if let Some(enabled) = flag(lookup, "MAINTENANCE_MODE") {
        config.maintenance_mode = enabled;
    }
    if let Some(enabled) = flag(lookup, "DEV_MODE") {
        config.dev_mode = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn loader_without_file() -> ConfigLoader {
        ConfigLoader::with_path("/nonexistent/gatekeeper-test.toml")
    }

    #[test]
    fn test_env_overrides() {
        let lookup = lookup_from(&[
            ("GATEKEEPER_HTTP_PORT", "9100"),
            ("GATEKEEPER_CORS_ORIGINS", "https://a.example, https://b.example"),
            ("GATEKEEPER_JWT_SECRET", "env-secret"),
            ("GATEKEEPER_ACCESS_TOKEN_EXPIRY_SECS", "900"),
            ("GATEKEEPER_REGISTRY_BACKEND", "Redis"),
            ("GATEKEEPER_ALLOW_REGISTRATION", "false"),
            ("GATEKEEPER_MAINTENANCE_MODE", "1"),
        ]);

        let config = loader_without_file().load_with(lookup).unwrap();
        assert_eq!(config.http.port, 9100);
        assert_eq!(
            config.http.cors_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert_eq!(config.auth.jwt.secret, "env-secret");
        assert_eq!(config.auth.jwt.access_token_expiry_secs, 900);
        assert_eq!(config.auth.registry.backend, "redis");
        assert!(!config.auth.allow_registration);
        assert!(config.maintenance_mode);
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let lookup = lookup_from(&[("GATEKEEPER_HTTP_PORT", "not-a-port")]);
        let config = loader_without_file().load_with(lookup).unwrap();
        assert_eq!(config.http.port, 8000);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [http]
            port = 7000

            [auth.jwt]
            issuer = "from-file"
            "#
        )
        .unwrap();

        let lookup = lookup_from(&[("GATEKEEPER_JWT_ISSUER", "from-env")]);
        let config = ConfigLoader::with_path(file.path()).load_with(lookup).unwrap();
        assert_eq!(config.http.port, 7000);
        assert_eq!(config.auth.jwt.issuer, "from-env");
    }

    #[test]
    fn test_config_path_from_env_var() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "dev_mode = true\n").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let lookup = lookup_from(&[("GATEKEEPER_CONFIG", path.as_str())]);
        let config = loader_without_file().load_with(lookup).unwrap();
        assert!(config.dev_mode);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[http\nport = ").unwrap();

        let result = ConfigLoader::with_path(file.path()).load_with(lookup_from(&[]));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
