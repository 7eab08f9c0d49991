//! Gatekeeper Server
//!
//! HTTP front of the token & role authority:
//! - Auth APIs: register, login, refresh, logout, me
//! - Admin APIs: principals, audit logs, runtime settings
//! - Dashboard: headcounts and system status
//! - Health: liveness and readiness
//!
//! ## Configuration
//!
//! TOML file (`GATEKEEPER_CONFIG`, `./gatekeeper.toml`, `./config/gatekeeper.toml`)
//! overridden by `GATEKEEPER_*` environment variables. A `.env` file is read
//! first when present.
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `GATEKEEPER_JWT_SECRET` | HS256 signing secret |
//! | `GATEKEEPER_JWT_SECRET_FILE` | File holding the HS256 secret |
//! | `GATEKEEPER_JWT_PRIVATE_KEY_PATH` / `GATEKEEPER_JWT_PUBLIC_KEY_PATH` | RS256 PEM key pair |
//! | `GATEKEEPER_DATABASE_URL` | SQLite URL or `memory` |
//! | `GATEKEEPER_REGISTRY_BACKEND` | `memory` or `redis` |
//! | `GATEKEEPER_REDIS_URL` | Redis URL for the refresh token registry |
//! | `GATEKEEPER_ADMIN_USERNAME` / `_EMAIL` / `_PASSWORD` | Bootstrap administrator |
//! | `RUST_LOG` | Log filter (default `info`) |
//! | `LOG_FORMAT` | `text` or `json` |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum::http::{header, HeaderValue, Method};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::{net::TcpListener, signal, sync::broadcast};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use gk_config::{AppConfig, JwtConfig};
use gk_platform::auth::token_cleanup::spawn_cleanup_task;
use gk_platform::seed::{AdminSeeder, BootstrapAdmin};
use gk_platform::{
    platform_router, Argon2Config, AuditLogRepository, AuditService, HealthState, InMemoryAuditLogRepository,
    InMemoryPrincipalRepository, InMemoryRefreshTokenStore, MaintenanceMode, PasswordPolicy, PasswordService,
    PlatformRouterConfig, PrincipalRepository, RedisRefreshTokenStore, RedisStoreConfig, RefreshTokenStore, RuntimeSettings,
    SigningKey, SqliteAuditLogRepository, SqlitePrincipalRepository, TokenAuthority, TokenConfig, TokenService,
};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    gk_common::logging::init_logging("gk-server");

    info!("Starting Gatekeeper Server");

    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    if config.dev_mode {
        warn!("Development mode enabled");
    }

    // Stores
    let (principals, audit_repo) = open_principal_stores(&config).await?;
    let registry = open_registry(&config).await?;

    // Services
    let tokens = Arc::new(token_service(&config.auth.jwt)?);
    let policy = PasswordPolicy::from_name(&config.auth.password.policy)?;
    let passwords = Arc::new(PasswordService::new(Argon2Config::default(), policy)?);
    let authority = Arc::new(
        TokenAuthority::new(
            tokens,
            registry.clone(),
            principals,
            passwords,
            AuditService::new(audit_repo),
        )
        .with_store_timeout(Duration::from_millis(config.auth.registry.operation_timeout_ms)),
    );
    info!("Token authority initialized");

    let bootstrap = &config.auth.bootstrap;
    if bootstrap.is_enabled() {
        let admin = BootstrapAdmin {
            username: bootstrap.admin_username.clone(),
            email: bootstrap.admin_email.clone(),
            password: bootstrap.admin_password.clone(),
        };
        AdminSeeder::new(authority.clone())
            .seed(&admin)
            .await
            .context("Failed to provision bootstrap admin")?;
    }

    // HTTP
    let health = HealthState::new(registry.clone(), Some(env!("CARGO_PKG_VERSION").to_string()));
    let maintenance = MaintenanceMode::new(config.maintenance_mode);
    if maintenance.is_enabled() {
        warn!("Maintenance mode enabled; only health and login are served");
    }

    let settings = RuntimeSettings::new(maintenance, config.auth.allow_registration);
    let router_config = PlatformRouterConfig::new(authority, health.clone()).with_settings(settings);

    let app = platform_router(router_config).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(cors_layer(&config.http.cors_origins))
            .layer(TimeoutLayer::new(Duration::from_secs(config.http.request_timeout_secs))),
    );

    // Background tasks
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let cleanup_task = spawn_cleanup_task(
        registry,
        Duration::from_secs(config.auth.registry.cleanup_interval_secs),
        &shutdown_tx,
    );

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("API server listening on http://{}", addr);

    health.set_ready();
    info!("Gatekeeper Server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shutdown signal received...");
    let _ = shutdown_tx.send(());
    if let Err(e) = cleanup_task.await {
        warn!(error = %e, "Cleanup task ended abnormally");
    }

    info!("Gatekeeper Server shutdown complete");
    Ok(())
}

async fn open_principal_stores(
    config: &AppConfig,
) -> Result<(Arc<dyn PrincipalRepository>, Arc<dyn AuditLogRepository>)> {
    if config.database.is_memory() {
        warn!("Using in-memory principal store; accounts are lost on restart");
        let principals: Arc<dyn PrincipalRepository> = Arc::new(InMemoryPrincipalRepository::new());
        let audit: Arc<dyn AuditLogRepository> = Arc::new(InMemoryAuditLogRepository::new());
        return Ok((principals, audit));
    }

    info!(url = %config.database.url, "Connecting to SQLite");
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to the principal database")?;

    let principals = SqlitePrincipalRepository::new(pool.clone());
    principals.init_schema().await?;
    let audit = SqliteAuditLogRepository::new(pool);
    audit.init_schema().await?;

    Ok((Arc::new(principals), Arc::new(audit)))
}

async fn open_registry(config: &AppConfig) -> Result<Arc<dyn RefreshTokenStore>> {
    match config.auth.registry.backend.as_str() {
        "redis" => {
            let store_config = RedisStoreConfig {
                url: config.redis.url.clone(),
                key_prefix: config.auth.registry.key_prefix.clone(),
            };
            let store = RedisRefreshTokenStore::connect(&store_config)
                .await
                .context("Failed to connect the refresh token registry to Redis")?;
            Ok(Arc::new(store))
        }
        _ => {
            warn!("Using in-memory refresh token registry; sessions are lost on restart");
            Ok(Arc::new(InMemoryRefreshTokenStore::new()))
        }
    }
}

fn token_service(jwt: &JwtConfig) -> Result<TokenService> {
    let config = TokenConfig {
        issuer: jwt.issuer.clone(),
        audience: jwt.audience.clone(),
        access_token_expiry_secs: i64::try_from(jwt.access_token_expiry_secs)
            .context("access_token_expiry_secs out of range")?,
        refresh_token_expiry_secs: i64::try_from(jwt.refresh_token_expiry_secs)
            .context("refresh_token_expiry_secs out of range")?,
    };

    let key = if jwt.has_key_pair() {
        let private_pem = std::fs::read_to_string(&jwt.private_key_path)
            .with_context(|| format!("Failed to read {}", jwt.private_key_path))?;
        let public_pem = std::fs::read_to_string(&jwt.public_key_path)
            .with_context(|| format!("Failed to read {}", jwt.public_key_path))?;
        SigningKey::Rsa { private_pem, public_pem }
    } else {
        let secret = jwt
            .resolve_secret()?
            .ok_or_else(|| anyhow!("No JWT signing key configured"))?;
        SigningKey::Hmac(secret)
    };

    Ok(TokenService::new(config, &key)?)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
