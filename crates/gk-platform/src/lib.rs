//! Gatekeeper Platform
//!
//! Authentication and access-control core of the admin dashboard:
//! - JWT access tokens with stateless validation
//! - Rotating refresh tokens with reuse detection
//! - Fixed role → permission table (Admin, Manager, Viewer)
//! - Principal administration and an audit trail
//! - Runtime settings and dashboard headcounts
//!
//! ## Module Organization (Aggregate-based)
//!
//! Each aggregate contains:
//! - `entity` - Domain entities
//! - `repository` - Data access
//! - `api` - REST endpoints

// Core aggregates
pub mod principal;
pub mod role;
pub mod settings;
pub mod dashboard;

// Authentication & authorization
pub mod auth;
pub mod audit;

// Shared infrastructure
pub mod shared;

// Cross-cutting concerns
pub mod seed;
pub mod app;

// Re-export common types from shared
pub use shared::error::{PlatformError, Result};
pub use shared::tsid::TsidGenerator;

// Re-export main entity types for convenience
pub use principal::entity::Principal;
pub use role::entity::{Permission, Role, RoleHolder};
pub use audit::entity::{AuditAction, AuditLog};
pub use auth::refresh_token::{RefreshToken, RefreshTokenState};

// Re-export repositories and stores
pub use principal::repository::{InMemoryPrincipalRepository, PrincipalFilter, PrincipalRepository, PrincipalStats};
pub use principal::sqlite_repository::SqlitePrincipalRepository;
pub use audit::repository::{AuditLogFilter, AuditLogRepository, InMemoryAuditLogRepository};
pub use audit::sqlite_repository::SqliteAuditLogRepository;
pub use auth::refresh_token_store::{RefreshTokenStore, RotateOutcome};
pub use auth::memory_token_store::InMemoryRefreshTokenStore;
pub use auth::redis_token_store::{RedisRefreshTokenStore, RedisStoreConfig};

// Re-export services
pub use audit::service::AuditService;
pub use auth::password_service::{Argon2Config, CharClass, PasswordPolicy, PasswordService};
pub use auth::token_service::{AccessTokenClaims, SigningKey, TokenConfig, TokenService, CLOCK_SKEW_LEEWAY_SECS};
pub use auth::token_authority::{ClientInfo, NewPrincipal, TokenAuthority, TokenPair};
pub use shared::authorization_service::{AuthContext, AuthorizationService};

// Re-export HTTP wiring
pub use app::{platform_router, PlatformRouterConfig};
pub use shared::health_api::HealthState;
pub use shared::http_guard::MaintenanceMode;
pub use settings::entity::{RuntimeSettings, SettingsSnapshot};
