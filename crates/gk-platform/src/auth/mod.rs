//! Authentication Aggregate
//!
//! Access tokens, the refresh-token registry and the authority built on them.

// Core auth
pub mod token_service;
pub mod password_service;
pub mod token_authority;
pub mod auth_api;

// Refresh tokens
pub mod refresh_token;
pub mod refresh_token_store;
pub mod memory_token_store;
pub mod redis_token_store;
pub mod token_cleanup;

// Re-export main types
pub use token_service::{AccessTokenClaims, SigningKey, TokenConfig, TokenService, CLOCK_SKEW_LEEWAY_SECS};
pub use password_service::{Argon2Config, CharClass, PasswordPolicy, PasswordService};
pub use token_authority::{ClientInfo, NewPrincipal, TokenAuthority, TokenPair};
pub use refresh_token::{RefreshToken, RefreshTokenState};
pub use refresh_token_store::{RefreshTokenStore, RotateOutcome};
pub use memory_token_store::InMemoryRefreshTokenStore;
pub use redis_token_store::{RedisRefreshTokenStore, RedisStoreConfig};
pub use auth_api::{auth_router, AuthState};
