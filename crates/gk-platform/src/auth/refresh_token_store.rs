//! Refresh Token Registry
//!
//! Persisted refresh-token state, keyed by token hash. Backends must make
//! [`RefreshTokenStore::rotate`] a single atomic compare-and-swap: of any
//! number of concurrent rotations of one token, exactly one may succeed.

use async_trait::async_trait;

use crate::auth::refresh_token::RefreshToken;
use crate::shared::error::Result;

/// Result of an attempted rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    /// Current token marked rotated and the replacement stored
    Rotated,
    /// Current token had already been rotated (possible replay)
    AlreadyRotated,
    Revoked,
    Expired,
    NotFound,
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Store a new token
    async fn insert(&self, token: &RefreshToken) -> Result<()>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>>;

    /// Atomically: if the token under `current_hash` is active and unexpired,
    /// mark it rotated (pointing at `replacement`) and store `replacement`.
    async fn rotate(&self, current_hash: &str, replacement: &RefreshToken) -> Result<RotateOutcome>;

    /// Revoke an active token. Idempotent; returns whether anything changed.
    async fn revoke(&self, token_hash: &str) -> Result<bool>;

    /// Revoke every active token of a principal. Returns the number revoked.
    async fn revoke_all_for_principal(&self, principal_id: &str) -> Result<u64>;

    /// Revoke every active token in a family. Rotated members keep their state
    /// so a later replay is still recognized as one.
    async fn revoke_family(&self, family_id: &str) -> Result<u64>;

    /// Drop entries past their expiry. Returns the number removed.
    async fn delete_expired(&self) -> Result<u64>;

    /// Backend reachability check for readiness probes
    async fn ping(&self) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}
