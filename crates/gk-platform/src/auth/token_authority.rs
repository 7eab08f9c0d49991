//! Token & Role Authority
//!
//! Issues access/refresh token pairs, validates access tokens, rotates
//! refresh tokens and answers role-based authorization questions.
//!
//! - Access tokens are stateless JWTs; `validate` never touches the registry.
//! - Refresh tokens live in a [`RefreshTokenStore`]. Each refresh atomically
//!   rotates the presented token, so of two concurrent refreshes with the same
//!   token exactly one wins.
//! - Presenting a rotated token again is treated as theft: the family's live
//!   token is revoked and the caller gets `Conflict`.
//! - Every registry and principal-store call runs under a timeout. A timeout
//!   fails the operation with `Unavailable`; it never yields tokens. Audit
//!   inserts share the same bound but are dropped rather than failing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::service::AuditService;
use crate::auth::password_service::PasswordService;
use crate::auth::refresh_token::{RefreshToken, RefreshTokenState};
use crate::auth::refresh_token_store::{RefreshTokenStore, RotateOutcome};
use crate::auth::token_service::TokenService;
use crate::principal::entity::Principal;
use crate::principal::repository::{PrincipalFilter, PrincipalRepository, PrincipalStats};
use crate::role::entity::{Permission, Role, RoleHolder};
use crate::shared::authorization_service::{AuthContext, AuthorizationService};
use crate::shared::error::{PlatformError, Result};

/// Default bound on a single registry or principal-store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

const USERNAME_MIN_LEN: usize = 3;
const USERNAME_MAX_LEN: usize = 64;

/// Access/refresh token pair as returned to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    /// Raw refresh token. Only its hash is stored.
    pub refresh_token: String,
    /// Always "Bearer"
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

/// Request metadata recorded with refresh tokens and audit entries
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Input for creating a principal
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub role: Role,
}

pub struct TokenAuthority {
    tokens: Arc<TokenService>,
    store: Arc<dyn RefreshTokenStore>,
    principals: Arc<dyn PrincipalRepository>,
    passwords: Arc<PasswordService>,
    audit: AuditService,
    store_timeout: Duration,
}

impl TokenAuthority {
    pub fn new(
        tokens: Arc<TokenService>,
        store: Arc<dyn RefreshTokenStore>,
        principals: Arc<dyn PrincipalRepository>,
        passwords: Arc<PasswordService>,
        audit: AuditService,
    ) -> Self {
        Self {
            tokens,
            store,
            principals,
            passwords,
            audit,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Bound for registry, principal-store and audit calls
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self.audit = self.audit.clone().with_timeout(timeout);
        self
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn store(&self) -> &Arc<dyn RefreshTokenStore> {
        &self.store
    }

    pub fn principals(&self) -> &Arc<dyn PrincipalRepository> {
        &self.principals
    }

    pub fn passwords(&self) -> &PasswordService {
        &self.passwords
    }

    pub fn audit(&self) -> &AuditService {
        &self.audit
    }

    /// Run a store call under the configured timeout. Elapsed means `Unavailable`.
    async fn guarded<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                metrics::counter!("gatekeeper.registry.timeouts_total").increment(1);
                warn!(operation, timeout_ms = self.store_timeout.as_millis() as u64, "Store call timed out");
                Err(PlatformError::unavailable(format!("{} timed out", operation)))
            }
        }
    }

    fn refresh_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.tokens.config().refresh_token_expiry_secs)
    }

    fn build_pair(&self, principal: &Principal, raw_refresh: String, record: &RefreshToken) -> Result<TokenPair> {
        let (access_token, claims) = self.tokens.mint_access_token(principal)?;
        Ok(TokenPair {
            access_token,
            refresh_token: raw_refresh,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.config().access_token_expiry_secs,
            access_token_expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now),
            refresh_token_expires_at: record.expires_at,
        })
    }

    // ========================================================================
    // Token operations
    // ========================================================================

    /// Issue a new pair bound to the principal's identity and current role.
    /// Starts a new refresh-token family.
    pub async fn issue(&self, principal: &Principal, client: &ClientInfo) -> Result<TokenPair> {
        if !principal.active {
            return Err(PlatformError::forbidden("Account is deactivated"));
        }

        let (raw, record) = RefreshToken::generate(&principal.id, None, self.refresh_ttl());
        let record = record.with_client_info(client.ip.clone(), client.user_agent.clone());
        let pair = self.build_pair(principal, raw, &record)?;

        self.guarded("refresh token insert", self.store.insert(&record)).await?;

        metrics::counter!("gatekeeper.tokens.issued_total").increment(1);
        info!(principal_id = %principal.id, family_id = %record.family_id, "Token pair issued");
        self.audit
            .log_token_issued(&principal.id, &record.family_id, client.ip.clone())
            .await;

        Ok(pair)
    }

    /// Verify an access token's signature, expiry, issuer, audience and type.
    ///
    /// Every failure is the same `Unauthorized`; the reason is only logged.
    pub fn validate(&self, access_token: &str) -> Result<AuthContext> {
        match self.tokens.verify(access_token) {
            Ok(claims) => Ok(AuthContext::from_claims(&claims)),
            Err(reason) => {
                debug!(reason = reason.as_str(), "Access token rejected");
                metrics::counter!("gatekeeper.tokens.rejected_total").increment(1);
                Err(PlatformError::Unauthorized)
            }
        }
    }

    /// Exchange a refresh token for a new pair, rotating it.
    ///
    /// - unknown, revoked or expired token: `Unauthorized`
    /// - already rotated token: family revoked, `Conflict`
    /// - principal deleted or deactivated: token revoked, `Unauthorized`
    pub async fn refresh(&self, raw_refresh: &str, client: &ClientInfo) -> Result<TokenPair> {
        let hash = RefreshToken::hash_token(raw_refresh);

        let current = self
            .guarded("refresh token lookup", self.store.find_by_hash(&hash))
            .await?
            .ok_or_else(|| {
                debug!("Unknown refresh token presented");
                PlatformError::Unauthorized
            })?;

        match current.state {
            RefreshTokenState::Revoked => {
                debug!(family_id = %current.family_id, "Revoked refresh token presented");
                return Err(PlatformError::Unauthorized);
            }
            RefreshTokenState::Rotated => return Err(self.handle_reuse(&current, client).await),
            RefreshTokenState::Active if current.is_expired() => {
                debug!(family_id = %current.family_id, "Expired refresh token presented");
                return Err(PlatformError::Unauthorized);
            }
            RefreshTokenState::Active => {}
        }

        let principal = self
            .guarded("principal lookup", self.principals.find_by_id(&current.principal_id))
            .await?;
        let principal = match principal {
            Some(p) if p.active => p,
            _ => {
                info!(principal_id = %current.principal_id, "Refresh for missing or inactive principal");
                self.guarded("refresh token revoke", self.store.revoke(&hash)).await?;
                return Err(PlatformError::Unauthorized);
            }
        };

        let (raw, replacement) =
            RefreshToken::generate(&principal.id, Some(current.family_id.clone()), self.refresh_ttl());
        let replacement = replacement.with_client_info(client.ip.clone(), client.user_agent.clone());
        let pair = self.build_pair(&principal, raw, &replacement)?;

        let outcome = self
            .guarded("refresh token rotate", self.store.rotate(&hash, &replacement))
            .await?;
        match outcome {
            RotateOutcome::Rotated => {}
            // Lost a race against another use of the same token
            RotateOutcome::AlreadyRotated => return Err(self.handle_reuse(&current, client).await),
            RotateOutcome::Revoked | RotateOutcome::Expired | RotateOutcome::NotFound => {
                debug!(outcome = ?outcome, "Refresh token no longer usable");
                return Err(PlatformError::Unauthorized);
            }
        }

        metrics::counter!("gatekeeper.tokens.refreshed_total").increment(1);
        debug!(principal_id = %principal.id, family_id = %current.family_id, "Refresh token rotated");
        self.audit
            .log_token_refreshed(&principal.id, &current.family_id, client.ip.clone())
            .await;

        Ok(pair)
    }

    /// Revoke what is still live in the family and report `Conflict`.
    /// If the revocation itself fails, that error is returned instead.
    async fn handle_reuse(&self, token: &RefreshToken, client: &ClientInfo) -> PlatformError {
        warn!(
            principal_id = %token.principal_id,
            family_id = %token.family_id,
            "Refresh token reuse detected, revoking token family"
        );
        metrics::counter!("gatekeeper.tokens.reuse_detected_total").increment(1);

        let revoked = match self
            .guarded("refresh family revoke", self.store.revoke_family(&token.family_id))
            .await
        {
            Ok(revoked) => revoked,
            Err(e) => return e,
        };

        self.audit
            .log_reuse_detected(&token.principal_id, &token.family_id, revoked, client.ip.clone())
            .await;
        PlatformError::conflict("Refresh token has already been used")
    }

    /// Whether the holder's role permits `action`. Unknown actions are denied.
    pub fn authorize<P: RoleHolder + ?Sized>(&self, principal: &P, action: &str) -> bool {
        AuthorizationService::authorize(principal, action)
    }

    /// Fallible form of [`authorize`](Self::authorize): `Forbidden` when denied
    pub fn require<P: RoleHolder + ?Sized>(&self, principal: &P, action: &str) -> Result<()> {
        match Permission::from_action(action) {
            Some(permission) => AuthorizationService::require(principal, permission),
            None => Err(PlatformError::forbidden(format!("Unknown action '{}'", action))),
        }
    }

    /// Invalidate a refresh token. Unknown and already-invalid tokens are a no-op.
    pub async fn revoke(&self, raw_refresh: &str) -> Result<()> {
        let hash = RefreshToken::hash_token(raw_refresh);
        let Some(token) = self
            .guarded("refresh token lookup", self.store.find_by_hash(&hash))
            .await?
        else {
            return Ok(());
        };

        if self.guarded("refresh token revoke", self.store.revoke(&hash)).await? {
            metrics::counter!("gatekeeper.tokens.revoked_total").increment(1);
            info!(principal_id = %token.principal_id, family_id = %token.family_id, "Refresh token revoked");
            self.audit.log_token_revoked(&token.principal_id, &token.family_id).await;
        }
        Ok(())
    }

    /// Revoke every active refresh token of a principal. Returns the count.
    pub async fn revoke_all(&self, principal_id: &str, actor_id: &str) -> Result<u64> {
        let revoked = self
            .guarded("refresh token revoke all", self.store.revoke_all_for_principal(principal_id))
            .await?;

        metrics::counter!("gatekeeper.tokens.revoked_total").increment(revoked);
        info!(principal_id, actor_id, revoked, "Revoked all refresh tokens");
        self.audit.log_logout_all(actor_id, principal_id, revoked).await;
        Ok(revoked)
    }

    // ========================================================================
    // Credentials
    // ========================================================================

    /// Password sign-in by username or email.
    ///
    /// Unknown login and wrong password both fail with `InvalidCredentials`
    /// after one Argon2 verification each.
    pub async fn login(&self, login: &str, password: &str, client: &ClientInfo) -> Result<(Principal, TokenPair)> {
        let login = login.trim();
        let found = self
            .guarded("principal lookup", self.principals.find_by_login(login))
            .await?;

        let Some(mut principal) = found else {
            self.passwords.verify_dummy(password);
            return Err(self.login_failed(login, client).await);
        };

        if !self.passwords.verify_password(password, &principal.password_hash)? {
            return Err(self.login_failed(login, client).await);
        }

        if !principal.active {
            info!(principal_id = %principal.id, "Login refused for deactivated principal");
            return Err(PlatformError::forbidden("Account is deactivated"));
        }

        principal.record_login();
        self.guarded("principal update", self.principals.update(&principal))
            .await?;

        let pair = self.issue(&principal, client).await?;
        info!(principal_id = %principal.id, "Login successful");
        self.audit.log_login(&principal.id, client.ip.clone()).await;
        Ok((principal, pair))
    }

    async fn login_failed(&self, login: &str, client: &ClientInfo) -> PlatformError {
        metrics::counter!("gatekeeper.auth.login_failed_total").increment(1);
        info!("Login failed");
        self.audit.log_login_failed(login, client.ip.clone()).await;
        PlatformError::InvalidCredentials
    }

    /// Validate input, hash the password and store a new principal.
    /// `actor_id` is `None` for self-registration and seeding.
    pub async fn create_principal(&self, input: NewPrincipal, actor_id: Option<&str>) -> Result<Principal> {
        let username = input.username.trim();
        validate_username(username)?;
        let email = input.email.trim();
        validate_email(email)?;

        let hash = self.passwords.hash_password(&input.password)?;
        let principal = Principal::new(username, email, hash, input.role).with_full_name(input.full_name);

        self.guarded("principal insert", self.principals.insert(&principal))
            .await?;

        info!(principal_id = %principal.id, role = %principal.role, "Principal created");
        self.audit
            .log_principal_created(actor_id, &principal.id, principal.role)
            .await;
        Ok(principal)
    }

    /// One page of principals plus the total match count
    pub async fn list_principals(&self, filter: &PrincipalFilter) -> Result<(Vec<Principal>, u64)> {
        self.guarded("principal list", self.principals.list(filter)).await
    }

    /// Headcounts for the dashboard; "new" means created since `since`
    pub async fn principal_stats(&self, since: DateTime<Utc>) -> Result<PrincipalStats> {
        self.guarded("principal stats", self.principals.stats(since)).await
    }

    /// Reachability of the principal store and the refresh registry, each
    /// under the store timeout
    pub async fn ping_backends(&self) -> (Result<()>, Result<()>) {
        tokio::join!(
            self.guarded("principal store ping", self.principals.ping()),
            self.guarded("refresh registry ping", self.store.ping()),
        )
    }

    /// Load a principal or fail with `NotFound`
    pub async fn get_principal(&self, id: &str) -> Result<Principal> {
        self.guarded("principal lookup", self.principals.find_by_id(id))
            .await?
            .ok_or_else(|| PlatformError::not_found("Principal", id))
    }

    /// Assign a new role and revoke the principal's refresh tokens, so the
    /// next sign-in carries the new role.
    pub async fn change_role(&self, principal_id: &str, role: Role, actor_id: &str) -> Result<Principal> {
        let mut principal = self.get_principal(principal_id).await?;
        let previous = principal.change_role(role);
        if previous == role {
            return Ok(principal);
        }

        self.guarded("principal update", self.principals.update(&principal))
            .await?;
        self.revoke_all(&principal.id, actor_id).await?;

        info!(principal_id, from = %previous, to = %role, "Role changed");
        self.audit.log_role_changed(actor_id, principal_id, previous, role).await;
        Ok(principal)
    }

    /// Toggle the active flag. Deactivation revokes refresh tokens.
    pub async fn set_active(&self, principal_id: &str, active: bool, actor_id: &str) -> Result<Principal> {
        let mut principal = self.get_principal(principal_id).await?;
        if principal.active == active {
            return Ok(principal);
        }

        if active {
            principal.activate();
        } else {
            principal.deactivate();
        }
        self.guarded("principal update", self.principals.update(&principal))
            .await?;
        if !active {
            self.revoke_all(&principal.id, actor_id).await?;
        }

        self.audit.log_active_changed(actor_id, principal_id, active).await;
        Ok(principal)
    }

    /// Revoke the principal's refresh tokens, then delete it
    pub async fn delete_principal(&self, principal_id: &str, actor_id: &str) -> Result<()> {
        let principal = self.get_principal(principal_id).await?;
        self.revoke_all(&principal.id, actor_id).await?;

        if !self.guarded("principal delete", self.principals.delete(&principal.id)).await? {
            return Err(PlatformError::not_found("Principal", principal_id));
        }

        info!(principal_id, actor_id, "Principal deleted");
        self.audit.log_principal_deleted(actor_id, principal_id).await;
        Ok(())
    }
}

fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(PlatformError::validation(format!(
            "Username must be between {} and {} characters",
            USERNAME_MIN_LEN, USERNAME_MAX_LEN
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(PlatformError::validation(
            "Username may only contain letters, digits, '_', '-' and '.'",
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') => Ok(()),
        _ => Err(PlatformError::validation("Invalid email address")),
    }
}
