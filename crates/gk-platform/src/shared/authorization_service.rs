//! Authorization Service
//!
//! Role-table lookups for validated principals.

use chrono::{DateTime, Utc};

use crate::auth::token_service::AccessTokenClaims;
use crate::role::entity::{Permission, Role, RoleHolder};
use crate::shared::error::{PlatformError, Result};

/// The principal behind a validated access token.
///
/// Carries the role that was bound at issuance; it is not re-read from the
/// principal store.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal_id: String,
    pub username: String,
    pub role: Role,
    /// `jti` of the access token
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthContext {
    pub fn from_claims(claims: &AccessTokenClaims) -> Self {
        Self {
            principal_id: claims.sub.clone(),
            username: claims.username.clone(),
            role: claims.role,
            token_id: claims.jti.clone(),
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now),
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.allows(permission)
    }

    pub fn permissions(&self) -> &'static [Permission] {
        self.role.permissions()
    }

    /// Fail with `Forbidden` unless the role grants `permission`
    pub fn require(&self, permission: Permission) -> Result<()> {
        AuthorizationService::require(self, permission)
    }
}

impl RoleHolder for AuthContext {
    fn role(&self) -> Role {
        self.role
    }
}

/// Stateless permission checks against the role table
pub struct AuthorizationService;

impl AuthorizationService {
    /// Whether the holder's role permits `action`. Unknown actions are denied.
    pub fn authorize<P: RoleHolder + ?Sized>(principal: &P, action: &str) -> bool {
        Permission::from_action(action)
            .map(|permission| principal.role().allows(permission))
            .unwrap_or(false)
    }

    pub fn require<P: RoleHolder + ?Sized>(principal: &P, permission: Permission) -> Result<()> {
        if principal.role().allows(permission) {
            Ok(())
        } else {
            Err(PlatformError::forbidden(format!(
                "Role '{}' lacks permission '{}'",
                principal.role(),
                permission
            )))
        }
    }
}
