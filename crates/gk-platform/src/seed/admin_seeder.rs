//! Bootstrap Administrator
//!
//! Creates the first Admin principal at start-up from out-of-band settings.
//! An existing principal with the same username is left untouched, so the
//! seeder is safe to run on every start.

use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::token_authority::{NewPrincipal, TokenAuthority};
use crate::principal::entity::Principal;
use crate::role::entity::Role;
use crate::shared::error::{PlatformError, Result};

/// Credentials for the bootstrap administrator
#[derive(Clone)]
pub struct BootstrapAdmin {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

pub struct AdminSeeder {
    authority: Arc<TokenAuthority>,
}

impl AdminSeeder {
    pub fn new(authority: Arc<TokenAuthority>) -> Self {
        Self { authority }
    }

    /// Returns the created principal, or `None` when the username is taken
    pub async fn seed(&self, admin: &BootstrapAdmin) -> Result<Option<Principal>> {
        if admin.password.is_empty() {
            return Err(PlatformError::configuration(
                "Bootstrap admin password is not set (GATEKEEPER_ADMIN_PASSWORD)",
            ));
        }

        if let Some(existing) = self
            .authority
            .principals()
            .find_by_username(admin.username.trim())
            .await?
        {
            if existing.role != Role::Admin {
                warn!(
                    principal_id = %existing.id,
                    role = %existing.role,
                    "Bootstrap admin username belongs to a non-admin principal"
                );
            } else {
                info!(principal_id = %existing.id, "Bootstrap admin already present");
            }
            return Ok(None);
        }

        let principal = self
            .authority
            .create_principal(
                NewPrincipal {
                    username: admin.username.clone(),
                    email: admin.email.clone(),
                    password: admin.password.clone(),
                    full_name: Some("Administrator".to_string()),
                    role: Role::Admin,
                },
                None,
            )
            .await?;

        info!(principal_id = %principal.id, username = %principal.username, "Bootstrap admin created");
        Ok(Some(principal))
    }
}
