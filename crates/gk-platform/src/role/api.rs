//! Roles API
//!
//! Read-only view of the role table, for dashboards that hide controls the
//! caller cannot use.

use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::role::entity::Role;
use crate::shared::error::Result;
use crate::shared::middleware::Authenticated;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleResponse {
    pub role: Role,
    pub permissions: Vec<&'static str>,
}

impl From<Role> for RoleResponse {
    fn from(role: Role) -> Self {
        Self {
            role,
            permissions: role.permissions().iter().map(|p| p.as_str()).collect(),
        }
    }
}

/// List every role with its permitted actions
pub async fn list_roles(_auth: Authenticated) -> Result<Json<Vec<RoleResponse>>> {
    Ok(Json(Role::ALL.into_iter().map(RoleResponse::from).collect()))
}

pub fn roles_router() -> Router {
    Router::new().route("/", get(list_roles))
}
