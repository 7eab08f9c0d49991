//! Principals Admin API
//!
//! User administration under `/api/v1/admin/users`. Every handler checks
//! the caller's permission before touching the store.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::token_authority::{NewPrincipal, TokenAuthority};
use crate::principal::entity::Principal;
use crate::principal::repository::PrincipalFilter;
use crate::role::entity::{Permission, Role};
use crate::shared::api_common::{PaginatedResponse, PaginationParams};
use crate::shared::error::{PlatformError, Result};
use crate::shared::middleware::Authenticated;

/// Principal view; the credential hash is never exposed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&Principal> for PrincipalResponse {
    fn from(p: &Principal) -> Self {
        Self {
            id: p.id.clone(),
            username: p.username.clone(),
            email: p.email.clone(),
            full_name: p.full_name.clone(),
            role: p.role,
            active: p.active,
            created_at: p.created_at,
            updated_at: p.updated_at,
            last_login_at: p.last_login_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersQuery {
    pub search: Option<String>,
    pub role: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

#[derive(Clone)]
pub struct UsersState {
    pub authority: Arc<TokenAuthority>,
}

pub async fn list_users(
    State(state): State<UsersState>,
    auth: Authenticated,
    Query(pagination): Query<PaginationParams>,
    Query(query): Query<UsersQuery>,
) -> Result<Json<PaginatedResponse<PrincipalResponse>>> {
    auth.require(Permission::ViewUsers)?;

    let role = query.role.as_deref().map(str::parse::<Role>).transpose()?;
    let filter = PrincipalFilter {
        search: query.search,
        role,
        active: query.active,
        offset: pagination.offset(),
        limit: pagination.limit(),
    };

    let (principals, total) = state.authority.list_principals(&filter).await?;
    let data = principals.iter().map(PrincipalResponse::from).collect();
    Ok(Json(PaginatedResponse::new(data, &pagination, total)))
}

pub async fn get_user(
    State(state): State<UsersState>,
    auth: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<PrincipalResponse>> {
    auth.require(Permission::ViewUsers)?;
    let principal = state.authority.get_principal(&id).await?;
    Ok(Json(PrincipalResponse::from(&principal)))
}

pub async fn create_user(
    State(state): State<UsersState>,
    auth: Authenticated,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse> {
    auth.require(Permission::CreateUser)?;
    if req.role != Role::Viewer {
        auth.require(Permission::ManageRoles)?;
    }

    let principal = state
        .authority
        .create_principal(
            NewPrincipal {
                username: req.username,
                email: req.email,
                password: req.password,
                full_name: req.full_name,
                role: req.role,
            },
            Some(&auth.principal_id),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(PrincipalResponse::from(&principal))))
}

pub async fn change_role(
    State(state): State<UsersState>,
    auth: Authenticated,
    Path(id): Path<String>,
    Json(req): Json<ChangeRoleRequest>,
) -> Result<Json<PrincipalResponse>> {
    auth.require(Permission::ManageRoles)?;
    if id == auth.principal_id {
        return Err(PlatformError::validation("Cannot change your own role"));
    }

    let principal = state
        .authority
        .change_role(&id, req.role, &auth.principal_id)
        .await?;
    Ok(Json(PrincipalResponse::from(&principal)))
}

pub async fn activate_user(
    State(state): State<UsersState>,
    auth: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<PrincipalResponse>> {
    auth.require(Permission::UpdateUser)?;
    let principal = state.authority.set_active(&id, true, &auth.principal_id).await?;
    info!(principal_id = %id, admin_id = %auth.principal_id, "Principal activated");
    Ok(Json(PrincipalResponse::from(&principal)))
}

pub async fn deactivate_user(
    State(state): State<UsersState>,
    auth: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<PrincipalResponse>> {
    auth.require(Permission::UpdateUser)?;
    if id == auth.principal_id {
        return Err(PlatformError::validation("Cannot deactivate your own account"));
    }

    let principal = state.authority.set_active(&id, false, &auth.principal_id).await?;
    info!(principal_id = %id, admin_id = %auth.principal_id, "Principal deactivated");
    Ok(Json(PrincipalResponse::from(&principal)))
}

pub async fn delete_user(
    State(state): State<UsersState>,
    auth: Authenticated,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    auth.require(Permission::DeleteUser)?;
    if id == auth.principal_id {
        return Err(PlatformError::validation("Cannot delete your own account"));
    }

    state.authority.delete_principal(&id, &auth.principal_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn users_router(state: UsersState) -> Router {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/{id}", get(get_user).delete(delete_user))
        .route("/{id}/role", put(change_role))
        .route("/{id}/activate", post(activate_user))
        .route("/{id}/deactivate", post(deactivate_user))
        .with_state(state)
}
