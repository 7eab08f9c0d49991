//! Shared Module
//!
//! Cross-cutting concerns and shared utilities.

pub mod error;
pub mod tsid;
pub mod middleware;
pub mod api_common;
pub mod http_guard;

// APIs
pub mod health_api;

// Services
pub mod authorization_service;

pub use error::{PlatformError, Result};
pub use tsid::TsidGenerator;
pub use middleware::{AppState, AuthLayer, Authenticated};
pub use api_common::{PaginatedResponse, PaginationParams};
pub use health_api::{health_router, HealthState};
pub use http_guard::MaintenanceMode;
pub use authorization_service::{AuthContext, AuthorizationService};
