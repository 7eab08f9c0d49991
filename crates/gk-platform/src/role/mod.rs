//! Role Aggregate
//!
//! The fixed role → permission table.

pub mod entity;
pub mod api;

pub use entity::{Permission, Role, RoleHolder};
pub use api::roles_router;
