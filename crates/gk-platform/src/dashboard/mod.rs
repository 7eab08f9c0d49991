//! Dashboard
//!
//! Headcounts and system status for the admin dashboard overview.

pub mod api;

pub use api::{dashboard_router, DashboardState, DashboardStats, SystemInfo};
