//! Runtime Settings
//!
//! Switches an administrator can flip without a restart.

pub mod entity;
pub mod api;

pub use entity::{RuntimeSettings, SettingsSnapshot};
pub use api::{settings_router, SettingsState, UpdateSettingsRequest};
