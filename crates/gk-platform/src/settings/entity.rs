//! Runtime Settings Entity

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::shared::http_guard::MaintenanceMode;

/// Shared handle on the live settings. Clones see the same values.
#[derive(Clone)]
pub struct RuntimeSettings {
    maintenance: MaintenanceMode,
    allow_registration: Arc<AtomicBool>,
    updated_at: Arc<RwLock<DateTime<Utc>>>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::new(MaintenanceMode::default(), true)
    }
}

impl RuntimeSettings {
    pub fn new(maintenance: MaintenanceMode, allow_registration: bool) -> Self {
        Self {
            maintenance,
            allow_registration: Arc::new(AtomicBool::new(allow_registration)),
            updated_at: Arc::new(RwLock::new(Utc::now())),
        }
    }

    /// The switch read by the maintenance guard
    pub fn maintenance(&self) -> &MaintenanceMode {
        &self.maintenance
    }

    pub fn registration_allowed(&self) -> bool {
        self.allow_registration.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            maintenance_mode: self.maintenance.is_enabled(),
            allow_registration: self.registration_allowed(),
            updated_at: *self.updated_at.read(),
        }
    }

    /// Apply the given values. Returns the snapshot before and after.
    pub fn apply(
        &self,
        maintenance_mode: Option<bool>,
        allow_registration: Option<bool>,
    ) -> (SettingsSnapshot, SettingsSnapshot) {
        let mut updated_at = self.updated_at.write();
        let before = SettingsSnapshot {
            maintenance_mode: self.maintenance.is_enabled(),
            allow_registration: self.registration_allowed(),
            updated_at: *updated_at,
        };

        if let Some(enabled) = maintenance_mode {
            self.maintenance.set(enabled);
        }
        if let Some(allowed) = allow_registration {
            self.allow_registration.store(allowed, Ordering::Relaxed);
        }
        *updated_at = Utc::now();

        let after = SettingsSnapshot {
            maintenance_mode: self.maintenance.is_enabled(),
            allow_registration: self.registration_allowed(),
            updated_at: *updated_at,
        };
        (before, after)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSnapshot {
    pub maintenance_mode: bool,
    pub allow_registration: bool,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let settings = RuntimeSettings::default();
        let handle = settings.clone();

        let (before, after) = handle.apply(Some(true), None);
        assert!(!before.maintenance_mode);
        assert!(after.maintenance_mode);
        assert!(after.allow_registration);

        assert!(settings.maintenance().is_enabled());
        assert!(settings.registration_allowed());
    }

    #[test]
    fn test_registration_switch() {
        let settings = RuntimeSettings::new(MaintenanceMode::default(), false);
        assert!(!settings.registration_allowed());

        settings.apply(None, Some(true));
        assert!(settings.registration_allowed());
        assert!(!settings.snapshot().maintenance_mode);
    }
}
