//! Roles and Permissions
//!
//! Access control is a fixed table from [`Role`] to an ordered slice of
//! [`Permission`]s. There is no role inheritance: each role lists exactly
//! what it may do.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::shared::error::PlatformError;

/// An action a principal may be permitted to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewDashboard,
    ViewReport,
    ExportData,
    ViewLogs,
    ManageContent,
    ViewUsers,
    CreateUser,
    UpdateUser,
    DeleteUser,
    ManageRoles,
    EditSettings,
    DeleteRecords,
}

impl Permission {
    /// Every permission, in declaration order
    pub const ALL: [Permission; 12] = [
        Permission::ViewDashboard,
        Permission::ViewReport,
        Permission::ExportData,
        Permission::ViewLogs,
        Permission::ManageContent,
        Permission::ViewUsers,
        Permission::CreateUser,
        Permission::UpdateUser,
        Permission::DeleteUser,
        Permission::ManageRoles,
        Permission::EditSettings,
        Permission::DeleteRecords,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ViewDashboard => "view_dashboard",
            Permission::ViewReport => "view_report",
            Permission::ExportData => "export_data",
            Permission::ViewLogs => "view_logs",
            Permission::ManageContent => "manage_content",
            Permission::ViewUsers => "view_users",
            Permission::CreateUser => "create_user",
            Permission::UpdateUser => "update_user",
            Permission::DeleteUser => "delete_user",
            Permission::ManageRoles => "manage_roles",
            Permission::EditSettings => "edit_settings",
            Permission::DeleteRecords => "delete_records",
        }
    }

    /// Look up an action name. Unknown names yield `None`.
    pub fn from_action(action: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.as_str() == action)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_action(s).ok_or_else(|| PlatformError::validation(format!("Unknown permission: {}", s)))
    }
}

const ADMIN_PERMISSIONS: &[Permission] = &Permission::ALL;

const MANAGER_PERMISSIONS: &[Permission] = &[
    Permission::ViewDashboard,
    Permission::ViewReport,
    Permission::ExportData,
    Permission::ViewLogs,
    Permission::ManageContent,
    Permission::ViewUsers,
];

const VIEWER_PERMISSIONS: &[Permission] = &[
    Permission::ViewDashboard,
    Permission::ViewReport,
    Permission::ViewLogs,
];

/// The role assigned to a principal. Every principal has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    #[default]
    Viewer,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Manager, Role::Viewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Viewer => "viewer",
        }
    }

    /// Permitted actions, in table order
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::Admin => ADMIN_PERMISSIONS,
            Role::Manager => MANAGER_PERMISSIONS,
            Role::Viewer => VIEWER_PERMISSIONS,
        }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PlatformError::validation(format!("Unknown role: {}", s)))
    }
}

/// Anything that carries a role: a stored principal or a validated token.
pub trait RoleHolder {
    fn role(&self) -> Role;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_has_every_permission_in_order() {
        assert_eq!(Role::Admin.permissions(), &Permission::ALL[..]);
    }

    #[test]
    fn test_manager_table() {
        assert!(Role::Manager.allows(Permission::ExportData));
        assert!(Role::Manager.allows(Permission::ViewUsers));
        assert!(!Role::Manager.allows(Permission::DeleteUser));
        assert!(!Role::Manager.allows(Permission::ManageRoles));
        assert!(!Role::Manager.allows(Permission::EditSettings));
    }

    #[test]
    fn test_viewer_table() {
        assert_eq!(
            Role::Viewer.permissions(),
            &[Permission::ViewDashboard, Permission::ViewReport, Permission::ViewLogs]
        );
    }

    #[test]
    fn test_role_sets_are_nested() {
        for p in Role::Viewer.permissions() {
            assert!(Role::Manager.allows(*p), "manager lacks {}", p);
        }
        for p in Role::Manager.permissions() {
            assert!(Role::Admin.allows(*p), "admin lacks {}", p);
        }
    }

    #[test]
    fn test_permission_names_round_trip() {
        for p in Permission::ALL {
            assert_eq!(Permission::from_action(p.as_str()), Some(p));
            assert_eq!(serde_json::to_string(&p).unwrap(), format!("\"{}\"", p.as_str()));
        }
        assert_eq!(Permission::from_action("launch_missiles"), None);
        assert!("VIEW_REPORT".parse::<Permission>().is_err());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" Manager ".parse::<Role>().unwrap(), Role::Manager);
        assert!("superuser".parse::<Role>().is_err());
        assert_eq!(serde_json::to_string(&Role::Viewer).unwrap(), "\"viewer\"");
        assert_eq!(Role::default(), Role::Viewer);
    }
}
