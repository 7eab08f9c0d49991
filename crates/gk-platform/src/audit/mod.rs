//! Audit Log Aggregate
//!
//! Audit trail for sign-ins, token lifecycle and principal administration.

pub mod entity;
pub mod repository;
pub mod sqlite_repository;
pub mod api;
pub mod service;

// Re-export main types
pub use entity::{AuditAction, AuditLog};
pub use repository::{AuditLogFilter, AuditLogRepository, InMemoryAuditLogRepository};
pub use sqlite_repository::SqliteAuditLogRepository;
pub use api::{audit_logs_router, AuditLogsState};
pub use service::AuditService;
