//! SQLite Audit Log Repository

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::audit::entity::AuditLog;
use crate::audit::repository::{AuditLogFilter, AuditLogRepository};
use crate::shared::error::{PlatformError, Result};

const COLUMNS: &str = "id, action, entity_type, entity_id, principal_id, details, ip_address, created_at";

pub struct SqliteAuditLogRepository {
    pool: SqlitePool,
}

impl SqliteAuditLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                action TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT,
                principal_id TEXT,
                details TEXT,
                ip_address TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_logs_created_at ON audit_logs(created_at);
            CREATE INDEX IF NOT EXISTS idx_audit_logs_principal ON audit_logs(principal_id);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn parse_row(row: &SqliteRow) -> Result<AuditLog> {
        let action: String = row.try_get("action")?;
        let details: Option<String> = row.try_get("details")?;
        let created_at: i64 = row.try_get("created_at")?;

        Ok(AuditLog {
            id: row.try_get("id")?,
            action: action.parse()?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            principal_id: row.try_get("principal_id")?,
            details: details
                .as_deref()
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()?,
            ip_address: row.try_get("ip_address")?,
            created_at: DateTime::from_timestamp_millis(created_at).ok_or_else(|| {
                PlatformError::internal(format!("Invalid timestamp in audit_logs: {}", created_at))
            })?,
        })
    }

    fn filter_clause(filter: &AuditLogFilter) -> (String, Vec<String>) {
        let mut conditions = Vec::new();
        let mut binds = Vec::new();

        if let Some(action) = filter.action {
            conditions.push("action = ?");
            binds.push(action.as_str().to_string());
        }
        if let Some(entity_id) = &filter.entity_id {
            conditions.push("entity_id = ?");
            binds.push(entity_id.clone());
        }
        if let Some(principal_id) = &filter.principal_id {
            conditions.push("principal_id = ?");
            binds.push(principal_id.clone());
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        (clause, binds)
    }
}

#[async_trait]
impl AuditLogRepository for SqliteAuditLogRepository {
    async fn insert(&self, log: &AuditLog) -> Result<()> {
        let details = log.details.as_ref().map(serde_json::to_string).transpose()?;
        let query = format!("INSERT INTO audit_logs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)", COLUMNS);
        sqlx::query(&query)
            .bind(&log.id)
            .bind(log.action.as_str())
            .bind(&log.entity_type)
            .bind(&log.entity_id)
            .bind(&log.principal_id)
            .bind(details)
            .bind(&log.ip_address)
            .bind(log.created_at.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, filter: &AuditLogFilter) -> Result<(Vec<AuditLog>, u64)> {
        let (clause, binds) = Self::filter_clause(filter);

        let count_query = format!("SELECT COUNT(*) AS total FROM audit_logs{}", clause);
        let mut count = sqlx::query(&count_query);
        for value in &binds {
            count = count.bind(value);
        }
        let total: i64 = count.fetch_one(&self.pool).await?.try_get("total")?;

        // rowid breaks ties within one millisecond
        let page_query = format!(
            "SELECT {} FROM audit_logs{} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            COLUMNS, clause
        );
        let mut page = sqlx::query(&page_query);
        for value in &binds {
            page = page.bind(value);
        }
        let rows = page
            .bind(filter.limit as i64)
            .bind(filter.offset as i64)
            .fetch_all(&self.pool)
            .await?;

        let logs = rows.iter().map(Self::parse_row).collect::<Result<Vec<_>>>()?;
        Ok((logs, total as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entity::AuditAction;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn repo() -> SqliteAuditLogRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = SqliteAuditLogRepository::new(pool);
        repo.init_schema().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_insert_and_list() {
        let repo = repo().await;
        let first = AuditLog::new(AuditAction::RoleChanged, "Principal", Some("P2".into()))
            .with_principal("P1")
            .with_details(serde_json::json!({"from": "viewer", "to": "manager"}))
            .with_ip(Some("10.0.0.1".into()));
        repo.insert(&first).await.unwrap();
        let second = AuditLog::new(AuditAction::Login, "Principal", Some("P1".into()));
        repo.insert(&second).await.unwrap();

        let (logs, total) = repo
            .list(&AuditLogFilter { limit: 10, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(logs[0].id, second.id);
        assert_eq!(logs[1].details, first.details);
        assert_eq!(logs[1].ip_address.as_deref(), Some("10.0.0.1"));

        let (logs, total) = repo
            .list(&AuditLogFilter {
                principal_id: Some("P1".into()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(logs[0].action, AuditAction::RoleChanged);
    }
}
