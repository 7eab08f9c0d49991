//! SQLite Principal Repository
//!
//! Timestamps are stored as Unix milliseconds. Username and email carry
//! `COLLATE NOCASE` unique constraints so clashes are caught by the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;

use crate::principal::entity::Principal;
use crate::principal::repository::{PrincipalFilter, PrincipalRepository, PrincipalStats};
use crate::role::entity::Role;
use crate::shared::error::{PlatformError, Result};

const COLUMNS: &str =
    "id, username, email, full_name, password_hash, role, active, created_at, updated_at, last_login_at";

pub struct SqlitePrincipalRepository {
    pool: SqlitePool,
}

impl SqlitePrincipalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `principals` table if it does not exist
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS principals (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE COLLATE NOCASE,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                full_name TEXT,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_login_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_principals_role ON principals(role);
            CREATE INDEX IF NOT EXISTS idx_principals_created_at ON principals(created_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Principal schema ready");
        Ok(())
    }

    fn parse_row(row: &SqliteRow) -> Result<Principal> {
        let role: String = row.try_get("role")?;
        let created_at: i64 = row.try_get("created_at")?;
        let updated_at: i64 = row.try_get("updated_at")?;
        let last_login_at: Option<i64> = row.try_get("last_login_at")?;

        Ok(Principal {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            full_name: row.try_get("full_name")?,
            password_hash: row.try_get("password_hash")?,
            role: role.parse()?,
            active: row.try_get::<i64, _>("active")? != 0,
            created_at: from_millis(created_at)?,
            updated_at: from_millis(updated_at)?,
            last_login_at: last_login_at.map(from_millis).transpose()?,
        })
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<Principal>> {
        let query = format!("SELECT {} FROM principals WHERE {} = ? COLLATE NOCASE", COLUMNS, column);
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    /// WHERE clause and its string bind values for a listing filter
    fn filter_clause(filter: &PrincipalFilter) -> (String, Vec<String>) {
        let mut conditions = Vec::new();
        let mut binds = Vec::new();

        if let Some(term) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", term.to_lowercase());
            conditions.push(
                "(lower(username) LIKE ? OR lower(email) LIKE ? OR lower(coalesce(full_name, '')) LIKE ?)",
            );
            binds.extend([pattern.clone(), pattern.clone(), pattern]);
        }
        if let Some(role) = filter.role {
            conditions.push("role = ?");
            binds.push(role.as_str().to_string());
        }
        if let Some(active) = filter.active {
            conditions.push(if active { "active = 1" } else { "active = 0" });
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        (clause, binds)
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| PlatformError::internal(format!("Invalid timestamp in principals: {}", ms)))
}

/// Translate a unique-constraint failure into `Duplicate`
fn map_write_error(err: sqlx::Error, principal: &Principal) -> PlatformError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let message = db.message();
            return if message.contains("username") {
                PlatformError::duplicate("Principal", "username", &principal.username)
            } else if message.contains("email") {
                PlatformError::duplicate("Principal", "email", &principal.email)
            } else {
                PlatformError::duplicate("Principal", "id", &principal.id)
            };
        }
    }
    PlatformError::Database(err)
}

#[async_trait]
impl PrincipalRepository for SqlitePrincipalRepository {
    async fn insert(&self, principal: &Principal) -> Result<()> {
        let query = format!(
            "INSERT INTO principals ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            COLUMNS
        );
        sqlx::query(&query)
            .bind(&principal.id)
            .bind(&principal.username)
            .bind(&principal.email)
            .bind(&principal.full_name)
            .bind(&principal.password_hash)
            .bind(principal.role.as_str())
            .bind(principal.active as i64)
            .bind(principal.created_at.timestamp_millis())
            .bind(principal.updated_at.timestamp_millis())
            .bind(principal.last_login_at.map(|t| t.timestamp_millis()))
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_error(e, principal))?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Principal>> {
        let query = format!("SELECT {} FROM principals WHERE id = ?", COLUMNS);
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>> {
        self.find_one("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
        self.find_one("email", email).await
    }

    async fn update(&self, principal: &Principal) -> Result<()> {
        let result = sqlx::query(
            "UPDATE principals SET username = ?, email = ?, full_name = ?, password_hash = ?, \
             role = ?, active = ?, updated_at = ?, last_login_at = ? WHERE id = ?",
        )
        .bind(&principal.username)
        .bind(&principal.email)
        .bind(&principal.full_name)
        .bind(&principal.password_hash)
        .bind(principal.role.as_str())
        .bind(principal.active as i64)
        .bind(principal.updated_at.timestamp_millis())
        .bind(principal.last_login_at.map(|t| t.timestamp_millis()))
        .bind(&principal.id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, principal))?;

        if result.rows_affected() == 0 {
            return Err(PlatformError::not_found("Principal", &principal.id));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM principals WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, filter: &PrincipalFilter) -> Result<(Vec<Principal>, u64)> {
        let (clause, binds) = Self::filter_clause(filter);

        let count_query = format!("SELECT COUNT(*) AS total FROM principals{}", clause);
        let mut count = sqlx::query(&count_query);
        for value in &binds {
            count = count.bind(value);
        }
        let total: i64 = count.fetch_one(&self.pool).await?.try_get("total")?;

        let page_query = format!(
            "SELECT {} FROM principals{} ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
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

        let principals = rows.iter().map(Self::parse_row).collect::<Result<Vec<_>>>()?;
        Ok((principals, total as u64))
    }

    async fn count(&self) -> Result<u64> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM principals")
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;
        Ok(total as u64)
    }

    async fn stats(&self, since: DateTime<Utc>) -> Result<PrincipalStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
             COALESCE(SUM(active), 0) AS active, \
             COALESCE(SUM(CASE WHEN created_at >= ? THEN 1 ELSE 0 END), 0) AS created_since, \
             COALESCE(SUM(CASE WHEN role = ? THEN 1 ELSE 0 END), 0) AS admins \
             FROM principals",
        )
        .bind(since.timestamp_millis())
        .bind(Role::Admin.as_str())
        .fetch_one(&self.pool)
        .await?;

        let count = |column: &str| -> Result<u64> { Ok(row.try_get::<i64, _>(column)?.max(0) as u64) };
        Ok(PrincipalStats {
            total: count("total")?,
            active: count("active")?,
            created_since: count("created_since")?,
            admins: count("admins")?,
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn repo() -> SqlitePrincipalRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = SqlitePrincipalRepository::new(pool);
        repo.init_schema().await.unwrap();
        repo
    }

    fn principal(username: &str, role: Role) -> Principal {
        Principal::new(username, format!("{}@example.com", username), "$argon2id$hash", role)
            .with_full_name(Some(format!("{} Example", username)))
    }

    #[tokio::test]
    async fn test_insert_and_load_round_trip() {
        let repo = repo().await;
        let mut p = principal("dana", Role::Manager);
        p.record_login();
        repo.insert(&p).await.unwrap();

        let loaded = repo.find_by_id(&p.id).await.unwrap().unwrap();
        assert_eq!(loaded.username, "dana");
        assert_eq!(loaded.role, Role::Manager);
        assert_eq!(loaded.full_name.as_deref(), Some("dana Example"));
        assert_eq!(
            loaded.last_login_at.map(|t| t.timestamp_millis()),
            p.last_login_at.map(|t| t.timestamp_millis())
        );
        assert!(repo.find_by_login("DANA@example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unique_violations_become_duplicate() {
        let repo = repo().await;
        repo.insert(&principal("dana", Role::Viewer)).await.unwrap();

        let clash = Principal::new("DANA", "fresh@example.com", "h", Role::Viewer);
        let err = repo.insert(&clash).await.unwrap_err();
        assert!(matches!(err, PlatformError::Duplicate { ref field, .. } if field == "username"));

        let clash = Principal::new("fresh", "dana@example.com", "h", Role::Viewer);
        let err = repo.insert(&clash).await.unwrap_err();
        assert!(matches!(err, PlatformError::Duplicate { ref field, .. } if field == "email"));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let repo = repo().await;
        let mut p = principal("dana", Role::Viewer);
        repo.insert(&p).await.unwrap();

        p.change_role(Role::Admin);
        p.deactivate();
        repo.update(&p).await.unwrap();

        let loaded = repo.find_by_id(&p.id).await.unwrap().unwrap();
        assert_eq!(loaded.role, Role::Admin);
        assert!(!loaded.active);

        assert!(repo.delete(&p.id).await.unwrap());
        let err = repo.update(&p).await.unwrap_err();
        assert!(matches!(err, PlatformError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_with_filters() {
        let repo = repo().await;
        for (name, role) in [
            ("alice", Role::Admin),
            ("bob", Role::Manager),
            ("carol", Role::Viewer),
            ("carl", Role::Viewer),
        ] {
            repo.insert(&principal(name, role)).await.unwrap();
        }

        let filter = PrincipalFilter { search: Some("car".into()), limit: 10, ..Default::default() };
        let (page, total) = repo.list(&filter).await.unwrap();
        assert_eq!(total, 2);
        assert!(page.iter().all(|p| p.username.starts_with("car")));

        let filter = PrincipalFilter { role: Some(Role::Admin), limit: 10, ..Default::default() };
        let (page, total) = repo.list(&filter).await.unwrap();
        assert_eq!((page.len(), total), (1, 1));

        let filter = PrincipalFilter { limit: 2, offset: 2, ..Default::default() };
        let (page, total) = repo.list(&filter).await.unwrap();
        assert_eq!(total, 4);
        assert_eq!(page.len(), 2);
        assert_eq!(repo.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_stats_counts_in_one_query() {
        let repo = repo().await;
        let since = Utc::now() - chrono::Duration::hours(1);

        let mut old = principal("alice", Role::Admin);
        old.created_at = since - chrono::Duration::days(2);
        repo.insert(&old).await.unwrap();
        repo.insert(&principal("bob", Role::Admin)).await.unwrap();
        let mut idle = principal("carol", Role::Viewer);
        idle.deactivate();
        repo.insert(&idle).await.unwrap();

        let stats = repo.stats(since).await.unwrap();
        assert_eq!(
            stats,
            PrincipalStats { total: 3, active: 2, created_since: 2, admins: 2 }
        );
        repo.ping().await.unwrap();
    }
}
