//! Redis Refresh Token Registry
//!
//! Layout, under a configurable prefix:
//! - `{prefix}:rt:{hash}`: HASH with the token record, expiring at the token's expiry
//! - `{prefix}:rt:principal:{id}`: SET of token hashes per principal
//! - `{prefix}:rt:family:{id}`: SET of token hashes per rotation family
//!
//! Rotation and revocation are Lua scripts, so the state check and the
//! update happen in one server-side step.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::auth::refresh_token::RefreshToken;
use crate::auth::refresh_token_store::{RefreshTokenStore, RotateOutcome};
use crate::shared::error::{PlatformError, Result};

/// KEYS: current, replacement, principal set, family set.
/// ARGV: now (ms), replacement hash, replacement expiry (s), then field/value pairs.
const ROTATE_SCRIPT: &str = r#"
    local state = redis.call("HGET", KEYS[1], "state")
    if not state then
        return "not_found"
    end
    if state == "revoked" then
        return "revoked"
    end
    if state == "rotated" then
        return "already_rotated"
    end
    if tonumber(redis.call("HGET", KEYS[1], "expires_at")) <= tonumber(ARGV[1]) then
        return "expired"
    end
    redis.call("HSET", KEYS[1], "state", "rotated", "replaced_by", ARGV[2], "last_used_at", ARGV[1])
    local fields = {}
    for i = 4, #ARGV do
        fields[#fields + 1] = ARGV[i]
    end
    redis.call("HSET", KEYS[2], unpack(fields))
    redis.call("EXPIREAT", KEYS[2], ARGV[3])
    redis.call("SADD", KEYS[3], ARGV[2])
    redis.call("EXPIREAT", KEYS[3], ARGV[3])
    redis.call("SADD", KEYS[4], ARGV[2])
    redis.call("EXPIREAT", KEYS[4], ARGV[3])
    return "rotated"
"#;

/// KEYS: token. ARGV: now (ms). Only active tokens are revoked.
const REVOKE_SCRIPT: &str = r#"
    if redis.call("HGET", KEYS[1], "state") == "active" then
        redis.call("HSET", KEYS[1], "state", "revoked", "revoked_at", ARGV[1])
        return 1
    end
    return 0
"#;

#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    pub url: String,
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "gk".to_string(),
        }
    }
}

pub struct RedisRefreshTokenStore {
    conn: ConnectionManager,
    key_prefix: String,
    rotate_script: redis::Script,
    revoke_script: redis::Script,
}

impl RedisRefreshTokenStore {
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        info!(prefix = %config.key_prefix, "Connected refresh token registry to Redis");
        Ok(Self::new(conn, &config.key_prefix))
    }

    pub fn new(conn: ConnectionManager, key_prefix: &str) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.to_string(),
            rotate_script: redis::Script::new(ROTATE_SCRIPT),
            revoke_script: redis::Script::new(REVOKE_SCRIPT),
        }
    }

    fn token_key(&self, token_hash: &str) -> String {
        token_key(&self.key_prefix, token_hash)
    }

    fn principal_key(&self, principal_id: &str) -> String {
        format!("{}:rt:principal:{}", self.key_prefix, principal_id)
    }

    fn family_key(&self, family_id: &str) -> String {
        format!("{}:rt:family:{}", self.key_prefix, family_id)
    }

    async fn revoke_members(&self, set_key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS").arg(set_key).query_async(&mut conn).await?;

        let now = Utc::now().timestamp_millis();
        let mut revoked = 0;
        for hash in members {
            let changed: i32 = self
                .revoke_script
                .key(self.token_key(&hash))
                .arg(now)
                .invoke_async(&mut conn)
                .await?;
            revoked += changed as u64;
        }
        Ok(revoked)
    }
}

fn token_key(prefix: &str, token_hash: &str) -> String {
    format!("{}:rt:{}", prefix, token_hash)
}

/// Field/value pairs stored in the token hash. Absent options are omitted.
fn token_fields(token: &RefreshToken) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("id", token.id.clone()),
        ("principal_id", token.principal_id.clone()),
        ("family_id", token.family_id.clone()),
        ("state", token.state.as_str().to_string()),
        ("created_at", token.created_at.timestamp_millis().to_string()),
        ("expires_at", token.expires_at.timestamp_millis().to_string()),
    ];
    let optional = [
        ("replaced_by", token.replaced_by.clone()),
        ("revoked_at", token.revoked_at.map(|t| t.timestamp_millis().to_string())),
        ("last_used_at", token.last_used_at.map(|t| t.timestamp_millis().to_string())),
        ("created_from_ip", token.created_from_ip.clone()),
        ("user_agent", token.user_agent.clone()),
    ];
    fields.extend(optional.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))));
    fields
}

fn parse_token(token_hash: &str, fields: &HashMap<String, String>) -> Result<RefreshToken> {
    let required = |name: &str| {
        fields
            .get(name)
            .cloned()
            .ok_or_else(|| PlatformError::internal(format!("Refresh token record missing '{}'", name)))
    };
    let timestamp = |value: &str| -> Result<DateTime<Utc>> {
        value
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| PlatformError::internal(format!("Invalid timestamp in refresh token record: {}", value)))
    };
    let optional_timestamp =
        |name: &str| -> Result<Option<DateTime<Utc>>> { fields.get(name).map(|v| timestamp(v.as_str())).transpose() };

    Ok(RefreshToken {
        id: required("id")?,
        token_hash: token_hash.to_string(),
        principal_id: required("principal_id")?,
        family_id: required("family_id")?,
        state: required("state")?.parse()?,
        replaced_by: fields.get("replaced_by").cloned(),
        created_at: timestamp(&required("created_at")?)?,
        expires_at: timestamp(&required("expires_at")?)?,
        revoked_at: optional_timestamp("revoked_at")?,
        last_used_at: optional_timestamp("last_used_at")?,
        created_from_ip: fields.get("created_from_ip").cloned(),
        user_agent: fields.get("user_agent").cloned(),
    })
}

fn parse_outcome(code: &str) -> Result<RotateOutcome> {
    match code {
        "rotated" => Ok(RotateOutcome::Rotated),
        "already_rotated" => Ok(RotateOutcome::AlreadyRotated),
        "revoked" => Ok(RotateOutcome::Revoked),
        "expired" => Ok(RotateOutcome::Expired),
        "not_found" => Ok(RotateOutcome::NotFound),
        other => Err(PlatformError::internal(format!("Unexpected rotate result: {}", other))),
    }
}

#[async_trait]
impl RefreshTokenStore for RedisRefreshTokenStore {
    async fn insert(&self, token: &RefreshToken) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.token_key(&token.token_hash);
        let principal_key = self.principal_key(&token.principal_id);
        let family_key = self.family_key(&token.family_id);
        let expires_at = token.expires_at.timestamp();
        let fields = token_fields(token);

        redis::pipe()
            .atomic()
            .hset_multiple(&key, fields.as_slice())
            .ignore()
            .expire_at(&key, expires_at)
            .ignore()
            .sadd(&principal_key, &token.token_hash)
            .ignore()
            .expire_at(&principal_key, expires_at)
            .ignore()
            .sadd(&family_key, &token.token_hash)
            .ignore()
            .expire_at(&family_key, expires_at)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.token_key(token_hash))
            .query_async(&mut conn)
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }
        parse_token(token_hash, &fields).map(Some)
    }

    async fn rotate(&self, current_hash: &str, replacement: &RefreshToken) -> Result<RotateOutcome> {
        let mut conn = self.conn.clone();

        let mut invocation = self.rotate_script.prepare_invoke();
        invocation
            .key(self.token_key(current_hash))
            .key(self.token_key(&replacement.token_hash))
            .key(self.principal_key(&replacement.principal_id))
            .key(self.family_key(&replacement.family_id))
            .arg(Utc::now().timestamp_millis())
            .arg(&replacement.token_hash)
            .arg(replacement.expires_at.timestamp());
        for (field, value) in token_fields(replacement) {
            invocation.arg(field).arg(value);
        }

        let code: String = invocation.invoke_async(&mut conn).await?;
        let outcome = parse_outcome(&code)?;
        debug!(outcome = ?outcome, "Redis rotate completed");
        Ok(outcome)
    }

    async fn revoke(&self, token_hash: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let changed: i32 = self
            .revoke_script
            .key(self.token_key(token_hash))
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(changed == 1)
    }

    async fn revoke_all_for_principal(&self, principal_id: &str) -> Result<u64> {
        self.revoke_members(&self.principal_key(principal_id)).await
    }

    async fn revoke_family(&self, family_id: &str) -> Result<u64> {
        self.revoke_members(&self.family_key(family_id)).await
    }

    /// Token keys carry their own expiry, so there is nothing to sweep
    async fn delete_expired(&self) -> Result<u64> {
        Ok(0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::refresh_token::RefreshTokenState;
    use chrono::Duration;

    fn as_map(fields: Vec<(&'static str, String)>) -> HashMap<String, String> {
        fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(token_key("gk", "abc"), "gk:rt:abc");
    }

    #[test]
    fn test_fields_omit_absent_options() {
        let (_, token) = RefreshToken::generate("P1", None, Duration::days(1));
        let fields = as_map(token_fields(&token));
        assert_eq!(fields["state"], "active");
        assert!(!fields.contains_key("replaced_by"));
        assert!(!fields.contains_key("user_agent"));
    }

    #[test]
    fn test_parse_stored_record() {
        let now = Utc::now();
        let (_, mut token) = RefreshToken::generate("P1", None, Duration::days(1));
        token = token.with_client_info(Some("10.0.0.1".into()), Some("curl/8".into()));
        token.mark_rotated("next-hash", now);

        let parsed = parse_token(&token.token_hash, &as_map(token_fields(&token))).unwrap();
        assert_eq!(parsed.state, RefreshTokenState::Rotated);
        assert_eq!(parsed.replaced_by.as_deref(), Some("next-hash"));
        assert_eq!(parsed.family_id, token.family_id);
        assert_eq!(parsed.expires_at.timestamp_millis(), token.expires_at.timestamp_millis());
        assert_eq!(parsed.user_agent.as_deref(), Some("curl/8"));
    }

    #[test]
    fn test_parse_rejects_incomplete_record() {
        let mut fields = HashMap::new();
        fields.insert("state".to_string(), "active".to_string());
        assert!(parse_token("h", &fields).is_err());
    }

    #[test]
    fn test_outcome_codes() {
        assert_eq!(parse_outcome("rotated").unwrap(), RotateOutcome::Rotated);
        assert_eq!(parse_outcome("already_rotated").unwrap(), RotateOutcome::AlreadyRotated);
        assert_eq!(parse_outcome("not_found").unwrap(), RotateOutcome::NotFound);
        assert!(parse_outcome("1").is_err());
    }
}
