//! Refresh Token Entity
//!
//! Refresh tokens are opaque random strings. Only their SHA-256 hash is
//! stored, and that hash is the token's identifier in the registry.
//!
//! Every token belongs to a family: the first token issued at login starts
//! one, and each rotation passes the family on to the replacement. Presenting
//! a token that was already rotated revokes whatever is still active in its
//! family.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::shared::error::PlatformError;
use crate::TsidGenerator;

/// Lifecycle of a registry entry. Only `Active` tokens can be exchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenState {
    Active,
    /// Exchanged once; `replaced_by` points at the successor
    Rotated,
    /// Invalidated by logout, a security event or family revocation
    Revoked,
}

impl RefreshTokenState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTokenState::Active => "active",
            RefreshTokenState::Rotated => "rotated",
            RefreshTokenState::Revoked => "revoked",
        }
    }
}

impl fmt::Display for RefreshTokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshTokenState {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RefreshTokenState::Active),
            "rotated" => Ok(RefreshTokenState::Rotated),
            "revoked" => Ok(RefreshTokenState::Revoked),
            other => Err(PlatformError::internal(format!("Unknown refresh token state: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshToken {
    /// TSID
    pub id: String,
    /// SHA-256 of the raw token, base64url without padding
    pub token_hash: String,
    pub principal_id: String,
    /// Shared by every token in one rotation chain
    pub family_id: String,
    pub state: RefreshTokenState,
    /// Hash of the token issued when this one was rotated
    pub replaced_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_from_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RefreshToken {
    /// A new active token record. The raw token is generated separately.
    pub fn new(
        token_hash: impl Into<String>,
        principal_id: impl Into<String>,
        family_id: Option<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        let id = TsidGenerator::generate();
        Self {
            family_id: family_id.unwrap_or_else(|| id.clone()),
            id,
            token_hash: token_hash.into(),
            principal_id: principal_id.into(),
            state: RefreshTokenState::Active,
            replaced_by: None,
            created_at: now,
            expires_at: now + ttl,
            revoked_at: None,
            last_used_at: None,
            created_from_ip: None,
            user_agent: None,
        }
    }

    /// Generate a raw token and its record. The raw token goes to the client
    /// once and is never stored.
    pub fn generate(principal_id: &str, family_id: Option<String>, ttl: Duration) -> (String, Self) {
        let raw = Self::generate_raw_token();
        let token = Self::new(Self::hash_token(&raw), principal_id, family_id, ttl);
        (raw, token)
    }

    pub fn with_client_info(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.created_from_ip = ip;
        self.user_agent = user_agent;
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Active and not yet expired
    pub fn is_usable(&self) -> bool {
        self.state == RefreshTokenState::Active && !self.is_expired()
    }

    pub fn mark_rotated(&mut self, replacement_hash: impl Into<String>, now: DateTime<Utc>) {
        self.state = RefreshTokenState::Rotated;
        self.replaced_by = Some(replacement_hash.into());
        self.last_used_at = Some(now);
    }

    /// Revoke an active token. Returns false if it was not active.
    pub fn revoke(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != RefreshTokenState::Active {
            return false;
        }
        self.state = RefreshTokenState::Revoked;
        self.revoked_at = Some(now);
        true
    }

    /// 32 random bytes, base64url without padding
    pub fn generate_raw_token() -> String {
        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn hash_token(raw_token: &str) -> String {
        let digest = Sha256::digest(raw_token.as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_pair() {
        let (raw, token) = RefreshToken::generate("P1", None, Duration::days(7));
        assert_eq!(raw.len(), 43);
        assert_eq!(token.token_hash, RefreshToken::hash_token(&raw));
        assert_ne!(token.token_hash, raw);
        assert_eq!(token.family_id, token.id);
        assert!(token.is_usable());
    }

    #[test]
    fn test_family_is_inherited() {
        let (_, first) = RefreshToken::generate("P1", None, Duration::days(7));
        let (_, second) = RefreshToken::generate("P1", Some(first.family_id.clone()), Duration::days(7));
        assert_eq!(second.family_id, first.family_id);
        assert_ne!(second.id, first.id);
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(RefreshToken::hash_token("abc"), RefreshToken::hash_token("abc"));
        assert_ne!(RefreshToken::hash_token("abc"), RefreshToken::hash_token("abd"));
    }

    #[test]
    fn test_expiry() {
        let (_, token) = RefreshToken::generate("P1", None, Duration::seconds(-1));
        assert!(token.is_expired());
        assert!(!token.is_usable());
    }

    #[test]
    fn test_revoke_only_active() {
        let now = Utc::now();
        let (_, mut token) = RefreshToken::generate("P1", None, Duration::days(1));
        assert!(token.revoke(now));
        assert!(!token.revoke(now));
        assert_eq!(token.state, RefreshTokenState::Revoked);

        let (_, mut rotated) = RefreshToken::generate("P1", None, Duration::days(1));
        rotated.mark_rotated("next", now);
        assert!(!rotated.revoke(now));
        assert_eq!(rotated.state, RefreshTokenState::Rotated);
    }

    #[test]
    fn test_state_parsing() {
        for state in [RefreshTokenState::Active, RefreshTokenState::Rotated, RefreshTokenState::Revoked] {
            assert_eq!(state.as_str().parse::<RefreshTokenState>().unwrap(), state);
        }
        assert!("gone".parse::<RefreshTokenState>().is_err());
    }
}
