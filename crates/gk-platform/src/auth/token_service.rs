//! Access Token Service
//!
//! Signs and verifies JWT access tokens. RS256 when a PEM key pair is
//! supplied, HS256 with a shared secret otherwise. Key material always comes
//! from outside the process; there is no built-in fallback key.
//!
//! Verification is purely local: signature, `exp`/`nbf` (with
//! [`CLOCK_SKEW_LEEWAY_SECS`] of tolerance), issuer, audience and token type.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::principal::entity::Principal;
use crate::role::entity::Role;
use crate::shared::error::{PlatformError, Result};
use crate::TsidGenerator;

/// Tolerance, in seconds, applied to `exp` and `nbf` when verifying access
/// tokens. Bounds the clock drift accepted between issuing and verifying hosts.
pub const CLOCK_SKEW_LEEWAY_SECS: u64 = 30;

/// Value of the `typ` claim on access tokens
pub const ACCESS_TOKEN_TYPE: &str = "access";

/// HS256 secrets shorter than this are accepted with a warning
const MIN_RECOMMENDED_SECRET_LEN: usize = 32;

/// JWT claims for access tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Principal id
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    /// Unique token id
    pub jti: String,
    /// Always [`ACCESS_TOKEN_TYPE`]
    pub typ: String,
    pub username: String,
    /// Role bound at issuance
    pub role: Role,
}

/// Token lifetimes and identity of the issuer
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub issuer: String,
    pub audience: String,
    pub access_token_expiry_secs: i64,
    pub refresh_token_expiry_secs: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "gatekeeper".to_string(),
            audience: "gatekeeper-dashboard".to_string(),
            access_token_expiry_secs: 1800,         // 30 minutes
            refresh_token_expiry_secs: 86400 * 7,   // 7 days
        }
    }
}

/// Signing key material
#[derive(Clone)]
pub enum SigningKey {
    Hmac(String),
    Rsa { private_pem: String, public_pem: String },
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningKey::Hmac(_) => f.write_str("SigningKey::Hmac(..)"),
            SigningKey::Rsa { .. } => f.write_str("SigningKey::Rsa(..)"),
        }
    }
}

/// Why a token failed verification. Only ever logged; callers see `Unauthorized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Expired,
    NotYetValid,
    BadSignature,
    WrongIssuer,
    WrongAudience,
    WrongType,
    Malformed,
}

impl TokenRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenRejection::Expired => "expired",
            TokenRejection::NotYetValid => "not_yet_valid",
            TokenRejection::BadSignature => "bad_signature",
            TokenRejection::WrongIssuer => "wrong_issuer",
            TokenRejection::WrongAudience => "wrong_audience",
            TokenRejection::WrongType => "wrong_type",
            TokenRejection::Malformed => "malformed",
        }
    }
}

pub struct TokenService {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    validation: Validation,
}

impl TokenService {
    pub fn new(config: TokenConfig, key: &SigningKey) -> Result<Self> {
        match key {
            SigningKey::Hmac(secret) => Self::with_secret(config, secret),
            SigningKey::Rsa { private_pem, public_pem } => Self::with_rsa(config, private_pem, public_pem),
        }
    }

    /// HS256 with a shared secret
    pub fn with_secret(config: TokenConfig, secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(PlatformError::configuration("JWT secret must not be empty"));
        }
        if secret.len() < MIN_RECOMMENDED_SECRET_LEN {
            warn!(
                length = secret.len(),
                recommended = MIN_RECOMMENDED_SECRET_LEN,
                "JWT secret is shorter than recommended"
            );
        }

        info!("Token service initialized with HS256");
        Ok(Self::build(
            config,
            EncodingKey::from_secret(secret.as_bytes()),
            DecodingKey::from_secret(secret.as_bytes()),
            Algorithm::HS256,
        ))
    }

    /// RS256 with a PEM key pair
    pub fn with_rsa(config: TokenConfig, private_pem: &str, public_pem: &str) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| PlatformError::configuration(format!("Invalid RSA private key: {}", e)))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| PlatformError::configuration(format!("Invalid RSA public key: {}", e)))?;

        info!("Token service initialized with RS256");
        Ok(Self::build(config, encoding_key, decoding_key, Algorithm::RS256))
    }

    fn build(config: TokenConfig, encoding_key: EncodingKey, decoding_key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.leeway = CLOCK_SKEW_LEEWAY_SECS;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[&config.issuer]);
        validation.set_audience(&[&config.audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "sub", "iss", "aud"]);

        Self {
            config,
            encoding_key,
            decoding_key,
            algorithm,
            validation,
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Claims for a fresh access token carrying the principal's current role
    pub fn claims_for(&self, principal: &Principal) -> AccessTokenClaims {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.config.access_token_expiry_secs);

        AccessTokenClaims {
            sub: principal.id.clone(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: TsidGenerator::generate(),
            typ: ACCESS_TOKEN_TYPE.to_string(),
            username: principal.username.clone(),
            role: principal.role,
        }
    }

    /// Sign an access token for the principal
    pub fn mint_access_token(&self, principal: &Principal) -> Result<(String, AccessTokenClaims)> {
        let claims = self.claims_for(principal);
        let token = self.sign(&claims)?;
        Ok((token, claims))
    }

    /// Sign arbitrary claims with this service's key
    pub fn sign(&self, claims: &AccessTokenClaims) -> Result<String> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|e| PlatformError::internal(format!("Failed to encode JWT: {}", e)))
    }

    /// Verify an access token. Consults no stored state.
    pub fn verify(&self, token: &str) -> std::result::Result<AccessTokenClaims, TokenRejection> {
        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenRejection::Expired,
                ErrorKind::ImmatureSignature => TokenRejection::NotYetValid,
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenRejection::BadSignature,
                ErrorKind::InvalidIssuer => TokenRejection::WrongIssuer,
                ErrorKind::InvalidAudience => TokenRejection::WrongAudience,
                _ => TokenRejection::Malformed,
            })?;

        if claims.typ != ACCESS_TOKEN_TYPE {
            return Err(TokenRejection::WrongType);
        }
        Ok(claims)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    let (scheme, token) = auth_header.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}
