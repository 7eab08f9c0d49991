//! Password Service
//!
//! Argon2id hashing and the password policy applied on registration.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use tracing::debug;

use crate::shared::error::{PlatformError, Result};

/// Character classes a policy can demand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharClass {
    Uppercase,
    Lowercase,
    Digit,
    Symbol,
}

impl CharClass {
    const SYMBOLS: &'static str = "!@#$%^&*()_+-=[]{}|;':\",./<>?`~";

    fn matches(self, c: char) -> bool {
        match self {
            CharClass::Uppercase => c.is_ascii_uppercase(),
            CharClass::Lowercase => c.is_ascii_lowercase(),
            CharClass::Digit => c.is_ascii_digit(),
            CharClass::Symbol => Self::SYMBOLS.contains(c),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            CharClass::Uppercase => "an uppercase letter",
            CharClass::Lowercase => "a lowercase letter",
            CharClass::Digit => "a digit",
            CharClass::Symbol => "a symbol",
        }
    }
}

/// Rules a new password must satisfy
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub required_classes: Vec<CharClass>,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::strict()
    }
}

impl PasswordPolicy {
    /// 12+ characters drawing on every class
    pub fn strict() -> Self {
        Self {
            min_length: 12,
            max_length: 128,
            required_classes: vec![
                CharClass::Uppercase,
                CharClass::Lowercase,
                CharClass::Digit,
                CharClass::Symbol,
            ],
        }
    }

    /// Length bounds only, for development and tests
    pub fn lenient() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
            required_classes: Vec::new(),
        }
    }

    /// Policy by configuration name: `strict` (default) or `lenient`
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "strict" | "" => Ok(Self::strict()),
            "lenient" => Ok(Self::lenient()),
            other => Err(PlatformError::configuration(format!(
                "Unknown password policy '{}', expected 'strict' or 'lenient'",
                other
            ))),
        }
    }

    /// Every rule the password breaks, in rule order
    pub fn violations(&self, password: &str) -> Vec<String> {
        let length = password.chars().count();
        let mut broken = Vec::new();

        if length < self.min_length {
            broken.push(format!("at least {} characters", self.min_length));
        } else if length > self.max_length {
            broken.push(format!("no more than {} characters", self.max_length));
        }

        broken.extend(
            self.required_classes
                .iter()
                .filter(|class| !password.chars().any(|c| class.matches(c)))
                .map(|class| format!("at least {}", class.describe())),
        );
        broken
    }

    pub fn allows(&self, password: &str) -> bool {
        self.violations(password).is_empty()
    }
}

/// Argon2id cost parameters
#[derive(Debug, Clone)]
pub struct Argon2Config {
    /// KiB
    pub memory_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
    pub output_len: usize,
}

impl Default for Argon2Config {
    fn default() -> Self {
        Self {
            memory_cost: 64 * 1024,
            time_cost: 3,
            parallelism: 4,
            output_len: 32,
        }
    }
}

impl Argon2Config {
    /// Cheap parameters for tests
    pub fn testing() -> Self {
        Self {
            memory_cost: 4096,
            time_cost: 1,
            parallelism: 1,
            output_len: 32,
        }
    }

    fn to_params(&self) -> Result<Params> {
        Params::new(self.memory_cost, self.time_cost, self.parallelism, Some(self.output_len))
            .map_err(|e| PlatformError::configuration(format!("Invalid Argon2 parameters: {}", e)))
    }
}

pub struct PasswordService {
    argon2: Argon2<'static>,
    policy: PasswordPolicy,
    /// Verified against when the login name is unknown, so both failure
    /// paths cost one Argon2 verification.
    dummy_hash: String,
}

impl PasswordService {
    pub fn new(config: Argon2Config, policy: PasswordPolicy) -> Result<Self> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, config.to_params()?);
        let dummy_hash = Self::hash_with(&argon2, "gatekeeper-dummy-password")?;
        Ok(Self { argon2, policy, dummy_hash })
    }

    /// Fast parameters and the lenient policy
    pub fn for_testing() -> Result<Self> {
        Self::new(Argon2Config::testing(), PasswordPolicy::lenient())
    }

    fn hash_with(argon2: &Argon2<'static>, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| PlatformError::internal(format!("Failed to hash password: {}", e)))
    }

    /// Check the policy, then hash
    pub fn hash_password(&self, password: &str) -> Result<String> {
        self.validate_password(password)?;
        let hash = Self::hash_with(&self.argon2, password)?;
        debug!("Password hashed");
        Ok(hash)
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| PlatformError::internal(format!("Invalid password hash format: {}", e)))?;

        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(PlatformError::internal(format!("Password verification error: {}", e))),
        }
    }

    /// Burn one verification for a login name that does not exist
    pub fn verify_dummy(&self, password: &str) {
        let _ = self.verify_password(password, &self.dummy_hash);
    }

    pub fn validate_password(&self, password: &str) -> Result<()> {
        let broken = self.policy.violations(password);
        if broken.is_empty() {
            return Ok(());
        }
        Err(PlatformError::validation(format!(
            "Password needs {}",
            broken.join(", ")
        )))
    }
}
