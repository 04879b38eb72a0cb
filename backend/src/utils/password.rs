//! Argon2id password digests and the server-side strength policy.
//!
//! Digests use the PHC string format
//! (`$argon2id$v=19$m=65536,t=3,p=4$<salt>$<hash>`), so the parameters travel
//! with every stored digest and can be retuned without invalidating old ones.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier, Version};
use std::fmt;
use thiserror::Error;

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;
pub const HASH_OUTPUT_LENGTH: usize = 32;

/// Characters that satisfy the symbol rule (ASCII punctuation).
pub const PASSWORD_SYMBOLS: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

const ALGORITHM_ID: &str = "argon2id";
const VERSION_FIELD: &str = "v=19";

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("failed to hash password: {0}")]
    Hashing(String),
    #[error("invalid argon2 parameters: {0}")]
    InvalidParams(String),
    #[error("malformed password digest: {0}")]
    MalformedDigest(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PasswordRule {
    TooShort,
    TooLong,
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSymbol,
}

impl PasswordRule {
    pub fn message(&self) -> &'static str {
        match self {
            PasswordRule::TooShort => "password must be at least 8 characters long",
            PasswordRule::TooLong => "password must be no more than 128 characters long",
            PasswordRule::MissingUppercase => "password must contain at least one uppercase letter",
            PasswordRule::MissingLowercase => "password must contain at least one lowercase letter",
            PasswordRule::MissingDigit => "password must contain at least one number",
            PasswordRule::MissingSymbol => "password must contain at least one special character",
        }
    }
}

impl fmt::Display for PasswordRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Checks a candidate password against every rule and reports all violations.
pub fn check_strength(password: &str) -> Result<(), Vec<PasswordRule>> {
    let mut violations = Vec::new();
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        violations.push(PasswordRule::TooShort);
    }
    if length > MAX_PASSWORD_LENGTH {
        violations.push(PasswordRule::TooLong);
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        violations.push(PasswordRule::MissingUppercase);
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        violations.push(PasswordRule::MissingLowercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push(PasswordRule::MissingDigit);
    }
    if !password.chars().any(|c| PASSWORD_SYMBOLS.contains(c)) {
        violations.push(PasswordRule::MissingSymbol);
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    params: HashParams,
}

impl fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordHasher")
            .field("params", &self.params)
            .finish()
    }
}

impl PasswordHasher {
    pub fn new(params: HashParams) -> Result<Self, PasswordError> {
        let argon2_params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            Some(HASH_OUTPUT_LENGTH),
        )
        .map_err(|e| PasswordError::InvalidParams(e.to_string()))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params),
            params,
        })
    }

    pub fn params(&self) -> HashParams {
        self.params
    }

    /// Hashes with a fresh 16-byte random salt.
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        let digest = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| PasswordError::Hashing(e.to_string()))?;

        Ok(digest.to_string())
    }

    /// Verifies using the parameters recorded in `digest`, not the current
    /// defaults. Output comparison is constant time.
    pub fn verify(&self, password: &str, digest: &str) -> Result<bool, PasswordError> {
        let parsed = parse_digest(digest)?;

        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(_) => Err(PasswordError::MalformedDigest("digest parameters rejected")),
        }
    }
}

fn parse_digest(digest: &str) -> Result<PasswordHash<'_>, PasswordError> {
    let fields: Vec<&str> = digest.split('$').collect();
    if fields.len() != 6 || !fields[0].is_empty() {
        return Err(PasswordError::MalformedDigest("unexpected field count"));
    }
    if fields[1] != ALGORITHM_ID {
        return Err(PasswordError::MalformedDigest("unsupported algorithm"));
    }
    if fields[2] != VERSION_FIELD {
        return Err(PasswordError::MalformedDigest("unsupported version"));
    }
    check_param_field(fields[3])?;
    if !is_b64_field(fields[4]) {
        return Err(PasswordError::MalformedDigest("invalid salt encoding"));
    }
    if !is_b64_field(fields[5]) {
        return Err(PasswordError::MalformedDigest("invalid hash encoding"));
    }

    PasswordHash::new(digest).map_err(|_| PasswordError::MalformedDigest("unparseable digest"))
}

fn check_param_field(field: &str) -> Result<(), PasswordError> {
    let pairs: Vec<&str> = field.split(',').collect();
    if pairs.len() != 3 {
        return Err(PasswordError::MalformedDigest("unexpected parameter count"));
    }
    for (pair, expected_key) in pairs.iter().zip(["m", "t", "p"]) {
        let (key, value) = pair
            .split_once('=')
            .ok_or(PasswordError::MalformedDigest("invalid parameter"))?;
        if key != expected_key || value.parse::<u32>().is_err() {
            return Err(PasswordError::MalformedDigest("invalid parameter"));
        }
    }
    Ok(())
}

fn is_b64_field(field: &str) -> bool {
    !field.is_empty()
        && field
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}
