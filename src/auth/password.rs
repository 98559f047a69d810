// Password hashing and verification

use crate::core::errors::IdentityError;
use rand::rngs::OsRng;
use rand::RngCore;
use scrypt::password_hash::{PasswordHash, PasswordHasher, SaltString};
use scrypt::{Params, Scrypt};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Work factor used when none is configured (scrypt log2(N))
pub const DEFAULT_COST: u8 = 15;

/// Lowest accepted work factor
pub const MIN_COST: u8 = 4;

/// Highest accepted work factor. Memory use is 128 * r * 2^cost bytes, 128 MiB here.
pub const MAX_COST: u8 = 17;

const BLOCK_SIZE: u32 = 8;
const PARALLELISM: u32 = 1;
const OUTPUT_LEN: usize = 32;
const SALT_LEN: usize = 16;

/// Salted one-way password hashing with a configurable work factor
///
/// Hashes are stored as PHC strings (`$scrypt$ln=15,r=8,p=1$<salt>$<hash>`),
/// so the cost used at registration travels with each user's hash and is the
/// one applied on verify, independent of the currently configured default.
#[derive(Debug, Clone, Copy)]
pub struct PasswordPolicy {
    cost: u8,
}

impl PasswordPolicy {
    /// Create a policy that hashes new passwords at `cost`
    pub fn new(cost: u8) -> Result<Self, IdentityError> {
        validate_cost(cost as i64)?;
        Ok(Self { cost })
    }

    pub fn cost(&self) -> u8 {
        self.cost
    }

    pub fn hash(&self, plaintext: &str) -> Result<Vec<u8>, IdentityError> {
        hash_password(plaintext, self.cost)
    }

    pub fn verify(&self, stored: &[u8], plaintext: &str) -> bool {
        verify_password(stored, plaintext)
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self { cost: DEFAULT_COST }
    }
}

/// Check that a work factor is inside the supported range
pub fn validate_cost(cost: i64) -> Result<u8, IdentityError> {
    if cost < MIN_COST as i64 || cost > MAX_COST as i64 {
        return Err(IdentityError::PasswordHash(format!(
            "cost {} outside supported range {}..={}",
            cost, MIN_COST, MAX_COST
        )));
    }
    Ok(cost as u8)
}

/// Hash `plaintext` with a fresh random salt at the given cost
pub fn hash_password(plaintext: &str, cost: u8) -> Result<Vec<u8>, IdentityError> {
    let cost = validate_cost(cost as i64)?;
    let params = Params::new(cost, BLOCK_SIZE, PARALLELISM, OUTPUT_LEN)
        .map_err(|e| IdentityError::PasswordHash(format!("Invalid scrypt parameters: {}", e)))?;

    let mut salt_bytes = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| IdentityError::PasswordHash(format!("Failed to encode salt: {}", e)));
    salt_bytes.zeroize();
    let salt = salt?;

    let hash = Scrypt
        .hash_password_customized(plaintext.as_bytes(), None, None, params, &salt)
        .map_err(|e| IdentityError::PasswordHash(format!("Failed to hash password: {}", e)))?;

    Ok(hash.to_string().into_bytes())
}

/// Verify `plaintext` against a stored PHC hash
///
/// Re-derives the digest with the stored salt and parameters, then compares
/// the digests in constant time. Any malformed stored value verifies false.
pub fn verify_password(stored: &[u8], plaintext: &str) -> bool {
    let Ok(encoded) = std::str::from_utf8(stored) else {
        return false;
    };
    let Ok(parsed) = PasswordHash::new(encoded) else {
        return false;
    };
    let (Some(expected), Some(salt)) = (parsed.hash, parsed.salt) else {
        return false;
    };
    let Ok(params) = Params::try_from(&parsed) else {
        return false;
    };

    let Ok(computed) =
        Scrypt.hash_password_customized(plaintext.as_bytes(), None, None, params, salt)
    else {
        return false;
    };

    match computed.hash {
        Some(actual) => actual.as_bytes().ct_eq(expected.as_bytes()).into(),
        None => false,
    }
}

/// Work factor recorded inside a stored hash
pub fn stored_cost(stored: &[u8]) -> Option<u8> {
    let encoded = std::str::from_utf8(stored).ok()?;
    let parsed = PasswordHash::new(encoded).ok()?;
    Params::try_from(&parsed).ok().map(|p| p.log_n())
}
