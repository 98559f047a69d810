// Signed bearer tokens referencing a cached session

use crate::core::errors::IdentityError;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretVec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Fixed issuer claim
pub const ISSUER: &str = "Jutzo Service";

/// Shortest accepted signing secret in bytes
pub const MIN_SECRET_LEN: usize = 32;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims carried by every token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub iss: String,
    /// Username
    pub sub: String,
    /// Session cache key
    pub id: String,
    pub iat: u64,
    pub exp: u64,
}

/// Stateless HS256 token codec
///
/// Decoding checks the algorithm, signature, issuer and expiry (no leeway) and
/// never consults the session cache.
pub struct TokenCodec {
    secret: SecretVec<u8>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    /// Build a codec from the raw signing secret
    pub fn new(secret: &[u8]) -> Result<Self, IdentityError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(IdentityError::Configuration(format!(
                "Token secret must be at least {} bytes, got {}",
                MIN_SECRET_LEN,
                secret.len()
            )));
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Ok(Self {
            secret: SecretVec::new(secret.to_vec()),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        })
    }

    /// Build a codec from a hex-encoded secret
    pub fn from_hex(secret_hex: &str) -> Result<Self, IdentityError> {
        let secret = hex::decode(secret_hex.trim()).map_err(|e| {
            IdentityError::Configuration(format!("Token secret is not valid hex: {}", e))
        })?;
        Self::new(&secret)
    }

    /// Issue a token for `subject` referencing `session_id`, valid for `duration`
    pub fn encode(
        &self,
        subject: &str,
        session_id: &str,
        duration: Duration,
    ) -> Result<String, IdentityError> {
        self.encode_at(subject, session_id, Utc::now(), duration)
    }

    /// Issue a token as if at `issued_at`
    pub fn encode_at(
        &self,
        subject: &str,
        session_id: &str,
        issued_at: DateTime<Utc>,
        duration: Duration,
    ) -> Result<String, IdentityError> {
        let iat = issued_at.timestamp().max(0) as u64;
        let claims = Claims {
            iss: ISSUER.to_string(),
            sub: subject.to_string(),
            id: session_id.to_string(),
            iat,
            exp: iat.saturating_add(duration.as_secs()),
        };

        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| IdentityError::TokenInvalid(format!("Failed to sign token: {}", e)))
    }

    /// Verify a token and return the session id it references
    pub fn decode(&self, token: &str) -> Result<String, IdentityError> {
        self.decode_claims(token).map(|claims| claims.id)
    }

    /// Verify a token and return all of its claims
    pub fn decode_claims(&self, token: &str) -> Result<Claims, IdentityError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| IdentityError::TokenInvalid(format!("{:?}", e.kind())))?;

        if data.claims.id.is_empty() {
            return Err(IdentityError::TokenInvalid("missing session reference".to_string()));
        }
        Ok(data.claims)
    }

    /// Length of the configured secret, for diagnostics
    pub fn secret_len(&self) -> usize {
        self.secret.expose_secret().len()
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &ALGORITHM)
            .field("issuer", &ISSUER)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
