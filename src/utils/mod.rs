// Small helpers: identifier generation, URL redaction, log fingerprints

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Bytes of entropy in a session identifier
pub const SESSION_ID_BYTES: usize = 16;

/// Fresh 128-bit random identifier, hex encoded
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Replace the password component of a connection URL with `xxxxx`
///
/// Unparseable input is replaced entirely so nothing secret slips into logs.
pub fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() && parsed.set_password(Some("xxxxx")).is_err() {
                return "<unparseable url>".to_string();
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable url>".to_string(),
    }
}

/// Short stable fingerprint of a secret identifier for log correlation
pub fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(&digest[..6])
}
