//! Request signing shared by the outbound client and the inbound webhook
//! verifier.
//!
//! The signature is the lowercase hex HMAC-SHA256, keyed by the shared
//! secret, over `timestamp ‖ requestId ‖ accessCode ‖ body`. The body is
//! signed byte for byte as sent, so callers must never re-serialize it.

use hmac::{Hmac, Mac, digest::InvalidLength};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const ACCESS_CODE_HEADER: &str = "AccessCode";
pub const REQUEST_ID_HEADER: &str = "RequestID";
pub const SIGNATURE_HEADER: &str = "Signature";
pub const TIMESTAMP_HEADER: &str = "Timestamp";

fn keyed_mac(
    secret: &str,
    timestamp: &str,
    request_id: &str,
    access_code: &str,
    body: &[u8],
) -> Result<HmacSha256, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(timestamp.as_bytes());
    mac.update(request_id.as_bytes());
    mac.update(access_code.as_bytes());
    mac.update(body);
    Ok(mac)
}

/// Computes the hex signature for one request.
pub fn sign(
    secret: &str,
    timestamp: &str,
    request_id: &str,
    access_code: &str,
    body: &[u8],
) -> Result<String, InvalidLength> {
    let mac = keyed_mac(secret, timestamp, request_id, access_code, body)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a received hex signature in constant time.
///
/// Malformed hex and wrong-length signatures are treated as mismatches.
pub fn verify(
    secret: &str,
    timestamp: &str,
    request_id: &str,
    access_code: &str,
    body: &[u8],
    signature: &str,
) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    match keyed_mac(secret, timestamp, request_id, access_code, body) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

/// Headers produced for one outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub timestamp: String,
    pub request_id: String,
    pub signature: String,
}

impl SignedHeaders {
    /// Signs `body` with a fresh request id and the current time in epoch millis.
    pub fn generate(secret: &str, access_code: &str, body: &[u8]) -> Result<Self, InvalidLength> {
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let request_id = uuid::Uuid::new_v4().to_string();
        let signature = sign(secret, &timestamp, &request_id, access_code, body)?;
        Ok(Self {
            timestamp,
            request_id,
            signature,
        })
    }
}
