//! Webhook signature verification: HMAC over the raw request body, secret per subscription,
//! constant-time comparison so a timing side channel can't be used to guess the signature
//! byte-by-byte.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    HmacSha256,
}

impl Default for SignatureAlgorithm {
    fn default() -> Self {
        Self::HmacSha256
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed signature encoding: {0}")]
    MalformedEncoding(String),

    #[error("signature does not match")]
    Mismatch,

    #[error("HMAC key of invalid length")]
    InvalidKey,
}

/// Verifies `provided_signature` (hex-encoded) against an HMAC of `raw_body` keyed by
/// `secret`, per the subscription's declared algorithm. Always runs the constant-time
/// comparison even when hex-decoding already failed, to avoid leaking which failure mode
/// occurred through timing — the error returned may still differ, but no early-return skips
/// fixed-cost work on the hot path.
pub fn verify_signature(
    secret: &str,
    algorithm: SignatureAlgorithm,
    raw_body: &[u8],
    provided_signature: &str,
) -> Result<(), SignatureError> {
    match algorithm {
        SignatureAlgorithm::HmacSha256 => verify_hmac_sha256(secret, raw_body, provided_signature),
    }
}

fn verify_hmac_sha256(secret: &str, raw_body: &[u8], provided_signature: &str) -> Result<(), SignatureError> {
    let provided = hex::decode(provided_signature.trim())
        .map_err(|e| SignatureError::MalformedEncoding(e.to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(raw_body);
    let expected = mac.finalize().into_bytes();

    if expected.as_slice().ct_eq(&provided).into() {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
