//! Trailer signature derivation
//!
//! ```text
//! string_to_sign = "AWS4-HMAC-SHA256-TRAILER" + "\n" +
//!                  timestamp + "\n" +
//!                  credential_scope + "\n" +
//!                  seed_signature + "\n" +
//!                  hex(sha256(canonical_trailers))
//!
//! signature = hex(hmac_sha256(signing_key, string_to_sign))
//! ```
//!
//! See <https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-streaming-trailers.html>

use crate::crypto::{hex, hmac_sha256, sha256};
use crate::error::{ChunkedError, Result};

use std::fmt;

use zeroize::Zeroize;

pub const TRAILER_ALGORITHM: &str = "AWS4-HMAC-SHA256-TRAILER";

const MAX_CREDENTIAL_SCOPE_LEN: usize = 128;

/// AWS4 signing key
///
/// Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey([u8; 32]);

impl SigningKey {
    #[must_use]
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for SigningKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Derives the signing key: `HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")`
#[must_use]
pub fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> SigningKey {
    let mut secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(secret.as_bytes(), date.as_bytes());
    secret.zeroize();
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    SigningKey(hmac_sha256(&k_service, b"aws4_request"))
}

/// `<date>/<region>/<service>/aws4_request`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialScope<'a> {
    pub date: &'a str,
    pub region: &'a str,
    pub service: &'a str,
}

impl fmt::Display for CredentialScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/aws4_request", self.date, self.region, self.service)
    }
}

/// Inputs to the trailer signature, captured after the request itself has been signed
#[derive(Debug, Clone)]
pub struct SigningContext {
    seed_signature: Box<str>,
    timestamp: Box<str>,
    credential_scope: Box<str>,
    signing_key: SigningKey,
}

impl SigningContext {
    /// Validates and copies the signature info.
    ///
    /// # Errors
    /// Returns [`ChunkedError::InvalidSignatureInfo`] if
    /// + `seed_signature` is not 64 lowercase hex characters
    /// + `timestamp` is not `YYYYMMDDTHHMMSSZ`
    /// + `credential_scope` is empty or longer than 128 bytes
    pub fn new(seed_signature: &str, timestamp: &str, credential_scope: &str, signing_key: &[u8; 32]) -> Result<Self> {
        let is_lower_hex = |c: u8| c.is_ascii_digit() || (b'a'..=b'f').contains(&c);
        if seed_signature.len() != 64 || !seed_signature.bytes().all(is_lower_hex) {
            return Err(ChunkedError::InvalidSignatureInfo("seed signature must be 64 lowercase hex characters"));
        }

        let format = time::macros::format_description!("[year][month][day]T[hour][minute][second]Z");
        if time::PrimitiveDateTime::parse(timestamp, &format).is_err() {
            return Err(ChunkedError::InvalidSignatureInfo("timestamp must be ISO 8601 basic format"));
        }

        if credential_scope.is_empty() || credential_scope.len() > MAX_CREDENTIAL_SCOPE_LEN {
            return Err(ChunkedError::InvalidSignatureInfo("credential scope length out of range"));
        }

        Ok(Self {
            seed_signature: seed_signature.into(),
            timestamp: timestamp.into(),
            credential_scope: credential_scope.into(),
            signing_key: SigningKey(*signing_key),
        })
    }

    #[must_use]
    pub fn seed_signature(&self) -> &str {
        &self.seed_signature
    }

    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    #[must_use]
    pub fn credential_scope(&self) -> &str {
        &self.credential_scope
    }

    /// Signs the canonical (LF-joined) trailer string.
    #[must_use]
    pub fn sign_trailer(&self, canonical_trailers: &[u8]) -> String {
        let string_to_sign =
            trailer_string_to_sign(&self.timestamp, &self.credential_scope, &self.seed_signature, canonical_trailers);
        hex(hmac_sha256(self.signing_key.as_bytes(), string_to_sign.as_bytes()))
    }
}

#[must_use]
pub fn trailer_string_to_sign(timestamp: &str, credential_scope: &str, seed_signature: &str, canonical_trailers: &[u8]) -> String {
    let hashed_trailers = hex(sha256(canonical_trailers));
    format!("{TRAILER_ALGORITHM}\n{timestamp}\n{credential_scope}\n{seed_signature}\n{hashed_trailers}")
}

/// Computes the trailer signature.
///
/// # Errors
/// Returns [`ChunkedError::MissingSignatureContext`] if `ctx` is `None`.
/// A signature is never silently skipped.
pub fn calculate_trailer_signature(ctx: Option<&SigningContext>, canonical_trailers: &[u8]) -> Result<String> {
    match ctx {
        Some(ctx) => Ok(ctx.sign_trailer(canonical_trailers)),
        None => Err(ChunkedError::MissingSignatureContext),
    }
}
