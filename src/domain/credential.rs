//! Credential and claims types plus the claims decoder.
//!
//! A credential is an opaque bearer token. Claims are the metadata decoded
//! from it; the decoder never verifies the signature (that trust boundary is
//! the server) and never rejects an expired token, since expiry is policy
//! handled by the scheduler, not a parse failure.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Opaque bearer token representing an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Decoded credential metadata.
///
/// Immutable once decoded; a rotated credential is a new value, never a
/// mutation of this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Role claim, when the server issues one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Issued at time (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_default()
    }

    /// Signed duration until expiry; negative once expired.
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.expires_at() - now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }
}

/// A credential paired with its decoded claims and a per-runtime version.
///
/// The version is bumped on every install; timers and channel sessions armed
/// against a superseded version must treat themselves as no-ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedCredential {
    pub credential: Credential,
    pub claims: Claims,
    pub version: u64,
}

/// Claims decode failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Not three dot-separated base64url segments with a JSON claims
    /// segment carrying the fields we need.
    #[error("malformed credential")]
    Malformed,
}

/// Decode the claims segment of a bearer token.
///
/// Pure and total over its input: any malformed token yields
/// `DecodeError::Malformed`, never a panic. Signature and `exp` validation
/// are deliberately disabled; the scheduler needs the claims of an expired
/// token to observe the expiry.
pub fn decode_claims(credential: &Credential) -> Result<Claims, DecodeError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    decode::<Claims>(
        credential.as_str(),
        &DecodingKey::from_secret(&[]),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| DecodeError::Malformed)
}
