//! Offline inspection of access credentials.
//!
//! The payload of a signed token is decoded without checking the signature;
//! the server verifies signatures, the client only needs the `exp` claim.
//! Anything that cannot be decoded counts as expired.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::debug;

use super::Clock;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenDecodeError {
    #[error("token does not have three segments")]
    Segments,

    #[error("payload is not base64url: {0}")]
    Base64(String),

    #[error("payload is not a JSON object: {0}")]
    Json(String),

    #[error("payload has no numeric exp claim")]
    MissingExp,

    #[error("exp claim is out of range")]
    OutOfRange,
}

/// Answers "is this credential still good" against an injected clock.
#[derive(Clone)]
pub struct TokenInspector {
    clock: Arc<dyn Clock>,
}

impl TokenInspector {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// True when the token's expiry is not in the future, or when the token
    /// cannot be decoded at all.
    pub fn is_expired(&self, token: &str) -> bool {
        match Self::expires_at(token) {
            Ok(exp) => exp <= self.clock.now(),
            Err(e) => {
                debug!(error = %e, "Undecodable access credential treated as expired");
                true
            }
        }
    }

    /// Time left before expiry, clamped at zero. `None` if undecodable.
    pub fn time_until_expiry(&self, token: &str) -> Option<Duration> {
        let exp = Self::expires_at(token).ok()?;
        Some((exp - self.clock.now()).max(Duration::zero()))
    }

    /// Decode the `exp` claim.
    pub fn expires_at(token: &str) -> Result<DateTime<Utc>, TokenDecodeError> {
        let mut segments = token.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(TokenDecodeError::Segments),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| TokenDecodeError::Base64(e.to_string()))?;
        let claims: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| TokenDecodeError::Json(e.to_string()))?;
        if !claims.is_object() {
            return Err(TokenDecodeError::Json("not an object".to_string()));
        }

        let exp = match &claims["exp"] {
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.floor() as i64))
                .ok_or(TokenDecodeError::OutOfRange)?,
            _ => return Err(TokenDecodeError::MissingExp),
        };

        DateTime::from_timestamp(exp, 0).ok_or(TokenDecodeError::OutOfRange)
    }
}

/// Build an unsigned token carrying `exp`. Only the payload matters to the
/// inspector, so the header and signature are placeholders.
#[cfg(test)]
pub(crate) fn token_expiring_at(exp: i64) -> String {
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{},"user_id":7}}"#, exp));
    format!("eyJhbGciOiJIUzI1NiJ9.{}.sig", payload)
}
