//! Exchange of a refresh credential for a new credential pair.
//!
//! `RefreshProtocol` only talks to the renewal endpoint. It does not read or
//! write the token store and never retries; storing the result and deciding
//! what a failure means is up to the caller.

use std::sync::Arc;

use reqwest::{header, Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::TokenPair;

/// Renewal endpoint, relative to the API base URL.
pub const REFRESH_PATH: &str = "/auth/refresh/";

#[derive(Error, Debug, Clone)]
pub enum RefreshError {
    #[error("no refresh credential stored")]
    MissingCredential,

    #[error("renewal endpoint rejected the refresh credential ({0})")]
    Rejected(StatusCode),

    #[error("renewal endpoint returned an unusable body: {0}")]
    InvalidResponse(String),

    #[error("renewal request timed out")]
    Timeout,

    #[error("renewal request failed: {0}")]
    Transport(Arc<reqwest::Error>),

    /// The session the renewal was started for has ended since.
    #[error("session ended while the renewal was in flight")]
    Superseded,
}

impl RefreshError {
    /// Terminal failures mean the refresh credential is no good and the
    /// session has to end. Transport failures say nothing about the
    /// credential.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RefreshError::MissingCredential
                | RefreshError::Rejected(_)
                | RefreshError::InvalidResponse(_)
        )
    }
}

impl From<reqwest::Error> for RefreshError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RefreshError::Timeout
        } else {
            RefreshError::Transport(Arc::new(e))
        }
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct RefreshProtocol {
    client: Client,
    url: String,
}

impl RefreshProtocol {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), REFRESH_PATH),
        }
    }

    /// Trade `refresh_token` for a new pair.
    pub async fn refresh(&self, refresh_token: Option<String>) -> Result<TokenPair, RefreshError> {
        let refresh_token = refresh_token.ok_or(RefreshError::MissingCredential)?;

        debug!(url = %self.url, "Renewing credentials");
        let response = self
            .client
            .post(&self.url)
            .header(header::ACCEPT, "application/json")
            .json(&RefreshRequest {
                refresh: &refresh_token,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Renewal endpoint rejected refresh credential");
            return Err(RefreshError::Rejected(status));
        }

        let body = response.text().await?;
        serde_json::from_str::<TokenPair>(&body).map_err(|e| {
            warn!(error = %e, "Renewal response is not a credential pair");
            RefreshError::InvalidResponse(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let protocol = RefreshProtocol::new(Client::new(), "https://example.test/api/");
        assert_eq!(protocol.url, "https://example.test/api/auth/refresh/");
    }

    #[test]
    fn test_terminal_classification() {
        assert!(RefreshError::MissingCredential.is_terminal());
        assert!(RefreshError::Rejected(StatusCode::UNAUTHORIZED).is_terminal());
        assert!(RefreshError::InvalidResponse("x".into()).is_terminal());
        assert!(!RefreshError::Timeout.is_terminal());
        assert!(!RefreshError::Superseded.is_terminal());
    }

    #[tokio::test]
    async fn test_missing_credential_sends_nothing() {
        // Unroutable base URL: any request would fail with Transport.
        let protocol = RefreshProtocol::new(Client::new(), "http://127.0.0.1:9");
        let result = protocol.refresh(None).await;
        assert!(matches!(result, Err(RefreshError::MissingCredential)));
    }
}
