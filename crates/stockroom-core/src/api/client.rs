//! API client for the stockroom backend.
//!
//! `ApiClient` is the authenticated request gateway: every domain call is
//! issued through [`ApiClient::send`], which attaches the access credential,
//! renews it before sending when it has already expired, and renews and
//! resends once when the server still answers 401.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{header, Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ApiError, ApiRequest, RefreshError, RefreshProtocol};
use crate::auth::{SessionManager, TeardownReason, TokenPair};
use crate::config::Config;

// ============================================================================
// Constants
// ============================================================================

/// Login endpoint, relative to the API base URL.
const LOGIN_PATH: &str = "/auth/";

/// Shown when a rejected login carries no message of its own.
const DEFAULT_LOGIN_FAILURE: &str = "Authorization failed";

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginFailure {
    message: Option<String>,
}

/// A renewal in progress, awaited by every caller that needs it.
type SharedRefresh = Shared<BoxFuture<'static, Result<String, RefreshError>>>;

/// API client for the stockroom backend.
/// Clone is cheap - clones share the connection pool, the session and the
/// in-flight renewal.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Arc<SessionManager>,
    refresh: RefreshProtocol,
    /// Pending renewal, keyed by the session generation it was started for.
    in_flight: Arc<Mutex<Option<(u64, SharedRefresh)>>>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(config: &Config, session: Arc<SessionManager>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self::with_client(client, &config.api_base_url, session))
    }

    /// Create a client around an existing `reqwest::Client`.
    pub fn with_client(client: Client, base_url: &str, session: Arc<SessionManager>) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            refresh: RefreshProtocol::new(client.clone(), &base_url),
            client,
            base_url,
            session,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    // ===== Login / logout =====

    /// Exchange email and password for a credential pair and start a session.
    ///
    /// On rejection the server's `message` is returned verbatim in
    /// `ApiError::LoginFailed` and the session stays unauthenticated.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(LOGIN_PATH))
            .header(header::ACCEPT, "application/json")
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<LoginFailure>(&body)
                .ok()
                .and_then(|f| f.message)
                .unwrap_or_else(|| DEFAULT_LOGIN_FAILURE.to_string());
            warn!(%status, "Login rejected");
            return Err(ApiError::LoginFailed(message));
        }

        let pair: TokenPair = serde_json::from_str(&body).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse login response: {}", e))
        })?;
        self.session.begin(&pair);
        info!("Logged in");
        Ok(())
    }

    pub fn logout(&self) -> bool {
        self.session.logout()
    }

    // ===== Gateway =====

    /// Send a domain request with the current credentials.
    ///
    /// Any response other than 401 is returned as-is, success or not. A 401
    /// triggers one renewal and one resend; a second 401 ends the session
    /// with `ApiError::AuthorizationFailed`. A renewal the server refuses
    /// ends the session with `ApiError::SessionExpired`. Transport failures
    /// and timeouts are returned without touching the session.
    ///
    /// The session is pinned when the call starts: if it ends and a new one
    /// begins while the call is in flight, nothing this call observes can
    /// end the new session.
    pub async fn send(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let generation = self.session.generation();
        let access = match self.session.access_token() {
            Some(token) if self.session.inspector().is_expired(&token) => {
                debug!(path = %request.path, "Access credential expired, renewing before send");
                let renewed = self.renew(Some(&token), generation).await?;
                Some(renewed)
            }
            current => current,
        };

        let response = self.dispatch(&request, access.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!(
            method = %request.method,
            path = %request.path,
            "Request unauthorized, renewing credentials and retrying once"
        );
        let renewed = self.renew(access.as_deref(), generation).await?;
        let response = self.dispatch(&request, Some(&renewed)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(
                method = %request.method,
                path = %request.path,
                "Request still unauthorized after renewal"
            );
            self.session
                .teardown_for(TeardownReason::AuthorizationRejected, generation);
            return Err(ApiError::AuthorizationFailed);
        }
        Ok(response)
    }

    fn auth_headers(request: &ApiRequest, token: Option<&str>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = request.headers.clone();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::InvalidRequest("Access credential is not a valid header value".to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response, ApiError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .headers(Self::auth_headers(request, token)?);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        builder.send().await.map_err(|e| {
            warn!(method = %request.method, path = %request.path, error = %e, "Request failed");
            ApiError::from(e)
        })
    }

    /// Renew the credentials, sharing a renewal already in flight for the
    /// same session.
    ///
    /// `stale` is the access credential the caller found wanting. If another
    /// caller has replaced it with a good one in the meantime, that one is
    /// used without contacting the server. `generation` is the session the
    /// caller started under; once it has ended the caller gets
    /// `SessionExpired` and the current session is left alone.
    async fn renew(&self, stale: Option<&str>, generation: u64) -> Result<String, ApiError> {
        let pending = {
            let mut slot = self.in_flight.lock().await;
            if self.session.generation() != generation {
                debug!(generation, "Session ended before renewal, not renewing");
                return Err(ApiError::SessionExpired);
            }
            if let Some(current) = self.session.access_token() {
                if Some(current.as_str()) != stale && !self.session.inspector().is_expired(&current) {
                    debug!("Credentials already renewed by another request");
                    return Ok(current);
                }
            }
            match slot.as_ref() {
                Some((started, pending)) if *started == generation => pending.clone(),
                _ => {
                    let pending = self.start_refresh(generation);
                    *slot = Some((generation, pending.clone()));
                    pending
                }
            }
        };

        let result = pending.clone().await;

        {
            let mut slot = self.in_flight.lock().await;
            if slot.as_ref().is_some_and(|(_, p)| p.ptr_eq(&pending)) {
                *slot = None;
            }
        }

        match result {
            Ok(access) => Ok(access),
            Err(RefreshError::Superseded) => {
                debug!(generation, "Renewal outlived its session, discarding");
                Err(ApiError::SessionExpired)
            }
            Err(e) if e.is_terminal() => {
                warn!(error = %e, "Credential renewal refused, ending session");
                self.session
                    .teardown_for(TeardownReason::RefreshRejected, generation);
                Err(ApiError::SessionExpired)
            }
            Err(RefreshError::Timeout) => Err(ApiError::Timeout),
            Err(e) => Err(ApiError::RefreshUnavailable(e)),
        }
    }

    fn start_refresh(&self, generation: u64) -> SharedRefresh {
        let protocol = self.refresh.clone();
        let session = self.session.clone();

        async move {
            let refresh_token = session
                .refresh_token_for(generation)
                .map_err(|()| RefreshError::Superseded)?;
            let pair = protocol.refresh(refresh_token).await?;
            if session.store_refreshed(&pair, generation) {
                Ok::<_, RefreshError>(pair.access)
            } else {
                Err(RefreshError::Superseded)
            }
        }
        .boxed()
        .shared()
    }

    // ===== Typed helpers =====

    /// Check if response is successful, returning an error with body if not.
    pub async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send and decode a JSON success body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let path = request.path.clone();
        let response = Self::check_response(self.send(request).await?).await?;
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {}: {}", path, e)))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(ApiRequest::get(path)).await
    }
}
