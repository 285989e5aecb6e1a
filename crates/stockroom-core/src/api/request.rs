//! Replayable description of an outbound domain request.
//!
//! A rejected request may be sent a second time after the credentials are
//! renewed, so the gateway takes a plain description it can rebuild from
//! rather than a one-shot `reqwest::Request`.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;

use super::ApiError;

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: Option<serde_json::Value>,
    pub(crate) headers: HeaderMap,
}

impl ApiRequest {
    /// `path` is relative to the API base URL, e.g. `/components/`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header. `Authorization` is owned by the gateway and is rejected.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, ApiError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid header name: {}", e)))?;
        if name == reqwest::header::AUTHORIZATION {
            return Err(ApiError::InvalidRequest(
                "Authorization header is set by the session layer".to_string(),
            ));
        }
        let value = HeaderValue::from_str(value)
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let request = ApiRequest::put("/components/3/")
            .query("page", "2")
            .json(&serde_json::json!({"details": "RTX 4070"}))
            .unwrap()
            .header("X-Request-Source", "cli")
            .unwrap();

        assert_eq!(request.method(), &Method::PUT);
        assert_eq!(request.path(), "/components/3/");
        assert_eq!(request.query, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(request.body.as_ref().unwrap()["details"], "RTX 4070");
        assert_eq!(request.headers["x-request-source"], "cli");
    }

    #[test]
    fn test_authorization_header_rejected() {
        let result = ApiRequest::get("/components/").header("Authorization", "Bearer x");
        assert!(matches!(result, Err(ApiError::InvalidRequest(_))));
    }
}
