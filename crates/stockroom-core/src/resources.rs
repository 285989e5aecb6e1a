//! CRUD access to the REST collections behind the inventory screens.
//!
//! Records are passed through as opaque JSON; their shape belongs to the
//! screens, not to this crate.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::api::{ApiClient, ApiError, ApiRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Components,
    ReadyBuilds,
    BuildsInProgress,
}

impl Resource {
    pub const ALL: [Resource; 3] = [
        Resource::Components,
        Resource::ReadyBuilds,
        Resource::BuildsInProgress,
    ];

    /// Collection path, relative to the API base URL.
    pub fn path(self) -> &'static str {
        match self {
            Resource::Components => "/components/",
            Resource::ReadyBuilds => "/ready_builds/",
            Resource::BuildsInProgress => "/in_progress_builds/",
        }
    }

    pub fn item_path(self, id: &str) -> String {
        format!("{}{}/", self.path(), id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Resource::Components => "components",
            Resource::ReadyBuilds => "ready-builds",
            Resource::BuildsInProgress => "builds-in-progress",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Resource::ALL
            .into_iter()
            .find(|r| r.name() == wanted)
            .ok_or_else(|| format!("unknown resource '{}'", s))
    }
}

/// Thin CRUD wrapper; every call goes through the gateway.
#[derive(Clone)]
pub struct ResourceClient {
    api: ApiClient,
}

impl ResourceClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn list(&self, resource: Resource) -> Result<Value, ApiError> {
        self.api.get_json(resource.path()).await
    }

    pub async fn get(&self, resource: Resource, id: &str) -> Result<Value, ApiError> {
        self.api.get_json(&resource.item_path(id)).await
    }

    pub async fn create(&self, resource: Resource, body: &Value) -> Result<Value, ApiError> {
        self.api
            .send_json(ApiRequest::post(resource.path()).json(body)?)
            .await
    }

    pub async fn update(&self, resource: Resource, id: &str, body: &Value) -> Result<Value, ApiError> {
        self.api
            .send_json(ApiRequest::put(resource.item_path(id)).json(body)?)
            .await
    }

    pub async fn delete(&self, resource: Resource, id: &str) -> Result<(), ApiError> {
        let response = self.api.send(ApiRequest::delete(resource.item_path(id))).await?;
        ApiClient::check_response(response).await?;
        Ok(())
    }
}
