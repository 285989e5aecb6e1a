//! Core library for stockroom.
//!
//! This crate owns everything between the inventory screens and the remote
//! API that is not plain form-to-request mapping:
//! - `auth`: token storage, token inspection, session state and supervision
//! - `api`: the authenticated request gateway, credential refresh and login
//! - `nav`: the view model the session layer gates
//! - `resources`: opaque CRUD helpers for the REST collections
//! - `config`: application configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod nav;
pub mod resources;

pub use api::{ApiClient, ApiError, ApiRequest, RefreshError, RefreshProtocol};
pub use auth::{
    Clock, FileTokenStore, KeyringTokenStore, ManualClock, MemoryTokenStore, SessionManager,
    SessionSupervisor, SupervisorHandle, SystemClock, TeardownReason, TokenInspector, TokenKind,
    TokenPair, TokenStore,
};
pub use config::{Config, TokenBackend};
pub use nav::{NavigationIntent, RedirectReason, View};
pub use resources::{Resource, ResourceClient};
