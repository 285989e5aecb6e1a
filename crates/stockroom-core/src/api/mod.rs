//! REST API access for the stockroom backend.
//!
//! This module provides the `ApiClient`, the gateway every domain call goes
//! through. It attaches the bearer credential, renews it through the
//! `RefreshProtocol` when it has expired or is rejected, and retries a
//! rejected request exactly once.
//!
//! The backend issues JWT access/refresh pairs from `POST /auth/` and renews
//! them at `POST /auth/refresh/`.

pub mod client;
pub mod error;
pub mod refresh;
pub mod request;

pub use client::ApiClient;
pub use error::ApiError;
pub use refresh::{RefreshError, RefreshProtocol};
pub use request::ApiRequest;
