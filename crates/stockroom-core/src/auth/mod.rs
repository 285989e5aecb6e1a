//! Authentication module for managing the client session.
//!
//! This module provides:
//! - `TokenStore`: durable holder of the access/refresh credential pair
//! - `TokenInspector`: offline expiry checks on access credentials
//! - `SessionManager`: the derived authenticated state, teardown and view gating
//! - `SessionSupervisor`: periodic re-validation of an idle session
//!
//! The rest of the application never reads or writes credentials directly;
//! it goes through `SessionManager` or the API gateway.

pub mod clock;
pub mod inspector;
pub mod session;
pub mod store;
pub mod supervisor;

pub use clock::{Clock, ManualClock, SystemClock};
pub use inspector::{TokenDecodeError, TokenInspector};
pub use session::{SessionManager, TeardownReason};
pub use store::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenKind, TokenPair, TokenStore};
pub use supervisor::{SessionSupervisor, SupervisorHandle};
