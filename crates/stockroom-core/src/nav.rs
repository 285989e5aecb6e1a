//! Views of the application and the navigation intents the session layer emits.
//!
//! The navigation space has two regions: the public region holds only the
//! login view, the protected region holds everything else. The session layer
//! never navigates itself; it publishes a `NavigationIntent` and the routing
//! layer acts on it.

use std::fmt;

use crate::auth::TeardownReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    Login,
    ReadyBuilds,
    Components,
    Peripherals,
    BuildsInProgress,
    Clients,
}

impl View {
    /// Where an authenticated user lands.
    pub const HOME: View = View::ReadyBuilds;

    pub const ALL: [View; 6] = [
        View::Login,
        View::ReadyBuilds,
        View::Components,
        View::Peripherals,
        View::BuildsInProgress,
        View::Clients,
    ];

    pub fn path(self) -> &'static str {
        match self {
            View::Login => "/login",
            View::ReadyBuilds => "/ready-builds",
            View::Components => "/components",
            View::Peripherals => "/peripherals",
            View::BuildsInProgress => "/builds-in-progress",
            View::Clients => "/clients",
        }
    }

    /// Resolve a route path. `/` is an alias for the home view.
    pub fn from_path(path: &str) -> Option<View> {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Some(View::HOME);
        }
        View::ALL.into_iter().find(|v| v.path() == trimmed)
    }

    pub fn requires_auth(self) -> bool {
        self != View::Login
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectReason {
    /// A protected view was requested without a valid session.
    Unauthenticated,
    /// The login view was requested while already authenticated.
    AlreadyAuthenticated,
    /// The session was torn down.
    SessionEnded(TeardownReason),
}

/// A request to the routing layer to replace the current view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationIntent {
    pub from: View,
    pub to: View,
    pub reason: RedirectReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        assert_eq!(View::from_path("/"), Some(View::ReadyBuilds));
        assert_eq!(View::from_path(""), Some(View::ReadyBuilds));
        assert_eq!(View::from_path("/login"), Some(View::Login));
        assert_eq!(View::from_path("/components/"), Some(View::Components));
        assert_eq!(View::from_path("/builds-in-progress"), Some(View::BuildsInProgress));
        assert_eq!(View::from_path("/nowhere"), None);
    }

    #[test]
    fn test_only_login_is_public() {
        let public: Vec<View> = View::ALL.into_iter().filter(|v| !v.requires_auth()).collect();
        assert_eq!(public, vec![View::Login]);
    }

    #[test]
    fn test_paths_round_trip() {
        for view in View::ALL {
            assert_eq!(View::from_path(view.path()), Some(view));
        }
    }
}
