//! Session state for the client.
//!
//! `SessionManager` is the single source of truth for "is this client
//! authenticated". The state is never set directly: it is re-derived from the
//! token store and the inspector on application start, on every navigation,
//! and on every supervisor tick.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::{Clock, TokenInspector, TokenKind, TokenPair, TokenStore};
use crate::nav::{NavigationIntent, RedirectReason, View};

/// Capacity of the navigation intent channel. Intents are rare; a slow
/// router only ever needs the latest few.
const NAVIGATION_CHANNEL_CAPACITY: usize = 16;

/// Why a session was ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// The user asked to log out.
    Logout,
    /// The renewal endpoint refused the refresh credential, or there was none.
    RefreshRejected,
    /// A request was still rejected after a successful refresh.
    AuthorizationRejected,
    /// The supervisor found the session had expired while idle.
    SupervisorExpired,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TeardownReason::Logout => "logout",
            TeardownReason::RefreshRejected => "refresh rejected",
            TeardownReason::AuthorizationRejected => "authorization rejected",
            TeardownReason::SupervisorExpired => "expired while idle",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct Inner {
    view: View,
    /// Armed while there is a session that has not been torn down yet.
    active: bool,
    /// Bumped on every login and teardown. Refreshes started under an older
    /// generation must not write their result back.
    generation: u64,
}

pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    inspector: TokenInspector,
    state: watch::Sender<bool>,
    navigation: broadcast::Sender<NavigationIntent>,
    inner: Mutex<Inner>,
}

impl SessionManager {
    /// Create the session layer over `store`, starting on the home view.
    pub fn new(store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>) -> Self {
        Self::starting_at(store, clock, View::HOME)
    }

    /// Create the session layer with the routing layer's initial view.
    ///
    /// This is the application-start trigger: the state is derived and the
    /// initial view gated, but no intent can be observed yet since nobody has
    /// subscribed. Use [`SessionManager::current_view`] to read the outcome.
    pub fn starting_at(store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>, view: View) -> Self {
        let has_pair =
            store.get(TokenKind::Access).is_some() && store.get(TokenKind::Refresh).is_some();
        let (state, _) = watch::channel(false);
        let (navigation, _) = broadcast::channel(NAVIGATION_CHANNEL_CAPACITY);

        let manager = Self {
            store,
            inspector: TokenInspector::new(clock),
            state,
            navigation,
            inner: Mutex::new(Inner {
                view,
                active: has_pair,
                generation: 0,
            }),
        };
        let authenticated = manager.recompute();
        info!(
            store = manager.store.name(),
            authenticated,
            view = %manager.current_view(),
            "Session layer started"
        );
        manager
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Derivation =====

    /// The derivation rule: both credentials present and the access
    /// credential not expired. No side effects.
    pub fn derive(&self) -> bool {
        match (
            self.store.get(TokenKind::Access),
            self.store.get(TokenKind::Refresh),
        ) {
            (Some(access), Some(_)) => !self.inspector.is_expired(&access),
            _ => false,
        }
    }

    /// Re-derive and publish the state without touching navigation.
    pub fn is_authenticated(&self) -> bool {
        let authenticated = self.derive();
        self.publish(authenticated);
        authenticated
    }

    /// Re-derive, publish, and gate the current view.
    pub fn recompute(&self) -> bool {
        let authenticated = self.derive();
        self.publish(authenticated);
        let mut inner = self.lock();
        self.gate(&mut inner, authenticated);
        authenticated
    }

    /// Navigation trigger: record the requested view, re-derive, and return
    /// the view that ends up shown.
    pub fn navigate(&self, view: View) -> View {
        let authenticated = self.derive();
        self.publish(authenticated);
        let mut inner = self.lock();
        inner.view = view;
        self.gate(&mut inner, authenticated);
        inner.view
    }

    fn publish(&self, authenticated: bool) {
        self.state.send_if_modified(|current| {
            let changed = *current != authenticated;
            *current = authenticated;
            changed
        });
    }

    fn gate(&self, inner: &mut Inner, authenticated: bool) {
        if !authenticated && inner.view.requires_auth() {
            self.redirect(inner, View::Login, RedirectReason::Unauthenticated);
        } else if authenticated && inner.view == View::Login {
            self.redirect(inner, View::HOME, RedirectReason::AlreadyAuthenticated);
        }
    }

    fn redirect(&self, inner: &mut Inner, to: View, reason: RedirectReason) -> bool {
        if inner.view == to {
            return false;
        }
        let intent = NavigationIntent {
            from: inner.view,
            to,
            reason,
        };
        inner.view = to;
        debug!(from = %intent.from, to = %intent.to, ?reason, "Redirecting");
        // No subscriber simply means no router is attached yet.
        let _ = self.navigation.send(intent);
        true
    }

    // ===== Accessors =====

    pub fn current_view(&self) -> View {
        self.lock().view
    }

    pub fn subscribe_state(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    pub fn subscribe_navigation(&self) -> broadcast::Receiver<NavigationIntent> {
        self.navigation.subscribe()
    }

    pub fn inspector(&self) -> &TokenInspector {
        &self.inspector
    }

    pub(crate) fn access_token(&self) -> Option<String> {
        self.store.get(TokenKind::Access)
    }

    pub(crate) fn refresh_token(&self) -> Option<String> {
        self.store.get(TokenKind::Refresh)
    }

    /// The refresh credential, read under the session lock. `Err(())` when
    /// `generation` is no longer the current session.
    pub(crate) fn refresh_token_for(&self, generation: u64) -> Result<Option<String>, ()> {
        let inner = self.lock();
        if inner.generation != generation {
            return Err(());
        }
        Ok(self.store.get(TokenKind::Refresh))
    }

    /// Time left on the current access credential, for status display.
    pub fn access_expires_in(&self) -> Option<chrono::Duration> {
        self.access_token()
            .and_then(|token| self.inspector.time_until_expiry(&token))
    }

    pub(crate) fn generation(&self) -> u64 {
        self.lock().generation
    }

    // ===== Transitions =====

    /// Start a new session after a successful login.
    pub fn begin(&self, pair: &TokenPair) {
        let mut inner = self.lock();
        if let Err(e) = self.store.set(pair) {
            warn!(store = self.store.name(), error = %e, "Failed to persist credentials");
        }
        inner.active = true;
        inner.generation += 1;

        let authenticated = self.derive();
        self.publish(authenticated);
        self.gate(&mut inner, authenticated);
        info!(authenticated, "Session started");
    }

    /// Persist a refreshed pair if the session it was obtained for is still
    /// the current one. Returns false when the pair was discarded.
    pub(crate) fn store_refreshed(&self, pair: &TokenPair, generation: u64) -> bool {
        let inner = self.lock();
        if !inner.active || inner.generation != generation {
            debug!("Discarding refreshed credentials for an ended session");
            return false;
        }
        if let Err(e) = self.store.set(pair) {
            warn!(store = self.store.name(), error = %e, "Failed to persist refreshed credentials");
        }
        drop(inner);

        self.publish(self.derive());
        debug!("Credentials refreshed");
        true
    }

    /// End the session: clear the store, force the state to false and send
    /// the user to the login view.
    ///
    /// Safe to call any number of times from any trigger. Only the first call
    /// for a session redirects; returns whether this call ended the session.
    pub fn teardown(&self, reason: TeardownReason) -> bool {
        let inner = self.lock();
        self.end(inner, reason)
    }

    /// Like [`SessionManager::teardown`], but only if `generation` is still
    /// the current session. Failures observed by work started under an older
    /// session must not end a newer one.
    pub(crate) fn teardown_for(&self, reason: TeardownReason, generation: u64) -> bool {
        let inner = self.lock();
        if inner.generation != generation {
            debug!(%reason, generation, current = inner.generation, "Ignoring teardown for a superseded session");
            return false;
        }
        self.end(inner, reason)
    }

    fn end(&self, mut inner: MutexGuard<'_, Inner>, reason: TeardownReason) -> bool {
        if let Err(e) = self.store.clear() {
            warn!(store = self.store.name(), error = %e, "Failed to clear credentials");
        }
        self.publish(false);

        if !inner.active {
            debug!(%reason, "Session already ended");
            return false;
        }
        inner.active = false;
        inner.generation += 1;
        self.redirect(&mut inner, View::Login, RedirectReason::SessionEnded(reason));
        info!(%reason, "Session ended");
        true
    }

    /// Explicit logout.
    pub fn logout(&self) -> bool {
        self.teardown(TeardownReason::Logout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::inspector::token_expiring_at;
    use crate::auth::{ManualClock, MemoryTokenStore};
    use chrono::Utc;

    fn valid_access() -> String {
        token_expiring_at(Utc::now().timestamp() + 3600)
    }

    fn expired_access() -> String {
        token_expiring_at(Utc::now().timestamp() - 3600)
    }

    fn manager_with(store: MemoryTokenStore, view: View) -> SessionManager {
        SessionManager::starting_at(Arc::new(store), Arc::new(ManualClock::default()), view)
    }

    #[test]
    fn test_derivation_presence_and_validity() {
        let cases = [
            (Some(valid_access()), Some("r"), true),
            (Some(expired_access()), Some("r"), false),
            (Some(valid_access()), None, false),
            (None, Some("r"), false),
            (None, None, false),
        ];
        for (access, refresh, expected) in cases {
            let store = match (&access, refresh) {
                (Some(a), Some(r)) => MemoryTokenStore::with_pair(&TokenPair::new(a.clone(), r)),
                (Some(a), None) => MemoryTokenStore::with_only(TokenKind::Access, a.clone()),
                (None, Some(r)) => MemoryTokenStore::with_only(TokenKind::Refresh, r),
                (None, None) => MemoryTokenStore::new(),
            };
            let session = manager_with(store, View::HOME);
            assert_eq!(session.derive(), expected, "{:?} {:?}", access.is_some(), refresh);
            assert_eq!(*session.subscribe_state().borrow(), expected);
        }
    }

    #[test]
    fn test_start_unauthenticated_lands_on_login() {
        let session = manager_with(MemoryTokenStore::new(), View::Components);
        assert_eq!(session.current_view(), View::Login);
    }

    #[test]
    fn test_navigation_gating() {
        let session = manager_with(MemoryTokenStore::new(), View::Login);
        let mut intents = session.subscribe_navigation();

        assert_eq!(session.navigate(View::Clients), View::Login);
        let intent = intents.try_recv().unwrap();
        assert_eq!(intent.from, View::Clients);
        assert_eq!(intent.reason, RedirectReason::Unauthenticated);

        session.begin(&TokenPair::new(valid_access(), "r"));
        assert_eq!(session.current_view(), View::HOME);
        assert_eq!(intents.try_recv().unwrap().reason, RedirectReason::AlreadyAuthenticated);

        assert_eq!(session.navigate(View::Login), View::HOME);
        assert_eq!(session.navigate(View::Peripherals), View::Peripherals);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let store = MemoryTokenStore::with_pair(&TokenPair::new(valid_access(), "r"));
        let session = manager_with(store, View::Components);
        let mut intents = session.subscribe_navigation();

        assert!(session.teardown(TeardownReason::RefreshRejected));
        assert!(!session.teardown(TeardownReason::SupervisorExpired));
        assert!(!session.logout());

        let intent = intents.try_recv().unwrap();
        assert_eq!(intent.to, View::Login);
        assert_eq!(
            intent.reason,
            RedirectReason::SessionEnded(TeardownReason::RefreshRejected)
        );
        assert!(intents.try_recv().is_err());
        assert!(!session.is_authenticated());
        assert_eq!(session.access_token(), None);
        assert_eq!(session.refresh_token(), None);
    }

    #[test]
    fn test_login_rearms_teardown() {
        let session = manager_with(MemoryTokenStore::new(), View::Login);
        assert!(!session.logout());

        session.begin(&TokenPair::new(valid_access(), "r"));
        assert!(session.is_authenticated());
        assert!(session.logout());
        assert_eq!(session.current_view(), View::Login);
    }

    #[test]
    fn test_refresh_from_ended_session_is_discarded() {
        let store = MemoryTokenStore::with_pair(&TokenPair::new(expired_access(), "r"));
        let session = manager_with(store, View::Login);
        let generation = session.generation();

        session.logout();
        assert!(!session.store_refreshed(&TokenPair::new(valid_access(), "r2"), generation));
        assert_eq!(session.refresh_token(), None);
    }

    #[test]
    fn test_teardown_for_ended_session_spares_new_login() {
        let store = MemoryTokenStore::with_pair(&TokenPair::new(valid_access(), "r1"));
        let session = manager_with(store, View::Components);
        let old = session.generation();

        session.logout();
        session.begin(&TokenPair::new(valid_access(), "r2"));
        let mut intents = session.subscribe_navigation();

        assert!(!session.teardown_for(TeardownReason::RefreshRejected, old));
        assert!(session.is_authenticated());
        assert_eq!(session.refresh_token().as_deref(), Some("r2"));
        assert!(intents.try_recv().is_err());
        assert_eq!(session.refresh_token_for(old), Err(()));

        assert!(session.teardown_for(TeardownReason::RefreshRejected, session.generation()));
        assert_eq!(session.current_view(), View::Login);
    }

    #[test]
    fn test_refresh_updates_state() {
        let store = MemoryTokenStore::with_pair(&TokenPair::new(expired_access(), "r"));
        let session = manager_with(store, View::Login);
        let state = session.subscribe_state();
        assert!(!*state.borrow());

        assert!(session.store_refreshed(&TokenPair::new(valid_access(), "r2"), session.generation()));
        assert!(*state.borrow());
        assert_eq!(session.refresh_token().as_deref(), Some("r2"));
    }
}
