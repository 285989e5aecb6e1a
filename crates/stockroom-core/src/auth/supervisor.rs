//! Background re-validation of the session.
//!
//! A session can expire while the user is idle and issuing no requests. The
//! supervisor re-derives the state on a fixed interval, without touching the
//! network, and ends the session when it flips from authenticated to not.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{SessionManager, TeardownReason};

/// Default re-validation interval.
pub const DEFAULT_SUPERVISOR_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct SessionSupervisor {
    session: Arc<SessionManager>,
    interval: Duration,
    last: bool,
}

impl SessionSupervisor {
    pub fn new(session: Arc<SessionManager>, interval: Duration) -> Self {
        let last = session.derive();
        Self {
            session,
            interval,
            last,
        }
    }

    /// One re-validation. Returns the freshly derived state.
    ///
    /// Teardown runs before the view is gated, so a session that lapsed on a
    /// protected view ends with `SessionEnded(SupervisorExpired)`.
    pub fn tick(&mut self) -> bool {
        if self.last && !self.session.derive() {
            debug!("Session became invalid since the previous check");
            self.session.teardown(TeardownReason::SupervisorExpired);
        }
        self.last = self.session.recompute();
        self.last
    }

    /// Run on the configured interval until the handle is shut down.
    pub fn spawn(mut self) -> SupervisorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.interval;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the start trigger already
            // derived the state.
            interval.tick().await;

            info!(interval_secs = period.as_secs(), "Session supervisor started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.tick();
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Session supervisor stopped");
        });

        SupervisorHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running supervisor. Dropping it stops the supervisor.
pub struct SupervisorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Stop the supervisor and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::inspector::token_expiring_at;
    use crate::auth::{Clock, ManualClock, MemoryTokenStore, TokenPair};
    use crate::nav::{RedirectReason, View};
    use chrono::{Duration as ChronoDuration, Utc};

    fn session_expiring_in(secs: i64) -> (Arc<SessionManager>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let access = token_expiring_at(clock.now().timestamp() + secs);
        let store = MemoryTokenStore::with_pair(&TokenPair::new(access, "r"));
        let session = SessionManager::starting_at(Arc::new(store), clock.clone(), View::Components);
        (Arc::new(session), clock)
    }

    #[test]
    fn test_tick_tears_down_expired_session() {
        let (session, clock) = session_expiring_in(60);
        let mut supervisor = SessionSupervisor::new(session.clone(), DEFAULT_SUPERVISOR_INTERVAL);
        let mut intents = session.subscribe_navigation();

        assert!(supervisor.tick());
        assert!(intents.try_recv().is_err());

        clock.advance(ChronoDuration::minutes(5));
        assert!(!supervisor.tick());
        assert_eq!(session.current_view(), View::Login);
        assert!(session.refresh_token().is_none());
        let intent = intents.try_recv().unwrap();
        assert_eq!(intent.from, View::Components);
        assert_eq!(
            intent.reason,
            RedirectReason::SessionEnded(TeardownReason::SupervisorExpired)
        );
        assert!(intents.try_recv().is_err());
    }

    #[test]
    fn test_tick_after_teardown_does_not_redirect_again() {
        let (session, _clock) = session_expiring_in(3600);
        let mut supervisor = SessionSupervisor::new(session.clone(), DEFAULT_SUPERVISOR_INTERVAL);
        assert!(supervisor.tick());

        let mut intents = session.subscribe_navigation();
        assert!(session.teardown(TeardownReason::RefreshRejected));
        assert!(intents.try_recv().is_ok());

        assert!(!supervisor.tick());
        assert!(!supervisor.tick());
        assert!(intents.try_recv().is_err());
    }

    #[test]
    fn test_tick_without_session_is_quiet() {
        let clock = Arc::new(ManualClock::default());
        let session = Arc::new(SessionManager::starting_at(
            Arc::new(MemoryTokenStore::new()),
            clock,
            View::Login,
        ));
        let mut supervisor = SessionSupervisor::new(session.clone(), DEFAULT_SUPERVISOR_INTERVAL);
        let mut intents = session.subscribe_navigation();

        assert!(!supervisor.tick());
        assert!(intents.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_supervisor_runs_on_interval() {
        let (session, clock) = session_expiring_in(60);
        let mut state = session.subscribe_state();
        let handle = SessionSupervisor::new(session.clone(), DEFAULT_SUPERVISOR_INTERVAL).spawn();

        clock.advance(ChronoDuration::minutes(2));
        tokio::time::sleep(DEFAULT_SUPERVISOR_INTERVAL + std::time::Duration::from_secs(1)).await;

        state.wait_for(|authenticated| !authenticated).await.unwrap();
        assert_eq!(session.current_view(), View::Login);

        handle.shutdown().await;
    }
}
