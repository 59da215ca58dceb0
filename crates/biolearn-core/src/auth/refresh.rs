//! Background token refresh.
//!
//! A single tokio task ticks on a fixed period. Each tick renews the token
//! when the session is logged in and within the refresh window. A failed
//! renewal ends the session and sends the user to the login route; there is
//! no retry.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::guard::LOGIN_ROUTE;
use super::navigation::Navigator;
use super::session::SessionStore;
use super::token;
use crate::api::ApiError;
use crate::models::{AuthPayload, UserRecord};

/// Exchanges a current token for a new token and user snapshot.
pub trait TokenRefresher: Send + Sync {
    fn refresh<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<AuthPayload, ApiError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not logged in, or the token is not close to expiry
    Idle,
    Refreshed,
    /// Refresh failed; the session was cleared
    LoggedOut,
}

struct RefreshContext {
    session: Arc<SessionStore>,
    refresher: Arc<dyn TokenRefresher>,
    navigator: Arc<dyn Navigator>,
}

impl RefreshContext {
    async fn tick(&self) -> TickOutcome {
        let token = match self.session.bearer_token() {
            Some(token) => token,
            None => return TickOutcome::Idle,
        };
        if !token::should_refresh(&token) {
            return TickOutcome::Idle;
        }

        debug!("Token is close to expiry, refreshing");
        match renew(&self.session, self.refresher.as_ref(), self.navigator.as_ref(), &token).await {
            Ok(_) => TickOutcome::Refreshed,
            Err(_) => TickOutcome::LoggedOut,
        }
    }
}

/// Renew `token` and store the result.
///
/// On failure the session is cleared and the navigator is sent to the login
/// route before the error is returned.
pub(crate) async fn renew(
    session: &SessionStore,
    refresher: &dyn TokenRefresher,
    navigator: &dyn Navigator,
    token: &str,
) -> Result<UserRecord, ApiError> {
    match refresher.refresh(token).await {
        Ok(payload) => {
            if let Err(e) = session.save(&payload.token, &payload.user) {
                warn!(error = %e, "Failed to persist refreshed session");
            }
            info!(user_id = payload.user.id, "Token refreshed");
            Ok(payload.user)
        }
        Err(e) => {
            warn!(error = %e, "Token refresh failed, ending session");
            if let Err(e) = session.clear() {
                warn!(error = %e, "Failed to clear session");
            }
            navigator.navigate(LOGIN_ROUTE);
            Err(e)
        }
    }
}

/// Shortest accepted period; tokio's interval panics on zero.
pub const MIN_PERIOD: Duration = Duration::from_secs(1);

pub struct RefreshLoop {
    context: Arc<RefreshContext>,
    period: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshLoop {
    pub fn new(
        session: Arc<SessionStore>,
        refresher: Arc<dyn TokenRefresher>,
        navigator: Arc<dyn Navigator>,
        period: Duration,
    ) -> Self {
        Self {
            context: Arc::new(RefreshContext {
                session,
                refresher,
                navigator,
            }),
            period: period.max(MIN_PERIOD),
            handle: Mutex::new(None),
        }
    }

    /// Start ticking, replacing any timer that is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut handle = self.lock();
        if let Some(existing) = handle.take() {
            debug!("Cancelling existing refresh timer");
            existing.abort();
        }

        let context = Arc::clone(&self.context);
        let period = self.period;
        *handle = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let outcome = context.tick().await;
                debug!(?outcome, "Refresh tick");
            }
        }));
        debug!(period_secs = period.as_secs(), "Refresh timer started");
    }

    pub fn stop(&self) {
        if let Some(existing) = self.lock().take() {
            existing.abort();
            debug!("Refresh timer stopped");
        }
    }

    pub fn state(&self) -> LoopState {
        match self.lock().as_ref() {
            Some(handle) if !handle.is_finished() => LoopState::Running,
            _ => LoopState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one check immediately, outside the timer.
    pub async fn tick(&self) -> TickOutcome {
        self.context.tick().await
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for RefreshLoop {
    fn drop(&mut self) {
        if let Some(existing) = self.lock().take() {
            existing.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::auth::session::tests::student;
    use crate::auth::storage::MemoryStore;
    use crate::auth::token::tests::token_expiring_in;

    const PERIOD: Duration = Duration::from_secs(60);

    #[derive(Default)]
    pub(crate) struct RecordingNavigator {
        pub routes: Mutex<Vec<String>>,
    }

    impl RecordingNavigator {
        pub fn routes(&self) -> Vec<String> {
            self.routes.lock().unwrap().clone()
        }
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, route: &str) {
            self.routes.lock().unwrap().push(route.to_string());
        }
    }

    /// Counts calls; succeeds with a token that is again close to expiry.
    #[derive(Default)]
    struct CountingRefresher {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingRefresher {
        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TokenRefresher for CountingRefresher {
        fn refresh<'a>(&'a self, _token: &'a str) -> BoxFuture<'a, Result<AuthPayload, ApiError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    Err(ApiError::Backend("Refresh token revoked".to_string()))
                } else {
                    Ok(AuthPayload {
                        token: token_expiring_in(120),
                        user: student(),
                    })
                }
            })
        }
    }

    fn setup(
        token: Option<String>,
        refresher: CountingRefresher,
    ) -> (Arc<SessionStore>, Arc<CountingRefresher>, Arc<RecordingNavigator>, RefreshLoop) {
        let session = Arc::new(SessionStore::open(MemoryStore::new()));
        if let Some(token) = token {
            session.save(&token, &student()).unwrap();
        }
        let refresher = Arc::new(refresher);
        let navigator = Arc::new(RecordingNavigator::default());
        let refresh_loop = RefreshLoop::new(
            Arc::clone(&session),
            refresher.clone(),
            navigator.clone(),
            PERIOD,
        );
        (session, refresher, navigator, refresh_loop)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_period() {
        let (_session, refresher, _nav, refresh_loop) =
            setup(Some(token_expiring_in(120)), CountingRefresher::default());
        assert_eq!(refresh_loop.state(), LoopState::Stopped);

        refresh_loop.start();
        assert!(refresh_loop.is_running());

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(refresher.calls(), 0);

        tokio::time::sleep(Duration::from_secs(122)).await;
        assert_eq!(refresher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_keeps_single_timer() {
        let (_session, refresher, _nav, refresh_loop) =
            setup(Some(token_expiring_in(120)), CountingRefresher::default());

        refresh_loop.start();
        refresh_loop.start();
        tokio::time::sleep(Duration::from_secs(181)).await;

        // One timer over 181s fires at 60, 120 and 180
        assert_eq!(refresher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_refresh_far_from_expiry() {
        let (session, refresher, _nav, refresh_loop) =
            setup(Some(token_expiring_in(3600)), CountingRefresher::default());

        refresh_loop.start();
        tokio::time::sleep(Duration::from_secs(181)).await;
        assert_eq!(refresher.calls(), 0);
        assert!(session.is_logged_in());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timer() {
        let (_session, refresher, _nav, refresh_loop) =
            setup(Some(token_expiring_in(120)), CountingRefresher::default());

        refresh_loop.start();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(refresher.calls(), 1);

        refresh_loop.stop();
        assert_eq!(refresh_loop.state(), LoopState::Stopped);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_timer() {
        let (_session, refresher, _nav, refresh_loop) =
            setup(Some(token_expiring_in(120)), CountingRefresher::default());

        refresh_loop.start();
        drop(refresh_loop);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_clamped() {
        let session = Arc::new(SessionStore::open(MemoryStore::new()));
        session.save(&token_expiring_in(120), &student()).unwrap();
        let refresher = Arc::new(CountingRefresher::default());
        let refresh_loop = RefreshLoop::new(
            session,
            refresher.clone(),
            Arc::new(RecordingNavigator::default()),
            Duration::ZERO,
        );
        assert_eq!(refresh_loop.period(), MIN_PERIOD);

        refresh_loop.start();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(refresh_loop.is_running());
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test]
    async fn test_tick_refreshes_and_stores() {
        let original = token_expiring_in(120);
        let (session, refresher, nav, refresh_loop) =
            setup(Some(original.clone()), CountingRefresher::default());

        assert_eq!(refresh_loop.tick().await, TickOutcome::Refreshed);
        assert_eq!(refresher.calls(), 1);
        assert!(session.is_logged_in());
        assert_ne!(session.token(), Some(original));
        assert!(nav.routes().is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_session_and_navigates() {
        let (session, refresher, nav, refresh_loop) =
            setup(Some(token_expiring_in(120)), CountingRefresher::failing());

        assert_eq!(refresh_loop.tick().await, TickOutcome::LoggedOut);
        assert!(session.current().is_empty());
        assert_eq!(nav.routes(), vec![LOGIN_ROUTE.to_string()]);

        // Session is gone, so the next tick does not retry
        assert_eq!(refresh_loop.tick().await, TickOutcome::Idle);
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_tick_idle_when_logged_out() {
        let (_session, refresher, nav, refresh_loop) = setup(None, CountingRefresher::default());
        assert_eq!(refresh_loop.tick().await, TickOutcome::Idle);
        assert_eq!(refresher.calls(), 0);
        assert!(nav.routes().is_empty());
    }
}
