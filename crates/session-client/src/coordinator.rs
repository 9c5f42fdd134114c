//! Single-flight credential refresh
//!
//! The coordinator is a two-state machine. In `Idle`, the first caller that
//! needs a refresh opens a window: the state becomes `Refreshing` and a task
//! is spawned to run the exchange. Every caller that arrives while the window
//! is open queues a waiter on it instead of starting a second exchange. When
//! the exchange settles, the task updates the store, returns the state to
//! `Idle`, and releases every waiter (FIFO) with the same outcome.
//!
//! State transitions:
//! - Idle → Refreshing (first refresh request)
//! - Refreshing → Idle, pair replaced (exchange succeeded)
//! - Refreshing → Idle, pair cleared, `SessionEvent::Expired` (exchange failed)
//! - Refreshing → Idle, pair untouched, `SignedOut` (session ended or replaced
//!   while the exchange was in flight)
//!
//! A rejection that finds the store already empty fails straight away; the
//! window that emptied it has already signalled the expiry.
//!
//! The window task owns the exchange, so a caller that is cancelled while
//! waiting never leaves the coordinator stuck in `Refreshing`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use session_auth::{Credential, CredentialPair, CredentialStore};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};
use transport::Transport;

use crate::error::RefreshFailure;
use crate::events::{SessionEvent, SessionEvents};

/// What every waiter of a window receives.
pub type RefreshOutcome = std::result::Result<Credential, RefreshFailure>;

/// Completion slot of a caller queued on an open window.
type Waiter = oneshot::Sender<RefreshOutcome>;

enum RefreshState {
    Idle,
    Refreshing { waiters: VecDeque<Waiter> },
}

struct Inner {
    state: Mutex<RefreshState>,
    store: Arc<CredentialStore>,
    transport: Arc<dyn Transport>,
    refresh_url: String,
    timeout: Duration,
    events: SessionEvents,
}

/// Shared handle to the refresh state machine. Cheap to clone.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        transport: Arc<dyn Transport>,
        refresh_url: impl Into<String>,
        timeout: Duration,
        events: SessionEvents,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RefreshState::Idle),
                store,
                transport,
                refresh_url: refresh_url.into(),
                timeout,
                events,
            }),
        }
    }

    /// Open a refresh window, or join the one already open.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.enter(None, false).await
    }

    /// Refresh after the server rejected `rejected_access` (`None` when the
    /// rejected request carried no credential).
    ///
    /// If no window is open and the store already holds an unexpired access
    /// credential other than the rejected one, an earlier window has already
    /// replaced it; that credential is returned without a new exchange.
    pub async fn refresh_rejected(&self, rejected_access: Option<&str>) -> RefreshOutcome {
        self.enter(rejected_access, true).await
    }

    async fn enter(&self, rejected_access: Option<&str>, reuse_current: bool) -> RefreshOutcome {
        let (slot, outcome) = oneshot::channel();
        {
            let mut state = self.inner.state.lock().await;
            match &mut *state {
                RefreshState::Refreshing { waiters } => {
                    waiters.push_back(slot);
                    debug!(queued = waiters.len(), "joined in-flight credential refresh");
                }
                RefreshState::Idle => {
                    if reuse_current {
                        // An empty store means an earlier window already ended
                        // the session and signalled it.
                        let Some(pair) = self.inner.store.get().await else {
                            debug!("no session to refresh");
                            return Err(RefreshFailure::MissingRefreshCredential);
                        };
                        if let Some(current) = self.inner.newer_access(pair, rejected_access) {
                            debug!("access credential already refreshed, reusing it");
                            return Ok(current);
                        }
                    }
                    *state = RefreshState::Refreshing {
                        waiters: VecDeque::from([slot]),
                    };
                    info!("opening credential refresh window");
                    tokio::spawn(run_window(self.inner.clone()));
                }
            }
        }
        outcome.await.unwrap_or(Err(RefreshFailure::Abandoned))
    }
}

impl Inner {
    /// The stored access credential, if it is unexpired and differs from
    /// the one the server rejected.
    fn newer_access(
        &self,
        pair: CredentialPair,
        rejected_access: Option<&str>,
    ) -> Option<Credential> {
        let newer = rejected_access != Some(pair.access.token());
        (newer && !self.store.is_expired(&pair.access)).then_some(pair.access)
    }

    /// Run the exchange and apply its result to the store.
    async fn settle(&self) -> RefreshOutcome {
        let Some(pair) = self.store.get().await else {
            return Err(RefreshFailure::MissingRefreshCredential);
        };

        match self.exchange(&pair.refresh).await {
            Ok(refreshed) => {
                let access = refreshed.access.clone();
                match self.store.replace_if_current(&pair.refresh, refreshed).await {
                    Ok(true) => Ok(access),
                    Ok(false) => {
                        warn!("session changed during refresh, discarding exchanged credentials");
                        Err(RefreshFailure::SignedOut)
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to persist refreshed credentials");
                        Ok(access)
                    }
                }
            }
            Err(reason) => match self.store.clear_if_current(&pair.refresh).await {
                Ok(true) => Err(reason),
                Ok(false) => {
                    warn!(error = %reason, "refresh failed but the session changed meanwhile");
                    Err(RefreshFailure::SignedOut)
                }
                Err(e) => {
                    warn!(error = %e, "failed to remove stored credentials");
                    Err(reason)
                }
            },
        }
    }

    async fn exchange(
        &self,
        refresh: &Credential,
    ) -> std::result::Result<CredentialPair, RefreshFailure> {
        let exchange =
            session_auth::refresh_token(self.transport.as_ref(), &self.refresh_url, refresh);
        let result = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(response) => response
                .and_then(|r| r.into_pair(refresh))
                .map_err(RefreshFailure::from),
            Err(_) => Err(RefreshFailure::Timeout(self.timeout.as_secs())),
        };

        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!("session_refresh_exchanges_total", "outcome" => outcome).increment(1);
        result
    }
}

/// Body of the task that owns one refresh window.
async fn run_window(inner: Arc<Inner>) {
    let outcome = inner.settle().await;

    if let Err(reason) = &outcome {
        warn!(error = %reason, "credential refresh failed, session expired");
        // A logout already told the application the session is over
        if *reason != RefreshFailure::SignedOut {
            inner.events.emit(SessionEvent::Expired {
                reason: reason.clone(),
            });
        }
    }

    let waiters = {
        let mut state = inner.state.lock().await;
        match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => VecDeque::new(),
        }
    };

    info!(
        waiters = waiters.len(),
        success = outcome.is_ok(),
        "credential refresh window closed"
    );
    for waiter in waiters {
        // A waiter whose caller was cancelled has dropped its receiver
        let _ = waiter.send(outcome.clone());
    }
}
