use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::state::SessionStoreState;
use crate::auth::{AuthChangeEvent, IdentityClient, Notifier, Session, SessionChange, Subscription};
use crate::error::{AuthenticationError, ClientResult, InitializationError};

/// What `login` does after the identity client accepted the credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoginConfirmation {
    /// Return immediately; the state follows when the change notification arrives
    #[default]
    Detached,
    /// Wait until the store has applied a change carrying a session, failing after `timeout`
    AwaitNotification { timeout: Duration },
}

#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub login_confirmation: LoginConfirmation,
}

struct Shared {
    client: Arc<dyn IdentityClient>,
    state: watch::Sender<SessionStoreState>,
    observers: Notifier<SessionStoreState>,
    options: StoreOptions,
}

impl Shared {
    fn publish(&self, next: SessionStoreState) {
        self.state.send_replace(next.clone());
        self.observers.emit(next);
    }

    fn apply_change(&self, change: SessionChange) {
        debug!(
            event = ?change.event,
            authenticated = change.session.is_some(),
            "Applying session change"
        );
        self.publish(SessionStoreState::resolved(change.session));
    }

    fn apply_initial(&self, result: ClientResult<Option<Session>>, superseded: bool) {
        match result {
            Ok(session) if !superseded => {
                debug!(authenticated = session.is_some(), "Initial session resolved");
                self.publish(SessionStoreState::resolved(session));
            }
            Ok(_) => debug!("Initial session superseded by a change notification"),
            Err(e) => {
                let err = InitializationError(e);
                warn!(error = %err, "Treating session as absent");
                if !superseded {
                    self.publish(SessionStoreState::resolved(None));
                }
            }
        }
    }
}

/// Apply the initial fetch and every change notification, one at a time, until shut down.
async fn drive(
    shared: Arc<Shared>,
    mut changes: Subscription<SessionChange>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let client = Arc::clone(&shared.client);
    let mut fetch = client.get_current_session();
    let mut fetched = false;
    let mut notified = false;

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,
            change = changes.recv() => match change {
                // The fetch below is the only source of the initial state
                Some(change) if change.event == AuthChangeEvent::InitialSession => {
                    debug!("Ignoring initial-session notification");
                }
                Some(change) => {
                    notified = true;
                    shared.apply_change(change);
                }
                None => break,
            },
            result = &mut fetch, if !fetched => {
                fetched = true;
                shared.apply_initial(result, notified);
            }
        }
    }

    changes.unsubscribe();
    debug!("Session store stopped");
}

/// Owner of a running session store.
///
/// The change subscription lives exactly as long as the scope.
pub struct SessionScope {
    context: SessionContext,
    shutdown: Option<oneshot::Sender<()>>,
    driver: Option<JoinHandle<()>>,
}

impl SessionScope {
    /// Create a store for `client` and begin loading the persisted session.
    /// Must be called from within a Tokio runtime.
    pub fn start(client: Arc<dyn IdentityClient>, options: StoreOptions) -> Self {
        // Subscribe before fetching so no change can slip between the two
        let changes = client.on_session_change();
        let (state, _) = watch::channel(SessionStoreState::loading());
        let shared = Arc::new(Shared {
            client,
            state,
            observers: Notifier::new(),
            options,
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let driver = tokio::spawn(drive(Arc::clone(&shared), changes, shutdown_rx));

        Self {
            context: SessionContext { shared },
            shutdown: Some(shutdown_tx),
            driver: Some(driver),
        }
    }

    pub fn context(&self) -> SessionContext {
        self.context.clone()
    }

    /// Cancel the change subscription and wait for the store to stop.
    /// No notification emitted afterwards reaches the state.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!(error = %e, "Session store task ended abnormally");
            }
        }
    }
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

/// Handle passed to consumers of the session state. Clone is cheap.
#[derive(Clone)]
pub struct SessionContext {
    shared: Arc<Shared>,
}

impl SessionContext {
    pub fn state(&self) -> SessionStoreState {
        self.shared.state.borrow().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.shared.state.borrow().session.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.state.borrow().is_loading
    }

    /// Every subsequent state transition, in the order it was applied
    pub fn observe(&self) -> Subscription<SessionStoreState> {
        self.shared.observers.subscribe()
    }

    /// Latest-value view of the state
    pub fn watch(&self) -> watch::Receiver<SessionStoreState> {
        self.shared.state.subscribe()
    }

    /// Wait until the loading flag has cleared
    pub async fn wait_until_resolved(&self) -> SessionStoreState {
        let mut rx = self.shared.state.subscribe();
        let resolved = rx.wait_for(|state| !state.is_loading).await;
        match resolved {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    /// Forward credentials to the identity client.
    ///
    /// The state is never modified here: a successful sign-in is reflected once the
    /// resulting change notification has been applied.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<(), AuthenticationError> {
        let confirmation = match self.shared.options.login_confirmation {
            LoginConfirmation::Detached => None,
            LoginConfirmation::AwaitNotification { timeout } => {
                Some((timeout, self.shared.observers.subscribe()))
            }
        };

        if let Err(e) = self.shared.client.sign_in(identifier, secret).await {
            warn!(error = %e, "Login failed");
            return Err(AuthenticationError::Rejected(e));
        }

        if let Some((timeout, mut observer)) = confirmation {
            let confirmed = tokio::time::timeout(timeout, async move {
                while let Some(state) = observer.recv().await {
                    if state.session.is_some() {
                        return true;
                    }
                }
                false
            })
            .await;
            if !matches!(confirmed, Ok(true)) {
                warn!(?timeout, "No session change after login");
                return Err(AuthenticationError::ConfirmationTimeout(timeout));
            }
        }

        info!("Login successful");
        Ok(())
    }

    /// Sign out through the identity client; the `SignedOut` change clears the state
    pub async fn logout(&self) -> ClientResult<()> {
        self.shared.client.sign_out().await
    }

    /// Refresh the session; the `TokenRefreshed` change updates the state
    pub async fn refresh(&self) -> ClientResult<Session> {
        self.shared.client.refresh_session().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::test_session;
    use crate::auth::testing::FakeIdentityClient;
    use crate::error::ClientError;

    fn session(name: &str) -> Session {
        test_session(name, chrono::Duration::hours(1))
    }

    fn start(fake: &Arc<FakeIdentityClient>) -> SessionScope {
        SessionScope::start(fake.clone(), StoreOptions::default())
    }

    async fn settle(fake: &FakeIdentityClient) {
        while !fake.fetch_done() {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn test_startup_without_persisted_session() {
        let fake = Arc::new(FakeIdentityClient::new(Ok(None)));
        let scope = start(&fake);
        let ctx = scope.context();

        assert!(ctx.is_loading());
        let state = ctx.wait_until_resolved().await;
        assert_eq!(state, SessionStoreState::resolved(None));
        assert_eq!(ctx.state(), SessionStoreState::resolved(None));
    }

    #[tokio::test]
    async fn test_startup_with_persisted_session() {
        let alice = session("alice");
        let fake = Arc::new(FakeIdentityClient::new(Ok(Some(alice.clone()))));
        let scope = start(&fake);

        let state = scope.context().wait_until_resolved().await;
        assert_eq!(state.session, Some(alice));
        assert!(state.is_authenticated());
    }

    #[tokio::test]
    async fn test_initial_fetch_failure_resolves_absent() {
        let fake = Arc::new(FakeIdentityClient::new(Err(ClientError::Server(
            "keychain locked".into(),
        ))));
        let scope = start(&fake);

        let state = scope.context().wait_until_resolved().await;
        assert_eq!(state, SessionStoreState::resolved(None));
    }

    #[tokio::test]
    async fn test_notifications_applied_in_order() {
        let fake = Arc::new(FakeIdentityClient::new(Ok(None)));
        let scope = start(&fake);
        let ctx = scope.context();
        ctx.wait_until_resolved().await;

        let mut observer = ctx.observe();
        let payloads = vec![
            Some(session("a")),
            None,
            Some(session("b")),
            Some(session("c")),
            None,
            Some(session("d")),
        ];
        for payload in &payloads {
            let event = if payload.is_some() {
                AuthChangeEvent::SignedIn
            } else {
                AuthChangeEvent::SignedOut
            };
            fake.emit(event, payload.clone());
        }

        for payload in &payloads {
            let state = observer.recv().await.expect("store stopped");
            assert_eq!(state, SessionStoreState::resolved(payload.clone()));
        }
        assert_eq!(ctx.state(), SessionStoreState::resolved(payloads.last().cloned().flatten()));
    }

    #[tokio::test]
    async fn test_logout_then_login_is_two_transitions() {
        let alice = session("alice");
        let fake = Arc::new(FakeIdentityClient::new(Ok(Some(alice.clone()))));
        let scope = start(&fake);
        let ctx = scope.context();
        ctx.wait_until_resolved().await;
        let mut observer = ctx.observe();

        let bob = session("bob");
        fake.emit(AuthChangeEvent::SignedOut, None);
        fake.emit(AuthChangeEvent::SignedIn, Some(bob.clone()));

        assert_eq!(observer.recv().await, Some(SessionStoreState::resolved(None)));
        assert_eq!(observer.recv().await, Some(SessionStoreState::resolved(Some(bob))));
    }

    #[tokio::test]
    async fn test_notification_before_initial_fetch_wins() {
        let stale = session("stale");
        let fresh = session("fresh");
        let fake = Arc::new(FakeIdentityClient::gated(Ok(Some(stale))));
        let scope = start(&fake);
        let ctx = scope.context();
        let mut observer = ctx.observe();

        fake.emit(AuthChangeEvent::SignedIn, Some(fresh.clone()));
        assert_eq!(
            observer.recv().await,
            Some(SessionStoreState::resolved(Some(fresh.clone())))
        );

        fake.release_fetch();
        settle(&fake).await;

        assert_eq!(ctx.state(), SessionStoreState::resolved(Some(fresh)));
        assert!(observer.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_initial_session_notification_is_ignored() {
        let persisted = session("persisted");
        let fake = Arc::new(FakeIdentityClient::gated(Ok(Some(persisted.clone()))));
        let scope = start(&fake);
        let ctx = scope.context();
        let mut observer = ctx.observe();

        fake.emit(AuthChangeEvent::InitialSession, None);
        fake.release_fetch();
        settle(&fake).await;

        assert_eq!(
            observer.recv().await,
            Some(SessionStoreState::resolved(Some(persisted)))
        );
        assert!(observer.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_login_does_not_set_session() {
        let fake = Arc::new(FakeIdentityClient::new(Ok(None)));
        let scope = start(&fake);
        let ctx = scope.context();
        ctx.wait_until_resolved().await;

        // Sign-in succeeds but the client never emits a change
        fake.push_sign_in(Ok(None));
        ctx.login("user@x.com", "secret").await.unwrap();

        assert_eq!(ctx.state(), SessionStoreState::resolved(None));
        assert_eq!(
            fake.sign_in_calls.lock().unwrap().as_slice(),
            &[("user@x.com".to_string(), "secret".to_string())]
        );
    }

    #[tokio::test]
    async fn test_login_followed_by_notification() {
        let fake = Arc::new(FakeIdentityClient::new(Ok(None)));
        let scope = start(&fake);
        let ctx = scope.context();
        ctx.wait_until_resolved().await;
        let mut observer = ctx.observe();

        let s = session("user");
        fake.push_sign_in(Ok(Some(s.clone())));
        ctx.login("user@x.com", "secret").await.unwrap();

        assert_eq!(
            observer.recv().await,
            Some(SessionStoreState::resolved(Some(s.clone())))
        );
        assert_eq!(ctx.session(), Some(s));
        assert!(!ctx.is_loading());
    }

    #[tokio::test]
    async fn test_login_failure_leaves_state_unchanged() {
        let alice = session("alice");
        let fake = Arc::new(FakeIdentityClient::new(Ok(Some(alice.clone()))));
        let scope = start(&fake);
        let ctx = scope.context();
        ctx.wait_until_resolved().await;

        fake.push_sign_in(Err(ClientError::Server("connection reset".into())));
        let err = ctx.login("user@x.com", "secret").await.unwrap_err();

        assert!(matches!(
            err,
            AuthenticationError::Rejected(ClientError::Server(_))
        ));
        assert_eq!(ctx.state(), SessionStoreState::resolved(Some(alice)));
    }

    #[tokio::test]
    async fn test_logout_notification_clears_session() {
        let s = session("s");
        let fake = Arc::new(FakeIdentityClient::new(Ok(Some(s))));
        let scope = start(&fake);
        let ctx = scope.context();
        ctx.wait_until_resolved().await;
        let mut observer = ctx.observe();

        ctx.logout().await.unwrap();

        assert_eq!(observer.recv().await, Some(SessionStoreState::resolved(None)));
        assert_eq!(ctx.state(), SessionStoreState::resolved(None));
    }

    #[tokio::test]
    async fn test_awaited_login_returns_after_state_update() {
        let fake = Arc::new(FakeIdentityClient::new(Ok(None)));
        let scope = SessionScope::start(
            fake.clone(),
            StoreOptions {
                login_confirmation: LoginConfirmation::AwaitNotification {
                    timeout: Duration::from_secs(5),
                },
            },
        );
        let ctx = scope.context();
        ctx.wait_until_resolved().await;

        let s = session("confirmed");
        fake.push_sign_in(Ok(Some(s.clone())));
        ctx.login("user@x.com", "secret").await.unwrap();

        assert_eq!(ctx.session(), Some(s));
    }

    #[tokio::test]
    async fn test_awaited_login_times_out_without_notification() {
        let fake = Arc::new(FakeIdentityClient::new(Ok(None)));
        let timeout = Duration::from_millis(20);
        let scope = SessionScope::start(
            fake.clone(),
            StoreOptions {
                login_confirmation: LoginConfirmation::AwaitNotification { timeout },
            },
        );
        let ctx = scope.context();
        ctx.wait_until_resolved().await;

        fake.push_sign_in(Ok(None));
        let err = ctx.login("user@x.com", "secret").await.unwrap_err();

        assert!(matches!(err, AuthenticationError::ConfirmationTimeout(t) if t == timeout));
        assert_eq!(ctx.state(), SessionStoreState::resolved(None));
    }

    #[tokio::test]
    async fn test_no_writes_after_close() {
        let fake = Arc::new(FakeIdentityClient::new(Ok(None)));
        let scope = start(&fake);
        let ctx = scope.context();
        ctx.wait_until_resolved().await;
        assert_eq!(fake.notifier.subscriber_count(), 1);

        scope.close().await;
        assert_eq!(fake.notifier.subscriber_count(), 0);

        fake.emit(AuthChangeEvent::SignedIn, Some(session("late")));
        tokio::task::yield_now().await;
        assert_eq!(ctx.state(), SessionStoreState::resolved(None));
    }

    #[tokio::test]
    async fn test_dropping_scope_releases_subscription() {
        let fake = Arc::new(FakeIdentityClient::new(Ok(None)));
        let scope = start(&fake);
        scope.context().wait_until_resolved().await;

        drop(scope);
        for _ in 0..100 {
            if fake.notifier.subscriber_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(fake.notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_independent_stores() {
        let one = session("one");
        let first = Arc::new(FakeIdentityClient::new(Ok(Some(one.clone()))));
        let second = Arc::new(FakeIdentityClient::new(Ok(None)));
        let first_scope = start(&first);
        let second_scope = start(&second);

        let a = first_scope.context().wait_until_resolved().await;
        let b = second_scope.context().wait_until_resolved().await;
        assert_eq!(a.session, Some(one.clone()));
        assert_eq!(b.session, None);

        let mut observer = second_scope.context().observe();
        let two = session("two");
        second.emit(AuthChangeEvent::SignedIn, Some(two.clone()));
        assert_eq!(
            observer.recv().await,
            Some(SessionStoreState::resolved(Some(two)))
        );
        assert_eq!(first_scope.context().session(), Some(one));
    }
}
