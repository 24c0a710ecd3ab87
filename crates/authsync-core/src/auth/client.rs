use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::notify::Subscription;
use super::session::Session;
use crate::error::ClientResult;

/// Why the session changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// One change notification: the event and the session that is current after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    pub event: AuthChangeEvent,
    pub session: Option<Session>,
}

impl SessionChange {
    pub fn new(event: AuthChangeEvent, session: Option<Session>) -> Self {
        Self { event, session }
    }
}

/// Capability exposed by the remote identity service.
///
/// Implementations own the session and its persistence; callers only ever see copies.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// The persisted session, refreshed first if it is about to expire
    async fn get_current_session(&self) -> ClientResult<Option<Session>>;

    /// Verify credentials. Success is reported through a `SignedIn` change.
    async fn sign_in(&self, identifier: &str, secret: &str) -> ClientResult<()>;

    /// End the session locally and remotely. Reported through a `SignedOut` change.
    async fn sign_out(&self) -> ClientResult<()>;

    /// Exchange the refresh token for a new session. Reported through `TokenRefreshed`.
    async fn refresh_session(&self) -> ClientResult<Session>;

    /// Register for change notifications, delivered in emission order
    fn on_session_change(&self) -> Subscription<SessionChange>;
}
