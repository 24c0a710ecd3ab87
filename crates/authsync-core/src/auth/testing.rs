//! Scriptable identity client for session store tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::client::{AuthChangeEvent, IdentityClient, SessionChange};
use super::notify::{Notifier, Subscription};
use super::session::Session;
use crate::error::{ClientError, ClientResult};

pub(crate) struct FakeIdentityClient {
    pub notifier: Notifier<SessionChange>,
    initial: Mutex<Option<ClientResult<Option<Session>>>>,
    fetch_gate: Option<Notify>,
    fetch_done: AtomicBool,
    sign_in_results: Mutex<VecDeque<ClientResult<Option<Session>>>>,
    pub sign_in_calls: Mutex<Vec<(String, String)>>,
}

impl FakeIdentityClient {
    /// Initial fetch resolves immediately with `initial`
    pub fn new(initial: ClientResult<Option<Session>>) -> Self {
        Self {
            notifier: Notifier::new(),
            initial: Mutex::new(Some(initial)),
            fetch_gate: None,
            fetch_done: AtomicBool::new(false),
            sign_in_results: Mutex::new(VecDeque::new()),
            sign_in_calls: Mutex::new(Vec::new()),
        }
    }

    /// Initial fetch waits until `release_fetch` is called
    pub fn gated(initial: ClientResult<Option<Session>>) -> Self {
        Self {
            fetch_gate: Some(Notify::new()),
            ..Self::new(initial)
        }
    }

    pub fn release_fetch(&self) {
        if let Some(gate) = &self.fetch_gate {
            gate.notify_one();
        }
    }

    pub fn fetch_done(&self) -> bool {
        self.fetch_done.load(Ordering::SeqCst)
    }

    /// Queue the outcome of the next `sign_in`.
    /// `Ok(Some(session))` also emits `SignedIn`; `Ok(None)` succeeds silently.
    pub fn push_sign_in(&self, result: ClientResult<Option<Session>>) {
        self.sign_in_results.lock().unwrap().push_back(result);
    }

    pub fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        self.notifier.emit(SessionChange::new(event, session));
    }
}

#[async_trait]
impl IdentityClient for FakeIdentityClient {
    async fn get_current_session(&self) -> ClientResult<Option<Session>> {
        if let Some(gate) = &self.fetch_gate {
            gate.notified().await;
        }
        let result = self
            .initial
            .lock()
            .unwrap()
            .take()
            .unwrap_or(Ok(None));
        self.fetch_done.store(true, Ordering::SeqCst);
        result
    }

    async fn sign_in(&self, identifier: &str, secret: &str) -> ClientResult<()> {
        self.sign_in_calls
            .lock()
            .unwrap()
            .push((identifier.to_string(), secret.to_string()));
        let result = self
            .sign_in_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(None));
        if let Some(session) = result? {
            self.emit(AuthChangeEvent::SignedIn, Some(session));
        }
        Ok(())
    }

    async fn sign_out(&self) -> ClientResult<()> {
        self.emit(AuthChangeEvent::SignedOut, None);
        Ok(())
    }

    async fn refresh_session(&self) -> ClientResult<Session> {
        Err(ClientError::MissingSession)
    }

    fn on_session_change(&self) -> Subscription<SessionChange> {
        self.notifier.subscribe()
    }
}
