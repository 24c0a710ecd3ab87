//! HTTP identity client for a password-grant token service.
//!
//! The client owns the session: it persists it through a `Storage` under a per-project key,
//! refreshes it before expiry, and emits a `SessionChange` after every sign-in, refresh and
//! sign-out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::client::{AuthChangeEvent, IdentityClient, SessionChange};
use super::notify::{Notifier, Subscription};
use super::session::{Session, SessionUser, DEFAULT_REFRESH_MARGIN_SECS};
use crate::config::IdentityConfig;
use crate::error::{ClientError, ClientResult};
use crate::storage::Storage;

/// HTTP request timeout in seconds.
/// 30s allows for slow responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Lifetime assumed when the token response carries no expiry at all
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Interval between auto-refresh checks
pub const AUTO_REFRESH_TICK: Duration = Duration::from_secs(30);

/// API key header expected by the token service
const API_KEY_HEADER: &str = "apikey";

#[derive(Debug, Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl TokenResponse {
    fn into_session(self) -> ClientResult<Session> {
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(ts), _) => Utc
                .timestamp_opt(ts, 0)
                .single()
                .ok_or_else(|| ClientError::InvalidResponse(format!("bad expires_at {}", ts)))?,
            (None, Some(secs)) => Utc::now() + chrono::Duration::seconds(secs),
            (None, None) => Utc::now() + chrono::Duration::seconds(DEFAULT_EXPIRES_IN_SECS),
        };
        Ok(Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_at,
            user: SessionUser {
                id: self.user.id,
                email: self.user.email,
            },
        })
    }
}

pub struct RemoteIdentityClient {
    http: Client,
    config: IdentityConfig,
    storage: Arc<dyn Storage>,
    storage_key: String,
    refresh_margin: chrono::Duration,
    notifier: Notifier<SessionChange>,
    // Only one refresh in flight; later callers pick up its result from storage
    refresh_lock: Mutex<()>,
}

impl RemoteIdentityClient {
    /// Create a client. Empty configuration is accepted; remote calls will then fail.
    pub fn new(config: IdentityConfig, storage: Arc<dyn Storage>) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        if !config.is_configured() {
            warn!("Identity service endpoint or API key missing; remote calls will fail");
        }
        let storage_key = config.storage_key();
        Ok(Self {
            http,
            config,
            storage,
            storage_key,
            refresh_margin: chrono::Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS),
            notifier: Notifier::new(),
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn with_refresh_margin(mut self, margin: chrono::Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    fn ensure_configured(&self) -> ClientResult<()> {
        if self.config.is_configured() {
            Ok(())
        } else {
            Err(ClientError::NotConfigured)
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> ClientResult<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::from_status(status, &body))
        }
    }

    async fn request_token<B: Serialize>(&self, grant_type: &str, body: &B) -> ClientResult<Session> {
        self.ensure_configured()?;
        let url = self.auth_url(&format!("token?grant_type={}", grant_type));
        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .bearer_auth(&self.config.api_key)
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(format!("token response: {}", e)))?;
        token.into_session()
    }

    async fn load_persisted(&self) -> ClientResult<Option<Session>> {
        let Some(blob) = self.storage.get(&self.storage_key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&blob) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable persisted session");
                self.storage.remove(&self.storage_key).await?;
                Ok(None)
            }
        }
    }

    async fn persist(&self, session: &Session) -> ClientResult<()> {
        let blob = serde_json::to_string(session)
            .map_err(|e| ClientError::InvalidResponse(format!("session encoding: {}", e)))?;
        self.storage.set(&self.storage_key, &blob).await?;
        Ok(())
    }

    fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        let delivered = self.notifier.emit(SessionChange::new(event, session));
        debug!(?event, subscribers = delivered, "Session change emitted");
    }

    /// Refresh `current`, unless another caller already replaced it
    async fn refresh_from(&self, current: &Session) -> ClientResult<Session> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(latest) = self.load_persisted().await? {
            if latest.access_token != current.access_token && !latest.needs_refresh(self.refresh_margin) {
                return Ok(latest);
            }
        }

        match self
            .request_token(
                "refresh_token",
                &RefreshGrant {
                    refresh_token: &current.refresh_token,
                },
            )
            .await
        {
            Ok(session) => {
                self.persist(&session).await?;
                info!(user = %session.user_id(), "Session refreshed");
                self.emit(AuthChangeEvent::TokenRefreshed, Some(session.clone()));
                Ok(session)
            }
            Err(e @ ClientError::Rejected { .. }) => {
                warn!(error = %e, "Refresh token rejected, signing out");
                self.storage.remove(&self.storage_key).await?;
                self.emit(AuthChangeEvent::SignedOut, None);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Spawn a task that refreshes the session whenever it nears expiry.
    /// The task stops when the returned guard is dropped.
    pub fn start_auto_refresh(self: &Arc<Self>, tick: Duration) -> AutoRefresh {
        let client = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                client.auto_refresh_tick().await;
            }
        });
        debug!(tick_secs = tick.as_secs(), "Auto-refresh started");
        AutoRefresh { handle }
    }

    async fn auto_refresh_tick(&self) {
        let session = match self.load_persisted().await {
            Ok(Some(session)) => session,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Auto-refresh could not read session");
                return;
            }
        };
        if session.needs_refresh(self.refresh_margin) {
            if let Err(e) = self.refresh_from(&session).await {
                warn!(error = %e, "Auto-refresh failed");
            }
        }
    }
}

#[async_trait]
impl IdentityClient for RemoteIdentityClient {
    async fn get_current_session(&self) -> ClientResult<Option<Session>> {
        // Returned only, never emitted as a change
        match self.load_persisted().await? {
            Some(session) if session.needs_refresh(self.refresh_margin) => {
                debug!(expired = session.is_expired(), "Persisted session needs refresh");
                Ok(Some(self.refresh_from(&session).await?))
            }
            other => Ok(other),
        }
    }

    async fn sign_in(&self, identifier: &str, secret: &str) -> ClientResult<()> {
        let session = self
            .request_token(
                "password",
                &PasswordGrant {
                    email: identifier,
                    password: secret,
                },
            )
            .await?;
        self.persist(&session).await?;
        info!(user = %session.user_id(), "Signed in");
        self.emit(AuthChangeEvent::SignedIn, Some(session));
        Ok(())
    }

    async fn sign_out(&self) -> ClientResult<()> {
        if let Some(session) = self.load_persisted().await? {
            if self.config.is_configured() {
                let result = self
                    .http
                    .post(self.auth_url("logout"))
                    .header(API_KEY_HEADER, &self.config.api_key)
                    .bearer_auth(&session.access_token)
                    .send()
                    .await;
                match result {
                    Ok(response) => {
                        if let Err(e) = Self::check_response(response).await {
                            warn!(error = %e, "Remote sign-out rejected, clearing local session anyway");
                        }
                    }
                    Err(e) => warn!(error = %e, "Remote sign-out failed, clearing local session anyway"),
                }
            }
        }
        self.storage.remove(&self.storage_key).await?;
        info!("Signed out");
        self.emit(AuthChangeEvent::SignedOut, None);
        Ok(())
    }

    async fn refresh_session(&self) -> ClientResult<Session> {
        let current = self
            .load_persisted()
            .await?
            .ok_or(ClientError::MissingSession)?;
        self.refresh_from(&current).await
    }

    fn on_session_change(&self) -> Subscription<SessionChange> {
        self.notifier.subscribe()
    }
}

/// Running auto-refresh task; stops on drop.
pub struct AutoRefresh {
    handle: JoinHandle<()>,
}

impl AutoRefresh {
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
