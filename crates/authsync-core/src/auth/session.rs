use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Seconds before expiry at which a session should be refreshed.
/// Three auto-refresh ticks of 30 seconds each.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 90;

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Identity the session was issued for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Server-issued proof of authentication.
///
/// This is also the persisted form: the identity client stores it as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub expires_at: DateTime<Utc>,
    pub user: SessionUser,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Check if the session will expire within `margin` and should be refreshed
    pub fn needs_refresh(&self, margin: Duration) -> bool {
        Utc::now() + margin >= self.expires_at
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}

#[cfg(test)]
pub(crate) fn test_session(name: &str, expires_in: Duration) -> Session {
    Session {
        access_token: format!("access-{}", name),
        refresh_token: format!("refresh-{}", name),
        token_type: "bearer".to_string(),
        expires_at: Utc::now() + expires_in,
        user: SessionUser {
            id: format!("user-{}", name),
            email: Some(format!("{}@x.com", name)),
        },
    }
}
