//! Error types shared across the storage, identity client and session store layers.

use std::time::Duration;

use thiserror::Error;

/// Failure of the backing storage medium.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keychain(#[from] keyring::Error),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),
}

/// Failure reported by an identity client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Identity service is not configured (missing endpoint or API key)")]
    NotConfigured,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Credentials rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Session storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("No session to operate on")]
    MissingSession,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ClientError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            code @ (400 | 401 | 403 | 422) => ClientError::Rejected {
                status: code,
                message: truncated,
            },
            429 => ClientError::RateLimited,
            500..=599 => ClientError::Server(truncated),
            _ => ClientError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }
}

/// Login failure surfaced to the caller of `SessionContext::login`.
#[derive(Error, Debug)]
pub enum AuthenticationError {
    #[error("Authentication failed: {0}")]
    Rejected(#[source] ClientError),

    #[error("Sign-in succeeded but no session change arrived within {0:?}")]
    ConfirmationTimeout(Duration),
}

/// Failure of the initial persisted-session fetch.
///
/// The session store never propagates this: it resolves to an absent session instead so the
/// loading flag cannot stay set forever. It is logged and kept for inspection.
#[derive(Error, Debug)]
#[error("Failed to load persisted session: {0}")]
pub struct InitializationError(#[source] pub ClientError);

/// Failure loading or saving the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not find {0} directory")]
    NoDirectory(&'static str),

    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(
            ClientError::from_status(StatusCode::BAD_REQUEST, "invalid_grant"),
            ClientError::Rejected { status: 400, .. }
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ClientError::RateLimited
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::BAD_GATEWAY, "upstream"),
            ClientError::Server(_)
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::NOT_FOUND, ""),
            ClientError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_truncate_body() {
        let short = "short body";
        assert_eq!(ClientError::truncate_body(short), short);

        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        let truncated = ClientError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.contains("truncated, 520 total bytes"));
    }

    #[test]
    fn test_truncate_body_respects_char_boundary() {
        // 'é' is two bytes, so byte 500 falls inside a character
        let long = format!("a{}", "é".repeat(400));
        let truncated = ClientError::truncate_body(&long);
        assert!(truncated.contains("truncated"));
    }
}
