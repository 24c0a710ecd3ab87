//! Runtime capability detection.
//!
//! The platform decides which storage medium backs the session: a browser-style persistent
//! key/value store, or an encrypted store for sandboxed mobile targets. It is detected once at
//! process start and handed to `StorageAdapter::for_platform`.

use std::fmt;
use std::str::FromStr;

/// Environment variable that overrides platform detection
pub const PLATFORM_ENV: &str = "AUTHSYNC_PLATFORM";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Browser-like runtime with persistent key/value storage.
    /// `windowed == false` models server rendering, where no storage exists.
    Web { windowed: bool },
    /// Sandboxed runtime with secure storage only.
    Native,
}

impl Platform {
    /// Detect the runtime capability, honouring the `AUTHSYNC_PLATFORM` override.
    pub fn detect() -> Self {
        if let Ok(value) = std::env::var(PLATFORM_ENV) {
            match value.parse() {
                Ok(platform) => return platform,
                Err(e) => tracing::warn!(value = %value, error = %e, "Ignoring platform override"),
            }
        }
        Self::from_target()
    }

    /// Platform implied by the compilation target alone.
    pub fn from_target() -> Self {
        if cfg!(any(target_os = "ios", target_os = "android")) {
            Platform::Native
        } else {
            Platform::Web { windowed: true }
        }
    }

    pub fn has_persistent_web_storage(&self) -> bool {
        matches!(self, Platform::Web { windowed: true })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Web { windowed: true } => write!(f, "web"),
            Platform::Web { windowed: false } => write!(f, "headless"),
            Platform::Native => write!(f, "native"),
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "web" => Ok(Platform::Web { windowed: true }),
            "headless" | "server" => Ok(Platform::Web { windowed: false }),
            "native" | "secure" => Ok(Platform::Native),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}
