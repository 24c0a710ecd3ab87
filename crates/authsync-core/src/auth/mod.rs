//! Authentication module: the session model and the identity client seam.
//!
//! This module provides:
//! - `Session`: token bundle with expiry helpers
//! - `IdentityClient`: the capability the session store talks to
//! - `RemoteIdentityClient`: HTTP implementation persisting through a `Storage`
//! - `Notifier`/`Subscription`: ordered change-notification channels

pub mod client;
pub mod notify;
pub mod remote;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{AuthChangeEvent, IdentityClient, SessionChange};
pub use notify::{Notifier, Subscription};
pub use remote::{AutoRefresh, RemoteIdentityClient};
pub use session::{Session, SessionUser, DEFAULT_REFRESH_MARGIN_SECS};
