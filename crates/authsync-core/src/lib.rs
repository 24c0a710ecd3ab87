//! authsync core library.
//!
//! Keeps an authenticated client's session: loads it from platform storage at startup,
//! follows the identity client's change notifications, and broadcasts the resulting
//! state to any number of observers.
//!
//! The typical wiring:
//! 1. Detect the `Platform` and open a `StorageAdapter` for it
//! 2. Build a `RemoteIdentityClient` on top of that storage
//! 3. `SessionScope::start` the store and hand `SessionContext`s to consumers

pub mod auth;
pub mod config;
pub mod error;
pub mod platform;
pub mod storage;
pub mod store;

pub use auth::{
    AuthChangeEvent, IdentityClient, RemoteIdentityClient, Session, SessionChange, SessionUser,
    Subscription,
};
pub use config::{Config, IdentityConfig};
pub use error::{AuthenticationError, ClientError, ConfigError, InitializationError, StorageError};
pub use platform::Platform;
pub use storage::{Storage, StorageAdapter, StorageOptions};
pub use store::{LoginConfirmation, SessionContext, SessionScope, SessionStoreState, StoreOptions};
