//! Session store: the locally observed authentication state.
//!
//! `SessionScope` owns a running store. It holds the subscription to the identity client's
//! change notifications and releases it on `close()` or drop. Consumers get a
//! `SessionContext` handle; there is no process-wide instance.

pub mod session_store;
pub mod state;

pub use session_store::{LoginConfirmation, SessionContext, SessionScope, StoreOptions};
pub use state::SessionStoreState;
