use serde::Serialize;

use crate::auth::Session;

/// What observers of the session store see.
///
/// `is_loading` is true only until the persisted session has been resolved (or a change
/// notification arrived first); it never becomes true again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SessionStoreState {
    pub session: Option<Session>,
    pub is_loading: bool,
}

impl SessionStoreState {
    /// State before the first resolution
    pub fn loading() -> Self {
        Self {
            session: None,
            is_loading: true,
        }
    }

    pub fn resolved(session: Option<Session>) -> Self {
        Self {
            session,
            is_loading: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

impl Default for SessionStoreState {
    fn default() -> Self {
        Self::loading()
    }
}
