use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::calc::FeeTable;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Edit gating: LOCKED until the shared secret is presented, UNLOCKED until
/// an explicitly confirmed lock or process exit. No timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditSession {
    Locked,
    Unlocked,
}

impl EditSession {
    pub fn is_unlocked(self) -> bool {
        matches!(self, Self::Unlocked)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
        }
    }
}

/// The session token and fee table are process-wide singletons for one
/// daemon lifetime; both live here instead of in globals so every handler
/// receives them explicitly.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: EditSession,
    pub fees: FeeTable,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            session: EditSession::Locked,
            fees: FeeTable::default(),
        }
    }
}
