pub mod manager;
pub mod types;

pub use manager::TmuxManager;
pub use types::*;

use async_trait::async_trait;
use std::collections::HashSet;

/// Source of the names of sessions currently alive on this machine.
#[async_trait]
pub trait LiveSessions: Send + Sync {
    /// `None` when liveness could not be determined at all.
    async fn live_session_names(&self) -> Option<HashSet<String>>;
}
