use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_REMOTE_STATUS_DIR: &str = "~/.fleetwatch/status";

/// Identity and connection parameters for one remote machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub name: String,
    pub host: String,
    pub user: String,
    pub key_path: PathBuf,
    #[serde(default)]
    pub jump_host: Option<String>,
    #[serde(default)]
    pub status_dir: Option<String>,
}

impl RemoteConfig {
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// `user@jump_host`, routed with the remote's own user.
    pub fn jump_destination(&self) -> Option<String> {
        self.jump_host
            .as_deref()
            .filter(|jump| !jump.is_empty())
            .map(|jump| format!("{}@{}", self.user, jump))
    }

    pub fn status_dir(&self) -> &str {
        self.status_dir
            .as_deref()
            .filter(|dir| !dir.is_empty())
            .unwrap_or(DEFAULT_REMOTE_STATUS_DIR)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        };
        f.pad(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub last_poll: Option<DateTime<Utc>>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}
