use serde::{Deserialize, Serialize};

/// One observed agent session, decoded from a status descriptor.
///
/// Every key is optional on the wire; absent keys fall back to their
/// defaults and unknown keys are dropped, so collaborators can add fields
/// without breaking older readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(rename = "tmux_session", default)]
    pub session_name: String,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub working_directory: String,
    #[serde(rename = "timestamp", default)]
    pub timestamp_unix: i64,
    /// Empty for local sessions, otherwise the remote's logical name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<serde_json::Value>,
}

impl SessionInfo {
    pub fn is_local(&self) -> bool {
        self.origin.is_empty()
    }

    /// Whether the agent is blocked on the operator.
    pub fn needs_attention(&self) -> bool {
        matches!(self.status, SessionStatus::Waiting | SessionStatus::Permission)
    }

    /// Decodes one descriptor. An object without a `tmux_session` is not a
    /// descriptor and is rejected.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<Self>(raw)?.validated()
    }

    pub(crate) fn validated(self) -> serde_json::Result<Self> {
        if self.session_name.trim().is_empty() {
            return Err(serde::de::Error::custom("descriptor has no tmux_session"));
        }
        Ok(self)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Working,
    Waiting,
    Permission,
    Done,
    Error,
    Offline,
    #[default]
    #[serde(other)]
    Unknown,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Working => "working",
            SessionStatus::Waiting => "waiting",
            SessionStatus::Permission => "permission",
            SessionStatus::Done => "done",
            SessionStatus::Error => "error",
            SessionStatus::Offline => "offline",
            SessionStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}
