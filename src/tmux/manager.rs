use super::types::TmuxSession;
use super::LiveSessions;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::process::Command;
use tracing::{debug, warn};

const LIST_FORMAT: &str = "#{session_name}\t#{session_attached}\t#{session_windows}";

pub struct TmuxManager {
    binary: String,
}

impl TmuxManager {
    pub fn new() -> Self {
        Self {
            binary: "tmux".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Lists live sessions. A missing tmux server is an empty list, not an error.
    pub async fn list_sessions(&self) -> Result<Vec<TmuxSession>> {
        let output = Command::new(&self.binary)
            .args(["list-sessions", "-F", LIST_FORMAT])
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_no_server(&stderr) {
                debug!("tmux server not running; no live sessions");
                return Ok(Vec::new());
            }
            return Err(Error::Tmux(format!("list-sessions: {}", stderr.trim())));
        }

        Ok(parse_sessions(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Argument vector that attaches the current terminal to a local session.
    pub fn attach_command(&self, session_name: &str) -> Vec<String> {
        vec![
            self.binary.clone(),
            "attach-session".to_string(),
            "-t".to_string(),
            session_name.to_string(),
        ]
    }
}

impl Default for TmuxManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LiveSessions for TmuxManager {
    async fn live_session_names(&self) -> Option<HashSet<String>> {
        match self.list_sessions().await {
            Ok(sessions) => Some(sessions.into_iter().map(|s| s.name).collect()),
            Err(e) => {
                warn!(error = %e, "could not query tmux for live sessions");
                None
            }
        }
    }
}

fn is_no_server(stderr: &str) -> bool {
    stderr.contains("no server running") || stderr.contains("error connecting to")
}

fn parse_sessions(stdout: &str) -> Vec<TmuxSession> {
    stdout.lines().filter_map(TmuxSession::parse_line).collect()
}
