use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("remote not found: {0}")]
    RemoteNotFound(String),

    #[error("failed to connect to {remote}: {message}")]
    Connect { remote: String, message: String },

    #[error("command failed on {remote}: {message}")]
    Command { remote: String, message: String },

    #[error("{remote} did not answer within {after:?}")]
    Timeout { remote: String, after: Duration },

    #[error("tmux failed: {0}")]
    Tmux(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for failures that belong to a single remote's transport.
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            Error::Connect { .. } | Error::Command { .. } | Error::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
