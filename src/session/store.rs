use super::types::SessionInfo;
use crate::tmux::LiveSessions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub const DESCRIPTOR_EXTENSION: &str = "json";

struct Descriptor {
    path: PathBuf,
    session: SessionInfo,
}

/// Status descriptors persisted on this machine by the agent hooks.
pub struct LocalStore {
    dir: PathBuf,
    live: Arc<dyn LiveSessions>,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>, live: Arc<dyn LiveSessions>) -> Self {
        Self {
            dir: dir.into(),
            live,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads every descriptor in the status directory and deletes the ones
    /// whose tmux session no longer exists. Returns the survivors.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let descriptors = read_descriptors(&self.dir).await;
        if descriptors.is_empty() {
            return Vec::new();
        }

        let Some(live) = self.live.live_session_names().await else {
            return descriptors.into_iter().map(|d| d.session).collect();
        };

        let mut kept = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if live.contains(&descriptor.session.session_name) {
                kept.push(descriptor.session);
                continue;
            }

            debug!(
                session = %descriptor.session.session_name,
                path = %descriptor.path.display(),
                "removing stale descriptor"
            );
            let _ = tokio::fs::remove_file(&descriptor.path).await;
        }

        kept
    }
}

async fn read_descriptors(dir: &Path) -> Vec<Descriptor> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot read status directory");
            return Vec::new();
        }
    };

    let mut descriptors = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "status directory scan interrupted");
                break;
            }
        };

        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(DESCRIPTOR_EXTENSION) {
            continue;
        }
        match entry.file_type().await {
            Ok(kind) if kind.is_file() => {}
            _ => continue,
        }

        let Ok(raw) = tokio::fs::read_to_string(&path).await else {
            continue;
        };
        match SessionInfo::from_json(&raw) {
            Ok(mut session) => {
                // Only the remote poller tags origins.
                session.origin.clear();
                descriptors.push(Descriptor { path, session });
            }
            Err(e) => debug!(path = %path.display(), error = %e, "skipping malformed descriptor"),
        }
    }

    descriptors
}
