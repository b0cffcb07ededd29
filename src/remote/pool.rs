use super::transport::{Connection, Transport};
use super::types::{ConnectionState, ConnectionStatus, RemoteConfig};
use crate::error::{Error, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

struct PoolEntry {
    state: ConnectionState,
    connection: Option<Arc<dyn Connection>>,
}

/// Owns at most one live connection per configured remote.
///
/// Network I/O never happens while the state map is locked, so status
/// queries stay responsive while connects and commands are in flight.
pub struct ConnectionPool {
    remotes: HashMap<String, RemoteConfig>,
    transport: Arc<dyn Transport>,
    entries: RwLock<HashMap<String, PoolEntry>>,
}

impl ConnectionPool {
    pub fn new(remotes: Vec<RemoteConfig>, transport: Arc<dyn Transport>) -> Self {
        let entries = remotes
            .iter()
            .map(|r| {
                (
                    r.name.clone(),
                    PoolEntry {
                        state: ConnectionState::default(),
                        connection: None,
                    },
                )
            })
            .collect();
        let remotes = remotes.into_iter().map(|r| (r.name.clone(), r)).collect();

        Self {
            remotes,
            transport,
            entries: RwLock::new(entries),
        }
    }

    pub fn remote(&self, name: &str) -> Option<&RemoteConfig> {
        self.remotes.get(name)
    }

    /// Runs `command` on the named remote, connecting first if needed.
    pub async fn execute(&self, remote_name: &str, command: &str) -> Result<Vec<u8>> {
        let remote = self.lookup(remote_name)?;
        self.touch(remote_name).await;

        let connection = match self.live_connection(remote_name).await {
            Some(connection) => connection,
            None => self.open(remote).await?,
        };

        match connection.execute(command).await {
            Ok(stdout) => Ok(stdout),
            Err(e) => {
                warn!(remote = %remote_name, error = %e, "remote command failed");
                self.fail(remote_name, &e).await;
                Err(e)
            }
        }
    }

    /// Like [`execute`](Self::execute) but bounded; running out of time is
    /// recorded the same way as a connection failure.
    pub async fn execute_with_timeout(
        &self,
        remote_name: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.lookup(remote_name)?;

        match tokio::time::timeout(timeout, self.execute(remote_name, command)).await {
            Ok(result) => result,
            Err(_) => {
                let err = Error::Timeout {
                    remote: remote_name.to_string(),
                    after: timeout,
                };
                warn!(remote = %remote_name, ?timeout, "remote timed out");
                self.fail(remote_name, &err).await;
                Err(err)
            }
        }
    }

    /// Establishes the connection without running anything. A no-op when
    /// one is already live.
    pub async fn connect(&self, remote_name: &str) -> Result<()> {
        let remote = self.lookup(remote_name)?;
        if self.live_connection(remote_name).await.is_some() {
            return Ok(());
        }
        self.open(remote).await.map(|_| ())
    }

    /// Current state; unknown names read as `Disconnected`.
    pub async fn status(&self, remote_name: &str) -> ConnectionState {
        self.entries
            .read()
            .await
            .get(remote_name)
            .map(|entry| entry.state.clone())
            .unwrap_or_default()
    }

    pub async fn statuses(&self) -> Vec<(String, ConnectionState)> {
        let entries = self.entries.read().await;
        let mut all: Vec<_> = entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub async fn disconnect(&self, remote_name: &str) {
        let connection = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(remote_name) {
                Some(entry) => {
                    entry.state.status = ConnectionStatus::Disconnected;
                    entry.connection.take()
                }
                None => None,
            }
        };

        if let Some(connection) = connection {
            connection.close().await;
            debug!(remote = %remote_name, "disconnected");
        }
    }

    pub async fn close(&self) {
        let connections: Vec<_> = {
            let mut entries = self.entries.write().await;
            entries
                .values_mut()
                .filter_map(|entry| {
                    entry.state.status = ConnectionStatus::Disconnected;
                    entry.connection.take()
                })
                .collect()
        };

        for connection in connections {
            connection.close().await;
        }
    }

    fn lookup(&self, remote_name: &str) -> Result<&RemoteConfig> {
        self.remotes
            .get(remote_name)
            .ok_or_else(|| Error::RemoteNotFound(remote_name.to_string()))
    }

    async fn live_connection(&self, remote_name: &str) -> Option<Arc<dyn Connection>> {
        self.entries
            .read()
            .await
            .get(remote_name)
            .and_then(|entry| entry.connection.clone())
    }

    async fn touch(&self, remote_name: &str) {
        if let Some(entry) = self.entries.write().await.get_mut(remote_name) {
            entry.state.last_poll = Some(Utc::now());
        }
    }

    async fn open(&self, remote: &RemoteConfig) -> Result<Arc<dyn Connection>> {
        let connection = match self.transport.connect(remote).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(remote = %remote.name, error = %e, "connect failed");
                self.fail(&remote.name, &e).await;
                return Err(e);
            }
        };

        let (installed, extra) = {
            let mut entries = self.entries.write().await;
            let entry = entries.entry(remote.name.clone()).or_insert_with(|| PoolEntry {
                state: ConnectionState::default(),
                connection: None,
            });
            entry.state.status = ConnectionStatus::Connected;
            entry.state.last_error = None;
            match &entry.connection {
                // Lost a race with another caller; keep the first connection.
                Some(existing) => (existing.clone(), Some(connection)),
                None => {
                    entry.connection = Some(connection.clone());
                    (connection, None)
                }
            }
        };

        if let Some(extra) = extra {
            extra.close().await;
        } else {
            info!(remote = %remote.name, "connected");
        }
        Ok(installed)
    }

    async fn fail(&self, remote_name: &str, err: &Error) {
        let connection = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(remote_name) {
                Some(entry) => {
                    entry.state.status = ConnectionStatus::Error;
                    entry.state.last_error = Some(err.to_string());
                    entry.connection.take()
                }
                None => None,
            }
        };

        if let Some(connection) = connection {
            connection.close().await;
        }
    }
}
