use super::parse::parse_sessions;
use super::pool::ConnectionPool;
use super::types::RemoteConfig;
use crate::session::SessionInfo;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const PER_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);
pub const BATCH_DEADLINE: Duration = Duration::from_secs(15);

/// What one remote contributed to a poll.
#[derive(Debug, Clone, Serialize)]
pub struct PollResult {
    pub remote: String,
    pub sessions: Vec<SessionInfo>,
    pub error: Option<String>,
}

impl PollResult {
    fn failed(remote: &str, error: impl Into<String>) -> Self {
        Self {
            remote: remote.to_string(),
            sessions: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Polls every remote's status directory in parallel through the pool.
pub struct RemotePoller {
    pool: Arc<ConnectionPool>,
    per_remote_timeout: Duration,
    deadline: Duration,
}

impl RemotePoller {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            per_remote_timeout: PER_REMOTE_TIMEOUT,
            deadline: BATCH_DEADLINE,
        }
    }

    pub fn with_timeouts(mut self, per_remote: Duration, deadline: Duration) -> Self {
        self.per_remote_timeout = per_remote;
        self.deadline = deadline;
        self
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Every session recovered from every remote that answered in time.
    pub async fn poll_all(&self, remotes: &[RemoteConfig]) -> Vec<SessionInfo> {
        self.collect(remotes)
            .await
            .into_iter()
            .flat_map(|result| result.sessions)
            .collect()
    }

    /// One result per remote, in completion order.
    pub async fn collect(&self, remotes: &[RemoteConfig]) -> Vec<PollResult> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        for remote in remotes {
            let tx = tx.clone();
            let pool = self.pool.clone();
            let name = remote.name.clone();
            let command = read_command(remote.status_dir());
            let timeout = self.per_remote_timeout;

            tokio::spawn(async move {
                let result = poll_one(&pool, &name, &command, timeout).await;
                let _ = tx.send(result);
            });
        }
        // Each task owns a sender; the channel closes once all have reported.
        drop(tx);

        let deadline = Instant::now() + self.deadline;
        let mut results = Vec::with_capacity(remotes.len());
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => break,
                Err(_) => {
                    warn!(outstanding = remotes.len() - results.len(), "poll deadline elapsed");
                    break;
                }
            }
        }

        let reported: HashSet<String> = results.iter().map(|r| r.remote.clone()).collect();
        for remote in remotes {
            if !reported.contains(&remote.name) {
                results.push(PollResult::failed(&remote.name, "no answer before poll deadline"));
            }
        }

        results
    }
}

async fn poll_one(pool: &ConnectionPool, name: &str, command: &str, timeout: Duration) -> PollResult {
    match pool.execute_with_timeout(name, command, timeout).await {
        Ok(stdout) => {
            let sessions = parse_sessions(&String::from_utf8_lossy(&stdout), name);
            debug!(remote = %name, count = sessions.len(), "remote polled");
            PollResult {
                remote: name.to_string(),
                sessions,
                error: None,
            }
        }
        Err(e) => {
            if !e.is_remote_failure() {
                warn!(remote = %name, error = %e, "remote is not usable");
            }
            PollResult::failed(name, e.to_string())
        }
    }
}

/// Shell command that prints every descriptor in `status_dir` and always
/// exits zero, so an empty or missing directory reads as "no sessions".
pub fn read_command(status_dir: &str) -> String {
    format!("cat {}/*.json 2>/dev/null; true", shell_dir(status_dir))
}

fn shell_dir(status_dir: &str) -> String {
    let dir = status_dir.trim_end_matches('/');
    if dir == "~" {
        return "\"$HOME\"".to_string();
    }
    match dir.strip_prefix("~/") {
        Some(rest) => format!("\"$HOME\"/{}", quote(rest)),
        None => quote(dir),
    }
}

fn quote(value: &str) -> String {
    let cleaned = value.replace('\0', "");
    shlex::try_quote(&cleaned)
        .map(|q| q.into_owned())
        .unwrap_or(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::types::ConnectionStatus;
    use crate::test_helpers::mocks::{remote, MockTransport};
    use std::time::Instant as StdInstant;

    fn descriptor(name: &str) -> String {
        format!(r#"{{"tmux_session":"{}","status":"working","timestamp":5}}"#, name)
    }

    fn poller_for(transport: Arc<MockTransport>, remotes: &[RemoteConfig]) -> RemotePoller {
        let pool = Arc::new(ConnectionPool::new(remotes.to_vec(), transport));
        RemotePoller::new(pool)
    }

    #[test]
    fn test_read_command_default_dir() {
        assert_eq!(
            read_command("~/.fleetwatch/status"),
            "cat \"$HOME\"/.fleetwatch/status/*.json 2>/dev/null; true"
        );
    }

    #[test]
    fn test_read_command_quotes_absolute_dir() {
        let command = read_command("/srv/agent status/");
        assert!(command.starts_with("cat '/srv/agent status'/*.json"));
        assert!(command.ends_with("; true"));
    }

    #[tokio::test]
    async fn test_poll_all_tags_origin() {
        let transport = Arc::new(MockTransport::new());
        transport.set_output("alpha", format!("{}{}", descriptor("a1"), descriptor("a2")).into_bytes());
        transport.set_output("beta", descriptor("b1").into_bytes());
        let remotes = vec![remote("alpha"), remote("beta")];
        let poller = poller_for(transport.clone(), &remotes);

        let mut sessions = poller.poll_all(&remotes).await;
        sessions.sort_by(|a, b| a.session_name.cmp(&b.session_name));

        let tagged: Vec<_> = sessions
            .iter()
            .map(|s| (s.session_name.as_str(), s.origin.as_str()))
            .collect();
        assert_eq!(tagged, vec![("a1", "alpha"), ("a2", "alpha"), ("b1", "beta")]);

        let commands = transport.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(|(_, c)| c.contains(".fleetwatch/status/*.json")));
    }

    #[tokio::test]
    async fn test_hung_remote_does_not_stall_batch() {
        let transport = Arc::new(MockTransport::new());
        for name in ["fast1", "fast2", "hung"] {
            transport.set_output(name, descriptor(&format!("{}-s", name)).into_bytes());
        }
        transport.set_delay("fast1", Duration::from_millis(150));
        transport.set_delay("fast2", Duration::from_millis(150));
        transport.set_delay("hung", Duration::from_secs(60));

        let remotes = vec![remote("fast1"), remote("hung"), remote("fast2")];
        let poller = poller_for(transport, &remotes)
            .with_timeouts(Duration::from_millis(400), Duration::from_secs(5));

        let started = StdInstant::now();
        let results = poller.collect(&remotes).await;
        let elapsed = started.elapsed();

        // Parallel: bounded by the one timeout, not the sum of latencies.
        assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);
        assert_eq!(results.len(), 3);

        let hung = results.iter().find(|r| r.remote == "hung").unwrap();
        assert!(hung.sessions.is_empty());
        assert!(hung.error.is_some());

        let names: HashSet<_> = results
            .iter()
            .flat_map(|r| r.sessions.iter().map(|s| s.session_name.clone()))
            .collect();
        assert_eq!(names, HashSet::from(["fast1-s".to_string(), "fast2-s".to_string()]));

        let state = poller.pool().status("hung").await;
        assert_eq!(state.status, ConnectionStatus::Error);
        assert_eq!(poller.pool().status("fast1").await.status, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_failing_remote_contributes_nothing() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_connect("down", "Connection refused");
        transport.set_output("up", descriptor("u").into_bytes());
        let remotes = vec![remote("down"), remote("up")];
        let poller = poller_for(transport, &remotes);

        let sessions = poller.poll_all(&remotes).await;

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].origin, "up");
        let down = poller.pool().status("down").await;
        assert_eq!(down.status, ConnectionStatus::Error);
        assert!(down.last_error.unwrap().contains("Connection refused"));
    }

    #[tokio::test]
    async fn test_empty_output_is_not_an_error() {
        let transport = Arc::new(MockTransport::new());
        transport.set_output("quiet", b"\n".to_vec());
        let remotes = vec![remote("quiet")];
        let poller = poller_for(transport, &remotes);

        let results = poller.collect(&remotes).await;

        assert_eq!(results.len(), 1);
        assert!(results[0].sessions.is_empty());
        assert!(results[0].error.is_none());
    }

    #[tokio::test]
    async fn test_remote_missing_from_pool_reports_error() {
        let transport = Arc::new(MockTransport::new());
        let pool = Arc::new(ConnectionPool::new(vec![remote("known")], transport));
        let poller = RemotePoller::new(pool);

        let results = poller.collect(&[remote("stranger")]).await;

        assert_eq!(results.len(), 1);
        assert!(results[0].error.as_deref().unwrap().contains("remote not found"));
    }

    #[tokio::test]
    async fn test_batch_deadline_reports_missing_remote() {
        let transport = Arc::new(MockTransport::new());
        transport.set_delay("slow", Duration::from_secs(60));
        let remotes = vec![remote("slow")];
        let poller = poller_for(transport, &remotes)
            .with_timeouts(Duration::from_secs(30), Duration::from_millis(100));

        let results = poller.collect(&remotes).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].remote, "slow");
        assert!(results[0].error.as_deref().unwrap().contains("deadline"));
    }

    #[tokio::test]
    async fn test_no_remotes() {
        let poller = poller_for(Arc::new(MockTransport::new()), &[]);
        assert!(poller.poll_all(&[]).await.is_empty());
    }
}
