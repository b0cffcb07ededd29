use crate::remote::{PollResult, RemoteConfig, RemotePoller};
use crate::session::{combine, order, LocalStore, SessionInfo};
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Result of one poll cycle: the ordered session list plus what each
/// remote reported, so a silent remote can be told apart from an empty one.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub sessions: Vec<SessionInfo>,
    pub remotes: Vec<PollResult>,
}

impl CycleReport {
    pub fn failed_remotes(&self) -> impl Iterator<Item = &PollResult> {
        self.remotes.iter().filter(|r| r.error.is_some())
    }
}

pub struct PollCycle {
    store: LocalStore,
    poller: RemotePoller,
    remotes: Vec<RemoteConfig>,
}

impl PollCycle {
    pub fn new(store: LocalStore, poller: RemotePoller, remotes: Vec<RemoteConfig>) -> Self {
        Self {
            store,
            poller,
            remotes,
        }
    }

    pub fn poller(&self) -> &RemotePoller {
        &self.poller
    }

    /// Lists local descriptors and polls every remote concurrently, then
    /// merges and orders the result.
    pub async fn run(&self) -> CycleReport {
        let (local, remotes) = tokio::join!(self.store.list(), self.poller.collect(&self.remotes));

        let remote_sessions = remotes.iter().flat_map(|r| r.sessions.iter().cloned()).collect();
        CycleReport {
            sessions: order(combine(local, remote_sessions)),
            remotes,
        }
    }

    /// Runs a cycle every `every` and hands each report to `on_report`
    /// until `shutdown` resolves. Shutdown is honoured mid-cycle too; an
    /// in-flight cycle is dropped and its report discarded. A cycle that
    /// overruns the interval delays the next one instead of bunching ticks.
    pub async fn watch<S, F>(&self, every: Duration, shutdown: S, mut on_report: F)
    where
        S: Future<Output = ()>,
        F: FnMut(&CycleReport),
    {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = &mut shutdown => break,
                report = self.run() => on_report(&report),
            }
        }
        info!("watch stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ConnectionPool;
    use crate::session::SessionStatus;
    use crate::test_helpers::mocks::{remote, MockLiveSessions, MockTransport};
    use std::sync::Arc;
    use std::time::Instant;

    fn cycle_with(transport: Arc<MockTransport>, dir: &std::path::Path) -> PollCycle {
        let remotes = vec![remote("gpu")];
        let pool = Arc::new(ConnectionPool::new(remotes.clone(), transport));
        PollCycle::new(
            LocalStore::new(dir, Arc::new(MockLiveSessions::with(&[]))),
            RemotePoller::new(pool),
            remotes,
        )
    }

    #[tokio::test]
    async fn test_cycle_merges_and_orders() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("local.json"),
            r#"{"tmux_session":"local","status":"working","timestamp":300}"#,
        )
        .unwrap();

        let transport = Arc::new(MockTransport::new());
        transport.set_output(
            "gpu",
            br#"{"tmux_session":"remote","status":"waiting","timestamp":100}"#.to_vec(),
        );
        transport.fail_connect("down", "timeout");
        let remotes = vec![remote("gpu"), remote("down")];
        let pool = Arc::new(ConnectionPool::new(remotes.clone(), transport));

        let cycle = PollCycle::new(
            LocalStore::new(tmp.path(), Arc::new(MockLiveSessions::with(&["local"]))),
            RemotePoller::new(pool),
            remotes,
        );
        let report = cycle.run().await;

        let order: Vec<_> = report
            .sessions
            .iter()
            .map(|s| (s.session_name.as_str(), s.origin.as_str(), s.status))
            .collect();
        assert_eq!(
            order,
            vec![
                ("remote", "gpu", SessionStatus::Waiting),
                ("local", "", SessionStatus::Working),
            ]
        );

        let failed: Vec<_> = report.failed_remotes().map(|r| r.remote.as_str()).collect();
        assert_eq!(failed, vec!["down"]);
    }

    #[tokio::test]
    async fn test_watch_reports_every_interval() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.set_output("gpu", br#"{"tmux_session":"a"}"#.to_vec());
        let cycle = cycle_with(transport, tmp.path());

        let mut reports = 0;
        cycle
            .watch(
                Duration::from_millis(50),
                tokio::time::sleep(Duration::from_millis(280)),
                |report| {
                    assert_eq!(report.sessions.len(), 1);
                    reports += 1;
                },
            )
            .await;

        assert!(reports >= 2, "only {} reports", reports);
    }

    #[tokio::test]
    async fn test_watch_stops_during_slow_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.set_delay("gpu", Duration::from_secs(5));
        let cycle = cycle_with(transport, tmp.path());

        let started = Instant::now();
        let mut reports = 0;
        cycle
            .watch(
                Duration::from_millis(50),
                tokio::time::sleep(Duration::from_millis(200)),
                |_| reports += 1,
            )
            .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(reports, 0);
    }
}
