use super::types::RemoteConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

/// Opens connections to remotes. The pool is the only caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, remote: &RemoteConfig) -> Result<Arc<dyn Connection>>;
}

/// A live, reusable connection to one remote.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Runs `command` and returns its raw stdout. A non-zero exit of the
    /// command itself is not an error; only transport failures are.
    async fn execute(&self, command: &str) -> Result<Vec<u8>>;

    async fn close(&self);
}

const SSH_TRANSPORT_FAILURE: i32 = 255;
const CONTROL_PERSIST_SECS: u64 = 600;
const MAX_SOCKET_STEM: usize = 40;

/// Multiplexes commands over one OpenSSH control master per remote.
pub struct OpenSshTransport {
    ssh_binary: String,
    control_dir: PathBuf,
    connect_timeout_secs: u64,
}

impl OpenSshTransport {
    pub fn new() -> Self {
        let id: String = Uuid::new_v4().to_string().chars().take(8).collect();
        Self {
            ssh_binary: "ssh".to_string(),
            control_dir: std::env::temp_dir().join(format!("fleetwatch-{}", id)),
            connect_timeout_secs: 10,
        }
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    fn socket_stem(remote: &RemoteConfig) -> String {
        remote
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .take(MAX_SOCKET_STEM)
            .collect()
    }

    fn control_path(&self, remote: &RemoteConfig) -> PathBuf {
        self.control_dir
            .join(format!("{}.sock", Self::socket_stem(remote)))
    }

    fn log_path(&self, remote: &RemoteConfig) -> PathBuf {
        self.control_dir
            .join(format!("{}.log", Self::socket_stem(remote)))
    }

    fn master_args(&self, remote: &RemoteConfig, control_path: &Path, log_path: &Path) -> Vec<String> {
        let mut args = vec![
            "-M".to_string(),
            "-N".to_string(),
            "-f".to_string(),
            "-E".to_string(),
            log_path.display().to_string(),
            "-o".to_string(),
            "ControlMaster=yes".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", control_path.display()),
            "-o".to_string(),
            format!("ControlPersist={}", CONTROL_PERSIST_SECS),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-i".to_string(),
            remote.key_path.display().to_string(),
        ];
        if let Some(jump) = remote.jump_destination() {
            args.push("-J".to_string());
            args.push(jump);
        }
        args.push(remote.destination());
        args
    }

    async fn prepare_control_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.control_dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            tokio::fs::set_permissions(&self.control_dir, perms).await?;
        }
        Ok(())
    }
}

impl Default for OpenSshTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OpenSshTransport {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.control_dir);
    }
}

#[async_trait]
impl Transport for OpenSshTransport {
    async fn connect(&self, remote: &RemoteConfig) -> Result<Arc<dyn Connection>> {
        self.prepare_control_dir().await?;

        let control_path = self.control_path(remote);
        let log_path = self.log_path(remote);
        let _ = tokio::fs::remove_file(&control_path).await;
        let _ = tokio::fs::remove_file(&log_path).await;

        debug!(remote = %remote.name, destination = %remote.destination(), "starting ssh control master");

        // -f forks after authentication; the forked master keeps any
        // inherited pipes open, so diagnostics go through -E instead.
        let status = Command::new(&self.ssh_binary)
            .args(self.master_args(remote, &control_path, &log_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::Connect {
                remote: remote.name.clone(),
                message: format!("failed to spawn {}: {}", self.ssh_binary, e),
            })?;

        if !status.success() {
            let log = tokio::fs::read_to_string(&log_path).await.unwrap_or_default();
            let detail = log.trim();
            return Err(Error::Connect {
                remote: remote.name.clone(),
                message: if detail.is_empty() {
                    format!("ssh exited with {}", status)
                } else {
                    detail.to_string()
                },
            });
        }

        Ok(Arc::new(OpenSshConnection::new(
            self.ssh_binary.clone(),
            remote.name.clone(),
            remote.destination(),
            control_path,
            log_path,
        )))
    }
}

/// A running control master. Dropping it without `close` still asks the
/// master to exit, so a cancelled poll cannot leave one behind for the
/// full `ControlPersist` window.
pub struct OpenSshConnection {
    ssh_binary: String,
    remote_name: String,
    destination: String,
    control_path: PathBuf,
    log_path: PathBuf,
    closed: AtomicBool,
}

impl OpenSshConnection {
    fn new(
        ssh_binary: String,
        remote_name: String,
        destination: String,
        control_path: PathBuf,
        log_path: PathBuf,
    ) -> Self {
        Self {
            ssh_binary,
            remote_name,
            destination,
            control_path,
            log_path,
            closed: AtomicBool::new(false),
        }
    }

    fn exit_args(&self) -> Vec<String> {
        vec![
            "-S".to_string(),
            self.control_path.display().to_string(),
            "-O".to_string(),
            "exit".to_string(),
            self.destination.clone(),
        ]
    }

    fn exec_args(&self, command: &str) -> Vec<String> {
        vec![
            "-S".to_string(),
            self.control_path.display().to_string(),
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            self.destination.clone(),
            command.to_string(),
        ]
    }
}

#[async_trait]
impl Connection for OpenSshConnection {
    async fn execute(&self, command: &str) -> Result<Vec<u8>> {
        let output = Command::new(&self.ssh_binary)
            .args(self.exec_args(command))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Command {
                remote: self.remote_name.clone(),
                message: format!("failed to spawn {}: {}", self.ssh_binary, e),
            })?;

        if output.status.code() == Some(SSH_TRANSPORT_FAILURE) {
            return Err(Error::Command {
                remote: self.remote_name.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = Command::new(&self.ssh_binary)
            .args(self.exit_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        let _ = tokio::fs::remove_file(&self.control_path).await;
        let _ = tokio::fs::remove_file(&self.log_path).await;
        debug!(remote = %self.remote_name, "ssh control master closed");
    }
}

impl Drop for OpenSshConnection {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(remote = %self.remote_name, "connection dropped without close; stopping control master");
        let ssh_binary = self.ssh_binary.clone();
        let args = self.exit_args();
        let control_path = self.control_path.clone();
        let log_path = self.log_path.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = Command::new(&ssh_binary)
                        .args(&args)
                        .stdin(Stdio::null())
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status()
                        .await;
                    let _ = tokio::fs::remove_file(&control_path).await;
                    let _ = tokio::fs::remove_file(&log_path).await;
                });
            }
            Err(_) => {
                let _ = std::process::Command::new(&ssh_binary)
                    .args(&args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status();
                let _ = std::fs::remove_file(&control_path);
                let _ = std::fs::remove_file(&log_path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn remote(name: &str, jump: Option<&str>) -> RemoteConfig {
        RemoteConfig {
            name: name.to_string(),
            host: "build.internal".to_string(),
            user: "ci".to_string(),
            key_path: PathBuf::from("/keys/ci"),
            jump_host: jump.map(String::from),
            status_dir: None,
        }
    }

    fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_master_args_with_jump_host() {
        let transport = OpenSshTransport::new();
        let config = remote("build", Some("bastion"));
        let args = transport.master_args(&config, Path::new("/tmp/x.sock"), Path::new("/tmp/x.log"));

        assert_eq!(flag_value(&args, "-i"), Some("/keys/ci"));
        assert_eq!(flag_value(&args, "-J"), Some("ci@bastion"));
        assert_eq!(flag_value(&args, "-E"), Some("/tmp/x.log"));
        assert!(args.contains(&"ControlPath=/tmp/x.sock".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("ci@build.internal"));
    }

    #[test]
    fn test_master_args_without_jump_host() {
        let transport = OpenSshTransport::new();
        let args = transport.master_args(&remote("build", None), Path::new("/s"), Path::new("/l"));
        assert!(!args.iter().any(|a| a == "-J"));
    }

    #[test]
    fn test_control_path_is_sanitised_and_per_remote() {
        let transport = OpenSshTransport::new();
        let a = transport.control_path(&remote("gpu box/1", None));
        let b = transport.control_path(&remote("other", None));

        assert_eq!(a.file_name().and_then(|n| n.to_str()), Some("gpu_box_1.sock"));
        assert_ne!(a, b);
        assert_eq!(a.parent(), b.parent());
    }

    #[test]
    fn test_exec_args_use_control_socket() {
        let conn = connection("ssh", Path::new("/tmp"));
        let args = conn.exec_args("cat x");

        assert_eq!(flag_value(&args, "-S"), Some("/tmp/build.sock"));
        assert_eq!(&args[args.len() - 2..], ["ci@build.internal", "cat x"]);
        // Nothing was started, so there is no master to stop.
        conn.closed.store(true, Ordering::SeqCst);
    }

    fn connection(ssh_binary: &str, dir: &Path) -> OpenSshConnection {
        OpenSshConnection::new(
            ssh_binary.to_string(),
            "build".to_string(),
            "ci@build.internal".to_string(),
            dir.join("build.sock"),
            dir.join("build.log"),
        )
    }

    /// Stand-in ssh that records each invocation's arguments, one per line.
    #[cfg(unix)]
    fn recording_ssh(dir: &Path) -> (String, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let calls = dir.join("calls");
        let script = dir.join("ssh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$@\" >> '{}'\n", calls.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script.display().to_string(), calls)
    }

    #[cfg(unix)]
    async fn exit_requests(calls: &Path, want: usize) -> usize {
        for _ in 0..40 {
            let count = std::fs::read_to_string(calls)
                .unwrap_or_default()
                .lines()
                .filter(|line| line.contains("-O exit"))
                .count();
            if count >= want {
                return count;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        0
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_connection_stops_master() {
        let tmp = tempfile::tempdir().unwrap();
        let (ssh, calls) = recording_ssh(tmp.path());

        drop(connection(&ssh, tmp.path()));

        assert_eq!(exit_requests(&calls, 1).await, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_then_drop_stops_master_once() {
        let tmp = tempfile::tempdir().unwrap();
        let (ssh, calls) = recording_ssh(tmp.path());

        let conn = connection(&ssh, tmp.path());
        conn.close().await;
        conn.close().await;
        drop(conn);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let log = std::fs::read_to_string(&calls).unwrap();
        assert_eq!(log.lines().filter(|l| l.contains("-O exit")).count(), 1);
        assert!(log.contains("ci@build.internal"));
    }

    #[tokio::test]
    async fn test_connect_failure_when_ssh_missing() {
        let mut transport = OpenSshTransport::new();
        transport.ssh_binary = "/nonexistent/ssh".to_string();

        let err = match transport.connect(&remote("build", None)).await {
            Err(e) => e,
            Ok(_) => panic!("connect should fail without an ssh binary"),
        };
        assert!(matches!(err, Error::Connect { ref remote, .. } if remote == "build"));
    }
}
