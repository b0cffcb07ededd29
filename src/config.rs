use crate::error::{Error, Result};
use crate::remote::RemoteConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const STATUS_DIR: &str = ".fleetwatch/status";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_status_dir")]
    pub status_dir: PathBuf,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub remotes: Vec<RemoteConfig>,
}

fn default_status_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(STATUS_DIR))
        .unwrap_or_else(|| PathBuf::from(STATUS_DIR))
}

fn default_poll_interval() -> u64 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            status_dir: default_status_dir(),
            poll_interval_secs: default_poll_interval(),
            remotes: Vec::new(),
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fleetwatch").join("config.json"))
    }

    /// Loads `path`, or the default location when `None`. A missing file
    /// yields the default config.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let mut config: Config = serde_json::from_str(raw)?;
        config.status_dir = expand_home(&config.status_dir);
        for remote in &mut config.remotes {
            remote.key_path = expand_home(&remote.key_path);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for remote in &self.remotes {
            if remote.name.trim().is_empty() {
                return Err(Error::Config("remote with an empty name".to_string()));
            }
            if !seen.insert(remote.name.as_str()) {
                return Err(Error::Config(format!("duplicate remote name: {}", remote.name)));
            }
            if remote.host.trim().is_empty() || remote.user.trim().is_empty() {
                return Err(Error::Config(format!(
                    "remote {} needs both host and user",
                    remote.name
                )));
            }
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn remote(&self, name: &str) -> Option<&RemoteConfig> {
        self.remotes.iter().find(|r| r.name == name)
    }
}

/// Expands a leading `~` against the local home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
