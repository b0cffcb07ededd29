pub mod config;
pub mod cycle;
pub mod error;
pub mod logging;
pub mod remote;
pub mod session;
pub mod tmux;


pub use config::Config;
pub use cycle::{CycleReport, PollCycle};
pub use error::{Error, Result};
pub use remote::{attach_command, ConnectionPool, OpenSshTransport, RemoteConfig, RemotePoller};
pub use session::{combine, order, LocalStore, SessionInfo, SessionStatus};
pub use tmux::TmuxManager;
