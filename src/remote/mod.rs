pub mod attach;
pub mod parse;
pub mod poller;
pub mod pool;
pub mod transport;
pub mod types;

pub use attach::attach_command;
pub use parse::parse_sessions;
pub use poller::{PollResult, RemotePoller};
pub use pool::ConnectionPool;
pub use transport::{Connection, OpenSshTransport, Transport};
pub use types::*;
