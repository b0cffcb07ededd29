use super::types::SessionInfo;
use std::cmp::{Ordering, Reverse};

/// Concatenates local and remote sessions. The origin tag already keeps
/// same-named sessions from different machines apart.
pub fn combine(local: Vec<SessionInfo>, remote: Vec<SessionInfo>) -> Vec<SessionInfo> {
    let mut combined = local;
    combined.extend(remote);
    combined
}

/// Sessions waiting on the operator first, then most recently updated first.
pub fn order(mut sessions: Vec<SessionInfo>) -> Vec<SessionInfo> {
    sessions.sort_by(compare);
    sessions
}

pub fn compare(a: &SessionInfo, b: &SessionInfo) -> Ordering {
    let key = |s: &SessionInfo| (!s.needs_attention(), Reverse(s.timestamp_unix));
    key(a).cmp(&key(b))
}
