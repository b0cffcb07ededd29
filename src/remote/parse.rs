//! Recovery parser for the output of the remote read command.
//!
//! The remote side concatenates every descriptor file with no delimiter,
//! and any of those files may be half-written. Parsing happens in two
//! passes: a streaming decode that stops at the first error, then, if
//! that did not consume the whole input, a brace-depth scan that decodes
//! each top-level `{...}` span on its own and keeps whatever survives.

use crate::session::SessionInfo;
use serde_json::Deserializer;

/// Decodes every recoverable session in `output` and tags it with `origin`.
pub fn parse_sessions(output: &str, origin: &str) -> Vec<SessionInfo> {
    if output.trim().is_empty() {
        return Vec::new();
    }

    let (mut sessions, clean) = stream_decode(output);
    if sessions.is_empty() || !clean {
        sessions = scan_objects(output);
    }

    for session in &mut sessions {
        session.origin = origin.to_string();
    }
    sessions
}

/// First pass. Returns the decoded records and whether the whole input
/// was consumed without error.
fn stream_decode(output: &str) -> (Vec<SessionInfo>, bool) {
    let mut sessions = Vec::new();
    for value in Deserializer::from_str(output).into_iter::<SessionInfo>() {
        match value.and_then(SessionInfo::validated) {
            Ok(session) => sessions.push(session),
            Err(_) => return (sessions, false),
        }
    }
    (sessions, true)
}

/// Second pass. Braces inside string literals do not count towards depth.
fn scan_objects(output: &str) -> Vec<SessionInfo> {
    let mut sessions = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in output.char_indices() {
        if depth > 0 && in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Ok(session) = SessionInfo::from_json(&output[start..=i]) {
                        sessions.push(session);
                    }
                }
            }
            _ => {}
        }
    }

    sessions
}
