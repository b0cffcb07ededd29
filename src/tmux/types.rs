use serde::{Deserialize, Serialize};

/// A live session as reported by `tmux list-sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmuxSession {
    pub name: String,
    pub attached: bool,
    pub window_count: u32,
}

impl TmuxSession {
    /// Parses one line of `list-sessions -F "#{session_name}\t#{session_attached}\t#{session_windows}"`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut fields = line.split('\t');
        let name = fields.next()?.trim();
        if name.is_empty() {
            return None;
        }

        let attached = fields
            .next()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .map(|n| n > 0)
            .unwrap_or(false);
        let window_count = fields
            .next()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);

        Some(Self {
            name: name.to_string(),
            attached,
            window_count,
        })
    }
}
