use super::types::RemoteConfig;

/// Argument vector for an interactive ssh session that attaches to
/// `session_name` on the remote. Runs outside the pool, on the user's terminal.
pub fn attach_command(remote: &RemoteConfig, session_name: &str) -> Vec<String> {
    let mut args = vec![
        "ssh".to_string(),
        "-t".to_string(),
        "-i".to_string(),
        remote.key_path.display().to_string(),
    ];

    if let Some(jump) = remote.jump_destination() {
        args.push("-J".to_string());
        args.push(jump);
    }

    args.push(remote.destination());
    args.push(remote_attach(session_name));
    args
}

fn remote_attach(session_name: &str) -> String {
    let cleaned = session_name.replace('\0', "");
    let target = shlex::try_quote(&cleaned)
        .map(|q| q.into_owned())
        .unwrap_or(cleaned);
    format!("tmux attach-session -t {}", target)
}
