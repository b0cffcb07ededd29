use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fleetwatch_lib::remote::ConnectionStatus;
use fleetwatch_lib::{
    attach_command, logging, Config, ConnectionPool, CycleReport, LocalStore, OpenSshTransport,
    PollCycle, RemotePoller, SessionInfo, TmuxManager,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fleetwatch", version, about = "Agent tmux sessions across local and remote machines")]
struct Cli {
    /// Path to config.json (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one poll cycle and print the sessions
    List {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Re-run poll cycles until interrupted
    Watch {
        /// Seconds between cycles (defaults to the config value)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Connect to every remote and print its connection state
    Status,
    /// Attach this terminal to a session
    Attach {
        session: String,
        /// Remote name; omit for a local session
        #[arg(long)]
        remote: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = Config::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command.unwrap_or(Command::List { json: false }) {
        Command::List { json } => {
            let (cycle, pool) = build_cycle(&config);
            let report = cycle.run().await;
            pool.close().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report.sessions)?);
            } else {
                print_report(&report);
            }
        }
        Command::Watch { interval } => {
            let every = Duration::from_secs(interval.unwrap_or(config.poll_interval_secs).max(1));
            let (cycle, pool) = build_cycle(&config);
            watch(&cycle, every).await;
            pool.close().await;
        }
        Command::Status => {
            let pool = build_pool(&config);
            probe_all(&pool, &config).await;
            pool.close().await;
        }
        Command::Attach { session, remote } => {
            let argv = match remote {
                Some(name) => {
                    let Some(remote) = config.remote(&name) else {
                        bail!("remote not found: {}", name);
                    };
                    attach_command(remote, &session)
                }
                None => TmuxManager::new().attach_command(&session),
            };
            let code = run_interactive(&argv).await?;
            std::process::exit(code);
        }
    }

    Ok(())
}

fn build_pool(config: &Config) -> Arc<ConnectionPool> {
    Arc::new(ConnectionPool::new(
        config.remotes.clone(),
        Arc::new(OpenSshTransport::new()),
    ))
}

fn build_cycle(config: &Config) -> (PollCycle, Arc<ConnectionPool>) {
    let pool = build_pool(config);
    let store = LocalStore::new(config.status_dir.clone(), Arc::new(TmuxManager::new()));
    let cycle = PollCycle::new(store, RemotePoller::new(pool.clone()), config.remotes.clone());
    (cycle, pool)
}

async fn watch(cycle: &PollCycle, every: Duration) {
    let interrupted = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupted");
    };
    cycle
        .watch(every, interrupted, |report| {
            print!("\x1b[2J\x1b[H");
            print_report(report);
        })
        .await;
}

async fn probe_all(pool: &Arc<ConnectionPool>, config: &Config) {
    let mut handles = Vec::new();
    for remote in &config.remotes {
        let pool = pool.clone();
        let name = remote.name.clone();
        handles.push(tokio::spawn(async move {
            let _ = pool.connect(&name).await;
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }

    for (name, state) in pool.statuses().await {
        let detail = match state.status {
            ConnectionStatus::Error => state.last_error.unwrap_or_default(),
            _ => String::new(),
        };
        println!("{:<20} {:<13} {}", name, state.status, detail);
    }
}

async fn run_interactive(argv: &[String]) -> anyhow::Result<i32> {
    let (program, args) = argv.split_first().context("empty attach command")?;
    let status = tokio::process::Command::new(program)
        .args(args)
        .status()
        .await
        .with_context(|| format!("failed to run {}", program))?;
    Ok(status.code().unwrap_or(1))
}

fn print_report(report: &CycleReport) {
    let now = chrono::Utc::now().timestamp();
    println!("{:<11} {:<24} {:<12} {:>6}  {}", "STATUS", "SESSION", "ORIGIN", "AGE", "MESSAGE");
    for session in &report.sessions {
        print_session(session, now);
    }
    for failed in report.failed_remotes() {
        eprintln!(
            "! {}: {}",
            failed.remote,
            failed.error.as_deref().unwrap_or("unavailable")
        );
    }
}

fn print_session(session: &SessionInfo, now: i64) {
    let origin = if session.is_local() { "local" } else { session.origin.as_str() };
    let message = session.message.lines().next().unwrap_or("");
    println!(
        "{:<11} {:<24} {:<12} {:>6}  {}",
        session.status.as_str(),
        session.session_name,
        origin,
        format_age(now - session.timestamp_unix),
        message
    );
}

fn format_age(secs: i64) -> String {
    match secs.max(0) {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86400),
    }
}
