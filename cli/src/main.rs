//! Shelly CLI
//!
//! Thin client over the session coordinator. Each invocation runs one
//! command against one seed and prints the result as JSON.
//!
//! Commands:
//! - shelly connect [--seed S] [--user U]
//! - shelly send <text...>          # alias: exec
//! - shelly receive | disconnect | status
//! - shelly serve [--port P] | stop
//! - shelly export | import --data <json|->
//! - shelly plugins | logs
//! - shelly attach                  # interactive multi-session REPL

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use shelly_core::{CommandResult, Config, Paths, SessionCommand, SessionCoordinator};

mod repl;

#[derive(Parser)]
#[command(name = "shelly")]
#[command(about = "Persistent remote shell sessions keyed by seed")]
#[command(version)]
struct Cli {
    /// Seed to operate on (default: the last connected seed)
    #[arg(long, global = true)]
    seed: Option<String>,

    /// Shelly home directory (default: $SHELLY_HOME or ~/.shelly)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start (or reuse) the seed's daemon and mark it connected
    Connect {
        /// Remote user (default: the current login name)
        #[arg(long)]
        user: Option<String>,

        /// Seed handed to the remote-shell tool (default: sha256 of --seed)
        #[arg(long, alias = "hyperssh-seed")]
        remote_seed: Option<String>,
    },

    /// Run a command remotely and print its output
    #[command(alias = "exec")]
    Send {
        /// Command text; multiple words are joined with spaces
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },

    /// Print and clear buffered output
    Receive,

    /// Stop the seed's daemon
    Disconnect,

    /// Expose this machine under the seed through the tunnel server
    Serve {
        /// Local port (default: random in 9000-9999)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Stop the tunnel server started by `serve`
    Stop,

    /// Show the seed's state, re-checking every recorded process
    Status,

    /// Print the seed's context as JSON
    Export,

    /// Replace the seed's context with exported JSON
    Import {
        /// Exported JSON, or "-" to read stdin
        #[arg(long)]
        data: String,
    },

    /// List loaded plugins
    Plugins,

    /// Show the tail of the seed's daemon log
    Logs {
        /// Number of lines
        #[arg(long, default_value = "50")]
        lines: usize,
    },

    /// Open an interactive session
    Attach {
        /// Remote user (default: the current login name)
        #[arg(long)]
        user: Option<String>,

        /// Extra arguments for the remote-shell tool
        #[arg(last = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    // stdout carries JSON; diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    match runtime.block_on(run(cli)) {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether the command succeeded.
async fn run(cli: Cli) -> Result<bool> {
    let paths = match cli.home {
        Some(home) => Paths::new(home),
        None => Paths::resolve(),
    };
    let config = Config::load(paths.home())?;
    let coordinator = SessionCoordinator::open(paths.clone(), &config)?;

    let command = match cli.command {
        Commands::Plugins => {
            let plugins = coordinator.pipeline().list_plugins();
            println!("{}", serde_json::to_string_pretty(&plugins)?);
            return Ok(true);
        }
        Commands::Logs { lines } => {
            let seed = resolve_seed(cli.seed, &paths)?;
            return print_log_tail(&paths, &seed, lines);
        }
        Commands::Attach { user, args } => {
            let seed = resolve_seed(cli.seed, &paths)?;
            repl::run(&coordinator, &config, &seed, user, args).await?;
            return Ok(true);
        }
        Commands::Connect { user, remote_seed } => SessionCommand::Connect { user, remote_seed },
        Commands::Send { text } => SessionCommand::Send {
            text: text.join(" "),
        },
        Commands::Receive => SessionCommand::Receive,
        Commands::Disconnect => SessionCommand::Disconnect,
        Commands::Serve { port } => SessionCommand::Serve { port },
        Commands::Stop => SessionCommand::Stop,
        Commands::Status => SessionCommand::Status,
        Commands::Export => SessionCommand::Export,
        Commands::Import { data } => SessionCommand::Import {
            data: read_data(data)?,
        },
    };

    let seed = resolve_seed(cli.seed, &paths)?;
    debug!("Running {} against current seed", command.name());
    let result = coordinator.execute(&seed, command).await;
    print_result(&result)?;
    Ok(result.is_success())
}

/// `--seed`, else the current-seed pointer.
fn resolve_seed(seed: Option<String>, paths: &Paths) -> Result<String> {
    seed.or_else(|| paths.read_current_seed())
        .context("--seed required (no current seed; connect first)")
}

fn read_data(data: String) -> Result<String> {
    if data != "-" {
        return Ok(data);
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read stdin")?;
    Ok(buf)
}

fn print_result(result: &CommandResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}

fn print_log_tail(paths: &Paths, seed: &str, lines: usize) -> Result<bool> {
    let log_path = paths.daemon_log(seed);
    let content = match std::fs::read_to_string(&log_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            eprintln!("No daemon log at {}", log_path.display());
            return Ok(false);
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", log_path)),
    };

    let all: Vec<&str> = content.lines().collect();
    for line in &all[all.len().saturating_sub(lines)..] {
        println!("{}", line);
    }
    Ok(true)
}
