//! `shelly attach`: interactive sessions over directly spawned tools
//!
//! Lines are written to the active session's stdin. Lines starting with `:`
//! are REPL commands.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use shelly_core::coordinator::current_user;
use shelly_core::{seed_hash, Config, ConnectOptions, SessionCoordinator, SessionManager};

const PROMPT: &str = "shelly> ";

const HELP: &str = "\
:read                 print and clear the active session's output
:logs                 show the active session's log entries
:sessions             list sessions
:connect <seed> [u]   open another session and make it active
:use <id>             switch the active session
:close                disconnect and forget the active session
:help                 this text
:exit                 close every session and quit";

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Read,
    Logs,
    Sessions,
    Connect { seed: &'a str, user: Option<&'a str> },
    Use(&'a str),
    Close,
    Help,
    Exit,
    Send(&'a str),
    Invalid(String),
}

fn parse(line: &str) -> Input<'_> {
    let Some(command) = line.strip_prefix(':') else {
        return Input::Send(line);
    };

    let mut words = command.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some("read"), None, _) => Input::Read,
        (Some("logs"), None, _) => Input::Logs,
        (Some("sessions"), None, _) => Input::Sessions,
        (Some("connect"), Some(seed), user) => Input::Connect { seed, user },
        (Some("use"), Some(id), None) => Input::Use(id),
        (Some("close"), None, _) => Input::Close,
        (Some("help"), None, _) => Input::Help,
        (Some("exit") | Some("quit"), None, _) => Input::Exit,
        _ => Input::Invalid(format!("Unknown command: {} (try :help)", line)),
    }
}

pub async fn run(
    coordinator: &SessionCoordinator,
    config: &Config,
    seed: &str,
    user: Option<String>,
    args: Vec<String>,
) -> Result<()> {
    let manager = SessionManager::new(
        Arc::clone(coordinator.registry()),
        Arc::clone(coordinator.pipeline()),
        config.remote_shell.clone(),
    );
    let user = user.unwrap_or_else(current_user);

    let mut active = match open(&manager, seed, &user, args.clone()).await {
        Some(id) => id,
        None => return Ok(()),
    };

    // Everything printed goes through std's stdout so the prompt never
    // overtakes buffered output
    let stdout = std::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        write_flushed(&mut stdout.lock(), PROMPT)?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse(&line) {
            Input::Read => match manager.get_buffer(&active).await {
                Ok(content) => {
                    write_flushed(&mut stdout.lock(), &content)?;
                    if let Err(e) = manager.clear_buffer(&active).await {
                        eprintln!("Error: {}", e);
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            },
            Input::Logs => {
                for entry in coordinator.builtins().logging.get(&active) {
                    println!(
                        "{} [{}] {}",
                        entry.ts.format("%H:%M:%S"),
                        entry.level.as_str(),
                        entry.msg
                    );
                }
            }
            Input::Sessions => {
                let sessions = manager.list_sessions().await;
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            }
            Input::Connect { seed, user: as_user } => {
                let as_user = as_user.unwrap_or(&user);
                if let Some(id) = open(&manager, seed, as_user, args.clone()).await {
                    active = id;
                }
            }
            Input::Use(id) => {
                if coordinator.registry().contains(id) {
                    active = id.to_string();
                } else {
                    eprintln!("Session {} not found", id);
                }
            }
            Input::Close => {
                if let Err(e) = manager.remove(&active).await {
                    eprintln!("Error: {}", e);
                }
                match manager.list_sessions().await.into_iter().next() {
                    Some(next) => {
                        println!("Active session: {}", next.id);
                        active = next.id;
                    }
                    None => break,
                }
            }
            Input::Help => println!("{}", HELP),
            Input::Exit => break,
            Input::Send(text) => {
                if let Err(e) = manager.send(&active, &format!("{}\n", text)).await {
                    eprintln!("Error: {}", e);
                }
            }
            Input::Invalid(msg) => eprintln!("{}", msg),
        }
    }

    manager.shutdown().await;
    Ok(())
}

/// Write `text` as is and flush, for output that may lack a trailing newline.
fn write_flushed(out: &mut impl Write, text: &str) -> std::io::Result<()> {
    out.write_all(text.as_bytes())?;
    out.flush()
}

/// Connect to `seed` under its derived remote seed; returns the session id.
async fn open(
    manager: &SessionManager,
    seed: &str,
    user: &str,
    args: Vec<String>,
) -> Option<String> {
    let opts = ConnectOptions {
        session_id: None,
        args,
    };
    match manager.connect(&seed_hash(seed), user, opts).await {
        Ok(record) => {
            println!("Connected: {} ({}@{})", record.id, user, seed);
            Some(record.id)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            None
        }
    }
}
