//! `HeroChat`: line-oriented chat client with delivery tracking.
//!
//! Opens one conversation and reads lines from stdin. Plain lines are sent
//! as messages; tracker notifications are printed as they arrive.
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/herochat/config.toml`).
//!
//! ```bash
//! cargo run --bin herochat -- --http-url http://127.0.0.1:5000 \
//!     --ws-url ws://127.0.0.1:5000/ws --user-id 1 --peer-id 2
//! ```
//!
//! Commands: `/read` marks the conversation read, `/refresh` fetches the
//! message list, `/quit` exits.

use std::io;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use herochat::config::{CliArgs, ClientConfig};
use herochat::net::{self, Session};
use herochat::tracker::TrackerEvent;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::from_cli(&cli)
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("herochat starting");

    let session_config = match config.to_session_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let session = match net::spawn_session(session_config).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if !session.push_connected() {
        println!("push channel unavailable, sending over HTTP");
    }

    match run(session).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging via `tracing-subscriber` + `tracing-appender`.
///
/// Logs go to a file so they do not interleave with the conversation on
/// stdout.
///
/// Returns a guard that must be held until the program exits to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("herochat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Read stdin lines and print tracker events until `/quit` or EOF.
async fn run(mut session: Session) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" => break,
                    "/read" => session.tracker().mark_conversation_read().await,
                    "/refresh" => session.tracker().refresh().await,
                    text => match session.tracker().submit(text).await {
                        Ok(id) => tracing::debug!(provisional_id = %id, "submitted"),
                        Err(e) => println!("not sent: {e}"),
                    },
                }
            }
            Some(event) = session.events().recv() => print_event(&event),
        }
    }

    session.shutdown().await;
    Ok(())
}

fn print_event(event: &TrackerEvent) {
    match event {
        TrackerEvent::StatusChanged {
            provisional_id,
            confirmed_id,
            state,
        } => {
            let id = confirmed_id.map_or_else(
                || {
                    provisional_id
                        .as_ref()
                        .map_or_else(String::new, ToString::to_string)
                },
                |id| format!("#{id}"),
            );
            println!("[{id}] {state}");
        }
        TrackerEvent::SendFailed {
            provisional_id,
            reason,
        } => println!("[{provisional_id}] failed: {reason}"),
        TrackerEvent::Refreshed { messages } => {
            println!("-- {} messages --", messages.len());
            for msg in messages.iter().rev() {
                let who = if msg.is_own { "me" } else { "them" };
                println!("{who}: {} ({})", msg.content, msg.status);
            }
        }
        TrackerEvent::RecipientPresence { online } => {
            println!("peer is {}", if *online { "online" } else { "offline" });
        }
    }
}
