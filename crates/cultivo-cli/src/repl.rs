//! REPL – Read-Eval-Print Loop for the Cultivo operator shell.
//!
//! Supported slash-commands:
//!   /help                  – show this list
//!   /status [json]         – connection state and every sensor reading
//!   /channels              – the channel table
//!   /set <channel> <value> – send an actuator command
//!   /stats                 – ingress and store counters
//!   /quit | /exit          – close the broker session and exit

use chrono::Local;
use colored::Colorize;
use std::io::{self, BufRead, Write};

use cultivo_kernel::SnapshotEntry;
use cultivo_runtime::{Dashboard, EngineStats, SyncEngine};
use cultivo_types::{Channel, ConnectionState, Direction, SyncError, ValueKind};

/// One parsed line of operator input.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Help,
    Status { json: bool },
    Channels,
    Set { channel: String, value: String },
    Stats,
    Quit,
    /// Blank line.
    Empty,
    /// A known command with bad arguments; carries the usage line.
    Usage(&'static str),
    Unknown(String),
}

/// Parse one line of input.  Values for `/set` keep their inner spaces.
pub fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    match head {
        "/help" => ReplCommand::Help,
        "/status" => match rest {
            "" => ReplCommand::Status { json: false },
            "json" => ReplCommand::Status { json: true },
            _ => ReplCommand::Usage("/status [json]"),
        },
        "/channels" => ReplCommand::Channels,
        "/set" => match rest.split_once(char::is_whitespace) {
            Some((channel, value)) if !value.trim().is_empty() => ReplCommand::Set {
                channel: channel.to_string(),
                value: value.trim().to_string(),
            },
            _ => ReplCommand::Usage("/set <channel> <value>"),
        },
        "/stats" => ReplCommand::Stats,
        "/quit" | "/exit" => ReplCommand::Quit,
        _ => ReplCommand::Unknown(line.to_string()),
    }
}

/// Entry point for the interactive REPL.  Returns on `/quit`, `/exit` or
/// end of input.
pub fn run(engine: &SyncEngine) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", "cultivo>".bold().green());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        match parse_command(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Help => cmd_help(),
            ReplCommand::Status { json: false } => print!("{}", render_dashboard(&engine.dashboard())),
            ReplCommand::Status { json: true } => match serde_json::to_string_pretty(&engine.dashboard()) {
                Ok(json) => println!("{json}"),
                Err(e) => println!("{}: {}", "Serialization error".red(), e),
            },
            ReplCommand::Channels => print!("{}", render_channels(engine.registry().all())),
            ReplCommand::Set { channel, value } => cmd_set(engine, &channel, &value),
            ReplCommand::Stats => print!("{}", render_stats(&engine.stats())),
            ReplCommand::Quit => {
                println!("{}", "Goodbye.".green());
                break;
            }
            ReplCommand::Usage(usage) => {
                println!("{} {}", "Usage:".yellow(), usage.bold());
            }
            ReplCommand::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("  {}", "Available commands:".bold());
    println!("    {}                   Show this help message", "/help".cyan());
    println!("    {}          Connection state and sensor readings", "/status [json]".cyan());
    println!("    {}               List registered channels", "/channels".cyan());
    println!("    {}  Send an actuator command", "/set <channel> <value>".cyan());
    println!("    {}                  Ingress and store counters", "/stats".cyan());
    println!("    {}           Close the session and exit", "/quit | /exit".cyan());
    println!();
}

fn cmd_set(engine: &SyncEngine, channel: &str, value: &str) {
    match engine.submit_text(channel, value) {
        Ok(command) => println!(
            "  {} {} ← {}",
            "✓".green().bold(),
            command.channel.bold(),
            command.value.to_string().cyan()
        ),
        Err(e) => println!("  {} {}", "✗".red().bold(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn render_connection(state: &ConnectionState) -> String {
    let label = state.to_string();
    match state {
        ConnectionState::Connected => label.green().bold().to_string(),
        ConnectionState::Connecting | ConnectionState::Backoff { .. } => {
            label.yellow().to_string()
        }
        ConnectionState::Disconnected => label.red().to_string(),
    }
}

/// One line explaining why the engine stopped connecting.
pub(crate) fn render_terminal_error(error: &SyncError) -> String {
    let hint = match error {
        SyncError::AuthRejected(_) => {
            "The broker refused the credentials; check [broker] username/password and restart."
        }
        _ => "The connection manager stopped; restart to reconnect.",
    };
    format!("{} {}\n  {}", "Connection stopped:".red().bold(), error, hint.dimmed())
}

pub(crate) fn render_dashboard(dashboard: &Dashboard) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(&format!(
        "  {} {}\n\n",
        "Broker:".bold(),
        render_connection(&dashboard.connection)
    ));
    if dashboard.snapshot.is_empty() {
        out.push_str(&format!("  {}\n\n", "No sensor channels registered.".dimmed()));
        return out;
    }
    let width = dashboard
        .snapshot
        .iter()
        .map(|entry| entry.name().len())
        .max()
        .unwrap_or(0);
    for entry in dashboard.snapshot.iter() {
        out.push_str(&format!("  {}\n", render_entry(entry, width)));
    }
    out.push('\n');
    out
}

fn render_entry(entry: &SnapshotEntry, width: usize) -> String {
    let value = entry
        .value
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string());
    let freshness = if !entry.is_known() {
        "unknown".dimmed()
    } else if entry.stale {
        "stale".yellow()
    } else {
        "fresh".green()
    };
    let updated = entry
        .received_at
        .map(|at| at.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    format!(
        "{:<width$}  {:>10}  {:<7}  {}",
        entry.name(),
        value,
        freshness,
        updated.dimmed(),
    )
}

pub(crate) fn render_channels(channels: &[Channel]) -> String {
    let width = channels.iter().map(|c| c.name.len()).max().unwrap_or(0);
    let mut out = String::from("\n");
    for channel in channels {
        let direction = match channel.direction {
            Direction::Inbound => "sensor  ".cyan(),
            Direction::Outbound => "actuator".magenta(),
        };
        out.push_str(&format!(
            "  {:<width$}  {}  {:<14}  {}\n",
            channel.name,
            direction,
            describe_kind(&channel.kind),
            channel.wire_topic.dimmed(),
        ));
    }
    out.push('\n');
    out
}

fn describe_kind(kind: &ValueKind) -> String {
    match kind {
        ValueKind::Numeric { min, max } => format!("{min}..{max}"),
        ValueKind::Boolean => "on/off".to_string(),
        ValueKind::Text { max_len } => format!("text({max_len})"),
    }
}

pub(crate) fn render_stats(stats: &EngineStats) -> String {
    let rows = [
        ("delivered", stats.ingress.delivered),
        ("applied", stats.ingress.applied),
        ("duplicates", stats.ingress.duplicates),
        ("unknown topics", stats.ingress.unknown_topics),
        ("decode errors", stats.ingress.decode_errors),
        ("last sequence", stats.last_sequence),
    ];
    let mut out = String::from("\n");
    for (label, count) in rows {
        out.push_str(&format!("  {:<15} {}\n", label, count.to_string().bold()));
    }
    out.push('\n');
    out
}
