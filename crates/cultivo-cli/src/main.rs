//! `cultivo` – Cultivo operator console
//!
//! This binary is the front panel for one hydroponic rack.  It:
//!
//! 1. Checks for `~/.cultivo/config.toml`; runs a **First-Run Wizard** when the
//!    file is absent.
//! 2. Starts the [`SyncEngine`] against the configured MQTT broker, or
//!    against an in-process simulated rack with `--sim`.
//! 3. Drops the user into an **interactive REPL** with slash-commands
//!    (`/status`, `/channels`, `/set`, `/stats`, `/help`).
//! 4. Intercepts **Ctrl-C** to close the broker session cleanly before exit.

mod config;
mod repl;

use colored::Colorize;
use rand::Rng;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use cultivo_middleware::{SimBroker, SimTransport};
use cultivo_runtime::{SyncEngine, init_tracing};
use cultivo_types::{Channel, ConnectionState, ValueKind};

/// Interval between simulated sensor publications.
const SIM_PERIOD: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters, CULTIVO_LOG_FORMAT=json switches to JSON lines and
    // OTEL_EXPORTER_OTLP_ENDPOINT enables span export.  Logs go to stderr;
    // the console itself uses println!.
    let _telemetry = init_tracing("cultivo");

    print_banner();
    let simulate = std::env::args().skip(1).any(|arg| arg == "--sim");

    // ── First-Run Wizard ──────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    let registry = match cfg.registry() {
        Ok(registry) => registry,
        Err(e) => {
            println!("{}: {}", "Channel table error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    // ── Runtime & engine ──────────────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("cultivo")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            println!("{}: {}", "Failed to start the async runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };
    let _enter = runtime.enter();

    let engine = match SyncEngine::new(cfg.to_sync_config(), registry) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            println!("{}: {}", "Invalid configuration".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let started = if simulate {
        let (transport, broker) = SimTransport::new();
        let sensors: Vec<Channel> = engine.registry().inbound().cloned().collect();
        runtime.spawn(feed_simulated_rack(broker, sensors));
        println!("  Running against a {} rack.", "simulated".yellow().bold());
        engine.start(transport)
    } else {
        println!(
            "  Connecting to {} …",
            format!("{}:{}", cfg.broker.host, cfg.broker.port).bold()
        );
        engine.start_mqtt()
    };
    if let Err(e) = started {
        println!("{}: {}", "Failed to start the engine".red(), e);
        return ExitCode::FAILURE;
    }

    runtime.spawn(announce_connection_changes(engine.subscribe_state()));
    runtime.spawn(report_terminal_error(Arc::clone(&engine)));

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let ctrlc_engine = Arc::clone(&engine);
    let handle = runtime.handle().clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – closing the broker session …".yellow().bold());
        match handle.block_on(ctrlc_engine.shutdown()) {
            Ok(()) => println!("{}", "  ✓ Session closed.".green()),
            Err(e) => println!("  {} {}", "✗".red().bold(), e),
        }
        println!("{}", "  ✓ Exiting Cultivo.".green());
        std::process::exit(0);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the session will not be closed on Ctrl-C");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&engine);

    match runtime.block_on(engine.shutdown()) {
        Ok(()) => ExitCode::SUCCESS,
        // Already reported by `report_terminal_error`.
        Err(_) => ExitCode::FAILURE,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Background tasks
// ─────────────────────────────────────────────────────────────────────────────

/// Print one line whenever the broker session changes state.
async fn announce_connection_changes(mut state: tokio::sync::watch::Receiver<ConnectionState>) {
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        // Backoff countdowns are visible through /status.
        if matches!(current, ConnectionState::Backoff { .. }) {
            continue;
        }
        println!("\n  {} {}", "broker".dimmed(), repl::render_connection(&current));
    }
}

/// Print the reason the connection manager gave up, if it ever does.  A
/// clean shutdown prints nothing.
async fn report_terminal_error(engine: Arc<SyncEngine>) {
    if let Err(e) = engine.stopped().await {
        println!("\n  {}", repl::render_terminal_error(&e));
    }
}

/// Publish a plausible random reading for every sensor, forever.
async fn feed_simulated_rack(broker: SimBroker, sensors: Vec<Channel>) {
    let mut ticker = tokio::time::interval(SIM_PERIOD);
    loop {
        ticker.tick().await;
        for sensor in &sensors {
            if let Some(payload) = simulated_payload(&sensor.kind) {
                broker.deliver(sensor.wire_topic.clone(), payload);
            }
        }
    }
}

fn simulated_payload(kind: &ValueKind) -> Option<String> {
    let mut rng = rand::thread_rng();
    match kind {
        ValueKind::Numeric { min, max } => {
            // Stay in the middle half of the range.
            let span = max - min;
            let value = rng.gen_range(min + span * 0.25..=max - span * 0.25);
            Some(format!("{value:.1}"))
        }
        ValueKind::Boolean => Some(if rng.gen_bool(0.5) { "1" } else { "0" }.to_string()),
        ValueKind::Text { .. } => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().green());
    println!("{}", "  ║       Cultivo First-Run Wizard       ║".bold().green());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().green());
    println!();
    println!("  No configuration found.  Let's point Cultivo at your broker.\n");

    let mut cfg = config::Config::default();

    cfg.broker.host = prompt_line(
        &format!("  MQTT broker host [{}]: ", cfg.broker.host),
        &cfg.broker.host,
    );

    let port_str = prompt_line(
        &format!("  MQTT broker port [{}]: ", cfg.broker.port),
        &cfg.broker.port.to_string(),
    );
    if let Ok(p) = port_str.trim().parse::<u16>() {
        cfg.broker.port = p;
    }

    cfg.broker.username = prompt_line("  Username (blank for anonymous) []: ", "");
    if !cfg.broker.username.is_empty() {
        cfg.broker.password = prompt_line("  Password []: ", "");
    }

    let stale_str = prompt_line(
        &format!("  Mark readings stale after how many seconds [{}]: ", cfg.stale_after_secs),
        &cfg.stale_after_secs.to_string(),
    );
    if let Ok(secs) = stale_str.trim().parse::<u64>() {
        cfg.stale_after_secs = secs;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ______      ____  _            "#.bold().green());
    println!("{}", r#"  / ____/_  __/ / /_(_)   ______  "#.bold().green());
    println!("{}", r#" / /   / / / / / __/ / | / / __ \ "#.bold().green());
    println!("{}", r#"/ /___/ /_/ / / /_/ /| |/ / /_/ / "#.bold().green());
    println!("{}", r#"\____/\__,_/_/\__/_/ |___/\____/  "#.bold().green());
    println!();
    println!("  {} {}",
        "Cultivo".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Live rack state over MQTT");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
