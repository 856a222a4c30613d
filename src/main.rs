#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{Level as TraceLevel, info, warn};
use tracing_subscriber::FmtSubscriber;

use monctl::config::Config;
use monctl::coordinator::Coordinator;
use monctl::monitor;
use monctl::vcp::FeatureCode;
use monctl::window::FocusWatcher;

/// Monitor hardware control daemon: DDC/CI profiles driven by window focus
/// and screen content.
#[derive(Debug, Parser)]
#[command(name = "monctl", version, about)]
struct Args {
    /// List detected monitors and their current settings, then exit
    #[arg(long)]
    list: bool,

    /// Apply the matching profile for the focused window once, then exit
    #[arg(long)]
    once: bool,

    /// Path to the config file (defaults to the user config dir)
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Log level: trace, debug, info, warn or error (overrides LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Log level from the flag, the environment variable, or "info".
    let log_level = match args
        .log_level
        .clone()
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    monitor::probe_ddcutil()?;

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let coordinator = Arc::new(Coordinator::new(config));
    let count = coordinator.sync_monitors()?;
    if count == 0 {
        warn!("no DDC-capable monitors found, exiting");
        return Ok(());
    }
    info!(monitors = count, "monitor stacks ready");

    if args.list {
        list_monitors(&coordinator);
        return Ok(());
    }

    coordinator.start_all();

    if args.once {
        run_once(&coordinator)?;
        coordinator.stop_all();
        return Ok(());
    }

    run_daemon(&coordinator)?;
    coordinator.stop_all();
    info!("shutdown complete");
    Ok(())
}

fn list_monitors(coordinator: &Coordinator) {
    for c in coordinator.controllers() {
        let mon = c.monitor();
        println!(
            "Display {}: {} {} ({})",
            mon.display,
            mon.manufacturer,
            mon.model,
            mon.geometry
                .as_ref()
                .map(|g| format!(
                    "{}x{}+{}+{} on {}",
                    g.rect.width, g.rect.height, g.rect.x, g.rect.y, g.output
                ))
                .unwrap_or_else(|| "no geometry".to_string()),
        );
        for code in FeatureCode::ALL {
            match c.channel().read(code) {
                Ok(v) => println!("  {code}: {} / {}", v.current, v.maximum),
                Err(err) => println!("  {code}: {err}"),
            }
        }
    }
}

/// Waits for one focus event and applies the matching profile.
fn run_once(coordinator: &Arc<Coordinator>) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let mut watcher = FocusWatcher::spawn(tx)?;
    match rx.recv_timeout(Duration::from_secs(5)) {
        Ok(window) => coordinator.route_window_event(&window),
        Err(_) => warn!("no focused window reported"),
    }
    watcher.stop();
    Ok(())
}

fn run_daemon(coordinator: &Arc<Coordinator>) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        signal_hook::flag::register(SIGINT, shutdown.clone())?;
        signal_hook::flag::register(SIGTERM, shutdown.clone())?;
    }

    let (tx, rx) = mpsc::channel();
    let mut watcher = FocusWatcher::spawn(tx)?;
    info!("watching window focus");

    while !shutdown.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(window) => coordinator.route_window_event(&window),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!("focus watcher channel closed");
                break;
            }
        }
    }

    watcher.stop();
    Ok(())
}
