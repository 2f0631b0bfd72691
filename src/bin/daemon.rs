// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! g15-daemon: root service that owns the WMAX ACPI interface and serves
//! thermal control to clients over a Unix domain socket.

use anyhow::Context;
use clap::Parser;
use g15_daemon::acpi::ProcAcpiCall;
use g15_daemon::config::{self, Config};
use g15_daemon::controller::{self, Controller};
use g15_daemon::hardware::{Hardware, Preflight, Timing};
use g15_daemon::hwmon;
use g15_daemon::keylistener::KeyListener;
use g15_daemon::server::{Server, ServerOptions};
use g15_daemon::store::ConfigStore;
use std::sync::{Arc, Mutex};
use tokio::signal::unix::{SignalKind, signal};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "g15-daemon", about = "Dell G15 thermal control daemon")]
struct Cli {
    /// Path to the settings file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Override the socket path.
    #[arg(short, long)]
    socket: Option<String>,

    /// Don't listen for the G-Mode key.
    #[arg(long)]
    no_hotkey: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = config::resolve_config_path(Some(&cli.config));
    let mut cfg = config::load_config(&config_path).unwrap_or_else(|e| {
        log::warn!("Could not load settings: {e}, using defaults");
        Config::default()
    });
    if let Some(socket) = cli.socket {
        cfg.daemon.socket_path = socket;
    }

    Preflight::default()
        .run()
        .context("hardware preflight failed")?;

    let dell_hwmon = hwmon::discover().unwrap_or_else(|e| {
        log::error!("Failed to scan hwmon devices: {e}");
        None
    });
    match &dell_hwmon {
        Some(dev) => log::info!("Using hwmon device {} at {}", dev.name, dev.dir.display()),
        None => log::info!("No Dell hwmon device found, reading sensors over ACPI"),
    }

    let hardware = Hardware::new(Box::new(ProcAcpiCall::default()), dell_hwmon, Timing::FIRMWARE);
    let store = ConfigStore::new(&cfg.daemon.state_dir);
    let ctl = tokio::task::spawn_blocking(move || Controller::start(hardware, store))
        .await
        .context("controller startup panicked")?;
    let shared = Arc::new(Mutex::new(ctl));

    let mut listener = KeyListener::new(cfg.hotkey.keyboard_name.clone());
    if cfg.hotkey.enabled && !cli.no_hotkey {
        let for_key = shared.clone();
        listener.start(Arc::new(move || {
            controller::lock(&for_key).toggle_g_mode();
        }));
    } else {
        log::info!("G-Mode key capture disabled");
    }

    let server = Arc::new(Server::new(shared, ServerOptions::from_config(&cfg)));
    let socket = server.bind().context("failed to bind daemon socket")?;

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        log::info!("Received shutdown signal");
    };

    server.run(socket, shutdown).await;

    listener.stop();
    log::info!("Daemon stopped");
    Ok(())
}
