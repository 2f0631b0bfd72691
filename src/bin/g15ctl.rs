// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! g15ctl: command-line client for g15-daemon.

use clap::{Parser, Subcommand};
use g15_daemon::client::{Client, ClientError};
use g15_daemon::config;
use g15_daemon::mode::{FanId, PowerMode};
use g15_daemon::protocol::{AllData, FansData, TempsData};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "g15ctl", about = "Control a Dell G15 through g15-daemon", version)]
struct Cli {
    /// Daemon socket path.
    #[arg(short, long, default_value = config::DEFAULT_SOCKET_PATH)]
    socket: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Model, sensor source and G-Mode state
    Status,
    /// CPU and GPU temperatures
    Temps,
    /// Fan speeds and boost levels
    Fans,
    /// Set the power mode (Quiet, Balanced, Performance, Custom)
    Mode { mode: PowerMode },
    /// Set a fan's boost percentage
    Boost {
        /// 1 = CPU fan, 2 = GPU fan
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        fan: u8,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        percentage: u8,
    },
    /// Toggle G-Mode
    Gmode,
    /// Print everything periodically
    Watch {
        /// Seconds between refreshes
        #[arg(short, long, default_value_t = 2)]
        interval: u64,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let mut client = Client::new(&cli.socket);

    match run(&mut client, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("g15ctl: {e}");
            if matches!(e, ClientError::DaemonNotRunning(_)) {
                eprintln!("Start it with `sudo systemctl start g15-daemon` or run g15-daemon as root.");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(client: &mut Client, command: Command) -> Result<(), ClientError> {
    match command {
        Command::Status => {
            let status = client.status()?;
            let power = client.power_mode()?;
            println!("Model:        Dell G15 {}", status.model);
            println!("Sensors:      {}", if status.hwmon_available { "hwmon" } else { "ACPI" });
            println!("Power mode:   {}", power.current_mode);
            println!("G-Mode:       {}", on_off(status.g_mode_active));
        }
        Command::Temps => print_temps(&client.temps()?),
        Command::Fans => print_fans(&client.fans()?),
        Command::Mode { mode } => {
            client.set_power_mode(mode)?;
            println!("Power mode set to {mode}");
        }
        Command::Boost { fan, percentage } => {
            let fan = FanId::try_from(i64::from(fan))
                .map_err(|n| ClientError::Daemon(format!("invalid fan {n}")))?;
            client.set_fan_boost(fan, percentage)?;
            println!("{fan} boost set to {percentage}%");
        }
        Command::Gmode => {
            client.toggle_g_mode()?;
            let power = client.power_mode()?;
            println!("G-Mode {}", on_off(power.g_mode));
        }
        Command::Watch { interval } => loop {
            print_all(&client.all_data()?);
            println!();
            thread::sleep(Duration::from_secs(interval.max(1)));
        },
    }
    Ok(())
}

fn print_temps(t: &TempsData) {
    println!("CPU: {:>3} °C", t.cpu_temp);
    println!("GPU: {:>3} °C", t.gpu_temp);
}

fn print_fans(f: &FansData) {
    let manual = |m: bool| if m { " (manual)" } else { "" };
    println!("fan1 (CPU): {:>5} RPM  boost {:>3}%{}", f.fan1_rpm, f.fan1_boost, manual(f.fan1_manual));
    println!("fan2 (GPU): {:>5} RPM  boost {:>3}%{}", f.fan2_rpm, f.fan2_boost, manual(f.fan2_manual));
}

fn print_all(all: &AllData) {
    println!(
        "{}  |  G-Mode {}",
        all.power.current_mode,
        on_off(all.power.g_mode)
    );
    print_temps(&all.temps);
    print_fans(&all.fans);
}

fn on_off(b: bool) -> &'static str {
    if b { "on" } else { "off" }
}
