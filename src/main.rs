// src/main.rs
//! nmea-gpsd - serve an NMEA serial receiver to gpsd clients

use anyhow::Context;
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;
use nmea_gpsd::{monitor, Daemon, DaemonConfig};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Serial device the receiver is attached to
    #[arg(required_unless_present = "list_ports")]
    port: Option<String>,
    /// Serial baud rate
    baud: Option<u32>,
    /// Address to listen on
    #[arg(short, long)]
    bind: Option<String>,
    /// TCP port to listen on
    #[arg(short = 'p', long)]
    listen_port: Option<u16>,
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    Builder::from_env(Env::default().default_filter_or(level)).init();

    if args.list_ports {
        monitor::list_serial_ports()?;
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load_from(path)?,
        None => DaemonConfig::load().unwrap_or_default(),
    };
    if let Some(port) = args.port {
        config.update_serial(port, args.baud);
    }
    config.update_listen(args.bind, args.listen_port);

    let daemon = Daemon::start(&config)
        .await
        .context("Failed to start daemon")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupted, shutting down");

    daemon.stop();
    daemon.join().await.context("Daemon stopped with an error")?;
    Ok(())
}

