// src/monitor.rs
//! Daemon coordination: serial reader task, broadcast server task, shutdown

use crate::{
    config::DaemonConfig,
    error::{GpsError, Result},
    gps::{
        channel::{fix_channel, FixPublisher, FixSender},
        gpsd::Device,
        nmea::NmeaParser,
    },
    server::GpsdServer,
};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::watch,
    task::JoinHandle,
};
use tokio_serial::SerialPortBuilderExt;

/// Log target for daemon lifecycle messages
pub const LOG_TARGET: &str = "daemon";

/// Owns the running tasks and the stop signal they listen to
pub struct Daemon {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<Result<()>>)>,
}

impl Daemon {
    /// A daemon with no tasks yet
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Open the configured serial port, bind the listener and start both tasks
    pub async fn start(config: &DaemonConfig) -> Result<Self> {
        let port = config
            .serial_port
            .as_deref()
            .ok_or_else(|| GpsError::Config("No serial port configured".to_string()))?;
        let baudrate = config.serial_baudrate;

        info!(target: LOG_TARGET, "Opening {} @ {} baud", port, baudrate);
        let serial = tokio_serial::new(port, baudrate)
            .timeout(Duration::from_millis(1000))
            .open_native_async()
            .map_err(|e| GpsError::Connection(format!("Failed to open serial port {}: {}", port, e)))?;

        let (tx, rx) = fix_channel(config.channel_capacity, config.backpressure_timeout());
        let mut daemon = Self::new();

        let addr = config.listen_addr()?;
        info!(target: LOG_TARGET, "Binding to {}", addr);
        let devices = vec![Device::nmea(port, baudrate, Utc::now())];
        let server = GpsdServer::bind(addr, devices, rx, daemon.shutdown_signal())
            .await
            .map_err(|e| GpsError::Connection(format!("Failed to bind {}: {}", addr, e)))?;

        daemon.spawn_server(server);
        daemon.spawn_reader(port, serial, &tx);
        Ok(daemon)
    }

    /// Read NMEA lines from `reader` and publish the fixes as `source`
    pub fn spawn_reader<R>(&mut self, source: &str, reader: R, fixes: &FixSender)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut parser = NmeaParser::new(source);
        let mut publisher = fixes.publisher(source);
        let shutdown = self.shutdown.subscribe();

        let task = tokio::spawn(async move {
            run_reader(reader, &mut parser, &mut publisher, shutdown).await
        });
        self.tasks.push((format!("reader {}", source), task));
    }

    pub fn spawn_server(&mut self, server: GpsdServer) {
        self.tasks.push(("server".to_string(), tokio::spawn(server.run())));
    }

    /// Receiver for the stop signal, for tasks built outside the daemon
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Ask every task to stop
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// Wait for every task; the first failure is returned
    pub async fn join(self) -> Result<()> {
        let mut result = Ok(());

        for (name, task) in self.tasks {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(GpsError::Other(format!("{} task failed: {}", name, e))),
            };

            match outcome {
                Ok(()) => debug!(target: LOG_TARGET, "{} finished", name),
                Err(e) => {
                    error!(target: LOG_TARGET, "{} stopped with error: {}", name, e);
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }

        result
    }
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive `parser` from a byte source until EOF or shutdown.
///
/// Only the byte source can block this loop; back-pressure from the fix
/// channel is logged and the fixes are kept by the publisher.
pub async fn run_reader<R>(
    reader: R,
    parser: &mut NmeaParser,
    publisher: &mut FixPublisher,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let target = parser.log_target().to_string();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    while !*shutdown.borrow() {
        let read = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                info!(target: &*target, "End of input");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(target: &*target, "Error reading from {}: {}", parser.source(), e);
                return Err(e.into());
            }
        }

        match std::str::from_utf8(&buf) {
            Ok(line) => {
                if let Err(e) = parser.parse(line) {
                    warn!(target: &*target, "{}: {}", e, line.trim());
                }
            }
            Err(_) => warn!(target: &*target, "Discarding non-text line ({} bytes)", buf.len()),
        }
        buf.clear();

        while let Some(tpv) = parser.take_completed() {
            match publisher.publish(tpv).await {
                Ok(()) => {}
                Err(GpsError::Backpressure { pending }) => {
                    warn!(target: &*target, "Fix channel full, {} fix(es) held back", pending);
                }
                Err(GpsError::ChannelClosed) if *shutdown.borrow() => break,
                Err(e) => return Err(e),
            }
        }
    }

    info!(target: &*target, "Shutting down");
    Ok(())
}

/// List available serial ports
pub fn list_serial_ports() -> Result<()> {
    let ports = tokio_serial::available_ports()?;

    if ports.is_empty() {
        println!("No serial ports found.");
    } else {
        println!("Available serial ports:");
        for port in ports {
            println!("  {} - {:?}", port.port_name, port.port_type);
        }
    }

    Ok(())
}
