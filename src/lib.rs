// src/lib.rs
//! NMEA GPS daemon library
//!
//! Reads NMEA 0183 sentences from a serial receiver, assembles one fix per
//! receiver cycle and serves the fixes to gpsd protocol clients over TCP.

pub mod config;
pub mod error;
pub mod gps;
pub mod monitor;
pub mod server;

// Re-export main types for convenience
pub use config::DaemonConfig;
pub use error::{GpsError, Result};
pub use gps::{NmeaParser, Satellite, Tpv};
pub use monitor::Daemon;
pub use server::GpsdServer;
