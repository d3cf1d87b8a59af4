// src/gps/mod.rs
//! NMEA decoding, fix assembly and gpsd report encoding

pub mod channel;
pub mod cycle;
pub mod data;
pub mod gpsd;
pub mod nmea;
pub mod util;

pub use channel::{fix_channel, FixPublisher, FixReceiver, FixSender, SourcedFix};
pub use data::{Satellite, Tpv};
pub use nmea::NmeaParser;
