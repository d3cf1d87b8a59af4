// src/server/client.rs
//! Per-client protocol state and buffering, independent of the socket

use crate::gps::gpsd::{self, Command, Device, Devices, Report, Version, Watch, WatchRequest};
use log::{debug, info, warn};
use std::{net::SocketAddr, sync::Arc};

/// Largest slice handed to a single socket write
pub const SEND_CHUNK: usize = 1024;
/// Inbound bytes tolerated without a newline before the buffer is discarded
const MAX_INBOUND: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Off,
    Json,
    /// Original sentence text, at the requested raw level
    Raw(u8),
}

impl WatchMode {
    /// Pick a mode for a `?WATCH` request
    pub fn negotiate(req: &WatchRequest) -> Self {
        if req.enable == Some(false) {
            return WatchMode::Off;
        }
        match req.raw {
            Some(level) if level > 0 => WatchMode::Raw(level),
            _ if req.enable == Some(true) && req.json == Some(true) => WatchMode::Json,
            _ => WatchMode::Off,
        }
    }

    fn ack(&self) -> Watch {
        match self {
            WatchMode::Off => Watch::new(false, false, 0),
            WatchMode::Json => Watch::new(true, true, 0),
            WatchMode::Raw(level) => Watch::new(true, false, *level),
        }
    }
}

/// A fix rendered once for every subscription style
#[derive(Debug, Default)]
pub struct FixLines {
    /// TPV line followed by SKY line
    pub json: String,
    /// Sentences of the cycle, one per line
    pub raw: String,
}

/// Protocol side of one connected client
pub struct Session {
    peer: SocketAddr,
    mode: WatchMode,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    log_target: Arc<str>,
}

impl Session {
    /// New session in `WatchMode::Off`, with the VERSION greeting queued
    pub fn new(peer: SocketAddr, log_target: Arc<str>) -> Self {
        let mut session = Self {
            peer,
            mode: WatchMode::Off,
            inbound: Vec::new(),
            outbound: Vec::new(),
            log_target,
        };
        session.queue(&Report::Version(Version::default()));
        session
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn mode(&self) -> WatchMode {
        self.mode
    }

    /// Append received bytes and run every complete line
    pub fn feed(&mut self, data: &[u8], devices: &[Device]) {
        self.inbound.extend_from_slice(data);

        while let Some(pos) = self.inbound.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.inbound.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if !line.is_empty() {
                self.handle_line(line, devices);
            }
        }

        if self.inbound.len() > MAX_INBOUND {
            warn!(
                target: &*self.log_target,
                "{}: discarding {} bytes without a newline",
                self.peer,
                self.inbound.len()
            );
            self.inbound.clear();
        }
    }

    fn handle_line(&mut self, line: &str, devices: &[Device]) {
        let command = match gpsd::parse_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => {
                debug!(target: &*self.log_target, "{}: ignoring {:?}", self.peer, line);
                return;
            }
            Err(e) => {
                warn!(target: &*self.log_target, "{}: bad command {:?}: {}", self.peer, line, e);
                return;
            }
        };

        match command {
            Command::Watch(Some(req)) => {
                self.mode = WatchMode::negotiate(&req);
                info!(target: &*self.log_target, "{}: watch mode {:?}", self.peer, self.mode);
                if self.mode != WatchMode::Off {
                    self.queue_devices(devices);
                }
                self.queue(&Report::Watch(self.mode.ack()));
            }
            Command::Watch(None) => self.queue(&Report::Watch(self.mode.ack())),
            Command::Version => self.queue(&Report::Version(Version::default())),
            Command::Devices => self.queue_devices(devices),
            Command::Unknown(name) => {
                warn!(target: &*self.log_target, "{}: unsupported command {}", self.peer, name);
            }
        }
    }

    fn queue_devices(&mut self, devices: &[Device]) {
        self.queue(&Report::Devices(Devices {
            devices: devices.to_vec(),
        }));
    }

    fn queue(&mut self, report: &Report) {
        match report.to_line() {
            Ok(line) => self.outbound.extend_from_slice(line.as_bytes()),
            Err(e) => warn!(target: &*self.log_target, "{}: cannot encode report: {}", self.peer, e),
        }
    }

    /// Queue a fix according to the current watch mode
    pub fn deliver(&mut self, fix: &FixLines) {
        match self.mode {
            WatchMode::Off => {}
            WatchMode::Json => self.outbound.extend_from_slice(fix.json.as_bytes()),
            WatchMode::Raw(_) => self.outbound.extend_from_slice(fix.raw.as_bytes()),
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Next bytes to write, at most `SEND_CHUNK`
    pub fn pending_chunk(&self) -> &[u8] {
        &self.outbound[..self.outbound.len().min(SEND_CHUNK)]
    }

    /// Drop `sent` bytes from the front of the outbound buffer
    pub fn consume(&mut self, sent: usize) {
        self.outbound.drain(..sent.min(self.outbound.len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Value;

    fn session() -> Session {
        Session::new("127.0.0.1:40000".parse().unwrap(), Arc::from("test"))
    }

    fn devices() -> Vec<Device> {
        vec![Device::nmea("/dev/ttyS1", 9600, Utc::now())]
    }

    /// Drain the outbound buffer as parsed JSON objects
    fn drain_json(session: &mut Session) -> Vec<Value> {
        let mut out = Vec::new();
        while session.has_pending() {
            let chunk = session.pending_chunk().to_vec();
            session.consume(chunk.len());
            out.extend(chunk);
        }
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn classes(values: &[Value]) -> Vec<&str> {
        values.iter().map(|v| v["class"].as_str().unwrap()).collect()
    }

    fn fix_lines() -> FixLines {
        FixLines {
            json: "{\"class\":\"TPV\"}\n{\"class\":\"SKY\"}\n".to_string(),
            raw: "$GPGGA,1*00\n".to_string(),
        }
    }

    #[test]
    fn test_version_greeting() {
        let mut session = session();
        assert_eq!(session.mode(), WatchMode::Off);
        assert_eq!(classes(&drain_json(&mut session)), vec!["VERSION"]);
    }

    #[test]
    fn test_watch_json() {
        let mut session = session();
        drain_json(&mut session);

        session.feed(b"?WATCH={\"enable\":true,\"json\":true}\n", &devices());
        assert_eq!(session.mode(), WatchMode::Json);

        let replies = drain_json(&mut session);
        assert_eq!(classes(&replies), vec!["DEVICES", "WATCH"]);
        assert_eq!(replies[1]["enable"], true);
        assert_eq!(replies[1]["json"], true);

        session.deliver(&fix_lines());
        assert_eq!(classes(&drain_json(&mut session)), vec!["TPV", "SKY"]);
    }

    #[test]
    fn test_watch_raw() {
        let mut session = session();
        drain_json(&mut session);

        session.feed(b"?WATCH={\"enable\":true,\"raw\":2}\n", &devices());
        assert_eq!(session.mode(), WatchMode::Raw(2));
        let replies = drain_json(&mut session);
        assert_eq!(classes(&replies), vec!["DEVICES", "WATCH"]);
        assert_eq!(replies[1]["raw"], 2);

        session.deliver(&fix_lines());
        assert_eq!(session.pending_chunk(), b"$GPGGA,1*00\n");
    }

    #[test]
    fn test_watch_disable() {
        let mut session = session();
        session.feed(b"?WATCH={\"enable\":true,\"json\":true}\n", &devices());
        session.feed(b"?WATCH={\"enable\":false}\n", &devices());
        assert_eq!(session.mode(), WatchMode::Off);
        drain_json(&mut session);

        session.deliver(&fix_lines());
        assert!(!session.has_pending());
    }

    #[test]
    fn test_partial_lines_are_buffered() {
        let mut session = session();
        session.feed(b"?WATCH={\"enable\":tr", &devices());
        assert_eq!(session.mode(), WatchMode::Off);
        session.feed(b"ue,\"json\":true}\r\n?VERS", &devices());
        assert_eq!(session.mode(), WatchMode::Json);
        session.feed(b"ION;\n", &devices());

        assert_eq!(
            classes(&drain_json(&mut session)),
            vec!["VERSION", "DEVICES", "WATCH", "VERSION"]
        );
    }

    #[test]
    fn test_garbage_is_ignored() {
        let mut session = session();
        drain_json(&mut session);

        session.feed(b"hello\n?WATCH={broken\n?FOO;\n\xff\xfe\n", &devices());
        assert_eq!(session.mode(), WatchMode::Off);
        assert!(!session.has_pending());
    }

    #[test]
    fn test_chunked_output() {
        let mut session = session();
        drain_json(&mut session);
        session.feed(b"?WATCH={\"enable\":true,\"json\":true}\n", &devices());
        drain_json(&mut session);

        let big = FixLines {
            json: format!("{}\n", "x".repeat(3000)),
            raw: String::new(),
        };
        session.deliver(&big);
        assert_eq!(session.pending_chunk().len(), SEND_CHUNK);
        session.consume(100);
        assert_eq!(session.pending_chunk().len(), SEND_CHUNK);
        session.consume(SEND_CHUNK * 3);
        assert!(!session.has_pending());
    }

    #[test]
    fn test_negotiate() {
        let req = |enable, json, raw| WatchRequest { enable, json, raw };
        assert_eq!(WatchMode::negotiate(&req(Some(true), Some(true), None)), WatchMode::Json);
        assert_eq!(WatchMode::negotiate(&req(None, None, Some(2))), WatchMode::Raw(2));
        assert_eq!(WatchMode::negotiate(&req(Some(true), None, None)), WatchMode::Off);
        assert_eq!(WatchMode::negotiate(&req(Some(false), Some(true), Some(2))), WatchMode::Off);
        assert_eq!(WatchMode::negotiate(&req(None, None, None)), WatchMode::Off);
    }
}
