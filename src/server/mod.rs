// src/server/mod.rs
//! gpsd-compatible broadcast server
//!
//! A single task owns the listener, every client socket and the receiving end
//! of the fix channel. Each turn of the loop waits once for readiness on all of
//! them (bounded by `POLL_INTERVAL`), then accepts, reads, writes and fans out
//! fixes without ever blocking on one client.

pub mod client;

use crate::{
    error::Result,
    gps::{
        channel::{FixReceiver, SourcedFix},
        gpsd::{Device, Report, SkyReport, TpvReport},
    },
};
use client::{FixLines, Session};
use log::{debug, info, warn};
use std::{
    collections::HashMap,
    future::poll_fn,
    io::ErrorKind,
    net::SocketAddr,
    sync::Arc,
    task::Poll,
    time::Duration,
};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::watch,
};

/// Upper bound on one readiness wait, so shutdown is noticed without socket activity
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 4096;

type ClientId = u64;

struct Client {
    stream: TcpStream,
    session: Session,
}

/// Everything that became ready during one wait
#[derive(Default)]
struct Events {
    accepted: Vec<(TcpStream, SocketAddr)>,
    readable: Vec<ClientId>,
    writable: Vec<ClientId>,
    fixes: Vec<SourcedFix>,
}

impl Events {
    fn is_empty(&self) -> bool {
        self.accepted.is_empty()
            && self.readable.is_empty()
            && self.writable.is_empty()
            && self.fixes.is_empty()
    }
}

pub struct GpsdServer {
    listener: TcpListener,
    fixes: FixReceiver,
    fixes_open: bool,
    devices: Vec<Device>,
    clients: HashMap<ClientId, Client>,
    next_id: ClientId,
    shutdown: watch::Receiver<bool>,
    log_target: Arc<str>,
}

impl GpsdServer {
    /// Bind `addr` and serve fixes from `fixes` until `shutdown` turns true
    pub async fn bind(
        addr: SocketAddr,
        devices: Vec<Device>,
        fixes: FixReceiver,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::new(listener, devices, fixes, shutdown))
    }

    pub fn new(
        listener: TcpListener,
        devices: Vec<Device>,
        fixes: FixReceiver,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            fixes,
            fixes_open: true,
            devices,
            clients: HashMap::new(),
            next_id: 0,
            shutdown,
            log_target: Arc::from("gpsd::server"),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until shutdown, then close every client
    pub async fn run(mut self) -> Result<()> {
        info!(target: &*self.log_target, "Listening on {}", self.local_addr()?);

        while !*self.shutdown.borrow() {
            let events = tokio::time::timeout(POLL_INTERVAL, self.wait())
                .await
                .unwrap_or_default();

            for (stream, peer) in events.accepted {
                self.register(stream, peer);
            }
            for id in events.readable {
                self.service_read(id);
            }
            for id in events.writable {
                self.service_write(id);
            }
            for fix in events.fixes {
                self.fan_out(&fix);
            }
        }

        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in ids {
            if let Some(mut client) = self.clients.remove(&id) {
                info!(
                    target: &*self.log_target,
                    "Client disconnect: {} (Server shutting down)",
                    client.session.peer()
                );
                let _ = client.stream.shutdown().await;
            }
        }
        info!(target: &*self.log_target, "Server stopped");
        Ok(())
    }

    /// One readiness wait across the listener, all clients and the fix channel
    async fn wait(&mut self) -> Events {
        poll_fn(|cx| {
            let mut events = Events::default();

            loop {
                match self.listener.poll_accept(cx) {
                    Poll::Ready(Ok(accepted)) => events.accepted.push(accepted),
                    Poll::Ready(Err(e)) => {
                        warn!(target: &*self.log_target, "Accept failed: {}", e);
                        break;
                    }
                    Poll::Pending => break,
                }
            }

            for (id, client) in &self.clients {
                // Errors count as ready so the following read or write reports them
                if client.stream.poll_read_ready(cx).is_ready() {
                    events.readable.push(*id);
                }
                if client.session.has_pending() && client.stream.poll_write_ready(cx).is_ready() {
                    events.writable.push(*id);
                }
            }

            while self.fixes_open {
                match self.fixes.poll_recv(cx) {
                    Poll::Ready(Some(fix)) => events.fixes.push(fix),
                    Poll::Ready(None) => {
                        debug!(target: &*self.log_target, "Fix channel closed");
                        self.fixes_open = false;
                    }
                    Poll::Pending => break,
                }
            }

            if events.is_empty() {
                Poll::Pending
            } else {
                Poll::Ready(events)
            }
        })
        .await
    }

    fn register(&mut self, stream: TcpStream, peer: SocketAddr) {
        info!(target: &*self.log_target, "New client: {}", peer);
        let id = self.next_id;
        self.next_id += 1;
        let session = Session::new(peer, Arc::clone(&self.log_target));
        self.clients.insert(id, Client { stream, session });
    }

    fn disconnect(&mut self, id: ClientId, reason: &str) {
        if let Some(client) = self.clients.remove(&id) {
            info!(
                target: &*self.log_target,
                "Client disconnect: {} ({})",
                client.session.peer(),
                reason
            );
        }
    }

    fn service_read(&mut self, id: ClientId) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };

        let mut buf = [0u8; READ_CHUNK];
        match client.stream.try_read(&mut buf) {
            Ok(0) => self.disconnect(id, "Client closed socket"),
            Ok(n) => client.session.feed(&buf[..n], &self.devices),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => self.disconnect(id, &e.to_string()),
        }
    }

    fn service_write(&mut self, id: ClientId) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };

        match client.stream.try_write(client.session.pending_chunk()) {
            Ok(sent) => client.session.consume(sent),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => self.disconnect(id, &e.to_string()),
        }
    }

    fn fan_out(&mut self, fix: &SourcedFix) {
        let lines = match render_fix(fix) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(target: &*self.log_target, "Cannot encode fix from {}: {}", fix.source, e);
                return;
            }
        };

        for client in self.clients.values_mut() {
            client.session.deliver(&lines);
        }
    }
}

/// Render a fix once: TPV then SKY for JSON watchers, sentence text for raw watchers
pub fn render_fix(fix: &SourcedFix) -> Result<FixLines> {
    let mut json = Report::Tpv(TpvReport::from_tpv(&fix.source, &fix.tpv)).to_line()?;
    json.push_str(&Report::Sky(SkyReport::from_tpv(&fix.source, &fix.tpv)).to_line()?);

    let mut raw = String::new();
    // NMEA sentences go out with their CRLF terminator
    for sentence in &fix.tpv.sentences {
        raw.push_str(sentence);
        raw.push_str("\r\n");
    }

    Ok(FixLines { json, raw })
}
