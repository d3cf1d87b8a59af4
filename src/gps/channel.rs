// src/gps/channel.rs
//! Hand-off of completed fixes from parsers to the broadcast server

use super::data::Tpv;
use crate::error::{GpsError, Result};
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::sync::mpsc::{self, error::SendTimeoutError};

/// A completed fix tagged with the receiver it came from
#[derive(Debug, Clone)]
pub struct SourcedFix {
    pub source: Arc<str>,
    pub tpv: Tpv,
}

/// Create a bounded fix channel.
///
/// `timeout` is how long a publisher waits on a full channel before
/// reporting back-pressure.
pub fn fix_channel(capacity: usize, timeout: Duration) -> (FixSender, FixReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        FixSender { tx, timeout },
        FixReceiver { rx },
    )
}

/// Cloneable handle the parser side uses to create publishers
#[derive(Clone)]
pub struct FixSender {
    tx: mpsc::Sender<SourcedFix>,
    timeout: Duration,
}

impl FixSender {
    /// Publisher for one receiver
    pub fn publisher(&self, source: impl Into<Arc<str>>) -> FixPublisher {
        FixPublisher {
            source: source.into(),
            tx: self.tx.clone(),
            timeout: self.timeout,
            backlog: VecDeque::new(),
        }
    }
}

/// Per-source sending half.
///
/// Fixes that cannot be queued in time are kept in order and go out before
/// any newer fix, so nothing is dropped or reordered.
pub struct FixPublisher {
    source: Arc<str>,
    tx: mpsc::Sender<SourcedFix>,
    timeout: Duration,
    backlog: VecDeque<SourcedFix>,
}

impl FixPublisher {
    /// Fixes still waiting for room in the channel
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    /// Queue `tpv`, waiting up to the configured timeout for room.
    ///
    /// Returns `GpsError::Backpressure` when the channel stayed full; the fix
    /// is retained and retried on the next call to `publish` or `flush`.
    pub async fn publish(&mut self, tpv: Tpv) -> Result<()> {
        self.backlog.push_back(SourcedFix {
            source: Arc::clone(&self.source),
            tpv,
        });
        self.flush().await
    }

    /// Try to drain the backlog
    pub async fn flush(&mut self) -> Result<()> {
        while let Some(fix) = self.backlog.pop_front() {
            match self.tx.send_timeout(fix, self.timeout).await {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(fix)) => {
                    self.backlog.push_front(fix);
                    return Err(GpsError::Backpressure {
                        pending: self.backlog.len(),
                    });
                }
                Err(SendTimeoutError::Closed(fix)) => {
                    self.backlog.push_front(fix);
                    return Err(GpsError::ChannelClosed);
                }
            }
        }
        Ok(())
    }
}

/// Receiving half, owned by the broadcast server
pub struct FixReceiver {
    rx: mpsc::Receiver<SourcedFix>,
}

impl FixReceiver {
    pub async fn recv(&mut self) -> Option<SourcedFix> {
        self.rx.recv().await
    }

    /// Next fix if one is already queued
    pub fn try_recv(&mut self) -> Option<SourcedFix> {
        self.rx.try_recv().ok()
    }

    pub(crate) fn poll_recv(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<SourcedFix>> {
        self.rx.poll_recv(cx)
    }
}
