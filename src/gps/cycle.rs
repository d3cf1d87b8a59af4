// src/gps/cycle.rs
//! Fix cycle detection
//!
//! A receiver sends a burst of sentences once per epoch. The sentence that
//! follows the longest quiet gap is the first one of a burst, so once that
//! sentence type is identified every further occurrence closes the previous
//! fix. The choice is sticky: jitter after locking never moves the boundary.

use super::nmea::SentenceKind;
use std::time::{Duration, Instant};

/// Gaps shorter than this are considered part of the same burst
pub const MIN_BOUNDARY_GAP: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unlocked,
    Locked(SentenceKind),
}

#[derive(Debug)]
pub struct CycleSync {
    state: SyncState,
    last_seen: Option<Instant>,
    /// Gap preceding the latest occurrence of each type, in first-seen order
    intervals: Vec<(SentenceKind, Duration)>,
}

impl CycleSync {
    pub fn new() -> Self {
        Self {
            state: SyncState::Unlocked,
            last_seen: None,
            intervals: Vec::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn boundary(&self) -> Option<SentenceKind> {
        match self.state {
            SyncState::Locked(kind) => Some(kind),
            SyncState::Unlocked => None,
        }
    }

    /// Time elapsed before the latest `kind` sentence
    pub fn interval(&self, kind: SentenceKind) -> Option<Duration> {
        self.intervals
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, gap)| *gap)
    }

    /// Record a `kind` sentence arriving at `now`.
    ///
    /// Returns true when it starts a new cycle, i.e. the in-progress fix is
    /// complete.
    pub fn observe(&mut self, kind: SentenceKind, now: Instant) -> bool {
        let gap = self
            .last_seen
            .map(|prev| now.saturating_duration_since(prev))
            .unwrap_or_default();
        self.last_seen = Some(now);

        match self.intervals.iter_mut().find(|(k, _)| *k == kind) {
            Some(entry) => entry.1 = gap,
            None => self.intervals.push((kind, gap)),
        }

        match self.state {
            SyncState::Locked(boundary) => kind == boundary,
            SyncState::Unlocked => {
                if self.intervals.len() < 2 {
                    return false;
                }

                // First of the largest, so ties favour the earlier type
                let (longest, longest_gap) = self
                    .intervals
                    .iter()
                    .fold(self.intervals[0], |best, cur| if cur.1 > best.1 { *cur } else { best });

                if longest == kind && longest_gap > MIN_BOUNDARY_GAP {
                    self.state = SyncState::Locked(kind);
                    true
                } else {
                    false
                }
            }
        }
    }
}

impl Default for CycleSync {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: SentenceKind = SentenceKind::Rmc;
    const B: SentenceKind = SentenceKind::Gga;
    const C: SentenceKind = SentenceKind::Gsv;

    fn ms(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    #[test]
    fn test_locks_on_burst_leader() {
        let mut sync = CycleSync::new();
        let t0 = Instant::now();

        assert!(!sync.observe(A, ms(t0, 0)));
        assert!(!sync.observe(B, ms(t0, 15)));
        assert!(!sync.observe(C, ms(t0, 30)));
        assert_eq!(sync.state(), SyncState::Unlocked);

        assert!(sync.observe(A, ms(t0, 1000)));
        assert_eq!(sync.boundary(), Some(A));
        assert_eq!(sync.interval(A), Some(Duration::from_millis(970)));

        assert!(!sync.observe(B, ms(t0, 1015)));
        assert!(!sync.observe(C, ms(t0, 1030)));
        assert!(sync.observe(A, ms(t0, 2000)));
    }

    #[test]
    fn test_short_gaps_never_lock() {
        let mut sync = CycleSync::new();
        let t0 = Instant::now();
        for i in 0..20 {
            let kind = if i % 2 == 0 { A } else { B };
            assert!(!sync.observe(kind, ms(t0, i * 50)));
        }
        assert_eq!(sync.state(), SyncState::Unlocked);
    }

    #[test]
    fn test_single_type_never_locks() {
        let mut sync = CycleSync::new();
        let t0 = Instant::now();
        for i in 0..5 {
            assert!(!sync.observe(A, ms(t0, i * 1000)));
        }
        assert_eq!(sync.boundary(), None);
    }

    #[test]
    fn test_lock_is_sticky() {
        let mut sync = CycleSync::new();
        let t0 = Instant::now();
        sync.observe(A, ms(t0, 0));
        sync.observe(B, ms(t0, 10));
        assert!(sync.observe(A, ms(t0, 1000)));

        // B now follows the long gap, but the boundary stays on A
        assert!(!sync.observe(B, ms(t0, 3000)));
        assert_eq!(sync.boundary(), Some(A));
        assert!(sync.observe(A, ms(t0, 3010)));
    }

    #[test]
    fn test_out_of_order_burst_locks_on_whatever_leads() {
        let mut sync = CycleSync::new();
        let t0 = Instant::now();
        sync.observe(C, ms(t0, 0));
        sync.observe(A, ms(t0, 10));
        sync.observe(B, ms(t0, 20));
        assert!(sync.observe(C, ms(t0, 1000)));
        assert_eq!(sync.boundary(), Some(C));
    }
}
