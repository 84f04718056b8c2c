//! Round-trip latency tracking over a fixed ring of outstanding probes.

use std::time::Instant;

/// Number of probes remembered. Issuing more overwrites the oldest slot.
pub const PING_RING_SIZE: usize = 10;

/// One latency probe slot.
#[derive(Debug, Clone, Copy, Default)]
struct PingEntry {
    sequence: u16,
    sent_at: Option<Instant>,
    received_at: Option<Instant>,
}

/// Fixed-capacity ring of latency probes.
///
/// Sequence numbers increase by one per probe and wrap at `u16::MAX`.
#[derive(Debug, Clone, Default)]
pub struct PingTracker {
    entries: [PingEntry; PING_RING_SIZE],
    head: usize,
}

impl PingTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new probe now. Returns the sequence number to put in the ping packet.
    pub fn issue_probe(&mut self) -> u16 {
        self.issue_probe_at(Instant::now())
    }

    /// Start a new probe with an explicit send time.
    pub fn issue_probe_at(&mut self, now: Instant) -> u16 {
        let next = self.entries[self.head].sequence.wrapping_add(1);
        self.head = (self.head + 1) % PING_RING_SIZE;

        self.entries[self.head] = PingEntry {
            sequence: next,
            sent_at: Some(now),
            received_at: None,
        };
        next
    }

    /// Record the reply for `sequence` now.
    pub fn record_reply(&mut self, sequence: u16) {
        self.record_reply_at(sequence, Instant::now());
    }

    /// Record the reply for `sequence` with an explicit receive time.
    ///
    /// Replies for sequences no longer in the ring are dropped.
    pub fn record_reply_at(&mut self, sequence: u16, now: Instant) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.sequence == sequence) {
            entry.received_at = Some(now);
        }
    }

    /// Average one-way latency in milliseconds, estimated as half of each
    /// completed round trip. Returns 0 when no probe has completed.
    pub fn average_round_trip_ms(&self) -> u32 {
        let (total_ms, measures) = self
            .entries
            .iter()
            .filter_map(|e| match (e.sent_at, e.received_at) {
                (Some(sent), Some(received)) => {
                    Some(received.saturating_duration_since(sent).as_secs_f64() * 1000.0 * 0.5)
                }
                _ => None,
            })
            .fold((0.0, 0u32), |(sum, n), ms| (sum + ms, n + 1));

        if measures == 0 {
            0
        } else {
            (total_ms / f64::from(measures)) as u32
        }
    }

    /// Number of probes that have been answered and are still in the ring.
    pub fn completed_samples(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.sent_at.is_some() && e.received_at.is_some())
            .count()
    }
}
