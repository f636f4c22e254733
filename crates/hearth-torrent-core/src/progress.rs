//! Reconciliation of live engine progress with durable checkpoints.
//!
//! # Design
//! - `real_progress` is a one-directional combine: readers never observe a
//!   value below the last durable checkpoint, even while a re-attached session
//!   restarts its counters from zero.
//! - Verification is tracked as its own fraction (bytes re-checked against the
//!   previously recorded progress) and never written back as download progress.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use hearth_events::InfoHash;

/// Clamp a fraction into `[0, 1]`, mapping `NaN` to zero.
#[must_use]
pub fn clamp_fraction(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// `completed / total` as a clamped fraction; `None` when the total is zero.
#[must_use]
pub fn fraction(completed: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(clamp_fraction(to_f64(completed.min(total)) / to_f64(total)))
}

/// Authoritative progress: `max(durable, live ?? durable)`.
#[must_use]
pub fn real_progress(durable: f64, live: Option<f64>) -> f64 {
    let durable = clamp_fraction(durable);
    let live = live.map_or(durable, clamp_fraction);
    durable.max(live)
}

/// Share of previously recorded progress that verification has re-confirmed.
///
/// A zero denominator reports complete as soon as any byte is confirmed.
#[must_use]
pub fn verified_fraction(durable: f64, live: f64) -> f64 {
    let durable = clamp_fraction(durable);
    let live = clamp_fraction(live);
    if durable <= 0.0 {
        return if live > 0.0 { 1.0 } else { 0.0 };
    }
    clamp_fraction(live / durable)
}

/// Tracks when each torrent was last checkpointed so periodic write-back
/// stays within the configured interval.
#[derive(Debug)]
pub struct CheckpointClock {
    interval: Duration,
    last: HashMap<InfoHash, Instant>,
}

impl CheckpointClock {
    /// Create a clock that allows one periodic checkpoint per `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: HashMap::new(),
        }
    }

    /// Whether a periodic checkpoint is due; records `now` when it is.
    pub fn due(&mut self, info_hash: &InfoHash, now: Instant) -> bool {
        let due = self
            .last
            .get(info_hash)
            .is_none_or(|last| now.saturating_duration_since(*last) >= self.interval);
        if due {
            self.last.insert(info_hash.clone(), now);
        }
        due
    }

    /// Record an out-of-band checkpoint (completion, verification).
    pub fn mark(&mut self, info_hash: &InfoHash, now: Instant) {
        self.last.insert(info_hash.clone(), now);
    }

    /// Drop bookkeeping for a removed torrent.
    pub fn forget(&mut self, info_hash: &InfoHash) {
        self.last.remove(info_hash);
    }
}

const fn to_f64(value: u64) -> f64 {
    #[expect(
        clippy::cast_precision_loss,
        reason = "byte counters are reported as fractions; sub-byte precision is irrelevant"
    )]
    {
        value as f64
    }
}
