//! # Attempt Tracker
//!
//! Consecutive-failure counters keyed by source address. A failure bumps the
//! counter, a success resets it. The count returned by `record_outcome`
//! already includes the attempt being recorded, and the blocking policy reads
//! that value for the same event.
//!
//! The store is injected into the engine as a trait object so tests get
//! isolated instances and a shared cache can replace the in-memory map later.

use std::collections::HashMap;
use std::net::IpAddr;

use parking_lot::Mutex;

use crate::LoginOutcome;

/// Per-source consecutive failure counts.
pub trait AttemptTracker: Send + Sync {
    /// Apply one outcome and return the resulting failure count.
    ///
    /// Must be atomic per address: concurrent failures never observe the
    /// same pre-increment count.
    fn record_outcome(&self, source_ip: IpAddr, outcome: LoginOutcome) -> u32;

    /// Current failure count without modifying it.
    fn failure_count(&self, source_ip: IpAddr) -> u32;
}

/// Process-local tracker backed by a single locked map.
///
/// Lives for the process lifetime; counters neither persist nor expire.
/// Sources reset by a success are dropped from the map, so only addresses
/// with outstanding failures take memory.
#[derive(Debug, Default)]
pub struct InMemoryAttemptTracker {
    counts: Mutex<HashMap<IpAddr, u32>>,
}

impl InMemoryAttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sources with at least one outstanding failure.
    pub fn tracked_sources(&self) -> usize {
        self.counts.lock().len()
    }
}

impl AttemptTracker for InMemoryAttemptTracker {
    fn record_outcome(&self, source_ip: IpAddr, outcome: LoginOutcome) -> u32 {
        let mut counts = self.counts.lock();
        match outcome {
            LoginOutcome::Success => {
                counts.remove(&source_ip);
                0
            }
            LoginOutcome::Failure => {
                let count = counts.entry(source_ip).or_insert(0);
                *count = count.saturating_add(1);
                *count
            }
        }
    }

    fn failure_count(&self, source_ip: IpAddr) -> u32 {
        self.counts.lock().get(&source_ip).copied().unwrap_or(0)
    }
}
