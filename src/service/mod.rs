//! Lookup Service Module
//!
//! Cache-aside read path, per-instance counters and the readiness flag.

mod lookup;
mod stats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use lookup::{LookupService, LookupSettings};
pub use stats::{LookupStats, StatsSnapshot};

/// Whether this instance may receive traffic.
///
/// Set once, never cleared: the dataset stays warm for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }
}
