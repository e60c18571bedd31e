//! Counting remediator for tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::application::lifecycle::HubPowerRemediator;

#[derive(Default)]
pub struct CountingRemediator {
    runs: AtomicUsize,
}

impl CountingRemediator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the fix ran.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl HubPowerRemediator for CountingRemediator {
    fn remediate(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
    }
}
