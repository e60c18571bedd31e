//! In-memory process scanner for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::application::lifecycle::{ProcessScanner, ScanError, TargetProcess};

/// Returns whatever target list was last set and counts scans.
#[derive(Default)]
pub struct StaticScanner {
    targets: Mutex<Vec<TargetProcess>>,
    scans: AtomicUsize,
}

impl StaticScanner {
    pub fn new(targets: Vec<TargetProcess>) -> Self {
        Self {
            targets: Mutex::new(targets),
            scans: AtomicUsize::new(0),
        }
    }

    pub fn set_targets(&self, targets: Vec<TargetProcess>) {
        *self.targets.lock().unwrap_or_else(PoisonError::into_inner) = targets;
    }

    /// Number of completed `find_targets` calls.
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

impl ProcessScanner for StaticScanner {
    fn find_targets(&self) -> Result<Vec<TargetProcess>, ScanError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
