//! Recording test doubles for the install and unload state machines.
//!
//! [`RecordingInterposer`] logs each call and can be told to fail at one
//! chosen step, which is how the tests freeze the stage counter at every
//! value.  [`RecordingUnloader`] counts release calls instead of unmapping
//! anything.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::application::install::{Hook, InterposeError, Interposer};
use crate::application::unload::ModuleUnloader;

/// One recorded [`Interposer`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockInterposerLog {
    Find,
    Begin,
    UpdateThreads,
    Attach(Hook),
    Detach(Hook),
    Commit,
    Abort,
}

/// The step at which a [`RecordingInterposer`] reports failure.
///
/// `begin` and `commit` occur in both transactions, so they get separate
/// install and removal variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Find,
    Begin,
    UpdateThreads,
    Attach(Hook),
    Commit,
    RemovalBegin,
    Detach(Hook),
    RemovalCommit,
}

/// Interposer double that records calls and applies nothing.
#[derive(Debug, Default)]
pub struct RecordingInterposer {
    fail_at: Option<FailPoint>,
    log: Arc<Mutex<Vec<MockInterposerLog>>>,
    committed: usize,
}

impl RecordingInterposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(point: FailPoint) -> Self {
        Self {
            fail_at: Some(point),
            ..Self::default()
        }
    }

    /// Snapshot of the calls made so far.
    pub fn log(&self) -> Vec<MockInterposerLog> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Shared handle to the call log, usable after the interposer was moved.
    pub fn log_handle(&self) -> Arc<Mutex<Vec<MockInterposerLog>>> {
        Arc::clone(&self.log)
    }

    fn record(&self, entry: MockInterposerLog) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    fn check(&self, point: FailPoint) -> Result<(), InterposeError> {
        if self.fail_at == Some(point) {
            Err(InterposeError::InvalidState("injected failure"))
        } else {
            Ok(())
        }
    }

    fn in_removal(&self) -> bool {
        self.committed > 0
    }
}

impl Interposer for RecordingInterposer {
    fn find_functions(&mut self) -> Result<(), InterposeError> {
        self.record(MockInterposerLog::Find);
        self.check(FailPoint::Find)
    }

    fn begin(&mut self) -> Result<(), InterposeError> {
        self.record(MockInterposerLog::Begin);
        if self.in_removal() {
            self.check(FailPoint::RemovalBegin)
        } else {
            self.check(FailPoint::Begin)
        }
    }

    fn update_threads(&mut self) -> Result<(), InterposeError> {
        self.record(MockInterposerLog::UpdateThreads);
        self.check(FailPoint::UpdateThreads)
    }

    fn attach(&mut self, hook: Hook) -> Result<(), InterposeError> {
        self.record(MockInterposerLog::Attach(hook));
        self.check(FailPoint::Attach(hook))
    }

    fn detach(&mut self, hook: Hook) -> Result<(), InterposeError> {
        self.record(MockInterposerLog::Detach(hook));
        self.check(FailPoint::Detach(hook))
    }

    fn commit(&mut self) -> Result<(), InterposeError> {
        self.record(MockInterposerLog::Commit);
        let point = if self.in_removal() {
            FailPoint::RemovalCommit
        } else {
            FailPoint::Commit
        };
        self.check(point)?;
        self.committed += 1;
        Ok(())
    }

    fn abort(&mut self) {
        self.record(MockInterposerLog::Abort);
    }
}

/// Unloader double that counts calls.
#[derive(Debug, Clone, Default)]
pub struct RecordingUnloader {
    calls: Arc<AtomicUsize>,
}

impl RecordingUnloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ModuleUnloader for RecordingUnloader {
    fn release_and_exit(&mut self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}
