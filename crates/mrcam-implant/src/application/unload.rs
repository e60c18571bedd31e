//! Two-phase self-unload.
//!
//! Code running inside the injected module cannot unload that module from an
//! arbitrary call stack: the return address would point into unmapped
//! memory.  Instead, a dedicated watcher thread owned by the module waits for
//! the service to set "remove requested", detaches the hooks, and finally
//! calls a primitive that releases the module *and* ends the calling thread
//! in one step, so execution never returns into the module.
//!
//! ```text
//!  Active ──remove requested──► RemovalRequested ──stages 8–12 ok──► Detached ──► Unloading
//!                                      │
//!                                      └─ removal failed: stay resident, stop watching
//! ```
//!
//! A failed removal leaves the hooks live, so the module must stay mapped.
//! The watcher then stops and the module remains loaded until the host exits.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use mrcam_core::UnloadState;

use super::install::{HookInstaller, Interposer};
use super::ImplantStatus;

/// How often the watcher checks the "remove requested" flag.
pub const UNLOAD_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Releases the module and ends the calling thread.
///
/// The production implementation does not return.  Test doubles record the
/// call and return normally.
pub trait ModuleUnloader: Send {
    fn release_and_exit(&mut self);
}

/// Owns the installed hooks and drives the unload state machine.
pub struct UnloadWatcher<I: Interposer, U: ModuleUnloader> {
    installer: HookInstaller<I>,
    status: Arc<dyn ImplantStatus>,
    unloader: U,
    state: UnloadState,
    halted: bool,
    poll_interval: Duration,
}

impl<I: Interposer, U: ModuleUnloader> UnloadWatcher<I, U> {
    pub fn new(installer: HookInstaller<I>, status: Arc<dyn ImplantStatus>, unloader: U) -> Self {
        Self {
            installer,
            status,
            unloader,
            state: UnloadState::Active,
            halted: false,
            poll_interval: UNLOAD_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn state(&self) -> UnloadState {
        self.state
    }

    /// `true` when removal failed and the watcher gave up.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn installer(&self) -> &HookInstaller<I> {
        &self.installer
    }

    /// Advances the state machine by at most one transition.
    pub fn poll(&mut self) -> UnloadState {
        if self.halted {
            return self.state;
        }

        self.state = match self.state {
            UnloadState::Active if self.status.remove_requested() => {
                info!("removal requested");
                UnloadState::RemovalRequested
            }
            UnloadState::Active => UnloadState::Active,
            UnloadState::RemovalRequested => match self.installer.remove(&*self.status) {
                Ok(()) => UnloadState::Detached,
                Err(e) => {
                    warn!("staying resident, removal did not complete: {e}");
                    self.halted = true;
                    UnloadState::RemovalRequested
                }
            },
            UnloadState::Detached => {
                debug!("releasing module");
                self.unloader.release_and_exit();
                UnloadState::Unloading
            }
            UnloadState::Unloading => UnloadState::Unloading,
        };
        self.state
    }

    /// Polls until the module unloads or the watcher halts.
    pub fn run(&mut self) -> UnloadState {
        loop {
            let before = self.state;
            let after = self.poll();
            if after == UnloadState::Unloading || self.halted {
                return after;
            }
            if after == before {
                thread::sleep(self.poll_interval);
            }
        }
    }
}
