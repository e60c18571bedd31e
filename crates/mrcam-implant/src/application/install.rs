//! Install/removal state machine for the interposition hooks.
//!
//! Each numbered [`InstallStage`] is reported *before* its action runs, so a
//! failure leaves the segment showing exactly which step broke:
//!
//! ```text
//! install:  1 find ─► 2 begin ─► 3 threads ─► 4 attach completion ─► 5 attach submit ─► 6 commit ─► 7
//! removal:  8 begin ─► 9 detach completion ─► 10 detach submit ─► 11 commit ─► 12
//! ```
//!
//! Stage 3 is best-effort: not every host thread can be enlisted, and the
//! hooks are still safe to attach without it.

use thiserror::Error;
use tracing::{info, warn};

use mrcam_core::InstallStage;

use super::ImplantStatus;

/// The two intercepted entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    /// "Wait for completion": reports the transferred byte count.
    Completion,
    /// "Submit asynchronous read": carries the destination buffer.
    Submit,
}

/// Error reported by an [`Interposer`] capability.
#[derive(Debug, Error)]
pub enum InterposeError {
    #[error("function {symbol} not found in {module}")]
    NotFound {
        module: &'static str,
        symbol: &'static str,
    },

    #[error("no loaded module imports the {0:?} target")]
    NoImporter(Hook),

    #[error("{operation} failed: {source}")]
    Os {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid interposer state: {0}")]
    InvalidState(&'static str),
}

/// Error type for the install state machine.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The action guarded by `stage` failed; the stage value is left in place.
    #[error("stage {stage} failed: {source}")]
    StageFailed {
        stage: InstallStage,
        #[source]
        source: InterposeError,
    },

    /// Removal runs at most once per load.
    #[error("removal was already attempted")]
    RemovalAlreadyAttempted,
}

/// Function interposition primitives, transaction style.
///
/// Attach and detach calls between [`begin`](Self::begin) and
/// [`commit`](Self::commit) take effect together at commit.
#[cfg_attr(test, mockall::automock)]
pub trait Interposer: Send {
    /// Resolves the original entry points.
    fn find_functions(&mut self) -> Result<(), InterposeError>;
    fn begin(&mut self) -> Result<(), InterposeError>;
    /// Enlists the host's other threads in the open transaction.
    fn update_threads(&mut self) -> Result<(), InterposeError>;
    fn attach(&mut self, hook: Hook) -> Result<(), InterposeError>;
    fn detach(&mut self, hook: Hook) -> Result<(), InterposeError>;
    fn commit(&mut self) -> Result<(), InterposeError>;
    /// Drops an open transaction without applying it.
    fn abort(&mut self);
}

/// Drives an [`Interposer`] through the numbered stages.
pub struct HookInstaller<I: Interposer> {
    interposer: I,
    installed: bool,
    removal_attempted: bool,
}

impl<I: Interposer> HookInstaller<I> {
    pub fn new(interposer: I) -> Self {
        Self {
            interposer,
            installed: false,
            removal_attempted: false,
        }
    }

    /// `true` once stage 7 was reached and until removal succeeds.
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn interposer(&self) -> &I {
        &self.interposer
    }

    /// Runs stages 1–7 and reports the outcome through `status`.
    ///
    /// # Errors
    ///
    /// [`InstallError::StageFailed`] naming the stage whose action failed.
    /// `status` then shows that stage and `installed == false`.
    pub fn install(&mut self, status: &dyn ImplantStatus) -> Result<(), InstallError> {
        let result = self.run_install(status);
        match &result {
            Ok(()) => {
                self.installed = true;
                status.set_installed(true);
                info!("hooks installed");
            }
            Err(e) => {
                status.set_installed(false);
                warn!("hook install failed: {e}");
            }
        }
        result
    }

    fn run_install(&mut self, status: &dyn ImplantStatus) -> Result<(), InstallError> {
        let i = &mut self.interposer;

        stage(status, InstallStage::FindFunctions, || i.find_functions())?;
        stage(status, InstallStage::BeginTransaction, || i.begin())?;

        status.set_stage(InstallStage::UpdateThreads);
        if let Err(e) = i.update_threads() {
            warn!("continuing without enlisting host threads: {e}");
        }

        let attached = stage(status, InstallStage::AttachCompletion, || {
            i.attach(Hook::Completion)
        })
        .and_then(|()| stage(status, InstallStage::AttachSubmit, || i.attach(Hook::Submit)))
        .and_then(|()| stage(status, InstallStage::CommitInstall, || i.commit()));

        if attached.is_err() {
            i.abort();
            return attached;
        }

        status.set_stage(InstallStage::Installed);
        Ok(())
    }

    /// Runs stages 8–12 once and reports the outcome through `status`.
    ///
    /// When install never completed there is nothing to detach; removal then
    /// reports success without touching the stage, which keeps the frozen
    /// install stage visible for diagnosis.
    ///
    /// # Errors
    ///
    /// [`InstallError::StageFailed`] when a removal action fails (the
    /// "remove failed" flag is set), or
    /// [`InstallError::RemovalAlreadyAttempted`] on a second call.
    pub fn remove(&mut self, status: &dyn ImplantStatus) -> Result<(), InstallError> {
        if self.removal_attempted {
            return Err(InstallError::RemovalAlreadyAttempted);
        }
        self.removal_attempted = true;

        if !self.installed {
            info!("hooks were never installed; nothing to remove");
            status.set_remove_succeeded();
            return Ok(());
        }

        let result = self.run_removal(status);
        match &result {
            Ok(()) => {
                self.installed = false;
                status.set_remove_succeeded();
                info!("hooks removed");
            }
            Err(e) => {
                status.set_remove_failed();
                warn!("hook removal failed: {e}");
            }
        }
        result
    }

    fn run_removal(&mut self, status: &dyn ImplantStatus) -> Result<(), InstallError> {
        let i = &mut self.interposer;

        stage(status, InstallStage::BeginRemoval, || i.begin())?;
        let detached = stage(status, InstallStage::DetachCompletion, || {
            i.detach(Hook::Completion)
        })
        .and_then(|()| stage(status, InstallStage::DetachSubmit, || i.detach(Hook::Submit)))
        .and_then(|()| stage(status, InstallStage::CommitRemoval, || i.commit()));

        if detached.is_err() {
            i.abort();
            return detached;
        }

        status.set_stage(InstallStage::Removed);
        Ok(())
    }
}

/// Reports `stage`, then runs its action.
fn stage(
    status: &dyn ImplantStatus,
    stage: InstallStage,
    action: impl FnOnce() -> Result<(), InterposeError>,
) -> Result<(), InstallError> {
    status.set_stage(stage);
    action().map_err(|source| InstallError::StageFailed { stage, source })
}
