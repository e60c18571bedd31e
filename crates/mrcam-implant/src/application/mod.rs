//! Application layer of the injected module.
//!
//! # Sub-modules
//!
//! - **`intercept`** – Correlates submitted reads with their completions and
//!   republishes full camera frames.
//! - **`install`** – The numbered install/removal state machine, driven
//!   through the [`install::Interposer`] capability trait.
//! - **`unload`** – The watcher that turns a removal request into hook
//!   removal followed by the module's own release.

pub mod intercept;
pub mod install;
pub mod unload;

use mrcam_core::{CameraLayout, InstallStage, SharedLayout, SharedSegment};

/// Where the module reports install/removal progress and learns that removal
/// was requested.
pub trait ImplantStatus: Send + Sync {
    fn set_stage(&self, stage: InstallStage);
    fn set_installed(&self, installed: bool);
    fn set_remove_succeeded(&self);
    fn set_remove_failed(&self);
    fn remove_requested(&self) -> bool;
}

impl ImplantStatus for CameraLayout {
    fn set_stage(&self, stage: InstallStage) {
        self.set_install_stage(stage);
    }

    fn set_installed(&self, installed: bool) {
        CameraLayout::set_installed(self, installed);
    }

    fn set_remove_succeeded(&self) {
        CameraLayout::set_remove_succeeded(self, true);
    }

    fn set_remove_failed(&self) {
        CameraLayout::set_remove_failed(self, true);
    }

    fn remove_requested(&self) -> bool {
        CameraLayout::remove_requested(self)
    }
}

impl<L: SharedLayout + ImplantStatus> ImplantStatus for SharedSegment<L> {
    fn set_stage(&self, stage: InstallStage) {
        (**self).set_stage(stage);
    }

    fn set_installed(&self, installed: bool) {
        (**self).set_installed(installed);
    }

    fn set_remove_succeeded(&self) {
        (**self).set_remove_succeeded();
    }

    fn set_remove_failed(&self) {
        (**self).set_remove_failed();
    }

    fn remove_requested(&self) -> bool {
        (**self).remove_requested()
    }
}
