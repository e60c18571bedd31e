//! Install/removal progress as reported through the camera segment.
//!
//! The injected module writes each stage *before* attempting the action it
//! names.  When an action fails nothing further is written, so the value left
//! in the segment names the step that failed.

use std::fmt;

/// Progress of the interposition install and removal.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstallStage {
    /// Nothing attempted yet.
    Idle = 0,
    /// Locating the original read/completion functions.
    FindFunctions = 1,
    /// Opening the interposition transaction.
    BeginTransaction = 2,
    /// Enlisting the host's other threads (failure tolerated).
    UpdateThreads = 3,
    /// Attaching the completion hook.
    AttachCompletion = 4,
    /// Attaching the submit hook.
    AttachSubmit = 5,
    /// Committing the install transaction.
    CommitInstall = 6,
    /// Hooks live.
    Installed = 7,
    /// Opening the removal transaction.
    BeginRemoval = 8,
    /// Detaching the completion hook.
    DetachCompletion = 9,
    /// Detaching the submit hook.
    DetachSubmit = 10,
    /// Committing the removal transaction.
    CommitRemoval = 11,
    /// Hooks removed; the module may unload.
    Removed = 12,
}

impl InstallStage {
    /// Decodes a raw segment value.  Unknown values yield `None`.
    pub fn from_raw(raw: u32) -> Option<Self> {
        use InstallStage::*;
        Some(match raw {
            0 => Idle,
            1 => FindFunctions,
            2 => BeginTransaction,
            3 => UpdateThreads,
            4 => AttachCompletion,
            5 => AttachSubmit,
            6 => CommitInstall,
            7 => Installed,
            8 => BeginRemoval,
            9 => DetachCompletion,
            10 => DetachSubmit,
            11 => CommitRemoval,
            12 => Removed,
            _ => return None,
        })
    }

    /// `true` for the stages that belong to removal.
    pub fn is_removal(self) -> bool {
        self >= InstallStage::BeginRemoval
    }

    /// Short human-readable description for diagnostics.
    pub fn describe(self) -> &'static str {
        match self {
            InstallStage::Idle => "not started",
            InstallStage::FindFunctions => "locating USB read functions",
            InstallStage::BeginTransaction => "opening install transaction",
            InstallStage::UpdateThreads => "enlisting host threads",
            InstallStage::AttachCompletion => "attaching completion hook",
            InstallStage::AttachSubmit => "attaching submit hook",
            InstallStage::CommitInstall => "committing install",
            InstallStage::Installed => "installed",
            InstallStage::BeginRemoval => "opening removal transaction",
            InstallStage::DetachCompletion => "detaching completion hook",
            InstallStage::DetachSubmit => "detaching submit hook",
            InstallStage::CommitRemoval => "committing removal",
            InstallStage::Removed => "removed",
        }
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", *self as u32, self.describe())
    }
}

/// Self-unload progress of the injected module.
///
/// ```text
/// Active ──remove requested──► RemovalRequested ──hooks removed──► Detached ──► Unloading
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadState {
    /// Hooks may be live; the watcher is polling.
    Active,
    /// Removal was requested; the watcher is detaching.
    RemovalRequested,
    /// Hooks are gone; no new calls can enter the module.
    Detached,
    /// The release-and-exit primitive has been invoked.
    Unloading,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_round_trips_every_stage() {
        for raw in 0..=12u32 {
            let stage = InstallStage::from_raw(raw).expect("known stage");
            assert_eq!(stage as u32, raw);
        }
    }

    #[test]
    fn test_from_raw_rejects_unknown_values() {
        assert_eq!(InstallStage::from_raw(13), None);
        assert_eq!(InstallStage::from_raw(u32::MAX), None);
    }

    #[test]
    fn test_removal_stages_start_at_eight() {
        assert!(!InstallStage::Installed.is_removal());
        assert!(InstallStage::BeginRemoval.is_removal());
        assert!(InstallStage::Removed.is_removal());
    }

    #[test]
    fn test_display_includes_number_and_description() {
        assert_eq!(
            InstallStage::AttachSubmit.to_string(),
            "5 (attaching submit hook)"
        );
    }
}
