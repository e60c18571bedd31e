//! The lifecycle manager: a single background loop reconciling "the consumer
//! wants frames" with "the camera module is loaded in the driver host".
//!
//! # One cycle (for beginners)
//!
//! ```text
//! enable flag set? ──no──► sleep
//!        │yes
//!        ▼
//! scan for driver hosts ──► first host without the module ──► inject
//!        │                                                      │
//!        │                          installed flag false ◄──────┤ (log frozen stage)
//!        │                                                      ▼
//!        │                        watch host until it exits or the flag clears
//!        │                                                      │
//!        │                               set "remove requested", wait ≤ 1 s
//!        ▼                                                      ▼
//! sleep up to 50 × 100 ms, cut short by termination or the enable flag
//! ```
//!
//! The remediation counter is checked on every 100 ms tick, both while
//! sleeping and while watching, and the hub power fix runs once per observed
//! change no matter how many requests were made in between.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use mrcam_core::{CameraLayout, InstallStage, SharedSegment};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Error type for process discovery.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("process enumeration failed: {0}")]
    Enumerate(#[source] std::io::Error),

    #[error("process scanning is not supported on this platform")]
    Unsupported,
}

/// Error type for loading the camera module into a host process.
#[derive(Debug, Error)]
pub enum InjectError {
    #[error("camera module not found at {0}")]
    ModuleMissing(std::path::PathBuf),

    #[error("could not open process {pid}: {source}")]
    OpenProcess {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("remote load in process {pid} failed: {source}")]
    RemoteLoad {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("remote load in process {pid} did not finish in time")]
    Timeout { pid: u32 },

    #[error("module injection is not supported on this platform")]
    Unsupported,
}

// ── Capabilities ──────────────────────────────────────────────────────────────

/// A running instance of the driver host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetProcess {
    pub pid: u32,
    pub name: String,
    /// The camera module is already loaded in this process.
    pub has_implant: bool,
}

/// Enumerates driver host processes.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessScanner: Send + Sync {
    fn find_targets(&self) -> Result<Vec<TargetProcess>, ScanError>;
}

/// A process the module was injected into.
pub trait WatchedProcess: Send {
    /// Waits up to `timeout` for the process to exit.  Returns `true` once it
    /// has exited.
    fn wait_exit(&self, timeout: Duration) -> bool;
}

/// Loads the camera module into a process.
#[cfg_attr(test, mockall::automock)]
pub trait Injector: Send + Sync {
    /// Returns once the module's entry point has run, i.e. once the install
    /// stage and installed flag are final.
    fn inject(&self, pid: u32) -> Result<Box<dyn WatchedProcess>, InjectError>;
}

/// Applies the USB hub power fix.
#[cfg_attr(test, mockall::automock)]
pub trait HubPowerRemediator: Send + Sync {
    fn remediate(&self);
}

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// How a removal request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    Succeeded,
    Failed,
    ProcessExited,
    TimedOut,
    Interrupted,
}

/// What one scan cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The consumer has not asked for frames.
    Disabled,
    ScanFailed,
    /// No driver host without the module is running.
    NoTarget,
    InjectFailed { pid: u32 },
    /// The module loaded but could not install; `stage` is the frozen value.
    InstallFailed { pid: u32, stage: u32 },
    /// The module ran and removal was requested afterwards.
    Completed { pid: u32, removal: RemovalOutcome },
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Granularity of every wait in the loop.
    pub tick: Duration,
    /// Ticks slept between scans while the enable flag is clear.
    pub scan_ticks: u32,
    /// How long to wait for the module to report removal.
    pub removal_timeout: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            scan_ticks: 50,
            removal_timeout: Duration::from_secs(1),
        }
    }
}

// ── LifecycleManager ──────────────────────────────────────────────────────────

/// Drives discovery, injection, watching, removal, and remediation.
pub struct LifecycleManager {
    camera: Arc<SharedSegment<CameraLayout>>,
    scanner: Arc<dyn ProcessScanner>,
    injector: Arc<dyn Injector>,
    remediator: Arc<dyn HubPowerRemediator>,
    settings: LifecycleSettings,
    terminated: Arc<AtomicBool>,
    /// Last remediation counter value acted upon.
    remediation_epoch: u32,
}

impl LifecycleManager {
    pub fn new(
        camera: Arc<SharedSegment<CameraLayout>>,
        scanner: Arc<dyn ProcessScanner>,
        injector: Arc<dyn Injector>,
        remediator: Arc<dyn HubPowerRemediator>,
        settings: LifecycleSettings,
    ) -> Self {
        let remediation_epoch = camera.remediation_epoch();
        Self {
            camera,
            scanner,
            injector,
            remediator,
            settings,
            terminated: Arc::new(AtomicBool::new(false)),
            remediation_epoch,
        }
    }

    /// Flag that ends [`run`](Self::run) and cuts every wait short.
    pub fn terminate_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminated)
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Runs the hub power fix once if the remediation counter moved.
    ///
    /// Returns `true` when the fix ran.
    pub fn check_remediation(&mut self) -> bool {
        let live = self.camera.remediation_epoch();
        if live == self.remediation_epoch {
            return false;
        }
        info!(
            requests = live.wrapping_sub(self.remediation_epoch),
            "applying USB hub power fix"
        );
        self.remediation_epoch = live;
        self.remediator.remediate();
        true
    }

    /// Runs the loop until terminated.
    pub fn run(&mut self) {
        debug!("lifecycle loop started");
        while !self.is_terminated() {
            let outcome = self.run_cycle();
            debug!(?outcome, "cycle finished");

            for _ in 0..self.settings.scan_ticks {
                thread::sleep(self.settings.tick);
                if self.is_terminated() || self.camera.hook_enabled() {
                    break;
                }
                self.check_remediation();
            }
        }
        debug!("lifecycle loop terminated");
    }

    /// Performs one scan/inject/watch/remove cycle.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        if !self.camera.hook_enabled() {
            return CycleOutcome::Disabled;
        }

        let targets = match self.scanner.find_targets() {
            Ok(targets) => targets,
            Err(e) => {
                error!("driver host scan failed: {e}");
                return CycleOutcome::ScanFailed;
            }
        };
        let Some(target) = targets.into_iter().find(|t| !t.has_implant) else {
            return CycleOutcome::NoTarget;
        };

        info!(pid = target.pid, name = %target.name, "injecting camera module");
        self.inject_and_watch(target.pid)
    }

    fn inject_and_watch(&mut self, pid: u32) -> CycleOutcome {
        self.camera.reset_install_state();

        let process = match self.injector.inject(pid) {
            Ok(process) => process,
            Err(e) => {
                error!(pid, "injection failed: {e}");
                return CycleOutcome::InjectFailed { pid };
            }
        };

        if !self.camera.installed() {
            let raw = self.camera.install_stage_raw();
            match InstallStage::from_raw(raw) {
                Some(stage) => error!(pid, "module reports install failure at stage {stage}"),
                None => error!(pid, "module reports install failure at unknown stage {raw}"),
            }
            // A failed install never attached anything; removal just
            // releases the module.
            self.camera.set_remove_requested(true);
            return CycleOutcome::InstallFailed { pid, stage: raw };
        }

        info!(pid, "camera module installed");
        let mut exited = false;
        while !self.is_terminated() && self.camera.hook_enabled() {
            if process.wait_exit(self.settings.tick) {
                info!(pid, "watched process terminated");
                exited = true;
                break;
            }
            self.check_remediation();
        }

        let removal = if exited {
            self.camera.set_remove_requested(true);
            RemovalOutcome::ProcessExited
        } else {
            self.request_removal(process.as_ref())
        };
        CycleOutcome::Completed { pid, removal }
    }

    fn request_removal(&self, process: &dyn WatchedProcess) -> RemovalOutcome {
        self.camera.set_remove_requested(true);

        let deadline = Instant::now() + self.settings.removal_timeout;
        loop {
            if self.is_terminated() {
                return RemovalOutcome::Interrupted;
            }
            if self.camera.remove_failed() {
                error!("module reports removal failure");
                return RemovalOutcome::Failed;
            }
            if self.camera.remove_succeeded() {
                info!("module reports removal success");
                return RemovalOutcome::Succeeded;
            }
            if Instant::now() >= deadline {
                warn!("module did not report removal in time");
                return RemovalOutcome::TimedOut;
            }
            if process.wait_exit(self.settings.tick) {
                info!("watched process terminated");
                return RemovalOutcome::ProcessExited;
            }
        }
    }
}

// ── ServiceHandle ─────────────────────────────────────────────────────────────

/// The lifecycle loop running on its own thread.
pub struct ServiceHandle {
    camera: Arc<SharedSegment<CameraLayout>>,
    terminated: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Starts `manager` on a thread named `mrcam-injector`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn start(mut manager: LifecycleManager) -> std::io::Result<Self> {
        let camera = Arc::clone(&manager.camera);
        let terminated = manager.terminate_flag();
        let thread = thread::Builder::new()
            .name("mrcam-injector".to_string())
            .spawn(move || manager.run())?;
        Ok(Self {
            camera,
            terminated,
            thread: Some(thread),
        })
    }

    /// Ends the loop, waits for it, and asks any loaded module to remove
    /// itself.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.terminated.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("lifecycle thread panicked");
            }
            self.camera.set_remove_requested(true);
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
