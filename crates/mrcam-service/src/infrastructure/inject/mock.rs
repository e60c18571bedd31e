//! Scripted injector for tests.
//!
//! Instead of loading a real module, [`ScriptedInjector`] plays the module's
//! part on the camera segment: it sets the install stage and installed flag
//! the way the module's entry point would, and a background thread answers
//! the removal request the way the module's unload watcher would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use mrcam_core::{CameraLayout, InstallStage, SharedSegment};

use crate::application::lifecycle::{InjectError, Injector, WatchedProcess};

/// What the simulated module does once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleScript {
    /// Installs, then removes itself cleanly when asked.
    Cooperative,
    /// Freezes at `stage` during install.
    FailInstall(InstallStage),
    /// Installs, then reports removal failure when asked.
    FailRemoval,
    /// Installs, then never answers the removal request.
    Silent,
    /// The load itself fails.
    RefuseLoad,
}

/// Simulated process that exits when its flag is set.
#[derive(Clone, Default)]
pub struct ScriptedProcess {
    exited: Arc<AtomicBool>,
}

impl ScriptedProcess {
    /// Makes the process exit.
    pub fn exit(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }
}

impl WatchedProcess for ScriptedProcess {
    fn wait_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.exited.load(Ordering::SeqCst) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

pub struct ScriptedInjector {
    camera: Arc<SharedSegment<CameraLayout>>,
    script: ModuleScript,
    process: ScriptedProcess,
    injected: Mutex<Vec<u32>>,
}

impl ScriptedInjector {
    pub fn new(camera: Arc<SharedSegment<CameraLayout>>, script: ModuleScript) -> Self {
        Self {
            camera,
            script,
            process: ScriptedProcess::default(),
            injected: Mutex::new(Vec::new()),
        }
    }

    /// Handle to the process every injection returns.
    pub fn process(&self) -> ScriptedProcess {
        self.process.clone()
    }

    /// Pids passed to `inject`, in call order.
    pub fn injected(&self) -> Vec<u32> {
        self.injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn spawn_remover(&self, succeed: bool) {
        let camera = Arc::clone(&self.camera);
        let process = self.process.clone();
        thread::spawn(move || {
            while !camera.remove_requested() {
                if process.exited.load(Ordering::SeqCst) {
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            if succeed {
                camera.set_install_stage(InstallStage::Removed);
                camera.set_remove_succeeded(true);
            } else {
                camera.set_install_stage(InstallStage::DetachCompletion);
                camera.set_remove_failed(true);
            }
        });
    }
}

impl Injector for ScriptedInjector {
    fn inject(&self, pid: u32) -> Result<Box<dyn WatchedProcess>, InjectError> {
        self.injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pid);

        match self.script {
            ModuleScript::RefuseLoad => {
                return Err(InjectError::RemoteLoad {
                    pid,
                    source: std::io::Error::other("scripted load failure"),
                })
            }
            ModuleScript::FailInstall(stage) => {
                self.camera.set_install_stage(stage);
                self.camera.set_installed(false);
            }
            ModuleScript::Cooperative | ModuleScript::FailRemoval | ModuleScript::Silent => {
                self.camera.set_install_stage(InstallStage::Installed);
                self.camera.set_installed(true);
                match self.script {
                    ModuleScript::Cooperative => self.spawn_remover(true),
                    ModuleScript::FailRemoval => self.spawn_remover(false),
                    _ => {}
                }
            }
        }
        Ok(Box::new(self.process.clone()))
    }
}
