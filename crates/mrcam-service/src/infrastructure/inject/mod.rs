//! Loading the camera module into a driver host.
//!
//! Before every injection the module file is copied to
//! `<file>.implanted` and the copy is loaded, so a host that still holds an
//! earlier copy does not lock the file an installer wants to replace.  If the
//! copy cannot be made the original is loaded instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::application::lifecycle::{InjectError, Injector, WatchedProcess};

pub mod mock;
#[cfg(target_os = "windows")]
pub mod windows;

/// Suffix of the staging copy.
pub const STAGING_SUFFIX: &str = ".implanted";

/// Resolves a relative module path against the service executable's
/// directory.
pub fn resolve_implant_path(file: &Path) -> PathBuf {
    if file.is_absolute() {
        return file.to_path_buf();
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(file)))
        .unwrap_or_else(|| file.to_path_buf())
}

/// Path of the staging copy for `module`.
pub fn staging_path(module: &Path) -> PathBuf {
    let mut name = module.as_os_str().to_os_string();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Copies `module` to its staging path and returns the path to load.
///
/// # Errors
///
/// [`InjectError::ModuleMissing`] if `module` does not exist.
pub fn stage_implant(module: &Path) -> Result<PathBuf, InjectError> {
    if !module.is_file() {
        return Err(InjectError::ModuleMissing(module.to_path_buf()));
    }
    let staged = staging_path(module);
    match std::fs::copy(module, &staged) {
        Ok(_) => {
            debug!(path = %staged.display(), "staged camera module");
            Ok(staged)
        }
        Err(e) => {
            warn!(path = %staged.display(), "staging copy failed, loading original: {e}");
            Ok(module.to_path_buf())
        }
    }
}

/// Injector for platforms without remote module loading.
pub struct UnsupportedInjector;

impl Injector for UnsupportedInjector {
    fn inject(&self, _pid: u32) -> Result<Box<dyn WatchedProcess>, InjectError> {
        Err(InjectError::Unsupported)
    }
}

/// Returns the injector for the current platform.
pub fn platform_injector(module: PathBuf) -> Arc<dyn Injector> {
    #[cfg(target_os = "windows")]
    {
        Arc::new(windows::RemoteLoadInjector::new(module))
    }
    #[cfg(not(target_os = "windows"))]
    {
        debug!(path = %module.display(), "module injection unavailable on this platform");
        Arc::new(UnsupportedInjector)
    }
}
