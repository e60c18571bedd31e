//! Driver host discovery.
//!
//! Each platform backend enumerates processes and their loaded modules, and
//! hands both to [`ProcessMatcher`], which decides whether a process is a
//! driver host and whether the camera module is already loaded in it.
//!
//! | Platform | Backend                               |
//! |----------|---------------------------------------|
//! | Windows  | `windows::ToolhelpScanner` (Toolhelp32 snapshots) |
//! | Linux    | `procfs::ProcfsScanner` (`/proc/<pid>/comm` and `maps`) |
//! | other    | [`UnsupportedScanner`]                 |

use std::path::Path;
use std::sync::Arc;

use crate::application::lifecycle::{ProcessScanner, ScanError, TargetProcess};
use crate::infrastructure::storage::config::TargetSection;

pub mod mock;
#[cfg(target_os = "linux")]
pub mod procfs;
#[cfg(target_os = "windows")]
pub mod windows;

/// Classifies processes by name and loaded modules.
///
/// All comparisons are ASCII case-insensitive substring matches, so
/// `"WUDFHost"` matches `WUDFHost.exe` and `"MRUSBHost"` matches
/// `C:\Windows\System32\drivers\UMDF\MRUSBHost.dll`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMatcher {
    host_process: String,
    driver_module: String,
    implant_module: String,
}

impl ProcessMatcher {
    pub fn new(host_process: &str, driver_module: &str, implant_module: &str) -> Self {
        Self {
            host_process: host_process.to_ascii_lowercase(),
            driver_module: driver_module.to_ascii_lowercase(),
            implant_module: implant_module.to_ascii_lowercase(),
        }
    }

    /// Builds a matcher from the `[target]` config section.
    ///
    /// The implant is recognised by its file stem, which covers both the
    /// module itself and its `.implanted` staging copy.
    pub fn from_config(target: &TargetSection) -> Self {
        let stem = target
            .implant_file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        Self::new(&target.host_process, &target.driver_module, stem)
    }

    /// `true` if a process called `name` could be a driver host.
    pub fn is_host_name(&self, name: &str) -> bool {
        name.to_ascii_lowercase().contains(&self.host_process)
    }

    /// Returns the target if `modules` include the driver module.
    pub fn classify<'a>(
        &self,
        pid: u32,
        name: &str,
        modules: impl IntoIterator<Item = &'a str>,
    ) -> Option<TargetProcess> {
        let mut has_driver = false;
        let mut has_implant = false;
        for module in modules {
            let file = Path::new(module)
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or(module)
                .to_ascii_lowercase();
            has_driver |= file.contains(&self.driver_module);
            has_implant |= !self.implant_module.is_empty() && file.contains(&self.implant_module);
        }
        has_driver.then(|| TargetProcess {
            pid,
            name: name.to_string(),
            has_implant,
        })
    }
}

/// Scanner for platforms without a process backend.
pub struct UnsupportedScanner;

impl ProcessScanner for UnsupportedScanner {
    fn find_targets(&self) -> Result<Vec<TargetProcess>, ScanError> {
        Err(ScanError::Unsupported)
    }
}

/// Returns the process scanner for the current platform.
pub fn platform_scanner(matcher: ProcessMatcher) -> Arc<dyn ProcessScanner> {
    #[cfg(target_os = "windows")]
    {
        Arc::new(windows::ToolhelpScanner::new(matcher))
    }
    #[cfg(target_os = "linux")]
    {
        Arc::new(procfs::ProcfsScanner::new(matcher))
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        let _ = matcher;
        Arc::new(UnsupportedScanner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> ProcessMatcher {
        ProcessMatcher::new("WUDFHost", "MRUSBHost", "mrcam_implant")
    }

    #[test]
    fn test_host_name_match_is_case_insensitive() {
        assert!(matcher().is_host_name("wudfhost.exe"));
        assert!(matcher().is_host_name("WUDFHost.exe"));
        assert!(!matcher().is_host_name("explorer.exe"));
    }

    #[test]
    fn test_process_without_driver_module_is_not_a_target() {
        let modules = [r"C:\Windows\System32\ntdll.dll", r"C:\Windows\System32\kernel32.dll"];
        assert!(matcher().classify(4, "WUDFHost.exe", modules).is_none());
    }

    #[test]
    fn test_process_with_driver_module_is_a_target() {
        // Arrange
        let modules = [r"C:\Windows\System32\drivers\UMDF\MRUSBHost.dll"];

        // Act
        let target = matcher().classify(4, "WUDFHost.exe", modules);

        // Assert
        assert_eq!(
            target,
            Some(TargetProcess {
                pid: 4,
                name: "WUDFHost.exe".to_string(),
                has_implant: false,
            })
        );
    }

    #[test]
    fn test_staging_copy_counts_as_loaded_implant() {
        let modules = [
            "MRUSBHost.dll",
            r"C:\Program Files\mrcam\mrcam_implant.dll.implanted",
        ];
        let target = matcher().classify(9, "WUDFHost.exe", modules).expect("target");
        assert!(target.has_implant);
    }

    #[test]
    fn test_matcher_from_config_uses_implant_file_stem() {
        let target = TargetSection::default();
        let matcher = ProcessMatcher::from_config(&target);
        let found = matcher
            .classify(1, "WUDFHost.exe", ["MRUSBHost.dll", "mrcam_implant.dll"])
            .expect("target");
        assert!(found.has_implant);
    }

    #[test]
    fn test_unsupported_scanner_reports_unsupported() {
        assert!(matches!(
            UnsupportedScanner.find_targets(),
            Err(ScanError::Unsupported)
        ));
    }
}
