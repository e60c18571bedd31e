//! Linux process discovery through `/proc`.
//!
//! The process name comes from `/proc/<pid>/comm`; loaded modules are the
//! file-backed paths in `/proc/<pid>/maps`.  Processes that vanish or deny
//! access mid-scan are skipped.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use super::ProcessMatcher;
use crate::application::lifecycle::{ProcessScanner, ScanError, TargetProcess};

pub struct ProcfsScanner {
    matcher: ProcessMatcher,
    root: PathBuf,
}

impl ProcfsScanner {
    pub fn new(matcher: ProcessMatcher) -> Self {
        Self::with_root(matcher, PathBuf::from("/proc"))
    }

    /// Scans a `/proc`-shaped tree at `root`.
    pub fn with_root(matcher: ProcessMatcher, root: PathBuf) -> Self {
        Self { matcher, root }
    }

    fn inspect(&self, pid: u32, dir: &Path) -> Option<TargetProcess> {
        let name = fs::read_to_string(dir.join("comm")).ok()?;
        let name = name.trim_end();
        if !self.matcher.is_host_name(name) {
            return None;
        }
        let maps = fs::read_to_string(dir.join("maps")).ok()?;
        let modules = mapped_files(&maps);
        trace!(pid, modules = modules.len(), "inspected host candidate");
        self.matcher
            .classify(pid, name, modules.iter().map(String::as_str))
    }
}

impl ProcessScanner for ProcfsScanner {
    fn find_targets(&self) -> Result<Vec<TargetProcess>, ScanError> {
        let mut targets = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(ScanError::Enumerate)? {
            let Ok(entry) = entry else { continue };
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            if let Some(target) = self.inspect(pid, &entry.path()) {
                targets.push(target);
            }
        }
        targets.sort_by_key(|t| t.pid);
        Ok(targets)
    }
}

/// Distinct file paths in a `maps` listing.
fn mapped_files(maps: &str) -> BTreeSet<String> {
    maps.lines()
        .filter_map(|line| line.split_whitespace().nth(5))
        .filter(|path| path.starts_with('/'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn fake_proc(entries: &[(u32, &str, &str)]) -> PathBuf {
        let root = std::env::temp_dir().join(format!("mrcam_proc_{}", Uuid::new_v4()));
        for (pid, comm, maps) in entries {
            let dir = root.join(pid.to_string());
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("comm"), format!("{comm}\n")).unwrap();
            fs::write(dir.join("maps"), maps).unwrap();
        }
        fs::create_dir_all(root.join("self")).unwrap();
        root
    }

    #[test]
    fn test_mapped_files_skips_anonymous_regions() {
        let maps = "\
7f00-7f01 r-xp 00000000 08:01 42 /usr/lib/MRUSBHost.so
7f01-7f02 rw-p 00000000 00:00 0 
7f02-7f03 rw-p 00000000 00:00 0 [heap]
7f03-7f04 r--p 00001000 08:01 42 /usr/lib/MRUSBHost.so
";
        let files = mapped_files(maps);
        assert_eq!(files.len(), 1);
        assert!(files.contains("/usr/lib/MRUSBHost.so"));
    }

    #[test]
    fn test_scanner_finds_hosts_with_driver_module() {
        // Arrange
        let root = fake_proc(&[
            (300, "WUDFHost", "0-1 r-xp 0 0:0 1 /opt/MRUSBHost.so\n"),
            (200, "WUDFHost", "0-1 r-xp 0 0:0 1 /opt/other.so\n"),
            (100, "bash", "0-1 r-xp 0 0:0 1 /opt/MRUSBHost.so\n"),
            (
                400,
                "WUDFHost",
                "0-1 r-xp 0 0:0 1 /opt/MRUSBHost.so\n0-1 r-xp 0 0:0 1 /opt/mrcam_implant.so\n",
            ),
        ]);
        let scanner = ProcfsScanner::with_root(
            ProcessMatcher::new("WUDFHost", "MRUSBHost", "mrcam_implant"),
            root.clone(),
        );

        // Act
        let targets = scanner.find_targets().expect("scan");

        // Assert
        let pids: Vec<(u32, bool)> = targets.iter().map(|t| (t.pid, t.has_implant)).collect();
        assert_eq!(pids, vec![(300, false), (400, true)]);

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_missing_root_is_an_enumeration_error() {
        let scanner = ProcfsScanner::with_root(
            ProcessMatcher::new("a", "b", "c"),
            PathBuf::from("/nonexistent/proc/root"),
        );
        assert!(matches!(
            scanner.find_targets(),
            Err(ScanError::Enumerate(_))
        ));
    }
}
