//! Windows process discovery with Toolhelp32 snapshots.
//!
//! One process snapshot lists candidates by executable name; each candidate
//! then gets a module snapshot of its own.  Module snapshots of processes we
//! cannot open (protected, exiting, other session) fail and the process is
//! skipped.

use tracing::trace;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Module32FirstW, Module32NextW, Process32FirstW, Process32NextW,
    MODULEENTRY32W, PROCESSENTRY32W, TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32, TH32CS_SNAPPROCESS,
};

use super::ProcessMatcher;
use crate::application::lifecycle::{ProcessScanner, ScanError, TargetProcess};

pub struct ToolhelpScanner {
    matcher: ProcessMatcher,
}

impl ToolhelpScanner {
    pub fn new(matcher: ProcessMatcher) -> Self {
        Self { matcher }
    }
}

impl ProcessScanner for ToolhelpScanner {
    fn find_targets(&self) -> Result<Vec<TargetProcess>, ScanError> {
        let mut targets = Vec::new();
        for (pid, name) in host_candidates(&self.matcher)? {
            let Some(modules) = module_paths(pid) else {
                trace!(pid, "module snapshot unavailable");
                continue;
            };
            if let Some(target) = self
                .matcher
                .classify(pid, &name, modules.iter().map(String::as_str))
            {
                targets.push(target);
            }
        }
        Ok(targets)
    }
}

/// `(pid, exe name)` of every process whose name matches the host.
fn host_candidates(matcher: &ProcessMatcher) -> Result<Vec<(u32, String)>, ScanError> {
    // SAFETY: the snapshot handle is closed below.
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }
        .map_err(|e| ScanError::Enumerate(e.into()))?;

    let mut candidates = Vec::new();
    let mut entry = PROCESSENTRY32W {
        dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
        ..Default::default()
    };
    // SAFETY: `entry.dwSize` is initialised as the API requires.
    let mut more = unsafe { Process32FirstW(snapshot, &mut entry) }.is_ok();
    while more {
        let name = wide_to_string(&entry.szExeFile);
        if matcher.is_host_name(&name) {
            candidates.push((entry.th32ProcessID, name));
        }
        // SAFETY: as above.
        more = unsafe { Process32NextW(snapshot, &mut entry) }.is_ok();
    }
    close(snapshot);
    Ok(candidates)
}

/// Full paths of the modules loaded in `pid`, or `None` if the process
/// cannot be inspected.
fn module_paths(pid: u32) -> Option<Vec<String>> {
    // SAFETY: the snapshot handle is closed below.
    let snapshot =
        unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid) }.ok()?;

    let mut modules = Vec::new();
    let mut entry = MODULEENTRY32W {
        dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
        ..Default::default()
    };
    // SAFETY: `entry.dwSize` is initialised as the API requires.
    let mut more = unsafe { Module32FirstW(snapshot, &mut entry) }.is_ok();
    while more {
        modules.push(wide_to_string(&entry.szExePath));
        // SAFETY: as above.
        more = unsafe { Module32NextW(snapshot, &mut entry) }.is_ok();
    }
    close(snapshot);
    Some(modules)
}

fn close(handle: HANDLE) {
    // SAFETY: `handle` came from CreateToolhelp32Snapshot and is closed once.
    unsafe { CloseHandle(handle).ok() };
}

/// Converts a zero-terminated UTF-16 buffer.
fn wide_to_string(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}
