//! Remote `LoadLibraryW` injection.
//!
//! The module path is written into the target with `WriteProcessMemory` and
//! a remote thread is started at `kernel32!LoadLibraryW`.  kernel32 is mapped
//! at the same address in every process of a session, so the service's own
//! `LoadLibraryW` address is valid in the target.  The call returns once the
//! module's entry point has finished, which is when install has either
//! completed or frozen at a stage.

use std::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use windows::core::{s, w, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, LUID, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Security::{
    AdjustTokenPrivileges, LookupPrivilegeValueW, LUID_AND_ATTRIBUTES, SE_DEBUG_NAME,
    SE_PRIVILEGE_ENABLED, TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY,
};
use windows::Win32::System::Diagnostics::Debug::WriteProcessMemory;
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows::Win32::System::Memory::{
    VirtualAllocEx, VirtualFreeEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};
use windows::Win32::System::Threading::{
    CreateRemoteThread, GetCurrentProcess, GetExitCodeThread, OpenProcess, OpenProcessToken,
    WaitForSingleObject, LPTHREAD_START_ROUTINE, PROCESS_CREATE_THREAD,
    PROCESS_QUERY_INFORMATION, PROCESS_SYNCHRONIZE, PROCESS_VM_OPERATION, PROCESS_VM_READ,
    PROCESS_VM_WRITE,
};

use super::stage_implant;
use crate::application::lifecycle::{InjectError, Injector, WatchedProcess};

/// How long the remote `LoadLibraryW` call may take.
const REMOTE_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RemoteLoadInjector {
    module: PathBuf,
}

impl RemoteLoadInjector {
    /// Creates the injector and enables `SeDebugPrivilege` for the service
    /// process; driver hosts run under a different account.
    pub fn new(module: PathBuf) -> Self {
        match enable_debug_privilege() {
            Ok(()) => debug!("SeDebugPrivilege enabled"),
            Err(e) => warn!("could not enable SeDebugPrivilege: {e}"),
        }
        Self { module }
    }
}

impl Injector for RemoteLoadInjector {
    fn inject(&self, pid: u32) -> Result<Box<dyn WatchedProcess>, InjectError> {
        let path = stage_implant(&self.module)?;

        // SAFETY: plain Win32 call; the handle is owned by `OwnedProcess`.
        let handle = unsafe {
            OpenProcess(
                PROCESS_CREATE_THREAD
                    | PROCESS_QUERY_INFORMATION
                    | PROCESS_VM_OPERATION
                    | PROCESS_VM_READ
                    | PROCESS_VM_WRITE
                    | PROCESS_SYNCHRONIZE,
                false,
                pid,
            )
        }
        .map_err(|e| InjectError::OpenProcess {
            pid,
            source: e.into(),
        })?;
        let process = OwnedProcess(handle);

        // SAFETY: `process` is open with the rights remote_load needs.
        unsafe { remote_load(process.0, pid, &path) }?;
        info!(pid, path = %path.display(), "camera module loaded");
        Ok(Box::new(process))
    }
}

/// A process handle opened for injection, kept to watch for exit.
struct OwnedProcess(HANDLE);

// SAFETY: process handles are usable from any thread.
unsafe impl Send for OwnedProcess {}

impl WatchedProcess for OwnedProcess {
    fn wait_exit(&self, timeout: Duration) -> bool {
        let ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        // SAFETY: the handle stays open for the lifetime of `self`.
        unsafe { WaitForSingleObject(self.0, ms) == WAIT_OBJECT_0 }
    }
}

impl Drop for OwnedProcess {
    fn drop(&mut self) {
        // SAFETY: closed exactly once.
        unsafe { CloseHandle(self.0).ok() };
    }
}

fn remote_error(pid: u32, e: impl Into<std::io::Error>) -> InjectError {
    InjectError::RemoteLoad {
        pid,
        source: e.into(),
    }
}

/// Runs `LoadLibraryW(path)` on a new thread inside `process`.
///
/// # Safety
///
/// `process` must be a valid handle with thread-creation and VM rights.
unsafe fn remote_load(process: HANDLE, pid: u32, path: &Path) -> Result<(), InjectError> {
    let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
    let bytes = wide.len() * std::mem::size_of::<u16>();

    let remote = VirtualAllocEx(process, None, bytes, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE);
    if remote.is_null() {
        return Err(remote_error(pid, std::io::Error::last_os_error()));
    }

    let result = start_loader(process, pid, remote, &wide, bytes);
    // A thread that is still running may yet read the path.
    if !matches!(result, Err(InjectError::Timeout { .. })) {
        VirtualFreeEx(process, remote, 0, MEM_RELEASE).ok();
    }
    result
}

unsafe fn start_loader(
    process: HANDLE,
    pid: u32,
    remote: *mut c_void,
    wide: &[u16],
    bytes: usize,
) -> Result<(), InjectError> {
    WriteProcessMemory(process, remote, wide.as_ptr().cast(), bytes, None)
        .map_err(|e| remote_error(pid, e))?;

    let kernel32 = GetModuleHandleW(w!("kernel32.dll")).map_err(|e| remote_error(pid, e))?;
    let load_library = GetProcAddress(kernel32, s!("LoadLibraryW")).ok_or_else(|| {
        remote_error(
            pid,
            std::io::Error::new(std::io::ErrorKind::NotFound, "LoadLibraryW not exported"),
        )
    })?;
    // SAFETY: LoadLibraryW has the thread-start shape: one pointer argument,
    // pointer-sized return.
    let start: LPTHREAD_START_ROUTINE = Some(std::mem::transmute(load_library));

    let thread = CreateRemoteThread(process, None, 0, start, Some(remote.cast_const()), 0, None)
        .map_err(|e| remote_error(pid, e))?;

    let waited = WaitForSingleObject(thread, REMOTE_LOAD_TIMEOUT.as_millis() as u32);
    let outcome = if waited == WAIT_TIMEOUT {
        Err(InjectError::Timeout { pid })
    } else {
        let mut exit_code = 0u32;
        match GetExitCodeThread(thread, &mut exit_code) {
            // The exit code is the low half of the returned module handle.
            Ok(()) if exit_code != 0 => Ok(()),
            Ok(()) => Err(remote_error(
                pid,
                std::io::Error::other("LoadLibraryW returned NULL in the target"),
            )),
            Err(e) => Err(remote_error(pid, e)),
        }
    };
    CloseHandle(thread).ok();
    outcome
}

/// Enables `SeDebugPrivilege` on the current process token.
fn enable_debug_privilege() -> windows::core::Result<()> {
    let mut token = HANDLE::default();
    // SAFETY: plain Win32 calls on the current process token, closed below.
    unsafe {
        OpenProcessToken(
            GetCurrentProcess(),
            TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
            &mut token,
        )?;
        let mut luid = LUID::default();
        let result = LookupPrivilegeValueW(PCWSTR::null(), SE_DEBUG_NAME, &mut luid).and_then(
            |()| {
                let privileges = TOKEN_PRIVILEGES {
                    PrivilegeCount: 1,
                    Privileges: [LUID_AND_ATTRIBUTES {
                        Luid: luid,
                        Attributes: SE_PRIVILEGE_ENABLED,
                    }],
                };
                AdjustTokenPrivileges(
                    token,
                    false,
                    Some(&privileges as *const TOKEN_PRIVILEGES),
                    0,
                    None,
                    None,
                )
            },
        );
        CloseHandle(token).ok();
        result
    }
}
