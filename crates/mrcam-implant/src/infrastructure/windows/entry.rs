//! Module entry point, WinUSB replacements, and release-and-exit.
//!
//! On `DLL_PROCESS_ATTACH` the module opens the camera segment and frame
//! event, installs the hooks synchronously, then starts the unload watcher
//! on a raw Win32 thread.  The watcher ends in `FreeLibraryAndExitThread`,
//! so its thread never returns into this module's code.
//!
//! # Safety
//!
//! The replacement functions are called by the host with the exact WinUSB
//! ABI.  All `unsafe` blocks are annotated with `// SAFETY:` comments.

use std::ffi::c_void;
use std::sync::{Arc, OnceLock};

use tracing::warn;
use windows::Win32::Foundation::{BOOL, HMODULE, TRUE};
use windows::Win32::System::LibraryLoader::FreeLibraryAndExitThread;
use windows::Win32::System::SystemServices::DLL_PROCESS_ATTACH;
use windows::Win32::System::Threading::{CreateThread, THREAD_CREATION_FLAGS};

use mrcam_core::protocol::{CAMERA_SEGMENT_NAME, FRAME_EVENT_NAME};
use mrcam_core::{signal, BufferRef, CameraLayout, FrameSignal, InstallStage, SharedSegment};

use super::iat::{ImportPatcher, OriginalFunctions};
use crate::application::install::{Hook, HookInstaller};
use crate::application::intercept::CompletionInterceptor;
use crate::application::unload::{ModuleUnloader, UnloadWatcher};
use crate::application::ImplantStatus;

type ReadPipeFn = unsafe extern "system" fn(
    interface: *mut c_void,
    pipe_id: u8,
    buffer: *mut u8,
    buffer_length: u32,
    length_transferred: *mut u32,
    overlapped: *mut c_void,
) -> BOOL;

type GetOverlappedResultFn = unsafe extern "system" fn(
    interface: *mut c_void,
    overlapped: *mut c_void,
    transferred: *mut u32,
    wait: BOOL,
) -> BOOL;

type Watcher = UnloadWatcher<ImportPatcher, ReleaseAndExit>;

static ORIGINALS: OriginalFunctions = OriginalFunctions::new();
static INTERCEPTOR: OnceLock<CompletionInterceptor> = OnceLock::new();

/// Releases this module with `FreeLibraryAndExitThread`.
struct ReleaseAndExit {
    module: usize,
}

impl ModuleUnloader for ReleaseAndExit {
    fn release_and_exit(&mut self) {
        // SAFETY: `module` is this module's handle, holding the reference
        // taken by the service's remote `LoadLibraryW`.  The call does not
        // return.
        unsafe { FreeLibraryAndExitThread(HMODULE(self.module as *mut c_void), 0) }
    }
}

#[no_mangle]
pub unsafe extern "system" fn DllMain(module: HMODULE, reason: u32, _reserved: *mut c_void) -> BOOL {
    if reason == DLL_PROCESS_ATTACH {
        attach(module);
    }
    TRUE
}

fn attach(module: HMODULE) {
    let segment = match SharedSegment::<CameraLayout>::open(CAMERA_SEGMENT_NAME) {
        Ok(segment) => Arc::new(segment),
        Err(e) => {
            warn!("camera segment unavailable, staying inert: {e}");
            return;
        }
    };
    let layout: &CameraLayout = &segment;
    layout.set_install_stage(InstallStage::Idle);
    layout.set_installed(false);
    layout.set_remove_succeeded(false);
    layout.set_remove_failed(false);

    let frame_signal: Arc<dyn FrameSignal> = match signal::open_named(FRAME_EVENT_NAME) {
        Ok(event) => Arc::from(event),
        Err(e) => {
            warn!("frame event unavailable, staying inert: {e}");
            return;
        }
    };
    if INTERCEPTOR
        .set(CompletionInterceptor::new(segment.clone(), frame_signal))
        .is_err()
    {
        return;
    }

    let patcher = ImportPatcher::new(
        &ORIGINALS,
        hooked_get_overlapped_result as usize,
        hooked_read_pipe as usize,
    );
    let mut installer = HookInstaller::new(patcher);
    // Failure is reported through the segment's stage and installed flag.
    let _ = installer.install(&*segment);

    let status: Arc<dyn ImplantStatus> = segment;
    let watcher = Box::new(Watcher::new(
        installer,
        status,
        ReleaseAndExit {
            module: module.0 as usize,
        },
    ));
    let param = Box::into_raw(watcher);
    // SAFETY: `unload_thread` takes ownership of `param`.
    let spawned = unsafe {
        CreateThread(
            None,
            0,
            Some(unload_thread),
            Some(param.cast_const().cast::<c_void>()),
            THREAD_CREATION_FLAGS(0),
            None,
        )
    };
    match spawned {
        Ok(thread) => {
            // SAFETY: the thread keeps running after its handle is closed.
            unsafe { windows::Win32::Foundation::CloseHandle(thread).ok() };
        }
        Err(e) => {
            warn!("could not start unload watcher: {e}");
            // SAFETY: the thread was never created, so `param` is still ours.
            drop(unsafe { Box::from_raw(param) });
        }
    }
}

unsafe extern "system" fn unload_thread(param: *mut c_void) -> u32 {
    // SAFETY: `param` is the `Box<Watcher>` leaked by `attach`.
    let mut watcher = Box::from_raw(param.cast::<Watcher>());
    watcher.run();
    0
}

fn original<F>(hook: Hook) -> Option<F> {
    // SAFETY: the address was resolved by GetProcAddress for the WinUSB
    // export whose signature `F` describes.
    ORIGINALS
        .get(hook)
        .map(|addr| unsafe { std::mem::transmute_copy::<usize, F>(&addr) })
}

unsafe extern "system" fn hooked_read_pipe(
    interface: *mut c_void,
    pipe_id: u8,
    buffer: *mut u8,
    buffer_length: u32,
    length_transferred: *mut u32,
    overlapped: *mut c_void,
) -> BOOL {
    if let Some(interceptor) = INTERCEPTOR.get() {
        interceptor.on_submit(
            overlapped as usize,
            BufferRef {
                addr: buffer as usize,
                len: buffer_length as usize,
            },
        );
    }
    match original::<ReadPipeFn>(Hook::Submit) {
        Some(read_pipe) => read_pipe(
            interface,
            pipe_id,
            buffer,
            buffer_length,
            length_transferred,
            overlapped,
        ),
        None => BOOL(0),
    }
}

unsafe extern "system" fn hooked_get_overlapped_result(
    interface: *mut c_void,
    overlapped: *mut c_void,
    transferred: *mut u32,
    wait: BOOL,
) -> BOOL {
    let Some(get_result) = original::<GetOverlappedResultFn>(Hook::Completion) else {
        return BOOL(0);
    };
    let mut read_bytes = 0u32;
    let result = get_result(interface, overlapped, &mut read_bytes, wait);

    if let Some(interceptor) = INTERCEPTOR.get() {
        // SAFETY: the host owns the submitted buffer until it has collected
        // this completion.
        interceptor.on_complete(overlapped as usize, read_bytes as usize);
    }

    if !transferred.is_null() {
        *transferred = read_bytes;
    }
    result
}
