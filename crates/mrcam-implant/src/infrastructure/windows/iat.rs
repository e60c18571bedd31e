//! Import-address-table interposition.
//!
//! The USB driver host calls WinUSB through the import tables of whichever
//! modules link against `winusb.dll`.  Redirecting a hook therefore means
//! rewriting every import slot that holds the original function's address.
//!
//! # Transactions
//!
//! `attach`/`detach` only queue slot writes; `commit` applies them all while
//! the host's other threads are suspended (when `update_threads` managed to
//! enlist them) and `abort` discards them.  A write that fails mid-commit
//! puts the slots already written back to their previous values.  Slots are located during
//! `find_functions`, before any thread is suspended, and the queue is
//! reserved in `begin`: a suspended thread may own the process heap lock, so
//! nothing between suspend and resume allocates.
//!
//! # Safety
//!
//! This module reads PE headers of modules mapped into the current process
//! and rewrites import slots.  All `unsafe` blocks are annotated with
//! `// SAFETY:` comments.

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, warn};
use windows::core::{s, w, PCSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Module32FirstW, Module32NextW, Thread32First, Thread32Next,
    MODULEENTRY32W, TH32CS_SNAPMODULE, TH32CS_SNAPTHREAD, THREADENTRY32,
};
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows::Win32::System::Memory::{VirtualProtect, PAGE_PROTECTION_FLAGS, PAGE_READWRITE};
use windows::Win32::System::Threading::{
    GetCurrentProcessId, GetCurrentThreadId, OpenThread, ResumeThread, SuspendThread,
    THREAD_SUSPEND_RESUME,
};

use crate::application::install::{Hook, InterposeError, Interposer};
use crate::infrastructure::slots::{apply_all, SlotMemory, SlotWrite};

const WINUSB_MODULE: &str = "winusb.dll";

/// Image directory index of the import table.
const IMPORT_DIRECTORY: usize = 1;
const IMPORT_DESCRIPTOR_BYTES: usize = 20;
const PE32_PLUS_MAGIC: u16 = 0x20b;

/// Addresses of the original WinUSB functions, read by the replacements.
pub struct OriginalFunctions {
    completion: AtomicUsize,
    submit: AtomicUsize,
}

impl OriginalFunctions {
    pub const fn new() -> Self {
        Self {
            completion: AtomicUsize::new(0),
            submit: AtomicUsize::new(0),
        }
    }

    fn slot(&self, hook: Hook) -> &AtomicUsize {
        match hook {
            Hook::Completion => &self.completion,
            Hook::Submit => &self.submit,
        }
    }

    /// Address of the original function, or `None` before it was resolved.
    pub fn get(&self, hook: Hook) -> Option<usize> {
        match self.slot(hook).load(Ordering::Acquire) {
            0 => None,
            addr => Some(addr),
        }
    }
}

impl Default for OriginalFunctions {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Interposer`] that rewrites WinUSB import slots in every loaded module.
pub struct ImportPatcher {
    originals: &'static OriginalFunctions,
    completion_replacement: usize,
    submit_replacement: usize,
    completion_slots: Vec<usize>,
    submit_slots: Vec<usize>,
    pending: Vec<SlotWrite>,
    undo: Vec<SlotWrite>,
    suspended: Vec<HANDLE>,
    open: bool,
}

// SAFETY: the suspended thread handles are only used by the thread that
// owns the patcher.
unsafe impl Send for ImportPatcher {}

impl ImportPatcher {
    pub fn new(
        originals: &'static OriginalFunctions,
        completion_replacement: usize,
        submit_replacement: usize,
    ) -> Self {
        Self {
            originals,
            completion_replacement,
            submit_replacement,
            completion_slots: Vec::new(),
            submit_slots: Vec::new(),
            pending: Vec::new(),
            undo: Vec::new(),
            suspended: Vec::new(),
            open: false,
        }
    }

    fn replacement(&self, hook: Hook) -> usize {
        match hook {
            Hook::Completion => self.completion_replacement,
            Hook::Submit => self.submit_replacement,
        }
    }

    fn slots(&self, hook: Hook) -> &[usize] {
        match hook {
            Hook::Completion => &self.completion_slots,
            Hook::Submit => &self.submit_slots,
        }
    }

    fn queue(&mut self, hook: Hook, value: usize) -> Result<(), InterposeError> {
        if !self.open {
            return Err(InterposeError::InvalidState("no open transaction"));
        }
        if self.slots(hook).is_empty() {
            return Err(InterposeError::NoImporter(hook));
        }
        for index in 0..self.slots(hook).len() {
            let slot = self.slots(hook)[index];
            self.pending.push(SlotWrite { slot, value });
        }
        Ok(())
    }

    fn resume_threads(&mut self) {
        for thread in self.suspended.drain(..) {
            // SAFETY: each handle was opened with THREAD_SUSPEND_RESUME and
            // suspended exactly once.
            unsafe {
                ResumeThread(thread);
                CloseHandle(thread).ok();
            }
        }
    }
}

impl Interposer for ImportPatcher {
    fn find_functions(&mut self) -> Result<(), InterposeError> {
        // SAFETY: plain module lookups in the current process.
        let winusb = unsafe { GetModuleHandleW(w!("winusb.dll")) }.map_err(|_| {
            InterposeError::NotFound {
                module: WINUSB_MODULE,
                symbol: "module",
            }
        })?;

        let resolve = |symbol: PCSTR, name: &'static str| {
            // SAFETY: `winusb` is a loaded module handle.
            unsafe { GetProcAddress(winusb, symbol) }
                .map(|f| f as usize)
                .ok_or(InterposeError::NotFound {
                    module: WINUSB_MODULE,
                    symbol: name,
                })
        };
        let completion = resolve(
            s!("WinUsb_GetOverlappedResult"),
            "WinUsb_GetOverlappedResult",
        )?;
        let submit = resolve(s!("WinUsb_ReadPipe"), "WinUsb_ReadPipe")?;
        self.originals.completion.store(completion, Ordering::Release);
        self.originals.submit.store(submit, Ordering::Release);

        let (completion_slots, submit_slots) = find_import_slots(completion, submit)?;
        debug!(
            completion_slots = completion_slots.len(),
            submit_slots = submit_slots.len(),
            "located WinUSB import slots"
        );
        self.completion_slots = completion_slots;
        self.submit_slots = submit_slots;
        Ok(())
    }

    fn begin(&mut self) -> Result<(), InterposeError> {
        if self.open {
            return Err(InterposeError::InvalidState("transaction already open"));
        }
        let capacity = self.completion_slots.len() + self.submit_slots.len();
        self.pending.clear();
        self.pending.reserve(capacity);
        self.undo.clear();
        self.undo.reserve(capacity);
        self.open = true;
        Ok(())
    }

    fn update_threads(&mut self) -> Result<(), InterposeError> {
        let threads = other_threads()?;
        self.suspended.reserve(threads.len());
        for tid in threads {
            // SAFETY: opening a thread of our own process by id.
            let Ok(thread) = (unsafe { OpenThread(THREAD_SUSPEND_RESUME, false, tid) }) else {
                continue;
            };
            // SAFETY: `thread` was opened with THREAD_SUSPEND_RESUME.
            if unsafe { SuspendThread(thread) } == u32::MAX {
                // SAFETY: closing the handle we just opened.
                unsafe { CloseHandle(thread).ok() };
                continue;
            }
            self.suspended.push(thread);
        }
        Ok(())
    }

    fn attach(&mut self, hook: Hook) -> Result<(), InterposeError> {
        self.queue(hook, self.replacement(hook))
    }

    fn detach(&mut self, hook: Hook) -> Result<(), InterposeError> {
        let original = self
            .originals
            .get(hook)
            .ok_or(InterposeError::InvalidState("original function not resolved"))?;
        self.queue(hook, original)
    }

    fn commit(&mut self) -> Result<(), InterposeError> {
        if !self.open {
            return Err(InterposeError::InvalidState("no open transaction"));
        }
        let result = apply_all(&mut ProcessSlots, &self.pending, &mut self.undo).map_err(
            |source| InterposeError::Os {
                operation: "VirtualProtect",
                source,
            },
        );
        self.pending.clear();
        self.open = false;
        self.resume_threads();
        result
    }

    fn abort(&mut self) {
        self.pending.clear();
        self.open = false;
        self.resume_threads();
    }
}

impl Drop for ImportPatcher {
    fn drop(&mut self) {
        self.resume_threads();
    }
}

/// Import slots of the modules mapped into this process.
///
/// Only handed slots found by `find_import_slots`: pointer-sized,
/// pointer-aligned entries inside a loaded image.
struct ProcessSlots;

impl SlotMemory for ProcessSlots {
    fn swap(&mut self, slot: usize, value: usize) -> std::io::Result<usize> {
        let address = slot as *const c_void;
        let size = std::mem::size_of::<usize>();
        let mut protection = PAGE_PROTECTION_FLAGS::default();
        // SAFETY: `slot` is an import slot inside a loaded image.
        unsafe { VirtualProtect(address, size, PAGE_READWRITE, &mut protection) }?;
        // SAFETY: the page is now writable and the slot is pointer-aligned.
        let previous = unsafe { (*(slot as *const AtomicUsize)).swap(value, Ordering::SeqCst) };
        let mut ignored = PAGE_PROTECTION_FLAGS::default();
        // SAFETY: restores the protection read above on the same range.
        if let Err(e) = unsafe { VirtualProtect(address, size, protection, &mut ignored) } {
            warn!("could not restore import slot protection: {e}");
        }
        Ok(previous)
    }
}

/// Ids of every thread in this process except the calling one.
fn other_threads() -> Result<Vec<u32>, InterposeError> {
    // SAFETY: plain id queries.
    let (pid, me) = unsafe { (GetCurrentProcessId(), GetCurrentThreadId()) };
    // SAFETY: the snapshot handle is closed below.
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) }.map_err(|e| {
        InterposeError::Os {
            operation: "CreateToolhelp32Snapshot",
            source: e.into(),
        }
    })?;

    let mut ids = Vec::new();
    let mut entry = THREADENTRY32 {
        dwSize: std::mem::size_of::<THREADENTRY32>() as u32,
        ..Default::default()
    };
    // SAFETY: `entry.dwSize` is initialised as the API requires.
    let mut more = unsafe { Thread32First(snapshot, &mut entry) }.is_ok();
    while more {
        if entry.th32OwnerProcessID == pid && entry.th32ThreadID != me {
            ids.push(entry.th32ThreadID);
        }
        // SAFETY: as above.
        more = unsafe { Thread32Next(snapshot, &mut entry) }.is_ok();
    }
    // SAFETY: closing the snapshot opened above.
    unsafe { CloseHandle(snapshot).ok() };
    Ok(ids)
}

/// Import slots, across all loaded modules, that currently hold `completion`
/// or `submit`.
fn find_import_slots(
    completion: usize,
    submit: usize,
) -> Result<(Vec<usize>, Vec<usize>), InterposeError> {
    // SAFETY: the snapshot handle is closed below.
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE, 0) }.map_err(|e| {
        InterposeError::Os {
            operation: "CreateToolhelp32Snapshot",
            source: e.into(),
        }
    })?;

    let mut completion_slots = Vec::new();
    let mut submit_slots = Vec::new();
    let mut entry = MODULEENTRY32W {
        dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
        ..Default::default()
    };
    // SAFETY: `entry.dwSize` is initialised as the API requires.
    let mut more = unsafe { Module32FirstW(snapshot, &mut entry) }.is_ok();
    while more {
        let base = entry.modBaseAddr as usize;
        // SAFETY: `base` is the load address of a module mapped in this
        // process, as reported by the snapshot.
        for slot in unsafe { winusb_import_slots(base) } {
            // SAFETY: `slot` is a pointer-sized import slot of that module.
            let value = unsafe { std::ptr::read_volatile(slot as *const usize) };
            if value == completion {
                completion_slots.push(slot);
            } else if value == submit {
                submit_slots.push(slot);
            }
        }
        // SAFETY: as above.
        more = unsafe { Module32NextW(snapshot, &mut entry) }.is_ok();
    }
    // SAFETY: closing the snapshot opened above.
    unsafe { CloseHandle(snapshot).ok() };
    Ok((completion_slots, submit_slots))
}

unsafe fn read_u16(addr: usize) -> u16 {
    std::ptr::read_unaligned(addr as *const u16)
}

unsafe fn read_u32(addr: usize) -> u32 {
    std::ptr::read_unaligned(addr as *const u32)
}

/// Addresses of the import slots `base` binds from `winusb.dll`.
///
/// # Safety
///
/// `base` must be the base address of a PE image mapped in this process.
unsafe fn winusb_import_slots(base: usize) -> Vec<usize> {
    let mut slots = Vec::new();
    if base == 0 || read_u16(base) != 0x5A4D {
        return slots;
    }
    let e_lfanew = read_u32(base + 0x3C) as usize;
    if !(64..=1024).contains(&e_lfanew) {
        return slots;
    }
    let nt = base + e_lfanew;
    if read_u32(nt) != 0x0000_4550 {
        return slots;
    }

    let optional = nt + 24;
    let directories = if read_u16(optional) == PE32_PLUS_MAGIC {
        optional + 112
    } else {
        optional + 96
    };
    let import_rva = read_u32(directories + IMPORT_DIRECTORY * 8) as usize;
    if import_rva == 0 {
        return slots;
    }

    let mut descriptor = base + import_rva;
    loop {
        let name_rva = read_u32(descriptor + 12) as usize;
        let first_thunk = read_u32(descriptor + 16) as usize;
        if name_rva == 0 && first_thunk == 0 {
            break;
        }
        if name_rva != 0 && first_thunk != 0 && module_name_is(base + name_rva, WINUSB_MODULE) {
            let mut slot = base + first_thunk;
            while std::ptr::read_volatile(slot as *const usize) != 0 {
                slots.push(slot);
                slot += std::mem::size_of::<usize>();
            }
        }
        descriptor += IMPORT_DESCRIPTOR_BYTES;
    }
    slots
}

/// Case-insensitive comparison of a NUL-terminated import name.
unsafe fn module_name_is(addr: usize, expected: &str) -> bool {
    let name = std::ffi::CStr::from_ptr(addr as *const std::ffi::c_char);
    name.to_bytes().eq_ignore_ascii_case(expected.as_bytes())
}
