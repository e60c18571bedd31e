//! Named pagefile-backed sections for Windows hosts.
//!
//! The service runs as LocalSystem while the injected module lives inside a
//! driver host and the consumer runs in the user's session, so every object
//! is created with a null DACL in the `Global\` namespace.
//!
//! # Safety
//!
//! This module uses `unsafe` code exclusively for Win32 FFI calls.
//! All `unsafe` blocks are annotated with `// SAFETY:` comments.

#![cfg(target_os = "windows")]

use std::ffi::c_void;

use windows::core::HSTRING;
use windows::Win32::Foundation::{CloseHandle, BOOL, HANDLE, INVALID_HANDLE_VALUE};
use windows::Win32::Security::{
    InitializeSecurityDescriptor, SetSecurityDescriptorDacl, PSECURITY_DESCRIPTOR,
    SECURITY_ATTRIBUTES, SECURITY_DESCRIPTOR,
};
use windows::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, FILE_MAP_ALL_ACCESS,
    MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
};
use windows::Win32::System::SystemServices::SECURITY_DESCRIPTOR_REVISION;

use super::SegmentError;

/// Security attributes granting everyone access.
///
/// The descriptor is boxed so the pointer stored in `attributes` stays valid
/// when this value moves.
pub struct OpenSecurity {
    _descriptor: Box<SECURITY_DESCRIPTOR>,
    attributes: SECURITY_ATTRIBUTES,
}

impl OpenSecurity {
    pub fn new() -> windows::core::Result<Self> {
        let mut descriptor = Box::new(SECURITY_DESCRIPTOR::default());
        let psd = PSECURITY_DESCRIPTOR(std::ptr::addr_of_mut!(*descriptor).cast::<c_void>());
        // SAFETY: `psd` points at a live, writable SECURITY_DESCRIPTOR.
        unsafe {
            InitializeSecurityDescriptor(psd, SECURITY_DESCRIPTOR_REVISION)?;
            SetSecurityDescriptorDacl(psd, true, None, false)?;
        }
        let attributes = SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: psd.0,
            bInheritHandle: BOOL(0),
        };
        Ok(Self {
            _descriptor: descriptor,
            attributes,
        })
    }

    pub fn attributes(&self) -> *const SECURITY_ATTRIBUTES {
        &self.attributes
    }
}

/// A mapped view of a named section; unmapped and closed on drop.
pub struct SectionView {
    handle: HANDLE,
    view: MEMORY_MAPPED_VIEW_ADDRESS,
    len: usize,
}

// SAFETY: the view is plain shared memory; synchronisation is the layout's
// responsibility and the handle is only closed on drop.
unsafe impl Send for SectionView {}
unsafe impl Sync for SectionView {}

impl SectionView {
    /// Creates the named section and zeroes the view.
    pub fn create(name: &str, len: usize) -> Result<Self, SegmentError> {
        let security = OpenSecurity::new().map_err(|e| SegmentError::io(name, e.into()))?;
        let wide = HSTRING::from(name);
        // SAFETY: INVALID_HANDLE_VALUE requests a pagefile-backed section;
        // the security attributes outlive the call.
        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                Some(security.attributes()),
                PAGE_READWRITE,
                (len as u64 >> 32) as u32,
                len as u32,
                &wide,
            )
        }
        .map_err(|e| SegmentError::io(name, e.into()))?;
        let view = Self::map(name, handle, len)?;
        // SAFETY: the view is `len` writable bytes owned by this process.
        unsafe { std::ptr::write_bytes(view.view.Value.cast::<u8>(), 0, len) };
        Ok(view)
    }

    /// Opens an existing named section.
    pub fn open(name: &str, len: usize) -> Result<Self, SegmentError> {
        let wide = HSTRING::from(name);
        // SAFETY: plain open-by-name; the returned handle is owned by us.
        let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS.0, false, &wide) }
            .map_err(|e| SegmentError::io(name, e.into()))?;
        Self::map(name, handle, len)
    }

    fn map(name: &str, handle: HANDLE, len: usize) -> Result<Self, SegmentError> {
        // SAFETY: `handle` is a valid section handle at least `len` bytes long.
        let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, len) };
        if view.Value.is_null() {
            let err = windows::core::Error::from_win32();
            // SAFETY: closing the handle we just opened.
            unsafe { CloseHandle(handle).ok() };
            return Err(SegmentError::io(name, err.into()));
        }
        Ok(Self { handle, view, len })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.view.Value.cast::<u8>().cast_const()
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for SectionView {
    fn drop(&mut self) {
        // SAFETY: both the view and the handle were obtained in `map` and
        // are released exactly once here.
        unsafe {
            UnmapViewOfFile(self.view).ok();
            CloseHandle(self.handle).ok();
        }
    }
}
