//! Win32 named auto-reset events.
//!
//! # Safety
//!
//! This module uses `unsafe` code exclusively for Win32 FFI calls.
//! All `unsafe` blocks are annotated with `// SAFETY:` comments.

#![cfg(target_os = "windows")]

use std::time::Duration;

use windows::core::HSTRING;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::System::Threading::{
    CreateEventW, OpenEventW, SetEvent, WaitForSingleObject, EVENT_MODIFY_STATE,
    SYNCHRONIZATION_SYNCHRONIZE,
};

use super::FrameSignal;
use crate::shm::windows::OpenSecurity;
use crate::shm::SegmentError;

/// A named auto-reset event handle.
pub struct NamedEvent {
    handle: HANDLE,
}

// SAFETY: event handles may be used from any thread.
unsafe impl Send for NamedEvent {}
unsafe impl Sync for NamedEvent {}

impl NamedEvent {
    /// Creates the event (initially unsignalled) with a null DACL.
    pub fn create(name: &str) -> Result<Self, SegmentError> {
        let security = OpenSecurity::new().map_err(|e| SegmentError::io(name, e.into()))?;
        let wide = HSTRING::from(name);
        // SAFETY: the security attributes outlive the call.
        let handle = unsafe { CreateEventW(Some(security.attributes()), false, false, &wide) }
            .map_err(|e| SegmentError::io(name, e.into()))?;
        Ok(Self { handle })
    }

    /// Opens an event created by another process.
    pub fn open(name: &str) -> Result<Self, SegmentError> {
        let wide = HSTRING::from(name);
        // SAFETY: plain open-by-name; the handle is owned by the returned value.
        let handle = unsafe {
            OpenEventW(
                EVENT_MODIFY_STATE | SYNCHRONIZATION_SYNCHRONIZE,
                false,
                &wide,
            )
        }
        .map_err(|e| SegmentError::io(name, e.into()))?;
        Ok(Self { handle })
    }
}

impl FrameSignal for NamedEvent {
    fn signal(&self) {
        // SAFETY: `handle` is a live event handle.
        unsafe { SetEvent(self.handle).ok() };
    }

    fn wait(&self, timeout: Duration) -> bool {
        let millis = timeout.as_millis().min(u32::MAX as u128 - 1) as u32;
        // SAFETY: `handle` is a live event handle.
        unsafe { WaitForSingleObject(self.handle, millis) == WAIT_OBJECT_0 }
    }
}

impl Drop for NamedEvent {
    fn drop(&mut self) {
        // SAFETY: the handle is closed exactly once.
        unsafe { CloseHandle(self.handle).ok() };
    }
}
