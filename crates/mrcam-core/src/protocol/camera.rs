//! The camera segment: lifecycle flags and the newest camera frame.
//!
//! Every field starts on its own 256-byte boundary so that flags written by
//! different processes never share a cache line.
//!
//! ```text
//! offset  field
//! 0x0000  hub power epoch      (consumer bumps, service remediates)
//! 0x0100  enable hook          (consumer sets, service injects)
//! 0x0200  remove requested     (service sets, injected module unloads)
//! 0x0300  install stage        (injected module, 0..=12)
//! 0x0400  installed            (injected module)
//! 0x0500  remove succeeded     (injected module)
//! 0x0600  remove failed        (injected module)
//! 0x0700  before-write counter
//! 0x0800  byte length
//! 0x0900  exposure time, µs
//! 0x0A00  payload [CAMERA_BYTES]
//! ....    after-write counter
//! ```

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::seqlock::{begin_read, begin_write, end_read, end_write, read_with_retry};
use super::{CAMERA_BYTES, READ_RETRY_LIMIT, READ_RETRY_SLEEP};
use crate::domain::stage::InstallStage;
use crate::shm::SharedLayout;

/// Places `T` on a 256-byte boundary.
#[repr(C, align(256))]
pub struct Aligned256<T>(T);

/// Metadata of a consumed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    /// Bytes copied into the caller's buffer.
    pub bytes: usize,
    /// Capture time in microseconds since the Unix epoch.
    pub exposure_usec: u64,
    /// Write number of the frame; doubles as the frame sequence number.
    pub counter: u32,
}

/// Binary layout of [`CAMERA_SEGMENT_NAME`](super::CAMERA_SEGMENT_NAME).
///
/// Only ever accessed through a mapped [`SharedSegment`](crate::SharedSegment);
/// it is far too large for the stack.
#[repr(C)]
pub struct CameraLayout {
    hub_power_epoch: Aligned256<AtomicU32>,
    enable_hook: Aligned256<AtomicU32>,
    remove_requested: Aligned256<AtomicU32>,
    install_stage: Aligned256<AtomicU32>,
    installed: Aligned256<AtomicU32>,
    remove_succeeded: Aligned256<AtomicU32>,
    remove_failed: Aligned256<AtomicU32>,
    before_write: Aligned256<AtomicU32>,
    camera_bytes: Aligned256<AtomicU32>,
    exposure_usec: Aligned256<AtomicU64>,
    data: Aligned256<UnsafeCell<[u8; CAMERA_BYTES]>>,
    after_write: Aligned256<AtomicU32>,
}

/// Total mapped size of the camera segment.
pub const CAMERA_SEGMENT_BYTES: usize = std::mem::size_of::<CameraLayout>();

const _: () = {
    use std::mem::offset_of;
    assert!(offset_of!(CameraLayout, hub_power_epoch) == 0x000);
    assert!(offset_of!(CameraLayout, enable_hook) == 0x100);
    assert!(offset_of!(CameraLayout, remove_requested) == 0x200);
    assert!(offset_of!(CameraLayout, install_stage) == 0x300);
    assert!(offset_of!(CameraLayout, installed) == 0x400);
    assert!(offset_of!(CameraLayout, remove_succeeded) == 0x500);
    assert!(offset_of!(CameraLayout, remove_failed) == 0x600);
    assert!(offset_of!(CameraLayout, before_write) == 0x700);
    assert!(offset_of!(CameraLayout, camera_bytes) == 0x800);
    assert!(offset_of!(CameraLayout, exposure_usec) == 0x900);
    assert!(offset_of!(CameraLayout, data) == 0xA00);
    assert!(offset_of!(CameraLayout, after_write) == 0xA00 + CAMERA_BYTES);
    assert!(CAMERA_SEGMENT_BYTES == 0xA00 + CAMERA_BYTES + 256);
};

// SAFETY: every field is an atomic or the payload cell, and the payload is
// only written between `begin_write`/`end_write` by the single producer.
unsafe impl Sync for CameraLayout {}

// SAFETY: all-zero is the documented initial state of the segment: counters,
// flags, and stage are 0 and the payload is empty.
unsafe impl SharedLayout for CameraLayout {}

impl CameraLayout {
    // ── Frame channel ─────────────────────────────────────────────────────────

    /// Publishes one frame.  Must only be called by the single producer.
    ///
    /// Payloads longer than [`CAMERA_BYTES`] are truncated to capacity.
    /// Returns the write number assigned to the frame.
    pub fn publish_frame(&self, payload: &[u8], exposure_usec: u64) -> u32 {
        let len = payload.len().min(CAMERA_BYTES);
        let counter = begin_write(&self.before_write.0);
        self.exposure_usec.0.store(exposure_usec, Ordering::Relaxed);
        self.camera_bytes.0.store(len as u32, Ordering::Relaxed);
        // SAFETY: `len <= CAMERA_BYTES` and the destination is the payload
        // cell; readers discard any copy that overlaps this write.
        unsafe {
            let dst = self.data.0.get().cast::<u8>();
            std::ptr::copy_nonoverlapping(payload.as_ptr(), dst, len);
        }
        end_write(&self.after_write.0, counter);
        counter
    }

    /// One snapshot attempt into `out`.
    ///
    /// `out` receives at most `out.len()` bytes; the reported length is the
    /// number actually copied.
    pub fn try_consume_frame(&self, out: &mut [u8]) -> Option<FrameMeta> {
        let seen = begin_read(&self.after_write.0);
        let exposure_usec = self.exposure_usec.0.load(Ordering::Relaxed);
        let stored = self.camera_bytes.0.load(Ordering::Relaxed) as usize;
        let bytes = stored.min(CAMERA_BYTES).min(out.len());
        // SAFETY: `bytes` is bounded by both buffers; the copy may race a new
        // write, in which case `end_read` fails and the bytes are discarded.
        unsafe {
            let src = self.data.0.get().cast::<u8>();
            copy_volatile(src, out.as_mut_ptr(), bytes);
        }
        end_read(&self.before_write.0, seen).then_some(FrameMeta {
            bytes,
            exposure_usec,
            counter: seen,
        })
    }

    /// Copies the newest frame into `out` with bounded retries.
    ///
    /// Returns `None` when no consistent snapshot could be taken in
    /// [`READ_RETRY_LIMIT`] attempts; `out` then holds unspecified bytes.
    pub fn consume_frame(&self, out: &mut [u8]) -> Option<FrameMeta> {
        read_with_retry(READ_RETRY_LIMIT, READ_RETRY_SLEEP, || {
            self.try_consume_frame(out)
        })
    }

    /// Write number of the newest completed frame.
    pub fn frame_counter(&self) -> u32 {
        self.after_write.0.load(Ordering::Acquire)
    }

    // ── Lifecycle flags ───────────────────────────────────────────────────────

    /// Asks the service to run the hub power remediation once more.
    pub fn request_remediation(&self) -> u32 {
        self.hub_power_epoch
            .0
            .fetch_add(1, Ordering::AcqRel)
            .wrapping_add(1)
    }

    /// Number of remediation requests made so far (wrapping).
    pub fn remediation_epoch(&self) -> u32 {
        self.hub_power_epoch.0.load(Ordering::Acquire)
    }

    pub fn set_hook_enabled(&self, enabled: bool) {
        self.enable_hook.0.store(enabled as u32, Ordering::Release);
    }

    pub fn hook_enabled(&self) -> bool {
        self.enable_hook.0.load(Ordering::Acquire) != 0
    }

    pub fn set_remove_requested(&self, requested: bool) {
        self.remove_requested
            .0
            .store(requested as u32, Ordering::Release);
    }

    pub fn remove_requested(&self) -> bool {
        self.remove_requested.0.load(Ordering::Acquire) != 0
    }

    /// Records the stage about to be attempted.
    pub fn set_install_stage(&self, stage: InstallStage) {
        self.install_stage.0.store(stage as u32, Ordering::Release);
    }

    /// Raw stage value; see [`InstallStage::from_raw`].
    pub fn install_stage_raw(&self) -> u32 {
        self.install_stage.0.load(Ordering::Acquire)
    }

    pub fn install_stage(&self) -> Option<InstallStage> {
        InstallStage::from_raw(self.install_stage_raw())
    }

    pub fn set_installed(&self, installed: bool) {
        self.installed.0.store(installed as u32, Ordering::Release);
    }

    pub fn installed(&self) -> bool {
        self.installed.0.load(Ordering::Acquire) != 0
    }

    pub fn set_remove_succeeded(&self, value: bool) {
        self.remove_succeeded
            .0
            .store(value as u32, Ordering::Release);
    }

    pub fn remove_succeeded(&self) -> bool {
        self.remove_succeeded.0.load(Ordering::Acquire) != 0
    }

    pub fn set_remove_failed(&self, value: bool) {
        self.remove_failed.0.store(value as u32, Ordering::Release);
    }

    pub fn remove_failed(&self) -> bool {
        self.remove_failed.0.load(Ordering::Acquire) != 0
    }

    /// Clears the install/remove bookkeeping before a fresh injection.
    pub fn reset_install_state(&self) {
        self.set_install_stage(InstallStage::Idle);
        self.set_installed(false);
        self.set_remove_requested(false);
        self.set_remove_succeeded(false);
        self.set_remove_failed(false);
    }
}

/// Byte-wise volatile copy out of shared memory.
///
/// # Safety
///
/// `src` must be valid for `len` reads and `dst` for `len` writes, and the
/// ranges must not overlap.
unsafe fn copy_volatile(src: *const u8, dst: *mut u8, len: usize) {
    // Eight bytes per access; `[u8; 8]` has no alignment requirement.
    let words = len / 8;
    for i in 0..words {
        let chunk = std::ptr::read_volatile(src.add(i * 8).cast::<[u8; 8]>());
        std::ptr::write(dst.add(i * 8).cast::<[u8; 8]>(), chunk);
    }
    for i in words * 8..len {
        *dst.add(i) = std::ptr::read_volatile(src.add(i));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MIN_FRAME_BYTES;
    use crate::shm::SharedSegment;

    fn segment() -> SharedSegment<CameraLayout> {
        SharedSegment::anonymous().expect("anonymous camera segment")
    }

    #[test]
    fn test_new_segment_has_all_flags_clear() {
        // Arrange / Act
        let seg = segment();

        // Assert
        assert!(!seg.hook_enabled());
        assert!(!seg.remove_requested());
        assert!(!seg.installed());
        assert_eq!(seg.install_stage(), Some(InstallStage::Idle));
        assert_eq!(seg.remediation_epoch(), 0);
        assert_eq!(seg.frame_counter(), 0);
    }

    #[test]
    fn test_publish_and_consume_frame_round_trip() {
        // Arrange
        let seg = segment();
        let payload: Vec<u8> = (0..MIN_FRAME_BYTES).map(|i| (i % 251) as u8).collect();
        let mut out = vec![0u8; CAMERA_BYTES];

        // Act
        let counter = seg.publish_frame(&payload, 123_456);
        let meta = seg.consume_frame(&mut out).expect("consistent snapshot");

        // Assert
        assert_eq!(counter, 1);
        assert_eq!(meta.bytes, MIN_FRAME_BYTES);
        assert_eq!(meta.exposure_usec, 123_456);
        assert_eq!(meta.counter, 1);
        assert_eq!(&out[..MIN_FRAME_BYTES], &payload[..]);
    }

    #[test]
    fn test_oversized_payload_is_truncated_to_capacity() {
        // Arrange
        let seg = segment();
        let payload = vec![0xAB; CAMERA_BYTES + 1000];
        let mut out = vec![0u8; CAMERA_BYTES];

        // Act
        seg.publish_frame(&payload, 1);
        let meta = seg.consume_frame(&mut out).expect("consistent snapshot");

        // Assert
        assert_eq!(meta.bytes, CAMERA_BYTES);
        assert!(out.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_empty_payload_round_trips() {
        let seg = segment();
        let mut out = vec![0u8; 16];
        seg.publish_frame(&[], 9);
        let meta = seg.consume_frame(&mut out).expect("consistent snapshot");
        assert_eq!(meta.bytes, 0);
        assert_eq!(meta.exposure_usec, 9);
    }

    #[test]
    fn test_short_output_buffer_limits_copied_bytes() {
        let seg = segment();
        let mut out = [0u8; 4];
        seg.publish_frame(&[1, 2, 3, 4, 5, 6], 0);
        let meta = seg.consume_frame(&mut out).expect("consistent snapshot");
        assert_eq!(meta.bytes, 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_stalled_writer_makes_consume_fail() {
        // Arrange – a write that bumped `before` and never finished
        let seg = segment();
        seg.publish_frame(&[1, 2, 3], 0);
        begin_write(&seg.before_write.0);
        let mut out = [0u8; 8];

        // Act
        let result = seg.consume_frame(&mut out);

        // Assert
        assert!(result.is_none());
    }

    #[test]
    fn test_remediation_requests_accumulate() {
        let seg = segment();
        seg.request_remediation();
        seg.request_remediation();
        assert_eq!(seg.remediation_epoch(), 2);
    }

    #[test]
    fn test_reset_install_state_clears_flags_but_not_enable() {
        // Arrange
        let seg = segment();
        seg.set_hook_enabled(true);
        seg.set_install_stage(InstallStage::Removed);
        seg.set_installed(true);
        seg.set_remove_requested(true);
        seg.set_remove_failed(true);

        // Act
        seg.reset_install_state();

        // Assert
        assert!(seg.hook_enabled());
        assert_eq!(seg.install_stage_raw(), 0);
        assert!(!seg.installed());
        assert!(!seg.remove_requested());
        assert!(!seg.remove_failed());
    }
}
