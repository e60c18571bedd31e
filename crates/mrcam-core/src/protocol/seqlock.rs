//! Before/after counter transport for single-writer shared records.
//!
//! # What is a seqlock? (for beginners)
//!
//! A *seqlock* lets one writer update a record that many readers copy,
//! without either side ever taking a lock.  The record is bracketed by two
//! counters:
//!
//! ```text
//!  writer:  before += 1 ──► write payload ──► after = before
//!  reader:  a = after   ──► copy payload  ──► b = before   ──► a == b ?
//! ```
//!
//! The reader samples the *after* counter (the last write that finished),
//! copies, and then samples the *before* counter (the last write that
//! started).  If they are equal no write began while the copy was in
//! progress, so the copy is a complete snapshot of write number `a`.  If they
//! differ the copy may be torn and the reader tries again.
//!
//! Counters are `u32` and wrap; only equality is ever compared, so a wrap is
//! harmless.
//!
//! # Why atomics in shared memory?
//!
//! The counters live in memory mapped into several processes.  `AtomicU32`
//! has the same size and alignment as `u32`, so it can be overlaid on the
//! mapped bytes, and its loads and stores compile to the same instructions
//! the other processes use.  The payload itself is copied with volatile
//! accesses; the fences around it give the ordering the counters rely on.

use std::cell::UnsafeCell;
use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use super::{READ_RETRY_LIMIT, READ_RETRY_SLEEP};

/// Runs `attempt` up to `limit` times, sleeping `pause` between failures.
///
/// Returns the first `Some` produced, or `None` when every attempt saw a
/// write in progress.
pub fn read_with_retry<R>(
    limit: u32,
    pause: Duration,
    mut attempt: impl FnMut() -> Option<R>,
) -> Option<R> {
    for tries in 0..limit {
        if let Some(value) = attempt() {
            return Some(value);
        }
        if tries + 1 < limit {
            thread::sleep(pause);
        }
    }
    None
}

/// Opens a write: bumps `before` and returns the new write number.
///
/// The release fence keeps the payload stores that follow from becoming
/// visible ahead of the bumped counter.
pub(crate) fn begin_write(before: &AtomicU32) -> u32 {
    let counter = before.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    fence(Ordering::Release);
    counter
}

/// Closes a write started by [`begin_write`].
pub(crate) fn end_write(after: &AtomicU32, counter: u32) {
    after.store(counter, Ordering::Release);
}

/// Opens a read: the write number of the last completed write.
pub(crate) fn begin_read(after: &AtomicU32) -> u32 {
    after.load(Ordering::Acquire)
}

/// Closes a read: `true` when no write started since `begin_read`.
pub(crate) fn end_read(before: &AtomicU32, seen: u32) -> bool {
    fence(Ordering::Acquire);
    before.load(Ordering::Relaxed) == seen
}

/// A 32-byte slot holding one counter, so the two counters of a record never
/// share a cache line with the payload.
#[repr(C)]
pub struct PaddedCounter {
    value: AtomicU32,
    _pad: [u8; 28],
}

impl PaddedCounter {
    /// Current counter value.
    pub fn load(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }
}

/// A record of type `T` guarded by before/after counters.
///
/// Layout (native byte order): before counter at offset 0, after counter at
/// offset 32, payload at offset 64.  This matches the control and plugin
/// slots of the shared segments.
///
/// `T` must be plain data (`Copy`, no pointers) and valid for the all-zero
/// bit pattern; the record is only ever reached through a mapped segment.
#[repr(C)]
pub struct SeqRecord<T> {
    before: PaddedCounter,
    after: PaddedCounter,
    data: UnsafeCell<T>,
}

// SAFETY: all mutation of `data` is bracketed by the counter protocol and the
// channel has a single writer by contract; readers never hand out references
// into `data`, only copies validated by the counters.
unsafe impl<T: Copy + Send> Sync for SeqRecord<T> {}

impl<T: Copy> SeqRecord<T> {
    /// Publishes `value`.  Must only be called by the single writer.
    ///
    /// Wait-free: two counter stores and one copy.
    pub fn publish(&self, value: &T) -> u32 {
        let counter = begin_write(&self.before.value);
        // SAFETY: `data` is valid for writes of `T`; concurrent readers only
        // perform volatile copies and discard them if the counters disagree.
        unsafe { std::ptr::write_volatile(self.data.get(), *value) };
        end_write(&self.after.value, counter);
        counter
    }

    /// Takes one snapshot attempt.  Returns `(epoch, value)` when consistent.
    pub fn try_consume(&self) -> Option<(u32, T)> {
        let seen = begin_read(&self.after.value);
        // SAFETY: `data` is valid for reads of `T` and `T` is valid for every
        // bit pattern the writer can leave behind; a torn copy is discarded
        // below before it is returned.
        let value = unsafe { std::ptr::read_volatile(self.data.get()) };
        end_read(&self.before.value, seen).then_some((seen, value))
    }

    /// Reads a consistent snapshot with the default retry bound.
    ///
    /// Returns the epoch (the after-counter value) with the record, or `None`
    /// after [`READ_RETRY_LIMIT`] torn attempts.
    pub fn consume(&self) -> Option<(u32, T)> {
        read_with_retry(READ_RETRY_LIMIT, READ_RETRY_SLEEP, || self.try_consume())
    }

    /// Write number of the last completed publish.
    pub fn epoch(&self) -> u32 {
        self.after.load()
    }
}

const _: () = {
    assert!(std::mem::size_of::<PaddedCounter>() == 32);
    assert!(std::mem::offset_of!(SeqRecord<u64>, before) == 0);
    assert!(std::mem::offset_of!(SeqRecord<u64>, after) == 32);
    assert!(std::mem::offset_of!(SeqRecord<u64>, data) == 64);
};
