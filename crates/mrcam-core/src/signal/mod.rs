//! Wake-up events between producer and consumer.
//!
//! The producer signals after every published frame; the consumer blocks on
//! the signal with a timeout so it can still observe shutdown promptly.
//! Signals are *auto-reset*: a wait consumes the pending signal, and signals
//! raised while one is already pending coalesce.
//!
//! | Implementation        | Scope                                       |
//! |-----------------------|---------------------------------------------|
//! | [`AutoResetEvent`]    | in-process (tests, single-process tooling)  |
//! | [`SharedCounterEvent`]| cross-process on hosts without named events |
//! | `windows::NamedEvent` | cross-process Win32 auto-reset event        |

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::shm::{SegmentError, SharedLayout, SharedSegment};

#[cfg(target_os = "windows")]
pub mod windows;

/// An auto-reset wake-up event.
pub trait FrameSignal: Send + Sync {
    /// Sets the event, waking one waiter.
    fn signal(&self);

    /// Waits up to `timeout` for the event.  Returns `true` when signalled.
    fn wait(&self, timeout: Duration) -> bool;
}

/// In-process auto-reset event built on a mutex and condition variable.
#[derive(Default)]
pub struct AutoResetEvent {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl AutoResetEvent {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSignal for AutoResetEvent {
    fn signal(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = true;
        self.cond.notify_one();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut pending, _) = self
            .cond
            .wait_timeout_while(pending, timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *pending, false)
    }
}

/// Layout of a file-backed event: a generation counter bumped per signal.
#[repr(C)]
pub struct EventLayout {
    generation: AtomicU32,
}

// SAFETY: a single atomic; zero is the initial generation.
unsafe impl SharedLayout for EventLayout {}

/// Cross-process event over a shared generation counter.
///
/// Waiters poll the counter every millisecond and remember the last
/// generation they consumed.
///
/// Wakeups are broadcast: one `signal` releases every open view that has not
/// yet seen the new generation, unlike the single-wake [`AutoResetEvent`].
pub struct SharedCounterEvent {
    segment: SharedSegment<EventLayout>,
    seen: AtomicU32,
}

const POLL_INTERVAL: Duration = Duration::from_millis(1);

impl SharedCounterEvent {
    fn from_segment(segment: SharedSegment<EventLayout>) -> Self {
        let seen = AtomicU32::new(segment.generation.load(Ordering::Acquire));
        Self { segment, seen }
    }

    pub fn create(name: &str) -> Result<Self, SegmentError> {
        SharedSegment::create(name).map(Self::from_segment)
    }

    pub fn open(name: &str) -> Result<Self, SegmentError> {
        SharedSegment::open(name).map(Self::from_segment)
    }

    pub fn create_in(dir: &std::path::Path, name: &str) -> Result<Self, SegmentError> {
        SharedSegment::create_in(dir, name).map(Self::from_segment)
    }

    pub fn open_in(dir: &std::path::Path, name: &str) -> Result<Self, SegmentError> {
        SharedSegment::open_in(dir, name).map(Self::from_segment)
    }
}

impl FrameSignal for SharedCounterEvent {
    fn signal(&self) {
        self.segment.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let current = self.segment.generation.load(Ordering::Acquire);
            if self.seen.swap(current, Ordering::AcqRel) != current {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Creates the platform's named cross-process event.
pub fn create_named(name: &str) -> Result<Box<dyn FrameSignal>, SegmentError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Box::new(windows::NamedEvent::create(name)?))
    }
    #[cfg(not(target_os = "windows"))]
    {
        Ok(Box::new(SharedCounterEvent::create(name)?))
    }
}

/// Opens the platform's named cross-process event.
pub fn open_named(name: &str) -> Result<Box<dyn FrameSignal>, SegmentError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Box::new(windows::NamedEvent::open(name)?))
    }
    #[cfg(not(target_os = "windows"))]
    {
        Ok(Box::new(SharedCounterEvent::open(name)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_auto_reset_event_times_out_when_not_signalled() {
        let event = AutoResetEvent::new();
        assert!(!event.wait(Duration::from_millis(5)));
    }

    #[test]
    fn test_auto_reset_event_consumes_signal_on_wait() {
        // Arrange
        let event = AutoResetEvent::new();
        event.signal();
        event.signal();

        // Act
        let first = event.wait(Duration::from_millis(5));
        let second = event.wait(Duration::from_millis(5));

        // Assert – two signals before a wait coalesce into one
        assert!(first);
        assert!(!second);
    }

    #[test]
    fn test_auto_reset_event_wakes_blocked_waiter() {
        // Arrange
        let event = Arc::new(AutoResetEvent::new());
        let waiter = {
            let event = Arc::clone(&event);
            thread::spawn(move || event.wait(Duration::from_secs(5)))
        };

        // Act
        thread::sleep(Duration::from_millis(20));
        event.signal();

        // Assert
        assert!(waiter.join().expect("waiter thread"));
    }

    #[test]
    fn test_shared_counter_event_crosses_mappings() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("mrcam_evt_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let producer = SharedCounterEvent::create_in(&dir, "Global\\frame").expect("create");
        let consumer = SharedCounterEvent::open_in(&dir, "Global\\frame").expect("open");

        // Act / Assert
        assert!(!consumer.wait(Duration::from_millis(5)));
        producer.signal();
        assert!(consumer.wait(Duration::from_millis(50)));
        assert!(!consumer.wait(Duration::from_millis(5)), "signal is auto-reset");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_shared_counter_event_wakes_every_open_view() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("mrcam_evt_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let producer = SharedCounterEvent::create_in(&dir, "Global\\frame").expect("create");
        let first = SharedCounterEvent::open_in(&dir, "Global\\frame").expect("open");
        let second = SharedCounterEvent::open_in(&dir, "Global\\frame").expect("open");

        // Act
        producer.signal();

        // Assert – one signal reaches both views
        assert!(first.wait(Duration::from_millis(50)));
        assert!(second.wait(Duration::from_millis(50)));

        std::fs::remove_dir_all(&dir).ok();
    }
}
