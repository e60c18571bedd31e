//! One-slot frame hand-off between the reader thread and the render loop.
//!
//! Rules:
//!
//! - At most one frame is *in flight* (acquired and not yet released).
//! - A frame is delivered at most once; acquiring again without a newer
//!   frame yields nothing.
//! - The reader thread does not publish while a frame is in flight; it waits
//!   in [`FrameMailbox::wait_released`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::frame::CameraFrame;

/// Granularity at which a waiting reader re-checks its termination flag.
const RELEASE_POLL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct MailboxState {
    frame: Option<Arc<CameraFrame>>,
    in_flight: bool,
    last_delivered: Option<u32>,
}

#[derive(Default)]
pub struct FrameMailbox {
    state: Mutex<MailboxState>,
    released: Condvar,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the newest frame.
    ///
    /// Returns the previous frame's buffer when nobody else still holds it,
    /// so the reader can reuse the allocation.
    pub fn publish(&self, frame: CameraFrame) -> Option<Vec<u8>> {
        let previous = self.lock().frame.replace(Arc::new(frame));
        previous
            .and_then(|old| Arc::try_unwrap(old).ok())
            .map(CameraFrame::into_data)
    }

    /// Takes the newest frame if none is in flight and it was not delivered
    /// before.
    pub fn acquire(&self) -> Option<Arc<CameraFrame>> {
        let mut state = self.lock();
        if state.in_flight {
            return None;
        }
        let frame = Arc::clone(state.frame.as_ref()?);
        if state.last_delivered == Some(frame.number()) {
            return None;
        }
        state.in_flight = true;
        state.last_delivered = Some(frame.number());
        Some(frame)
    }

    /// Ends the in-flight period of the last acquired frame.
    pub fn release(&self) {
        self.lock().in_flight = false;
        self.released.notify_all();
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    /// Blocks until no frame is in flight.
    ///
    /// Returns `false` if `terminated` was set first.
    pub fn wait_released(&self, terminated: &AtomicBool) -> bool {
        let mut state = self.lock();
        loop {
            if !state.in_flight {
                return true;
            }
            if terminated.load(Ordering::Acquire) {
                return false;
            }
            state = self
                .released
                .wait_timeout(state, RELEASE_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Wakes any thread in [`wait_released`](Self::wait_released) so it can
    /// observe termination.
    pub fn wake(&self) {
        self.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn frame(number: u32) -> CameraFrame {
        CameraFrame::new(number, 0, vec![number as u8; 8])
    }

    #[test]
    fn test_empty_mailbox_yields_nothing() {
        assert!(FrameMailbox::new().acquire().is_none());
    }

    #[test]
    fn test_second_acquire_without_publish_yields_nothing() {
        // Arrange
        let mailbox = FrameMailbox::new();
        mailbox.publish(frame(1));

        // Act
        let first = mailbox.acquire();
        mailbox.release();
        let second = mailbox.acquire();

        // Assert
        assert_eq!(first.map(|f| f.number()), Some(1));
        assert!(second.is_none(), "same frame must not be delivered twice");
    }

    #[test]
    fn test_acquire_while_in_flight_yields_nothing() {
        let mailbox = FrameMailbox::new();
        mailbox.publish(frame(1));
        let _held = mailbox.acquire().expect("first");

        mailbox.publish(frame(2));

        assert!(mailbox.acquire().is_none());
        assert!(mailbox.is_in_flight());
    }

    #[test]
    fn test_release_then_new_publish_delivers_newest() {
        // Arrange
        let mailbox = FrameMailbox::new();
        mailbox.publish(frame(1));
        let _ = mailbox.acquire();
        mailbox.release();

        // Act
        mailbox.publish(frame(2));
        mailbox.publish(frame(3));
        let next = mailbox.acquire();

        // Assert
        assert_eq!(next.map(|f| f.number()), Some(3));
    }

    #[test]
    fn test_publish_recycles_unreferenced_buffer() {
        let mailbox = FrameMailbox::new();
        assert!(mailbox.publish(frame(1)).is_none());

        let recycled = mailbox.publish(frame(2)).expect("buffer returned");

        assert_eq!(recycled, vec![1u8; 8]);
    }

    #[test]
    fn test_publish_keeps_buffer_still_held_by_caller() {
        let mailbox = FrameMailbox::new();
        mailbox.publish(frame(1));
        let held = mailbox.acquire().expect("frame");

        assert!(mailbox.publish(frame(2)).is_none());
        assert_eq!(held.data(), &[1u8; 8]);
    }

    #[test]
    fn test_wait_released_returns_after_release() {
        // Arrange
        let mailbox = Arc::new(FrameMailbox::new());
        mailbox.publish(frame(1));
        let _ = mailbox.acquire();
        let terminated = Arc::new(AtomicBool::new(false));
        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            let terminated = Arc::clone(&terminated);
            thread::spawn(move || mailbox.wait_released(&terminated))
        };

        // Act
        thread::sleep(Duration::from_millis(20));
        mailbox.release();

        // Assert
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_wait_released_gives_up_on_termination() {
        let mailbox = FrameMailbox::new();
        mailbox.publish(frame(1));
        let _ = mailbox.acquire();
        let terminated = AtomicBool::new(true);

        let start = Instant::now();
        assert!(!mailbox.wait_released(&terminated));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
