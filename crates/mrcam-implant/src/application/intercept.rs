//! Completion interception: turns USB bulk-read completions into published
//! camera frames.
//!
//! The host submits a read with a destination buffer and an opaque
//! completion token, and later asks for the result using only the token.
//! [`CompletionInterceptor::on_submit`] remembers the buffer for the token;
//! [`CompletionInterceptor::on_complete`] looks it up again once the host has
//! the transferred byte count, and when the transfer is large enough to be a
//! camera frame, publishes the buffer contents and signals the frame event.
//!
//! The host's own call results are never altered; interception only
//! observes.

use std::sync::Arc;

use tracing::trace;

use mrcam_core::protocol::{CAMERA_BYTES, MIN_FRAME_BYTES, PIPELINE_LATENCY_USEC};
use mrcam_core::{clock, BufferRef, CameraLayout, FrameSignal, RequestTable, SharedLayout, SharedSegment};

/// Destination for intercepted frames.
#[cfg_attr(test, mockall::automock)]
pub trait FrameSink: Send + Sync {
    /// Publishes `payload` captured at `exposure_usec`; returns the frame's
    /// write number.
    fn publish(&self, payload: &[u8], exposure_usec: u64) -> u32;
}

impl FrameSink for CameraLayout {
    fn publish(&self, payload: &[u8], exposure_usec: u64) -> u32 {
        self.publish_frame(payload, exposure_usec)
    }
}

impl<L: SharedLayout + FrameSink> FrameSink for SharedSegment<L> {
    fn publish(&self, payload: &[u8], exposure_usec: u64) -> u32 {
        (**self).publish(payload, exposure_usec)
    }
}

/// What happened to one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// A frame of `bytes` bytes was published as write number `counter`.
    Published { bytes: usize, counter: u32 },
    /// The transfer was smaller than a camera frame (status or audio data).
    TooShort { transferred: usize },
    /// No recorded submission carries this token.
    Unmatched,
}

/// Correlates read submissions with completions and publishes frames.
pub struct CompletionInterceptor {
    requests: RequestTable,
    sink: Arc<dyn FrameSink>,
    signal: Arc<dyn FrameSignal>,
    clock: fn() -> u64,
}

impl CompletionInterceptor {
    pub fn new(sink: Arc<dyn FrameSink>, signal: Arc<dyn FrameSignal>) -> Self {
        Self::with_clock(sink, signal, clock::now_usec)
    }

    /// Like [`new`](Self::new) with an explicit microsecond clock.
    pub fn with_clock(
        sink: Arc<dyn FrameSink>,
        signal: Arc<dyn FrameSignal>,
        clock: fn() -> u64,
    ) -> Self {
        Self {
            requests: RequestTable::new(),
            sink,
            signal,
            clock,
        }
    }

    /// Records a read submission.  Called before forwarding to the original.
    pub fn on_submit(&self, token: usize, buffer: BufferRef) {
        self.requests.record(token, buffer);
    }

    /// Handles a completion after the original call reported `transferred`
    /// bytes for `token`.
    ///
    /// # Safety
    ///
    /// The buffer recorded for `token` must still be valid for reads of its
    /// recorded length.  This holds for the host's read buffers, which it
    /// owns until it has collected the completion.
    pub unsafe fn on_complete(&self, token: usize, transferred: usize) -> CompletionOutcome {
        let Some(buffer) = self.requests.resolve(token) else {
            trace!(transferred, "completion for unknown read request");
            return CompletionOutcome::Unmatched;
        };
        if transferred < MIN_FRAME_BYTES {
            trace!(transferred, "ignoring short transfer");
            return CompletionOutcome::TooShort { transferred };
        }

        let bytes = transferred.min(buffer.len).min(CAMERA_BYTES);
        // SAFETY: the caller guarantees `buffer` is live for `buffer.len`
        // bytes and `bytes <= buffer.len`.
        let payload = std::slice::from_raw_parts(buffer.addr as *const u8, bytes);
        let exposure_usec = (self.clock)().saturating_sub(PIPELINE_LATENCY_USEC);
        let counter = self.sink.publish(payload, exposure_usec);
        self.signal.signal();
        CompletionOutcome::Published { bytes, counter }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;
    use mrcam_core::AutoResetEvent;
    use std::time::Duration;

    fn fixed_clock() -> u64 {
        1_000_000
    }

    fn buffer_of(data: &[u8]) -> BufferRef {
        BufferRef {
            addr: data.as_ptr() as usize,
            len: data.len(),
        }
    }

    #[test]
    fn test_full_frame_completion_publishes_back_dated_frame() {
        // Arrange
        let frame = vec![0x11u8; MIN_FRAME_BYTES];
        let mut sink = MockFrameSink::new();
        sink.expect_publish()
            .withf(|payload, exposure| payload.len() == MIN_FRAME_BYTES && *exposure == 985_000)
            .times(1)
            .return_const(1u32);
        let signal = Arc::new(AutoResetEvent::new());
        let interceptor = CompletionInterceptor::with_clock(Arc::new(sink), signal.clone(), fixed_clock);
        interceptor.on_submit(0xDEAD, buffer_of(&frame));

        // Act
        // SAFETY: `frame` outlives the call.
        let outcome = unsafe { interceptor.on_complete(0xDEAD, MIN_FRAME_BYTES) };

        // Assert
        assert_eq!(
            outcome,
            CompletionOutcome::Published {
                bytes: MIN_FRAME_BYTES,
                counter: 1
            }
        );
        assert!(signal.wait(Duration::from_millis(1)), "frame event must be set");
    }

    #[test]
    fn test_short_transfer_is_not_published() {
        // Arrange
        let data = vec![0u8; 512];
        let mut sink = MockFrameSink::new();
        sink.expect_publish().never();
        let signal = Arc::new(AutoResetEvent::new());
        let interceptor = CompletionInterceptor::with_clock(Arc::new(sink), signal.clone(), fixed_clock);
        interceptor.on_submit(1, buffer_of(&data));

        // Act
        // SAFETY: `data` outlives the call.
        let outcome = unsafe { interceptor.on_complete(1, 512) };

        // Assert
        assert_eq!(outcome, CompletionOutcome::TooShort { transferred: 512 });
        assert!(!signal.wait(Duration::from_millis(1)));
    }

    #[test]
    fn test_unknown_token_is_unmatched() {
        let mut sink = MockFrameSink::new();
        sink.expect_publish().never();
        let interceptor =
            CompletionInterceptor::new(Arc::new(sink), Arc::new(AutoResetEvent::new()));
        // SAFETY: nothing is dereferenced for an unknown token.
        let outcome = unsafe { interceptor.on_complete(42, MIN_FRAME_BYTES) };
        assert_eq!(outcome, CompletionOutcome::Unmatched);
    }

    #[test]
    fn test_transfer_is_clamped_to_buffer_and_capacity() {
        // Arrange – the device reports more than the buffer holds
        let frame = vec![0x22u8; CAMERA_BYTES + 100];
        let mut sink = MockFrameSink::new();
        sink.expect_publish()
            .with(function(|p: &[u8]| p.len() == CAMERA_BYTES), eq(985_000u64))
            .times(1)
            .return_const(7u32);
        let interceptor = CompletionInterceptor::with_clock(
            Arc::new(sink),
            Arc::new(AutoResetEvent::new()),
            fixed_clock,
        );
        interceptor.on_submit(5, buffer_of(&frame));

        // Act
        // SAFETY: `frame` outlives the call.
        let outcome = unsafe { interceptor.on_complete(5, CAMERA_BYTES + 5000) };

        // Assert
        assert_eq!(
            outcome,
            CompletionOutcome::Published {
                bytes: CAMERA_BYTES,
                counter: 7
            }
        );
    }

    #[test]
    fn test_frames_reach_a_real_camera_segment() {
        // Arrange
        let segment = Arc::new(SharedSegment::<CameraLayout>::anonymous().expect("segment"));
        let signal = Arc::new(AutoResetEvent::new());
        let interceptor = CompletionInterceptor::with_clock(segment.clone(), signal, fixed_clock);
        let frame: Vec<u8> = (0..MIN_FRAME_BYTES).map(|i| (i % 7) as u8).collect();
        interceptor.on_submit(9, buffer_of(&frame));

        // Act
        // SAFETY: `frame` outlives the call.
        unsafe { interceptor.on_complete(9, MIN_FRAME_BYTES) };
        let mut out = vec![0u8; CAMERA_BYTES];
        let meta = segment.consume_frame(&mut out).expect("snapshot");

        // Assert
        assert_eq!(meta.counter, 1);
        assert_eq!(meta.exposure_usec, 985_000);
        assert_eq!(&out[..meta.bytes], &frame[..]);
    }
}
