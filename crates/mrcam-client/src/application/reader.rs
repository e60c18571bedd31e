//! The consumer-side camera client.
//!
//! [`CameraClient`] owns the opened segments, a background reader thread,
//! and the control-channel bookkeeping.
//!
//! # Reader thread (for beginners)
//!
//! ```text
//! loop {
//!     wait on frame event (200 ms) ── timeout ──► log install status
//!     wait until no frame is in flight
//!     consistent copy: camera segment ──► private staging buffer
//!     publish staging buffer into the mailbox
//! }
//! ```
//!
//! The copy happens outside any lock; only the hand-off to the mailbox takes
//! the mailbox's short lock.  The render thread therefore never waits for a
//! 600 KB copy.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use mrcam_core::protocol::CAMERA_BYTES;
use mrcam_core::{
    CameraLayout, ControlLayout, ControlRecord, FrameSignal, InstallStage, SegmentError,
    SharedSegment,
};

use super::frame::CameraFrame;
use super::mailbox::FrameMailbox;

/// How long the reader waits on the frame event before checking in.
pub const FRAME_WAIT: Duration = Duration::from_millis(200);

/// Error type for the camera client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A shared segment or event could not be opened.
    #[error(transparent)]
    Segment(#[from] SegmentError),

    /// The reader thread could not be spawned.
    #[error("failed to spawn reader thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// The shared objects a client works with.
pub struct ClientChannels {
    pub camera: SharedSegment<CameraLayout>,
    pub control: SharedSegment<ControlLayout>,
    pub frame_event: Box<dyn FrameSignal>,
}

/// Install progress as reported by the injected module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallStatus {
    pub stage: u32,
    pub installed: bool,
}

impl std::fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match InstallStage::from_raw(self.stage) {
            Some(stage) => write!(f, "{stage}")?,
            None => write!(f, "unknown stage {}", self.stage)?,
        }
        if self.installed {
            write!(f, " (installed)")?;
        }
        Ok(())
    }
}

struct Shared {
    channels: ClientChannels,
    mailbox: FrameMailbox,
    terminated: AtomicBool,
    ui_epoch: AtomicU32,
}

impl Shared {
    fn install_status(&self) -> InstallStatus {
        InstallStatus {
            stage: self.channels.camera.install_stage_raw(),
            installed: self.channels.camera.installed(),
        }
    }
}

/// Consumer-side access to the camera pipeline.
pub struct CameraClient {
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
}

impl CameraClient {
    pub fn new(channels: ClientChannels) -> Self {
        Self {
            shared: Arc::new(Shared {
                channels,
                mailbox: FrameMailbox::new(),
                terminated: AtomicBool::new(false),
                ui_epoch: AtomicU32::new(0),
            }),
            reader: None,
        }
    }

    /// Asks the service to inject the camera module and starts the reader
    /// thread.  Calling `start` on a running client does nothing.
    ///
    /// # Errors
    ///
    /// [`ClientError::Spawn`] if the reader thread cannot be created; the
    /// enable flag is cleared again in that case.
    pub fn start(&mut self) -> Result<(), ClientError> {
        if self.reader.is_some() {
            return Ok(());
        }
        self.shared.terminated.store(false, Ordering::Release);
        self.shared.channels.camera.set_hook_enabled(true);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("mrcam-reader".to_string())
            .spawn(move || reader_loop(&shared));
        match spawned {
            Ok(handle) => {
                self.reader = Some(handle);
                info!("camera client started");
                Ok(())
            }
            Err(e) => {
                self.shared.channels.camera.set_hook_enabled(false);
                Err(ClientError::Spawn(e))
            }
        }
    }

    /// Clears the enable flag, wakes the reader thread, and joins it.
    pub fn stop(&mut self) {
        self.shared.channels.camera.set_hook_enabled(false);
        let Some(reader) = self.reader.take() else {
            return;
        };
        self.shared.terminated.store(true, Ordering::Release);
        self.shared.channels.frame_event.signal();
        self.shared.mailbox.wake();
        if reader.join().is_err() {
            warn!("reader thread panicked");
        }
        info!("camera client stopped");
    }

    pub fn is_running(&self) -> bool {
        self.reader.is_some()
    }

    /// The newest frame, if none is in flight and it was not returned
    /// before.  Call [`release_frame`](Self::release_frame) when done.
    pub fn acquire_next_frame(&self) -> Option<Arc<CameraFrame>> {
        self.shared.mailbox.acquire()
    }

    /// Ends the in-flight period of the last acquired frame.
    pub fn release_frame(&self) {
        self.shared.mailbox.release();
    }

    /// The control record, only when it changed since the last call.
    ///
    /// Returns `None` when nothing was ever published, nothing changed, or
    /// every read attempt tore.
    pub fn read_ui_state(&self) -> Option<ControlRecord> {
        let (epoch, record) = self.shared.channels.control.consume()?;
        let previous = self.shared.ui_epoch.swap(epoch, Ordering::AcqRel);
        (previous != epoch).then_some(record)
    }

    /// Publishes `record` on the control channel.  Only the UI that owns
    /// the control channel may call this.
    pub fn publish_ui_state(&self, record: &ControlRecord) -> u32 {
        self.shared.channels.control.publish(record)
    }

    /// Asks the service to run the USB hub power fix.  Returns the new
    /// request counter.
    pub fn request_remediation(&self) -> u32 {
        let epoch = self.shared.channels.camera.request_remediation();
        debug!(epoch, "requested USB hub power fix");
        epoch
    }

    pub fn install_status(&self) -> InstallStatus {
        self.shared.install_status()
    }
}

impl Drop for CameraClient {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Reader thread ─────────────────────────────────────────────────────────────

fn reader_loop(shared: &Shared) {
    let camera = &shared.channels.camera;
    let mut staging = vec![0u8; CAMERA_BYTES];
    let mut reported: Option<InstallStatus> = None;

    debug!("reader thread started");
    while !shared.terminated.load(Ordering::Acquire) {
        if !shared.channels.frame_event.wait(FRAME_WAIT) {
            report_install_status(shared.install_status(), &mut reported);
            continue;
        }
        if shared.terminated.load(Ordering::Acquire) {
            break;
        }
        if !shared.mailbox.wait_released(&shared.terminated) {
            break;
        }

        staging.resize(CAMERA_BYTES, 0);
        match camera.consume_frame(&mut staging) {
            // Counter zero: the event fired before any frame was written.
            Some(meta) if meta.counter == 0 => {}
            Some(meta) => {
                staging.truncate(meta.bytes);
                let frame =
                    CameraFrame::new(meta.counter, meta.exposure_usec, std::mem::take(&mut staging));
                trace!(frame = meta.counter, bytes = meta.bytes, "frame received");
                if let Some(buffer) = shared.mailbox.publish(frame) {
                    staging = buffer;
                }
            }
            None => warn!("camera segment kept changing during read; frame skipped"),
        }
    }
    debug!("reader thread exiting");
}

/// Logs the module's install status when no frames arrive, once per change.
fn report_install_status(status: InstallStatus, reported: &mut Option<InstallStatus>) {
    if *reported == Some(status) {
        trace!(%status, "no frame");
        return;
    }
    *reported = Some(status);
    if status.installed {
        info!(%status, "camera module installed, waiting for frames");
    } else {
        info!(%status, "camera module not installed");
    }
}
