//! Opening the service's shared objects.

use std::path::Path;

use tracing::debug;

use mrcam_core::protocol::{CAMERA_SEGMENT_NAME, CONTROL_SEGMENT_NAME, FRAME_EVENT_NAME};
use mrcam_core::signal::{self, SharedCounterEvent};
use mrcam_core::{SegmentError, SharedSegment};

use crate::application::reader::ClientChannels;

/// Opens the camera segment, control segment, and frame event.
///
/// With `dir` set the objects are files in `dir`; otherwise the platform's
/// named objects are used.
///
/// # Errors
///
/// [`SegmentError`] if any object is missing, usually because the service
/// is not running.
pub fn open_channels(dir: Option<&Path>) -> Result<ClientChannels, SegmentError> {
    let channels = match dir {
        Some(dir) => ClientChannels {
            camera: SharedSegment::open_in(dir, CAMERA_SEGMENT_NAME)?,
            control: SharedSegment::open_in(dir, CONTROL_SEGMENT_NAME)?,
            frame_event: Box::new(SharedCounterEvent::open_in(dir, FRAME_EVENT_NAME)?),
        },
        None => ClientChannels {
            camera: SharedSegment::open(CAMERA_SEGMENT_NAME)?,
            control: SharedSegment::open(CONTROL_SEGMENT_NAME)?,
            frame_event: signal::open_named(FRAME_EVENT_NAME)?,
        },
    };
    debug!("client channels opened");
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_without_service_reports_missing_segment() {
        let dir = std::env::temp_dir().join(format!("mrcam_client_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let result = open_channels(Some(&dir));

        assert!(matches!(result, Err(SegmentError::Io { .. })));
        std::fs::remove_dir_all(&dir).ok();
    }
}
