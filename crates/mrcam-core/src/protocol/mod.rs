//! Shared-memory protocol: segment names, sizes, and layouts.
//!
//! # Modules
//!
//! - [`seqlock`] – The before/after counter discipline ([`SeqRecord`]) and
//!   the bounded-retry read loop shared by every channel.
//! - [`camera`] – The camera segment: lifecycle flags plus one frame slot.
//! - [`control`] – The consumer → host control record (toggles, chords).
//! - [`plugins`] – Per-plugin host/plugin slots for overlay applications.
//!
//! Every layout is `#[repr(C)]` with its offsets asserted at compile time,
//! because the same bytes are read by independently built modules.

pub mod camera;
pub mod control;
pub mod plugins;
pub mod seqlock;

use std::time::Duration;

pub use seqlock::SeqRecord;

// ── Names ─────────────────────────────────────────────────────────────────────

/// Named mapping holding [`camera::CameraLayout`].
pub const CAMERA_SEGMENT_NAME: &str = "Global\\mrcam_implant";
/// Auto-reset event signalled after every published frame.
pub const FRAME_EVENT_NAME: &str = "Global\\mrcam_frame";
/// Named mapping holding [`control::ControlLayout`].
pub const CONTROL_SEGMENT_NAME: &str = "Global\\XRmonitorsUI";
/// Named mapping holding [`plugins::PluginsLayout`].
pub const PLUGINS_SEGMENT_NAME: &str = "Global\\XRmonitorsPlugins";
/// Prefix of the per-plugin host → plugin events; the plugin index is appended.
pub const PLUGIN_EVENT_PREFIX: &str = "Global\\XRmonitorsPluginS2C_";

// ── Camera geometry ───────────────────────────────────────────────────────────

/// Width of one sensor image in pixels.
pub const FRAME_WIDTH: usize = 640;
/// Height of one sensor image in pixels.
pub const FRAME_HEIGHT: usize = 480;
/// Smallest transfer that is treated as a camera frame (two 8-bit images).
pub const MIN_FRAME_BYTES: usize = FRAME_WIDTH * FRAME_HEIGHT * 2;
/// Capacity of the frame slot: a full frame plus the device's trailing header.
pub const CAMERA_BYTES: usize = MIN_FRAME_BYTES + 4096;
/// Offset of the side-by-side stereo image inside a frame.
pub const STEREO_IMAGE_OFFSET: usize = 1312;
/// Width of the side-by-side stereo image (two sensor images).
pub const STEREO_WIDTH: usize = FRAME_WIDTH * 2;
/// Height of the side-by-side stereo image.
pub const STEREO_HEIGHT: usize = FRAME_HEIGHT;

/// Transfer completes this long after the sensor exposure.
pub const PIPELINE_LATENCY_USEC: u64 = 15_000;

// ── Read discipline ───────────────────────────────────────────────────────────

/// Attempts a reader makes before reporting "no consistent snapshot".
pub const READ_RETRY_LIMIT: u32 = 20;
/// Pause between read attempts.
pub const READ_RETRY_SLEEP: Duration = Duration::from_millis(1);

// ── Control channel sizes ─────────────────────────────────────────────────────

/// Key codes per shortcut slot.
pub const MAX_KEYS: usize = 8;
/// Number of shortcut slots in the control record.
pub const SHORTCUT_COUNT: usize = 7;
/// Number of plugin slots in each direction.
pub const PLUGIN_COUNT: usize = 20;

/// Name of the event signalled when host → plugin slot `index` changes.
pub fn plugin_event_name(index: usize) -> String {
    format!("{PLUGIN_EVENT_PREFIX}{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_capacity_holds_a_full_frame_and_header() {
        assert_eq!(MIN_FRAME_BYTES, 614_400);
        assert_eq!(CAMERA_BYTES, 618_496);
        assert_eq!(CAMERA_BYTES % 256, 0);
    }

    #[test]
    fn test_stereo_image_fits_inside_frame_capacity() {
        assert!(STEREO_IMAGE_OFFSET + STEREO_WIDTH * STEREO_HEIGHT <= CAMERA_BYTES);
    }

    #[test]
    fn test_plugin_event_name_appends_index() {
        assert_eq!(plugin_event_name(4), "Global\\XRmonitorsPluginS2C_4");
    }
}
