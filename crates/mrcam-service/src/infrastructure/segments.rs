//! Creation of every shared object the service hosts.
//!
//! The service is the owner: it creates the camera segment, the frame event,
//! the control segment (publishing the initial record), the plugin segment,
//! and one event per plugin slot.  Everything is released when
//! [`ServiceSegments`] is dropped.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use mrcam_core::protocol::{
    plugin_event_name, CAMERA_SEGMENT_NAME, CONTROL_SEGMENT_NAME, FRAME_EVENT_NAME,
    PLUGINS_SEGMENT_NAME, PLUGIN_COUNT,
};
use mrcam_core::signal::{self, SharedCounterEvent};
use mrcam_core::{
    CameraLayout, ControlLayout, ControlRecord, FrameSignal, PluginsLayout, SegmentError,
    SharedSegment,
};

/// The segments and events owned by the service.
pub struct ServiceSegments {
    pub camera: Arc<SharedSegment<CameraLayout>>,
    pub control: SharedSegment<ControlLayout>,
    pub plugins: SharedSegment<PluginsLayout>,
    pub frame_event: Box<dyn FrameSignal>,
    pub plugin_events: Vec<Box<dyn FrameSignal>>,
}

impl ServiceSegments {
    /// Creates all objects under their well-known names.
    ///
    /// With `dir` set, segments and events are files in `dir` on every
    /// platform; otherwise the platform's named objects are used.
    ///
    /// # Errors
    ///
    /// The first [`SegmentError`] encountered; objects created before it are
    /// released.
    pub fn create(dir: Option<&Path>, control: &ControlRecord) -> Result<Self, SegmentError> {
        let camera = Arc::new(create_segment::<CameraLayout>(dir, CAMERA_SEGMENT_NAME)?);
        let frame_event = create_event(dir, FRAME_EVENT_NAME)?;

        let control_segment = create_segment::<ControlLayout>(dir, CONTROL_SEGMENT_NAME)?;
        control_segment.publish(control);

        let plugins = create_segment::<PluginsLayout>(dir, PLUGINS_SEGMENT_NAME)?;
        let plugin_events = (0..PLUGIN_COUNT)
            .map(|i| create_event(dir, &plugin_event_name(i)))
            .collect::<Result<Vec<_>, _>>()?;

        info!(plugins = PLUGIN_COUNT, "shared segments created");
        Ok(Self {
            camera,
            control: control_segment,
            plugins,
            frame_event,
            plugin_events,
        })
    }
}

fn create_segment<L: mrcam_core::SharedLayout>(
    dir: Option<&Path>,
    name: &str,
) -> Result<SharedSegment<L>, SegmentError> {
    match dir {
        Some(dir) => SharedSegment::create_in(dir, name),
        None => SharedSegment::create(name),
    }
}

fn create_event(dir: Option<&Path>, name: &str) -> Result<Box<dyn FrameSignal>, SegmentError> {
    match dir {
        Some(dir) => Ok(Box::new(SharedCounterEvent::create_in(dir, name)?)),
        None => signal::create_named(name),
    }
}
