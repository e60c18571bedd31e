//! Overlay plugin slots: one host → plugin and one plugin → host record per
//! plugin, each guarded by its own before/after counters.
//!
//! Whenever the host updates slot `i` it signals the event named
//! [`plugin_event_name(i)`](super::plugin_event_name) so the plugin can react
//! to focus changes without polling.

use super::seqlock::SeqRecord;
use super::PLUGIN_COUNT;
use crate::shm::SharedLayout;

/// Host → plugin state.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostToPlugin {
    /// Nonzero: the plugin host has shut down.
    pub shutdown: u32,
    /// A change asks the plugin application to exit.
    pub terminate_epoch: u32,
    /// Texture format (a DXGI format value).
    pub format: u32,
    pub sample_count: u32,
    pub mip_levels: u32,
    pub gaze_screen_x: i32,
    pub gaze_screen_y: i32,
    /// Nonzero: the plugin has input focus.
    pub has_focus: u32,
    /// A change hands the shared texture back to the plugin.
    pub texture_release_epoch: u32,
    /// Adapter LUID the texture lives on.
    pub luid_low_part: u32,
    pub luid_high_part: u64,
}

/// Plugin → host state.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PluginToHost {
    /// Must change at least every five seconds while the plugin is alive.
    pub keep_alive_epoch: u32,
    /// Process that owns this slot.
    pub process_id: u32,
    /// A change asks the host to re-open the texture.
    pub texture_handle_epoch: u32,
    /// A change hands the shared texture back to the host.
    pub texture_release_epoch: u32,
    /// Centre of the texture on the virtual cylinder, screen coordinates.
    pub x: i32,
    pub y: i32,
    /// Texture size in pixels.
    pub width: i32,
    pub height: i32,
}

/// Binary layout of [`PLUGINS_SEGMENT_NAME`](super::PLUGINS_SEGMENT_NAME).
#[repr(C)]
pub struct PluginsLayout {
    pub host_to_plugin: [SeqRecord<HostToPlugin>; PLUGIN_COUNT],
    pub plugin_to_host: [SeqRecord<PluginToHost>; PLUGIN_COUNT],
}

const _: () = {
    use std::mem::{offset_of, size_of};
    assert!(size_of::<HostToPlugin>() == 48);
    assert!(offset_of!(HostToPlugin, luid_high_part) == 40);
    assert!(size_of::<PluginToHost>() == 32);
    assert!(size_of::<SeqRecord<HostToPlugin>>() == 112);
    assert!(size_of::<SeqRecord<PluginToHost>>() == 96);
    assert!(offset_of!(PluginsLayout, plugin_to_host) == 112 * PLUGIN_COUNT);
    assert!(size_of::<PluginsLayout>() == (112 + 96) * PLUGIN_COUNT);
};

// SAFETY: zeroed counters and records are the initial state of every slot.
unsafe impl SharedLayout for PluginsLayout {}

impl PluginsLayout {
    /// Host → plugin slot `index`, if in range.
    pub fn host_slot(&self, index: usize) -> Option<&SeqRecord<HostToPlugin>> {
        self.host_to_plugin.get(index)
    }

    /// Plugin → host slot `index`, if in range.
    pub fn plugin_slot(&self, index: usize) -> Option<&SeqRecord<PluginToHost>> {
        self.plugin_to_host.get(index)
    }
}
