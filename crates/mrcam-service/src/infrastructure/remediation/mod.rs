//! USB hub power fix.
//!
//! The headset camera stalls when a hub between it and the host suspends to
//! save power.  The fix walks from every headset USB device up its parent
//! chain and clears the "allow the computer to turn off this device" power
//! setting on each hub that exposes it, stopping at the first ancestor that
//! does not.
//!
//! [`apply_hub_power_fix`] holds the walk; a [`UsbTopology`] supplies the
//! device tree and the power control.  On Windows that is SetupAPI, the
//! configuration manager, and the WMI `GUID_POWER_DEVICE_ENABLE` block.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::application::lifecycle::HubPowerRemediator;

pub mod mock;
#[cfg(target_os = "windows")]
pub mod windows;

/// Device-path fragment identifying the headset's USB devices.
pub const HEADSET_PRODUCT_TAG: &str = "pid_0659";

/// Maximum number of ancestors visited per device.
pub const MAX_HUB_DEPTH: usize = 16;

/// Result of trying to disable power saving on one hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubPower {
    /// The setting is now off.
    Disabled,
    /// The hub has no power setting; the walk ends here.
    Unavailable,
    /// The setting exists but could not be changed.
    Failed,
}

/// Device tree and power control used by the walk.
pub trait UsbTopology {
    type Node: Copy;

    /// `(device path, node)` of every present USB device.
    fn usb_devices(&self) -> Vec<(String, Self::Node)>;

    /// Parent of `node`, or `None` at the root or on error.
    fn parent(&self, node: Self::Node) -> Option<Self::Node>;

    /// Device instance id such as `USB\VID_045E&PID_0659\...`.
    fn instance_id(&self, node: Self::Node) -> Option<String>;

    /// Turns off power saving for the device with `instance_id`.
    fn disable_power_saving(&self, instance_id: &str) -> HubPower;
}

/// Walks every headset device's parent chain and disables hub power saving.
///
/// Returns the number of hubs reconfigured.
pub fn apply_hub_power_fix<T: UsbTopology>(topology: &T) -> usize {
    let mut reconfigured = 0;
    for (path, device) in topology.usb_devices() {
        if !path.to_ascii_lowercase().contains(HEADSET_PRODUCT_TAG) {
            continue;
        }
        debug!(%path, "walking hub chain");

        let mut node = device;
        for _ in 0..MAX_HUB_DEPTH {
            let Some(parent) = topology.parent(node) else {
                break;
            };
            node = parent;
            let Some(instance_id) = topology.instance_id(node) else {
                warn!("could not read device instance id");
                continue;
            };
            match topology.disable_power_saving(&instance_id) {
                HubPower::Disabled => {
                    info!(hub = %instance_id, "reconfigured USB power settings");
                    reconfigured += 1;
                }
                HubPower::Unavailable => {
                    info!(hub = %instance_id, "stopped walking hub chain where power settings end");
                    break;
                }
                HubPower::Failed => warn!(hub = %instance_id, "could not change power setting"),
            }
        }
    }
    reconfigured
}

/// Size of `WNODE_HEADER`.
pub const WNODE_HEADER_BYTES: usize = 48;

/// Current value of a one-byte `WNODE_SINGLE_INSTANCE` data block, if the
/// buffer holds one.
pub fn single_instance_byte(buf: &[u8]) -> Option<u8> {
    let field = |offset: usize| -> Option<usize> {
        let bytes = buf.get(offset..offset + 4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?) as usize)
    };
    let data_offset = field(WNODE_HEADER_BYTES + 8)?;
    let data_size = field(WNODE_HEADER_BYTES + 12)?;
    if data_size != 1 {
        return None;
    }
    buf.get(data_offset).copied()
}

/// Logs instead of remediating, for platforms without the fix.
pub struct LoggingRemediator;

impl HubPowerRemediator for LoggingRemediator {
    fn remediate(&self) {
        warn!("USB hub power fix is not available on this platform");
    }
}

/// Returns the remediator for the current platform.
pub fn platform_remediator() -> Arc<dyn HubPowerRemediator> {
    #[cfg(target_os = "windows")]
    {
        Arc::new(windows::UsbHubPowerFix)
    }
    #[cfg(not(target_os = "windows"))]
    {
        Arc::new(LoggingRemediator)
    }
}
