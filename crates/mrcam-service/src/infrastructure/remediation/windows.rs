//! Windows backend for the hub power fix.
//!
//! Devices come from SetupAPI (`GUID_DEVINTERFACE_USB_DEVICE`), parents from
//! the configuration manager, and the power setting is the WMI data block
//! `GUID_POWER_DEVICE_ENABLE`, a single BOOLEAN per device.  The WMI
//! functions are not in the import libraries the `windows` crate links, so
//! they are resolved from advapi32 at run time.

use std::ffi::c_void;

use tracing::{debug, error, warn};
use windows::core::{s, w, GUID, PCSTR, PCWSTR};
use windows::Win32::Devices::DeviceAndDriverInstallation::{
    CM_Get_Device_IDW, CM_Get_Parent, SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInterfaces,
    SetupDiGetClassDevsW, SetupDiGetDeviceInterfaceDetailW, CR_SUCCESS, DIGCF_DEVICEINTERFACE,
    DIGCF_PRESENT, HDEVINFO, SPINT_ACTIVE, SP_DEVICE_INTERFACE_DATA,
    SP_DEVICE_INTERFACE_DETAIL_DATA_W, SP_DEVINFO_DATA,
};
use windows::Win32::Devices::Usb::GUID_DEVINTERFACE_USB_DEVICE;
use windows::Win32::Foundation::{FreeLibrary, HMODULE, HWND};
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

use super::{apply_hub_power_fix, single_instance_byte, HubPower, UsbTopology};
use crate::application::lifecycle::HubPowerRemediator;

const GUID_POWER_DEVICE_ENABLE: GUID = GUID::from_u128(0x827c0a6f_feb0_11d0_bd26_00aa00b7b32a);
const ERROR_SUCCESS: u32 = 0;
const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
const MAX_PATH: usize = 260;

/// [`HubPowerRemediator`] running the fix against the live device tree.
pub struct UsbHubPowerFix;

impl HubPowerRemediator for UsbHubPowerFix {
    fn remediate(&self) {
        let Some(wmi) = WmiFunctions::load() else {
            error!("WMI functions unavailable; hub power fix skipped");
            return;
        };
        let topology = match SetupApiTopology::open(wmi) {
            Ok(topology) => topology,
            Err(e) => {
                error!("SetupDiGetClassDevsW failed: {e}");
                return;
            }
        };
        let count = apply_hub_power_fix(&topology);
        debug!(hubs = count, "hub power fix finished");
    }
}

// ── WMI ───────────────────────────────────────────────────────────────────────

type WmiOpenBlockFn = unsafe extern "system" fn(*const GUID, u32, *mut *mut c_void) -> u32;
type WmiCloseBlockFn = unsafe extern "system" fn(*mut c_void) -> u32;
type WmiDevInstToInstanceNameFn = unsafe extern "system" fn(*mut u16, u32, *const u16, u32) -> u32;
type WmiQuerySingleInstanceFn =
    unsafe extern "system" fn(*mut c_void, *const u16, *mut u32, *mut c_void) -> u32;
type WmiSetSingleInstanceFn =
    unsafe extern "system" fn(*mut c_void, *const u16, u32, u32, *const c_void) -> u32;

struct WmiFunctions {
    module: HMODULE,
    open_block: WmiOpenBlockFn,
    close_block: WmiCloseBlockFn,
    instance_name: WmiDevInstToInstanceNameFn,
    query: WmiQuerySingleInstanceFn,
    set: WmiSetSingleInstanceFn,
}

impl WmiFunctions {
    fn load() -> Option<Self> {
        // SAFETY: loading a system library; released in Drop.
        let module = unsafe { LoadLibraryW(w!("advapi32.dll")) }.ok()?;
        let resolve = |name: PCSTR| {
            // SAFETY: `module` is loaded for the duration of this call.
            unsafe { GetProcAddress(module, name) }
        };
        let functions = (|| {
            // SAFETY: each export has the signature of the alias it is cast
            // to.
            unsafe {
                Some(Self {
                    module,
                    open_block: std::mem::transmute(resolve(s!("WmiOpenBlock"))?),
                    close_block: std::mem::transmute(resolve(s!("WmiCloseBlock"))?),
                    instance_name: std::mem::transmute(resolve(s!("WmiDevInstToInstanceNameW"))?),
                    query: std::mem::transmute(resolve(s!("WmiQuerySingleInstanceW"))?),
                    set: std::mem::transmute(resolve(s!("WmiSetSingleInstanceW"))?),
                })
            }
        })();
        if functions.is_none() {
            error!("advapi32 lacks an expected WMI export");
            // SAFETY: loaded above and not otherwise released.
            unsafe { FreeLibrary(module).ok() };
        }
        functions
    }

    fn disable_power_saving(&self, instance_id: &str) -> HubPower {
        let id: Vec<u16> = instance_id.encode_utf16().chain(Some(0)).collect();
        let mut block: *mut c_void = std::ptr::null_mut();
        // SAFETY: the GUID and out pointer are valid; the block is closed
        // below.
        let status = unsafe { (self.open_block)(&GUID_POWER_DEVICE_ENABLE, 0, &mut block) };
        if status != ERROR_SUCCESS {
            warn!(hub = instance_id, status, "WmiOpenBlock failed");
            return HubPower::Failed;
        }
        // SAFETY: `block` was opened above.
        let outcome = unsafe { self.set_power_enable(block, instance_id, &id) };
        // SAFETY: closed exactly once.
        unsafe { (self.close_block)(block) };
        outcome
    }

    unsafe fn set_power_enable(&self, block: *mut c_void, hub: &str, id: &[u16]) -> HubPower {
        let mut instance = [0u16; MAX_PATH];
        let status = (self.instance_name)(instance.as_mut_ptr(), MAX_PATH as u32, id.as_ptr(), 0);
        if status != ERROR_SUCCESS {
            warn!(hub, status, "WmiDevInstToInstanceName failed");
            return HubPower::Failed;
        }

        let mut size = 0u32;
        let status = (self.query)(block, instance.as_ptr(), &mut size, std::ptr::null_mut());
        if (status != ERROR_SUCCESS && status != ERROR_INSUFFICIENT_BUFFER) || size == 0 {
            return HubPower::Unavailable;
        }
        let mut buffer = vec![0u8; size as usize];
        let status = (self.query)(block, instance.as_ptr(), &mut size, buffer.as_mut_ptr().cast());
        if status != ERROR_SUCCESS {
            warn!(hub, status, "WmiQuerySingleInstance failed");
            return HubPower::Failed;
        }
        if let Some(prior) = single_instance_byte(&buffer[..(size as usize).min(buffer.len())]) {
            debug!(hub, prior, "prior power-enable value");
        }

        let disabled: u8 = 0;
        let status = (self.set)(
            block,
            instance.as_ptr(),
            0,
            1,
            std::ptr::addr_of!(disabled).cast(),
        );
        if status != ERROR_SUCCESS {
            warn!(hub, status, "WmiSetSingleInstance failed");
            return HubPower::Failed;
        }
        HubPower::Disabled
    }
}

impl Drop for WmiFunctions {
    fn drop(&mut self) {
        // SAFETY: loaded in `load` and released once.
        unsafe { FreeLibrary(self.module).ok() };
    }
}

// ── SetupAPI topology ─────────────────────────────────────────────────────────

struct SetupApiTopology {
    devices: HDEVINFO,
    wmi: WmiFunctions,
}

impl SetupApiTopology {
    fn open(wmi: WmiFunctions) -> windows::core::Result<Self> {
        // SAFETY: plain SetupAPI call; the list is destroyed in Drop.
        let devices = unsafe {
            SetupDiGetClassDevsW(
                Some(&GUID_DEVINTERFACE_USB_DEVICE as *const GUID),
                PCWSTR::null(),
                HWND::default(),
                DIGCF_PRESENT | DIGCF_DEVICEINTERFACE,
            )
        }?;
        Ok(Self { devices, wmi })
    }

    /// Device path and devnode of interface `index`, `Err(())` past the end.
    fn interface(&self, index: u32) -> Result<Option<(String, u32)>, ()> {
        let mut iface = SP_DEVICE_INTERFACE_DATA {
            cbSize: std::mem::size_of::<SP_DEVICE_INTERFACE_DATA>() as u32,
            ..Default::default()
        };
        // SAFETY: `iface.cbSize` is set as the API requires.
        unsafe {
            SetupDiEnumDeviceInterfaces(
                self.devices,
                None,
                &GUID_DEVINTERFACE_USB_DEVICE,
                index,
                &mut iface,
            )
        }
        .map_err(|_| ())?;
        if iface.Flags & SPINT_ACTIVE == 0 {
            return Ok(None);
        }

        // u32 storage keeps the detail struct aligned.
        let mut storage = [0u32; 1 + MAX_PATH / 2 + 1];
        let detail = storage.as_mut_ptr().cast::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>();
        let mut devinfo = SP_DEVINFO_DATA {
            cbSize: std::mem::size_of::<SP_DEVINFO_DATA>() as u32,
            ..Default::default()
        };
        // SAFETY: `detail` points at `storage`, which is large enough for
        // the header plus MAX_PATH characters.
        let fetched = unsafe {
            (*detail).cbSize = std::mem::size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() as u32;
            SetupDiGetDeviceInterfaceDetailW(
                self.devices,
                &iface,
                Some(detail),
                std::mem::size_of_val(&storage) as u32,
                None,
                Some(&mut devinfo as *mut SP_DEVINFO_DATA),
            )
        };
        if let Err(e) = fetched {
            warn!("SetupDiGetDeviceInterfaceDetailW failed: {e}");
            return Ok(None);
        }

        // The path starts right after the 4-byte size field.
        let path_units = &as_utf16_units(&storage)[2..];
        let len = path_units
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(path_units.len());
        Ok(Some((
            String::from_utf16_lossy(&path_units[..len]),
            devinfo.DevInst,
        )))
    }
}

/// Views `u32` storage as UTF-16 units.
fn as_utf16_units(storage: &[u32]) -> &[u16] {
    // SAFETY: u16 has weaker alignment than u32 and every bit pattern is
    // valid; the length covers exactly the same bytes.
    unsafe { std::slice::from_raw_parts(storage.as_ptr().cast::<u16>(), storage.len() * 2) }
}

impl UsbTopology for SetupApiTopology {
    type Node = u32;

    fn usb_devices(&self) -> Vec<(String, u32)> {
        let mut devices = Vec::new();
        let mut index = 0;
        while let Ok(found) = self.interface(index) {
            devices.extend(found);
            index += 1;
        }
        devices
    }

    fn parent(&self, node: u32) -> Option<u32> {
        let mut parent = 0u32;
        // SAFETY: plain configuration manager call with a valid out pointer.
        let result = unsafe { CM_Get_Parent(&mut parent, node, 0) };
        if result != CR_SUCCESS {
            debug!(code = result.0, "CM_Get_Parent failed");
            return None;
        }
        Some(parent)
    }

    fn instance_id(&self, node: u32) -> Option<String> {
        let mut buffer = [0u16; 256];
        // SAFETY: `buffer` is writable for its whole length.
        let result = unsafe { CM_Get_Device_IDW(node, &mut buffer, 0) };
        if result != CR_SUCCESS {
            return None;
        }
        let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
        Some(String::from_utf16_lossy(&buffer[..len]))
    }

    fn disable_power_saving(&self, instance_id: &str) -> HubPower {
        self.wmi.disable_power_saving(instance_id)
    }
}

impl Drop for SetupApiTopology {
    fn drop(&mut self) {
        // SAFETY: destroyed exactly once.
        unsafe { SetupDiDestroyDeviceInfoList(self.devices).ok() };
    }
}
