//! ## Initialization
//!
//! Finding a USBTMC instrument, opening it and locating its endpoints.
//!

use crate::constants::usb::*;
use crate::error::UsbtmcError;
use crate::usbtmc::types::{DeviceAddr, DeviceFilter, DeviceId, DeviceInfo, DeviceMode, Endpoint, UsbtmcEndpoints};

use anyhow::Result;
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, Direction, TransferType, UsbContext};

/// A device filter stored by a driver for later connects
pub(crate) type FilterFn = Box<dyn Fn(&Device<Context>, &DeviceDescriptor) -> bool + Send + Sync>;

// FILTERS
// ==========

/// The first instrument found
impl DeviceFilter for () {
    fn apply_filter<T: UsbContext>(&self, _device: &Device<T>, _device_desc: &DeviceDescriptor) -> bool {
        true
    }
}

/// The instrument on this bus and device number
impl DeviceFilter for DeviceAddr {
    fn apply_filter<T: UsbContext>(&self, device: &Device<T>, _device_desc: &DeviceDescriptor) -> bool {
        *self == address_of(device)
    }
}

/// The first instrument with this vendor and product id
impl DeviceFilter for DeviceId {
    fn apply_filter<T: UsbContext>(&self, _device: &Device<T>, device_desc: &DeviceDescriptor) -> bool {
        *self == id_of(device_desc)
    }
}

/// `(vendor_id, product_id)`
impl DeviceFilter for (u16, u16) {
    fn apply_filter<T: UsbContext>(&self, device: &Device<T>, device_desc: &DeviceDescriptor) -> bool {
        let (vendor_id, product_id) = *self;
        DeviceId { vendor_id, product_id }.apply_filter(device, device_desc)
    }
}

/// An entry returned by [`list_devices`]
impl DeviceFilter for DeviceInfo {
    fn apply_filter<T: UsbContext>(&self, device: &Device<T>, device_desc: &DeviceDescriptor) -> bool {
        self.id == id_of(device_desc) && self.address == address_of(device)
    }
}

fn id_of(device_desc: &DeviceDescriptor) -> DeviceId {
    DeviceId {
        vendor_id: device_desc.vendor_id(),
        product_id: device_desc.product_id(),
    }
}

fn address_of<T: UsbContext>(device: &Device<T>) -> DeviceAddr {
    DeviceAddr {
        bus: device.bus_number(),
        device: device.address(),
    }
}

// DISCOVERY
// ==========

fn is_tmc_interface(class: u8, sub_class: u8, protocol: u8) -> bool {
    // plain USBTMC interfaces use protocol 0, USB488 ones protocol 1
    class == USBTMC_CLASS_CODE && sub_class == USBTMC_SUBCLASS_CODE && protocol <= USBTMC_PROTOCOL_CODE
}

/// The first USBTMC interface setting of any configuration.
fn find_tmc_mode<T: UsbContext>(device: &Device<T>, device_desc: &DeviceDescriptor) -> Option<DeviceMode> {
    (0..device_desc.num_configurations())
        .filter_map(|n| device.config_descriptor(n).ok())
        .find_map(|config_desc| {
            config_desc.interfaces().flat_map(|interface| interface.descriptors()).find_map(|setting| {
                is_tmc_interface(setting.class_code(), setting.sub_class_code(), setting.protocol_code()).then(|| {
                    DeviceMode {
                        config_number: config_desc.number(),
                        interface_number: setting.interface_number(),
                        setting_number: setting.setting_number(),
                        has_kernel_driver: false,
                    }
                })
            })
        })
}

/// ### List Devices
///
/// The USBTMC instruments visible through a libusb context.
///
pub fn list_devices<T: UsbContext>(context: &T) -> Result<Vec<DeviceInfo>> {
    let mut found = Vec::new();
    for device in context.devices()?.iter() {
        let Ok(device_desc) = device.device_descriptor() else {
            continue;
        };
        if find_tmc_mode(&device, &device_desc).is_some() {
            found.push(DeviceInfo {
                id: id_of(&device_desc),
                address: address_of(&device),
            });
        }
    }
    Ok(found)
}

/// ### Open Device
///
/// Open the first instrument accepted by `filter`.
///
pub(crate) fn open_device(context: &Context, filter: &FilterFn) -> Result<(Device<Context>, DeviceHandle<Context>)> {
    let candidates = context.devices()?;
    let device = candidates
        .iter()
        .find(|device| {
            device.device_descriptor().is_ok_and(|device_desc| {
                find_tmc_mode(device, &device_desc).is_some() && filter(device, &device_desc)
            })
        })
        .ok_or(UsbtmcError::DeviceNotFound)?;
    let handle = device.open()?;
    Ok((device, handle))
}

/// ### Get USBTMC Mode
///
/// The configuration, interface and setting to claim.
///
pub(crate) fn get_usbtmc_mode(device: &Device<Context>) -> Result<DeviceMode> {
    let device_desc = device.device_descriptor()?;
    find_tmc_mode(device, &device_desc).ok_or_else(|| UsbtmcError::DeviceIncompatible.into())
}

/// ### Detach Kernel Driver
///
/// If the interface uses a kernel driver, detach it while the port is connected.
///
pub(crate) fn detach_kernel_driver(mode: &mut DeviceMode, handle: &mut DeviceHandle<Context>) -> Result<()> {
    mode.has_kernel_driver = match handle.kernel_driver_active(mode.interface_number) {
        Ok(true) => {
            handle.detach_kernel_driver(mode.interface_number)?;
            true
        }
        _ => false,
    };

    Ok(())
}

/// ### Get Endpoints
///
/// Get the bulk and interrupt endpoints of the USBTMC interface.
///
pub(crate) fn get_endpoints(mode: &DeviceMode, device: &Device<Context>) -> Result<UsbtmcEndpoints> {
    let device_desc = device.device_descriptor()?;

    // config numbers are not indexes
    let config_desc = (0..device_desc.num_configurations())
        .filter_map(|n| device.config_descriptor(n).ok())
        .find(|config| config.number() == mode.config_number)
        .ok_or(UsbtmcError::InterfaceNotFound)?;
    let interface = config_desc
        .interfaces()
        .find(|inter| inter.number() == mode.interface_number)
        .ok_or(UsbtmcError::InterfaceNotFound)?;
    let interface_desc = interface
        .descriptors()
        .find(|d| d.setting_number() == mode.setting_number)
        .ok_or(UsbtmcError::InterfaceSettingNotFound)?;

    let endpoints: Vec<Endpoint> = interface_desc
        .endpoint_descriptors()
        .map(|endpoint| Endpoint {
            address: endpoint.address(),
            max_packet_size: endpoint.max_packet_size(),
            transfer_type: endpoint.transfer_type(),
            direction: endpoint.direction(),
        })
        .collect();

    let find = |transfer_type: TransferType, direction: Direction| {
        endpoints
            .iter()
            .find(|ep| ep.transfer_type == transfer_type && ep.direction == direction)
            .cloned()
    };

    Ok(UsbtmcEndpoints {
        bulk_out_ep: find(TransferType::Bulk, Direction::Out).ok_or(UsbtmcError::BulkOutEndpointNotFound)?,
        bulk_in_ep: find(TransferType::Bulk, Direction::In).ok_or(UsbtmcError::BulkInEndpointNotFound)?,
        interrupt_ep: find(TransferType::Interrupt, Direction::In),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usb488_and_plain_interfaces_match() {
        assert!(is_tmc_interface(0xFE, 0x03, 0x00));
        assert!(is_tmc_interface(0xFE, 0x03, 0x01));
        assert!(!is_tmc_interface(0xFE, 0x03, 0x02));
        assert!(!is_tmc_interface(0xFE, 0x01, 0x01));
        assert!(!is_tmc_interface(0x08, 0x03, 0x01));
    }
}
