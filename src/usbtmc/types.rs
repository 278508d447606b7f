//! ## Types
//!
//! The types used by the USBTMC transport.
//!

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rusb::{Context, DeviceDescriptor, DeviceHandle, Direction, TransferType};

/// ### Handle
///
/// A libusb device handle shared between the port thread and the SRQ threads.
/// Transfers take the read lock; claiming, releasing and clearing halts take
/// the write lock.
///
pub type Handle = Arc<RwLock<DeviceHandle<Context>>>;

/// ### Device Filter
///
/// Picks the instrument to open among the USBTMC devices present:
/// - `()` -> the first one found
/// - `DeviceId` or `(vendor_id, product_id)` -> by USB identifiers
/// - `DeviceAddr` -> by bus and device number
/// - `DeviceInfo` -> by both, as returned by `list_devices`
///
pub trait DeviceFilter {
    fn apply_filter<T: rusb::UsbContext>(&self, device: &rusb::Device<T>, device_desc: &DeviceDescriptor) -> bool;
}

/// USB identifiers of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Bus and device number of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddr {
    pub bus: u8,
    pub device: u8,
}

/// Identifiers and address of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub address: DeviceAddr,
}

/// Hand out the value in `tag` and advance it through `first..=last`.
fn next_tag(tag: &AtomicU8, first: u8, last: u8) -> u8 {
    let advance = |current: u8| Some(if current >= last { first } else { current + 1 });
    match tag.fetch_update(Ordering::Relaxed, Ordering::Relaxed, advance) {
        Ok(current) | Err(current) => current,
    }
}

/// ### bTag
///
/// Tags bulk transfers so replies can be matched to requests. Runs 1..=255,
/// never 0.
///
#[derive(Debug)]
pub struct BTag(AtomicU8);

impl BTag {
    pub fn new() -> BTag {
        BTag(AtomicU8::new(1))
    }

    pub fn get(&self) -> u8 {
        next_tag(&self.0, 1, 255)
    }
}

impl Default for BTag {
    fn default() -> Self {
        BTag::new()
    }
}

/// ### Control bTag
///
/// The bTag of USB488 control requests such as READ_STATUS_BYTE. Cycles
/// through 2..=127.
///
#[derive(Debug)]
pub struct CtlBTag(AtomicU8);

impl CtlBTag {
    pub fn new() -> CtlBTag {
        CtlBTag(AtomicU8::new(2))
    }

    pub fn get(&self) -> u8 {
        next_tag(&self.0, 2, 127)
    }
}

impl Default for CtlBTag {
    fn default() -> Self {
        CtlBTag::new()
    }
}

/// ### Device Mode
///
/// Where the USBTMC function lives on the device.
///
#[derive(Debug, Clone, Default)]
pub struct DeviceMode {
    pub config_number: u8,
    pub interface_number: u8,
    /// Alternate setting of the interface
    pub setting_number: u8,
    /// A kernel driver was detached on connect and is reattached on disconnect
    pub has_kernel_driver: bool,
}

/// An endpoint of the USBTMC interface
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub address: u8,
    pub max_packet_size: u16,
    pub transfer_type: TransferType,
    pub direction: Direction,
}

/// ### USBTMC Endpoints
///
/// Bulk OUT and bulk IN are mandatory. USB488 devices that report service
/// requests also have an interrupt IN endpoint.
///
#[derive(Clone, Debug)]
pub struct UsbtmcEndpoints {
    pub bulk_out_ep: Endpoint,
    pub bulk_in_ep: Endpoint,
    pub interrupt_ep: Option<Endpoint>,
}

/// ### Capabilities
///
/// A decoded GET_CAPABILITIES response.
///
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// USBTMC version, BCD
    pub bcd_version: u16,
    pub accepts_indicator_pulse_request: bool,
    pub is_talk_only: bool,
    pub is_listen_only: bool,
    /// Can end a bulk IN transfer on a term char
    pub supports_bulk_in_term_char: bool,
    /// USB488 version, 0 if the interface is plain USBTMC
    pub usb488_bcd_version: u16,
    /// Accepts REN_CONTROL, GO_TO_LOCAL and LOCAL_LOCKOUT
    pub accepts_ren_control: bool,
    /// Accepts the TRIGGER bulk message
    pub accepts_trigger: bool,
    /// Understands SCPI
    pub is_scpi: bool,
    /// Implements service request (SR1)
    pub supports_service_request: bool,
}
