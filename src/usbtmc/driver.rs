//! ## Driver
//!
//! [`UsbtmcDriver`] serves one USBTMC instrument as a blocking, single
//! device port. It implements [`Common`], [`Octet`] and [`Gpib`]; USB488
//! service requests arrive on the interrupt endpoint, or by polling the
//! status byte when the device has none.
//!

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use rusb::Context;

use crate::constants::gpib::{IBDCL, IBGTL, IBLLO, IBSDC};
use crate::constants::misc::{DEFAULT_TIMEOUT_DURATION, SRQ_POLL_PERIOD};
use crate::constants::{control_requests, usb488};
use crate::error::{Error, Result, UsbtmcError};
use crate::interfaces::{Common, Gpib, Interface, Octet, SrqHandler};
use crate::manager::Manager;
use crate::request::Request;
use crate::trace::{asyn_print, asyn_print_io, TraceMask};
use crate::types::{Addr, PortAttributes};
use crate::usbtmc::init::{self, FilterFn};
use crate::usbtmc::types::{
    BTag, Capabilities, CtlBTag, DeviceAddr, DeviceFilter, DeviceId, DeviceInfo, DeviceMode, Endpoint, Handle,
    UsbtmcEndpoints,
};
use crate::usbtmc::{bulk, control};

/// ### USBTMC Driver
///
/// Created by [`UsbtmcDriver::configure`]. The device is opened on connect,
/// which the manager attempts automatically before the first request.
///
pub struct UsbtmcDriver {
    port: String,
    filter: FilterFn,
    link: Mutex<Option<Link>>,
    eos: Mutex<Vec<u8>>,
    btag: BTag,
    ctl_btag: Arc<CtlBTag>,
    srq: Arc<SrqShared>,
}

/// An open device
struct Link {
    handle: Handle,
    info: DeviceInfo,
    mode: DeviceMode,
    endpoints: UsbtmcEndpoints,
    capabilities: Capabilities,
    listener: Option<Listener>,
    poller: Option<Listener>,
}

/// State shared with the SRQ threads
#[derive(Default)]
struct SrqShared {
    handler: Mutex<Option<SrqHandler>>,
    addr: AtomicI32,
    polling: AtomicBool,
}

impl SrqShared {
    fn notify(&self, port: &str, status_byte: u8) {
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler(self.addr.load(Ordering::Acquire), status_byte),
            None => tracing::debug!(port, status_byte, "SRQ without a handler"),
        }
    }
}

/// A background thread stopped and joined on drop
struct Listener {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Listener {
    fn spawn(name: String, body: impl FnOnce(Arc<AtomicBool>) + Send + 'static) -> std::io::Result<Listener> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let thread = thread::Builder::new().name(name).spawn(move || body(flag))?;
        Ok(Listener {
            stop,
            thread: Some(thread),
        })
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            // stopped from its own SRQ callback: it exits on its next pass
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                tracing::warn!("SRQ thread panicked");
            }
        }
    }
}

impl UsbtmcDriver {
    /// ### Configure
    ///
    /// Register port `port` served by the USBTMC device `filter` selects.
    ///
    /// #### Arguments
    /// - `manager` -> the manager to register with
    /// - `port` -> the port name
    /// - `filter` -> which device to open, see [`DeviceFilter`]
    ///
    pub fn configure(
        manager: &Manager,
        port: &str,
        filter: impl DeviceFilter + Send + Sync + 'static,
    ) -> anyhow::Result<Arc<UsbtmcDriver>> {
        let driver = Arc::new(UsbtmcDriver {
            port: port.to_string(),
            filter: Box::new(move |device, device_desc| filter.apply_filter(device, device_desc)),
            link: Mutex::new(None),
            eos: Mutex::new(Vec::new()),
            btag: BTag::new(),
            ctl_btag: Arc::new(CtlBTag::new()),
            srq: Arc::new(SrqShared::default()),
        });

        let attributes = PortAttributes {
            can_block: true,
            multi_device: false,
        };
        manager.register_port(port, attributes, true)?;
        manager.register_interface(port, Interface::Common(driver.clone()))?;
        manager.register_interface(port, Interface::Octet(driver.clone()))?;
        manager.register_interface(port, Interface::Gpib(driver.clone()))?;
        tracing::info!(port, "USBTMC port configured");

        Ok(driver)
    }

    /// Capabilities of the open device
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.link.lock().as_ref().map(|link| link.capabilities.clone())
    }

    /// Identifiers and address of the open device
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.link.lock().as_ref().map(|link| link.info)
    }

    // CONNECTION
    // ==========

    fn open(&self) -> anyhow::Result<Link> {
        let context = Context::new()?;
        let (device, mut handle) = init::open_device(&context, &self.filter)?;
        let device_desc = device.device_descriptor()?;

        let mut mode = init::get_usbtmc_mode(&device)?;
        init::detach_kernel_driver(&mut mode, &mut handle)?;
        let endpoints = init::get_endpoints(&mode, &device)?;

        handle.set_active_configuration(mode.config_number)?;
        handle.claim_interface(mode.interface_number)?;
        handle.set_alternate_setting(mode.interface_number, mode.setting_number)?;
        let handle: Handle = Arc::new(RwLock::new(handle));

        let capabilities = control::get_capabilities(&handle, mode.interface_number, DEFAULT_TIMEOUT_DURATION)?;
        control::clear_buffers(&handle, mode.interface_number, DEFAULT_TIMEOUT_DURATION)?;
        control::clear_halt(&handle, &endpoints.bulk_out_ep)?;
        control::clear_halt(&handle, &endpoints.bulk_in_ep)?;

        let listener = match &endpoints.interrupt_ep {
            Some(endpoint) => Some(self.spawn_listener(&handle, endpoint)?),
            None => None,
        };

        let mut link = Link {
            handle,
            info: DeviceInfo {
                id: DeviceId {
                    vendor_id: device_desc.vendor_id(),
                    product_id: device_desc.product_id(),
                },
                address: DeviceAddr {
                    bus: device.bus_number(),
                    device: device.address(),
                },
            },
            mode,
            endpoints,
            capabilities,
            listener,
            poller: None,
        };
        if link.listener.is_none() && self.srq.polling.load(Ordering::Acquire) {
            link.poller = Some(self.spawn_poller(&link)?);
        }
        Ok(link)
    }

    fn close(&self, mut link: Link) {
        // join the SRQ threads before releasing the interface
        link.listener.take();
        link.poller.take();
        let handle = link.handle.write();
        if let Err(err) = handle.release_interface(link.mode.interface_number) {
            tracing::warn!(port = %self.port, "failed to release USB interface: {}", err);
        }
        if link.mode.has_kernel_driver {
            if let Err(err) = handle.attach_kernel_driver(link.mode.interface_number) {
                tracing::warn!(port = %self.port, "failed to reattach kernel driver: {}", err);
            }
        }
    }

    /// Forward USB488 SRQ notifications from the interrupt endpoint.
    fn spawn_listener(&self, handle: &Handle, endpoint: &Endpoint) -> std::io::Result<Listener> {
        let handle = handle.clone();
        let address = endpoint.address;
        let size = (endpoint.max_packet_size as usize).max(2);
        let srq = self.srq.clone();
        let port = self.port.clone();
        Listener::spawn(format!("{}-srq", self.port), move |stop| {
            let mut buffer = vec![0u8; size];
            while !stop.load(Ordering::Acquire) {
                match handle.read().read_interrupt(address, &mut buffer, SRQ_POLL_PERIOD) {
                    Ok(n) if n >= 2 && buffer[0] == usb488::SRQ_NOTIFY => srq.notify(&port, buffer[1]),
                    Ok(_) | Err(rusb::Error::Timeout) => {}
                    Err(err) => {
                        tracing::warn!(port = %port, "interrupt endpoint failed: {}", err);
                        break;
                    }
                }
            }
        })
    }

    /// Poll the status byte of a device without an interrupt endpoint.
    fn spawn_poller(&self, link: &Link) -> std::io::Result<Listener> {
        let handle = link.handle.clone();
        let interface_number = link.mode.interface_number;
        let ctl_btag = self.ctl_btag.clone();
        let srq = self.srq.clone();
        let port = self.port.clone();
        Listener::spawn(format!("{}-poll", self.port), move |stop| {
            while !stop.load(Ordering::Acquire) {
                match control::read_status_byte(&handle, interface_number, &ctl_btag, SRQ_POLL_PERIOD) {
                    Ok(status_byte) if status_byte & usb488::STB_RQS != 0 => srq.notify(&port, status_byte),
                    Ok(_) => {}
                    Err(err) => tracing::debug!(port = %port, "status byte poll failed: {:#}", err),
                }
                thread::sleep(SRQ_POLL_PERIOD);
            }
        })
    }

    // ERRORS
    // ==========

    fn not_open(&self, user: &Request) -> Error {
        user.note(Error::Transport(UsbtmcError::NotOpen.to_string()))
    }

    fn unsupported(&self, user: &Request, what: &'static str) -> Error {
        user.note(Error::Transport(UsbtmcError::Unsupported(what).to_string()))
    }

    /// Map a USB failure. Anything but a timeout closes the device.
    fn fail(&self, user: &Request, err: anyhow::Error) -> Error {
        if is_timeout(&err) {
            return user.note(Error::TransportTimeout);
        }
        let link = self.link.lock().take();
        if let Some(link) = link {
            self.close(link);
            if let Err(disconnect) = user.manager().exception_disconnect(user) {
                tracing::debug!(port = %self.port, "exception_disconnect: {}", disconnect);
            }
        }
        user.note(Error::Transport(format!("{:#}", err)))
    }

    /// Run a control request on the open device.
    fn with_link<T>(&self, user: &Request, f: impl FnOnce(&Link) -> anyhow::Result<T>) -> Result<T> {
        let outcome = {
            let link = self.link.lock();
            match link.as_ref() {
                Some(link) => f(link),
                None => return Err(self.not_open(user)),
            }
        };
        outcome.map_err(|err| self.fail(user, err))
    }

    fn usb488_request(&self, user: &Request, b_request: u8, w_value: u16) -> Result<()> {
        let timeout = user.timeout();
        let accepted = self.with_link(user, |link| Ok(link.capabilities.accepts_ren_control))?;
        if !accepted {
            return Err(self.unsupported(user, "REN control"));
        }
        self.with_link(user, |link| {
            control::usb488_request(&link.handle, link.mode.interface_number, b_request, w_value, timeout)
        })
    }

    fn clear(&self, user: &Request) -> Result<()> {
        let timeout = user.timeout();
        self.with_link(user, |link| {
            control::clear_buffers(&link.handle, link.mode.interface_number, timeout)?;
            control::clear_halt(&link.handle, &link.endpoints.bulk_out_ep)?;
            control::clear_halt(&link.handle, &link.endpoints.bulk_in_ep)
        })
    }
}

fn is_timeout(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<rusb::Error>(), Some(rusb::Error::Timeout))
}

/// Length of `data` up to the first end-of-string.
fn strip_eos(data: &[u8], eos: &[u8]) -> usize {
    if eos.is_empty() || data.len() < eos.len() {
        return data.len();
    }
    data.windows(eos.len())
        .position(|window| window == eos)
        .unwrap_or(data.len())
}

impl Drop for UsbtmcDriver {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            self.close(link);
        }
    }
}

// INTERFACES
// ==========

impl Common for UsbtmcDriver {
    fn report(&self, out: &mut dyn fmt::Write, details: u32) -> fmt::Result {
        let link = self.link.lock();
        match link.as_ref() {
            Some(link) => {
                writeln!(
                    out,
                    "    usbtmc {:04x}:{:04x} bus {} device {} interface {}",
                    link.info.id.vendor_id,
                    link.info.id.product_id,
                    link.info.address.bus,
                    link.info.address.device,
                    link.mode.interface_number,
                )?;
                if details > 0 {
                    writeln!(out, "    {:?}", link.capabilities)?;
                    writeln!(
                        out,
                        "    SRQ via {}",
                        if link.listener.is_some() {
                            "interrupt endpoint"
                        } else if link.poller.is_some() {
                            "status byte polling"
                        } else {
                            "nothing"
                        }
                    )?;
                }
                Ok(())
            }
            None => writeln!(out, "    usbtmc device not open"),
        }
    }

    fn connect(&self, user: &Request) -> Result<()> {
        {
            let mut link = self.link.lock();
            if link.is_some() {
                return Err(user.note(Error::AlreadyConnected));
            }
            let opened = self
                .open()
                .map_err(|err| user.note(Error::Transport(format!("{:#}", err))))?;
            asyn_print!(user, TraceMask::FLOW, "opened {:?}", opened.info);
            *link = Some(opened);
        }
        user.manager().exception_connect(user)
    }

    fn disconnect(&self, user: &Request) -> Result<()> {
        let link = self.link.lock().take();
        match link {
            Some(link) => self.close(link),
            None => return Err(self.not_open(user)),
        }
        user.manager().exception_disconnect(user)
    }
}

impl Octet for UsbtmcDriver {
    fn write(&self, user: &Request, data: &[u8]) -> Result<usize> {
        let timeout = user.timeout();
        self.with_link(user, |link| {
            let mut last_btag = 0;
            let written = bulk::write(
                &link.handle,
                &self.btag,
                data,
                &link.endpoints.bulk_out_ep,
                timeout,
                &mut last_btag,
            );
            if let Err(err) = &written {
                if is_timeout(err) {
                    if let Err(abort) = control::abort_transfer(
                        &link.handle,
                        &link.endpoints.bulk_out_ep,
                        last_btag,
                        DEFAULT_TIMEOUT_DURATION,
                    ) {
                        tracing::debug!(port = %self.port, "abort bulk out: {:#}", abort);
                    }
                }
            }
            written
        })?;
        asyn_print_io!(user, TraceMask::IO_DRIVER, data, "wrote {} bytes", data.len());
        Ok(data.len())
    }

    fn read(&self, user: &Request, buf: &mut [u8]) -> Result<usize> {
        let timeout = user.timeout();
        let max = buf.len();
        let eos = self.eos.lock().clone();
        let data = self.with_link(user, |link| {
            let term_char = match eos.as_slice() {
                [byte] if link.capabilities.supports_bulk_in_term_char => Some(*byte),
                _ => None,
            };
            let mut last_btag = 0;
            let read = bulk::read(
                &link.handle,
                &self.btag,
                &link.endpoints.bulk_in_ep,
                &link.endpoints.bulk_out_ep,
                term_char,
                max,
                timeout,
                &mut last_btag,
            );
            if let Err(err) = &read {
                if is_timeout(err) {
                    if let Err(abort) = control::abort_transfer(
                        &link.handle,
                        &link.endpoints.bulk_in_ep,
                        last_btag,
                        DEFAULT_TIMEOUT_DURATION,
                    ) {
                        tracing::debug!(port = %self.port, "abort bulk in: {:#}", abort);
                    }
                }
            }
            read
        })?;
        let n = strip_eos(&data, &eos).min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        asyn_print_io!(user, TraceMask::IO_DRIVER, &buf[..n], "read {} bytes", n);
        Ok(n)
    }

    fn flush(&self, user: &Request) -> Result<()> {
        self.clear(user)
    }

    fn set_eos(&self, user: &Request, eos: &[u8]) -> Result<()> {
        asyn_print_io!(user, TraceMask::FLOW, eos, "set_eos");
        *self.eos.lock() = eos.to_vec();
        Ok(())
    }

    fn get_eos(&self, _user: &Request) -> Result<Vec<u8>> {
        Ok(self.eos.lock().clone())
    }
}

impl Gpib for UsbtmcDriver {
    fn ifc(&self, user: &Request) -> Result<()> {
        Err(self.unsupported(user, "IFC"))
    }

    fn ren(&self, user: &Request, assert: bool) -> Result<()> {
        self.usb488_request(user, control_requests::REN_CONTROL, assert as u16)
    }

    fn universal_cmd(&self, user: &Request, cmd: u8) -> Result<()> {
        match cmd {
            IBDCL => self.clear(user),
            IBLLO => self.usb488_request(user, control_requests::LOCAL_LOCKOUT, 0),
            _ => Err(self.unsupported(user, "universal command")),
        }
    }

    fn addressed_cmd(&self, user: &Request, data: &[u8]) -> Result<usize> {
        for cmd in data {
            match *cmd {
                IBSDC => self.clear(user)?,
                IBGTL => self.usb488_request(user, control_requests::GO_TO_LOCAL, 0)?,
                _ => return Err(self.unsupported(user, "addressed command")),
            }
        }
        Ok(data.len())
    }

    fn register_srq_handler(&self, user: &Request, handler: SrqHandler) -> Result<()> {
        asyn_print!(user, TraceMask::FLOW, "register_srq_handler");
        *self.srq.handler.lock() = Some(handler);
        Ok(())
    }

    fn poll_addr(&self, user: &Request, addr: Addr, enable: bool) -> Result<()> {
        self.srq.addr.store(addr, Ordering::Release);
        self.srq.polling.store(enable, Ordering::Release);
        let stopped = {
            let mut link = self.link.lock();
            let Some(link) = link.as_mut() else {
                return Ok(());
            };
            if link.listener.is_some() {
                return Ok(());
            }
            if enable {
                if link.poller.is_none() {
                    let poller = self.spawn_poller(link).map_err(|err| user.note(Error::Spawn(err)))?;
                    link.poller = Some(poller);
                }
                None
            } else {
                link.poller.take()
            }
        };
        // joined outside the lock
        drop(stopped);
        asyn_print!(user, TraceMask::FLOW, "poll_addr {} {}", addr, enable);
        Ok(())
    }
}
