//! ## Interfaces
//!
//! The traits a transport driver implements to be served by a port.
//!
//! Every method receives the [`Request`] on whose behalf it runs, so a driver
//! can read its address, I/O timeout and write an error message. I/O methods
//! are called from a process callback or a connect attempt, with the port's
//! synchronous lock held.
//!

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::request::Request;
use crate::types::Addr;

/// Handler invoked by a GPIB driver when a device raises a service request.
///
/// Receives the address of the device and its status byte.
pub type SrqHandler = Arc<dyn Fn(Addr, u8) + Send + Sync>;

/// ### Common
///
/// Mandatory for every port: connection management and reporting.
///
pub trait Common: Send + Sync {
    /// ### Report
    ///
    /// Write a description of the driver's state.
    ///
    /// #### Arguments
    /// - `out` -> where to write the report
    /// - `details` -> level of detail, 0 is a one-liner
    ///
    fn report(&self, out: &mut dyn fmt::Write, details: u32) -> fmt::Result;

    /// ### Connect
    ///
    /// Connect the port (address -1) or the device the request is bound to.
    /// On success the driver must call [`crate::Manager::exception_connect`].
    ///
    fn connect(&self, user: &Request) -> Result<()>;

    /// ### Disconnect
    ///
    /// On success the driver must call [`crate::Manager::exception_disconnect`].
    ///
    fn disconnect(&self, user: &Request) -> Result<()>;
}

/// ### Octet
///
/// Byte stream I/O.
///
pub trait Octet: Send + Sync {
    /// Write `data`, returning the number of bytes written.
    fn write(&self, user: &Request, data: &[u8]) -> Result<usize>;

    /// ### Read
    ///
    /// Read into `buf`, returning the number of bytes read. A read stops
    /// after the end-of-string, which is not returned. A timeout is reported
    /// either as `Ok(0)` or as [`crate::Error::TransportTimeout`].
    ///
    fn read(&self, user: &Request, buf: &mut [u8]) -> Result<usize>;

    /// Discard any buffered input.
    fn flush(&self, user: &Request) -> Result<()>;

    /// Set the input end-of-string; an empty slice disables it.
    fn set_eos(&self, user: &Request, eos: &[u8]) -> Result<()>;

    /// The input end-of-string in effect
    fn get_eos(&self, user: &Request) -> Result<Vec<u8>>;
}

/// ### Gpib
///
/// IEEE-488 bus management.
///
pub trait Gpib: Send + Sync {
    /// Pulse interface clear
    fn ifc(&self, user: &Request) -> Result<()>;

    /// Assert or release remote enable
    fn ren(&self, user: &Request, assert: bool) -> Result<()>;

    /// Send a universal command
    fn universal_cmd(&self, user: &Request, cmd: u8) -> Result<()>;

    /// Send addressed commands to the request's device, returning the count sent
    fn addressed_cmd(&self, user: &Request, data: &[u8]) -> Result<usize>;

    /// ### Register SRQ Handler
    ///
    /// Install the handler called for every service request the driver sees.
    ///
    fn register_srq_handler(&self, user: &Request, handler: SrqHandler) -> Result<()>;

    /// Enable or disable serial polling of `addr`
    fn poll_addr(&self, user: &Request, addr: Addr, enable: bool) -> Result<()>;
}

/// ### Interfaces
///
/// The interfaces registered on a port.
///
#[derive(Clone, Default)]
pub struct Interfaces {
    pub common: Option<Arc<dyn Common>>,
    pub octet: Option<Arc<dyn Octet>>,
    pub gpib: Option<Arc<dyn Gpib>>,
}

/// ### Interface
///
/// A single interface handed to [`crate::Manager::register_interface`].
///
#[derive(Clone)]
pub enum Interface {
    Common(Arc<dyn Common>),
    Octet(Arc<dyn Octet>),
    Gpib(Arc<dyn Gpib>),
}

impl Interface {
    pub fn name(&self) -> &'static str {
        match self {
            Interface::Common(_) => "asynCommon",
            Interface::Octet(_) => "asynOctet",
            Interface::Gpib(_) => "asynGpib",
        }
    }
}
