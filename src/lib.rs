//! # Rust Asyn
//!
//! Asynchronous request manager for instrument links, with GPIB device support
//! and a USBTMC transport.
//!
//! Many clients share one physical link. Each link is registered as a *port*;
//! clients create [`Request`]s, connect them to a port and address, and queue
//! them. A blocking port runs one worker thread that serves its four priority
//! queues in order; a synchronous port runs each request as it is queued.
//! Transports plug in through the [`Common`], [`Octet`] and [`Gpib`] traits.
//!
//! On top of the manager, [`gpib::DeviceSupport`] runs command tables
//! against GPIB-style instruments: write/read transactions, bus commands, and
//! reads that wait for the device to raise a service request (SRQ).
//!
//! ## Usage
//!
//! To use, add the following line to your project's Cargo.toml dependencies:
//! ```toml
//! rs-asyn = "0.1"
//! ```
//!
//! ## Example
//!
//! The example below queues a request on a USBTMC instrument and reads its
//! identification string.
//!
//! ```no_run
//! use rs_asyn::{Manager, Priority};
//! use rs_asyn::usbtmc::{DeviceId, UsbtmcDriver};
//!
//! fn main() -> anyhow::Result<()> {
//!     let manager = Manager::new()?;
//!     UsbtmcDriver::configure(&manager, "scope", DeviceId { vendor_id: 0x0699, product_id: 0x0368 })?;
//!
//!     let request = manager.create_request(|req| {
//!         let manager = req.manager();
//!         let octet = manager.find_octet(req).expect("octet interface");
//!         octet.write(req, b"*IDN?\n").expect("write");
//!         let mut buf = [0u8; 256];
//!         let n = octet.read(req, &mut buf).expect("read");
//!         println!("{}", String::from_utf8_lossy(&buf[..n]));
//!     });
//!     manager.connect_device(&request, "scope", 0)?;
//!     manager.queue_request(&request, Priority::Medium, None)?;
//!     Ok(())
//! }
//! ```
//!

mod constants;
mod error;
mod event;
mod interfaces;
mod request;
mod timer;
mod trace;
mod types;
mod manager {
    pub mod arena;
    pub mod connect;
    pub mod exception;
    pub mod port;
    pub mod queue;
    pub mod registry;
    pub mod report;

    pub use registry::Manager;
}
pub mod gpib {
    //! ## GPIB Device Support
    //!
    //! Command tables run against GPIB-style instruments through a
    //! [`crate::Manager`] port named `L<link>`.
    //!
    mod cmd;
    mod engine;
    mod format;
    mod record;
    mod session;
    mod support;

    pub use cmd::{CmdType, Convert, GpibCmd, GpibLink, ParmBlock};
    pub use format::{sprintf, sscanf, Value};
    pub use record::{Alarm, GpibHook, GpibRecord};
    pub use session::DeviceSession;
    pub use support::DeviceSupport;
}
pub mod usbtmc {
    //! ## USBTMC Transport
    //!
    //! A driver for USB Test & Measurement Class instruments, including the
    //! USB488 subclass, served as a blocking single-device port.
    //!
    mod bulk;
    mod control;
    mod driver;
    mod init;
    mod types;

    pub use driver::UsbtmcDriver;
    pub use init::list_devices;
    pub use types::{Capabilities, DeviceAddr, DeviceFilter, DeviceId, DeviceInfo, DeviceMode};
}

pub use constants::gpib::{DEFAULT_QUEUE_TIMEOUT, DEFAULT_SRQ_WAIT_TIMEOUT};
pub use constants::queue::{AUTO_CONNECT_SPACING, ERROR_MESSAGE_SIZE};
pub use error::{Error, Result};
pub use event::Event;
pub use interfaces::{Common, Gpib, Interface, Interfaces, Octet, SrqHandler};
pub use manager::exception::ExceptionCallback;
pub use manager::queue::LockGuard;
pub use manager::report::{DpReport, PortReport};
pub use manager::Manager;
pub use request::{Callback, Request};
pub use timer::{TimerId, TimerQueue};
pub use trace::{escape, TraceMask};
pub use types::{Addr, Exception, LockScope, PortAttributes, Priority, PORT_ADDR};
