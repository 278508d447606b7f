//! ## Connect
//!
//! Connection state of ports and devices: automatic connection, the
//! connect/disconnect notifications drivers raise, enable and auto-connect.
//!

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::MutexGuard;

use crate::constants::queue::AUTO_CONNECT_SPACING;
use crate::error::{Error, Result};
use crate::manager::port::{Port, PortState};
use crate::manager::Manager;
use crate::request::Request;
use crate::trace::{asyn_print, TraceMask};
use crate::types::{Addr, Exception};

/// ### Auto Connect
///
/// Try to connect the port (`addr` = -1) or one device if it is disconnected
/// and auto-connects. Attempts on the same target are spaced at least
/// `AUTO_CONNECT_SPACING` apart. The state lock is released during the attempt.
///
/// #### Returns
/// If the attempt was held back by the spacing rule, how long until it may run.
///
pub(crate) fn auto_connect(
    manager: &Manager,
    port: &Arc<Port>,
    state: &mut MutexGuard<'_, PortState>,
    addr: Addr,
) -> Option<Duration> {
    let dp = state.dp_mut(addr);
    if dp.connected || !dp.auto_connect || dp.auto_connect_active {
        return None;
    }
    if let Some(last) = dp.last_connect_disconnect {
        let elapsed = last.elapsed();
        if elapsed < AUTO_CONNECT_SPACING {
            return Some(AUTO_CONNECT_SPACING - elapsed);
        }
    }
    dp.last_connect_disconnect = Some(Instant::now());
    dp.auto_connect_active = true;

    let result = MutexGuard::unlocked(state, || connect_attempt(manager, port, addr));

    state.dp_mut(addr).auto_connect_active = false;
    if let Err(err) = result {
        asyn_print!(port, TraceMask::ERROR, "auto connect addr {} failed: {}", addr, err);
    }
    None
}

/// Connect with a throwaway request bound to `addr`.
fn connect_attempt(manager: &Manager, port: &Arc<Port>, addr: Addr) -> Result<()> {
    let req = manager.create_request(|_| {});
    manager.attach(&req, port, addr)?;
    let result = manager.find_common(&req).and_then(|common| {
        let _sync = port.synchronous.lock();
        common.connect(&req)
    });
    if let Err(err) = &result {
        asyn_print!(req, TraceMask::ERROR, "connect attempt failed: {}", err);
    }
    manager.free_request(&req)?;
    result
}

impl Manager {
    /// ### Exception Connect
    ///
    /// Called by a driver once the port or device of `req` is connected.
    ///
    pub fn exception_connect(&self, req: &Request) -> Result<()> {
        self.set_connected(req, true).map_err(|e| req.note(e))
    }

    /// ### Exception Disconnect
    ///
    /// Called by a driver once the port or device of `req` is disconnected.
    ///
    pub fn exception_disconnect(&self, req: &Request) -> Result<()> {
        self.set_connected(req, false).map_err(|e| req.note(e))
    }

    fn set_connected(&self, req: &Request, connected: bool) -> Result<()> {
        let binding = req.binding()?;
        {
            let mut state = binding.port.state.lock();
            let dp = state.dp_mut(binding.addr);
            if dp.connected == connected {
                return Err(if connected {
                    Error::AlreadyConnected
                } else {
                    Error::DeviceNotConnected {
                        port: binding.port.name.clone(),
                        addr: binding.addr,
                    }
                });
            }
            dp.connected = connected;
            dp.last_connect_disconnect = Some(Instant::now());
            if connected {
                dp.number_connects += 1;
            }
        }
        asyn_print!(
            req,
            TraceMask::FLOW,
            "{}",
            if connected { "connected" } else { "disconnected" }
        );
        self.exception_occurred(req, Exception::Connect)
    }

    /// ### Enable
    ///
    /// A disabled port or device is not served; queued requests wait.
    ///
    pub fn enable(&self, req: &Request, enabled: bool) -> Result<()> {
        self.with_dp(req, |state, addr| state.dp_mut(addr).enabled = enabled)?;
        self.exception_occurred(req, Exception::Enable)
    }

    /// ### Auto Connect
    ///
    /// Turn automatic connection of the port or device of `req` on or off.
    ///
    pub fn auto_connect(&self, req: &Request, auto_connect: bool) -> Result<()> {
        self.with_dp(req, |state, addr| state.dp_mut(addr).auto_connect = auto_connect)?;
        self.exception_occurred(req, Exception::AutoConnect)
    }

    /// ### Set Trace Mask
    ///
    /// Setting the mask of a port sets it on every device of the port too.
    ///
    pub fn set_trace_mask(&self, req: &Request, mask: TraceMask) -> Result<()> {
        self.with_dp(req, |state, addr| match state.device_key(addr) {
            Some(addr) => state.dp_mut(addr).trace.store(mask.bits(), Ordering::Relaxed),
            None => {
                state.dpc.trace.store(mask.bits(), Ordering::Relaxed);
                for device in state.devices.values() {
                    device.trace.store(mask.bits(), Ordering::Relaxed);
                }
            }
        })?;
        self.exception_occurred(req, Exception::TraceMask)
    }
}
