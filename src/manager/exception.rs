//! ## Exception
//!
//! Broadcast of connection, enable, auto-connect and trace changes to the
//! exception callbacks of a port or device.
//!

use std::sync::{Arc, Weak};

use crate::error::{Error, Result};
use crate::manager::Manager;
use crate::request::{Request, RequestInner};
use crate::trace::{asyn_print, TraceMask};
use crate::types::Exception;

/// Called with the registering request and the change that happened
pub type ExceptionCallback = Arc<dyn Fn(&Request, Exception) + Send + Sync>;

pub(crate) struct ExceptionUser {
    pub key: usize,
    pub request: Weak<RequestInner>,
    pub callback: ExceptionCallback,
}

impl Manager {
    /// ### Exception Callback Add
    ///
    /// Register `callback` for changes of the port or device `req` is
    /// connected to. A request may register one callback.
    ///
    pub fn exception_callback_add(
        &self,
        req: &Request,
        callback: impl Fn(&Request, Exception) + Send + Sync + 'static,
    ) -> Result<()> {
        self.try_exception_add(req, Arc::new(callback))
            .map_err(|e| req.note(e))
    }

    fn try_exception_add(&self, req: &Request, callback: ExceptionCallback) -> Result<()> {
        let binding = req.binding()?;
        let port = &binding.port;
        let mut state = port.state.lock();
        while state.dp(binding.addr).exception_active {
            port.exception_done.wait(&mut state);
        }
        let slot = state.slots.get_mut(binding.key).ok_or(Error::NotConnected)?;
        if slot.exception_user {
            return Err(Error::ExceptionUserActive);
        }
        slot.exception_user = true;
        state.dp_mut(binding.addr).exception_users.push(ExceptionUser {
            key: binding.key,
            request: Arc::downgrade(&req.0),
            callback,
        });
        Ok(())
    }

    /// ### Exception Callback Remove
    ///
    /// Waits for a broadcast in progress to finish first.
    ///
    pub fn exception_callback_remove(&self, req: &Request) -> Result<()> {
        self.try_exception_remove(req).map_err(|e| req.note(e))
    }

    fn try_exception_remove(&self, req: &Request) -> Result<()> {
        let binding = req.binding()?;
        let port = &binding.port;
        let mut state = port.state.lock();
        while state.dp(binding.addr).exception_active {
            port.exception_done.wait(&mut state);
        }
        let slot = state.slots.get_mut(binding.key).ok_or(Error::NotConnected)?;
        if !slot.exception_user {
            return Err(Error::NotExceptionUser);
        }
        slot.exception_user = false;
        state
            .dp_mut(binding.addr)
            .exception_users
            .retain(|user| user.key != binding.key);
        Ok(())
    }

    /// ### Exception Occurred
    ///
    /// Call every exception callback of the port or device of `req`, in
    /// registration order, with no lock held.
    ///
    pub fn exception_occurred(&self, req: &Request, exception: Exception) -> Result<()> {
        let binding = req.binding().map_err(|e| req.note(e))?;
        let port = &binding.port;
        let listeners: Vec<(Request, ExceptionCallback)> = {
            let mut state = port.state.lock();
            let dp = state.dp_mut(binding.addr);
            dp.exception_active = true;
            dp.exception_users
                .iter()
                .filter_map(|user| {
                    let request = Request(user.request.upgrade()?);
                    Some((request, user.callback.clone()))
                })
                .collect()
        };

        asyn_print!(req, TraceMask::FLOW, "exception {:?}", exception);
        for (request, callback) in &listeners {
            callback(request, exception);
        }

        let mut state = port.state.lock();
        state.dp_mut(binding.addr).exception_active = false;
        state.queue_state_change = true;
        port.exception_done.notify_all();
        drop(state);
        port.signal();
        Ok(())
    }
}
