//! ## Registry
//!
//! The [`Manager`] handle: port registration, interface lookup and the
//! request lifecycle (create, connect, disconnect, free).
//!

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::interfaces::{Common, Gpib, Interface, Octet};
use crate::manager::port::{self, Port, UserSlot};
use crate::request::{Binding, Callback, Request};
use crate::timer::TimerQueue;
use crate::trace::{asyn_print, TraceMask};
use crate::types::{Addr, PortAttributes, Priority};

pub(crate) struct ManagerInner {
    ports: Mutex<HashMap<String, Arc<Port>>>,
    timers: Arc<TimerQueue>,
    next_request_id: AtomicU64,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        shutdown_ports(self.ports.lock().values());
    }
}

/// ### Manager
///
/// Owns every port. Cheap to clone; requests keep their manager alive.
///
#[derive(Clone)]
pub struct Manager(Arc<ManagerInner>);

impl Manager {
    /// ### New
    ///
    /// Create a manager and start its timer thread.
    ///
    pub fn new() -> Result<Manager> {
        Ok(Manager(Arc::new(ManagerInner {
            ports: Mutex::new(HashMap::new()),
            timers: Arc::new(TimerQueue::new("asynTimer")?),
            next_request_id: AtomicU64::new(1),
        })))
    }

    pub(crate) fn upgrade(weak: &Weak<ManagerInner>) -> Option<Manager> {
        weak.upgrade().map(Manager)
    }

    pub(crate) fn timers(&self) -> &Arc<TimerQueue> {
        &self.0.timers
    }

    pub(crate) fn port(&self, name: &str) -> Result<Arc<Port>> {
        self.0
            .ports
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PortNotFound(name.to_string()))
    }

    /// Names of every registered port
    pub fn port_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.ports.lock().keys().cloned().collect();
        names.sort();
        names
    }

    // PORTS AND INTERFACES
    // ==========

    /// ### Register Port
    ///
    /// Register a port. Blocking ports get their own worker thread.
    ///
    /// #### Arguments
    /// - `name` -> the unique port name
    /// - `attributes` -> blocking and multi-device flags
    /// - `auto_connect` -> connect the port and its devices automatically
    ///
    pub fn register_port(&self, name: &str, attributes: PortAttributes, auto_connect: bool) -> Result<()> {
        let port = {
            let mut ports = self.0.ports.lock();
            if ports.contains_key(name) {
                return Err(Error::PortAlreadyRegistered(name.to_string()));
            }
            let port = Arc::new(Port::new(name, attributes, auto_connect, self.0.timers.clone()));
            ports.insert(name.to_string(), port.clone());
            port
        };

        if attributes.can_block {
            let worker = {
                let port = port.clone();
                let manager = Arc::downgrade(&self.0);
                thread::Builder::new()
                    .name(name.to_string())
                    .spawn(move || port::run(port, manager))?
            };
            port.set_worker(worker);
        }
        tracing::debug!(port = name, ?attributes, auto_connect, "port registered");
        Ok(())
    }

    /// ### Register Interface
    ///
    /// Each interface type may be registered once per port.
    ///
    pub fn register_interface(&self, port: &str, interface: Interface) -> Result<()> {
        let port = self.port(port)?;
        let mut state = port.state.lock();
        let interfaces = &mut state.interfaces;
        let name = interface.name();
        let taken = match interface {
            Interface::Common(common) => interfaces.common.replace(common).is_some(),
            Interface::Octet(octet) => interfaces.octet.replace(octet).is_some(),
            Interface::Gpib(gpib) => interfaces.gpib.replace(gpib).is_some(),
        };
        if taken {
            return Err(Error::InterfaceAlreadyRegistered(name));
        }
        Ok(())
    }

    /// ### Interpose Octet
    ///
    /// Put `octet` in front of the octet interface of a port (`addr` = -1) or
    /// of one device. Later lookups return `octet`.
    ///
    /// #### Returns
    /// The interface `octet` now sits in front of, for it to forward to.
    ///
    pub fn interpose_octet(&self, port: &str, addr: Addr, octet: Arc<dyn Octet>) -> Result<Arc<dyn Octet>> {
        let port = self.port(port)?;
        let mut state = port.state.lock();
        let base = state
            .interfaces
            .octet
            .clone()
            .ok_or(Error::InterfaceNotFound("asynOctet"))?;
        let previous = match state.device_key(addr) {
            Some(addr) => {
                let previous = state.dp_mut(addr).interpose.replace(octet);
                previous.or_else(|| state.port_interpose.clone())
            }
            None => state.port_interpose.replace(octet),
        };
        Ok(previous.unwrap_or(base))
    }

    pub fn find_common(&self, req: &Request) -> Result<Arc<dyn Common>> {
        let binding = req.binding().map_err(|e| req.note(e))?;
        let state = binding.port.state.lock();
        state
            .interfaces
            .common
            .clone()
            .ok_or_else(|| req.note(Error::InterfaceNotFound("asynCommon")))
    }

    /// Octet interface of the request's device, interposes first
    pub fn find_octet(&self, req: &Request) -> Result<Arc<dyn Octet>> {
        let binding = req.binding().map_err(|e| req.note(e))?;
        let state = binding.port.state.lock();
        let device = state
            .device_key(binding.addr)
            .and_then(|addr| state.devices.get(&addr))
            .and_then(|dp| dp.interpose.clone());
        device
            .or_else(|| state.port_interpose.clone())
            .or_else(|| state.interfaces.octet.clone())
            .ok_or_else(|| req.note(Error::InterfaceNotFound("asynOctet")))
    }

    pub fn find_gpib(&self, req: &Request) -> Result<Arc<dyn Gpib>> {
        let binding = req.binding().map_err(|e| req.note(e))?;
        let state = binding.port.state.lock();
        state
            .interfaces
            .gpib
            .clone()
            .ok_or_else(|| req.note(Error::InterfaceNotFound("asynGpib")))
    }

    // REQUESTS
    // ==========

    /// ### Create Request
    ///
    /// #### Arguments
    /// - `process` -> called by the port when the request is dequeued
    ///
    pub fn create_request(&self, process: impl Fn(&Request) + Send + Sync + 'static) -> Request {
        self.new_request(Arc::new(process), None)
    }

    /// ### Create Request With Timeout
    ///
    /// #### Arguments
    /// - `process` -> called by the port when the request is dequeued
    /// - `timeout` -> called instead if the request times out in the queue
    ///
    pub fn create_request_with_timeout(
        &self,
        process: impl Fn(&Request) + Send + Sync + 'static,
        timeout: impl Fn(&Request) + Send + Sync + 'static,
    ) -> Request {
        self.new_request(Arc::new(process), Some(Arc::new(timeout)))
    }

    /// ### Duplicate Request
    ///
    /// A new request with the callbacks of `req`, connected to the same
    /// port and address.
    ///
    pub fn duplicate_request(&self, req: &Request) -> Result<Request> {
        let duplicate = self.new_request(req.process_callback(), req.timeout_callback());
        duplicate.set_timeout(req.timeout());
        duplicate.set_reason(req.reason());
        if let Ok(binding) = req.binding() {
            self.attach(&duplicate, &binding.port, binding.addr)?;
        }
        Ok(duplicate)
    }

    fn new_request(&self, process: Callback, timeout: Option<Callback>) -> Request {
        let id = self.0.next_request_id.fetch_add(1, Ordering::Relaxed);
        Request::new(self.clone(), id, process, timeout)
    }

    /// ### Connect Device
    ///
    /// Connect `req` to a port and address. If that port or device
    /// auto-connects and is not connected, a connect request is queued at
    /// `Priority::Connect`.
    ///
    pub fn connect_device(&self, req: &Request, port: &str, addr: Addr) -> Result<()> {
        let port = self.port(port).map_err(|e| req.note(e))?;
        self.attach(req, &port, addr).map_err(|e| req.note(e))?;

        let needs_connect = {
            let state = port.state.lock();
            let dp = state.dp(addr);
            dp.auto_connect && !dp.connected
        };
        if needs_connect && port.attributes.can_block {
            let connecter = self.new_request(Arc::new(connect_callback), None);
            self.attach(&connecter, &port, addr)?;
            self.queue_request(&connecter, Priority::Connect, None)?;
        }
        asyn_print!(req, TraceMask::FLOW, "connect device");
        Ok(())
    }

    /// Bind `req` to a slot of `port`.
    pub(crate) fn attach(&self, req: &Request, port: &Arc<Port>, addr: Addr) -> Result<()> {
        if req.is_freed() {
            return Err(Error::Freed);
        }
        if req.is_bound() {
            return Err(Error::AlreadyConnected);
        }
        let mut state = port.state.lock();
        let trace = state.dp_mut(addr).trace.clone();
        let key = state.slots.insert(UserSlot::new(req, addr));
        req.bind(Binding {
            port: port.clone(),
            addr,
            key,
            trace,
        });
        Ok(())
    }

    /// ### Disconnect
    ///
    /// Release the binding of `req`. Fails if it is queued, holds a lock or
    /// is an exception user.
    ///
    pub fn disconnect(&self, req: &Request) -> Result<()> {
        self.detach(req).map_err(|e| req.note(e))
    }

    fn detach(&self, req: &Request) -> Result<()> {
        let binding = req.binding()?;
        let mut state = binding.port.state.lock();
        let slot = state.slots.get(binding.key).ok_or(Error::NotConnected)?;
        if slot.queued {
            return Err(Error::IsQueued);
        }
        if slot.lock_port > 0 || slot.lock_device > 0 {
            return Err(Error::AlreadyLocked);
        }
        if slot.exception_user {
            return Err(Error::ExceptionUserActive);
        }
        state.slots.remove(binding.key);
        drop(state);
        req.unbind();
        Ok(())
    }

    /// ### Free Request
    ///
    /// Disconnect `req` if needed and mark it freed; a freed request can not
    /// be connected again.
    ///
    pub fn free_request(&self, req: &Request) -> Result<()> {
        if req.is_bound() {
            self.disconnect(req)?;
        }
        req.mark_freed();
        Ok(())
    }

    // STATE QUERIES
    // ==========

    pub fn is_connected(&self, req: &Request) -> Result<bool> {
        self.with_dp(req, |state, addr| state.dp(addr).connected)
    }

    pub fn is_enabled(&self, req: &Request) -> Result<bool> {
        self.with_dp(req, |state, addr| state.dp(addr).enabled)
    }

    pub fn is_auto_connect(&self, req: &Request) -> Result<bool> {
        self.with_dp(req, |state, addr| state.dp(addr).auto_connect)
    }

    pub fn can_block(&self, req: &Request) -> Result<bool> {
        Ok(req.binding().map_err(|e| req.note(e))?.port.attributes.can_block)
    }

    pub fn is_multi_device(&self, req: &Request) -> Result<bool> {
        Ok(req.binding().map_err(|e| req.note(e))?.port.attributes.multi_device)
    }

    /// Trace mask of the port or device `req` is connected to
    pub fn trace_mask(&self, req: &Request) -> Result<TraceMask> {
        self.with_dp(req, |state, addr| state.dp(addr).trace_mask())
    }

    pub(crate) fn with_dp<T>(
        &self,
        req: &Request,
        f: impl FnOnce(&mut crate::manager::port::PortState, Addr) -> T,
    ) -> Result<T> {
        let binding = req.binding().map_err(|e| req.note(e))?;
        let mut state = binding.port.state.lock();
        Ok(f(&mut state, binding.addr))
    }

    /// ### Shutdown
    ///
    /// Stop every port worker. Queued requests are dropped without running.
    ///
    pub fn shutdown(&self) {
        let ports: Vec<Arc<Port>> = self.0.ports.lock().values().cloned().collect();
        shutdown_ports(ports.iter());
    }
}

fn shutdown_ports<'a>(ports: impl Iterator<Item = &'a Arc<Port>>) {
    for port in ports {
        let mut dropped = Vec::new();
        {
            let mut state = port.state.lock();
            if state.shutdown {
                continue;
            }
            state.shutdown = true;
            let keys: Vec<usize> = state.queues.iter().flatten().copied().collect();
            for key in keys {
                if let Some((request, timer)) = state.dequeue(key) {
                    if let Some(timer) = timer {
                        port.timers.cancel(timer);
                    }
                    dropped.push(request);
                }
            }
        }
        drop(dropped);
        port.notify.signal();
        if port.is_worker_thread() {
            continue;
        }
        if let Some(worker) = port.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

/// Process callback of the request queued by `connect_device`.
fn connect_callback(req: &Request) {
    let manager = req.manager().clone();
    match manager.is_connected(req) {
        Ok(false) => {
            let result = manager.find_common(req).and_then(|common| common.connect(req));
            if let Err(err) = result {
                asyn_print!(req, TraceMask::ERROR, "connect failed: {}", err);
            }
        }
        Ok(true) => {}
        Err(err) => asyn_print!(req, TraceMask::ERROR, "connect request: {}", err),
    }
    if let Err(err) = manager.free_request(req) {
        asyn_print!(req, TraceMask::ERROR, "free connect request: {}", err);
    }
}

