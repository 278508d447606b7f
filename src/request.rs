//! ## Request
//!
//! The handle a client uses to talk to a port: a process callback, an optional
//! queue timeout callback, an I/O timeout, a reason code and a fixed size
//! error message.
//!

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::constants::{misc::DEFAULT_TIMEOUT_DURATION, queue::ERROR_MESSAGE_SIZE};
use crate::error::{Error, Result};
use crate::manager::{port::Port, Manager};
use crate::trace::TraceMask;
use crate::types::Addr;

/// Process and queue timeout callbacks
pub type Callback = Arc<dyn Fn(&Request) + Send + Sync>;

/// ### Binding
///
/// Where a connected request points: its port, address and arena slot.
///
#[derive(Clone)]
pub(crate) struct Binding {
    pub port: Arc<Port>,
    pub addr: Addr,
    pub key: usize,
    /// Trace mask of the device (or port) the request is bound to
    pub trace: Arc<AtomicU32>,
}

pub(crate) struct RequestInner {
    id: u64,
    manager: Manager,
    process: Callback,
    timeout: Option<Callback>,
    binding: Mutex<Option<Binding>>,
    io_timeout: Mutex<Duration>,
    reason: AtomicI32,
    error_message: Mutex<ErrorMessage>,
    freed: AtomicBool,
}

/// ### Request
///
/// Cheap to clone; every clone is the same request.
///
#[derive(Clone)]
pub struct Request(pub(crate) Arc<RequestInner>);

impl Request {
    pub(crate) fn new(manager: Manager, id: u64, process: Callback, timeout: Option<Callback>) -> Request {
        Request(Arc::new(RequestInner {
            id,
            manager,
            process,
            timeout,
            binding: Mutex::new(None),
            io_timeout: Mutex::new(DEFAULT_TIMEOUT_DURATION),
            reason: AtomicI32::new(0),
            error_message: Mutex::new(ErrorMessage::default()),
            freed: AtomicBool::new(false),
        }))
    }

    /// Unique id of this request within its manager
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn manager(&self) -> &Manager {
        &self.0.manager
    }

    /// ### Addr
    ///
    /// The address this request is connected to.
    ///
    pub fn addr(&self) -> Result<Addr> {
        Ok(self.binding()?.addr)
    }

    /// Name of the connected port, if any
    pub fn port_name(&self) -> Option<String> {
        self.0.binding.lock().as_ref().map(|b| b.port.name.clone())
    }

    /// I/O timeout handed to the transport
    pub fn timeout(&self) -> Duration {
        *self.0.io_timeout.lock()
    }

    pub fn set_timeout(&self, timeout: Duration) {
        *self.0.io_timeout.lock() = timeout;
    }

    pub fn reason(&self) -> i32 {
        self.0.reason.load(Ordering::Relaxed)
    }

    pub fn set_reason(&self, reason: i32) {
        self.0.reason.store(reason, Ordering::Relaxed);
    }

    /// Last error written by the manager, a transport or the client
    pub fn error_message(&self) -> String {
        self.0.error_message.lock().as_str().to_string()
    }

    /// ### Set Error Message
    ///
    /// Replace the error message, truncated to the fixed buffer size.
    ///
    pub fn set_error_message(&self, message: impl fmt::Display) {
        self.0.error_message.lock().set(&message.to_string());
    }

    pub fn ptr_eq(&self, other: &Request) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_freed(&self) -> bool {
        self.0.freed.load(Ordering::Acquire)
    }

    // CRATE INTERNALS
    // ==========

    pub(crate) fn binding(&self) -> Result<Binding> {
        self.0.binding.lock().clone().ok_or(Error::NotConnected)
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.0.binding.lock().is_some()
    }

    pub(crate) fn bind(&self, binding: Binding) {
        *self.0.binding.lock() = Some(binding);
    }

    pub(crate) fn unbind(&self) -> Option<Binding> {
        self.0.binding.lock().take()
    }

    pub(crate) fn mark_freed(&self) {
        self.0.freed.store(true, Ordering::Release);
    }

    pub(crate) fn has_timeout_callback(&self) -> bool {
        self.0.timeout.is_some()
    }

    pub(crate) fn process(&self) {
        (self.0.process)(self)
    }

    pub(crate) fn run_timeout(&self) {
        if let Some(timeout) = &self.0.timeout {
            timeout(self)
        }
    }

    pub(crate) fn process_callback(&self) -> Callback {
        self.0.process.clone()
    }

    pub(crate) fn timeout_callback(&self) -> Option<Callback> {
        self.0.timeout.clone()
    }

    /// Record `err` in the error message and hand it back.
    pub(crate) fn note(&self, err: Error) -> Error {
        self.set_error_message(&err);
        err
    }

    /// Port name and address if `mask` is enabled where this request is bound.
    pub(crate) fn trace_target(&self, mask: TraceMask) -> Option<(String, Addr)> {
        let binding = self.0.binding.lock();
        let binding = binding.as_ref()?;
        let enabled = TraceMask::from_bits(binding.trace.load(Ordering::Relaxed));
        enabled
            .intersects(mask)
            .then(|| (binding.port.name.clone(), binding.addr))
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binding = self.0.binding.lock();
        f.debug_struct("Request")
            .field("id", &self.0.id)
            .field("port", &binding.as_ref().map(|b| b.port.name.as_str()))
            .field("addr", &binding.as_ref().map(|b| b.addr))
            .finish()
    }
}

/// ### Error Message
///
/// Error text bounded like the C string buffer it replaces: at most
/// `ERROR_MESSAGE_SIZE - 1` bytes, cut on a character boundary.
///
#[derive(Debug, Default)]
pub(crate) struct ErrorMessage(String);

impl ErrorMessage {
    pub fn set(&mut self, message: &str) {
        let mut end = message.len().min(ERROR_MESSAGE_SIZE - 1);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        self.0.clear();
        self.0.push_str(&message[..end]);
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_truncates() {
        let mut message = ErrorMessage::default();
        message.set(&"x".repeat(400));
        assert_eq!(message.as_str().len(), ERROR_MESSAGE_SIZE - 1);

        message.set("short");
        assert_eq!(message.as_str(), "short");
    }

    #[test]
    fn error_message_keeps_char_boundary() {
        let mut message = ErrorMessage::default();
        let text = "é".repeat(100);
        message.set(&text);
        assert!(message.as_str().len() < ERROR_MESSAGE_SIZE);
        assert!(message.as_str().chars().all(|c| c == 'é'));
    }
}
