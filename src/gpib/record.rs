//! ## Record
//!
//! A [`GpibRecord`] is one command of a table bound to one device: its
//! request, its message buffers, the hooks of the transaction in progress
//! and the outcome of the last one.
//!

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::gpib::cmd::{GpibCmd, GpibLink, ParmBlock};
use crate::gpib::format::Value;
use crate::gpib::session::{DeviceSession, PortInstance};
use crate::manager::queue::LockGuard;
use crate::request::Request;
use crate::timer::TimerQueue;
use crate::trace::TraceMask;
use crate::types::Addr;

/// ### Gpib Hook
///
/// Start and finish hooks of a transaction. Receive whether the
/// transaction has failed so far and return whether it has failed now.
///
pub type GpibHook = Arc<dyn Fn(&GpibRecord, bool) -> bool + Send + Sync>;

/// The alarm raised by the last transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alarm {
    Read,
    Write,
    /// The request never ran: timeout window or queueing failure
    Soft,
}

/// The step run when the record's request is next served.
pub(crate) enum Work {
    PrepareToRead,
    ReadWaitComplete,
    /// The SRQ wait expired; carries the records parked behind it
    WaitTimedOut(Vec<Arc<GpibRecord>>),
    Write,
    Special(i32),
    Custom(GpibHook),
}

pub(crate) struct Io {
    pub msg: Vec<u8>,
    pub rsp: Vec<u8>,
    pub efast_val: Option<usize>,
}

#[derive(Default)]
pub(crate) struct Hooks {
    pub work: Option<Work>,
    pub start: Option<GpibHook>,
    pub finish: Option<GpibHook>,
}

#[derive(Default)]
struct Status {
    active: bool,
    failed: bool,
    alarm: Option<Alarm>,
    completions: u64,
    value: Option<Value>,
}

/// ### Gpib Record
///
/// Created by [`crate::gpib::DeviceSupport::init_record`].
///
pub struct GpibRecord {
    name: String,
    link: GpibLink,
    parm_block: Arc<ParmBlock>,
    pub(crate) request: Request,
    pub(crate) port: Arc<PortInstance>,
    pub(crate) session: Arc<DeviceSession>,
    pub(crate) timers: Arc<TimerQueue>,
    pub(crate) io: Mutex<Io>,
    pub(crate) hooks: Mutex<Hooks>,
    pub(crate) lock: Mutex<Option<LockGuard>>,
    status: Mutex<Status>,
    done: Condvar,
}

impl GpibRecord {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: &str,
        link: GpibLink,
        parm_block: Arc<ParmBlock>,
        request: Request,
        port: Arc<PortInstance>,
        session: Arc<DeviceSession>,
        timers: Arc<TimerQueue>,
    ) -> GpibRecord {
        GpibRecord {
            name: name.to_string(),
            link,
            parm_block,
            request,
            port,
            session,
            timers,
            io: Mutex::new(Io {
                msg: Vec::new(),
                rsp: Vec::new(),
                efast_val: None,
            }),
            hooks: Mutex::new(Hooks::default()),
            lock: Mutex::new(None),
            status: Mutex::new(Status::default()),
            done: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn link(&self) -> GpibLink {
        self.link
    }

    pub fn addr(&self) -> Addr {
        self.link.addr
    }

    pub fn parm_block(&self) -> &Arc<ParmBlock> {
        &self.parm_block
    }

    /// The command this record runs
    pub fn cmd(&self) -> &GpibCmd {
        // the parm was range checked when the record was created
        &self.parm_block.cmds[self.link.parm]
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    // BUFFERS
    // ==========

    /// Bytes of the last message read or written
    pub fn msg(&self) -> Vec<u8> {
        self.io.lock().msg.clone()
    }

    pub fn msg_str(&self) -> String {
        String::from_utf8_lossy(&self.io.lock().msg).into_owned()
    }

    /// ### Set Msg
    ///
    /// Replace the outgoing message.
    ///
    /// #### Returns
    /// `Overflow` if it does not fit the command's `msg_len`.
    ///
    pub fn set_msg(&self, msg: &[u8]) -> Result<()> {
        let capacity = self.cmd().msg_len;
        if msg.len() >= capacity {
            return Err(Error::Overflow {
                needed: msg.len() + 1,
                capacity,
            });
        }
        self.io.lock().msg = msg.to_vec();
        Ok(())
    }

    /// Response read back after a write on a respond-to-writes device
    pub fn rsp(&self) -> Vec<u8> {
        self.io.lock().rsp.clone()
    }

    /// Index into the enum table of the last EFAST read, or the one to write
    pub fn efast_val(&self) -> Option<usize> {
        self.io.lock().efast_val
    }

    pub fn set_efast_val(&self, value: Option<usize>) {
        self.io.lock().efast_val = value;
    }

    // STATUS
    // ==========

    pub fn value(&self) -> Option<Value> {
        self.status.lock().value.clone()
    }

    pub fn set_value(&self, value: Value) {
        self.status.lock().value = Some(value);
    }

    pub fn alarm(&self) -> Option<Alarm> {
        self.status.lock().alarm
    }

    /// Keep the first alarm raised during a transaction.
    pub fn raise_alarm(&self, alarm: Alarm) {
        let mut status = self.status.lock();
        if status.alarm.is_none() {
            status.alarm = Some(alarm);
        }
    }

    /// True from queueing until the transaction completes
    pub fn is_active(&self) -> bool {
        self.status.lock().active
    }

    /// Transactions completed so far
    pub fn completions(&self) -> u64 {
        self.status.lock().completions
    }

    /// ### Wait Complete
    ///
    /// Block until the transaction in progress completes.
    ///
    /// #### Returns
    /// Whether it failed, or `None` if `timeout` passed first.
    ///
    pub fn wait_complete(&self, timeout: Duration) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        let mut status = self.status.lock();
        while status.active {
            if self.done.wait_until(&mut status, deadline).timed_out() && status.active {
                return None;
            }
        }
        Some(status.failed)
    }

    /// Mark the record active for a new transaction, clearing the last alarm.
    pub(crate) fn activate(&self) -> Result<()> {
        let mut status = self.status.lock();
        if status.active {
            return Err(Error::AlreadyQueued);
        }
        status.active = true;
        status.alarm = None;
        Ok(())
    }

    pub(crate) fn complete(&self, failed: bool) {
        let mut status = self.status.lock();
        status.active = false;
        status.failed = failed;
        status.completions += 1;
        drop(status);
        self.done.notify_all();
    }

    /// Release the device lock taken for a read, if any.
    pub(crate) fn release_lock(&self) {
        let guard = self.lock.lock().take();
        if let Some(guard) = guard {
            if let Err(err) = guard.unlock() {
                crate::trace::asyn_print!(self, TraceMask::ERROR, "{} unlock failed: {}", self.name, err);
            }
        }
    }

    pub(crate) fn trace_target(&self, mask: TraceMask) -> Option<(String, Addr)> {
        self.request.trace_target(mask)
    }
}

impl Drop for GpibRecord {
    fn drop(&mut self) {
        self.release_lock();
        if let Err(err) = self.request.manager().free_request(&self.request) {
            tracing::debug!(record = %self.name, "free request on drop failed: {}", err);
        }
    }
}

impl fmt::Debug for GpibRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpibRecord")
            .field("name", &self.name)
            .field("link", &self.link)
            .field("cmd", &self.cmd().cmd_type)
            .finish()
    }
}
