//! ## Engine
//!
//! The steps of a record's transaction: queueing, the queue callbacks, reads
//! with or without an SRQ wait, writes, bus commands, and the SRQ and
//! SRQ-timeout paths that finish a wait.
//!

use std::sync::Arc;
use std::thread;

use crate::constants::gpib::{IBDCL, IBGTL, IBLLO, IBSDC};
use crate::error::{Error, Result};
use crate::gpib::cmd::CmdType;
use crate::gpib::format::{sprintf, Value};
use crate::gpib::record::{Alarm, GpibRecord, Work};
use crate::gpib::session::{DeviceSession, PortInstance};
use crate::interfaces::{Octet, SrqHandler};
use crate::timer::TimerId;
use crate::trace::{asyn_print, asyn_print_io, TraceMask};
use crate::types::Addr;

// QUEUEING
// ==========

impl GpibRecord {
    /// ### Queue It
    ///
    /// Queue the record's request unless its device is in its timeout window.
    /// While another record waits for SRQ the record is parked instead; only
    /// the owner's own re-queue after its SRQ gets through.
    ///
    pub(crate) fn queue_it(self: &Arc<Self>, from_srq: bool) -> Result<()> {
        let mut session = self.session.state.lock();
        if session.time_window_active(self.parm_block().time_window) {
            drop(session);
            asyn_print!(self, TraceMask::ERROR, "{} no response from device, in timeout window", self.name());
            return Err(Error::TimeWindowActive);
        }
        if session.srq.is_awaiting() && !(from_srq && session.srq.owner_is(self)) {
            session.srq.park(self.clone());
            drop(session);
            asyn_print!(self, TraceMask::FLOW, "{} parked behind an SRQ wait", self.name());
            return Ok(());
        }
        let timeout = session.queue_timeout;
        drop(session);

        asyn_print!(self, TraceMask::FLOW, "{} queue_it", self.name());
        self.request
            .manager()
            .queue_request(&self.request, self.cmd().pri, Some(timeout))
    }

    /// ### Abort
    ///
    /// The transaction ended before its request ran. Raises a soft alarm and
    /// completes the record as failed.
    ///
    pub(crate) fn abort(&self, err: Error) -> Error {
        asyn_print!(self, TraceMask::ERROR, "{} {}", self.name(), err);
        self.hooks.lock().work = None;
        self.raise_alarm(Alarm::Soft);
        self.release_lock();
        self.complete(true);
        self.request.note(err)
    }

    /// Process callback of the record's request.
    pub(crate) fn on_queue(self: &Arc<Self>) {
        let failure = self
            .session
            .state
            .lock()
            .time_window_active(self.parm_block().time_window);
        if !self.is_active() {
            asyn_print!(self, TraceMask::ERROR, "{} queue callback but record is not active", self.name());
            return;
        }
        let work = self.hooks.lock().work.take();
        match work {
            Some(work) => self.run_work(work, failure),
            None => asyn_print!(self, TraceMask::ERROR, "{} queue callback with no work", self.name()),
        }
    }

    /// Queue timeout callback of the record's request.
    pub(crate) fn on_queue_timeout(self: &Arc<Self>) {
        asyn_print!(self, TraceMask::ERROR, "{} queue request timed out", self.name());
        self.request.set_error_message("queue request timed out");
        let work = self.hooks.lock().work.take();
        match work {
            Some(work) => self.run_work(work, true),
            None => asyn_print!(self, TraceMask::ERROR, "{} queue timeout with no work", self.name()),
        }
    }

    fn run_work(self: &Arc<Self>, work: Work, failure: bool) {
        match work {
            Work::PrepareToRead => self.prepare_to_read(failure),
            Work::ReadWaitComplete => self.read_wait_complete(failure),
            Work::WaitTimedOut(parked) => {
                let poll = self.session.state.lock().unsolicited.is_none();
                self.finish_wait(parked, poll, true);
            }
            Work::Write => self.gpib_write(failure),
            Work::Special(value) => {
                let mut failed = failure;
                if !failed {
                    if let Err(err) = self.special(value) {
                        self.report_failure("bus command", err);
                        failed = true;
                    }
                }
                if failed {
                    self.raise_alarm(Alarm::Write);
                }
                self.complete(failed);
            }
            Work::Custom(work) => {
                let failed = work(self, failure);
                self.complete(failed);
            }
        }
    }

    fn report_failure(&self, what: &str, err: Error) {
        asyn_print!(self, TraceMask::ERROR, "{} {} failed: {}", self.name(), what, err);
        self.request.note(err);
    }
}

// READ
// ==========

impl GpibRecord {
    /// ### Prepare To Read
    ///
    /// Run start, then write `cmd`. SRQ-wait kinds arm the wait first and
    /// return pending after the write; the SRQ or the wait timeout finishes
    /// them. Everything else goes straight on to the read.
    ///
    fn prepare_to_read(self: &Arc<Self>, failure: bool) {
        let cmd = self.cmd();
        let mut failure = failure;
        let start = self.hooks.lock().start.clone();
        if let (false, Some(start)) = (failure, start) {
            failure = start(self, failure);
        }
        if failure || cmd.cmd_type.contains(CmdType::CVTIO) {
            return self.gpib_read(failure);
        }

        let wait = cmd.cmd_type.intersects(CmdType::SRQ_WAIT);
        if wait {
            if let Err(err) = self.begin_srq_wait() {
                self.report_failure("SRQ wait", err);
                return self.gpib_read(true);
            }
        }

        let sent = self.octet().and_then(|octet| {
            self.set_eos(octet.as_ref())?;
            self.write_read_cmd()
        });
        match sent {
            Ok(()) if wait => {}
            Ok(()) => self.gpib_read(false),
            Err(err) => {
                self.report_failure("write", err);
                if wait {
                    let timer = self.session.state.lock().srq.take_timer();
                    if let Some(timer) = timer {
                        self.timers.cancel(timer);
                    }
                    self.read_wait_complete(true);
                } else {
                    self.gpib_read(true);
                }
            }
        }
    }

    /// Write the `cmd` that asks the device for the reply about to be read.
    fn write_read_cmd(&self) -> Result<()> {
        let cmd = self.cmd();
        let readable = CmdType::READ
            | CmdType::READW
            | CmdType::RAWREAD
            | CmdType::EFASTI
            | CmdType::EFASTIW;
        if !cmd.cmd_type.intersects(readable) {
            return Err(Error::BadField(format!("{:?} can not be read", cmd.cmd_type)));
        }
        if cmd.cmd_type.contains(CmdType::RAWREAD) {
            return Ok(());
        }
        match cmd.cmd.as_deref().filter(|c| !c.is_empty()) {
            Some(text) => {
                let sent = self.write_it(text.as_bytes())?;
                if sent != text.len() {
                    return Err(Error::Transport(format!("wrote {} of {} bytes", sent, text.len())));
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Claim the session's SRQ wait and arm its timer.
    fn begin_srq_wait(self: &Arc<Self>) -> Result<()> {
        self.hooks.lock().work = Some(Work::ReadWaitComplete);
        let claimed = {
            let mut session = self.session.state.lock();
            session
                .srq
                .begin_wait(self.clone())
                .map(|token| (token, session.srq_wait_timeout, session.unsolicited.is_none()))
        };
        let (token, wait_timeout, poll) = match claimed {
            Ok(claimed) => claimed,
            Err(err) => {
                self.hooks.lock().work = None;
                return Err(err);
            }
        };
        if poll {
            self.poll(true);
        }

        let session = Arc::downgrade(&self.session);
        let timer = self.timers.start(wait_timeout, move || {
            if let Some(session) = session.upgrade() {
                srq_wait_timeout(&session, token);
            }
        });
        if !self.session.state.lock().srq.set_timer(token, timer) {
            self.timers.cancel(timer);
        }
        asyn_print!(self, TraceMask::FLOW, "{} waiting for SRQ", self.name());
        Ok(())
    }

    /// ### Read Wait Complete
    ///
    /// End this record's SRQ wait and do the follow-up read. Does nothing if
    /// the record no longer owns the wait.
    ///
    pub(crate) fn read_wait_complete(self: &Arc<Self>, failure: bool) {
        let (released, poll) = {
            let mut session = self.session.state.lock();
            (session.srq.clear_wait(self), session.unsolicited.is_none())
        };
        match released {
            Some(parked) => self.finish_wait(parked, poll, failure),
            None => asyn_print!(self, TraceMask::ERROR, "{} does not own the SRQ wait", self.name()),
        }
    }

    fn finish_wait(self: &Arc<Self>, parked: Vec<Arc<GpibRecord>>, poll: bool, failure: bool) {
        if poll {
            self.poll(false);
        }
        for record in parked {
            if let Err(err) = record.queue_it(false) {
                record.abort(err);
            }
        }
        self.gpib_read(failure);
    }

    fn poll(&self, enable: bool) {
        if let Some(gpib) = &self.port.gpib {
            if let Err(err) = gpib.poll_addr(&self.request, self.addr(), enable) {
                self.report_failure("poll_addr", err);
            }
        }
    }

    /// ### Gpib Read
    ///
    /// Read the reply into msg, then finish, unlock and complete.
    ///
    fn gpib_read(&self, failure: bool) {
        let mut failure = failure;
        if !failure && !self.cmd().cmd_type.contains(CmdType::CVTIO) {
            if let Err(err) = self.read_msg() {
                self.report_failure("read", err);
                failure = true;
            }
        }
        let finish = self.hooks.lock().finish.clone();
        if let Some(finish) = finish {
            failure = finish(self, failure);
        }
        self.release_lock();
        if failure {
            self.raise_alarm(Alarm::Read);
        }
        self.complete(failure);
    }

    fn read_msg(&self) -> Result<()> {
        let cmd = self.cmd();
        if cmd.msg_len == 0 {
            return Err(Error::BadField("no msg buffer, msg_len must be > 0".into()));
        }
        let octet = self.octet()?;
        let mut buf = vec![0; cmd.msg_len];
        let n = match octet.read(&self.request, &mut buf) {
            Ok(0) => {
                self.session.state.lock().timeout_happened();
                return Err(Error::TransportTimeout);
            }
            Ok(n) => n,
            Err(err) => {
                self.session.state.lock().io_failed(&err);
                return Err(err);
            }
        };
        buf.truncate(n);
        asyn_print_io!(self, TraceMask::IO_DEVICE, &buf, "{} gpib_read {} bytes", self.name(), n);

        let mut io = self.io.lock();
        if cmd.cmd_type.intersects(CmdType::EFASTI | CmdType::EFASTIW) {
            io.efast_val = check_enums(&buf, &cmd.p3);
        }
        io.msg = buf;
        Ok(())
    }
}

/// ### Check Enums
///
/// #### Returns
/// Index of the first table entry `msg` starts with.
///
pub(crate) fn check_enums(msg: &[u8], table: &[String]) -> Option<usize> {
    table
        .iter()
        .position(|entry| msg.starts_with(entry.as_bytes()))
}

// WRITE
// ==========

impl GpibRecord {
    /// ### Gpib Write
    ///
    /// Run start and convert, write what the command kind calls for, then
    /// finish and complete.
    ///
    fn gpib_write(&self, failure: bool) {
        let mut failure = failure;
        let start = self.hooks.lock().start.clone();
        if let (false, Some(start)) = (failure, start) {
            failure = start(self, failure);
        }
        if !failure {
            if let Err(err) = self.write_for_cmd() {
                self.report_failure("write", err);
                failure = true;
            }
        }
        if failure {
            self.raise_alarm(Alarm::Write);
        }
        let finish = self.hooks.lock().finish.clone();
        if let Some(finish) = finish {
            failure = finish(self, failure);
        }
        self.complete(failure);
    }

    fn write_for_cmd(&self) -> Result<()> {
        let cmd = self.cmd();
        let mut len = 0;
        if let Some(convert) = &cmd.convert {
            len = convert(self, cmd.p1, cmd.p2, &cmd.p3)?;
        }
        let kind = cmd.cmd_type;
        if kind.contains(CmdType::CVTIO) {
            return Ok(());
        }

        let cmd_bytes = cmd.cmd.as_deref().unwrap_or_default().as_bytes();
        let (wanted, sent) = if kind.contains(CmdType::WRITE) {
            let msg = self.msg();
            if msg.is_empty() {
                return Err(Error::BadField("no message to write".into()));
            }
            let wanted = if len == 0 { msg.len() } else { len.min(msg.len()) };
            (wanted, self.write_it(&msg[..wanted])?)
        } else if kind.contains(CmdType::CMD) {
            let wanted = if len == 0 { cmd_bytes.len() } else { len.min(cmd_bytes.len()) };
            (wanted, self.write_it(&cmd_bytes[..wanted])?)
        } else if kind.contains(CmdType::ACMD) {
            let gpib = self.request.manager().find_gpib(&self.request)?;
            (cmd_bytes.len(), gpib.addressed_cmd(&self.request, cmd_bytes)?)
        } else if kind.contains(CmdType::EFASTO) {
            let out = self.efasto_msg()?;
            (out.len(), self.write_it(&out)?)
        } else {
            return Err(Error::BadField(format!("{:?} can not be written", kind)));
        };
        if sent != wanted {
            return Err(Error::Transport(format!("wrote {} of {} bytes", sent, wanted)));
        }
        Ok(())
    }

    /// `cmd` followed by the enum table entry chosen by `efast_val`.
    fn efasto_msg(&self) -> Result<Vec<u8>> {
        let cmd = self.cmd();
        let entry = self
            .efast_val()
            .and_then(|v| cmd.p3.get(v))
            .ok_or_else(|| Error::BadField("enum value out of range".into()))?;
        let mut out = Vec::new();
        if let Some(prefix) = &cmd.cmd {
            let needed = prefix.len() + entry.len() + 1;
            if cmd.msg_len < needed {
                return Err(Error::Overflow {
                    needed,
                    capacity: cmd.msg_len,
                });
            }
            out.extend_from_slice(prefix.as_bytes());
        }
        out.extend_from_slice(entry.as_bytes());
        if out.is_empty() {
            return Err(Error::BadField("empty enum message".into()));
        }
        self.io.lock().msg = out.clone();
        Ok(out)
    }

    /// ### Write It
    ///
    /// Write `data`. A short write counts as a device timeout if nothing was
    /// written and as an error otherwise. Either opens the time window. Devices that answer every write
    /// have the answer read into rsp.
    ///
    /// #### Returns
    /// The number of bytes written.
    ///
    fn write_it(&self, data: &[u8]) -> Result<usize> {
        let octet = self.octet()?;
        let sent = match octet.write(&self.request, data) {
            Ok(n) => n.min(data.len()),
            Err(err) if err.is_timeout() => 0,
            Err(err) => {
                self.session.state.lock().error_happened();
                return Err(err);
            }
        };
        asyn_print_io!(self, TraceMask::IO_DEVICE, &data[..sent], "{} write_it {} bytes", self.name(), sent);
        if sent != data.len() {
            let mut session = self.session.state.lock();
            if sent == 0 {
                session.timeout_happened();
            } else {
                session.error_happened();
            }
            drop(session);
            asyn_print!(self, TraceMask::ERROR, "{} requested {} bytes, wrote {}", self.name(), data.len(), sent);
        }

        let rsp_len = self.cmd().rsp_len;
        if let (Some(delay), true) = (self.parm_block().respond2writes, rsp_len > 0) {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            self.set_eos(octet.as_ref())?;
            let mut rsp = vec![0; rsp_len];
            let n = octet
                .read(&self.request, &mut rsp)
                .inspect_err(|err| self.session.state.lock().io_failed(err))?;
            rsp.truncate(n);
            asyn_print_io!(self, TraceMask::IO_DEVICE, &rsp, "{} response to write", self.name());
            self.io.lock().rsp = rsp;
        }
        Ok(sent)
    }

    /// Set the command's input end-of-string; an empty one means NUL.
    fn set_eos(&self, octet: &dyn Octet) -> Result<()> {
        match &self.cmd().eos {
            Some(eos) if eos.is_empty() => octet.set_eos(&self.request, &[0]),
            Some(eos) => octet.set_eos(&self.request, eos),
            None => Ok(()),
        }
    }

    fn octet(&self) -> Result<Arc<dyn Octet>> {
        self.request.manager().find_octet(&self.request)
    }

    // BUS COMMANDS
    // ==========

    fn special(&self, value: i32) -> Result<()> {
        let manager = self.request.manager();
        let kind = self.cmd().cmd_type;
        if kind.contains(CmdType::RESETLNK) {
            let common = manager.find_common(&self.request)?;
            if let Err(err) = common.disconnect(&self.request) {
                self.report_failure("disconnect", err);
            }
            return common.connect(&self.request);
        }
        let gpib = manager.find_gpib(&self.request)?;
        let req = &self.request;
        if kind.contains(CmdType::IFC) {
            gpib.ifc(req)
        } else if kind.contains(CmdType::REN) {
            gpib.ren(req, value != 0)
        } else if kind.contains(CmdType::DCL) {
            gpib.universal_cmd(req, IBDCL)
        } else if kind.contains(CmdType::LLO) {
            gpib.universal_cmd(req, IBLLO)
        } else if kind.contains(CmdType::SDC) {
            gpib.addressed_cmd(req, &[IBSDC]).map(drop)
        } else if kind.contains(CmdType::GTL) {
            gpib.addressed_cmd(req, &[IBGTL]).map(drop)
        } else {
            Err(Error::BadField(format!("{:?} is not a bus command", kind)))
        }
    }
}

// MESSAGES
// ==========

impl GpibRecord {
    /// Format an integer into msg with the command's format.
    pub fn write_msg_long(&self, value: i64) -> Result<()> {
        self.write_msg(Value::Long(value), None)
    }

    pub fn write_msg_ulong(&self, value: u64) -> Result<()> {
        self.write_msg(Value::ULong(value), None)
    }

    pub fn write_msg_double(&self, value: f64) -> Result<()> {
        self.write_msg(Value::Double(value), None)
    }

    /// The format defaults to `%s`.
    pub fn write_msg_string(&self, value: &str) -> Result<()> {
        self.write_msg(Value::Str(value.to_string()), Some("%s"))
    }

    fn write_msg(&self, value: Value, default_format: Option<&str>) -> Result<()> {
        self.format_msg(value, default_format).map_err(|err| {
            self.raise_alarm(Alarm::Write);
            asyn_print!(self, TraceMask::ERROR, "{} {}", self.name(), err);
            self.request.note(err)
        })
    }

    fn format_msg(&self, value: Value, default_format: Option<&str>) -> Result<()> {
        let cmd = self.cmd();
        if cmd.msg_len == 0 {
            return Err(Error::BadField("no msg buffer, msg_len must be > 0".into()));
        }
        let format = cmd
            .format
            .as_deref()
            .or(default_format)
            .ok_or_else(|| Error::BadField("no format".into()))?;
        let text = sprintf(format, &[value])?;
        if text.len() >= cmd.msg_len {
            return Err(Error::Overflow {
                needed: text.len() + 1,
                capacity: cmd.msg_len,
            });
        }
        self.io.lock().msg = text.into_bytes();
        Ok(())
    }

    /// ### Read Arbitrary Block Program Data
    ///
    /// Read an IEEE-488.2 definite length block, `<preamble>#<n><n digits><data>`
    /// followed by the end-of-string, into msg. Only call from a running
    /// transaction, such as the work of [`crate::gpib::DeviceSupport::queue_request`].
    ///
    /// #### Returns
    /// The number of bytes in msg.
    ///
    pub fn read_arbitrary_block_program_data(&self) -> Result<usize> {
        let octet = self.octet()?;
        let eos = match &self.cmd().eos {
            Some(eos) if eos.is_empty() => vec![0],
            Some(eos) => eos.clone(),
            None => octet.get_eos(&self.request)?,
        };
        octet.set_eos(&self.request, &[])?;
        let block = self.read_block(octet.as_ref(), &eos);
        let restored = octet.set_eos(&self.request, &eos);
        let block = block.and_then(|block| restored.map(|()| block)).map_err(|err| {
            asyn_print!(self, TraceMask::ERROR, "{} {}", self.name(), err);
            self.request.note(err)
        })?;
        asyn_print_io!(self, TraceMask::IO_DEVICE, &block, "{} read_arbitrary_block_program_data", self.name());
        let n = block.len();
        self.io.lock().msg = block;
        Ok(n)
    }

    fn read_block(&self, octet: &dyn Octet, eos: &[u8]) -> Result<Vec<u8>> {
        let capacity = self.cmd().msg_len;
        let mut msg = Vec::with_capacity(capacity);
        loop {
            let byte = self.read_exact(octet, 1, "Error reading preamble")?;
            msg.push(byte[0]);
            if byte[0] == b'#' {
                break;
            }
            if msg.len() >= capacity {
                return Err(Error::Format("Preamble too long".into()));
            }
        }

        let count = self.read_exact(octet, 1, "Error reading number of digits")?[0];
        if !count.is_ascii_digit() {
            return Err(Error::Format(format!("Number of digits ({:#04x}) is not numeric", count)));
        }
        let count = (count - b'0') as usize;
        if count == 0 {
            return Err(Error::Format("Number of digits is zero".into()));
        }
        msg.push(b'0' + count as u8);
        let digits = self.read_exact(octet, count, "Error reading number of bytes")?;
        let len: usize = std::str::from_utf8(&digits)
            .ok()
            .and_then(|d| d.parse().ok())
            .ok_or_else(|| Error::Format("Number of bytes is not numeric".into()))?;
        msg.extend_from_slice(&digits);
        if len == 0 || msg.len() + len >= capacity {
            return Err(Error::Format(format!("Number of bytes ({}) exceeds buffer space", len)));
        }

        let data = self.read_exact(octet, len, "Error reading block data")?;
        msg.extend_from_slice(&data);
        if !eos.is_empty() {
            let tail = self.read_exact(octet, eos.len(), "Error reading EOS after block")?;
            if tail != eos {
                return Err(Error::Format("Unexpected characters between block and EOS".into()));
            }
        }
        Ok(msg)
    }

    fn read_exact(&self, octet: &dyn Octet, n: usize, what: &str) -> Result<Vec<u8>> {
        let mut buf = vec![0; n];
        let mut filled = 0;
        while filled < n {
            match octet.read(&self.request, &mut buf[filled..]) {
                Ok(0) => return Err(Error::Format(format!("{}: timeout", what))),
                Ok(got) => filled += got,
                Err(err) => return Err(Error::Format(format!("{}: {}", what, err))),
            }
        }
        Ok(buf)
    }
}

// SRQ
// ==========

enum SrqAction {
    Owner(Arc<GpibRecord>, Option<TimerId>),
    Unsolicited(SrqHandler),
    Nobody,
}

/// ### Srq Handler
///
/// Called by the driver for every service request on the port. Hands the
/// SRQ to the record waiting for it, or to the device's unsolicited handler.
///
pub(crate) fn srq_handler(port: &PortInstance, addr: Addr, status_byte: u8) {
    let Some(session) = port.session(addr) else {
        tracing::warn!(port = %port.port, addr, "SRQ from a device with no records");
        return;
    };
    let action = {
        let mut state = session.state.lock();
        match state.srq.mark_from_srq() {
            Some((owner, timer)) => SrqAction::Owner(owner, timer),
            None => match &state.unsolicited {
                Some(handler) => SrqAction::Unsolicited(handler.clone()),
                None => SrqAction::Nobody,
            },
        }
    };
    match action {
        SrqAction::Owner(owner, timer) => {
            if let Some(timer) = timer {
                owner.timers.cancel(timer);
            }
            asyn_print!(owner, TraceMask::FLOW, "{} SRQ status byte {:#04x}", owner.name(), status_byte);
            if let Err(err) = owner.queue_it(true) {
                owner.report_failure("queue after SRQ", err);
                owner.raise_alarm(Alarm::Soft);
                owner.read_wait_complete(true);
            }
        }
        SrqAction::Unsolicited(handler) => handler(addr, status_byte),
        SrqAction::Nobody => {
            tracing::warn!(port = %port.port, addr, status_byte, "SRQ happened but no record is attached")
        }
    }
}

/// ### Srq Wait Timeout
///
/// The SRQ wait armed with `token` ran out before any SRQ. The owner is
/// queued to finish the failed read on the port thread.
///
fn srq_wait_timeout(session: &DeviceSession, token: u64) {
    let claimed = session.state.lock().srq.expire_wait(token);
    let Some((owner, parked)) = claimed else {
        return;
    };
    asyn_print!(owner, TraceMask::ERROR, "{} SRQ wait timed out", owner.name());
    owner.request.set_error_message("SRQ wait timed out");
    owner.hooks.lock().work = Some(Work::WaitTimedOut(parked));
    if let Err(err) = owner.queue_it(false) {
        owner.report_failure("queue after SRQ wait timeout", err);
        owner.raise_alarm(Alarm::Soft);
        let work = owner.hooks.lock().work.take();
        if let Some(Work::WaitTimedOut(parked)) = work {
            let poll = session.state.lock().unsolicited.is_none();
            owner.finish_wait(parked, poll, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_match_by_prefix() {
        let table: Vec<String> = ["ON", "OFF", "O"].iter().map(|s| s.to_string()).collect();
        assert_eq!(check_enums(b"ON\n", &table), Some(0));
        assert_eq!(check_enums(b"OFF", &table), Some(1));
        assert_eq!(check_enums(b"OPEN", &table), Some(2));
        assert_eq!(check_enums(b"X", &table), None);
        assert_eq!(check_enums(b"", &table), None);
    }
}
