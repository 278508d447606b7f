//! ## Device Support
//!
//! Creates records from links and command tables, and starts their
//! transactions.
//!

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::gpib::cmd::{CmdType, GpibLink, ParmBlock};
use crate::gpib::engine;
use crate::gpib::record::{Alarm, GpibHook, GpibRecord, Work};
use crate::gpib::session::{DeviceSession, PortInstance};
use crate::interfaces::{Gpib, SrqHandler};
use crate::manager::Manager;
use crate::trace::{asyn_print, TraceMask};
use crate::types::{Addr, LockScope, Priority};

/// ### Device Support
///
/// GPIB device support bound to one [`Manager`]. Links `#L<n> ...` are served
/// by the port named `L<n>`.
///
pub struct DeviceSupport {
    manager: Manager,
    ports: Mutex<BTreeMap<i32, Arc<PortInstance>>>,
}

impl DeviceSupport {
    pub fn new(manager: &Manager) -> DeviceSupport {
        DeviceSupport {
            manager: manager.clone(),
            ports: Mutex::new(BTreeMap::new()),
        }
    }

    /// ### Init Record
    ///
    /// Create a record for entry `parm` of `parm_block` on the device of `link`.
    ///
    /// #### Arguments
    /// - `name` -> used in log messages
    /// - `link` -> `#L<link> A<addr> @<parm>`
    /// - `parm_block` -> the device's command table
    ///
    /// #### Returns
    /// `BadLinkType` for a malformed link, `BadField` for a parm out of range
    /// or a command the port can not run, or the error of looking up the port.
    ///
    pub fn init_record(&self, name: &str, link: &str, parm_block: &Arc<ParmBlock>) -> Result<Arc<GpibRecord>> {
        let link: GpibLink = link.parse()?;
        let cmd = parm_block.cmd(link.parm)?;
        let port = self.port_instance(link.link)?;
        cmd.is_consistent(port.gpib.is_some())
            .map_err(|err| Error::BadField(format!("{}: {}", name, err)))?;
        let session = port.session_or_insert(link.addr);

        let record = Arc::new_cyclic(|weak: &Weak<GpibRecord>| {
            let on_queue = weak.clone();
            let on_timeout = weak.clone();
            let request = self.manager.create_request_with_timeout(
                move |_| {
                    if let Some(record) = on_queue.upgrade() {
                        record.on_queue();
                    }
                },
                move |_| {
                    if let Some(record) = on_timeout.upgrade() {
                        record.on_queue_timeout();
                    }
                },
            );
            request.set_timeout(parm_block.timeout);
            GpibRecord::new(
                name,
                link,
                parm_block.clone(),
                request,
                port.clone(),
                session,
                self.manager.timers().clone(),
            )
        });
        self.manager
            .connect_device(&record.request, &port.port, link.addr)?;
        asyn_print!(record, TraceMask::FLOW, "{} init_record {:?}", name, record.cmd().cmd_type);
        Ok(record)
    }

    /// Find or create the instance of port `L<link>`.
    fn port_instance(&self, link: i32) -> Result<Arc<PortInstance>> {
        let mut ports = self.ports.lock();
        if let Some(instance) = ports.get(&link) {
            return Ok(instance.clone());
        }
        let name = format!("L{}", link);
        let interfaces = self.manager.port(&name)?.state.lock().interfaces.clone();
        if interfaces.common.is_none() {
            return Err(Error::InterfaceNotFound("asynCommon"));
        }
        if interfaces.octet.is_none() {
            return Err(Error::InterfaceNotFound("asynOctet"));
        }
        let instance = Arc::new(PortInstance {
            link,
            port: name,
            gpib: interfaces.gpib.clone(),
            sessions: Mutex::new(BTreeMap::new()),
            srq_request: Mutex::new(None),
        });
        if let Some(gpib) = interfaces.gpib {
            self.register_port_srq(&instance, gpib)?;
        }
        ports.insert(link, instance.clone());
        Ok(instance)
    }

    /// Queue a request that installs the port's SRQ handler with the driver.
    fn register_port_srq(&self, instance: &Arc<PortInstance>, gpib: Arc<dyn Gpib>) -> Result<()> {
        let weak = Arc::downgrade(instance);
        let handler: SrqHandler = Arc::new(move |addr, status_byte| {
            if let Some(port) = weak.upgrade() {
                engine::srq_handler(&port, addr, status_byte);
            }
        });
        let request = self.manager.create_request(move |req| {
            if let Err(err) = gpib.register_srq_handler(req, handler.clone()) {
                asyn_print!(req, TraceMask::ERROR, "register SRQ handler failed: {}", err);
            }
        });
        self.manager.connect_device(&request, &instance.port, 0)?;
        self.manager.queue_request(&request, Priority::High, None)?;
        *instance.srq_request.lock() = Some(request);
        Ok(())
    }

    // TRANSACTIONS
    // ==========

    /// ### Process Soft
    ///
    /// Run the convert of a GPIBSOFT command in place.
    ///
    pub fn process_soft(&self, record: &GpibRecord) -> Result<()> {
        let cmd = record.cmd();
        let convert = cmd
            .convert
            .as_ref()
            .ok_or_else(|| Error::BadField("GPIBSOFT requires convert".into()))?;
        convert(record, cmd.p1, cmd.p2, &cmd.p3).map(drop).map_err(|err| {
            record.raise_alarm(Alarm::Soft);
            record.request.note(err)
        })
    }

    /// ### Queue Read Request
    ///
    /// Write `cmd` (and wait for SRQ for the wait kinds), then read the reply.
    /// On a port that can block, the device stays locked to the record from
    /// queueing until the read completes.
    ///
    /// #### Arguments
    /// - `record` -> an idle record
    /// - `start` -> run before the write
    /// - `finish` -> run after the read, typically to parse msg
    ///
    pub fn queue_read_request(
        &self,
        record: &Arc<GpibRecord>,
        start: Option<GpibHook>,
        finish: Option<GpibHook>,
    ) -> Result<()> {
        record.activate()?;
        {
            let mut hooks = record.hooks.lock();
            hooks.start = start;
            hooks.finish = finish;
            hooks.work = Some(Work::PrepareToRead);
        }
        let queued = self.lock_device(record).and_then(|()| record.queue_it(false));
        queued.map_err(|err| record.abort(err))
    }

    fn lock_device(&self, record: &GpibRecord) -> Result<()> {
        if self.manager.can_block(&record.request)? {
            let guard = self.manager.lock(&record.request, LockScope::Device)?;
            *record.lock.lock() = Some(guard);
        }
        Ok(())
    }

    /// ### Queue Write Request
    ///
    /// Run convert and write what the command kind calls for.
    ///
    pub fn queue_write_request(
        &self,
        record: &Arc<GpibRecord>,
        start: Option<GpibHook>,
        finish: Option<GpibHook>,
    ) -> Result<()> {
        record.activate()?;
        {
            let mut hooks = record.hooks.lock();
            hooks.start = start;
            hooks.finish = finish;
            hooks.work = Some(Work::Write);
        }
        record.queue_it(false).map_err(|err| record.abort(err))
    }

    /// ### Queue Request
    ///
    /// Run `work` when the record's request is served. `work` receives
    /// whether the request failed to run normally and returns whether the
    /// transaction failed.
    ///
    pub fn queue_request(&self, record: &Arc<GpibRecord>, work: GpibHook) -> Result<()> {
        record.activate()?;
        {
            let mut hooks = record.hooks.lock();
            hooks.start = None;
            hooks.finish = None;
            hooks.work = Some(Work::Custom(work));
        }
        record.queue_it(false).map_err(|err| record.abort(err))
    }

    /// ### Queue Special
    ///
    /// Run the bus command of the record. For IFC, DCL, LLO, SDC, GTL and
    /// RESETLNK a `value` of 0 does nothing; REN asserts for non zero values.
    ///
    pub fn queue_special(&self, record: &Arc<GpibRecord>, value: i32) -> Result<()> {
        let kind = record.cmd().cmd_type;
        if !kind.intersects(CmdType::SPECIAL) {
            return Err(record
                .request
                .note(Error::BadField(format!("{:?} is not a bus command", kind))));
        }
        if value == 0 && !kind.contains(CmdType::REN) {
            return Ok(());
        }
        record.activate()?;
        record.hooks.lock().work = Some(Work::Special(value));
        record.queue_it(false).map_err(|err| record.abort(err))
    }

    /// ### Register Srq Handler
    ///
    /// Install `handler` for SRQs of the record's device that no record is
    /// waiting for, and start polling the device.
    ///
    pub fn register_srq_handler(&self, record: &GpibRecord, handler: SrqHandler) -> Result<()> {
        let gpib = record
            .port
            .gpib
            .clone()
            .ok_or(Error::InterfaceNotFound("asynGpib"))?;
        let waiting = {
            let mut session = record.session.state.lock();
            if session.unsolicited.is_some() {
                return Err(record.request.note(Error::BadField(
                    "an unsolicited handler is already registered".into(),
                )));
            }
            session.unsolicited = Some(handler);
            session.srq.is_awaiting()
        };
        asyn_print!(record, TraceMask::FLOW, "{} register_srq_handler", record.name());
        if !waiting {
            gpib.poll_addr(&record.request, record.addr(), true)?;
        }
        Ok(())
    }

    // SESSIONS
    // ==========

    /// The session of `addr` on `port`, if a record was created for it
    pub fn session(&self, port: &str, addr: Addr) -> Option<Arc<DeviceSession>> {
        self.find_port(port).ok()?.session(addr)
    }

    fn find_port(&self, port: &str) -> Result<Arc<PortInstance>> {
        self.ports
            .lock()
            .values()
            .find(|instance| instance.port == port)
            .cloned()
            .ok_or_else(|| Error::PortNotFound(port.to_string()))
    }

    /// Queue timeout used by every record of the device from now on.
    pub fn set_queue_timeout(&self, port: &str, addr: Addr, timeout: Duration) -> Result<()> {
        let session = self.find_port(port)?.session_or_insert(addr);
        session.state.lock().queue_timeout = timeout;
        Ok(())
    }

    /// How long a READW or EFASTIW record waits for SRQ.
    pub fn set_srq_wait_timeout(&self, port: &str, addr: Addr, timeout: Duration) -> Result<()> {
        let session = self.find_port(port)?.session_or_insert(addr);
        session.state.lock().srq_wait_timeout = timeout;
        Ok(())
    }

    /// ### Report
    ///
    /// Describe every link and device session. Levels above 0 add the
    /// manager's report of each port.
    ///
    pub fn report(&self, details: u32) -> String {
        let ports: Vec<Arc<PortInstance>> = self.ports.lock().values().cloned().collect();
        let mut out = String::new();
        for port in ports {
            let _ = writeln!(
                out,
                "link {} port {} gpib {}",
                port.link,
                port.port,
                if port.gpib.is_some() { "Yes" } else { "No" }
            );
            let sessions: Vec<Arc<DeviceSession>> = port.sessions.lock().values().cloned().collect();
            for session in sessions {
                let state = session.state.lock();
                let _ = writeln!(
                    out,
                    "    addr {} timeouts {} errors {} queueTimeout {:.3} srqWaitTimeout {:.3}",
                    session.addr,
                    state.tmo_count,
                    state.error_count,
                    state.queue_timeout.as_secs_f64(),
                    state.srq_wait_timeout.as_secs_f64(),
                );
                if let Some(waiting) = state.srq.waiting_for() {
                    let _ = writeln!(
                        out,
                        "        waiting for SRQ {:.3}s, {} parked",
                        waiting.as_secs_f64(),
                        state.srq.parked()
                    );
                }
                if state.unsolicited.is_some() {
                    let _ = writeln!(out, "        unsolicited handler registered");
                }
            }
            if details > 0 {
                if let Ok(report) = self.manager.report(details, Some(&port.port)) {
                    out.push_str(&report);
                }
            }
        }
        out
    }
}
