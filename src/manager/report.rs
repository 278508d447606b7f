//! ## Report
//!
//! Snapshots of port and device state, printable at several levels of detail.
//!

use std::fmt::{self, Write};
use std::sync::Arc;

use crate::error::Result;
use crate::interfaces::Common;
use crate::manager::port::{DpCommon, Port};
use crate::manager::Manager;
use crate::trace::TraceMask;
use crate::types::{Addr, PortAttributes, Priority};

/// ### Dp Report
///
/// Connection state of a port or a device.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpReport {
    pub enabled: bool,
    pub connected: bool,
    pub auto_connect: bool,
    pub number_connects: u64,
    pub exception_users: usize,
    pub locked: bool,
    pub interposed: bool,
    pub trace_mask: TraceMask,
}

impl From<&DpCommon> for DpReport {
    fn from(dp: &DpCommon) -> Self {
        DpReport {
            enabled: dp.enabled,
            connected: dp.connected,
            auto_connect: dp.auto_connect,
            number_connects: dp.number_connects,
            exception_users: dp.exception_users.len(),
            locked: dp.block_holder.is_some(),
            interposed: dp.interpose.is_some(),
            trace_mask: dp.trace_mask(),
        }
    }
}

/// ### Port Report
///
/// A consistent snapshot of one port.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortReport {
    pub name: String,
    pub attributes: PortAttributes,
    pub state: DpReport,
    /// Requests waiting per priority, indexed Low..Connect
    pub queued: [usize; 4],
    pub connected_requests: usize,
    pub devices: Vec<(Addr, DpReport)>,
}

impl PortReport {
    pub fn queued_total(&self) -> usize {
        self.queued.iter().sum()
    }

    pub fn queued_at(&self, priority: Priority) -> usize {
        self.queued[priority.index()]
    }

    /// ### Write
    ///
    /// #### Arguments
    /// - `out` -> where to write
    /// - `details` -> 0 for one line per port, 1 adds devices, 2 adds queue counts
    ///
    pub fn write(&self, out: &mut dyn Write, details: u32) -> fmt::Result {
        writeln!(
            out,
            "{} multiDevice:{} canBlock:{} autoConnect:{}",
            self.name,
            yes_no(self.attributes.multi_device),
            yes_no(self.attributes.can_block),
            yes_no(self.state.auto_connect),
        )?;
        writeln!(
            out,
            "    enabled:{} connected:{} numberConnects {}",
            yes_no(self.state.enabled),
            yes_no(self.state.connected),
            self.state.number_connects,
        )?;
        if details >= 1 {
            writeln!(
                out,
                "    exceptionUsers {} blockProcessCallback {} traceMask:{}",
                self.state.exception_users,
                yes_no(self.state.locked),
                self.state.trace_mask,
            )?;
            for (addr, device) in &self.devices {
                writeln!(
                    out,
                    "    addr {} autoConnect {} enabled {} connected {} exceptionUsers {} traceMask:{}",
                    addr,
                    yes_no(device.auto_connect),
                    yes_no(device.enabled),
                    yes_no(device.connected),
                    device.exception_users,
                    device.trace_mask,
                )?;
            }
        }
        if details >= 2 {
            writeln!(
                out,
                "    queued: low {} medium {} high {} connect {} requests {}",
                self.queued[0], self.queued[1], self.queued[2], self.queued[3], self.connected_requests,
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for PortReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, 2)
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

fn snapshot_port(port: &Port) -> (PortReport, Option<Arc<dyn Common>>) {
    let state = port.state.lock();
    let report = PortReport {
        name: port.name.clone(),
        attributes: port.attributes,
        state: DpReport::from(&state.dpc),
        queued: [0, 1, 2, 3].map(|i| state.queues[i].len()),
        connected_requests: state.slots.len(),
        devices: state
            .devices
            .iter()
            .map(|(addr, dp)| (*addr, DpReport::from(dp)))
            .collect(),
    };
    (report, state.interfaces.common.clone())
}

impl Manager {
    /// ### Snapshot
    ///
    /// The current state of a port.
    ///
    pub fn snapshot(&self, port: &str) -> Result<PortReport> {
        let port = self.port(port)?;
        Ok(snapshot_port(&port).0)
    }

    /// ### Report
    ///
    /// Describe one port, or every port, along with each driver's own report.
    ///
    pub fn report(&self, details: u32, port: Option<&str>) -> Result<String> {
        let names = match port {
            Some(name) => vec![name.to_string()],
            None => self.port_names(),
        };
        let mut out = String::new();
        for name in names {
            let port = self.port(&name)?;
            let (report, common) = snapshot_port(&port);
            // a report never fails to write to a String
            let _ = report.write(&mut out, details);
            if let Some(common) = common {
                let _ = common.report(&mut out, details);
            }
        }
        Ok(out)
    }
}
