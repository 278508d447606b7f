//! ## Command Tables
//!
//! A device is described by a [`ParmBlock`]: a table of [`GpibCmd`]s indexed
//! by the `parm` of a record's link, plus timing shared by all its records.
//!

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::gpib::GpibRecord;
use crate::types::{Addr, Priority};

// COMMAND TYPE
// ==========

/// ### Cmd Type
///
/// The kind of transaction a command performs. Every kind is a single bit.
///
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CmdType(u32);

impl CmdType {
    /// Write `cmd`, then read the reply
    pub const READ: CmdType = CmdType(0x1);
    /// Write the formatted message
    pub const WRITE: CmdType = CmdType(0x2);
    /// Run convert only, no I/O
    pub const CVTIO: CmdType = CmdType(0x4);
    /// Write `cmd` verbatim
    pub const CMD: CmdType = CmdType(0x8);
    /// Send `cmd` as addressed bus commands
    pub const ACMD: CmdType = CmdType(0x10);
    /// Soft command, only convert runs
    pub const SOFT: CmdType = CmdType(0x20);
    /// Write `cmd`, wait for SRQ, then read
    pub const READW: CmdType = CmdType(0x40);
    /// Read without writing first
    pub const RAWREAD: CmdType = CmdType(0x80);
    /// Write `cmd` followed by an entry of the enum table
    pub const EFASTO: CmdType = CmdType(0x100);
    /// Read and match the reply against the enum table
    pub const EFASTI: CmdType = CmdType(0x200);
    /// Like EFASTI, waiting for SRQ before the read
    pub const EFASTIW: CmdType = CmdType(0x400);
    pub const IFC: CmdType = CmdType(0x800);
    pub const REN: CmdType = CmdType(0x1000);
    pub const DCL: CmdType = CmdType(0x2000);
    pub const LLO: CmdType = CmdType(0x4000);
    pub const SDC: CmdType = CmdType(0x8000);
    pub const GTL: CmdType = CmdType(0x10000);
    pub const SRQHANDLER: CmdType = CmdType(0x20000);
    /// Disconnect and reconnect the link
    pub const RESETLNK: CmdType = CmdType(0x40000);

    /// Kinds that only make sense on a port with a GPIB interface
    pub const GPIB_ONLY: CmdType = CmdType(
        Self::ACMD.0
            | Self::READW.0
            | Self::EFASTIW.0
            | Self::IFC.0
            | Self::REN.0
            | Self::DCL.0
            | Self::LLO.0
            | Self::SDC.0
            | Self::GTL.0
            | Self::SRQHANDLER.0,
    );
    /// Kinds that wait for an SRQ before reading
    pub const SRQ_WAIT: CmdType = CmdType(Self::READW.0 | Self::EFASTIW.0);
    /// Kinds that use the enum table
    pub const EFAST: CmdType = CmdType(Self::EFASTO.0 | Self::EFASTI.0 | Self::EFASTIW.0);
    /// Kinds that are bus commands run through `queue_special`
    pub const SPECIAL: CmdType = CmdType(
        Self::IFC.0
            | Self::REN.0
            | Self::DCL.0
            | Self::LLO.0
            | Self::SDC.0
            | Self::GTL.0
            | Self::RESETLNK.0,
    );

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: CmdType) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: CmdType) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for CmdType {
    type Output = CmdType;

    fn bitor(self, rhs: CmdType) -> CmdType {
        CmdType(self.0 | rhs.0)
    }
}

impl BitOrAssign for CmdType {
    fn bitor_assign(&mut self, rhs: CmdType) {
        self.0 |= rhs.0;
    }
}

const NAMES: [(CmdType, &str); 19] = [
    (CmdType::READ, "GPIBREAD"),
    (CmdType::WRITE, "GPIBWRITE"),
    (CmdType::CVTIO, "GPIBCVTIO"),
    (CmdType::CMD, "GPIBCMD"),
    (CmdType::ACMD, "GPIBACMD"),
    (CmdType::SOFT, "GPIBSOFT"),
    (CmdType::READW, "GPIBREADW"),
    (CmdType::RAWREAD, "GPIBRAWREAD"),
    (CmdType::EFASTO, "GPIBEFASTO"),
    (CmdType::EFASTI, "GPIBEFASTI"),
    (CmdType::EFASTIW, "GPIBEFASTIW"),
    (CmdType::IFC, "GPIBIFC"),
    (CmdType::REN, "GPIBREN"),
    (CmdType::DCL, "GPIBDCL"),
    (CmdType::LLO, "GPIBLLO"),
    (CmdType::SDC, "GPIBSDC"),
    (CmdType::GTL, "GPIBGTL"),
    (CmdType::SRQHANDLER, "GPIBSRQHANDLER"),
    (CmdType::RESETLNK, "GPIBRESETLNK"),
];

impl fmt::Debug for CmdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (kind, name) in NAMES {
            if self.intersects(kind) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            write!(f, "CmdType({:#x})", self.0)?;
        }
        Ok(())
    }
}

// COMMAND
// ==========

/// ### Convert
///
/// Custom conversion run before a write (or instead of I/O for CVTIO and
/// SOFT). Receives `p1`, `p2` and the enum table of the command.
///
/// #### Returns
/// The number of bytes of the message to write; 0 means all of it.
///
pub type Convert = Arc<dyn Fn(&GpibRecord, i32, i32, &[String]) -> Result<usize> + Send + Sync>;

/// ### Gpib Cmd
///
/// One entry of a command table.
///
#[derive(Clone)]
pub struct GpibCmd {
    pub cmd_type: CmdType,
    pub pri: Priority,
    /// String written to the device, if any
    pub cmd: Option<String>,
    /// printf/scanf style format of the message
    pub format: Option<String>,
    /// Size of the response buffer for respond-to-writes devices
    pub rsp_len: usize,
    /// Size of the message buffer
    pub msg_len: usize,
    pub convert: Option<Convert>,
    pub p1: i32,
    pub p2: i32,
    /// Enum table of the EFAST kinds
    pub p3: Vec<String>,
    /// Input end of string set before reading, `None` leaves it alone
    pub eos: Option<Vec<u8>>,
}

impl GpibCmd {
    pub fn new(cmd_type: CmdType, pri: Priority) -> GpibCmd {
        GpibCmd {
            cmd_type,
            pri,
            cmd: None,
            format: None,
            rsp_len: 0,
            msg_len: 0,
            convert: None,
            p1: 0,
            p2: 0,
            p3: Vec::new(),
            eos: None,
        }
    }

    pub fn cmd(mut self, cmd: impl Into<String>) -> GpibCmd {
        self.cmd = Some(cmd.into());
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> GpibCmd {
        self.format = Some(format.into());
        self
    }

    pub fn msg_len(mut self, msg_len: usize) -> GpibCmd {
        self.msg_len = msg_len;
        self
    }

    pub fn rsp_len(mut self, rsp_len: usize) -> GpibCmd {
        self.rsp_len = rsp_len;
        self
    }

    pub fn convert(
        mut self,
        convert: impl Fn(&GpibRecord, i32, i32, &[String]) -> Result<usize> + Send + Sync + 'static,
    ) -> GpibCmd {
        self.convert = Some(Arc::new(convert));
        self
    }

    pub fn params(mut self, p1: i32, p2: i32) -> GpibCmd {
        self.p1 = p1;
        self.p2 = p2;
        self
    }

    /// Set the enum table; `p1` becomes its length.
    pub fn efast<S: Into<String>>(mut self, table: impl IntoIterator<Item = S>) -> GpibCmd {
        self.p3 = table.into_iter().map(Into::into).collect();
        self.p1 = self.p3.len() as i32;
        self
    }

    pub fn eos(mut self, eos: impl Into<Vec<u8>>) -> GpibCmd {
        self.eos = Some(eos.into());
        self
    }

    /// ### Is Consistent
    ///
    /// Check that the command can run on a port with (or without) a GPIB
    /// interface and that it carries the fields its kind needs.
    ///
    /// #### Returns
    /// `BadField` naming the first problem found.
    ///
    pub fn is_consistent(&self, has_gpib: bool) -> Result<()> {
        let kind = self.cmd_type;
        if kind.intersects(CmdType::GPIB_ONLY) && !has_gpib {
            return Err(Error::BadField(format!("{:?} requires a GPIB interface", kind)));
        }
        if kind.contains(CmdType::SOFT) && self.convert.is_none() {
            return Err(Error::BadField("GPIBSOFT requires convert".into()));
        }
        if kind.intersects(CmdType::EFAST) && self.p3.is_empty() {
            return Err(Error::BadField(format!("{:?} requires an enum table", kind)));
        }
        let needs_cmd = CmdType::READ | CmdType::READW | CmdType::CMD | CmdType::ACMD;
        if kind.intersects(needs_cmd) && self.cmd.as_deref().map_or(true, str::is_empty) {
            return Err(Error::BadField(format!("{:?} requires cmd", kind)));
        }
        Ok(())
    }
}

impl fmt::Debug for GpibCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpibCmd")
            .field("cmd_type", &self.cmd_type)
            .field("pri", &self.pri)
            .field("cmd", &self.cmd)
            .field("format", &self.format)
            .field("rsp_len", &self.rsp_len)
            .field("msg_len", &self.msg_len)
            .field("convert", &self.convert.is_some())
            .field("p1", &self.p1)
            .field("p2", &self.p2)
            .field("p3", &self.p3)
            .field("eos", &self.eos)
            .finish()
    }
}

// PARM BLOCK
// ==========

/// ### Parm Block
///
/// Command table and timing of one instrument type.
///
#[derive(Debug, Clone)]
pub struct ParmBlock {
    pub name: String,
    pub cmds: Vec<GpibCmd>,
    /// I/O timeout handed to the transport
    pub timeout: Duration,
    /// After a timeout, requests fail until this much time has passed
    pub time_window: Duration,
    /// For devices that answer every write: the delay before reading the answer
    pub respond2writes: Option<Duration>,
}

impl ParmBlock {
    pub fn new(name: impl Into<String>, cmds: Vec<GpibCmd>) -> ParmBlock {
        ParmBlock {
            name: name.into(),
            cmds,
            timeout: Duration::from_secs(1),
            time_window: Duration::ZERO,
            respond2writes: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> ParmBlock {
        self.timeout = timeout;
        self
    }

    pub fn time_window(mut self, window: Duration) -> ParmBlock {
        self.time_window = window;
        self
    }

    pub fn respond2writes(mut self, delay: Duration) -> ParmBlock {
        self.respond2writes = Some(delay);
        self
    }

    pub fn cmd(&self, parm: usize) -> Result<&GpibCmd> {
        self.cmds
            .get(parm)
            .ok_or_else(|| Error::BadField(format!("parm {} not in table {}", parm, self.name)))
    }

    /// Largest message buffer of the table
    pub fn msg_len_max(&self) -> usize {
        self.cmds.iter().map(|c| c.msg_len).max().unwrap_or(0)
    }

    /// Largest response buffer of the table
    pub fn rsp_len_max(&self) -> usize {
        self.cmds.iter().map(|c| c.rsp_len).max().unwrap_or(0)
    }
}

// LINK
// ==========

/// ### Gpib Link
///
/// A record's link in the form `#L<link> A<addr> @<parm>`.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpibLink {
    pub link: i32,
    pub addr: Addr,
    pub parm: usize,
}

impl GpibLink {
    /// Name of the port serving this link
    pub fn port_name(&self) -> String {
        format!("L{}", self.link)
    }
}

impl FromStr for GpibLink {
    type Err = Error;

    fn from_str(s: &str) -> Result<GpibLink> {
        let bad = || Error::BadLinkType(s.to_string());
        let rest = s.trim().strip_prefix('#').ok_or_else(bad)?;
        let rest = rest.trim_start().strip_prefix('L').ok_or_else(bad)?;
        let (link, rest) = leading_number(rest).ok_or_else(bad)?;
        let rest = rest.trim_start().strip_prefix('A').ok_or_else(bad)?;
        let (addr, rest) = leading_number(rest).ok_or_else(bad)?;
        let rest = rest.trim_start().strip_prefix('@').ok_or_else(bad)?;
        let (parm, rest) = leading_number(rest.trim_start()).ok_or_else(bad)?;
        if !rest.trim().is_empty() || parm < 0 {
            return Err(bad());
        }
        Ok(GpibLink {
            link: link as i32,
            addr: addr as Addr,
            parm: parm as usize,
        })
    }
}

fn leading_number(s: &str) -> Option<(i64, &str)> {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map_or(s.len(), |(i, _)| i);
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_link() {
        let link: GpibLink = "#L1 A5 @3".parse().unwrap();
        assert_eq!(link, GpibLink { link: 1, addr: 5, parm: 3 });
        assert_eq!(link.port_name(), "L1");

        let link: GpibLink = "  #L12A0@0 ".parse().unwrap();
        assert_eq!(link, GpibLink { link: 12, addr: 0, parm: 0 });
    }

    #[test]
    fn reject_bad_links() {
        for bad in ["", "L1 A5 @3", "#C1 S2 @3", "#L1 @3", "#L1 A5", "#L1 A5 @x", "#L1 A5 @3 junk"] {
            assert!(
                matches!(bad.parse::<GpibLink>(), Err(Error::BadLinkType(_))),
                "{bad:?} parsed"
            );
        }
    }

    #[test]
    fn gpib_only_kinds_need_gpib() {
        let cmd = GpibCmd::new(CmdType::READW, Priority::Low).cmd("X?");
        assert!(cmd.is_consistent(true).is_ok());
        assert!(matches!(cmd.is_consistent(false), Err(Error::BadField(_))));

        let cmd = GpibCmd::new(CmdType::READ, Priority::Low).cmd("X?");
        assert!(cmd.is_consistent(false).is_ok());
    }

    #[test]
    fn kinds_need_their_fields() {
        let read = GpibCmd::new(CmdType::READ, Priority::Low);
        assert!(read.is_consistent(true).is_err());

        let soft = GpibCmd::new(CmdType::SOFT, Priority::Low);
        assert!(soft.is_consistent(true).is_err());
        let soft = soft.convert(|_, _, _, _| Ok(0));
        assert!(soft.is_consistent(true).is_ok());

        let efast = GpibCmd::new(CmdType::EFASTO, Priority::Low).cmd("MODE ");
        assert!(efast.is_consistent(true).is_err());
        let efast = efast.efast(["AC", "DC"]);
        assert_eq!(efast.p1, 2);
        assert!(efast.is_consistent(true).is_ok());
    }

    #[test]
    fn parm_block_limits() {
        let block = ParmBlock::new(
            "dvm",
            vec![
                GpibCmd::new(CmdType::READ, Priority::Low).cmd("V?").msg_len(32),
                GpibCmd::new(CmdType::WRITE, Priority::Low).msg_len(80).rsp_len(16),
            ],
        );
        assert_eq!(block.msg_len_max(), 80);
        assert_eq!(block.rsp_len_max(), 16);
        assert!(block.cmd(1).is_ok());
        assert!(matches!(block.cmd(2), Err(Error::BadField(_))));
    }

    #[test]
    fn debug_names_kinds() {
        assert_eq!(format!("{:?}", CmdType::READW), "GPIBREADW");
        assert_eq!(format!("{:?}", CmdType::READ | CmdType::CVTIO), "GPIBREAD|GPIBCVTIO");
    }
}
