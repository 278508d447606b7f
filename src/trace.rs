//! ## Trace
//!
//! Per port and per device trace masks, and the `asyn_print!` macros that
//! route gated messages to `tracing`.
//!
//! Every port and device carries its own [`TraceMask`]. A message is emitted
//! only when its mask intersects the mask of the port or device the request is
//! bound to. ERROR messages map to `tracing::error!`, FLOW messages to
//! `tracing::debug!` and the I/O masks to `tracing::trace!`.
//!

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::types::Addr;

/// ### Trace Mask
///
/// Bit set selecting which classes of messages a port or device emits.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceMask(u32);

impl TraceMask {
    pub const NONE: TraceMask = TraceMask(0);
    /// Run time errors
    pub const ERROR: TraceMask = TraceMask(0x0001);
    /// Device support I/O
    pub const IO_DEVICE: TraceMask = TraceMask(0x0002);
    /// Interposed interface I/O
    pub const IO_FILTER: TraceMask = TraceMask(0x0004);
    /// Low level driver I/O
    pub const IO_DRIVER: TraceMask = TraceMask(0x0008);
    /// Queueing and callback flow
    pub const FLOW: TraceMask = TraceMask(0x0010);

    pub const fn from_bits(bits: u32) -> TraceMask {
        TraceMask(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: TraceMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: TraceMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl Default for TraceMask {
    fn default() -> Self {
        TraceMask::ERROR
    }
}

impl BitOr for TraceMask {
    type Output = TraceMask;

    fn bitor(self, rhs: TraceMask) -> TraceMask {
        TraceMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for TraceMask {
    fn bitor_assign(&mut self, rhs: TraceMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for TraceMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Emit a message gated by the trace mask of whatever `$target` is bound to.
///
/// `$target` is anything with a `trace_target(TraceMask) -> Option<(String, Addr)>` method.
macro_rules! asyn_print {
    ($target:expr, $mask:expr, $($arg:tt)+) => {
        if let Some((port, addr)) = $target.trace_target($mask) {
            $crate::trace::emit($mask, &port, addr, format_args!($($arg)+));
        }
    };
}

/// Like `asyn_print!`, with an escaped dump of an I/O buffer attached.
macro_rules! asyn_print_io {
    ($target:expr, $mask:expr, $data:expr, $($arg:tt)+) => {
        if let Some((port, addr)) = $target.trace_target($mask) {
            $crate::trace::emit_io($mask, &port, addr, $data, format_args!($($arg)+));
        }
    };
}

pub(crate) use asyn_print;
pub(crate) use asyn_print_io;

#[doc(hidden)]
pub fn emit(mask: TraceMask, port: &str, addr: Addr, args: fmt::Arguments<'_>) {
    if mask.intersects(TraceMask::ERROR) {
        tracing::error!(port, addr, "{}", args);
    } else if mask.intersects(TraceMask::FLOW) {
        tracing::debug!(port, addr, "{}", args);
    } else {
        tracing::trace!(port, addr, "{}", args);
    }
}

#[doc(hidden)]
pub fn emit_io(mask: TraceMask, port: &str, addr: Addr, data: &[u8], args: fmt::Arguments<'_>) {
    let data = escape(data);
    if mask.intersects(TraceMask::ERROR) {
        tracing::error!(port, addr, data = %data, "{}", args);
    } else {
        tracing::trace!(port, addr, data = %data, "{}", args);
    }
}

/// ### Escape
///
/// Render bytes with C style escapes for non printable characters.
///
pub fn escape(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:03o}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_operations() {
        let mask = TraceMask::ERROR | TraceMask::FLOW;
        assert!(mask.contains(TraceMask::ERROR));
        assert!(mask.intersects(TraceMask::FLOW | TraceMask::IO_DRIVER));
        assert!(!mask.contains(TraceMask::FLOW | TraceMask::IO_DRIVER));
        assert_eq!(mask.bits(), 0x11);
        assert_eq!(TraceMask::default(), TraceMask::ERROR);
    }

    #[test]
    fn escape_control_characters() {
        assert_eq!(escape(b"X?\r\n"), "X?\\r\\n");
        assert_eq!(escape(&[0x01, b'a']), "\\001a");
    }
}
