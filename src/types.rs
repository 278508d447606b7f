//! ## Types
//!
//! The different types used across the crate
//!

use crate::constants::queue::NUMBER_QUEUE_PRIORITIES;

/// ### Addr
///
/// Device address on a port. `-1` addresses the port itself.
///
pub type Addr = i32;

/// Address used for port level operations
pub const PORT_ADDR: Addr = -1;

/// ### Priority
///
/// Queue priority of a request. `Connect` is drained before every data
/// priority and is the only one that runs while a port is disconnected.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low = 0,
    Medium = 1,
    High = 2,
    Connect = 3,
}

impl Priority {
    /// Data priorities in scan order
    pub(crate) const SCAN_ORDER: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

const _: () = assert!(NUMBER_QUEUE_PRIORITIES == Priority::Connect as usize + 1);

/// ### Port Attributes
///
/// Fixed at registration.
///
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortAttributes {
    /// The port performs I/O that may block: requests are run by a worker thread
    pub can_block: bool,
    /// The port hosts several addressable devices
    pub multi_device: bool,
}

/// ### Lock Scope
///
/// Which requests a lock holder keeps out.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    /// Every request on the port
    Port,
    /// Requests for the holder's address only
    Device,
}

/// ### Exception
///
/// State changes broadcast to exception callbacks.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    Connect,
    Enable,
    AutoConnect,
    TraceMask,
}

/// ### Callback State
///
/// Where a request stands with respect to its process callback.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum CallbackState {
    #[default]
    Idle,
    Active,
    /// A canceller is waiting for the active callback to return
    Canceled,
}
