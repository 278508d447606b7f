//! ## Errors
//!
//! The errors used throughout the crate.
//!
//! [`Error`] is returned by the manager, the transport interfaces and the GPIB
//! device support. [`UsbtmcError`] covers USBTMC protocol failures and only
//! lives inside the `anyhow` chains of the USBTMC transport.
//!

use crate::types::Addr;

/// Result alias used by the public API
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // REGISTRY
    // ==========
    #[error("port {0} not found")]
    PortNotFound(String),
    #[error("port {0} already registered")]
    PortAlreadyRegistered(String),
    #[error("interface {0} already registered")]
    InterfaceAlreadyRegistered(&'static str),
    #[error("interface {0} not found")]
    InterfaceNotFound(&'static str),

    // CONNECTION STATE
    // ==========
    #[error("request is not connected to a port")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error("port {port} addr {addr} not connected")]
    DeviceNotConnected { port: String, addr: Addr },
    #[error("port {port} addr {addr} not enabled")]
    NotEnabled { port: String, addr: Addr },

    // QUEUING AND LOCKING
    // ==========
    #[error("request is already queued")]
    AlreadyQueued,
    #[error("request is queued")]
    IsQueued,
    #[error("already locked")]
    AlreadyLocked,
    #[error("request does not hold a lock")]
    NotLocked,
    #[error("port is synchronous")]
    Synchronous,
    #[error("timeout requested but no timeout callback")]
    NoTimeoutCallback,
    #[error("request was freed")]
    Freed,

    // EXCEPTIONS
    // ==========
    #[error("request is already an exception user")]
    ExceptionUserActive,
    #[error("request is not an exception user")]
    NotExceptionUser,

    // CONFIGURATION
    // ==========
    #[error("bad link type: {0}")]
    BadLinkType(String),
    #[error("bad field: {0}")]
    BadField(String),

    // I/O
    // ==========
    #[error("transport timeout")]
    TransportTimeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("message overflow: need {needed} bytes, have {capacity}")]
    Overflow { needed: usize, capacity: usize },
    #[error("format error: {0}")]
    Format(String),

    // GPIB SESSION
    // ==========
    #[error("another record is already waiting for SRQ")]
    SrqOwnershipViolation,
    #[error("device is in its timeout window")]
    TimeWindowActive,

    #[error("failed to spawn thread")]
    Spawn(#[from] std::io::Error),
}

impl Error {
    /// ### Is Timeout
    ///
    /// True for errors a reader should count as a timeout rather than a failure.
    ///
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TransportTimeout)
    }
}

/// ### USBTMC Error
///
/// Protocol level failures of the USBTMC transport.
///
#[allow(unused)]
#[derive(Debug, thiserror::Error)]
pub enum UsbtmcError {
    #[error("device not found")]
    DeviceNotFound,
    #[error("device is not compatible with USBTMC")]
    DeviceIncompatible,
    #[error("specified interface not found")]
    InterfaceNotFound,
    #[error("specified interface setting not found")]
    InterfaceSettingNotFound,
    #[error("bulk out endpoint not found")]
    BulkOutEndpointNotFound,
    #[error("bulk in endpoint not found")]
    BulkInEndpointNotFound,
    #[error("used incorrect endpoint")]
    IncorrectEndpoint,
    #[error("bulk in transfer cannot be aborted because FIFO is not empty")]
    BulkInFIFONotEmpty,
    #[error("control request failed")]
    StatusFailure,
    #[error("no transfer in progress to abort")]
    TransferNotInProgress,
    #[error("control request unexpectedly failed")]
    StatusUnexpectedFailure,
    #[error("bulk in header mismatch: expected bTag {expected}, got {got}")]
    BTagMismatch { expected: u8, got: u8 },
    #[error("bulk in header is truncated")]
    ShortHeader,
    #[error("device does not support {0}")]
    Unsupported(&'static str),
    #[error("device not open")]
    NotOpen,
}
