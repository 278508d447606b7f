//! ## Constants
//!
//! Protocol codes and tuning values, grouped by concern.
//!

pub mod queue {
    use std::time::Duration;

    /// Number of queue priority levels, the connect level included
    pub const NUMBER_QUEUE_PRIORITIES: usize = 4;
    /// Size in bytes of the error message carried by every request
    pub const ERROR_MESSAGE_SIZE: usize = 160;
    /// Minimum time between two automatic connect attempts on the same port or device
    pub const AUTO_CONNECT_SPACING: Duration = Duration::from_secs(2);
}

pub mod gpib {
    use std::time::Duration;

    /// Time a GPIB request may wait in the port queue
    pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(60);
    /// Time a READW/EFASTIW command waits for its service request
    pub const DEFAULT_SRQ_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Device Clear (universal)
    pub const IBDCL: u8 = 0x14;
    /// Local Lockout (universal)
    pub const IBLLO: u8 = 0x11;
    /// Selected Device Clear (addressed)
    pub const IBSDC: u8 = 0x04;
    /// Go To Local (addressed)
    pub const IBGTL: u8 = 0x01;
}

#[allow(unused)]
pub mod usb {
    /// The class code for usbtmc
    pub const USBTMC_CLASS_CODE: u8 = 0xFE;
    /// The subclass code for usbtmc
    pub const USBTMC_SUBCLASS_CODE: u8 = 0x03;
    /// The protocol code for the USB488 spec of usbtmc
    pub const USBTMC_PROTOCOL_CODE: u8 = 0x01;
}

#[allow(unused)]
pub mod misc {
    use std::time::Duration;

    /// The default timeout duration
    pub const DEFAULT_TIMEOUT_DURATION: Duration = Duration::from_secs(2);
    /// The size in bytes of a USBTMC header in a bulk transfer
    pub const USBTMC_HEADER_SIZE: usize = 12;
    /// Buffer size we define for the application
    pub const APPLICATION_BUFFER_SIZE: u32 = 1024 * 8;
    /// Poll period of the interrupt endpoint and of the status byte poller
    pub const SRQ_POLL_PERIOD: Duration = Duration::from_millis(100);
}

#[allow(unused)]
pub mod usbtmc_status {
    /// Success
    pub const STATUS_SUCCESS: u8 = 0x01;
    /// The device has received a split transaction CHECK_STATUS request and the request is being processed
    pub const STATUS_PENDING: u8 = 0x02;
    /// Failure for unspecified or undefined reason
    pub const STATUS_FAILED: u8 = 0x80;
    /// The device received an INITIATE_ABORT request, but the request is not in progress
    pub const STATUS_TRANSFER_NOT_IN_PROGRESS: u8 = 0x81;
}

#[allow(unused)]
pub mod control_requests {
    pub const INITIATE_ABORT_BULK_OUT: u8 = 1;
    pub const CHECK_ABORT_BULK_OUT_STATUS: u8 = 2;
    pub const INITIATE_ABORT_BULK_IN: u8 = 3;
    pub const CHECK_ABORT_BULK_IN_STATUS: u8 = 4;
    pub const INITIATE_CLEAR: u8 = 5;
    pub const CHECK_CLEAR_STATUS: u8 = 6;
    pub const GET_CAPABILITIES: u8 = 7;
    pub const READ_STATUS_BYTE: u8 = 128;
    pub const REN_CONTROL: u8 = 160;
    pub const GO_TO_LOCAL: u8 = 161;
    pub const LOCAL_LOCKOUT: u8 = 162;
}

#[allow(unused)]
pub mod bulk_msg_id {
    pub const DEVICE_DEPENDENT_MSG_OUT: u8 = 1;
    pub const REQUEST_DEVICE_DEPENDENT_MSG_IN: u8 = 2;
    pub const DEVICE_DEPENDENT_MSG_IN: u8 = 2;
}

#[allow(unused)]
pub mod usb488 {
    /// bNotify1 of an interrupt-IN packet carrying a service request
    pub const SRQ_NOTIFY: u8 = 0x81;
    /// RQS bit of the status byte
    pub const STB_RQS: u8 = 0x40;
    /// USB488 interface capability: accepts REN_CONTROL, GO_TO_LOCAL, LOCAL_LOCKOUT
    pub const CAP_REN_CONTROL: u8 = 0b0000_0010;
}
