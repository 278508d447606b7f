//! ## Control
//!
//! Class requests on the default control endpoint: capabilities, aborts,
//! clears and the USB488 extras.
//!

use std::time::Duration;

use crate::constants::{control_requests, usb488, usbtmc_status};
use crate::error::UsbtmcError;
use crate::usbtmc::types::{Capabilities, CtlBTag, Endpoint, Handle};

use anyhow::Result;
use rusb::{Direction, Recipient, RequestType, TransferType};

/// Send a class request and return the response buffer.
fn class_request<const N: usize>(
    handle: &Handle,
    recipient: Recipient,
    b_request: u8,
    w_value: u16,
    w_index: u16,
    timeout: Duration,
) -> Result<[u8; N]> {
    let mut response = [0u8; N];
    let request_type = rusb::request_type(Direction::In, RequestType::Class, recipient);
    handle
        .read()
        .read_control(request_type, b_request, w_value, w_index, &mut response, timeout)?;
    Ok(response)
}

fn check_status(status: u8) -> Result<()> {
    match status {
        usbtmc_status::STATUS_SUCCESS => Ok(()),
        usbtmc_status::STATUS_FAILED => Err(UsbtmcError::StatusFailure.into()),
        usbtmc_status::STATUS_TRANSFER_NOT_IN_PROGRESS => Err(UsbtmcError::TransferNotInProgress.into()),
        _ => Err(UsbtmcError::StatusUnexpectedFailure.into()),
    }
}

/// Repeat a CHECK_* request while the device answers STATUS_PENDING.
fn poll_status<const N: usize>(mut check: impl FnMut() -> Result<[u8; N]>) -> Result<[u8; N]> {
    loop {
        let response = check()?;
        match response[0] {
            usbtmc_status::STATUS_PENDING => {
                // bmAbortBulkIn / bmClear: the Bulk IN FIFO must be read out first
                if N > 1 && response[1] & 0b0000_0001 != 0 {
                    return Err(UsbtmcError::BulkInFIFONotEmpty.into());
                }
            }
            usbtmc_status::STATUS_SUCCESS => return Ok(response),
            _ => return Err(UsbtmcError::StatusUnexpectedFailure.into()),
        }
    }
}

/// ### Get Capabilities
///
/// Read the USBTMC and USB488 capabilities of the interface.
///
pub fn get_capabilities(handle: &Handle, interface_number: u8, timeout: Duration) -> Result<Capabilities> {
    let response: [u8; 0x18] = class_request(
        handle,
        Recipient::Interface,
        control_requests::GET_CAPABILITIES,
        0,
        interface_number as u16,
        timeout,
    )?;
    if response[0] != usbtmc_status::STATUS_SUCCESS {
        return Err(UsbtmcError::StatusUnexpectedFailure.into());
    }
    Ok(parse_capabilities(&response))
}

/// ### Parse Capabilities
///
/// Decode a GET_CAPABILITIES response. Bytes 12 to 15 are only set by
/// USB488 interfaces.
///
pub fn parse_capabilities(response: &[u8; 0x18]) -> Capabilities {
    let [_, _, version_lo, version_hi, interface, device, ..] = *response;
    let usb488_interface = response[14];
    let usb488_device = response[15];

    Capabilities {
        bcd_version: u16::from_le_bytes([version_lo, version_hi]),
        accepts_indicator_pulse_request: interface & 0b0000_0100 != 0,
        is_talk_only: interface & 0b0000_0010 != 0,
        is_listen_only: interface & 0b0000_0001 != 0,
        supports_bulk_in_term_char: device & 0b0000_0001 != 0,
        usb488_bcd_version: u16::from_le_bytes([response[12], response[13]]),
        accepts_ren_control: usb488_interface & usb488::CAP_REN_CONTROL != 0,
        accepts_trigger: usb488_interface & 0b0000_0001 != 0,
        is_scpi: usb488_device & 0b0000_1000 != 0,
        supports_service_request: usb488_device & 0b0000_0100 != 0,
    }
}

/// ### Abort Transfer
///
/// Abort the bulk transfer tagged `transfer_btag` on `endpoint`, in or out
/// according to the endpoint's direction.
///
/// #### Returns
/// The byte count the device reports for the aborted transfer.
///
pub fn abort_transfer(handle: &Handle, endpoint: &Endpoint, transfer_btag: u8, timeout: Duration) -> Result<usize> {
    if endpoint.transfer_type != TransferType::Bulk {
        return Err(UsbtmcError::IncorrectEndpoint.into());
    }
    let (initiate, check) = match endpoint.direction {
        Direction::Out => (
            control_requests::INITIATE_ABORT_BULK_OUT,
            control_requests::CHECK_ABORT_BULK_OUT_STATUS,
        ),
        Direction::In => (
            control_requests::INITIATE_ABORT_BULK_IN,
            control_requests::CHECK_ABORT_BULK_IN_STATUS,
        ),
    };
    let w_index = endpoint.address as u16;

    let started: [u8; 2] = class_request(handle, Recipient::Endpoint, initiate, transfer_btag as u16, w_index, timeout)?;
    check_status(started[0])?;

    let done: [u8; 8] = poll_status(|| class_request(handle, Recipient::Endpoint, check, 0, w_index, timeout))?;
    Ok(u32::from_le_bytes([done[4], done[5], done[6], done[7]]) as usize)
}

/// ### Clear Buffers
///
/// INITIATE_CLEAR then CHECK_CLEAR_STATUS until the device is done.
///
/// **No bulk transfer may be in flight.**
///
pub fn clear_buffers(handle: &Handle, interface_number: u8, timeout: Duration) -> Result<()> {
    let index = interface_number as u16;
    let started: [u8; 1] = class_request(
        handle,
        Recipient::Interface,
        control_requests::INITIATE_CLEAR,
        0,
        index,
        timeout,
    )?;
    if started[0] != usbtmc_status::STATUS_SUCCESS {
        return Err(UsbtmcError::StatusUnexpectedFailure.into());
    }

    poll_status::<2>(|| {
        class_request(
            handle,
            Recipient::Interface,
            control_requests::CHECK_CLEAR_STATUS,
            0,
            index,
            timeout,
        )
    })?;
    Ok(())
}

/// Clear a halt on `endpoint`.
pub fn clear_halt(handle: &Handle, endpoint: &Endpoint) -> Result<()> {
    handle.write().clear_halt(endpoint.address)?;
    Ok(())
}

/// ### Read Status Byte
///
/// Read the status byte through the control endpoint. Only meaningful on
/// devices without an interrupt endpoint, which otherwise deliver the byte
/// there.
///
/// #### Arguments
/// - `interface_number` -> the USB488 interface
/// - `ctl_btag` -> source of the request's bTag
///
pub fn read_status_byte(handle: &Handle, interface_number: u8, ctl_btag: &CtlBTag, timeout: Duration) -> Result<u8> {
    let response: [u8; 3] = class_request(
        handle,
        Recipient::Interface,
        control_requests::READ_STATUS_BYTE,
        ctl_btag.get() as u16,
        interface_number as u16,
        timeout,
    )?;
    check_status(response[0])?;
    Ok(response[2])
}

/// ### USB488 Request
///
/// Send REN_CONTROL, GO_TO_LOCAL or LOCAL_LOCKOUT.
///
/// #### Arguments
/// - `b_request` -> one of the three requests
/// - `w_value` -> 1 to assert REN, otherwise 0
///
pub fn usb488_request(
    handle: &Handle,
    interface_number: u8,
    b_request: u8,
    w_value: u16,
    timeout: Duration,
) -> Result<()> {
    let response: [u8; 1] = class_request(
        handle,
        Recipient::Interface,
        b_request,
        w_value,
        interface_number as u16,
        timeout,
    )?;
    check_status(response[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usb488_capabilities_are_decoded() {
        let mut buffer = [0u8; 0x18];
        buffer[0] = usbtmc_status::STATUS_SUCCESS;
        buffer[2] = 0x00;
        buffer[3] = 0x01;
        buffer[5] = 0b1;
        buffer[12] = 0x00;
        buffer[13] = 0x01;
        buffer[14] = 0b011;
        buffer[15] = 0b1100;

        let caps = parse_capabilities(&buffer);
        assert_eq!(caps.bcd_version, 0x0100);
        assert!(caps.supports_bulk_in_term_char);
        assert_eq!(caps.usb488_bcd_version, 0x0100);
        assert!(caps.accepts_ren_control);
        assert!(caps.accepts_trigger);
        assert!(caps.is_scpi);
        assert!(caps.supports_service_request);
        assert!(!caps.is_talk_only);
    }

    #[test]
    fn plain_usbtmc_capabilities_leave_usb488_unset() {
        let mut buffer = [0u8; 0x18];
        buffer[4] = 0b110;
        let caps = parse_capabilities(&buffer);
        assert!(caps.accepts_indicator_pulse_request);
        assert!(caps.is_talk_only);
        assert_eq!(caps.usb488_bcd_version, 0);
        assert!(!caps.accepts_ren_control);
    }

    #[test]
    fn pending_status_is_polled_until_done() {
        let mut answers = vec![[usbtmc_status::STATUS_SUCCESS, 0], [usbtmc_status::STATUS_PENDING, 0]];
        let done = poll_status(|| Ok(answers.pop().unwrap())).unwrap();
        assert_eq!(done[0], usbtmc_status::STATUS_SUCCESS);
        assert!(answers.is_empty());

        let fifo = poll_status(|| Ok([usbtmc_status::STATUS_PENDING, 1]));
        assert!(matches!(
            fifo.unwrap_err().downcast_ref::<UsbtmcError>(),
            Some(UsbtmcError::BulkInFIFONotEmpty)
        ));
    }

    #[test]
    fn status_codes_map_to_errors() {
        assert!(check_status(usbtmc_status::STATUS_SUCCESS).is_ok());
        let err = check_status(usbtmc_status::STATUS_TRANSFER_NOT_IN_PROGRESS).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UsbtmcError>(),
            Some(UsbtmcError::TransferNotInProgress)
        ));
        assert!(check_status(usbtmc_status::STATUS_FAILED).is_err());
    }
}
