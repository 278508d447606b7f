//! ## Bulk
//!
//! Device-dependent messages on the bulk endpoints.
//!

use std::time::Duration;

use crate::constants::{bulk_msg_id, misc};
use crate::error::UsbtmcError;
use crate::usbtmc::types::{BTag, Endpoint, Handle};

use anyhow::Result;
use rusb::{Direction, TransferType};

fn check_endpoint(endpoint: &Endpoint, direction: Direction) -> Result<()> {
    if endpoint.direction != direction || endpoint.transfer_type != TransferType::Bulk {
        return Err(UsbtmcError::IncorrectEndpoint.into());
    }
    Ok(())
}

/// ### Write
///
/// Write data to the BULK OUT endpoint, split in transfers of at most
/// `APPLICATION_BUFFER_SIZE` bytes. The last transfer carries EOM.
///
/// The bTag of the last transfer is left in `last_btag` to abort it on failure.
///
pub fn write(
    handle: &Handle,
    btag: &BTag,
    data: &[u8],
    bulk_out_endpoint: &Endpoint,
    timeout: Duration,
    last_btag: &mut u8,
) -> Result<()> {
    check_endpoint(bulk_out_endpoint, Direction::Out)?;

    let chunk_size = misc::APPLICATION_BUFFER_SIZE as usize;
    let num_transfers = data.len().div_ceil(chunk_size).max(1);

    for (transfer_number, chunk) in data.chunks(chunk_size).enumerate() {
        let tag = btag.get();
        *last_btag = tag;
        let transfer = device_dependent_msg_out(tag, chunk, transfer_number + 1 == num_transfers);
        handle.read().write_bulk(bulk_out_endpoint.address, &transfer, timeout)?;
    }

    Ok(())
}

/// ### Read
///
/// Request and read one message from the BULK IN endpoint.
///
/// #### Arguments
/// - `term_char` -> asks the device to end a transfer on this byte
/// - `max` -> the most bytes to return
/// - `last_btag` -> receives the bTag of the last request
///
#[allow(clippy::too_many_arguments)]
pub fn read(
    handle: &Handle,
    btag: &BTag,
    bulk_in_endpoint: &Endpoint,
    bulk_out_endpoint: &Endpoint,
    term_char: Option<u8>,
    max: usize,
    timeout: Duration,
    last_btag: &mut u8,
) -> Result<Vec<u8>> {
    // SETUP
    // ==========

    check_endpoint(bulk_out_endpoint, Direction::Out)?;
    check_endpoint(bulk_in_endpoint, Direction::In)?;

    let mut output_data: Vec<u8> = Vec::new();

    // READING LOOP
    // ==========

    while output_data.len() < max {
        let wanted = (max - output_data.len()).min(misc::APPLICATION_BUFFER_SIZE as usize);
        let tag = btag.get();
        *last_btag = tag;
        let request_header = request_device_dependent_msg_in_header(tag, wanted as u32, term_char);
        handle.read().write_bulk(bulk_out_endpoint.address, &request_header, timeout)?;

        // room for the header, the data and the alignment bytes
        let mut buffer = vec![0x00; misc::USBTMC_HEADER_SIZE + wanted + 3];
        let bytes_read = handle.read().read_bulk(bulk_in_endpoint.address, &mut buffer, timeout)?;
        let header = parse_device_dependent_msg_in_header(&buffer[..bytes_read], tag)?;

        let available = bytes_read - misc::USBTMC_HEADER_SIZE;
        let size = (header.transfer_size as usize).min(available).min(wanted);
        output_data.extend_from_slice(&buffer[misc::USBTMC_HEADER_SIZE..misc::USBTMC_HEADER_SIZE + size]);

        if header.end_of_message || header.term_char_matched {
            break;
        }
    }

    Ok(output_data)
}

/// ### Device Dependent Msg Out
///
/// Build a DEV_DEP_MSG_OUT transfer: header, data, then zero padding to a
/// multiple of 4 bytes.
///
pub fn device_dependent_msg_out(btag: u8, data: &[u8], end_of_message: bool) -> Vec<u8> {
    let header = device_dependent_msg_out_header(btag, data.len() as u32, end_of_message);
    let mut transfer = Vec::with_capacity(header.len() + data.len() + 3);
    transfer.extend_from_slice(&header);
    transfer.extend_from_slice(data);
    while transfer.len() % 4 != 0 {
        transfer.push(0x00);
    }
    transfer
}

pub fn device_dependent_msg_out_header(btag: u8, transfer_size: u32, end_of_message: bool) -> [u8; 12] {
    let mut header: [u8; 12] = [0x00; 12];

    header[0] = bulk_msg_id::DEVICE_DEPENDENT_MSG_OUT;
    header[1] = btag;
    header[2] = !btag;
    header[4..8].copy_from_slice(&transfer_size.to_le_bytes());

    if end_of_message {
        header[8] = 0b0000_0001;
    }

    header
}

pub fn request_device_dependent_msg_in_header(btag: u8, transfer_size: u32, term_char: Option<u8>) -> [u8; 12] {
    let mut header: [u8; 12] = [0x00; 12];

    header[0] = bulk_msg_id::REQUEST_DEVICE_DEPENDENT_MSG_IN;
    header[1] = btag;
    header[2] = !btag;
    header[4..8].copy_from_slice(&transfer_size.to_le_bytes());

    if let Some(tc) = term_char {
        header[8] = 0b0000_0010;
        header[9] = tc;
    }

    header
}

/// The fields of a DEV_DEP_MSG_IN header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgInHeader {
    pub transfer_size: u32,
    pub end_of_message: bool,
    pub term_char_matched: bool,
}

/// ### Parse Device Dependent Msg In Header
///
/// Check the header of a BULK IN transfer against the request's bTag.
///
pub fn parse_device_dependent_msg_in_header(buffer: &[u8], btag: u8) -> Result<MsgInHeader> {
    if buffer.len() < misc::USBTMC_HEADER_SIZE {
        return Err(UsbtmcError::ShortHeader.into());
    }
    if buffer[0] != bulk_msg_id::DEVICE_DEPENDENT_MSG_IN || buffer[1] != btag || buffer[2] != !buffer[1] {
        return Err(UsbtmcError::BTagMismatch {
            expected: btag,
            got: buffer[1],
        }
        .into());
    }

    let attributes = buffer[8];
    Ok(MsgInHeader {
        transfer_size: u32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]),
        end_of_message: attributes & 0b0000_0001 != 0,
        term_char_matched: attributes & 0b0000_0010 != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_header_layout() {
        let header = device_dependent_msg_out_header(7, 0x0102_0304, true);
        assert_eq!(header, [1, 7, !7u8, 0, 4, 3, 2, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn out_transfer_is_padded_to_four_bytes() {
        let transfer = device_dependent_msg_out(1, b"*IDN?\n", true);
        assert_eq!(transfer.len(), 20);
        assert_eq!(&transfer[12..18], b"*IDN?\n");
        assert_eq!(&transfer[18..], &[0, 0]);

        let aligned = device_dependent_msg_out(1, b"ABCD", false);
        assert_eq!(aligned.len(), 16);
        assert_eq!(aligned[8], 0);
    }

    #[test]
    fn in_request_header_carries_term_char() {
        let header = request_device_dependent_msg_in_header(3, 64, Some(b'\n'));
        assert_eq!(header[0], 2);
        assert_eq!(header[8], 0b10);
        assert_eq!(header[9], b'\n');

        let header = request_device_dependent_msg_in_header(3, 64, None);
        assert_eq!(header[8], 0);
        assert_eq!(header[9], 0);
    }

    #[test]
    fn in_header_is_checked() {
        let mut buffer = [0u8; 16];
        buffer[0] = 2;
        buffer[1] = 9;
        buffer[2] = !9u8;
        buffer[4] = 4;
        buffer[8] = 0b11;
        let header = parse_device_dependent_msg_in_header(&buffer, 9).unwrap();
        assert_eq!(
            header,
            MsgInHeader {
                transfer_size: 4,
                end_of_message: true,
                term_char_matched: true
            }
        );

        assert!(parse_device_dependent_msg_in_header(&buffer, 10).is_err());
        assert!(parse_device_dependent_msg_in_header(&buffer[..8], 9).is_err());
    }
}
