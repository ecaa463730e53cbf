//! MBAP framing for Modbus/TCP

use bytes::{BufMut, BytesMut};

use super::constants::{MAX_MBAP_LENGTH, MBAP_HEADER_LEN};
use super::pdu::ModbusPdu;
use crate::error::{ComLinkError, Result};

/// MBAP header: transaction id, protocol id (always 0), length, unit id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Byte count of unit id + PDU
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Header bytes including the unit id
    pub const SIZE: usize = MBAP_HEADER_LEN + 1;

    pub fn new(transaction_id: u16, unit_id: u8, pdu_length: u16) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: pdu_length + 1,
            unit_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let [t0, t1] = self.transaction_id.to_be_bytes();
        let [p0, p1] = self.protocol_id.to_be_bytes();
        let [l0, l1] = self.length.to_be_bytes();
        [t0, t1, p0, p1, l0, l1, self.unit_id]
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(ComLinkError::protocol("Invalid MBAP header length"));
        }

        let transaction_id = u16::from_be_bytes([data[0], data[1]]);
        let protocol_id = u16::from_be_bytes([data[2], data[3]]);
        let length = u16::from_be_bytes([data[4], data[5]]);
        let unit_id = data[6];

        if protocol_id != 0 {
            return Err(ComLinkError::protocol(format!(
                "Invalid protocol ID: {}",
                protocol_id
            )));
        }
        if length < 2 || length as usize > MAX_MBAP_LENGTH {
            return Err(ComLinkError::protocol(format!(
                "Invalid MBAP length: {}",
                length
            )));
        }

        Ok(Self {
            transaction_id,
            protocol_id,
            length,
            unit_id,
        })
    }

    /// PDU byte count following the header
    pub fn pdu_length(&self) -> usize {
        self.length as usize - 1
    }
}

/// Build a complete request frame
pub fn encode_frame(transaction_id: u16, unit_id: u8, pdu: &ModbusPdu) -> BytesMut {
    let header = MbapHeader::new(transaction_id, unit_id, pdu.len() as u16);
    let mut frame = BytesMut::with_capacity(MbapHeader::SIZE + pdu.len());
    frame.put_slice(&header.to_bytes());
    frame.put_slice(pdu.as_slice());
    frame
}
