//! Modbus protocol constants
//!
//! Only the function codes a ventilation unit needs are supported; the size
//! limits still follow the protocol's PDU constraint.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header bytes before the unit id
/// Transaction ID(2) + Protocol ID(2) + Length(2)
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU size
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU) = 254
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

// ============================================================================
// Function codes
// ============================================================================

pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Exception responses set the high bit of the function code
pub const EXCEPTION_FLAG: u8 = 0x80;

pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03
///
/// Response PDU: Function Code(1) + Byte Count(1) + N × 2 ≤ 253
/// N ≤ (253 - 2) / 2 = 125
pub const MODBUS_MAX_READ_REGISTERS: usize = 125;

/// Maximum number of registers for FC16
///
/// Request PDU: Function Code(1) + Address(2) + Quantity(2) + Byte Count(1) + N × 2 ≤ 253
/// N ≤ (253 - 6) / 2 = 123
pub const MODBUS_MAX_WRITE_REGISTERS: usize = 123;

/// Total Modbus TCP frame size (MBAP header + unit id + PDU)
#[inline]
pub const fn mbap_frame_size(pdu_len: usize) -> usize {
    MBAP_HEADER_LEN + 1 + pdu_len
}
