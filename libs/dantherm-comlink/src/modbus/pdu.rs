//! Modbus PDU on a fixed-size stack buffer

use tracing::debug;

use super::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS, MAX_PDU_SIZE,
    MODBUS_MAX_READ_REGISTERS, MODBUS_MAX_WRITE_REGISTERS,
};
use crate::error::{ComLinkError, Result};

#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(ComLinkError::protocol(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();

        if let Some(fc) = pdu.function_code() {
            if pdu.is_exception() {
                debug!(
                    "PDU parsed: FC={:02X} (Exception: {}), code={:02X}",
                    fc,
                    Self::function_code_description(fc),
                    pdu.exception_code().unwrap_or(0)
                );
            }
        }

        Ok(pdu)
    }

    #[inline]
    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ComLinkError::protocol("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<()> {
        let [high, low] = value.to_be_bytes();
        self.push(high)?;
        self.push(low)
    }

    pub fn extend(&mut self, data: &[u8]) -> Result<()> {
        if self.len + data.len() > MAX_PDU_SIZE {
            return Err(ComLinkError::protocol(format!(
                "PDU would exceed max size: {} + {} > {}",
                self.len,
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        (self.len > 0).then(|| self.data[0])
    }

    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        (self.is_exception() && self.len > 1).then(|| self.data[1])
    }

    pub fn function_code_description(fc: u8) -> &'static str {
        match fc & !EXCEPTION_FLAG {
            FC_READ_HOLDING_REGISTERS => "Read Holding Registers",
            FC_WRITE_MULTIPLE_REGISTERS => "Write Multiple Registers",
            0x06 => "Write Single Register",
            0x04 => "Read Input Registers",
            _ => "Unknown Function",
        }
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// FC03 request
    pub fn read_holding_registers(address: u16, count: u16) -> Result<Self> {
        if count == 0 || count as usize > MODBUS_MAX_READ_REGISTERS {
            return Err(ComLinkError::protocol(format!(
                "Invalid register count {} (1..={})",
                count, MODBUS_MAX_READ_REGISTERS
            )));
        }
        Ok(PduBuilder::new()
            .function_code(FC_READ_HOLDING_REGISTERS)?
            .address(address)?
            .quantity(count)?
            .build())
    }

    /// FC16 request
    pub fn write_multiple_registers(address: u16, values: &[u16]) -> Result<Self> {
        if values.is_empty() || values.len() > MODBUS_MAX_WRITE_REGISTERS {
            return Err(ComLinkError::protocol(format!(
                "Invalid register count {} (1..={})",
                values.len(),
                MODBUS_MAX_WRITE_REGISTERS
            )));
        }
        let mut builder = PduBuilder::new()
            .function_code(FC_WRITE_MULTIPLE_REGISTERS)?
            .address(address)?
            .quantity(values.len() as u16)?
            .byte((values.len() * 2) as u8)?;
        for value in values {
            builder = builder.word(*value)?;
        }
        Ok(builder.build())
    }

    // ------------------------------------------------------------------------
    // Responses
    // ------------------------------------------------------------------------

    /// Reject exception and mismatched function code responses
    pub fn expect_function(&self, function: u8) -> Result<()> {
        if let Some(code) = self.exception_code() {
            return Err(ComLinkError::Exception {
                function: self.function_code().unwrap_or(function | EXCEPTION_FLAG),
                code,
            });
        }
        match self.function_code() {
            Some(fc) if fc == function => Ok(()),
            Some(fc) => Err(ComLinkError::protocol(format!(
                "Function code mismatch: expected {:02X}, got {:02X}",
                function, fc
            ))),
            None => Err(ComLinkError::protocol("Empty response PDU")),
        }
    }

    /// Register words of an FC03 response
    pub fn parse_read_registers(&self, expected: u16) -> Result<Vec<u16>> {
        self.expect_function(FC_READ_HOLDING_REGISTERS)?;
        let data = self.as_slice();
        if data.len() < 2 {
            return Err(ComLinkError::protocol("PDU too short"));
        }
        let byte_count = data[1] as usize;
        if byte_count != expected as usize * 2 || data.len() != 2 + byte_count {
            return Err(ComLinkError::protocol(format!(
                "Byte count mismatch: expected {} registers, header says {} bytes, got {}",
                expected,
                byte_count,
                data.len().saturating_sub(2)
            )));
        }
        Ok(data[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Validate an FC16 echo
    pub fn parse_write_registers(&self, address: u16, count: u16) -> Result<()> {
        self.expect_function(FC_WRITE_MULTIPLE_REGISTERS)?;
        let data = self.as_slice();
        if data.len() != 5 {
            return Err(ComLinkError::protocol("Invalid write response length"));
        }
        let echoed_address = u16::from_be_bytes([data[1], data[2]]);
        let echoed_count = u16::from_be_bytes([data[3], data[4]]);
        if echoed_address != address || echoed_count != count {
            return Err(ComLinkError::protocol(format!(
                "Write echo mismatch: {}x{} vs {}x{}",
                echoed_address, echoed_count, address, count
            )));
        }
        Ok(())
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent PDU builder
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> Result<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    #[inline]
    pub fn address(mut self, addr: u16) -> Result<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    #[inline]
    pub fn quantity(mut self, qty: u16) -> Result<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    #[inline]
    pub fn byte(mut self, b: u8) -> Result<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    #[inline]
    pub fn word(mut self, w: u16) -> Result<Self> {
        self.pdu.push_u16(w)?;
        Ok(self)
    }

    #[inline]
    pub fn data(mut self, data: &[u8]) -> Result<Self> {
        self.pdu.extend(data)?;
        Ok(self)
    }

    #[inline]
    pub fn build(self) -> ModbusPdu {
        self.pdu
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_read_request_layout() {
        let pdu = ModbusPdu::read_holding_registers(610, 2).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x02, 0x62, 0x00, 0x02]);
    }

    #[test]
    fn test_write_request_layout() {
        let pdu = ModbusPdu::write_multiple_registers(324, &[3, 0]).unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x10, 0x01, 0x44, 0x00, 0x02, 0x04, 0x00, 0x03, 0x00, 0x00]
        );
    }

    #[test]
    fn test_request_limits() {
        assert!(ModbusPdu::read_holding_registers(0, 0).is_err());
        assert!(ModbusPdu::read_holding_registers(0, 126).is_err());
        assert!(ModbusPdu::write_multiple_registers(0, &[]).is_err());
        assert!(ModbusPdu::write_multiple_registers(0, &[0u16; 124]).is_err());
    }

    #[test]
    fn test_parse_read_response() {
        let pdu = ModbusPdu::from_slice(&[0x03, 0x04, 0x00, 0x05, 0x00, 0x00]).unwrap();
        assert_eq!(pdu.parse_read_registers(2).unwrap(), vec![5, 0]);
        assert!(pdu.parse_read_registers(1).is_err());
    }

    #[test]
    fn test_exception_response() {
        let pdu = ModbusPdu::from_slice(&[0x83, 0x02]).unwrap();
        assert!(pdu.is_exception());
        assert_eq!(pdu.exception_code(), Some(0x02));
        assert_eq!(
            pdu.parse_read_registers(2).unwrap_err(),
            ComLinkError::Exception {
                function: 0x83,
                code: 0x02
            }
        );
    }

    #[test]
    fn test_write_echo() {
        let pdu = ModbusPdu::from_slice(&[0x10, 0x01, 0x44, 0x00, 0x02]).unwrap();
        assert!(pdu.parse_write_registers(324, 2).is_ok());
        assert!(pdu.parse_write_registers(324, 1).is_err());
    }

    #[test]
    fn test_pdu_overflow() {
        let mut pdu = ModbusPdu::new();
        pdu.extend(&[0u8; MAX_PDU_SIZE]).unwrap();
        assert!(pdu.push(0).is_err());
    }
}
