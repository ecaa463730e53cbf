//! Dantherm Communication Link Library
//!
//! Register-level access to Dantherm ventilation units.
//!
//! # Architecture
//!
//! This library provides:
//! - **Bytes Utilities**: Word order handling and typed register conversions
//! - **Modbus**: MBAP framing, FC03/FC16 PDUs and a Modbus/TCP client
//! - **Transport Trait**: `RegisterTransport`, implemented by the TCP client and the mock
//! - **Test Doubles**: In-memory mock transport and an in-process TCP simulator

pub mod bytes;
pub mod error;
pub mod mock;
pub mod modbus;
pub mod traits;

// Re-export core types
pub use bytes::{
    apply_precision, apply_scale, decode, encode, ByteOrder, DataClass, RegisterOrder,
    RegisterValue, WordOrder,
};
pub use error::{ComLinkError, Result};
pub use mock::MockRegisterTransport;
pub use modbus::{ModbusSimulator, ModbusTcpClient, TcpTransportConfig};
pub use traits::RegisterTransport;
