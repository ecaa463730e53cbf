//! Modbus/TCP protocol pieces

pub mod constants;
pub mod frame;
pub mod pdu;
pub mod simulator;
pub mod tcp;

pub use frame::MbapHeader;
pub use pdu::{ModbusPdu, PduBuilder};
pub use simulator::ModbusSimulator;
pub use tcp::{ModbusTcpClient, TcpTransportConfig};
