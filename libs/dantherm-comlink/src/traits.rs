//! Register transport abstraction
//!
//! The device layer talks to a `RegisterTransport`; production uses the
//! Modbus/TCP client, tests use the in-memory mock or the TCP simulator.

use async_trait::async_trait;

use crate::error::Result;

/// Holding-register access over a request/response link
#[async_trait]
pub trait RegisterTransport: Send {
    /// Open the link; connecting an open link is a no-op
    async fn connect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// FC03: read `count` consecutive holding registers
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    /// FC16: write consecutive holding registers
    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<()>;

    /// Drop the link; closing a closed link is a no-op
    async fn close(&mut self);

    /// Peer description for logs
    fn endpoint(&self) -> String;
}

#[async_trait]
impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    async fn connect(&mut self) -> Result<()> {
        (**self).connect().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        (**self).read_holding_registers(address, count).await
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<()> {
        (**self).write_registers(address, values).await
    }

    async fn close(&mut self) {
        (**self).close().await
    }

    fn endpoint(&self) -> String {
        (**self).endpoint()
    }
}
