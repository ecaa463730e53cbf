//! Modbus/TCP client
//!
//! One outstanding request at a time. Any I/O failure drops the socket so
//! the next call reports `NotConnected` until `connect` is called again.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::constants::{FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS};
use super::frame::{encode_frame, MbapHeader};
use super::pdu::ModbusPdu;
use crate::error::{ComLinkError, Result};
use crate::traits::RegisterTransport;

/// TCP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpTransportConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    /// Connect and response timeout
    pub timeout: Duration,
    /// TCP no-delay (Nagle algorithm)
    pub no_delay: bool,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            unit_id: 1,
            timeout: Duration::from_secs(10),
            no_delay: true,
        }
    }
}

impl TcpTransportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ComLinkError::config("Host cannot be empty"));
        }
        if self.port == 0 {
            return Err(ComLinkError::config("Port cannot be zero"));
        }
        if self.timeout.is_zero() {
            return Err(ComLinkError::config("Timeout must be greater than zero"));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Modbus/TCP client
#[derive(Debug)]
pub struct ModbusTcpClient {
    config: TcpTransportConfig,
    stream: Option<TcpStream>,
    transaction_id: u16,
}

impl ModbusTcpClient {
    pub fn new(config: TcpTransportConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stream: None,
            transaction_id: 0,
        })
    }

    pub fn config(&self) -> &TcpTransportConfig {
        &self.config
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    /// Send one request and read the matching response PDU
    async fn transact(&mut self, request: &ModbusPdu) -> Result<ModbusPdu> {
        let tid = self.next_transaction_id();
        let unit_id = self.config.unit_id;
        let io_timeout = self.config.timeout;
        let frame = encode_frame(tid, unit_id, request);

        let result = {
            let stream = self.stream.as_mut().ok_or(ComLinkError::NotConnected)?;
            exchange(stream, &frame, io_timeout).await
        };

        let (header, pdu) = match result {
            Ok(response) => response,
            Err(e) => {
                // Broken or desynchronised link
                if e.needs_reconnect() || matches!(e, ComLinkError::Protocol(_)) {
                    warn!("Dropping connection to {}: {}", self.config.socket_addr(), e);
                    self.stream = None;
                }
                return Err(e);
            },
        };

        if header.transaction_id != tid {
            self.stream = None;
            return Err(ComLinkError::protocol(format!(
                "Transaction ID mismatch: expected {}, got {}",
                tid, header.transaction_id
            )));
        }
        if header.unit_id != unit_id {
            return Err(ComLinkError::protocol(format!(
                "Unit ID mismatch: expected {}, got {}",
                unit_id, header.unit_id
            )));
        }

        Ok(pdu)
    }
}

async fn exchange(
    stream: &mut TcpStream,
    frame: &[u8],
    io_timeout: Duration,
) -> Result<(MbapHeader, ModbusPdu)> {
    match timeout(io_timeout, stream.write_all(frame)).await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => return Err(ComLinkError::io(format!("Failed to send request: {}", e))),
        Err(_) => return Err(ComLinkError::timeout("send timed out")),
    }

    let mut header_buf = [0u8; MbapHeader::SIZE];
    match timeout(io_timeout, stream.read_exact(&mut header_buf)).await {
        Ok(Ok(_)) => {},
        Ok(Err(e)) => return Err(ComLinkError::io(format!("Failed to read response: {}", e))),
        Err(_) => {
            return Err(ComLinkError::timeout(format!(
                "no response within {:?}",
                io_timeout
            )))
        },
    }
    let header = MbapHeader::from_bytes(&header_buf)?;

    let mut pdu_buf = vec![0u8; header.pdu_length()];
    match timeout(io_timeout, stream.read_exact(&mut pdu_buf)).await {
        Ok(Ok(_)) => {},
        Ok(Err(e)) => return Err(ComLinkError::io(format!("Failed to read response: {}", e))),
        Err(_) => return Err(ComLinkError::timeout("truncated response")),
    }

    Ok((header, ModbusPdu::from_slice(&pdu_buf)?))
}

#[async_trait]
impl RegisterTransport for ModbusTcpClient {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addr = self.config.socket_addr();
        debug!("Connecting to Modbus TCP endpoint: {}", addr);

        match timeout(self.config.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if self.config.no_delay {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY: {}", e);
                    }
                }
                self.stream = Some(stream);
                info!("Connected to {}", addr);
                Ok(())
            },
            Ok(Err(e)) => {
                let msg = format!("Failed to connect to {}: {}", addr, e);
                error!("{}", msg);
                Err(ComLinkError::Connection(msg))
            },
            Err(_) => {
                let msg = format!("Connection to {} timed out", addr);
                warn!("{}", msg);
                Err(ComLinkError::Timeout(msg))
            },
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let request = ModbusPdu::read_holding_registers(address, count)?;
        let response = self.transact(&request).await?;
        let words = response.parse_read_registers(count)?;
        debug!("FC{:02X} {}x{} -> {:?}", FC_READ_HOLDING_REGISTERS, address, count, words);
        Ok(words)
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<()> {
        let request = ModbusPdu::write_multiple_registers(address, values)?;
        let response = self.transact(&request).await?;
        response.parse_write_registers(address, values.len() as u16)?;
        debug!("FC{:02X} {} <- {:?}", FC_WRITE_MULTIPLE_REGISTERS, address, values);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                warn!("Error during TCP shutdown: {}", e);
            }
            info!("Disconnected from {}", self.config.socket_addr());
        }
    }

    fn endpoint(&self) -> String {
        self.config.socket_addr()
    }
}
