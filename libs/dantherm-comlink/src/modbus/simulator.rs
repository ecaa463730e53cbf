//! In-process Modbus/TCP server for integration tests
//!
//! Serves FC03 and FC16 from a shared holding-register map. Addresses are
//! zero-based protocol addresses, matching what the client sends.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use super::constants::{
    EXCEPTION_FLAG, EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_DATA_VALUE,
    EXCEPTION_ILLEGAL_FUNCTION, FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS,
};
use super::frame::{encode_frame, MbapHeader};
use super::pdu::{ModbusPdu, PduBuilder};
use crate::error::Result;

#[derive(Default)]
struct SimulatorState {
    holding_registers: HashMap<u16, u16>,
    /// Addresses answering with "illegal data address"
    rejected: HashSet<u16>,
    /// (address, values) of every accepted FC16 request
    writes: Vec<(u16, Vec<u16>)>,
}

/// Simple Modbus TCP simulator
#[derive(Clone, Default)]
pub struct ModbusSimulator {
    state: Arc<RwLock<SimulatorState>>,
}

impl ModbusSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_register(&self, address: u16, value: u16) {
        self.state.write().await.holding_registers.insert(address, value);
    }

    /// Store consecutive words starting at `address`
    pub async fn set_registers(&self, address: u16, values: &[u16]) {
        let mut state = self.state.write().await;
        for (offset, value) in values.iter().enumerate() {
            state
                .holding_registers
                .insert(address.wrapping_add(offset as u16), *value);
        }
    }

    pub async fn get_registers(&self, address: u16, count: u16) -> Vec<u16> {
        let state = self.state.read().await;
        (0..count)
            .map(|offset| {
                state
                    .holding_registers
                    .get(&address.wrapping_add(offset))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Answer any request touching `address` with an exception
    pub async fn reject_address(&self, address: u16) {
        self.state.write().await.rejected.insert(address);
    }

    pub async fn writes(&self) -> Vec<(u16, Vec<u16>)> {
        self.state.read().await.writes.clone()
    }

    /// Bind on 127.0.0.1 (port 0 picks a free port) and serve in the background
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let local_addr = listener.local_addr()?;
        info!("Modbus simulator listening on {}", local_addr);

        let sim = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("New connection from {}", addr);
                        let sim = sim.clone();
                        tokio::spawn(async move {
                            if let Err(e) = sim.handle_connection(stream).await {
                                debug!("Connection closed: {}", e);
                            }
                        });
                    },
                    Err(e) => {
                        error!("Accept error: {}", e);
                        break;
                    },
                }
            }
        });

        Ok(local_addr)
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        loop {
            let mut header_buf = [0u8; MbapHeader::SIZE];
            if stream.read_exact(&mut header_buf).await.is_err() {
                return Ok(());
            }
            let header = MbapHeader::from_bytes(&header_buf)?;
            let mut pdu_buf = vec![0u8; header.pdu_length()];
            stream.read_exact(&mut pdu_buf).await?;

            let response = self.handle_request(&pdu_buf).await?;
            let frame = encode_frame(header.transaction_id, header.unit_id, &response);
            stream.write_all(&frame).await?;
        }
    }

    async fn handle_request(&self, request: &[u8]) -> Result<ModbusPdu> {
        if request.len() < 5 {
            return exception(request.first().copied().unwrap_or(0), EXCEPTION_ILLEGAL_DATA_VALUE);
        }
        let function = request[0];
        let address = u16::from_be_bytes([request[1], request[2]]);
        let count = u16::from_be_bytes([request[3], request[4]]);

        let touches_rejected = {
            let state = self.state.read().await;
            (0..count).any(|offset| state.rejected.contains(&address.wrapping_add(offset)))
        };
        if touches_rejected {
            return exception(function, EXCEPTION_ILLEGAL_DATA_ADDRESS);
        }

        match function {
            FC_READ_HOLDING_REGISTERS => {
                let words = self.get_registers(address, count).await;
                let mut builder = PduBuilder::new()
                    .function_code(FC_READ_HOLDING_REGISTERS)?
                    .byte((count * 2) as u8)?;
                for word in words {
                    builder = builder.word(word)?;
                }
                Ok(builder.build())
            },
            FC_WRITE_MULTIPLE_REGISTERS => {
                let values: Vec<u16> = request
                    .get(6..)
                    .unwrap_or_default()
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                if values.len() != count as usize {
                    return exception(function, EXCEPTION_ILLEGAL_DATA_VALUE);
                }
                self.set_registers(address, &values).await;
                self.state.write().await.writes.push((address, values));
                Ok(PduBuilder::new()
                    .function_code(FC_WRITE_MULTIPLE_REGISTERS)?
                    .address(address)?
                    .quantity(count)?
                    .build())
            },
            _ => exception(function, EXCEPTION_ILLEGAL_FUNCTION),
        }
    }
}

fn exception(function: u8, code: u8) -> Result<ModbusPdu> {
    ModbusPdu::from_slice(&[function | EXCEPTION_FLAG, code])
}
