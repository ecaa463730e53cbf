//! Mock register transport for testing
//!
//! Provides a controllable register map without real network connections.
//! Clones share state, so a test keeps one handle for inspection and hands
//! another to the code under test.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ComLinkError, Result};
use crate::modbus::constants::{
    EXCEPTION_ILLEGAL_DATA_ADDRESS, FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS,
};
use crate::traits::RegisterTransport;

#[derive(Debug, Default)]
struct MockState {
    registers: HashMap<u16, u16>,
    connected: bool,
    connect_count: usize,
    read_count: usize,
    /// Remaining connect attempts to fail
    connect_failures: usize,
    /// Remaining reads to fail with an I/O error
    read_failures: usize,
    /// Remaining writes to fail with an I/O error
    write_failures: usize,
    /// Addresses answering with an exception
    rejected: HashSet<u16>,
    writes: Vec<(u16, Vec<u16>)>,
}

/// In-memory `RegisterTransport`
#[derive(Debug, Clone, Default)]
pub struct MockRegisterTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockRegisterTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.state.lock().registers.insert(address, value);
    }

    pub fn set_registers(&self, address: u16, values: &[u16]) {
        let mut state = self.state.lock();
        for (offset, value) in values.iter().enumerate() {
            state.registers.insert(address.wrapping_add(offset as u16), *value);
        }
    }

    pub fn get_registers(&self, address: u16, count: u16) -> Vec<u16> {
        let state = self.state.lock();
        (0..count)
            .map(|offset| {
                state
                    .registers
                    .get(&address.wrapping_add(offset))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().connect_failures = count;
    }

    pub fn fail_next_reads(&self, count: usize) {
        self.state.lock().read_failures = count;
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().write_failures = count;
    }

    pub fn reject_address(&self, address: u16) {
        self.state.lock().rejected.insert(address);
    }

    /// Simulate the peer dropping the link
    pub fn simulate_disconnect(&self) {
        self.state.lock().connected = false;
    }

    pub fn writes(&self) -> Vec<(u16, Vec<u16>)> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connect_count
    }

    pub fn read_count(&self) -> usize {
        self.state.lock().read_count
    }

    fn touches_rejected(state: &MockState, address: u16, count: u16) -> bool {
        (0..count).any(|offset| state.rejected.contains(&address.wrapping_add(offset)))
    }
}

#[async_trait]
impl RegisterTransport for MockRegisterTransport {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.connect_count += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            warn!("[MockTransport] Connection failed - simulated failure");
            return Err(ComLinkError::connection("Mock connection failed"));
        }
        state.connected = true;
        debug!("[MockTransport] Connection successful");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let words = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(ComLinkError::NotConnected);
            }
            state.read_count += 1;
            if state.read_failures > 0 {
                state.read_failures -= 1;
                state.connected = false;
                return Err(ComLinkError::io("Mock read failed"));
            }
            if Self::touches_rejected(&state, address, count) {
                return Err(ComLinkError::Exception {
                    function: FC_READ_HOLDING_REGISTERS,
                    code: EXCEPTION_ILLEGAL_DATA_ADDRESS,
                });
            }
            (0..count)
                .map(|offset| {
                    state
                        .registers
                        .get(&address.wrapping_add(offset))
                        .copied()
                        .unwrap_or(0)
                })
                .collect::<Vec<u16>>()
        };
        Ok(words)
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(ComLinkError::NotConnected);
        }
        if state.write_failures > 0 {
            state.write_failures -= 1;
            state.connected = false;
            return Err(ComLinkError::io("Mock write failed"));
        }
        if Self::touches_rejected(&state, address, values.len() as u16) {
            return Err(ComLinkError::Exception {
                function: FC_WRITE_MULTIPLE_REGISTERS,
                code: EXCEPTION_ILLEGAL_DATA_ADDRESS,
            });
        }
        for (offset, value) in values.iter().enumerate() {
            state.registers.insert(address.wrapping_add(offset as u16), *value);
        }
        state.writes.push((address, values.to_vec()));
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().connected = false;
    }

    fn endpoint(&self) -> String {
        "mock".to_string()
    }
}
