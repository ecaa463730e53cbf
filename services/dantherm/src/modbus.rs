//! Register access for the unit
//!
//! `RegisterLink` owns the transport and the availability bookkeeping.
//! `DanthermModbus` adds typed reads with retry and routes every write
//! through the backend queue.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dantherm_comlink::{
    apply_precision, apply_scale, decode, encode, DataClass, RegisterOrder, RegisterTransport,
    RegisterValue,
};
use errors::{DanthermError, DanthermResult};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::coordinator::backend::{BackendQueue, RegisterWriter, WriteHandle};
use crate::device::map::registers;
use crate::retry::RetryPolicy;

/// Connection-level read failures tolerated before the unit is unavailable
const MAX_READ_ERRORS: u32 = 5;
const VERIFY_ATTEMPTS: u32 = 5;
const VERIFY_PAUSE: Duration = Duration::from_secs(1);
/// Time the transport needs to release its socket after close
const CLOSE_SETTLE: Duration = Duration::from_secs(5);

/// Typed register location
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterSpec {
    pub address: u16,
    pub class: DataClass,
    pub precision: Option<i32>,
    pub scale: f64,
}

impl RegisterSpec {
    pub const fn new(address: u16, class: DataClass) -> Self {
        Self {
            address,
            class,
            precision: None,
            scale: 1.0,
        }
    }

    pub const fn with_precision(mut self, precision: i32) -> Self {
        self.precision = Some(precision);
        self
    }
}

struct LinkState {
    transport: Box<dyn RegisterTransport>,
    closed: bool,
}

/// Transport plus availability tracking
pub struct RegisterLink {
    state: Mutex<LinkState>,
    available: AtomicBool,
    read_errors: AtomicU32,
    endpoint: String,
}

impl RegisterLink {
    pub fn new(transport: Box<dyn RegisterTransport>) -> Self {
        let endpoint = transport.endpoint();
        Self {
            state: Mutex::new(LinkState {
                transport,
                closed: true,
            }),
            available: AtomicBool::new(false),
            read_errors: AtomicU32::new(0),
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn read_errors(&self) -> u32 {
        self.read_errors.load(Ordering::SeqCst)
    }

    /// Raw read; failures are logged and yield `None`
    pub async fn read_words(&self, address: u16, count: u16) -> Option<Vec<u16>> {
        let mut state = self.state.lock().await;
        match state.transport.read_holding_registers(address, count).await {
            Ok(words) => {
                debug!("Read {} word(s) from register {}: {:?}", count, address, words);
                Some(words)
            },
            Err(e) if e.is_exception() => {
                error!("Device rejected read of register {}: {}", address, e);
                None
            },
            Err(e) => {
                let errors = self.read_errors.fetch_add(1, Ordering::SeqCst) + 1;
                error!(
                    "Reading register {} from {} failed ({} error(s)): {}",
                    address, self.endpoint, errors, e
                );
                if errors > MAX_READ_ERRORS {
                    self.set_available(false);
                }
                None
            },
        }
    }
}

#[async_trait]
impl RegisterWriter for RegisterLink {
    async fn write_registers(&self, address: u16, words: &[u16]) -> DanthermResult<()> {
        let mut state = self.state.lock().await;
        match state.transport.write_registers(address, words).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    "Writing register {} on {} failed: {}",
                    address, self.endpoint, e
                );
                self.set_available(false);
                Err(e.into())
            },
        }
    }
}

/// Typed register client for the unit
pub struct DanthermModbus {
    link: Arc<RegisterLink>,
    backend: BackendQueue,
    order: RegisterOrder,
    retry: RetryPolicy,
}

impl DanthermModbus {
    pub fn new(
        transport: Box<dyn RegisterTransport>,
        backend: BackendQueue,
        order: RegisterOrder,
    ) -> Self {
        Self {
            link: Arc::new(RegisterLink::new(transport)),
            backend,
            order,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Writer to hand to the backend consumer task
    pub fn writer(&self) -> Arc<dyn RegisterWriter> {
        self.link.clone()
    }

    pub fn backend(&self) -> &BackendQueue {
        &self.backend
    }

    pub fn available(&self) -> bool {
        self.link.available()
    }

    pub fn read_errors(&self) -> u32 {
        self.link.read_errors()
    }

    pub fn endpoint(&self) -> &str {
        self.link.endpoint()
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Connect and verify the unit answers
    ///
    /// Returns the component register value read during verification.
    pub async fn connect_and_verify(&self) -> DanthermResult<u32> {
        {
            let mut state = self.link.state.lock().await;
            if let Err(e) = state.transport.connect().await {
                return Err(DanthermError::ConnectionFailed {
                    endpoint: self.link.endpoint.clone(),
                    reason: e.to_string(),
                });
            }
            state.closed = false;
        }
        info!("Connected to {}", self.link.endpoint);

        for attempt in 1..=VERIFY_ATTEMPTS {
            let value = self
                .link
                .read_words(registers::SYSTEM_ID_COMPONENTS, 2)
                .await
                .and_then(|words| self.decode_words(&words, DataClass::UInt32))
                .and_then(|value| value.as_u64());
            if let Some(value) = value {
                self.link.read_errors.store(0, Ordering::SeqCst);
                self.link.set_available(true);
                return Ok(value as u32);
            }
            warn!(
                "Verification read {}/{} on {} failed",
                attempt, VERIFY_ATTEMPTS, self.link.endpoint
            );
            if attempt < VERIFY_ATTEMPTS {
                tokio::time::sleep(VERIFY_PAUSE).await;
            }
        }

        self.close_transport().await;
        Err(DanthermError::ConnectionFailed {
            endpoint: self.link.endpoint.clone(),
            reason: "unit did not answer the verification read".to_string(),
        })
    }

    /// Reconnect if the link dropped
    pub async fn ensure_connected(&self) -> bool {
        let mut state = self.link.state.lock().await;
        if !state.closed && state.transport.is_connected() {
            self.link.set_available(true);
            return true;
        }
        match state.transport.connect().await {
            Ok(()) => {
                state.closed = false;
                self.link.set_available(true);
                info!("Reconnected to {}", self.link.endpoint);
                true
            },
            Err(e) => {
                warn!("Reconnecting to {} failed: {}", self.link.endpoint, e);
                false
            },
        }
    }

    /// Close the link and wait for the socket to settle
    pub async fn disconnect_and_close(&self) {
        if !self.close_transport().await {
            info!("{} is already closed", self.link.endpoint);
            return;
        }
        tokio::time::sleep(CLOSE_SETTLE).await;
    }

    async fn close_transport(&self) -> bool {
        let mut state = self.link.state.lock().await;
        if state.closed {
            return false;
        }
        self.link.set_available(false);
        self.link.read_errors.store(0, Ordering::SeqCst);
        state.transport.close().await;
        state.closed = true;
        info!("Closed connection to {}", self.link.endpoint);
        true
    }

    // ========================================================================
    // Reads
    // ========================================================================

    fn decode_words(&self, words: &[u16], class: DataClass) -> Option<RegisterValue> {
        match decode(words, class, self.order) {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Decoding {:?} as {} failed: {}", words, class, e);
                None
            },
        }
    }

    async fn read_class(&self, address: u16, class: DataClass) -> Option<RegisterValue> {
        let count = class.register_count() as u16;
        if count == 1 {
            let words = self.link.read_words(address, count).await?;
            return self.decode_words(&words, class);
        }
        self.retry
            .retry(|| async move {
                let words = self.link.read_words(address, count).await?;
                self.decode_words(&words, class)
            })
            .await
    }

    /// Typed read with precision and scale applied
    pub async fn read_register(&self, spec: RegisterSpec) -> Option<RegisterValue> {
        let value = self.read_class(spec.address, spec.class).await?;
        let value = match (spec.class, spec.precision) {
            (DataClass::Float32, Some(_)) => apply_precision(value.as_f64(), spec.precision),
            _ => value,
        };
        Some(apply_scale(value, spec.scale))
    }

    /// Unsigned read sized by word count (1, 2 or 4)
    pub async fn read_holding_registers(
        &self,
        address: u16,
        count: u16,
        precision: Option<i32>,
        scale: f64,
    ) -> Option<RegisterValue> {
        let class = match count {
            1 => DataClass::UInt16,
            2 => DataClass::UInt32,
            4 => DataClass::UInt64,
            other => {
                error!("Unsupported register count {} at {}", other, address);
                return None;
            },
        };
        self.read_register(RegisterSpec {
            address,
            class,
            precision,
            scale,
        })
        .await
    }

    /// 16-bit value stored in the low half of a 32-bit register pair
    pub async fn read_uint16(&self, address: u16) -> Option<u32> {
        self.read_uint32(address).await.map(|v| v & 0xFFFF)
    }

    pub async fn read_int32(&self, address: u16) -> Option<i32> {
        self.read_class(address, DataClass::Int32)
            .await
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
    }

    pub async fn read_uint32(&self, address: u16) -> Option<u32> {
        self.read_class(address, DataClass::UInt32)
            .await
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
    }

    pub async fn read_uint64(&self, address: u16) -> Option<u64> {
        self.read_class(address, DataClass::UInt64)
            .await
            .and_then(|v| v.as_u64())
    }

    pub async fn read_float32(
        &self,
        address: u16,
        precision: Option<i32>,
    ) -> Option<RegisterValue> {
        self.read_register(RegisterSpec {
            address,
            class: DataClass::Float32,
            precision,
            scale: 1.0,
        })
        .await
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Encode and queue a write; encoding errors are returned at once
    pub fn write_register(
        &self,
        address: u16,
        value: RegisterValue,
        class: DataClass,
    ) -> DanthermResult<WriteHandle> {
        let words = encode(value, class, self.order)?;
        debug!("Queueing {} = {} ({})", address, value, class);
        Ok(self.backend.enqueue(address, words))
    }

    pub fn write_uint32(&self, address: u16, value: u32) -> DanthermResult<WriteHandle> {
        self.write_register(address, RegisterValue::from(value), DataClass::UInt32)
    }

    pub fn write_float32(&self, address: u16, value: f64) -> DanthermResult<WriteHandle> {
        self.write_register(address, RegisterValue::Float(value), DataClass::Float32)
    }
}
