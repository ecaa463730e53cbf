//! Dantherm ventilation unit service
//!
//! Polls a Dantherm unit over Modbus/TCP, exposes its registers as typed
//! entities and layers an adaptive override engine on top of the unit's
//! own operation modes.
//!
//! # Architecture
//!
//! - **`modbus`**: typed register reads and queued writes over a `RegisterTransport`
//! - **`coordinator`**: poll cycle, entity cache and the backend/frontend write queues
//! - **`device`**: register map, entity table, getters and setters
//! - **`adaptive`**: event stack, triggers, calendar events and the reconciling manager
//! - **`store`**: persisted entity values
//! - **`services`**: validated service calls
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ FrontendQueue│───►│ BackendQueue │───►│ Modbus/TCP   │
//! │ (commands)   │    │ (writes)     │    │ unit         │
//! └──────────────┘    └──────────────┘    └──────────────┘
//!         ▲                                      │
//!         │            ┌──────────────┐          │
//!         └────────────│ Coordinator  │◄─────────┘
//!                      │ + Adaptive   │   poll
//!                      └──────────────┘
//! ```

pub mod adaptive;
pub mod bootstrap;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod modbus;
pub mod retry;
pub mod services;
pub mod store;

pub use config::DanthermConfig;
pub use coordinator::{DanthermCoordinator, EntityData};
pub use device::DanthermDevice;
pub use services::{DanthermServices, SetStateRequest};
