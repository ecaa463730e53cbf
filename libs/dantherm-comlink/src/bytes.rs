//! Register word codec
//!
//! Converts between flat arrays of 16-bit register words and typed values,
//! honouring a per-call-site byte/word order.

pub mod byte_order;
pub mod conversions;

pub use byte_order::{ByteOrder, RegisterOrder, WordOrder};
pub use conversions::*;
