//! Byte and word ordering for multi-register values
//!
//! Byte order applies inside each 16-bit word, word order to the sequence of
//! words making up a 32/64-bit value. Written together in ABCD notation,
//! where A is the most significant byte.
//!
//! For the 32-bit value `0x12345678`:
//! - `ABCD`: words `[0x1234, 0x5678]`
//! - `CDAB`: words `[0x5678, 0x1234]` (Dantherm units)
//! - `BADC`: words `[0x3412, 0x7856]`
//! - `DCBA`: words `[0x7856, 0x3412]`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ComLinkError;

/// Order of the two bytes inside one register word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// High byte first (Modbus native)
    #[default]
    Big,
    /// Low byte first
    Little,
}

/// Order of the words of a multi-register value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WordOrder {
    /// Most significant word first
    #[default]
    Big,
    /// Least significant word first
    Little,
}

/// Combined byte + word order for one register codec call site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegisterOrder {
    pub byte: ByteOrder,
    pub word: WordOrder,
}

impl RegisterOrder {
    /// ABCD: big-endian bytes, most significant word first
    pub const ABCD: Self = Self::new(ByteOrder::Big, WordOrder::Big);
    /// CDAB: big-endian bytes, least significant word first
    pub const CDAB: Self = Self::new(ByteOrder::Big, WordOrder::Little);
    /// BADC: little-endian bytes, most significant word first
    pub const BADC: Self = Self::new(ByteOrder::Little, WordOrder::Big);
    /// DCBA: little-endian throughout
    pub const DCBA: Self = Self::new(ByteOrder::Little, WordOrder::Little);

    pub const fn new(byte: ByteOrder, word: WordOrder) -> Self {
        Self { byte, word }
    }

    /// ABCD notation
    pub fn as_str(&self) -> &'static str {
        match (self.byte, self.word) {
            (ByteOrder::Big, WordOrder::Big) => "ABCD",
            (ByteOrder::Big, WordOrder::Little) => "CDAB",
            (ByteOrder::Little, WordOrder::Big) => "BADC",
            (ByteOrder::Little, WordOrder::Little) => "DCBA",
        }
    }

    pub fn has_word_swap(&self) -> bool {
        self.word == WordOrder::Little
    }
}

impl Default for RegisterOrder {
    fn default() -> Self {
        Self::CDAB
    }
}

impl FromStr for RegisterOrder {
    type Err = ComLinkError;

    /// Accepts "ABCD", "AB-CD", "cdab", "BE", "LE", "BIG_ENDIAN_SWAP", ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "");
        match normalized.as_str() {
            "ABCD" | "BE" | "BIG_ENDIAN" | "BIGENDIAN" => Ok(Self::ABCD),
            "CDAB" | "BIG_ENDIAN_SWAP" | "BIGENDIANSWAP" => Ok(Self::CDAB),
            "BADC" | "LITTLE_ENDIAN_SWAP" | "LITTLEENDIANSWAP" => Ok(Self::BADC),
            "DCBA" | "LE" | "LITTLE_ENDIAN" | "LITTLEENDIAN" => Ok(Self::DCBA),
            _ => Err(ComLinkError::config(format!("Unknown register order: {}", s))),
        }
    }
}

impl TryFrom<String> for RegisterOrder {
    type Error = ComLinkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RegisterOrder> for String {
    fn from(order: RegisterOrder) -> Self {
        order.as_str().to_string()
    }
}

impl fmt::Display for RegisterOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
