//! Typed register conversions
//!
//! `decode` and `encode` are exact inverses for every `DataClass` as long as
//! the same `RegisterOrder` is used on both sides.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ByteOrder, RegisterOrder, WordOrder};
use crate::error::{ComLinkError, Result};

// ============================================================================
// Data classes and values
// ============================================================================

/// Wire type of a register value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataClass {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    UInt64,
    Float32,
}

impl DataClass {
    /// Number of 16-bit words occupied on the wire
    pub const fn register_count(&self) -> usize {
        match self {
            DataClass::Int8 | DataClass::UInt8 | DataClass::Int16 | DataClass::UInt16 => 1,
            DataClass::Int32 | DataClass::UInt32 | DataClass::Float32 => 2,
            DataClass::UInt64 => 4,
        }
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, DataClass::Float32)
    }

    /// Inclusive integer range, `None` for floats
    pub const fn integer_bounds(&self) -> Option<(i128, i128)> {
        match self {
            DataClass::Int8 => Some((i8::MIN as i128, i8::MAX as i128)),
            DataClass::UInt8 => Some((0, u8::MAX as i128)),
            DataClass::Int16 => Some((i16::MIN as i128, i16::MAX as i128)),
            DataClass::UInt16 => Some((0, u16::MAX as i128)),
            DataClass::Int32 => Some((i32::MIN as i128, i32::MAX as i128)),
            DataClass::UInt32 => Some((0, u32::MAX as i128)),
            DataClass::UInt64 => Some((0, u64::MAX as i128)),
            DataClass::Float32 => None,
        }
    }

    /// Bytes of the value itself, before padding to whole words
    const fn value_width(&self) -> usize {
        match self {
            DataClass::Int8 | DataClass::UInt8 | DataClass::Int16 | DataClass::UInt16 => 2,
            DataClass::Int32 | DataClass::UInt32 | DataClass::Float32 => 4,
            DataClass::UInt64 => 8,
        }
    }
}

impl fmt::Display for DataClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataClass::Int8 => "Int8",
            DataClass::UInt8 => "UInt8",
            DataClass::Int16 => "Int16",
            DataClass::UInt16 => "UInt16",
            DataClass::Int32 => "Int32",
            DataClass::UInt32 => "UInt32",
            DataClass::UInt64 => "UInt64",
            DataClass::Float32 => "Float32",
        };
        write!(f, "{}", name)
    }
}

/// Decoded register value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterValue {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl RegisterValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            RegisterValue::Int(v) => v as f64,
            RegisterValue::UInt(v) => v as f64,
            RegisterValue::Float(v) => v,
        }
    }

    /// Integer view; floats truncate toward zero, non-finite floats give `None`
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            RegisterValue::Int(v) => Some(v),
            RegisterValue::UInt(v) => i64::try_from(v).ok(),
            RegisterValue::Float(v) if v.is_finite() => Some(v.trunc() as i64),
            RegisterValue::Float(_) => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            RegisterValue::Int(v) => u64::try_from(v).ok(),
            RegisterValue::UInt(v) => Some(v),
            RegisterValue::Float(v) if v.is_finite() && v >= 0.0 => Some(v.trunc() as u64),
            RegisterValue::Float(_) => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        match *self {
            RegisterValue::Int(v) => v == 0,
            RegisterValue::UInt(v) => v == 0,
            RegisterValue::Float(v) => v == 0.0,
        }
    }

    /// Exact integer as i128 for range checks
    fn to_integer(self, class: DataClass) -> Result<i128> {
        match self {
            RegisterValue::Int(v) => Ok(v as i128),
            RegisterValue::UInt(v) => Ok(v as i128),
            RegisterValue::Float(v) => {
                if !v.is_finite() {
                    return Err(ComLinkError::encode(format!(
                        "{} cannot be encoded as {}",
                        v, class
                    )));
                }
                let truncated = v.trunc();
                if truncated.abs() > 1.9e19 {
                    return Err(ComLinkError::encode(format!(
                        "{} out of range for {}",
                        v, class
                    )));
                }
                Ok(truncated as i128)
            },
        }
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Int(v) => write!(f, "{}", v),
            RegisterValue::UInt(v) => write!(f, "{}", v),
            RegisterValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for RegisterValue {
    fn from(v: i64) -> Self {
        RegisterValue::Int(v)
    }
}

impl From<i32> for RegisterValue {
    fn from(v: i32) -> Self {
        RegisterValue::Int(v as i64)
    }
}

impl From<u64> for RegisterValue {
    fn from(v: u64) -> Self {
        RegisterValue::UInt(v)
    }
}

impl From<u32> for RegisterValue {
    fn from(v: u32) -> Self {
        RegisterValue::UInt(v as u64)
    }
}

impl From<u16> for RegisterValue {
    fn from(v: u16) -> Self {
        RegisterValue::UInt(v as u64)
    }
}

impl From<f64> for RegisterValue {
    fn from(v: f64) -> Self {
        RegisterValue::Float(v)
    }
}

// ============================================================================
// Word <-> byte helpers
// ============================================================================

/// Flatten register words into big-endian value bytes
pub fn words_to_bytes(words: &[u16], order: RegisterOrder) -> Vec<u8> {
    let mut ordered: Vec<u16> = words.to_vec();
    if order.word == WordOrder::Little {
        ordered.reverse();
    }
    ordered
        .iter()
        .flat_map(|word| match order.byte {
            ByteOrder::Big => word.to_be_bytes(),
            ByteOrder::Little => word.to_le_bytes(),
        })
        .collect()
}

/// Split big-endian value bytes into register words
pub fn bytes_to_words(bytes: &[u8], order: RegisterOrder) -> Vec<u16> {
    let mut words: Vec<u16> = bytes
        .chunks(2)
        .map(|pair| {
            let pair = [pair[0], pair.get(1).copied().unwrap_or(0)];
            match order.byte {
                ByteOrder::Big => u16::from_be_bytes(pair),
                ByteOrder::Little => u16::from_le_bytes(pair),
            }
        })
        .collect();
    if order.word == WordOrder::Little {
        words.reverse();
    }
    words
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| ComLinkError::decode(format!("expected {} bytes, got {}", N, bytes.len())))
}

// ============================================================================
// Decode / encode
// ============================================================================

/// Decode register words into a typed value
pub fn decode(words: &[u16], class: DataClass, order: RegisterOrder) -> Result<RegisterValue> {
    let expected = class.register_count();
    if words.len() != expected {
        return Err(ComLinkError::decode(format!(
            "{} needs {} register(s), got {}",
            class,
            expected,
            words.len()
        )));
    }

    let bytes = words_to_bytes(words, order);
    let value = match class {
        DataClass::Int8 => RegisterValue::Int(bytes[1] as i8 as i64),
        DataClass::UInt8 => RegisterValue::UInt(bytes[1] as u64),
        DataClass::Int16 => RegisterValue::Int(i16::from_be_bytes(fixed(&bytes)?) as i64),
        DataClass::UInt16 => RegisterValue::UInt(u16::from_be_bytes(fixed(&bytes)?) as u64),
        DataClass::Int32 => RegisterValue::Int(i32::from_be_bytes(fixed(&bytes)?) as i64),
        DataClass::UInt32 => RegisterValue::UInt(u32::from_be_bytes(fixed(&bytes)?) as u64),
        DataClass::UInt64 => RegisterValue::UInt(u64::from_be_bytes(fixed(&bytes)?)),
        DataClass::Float32 => RegisterValue::Float(f32::from_be_bytes(fixed(&bytes)?) as f64),
    };
    Ok(value)
}

/// Encode a typed value into register words
///
/// Integer classes reject out-of-range and non-finite values and truncate
/// floats toward zero.
pub fn encode(value: RegisterValue, class: DataClass, order: RegisterOrder) -> Result<Vec<u16>> {
    let bytes: Vec<u8> = match class.integer_bounds() {
        Some((min, max)) => {
            let integer = value.to_integer(class)?;
            if integer < min || integer > max {
                return Err(ComLinkError::encode(format!(
                    "{} out of range for {} ({}..={})",
                    value, class, min, max
                )));
            }
            let width = class.value_width();
            let full = (integer as u128).to_be_bytes();
            let mut bytes = full[16 - width..].to_vec();
            if matches!(class, DataClass::Int8 | DataClass::UInt8) {
                // 8-bit values live in the low byte of their word
                bytes[0] = 0;
            }
            bytes
        },
        None => {
            let v = value.as_f64();
            if v.is_finite() && v.abs() > f32::MAX as f64 {
                return Err(ComLinkError::encode(format!(
                    "{} out of range for {}",
                    v, class
                )));
            }
            (v as f32).to_be_bytes().to_vec()
        },
    };

    Ok(bytes_to_words(&bytes, order))
}

/// Round a float to `precision` decimals; precision 0 yields an integer
///
/// Zero and non-finite values pass through unchanged, negative precision is
/// ignored. Ties round to even.
pub fn apply_precision(value: f64, precision: Option<i32>) -> RegisterValue {
    let Some(precision) = precision else {
        return RegisterValue::Float(value);
    };
    if value == 0.0 || !value.is_finite() || precision < 0 {
        return RegisterValue::Float(value);
    }

    let factor = 10f64.powi(precision);
    let rounded = (value * factor).round_ties_even() / factor;
    if precision == 0 {
        RegisterValue::Int(rounded as i64)
    } else {
        RegisterValue::Float(rounded)
    }
}

/// Multiply a decoded value by `scale`
///
/// Integral scales keep integer values integral.
pub fn apply_scale(value: RegisterValue, scale: f64) -> RegisterValue {
    if scale == 1.0 {
        return value;
    }
    if scale.fract() == 0.0 && scale.abs() <= i64::MAX as f64 {
        let factor = scale as i64;
        match value {
            RegisterValue::Int(v) => {
                if let Some(product) = v.checked_mul(factor) {
                    return RegisterValue::Int(product);
                }
            },
            RegisterValue::UInt(v) => {
                if let Ok(factor) = u64::try_from(factor) {
                    if let Some(product) = v.checked_mul(factor) {
                        return RegisterValue::UInt(product);
                    }
                }
            },
            RegisterValue::Float(_) => {},
        }
    }
    RegisterValue::Float(value.as_f64() * scale)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const CDAB: RegisterOrder = RegisterOrder::CDAB;

    #[test]
    fn test_register_counts() {
        assert_eq!(DataClass::Int8.register_count(), 1);
        assert_eq!(DataClass::UInt16.register_count(), 1);
        assert_eq!(DataClass::Int32.register_count(), 2);
        assert_eq!(DataClass::Float32.register_count(), 2);
        assert_eq!(DataClass::UInt64.register_count(), 4);
    }

    #[test]
    fn test_decode_uint32_word_orders() {
        // 0x12345678
        assert_eq!(
            decode(&[0x5678, 0x1234], DataClass::UInt32, CDAB).unwrap(),
            RegisterValue::UInt(0x1234_5678)
        );
        assert_eq!(
            decode(&[0x1234, 0x5678], DataClass::UInt32, RegisterOrder::ABCD).unwrap(),
            RegisterValue::UInt(0x1234_5678)
        );
        assert_eq!(
            decode(&[0x7856, 0x3412], DataClass::UInt32, RegisterOrder::DCBA).unwrap(),
            RegisterValue::UInt(0x1234_5678)
        );
        assert_eq!(
            decode(&[0x3412, 0x7856], DataClass::UInt32, RegisterOrder::BADC).unwrap(),
            RegisterValue::UInt(0x1234_5678)
        );
    }

    #[test]
    fn test_decode_uint64_low_word_first() {
        let words = [0x0004, 0x0003, 0x0002, 0x0001];
        assert_eq!(
            decode(&words, DataClass::UInt64, CDAB).unwrap(),
            RegisterValue::UInt(0x0001_0002_0003_0004)
        );
    }

    #[test]
    fn test_decode_signed() {
        let words = encode(RegisterValue::Int(-42), DataClass::Int32, CDAB).unwrap();
        assert_eq!(words, vec![0xFFD6, 0xFFFF]);
        assert_eq!(
            decode(&words, DataClass::Int32, CDAB).unwrap(),
            RegisterValue::Int(-42)
        );
        assert_eq!(
            decode(&[0x00FB], DataClass::Int8, CDAB).unwrap(),
            RegisterValue::Int(-5)
        );
        assert_eq!(
            decode(&[0xFF9C], DataClass::Int16, CDAB).unwrap(),
            RegisterValue::Int(-100)
        );
    }

    #[test]
    fn test_decode_float32_with_precision() {
        let words = encode(RegisterValue::Float(21.37), DataClass::Float32, CDAB).unwrap();
        let raw = decode(&words, DataClass::Float32, CDAB).unwrap().as_f64();
        assert_eq!(apply_precision(raw, Some(1)), RegisterValue::Float(21.4));
        assert_eq!(apply_precision(raw, Some(0)), RegisterValue::Int(21));
    }

    #[test]
    fn test_precision_passthrough() {
        assert_eq!(apply_precision(0.0, Some(0)), RegisterValue::Float(0.0));
        assert!(matches!(
            apply_precision(f64::NAN, Some(1)),
            RegisterValue::Float(v) if v.is_nan()
        ));
        assert_eq!(apply_precision(1.23456, None), RegisterValue::Float(1.23456));
        assert_eq!(apply_precision(1.23456, Some(-1)), RegisterValue::Float(1.23456));
    }

    #[test]
    fn test_decode_wrong_length() {
        assert!(matches!(
            decode(&[0x0001], DataClass::UInt32, CDAB),
            Err(ComLinkError::Decode(_))
        ));
        assert!(decode(&[], DataClass::UInt16, CDAB).is_err());
        assert!(decode(&[1, 2, 3], DataClass::UInt64, CDAB).is_err());
    }

    #[test]
    fn test_encode_range_checks() {
        assert!(matches!(
            encode(RegisterValue::Int(-1), DataClass::UInt32, CDAB),
            Err(ComLinkError::Encode(_))
        ));
        assert!(encode(RegisterValue::UInt(0x1_0000_0000), DataClass::UInt32, CDAB).is_err());
        assert!(encode(RegisterValue::Int(128), DataClass::Int8, CDAB).is_err());
        assert!(encode(RegisterValue::Float(f64::INFINITY), DataClass::UInt16, CDAB).is_err());
        assert!(encode(RegisterValue::Float(1e40), DataClass::Float32, CDAB).is_err());
    }

    #[test]
    fn test_encode_truncates_floats_for_integers() {
        assert_eq!(
            encode(RegisterValue::Float(59.9), DataClass::UInt32, CDAB).unwrap(),
            vec![59, 0]
        );
    }

    #[test]
    fn test_encode_uint64_max() {
        let words = encode(RegisterValue::UInt(u64::MAX), DataClass::UInt64, CDAB).unwrap();
        assert_eq!(words, vec![0xFFFF; 4]);
    }

    #[test]
    fn test_scale() {
        assert_eq!(apply_scale(RegisterValue::UInt(7), 2.0), RegisterValue::UInt(14));
        assert_eq!(apply_scale(RegisterValue::UInt(7), 0.5), RegisterValue::Float(3.5));
        assert_eq!(apply_scale(RegisterValue::Int(-3), 1.0), RegisterValue::Int(-3));
    }

    #[test]
    fn test_register_value_views() {
        assert_eq!(RegisterValue::Float(-2.7).as_i64(), Some(-2));
        assert_eq!(RegisterValue::Int(-1).as_u64(), None);
        assert_eq!(RegisterValue::UInt(5).to_string(), "5");
        assert!(RegisterValue::Float(0.0).is_zero());
    }
}
