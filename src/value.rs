//! # S7 Wire Types
//!
//! The closed set of value shapes exchanged with S7 devices. Every numeric type
//! is big-endian on the wire; strings are NUL-padded to the item size and read
//! back up to the first NUL.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::address::{S7Address, WordLen};
use crate::error::{S7Error, S7Result};

/// Wire encoding of a variable.
///
/// | Type | Bytes | Encoding |
/// |------|-------|----------|
/// | Bool | 1 | `0x00` / `0x01` |
/// | U8 | 1 | raw |
/// | U16 | 2 | big-endian |
/// | U32 | 4 | big-endian |
/// | Float | 4 | IEEE-754 big-endian |
/// | String | n | NUL-padded, max n-1 chars |
///
/// # Example
///
/// ```rust
/// use voltage_s7::{S7Value, WireType};
///
/// let bytes = WireType::U16.encode(&S7Value::U16(0x1234)).unwrap();
/// assert_eq!(&bytes[..], &[0x12, 0x34]);
/// assert_eq!(WireType::U16.decode(&bytes).unwrap(), S7Value::U16(0x1234));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Bool,
    U8,
    U16,
    U32,
    Float,
    /// Fixed-size text field of the given byte length
    String(usize),
}

impl WireType {
    /// Natural wire type of an address
    ///
    /// Byte arrays are treated as text, a `D` address as a float.
    pub fn for_address(address: &S7Address) -> Self {
        match address.word_len {
            WordLen::Bit => Self::Bool,
            WordLen::Byte if address.count > 1 => Self::String(address.byte_size()),
            WordLen::Byte => Self::U8,
            WordLen::Word | WordLen::Counter | WordLen::Timer => Self::U16,
            WordLen::Real => Self::Float,
        }
    }

    /// Bytes occupied on the wire
    pub fn size(&self) -> usize {
        match self {
            Self::Bool | Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 | Self::Float => 4,
            Self::String(len) => *len,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::U8 => "uint8",
            Self::U16 => "uint16",
            Self::U32 => "uint32",
            Self::Float => "float",
            Self::String(_) => "string",
        }
    }

    /// Decode device bytes into a value
    pub fn decode(&self, data: &[u8]) -> S7Result<S7Value> {
        let need = match self {
            Self::String(_) => 0,
            other => other.size(),
        };
        if data.len() < need {
            return Err(S7Error::invalid_data(format!(
                "{} needs {} bytes, got {}",
                self.type_name(),
                need,
                data.len()
            )));
        }
        let value = match self {
            Self::Bool => S7Value::Bool(data[0] != 0),
            Self::U8 => S7Value::U8(data[0]),
            Self::U16 => S7Value::U16(u16::from_be_bytes([data[0], data[1]])),
            Self::U32 => S7Value::U32(u32::from_be_bytes([data[0], data[1], data[2], data[3]])),
            Self::Float => {
                S7Value::Float(f32::from_be_bytes([data[0], data[1], data[2], data[3]]))
            }
            Self::String(len) => {
                let field = &data[..data.len().min(*len)];
                let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
                S7Value::String(String::from_utf8_lossy(&field[..end]).into_owned())
            }
        };
        Ok(value)
    }

    /// Encode a value into device bytes
    ///
    /// Numeric values are converted to this type when they fit; text must
    /// leave room for the terminating NUL.
    pub fn encode(&self, value: &S7Value) -> S7Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size());
        match self {
            Self::Bool => buf.put_u8(u8::from(value.as_f64() != 0.0)),
            Self::U8 => buf.put_u8(self.integer(value, u8::MAX as u64)? as u8),
            Self::U16 => buf.put_u16(self.integer(value, u16::MAX as u64)? as u16),
            Self::U32 => buf.put_u32(self.integer(value, u32::MAX as u64)? as u32),
            Self::Float => buf.put_f32(value.as_f64() as f32),
            Self::String(len) => {
                let text = match value {
                    S7Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if text.len() >= *len {
                    return Err(S7Error::invalid_data(format!(
                        "string of {} bytes does not fit a {} byte field",
                        text.len(),
                        len
                    )));
                }
                buf.put_slice(text.as_bytes());
                buf.resize(*len, 0);
            }
        }
        Ok(buf.freeze())
    }

    fn integer(&self, value: &S7Value, max: u64) -> S7Result<u64> {
        let raw = match value {
            S7Value::Bool(b) => u64::from(*b),
            S7Value::U8(v) => u64::from(*v),
            S7Value::U16(v) => u64::from(*v),
            S7Value::U32(v) => u64::from(*v),
            S7Value::Float(v) if v.is_finite() && *v >= 0.0 => v.round() as u64,
            S7Value::Float(v) => {
                return Err(S7Error::invalid_data(format!(
                    "{} cannot be stored as {}",
                    v,
                    self.type_name()
                )))
            }
            S7Value::String(s) => s.trim().parse::<u64>().map_err(|_| {
                S7Error::invalid_data(format!("'{}' is not a {}", s, self.type_name()))
            })?,
        };
        if raw > max {
            return Err(S7Error::invalid_data(format!(
                "{} exceeds {} range",
                raw,
                self.type_name()
            )));
        }
        Ok(raw)
    }
}

/// Decoded variable value
#[derive(Debug, Clone, PartialEq)]
pub enum S7Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    Float(f32),
    String(String),
}

impl S7Value {
    /// Numeric view; text parses as a float or yields NaN
    pub fn as_f64(&self) -> f64 {
        match self {
            S7Value::Bool(b) => f64::from(u8::from(*b)),
            S7Value::U8(v) => f64::from(*v),
            S7Value::U16(v) => f64::from(*v),
            S7Value::U32(v) => f64::from(*v),
            S7Value::Float(v) => f64::from(*v),
            S7Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        }
    }

    /// Wire type that carries this value unchanged
    pub fn wire_type(&self) -> WireType {
        match self {
            S7Value::Bool(_) => WireType::Bool,
            S7Value::U8(_) => WireType::U8,
            S7Value::U16(_) => WireType::U16,
            S7Value::U32(_) => WireType::U32,
            S7Value::Float(_) => WireType::Float,
            S7Value::String(s) => WireType::String(s.len() + 1),
        }
    }
}

impl fmt::Display for S7Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            S7Value::Bool(v) => write!(f, "{}", v),
            S7Value::U8(v) => write!(f, "{}", v),
            S7Value::U16(v) => write!(f, "{}", v),
            S7Value::U32(v) => write!(f, "{}", v),
            S7Value::Float(v) => write!(f, "{:.3}", v),
            S7Value::String(v) => write!(f, "'{}'", v),
        }
    }
}

// ============================================================================
// From implementations for ergonomic construction
// ============================================================================

impl From<bool> for S7Value {
    fn from(v: bool) -> Self {
        S7Value::Bool(v)
    }
}

impl From<u8> for S7Value {
    fn from(v: u8) -> Self {
        S7Value::U8(v)
    }
}

impl From<u16> for S7Value {
    fn from(v: u16) -> Self {
        S7Value::U16(v)
    }
}

impl From<u32> for S7Value {
    fn from(v: u32) -> Self {
        S7Value::U32(v)
    }
}

impl From<f32> for S7Value {
    fn from(v: f32) -> Self {
        S7Value::Float(v)
    }
}

impl From<&str> for S7Value {
    fn from(v: &str) -> Self {
        S7Value::String(v.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_encoding_is_big_endian() {
        assert_eq!(
            &WireType::U16.encode(&S7Value::U16(0xABCD)).unwrap()[..],
            &[0xAB, 0xCD]
        );
        assert_eq!(
            &WireType::U32.encode(&S7Value::U32(0x0102_0304)).unwrap()[..],
            &[1, 2, 3, 4]
        );
        assert_eq!(
            &WireType::Float.encode(&S7Value::Float(1.0)).unwrap()[..],
            &[0x3F, 0x80, 0x00, 0x00]
        );
    }

    #[test]
    fn test_decode_values() {
        assert_eq!(WireType::Bool.decode(&[1]).unwrap(), S7Value::Bool(true));
        assert_eq!(WireType::Bool.decode(&[0]).unwrap(), S7Value::Bool(false));
        assert_eq!(WireType::U8.decode(&[200]).unwrap(), S7Value::U8(200));
        assert_eq!(
            WireType::Float.decode(&[0x41, 0x20, 0x00, 0x00]).unwrap(),
            S7Value::Float(10.0)
        );
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(WireType::U32.decode(&[1, 2]).is_err());
        assert!(WireType::Bool.decode(&[]).is_err());
    }

    #[test]
    fn test_string_padding() {
        let ty = WireType::String(8);
        let bytes = ty.encode(&S7Value::from("pump")).unwrap();
        assert_eq!(&bytes[..], b"pump\0\0\0\0");
        assert_eq!(ty.decode(&bytes).unwrap(), S7Value::String("pump".into()));
    }

    #[test]
    fn test_string_must_leave_room_for_nul() {
        let ty = WireType::String(4);
        assert!(ty.encode(&S7Value::from("abcd")).is_err());
        assert!(ty.encode(&S7Value::from("abc")).is_ok());
    }

    #[test]
    fn test_string_without_nul_reads_whole_field() {
        let ty = WireType::String(3);
        assert_eq!(ty.decode(b"xyz").unwrap(), S7Value::String("xyz".into()));
    }

    #[test]
    fn test_integer_conversion_range() {
        assert!(WireType::U8.encode(&S7Value::U16(300)).is_err());
        assert_eq!(&WireType::U8.encode(&S7Value::U16(30)).unwrap()[..], &[30]);
        assert_eq!(
            &WireType::U16.encode(&S7Value::Float(12.6)).unwrap()[..],
            &[0, 13]
        );
        assert!(WireType::U16.encode(&S7Value::Float(-1.0)).is_err());
        assert_eq!(
            &WireType::U16.encode(&S7Value::from("42")).unwrap()[..],
            &[0, 42]
        );
    }

    #[test]
    fn test_for_address() {
        let ty = |text: &str| WireType::for_address(&S7Address::parse(text).unwrap());
        assert_eq!(ty("V10.1"), WireType::Bool);
        assert_eq!(ty("VB4"), WireType::U8);
        assert_eq!(ty("VB4.16"), WireType::String(16));
        assert_eq!(ty("VW4"), WireType::U16);
        assert_eq!(ty("VD4"), WireType::Float);
    }

    #[test]
    fn test_display() {
        assert_eq!(S7Value::Float(1.5).to_string(), "1.500");
        assert_eq!(S7Value::String("on".into()).to_string(), "'on'");
        assert_eq!(S7Value::U16(7).to_string(), "7");
    }
}
