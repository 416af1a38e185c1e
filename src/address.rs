//! Textual S7 addresses and their wire item descriptors
//!
//! An address such as `VW1984` names a memory region (`V` = data block), an
//! element width (`W` = 16-bit word) and a start offset. Parsing is pure and
//! stateless; the resulting [`S7Address`] carries everything needed to build a
//! read/write var request item and to size its buffer.
//!
//! | Text | Region | Width | Start | Count | Bytes |
//! |------|--------|-------|-------|-------|-------|
//! | `VW1984` | DB | word | 1984 | 1 | 2 |
//! | `VB2978.20` | DB | byte | 2978 | 20 | 20 |
//! | `V1604.2` | DB | bit | 12834 | 1 | 1 |
//! | `MD8` | flags | real | 8 | 1 | 4 |
//!
//! # Example
//!
//! ```rust
//! use voltage_s7::address::{Area, S7Address, WordLen};
//!
//! let addr = S7Address::parse("VB2978.20").unwrap();
//! assert_eq!(addr.area, Area::DataBlock);
//! assert_eq!(addr.word_len, WordLen::Byte);
//! assert_eq!(addr.byte_size(), 20);
//! ```

use std::fmt;
use std::str::FromStr;

use bytes::BytesMut;

use crate::constants::DEFAULT_DB_NUMBER;
use crate::error::{S7Error, S7Result};

/// Highest start offset expressible in the 24-bit request address field
const MAX_BIT_ADDRESS: u32 = 0x00FF_FFFF;

// ============================================================================
// Area
// ============================================================================

/// Memory region of an S7 device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Area {
    /// Process inputs (`I` / `E`)
    Inputs,
    /// Process outputs (`Q` / `A`)
    Outputs,
    /// Flag memory (`M` / `F`)
    Flags,
    /// Data block (`V`)
    DataBlock,
    /// Counters (`C` / `Z`)
    Counters,
    /// Timers (`T`)
    Timers,
}

impl Area {
    /// Resolve the region letter (case-insensitive)
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'V' => Some(Self::DataBlock),
            'I' | 'E' => Some(Self::Inputs),
            'Q' | 'A' => Some(Self::Outputs),
            'M' | 'F' => Some(Self::Flags),
            'T' => Some(Self::Timers),
            'C' | 'Z' => Some(Self::Counters),
            _ => None,
        }
    }

    /// Canonical letter used when formatting
    pub fn letter(self) -> char {
        match self {
            Self::DataBlock => 'V',
            Self::Inputs => 'I',
            Self::Outputs => 'Q',
            Self::Flags => 'M',
            Self::Timers => 'T',
            Self::Counters => 'C',
        }
    }

    /// Area code of the request item
    pub fn code(self) -> u8 {
        match self {
            Self::Inputs => 0x81,
            Self::Outputs => 0x82,
            Self::Flags => 0x83,
            Self::DataBlock => 0x84,
            Self::Counters => 0x1C,
            Self::Timers => 0x1D,
        }
    }
}

// ============================================================================
// WordLen
// ============================================================================

/// Element width of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WordLen {
    Bit,
    Byte,
    Word,
    /// 4 byte element; the `D` width letter always selects this
    Real,
    Counter,
    Timer,
}

impl WordLen {
    /// Bytes per element on the wire (a bit travels as one byte)
    pub fn element_size(self) -> usize {
        match self {
            Self::Bit | Self::Byte => 1,
            Self::Word | Self::Counter | Self::Timer => 2,
            Self::Real => 4,
        }
    }

    /// Transport size code of the request item
    pub fn code(self) -> u8 {
        match self {
            Self::Bit => 0x01,
            Self::Byte => 0x02,
            Self::Word => 0x04,
            Self::Real => 0x08,
            Self::Counter => 0x1C,
            Self::Timer => 0x1D,
        }
    }

    fn letter(self) -> Option<char> {
        match self {
            Self::Bit => None,
            Self::Byte => Some('B'),
            Self::Word | Self::Counter | Self::Timer => Some('W'),
            Self::Real => Some('D'),
        }
    }
}

// ============================================================================
// S7Address
// ============================================================================

/// Resolved wire item descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct S7Address {
    pub area: Area,
    pub word_len: WordLen,
    /// Always [`DEFAULT_DB_NUMBER`] for parsed addresses
    pub db_number: u16,
    /// Element offset; a bit offset (`byte * 8 + bit`) for bit addresses
    pub start: u32,
    pub count: u16,
}

impl S7Address {
    /// Parse an address text.
    ///
    /// The first two characters are case-insensitive. Only the byte form takes
    /// an element count suffix (`VB10.4`); the bit form is `<byte>.<bit>`.
    /// Timer and counter regions only accept the word form.
    pub fn parse(text: &str) -> S7Result<Self> {
        if !text.is_ascii() {
            return Err(S7Error::invalid_address(text, "non-ASCII characters"));
        }
        if text.len() < 2 {
            return Err(S7Error::invalid_address(
                text,
                "needs a region letter and an offset",
            ));
        }

        let mut chars = text.chars();
        let region = chars.next().unwrap_or_default();
        let width = chars.next().unwrap_or_default().to_ascii_uppercase();

        let area = Area::from_letter(region)
            .ok_or_else(|| S7Error::invalid_address(text, "unknown region letter"))?;

        let (word_len, start, count) = match width {
            'B' | 'W' | 'D' => {
                let rest = &text[2..];
                let (start_text, count_text) = match rest.split_once('.') {
                    Some((s, c)) => (s, Some(c)),
                    None => (rest, None),
                };
                let start = parse_decimal(text, start_text, "start offset")?;
                let count = match count_text {
                    Some(_) if width != 'B' => {
                        return Err(S7Error::invalid_address(
                            text,
                            "element count is only allowed on byte addresses",
                        ))
                    }
                    Some(c) => {
                        let count = parse_decimal(text, c, "element count")?;
                        u16::try_from(count)
                            .ok()
                            .filter(|c| *c > 0)
                            .ok_or_else(|| {
                                S7Error::invalid_address(text, "element count out of range")
                            })?
                    }
                    None => 1,
                };
                let word_len = match (width, area) {
                    ('W', Area::Timers) => WordLen::Timer,
                    ('W', Area::Counters) => WordLen::Counter,
                    (_, Area::Timers | Area::Counters) => {
                        return Err(S7Error::invalid_address(
                            text,
                            "timers and counters are addressed as words",
                        ))
                    }
                    ('B', _) => WordLen::Byte,
                    ('W', _) => WordLen::Word,
                    _ => WordLen::Real,
                };
                if word_len != WordLen::Timer
                    && word_len != WordLen::Counter
                    && start > MAX_BIT_ADDRESS / 8
                {
                    return Err(S7Error::invalid_address(text, "start offset out of range"));
                }
                (word_len, start, count)
            }
            _ => {
                if matches!(area, Area::Timers | Area::Counters) {
                    return Err(S7Error::invalid_address(
                        text,
                        "timers and counters are addressed as words",
                    ));
                }
                let (byte_text, bit_text) = text[1..]
                    .split_once('.')
                    .ok_or_else(|| S7Error::invalid_address(text, "bit address needs '.bit'"))?;
                let byte = parse_decimal(text, byte_text, "byte offset")?;
                let bit = parse_decimal(text, bit_text, "bit index")?;
                if bit > 7 {
                    return Err(S7Error::invalid_address(text, "bit index must be 0-7"));
                }
                let start = byte
                    .checked_mul(8)
                    .and_then(|b| b.checked_add(bit))
                    .filter(|s| *s <= MAX_BIT_ADDRESS)
                    .ok_or_else(|| S7Error::invalid_address(text, "byte offset out of range"))?;
                (WordLen::Bit, start, 1)
            }
        };

        Ok(Self {
            area,
            word_len,
            db_number: DEFAULT_DB_NUMBER,
            start,
            count,
        })
    }

    /// Bytes per element
    pub fn element_size(&self) -> usize {
        self.word_len.element_size()
    }

    /// Total bytes transferred for this item
    pub fn byte_size(&self) -> usize {
        self.element_size() * self.count as usize
    }

    /// Zero-initialised buffer of exactly [`byte_size`](Self::byte_size) bytes
    pub fn allocate(&self) -> BytesMut {
        BytesMut::zeroed(self.byte_size())
    }

    /// DB number sent on the wire (zero outside the data block region)
    pub fn wire_db_number(&self) -> u16 {
        match self.area {
            Area::DataBlock => self.db_number,
            _ => 0,
        }
    }

    /// 24-bit address field of the request item
    pub fn bit_address(&self) -> u32 {
        match self.word_len {
            WordLen::Bit | WordLen::Counter | WordLen::Timer => self.start,
            _ => self.start * 8,
        }
    }

    /// Byte offset of the first element inside its region
    pub fn byte_offset(&self) -> usize {
        match self.word_len {
            WordLen::Bit => (self.start / 8) as usize,
            WordLen::Counter | WordLen::Timer => self.start as usize * 2,
            _ => self.start as usize,
        }
    }

    /// Sub-range of this item, used to fragment oversized area transfers
    ///
    /// Byte-addressed widths advance by the element size; timers, counters and
    /// bits advance by one per element.
    pub fn window(&self, element_offset: u32, count: u16) -> Self {
        let stride = match self.word_len {
            WordLen::Bit | WordLen::Counter | WordLen::Timer => 1,
            other => other.element_size() as u32,
        };
        Self {
            start: self.start + element_offset * stride,
            count,
            ..*self
        }
    }
}

fn parse_decimal(address: &str, digits: &str, what: &str) -> S7Result<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(S7Error::invalid_address(
            address,
            format!("{} must be a decimal number", what),
        ));
    }
    digits
        .parse()
        .map_err(|_| S7Error::invalid_address(address, format!("{} out of range", what)))
}

/// Whether `text` resolves to a schedulable address
pub fn is_valid_address(text: &str) -> bool {
    S7Address::parse(text).is_ok()
}

impl FromStr for S7Address {
    type Err = S7Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for S7Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let region = self.area.letter();
        match self.word_len.letter() {
            None => write!(f, "{}{}.{}", region, self.start / 8, self.start % 8),
            Some(width) if self.count > 1 => {
                write!(f, "{}{}{}.{}", region, width, self.start, self.count)
            }
            Some(width) => write!(f, "{}{}{}", region, width, self.start),
        }
    }
}
