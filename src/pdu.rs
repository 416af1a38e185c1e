//! S7 PDU data structure
//!
//! Fixed-size stack array sized for the largest negotiable PDU, so building a
//! job telegram never touches the heap. The builder patches the parameter and
//! data lengths into the header on [`PduBuilder::build`].

use tracing::debug;

use crate::address::{S7Address, WordLen};
use crate::constants::{
    FN_READ_VAR, FN_SETUP_COMM, FN_WRITE_VAR, MAX_PDU_SIZE, ROSCTR_ACK_DATA, ROSCTR_JOB,
    S7_ACK_HEADER_LEN, S7_HEADER_LEN, S7_PROTOCOL_ID, SYNTAX_ID_ANY, TS_BIT, TS_BYTE, TS_INT,
    TS_OCTET, TS_REAL, VAR_SPEC, VAR_SPEC_LEN,
};
use crate::error::{S7Error, S7Result};

/// S7 PDU with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct S7Pdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl S7Pdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Parse a received PDU, validating the header and declared lengths
    pub fn from_slice(data: &[u8]) -> S7Result<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(S7Error::protocol(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        if data.len() < S7_HEADER_LEN || data[0] != S7_PROTOCOL_ID {
            return Err(S7Error::protocol("Not an S7 PDU"));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();

        let declared = pdu.header_len() + pdu.param_len() + pdu.data_len();
        if declared > pdu.len {
            return Err(S7Error::protocol(format!(
                "PDU truncated: header declares {} bytes, got {}",
                declared, pdu.len
            )));
        }

        debug!(
            "PDU parsed: ROSCTR={:02X}, ref={}, params={}, data={}",
            pdu.rosctr(),
            pdu.pdu_ref(),
            pdu.param_len(),
            pdu.data_len()
        );
        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> S7Result<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(S7Error::protocol("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> S7Result<()> {
        self.extend(&value.to_be_bytes())
    }

    /// Extend with a byte slice
    #[inline]
    pub fn extend(&mut self, data: &[u8]) -> S7Result<()> {
        if self.len + data.len() > MAX_PDU_SIZE {
            return Err(S7Error::protocol(format!(
                "PDU would exceed max size: {} + {} > {}",
                self.len,
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.data[offset], self.data[offset + 1]])
    }

    /// Message type (job, ack-data, ...)
    #[inline]
    pub fn rosctr(&self) -> u8 {
        self.data[1]
    }

    #[inline]
    pub fn pdu_ref(&self) -> u16 {
        self.u16_at(4)
    }

    #[inline]
    pub fn param_len(&self) -> usize {
        self.u16_at(6) as usize
    }

    #[inline]
    pub fn data_len(&self) -> usize {
        self.u16_at(8) as usize
    }

    /// Header length: ack-data carries an extra error class/code pair
    #[inline]
    pub fn header_len(&self) -> usize {
        if self.rosctr() == ROSCTR_ACK_DATA {
            S7_ACK_HEADER_LEN
        } else {
            S7_HEADER_LEN
        }
    }

    /// Error class and code of an ack-data header, `None` when both are zero
    pub fn error(&self) -> Option<(u8, u8)> {
        if self.rosctr() != ROSCTR_ACK_DATA {
            return None;
        }
        match (self.data[10], self.data[11]) {
            (0, 0) => None,
            pair => Some(pair),
        }
    }

    /// Parameter block
    pub fn params(&self) -> &[u8] {
        let start = self.header_len();
        &self.data[start..start + self.param_len()]
    }

    /// Data block
    pub fn payload(&self) -> &[u8] {
        let start = self.header_len() + self.param_len();
        &self.data[start..start + self.data_len()]
    }

    /// Function code (first parameter byte)
    pub fn function(&self) -> Option<u8> {
        self.params().first().copied()
    }

    /// Human-readable function description
    pub fn function_description(function: u8) -> &'static str {
        match function {
            FN_SETUP_COMM => "Setup Communication",
            FN_READ_VAR => "Read Var",
            FN_WRITE_VAR => "Write Var",
            _ => "Unknown Function",
        }
    }
}

impl Default for S7Pdu {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport size and length field of a write data header
///
/// Byte-class sizes count bits; bit, real and octet sizes count bytes.
pub fn data_header(word_len: WordLen, byte_len: usize) -> (u8, u16) {
    let transport_size = match word_len {
        WordLen::Bit => TS_BIT,
        WordLen::Real => TS_REAL,
        WordLen::Counter | WordLen::Timer => TS_OCTET,
        WordLen::Byte | WordLen::Word => TS_BYTE,
    };
    (transport_size, data_length_field(transport_size, byte_len))
}

/// Encode a byte count the way the given transport size expects
pub fn data_length_field(transport_size: u8, byte_len: usize) -> u16 {
    match transport_size {
        TS_BYTE | TS_INT => (byte_len * 8) as u16,
        _ => byte_len as u16,
    }
}

/// Decode a data header length field into a byte count
pub fn data_length_bytes(transport_size: u8, field: u16) -> usize {
    match transport_size {
        TS_BYTE | TS_INT => (field as usize).div_ceil(8),
        _ => field as usize,
    }
}

/// PDU builder - fluent API
///
/// Parameters must be appended before data.
pub struct PduBuilder {
    pdu: S7Pdu,
    param_len: usize,
    data_len: usize,
}

impl PduBuilder {
    /// Start a job PDU with the given reference
    pub fn job(pdu_ref: u16) -> Self {
        let mut pdu = S7Pdu::new();
        pdu.data[0] = S7_PROTOCOL_ID;
        pdu.data[1] = ROSCTR_JOB;
        pdu.data[4..6].copy_from_slice(&pdu_ref.to_be_bytes());
        pdu.len = S7_HEADER_LEN;
        Self {
            pdu,
            param_len: 0,
            data_len: 0,
        }
    }

    /// Add a parameter byte
    #[inline]
    pub fn param(mut self, b: u8) -> S7Result<Self> {
        if self.data_len > 0 {
            return Err(S7Error::protocol("parameters must precede data"));
        }
        self.pdu.push(b)?;
        self.param_len += 1;
        Ok(self)
    }

    /// Add a big-endian parameter word
    #[inline]
    pub fn param_u16(self, value: u16) -> S7Result<Self> {
        let [hi, lo] = value.to_be_bytes();
        self.param(hi)?.param(lo)
    }

    /// Add one read/write var request item
    pub fn item(self, address: &S7Address) -> S7Result<Self> {
        let [_, a2, a1, a0] = address.bit_address().to_be_bytes();
        self.param(VAR_SPEC)?
            .param(VAR_SPEC_LEN)?
            .param(SYNTAX_ID_ANY)?
            .param(address.word_len.code())?
            .param_u16(address.count)?
            .param_u16(address.wire_db_number())?
            .param(address.area.code())?
            .param(a2)?
            .param(a1)?
            .param(a0)
    }

    /// Add data bytes
    #[inline]
    pub fn data(mut self, data: &[u8]) -> S7Result<Self> {
        self.pdu.extend(data)?;
        self.data_len += data.len();
        Ok(self)
    }

    /// Finish the PDU, patching the length fields
    pub fn build(mut self) -> S7Pdu {
        self.pdu.data[6..8].copy_from_slice(&(self.param_len as u16).to_be_bytes());
        self.pdu.data[8..10].copy_from_slice(&(self.data_len as u16).to_be_bytes());
        if let Some(function) = self.pdu.function() {
            debug!(
                "PDU built: {} ({:02X}), params={}, data={}, total_len={}",
                S7Pdu::function_description(function),
                function,
                self.param_len,
                self.data_len,
                self.pdu.len()
            );
        }
        self.pdu
    }

    /// Setup communication job requesting `pdu_size`
    pub fn build_setup_communication(pdu_ref: u16, pdu_size: u16) -> S7Result<S7Pdu> {
        Ok(PduBuilder::job(pdu_ref)
            .param(FN_SETUP_COMM)?
            .param(0x00)?
            .param_u16(1)?
            .param_u16(1)?
            .param_u16(pdu_size)?
            .build())
    }

    /// Read var job for the given items
    pub fn build_read_var(pdu_ref: u16, items: &[S7Address]) -> S7Result<S7Pdu> {
        let mut builder = PduBuilder::job(pdu_ref)
            .param(FN_READ_VAR)?
            .param(items.len() as u8)?;
        for address in items {
            builder = builder.item(address)?;
        }
        Ok(builder.build())
    }

    /// Write var job; every item except the last is padded to an even length
    pub fn build_write_var(pdu_ref: u16, items: &[(S7Address, &[u8])]) -> S7Result<S7Pdu> {
        let mut builder = PduBuilder::job(pdu_ref)
            .param(FN_WRITE_VAR)?
            .param(items.len() as u8)?;
        for (address, _) in items {
            builder = builder.item(address)?;
        }
        for (index, (address, payload)) in items.iter().enumerate() {
            let (transport_size, length) = data_header(address.word_len, payload.len());
            let [hi, lo] = length.to_be_bytes();
            builder = builder.data(&[0x00, transport_size, hi, lo])?.data(payload)?;
            if payload.len() % 2 == 1 && index + 1 < items.len() {
                builder = builder.data(&[0x00])?;
            }
        }
        Ok(builder.build())
    }
}
