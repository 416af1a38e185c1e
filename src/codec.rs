//! # S7 Codec
//!
//! ISO-on-TCP framing (TPKT + COTP) around [`S7Pdu`] and decoding of the
//! acknowledgements to setup, read var and write var jobs.
//!
//! ## Frame Layout
//!
//! | Layer | Bytes | Content |
//! |-------|-------|---------|
//! | TPKT | 4 | version 3, reserved, total length |
//! | COTP DT | 3 | length 2, type 0xF0, EOT 0x80 |
//! | S7 | n | header, parameters, data |

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::constants::{
    COTP_CONNECT_CONFIRM, COTP_CONNECT_REQUEST, COTP_DATA, COTP_DT_HEADER_LEN, COTP_EOT,
    FN_READ_VAR, FN_SETUP_COMM, FN_WRITE_VAR, RC_SUCCESS, RC_TYPE_INCONSISTENT,
    ROSCTR_ACK_DATA, TPKT_HEADER_LEN, TPKT_VERSION,
};
use crate::error::{S7Error, S7Result};
use crate::item::{ItemStatus, WireItem};
use crate::pdu::{data_length_bytes, S7Pdu};

/// TPDU size code requested in the connection request (1024 bytes)
const COTP_TPDU_SIZE_1024: u8 = 0x0A;

/// S7 codec for framing and response decoding.
pub struct S7Codec;

impl S7Codec {
    // ========================================================================
    // Framing
    // ========================================================================

    /// COTP connection request carrying the TSAP pair
    pub fn connection_request(local_tsap: u16, remote_tsap: u16) -> Bytes {
        let [lh, ll] = local_tsap.to_be_bytes();
        let [rh, rl] = remote_tsap.to_be_bytes();
        let cotp = [
            17, // length after this byte
            COTP_CONNECT_REQUEST,
            0x00,
            0x00, // destination reference
            0x00,
            0x01, // source reference
            0x00, // class 0
            0xC0,
            1,
            COTP_TPDU_SIZE_1024,
            0xC1,
            2,
            lh,
            ll,
            0xC2,
            2,
            rh,
            rl,
        ];
        Self::tpkt(&[&cotp])
    }

    /// Validate a COTP connection confirm frame
    pub fn parse_connection_confirm(frame: &[u8]) -> S7Result<()> {
        Self::tpkt_length(frame)?;
        match frame.get(TPKT_HEADER_LEN + 1) {
            Some(&COTP_CONNECT_CONFIRM) => Ok(()),
            Some(other) => Err(S7Error::connection(format!(
                "COTP connection refused (PDU type {:02X})",
                other
            ))),
            None => Err(S7Error::protocol("Connection confirm too short")),
        }
    }

    /// Wrap an S7 PDU into a TPKT + COTP DT frame
    pub fn encode_frame(pdu: &S7Pdu) -> Bytes {
        Self::tpkt(&[&[2, COTP_DATA, COTP_EOT], pdu.as_slice()])
    }

    /// Strip TPKT + COTP DT and parse the S7 PDU
    pub fn decode_frame(frame: &[u8]) -> S7Result<S7Pdu> {
        let total = Self::tpkt_length(frame)?;
        if total > frame.len() {
            return Err(S7Error::protocol(format!(
                "Frame truncated: TPKT declares {} bytes, got {}",
                total,
                frame.len()
            )));
        }
        let cotp = &frame[TPKT_HEADER_LEN..total];
        if cotp.len() < COTP_DT_HEADER_LEN || cotp[1] != COTP_DATA {
            return Err(S7Error::protocol("Expected COTP data transfer"));
        }
        let header_len = cotp[0] as usize + 1;
        if header_len > cotp.len() {
            return Err(S7Error::protocol("COTP header exceeds frame"));
        }
        S7Pdu::from_slice(&cotp[header_len..])
    }

    /// Total frame length declared by a TPKT header
    pub fn tpkt_length(header: &[u8]) -> S7Result<usize> {
        if header.len() < TPKT_HEADER_LEN {
            return Err(S7Error::protocol("TPKT header too short"));
        }
        if header[0] != TPKT_VERSION {
            return Err(S7Error::protocol(format!(
                "Unsupported TPKT version {}",
                header[0]
            )));
        }
        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        if len < TPKT_HEADER_LEN + 2 {
            return Err(S7Error::protocol(format!("TPKT length {} too small", len)));
        }
        Ok(len)
    }

    fn tpkt(parts: &[&[u8]]) -> Bytes {
        let body: usize = parts.iter().map(|p| p.len()).sum();
        let mut frame = BytesMut::with_capacity(TPKT_HEADER_LEN + body);
        frame.put_u8(TPKT_VERSION);
        frame.put_u8(0);
        frame.put_u16((TPKT_HEADER_LEN + body) as u16);
        for part in parts {
            frame.put_slice(part);
        }
        frame.freeze()
    }

    // ========================================================================
    // Acknowledgements
    // ========================================================================

    /// PDU size granted by the device
    pub fn parse_setup_response(pdu: &S7Pdu) -> S7Result<u16> {
        Self::check_ack(pdu, FN_SETUP_COMM)?;
        let params = pdu.params();
        if params.len() < 8 {
            return Err(S7Error::protocol("Setup communication ack too short"));
        }
        let granted = u16::from_be_bytes([params[6], params[7]]);
        debug!("Negotiated PDU size: {}", granted);
        Ok(granted)
    }

    /// Copy read var results into `items`, setting each item's status
    pub fn parse_read_response(pdu: &S7Pdu, items: &mut [WireItem]) -> S7Result<()> {
        Self::check_ack(pdu, FN_READ_VAR)?;
        Self::check_item_count(pdu, items.len())?;

        let payload = pdu.payload();
        let mut offset = 0;
        let last = items.len().saturating_sub(1);
        for (index, item) in items.iter_mut().enumerate() {
            let header = payload
                .get(offset..offset + 4)
                .ok_or_else(|| S7Error::protocol("Read response truncated"))?;
            let (code, transport_size) = (header[0], header[1]);
            let length =
                data_length_bytes(transport_size, u16::from_be_bytes([header[2], header[3]]));
            offset += 4;

            if code != RC_SUCCESS {
                item.status = ItemStatus::Rejected(code);
                continue;
            }

            let value = payload
                .get(offset..offset + length)
                .ok_or_else(|| S7Error::protocol("Read response data truncated"))?;
            if length == item.data.len() {
                item.data.copy_from_slice(value);
                item.status = ItemStatus::Ok;
            } else {
                debug!(
                    "{}: expected {} bytes, device sent {}",
                    item.name,
                    item.data.len(),
                    length
                );
                item.status = ItemStatus::Rejected(RC_TYPE_INCONSISTENT);
            }
            offset += length;
            if length % 2 == 1 && index < last {
                offset += 1;
            }
        }
        Ok(())
    }

    /// Set each item's status from the write var return codes
    pub fn parse_write_response(pdu: &S7Pdu, items: &mut [WireItem]) -> S7Result<()> {
        Self::check_ack(pdu, FN_WRITE_VAR)?;
        Self::check_item_count(pdu, items.len())?;

        let codes = pdu.payload();
        if codes.len() < items.len() {
            return Err(S7Error::protocol("Write response truncated"));
        }
        for (item, code) in items.iter_mut().zip(codes) {
            item.status = ItemStatus::from_return_code(*code);
        }
        Ok(())
    }

    fn check_ack(pdu: &S7Pdu, function: u8) -> S7Result<()> {
        if pdu.rosctr() != ROSCTR_ACK_DATA {
            return Err(S7Error::protocol(format!(
                "Expected ack-data, got ROSCTR {:02X}",
                pdu.rosctr()
            )));
        }
        if let Some((class, code)) = pdu.error() {
            return Err(S7Error::Exchange { class, code });
        }
        match pdu.function() {
            Some(f) if f == function => Ok(()),
            other => Err(S7Error::protocol(format!(
                "Function mismatch: expected {:02X}, got {:02X?}",
                function, other
            ))),
        }
    }

    fn check_item_count(pdu: &S7Pdu, expected: usize) -> S7Result<()> {
        let count = pdu.params().get(1).copied().unwrap_or(0) as usize;
        if count != expected {
            return Err(S7Error::protocol(format!(
                "Item count mismatch: sent {}, acknowledged {}",
                expected, count
            )));
        }
        Ok(())
    }
}
