//! TLV wire framing (spec §6).
//!
//! Each unit is `type: u16 be || length: u16 be || value: length bytes`.
//! An empty value encodes with `length = 0`; decoding a zero-length value
//! yields `None` rather than `Some(vec![])`. `decode` returns the decoded
//! `(type, value, rest)` so callers can keep decoding successive units out
//! of one buffer.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed TLV: declared length {declared} exceeds remaining {remaining} bytes")]
    MalformedTlv { declared: usize, remaining: usize },
    #[error("truncated TLV header: need at least 4 bytes, got {0}")]
    TruncatedHeader(usize),
}

/// Encode one `(type, value)` unit.
pub fn encode(tlv_type: u16, value: Option<&[u8]>) -> Vec<u8> {
    let value = value.unwrap_or(&[]);
    let mut out = Vec::with_capacity(4 + value.len());
    out.extend_from_slice(&tlv_type.to_be_bytes());
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
    out
}

/// Decode one `(type, value)` unit from the front of `bytes`, returning the
/// remaining unparsed bytes as `rest`.
pub fn decode(bytes: &[u8]) -> Result<(u16, Option<Vec<u8>>, &[u8]), CodecError> {
    if bytes.len() < 4 {
        return Err(CodecError::TruncatedHeader(bytes.len()));
    }
    let tlv_type = u16::from_be_bytes([bytes[0], bytes[1]]);
    let len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    let remaining = bytes.len() - 4;
    if len > remaining {
        return Err(CodecError::MalformedTlv {
            declared: len,
            remaining,
        });
    }
    let value_bytes = &bytes[4..4 + len];
    let value = if len == 0 {
        None
    } else {
        Some(value_bytes.to_vec())
    };
    Ok((tlv_type, value, &bytes[4 + len..]))
}

/// Decode every unit in `bytes` in order. Stops (and returns what was parsed
/// so far) once fewer than 4 bytes remain, matching the framing contract
/// that trailing padding/silence is not an error.
pub fn decode_all(mut bytes: &[u8]) -> Result<Vec<(u16, Option<Vec<u8>>)>, CodecError> {
    let mut units = Vec::new();
    while !bytes.is_empty() {
        let (tlv_type, value, rest) = decode(bytes)?;
        units.push((tlv_type, value));
        bytes = rest;
    }
    Ok(units)
}
