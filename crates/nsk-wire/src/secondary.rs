//! Framed buffers for secondary (continuous-valued) events
//!
//! Layout, little-endian:
//!
//! ```text
//! header  : magic "NSEC" | version u16 | reserved u16 | count u32 | payload_len u32 | crc32 u32
//! payload : count × ( source u64 | n u32 | n × f64 )
//! ```
//!
//! The checksum covers the payload only. An empty event list encodes to an
//! empty buffer so ranks with nothing to say send zero bytes.

use crate::error::{Result, WireError};
use crate::schemas::{calculate_checksum, validate_checksum, validate_magic, validate_version, FieldReader};
use crate::{magic, NodeId, WIRE_VERSION};

const HEADER_LEN: usize = 20;

/// Per-lag values one source emitted during a min-delay cycle
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryEvent {
    /// Emitting node
    pub source: NodeId,
    /// One value per lag of the cycle
    pub values: Vec<f64>,
}

impl SecondaryEvent {
    /// Create an event
    pub fn new(source: NodeId, values: Vec<f64>) -> Self {
        Self { source, values }
    }

    fn encoded_len(&self) -> usize {
        12 + 8 * self.values.len()
    }
}

/// Encode events into a framed buffer
pub fn encode_secondary(events: &[SecondaryEvent]) -> Vec<u8> {
    if events.is_empty() {
        return Vec::new();
    }

    let payload_len: usize = events.iter().map(SecondaryEvent::encoded_len).sum();
    let mut payload = Vec::with_capacity(payload_len);
    for event in events {
        payload.extend_from_slice(&event.source.raw().to_le_bytes());
        payload.extend_from_slice(&(event.values.len() as u32).to_le_bytes());
        for value in &event.values {
            payload.extend_from_slice(&value.to_le_bytes());
        }
    }

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&magic::NSEC);
    out.extend_from_slice(&WIRE_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(events.len() as u32).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&calculate_checksum(&payload).to_le_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Decode a buffer produced by [`encode_secondary`]
pub fn decode_secondary(data: &[u8]) -> Result<Vec<SecondaryEvent>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.len() < HEADER_LEN {
        return Err(WireError::truncated(HEADER_LEN, data.len()));
    }

    validate_magic(data, magic::NSEC)?;
    let mut header = FieldReader::new(&data[4..HEADER_LEN]);
    validate_version(header.u16()?)?;
    let _reserved = header.u16()?;
    let count = header.u32()? as usize;
    let payload_len = header.u32()? as usize;
    let crc = header.u32()?;

    let payload = &data[HEADER_LEN..];
    if payload.len() != payload_len {
        return Err(WireError::truncated(HEADER_LEN + payload_len, data.len()));
    }
    validate_checksum(payload, crc)?;

    let mut reader = FieldReader::new(payload);
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        let source = NodeId::new(reader.u64()?);
        let n = reader.u32()? as usize;
        let mut values = Vec::with_capacity(n.min(reader.remaining() / 8));
        for _ in 0..n {
            values.push(reader.f64()?);
        }
        events.push(SecondaryEvent { source, values });
    }

    if reader.remaining() != 0 {
        return Err(WireError::invalid_format(format!(
            "{} trailing bytes after {} secondary events",
            reader.remaining(),
            count
        )));
    }
    Ok(events)
}
