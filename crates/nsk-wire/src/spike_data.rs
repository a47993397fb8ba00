//! SpikeData records and the fixed-size per-rank chunks that carry them
//!
//! A send buffer is `num_ranks` chunks of identical capacity. Within a chunk
//! the last valid record carries [`SpikeMarker::End`]; a chunk with nothing
//! to say starts with a single [`SpikeMarker::Invalid`] record. Records hold
//! no weight: the receiver finds it in the addressed connector.

use crate::error::{Result, WireError};
use crate::schemas::FieldReader;

/// Position of a record inside its chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SpikeMarker {
    /// Ordinary record, more follow
    Default = 0,
    /// Last valid record of the chunk
    End = 1,
    /// Chunk is empty
    Invalid = 2,
}

impl SpikeMarker {
    fn from_raw(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(Self::Default),
            1 => Ok(Self::End),
            2 => Ok(Self::Invalid),
            other => Err(WireError::invalid_format(format!(
                "unknown spike marker {}",
                other
            ))),
        }
    }
}

/// Record layout, fixed for a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLayout {
    /// Spikes aligned to the simulation grid
    OnGrid,
    /// Spikes carry a sub-step offset for precise-timing models
    OffGrid,
}

impl RecordLayout {
    /// Encoded size of one record in bytes
    pub const fn size(&self) -> usize {
        match self {
            RecordLayout::OnGrid => 16,
            RecordLayout::OffGrid => 24,
        }
    }
}

const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Compact wire record identifying a delivery target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeData {
    /// Local connection index of the first connector of the source's block,
    /// or the compressed-table index when `compressed` is set
    pub lcid: u32,
    /// Receiving thread (ignored for compressed records)
    pub tid: u16,
    /// Synapse model index
    pub syn_id: u16,
    /// Lag of the emission within the min-delay cycle
    pub lag: u16,
    /// Number of spikes emitted at once
    pub multiplicity: u16,
    /// Chunk position marker
    pub marker: SpikeMarker,
    /// Record addresses the receiver's compressed table
    pub compressed: bool,
    /// Sub-step offset in ms (off-grid layout only)
    pub offset: f64,
}

impl SpikeData {
    /// Create a record addressing `(tid, syn_id, lcid)`
    pub fn new(tid: u16, syn_id: u16, lcid: u32, lag: u16) -> Self {
        Self {
            lcid,
            tid,
            syn_id,
            lag,
            multiplicity: 1,
            marker: SpikeMarker::Default,
            compressed: false,
            offset: 0.0,
        }
    }

    /// Create a record addressing a compressed-table entry
    pub fn compressed(syn_id: u16, index: u32, lag: u16) -> Self {
        Self {
            compressed: true,
            ..Self::new(0, syn_id, index, lag)
        }
    }

    /// Set multiplicity
    pub fn with_multiplicity(mut self, multiplicity: u16) -> Self {
        self.multiplicity = multiplicity;
        self
    }

    /// Set sub-step offset
    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    fn invalid() -> Self {
        Self {
            marker: SpikeMarker::Invalid,
            ..Self::new(0, 0, 0, 0)
        }
    }

    /// Encode into `out`, which must hold at least `layout.size()` bytes
    pub fn write_to(&self, out: &mut [u8], layout: RecordLayout) -> Result<()> {
        let size = layout.size();
        if out.len() < size {
            return Err(WireError::truncated(size, out.len()));
        }
        out[0..4].copy_from_slice(&self.lcid.to_le_bytes());
        out[4..6].copy_from_slice(&self.tid.to_le_bytes());
        out[6..8].copy_from_slice(&self.syn_id.to_le_bytes());
        out[8..10].copy_from_slice(&self.lag.to_le_bytes());
        out[10..12].copy_from_slice(&self.multiplicity.to_le_bytes());
        out[12] = self.marker as u8;
        out[13] = if self.compressed { FLAG_COMPRESSED } else { 0 };
        out[14..16].copy_from_slice(&[0, 0]);
        if layout == RecordLayout::OffGrid {
            out[16..24].copy_from_slice(&self.offset.to_le_bytes());
        }
        Ok(())
    }

    /// Decode one record from the start of `data`
    pub fn read_from(data: &[u8], layout: RecordLayout) -> Result<Self> {
        if data.len() < layout.size() {
            return Err(WireError::truncated(layout.size(), data.len()));
        }
        let mut reader = FieldReader::new(data);
        let lcid = reader.u32()?;
        let tid = reader.u16()?;
        let syn_id = reader.u16()?;
        let lag = reader.u16()?;
        let multiplicity = reader.u16()?;
        let marker = SpikeMarker::from_raw(reader.u8()?)?;
        let flags = reader.u8()?;
        let _reserved = reader.u16()?;
        let offset = match layout {
            RecordLayout::OnGrid => 0.0,
            RecordLayout::OffGrid => reader.f64()?,
        };
        Ok(Self {
            lcid,
            tid,
            syn_id,
            lag,
            multiplicity,
            marker,
            compressed: flags & FLAG_COMPRESSED != 0,
            offset,
        })
    }
}

/// Outcome of filling one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkFill {
    /// Records written
    pub written: usize,
    /// Records that did not fit
    pub overflow: bool,
}

/// Write as many `records` as fit into `chunk`, setting chunk markers.
/// Records beyond the capacity are dropped from this attempt and reported
/// through [`ChunkFill::overflow`]; the caller must retry with a larger chunk.
pub fn write_chunk(records: &[SpikeData], chunk: &mut [u8], layout: RecordLayout) -> Result<ChunkFill> {
    let size = layout.size();
    let capacity = chunk.len() / size;
    if capacity == 0 {
        return Err(WireError::invalid_format("chunk cannot hold a single record"));
    }

    if records.is_empty() {
        SpikeData::invalid().write_to(&mut chunk[..size], layout)?;
        return Ok(ChunkFill {
            written: 0,
            overflow: false,
        });
    }

    let written = records.len().min(capacity);
    for (i, record) in records[..written].iter().enumerate() {
        let mut record = *record;
        record.marker = if i + 1 == written {
            SpikeMarker::End
        } else {
            SpikeMarker::Default
        };
        record.write_to(&mut chunk[i * size..(i + 1) * size], layout)?;
    }

    let overflow = records.len() > capacity;
    if overflow {
        log::trace!(
            "chunk overflow: {} records for capacity {}",
            records.len(),
            capacity
        );
    }
    Ok(ChunkFill { written, overflow })
}

/// Decode the valid records of one chunk
pub fn read_chunk(chunk: &[u8], layout: RecordLayout) -> Result<Vec<SpikeData>> {
    let size = layout.size();
    let capacity = chunk.len() / size;
    let mut records = Vec::new();

    for i in 0..capacity {
        let record = SpikeData::read_from(&chunk[i * size..(i + 1) * size], layout)?;
        match record.marker {
            SpikeMarker::Invalid if i == 0 => return Ok(records),
            SpikeMarker::Invalid => {
                return Err(WireError::invalid_format(format!(
                    "invalid marker at record {} of a non-empty chunk",
                    i
                )))
            }
            SpikeMarker::End => {
                records.push(record);
                return Ok(records);
            }
            SpikeMarker::Default => records.push(record),
        }
    }

    Err(WireError::invalid_format("chunk has no end marker"))
}
