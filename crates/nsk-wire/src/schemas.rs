//! Framing helpers: magic numbers, versions and checksums

use crate::error::{Result, WireError};
use crate::WIRE_VERSION;

/// Validate magic number at the start of a framed buffer
pub fn validate_magic(data: &[u8], expected: [u8; 4]) -> Result<()> {
    if data.len() < 4 {
        return Err(WireError::invalid_format("Data too short for magic number"));
    }

    let found = [data[0], data[1], data[2], data[3]];
    if found != expected {
        return Err(WireError::InvalidMagic { expected, found });
    }

    Ok(())
}

/// Reject buffers produced by a different wire version
pub fn validate_version(version: u16) -> Result<()> {
    if version != WIRE_VERSION {
        return Err(WireError::UnsupportedVersion {
            version,
            supported: WIRE_VERSION,
        });
    }
    Ok(())
}

/// Calculate CRC32 checksum
pub fn calculate_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Validate checksum
pub fn validate_checksum(data: &[u8], expected: u32) -> Result<()> {
    let computed = calculate_checksum(data);
    if computed != expected {
        return Err(WireError::ChecksumMismatch { expected, computed });
    }
    Ok(())
}

/// Little-endian field reader over a byte slice
pub(crate) struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.remaining() < N {
            return Err(WireError::truncated(self.pos + N, self.data.len()));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    pub(crate) fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::magic;

    #[test]
    fn test_magic_validation() {
        assert!(validate_magic(&magic::NSEC, magic::NSEC).is_ok());
        assert!(matches!(
            validate_magic(b"XXXX", magic::NSEC),
            Err(WireError::InvalidMagic { .. })
        ));
        assert!(validate_magic(b"NS", magic::NSEC).is_err());
    }

    #[test]
    fn test_checksum() {
        let data = b"spike";
        let sum = calculate_checksum(data);
        assert!(validate_checksum(data, sum).is_ok());
        assert!(validate_checksum(data, sum ^ 1).is_err());
    }

    #[test]
    fn test_field_reader_truncation() {
        let bytes = [1u8, 0, 0];
        let mut reader = FieldReader::new(&bytes);
        assert_eq!(reader.u16().unwrap(), 1);
        assert!(matches!(reader.u32(), Err(WireError::Truncated { .. })));
        assert_eq!(reader.remaining(), 1);
    }
}
