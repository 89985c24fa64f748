//! Fixed-size header prefixed to every status-area file.
//!
//! The header carries the magic, a file-format version byte, the
//! per-kind struct version, the record geometry and a generation id that
//! is bumped on every rebuild so that attached passive readers can
//! notice the change and re-attach. Two single-byte fields at known
//! offsets broadcast feature flags ("disable retrieve", "disable
//! dir-warn-time") without rebuilding the area.

use bytes::{Buf, BufMut};

use super::AreaError;

/// `"AFDS"` little-endian.
pub const AREA_MAGIC: u32 = 0x5344_4641;
/// On-disk file format version.
pub const AREA_VERSION: u8 = 3;
/// Total header size in bytes; records start at this offset.
pub const HEADER_SIZE: usize = 64;

/// Feature-flag bit: retrieve scheduling globally disabled.
pub const FEATURE_DISABLE_RETRIEVE: u8 = 1 << 0;
/// Feature-flag bit: directory warn-time checks globally disabled.
pub const FEATURE_DISABLE_DIR_WARN_TIME: u8 = 1 << 1;

/// Parsed status-area header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaHeader {
    pub version: u8,
    pub struct_version: u8,
    pub start_error_offset: u8,
    pub feature_flags: u8,
    pub pagesize: u32,
    pub record_count: u32,
    pub record_size: u32,
    pub generation: u32,
}

impl AreaHeader {
    pub fn new(struct_version: u8, record_count: u32, record_size: u32) -> Self {
        Self {
            version: AREA_VERSION,
            struct_version,
            start_error_offset: 0,
            feature_flags: 0,
            pagesize: page_size(),
            record_count,
            record_size,
            generation: 1,
        }
    }

    /// Encodes into exactly [`HEADER_SIZE`] bytes.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32_le(AREA_MAGIC);
        buf.put_u8(self.version);
        buf.put_u8(self.struct_version);
        buf.put_u8(self.start_error_offset);
        buf.put_u8(self.feature_flags);
        buf.put_u32_le(self.pagesize);
        buf.put_u32_le(self.record_count);
        buf.put_u32_le(self.record_size);
        buf.put_u32_le(self.generation);
        out
    }

    /// Decodes and validates magic and version.
    pub fn decode(bytes: &[u8], expect_struct_version: u8) -> Result<Self, AreaError> {
        if bytes.len() < HEADER_SIZE {
            return Err(AreaError::BadSize {
                expected: HEADER_SIZE as u64,
                found: bytes.len() as u64,
            });
        }
        let mut buf = &bytes[..HEADER_SIZE];
        let magic = buf.get_u32_le();
        if magic != AREA_MAGIC {
            return Err(AreaError::BadMagic(magic));
        }
        let version = buf.get_u8();
        let struct_version = buf.get_u8();
        if version != AREA_VERSION || struct_version != expect_struct_version {
            return Err(AreaError::VersionMismatch {
                found: version,
                found_struct: struct_version,
                expected: AREA_VERSION,
                expected_struct: expect_struct_version,
            });
        }
        let start_error_offset = buf.get_u8();
        let feature_flags = buf.get_u8();
        let pagesize = buf.get_u32_le();
        let record_count = buf.get_u32_le();
        let record_size = buf.get_u32_le();
        let generation = buf.get_u32_le();
        Ok(Self {
            version,
            struct_version,
            start_error_offset,
            feature_flags,
            pagesize,
            record_count,
            record_size,
            generation,
        })
    }

    /// Byte offset of record `idx` inside the file.
    pub fn record_offset(&self, idx: usize) -> u64 {
        HEADER_SIZE as u64 + idx as u64 * self.record_size as u64
    }
}

fn page_size() -> u32 {
    // SAFETY: sysconf with a valid name has no side effects.
    let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ps > 0 {
        ps as u32
    } else {
        4096
    }
}
