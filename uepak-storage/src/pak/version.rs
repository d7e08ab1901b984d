//! PAK format versions and the feature thresholds that matter for
//! decoding.

use crate::error::{ArchiveError, Result};

/// On-disk PAK format version (footer `version` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum PakVersion {
    /// v1, carries per-entry timestamps
    Initial = 1,
    /// v2, timestamps removed
    NoTimestamps = 2,
    /// v3, adds compression blocks and the encrypted flag
    CompressionEncryption = 3,
    /// v4, adds the encrypted-index flag to the footer
    IndexEncryption = 4,
    /// v5, block offsets become relative to the entry record
    RelativeChunkOffsets = 5,
    /// v6, adds delete records (layout unchanged for readers)
    DeleteRecords = 6,
    /// v7, adds the encryption-key GUID to the footer
    EncryptionKeyGuid = 7,
    /// v8, compression methods become a footer name table
    FnameBasedCompression = 8,
    /// v9, adds the frozen-index flag
    FrozenIndex = 9,
    /// v10, path-hash and full-directory index
    PathHashIndex = 10,
    /// v11, FNV path-hash fix; layout matches v10
    Fnv64BugFix = 11,
}

impl PakVersion {
    /// All versions, newest first — the order the footer scan probes.
    pub const ALL_NEWEST_FIRST: [PakVersion; 11] = [
        PakVersion::Fnv64BugFix,
        PakVersion::PathHashIndex,
        PakVersion::FrozenIndex,
        PakVersion::FnameBasedCompression,
        PakVersion::EncryptionKeyGuid,
        PakVersion::DeleteRecords,
        PakVersion::RelativeChunkOffsets,
        PakVersion::IndexEncryption,
        PakVersion::CompressionEncryption,
        PakVersion::NoTimestamps,
        PakVersion::Initial,
    ];

    /// Decode the footer's u32 version field.
    pub fn from_u32(value: u32) -> Result<Self> {
        Self::ALL_NEWEST_FIRST
            .into_iter()
            .find(|v| v.as_u32() == value)
            .ok_or(ArchiveError::UnsupportedVersion { version: value })
    }

    /// The raw u32 value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Number of 32-byte compression-method name slots in the footer.
    ///
    /// v8 shipped with both 4- and 5-slot footers; the scan tries both.
    pub fn footer_name_slots(self) -> &'static [u32] {
        match self {
            v if v >= PakVersion::FrozenIndex => &[5],
            PakVersion::FnameBasedCompression => &[5, 4],
            _ => &[0],
        }
    }

    /// Footer size for a given name-slot count.
    pub fn footer_size(self, name_slots: u32) -> u64 {
        // magic + version + index offset + index size + SHA-1
        let mut size = 4 + 4 + 8 + 8 + 20;
        if self >= PakVersion::IndexEncryption {
            size += 1; // encrypted-index flag
        }
        if self >= PakVersion::EncryptionKeyGuid {
            size += 16; // encryption-key GUID
        }
        if self == PakVersion::FrozenIndex {
            size += 1; // frozen-index flag
        }
        size + u64::from(name_slots) * 32
    }

    /// Whether the index carries the path-hash / full-directory layout.
    pub fn has_modern_index(self) -> bool {
        self >= PakVersion::PathHashIndex
    }
}
