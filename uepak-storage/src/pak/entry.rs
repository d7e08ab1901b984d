//! PAK entry records: the legacy serialized form and the v10+
//! bit-packed form.

use crate::error::{ArchiveError, Result};
use crate::extract::align_up_16;
use crate::pak::version::PakVersion;
use crate::reader::ByteReader;

/// A compression block's byte span, relative to the entry's data body
/// (the bytes after the duplicate entry record that precedes file
/// data).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    /// Start offset within the body
    pub start: u64,
    /// End offset (exclusive); `end - start` is the exact compressed
    /// size, unpadded even when encrypted
    pub end: u64,
}

impl BlockSpan {
    /// Exact compressed length of the block.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the span is empty.
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// One file record from a PAK index.
#[derive(Debug, Clone)]
pub struct PakEntry {
    /// Absolute offset of the entry record in the PAK file
    pub offset: u64,
    /// Compressed size of the data body
    pub compressed_size: u64,
    /// Uncompressed size
    pub uncompressed_size: u64,
    /// Index into the archive's compression-method table; 0 = none
    pub compression_slot: u32,
    /// SHA-1 of the entry data (recorded, not verified)
    pub hash: [u8; 20],
    /// Compression block spans; empty for uncompressed entries
    pub blocks: Vec<BlockSpan>,
    /// Whether the data body is AES-encrypted
    pub encrypted: bool,
    /// Uncompressed bytes per compression block
    pub compression_block_size: u32,
}

impl PakEntry {
    /// Read a legacy-format entry record at the cursor.
    ///
    /// Used both for index entries and for measuring the duplicate
    /// record that precedes each entry's data. Block offsets are
    /// normalized to be relative to the data body: on disk they are
    /// absolute before v5 and entry-relative from v5.
    pub fn read(reader: &mut ByteReader<'_>, version: PakVersion) -> Result<Self> {
        let offset = reader.read_i64()? as u64;
        let compressed_size = reader.read_i64()? as u64;
        let uncompressed_size = reader.read_i64()? as u64;

        let raw_method = reader.read_u32()?;
        let compression_slot = if version >= PakVersion::FnameBasedCompression {
            raw_method
        } else {
            legacy_method_slot(raw_method)
        };

        if version <= PakVersion::Initial {
            let _timestamp = reader.read_u64()?;
        }

        let mut hash = [0u8; 20];
        hash.copy_from_slice(reader.read_bytes(20)?);

        let mut blocks = Vec::new();
        let mut encrypted = false;
        let mut compression_block_size = 0;

        if version >= PakVersion::CompressionEncryption {
            if compression_slot != 0 {
                let block_count = reader.read_u32()? as usize;
                blocks.reserve(block_count);
                for _ in 0..block_count {
                    let start = reader.read_u64()?;
                    let end = reader.read_u64()?;
                    blocks.push(BlockSpan { start, end });
                }
            }
            encrypted = reader.read_u8()? != 0;
            compression_block_size = reader.read_u32()?;
        }

        let mut entry = Self {
            offset,
            compressed_size,
            uncompressed_size,
            compression_slot,
            hash,
            blocks,
            encrypted,
            compression_block_size,
        };

        // Normalize spans to body-relative: drop the absolute entry
        // offset (pre-v5) and the record's own serialized length.
        let record_len = entry.serialized_size(version);
        let base = if version >= PakVersion::RelativeChunkOffsets {
            record_len
        } else {
            entry.offset + record_len
        };
        for span in &mut entry.blocks {
            if span.start < base || span.end < span.start {
                return Err(ArchiveError::corrupt("compression block span out of range"));
            }
            span.start -= base;
            span.end -= base;
        }

        Ok(entry)
    }

    /// Read a v10+ bit-packed entry record at the cursor.
    pub fn read_encoded(reader: &mut ByteReader<'_>, _version: PakVersion) -> Result<Self> {
        let bits = reader.read_u32()?;

        let compression_slot = (bits >> 23) & 0x3F;
        let encrypted = bits & (1 << 22) != 0;
        let block_count = (bits >> 6) & 0xFFFF;
        let quantum = bits & 0x3F;
        let compression_block_size = if quantum == 0x3F {
            reader.read_u32()?
        } else {
            quantum << 11
        };

        let offset = if bits & (1 << 31) != 0 {
            u64::from(reader.read_u32()?)
        } else {
            reader.read_u64()?
        };
        let uncompressed_size = if bits & (1 << 30) != 0 {
            u64::from(reader.read_u32()?)
        } else {
            reader.read_u64()?
        };
        let compressed_size = if compression_slot != 0 {
            if bits & (1 << 29) != 0 {
                u64::from(reader.read_u32()?)
            } else {
                reader.read_u64()?
            }
        } else {
            uncompressed_size
        };

        // Block spans are implicit: sequential from the body start,
        // padded to the AES block size when encrypted. Single
        // unencrypted blocks skip the size list entirely.
        let mut blocks = Vec::with_capacity(block_count as usize);
        if compression_slot != 0 && block_count > 0 {
            if block_count == 1 && !encrypted {
                blocks.push(BlockSpan {
                    start: 0,
                    end: compressed_size,
                });
            } else {
                let mut cursor = 0u64;
                for _ in 0..block_count {
                    let size = u64::from(reader.read_u32()?);
                    blocks.push(BlockSpan {
                        start: cursor,
                        end: cursor + size,
                    });
                    cursor += if encrypted { align_up_16(size) } else { size };
                }
            }
        }

        Ok(Self {
            offset,
            compressed_size,
            uncompressed_size,
            compression_slot,
            hash: [0u8; 20],
            blocks,
            encrypted,
            compression_block_size,
        })
    }

    /// Size of this entry's legacy serialized record — the number of
    /// bytes the duplicate record occupies in front of the data body.
    pub fn serialized_size(&self, version: PakVersion) -> u64 {
        let mut size = 8 + 8 + 8 + 4 + 20;
        if version <= PakVersion::Initial {
            size += 8; // timestamp
        }
        if version >= PakVersion::CompressionEncryption {
            if self.compression_slot != 0 {
                size += 4 + 16 * self.blocks.len() as u64;
            }
            size += 1 + 4; // encrypted flag + block size
        }
        size
    }
}

/// Map a pre-v8 compression field to a slot in the legacy method table
/// (`none / zlib / gzip / oodle`). The bias variants are zlib.
fn legacy_method_slot(raw: u32) -> u32 {
    match raw {
        0 => 0,
        0x01 | 0x10 | 0x20 => 1,
        0x02 => 2,
        0x04 => 3,
        _ => 1,
    }
}
