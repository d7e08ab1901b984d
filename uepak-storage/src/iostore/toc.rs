//! The IoStore table of contents (`.utoc`) decoder.

use std::collections::HashMap;

use bitflags::bitflags;
use tracing::debug;
use uepak_crypto::Guid;

use crate::error::{ArchiveError, Result};
use crate::iostore::chunk_id::ChunkId;
use crate::reader::ByteReader;

/// TOC magic: sixteen bytes of `-==-` patterning.
pub const TOC_MAGIC: &[u8; 16] = b"-==--==--==--==-";

/// Mandatory TOC header size.
pub const TOC_HEADER_SIZE: u32 = 144;

/// Mandatory compression-block entry size.
pub const COMPRESSED_BLOCK_ENTRY_SIZE: u32 = 12;

/// TOC format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TocVersion {
    /// First released layout
    Initial = 1,
    /// Adds the directory index
    DirectoryIndex = 2,
    /// Adds partition count and size
    PartitionSize = 3,
    /// Adds the perfect-hash seed table
    PerfectHash = 4,
    /// Adds the overflow list for unplaced chunks
    PerfectHashWithOverflow = 5,
}

impl TocVersion {
    /// Decode the header's version byte.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Initial),
            2 => Ok(Self::DirectoryIndex),
            3 => Ok(Self::PartitionSize),
            4 => Ok(Self::PerfectHash),
            5 => Ok(Self::PerfectHashWithOverflow),
            other => Err(ArchiveError::UnsupportedVersion {
                version: u32::from(other),
            }),
        }
    }
}

bitflags! {
    /// Container flags byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContainerFlags: u8 {
        /// Container uses compression
        const COMPRESSED = 1;
        /// Container data is AES-encrypted
        const ENCRYPTED = 2;
        /// Container carries a signature section
        const SIGNED = 4;
        /// Container carries a directory index
        const INDEXED = 8;
    }
}

/// A chunk's byte range in the logical CAS address space: two packed
/// 40-bit little-endian integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetAndLength {
    /// Byte offset in the logical space
    pub offset: u64,
    /// Length in bytes
    pub length: u64,
}

/// One compression-block record: where a block's compressed bytes live
/// and what they decompress to.
#[derive(Debug, Clone, Copy)]
pub struct CompressionBlock {
    /// Absolute CAS offset (40-bit)
    pub offset: u64,
    /// Compressed size (24-bit)
    pub compressed_size: u32,
    /// Uncompressed size (24-bit)
    pub uncompressed_size: u32,
    /// Index into the TOC's method table; 0 = none
    pub method_index: u8,
}

#[derive(Debug)]
enum ChunkLookup {
    /// Full map built during parse (no perfect-hash table present).
    Map(HashMap<ChunkId, u32>),
    /// Perfect-hash probe with an overflow map for unplaced chunks.
    PerfectHash { overflow: HashMap<ChunkId, u32> },
}

/// Immutable decoded form of a `.utoc` file.
#[derive(Debug)]
pub struct IoStoreToc {
    /// Format version
    pub version: TocVersion,
    /// Container flags
    pub flags: ContainerFlags,
    /// Container identifier
    pub container_id: u64,
    /// Encryption-key GUID; all-zeros means the container is not
    /// encrypted no matter what the flags claim
    pub encryption_guid: Guid,
    /// Uncompressed bytes per compression block
    pub compression_block_size: u32,
    /// Number of CAS partition files
    pub partition_count: u32,
    /// Bytes per partition in the CAS address space
    pub partition_size: u64,
    /// Ordered chunk identifiers
    pub chunk_ids: Vec<ChunkId>,
    /// Per-chunk logical byte ranges, parallel to `chunk_ids`
    pub chunk_offsets: Vec<OffsetAndLength>,
    /// Perfect-hash seed table (empty below `PerfectHash`)
    pub perfect_hash_seeds: Vec<i32>,
    /// Compression-block table
    pub compression_blocks: Vec<CompressionBlock>,
    /// Method-name table; index 0 is always `none`
    pub methods: Vec<String>,
    /// Raw directory-index blob, possibly encrypted
    pub directory_index: Option<Vec<u8>>,
    lookup: ChunkLookup,
}

impl IoStoreToc {
    /// Decode a whole `.utoc` buffer in one linear pass.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);

        let magic = reader.read_bytes(16)?;
        if magic != TOC_MAGIC {
            return Err(ArchiveError::format("bad TOC magic"));
        }
        let version = TocVersion::from_u8(reader.read_u8()?)?;
        reader.skip(3)?;

        let header_size = reader.read_u32()?;
        if header_size != TOC_HEADER_SIZE {
            return Err(ArchiveError::format(format!(
                "TOC header size {header_size}, expected {TOC_HEADER_SIZE}"
            )));
        }
        let entry_count = reader.read_u32()? as usize;
        let block_count = reader.read_u32()? as usize;
        let block_entry_size = reader.read_u32()?;
        if block_entry_size != COMPRESSED_BLOCK_ENTRY_SIZE {
            return Err(ArchiveError::format(format!(
                "compression block entry size {block_entry_size}, expected {COMPRESSED_BLOCK_ENTRY_SIZE}"
            )));
        }
        let method_count = reader.read_u32()? as usize;
        let method_name_length = reader.read_u32()? as usize;
        let compression_block_size = reader.read_u32()?;
        let directory_index_size = reader.read_u32()? as usize;
        let mut partition_count = reader.read_u32()?;
        let container_id = reader.read_u64()?;
        let encryption_guid = reader.read_guid()?;
        let flags = ContainerFlags::from_bits_retain(reader.read_u8()?);
        reader.skip(3)?;
        let seed_count = reader.read_u32()? as usize;
        let mut partition_size = reader.read_u64()?;
        let without_perfect_hash_count = reader.read_u32()? as usize;
        reader.skip(4 + 5 * 8)?;

        debug_assert_eq!(reader.position(), TOC_HEADER_SIZE as usize);

        if version < TocVersion::PartitionSize {
            partition_count = 1;
            partition_size = u64::MAX;
        }

        let mut chunk_ids = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let bytes = reader.read_bytes(ChunkId::LENGTH)?;
            chunk_ids.push(ChunkId::from_slice(bytes).ok_or_else(|| {
                ArchiveError::corrupt("chunk id table truncated")
            })?);
        }

        let mut chunk_offsets = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let offset = reader.read_u40()?;
            let length = reader.read_u40()?;
            chunk_offsets.push(OffsetAndLength { offset, length });
        }

        let mut perfect_hash_seeds = Vec::new();
        if version >= TocVersion::PerfectHash {
            if seed_count != 0 && !seed_count.is_power_of_two() {
                return Err(ArchiveError::corrupt(format!(
                    "perfect-hash seed count {seed_count} is not a power of two"
                )));
            }
            perfect_hash_seeds.reserve(seed_count);
            for _ in 0..seed_count {
                perfect_hash_seeds.push(reader.read_i32()?);
            }
        }

        let mut without_perfect_hash = Vec::new();
        if version >= TocVersion::PerfectHashWithOverflow {
            without_perfect_hash.reserve(without_perfect_hash_count);
            for _ in 0..without_perfect_hash_count {
                without_perfect_hash.push(reader.read_u32()?);
            }
        }

        let mut compression_blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            let offset = reader.read_u40()?;
            let compressed_size =
                u32::from(reader.read_u8()?) | u32::from(reader.read_u16()?) << 8;
            let uncompressed_size =
                u32::from(reader.read_u8()?) | u32::from(reader.read_u16()?) << 8;
            let method_index = reader.read_u8()?;
            compression_blocks.push(CompressionBlock {
                offset,
                compressed_size,
                uncompressed_size,
                method_index,
            });
        }

        let mut methods = vec!["none".to_string()];
        for _ in 0..method_count {
            let slot = reader.read_bytes(method_name_length)?;
            let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
            let name = std::str::from_utf8(&slot[..end])
                .map_err(|_| ArchiveError::corrupt("non-UTF-8 compression method name"))?;
            methods.push(name.to_string());
        }

        // Signature section is skipped bit-for-bit, never verified.
        if flags.contains(ContainerFlags::SIGNED) {
            let hash_size = reader.read_i32()?;
            if hash_size < 0 {
                return Err(ArchiveError::corrupt("negative signature hash size"));
            }
            reader.skip(hash_size as usize * 2)?;
            reader.skip(20 * block_count)?;
        }

        let directory_index = if version >= TocVersion::DirectoryIndex && directory_index_size > 0
        {
            Some(reader.read_bytes(directory_index_size)?.to_vec())
        } else {
            None
        };

        let toc = Self {
            version,
            flags,
            container_id,
            encryption_guid,
            compression_block_size,
            partition_count,
            partition_size,
            lookup: Self::build_lookup(&chunk_ids, &perfect_hash_seeds, &without_perfect_hash),
            chunk_ids,
            chunk_offsets,
            perfect_hash_seeds,
            compression_blocks,
            methods,
            directory_index,
        };
        toc.validate()?;

        debug!(
            "TOC v{}: {} chunks, {} blocks, {} partitions, flags {:?}",
            toc.version as u8,
            toc.chunk_ids.len(),
            toc.compression_blocks.len(),
            toc.partition_count,
            toc.flags
        );
        Ok(toc)
    }

    fn build_lookup(
        chunk_ids: &[ChunkId],
        seeds: &[i32],
        without_perfect_hash: &[u32],
    ) -> ChunkLookup {
        if seeds.is_empty() {
            let map = chunk_ids
                .iter()
                .enumerate()
                .map(|(i, id)| (*id, i as u32))
                .collect();
            ChunkLookup::Map(map)
        } else {
            let overflow = without_perfect_hash
                .iter()
                .filter_map(|&i| chunk_ids.get(i as usize).map(|id| (*id, i)))
                .collect();
            ChunkLookup::PerfectHash { overflow }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_ids.len() != self.chunk_offsets.len() {
            return Err(ArchiveError::corrupt(
                "chunk id and offset tables disagree on entry count",
            ));
        }
        if self.compression_block_size == 0 && !self.chunk_ids.is_empty() {
            return Err(ArchiveError::corrupt("compression block size is zero"));
        }
        for (id, range) in self.chunk_ids.iter().zip(&self.chunk_offsets) {
            if range.length == 0 {
                continue;
            }
            let last_block = (range.offset + range.length - 1) / u64::from(self.compression_block_size);
            if last_block >= self.compression_blocks.len() as u64 {
                return Err(ArchiveError::corrupt(format!(
                    "chunk {id} extends past the compression-block table"
                )));
            }
        }
        Ok(())
    }

    /// Whether container data actually needs decryption: the encrypted
    /// flag is set and the key GUID is not the reserved zero value.
    pub fn is_encrypted(&self) -> bool {
        self.flags.contains(ContainerFlags::ENCRYPTED) && !self.encryption_guid.is_zero()
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    /// Whether the TOC holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    /// Resolve a chunk ID to its TOC entry index.
    ///
    /// Uses the perfect-hash tables when the TOC carries them and the
    /// legacy map otherwise. Always verifies the candidate slot
    /// against the query before answering.
    pub fn chunk_index(&self, id: &ChunkId) -> Option<u32> {
        match &self.lookup {
            ChunkLookup::Map(map) => map.get(id).copied(),
            ChunkLookup::PerfectHash { overflow } => {
                let seeds = &self.perfect_hash_seeds;
                let entry_count = self.chunk_ids.len() as u64;
                if entry_count == 0 {
                    return None;
                }

                let seed_slot = (id.hash_with_seed(0) % seeds.len() as u64) as usize;
                let seed = seeds[seed_slot];
                if seed == 0 {
                    return None;
                }

                let slot = if seed < 0 {
                    let direct = (-i64::from(seed)) as u64 - 1;
                    if direct >= entry_count {
                        return overflow.get(id).copied();
                    }
                    direct
                } else {
                    id.hash_with_seed(seed as u64) % entry_count
                };

                if self.chunk_ids[slot as usize] == *id {
                    Some(slot as u32)
                } else {
                    overflow.get(id).copied()
                }
            }
        }
    }

    /// The chunk's logical byte range, by TOC entry index.
    pub fn chunk_range(&self, index: u32) -> Option<OffsetAndLength> {
        self.chunk_offsets.get(index as usize).copied()
    }

    /// Name of a compression-method slot.
    pub fn method_name(&self, index: u8) -> Result<&str> {
        self.methods
            .get(index as usize)
            .map(String::as_str)
            .ok_or_else(|| {
                ArchiveError::corrupt(format!("compression method index {index} past method table"))
            })
    }
}
