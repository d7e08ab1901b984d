//! The IoStore container family: a `.utoc` table of contents plus one
//! or more `.ucas` content files addressed by absolute byte offset.

pub mod chunk_id;
pub mod directory;
pub mod toc;

pub use chunk_id::ChunkId;
pub use directory::DirectoryIndex;
pub use toc::{
    CompressionBlock, ContainerFlags, IoStoreToc, OffsetAndLength, TocVersion,
    COMPRESSED_BLOCK_ENTRY_SIZE, TOC_HEADER_SIZE, TOC_MAGIC,
};
