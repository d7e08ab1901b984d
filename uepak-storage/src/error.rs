//! Error types for container decoding and extraction

use thiserror::Error;
use uepak_codec::CodecError;
use uepak_crypto::{CryptoError, Guid};

/// Archive error types.
///
/// Nothing here is retried internally; every error propagates to the
/// caller with its diagnostic context (GUID, path, offset) attached.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Magic mismatch, bad header size, or field-size mismatch.
    /// Fatal for the archive.
    #[error("Invalid container format: {reason}")]
    Format {
        /// What failed to parse
        reason: String,
    },

    /// The container version is outside what this crate decodes
    #[error("Unsupported container version: {version}")]
    UnsupportedVersion {
        /// The rejected on-disk version
        version: u32,
    },

    /// An invariant violated inside an otherwise well-formed structure.
    /// Fatal for the archive.
    #[error("Corrupt index: {reason}")]
    CorruptIndex {
        /// The violated invariant
        reason: String,
    },

    /// Decryption is required but the key store has no matching key
    #[error("No key registered for encryption GUID {guid}")]
    KeyMissing {
        /// The container's encryption-key GUID
        guid: Guid,
    },

    /// Decryption failed (alignment or key-length problems)
    #[error("Decryption error: {0}")]
    Decryption(#[from] CryptoError),

    /// Decompression failed or the codec is not registered
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Path lookup missed
    #[error("Entry not found: {path:?}")]
    NotFound {
        /// The requested logical path
        path: String,
    },

    /// The underlying file returned fewer bytes than expected
    #[error("Short read at offset {offset}: wanted {want} bytes, got {got}")]
    ShortRead {
        /// Absolute offset of the read
        offset: u64,
        /// Bytes requested
        want: u64,
        /// Bytes available
        got: u64,
    },

    /// A block's decompressed length contradicts the block record
    #[error("Corrupt block {block}: produced {actual} bytes, index records {expected}")]
    CorruptBlock {
        /// Index of the offending block within the request
        block: usize,
        /// Length recorded by the index
        expected: u64,
        /// Length actually produced
        actual: u64,
    },

    /// A CAS partition file is absent
    #[error("CAS partition {index} is missing")]
    PartitionMissing {
        /// Partition index (0 = `base.ucas`, i = `base_s{{i}}.ucas`)
        index: u32,
    },

    /// The entry exceeds the configured size limit
    #[error("Entry is {size} bytes, configured limit is {limit}")]
    FileTooLarge {
        /// Uncompressed entry size
        size: u64,
        /// Configured `max_file_size`
        limit: u64,
    },

    /// Extraction was aborted by the cancellation signal
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation issued after `close`
    #[error("Archive is closed")]
    Closed,
}

impl ArchiveError {
    pub(crate) fn format(reason: impl Into<String>) -> Self {
        Self::Format {
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            reason: reason.into(),
        }
    }
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;
