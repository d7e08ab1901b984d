//! Error types for decompression

use thiserror::Error;

/// Codec error types
#[derive(Error, Debug)]
pub enum CodecError {
    /// The requested method has no registered decompressor
    #[error("Unknown compression method: {name:?}")]
    UnknownCodec {
        /// The unregistered method name as recorded by the container
        name: String,
    },

    /// The decompressor itself failed
    #[error("Decompression with {method:?} failed: {source}")]
    Decompress {
        /// Method name
        method: String,
        /// Underlying codec failure
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Output length does not match what the container recorded
    #[error("{method:?} produced {actual} bytes, index records {expected}")]
    LengthMismatch {
        /// Method name
        method: String,
        /// Length recorded by the container index
        expected: usize,
        /// Length actually produced
        actual: usize,
    },
}
