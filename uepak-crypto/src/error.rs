//! Error types for key management and decryption

use thiserror::Error;

/// Crypto error types
#[derive(Error, Debug)]
pub enum CryptoError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Key material is not exactly 32 bytes
    #[error("Invalid key length: {len} bytes (expected 32)")]
    BadKeyLength {
        /// Length of the rejected key material
        len: usize,
    },

    /// A GUID string could not be parsed
    #[error("Invalid GUID: {value:?}")]
    BadGuid {
        /// The rejected input
        value: String,
    },

    /// Ciphertext length is not a multiple of the AES block size
    #[error("Misaligned ciphertext: {len} bytes is not a multiple of 16")]
    MisalignedCiphertext {
        /// Length of the rejected buffer
        len: usize,
    },

    /// Key material contained non-hex characters
    #[error("Invalid key hex: {0}")]
    BadKeyHex(#[from] hex::FromHexError),
}
