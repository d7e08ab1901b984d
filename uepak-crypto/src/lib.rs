//! Encryption support for Unreal Engine archive containers.
//!
//! This crate provides:
//! - The 128-bit encryption-key GUID used by both container families
//! - A GUID-keyed store of 256-bit AES keys
//! - AES-256-ECB block decryption as the on-disk format requires it
//!
//! ECB is dictated by the container format, not chosen here: archives
//! deliver independently decryptable 16-byte-aligned blocks and the
//! true plaintext length always comes from the container index.

pub mod aes_ecb;
pub mod error;
pub mod guid;
pub mod key_store;

pub use aes_ecb::{decrypt_ecb, decrypt_ecb_in_place};
pub use error::CryptoError;
pub use guid::Guid;
pub use key_store::KeyStore;

/// Length of an AES-256 key in bytes.
pub const KEY_LENGTH: usize = 32;

/// AES block length in bytes; every ciphertext buffer must be a
/// multiple of this.
pub const BLOCK_LENGTH: usize = 16;

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
