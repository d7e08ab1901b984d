//! AES-256-ECB block decryption.
//!
//! The container formats encrypt data as independent 16-byte AES
//! blocks with no chaining and no padding; the surrounding index
//! records the true plaintext length. Decryption therefore never
//! strips anything — callers truncate using the index.

use aes::cipher::{BlockDecrypt, KeyInit};
use aes::Aes256;

use crate::error::CryptoError;
use crate::{BLOCK_LENGTH, KEY_LENGTH, Result};

/// Decrypt a 16-byte-aligned ciphertext buffer in place.
pub fn decrypt_ecb_in_place(buf: &mut [u8], key: &[u8; KEY_LENGTH]) -> Result<()> {
    if buf.len() % BLOCK_LENGTH != 0 {
        return Err(CryptoError::MisalignedCiphertext { len: buf.len() });
    }

    let cipher = Aes256::new_from_slice(key)
        .map_err(|_| CryptoError::BadKeyLength { len: key.len() })?;
    for block in buf.chunks_mut(BLOCK_LENGTH) {
        cipher.decrypt_block(aes::Block::from_mut_slice(block));
    }
    Ok(())
}

/// Decrypt into a fresh buffer, leaving the ciphertext untouched.
pub fn decrypt_ecb(src: &[u8], key: &[u8; KEY_LENGTH]) -> Result<Vec<u8>> {
    let mut out = src.to_vec();
    decrypt_ecb_in_place(&mut out, key)?;
    Ok(out)
}
