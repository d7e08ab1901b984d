//! Fixture builders for the integration test suites: synthetic PAK
//! archives and IoStore container pairs, written with the same on-disk
//! layouts the readers decode. Not a product writing surface.

mod pak_builder;
mod toc_builder;

pub use pak_builder::PakFixtureBuilder;
pub use toc_builder::TocFixtureBuilder;

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;

/// Pad to the AES block size and encrypt in place with AES-256-ECB.
pub(crate) fn pad_and_encrypt(buf: &mut Vec<u8>, key: &[u8; 32]) {
    let pad = (16 - (buf.len() % 16)) % 16;
    buf.resize(buf.len() + pad, 0);
    let cipher = Aes256::new_from_slice(key).expect("32-byte key");
    for block in buf.chunks_mut(16) {
        cipher.encrypt_block(aes::Block::from_mut_slice(block));
    }
}

/// Compress with zlib at the default level.
pub(crate) fn zlib_compress(data: &[u8]) -> Vec<u8> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("in-memory write");
    encoder.finish().expect("in-memory finish")
}

/// Write an Unreal length-prefixed UTF-8 string.
pub(crate) fn write_unreal_string(out: &mut Vec<u8>, s: &str) {
    use byteorder::{WriteBytesExt, LE};
    out.write_i32::<LE>(s.len() as i32 + 1)
        .expect("in-memory write");
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

pub(crate) fn align_up_16(n: u64) -> u64 {
    n + ((16 - (n % 16)) % 16)
}
