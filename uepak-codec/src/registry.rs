//! The name-to-decompressor mapping.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use flate2::read::{GzDecoder, ZlibDecoder};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::CodecError;
use crate::{METHOD_NONE, Result};

/// A stateless decompressor: `(compressed, expected_uncompressed_len)`
/// to plaintext bytes. The registry enforces the length postcondition;
/// the function itself only has to decompress.
pub type CodecFn =
    dyn Fn(&[u8], usize) -> std::result::Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>
        + Send
        + Sync;

/// Case-insensitive registry of named decompressors.
pub struct CodecRegistry {
    codecs: RwLock<HashMap<String, Arc<CodecFn>>>,
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("methods", &self.codecs.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CodecRegistry {
    /// Create an empty registry. Even `zlib`/`gzip` are absent; most
    /// callers want [`CodecRegistry::with_defaults`].
    pub fn new() -> Self {
        Self {
            codecs: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry seeded with the built-in methods: `none`
    /// (identity), `zlib`, and `gzip`.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(METHOD_NONE, |src, _| Ok(src.to_vec()));
        registry.register("zlib", |src, expected| {
            let mut out = Vec::with_capacity(expected);
            ZlibDecoder::new(src).read_to_end(&mut out)?;
            Ok(out)
        });
        registry.register("gzip", |src, expected| {
            let mut out = Vec::with_capacity(expected);
            GzDecoder::new(src).read_to_end(&mut out)?;
            Ok(out)
        });
        registry
    }

    /// Register a decompressor, overwriting any previous one under the
    /// same (case-insensitive) name.
    pub fn register<F>(&self, name: &str, codec: F)
    where
        F: Fn(&[u8], usize) -> std::result::Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        debug!("Registering codec {:?}", name);
        self.codecs
            .write()
            .insert(name.to_ascii_lowercase(), Arc::new(codec));
    }

    /// Whether a method name resolves to a decompressor. The empty
    /// string and `none` always do.
    pub fn is_registered(&self, name: &str) -> bool {
        if name.is_empty() {
            return true;
        }
        self.codecs.read().contains_key(&name.to_ascii_lowercase())
    }

    /// Registered method names, sorted.
    pub fn codec_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.codecs.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Decompress `src` with the named method, returning exactly
    /// `expected_len` bytes or an error.
    ///
    /// The empty method name is treated as `none`.
    pub fn decompress(&self, method: &str, src: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let lookup = if method.is_empty() {
            METHOD_NONE.to_string()
        } else {
            method.to_ascii_lowercase()
        };

        let codec = self
            .codecs
            .read()
            .get(&lookup)
            .cloned()
            .ok_or_else(|| CodecError::UnknownCodec {
                name: method.to_string(),
            })?;

        trace!(
            "Decompressing {} bytes with {:?}, expecting {}",
            src.len(),
            lookup,
            expected_len
        );

        let out = codec(src, expected_len).map_err(|source| CodecError::Decompress {
            method: method.to_string(),
            source,
        })?;

        if out.len() != expected_len {
            return Err(CodecError::LengthMismatch {
                method: method.to_string(),
                expected: expected_len,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    fn zlib_compress(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_identity() {
        let registry = CodecRegistry::with_defaults();
        let data = b"plain bytes";
        assert_eq!(
            registry.decompress("none", data, data.len()).unwrap(),
            data
        );
        // Empty method name is the same reserved identity slot.
        assert_eq!(registry.decompress("", data, data.len()).unwrap(), data);
    }

    #[test]
    fn test_identity_length_checked() {
        let registry = CodecRegistry::with_defaults();
        let err = registry.decompress("none", b"four", 5).unwrap_err();
        assert!(matches!(
            err,
            CodecError::LengthMismatch {
                expected: 5,
                actual: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_zlib() {
        let registry = CodecRegistry::with_defaults();
        let original = b"zlib round trip payload, long enough to actually deflate".to_vec();
        let compressed = zlib_compress(&original);

        let out = registry
            .decompress("zlib", &compressed, original.len())
            .unwrap();
        assert_eq!(out, original);

        // Method names are case-insensitive.
        let out = registry
            .decompress("Zlib", &compressed, original.len())
            .unwrap();
        assert_eq!(out, original);
    }

    #[test]
    fn test_gzip() {
        let registry = CodecRegistry::with_defaults();
        let original = b"gzip payload".to_vec();
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&original).unwrap();
        let compressed = enc.finish().unwrap();

        let out = registry
            .decompress("gzip", &compressed, original.len())
            .unwrap();
        assert_eq!(out, original);
    }

    #[test]
    fn test_unknown_codec() {
        let registry = CodecRegistry::with_defaults();
        let err = registry.decompress("Oodle", b"\0\0", 2).unwrap_err();
        match err {
            CodecError::UnknownCodec { name } => assert_eq!(name, "Oodle"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_plugin_registration_and_overwrite() {
        let registry = CodecRegistry::with_defaults();
        assert!(!registry.is_registered("oodle"));

        registry.register("Oodle", |src, _| Ok(src.to_vec()));
        assert!(registry.is_registered("OODLE"));
        assert_eq!(registry.decompress("oodle", b"ab", 2).unwrap(), b"ab");

        // Overwrite under a differently cased name.
        registry.register("OODLE", |_, expected| Ok(vec![0u8; expected]));
        assert_eq!(registry.decompress("Oodle", b"ab", 3).unwrap(), vec![0; 3]);
    }

    #[test]
    fn test_corrupt_input_maps_to_decompress_error() {
        let registry = CodecRegistry::with_defaults();
        let err = registry.decompress("zlib", b"definitely not zlib", 10).unwrap_err();
        assert!(matches!(err, CodecError::Decompress { .. }));
    }

    #[test]
    fn test_length_mismatch_on_real_codec() {
        let registry = CodecRegistry::with_defaults();
        let compressed = zlib_compress(b"12345678");
        let err = registry.decompress("zlib", &compressed, 4).unwrap_err();
        assert!(matches!(err, CodecError::LengthMismatch { .. }));
    }
}
