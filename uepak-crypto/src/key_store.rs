//! Key management for encrypted containers.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::CryptoError;
use crate::guid::Guid;
use crate::{KEY_LENGTH, Result};

/// GUID-keyed store of AES-256 keys.
///
/// Writes are rare (configuration time); reads happen on every
/// encrypted block. A single writer lock with copy-out reads keeps
/// lookups linearizable: a reader sees either the old or the new key
/// in full, never a torn value.
#[derive(Debug)]
pub struct KeyStore {
    keys: RwLock<HashMap<Guid, [u8; KEY_LENGTH]>>,
}

impl KeyStore {
    /// Create an empty key store.
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Register a key, replacing any previous key under the same GUID.
    pub fn insert(&self, guid: Guid, key: [u8; KEY_LENGTH]) {
        self.keys.write().insert(guid, key);
    }

    /// Register a key given as hex text (64 hex digits, `0x` prefix
    /// accepted).
    pub fn insert_hex(&self, guid: Guid, key_hex: &str) -> Result<()> {
        let key = parse_key_hex(key_hex)?;
        self.insert(guid, key);
        Ok(())
    }

    /// Bulk-register keys in one lock acquisition.
    pub fn insert_many<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (Guid, [u8; KEY_LENGTH])>,
    {
        let mut keys = self.keys.write();
        for (guid, key) in entries {
            keys.insert(guid, key);
        }
    }

    /// Look up a key by GUID.
    pub fn get(&self, guid: &Guid) -> Option<[u8; KEY_LENGTH]> {
        self.keys.read().get(guid).copied()
    }

    /// Remove a key. Returns the removed key if one was registered.
    pub fn remove(&self, guid: &Guid) -> Option<[u8; KEY_LENGTH]> {
        self.keys.write().remove(guid)
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    /// Load keys from a line-oriented text file.
    ///
    /// Each line is `guid<sep>keyhex` where the separator is a comma,
    /// a tab, or whitespace. Empty lines and `#`/`//` comments are
    /// skipped; malformed lines are logged and skipped. Returns the
    /// number of keys loaded.
    pub fn load_key_file(&self, path: &Path) -> Result<usize> {
        let content = fs::read_to_string(path)?;
        let mut loaded = 0;

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }

            let mut parts = line.splitn(2, [',', '\t', ' ']);
            let guid_text = parts.next().unwrap_or("").trim();
            let key_text = parts
                .next()
                .map(|rest| rest.trim().split_whitespace().next().unwrap_or(""))
                .unwrap_or("");

            match (guid_text.parse::<Guid>(), parse_key_hex(key_text)) {
                (Ok(guid), Ok(key)) => {
                    self.insert(guid, key);
                    loaded += 1;
                }
                (Err(e), _) => {
                    warn!("Skipping key file line {}: {}", line_num + 1, e);
                }
                (_, Err(e)) => {
                    warn!("Skipping key file line {}: {}", line_num + 1, e);
                }
            }
        }

        debug!("Loaded {} keys from {:?}", loaded, path);
        Ok(loaded)
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse 64 hex digits (optionally `0x`-prefixed) into a 32-byte key.
pub fn parse_key_hex(key_hex: &str) -> Result<[u8; KEY_LENGTH]> {
    let trimmed = key_hex
        .strip_prefix("0x")
        .or_else(|| key_hex.strip_prefix("0X"))
        .unwrap_or(key_hex);
    let bytes = hex::decode(trimmed)?;
    if bytes.len() != KEY_LENGTH {
        return Err(CryptoError::BadKeyLength { len: bytes.len() });
    }
    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn guid(n: u8) -> Guid {
        Guid::from_bytes(&[n; 16])
    }

    #[test]
    fn test_insert_get_replace() {
        let store = KeyStore::new();
        assert!(store.is_empty());

        store.insert(guid(1), [0xAA; 32]);
        assert_eq!(store.get(&guid(1)), Some([0xAA; 32]));
        assert_eq!(store.len(), 1);

        // Re-registration replaces atomically.
        store.insert(guid(1), [0xBB; 32]);
        assert_eq!(store.get(&guid(1)), Some([0xBB; 32]));
        assert_eq!(store.len(), 1);

        assert_eq!(store.remove(&guid(1)), Some([0xBB; 32]));
        assert!(store.get(&guid(1)).is_none());
    }

    #[test]
    fn test_insert_hex() {
        let store = KeyStore::new();
        let hex64 = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
        store.insert_hex(guid(2), hex64).unwrap();
        assert!(store.get(&guid(2)).is_some());

        store.insert_hex(guid(3), &format!("0x{hex64}")).unwrap();
        assert_eq!(store.get(&guid(2)), store.get(&guid(3)));

        assert!(matches!(
            store.insert_hex(guid(4), "aabb"),
            Err(CryptoError::BadKeyLength { len: 2 })
        ));
        assert!(store.insert_hex(guid(4), "zz").is_err());
    }

    #[test]
    fn test_insert_many() {
        let store = KeyStore::new();
        store.insert_many((0..4).map(|i| (guid(i), [i; 32])));
        assert_eq!(store.len(), 4);
        assert_eq!(store.get(&guid(2)), Some([2u8; 32]));
    }

    #[test]
    fn test_load_key_file() -> std::io::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "# comment")?;
        writeln!(
            file,
            "11111111-1111-1111-1111-111111111111,{}",
            "11".repeat(32)
        )?;
        writeln!(
            file,
            "22222222-2222-2222-2222-222222222222 {} trailing note",
            "22".repeat(32)
        )?;
        writeln!(file, "not-a-guid,{}", "33".repeat(32))?;
        writeln!(file, "33333333-3333-3333-3333-333333333333,beef")?;

        let store = KeyStore::new();
        let loaded = store.load_key_file(file.path()).unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(store.len(), 2);

        let g: Guid = "22222222-2222-2222-2222-222222222222".parse().unwrap();
        assert_eq!(store.get(&g), Some([0x22; 32]));
        Ok(())
    }

    #[test]
    fn test_concurrent_put_get_sees_whole_values() {
        let store = Arc::new(KeyStore::new());
        let g = guid(7);
        store.insert(g, [0u8; 32]);

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..1000u32 {
                    let b = (i % 256) as u8;
                    store.insert(g, [b; 32]);
                }
            })
        };

        // Every observed key must be uniform: either the old or the
        // new value in full, never a torn mix.
        for _ in 0..1000 {
            let key = store.get(&g).unwrap();
            assert!(key.iter().all(|&b| b == key[0]), "torn key observed");
        }

        writer.join().unwrap();
    }
}
