//! The decoded PAK index: path-to-entry mapping for one archive.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};
use uepak_crypto::{decrypt_ecb_in_place, Guid, KeyStore};

use crate::error::{ArchiveError, Result};
use crate::pak::entry::PakEntry;
use crate::pak::footer::Footer;
use crate::pak::version::PakVersion;
use crate::reader::{ByteReader, ContainerFile};

/// Immutable decoded form of a PAK archive's index.
#[derive(Debug)]
pub struct PakIndex {
    /// Format version
    pub version: PakVersion,
    /// Mount-point prefix applied to every entry path
    pub mount_point: String,
    /// Encryption-key GUID from the footer
    pub encryption_guid: Guid,
    /// Whether the index blob itself was encrypted
    pub encrypted_index: bool,
    /// Compression-method table; index 0 is always `none`
    pub methods: Vec<String>,
    paths: Vec<String>,
    entries: Vec<PakEntry>,
    by_lower: HashMap<String, usize>,
}

impl PakIndex {
    /// Read and decode the index blob located by `footer`.
    pub fn parse(file: &ContainerFile, footer: &Footer, keys: &Arc<KeyStore>) -> Result<Self> {
        let mut blob = file.read_at(footer.index_offset, footer.index_size as usize)?;

        if footer.encrypted_index {
            let key = keys
                .get(&footer.encryption_guid)
                .ok_or(ArchiveError::KeyMissing {
                    guid: footer.encryption_guid,
                })?;
            decrypt_ecb_in_place(&mut blob, &key)?;
        }

        let mut reader = ByteReader::new(&blob);
        let mount_point = reader.read_unreal_string()?;
        let entry_count = reader.read_u32()? as usize;

        let mut index = Self {
            version: footer.version,
            mount_point,
            encryption_guid: footer.encryption_guid,
            encrypted_index: footer.encrypted_index,
            methods: footer.method_table(),
            paths: Vec::with_capacity(entry_count),
            entries: Vec::with_capacity(entry_count),
            by_lower: HashMap::with_capacity(entry_count),
        };

        if footer.version.has_modern_index() {
            index.parse_modern(file, footer, keys, &mut reader, entry_count)?;
        } else {
            for _ in 0..entry_count {
                let path = reader.read_unreal_string()?;
                let entry = PakEntry::read(&mut reader, footer.version)?;
                index.add_entry(path, entry);
            }
        }

        debug!(
            "PAK index: {} entries under mount point {:?}",
            index.entries.len(),
            index.mount_point
        );
        Ok(index)
    }

    /// v10+ index layout: path-hash seed, optional path-hash index,
    /// optional full directory index, then the bit-packed entry blob.
    /// Paths come from the full directory index; the path-hash index
    /// is skipped (it only accelerates hashed lookups).
    fn parse_modern(
        &mut self,
        file: &ContainerFile,
        footer: &Footer,
        keys: &Arc<KeyStore>,
        reader: &mut ByteReader<'_>,
        _entry_count: usize,
    ) -> Result<()> {
        let _path_hash_seed = reader.read_u64()?;

        // Path-hash index envelope: present flag, offset, size, hash.
        if reader.read_u32()? != 0 {
            let _offset = reader.read_u64()?;
            let _size = reader.read_u64()?;
            reader.skip(20)?;
        }

        let directory_index = if reader.read_u32()? != 0 {
            let offset = reader.read_u64()?;
            let size = reader.read_u64()?;
            reader.skip(20)?;

            let mut blob = file.read_at(offset, size as usize)?;
            if footer.encrypted_index {
                let key = keys
                    .get(&footer.encryption_guid)
                    .ok_or(ArchiveError::KeyMissing {
                        guid: footer.encryption_guid,
                    })?;
                decrypt_ecb_in_place(&mut blob, &key)?;
            }
            Some(blob)
        } else {
            None
        };

        let encoded_size = reader.read_u32()? as usize;
        let encoded = reader.read_bytes(encoded_size)?;

        let plain_count = reader.read_u32()? as usize;
        let mut plain_entries = Vec::with_capacity(plain_count);
        for _ in 0..plain_count {
            plain_entries.push(PakEntry::read(reader, footer.version)?);
        }

        let Some(directory_blob) = directory_index else {
            warn!("v{} PAK has no full directory index; no paths available", footer.version.as_u32());
            return Ok(());
        };

        let mut dir_reader = ByteReader::new(&directory_blob);
        let dir_count = dir_reader.read_u32()? as usize;
        for _ in 0..dir_count {
            let dir_name = dir_reader.read_unreal_string()?;
            let file_count = dir_reader.read_u32()? as usize;
            for _ in 0..file_count {
                let file_name = dir_reader.read_unreal_string()?;
                let encoded_offset = dir_reader.read_i32()?;

                let entry = if encoded_offset >= 0 {
                    let mut entry_reader = ByteReader::new(encoded);
                    entry_reader.skip(encoded_offset as usize)?;
                    PakEntry::read_encoded(&mut entry_reader, footer.version)?
                } else {
                    let plain_index = (-encoded_offset) as usize - 1;
                    plain_entries
                        .get(plain_index)
                        .cloned()
                        .ok_or_else(|| ArchiveError::corrupt("entry index past plain-entry list"))?
                };

                let dir = dir_name.strip_prefix('/').unwrap_or(&dir_name);
                self.add_entry(format!("{dir}{file_name}"), entry);
            }
        }
        Ok(())
    }

    fn add_entry(&mut self, path: String, entry: PakEntry) {
        let full = format!("{}{}", self.mount_point, path);
        let lower = full.to_lowercase();
        let slot = self.entries.len();
        self.paths.push(full);
        self.entries.push(entry);
        self.by_lower.insert(lower, slot);
    }

    /// Look up an entry by case-insensitive full path.
    pub fn find(&self, path: &str) -> Option<(&str, &PakEntry)> {
        let slot = *self.by_lower.get(&path.to_lowercase())?;
        Some((&self.paths[slot], &self.entries[slot]))
    }

    /// All `(display path, entry)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PakEntry)> {
        self.paths
            .iter()
            .map(String::as_str)
            .zip(self.entries.iter())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Name of a compression slot, if the table covers it.
    pub fn method_name(&self, slot: u32) -> Result<&str> {
        self.methods
            .get(slot as usize)
            .map(String::as_str)
            .ok_or_else(|| {
                ArchiveError::corrupt(format!("compression slot {slot} past method table"))
            })
    }
}
