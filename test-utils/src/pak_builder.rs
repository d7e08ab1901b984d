//! Synthetic `.pak` writer covering versions 3–11.

use byteorder::{WriteBytesExt, LE};
use uepak_crypto::Guid;

use crate::{align_up_16, pad_and_encrypt, write_unreal_string, zlib_compress};

const PAK_MAGIC: u32 = 0x5A6F_12E1;

struct FixtureFile {
    path: String,
    data: Vec<u8>,
    compress: bool,
}

/// Builds a syntactically valid PAK archive in memory.
///
/// Versions 3–9 get the legacy path-list index; 10–11 get the
/// path-hash / full-directory layout with bit-packed entries. When a
/// key is set the index (and, optionally, entry data) is AES-encrypted
/// under the given GUID.
pub struct PakFixtureBuilder {
    version: u32,
    mount_point: String,
    compression_block_size: u32,
    key: Option<(Guid, [u8; 32])>,
    encrypt_index: bool,
    encrypt_entries: bool,
    files: Vec<FixtureFile>,
}

impl PakFixtureBuilder {
    /// Start a builder for the given PAK version (3..=11).
    pub fn new(version: u32) -> Self {
        assert!((3..=11).contains(&version), "unsupported fixture version");
        Self {
            version,
            mount_point: "/Game/".to_string(),
            compression_block_size: 0x10000,
            key: None,
            encrypt_index: false,
            encrypt_entries: false,
            files: Vec::new(),
        }
    }

    pub fn mount_point(mut self, mount_point: &str) -> Self {
        self.mount_point = mount_point.to_string();
        self
    }

    pub fn compression_block_size(mut self, size: u32) -> Self {
        self.compression_block_size = size;
        self
    }

    /// Set the AES key and encrypt the index with it.
    pub fn encrypt_index(mut self, guid: Guid, key: [u8; 32]) -> Self {
        self.key = Some((guid, key));
        self.encrypt_index = true;
        self
    }

    /// Additionally encrypt every entry's data.
    pub fn encrypt_entries(mut self) -> Self {
        assert!(self.key.is_some(), "set a key before encrypting entries");
        self.encrypt_entries = true;
        self
    }

    /// Add a stored (uncompressed) file.
    pub fn add_file(mut self, path: &str, data: &[u8]) -> Self {
        self.files.push(FixtureFile {
            path: path.to_string(),
            data: data.to_vec(),
            compress: false,
        });
        self
    }

    /// Add a zlib-compressed file.
    pub fn add_file_compressed(mut self, path: &str, data: &[u8]) -> Self {
        self.files.push(FixtureFile {
            path: path.to_string(),
            data: data.to_vec(),
            compress: true,
        });
        self
    }

    fn method_field(&self, compress: bool) -> u32 {
        if !compress {
            0
        } else if self.version >= 8 {
            1 // slot 1 of the footer name table
        } else {
            0x01 // legacy zlib flag
        }
    }

    fn record_len(&self, method: u32, block_count: usize) -> u64 {
        let mut len = 8 + 8 + 8 + 4 + 20;
        if method != 0 {
            len += 4 + 16 * block_count as u64;
        }
        len + 1 + 4
    }

    /// One prepared entry: the record fields plus the on-disk body.
    fn prepare(&self, file: &FixtureFile) -> PreparedEntry {
        let encrypted = self.encrypt_entries;
        let key = self.key.map(|(_, k)| k);

        if file.compress {
            let mut spans = Vec::new();
            let mut body = Vec::new();
            let mut cursor = 0u64;
            let mut compressed_total = 0u64;
            for chunk in file.data.chunks(self.compression_block_size as usize) {
                let mut stored = zlib_compress(chunk);
                let exact = stored.len() as u64;
                spans.push((cursor, cursor + exact));
                if encrypted {
                    pad_and_encrypt(&mut stored, &key.expect("key set"));
                    cursor += align_up_16(exact);
                    compressed_total += align_up_16(exact);
                } else {
                    cursor += exact;
                    compressed_total += exact;
                }
                body.extend_from_slice(&stored);
            }
            PreparedEntry {
                compressed_size: compressed_total,
                uncompressed_size: file.data.len() as u64,
                method: self.method_field(true),
                spans,
                encrypted,
                body,
            }
        } else {
            let mut body = file.data.clone();
            let compressed_size = if encrypted {
                pad_and_encrypt(&mut body, &key.expect("key set"));
                align_up_16(file.data.len() as u64)
            } else {
                file.data.len() as u64
            };
            PreparedEntry {
                compressed_size,
                uncompressed_size: file.data.len() as u64,
                method: 0,
                spans: Vec::new(),
                encrypted,
                body,
            }
        }
    }

    /// Write a legacy entry record. `entry_offset` is where the record
    /// sits in the file (used for pre-v5 absolute block offsets);
    /// `offset_field` is the value stored in the record itself.
    fn write_record(
        &self,
        out: &mut Vec<u8>,
        prepared: &PreparedEntry,
        offset_field: u64,
        entry_offset: u64,
    ) {
        let record_len = self.record_len(prepared.method, prepared.spans.len());
        out.write_i64::<LE>(offset_field as i64).unwrap();
        out.write_i64::<LE>(prepared.compressed_size as i64).unwrap();
        out.write_i64::<LE>(prepared.uncompressed_size as i64).unwrap();
        out.write_u32::<LE>(prepared.method).unwrap();
        out.extend_from_slice(&[0u8; 20]);
        if prepared.method != 0 {
            out.write_u32::<LE>(prepared.spans.len() as u32).unwrap();
            let base = if self.version >= 5 {
                record_len
            } else {
                entry_offset + record_len
            };
            for &(start, end) in &prepared.spans {
                out.write_u64::<LE>(base + start).unwrap();
                out.write_u64::<LE>(base + end).unwrap();
            }
        }
        out.push(u8::from(prepared.encrypted));
        out.write_u32::<LE>(self.compression_block_size).unwrap();
    }

    fn write_encoded_record(&self, out: &mut Vec<u8>, prepared: &PreparedEntry, offset: u64) {
        let mut bits = 0u32;
        bits |= (prepared.method & 0x3F) << 23;
        if prepared.encrypted {
            bits |= 1 << 22;
        }
        bits |= (prepared.spans.len() as u32 & 0xFFFF) << 6;

        let quantum = self.compression_block_size >> 11;
        let quantum_fits =
            quantum << 11 == self.compression_block_size && quantum < 0x3F;
        if quantum_fits && prepared.method != 0 {
            bits |= quantum;
        } else if prepared.method != 0 {
            bits |= 0x3F;
        }

        let offset_32 = u32::try_from(offset).is_ok();
        let uncompressed_32 = u32::try_from(prepared.uncompressed_size).is_ok();
        let compressed_32 = u32::try_from(prepared.compressed_size).is_ok();
        if offset_32 {
            bits |= 1 << 31;
        }
        if uncompressed_32 {
            bits |= 1 << 30;
        }
        if compressed_32 {
            bits |= 1 << 29;
        }

        out.write_u32::<LE>(bits).unwrap();
        if prepared.method != 0 && !quantum_fits {
            out.write_u32::<LE>(self.compression_block_size).unwrap();
        }
        if offset_32 {
            out.write_u32::<LE>(offset as u32).unwrap();
        } else {
            out.write_u64::<LE>(offset).unwrap();
        }
        if uncompressed_32 {
            out.write_u32::<LE>(prepared.uncompressed_size as u32).unwrap();
        } else {
            out.write_u64::<LE>(prepared.uncompressed_size).unwrap();
        }
        if prepared.method != 0 {
            if compressed_32 {
                out.write_u32::<LE>(prepared.compressed_size as u32).unwrap();
            } else {
                out.write_u64::<LE>(prepared.compressed_size).unwrap();
            }
            if !(prepared.spans.len() == 1 && !prepared.encrypted) {
                for &(start, end) in &prepared.spans {
                    out.write_u32::<LE>((end - start) as u32).unwrap();
                }
            }
        }
    }

    /// Serialize the archive.
    pub fn build(&self) -> Vec<u8> {
        let mut pak = Vec::new();
        let mut prepared_entries = Vec::with_capacity(self.files.len());

        for file in &self.files {
            let prepared = self.prepare(file);
            let entry_offset = pak.len() as u64;
            self.write_record(&mut pak, &prepared, 0, entry_offset);
            pak.extend_from_slice(&prepared.body);
            prepared_entries.push((entry_offset, prepared));
        }

        let index_offset = pak.len() as u64;
        let (index_buf, trailing) = if self.version >= 10 {
            self.build_modern_index(&prepared_entries, index_offset)
        } else {
            (self.build_legacy_index(&prepared_entries), Vec::new())
        };

        let index_size = index_buf.len() as u64;
        pak.extend_from_slice(&index_buf);
        pak.extend_from_slice(&trailing);

        self.write_footer(&mut pak, index_offset, index_size);
        pak
    }

    /// Write the archive to a file.
    pub fn write_to(&self, path: &std::path::Path) -> std::io::Result<()> {
        std::fs::write(path, self.build())
    }

    fn build_legacy_index(&self, entries: &[(u64, PreparedEntry)]) -> Vec<u8> {
        let mut index = Vec::new();
        write_unreal_string(&mut index, &self.mount_point);
        index.write_u32::<LE>(entries.len() as u32).unwrap();
        for (file, (entry_offset, prepared)) in self.files.iter().zip(entries) {
            write_unreal_string(&mut index, &file.path);
            self.write_record(&mut index, prepared, *entry_offset, *entry_offset);
        }
        if self.encrypt_index {
            let (_, key) = self.key.expect("key set");
            pad_and_encrypt(&mut index, &key);
        }
        index
    }

    /// v10+ layout: index header with path-hash / full-directory
    /// envelopes, followed (outside the header blob) by the two
    /// secondary indices.
    fn build_modern_index(
        &self,
        entries: &[(u64, PreparedEntry)],
        index_offset: u64,
    ) -> (Vec<u8>, Vec<u8>) {
        use std::collections::BTreeMap;

        let path_hash_seed = 0x5EEDu64;

        let mut encoded = Vec::new();
        let mut encoded_offsets = Vec::with_capacity(entries.len());
        for (entry_offset, prepared) in entries {
            encoded_offsets.push(encoded.len() as u32);
            self.write_encoded_record(&mut encoded, prepared, *entry_offset);
        }

        // Path-hash index: entry count, (hash, encoded offset) pairs.
        let mut phi = Vec::new();
        phi.write_u32::<LE>(entries.len() as u32).unwrap();
        for (file, offset) in self.files.iter().zip(&encoded_offsets) {
            phi.write_u64::<LE>(fnv64_path(&file.path, path_hash_seed)).unwrap();
            phi.write_u32::<LE>(*offset).unwrap();
        }
        phi.write_u32::<LE>(0).unwrap();

        // Full directory index: directory -> file -> encoded offset.
        let mut fdi_tree: BTreeMap<String, BTreeMap<String, u32>> = BTreeMap::new();
        for (file, offset) in self.files.iter().zip(&encoded_offsets) {
            let (dir, name) = match file.path.rfind('/') {
                Some(pos) => (&file.path[..=pos], &file.path[pos + 1..]),
                None => ("/", file.path.as_str()),
            };
            fdi_tree
                .entry(dir.to_string())
                .or_default()
                .insert(name.to_string(), *offset);
        }
        let mut fdi = Vec::new();
        fdi.write_u32::<LE>(fdi_tree.len() as u32).unwrap();
        for (dir, files) in &fdi_tree {
            write_unreal_string(&mut fdi, dir);
            fdi.write_u32::<LE>(files.len() as u32).unwrap();
            for (name, offset) in files {
                write_unreal_string(&mut fdi, name);
                fdi.write_i32::<LE>(*offset as i32).unwrap();
            }
        }

        if self.encrypt_index {
            let (_, key) = self.key.expect("key set");
            pad_and_encrypt(&mut phi, &key);
            pad_and_encrypt(&mut fdi, &key);
        }

        // The index header blob references the secondary indices by
        // absolute offset, which depends on its own padded size.
        let mut header_len = 0u64;
        header_len += 4 + self.mount_point.len() as u64 + 1;
        header_len += 4; // entry count
        header_len += 8; // path hash seed
        header_len += 4 + 8 + 8 + 20; // PHI envelope
        header_len += 4 + 8 + 8 + 20; // FDI envelope
        header_len += 4 + encoded.len() as u64;
        header_len += 4; // plain entry count
        let padded_header_len = if self.encrypt_index {
            align_up_16(header_len)
        } else {
            header_len
        };

        let phi_offset = index_offset + padded_header_len;
        let fdi_offset = phi_offset + phi.len() as u64;

        let mut index = Vec::new();
        write_unreal_string(&mut index, &self.mount_point);
        index.write_u32::<LE>(entries.len() as u32).unwrap();
        index.write_u64::<LE>(path_hash_seed).unwrap();
        index.write_u32::<LE>(1).unwrap();
        index.write_u64::<LE>(phi_offset).unwrap();
        index.write_u64::<LE>(phi.len() as u64).unwrap();
        index.extend_from_slice(&[0u8; 20]);
        index.write_u32::<LE>(1).unwrap();
        index.write_u64::<LE>(fdi_offset).unwrap();
        index.write_u64::<LE>(fdi.len() as u64).unwrap();
        index.extend_from_slice(&[0u8; 20]);
        index.write_u32::<LE>(encoded.len() as u32).unwrap();
        index.extend_from_slice(&encoded);
        index.write_u32::<LE>(0).unwrap();
        debug_assert_eq!(index.len() as u64, header_len);

        if self.encrypt_index {
            let (_, key) = self.key.expect("key set");
            pad_and_encrypt(&mut index, &key);
        }

        let mut trailing = phi;
        trailing.extend_from_slice(&fdi);
        (index, trailing)
    }

    fn write_footer(&self, pak: &mut Vec<u8>, index_offset: u64, index_size: u64) {
        if self.version >= 7 {
            let guid = self.key.map(|(g, _)| g).unwrap_or(Guid::ZERO);
            pak.extend_from_slice(&guid.to_bytes());
        }
        if self.version >= 4 {
            pak.push(u8::from(self.encrypt_index));
        }
        pak.write_u32::<LE>(PAK_MAGIC).unwrap();
        pak.write_u32::<LE>(self.version).unwrap();
        pak.write_i64::<LE>(index_offset as i64).unwrap();
        pak.write_i64::<LE>(index_size as i64).unwrap();
        pak.extend_from_slice(&[0u8; 20]);
        if self.version == 9 {
            pak.push(0); // frozen
        }
        let name_slots: usize = match self.version {
            0..=7 => 0,
            8 => 4,
            _ => 5,
        };
        for slot in 0..name_slots {
            let mut bytes = [0u8; 32];
            if slot == 0 {
                bytes[..4].copy_from_slice(b"Zlib");
            }
            pak.extend_from_slice(&bytes);
        }
    }
}

struct PreparedEntry {
    compressed_size: u64,
    uncompressed_size: u64,
    method: u32,
    /// Body-relative spans with exact (unpadded) compressed sizes
    spans: Vec<(u64, u64)>,
    encrypted: bool,
    body: Vec<u8>,
}

fn fnv64(data: impl IntoIterator<Item = u8>, offset: u64) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET.wrapping_add(offset);
    for b in data {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn fnv64_path(path: &str, seed: u64) -> u64 {
    let lower = path.to_lowercase();
    fnv64(lower.encode_utf16().flat_map(u16::to_le_bytes), seed)
}
