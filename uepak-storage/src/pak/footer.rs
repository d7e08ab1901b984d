//! The PAK footer: trailer record locating the index.

use tracing::{debug, trace};
use uepak_crypto::Guid;

use crate::error::{ArchiveError, Result};
use crate::pak::version::PakVersion;
use crate::reader::{ByteReader, ContainerFile};

/// Magic value at the footer's version-dependent offset.
pub const PAK_MAGIC: u32 = 0x5A6F_12E1;

/// Decoded PAK footer.
#[derive(Debug)]
pub struct Footer {
    /// Format version
    pub version: PakVersion,
    /// Encryption-key GUID (zero before v7)
    pub encryption_guid: Guid,
    /// Whether the index blob is AES-encrypted
    pub encrypted_index: bool,
    /// Absolute offset of the index blob
    pub index_offset: u64,
    /// Size of the index blob in bytes
    pub index_size: u64,
    /// SHA-1 of the index blob (recorded, not verified)
    pub index_hash: [u8; 20],
    /// Frozen-index flag (v9 only)
    pub frozen: bool,
    /// Compression-method names from the footer table (v8+), in slot
    /// order with empty slots dropped
    pub compression_names: Vec<String>,
}

impl Footer {
    /// Locate and decode the footer at the end of a PAK file.
    ///
    /// The footer size depends on the version, which is only known
    /// once the footer is read; the scan therefore probes candidate
    /// sizes newest-version-first and accepts the first candidate
    /// whose magic and version field both check out. This is the one
    /// locally recovered error in the decoder.
    pub fn locate(file: &ContainerFile) -> Result<Self> {
        for version in PakVersion::ALL_NEWEST_FIRST {
            for &slots in version.footer_name_slots() {
                let size = version.footer_size(slots);
                if file.len() < size {
                    continue;
                }
                let tail = file.read_at(file.len() - size, size as usize)?;
                match Self::parse(&tail, version, slots) {
                    Ok(footer) => {
                        debug!(
                            "PAK footer: version {}, index {} bytes at {}",
                            version.as_u32(),
                            footer.index_size,
                            footer.index_offset
                        );
                        return Ok(footer);
                    }
                    Err(e) => {
                        trace!("Footer probe for v{} ({size} bytes) failed: {e}", version.as_u32());
                    }
                }
            }
        }
        Err(ArchiveError::format("no PAK footer found at any known size"))
    }

    /// Decode a footer from its trailing bytes, validating magic and
    /// version against the probe candidate.
    pub fn parse(tail: &[u8], version: PakVersion, name_slots: u32) -> Result<Self> {
        let mut reader = ByteReader::new(tail);

        let encryption_guid = if version >= PakVersion::EncryptionKeyGuid {
            reader.read_guid()?
        } else {
            Guid::ZERO
        };
        let encrypted_index =
            version >= PakVersion::IndexEncryption && reader.read_u8()? != 0;

        let magic = reader.read_u32()?;
        if magic != PAK_MAGIC {
            return Err(ArchiveError::format(format!(
                "bad footer magic {magic:#010x}"
            )));
        }
        let version_field = reader.read_u32()?;
        if version_field != version.as_u32() {
            return Err(ArchiveError::format(format!(
                "footer version {} does not match probed size for v{}",
                version_field,
                version.as_u32()
            )));
        }

        let index_offset = reader.read_i64()?;
        let index_size = reader.read_i64()?;
        if index_offset < 0 || index_size < 0 {
            return Err(ArchiveError::corrupt("negative index offset or size"));
        }
        let mut index_hash = [0u8; 20];
        index_hash.copy_from_slice(reader.read_bytes(20)?);

        let frozen = version == PakVersion::FrozenIndex && reader.read_u8()? != 0;

        let mut compression_names = Vec::new();
        for _ in 0..name_slots {
            let slot = reader.read_bytes(32)?;
            let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
            if end > 0 {
                let name = std::str::from_utf8(&slot[..end])
                    .map_err(|_| ArchiveError::corrupt("non-UTF-8 compression method name"))?;
                compression_names.push(name.to_string());
            }
        }

        Ok(Self {
            version,
            encryption_guid,
            encrypted_index,
            index_offset: index_offset as u64,
            index_size: index_size as u64,
            index_hash,
            frozen,
            compression_names,
        })
    }

    /// The index's compression-method table: slot 0 is always `none`.
    ///
    /// v8+ takes the names from the footer table; earlier versions use
    /// the fixed legacy assignment.
    pub fn method_table(&self) -> Vec<String> {
        let mut methods = vec!["none".to_string()];
        if self.version >= PakVersion::FnameBasedCompression {
            methods.extend(self.compression_names.iter().cloned());
        } else {
            methods.extend(["zlib", "gzip", "oodle"].map(String::from));
        }
        methods
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{WriteBytesExt, LE};
    use std::io::Write;

    fn write_footer(version: PakVersion, slots: u32, names: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        if version >= PakVersion::EncryptionKeyGuid {
            out.extend_from_slice(&[0u8; 16]);
        }
        if version >= PakVersion::IndexEncryption {
            out.push(0);
        }
        out.write_u32::<LE>(PAK_MAGIC).unwrap();
        out.write_u32::<LE>(version.as_u32()).unwrap();
        out.write_i64::<LE>(0x1000).unwrap();
        out.write_i64::<LE>(0x200).unwrap();
        out.write_all(&[0xAA; 20]).unwrap();
        if version == PakVersion::FrozenIndex {
            out.push(0);
        }
        for i in 0..slots as usize {
            let mut slot = [0u8; 32];
            if let Some(name) = names.get(i) {
                slot[..name.len()].copy_from_slice(name.as_bytes());
            }
            out.extend_from_slice(&slot);
        }
        out
    }

    #[test]
    fn test_parse_v8_with_names() {
        let tail = write_footer(PakVersion::FnameBasedCompression, 5, &["Zlib", "Oodle"]);
        assert_eq!(tail.len() as u64, PakVersion::FnameBasedCompression.footer_size(5));

        let footer = Footer::parse(&tail, PakVersion::FnameBasedCompression, 5).unwrap();
        assert_eq!(footer.index_offset, 0x1000);
        assert_eq!(footer.index_size, 0x200);
        assert_eq!(footer.compression_names, vec!["Zlib", "Oodle"]);
        assert_eq!(footer.method_table(), vec!["none", "Zlib", "Oodle"]);
    }

    #[test]
    fn test_legacy_method_table() {
        let tail = write_footer(PakVersion::CompressionEncryption, 0, &[]);
        let footer = Footer::parse(&tail, PakVersion::CompressionEncryption, 0).unwrap();
        assert_eq!(footer.method_table(), vec!["none", "zlib", "gzip", "oodle"]);
    }

    #[test]
    fn test_locate_probes_candidate_sizes() {
        // A v3 pak: 100 bytes of payload then a bare 44-byte footer.
        // The scan must fall through all the larger candidates first.
        let mut data = vec![0u8; 100];
        data.extend(write_footer(PakVersion::CompressionEncryption, 0, &[]));
        let file = ContainerFile::from_vec(data);

        let footer = Footer::locate(&file).unwrap();
        assert_eq!(footer.version, PakVersion::CompressionEncryption);
        assert!(!footer.encrypted_index);
    }

    #[test]
    fn test_locate_rejects_garbage() {
        let file = ContainerFile::from_vec(vec![0x5A; 512]);
        assert!(matches!(
            Footer::locate(&file),
            Err(ArchiveError::Format { .. })
        ));
    }

    #[test]
    fn test_bad_magic() {
        let mut tail = write_footer(PakVersion::CompressionEncryption, 0, &[]);
        tail[0] ^= 0xFF;
        assert!(Footer::parse(&tail, PakVersion::CompressionEncryption, 0).is_err());
    }
}
