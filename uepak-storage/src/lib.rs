//! Read-only runtime for Unreal Engine archive containers.
//!
//! Two container families are supported behind one interface:
//! - **PAK**: the legacy single-file, trailer-indexed archive
//!   (versions 1–11), optionally AES-encrypted and per-entry
//!   compressed.
//! - **IoStore**: the `.utoc` table of contents plus one or more
//!   `.ucas` content files, with perfect-hash chunk lookup and
//!   partitioned addressing.
//!
//! An archive is opened once, building an immutable in-memory index;
//! every extraction is then a pure function of that index and the
//! on-disk bytes. Key material lives in a shared
//! [`KeyStore`](uepak_crypto::KeyStore) and decompressors in a shared
//! [`CodecRegistry`](uepak_codec::CodecRegistry), both passed in at
//! open time.

pub mod archive;
pub mod cancel;
pub mod config;
pub mod error;
pub mod extract;
pub mod iostore;
pub mod pak;
pub mod reader;

pub use archive::{open, EntryLocator, FileEntry, IoStoreArchive, PakArchive, UArchive};
pub use cancel::{CancelSignal, CancelToken};
pub use config::{EngineVersion, OpenOptions};
pub use error::{ArchiveError, Result};
pub use iostore::{ChunkId, IoStoreToc, TocVersion};
pub use pak::{PakIndex, PakVersion};
pub use reader::{ByteReader, ContainerFile};

use std::path::Path;
use std::sync::Arc;

use uepak_codec::CodecRegistry;
use uepak_crypto::KeyStore;

/// Open a `.pak` archive.
pub fn open_pak(
    path: &Path,
    keys: Arc<KeyStore>,
    codecs: Arc<CodecRegistry>,
    options: OpenOptions,
) -> Result<PakArchive> {
    PakArchive::open(path, keys, codecs, options)
}

/// Open an IoStore container pair given the base path without
/// extension (`base.utoc` plus its CAS partitions).
pub fn open_iostore(
    base: &Path,
    keys: Arc<KeyStore>,
    codecs: Arc<CodecRegistry>,
    engine: EngineVersion,
    options: OpenOptions,
) -> Result<IoStoreArchive> {
    IoStoreArchive::open(base, keys, codecs, engine, options)
}
