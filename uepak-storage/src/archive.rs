//! The archive facade: one read-only interface over both container
//! families.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};
use regex::Regex;
use tracing::{debug, info};
use uepak_codec::CodecRegistry;
use uepak_crypto::{decrypt_ecb_in_place, KeyStore};

use crate::cancel::{CancelSignal, NeverCancelled};
use crate::config::{EngineVersion, OpenOptions};
use crate::error::{ArchiveError, Result};
use crate::extract::{extract_iostore_chunk, extract_pak_entry};
use crate::iostore::directory::DirectoryIndex;
use crate::iostore::toc::{IoStoreToc, OffsetAndLength};
use crate::iostore::ChunkId;
use crate::pak::entry::PakEntry;
use crate::pak::footer::Footer;
use crate::pak::index::PakIndex;
use crate::reader::ContainerFile;

/// Where an entry's bytes come from.
#[derive(Debug, Clone)]
pub enum EntryLocator {
    /// PAK entry record at this absolute offset
    Pak {
        /// Offset of the entry record in the `.pak` file
        offset: u64,
    },
    /// IoStore chunk
    IoStore {
        /// The chunk's 12-byte identifier
        chunk_id: ChunkId,
    },
}

/// The facade's unified view of one archived file.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Logical path (original casing; lookups are case-insensitive)
    pub path: String,
    /// Uncompressed size in bytes
    pub uncompressed_size: u64,
    /// Compressed size in bytes (equal to the uncompressed size for
    /// stored entries)
    pub compressed_size: u64,
    /// Whether any of the entry's blocks are compressed
    pub compressed: bool,
    /// Whether the entry's data is encrypted
    pub encrypted: bool,
    /// Compression-method name (`none` for stored entries)
    pub compression_method: String,
    /// Source-specific locator
    pub locator: EntryLocator,
}

/// Read-only archive interface over either container family.
///
/// Lookups are case-insensitive. `has` and `info` answer from the
/// in-memory index (`false`/`None` after close); everything that does
/// I/O fails with [`ArchiveError::Closed`] once [`UArchive::close`]
/// has run.
pub trait UArchive: Send + Sync + std::fmt::Debug {
    /// Archive name (the file stem).
    fn name(&self) -> &str;

    /// Whether any part of the archive requires a decryption key.
    fn is_encrypted(&self) -> bool;

    /// Number of addressable entries.
    fn file_count(&self) -> usize;

    /// Container format version.
    fn version(&self) -> u32;

    /// Mount-point prefix of the archive's paths (empty when unknown).
    fn mount_point(&self) -> &str;

    /// Entries matching a glob (`*` and `?` only); all entries when
    /// `pattern` is `None`.
    fn list(&self, pattern: Option<&str>) -> Result<Vec<FileEntry>>;

    /// Whether a path exists in the archive.
    fn has(&self, path: &str) -> bool;

    /// Metadata for one path.
    fn info(&self, path: &str) -> Option<FileEntry>;

    /// Decrypted, decompressed bytes of one entry.
    fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Like [`UArchive::get`], cancellable at compression-block
    /// boundaries.
    fn get_with_cancel(&self, path: &str, cancel: &dyn CancelSignal) -> Result<Vec<u8>>;

    /// Release file handles. Blocks until in-flight reads drain;
    /// idempotent.
    fn close(&self);
}

/// Open an archive by path, dispatching on the `.pak` / `.utoc`
/// extension.
pub fn open(
    path: &Path,
    keys: Arc<KeyStore>,
    codecs: Arc<CodecRegistry>,
    options: OpenOptions,
) -> Result<Box<dyn UArchive>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("pak") => Ok(Box::new(PakArchive::open(path, keys, codecs, options)?)),
        Some("utoc") => {
            let base = path.with_extension("");
            Ok(Box::new(IoStoreArchive::open(
                &base,
                keys,
                codecs,
                EngineVersion::Ue5,
                options,
            )?))
        }
        _ => Err(ArchiveError::format(format!(
            "unrecognized archive extension in {path:?}"
        ))),
    }
}

/// Translate a `*`/`?` glob into an anchored case-insensitive regex.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push_str("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr)
        .map_err(|e| ArchiveError::format(format!("bad glob pattern {pattern:?}: {e}")))
}

/// Open/Closed state with in-flight operation draining.
///
/// `close` flips the flag and then waits for every operation that
/// already began; new operations are refused as soon as the flag is
/// set, so the wait terminates.
#[derive(Debug)]
struct Lifecycle {
    closed: AtomicBool,
    in_flight: Mutex<usize>,
    drained: Condvar,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            in_flight: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn begin(&self) -> Result<OpGuard<'_>> {
        let mut count = self.in_flight.lock();
        if self.is_closed() {
            return Err(ArchiveError::Closed);
        }
        *count += 1;
        Ok(OpGuard { lifecycle: self })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut count = self.in_flight.lock();
        while *count > 0 {
            self.drained.wait(&mut count);
        }
    }
}

struct OpGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.lifecycle.in_flight.lock();
        *count -= 1;
        if *count == 0 {
            self.lifecycle.drained.notify_all();
        }
    }
}

fn check_size_limit(size: u64, options: &OpenOptions) -> Result<()> {
    if let Some(limit) = options.max_file_size {
        if size > limit {
            return Err(ArchiveError::FileTooLarge { size, limit });
        }
    }
    Ok(())
}

fn archive_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// A mounted `.pak` archive.
#[derive(Debug)]
pub struct PakArchive {
    name: String,
    index: PakIndex,
    encrypted: bool,
    file: RwLock<Option<Arc<ContainerFile>>>,
    keys: Arc<KeyStore>,
    codecs: Arc<CodecRegistry>,
    options: OpenOptions,
    lifecycle: Lifecycle,
}

impl PakArchive {
    /// Open a PAK archive and decode its index.
    pub fn open(
        path: &Path,
        keys: Arc<KeyStore>,
        codecs: Arc<CodecRegistry>,
        options: OpenOptions,
    ) -> Result<Self> {
        let file = ContainerFile::open(path)?;
        let footer = Footer::locate(&file)?;
        let index = PakIndex::parse(&file, &footer, &keys)?;
        let encrypted =
            footer.encrypted_index || index.iter().any(|(_, entry)| entry.encrypted);

        info!(
            "Opened PAK {:?}: v{}, {} entries, mount point {:?}",
            path,
            index.version.as_u32(),
            index.len(),
            index.mount_point
        );
        if options.verbose {
            debug!(
                "PAK {:?}: methods {:?}, encrypted index: {}",
                path, index.methods, footer.encrypted_index
            );
        }

        Ok(Self {
            name: archive_name(path),
            index,
            encrypted,
            file: RwLock::new(Some(Arc::new(file))),
            keys,
            codecs,
            options,
            lifecycle: Lifecycle::new(),
        })
    }

    fn file_handle(&self) -> Result<Arc<ContainerFile>> {
        self.file.read().clone().ok_or(ArchiveError::Closed)
    }

    /// Number of physical reads served so far (0 once closed).
    pub fn read_ops(&self) -> u64 {
        self.file.read().as_ref().map_or(0, |f| f.read_ops())
    }

    fn file_entry(&self, display: &str, entry: &PakEntry) -> FileEntry {
        let method = self
            .index
            .methods
            .get(entry.compression_slot as usize)
            .cloned()
            .unwrap_or_else(|| format!("#{}", entry.compression_slot));
        FileEntry {
            path: display.to_string(),
            uncompressed_size: entry.uncompressed_size,
            compressed_size: entry.compressed_size,
            compressed: entry.compression_slot != 0,
            encrypted: entry.encrypted,
            compression_method: method,
            locator: EntryLocator::Pak {
                offset: entry.offset,
            },
        }
    }
}

impl UArchive for PakArchive {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    fn file_count(&self) -> usize {
        self.index.len()
    }

    fn version(&self) -> u32 {
        self.index.version.as_u32()
    }

    fn mount_point(&self) -> &str {
        &self.index.mount_point
    }

    fn list(&self, pattern: Option<&str>) -> Result<Vec<FileEntry>> {
        let _guard = self.lifecycle.begin()?;
        let matcher = pattern.map(glob_to_regex).transpose()?;
        Ok(self
            .index
            .iter()
            .filter(|(path, _)| matcher.as_ref().map_or(true, |m| m.is_match(path)))
            .map(|(path, entry)| self.file_entry(path, entry))
            .collect())
    }

    fn has(&self, path: &str) -> bool {
        !self.lifecycle.is_closed() && self.index.find(path).is_some()
    }

    fn info(&self, path: &str) -> Option<FileEntry> {
        if self.lifecycle.is_closed() {
            return None;
        }
        let (display, entry) = self.index.find(path)?;
        Some(self.file_entry(display, entry))
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.get_with_cancel(path, &NeverCancelled)
    }

    fn get_with_cancel(&self, path: &str, cancel: &dyn CancelSignal) -> Result<Vec<u8>> {
        let _guard = self.lifecycle.begin()?;
        let file = self.file_handle()?;
        let (_, entry) = self.index.find(path).ok_or_else(|| ArchiveError::NotFound {
            path: path.to_string(),
        })?;
        check_size_limit(entry.uncompressed_size, &self.options)?;
        extract_pak_entry(&file, &self.index, entry, &self.keys, &self.codecs, cancel)
    }

    fn close(&self) {
        self.lifecycle.close();
        *self.file.write() = None;
    }
}

/// A mounted IoStore container pair (`.utoc` + `.ucas` partitions).
#[derive(Debug)]
pub struct IoStoreArchive {
    name: String,
    toc: IoStoreToc,
    engine: EngineVersion,
    mount_point: String,
    paths: Vec<(String, u32)>,
    by_lower: HashMap<String, usize>,
    partitions: RwLock<Option<Arc<Vec<ContainerFile>>>>,
    keys: Arc<KeyStore>,
    codecs: Arc<CodecRegistry>,
    options: OpenOptions,
    lifecycle: Lifecycle,
}

impl IoStoreArchive {
    /// Open a container given its base path without extension; reads
    /// `base.utoc` and opens every CAS partition up front.
    pub fn open(
        base: &Path,
        keys: Arc<KeyStore>,
        codecs: Arc<CodecRegistry>,
        engine: EngineVersion,
        options: OpenOptions,
    ) -> Result<Self> {
        let toc_path = base.with_extension("utoc");
        let toc_data = std::fs::read(&toc_path)?;
        let toc = IoStoreToc::parse(&toc_data)?;

        let mut partitions = Vec::with_capacity(toc.partition_count as usize);
        for i in 0..toc.partition_count {
            let path = partition_path(base, i);
            match ContainerFile::open(&path) {
                Ok(file) => partitions.push(file),
                Err(ArchiveError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ArchiveError::PartitionMissing { index: i });
                }
                Err(e) => return Err(e),
            }
        }

        // Real paths come only from the directory index; without it,
        // every chunk gets a synthesized name that remains a valid
        // lookup key.
        let mut mount_point = String::new();
        let mut paths: Option<Vec<(String, u32)>> = None;
        if options.load_directory_index {
            if let Some(blob) = &toc.directory_index {
                let mut blob = blob.clone();
                if toc.is_encrypted() {
                    let key =
                        keys.get(&toc.encryption_guid)
                            .ok_or(ArchiveError::KeyMissing {
                                guid: toc.encryption_guid,
                            })?;
                    decrypt_ecb_in_place(&mut blob, &key)?;
                }
                let directory = DirectoryIndex::parse(&blob)?;
                mount_point = directory.mount_point;
                paths = Some(directory.files);
            }
        }
        let paths = paths.unwrap_or_else(|| {
            toc.chunk_ids
                .iter()
                .enumerate()
                .map(|(i, id)| (format!("chunk_{id}.uasset"), i as u32))
                .collect()
        });

        let by_lower = paths
            .iter()
            .enumerate()
            .map(|(slot, (path, _))| (path.to_lowercase(), slot))
            .collect();

        info!(
            "Opened IoStore {:?}: TOC v{}, {} chunks, {} partitions",
            toc_path,
            toc.version as u8,
            toc.len(),
            toc.partition_count
        );
        if options.verbose {
            debug!(
                "IoStore {:?}: methods {:?}, flags {:?}, block size {}",
                toc_path, toc.methods, toc.flags, toc.compression_block_size
            );
        }

        Ok(Self {
            name: archive_name(base),
            toc,
            engine,
            mount_point,
            paths,
            by_lower,
            partitions: RwLock::new(Some(Arc::new(partitions))),
            keys,
            codecs,
            options,
            lifecycle: Lifecycle::new(),
        })
    }

    /// Engine lineage this container was opened as.
    pub fn engine(&self) -> EngineVersion {
        self.engine
    }

    /// All chunk IDs in TOC order.
    pub fn chunk_ids(&self) -> &[ChunkId] {
        &self.toc.chunk_ids
    }

    /// Whether the TOC knows this chunk.
    pub fn contains_chunk(&self, id: &ChunkId) -> bool {
        self.toc.chunk_index(id).is_some()
    }

    /// Materialize a chunk by identifier instead of by path.
    pub fn get_chunk(&self, id: &ChunkId) -> Result<Vec<u8>> {
        self.get_chunk_with_cancel(id, &NeverCancelled)
    }

    /// Like [`IoStoreArchive::get_chunk`], cancellable at block
    /// boundaries.
    pub fn get_chunk_with_cancel(
        &self,
        id: &ChunkId,
        cancel: &dyn CancelSignal,
    ) -> Result<Vec<u8>> {
        let _guard = self.lifecycle.begin()?;
        let index = self.toc.chunk_index(id).ok_or_else(|| ArchiveError::NotFound {
            path: id.to_string(),
        })?;
        self.extract_index(index, cancel)
    }

    fn partitions_handle(&self) -> Result<Arc<Vec<ContainerFile>>> {
        self.partitions.read().clone().ok_or(ArchiveError::Closed)
    }

    /// Number of physical CAS reads served so far (0 once closed).
    pub fn read_ops(&self) -> u64 {
        self.partitions
            .read()
            .as_ref()
            .map_or(0, |p| p.iter().map(ContainerFile::read_ops).sum())
    }

    fn extract_index(&self, index: u32, cancel: &dyn CancelSignal) -> Result<Vec<u8>> {
        let range = self
            .toc
            .chunk_range(index)
            .ok_or_else(|| ArchiveError::corrupt("chunk index past offset table"))?;
        check_size_limit(range.length, &self.options)?;
        let partitions = self.partitions_handle()?;
        extract_iostore_chunk(
            &self.toc,
            &partitions,
            range,
            &self.keys,
            &self.codecs,
            cancel,
        )
    }

    /// Compressed footprint and dominant method of a chunk's covering
    /// blocks.
    fn block_summary(&self, range: OffsetAndLength) -> (u64, bool, String) {
        if range.length == 0 {
            return (0, false, "none".to_string());
        }
        let block_size = u64::from(self.toc.compression_block_size);
        let first = (range.offset / block_size) as usize;
        let last = ((range.offset + range.length - 1) / block_size) as usize;

        let mut compressed_size = 0u64;
        let mut method_index = 0u8;
        for block in self
            .toc
            .compression_blocks
            .iter()
            .skip(first)
            .take(last - first + 1)
        {
            compressed_size += u64::from(block.compressed_size);
            if method_index == 0 {
                method_index = block.method_index;
            }
        }
        let method = self
            .toc
            .methods
            .get(method_index as usize)
            .cloned()
            .unwrap_or_else(|| format!("#{method_index}"));
        (compressed_size, method_index != 0, method)
    }

    fn file_entry(&self, display: &str, toc_index: u32) -> Option<FileEntry> {
        let range = self.toc.chunk_range(toc_index)?;
        let chunk_id = *self.toc.chunk_ids.get(toc_index as usize)?;
        let (compressed_size, compressed, method) = self.block_summary(range);
        Some(FileEntry {
            path: display.to_string(),
            uncompressed_size: range.length,
            compressed_size,
            compressed,
            encrypted: self.toc.is_encrypted(),
            compression_method: method,
            locator: EntryLocator::IoStore { chunk_id },
        })
    }
}

fn partition_path(base: &Path, index: u32) -> PathBuf {
    let mut os = base.as_os_str().to_os_string();
    if index == 0 {
        os.push(".ucas");
    } else {
        os.push(format!("_s{index}.ucas"));
    }
    PathBuf::from(os)
}

impl UArchive for IoStoreArchive {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_encrypted(&self) -> bool {
        self.toc.is_encrypted()
    }

    fn file_count(&self) -> usize {
        self.paths.len()
    }

    fn version(&self) -> u32 {
        self.toc.version as u32
    }

    fn mount_point(&self) -> &str {
        &self.mount_point
    }

    fn list(&self, pattern: Option<&str>) -> Result<Vec<FileEntry>> {
        let _guard = self.lifecycle.begin()?;
        let matcher = pattern.map(glob_to_regex).transpose()?;
        Ok(self
            .paths
            .iter()
            .filter(|(path, _)| matcher.as_ref().map_or(true, |m| m.is_match(path)))
            .filter_map(|(path, index)| self.file_entry(path, *index))
            .collect())
    }

    fn has(&self, path: &str) -> bool {
        !self.lifecycle.is_closed() && self.by_lower.contains_key(&path.to_lowercase())
    }

    fn info(&self, path: &str) -> Option<FileEntry> {
        if self.lifecycle.is_closed() {
            return None;
        }
        let slot = *self.by_lower.get(&path.to_lowercase())?;
        let (display, toc_index) = &self.paths[slot];
        self.file_entry(display, *toc_index)
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.get_with_cancel(path, &NeverCancelled)
    }

    fn get_with_cancel(&self, path: &str, cancel: &dyn CancelSignal) -> Result<Vec<u8>> {
        let _guard = self.lifecycle.begin()?;
        let slot = *self
            .by_lower
            .get(&path.to_lowercase())
            .ok_or_else(|| ArchiveError::NotFound {
                path: path.to_string(),
            })?;
        let toc_index = self.paths[slot].1;
        self.extract_index(toc_index, cancel)
    }

    fn close(&self) {
        self.lifecycle.close();
        *self.partitions.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_to_regex() {
        let m = glob_to_regex("*.uasset").unwrap();
        assert!(m.is_match("/Game/Hero.uasset"));
        assert!(m.is_match("/Game/HERO.UASSET"));
        assert!(!m.is_match("/Game/Hero.umap"));

        let m = glob_to_regex("/game/?.txt").unwrap();
        assert!(m.is_match("/Game/A.txt"));
        assert!(!m.is_match("/Game/AB.txt"));

        // Regex metacharacters in the pattern are literals.
        let m = glob_to_regex("a+b.txt").unwrap();
        assert!(m.is_match("a+b.txt"));
        assert!(!m.is_match("aab.txt"));
    }

    #[test]
    fn test_glob_is_anchored() {
        let m = glob_to_regex("*.txt").unwrap();
        assert!(!m.is_match("file.txt.bak"));
        let m = glob_to_regex("game").unwrap();
        assert!(!m.is_match("game/file"));
    }

    #[test]
    fn test_lifecycle_drain_and_idempotent_close() {
        let lifecycle = Lifecycle::new();
        {
            let _op = lifecycle.begin().unwrap();
        }
        lifecycle.close();
        assert!(matches!(lifecycle.begin(), Err(ArchiveError::Closed)));
        // Idempotent.
        lifecycle.close();
    }

    #[test]
    fn test_lifecycle_close_waits_for_inflight() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let lifecycle = Arc::new(Lifecycle::new());
        let finished = Arc::new(AtomicBool::new(false));

        let op = lifecycle.begin().unwrap();
        let closer = {
            let lifecycle = Arc::clone(&lifecycle);
            let finished = Arc::clone(&finished);
            std::thread::spawn(move || {
                lifecycle.close();
                finished.store(true, Ordering::SeqCst);
            })
        };

        // The closer cannot finish while the operation is in flight.
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!finished.load(Ordering::SeqCst));

        drop(op);
        closer.join().unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_partition_path() {
        let base = Path::new("/data/pakchunk0-global");
        assert_eq!(
            partition_path(base, 0),
            PathBuf::from("/data/pakchunk0-global.ucas")
        );
        assert_eq!(
            partition_path(base, 2),
            PathBuf::from("/data/pakchunk0-global_s2.ucas")
        );
    }
}
