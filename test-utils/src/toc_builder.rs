//! Synthetic IoStore container writer: a `.utoc` buffer plus its CAS
//! partition files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use byteorder::{WriteBytesExt, LE};
use uepak_crypto::Guid;

use crate::{align_up_16, pad_and_encrypt, write_unreal_string, zlib_compress};

const TOC_MAGIC: &[u8; 16] = b"-==--==--==--==-";
const NONE_INDEX: u32 = u32::MAX;

struct FixtureChunk {
    id: [u8; 12],
    logical_offset: Option<u64>,
    data: Vec<u8>,
    /// Index into the method table; 0 = stored
    method: u8,
    path: Option<String>,
}

/// Builds a `.utoc` / `.ucas` pair in memory.
///
/// Chunks are laid out in a logical address space (block-aligned by
/// default, or at caller-chosen offsets), carved into compression
/// blocks, optionally compressed/encrypted, and written across as many
/// CAS partitions as the partition size demands. TOC versions 1–5 are
/// supported; 4+ get a perfect-hash seed table built with the
/// bucket-seed search.
pub struct TocFixtureBuilder {
    version: u8,
    compression_block_size: u32,
    partition_size: u64,
    container_id: u64,
    key: Option<(Guid, [u8; 32])>,
    methods: Vec<String>,
    mount_point: String,
    chunks: Vec<FixtureChunk>,
}

impl TocFixtureBuilder {
    /// Start a builder for the given TOC version (1..=5).
    pub fn new(version: u8) -> Self {
        assert!((1..=5).contains(&version), "unsupported fixture version");
        Self {
            version,
            compression_block_size: 0x10000,
            partition_size: u64::MAX,
            container_id: 0xC0FF_EE00_0000_0001,
            key: None,
            methods: Vec::new(),
            mount_point: "../../../".to_string(),
            chunks: Vec::new(),
        }
    }

    pub fn compression_block_size(mut self, size: u32) -> Self {
        self.compression_block_size = size;
        self
    }

    pub fn partition_size(mut self, size: u64) -> Self {
        assert!(self.version >= 3, "partitions need the PartitionSize version");
        self.partition_size = size;
        self
    }

    pub fn mount_point(mut self, mount_point: &str) -> Self {
        self.mount_point = mount_point.to_string();
        self
    }

    /// Register a compression method name; returns its table index.
    pub fn method(mut self, name: &str) -> Self {
        self.methods.push(name.to_string());
        self
    }

    /// Encrypt container data (and the directory index) with this key.
    pub fn encrypt(mut self, guid: Guid, key: [u8; 32]) -> Self {
        assert!(!guid.is_zero(), "the zero GUID means unencrypted");
        self.key = Some((guid, key));
        self
    }

    /// Add a stored chunk at the next block-aligned offset.
    pub fn add_chunk(self, id: [u8; 12], data: &[u8]) -> Self {
        self.add_chunk_full(id, None, data, 0, None)
    }

    /// Add a stored chunk at an explicit logical offset.
    pub fn add_chunk_at(self, offset: u64, id: [u8; 12], data: &[u8]) -> Self {
        self.add_chunk_full(id, Some(offset), data, 0, None)
    }

    /// Add a chunk compressed with the given method-table index.
    pub fn add_chunk_compressed(self, id: [u8; 12], data: &[u8], method: u8) -> Self {
        self.add_chunk_full(id, None, data, method, None)
    }

    /// Add a stored chunk with a directory-index path.
    pub fn add_chunk_with_path(self, id: [u8; 12], data: &[u8], path: &str) -> Self {
        self.add_chunk_full(id, None, data, 0, Some(path))
    }

    /// Fully parameterized chunk registration.
    pub fn add_chunk_full(
        mut self,
        id: [u8; 12],
        logical_offset: Option<u64>,
        data: &[u8],
        method: u8,
        path: Option<&str>,
    ) -> Self {
        assert!(
            method as usize <= self.methods.len(),
            "method index past the registered method names"
        );
        self.chunks.push(FixtureChunk {
            id,
            logical_offset,
            data: data.to_vec(),
            method,
            path: path.map(str::to_string),
        });
        self
    }

    /// Serialize: returns the `.utoc` bytes and one buffer per CAS
    /// partition.
    pub fn build(&self) -> (Vec<u8>, Vec<Vec<u8>>) {
        let block_size = u64::from(self.compression_block_size);

        // Resolve logical placement in declaration order.
        let mut ranges = Vec::with_capacity(self.chunks.len());
        let mut cursor = 0u64;
        for chunk in &self.chunks {
            let offset = match chunk.logical_offset {
                Some(offset) => {
                    assert!(offset >= cursor, "explicit offsets must be increasing");
                    offset
                }
                None => align_up(cursor, block_size),
            };
            ranges.push((offset, chunk.data.len() as u64));
            cursor = offset + chunk.data.len() as u64;
        }
        let logical_end = cursor;

        // Table order: identity below PerfectHash, hash placement above.
        let (slot_to_chunk, seeds, overflow_slots) = if self.version >= 4 {
            build_perfect_hash(
                &self.chunks.iter().map(|c| c.id).collect::<Vec<_>>(),
                self.version >= 5,
            )
        } else {
            ((0..self.chunks.len()).collect(), Vec::new(), Vec::new())
        };

        // Materialize the logical address space to slice blocks from.
        let mut logical = vec![0u8; logical_end as usize];
        for (chunk, &(offset, len)) in self.chunks.iter().zip(&ranges) {
            logical[offset as usize..(offset + len) as usize].copy_from_slice(&chunk.data);
        }

        // Owner lookup for per-block method attribution.
        let method_for = |block_start: u64| -> u8 {
            self.chunks
                .iter()
                .zip(&ranges)
                .find(|(_, &(offset, len))| block_start >= offset && block_start < offset + len)
                .map_or(0, |(chunk, _)| chunk.method)
        };

        let encrypted = self.key.is_some();
        let block_count = logical_end.div_ceil(block_size) as usize;
        let mut blocks = Vec::with_capacity(block_count);
        let mut partitions: Vec<Vec<u8>> = vec![Vec::new()];
        let mut cas_pos = 0u64;

        for block_index in 0..block_count {
            let start = block_index as u64 * block_size;
            let end = (start + block_size).min(logical_end);
            let content = &logical[start as usize..end as usize];

            let method = method_for(start);
            let mut stored = match self.methods.get(method.wrapping_sub(1) as usize) {
                Some(name) if method != 0 && name.eq_ignore_ascii_case("zlib") => {
                    zlib_compress(content)
                }
                // Opaque plug-in methods keep the raw bytes; tests
                // either register an identity codec or expect failure.
                Some(_) if method != 0 => content.to_vec(),
                _ => content.to_vec(),
            };
            let compressed_size = stored.len() as u32;
            if encrypted {
                let (_, key) = self.key.expect("key set");
                pad_and_encrypt(&mut stored, &key);
            }

            // Block starts are AES-aligned; a block never straddles a
            // partition boundary.
            cas_pos = align_up_16(cas_pos);
            let disk_len = stored.len() as u64;
            assert!(disk_len <= self.partition_size, "block larger than a partition");
            if (cas_pos % self.partition_size) + disk_len > self.partition_size {
                cas_pos = (cas_pos / self.partition_size + 1) * self.partition_size;
            }
            write_at(&mut partitions, self.partition_size, cas_pos, &stored);

            blocks.push(RawBlock {
                offset: cas_pos,
                compressed_size,
                uncompressed_size: (end - start) as u32,
                method,
            });
            cas_pos += disk_len;
        }

        let directory_index = self.build_directory_index(&slot_to_chunk);

        let utoc = self.write_toc(
            &slot_to_chunk,
            &ranges,
            &seeds,
            &overflow_slots,
            &blocks,
            directory_index,
            partitions.len() as u32,
        );
        (utoc, partitions)
    }

    /// Write `base.utoc` and the partition files into a directory,
    /// returning the base path (no extension).
    pub fn write_to_dir(&self, dir: &Path, name: &str) -> std::io::Result<PathBuf> {
        let (utoc, partitions) = self.build();
        let base = dir.join(name);
        std::fs::write(base.with_extension("utoc"), utoc)?;
        for (i, partition) in partitions.iter().enumerate() {
            let path = if i == 0 {
                base.with_extension("ucas")
            } else {
                dir.join(format!("{name}_s{i}.ucas"))
            };
            std::fs::write(path, partition)?;
        }
        Ok(base)
    }

    fn build_directory_index(&self, slot_to_chunk: &[usize]) -> Option<Vec<u8>> {
        if self.version < 2 {
            return None;
        }
        let mut paths = Vec::new();
        for (slot, &chunk_index) in slot_to_chunk.iter().enumerate() {
            if let Some(path) = &self.chunks[chunk_index].path {
                paths.push((path.clone(), slot as u32));
            }
        }
        if paths.is_empty() {
            return None;
        }

        let mut blob = DirectoryIndexWriter::build(&self.mount_point, &paths);
        if let Some((_, key)) = &self.key {
            pad_and_encrypt(&mut blob, key);
        }
        Some(blob)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_toc(
        &self,
        slot_to_chunk: &[usize],
        ranges: &[(u64, u64)],
        seeds: &[i32],
        overflow_slots: &[u32],
        blocks: &[RawBlock],
        directory_index: Option<Vec<u8>>,
        partition_count: u32,
    ) -> Vec<u8> {
        let dir_index_size = directory_index.as_ref().map_or(0, Vec::len) as u32;
        let guid = self.key.map(|(g, _)| g).unwrap_or(Guid::ZERO);
        let mut flags = 0u8;
        if blocks.iter().any(|b| b.method != 0) {
            flags |= 1; // compressed
        }
        if self.key.is_some() {
            flags |= 2; // encrypted
        }
        if directory_index.is_some() {
            flags |= 8; // indexed
        }

        let mut out = Vec::new();
        out.extend_from_slice(TOC_MAGIC);
        out.push(self.version);
        out.extend_from_slice(&[0u8; 3]);
        out.write_u32::<LE>(144).unwrap();
        out.write_u32::<LE>(slot_to_chunk.len() as u32).unwrap();
        out.write_u32::<LE>(blocks.len() as u32).unwrap();
        out.write_u32::<LE>(12).unwrap();
        out.write_u32::<LE>(self.methods.len() as u32).unwrap();
        out.write_u32::<LE>(32).unwrap();
        out.write_u32::<LE>(self.compression_block_size).unwrap();
        out.write_u32::<LE>(dir_index_size).unwrap();
        out.write_u32::<LE>(partition_count).unwrap();
        out.write_u64::<LE>(self.container_id).unwrap();
        out.extend_from_slice(&guid.to_bytes());
        out.push(flags);
        out.extend_from_slice(&[0u8; 3]);
        out.write_u32::<LE>(seeds.len() as u32).unwrap();
        out.write_u64::<LE>(self.partition_size).unwrap();
        out.write_u32::<LE>(overflow_slots.len() as u32).unwrap();
        out.write_u32::<LE>(0).unwrap();
        out.extend_from_slice(&[0u8; 40]);
        assert_eq!(out.len(), 144);

        for &chunk_index in slot_to_chunk {
            out.extend_from_slice(&self.chunks[chunk_index].id);
        }
        for &chunk_index in slot_to_chunk {
            let (offset, length) = ranges[chunk_index];
            write_u40(&mut out, offset);
            write_u40(&mut out, length);
        }
        if self.version >= 4 {
            for &seed in seeds {
                out.write_i32::<LE>(seed).unwrap();
            }
        }
        if self.version >= 5 {
            for &slot in overflow_slots {
                out.write_u32::<LE>(slot).unwrap();
            }
        }
        for block in blocks {
            write_u40(&mut out, block.offset);
            write_u24(&mut out, block.compressed_size);
            write_u24(&mut out, block.uncompressed_size);
            out.push(block.method);
        }
        for name in &self.methods {
            let mut bytes = [0u8; 32];
            bytes[..name.len()].copy_from_slice(name.as_bytes());
            out.extend_from_slice(&bytes);
        }
        if let Some(blob) = directory_index {
            out.extend_from_slice(&blob);
        }
        out
    }
}

struct RawBlock {
    offset: u64,
    compressed_size: u32,
    uncompressed_size: u32,
    method: u8,
}

fn align_up(n: u64, alignment: u64) -> u64 {
    n.div_ceil(alignment) * alignment
}

fn write_u40(out: &mut Vec<u8>, value: u64) {
    assert!(value < 1 << 40);
    out.extend_from_slice(&value.to_le_bytes()[..5]);
}

fn write_u24(out: &mut Vec<u8>, value: u32) {
    assert!(value < 1 << 24);
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

fn write_at(partitions: &mut Vec<Vec<u8>>, partition_size: u64, pos: u64, bytes: &[u8]) {
    let partition = (pos / partition_size) as usize;
    while partitions.len() <= partition {
        partitions.push(Vec::new());
    }
    let local = (pos % partition_size) as usize;
    let file = &mut partitions[partition];
    if file.len() < local {
        file.resize(local, 0);
    }
    file.extend_from_slice(bytes);
}

fn hash_chunk(id: &[u8; 12], seed: u64) -> u64 {
    let mut hash = if seed != 0 { seed } else { 0xcbf2_9ce4_8422_2325 };
    for &byte in id {
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3) ^ u64::from(byte);
    }
    hash
}

/// Place chunks into table slots so the two-level hash resolves each
/// one: multi-member buckets get a searched positive seed, singletons
/// get a direct negative seed, and buckets that refuse to place spill
/// into the overflow list behind an out-of-range direct seed.
fn build_perfect_hash(
    ids: &[[u8; 12]],
    allow_overflow: bool,
) -> (Vec<usize>, Vec<i32>, Vec<u32>) {
    let n = ids.len();
    if n == 0 {
        return (Vec::new(), Vec::new(), Vec::new());
    }
    let seed_count = n.next_power_of_two();
    let mut seeds = vec![0i32; seed_count];

    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); seed_count];
    for (i, id) in ids.iter().enumerate() {
        buckets[(hash_chunk(id, 0) % seed_count as u64) as usize].push(i);
    }

    let mut slots: Vec<Option<usize>> = vec![None; n];
    let mut overflow_members = Vec::new();

    let mut multi: Vec<usize> = (0..seed_count).filter(|&b| buckets[b].len() > 1).collect();
    multi.sort_by_key(|&b| std::cmp::Reverse(buckets[b].len()));

    for bucket in multi {
        let members = &buckets[bucket];
        let mut placed = false;
        'search: for seed in 1..100_000i32 {
            let targets: Vec<usize> = members
                .iter()
                .map(|&m| (hash_chunk(&ids[m], seed as u64) % n as u64) as usize)
                .collect();
            let mut sorted = targets.clone();
            sorted.sort_unstable();
            sorted.dedup();
            if sorted.len() != targets.len() || targets.iter().any(|&t| slots[t].is_some()) {
                continue 'search;
            }
            for (&member, &target) in members.iter().zip(&targets) {
                slots[target] = Some(member);
            }
            seeds[bucket] = seed;
            placed = true;
            break;
        }
        if !placed {
            assert!(allow_overflow, "perfect hash failed and overflow is not available");
            seeds[bucket] = -(n as i32) - 1; // out of range -> overflow map
            overflow_members.extend_from_slice(members);
        }
    }

    for bucket in 0..seed_count {
        if buckets[bucket].len() != 1 {
            continue;
        }
        let member = buckets[bucket][0];
        let free = slots
            .iter()
            .position(Option::is_none)
            .expect("a free slot exists for every unplaced chunk");
        slots[free] = Some(member);
        seeds[bucket] = -(free as i32) - 1;
    }

    let mut overflow_slots = Vec::with_capacity(overflow_members.len());
    for member in overflow_members {
        let free = slots
            .iter()
            .position(Option::is_none)
            .expect("a free slot exists for every overflow chunk");
        slots[free] = Some(member);
        overflow_slots.push(free as u32);
    }

    let slot_to_chunk = slots
        .into_iter()
        .map(|slot| slot.expect("every slot filled"))
        .collect();
    (slot_to_chunk, seeds, overflow_slots)
}

/// Flattens a path set into the on-disk directory/file/string tables.
struct DirectoryIndexWriter {
    dirs: Vec<[u32; 4]>,
    files: Vec<[u32; 3]>,
    strings: Vec<String>,
}

#[derive(Default)]
struct TreeNode {
    children: BTreeMap<String, TreeNode>,
    files: Vec<(String, u32)>,
}

impl DirectoryIndexWriter {
    fn build(mount_point: &str, paths: &[(String, u32)]) -> Vec<u8> {
        let mut root = TreeNode::default();
        for (path, toc_index) in paths {
            let mut node = &mut root;
            let mut parts = path.split('/').peekable();
            while let Some(part) = parts.next() {
                if parts.peek().is_some() {
                    node = node.children.entry(part.to_string()).or_default();
                } else {
                    node.files.push((part.to_string(), *toc_index));
                }
            }
        }

        let mut writer = Self {
            dirs: Vec::new(),
            files: Vec::new(),
            strings: Vec::new(),
        };
        writer.flatten(&root, NONE_INDEX);

        let mut out = Vec::new();
        write_unreal_string(&mut out, mount_point);
        out.write_u32::<LE>(writer.dirs.len() as u32).unwrap();
        for dir in &writer.dirs {
            for field in dir {
                out.write_u32::<LE>(*field).unwrap();
            }
        }
        out.write_u32::<LE>(writer.files.len() as u32).unwrap();
        for file in &writer.files {
            for field in file {
                out.write_u32::<LE>(*field).unwrap();
            }
        }
        out.write_u32::<LE>(writer.strings.len() as u32).unwrap();
        for s in &writer.strings {
            write_unreal_string(&mut out, s);
        }
        out
    }

    fn string_index(&mut self, s: &str) -> u32 {
        match self.strings.iter().position(|existing| existing == s) {
            Some(i) => i as u32,
            None => {
                self.strings.push(s.to_string());
                self.strings.len() as u32 - 1
            }
        }
    }

    fn flatten(&mut self, node: &TreeNode, name: u32) {
        let dir_slot = self.dirs.len();
        self.dirs.push([name, NONE_INDEX, NONE_INDEX, NONE_INDEX]);

        if !node.files.is_empty() {
            self.dirs[dir_slot][3] = self.files.len() as u32;
            let last = node.files.len() - 1;
            for (i, (file_name, toc_index)) in node.files.iter().enumerate() {
                let name_index = self.string_index(file_name);
                let next = if i == last {
                    NONE_INDEX
                } else {
                    self.files.len() as u32 + 1
                };
                self.files.push([name_index, next, *toc_index]);
            }
        }

        let mut previous_child: Option<usize> = None;
        for (child_name, child) in &node.children {
            let child_slot = self.dirs.len();
            match previous_child {
                Some(prev) => self.dirs[prev][2] = child_slot as u32,
                None => self.dirs[dir_slot][1] = child_slot as u32,
            }
            let name_index = self.string_index(child_name);
            self.flatten(child, name_index);
            previous_child = Some(child_slot);
        }
    }
}
