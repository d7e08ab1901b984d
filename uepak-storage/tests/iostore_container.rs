//! End-to-end IoStore scenarios over synthetic container pairs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use test_utils::TocFixtureBuilder;
use uepak_codec::CodecRegistry;
use uepak_crypto::{Guid, KeyStore};
use uepak_storage::{
    open_iostore, ArchiveError, CancelSignal, ChunkId, EngineVersion, IoStoreToc, OpenOptions,
    UArchive,
};

const TEST_KEY: [u8; 32] = [0x22; 32];

fn test_guid() -> Guid {
    "22222222-2222-2222-2222-222222222222".parse().unwrap()
}

fn services() -> (Arc<KeyStore>, Arc<CodecRegistry>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    (
        Arc::new(KeyStore::new()),
        Arc::new(CodecRegistry::with_defaults()),
    )
}

fn chunk_id(kind: u8, index: u8) -> [u8; 12] {
    let mut id = [0u8; 12];
    id[0] = kind;
    id[1] = index;
    id
}

#[test]
fn test_perfect_hash_hit_and_miss() {
    let builder = TocFixtureBuilder::new(5)
        .add_chunk(chunk_id(1, 1), b"first chunk")
        .add_chunk(chunk_id(1, 2), b"second chunk")
        .add_chunk(chunk_id(2, 1), b"third chunk");
    let (utoc, _) = builder.build();

    let toc = IoStoreToc::parse(&utoc).unwrap();
    assert_eq!(toc.len(), 3);
    assert!(!toc.perfect_hash_seeds.is_empty());

    // Every known ID resolves to the slot that actually holds it.
    for (slot, id) in toc.chunk_ids.iter().enumerate() {
        assert_eq!(toc.chunk_index(id), Some(slot as u32), "chunk {id}");
    }

    // A synthesized fourth ID is not found.
    let absent = ChunkId::new(chunk_id(9, 9));
    assert_eq!(toc.chunk_index(&absent), None);
}

#[test]
fn test_perfect_hash_dense_table() {
    // Enough chunks that some seed buckets collide, so the positive
    // probe path is exercised alongside the direct seeds.
    let mut builder = TocFixtureBuilder::new(5);
    let mut ids = Vec::new();
    for i in 0..64u8 {
        let id = chunk_id(1, i);
        ids.push(id);
        builder = builder.add_chunk(id, format!("chunk payload {i}").as_bytes());
    }
    let (utoc, _) = builder.build();
    let toc = IoStoreToc::parse(&utoc).unwrap();

    for id in ids {
        let id = ChunkId::new(id);
        let slot = toc.chunk_index(&id).expect("known chunk resolves");
        assert_eq!(toc.chunk_ids[slot as usize], id);
    }
    assert_eq!(toc.chunk_index(&ChunkId::new(chunk_id(7, 7))), None);
}

#[test]
fn test_partitioned_read_across_boundary() {
    // One chunk straddles the 1 MiB partition boundary: its last
    // covering block comes from partition 0, the rest from partition 1.
    let filler = vec![0x10u8; 0xFFE00];
    let target: Vec<u8> = (0..0x40000usize).map(|i| (i % 251) as u8).collect();

    let dir = tempfile::tempdir().unwrap();
    let base = TocFixtureBuilder::new(5)
        .compression_block_size(0x10000)
        .partition_size(0x100000)
        .add_chunk_at(0, chunk_id(1, 0), &filler)
        .add_chunk_at(0xFFE00, chunk_id(1, 1), &target)
        .write_to_dir(dir.path(), "straddle")
        .unwrap();

    assert!(base.with_extension("ucas").exists());
    assert!(dir.path().join("straddle_s1.ucas").exists());

    let (keys, codecs) = services();
    let archive = open_iostore(
        &base,
        keys,
        codecs,
        EngineVersion::Ue5,
        OpenOptions::default(),
    )
    .unwrap();

    // The chunk covers blocks 15..=19, so exactly five blocks are
    // read: block 15 from partition 0, blocks 16..=19 from partition 1.
    let before = archive.read_ops();
    let data = archive.get_chunk(&ChunkId::new(chunk_id(1, 1))).unwrap();
    assert_eq!(archive.read_ops() - before, 5);
    assert_eq!(data.len(), 0x40000);
    assert_eq!(data, target);

    let filler_back = archive.get_chunk(&ChunkId::new(chunk_id(1, 0))).unwrap();
    assert_eq!(filler_back, filler);
}

#[test]
fn test_unknown_codec_is_a_hard_error() {
    let dir = tempfile::tempdir().unwrap();
    let base = TocFixtureBuilder::new(5)
        .method("Oodle")
        .add_chunk_full(chunk_id(1, 0), None, b"opaque oodle bytes", 1, None)
        .add_chunk(chunk_id(1, 1), b"stored bytes")
        .write_to_dir(dir.path(), "oodle")
        .unwrap();

    let (keys, codecs) = services();
    let archive = open_iostore(
        &base,
        keys,
        codecs,
        EngineVersion::Ue5,
        OpenOptions::default(),
    )
    .unwrap();

    match archive.get_chunk(&ChunkId::new(chunk_id(1, 0))).unwrap_err() {
        ArchiveError::Codec(codec_err) => {
            assert!(codec_err.to_string().contains("Oodle"), "{codec_err}");
        }
        other => panic!("unexpected error: {other}"),
    }

    // Chunks using method 0 still extract.
    assert_eq!(
        archive.get_chunk(&ChunkId::new(chunk_id(1, 1))).unwrap(),
        b"stored bytes"
    );

    // Registering the codec as a plug-in unblocks the chunk.
    let (keys, codecs) = services();
    codecs.register("Oodle", |src, _| Ok(src.to_vec()));
    let archive = open_iostore(
        &base,
        keys,
        codecs,
        EngineVersion::Ue5,
        OpenOptions::default(),
    )
    .unwrap();
    assert_eq!(
        archive.get_chunk(&ChunkId::new(chunk_id(1, 0))).unwrap(),
        b"opaque oodle bytes"
    );
}

/// Trips after a fixed number of polls; the pipeline polls once per
/// block boundary.
struct CancelAfter {
    polls: AtomicU64,
    after: u64,
}

impl CancelAfter {
    fn new(after: u64) -> Self {
        Self {
            polls: AtomicU64::new(0),
            after,
        }
    }
}

impl CancelSignal for CancelAfter {
    fn is_cancelled(&self) -> bool {
        self.polls.fetch_add(1, Ordering::SeqCst) >= self.after
    }
}

#[test]
fn test_cancellation_stops_block_reads() {
    // Eight 64 KiB blocks; cancel after the first block boundary.
    let payload = vec![0x99u8; 8 * 0x10000];
    let dir = tempfile::tempdir().unwrap();
    let base = TocFixtureBuilder::new(5)
        .compression_block_size(0x10000)
        .add_chunk(chunk_id(2, 0), &payload)
        .write_to_dir(dir.path(), "cancel")
        .unwrap();

    let (keys, codecs) = services();
    let archive = open_iostore(
        &base,
        keys,
        codecs,
        EngineVersion::Ue5,
        OpenOptions::default(),
    )
    .unwrap();

    let before = archive.read_ops();
    let signal = CancelAfter::new(1);
    let err = archive
        .get_chunk_with_cancel(&ChunkId::new(chunk_id(2, 0)), &signal)
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Cancelled));

    // Exactly one block was read before the signal tripped.
    assert_eq!(archive.read_ops() - before, 1);

    // An uncancelled retry still returns the full payload.
    assert_eq!(archive.get_chunk(&ChunkId::new(chunk_id(2, 0))).unwrap(), payload);
}

#[test]
fn test_directory_index_paths_and_glob() {
    let dir = tempfile::tempdir().unwrap();
    let base = TocFixtureBuilder::new(5)
        .mount_point("/Game/")
        .add_chunk_with_path(chunk_id(1, 0), b"hero mesh", "Content/Hero.uasset")
        .add_chunk_with_path(chunk_id(1, 1), b"villain mesh", "Content/Villain.uasset")
        .add_chunk_with_path(chunk_id(1, 2), b"arena map", "Maps/Arena.umap")
        .write_to_dir(dir.path(), "indexed")
        .unwrap();

    let (keys, codecs) = services();
    let archive = open_iostore(
        &base,
        keys,
        codecs,
        EngineVersion::Ue5,
        OpenOptions::default(),
    )
    .unwrap();

    assert_eq!(archive.mount_point(), "/Game/");
    assert_eq!(archive.file_count(), 3);

    let assets = archive.list(Some("*.uasset")).unwrap();
    assert_eq!(assets.len(), 2);
    for entry in &assets {
        assert!(entry.path.to_lowercase().ends_with(".uasset"), "{}", entry.path);
    }

    assert_eq!(
        archive.get("/game/content/hero.uasset").unwrap(),
        b"hero mesh"
    );
    assert!(archive.has("/GAME/MAPS/ARENA.UMAP"));
    assert!(!archive.has("/game/maps/missing.umap"));
}

#[test]
fn test_synthesized_names_without_directory_index() {
    let dir = tempfile::tempdir().unwrap();
    let base = TocFixtureBuilder::new(5)
        .add_chunk(chunk_id(3, 1), b"nameless chunk")
        .write_to_dir(dir.path(), "nameless")
        .unwrap();

    let (keys, codecs) = services();
    let archive = open_iostore(
        &base,
        keys,
        codecs,
        EngineVersion::Ue5,
        OpenOptions::default(),
    )
    .unwrap();

    let listed = archive.list(None).unwrap();
    assert_eq!(listed.len(), 1);
    let name = &listed[0].path;
    assert!(name.starts_with("chunk_"), "{name}");
    assert!(name.ends_with(".uasset"), "{name}");

    // Synthesized names are valid lookup keys too.
    assert_eq!(archive.get(name).unwrap(), b"nameless chunk");
    assert_eq!(archive.get(&name.to_uppercase()).unwrap(), b"nameless chunk");
}

#[test]
fn test_encrypted_container_roundtrip() {
    let payload = vec![0xA5u8; 80_000];
    let dir = tempfile::tempdir().unwrap();
    let base = TocFixtureBuilder::new(5)
        .encrypt(test_guid(), TEST_KEY)
        .add_chunk(chunk_id(1, 0), &payload)
        .write_to_dir(dir.path(), "sealed")
        .unwrap();

    // With the key registered the chunk decrypts.
    let keys = Arc::new(KeyStore::new());
    keys.insert(test_guid(), TEST_KEY);
    let codecs = Arc::new(CodecRegistry::with_defaults());
    let archive = open_iostore(
        &base,
        keys,
        codecs,
        EngineVersion::Ue5,
        OpenOptions::default(),
    )
    .unwrap();
    assert!(archive.is_encrypted());
    assert_eq!(archive.get_chunk(&ChunkId::new(chunk_id(1, 0))).unwrap(), payload);

    // Without it, extraction reports the GUID it wanted.
    let (keys, codecs) = services();
    let archive = open_iostore(
        &base,
        keys,
        codecs,
        EngineVersion::Ue5,
        OpenOptions::default(),
    )
    .unwrap();
    match archive.get_chunk(&ChunkId::new(chunk_id(1, 0))).unwrap_err() {
        ArchiveError::KeyMissing { guid } => assert_eq!(guid, test_guid()),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_zero_guid_overrides_encrypted_flag() {
    // A container whose flags claim encryption but whose key GUID is
    // all zeros is treated as plaintext.
    let builder = TocFixtureBuilder::new(5).add_chunk(chunk_id(1, 0), b"clear bytes");
    let (mut utoc, _) = builder.build();

    // Flags byte sits right after the 16-byte encryption GUID zone.
    const FLAGS_OFFSET: usize = 80;
    utoc[FLAGS_OFFSET] |= 2;

    let toc = IoStoreToc::parse(&utoc).unwrap();
    assert!(toc.flags.contains(uepak_storage::iostore::ContainerFlags::ENCRYPTED));
    assert!(!toc.is_encrypted());
}

#[test]
fn test_partition_missing_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let base = TocFixtureBuilder::new(5)
        .compression_block_size(0x10000)
        .partition_size(0x20000)
        .add_chunk(chunk_id(1, 0), &vec![1u8; 0x20000])
        .add_chunk(chunk_id(1, 1), &vec![2u8; 0x10000])
        .write_to_dir(dir.path(), "holey")
        .unwrap();

    std::fs::remove_file(dir.path().join("holey_s1.ucas")).unwrap();

    let (keys, codecs) = services();
    let err = open_iostore(
        &base,
        keys,
        codecs,
        EngineVersion::Ue5,
        OpenOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ArchiveError::PartitionMissing { index: 1 }));
}

#[test]
fn test_compressed_chunks_zlib() {
    let payload: Vec<u8> = (0..150_000usize).map(|i| (i / 7 % 256) as u8).collect();
    let dir = tempfile::tempdir().unwrap();
    let base = TocFixtureBuilder::new(4)
        .method("Zlib")
        .add_chunk_full(chunk_id(1, 0), None, &payload, 1, None)
        .write_to_dir(dir.path(), "deflated")
        .unwrap();

    let (keys, codecs) = services();
    let archive = open_iostore(
        &base,
        keys,
        codecs,
        EngineVersion::Ue5,
        OpenOptions::default(),
    )
    .unwrap();

    let entry = &archive.list(None).unwrap()[0];
    assert!(entry.compressed);
    assert!(entry.compressed_size < entry.uncompressed_size);

    assert_eq!(archive.get_chunk(&ChunkId::new(chunk_id(1, 0))).unwrap(), payload);
}
