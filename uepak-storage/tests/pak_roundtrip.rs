//! End-to-end PAK scenarios over synthetic archives.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use test_utils::PakFixtureBuilder;
use uepak_codec::CodecRegistry;
use uepak_crypto::{Guid, KeyStore};
use uepak_storage::{open_pak, ArchiveError, OpenOptions, UArchive};

const TEST_KEY: [u8; 32] = [0x11; 32];

fn test_guid() -> Guid {
    "11111111-1111-1111-1111-111111111111".parse().unwrap()
}

fn services() -> (Arc<KeyStore>, Arc<CodecRegistry>) {
    (
        Arc::new(KeyStore::new()),
        Arc::new(CodecRegistry::with_defaults()),
    )
}

fn write_temp(builder: &PakFixtureBuilder) -> tempfile::TempPath {
    let file = tempfile::Builder::new()
        .suffix(".pak")
        .tempfile()
        .unwrap();
    let path = file.into_temp_path();
    builder.write_to(&path).unwrap();
    path
}

#[test]
fn test_plaintext_roundtrip_v8() {
    let builder = PakFixtureBuilder::new(8)
        .mount_point("/Game/")
        .add_file("A.txt", b"hello\n");
    let path = write_temp(&builder);

    let (keys, codecs) = services();
    let archive = open_pak(&path, keys, codecs, OpenOptions::default()).unwrap();

    assert_eq!(archive.file_count(), 1);
    assert_eq!(archive.version(), 8);
    assert_eq!(archive.mount_point(), "/Game/");
    assert!(!archive.is_encrypted());

    let listed = archive.list(Some("*.txt")).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, "/Game/A.txt");
    assert_eq!(listed[0].uncompressed_size, 6);
    assert!(!listed[0].compressed);

    assert_eq!(archive.get("/game/a.txt").unwrap(), b"hello\n");
}

#[test]
fn test_encrypted_compressed_roundtrip_v8() {
    let payload = vec![0x41u8; 100 * 1024];
    let builder = PakFixtureBuilder::new(8)
        .mount_point("/Game/")
        .compression_block_size(0x10000)
        .encrypt_index(test_guid(), TEST_KEY)
        .add_file_compressed("A.txt", &payload);
    let path = write_temp(&builder);

    let keys = Arc::new(KeyStore::new());
    keys.insert(test_guid(), TEST_KEY);
    let codecs = Arc::new(CodecRegistry::with_defaults());

    let archive = open_pak(&path, keys, codecs, OpenOptions::default()).unwrap();
    assert!(archive.is_encrypted());

    let data = archive.get("/game/a.txt").unwrap();
    assert_eq!(data.len(), 102_400);
    assert!(data.iter().all(|&b| b == 0x41));
}

#[test]
fn test_encrypted_index_requires_key() {
    let builder = PakFixtureBuilder::new(8)
        .encrypt_index(test_guid(), TEST_KEY)
        .add_file("A.txt", b"secret");
    let path = write_temp(&builder);

    // Opening cannot even parse the index without the key.
    let (keys, codecs) = services();
    let err = open_pak(&path, keys, codecs, OpenOptions::default()).unwrap_err();
    match err {
        ArchiveError::KeyMissing { guid } => assert_eq!(guid, test_guid()),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_encrypted_entries_fail_lazily_without_key() {
    // Once the index is decoded, entry decryption is lazy: dropping
    // the key after open turns extraction into KeyMissing.
    let builder = PakFixtureBuilder::new(11)
        .mount_point("/Game/")
        .encrypt_index(test_guid(), TEST_KEY)
        .encrypt_entries()
        .add_file("A.txt", b"secret bytes here");
    let path = write_temp(&builder);

    let keys = Arc::new(KeyStore::new());
    keys.insert(test_guid(), TEST_KEY);
    let codecs = Arc::new(CodecRegistry::with_defaults());
    let archive = open_pak(
        &path,
        Arc::clone(&keys),
        codecs,
        OpenOptions::default(),
    )
    .unwrap();

    assert_eq!(archive.get("/game/a.txt").unwrap(), b"secret bytes here");

    // Dropping the key after open: extraction reports KeyMissing.
    keys.remove(&test_guid());
    match archive.get("/game/a.txt").unwrap_err() {
        ArchiveError::KeyMissing { guid } => assert_eq!(guid, test_guid()),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_modern_index_v11_roundtrip() {
    let big = vec![0x7Eu8; 200 * 1024];
    let builder = PakFixtureBuilder::new(11)
        .mount_point("/Game/")
        .add_file("Maps/Arena.umap", b"arena bytes")
        .add_file_compressed("Textures/Big.uasset", &big)
        .add_file("Readme.txt", b"top level");
    let path = write_temp(&builder);

    let (keys, codecs) = services();
    let archive = open_pak(&path, keys, codecs, OpenOptions::default()).unwrap();

    assert_eq!(archive.version(), 11);
    assert_eq!(archive.file_count(), 3);
    assert_eq!(archive.get("/game/maps/arena.umap").unwrap(), b"arena bytes");
    assert_eq!(archive.get("/Game/Textures/Big.uasset").unwrap(), big);
    assert_eq!(archive.get("/game/readme.txt").unwrap(), b"top level");

    let info = archive.info("/game/textures/big.uasset").unwrap();
    assert!(info.compressed);
    assert_eq!(info.compression_method, "Zlib");
    assert_eq!(info.uncompressed_size, big.len() as u64);
}

#[test]
fn test_determinism_and_case_insensitivity() {
    let builder = PakFixtureBuilder::new(9)
        .mount_point("/Game/")
        .add_file_compressed("Data/Blob.bin", &vec![0x33u8; 70_000]);
    let path = write_temp(&builder);

    let (keys, codecs) = services();
    let archive = open_pak(&path, keys, codecs, OpenOptions::default()).unwrap();

    let first = archive.get("/Game/Data/Blob.bin").unwrap();
    let second = archive.get("/GAME/DATA/BLOB.BIN").unwrap();
    assert_eq!(first, second);

    assert!(archive.has("/game/data/blob.bin"));
    assert!(archive.has("/GAME/Data/BLOB.bin"));
    assert!(!archive.has("/game/data/other.bin"));
    assert!(archive.get("/game/missing").is_err());
}

#[test]
fn test_glob_listing() {
    let builder = PakFixtureBuilder::new(8)
        .mount_point("/Game/")
        .add_file("A.uasset", b"a")
        .add_file("B.uasset", b"b")
        .add_file("C.umap", b"c");
    let path = write_temp(&builder);

    let (keys, codecs) = services();
    let archive = open_pak(&path, keys, codecs, OpenOptions::default()).unwrap();

    let assets = archive.list(Some("*.UASSET")).unwrap();
    assert_eq!(assets.len(), 2);
    assert!(assets.iter().all(|e| e.path.ends_with(".uasset")));

    let single = archive.list(Some("/game/?.umap")).unwrap();
    assert_eq!(single.len(), 1);
    assert_eq!(single[0].path, "/Game/C.umap");

    assert_eq!(archive.list(None).unwrap().len(), 3);
}

#[test]
fn test_max_file_size_limit() {
    let builder = PakFixtureBuilder::new(8)
        .mount_point("/")
        .add_file("big.bin", &vec![0u8; 4096]);
    let path = write_temp(&builder);

    let (keys, codecs) = services();
    let options = OpenOptions {
        max_file_size: Some(1024),
        ..OpenOptions::default()
    };
    let archive = open_pak(&path, keys, codecs, options).unwrap();

    match archive.get("/big.bin").unwrap_err() {
        ArchiveError::FileTooLarge { size, limit } => {
            assert_eq!(size, 4096);
            assert_eq!(limit, 1024);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_close_semantics() {
    let builder = PakFixtureBuilder::new(8).mount_point("/").add_file("a", b"1");
    let path = write_temp(&builder);

    let (keys, codecs) = services();
    let archive = open_pak(&path, keys, codecs, OpenOptions::default()).unwrap();
    assert_eq!(archive.get("/a").unwrap(), b"1");

    archive.close();
    assert!(matches!(archive.get("/a"), Err(ArchiveError::Closed)));
    assert!(matches!(archive.list(None), Err(ArchiveError::Closed)));
    assert!(!archive.has("/a"));
    assert!(archive.info("/a").is_none());

    // Idempotent.
    archive.close();
}

#[test]
fn test_open_dispatches_on_extension() {
    let builder = PakFixtureBuilder::new(8).mount_point("/").add_file("a.bin", b"abc");
    let path = write_temp(&builder);

    let (keys, codecs) = services();
    let archive =
        uepak_storage::open(&path, Arc::clone(&keys), Arc::clone(&codecs), OpenOptions::default())
            .unwrap();
    assert_eq!(archive.get("/a.bin").unwrap(), b"abc");

    let err = uepak_storage::open(
        std::path::Path::new("container.zip"),
        keys,
        codecs,
        OpenOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ArchiveError::Format { .. }));
}

#[test]
fn test_legacy_versions_roundtrip() {
    for version in [3u32, 4, 5, 6, 7] {
        let builder = PakFixtureBuilder::new(version)
            .mount_point("/Game/")
            .add_file("Plain.bin", b"plain data")
            .add_file_compressed("Packed.bin", &vec![0x55u8; 90_000]);
        let path = write_temp(&builder);

        let (keys, codecs) = services();
        let archive = open_pak(&path, keys, codecs, OpenOptions::default()).unwrap();
        assert_eq!(archive.version(), version, "version {version}");
        assert_eq!(archive.get("/game/plain.bin").unwrap(), b"plain data");
        assert_eq!(
            archive.get("/game/packed.bin").unwrap(),
            vec![0x55u8; 90_000],
            "version {version}"
        );
    }
}
