//! Archive containers and implicit compression through the full stack.

mod common;

use std::io::SeekFrom;
use std::sync::Arc;

use rstest::rstest;
use lilium_vfs::archive::{ArchiveEntry, ArchiveToc, ArchiveWriter};
use lilium_vfs::codec::{self, CompressionMethod};
use lilium_vfs::stream::{ByteSource, MemorySource};
use lilium_vfs::{
    ArchiveMount, CompressedArchiveMount, ErrorKind, RamDiskMount, VfsError, VfsOptions,
    VirtualFileSystem,
};

#[test]
fn fifty_stored_bytes_read_back_as_five_hundred() {
    let plain = common::pattern(500);
    let packed = codec::compress(CompressionMethod::Zlib, &plain).unwrap();
    assert!(packed.len() <= 50, "packed to {} bytes", packed.len());

    // Pad the stored payload to exactly 50 bytes inside a larger container.
    let mut container = vec![0xAAu8; 16];
    let offset = container.len() as u64;
    container.extend_from_slice(&packed);
    container.resize(offset as usize + 50, 0);
    container.extend_from_slice(&[0xBB; 16]);

    let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(container.clone()));
    let toc = ArchiveToc::from_entries(
        vec![ArchiveEntry {
            name: "levels/intro.dat".into(),
            offset,
            stored_len: 50,
            uncompressed_len: 500,
            method: Some(CompressionMethod::Zlib),
        }],
        container.len() as u64,
    )
    .unwrap();

    let vfs = VirtualFileSystem::new();
    vfs.mount(
        "/game",
        CompressedArchiveMount::with_toc(source, toc, "intro").unwrap(),
        0,
    )
    .unwrap();

    let file = vfs.resolve("/game/levels/intro.dat").unwrap();
    assert_eq!(file.stat().unwrap().size, Some(500));
    let data = file.read_all().unwrap();
    assert_eq!(data.len(), 500);
    assert_eq!(data, plain);
}

#[rstest]
#[case::max(u64::MAX)]
#[case::terabyte(1 << 40)]
fn overstated_uncompressed_length_is_corrupt(#[case] declared: u64) {
    let packed = codec::compress(CompressionMethod::Zlib, b"tiny").unwrap();
    let stored_len = packed.len() as u64;
    let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(packed));
    let toc = ArchiveToc::from_entries(
        vec![ArchiveEntry {
            name: "tiny.txt".into(),
            offset: 0,
            stored_len,
            uncompressed_len: declared,
            method: Some(CompressionMethod::Zlib),
        }],
        stored_len,
    )
    .unwrap();

    let vfs = VirtualFileSystem::new();
    vfs.mount(
        "/",
        CompressedArchiveMount::with_toc(source, toc, "liar").unwrap(),
        0,
    )
    .unwrap();

    assert_eq!(vfs.resolve("/tiny.txt").unwrap().stat().unwrap().size, Some(declared));
    let err = vfs.read_file("/tiny.txt").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corrupt);
}

#[test]
fn packed_directory_mounts_from_disk() {
    let src = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(src.path().join("textures")).unwrap();
    std::fs::write(src.path().join("textures/brick.png"), common::pattern(2000)).unwrap();
    std::fs::write(src.path().join("readme.txt"), b"hello").unwrap();

    let out = tempfile::tempdir().unwrap();
    let stored = out.path().join("stored.lvpk");
    let compressed = out.path().join("compressed.lvpk");

    let mut writer = ArchiveWriter::create(&stored).unwrap();
    assert_eq!(writer.add_directory(src.path(), None).unwrap(), 2);
    writer.finish().unwrap();
    let mut writer = ArchiveWriter::create(&compressed).unwrap();
    writer
        .add_directory(src.path(), Some(CompressionMethod::Zlib))
        .unwrap();
    writer.finish().unwrap();

    let vfs = VirtualFileSystem::new();
    vfs.mount("/stored", ArchiveMount::open(&stored).unwrap(), 0)
        .unwrap();
    vfs.mount("/packed", CompressedArchiveMount::open(&compressed).unwrap(), 0)
        .unwrap();

    for root in ["/stored", "/packed"] {
        assert_eq!(vfs.list_names(root).unwrap(), ["readme.txt", "textures"]);
        assert_eq!(
            vfs.read_file(&format!("{root}/textures/brick.png")).unwrap(),
            common::pattern(2000)
        );
    }
    assert!(
        std::fs::metadata(&compressed).unwrap().len() < std::fs::metadata(&stored).unwrap().len()
    );
}

#[test]
fn stored_archive_refuses_compressed_container() {
    let bytes = common::container(&[("a", b"abc")], Some(CompressionMethod::Zlib));
    let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(bytes));
    let err = ArchiveMount::from_source(source, "mixed").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Corrupt);
}

#[test]
fn truncated_container_is_corrupt_at_mount_time() {
    let mut bytes = common::container(&[("a", b"abc")], None);
    bytes.truncate(bytes.len() - 4);
    let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(bytes));
    assert!(matches!(
        ArchiveMount::from_source(source, "cut"),
        Err(VfsError::Corrupt(_))
    ));
}

#[test]
fn compressed_streams_seek_forward_only() {
    let bytes = common::container(&[("a.bin", &common::pattern(1000))], Some(CompressionMethod::Zlib));
    let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(bytes));
    let vfs = VirtualFileSystem::new();
    vfs.mount("/", CompressedArchiveMount::from_source(source, "t").unwrap(), 0)
        .unwrap();

    let mut stream = vfs.open_read("/a.bin").unwrap();
    assert_eq!(stream.seek(SeekFrom::Start(700)).unwrap(), 700);
    let rest = stream.read_to_end().unwrap();
    assert_eq!(rest, common::pattern(1000)[700..]);
    assert_eq!(
        stream.seek(SeekFrom::Start(0)).unwrap_err().kind(),
        ErrorKind::StreamNotSeekable
    );
}

#[test]
fn independent_sessions_over_one_entry() {
    let bytes = common::container(&[("a.bin", &common::pattern(3000))], Some(CompressionMethod::Zlib));
    let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(bytes));
    let vfs = VirtualFileSystem::new();
    vfs.mount("/", CompressedArchiveMount::from_source(source, "t").unwrap(), 0)
        .unwrap();

    let mut first = vfs.open_read("/a.bin").unwrap();
    let mut second = vfs.open_read("/a.bin").unwrap();
    let mut head = [0u8; 10];
    first.read(&mut head).unwrap();
    first.close().unwrap();
    assert_eq!(second.read_to_end().unwrap(), common::pattern(3000));
}

// ---------------------------------------------------------------------------
// Implicit `.pz` siblings
// ---------------------------------------------------------------------------

fn implicit_vfs() -> VirtualFileSystem {
    VirtualFileSystem::with_options(VfsOptions {
        implicit_compression: true,
        ..VfsOptions::default()
    })
}

#[test]
fn missing_file_falls_back_to_pz_sibling() {
    let packed = codec::compress(CompressionMethod::Zlib, b"shader source").unwrap();
    let vfs = implicit_vfs();
    vfs.mount("/", RamDiskMount::new().with_file("basic.wgsl.pz", packed).unwrap(), 0)
        .unwrap();

    let file = vfs.resolve("/basic.wgsl").unwrap();
    assert!(file.is_compressed());
    assert_eq!(file.path(), "/basic.wgsl");
    assert_eq!(file.stat().unwrap().size, None);
    assert_eq!(vfs.read_to_string("/basic.wgsl").unwrap(), "shader source");
}

#[test]
fn plain_file_preferred_over_pz_sibling() {
    let packed = codec::compress(CompressionMethod::Zlib, b"packed").unwrap();
    let disk = RamDiskMount::new()
        .with_file("a.txt", "plain")
        .unwrap()
        .with_file("a.txt.pz", packed)
        .unwrap();
    let vfs = implicit_vfs();
    vfs.mount("/", disk, 0).unwrap();
    assert_eq!(vfs.read_to_string("/a.txt").unwrap(), "plain");
}

#[test]
fn pz_fallback_is_off_by_default() {
    let packed = codec::compress(CompressionMethod::Zlib, b"x").unwrap();
    let vfs = VirtualFileSystem::new();
    vfs.mount("/", RamDiskMount::new().with_file("a.txt.pz", packed).unwrap(), 0)
        .unwrap();
    assert!(matches!(vfs.resolve("/a.txt"), Err(VfsError::NotFound(_))));
}

#[test]
fn writing_through_pz_handle_compresses() {
    let packed = codec::compress(CompressionMethod::Zlib, b"v1").unwrap();
    let disk = RamDiskMount::new().with_file("save.dat.pz", packed).unwrap();
    let vfs = implicit_vfs();
    vfs.mount("/", disk, 0).unwrap();

    let file = vfs.resolve("/save.dat").unwrap();
    let mut stream = file.open(lilium_vfs::OpenMode::Write).unwrap();
    stream.write_all(b"version two").unwrap();
    stream.close().unwrap();

    let raw = vfs.read_file("/save.dat.pz").unwrap();
    assert_eq!(
        codec::decompress(CompressionMethod::Zlib, &raw).unwrap(),
        b"version two"
    );
    assert_eq!(vfs.read_to_string("/save.dat").unwrap(), "version two");
}
