//! Write routing, copy-up and host persistence.

mod common;

use std::io::{Read, Write};

use rstest::rstest;

use common::{Store, build};
use lilium_vfs::{ErrorKind, RamDiskMount, SystemMount, VfsError, VirtualFileSystem};

#[rstest]
#[case::ram(Store::Ram)]
#[case::system(Store::System)]
fn write_then_read_back(#[case] store: Store) {
    let vfs = VirtualFileSystem::new();
    let fixture = build(store, &[("keep.txt", b"kept")]);
    vfs.mount_shared("/save", fixture.mount.clone(), 0).unwrap();

    vfs.write_file("/save/slot1/game.sav", b"level=3").unwrap();
    assert_eq!(vfs.read_file("/save/slot1/game.sav").unwrap(), b"level=3");
    assert!(vfs.is_directory("/save/slot1"));
    assert_eq!(vfs.list_names("/save").unwrap(), ["keep.txt", "slot1"]);

    vfs.write_file("/save/slot1/game.sav", b"lv=4").unwrap();
    assert_eq!(vfs.read_to_string("/save/slot1/game.sav").unwrap(), "lv=4");
}

#[rstest]
#[case::archive(Store::Archive)]
#[case::compressed_archive(Store::CompressedArchive)]
#[case::bundle(Store::Bundle)]
#[case::zip(Store::Zip)]
fn read_only_stores_refuse_writes(#[case] store: Store) {
    assert!(!store.is_writable());
    let vfs = VirtualFileSystem::new();
    let fixture = build(store, &[("a.txt", b"abc")]);
    vfs.mount_shared("/", fixture.mount.clone(), 0).unwrap();

    let err = vfs.write_file("/a.txt", b"x").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert_eq!(vfs.delete_file("/a.txt").unwrap_err().kind(), ErrorKind::Unsupported);
    assert_eq!(vfs.read_file("/a.txt").unwrap(), b"abc");
    assert!(!vfs.resolve("/a.txt").unwrap().is_writable());
}

#[test]
fn write_skips_read_only_mount_above() {
    let vfs = VirtualFileSystem::new();
    let bundle = build(Store::Bundle, &[("a.txt", b"bundled")]);
    vfs.mount("/", RamDiskMount::new(), 0).unwrap();
    vfs.mount_shared("/", bundle.mount.clone(), 10).unwrap();

    vfs.write_file("/b.txt", b"scratch").unwrap();
    assert_eq!(vfs.read_file("/b.txt").unwrap(), b"scratch");
    assert_eq!(vfs.list_names("/").unwrap(), ["a.txt", "b.txt"]);
}

#[test]
fn writes_outside_every_mount_are_not_found() {
    let vfs = VirtualFileSystem::new();
    vfs.mount("/data", RamDiskMount::new(), 0).unwrap();
    let err = vfs.write_file("/other/x.txt", b"x").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(matches!(vfs.create_file("/data"), Err(VfsError::IsADirectory(_))));
}

#[test]
fn append_copies_read_only_file_up() {
    let vfs = VirtualFileSystem::new();
    let archive = build(Store::Archive, &[("log.txt", b"one ")]);
    vfs.mount_shared("/", archive.mount.clone(), 0).unwrap();
    let scratch = RamDiskMount::new();
    vfs.mount("/", scratch.clone(), 10).unwrap();

    let mut stream = vfs.open_append("/log.txt").unwrap();
    stream.write_all(b"two").unwrap();
    stream.close().unwrap();

    assert_eq!(vfs.read_to_string("/log.txt").unwrap(), "one two");
    assert_eq!(scratch.file_count(), 1);
    assert_eq!(archive.mount.resolve("log.txt").unwrap().unwrap().size, Some(4));
}

#[test]
fn append_extends_writable_file_in_place() {
    let vfs = VirtualFileSystem::new();
    vfs.mount("/", RamDiskMount::new().with_file("log.txt", "a").unwrap(), 0)
        .unwrap();
    for chunk in ["b", "c"] {
        let mut stream = vfs.open_append("/log.txt").unwrap();
        stream.write_all(chunk.as_bytes()).unwrap();
        stream.close().unwrap();
    }
    assert_eq!(vfs.read_to_string("/log.txt").unwrap(), "abc");
}

#[test]
fn delete_reveals_lower_file() {
    let vfs = VirtualFileSystem::new();
    vfs.mount("/", RamDiskMount::new().with_file("x", "low").unwrap(), 0)
        .unwrap();
    vfs.mount("/", RamDiskMount::new().with_file("x", "high").unwrap(), 1)
        .unwrap();

    vfs.delete_file("/x").unwrap();
    assert_eq!(vfs.read_to_string("/x").unwrap(), "low");
    vfs.delete_file("/x").unwrap();
    assert!(!vfs.exists("/x"));
}

#[test]
fn rename_within_and_across_mounts() {
    let vfs = VirtualFileSystem::new();
    let a = RamDiskMount::new().with_file("f.txt", "payload").unwrap();
    let b = RamDiskMount::new();
    vfs.mount("/a", a.clone(), 0).unwrap();
    vfs.mount("/b", b.clone(), 0).unwrap();

    vfs.rename_file("/a/f.txt", "/a/sub/g.txt").unwrap();
    assert!(!vfs.exists("/a/f.txt"));
    assert_eq!(vfs.read_to_string("/a/sub/g.txt").unwrap(), "payload");

    vfs.rename_file("/a/sub/g.txt", "/b/h.txt").unwrap();
    assert!(!vfs.exists("/a/sub/g.txt"));
    assert_eq!(vfs.read_to_string("/b/h.txt").unwrap(), "payload");
    assert_eq!(a.file_count(), 0);
    assert_eq!(b.file_count(), 1);
}

#[test]
fn copy_reports_bytes_and_leaves_source() {
    let vfs = VirtualFileSystem::new();
    let bundle = build(Store::Bundle, &[("big.bin", &common::pattern(70_000))]);
    vfs.mount_shared("/assets", bundle.mount.clone(), 0).unwrap();
    vfs.mount("/cache", RamDiskMount::new(), 0).unwrap();

    assert_eq!(vfs.copy_file("/assets/big.bin", "/cache/big.bin").unwrap(), 70_000);
    assert_eq!(vfs.read_file("/cache/big.bin").unwrap(), common::pattern(70_000));
    assert!(vfs.exists("/assets/big.bin"));
}

#[rstest]
#[case::same("/user/a.txt", "/user/a.txt")]
#[case::dotted("/user/./a.txt", "/user/sub/../a.txt")]
fn copy_onto_itself_is_rejected(#[case] from: &str, #[case] to: &str) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"intact").unwrap();
    let vfs = VirtualFileSystem::new();
    vfs.mount("/user", SystemMount::new(dir.path()), 0).unwrap();

    let err = vfs.copy_file(from, to).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPath);
    assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"intact");
}

#[test]
fn copy_onto_same_path_copies_up_from_read_only_mount() {
    let vfs = VirtualFileSystem::new();
    let archive = build(Store::Archive, &[("a.txt", b"packed")]);
    vfs.mount_shared("/", archive.mount.clone(), 0).unwrap();
    let scratch = RamDiskMount::new();
    vfs.mount("/", scratch.clone(), 10).unwrap();

    assert_eq!(vfs.copy_file("/a.txt", "/a.txt").unwrap(), 6);
    assert_eq!(scratch.file_count(), 1);
    assert_eq!(vfs.read_file("/a.txt").unwrap(), b"packed");
}

#[test]
fn make_directory_creates_parents() {
    let vfs = VirtualFileSystem::new();
    vfs.mount("/", RamDiskMount::new(), 0).unwrap();
    vfs.make_directory("/a/b/c").unwrap();
    assert!(vfs.is_directory("/a/b/c"));
    assert!(vfs.is_directory("/a"));
    assert!(vfs.list("/a/b/c").unwrap().is_empty());
}

#[test]
fn streams_work_with_std_io() {
    let vfs = VirtualFileSystem::new();
    vfs.mount("/", RamDiskMount::new(), 0).unwrap();

    let mut out = vfs.create_file("/notes.txt").unwrap();
    writeln!(out, "line {}", 1).unwrap();
    write!(out, "line {}", 2).unwrap();
    out.close().unwrap();

    let mut text = String::new();
    vfs.open_read("/notes.txt")
        .unwrap()
        .read_to_string(&mut text)
        .unwrap();
    assert_eq!(text, "line 1\nline 2");
}

#[test]
fn pending_write_goes_stale_on_unmount() {
    let vfs = VirtualFileSystem::new();
    let id = vfs.mount("/", RamDiskMount::new(), 0).unwrap();

    let mut stream = vfs.create_file("/draft.txt").unwrap();
    stream.write_all(b"unsaved").unwrap();
    vfs.unmount(id).unwrap();

    assert_eq!(stream.write(b"more").unwrap_err().kind(), ErrorKind::Stale);
    assert_eq!(stream.close().unwrap_err().kind(), ErrorKind::Stale);
    assert!(!vfs.exists("/draft.txt"));
}

#[test]
fn relative_paths_follow_cwd() {
    let vfs = VirtualFileSystem::new();
    vfs.mount("/", RamDiskMount::new(), 0).unwrap();
    vfs.make_directory("/profiles/alice").unwrap();

    vfs.chdir("/profiles/alice").unwrap();
    assert_eq!(vfs.cwd(), "/profiles/alice");
    vfs.write_file("prefs.toml", b"volume = 3").unwrap();
    assert_eq!(vfs.read_file("../alice/prefs.toml").unwrap(), b"volume = 3");
    assert!(vfs.exists("/profiles/alice/prefs.toml"));

    vfs.write_file("/file", b"").unwrap();
    assert!(matches!(vfs.chdir("/file"), Err(VfsError::NotADirectory(_))));
}

#[test]
fn system_mount_persists_to_host() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("existing.cfg"), b"a=1").unwrap();

    let vfs = VirtualFileSystem::new();
    vfs.mount("/user", SystemMount::new(dir.path()), 0).unwrap();
    vfs.write_file("/user/new/out.cfg", b"b=2").unwrap();
    vfs.rename_file("/user/existing.cfg", "/user/renamed.cfg").unwrap();

    assert_eq!(std::fs::read(dir.path().join("new/out.cfg")).unwrap(), b"b=2");
    assert!(!dir.path().join("existing.cfg").exists());
    assert_eq!(std::fs::read(dir.path().join("renamed.cfg")).unwrap(), b"a=1");
}

#[test]
fn read_only_system_mount_refuses_writes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
    let vfs = VirtualFileSystem::new();
    vfs.mount("/", SystemMount::new(dir.path()).with_read_only(true), 0)
        .unwrap();

    assert_eq!(
        vfs.write_file("/b.txt", b"b").unwrap_err().kind(),
        ErrorKind::Unsupported
    );
    assert!(!dir.path().join("b.txt").exists());
    assert_eq!(vfs.read_file("/a.txt").unwrap(), b"a");
}
