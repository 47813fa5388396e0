//! End-to-end scenarios against the library's public `Ext2Fs`/`Vfs` surface,
//! exercising the mount's driver and path-resolution layers together over a
//! freshly built image the way the CLI binary would, without going through
//! a subprocess.

mod common;

use ext2fs::device::FileBlockDevice;
use ext2fs::group::GroupTable;
use ext2fs::{Error, Ext2Fs, Vfs};

fn mount(path: &std::path::Path) -> Ext2Fs {
    let dev = FileBlockDevice::open(path).unwrap();
    Ext2Fs::mount(Box::new(dev)).unwrap()
}

#[test]
fn s1_create_write_cat_stat() {
    let image = common::fresh_image();
    let mut fs = mount(&image);
    let root = Vfs::root(&mut fs).unwrap();

    let a = Vfs::create(&mut fs, root, root, b"/a", false).unwrap();
    Vfs::write(&mut fs, a, 0, b"hello").unwrap();

    let mut buf = [0u8; 5];
    let n = Vfs::read(&mut fs, a, 0, &mut buf).unwrap();
    assert_eq!(n, 5);
    assert_eq!(&buf, b"hello");
    assert_eq!(Vfs::stat(&mut fs, a).unwrap().size, 5);
}

#[test]
fn s2_mkdir_create_ls() {
    let image = common::fresh_image();
    let mut fs = mount(&image);
    let root = Vfs::root(&mut fs).unwrap();

    let d = Vfs::create(&mut fs, root, root, b"/d", true).unwrap();
    let f = Vfs::create(&mut fs, root, d, b"f", false).unwrap();

    let e0 = Vfs::readdir(&mut fs, d, 0).unwrap().unwrap();
    let e1 = Vfs::readdir(&mut fs, d, 1).unwrap().unwrap();
    let e2 = Vfs::readdir(&mut fs, d, 2).unwrap().unwrap();
    assert_eq!(e0.name, b".");
    assert_eq!(e0.inum, d.inum);
    assert_eq!(e1.name, b"..");
    assert_eq!(e1.inum, root.inum);
    assert_eq!(e2.name, b"f");
    assert_eq!(e2.inum, f.inum);
    assert!(Vfs::readdir(&mut fs, d, 3).unwrap().is_none());
}

#[test]
fn s3_symlink_resolves_through_cat() {
    let image = common::fresh_image();
    let mut fs = mount(&image);
    let root = Vfs::root(&mut fs).unwrap();

    let a = Vfs::create(&mut fs, root, root, b"/a", false).unwrap();
    Vfs::write(&mut fs, a, 0, b"hello").unwrap();
    Vfs::symlink(&mut fs, root, root, b"/l", b"a").unwrap();

    let resolved = Vfs::resolve(&mut fs, root, root, b"/l").unwrap();
    assert_eq!(resolved.inum, a.inum);
    let mut buf = [0u8; 5];
    Vfs::read(&mut fs, resolved, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"hello");
}

#[test]
fn s4_link_unlink_keeps_data_reachable() {
    let image = common::fresh_image();
    let mut fs = mount(&image);
    let root = Vfs::root(&mut fs).unwrap();

    let a = Vfs::create(&mut fs, root, root, b"/a", false).unwrap();
    Vfs::write(&mut fs, a, 0, b"hello").unwrap();
    Vfs::link(&mut fs, a, root, b"b").unwrap();
    Vfs::unlink(&mut fs, root, root, b"/a").unwrap();

    let b = Vfs::resolve(&mut fs, root, root, b"/b").unwrap();
    assert_eq!(Vfs::stat(&mut fs, b).unwrap().link_count, 1);
    let mut buf = [0u8; 5];
    Vfs::read(&mut fs, b, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"hello");
}

#[test]
fn s5_multi_block_write_consumes_expected_blocks() {
    let image = common::fresh_image();
    let mut fs = mount(&image);
    let root = Vfs::root(&mut fs).unwrap();
    let geo = *fs.geometry();

    let free_before = group_free_blocks(&image, &geo);
    let x = Vfs::create(&mut fs, root, root, b"/x", false).unwrap();
    let data = vec![0xAAu8; 4096];
    let n = Vfs::write(&mut fs, x, 0, &data).unwrap();
    assert_eq!(n, 4096);

    let mut out = vec![0u8; 4096];
    Vfs::read(&mut fs, x, 0, &mut out).unwrap();
    assert_eq!(out, data);
    assert_eq!(Vfs::stat(&mut fs, x).unwrap().size, 4096);

    // 4096 bytes over a 1024-byte block size spans exactly 4 direct blocks.
    let free_after = group_free_blocks(&image, &geo);
    assert_eq!(free_before - free_after, 4);
}

/// Re-reads the single group's `free_blocks_count` straight off the image,
/// independent of the mount under test, to check the bitmap's bookkeeping
/// rather than the mount's in-memory counters.
fn group_free_blocks(image: &std::path::Path, geo: &ext2fs::superblock::Geometry) -> u16 {
    let mut dev = FileBlockDevice::open(image).unwrap();
    GroupTable::read(&mut dev, geo, 0).unwrap().free_blocks_count
}

#[test]
fn s6_unlink_root_is_invalid() {
    let image = common::fresh_image();
    let mut fs = mount(&image);
    let root = Vfs::root(&mut fs).unwrap();

    assert!(matches!(
        Vfs::unlink(&mut fs, root, root, b"/"),
        Err(Error::Invalid)
    ));
}

#[test]
fn s7_link_conservation_after_unlinking_original_name() {
    let image = common::fresh_image();
    let mut fs = mount(&image);
    let root = Vfs::root(&mut fs).unwrap();

    let x = Vfs::create(&mut fs, root, root, b"/x", false).unwrap();
    Vfs::write(&mut fs, x, 0, b"data").unwrap();
    Vfs::link(&mut fs, x, root, b"y").unwrap();
    Vfs::unlink(&mut fs, root, root, b"/x").unwrap();

    let y = Vfs::resolve(&mut fs, root, root, b"/y").unwrap();
    assert_eq!(Vfs::stat(&mut fs, y).unwrap().link_count, 1);
    let mut buf = [0u8; 4];
    Vfs::read(&mut fs, y, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"data");
}

#[test]
fn mkdir_twice_is_idempotent_failure() {
    let image = common::fresh_image();
    let mut fs = mount(&image);
    let root = Vfs::root(&mut fs).unwrap();

    Vfs::create(&mut fs, root, root, b"/d", true).unwrap();
    assert!(matches!(
        Vfs::create(&mut fs, root, root, b"/d", true),
        Err(Error::Exists)
    ));
    // Unaffected: the directory's listing is unchanged by the failed retry.
    let d = Vfs::resolve(&mut fs, root, root, b"/d").unwrap();
    assert!(Vfs::readdir(&mut fs, d, 2).unwrap().is_none());
}
