//! Shared fixture for the end-to-end tests: builds a fresh, empty ext2
//! image on disk and returns the path to it, ready to be mounted by either
//! the library directly or the CLI binary as a subprocess.

use ext2fs::device::{BlockDevice, FileBlockDevice};
use ext2fs::group::{GroupDescriptor, GroupTable};
use ext2fs::inode::{Inode, InodeStore, MODE_DIRECTORY, ROOT_INUM};
use ext2fs::superblock::{Geometry, Superblock, EXT2_MAGIC, SUPERBLOCK_SIZE};
use zerocopy::FromBytes;

/// Number of 1024-byte blocks in the fixture image (8 MiB): one block
/// bitmap block addresses exactly `blockSize * 8` blocks, so `blockspergroup`
/// must equal that to keep the whole image a single, fully-addressable
/// group (the real on-disk convention, not an arbitrary test shortcut).
const NUM_BLOCKS: u32 = 8 * 1024;
const BLOCKS_PER_GROUP: u32 = NUM_BLOCKS;
const INODES_PER_GROUP: u32 = 1024;

/// Absolute blocks the fixture lays the metadata regions out at, ahead of
/// `firstblock` where file content starts.
const BLOCK_BITMAP_BLOCK: u32 = 3;
const INODE_BITMAP_BLOCK: u32 = 4;
const INODE_TABLE_BLOCK: u32 = 5;
/// `1024 inodes * 128 bytes / 1024-byte block = 128 blocks`.
const INODE_TABLE_BLOCKS: u32 = 128;
const FIRST_DATA_BLOCK: u32 = INODE_TABLE_BLOCK + INODE_TABLE_BLOCKS;

/// Builds a fresh 8 MiB, single-group, 1024-byte-block ext2 image with an
/// empty, unpopulated root directory (inode 2) and returns its path.
pub fn fresh_image() -> tempfile::TempPath {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.as_file().set_len(NUM_BLOCKS as u64 * 1024).unwrap();
    let path = tmp.into_temp_path();

    let mut dev = FileBlockDevice::open(&path).unwrap();
    let mut sb = Superblock::read_from_bytes(&[0u8; SUPERBLOCK_SIZE]).unwrap();
    sb.magic = EXT2_MAGIC;
    sb.numinodes = INODES_PER_GROUP;
    sb.numblocks = NUM_BLOCKS;
    sb.numfreeblocks = NUM_BLOCKS - FIRST_DATA_BLOCK;
    sb.numfreeinodes = INODES_PER_GROUP - 1; // inode 2 (root) pre-allocated
    sb.firstblock = FIRST_DATA_BLOCK;
    sb.blockszshift = 0;
    sb.blockspergroup = BLOCKS_PER_GROUP;
    sb.inodespergroup = INODES_PER_GROUP;
    sb.revmajor = 0;
    sb.flush(&mut dev).unwrap();

    let geo = Geometry::from(&sb);
    let group = GroupDescriptor::new(
        BLOCK_BITMAP_BLOCK,
        INODE_BITMAP_BLOCK,
        INODE_TABLE_BLOCK,
        (sb.numfreeblocks) as u16,
        sb.numfreeinodes as u16,
        1, // root counts as one directory
    );
    GroupTable::write(&mut dev, &geo, 0, &group).unwrap();

    // Mark inode 2 (root) used in the inode bitmap: bit 1 (0-based) of byte 0.
    let mut inode_bitmap = vec![0u8; geo.block_size as usize];
    inode_bitmap[0] = 0b0000_0010;
    dev.write_at(
        INODE_BITMAP_BLOCK as u64 * geo.block_size as u64,
        &inode_bitmap,
    )
    .unwrap();

    let mut root = Inode::zeroed();
    root.mode = MODE_DIRECTORY;
    root.numlinks = 0;
    InodeStore::write(&mut dev, &sb, &geo, ROOT_INUM, &root).unwrap();

    path
}
