//! On-disk inodes: the 128-byte (revision 0) metadata record addressed by a
//! 1-based inode number, and the translation of a file-relative block index
//! to an absolute device block through direct and indirect pointers.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::bitmap;
use crate::device::BlockDevice;
use crate::error::{Error, FsResult};
use crate::group::GroupTable;
use crate::superblock::{Geometry, Superblock};

/// Number of direct block pointers in an inode.
pub const DIRECT_BLOCKS_COUNT: usize = 12;
/// Index of the singly-indirect pointer within `blocks`.
pub const SINGLY_INDIRECT: usize = 12;
/// Index of the doubly-indirect pointer within `blocks`.
pub const DOUBLY_INDIRECT: usize = 13;
/// Index of the triply-indirect pointer within `blocks`.
pub const TRIPLY_INDIRECT: usize = 14;

/// The inode number of the filesystem's root directory.
pub const ROOT_INUM: u32 = 2;

/// Mode bits identifying a regular file.
pub const MODE_REGULAR: u16 = 0x8000;
/// Mode bits identifying a directory.
pub const MODE_DIRECTORY: u16 = 0x4000;
/// Mode bits identifying a symbolic link.
pub const MODE_SYMLINK: u16 = 0xa000;
/// Mask isolating the file-type nibble from the permission bits.
pub const MODE_TYPE_MASK: u16 = 0xf000;

/// The on-disk inode record.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct Inode {
    pub mode: u16,
    pub uid: u16,
    pub size: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid: u16,
    pub numlinks: u16,
    pub sectors: u32,
    pub flags: u32,
    pub osval1: u32,
    pub blocks: [u32; 15],
    pub generation: u32,
    pub fileacl: u32,
    pub diracl: u32,
    pub faddr: u32,
    pub osval2: [u8; 12],
}

const _: () = assert!(core::mem::size_of::<Inode>() == 128);

impl Inode {
    /// A fully zeroed inode, as installed by allocation before the caller
    /// fills in mode/uid/gid/timestamps.
    pub fn zeroed() -> Self {
        Inode::new_zeroed()
    }

    /// The file-type nibble of `mode`, or `None` for an unrecognized format.
    pub fn mode_type(&self) -> u16 {
        self.mode & MODE_TYPE_MASK
    }

    pub fn is_dir(&self) -> bool {
        self.mode_type() == MODE_DIRECTORY
    }

    pub fn is_symlink(&self) -> bool {
        self.mode_type() == MODE_SYMLINK
    }
}

/// Locates and transfers inodes by number.
pub struct InodeStore;

impl InodeStore {
    fn locate(sb: &Superblock, geo: &Geometry, inum: u32) -> FsResult<(u32, u64)> {
        if inum == 0 {
            return Err(Error::Invalid);
        }
        let index = inum - 1;
        let group = index / sb.inodespergroup;
        if group >= geo.num_groups {
            return Err(Error::Range);
        }
        let local = index % sb.inodespergroup;
        let per_block = geo.block_size / sb.inode_size();
        let block_in_table = local / per_block;
        let slot = (local % per_block) as u64;
        Ok((group, block_in_table as u64 * geo.block_size as u64 + slot * geo.inode_size as u64))
    }

    /// Reads the inode numbered `inum`.
    pub fn read(
        dev: &mut dyn BlockDevice,
        sb: &Superblock,
        geo: &Geometry,
        inum: u32,
    ) -> FsResult<Inode> {
        let (group, table_off) = Self::locate(sb, geo, inum)?;
        let desc = GroupTable::read(dev, geo, group)?;
        let off = desc.inode_table as u64 * geo.block_size as u64 + table_off;
        let mut buf = [0u8; 128];
        dev.read_at(off, &mut buf)?;
        Inode::read_from_bytes(&buf).map_err(|_| Error::Corrupt("truncated inode".into()))
    }

    /// Writes back the inode numbered `inum`.
    pub fn write(
        dev: &mut dyn BlockDevice,
        sb: &Superblock,
        geo: &Geometry,
        inum: u32,
        inode: &Inode,
    ) -> FsResult<()> {
        let (group, table_off) = Self::locate(sb, geo, inum)?;
        let desc = GroupTable::read(dev, geo, group)?;
        let off = desc.inode_table as u64 * geo.block_size as u64 + table_off;
        dev.write_at(off, inode.as_bytes())?;
        Ok(())
    }
}

/// Computes the indirection path to reach file-relative block `off`.
///
/// `offsets[0]` always indexes into the inode's own `blocks` array (a direct
/// index, or 12/13/14 for singly/doubly/triply indirect); the remaining
/// `depth - 1` entries index successive pointer blocks. Returns the number
/// of meaningful entries in `offsets` (the depth).
pub fn indirections_offsets(mut off: u32, ppb_log2: u32, offsets: &mut [usize; 4]) -> FsResult<usize> {
    offsets.fill(0);
    if (off as usize) < DIRECT_BLOCKS_COUNT {
        offsets[0] = off as usize;
        return Ok(1);
    }
    off -= DIRECT_BLOCKS_COUNT as u32;
    let ppb = 1u32 << ppb_log2;
    if off < ppb {
        offsets[0] = SINGLY_INDIRECT;
        offsets[1] = off as usize;
        return Ok(2);
    }
    off -= ppb;
    if off < ppb.saturating_mul(ppb) {
        offsets[0] = DOUBLY_INDIRECT;
        offsets[1] = (off >> ppb_log2) as usize;
        offsets[2] = (off & (ppb - 1)) as usize;
        return Ok(3);
    }
    off -= ppb * ppb;
    let ppb3 = (ppb as u64) * (ppb as u64) * (ppb as u64);
    if (off as u64) < ppb3 {
        offsets[0] = TRIPLY_INDIRECT;
        offsets[1] = (off >> (ppb_log2 * 2)) as usize;
        offsets[2] = ((off >> ppb_log2) & (ppb - 1)) as usize;
        offsets[3] = (off & (ppb - 1)) as usize;
        return Ok(4);
    }
    Err(Error::TooLarge)
}

fn read_pointer_block(dev: &mut dyn BlockDevice, geo: &Geometry, block: u32) -> FsResult<Vec<u32>> {
    let mut buf = vec![0u8; geo.block_size as usize];
    dev.read_at(block as u64 * geo.block_size as u64, &mut buf)?;
    Ok(buf
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn write_pointer_block(
    dev: &mut dyn BlockDevice,
    geo: &Geometry,
    block: u32,
    pointers: &[u32],
) -> FsResult<()> {
    let mut buf = vec![0u8; geo.block_size as usize];
    for (i, p) in pointers.iter().enumerate() {
        buf[i * 4..i * 4 + 4].copy_from_slice(&p.to_le_bytes());
    }
    dev.write_at(block as u64 * geo.block_size as u64, &buf)?;
    Ok(())
}

/// Translates a file-relative block index to an absolute device block,
/// allocating direct and indirect blocks on demand when `create` is set.
pub struct BlockMap;

impl BlockMap {
    /// Looks up (and optionally allocates) the absolute block for file-relative
    /// block `rel`. Returns `Ok(None)` when `create` is false and no block is
    /// allocated there yet (a hole).
    pub fn get(
        dev: &mut dyn BlockDevice,
        sb: &mut Superblock,
        geo: &Geometry,
        inode: &mut Inode,
        rel: u32,
        create: bool,
    ) -> FsResult<Option<u32>> {
        let mut offsets = [0usize; 4];
        let depth = indirections_offsets(rel, geo.pointers_per_block_log2, &mut offsets)?;
        // Walk/allocate child-first: the deepest pointer block is allocated and
        // installed into its parent before the parent itself is persisted, so a
        // crash never leaves a dangling reference.
        let mut parent_slot = inode.blocks[offsets[0]];
        if parent_slot == 0 {
            if !create {
                return Ok(None);
            }
            let blk = bitmap::alloc_block(dev, sb, geo)?;
            zero_block(dev, geo, blk)?;
            inode.blocks[offsets[0]] = blk;
            parent_slot = blk;
        }
        let mut cur = parent_slot;
        for level in 1..depth {
            let mut pointers = read_pointer_block(dev, geo, cur)?;
            let idx = offsets[level];
            let mut next = pointers[idx];
            if next == 0 {
                if !create {
                    return Ok(None);
                }
                let blk = bitmap::alloc_block(dev, sb, geo)?;
                zero_block(dev, geo, blk)?;
                pointers[idx] = blk;
                write_pointer_block(dev, geo, cur, &pointers)?;
                next = blk;
            }
            cur = next;
        }
        Ok(Some(cur))
    }

    /// Frees every block referenced by `inode`, including intermediate
    /// indirect pointer blocks, and zeroes the block pointer array.
    pub fn free_all(
        dev: &mut dyn BlockDevice,
        sb: &mut Superblock,
        geo: &Geometry,
        inode: &mut Inode,
    ) -> FsResult<()> {
        for i in 0..DIRECT_BLOCKS_COUNT {
            if inode.blocks[i] != 0 {
                bitmap::free_block(dev, sb, geo, inode.blocks[i])?;
                inode.blocks[i] = 0;
            }
        }
        for (idx, depth) in [(SINGLY_INDIRECT, 1), (DOUBLY_INDIRECT, 2), (TRIPLY_INDIRECT, 3)] {
            if inode.blocks[idx] != 0 {
                free_indirect(dev, sb, geo, inode.blocks[idx], depth)?;
                inode.blocks[idx] = 0;
            }
        }
        Ok(())
    }
}

fn free_indirect(
    dev: &mut dyn BlockDevice,
    sb: &mut Superblock,
    geo: &Geometry,
    block: u32,
    depth: u32,
) -> FsResult<()> {
    if depth > 1 {
        let pointers = read_pointer_block(dev, geo, block)?;
        for p in pointers {
            if p != 0 {
                free_indirect(dev, sb, geo, p, depth - 1)?;
            }
        }
    } else {
        let pointers = read_pointer_block(dev, geo, block)?;
        for p in pointers {
            if p != 0 {
                bitmap::free_block(dev, sb, geo, p)?;
            }
        }
    }
    bitmap::free_block(dev, sb, geo, block)
}

fn zero_block(dev: &mut dyn BlockDevice, geo: &Geometry, block: u32) -> FsResult<()> {
    let buf = vec![0u8; geo.block_size as usize];
    dev.write_at(block as u64 * geo.block_size as u64, &buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_offsets() {
        let mut offsets = [0usize; 4];
        let depth = indirections_offsets(0, 8, &mut offsets).unwrap();
        assert_eq!(depth, 1);
        assert_eq!(offsets[0], 0);

        let depth = indirections_offsets(11, 8, &mut offsets).unwrap();
        assert_eq!(depth, 1);
        assert_eq!(offsets[0], 11);
    }

    #[test]
    fn singly_indirect_offsets() {
        let mut offsets = [0usize; 4];
        // ppb = 256 (log2 = 8)
        let depth = indirections_offsets(12, 8, &mut offsets).unwrap();
        assert_eq!(depth, 2);
        assert_eq!(offsets[0], SINGLY_INDIRECT);
        assert_eq!(offsets[1], 0);

        let depth = indirections_offsets(12 + 255, 8, &mut offsets).unwrap();
        assert_eq!(depth, 2);
        assert_eq!(offsets[1], 255);
    }

    #[test]
    fn doubly_indirect_offsets() {
        let mut offsets = [0usize; 4];
        let base = 12 + 256;
        let depth = indirections_offsets(base, 8, &mut offsets).unwrap();
        assert_eq!(depth, 3);
        assert_eq!(offsets[0], DOUBLY_INDIRECT);
        assert_eq!(offsets[1], 0);
        assert_eq!(offsets[2], 0);

        let depth = indirections_offsets(base + 256 + 3, 8, &mut offsets).unwrap();
        assert_eq!(depth, 3);
        assert_eq!(offsets[1], 1);
        assert_eq!(offsets[2], 3);
    }

    #[test]
    fn beyond_triply_indirect_is_too_large() {
        let mut offsets = [0usize; 4];
        let huge = u32::MAX;
        assert!(matches!(
            indirections_offsets(huge, 8, &mut offsets),
            Err(Error::TooLarge)
        ));
    }
}
