//! Block and inode allocation against the per-group bitmaps.
//!
//! Bitmaps are indexed LSB-first within each byte: bit `k` of byte `k/8` is
//! `1 << (k % 8)`. Allocation persists superblock counters, then the group
//! descriptor, then the bitmap block itself, so a crash after any prefix of
//! that sequence leaves counters conservative (over-reporting used blocks)
//! rather than allowing a double allocation. Freeing persists in the
//! reverse order.

use crate::device::BlockDevice;
use crate::error::{Error, FsResult};
use crate::group::GroupTable;
use crate::superblock::{Geometry, Superblock};

/// Finds the first cleared bit in the bitmap block starting at `bitmap_block`,
/// among the first `limit` bits, without modifying it. Returns `None` if
/// every bit among the first `limit` is already set.
fn bitmap_find_free(
    dev: &mut dyn BlockDevice,
    geo: &Geometry,
    bitmap_block: u32,
    limit: u32,
) -> FsResult<Option<u32>> {
    let block_size = geo.block_size as usize;
    let mut buf = vec![0u8; block_size];
    dev.read_at(bitmap_block as u64 * block_size as u64, &mut buf)?;
    let limit = limit as usize;
    for byte_idx in 0..block_size {
        let byte = buf[byte_idx];
        if byte == 0xff {
            continue;
        }
        for bit in 0..8 {
            let idx = byte_idx * 8 + bit;
            if idx >= limit {
                return Ok(None);
            }
            if byte & (1 << bit) == 0 {
                return Ok(Some(idx as u32));
            }
        }
    }
    Ok(None)
}

/// Sets bit `index` in the bitmap block starting at `bitmap_block`.
fn bitmap_set(
    dev: &mut dyn BlockDevice,
    geo: &Geometry,
    bitmap_block: u32,
    index: u32,
) -> FsResult<()> {
    let block_size = geo.block_size as usize;
    let byte_idx = (index / 8) as usize;
    let bit = index % 8;
    let off = bitmap_block as u64 * block_size as u64 + byte_idx as u64;
    let mut byte = [0u8; 1];
    dev.read_at(off, &mut byte)?;
    byte[0] |= 1 << bit;
    dev.write_at(off, &byte)?;
    Ok(())
}

/// Clears bit `index` in the bitmap block starting at `bitmap_block`.
/// Returns the bit's previous value.
fn bitmap_clear(
    dev: &mut dyn BlockDevice,
    geo: &Geometry,
    bitmap_block: u32,
    index: u32,
) -> FsResult<bool> {
    let block_size = geo.block_size as usize;
    let byte_idx = (index / 8) as usize;
    let bit = index % 8;
    let mut byte = [0u8; 1];
    let off = bitmap_block as u64 * block_size as u64 + byte_idx as u64;
    dev.read_at(off, &mut byte)?;
    let was_set = byte[0] & (1 << bit) != 0;
    if was_set {
        byte[0] &= !(1 << bit);
        dev.write_at(off, &byte)?;
    }
    Ok(was_set)
}

/// Allocates a free block, returning its absolute block number.
pub fn alloc_block(dev: &mut dyn BlockDevice, sb: &mut Superblock, geo: &Geometry) -> FsResult<u32> {
    if sb.numfreeblocks == 0 {
        return Err(Error::NoSpace);
    }
    for gi in 0..geo.num_groups {
        let mut group = GroupTable::read(dev, geo, gi)?;
        if group.free_blocks_count == 0 {
            continue;
        }
        let Some(bit) = bitmap_find_free(dev, geo, group.block_bitmap, sb.blockspergroup)? else {
            continue;
        };
        sb.numfreeblocks -= 1;
        group.free_blocks_count -= 1;
        sb.flush(dev)?;
        GroupTable::write(dev, geo, gi, &group)?;
        bitmap_set(dev, geo, group.block_bitmap, bit)?;
        let abs = sb.firstblock + gi * sb.blockspergroup + bit;
        log::debug!("allocated block {abs} in group {gi}");
        return Ok(abs);
    }
    Err(Error::NoSpace)
}

/// Allocates a free inode, returning its 1-based inode number.
pub fn alloc_inode(dev: &mut dyn BlockDevice, sb: &mut Superblock, geo: &Geometry) -> FsResult<u32> {
    if sb.numfreeinodes == 0 {
        return Err(Error::NoSpace);
    }
    for gi in 0..geo.num_groups {
        let mut group = GroupTable::read(dev, geo, gi)?;
        if group.free_inodes_count == 0 {
            continue;
        }
        let Some(bit) = bitmap_find_free(dev, geo, group.inode_bitmap, sb.inodespergroup)? else {
            continue;
        };
        sb.numfreeinodes -= 1;
        group.free_inodes_count -= 1;
        sb.flush(dev)?;
        GroupTable::write(dev, geo, gi, &group)?;
        bitmap_set(dev, geo, group.inode_bitmap, bit)?;
        let inum = gi * sb.inodespergroup + bit + 1;
        log::debug!("allocated inode {inum} in group {gi}");
        return Ok(inum);
    }
    Err(Error::NoSpace)
}

/// Frees a previously allocated block. Idempotent: freeing an already-free
/// block logs a corruption warning and returns success without double
/// incrementing the free counters.
pub fn free_block(dev: &mut dyn BlockDevice, sb: &mut Superblock, geo: &Geometry, block: u32) -> FsResult<()> {
    if block == 0 {
        return Ok(());
    }
    let rel = block - sb.firstblock;
    let gi = rel / sb.blockspergroup;
    let bit = rel % sb.blockspergroup;
    let mut group = GroupTable::read(dev, geo, gi)?;
    let was_set = bitmap_clear(dev, geo, group.block_bitmap, bit)?;
    if !was_set {
        log::warn!("double free of block {block}: filesystem may be corrupt");
        return Ok(());
    }
    group.free_blocks_count += 1;
    GroupTable::write(dev, geo, gi, &group)?;
    sb.numfreeblocks += 1;
    sb.flush(dev)?;
    log::debug!("freed block {block} in group {gi}");
    Ok(())
}

/// Frees a previously allocated inode. Idempotent, matching [`free_block`].
pub fn free_inode(dev: &mut dyn BlockDevice, sb: &mut Superblock, geo: &Geometry, inum: u32) -> FsResult<()> {
    if inum == 0 {
        return Ok(());
    }
    let rel = inum - 1;
    let gi = rel / sb.inodespergroup;
    let bit = rel % sb.inodespergroup;
    let mut group = GroupTable::read(dev, geo, gi)?;
    let was_set = bitmap_clear(dev, geo, group.inode_bitmap, bit)?;
    if !was_set {
        log::warn!("double free of inode {inum}: filesystem may be corrupt");
        return Ok(());
    }
    group.free_inodes_count += 1;
    GroupTable::write(dev, geo, gi, &group)?;
    sb.numfreeinodes += 1;
    sb.flush(dev)?;
    log::debug!("freed inode {inum} in group {gi}");
    Ok(())
}
