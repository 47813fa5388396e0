//! Byte-range read and write over a file's blocks, and truncation.

use crate::device::BlockDevice;
use crate::error::FsResult;
use crate::inode::{BlockMap, Inode, InodeStore};
use crate::superblock::{Geometry, Superblock};

/// Byte-range read/write/truncate over an inode's content blocks.
pub struct FileIo;

impl FileIo {
    /// Reads up to `dst.len()` bytes starting at `off`, clamped to the
    /// file's size. Returns the number of bytes copied.
    pub fn read(
        dev: &mut dyn BlockDevice,
        geo: &Geometry,
        inode: &Inode,
        off: u64,
        dst: &mut [u8],
    ) -> FsResult<usize> {
        let size = inode.size as u64;
        let count = (dst.len() as u64).min(size.saturating_sub(off)) as usize;
        let block_size = geo.block_size as usize;
        let mut copied = 0;
        while copied < count {
            let file_off = off + copied as u64;
            let rel_block = (file_off / block_size as u64) as u32;
            let in_block_off = (file_off % block_size as u64) as usize;
            let chunk = (count - copied).min(block_size - in_block_off);
            // BlockMap::get requires a mutable inode for the create path; reads never
            // create, so a scratch copy is used to keep this function's inode borrow shared.
            let mut scratch = *inode;
            let blk = dummy_sb_get(dev, geo, &mut scratch, rel_block)?;
            match blk {
                Some(abs) => {
                    let mut buf = vec![0u8; block_size];
                    dev.read_at(abs as u64 * block_size as u64, &mut buf)?;
                    dst[copied..copied + chunk]
                        .copy_from_slice(&buf[in_block_off..in_block_off + chunk]);
                }
                None => {
                    // A hole reads as zero.
                    dst[copied..copied + chunk].fill(0);
                }
            }
            copied += chunk;
        }
        Ok(copied)
    }

    /// Writes `src` at `off`, allocating blocks as needed and extending
    /// `size` (persisting the inode) if the write extends past the current
    /// end of file.
    pub fn write(
        dev: &mut dyn BlockDevice,
        sb: &mut Superblock,
        geo: &Geometry,
        inum: u32,
        inode: &mut Inode,
        off: u64,
        src: &[u8],
    ) -> FsResult<usize> {
        let block_size = geo.block_size as usize;
        let mut written = 0;
        while written < src.len() {
            let file_off = off + written as u64;
            let rel_block = (file_off / block_size as u64) as u32;
            let in_block_off = (file_off % block_size as u64) as usize;
            let chunk = (src.len() - written).min(block_size - in_block_off);
            let abs = BlockMap::get(dev, sb, geo, inode, rel_block, true)?
                .expect("BlockMap::get with create=true always returns a block");
            let mut buf = vec![0u8; block_size];
            if in_block_off != 0 || chunk != block_size {
                dev.read_at(abs as u64 * block_size as u64, &mut buf)?;
            }
            buf[in_block_off..in_block_off + chunk]
                .copy_from_slice(&src[written..written + chunk]);
            dev.write_at(abs as u64 * block_size as u64, &buf)?;
            written += chunk;
        }
        let end = off + written as u64;
        if end > inode.size as u64 {
            inode.size = end as u32;
            let sector_per_block = geo.block_size / 512;
            inode.sectors = (inode.size as u64).div_ceil(block_size as u64) as u32 * sector_per_block;
        }
        InodeStore::write(dev, sb, geo, inum, inode)?;
        Ok(written)
    }

    /// Frees every block the inode references, zeroes its block-pointer
    /// array, and resets `size`/`sectors`, persisting the inode.
    pub fn truncate(
        dev: &mut dyn BlockDevice,
        sb: &mut Superblock,
        geo: &Geometry,
        inum: u32,
        inode: &mut Inode,
    ) -> FsResult<()> {
        BlockMap::free_all(dev, sb, geo, inode)?;
        inode.size = 0;
        inode.sectors = 0;
        InodeStore::write(dev, sb, geo, inum, inode)?;
        Ok(())
    }
}

/// `BlockMap::get` with `create = false` never mutates the inode's block
/// pointers, but its signature takes `&mut Inode` uniformly with the create
/// path; a throwaway scratch copy keeps [`FileIo::read`] working from a
/// shared `&Inode` without `unsafe`.
fn dummy_sb_get(
    dev: &mut dyn BlockDevice,
    geo: &Geometry,
    inode: &mut Inode,
    rel: u32,
) -> FsResult<Option<u32>> {
    // Reads never allocate, so no superblock mutation can occur; an inert
    // zeroed superblock is safe to pass through the `create = false` path.
    let mut sb = crate::superblock::Superblock::zeroed_for_reads();
    BlockMap::get(dev, &mut sb, geo, inode, rel, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::FileBlockDevice;
    use std::io::Write as _;
    use zerocopy::FromBytes;

    fn fresh(block_size: u32) -> (FileBlockDevice, Superblock, Geometry, tempfile::NamedTempFile) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 64 * 1024]).unwrap();
        tmp.flush().unwrap();
        let mut dev = FileBlockDevice::open(tmp.path()).unwrap();
        let geo = Geometry {
            block_size,
            inode_size: 128,
            num_groups: 1,
            pointers_per_block: block_size / 4,
            pointers_per_block_log2: (block_size / 4).trailing_zeros(),
            group_table_first_block: 2,
        };
        let mut sb = Superblock::read_from_bytes(&[0u8; crate::superblock::SUPERBLOCK_SIZE])
            .unwrap();
        sb.firstblock = 20;
        sb.blockspergroup = 8192;
        sb.inodespergroup = 64;
        sb.numfreeblocks = 1000;
        sb.numfreeinodes = 64;
        sb.flush(&mut dev).unwrap();
        let group = crate::group::GroupDescriptor::new(3, 4, 6, 1000, 64, 0);
        crate::group::GroupTable::write(&mut dev, &geo, 0, &group).unwrap();
        (dev, sb, geo, tmp)
    }

    #[test]
    fn write_then_read_round_trip() {
        let (mut dev, mut sb, geo, _tmp) = fresh(1024);
        let mut inode = Inode::zeroed();
        let data = b"hello, ext2";
        let n = FileIo::write(&mut dev, &mut sb, &geo, 1, &mut inode, 0, data).unwrap();
        assert_eq!(n, data.len());
        assert_eq!(inode.size as usize, data.len());
        let mut out = vec![0u8; data.len()];
        FileIo::read(&mut dev, &geo, &inode, 0, &mut out).unwrap();
        assert_eq!(&out, data);
    }

    #[test]
    fn write_spanning_multiple_blocks() {
        let (mut dev, mut sb, geo, _tmp) = fresh(1024);
        let mut inode = Inode::zeroed();
        let data = vec![0xAAu8; 4096];
        FileIo::write(&mut dev, &mut sb, &geo, 1, &mut inode, 0, &data).unwrap();
        assert_eq!(inode.size, 4096);
        let mut out = vec![0u8; 4096];
        FileIo::read(&mut dev, &geo, &inode, 0, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn truncate_frees_blocks() {
        let (mut dev, mut sb, geo, _tmp) = fresh(1024);
        let mut inode = Inode::zeroed();
        let data = vec![1u8; 4096];
        FileIo::write(&mut dev, &mut sb, &geo, 1, &mut inode, 0, &data).unwrap();
        let free_before = sb.numfreeblocks;
        FileIo::truncate(&mut dev, &mut sb, &geo, 1, &mut inode).unwrap();
        assert_eq!(inode.size, 0);
        assert!(sb.numfreeblocks > free_before);
        assert!(inode.blocks.iter().all(|&b| b == 0));
    }
}
