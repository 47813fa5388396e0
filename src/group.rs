//! The block group descriptor table: one fixed-size record per block group,
//! stored in the block(s) immediately following the superblock.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::device::BlockDevice;
use crate::error::{Error, FsResult};
use crate::superblock::Geometry;

/// On-disk size of a single group descriptor.
pub const GROUP_DESC_SIZE: usize = 32;

/// A block group descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct GroupDescriptor {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
    _pad: [u8; 14],
}

const _: () = assert!(core::mem::size_of::<GroupDescriptor>() == GROUP_DESC_SIZE);

impl GroupDescriptor {
    /// Builds a descriptor with the padding bytes zeroed.
    pub fn new(
        block_bitmap: u32,
        inode_bitmap: u32,
        inode_table: u32,
        free_blocks_count: u16,
        free_inodes_count: u16,
        used_dirs_count: u16,
    ) -> Self {
        Self {
            block_bitmap,
            inode_bitmap,
            inode_table,
            free_blocks_count,
            free_inodes_count,
            used_dirs_count,
            _pad: [0; 14],
        }
    }
}

/// Reads and writes per-group descriptors against the on-disk table.
pub struct GroupTable;

impl GroupTable {
    fn offset(geo: &Geometry, index: u32) -> u64 {
        geo.group_table_first_block as u64 * geo.block_size as u64
            + index as u64 * GROUP_DESC_SIZE as u64
    }

    /// Reads the `index`th group descriptor.
    pub fn read(
        dev: &mut dyn BlockDevice,
        geo: &Geometry,
        index: u32,
    ) -> FsResult<GroupDescriptor> {
        if index >= geo.num_groups {
            return Err(Error::Range);
        }
        let mut buf = [0u8; GROUP_DESC_SIZE];
        dev.read_at(Self::offset(geo, index), &mut buf)?;
        GroupDescriptor::read_from_bytes(&buf)
            .map_err(|_| Error::Corrupt("truncated group descriptor".into()))
    }

    /// Writes back the `index`th group descriptor.
    pub fn write(
        dev: &mut dyn BlockDevice,
        geo: &Geometry,
        index: u32,
        desc: &GroupDescriptor,
    ) -> FsResult<()> {
        if index >= geo.num_groups {
            return Err(Error::Range);
        }
        dev.write_at(Self::offset(geo, index), desc.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::FileBlockDevice;
    use std::io::Write as _;

    fn geo() -> Geometry {
        Geometry {
            block_size: 1024,
            inode_size: 128,
            num_groups: 2,
            pointers_per_block: 256,
            pointers_per_block_log2: 8,
            group_table_first_block: 2,
        }
    }

    #[test]
    fn round_trip() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 8192]).unwrap();
        tmp.flush().unwrap();
        let mut dev = FileBlockDevice::open(tmp.path()).unwrap();
        let geo = geo();
        let desc = GroupDescriptor {
            block_bitmap: 10,
            inode_bitmap: 11,
            inode_table: 12,
            free_blocks_count: 100,
            free_inodes_count: 50,
            used_dirs_count: 1,
            _pad: [0; 14],
        };
        GroupTable::write(&mut dev, &geo, 1, &desc).unwrap();
        let got = GroupTable::read(&mut dev, &geo, 1).unwrap();
        assert_eq!(got.block_bitmap, 10);
        assert_eq!(got.free_blocks_count, 100);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 8192]).unwrap();
        tmp.flush().unwrap();
        let mut dev = FileBlockDevice::open(tmp.path()).unwrap();
        assert!(matches!(
            GroupTable::read(&mut dev, &geo(), 5),
            Err(Error::Range)
        ));
    }
}
