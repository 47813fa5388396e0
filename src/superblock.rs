//! The ext2 superblock: the disk header at byte offset 1024 describing the
//! filesystem's geometry, free counts, and identity.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::device::BlockDevice;
use crate::error::{Error, FsResult};

/// Byte offset of the superblock within the image.
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// On-disk size of the superblock.
pub const SUPERBLOCK_SIZE: usize = 1024;
/// The ext2 magic number.
pub const EXT2_MAGIC: u16 = 0xef53;

/// The on-disk superblock layout, reinterpreted directly from the 1024-byte
/// scratch buffer read at [`SUPERBLOCK_OFFSET`].
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Superblock {
    pub numinodes: u32,
    pub numblocks: u32,
    pub numreservedblocks: u32,
    pub numfreeblocks: u32,
    pub numfreeinodes: u32,
    pub firstblock: u32,
    pub blockszshift: u32,
    pub fragszshift: u32,
    pub blockspergroup: u32,
    pub fragspergroup: u32,
    pub inodespergroup: u32,
    pub mounttime: u32,
    pub writetime: u32,
    pub nummounts: u16,
    pub maxmounts: u16,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub revminor: u16,
    pub lastcheck: u32,
    pub checkinterval: u32,
    pub creatorid: u32,
    pub revmajor: u32,
    pub defuid: u16,
    pub defgid: u16,
    // Extended fields (revision >= 1)
    pub firstinode: u32,
    pub inodesz: u16,
    pub blockgroup: u16,
    pub featuresopt: u32,
    pub featuresreq: u32,
    pub featuresro: u32,
    pub uuid: [u8; 16],
    pub name: [u8; 16],
    pub lastmount: [u8; 64],
    pub compression: u32,
    pub preallocfile: u8,
    pub preallocdir: u8,
    _alignment: u16,
    pub jrnluuid: [u8; 16],
    pub jrnlinode: u32,
    pub jrnldev: u32,
    pub orphan: u32,
    _reserved: [u8; 788],
}

const _: () = assert!(core::mem::size_of::<Superblock>() == SUPERBLOCK_SIZE);

impl Superblock {
    /// Reads and validates the superblock from `dev`.
    pub fn load(dev: &mut dyn BlockDevice) -> FsResult<Self> {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        dev.read_at(SUPERBLOCK_OFFSET, &mut buf)?;
        let sb = Self::read_from_bytes(&buf)
            .map_err(|_| Error::Corrupt("truncated superblock".into()))?;
        if sb.magic != EXT2_MAGIC {
            return Err(Error::Corrupt(format!(
                "bad magic number {:#06x}",
                sb.magic
            )));
        }
        log::debug!(
            "mounted ext2: {} blocks, {} inodes, block size {}",
            sb.numblocks,
            sb.numinodes,
            sb.block_size()
        );
        Ok(sb)
    }

    /// Persists the in-memory superblock back to [`SUPERBLOCK_OFFSET`].
    pub fn flush(&self, dev: &mut dyn BlockDevice) -> FsResult<()> {
        dev.write_at(SUPERBLOCK_OFFSET, self.as_bytes())?;
        Ok(())
    }

    /// `1024 << blockszshift`.
    pub fn block_size(&self) -> u32 {
        1024 << self.blockszshift
    }

    /// Size, in bytes, of an on-disk inode record.
    pub fn inode_size(&self) -> u32 {
        if self.revmajor >= 1 {
            self.inodesz as u32
        } else {
            128
        }
    }

    /// Number of block groups spanning the whole device.
    pub fn num_groups(&self) -> u32 {
        self.numblocks.div_ceil(self.blockspergroup)
    }

    /// Number of 4-byte block pointers that fit in one block.
    pub fn pointers_per_block(&self) -> u32 {
        self.block_size() / 4
    }

    /// log2 of [`Self::pointers_per_block`]; block size is always a power of two.
    pub fn pointers_per_block_log2(&self) -> u32 {
        self.pointers_per_block().trailing_zeros()
    }

    /// The first block of the group descriptor table.
    pub fn group_table_first_block(&self) -> u32 {
        if self.block_size() == 1024 {
            2
        } else {
            1
        }
    }

    /// A zeroed superblock, suitable only as a throwaway counters argument for
    /// APIs that take `&mut Superblock` uniformly but are known not to mutate
    /// it on the caller's code path (e.g. a non-allocating [`crate::inode::BlockMap::get`]).
    pub fn zeroed_for_reads() -> Self {
        Self::new_zeroed()
    }
}

/// Immutable geometry derived once at mount time.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub block_size: u32,
    pub inode_size: u32,
    pub num_groups: u32,
    pub pointers_per_block: u32,
    pub pointers_per_block_log2: u32,
    pub group_table_first_block: u32,
}

impl From<&Superblock> for Geometry {
    fn from(sb: &Superblock) -> Self {
        Self {
            block_size: sb.block_size(),
            inode_size: sb.inode_size(),
            num_groups: sb.num_groups(),
            pointers_per_block: sb.pointers_per_block(),
            pointers_per_block_log2: sb.pointers_per_block_log2(),
            group_table_first_block: sb.group_table_first_block(),
        }
    }
}
