//! Directory records: variable-length entries stored inside a directory
//! inode's data blocks, mapping a name to an inode number.
//!
//! A record never crosses a block boundary. The last live record in a block
//! absorbs whatever space remains to the end of the block by carrying a
//! `reclen` larger than its own `8 + namelen` footprint; later inserts split
//! that slack off instead of appending a fresh block whenever they can.

use crate::device::BlockDevice;
use crate::error::{Error, FsResult};
use crate::inode::{BlockMap, Inode, InodeStore, MODE_DIRECTORY, MODE_REGULAR, MODE_SYMLINK};
use crate::superblock::{Geometry, Superblock};

/// Offset of the `name` field within an encoded record.
pub const NAME_OFF: usize = 8;
/// Required alignment of `reclen`.
pub const ALIGN: usize = 4;
/// Largest name a record can carry.
pub const NAME_MAX: usize = 255;

/// File-type hint stored in a directory record, mirroring the inode's mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTypeHint {
    Unknown = 0,
    Regular = 1,
    Directory = 2,
    Symlink = 7,
}

impl FileTypeHint {
    pub fn from_mode(mode: u16) -> Self {
        match mode & crate::inode::MODE_TYPE_MASK {
            MODE_REGULAR => FileTypeHint::Regular,
            MODE_DIRECTORY => FileTypeHint::Directory,
            MODE_SYMLINK => FileTypeHint::Symlink,
            _ => FileTypeHint::Unknown,
        }
    }
}

fn align4(n: usize) -> usize {
    (n + ALIGN - 1) & !(ALIGN - 1)
}

/// A decoded view of the record occupying the start of `buf`.
struct RawEntry<'a> {
    inum: u32,
    reclen: u16,
    name: &'a [u8],
}

impl<'a> RawEntry<'a> {
    /// Decodes the record at the start of `buf`. `buf` must hold at least one
    /// full record (`reclen` bytes).
    fn decode(buf: &'a [u8]) -> FsResult<Self> {
        if buf.len() < NAME_OFF {
            return Err(Error::Corrupt("truncated directory record".into()));
        }
        let inum = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let reclen = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        let name_len = buf[6] as usize;
        if (reclen as usize) < NAME_OFF
            || reclen as usize % ALIGN != 0
            || reclen as usize > buf.len()
            || NAME_OFF + name_len > reclen as usize
        {
            return Err(Error::Corrupt("malformed directory record".into()));
        }
        Ok(Self {
            inum,
            reclen,
            name: &buf[NAME_OFF..NAME_OFF + name_len],
        })
    }
}

/// Writes a new record of exactly `reclen` bytes at the start of `buf`.
fn write_entry(buf: &mut [u8], inum: u32, reclen: u16, file_type: FileTypeHint, name: &[u8]) {
    write_entry_raw(buf, inum, reclen, file_type as u8, name);
}

/// Writes a new record of exactly `reclen` bytes at the start of `buf`,
/// preserving a raw file-type byte rather than going through [`FileTypeHint`].
fn write_entry_raw(buf: &mut [u8], inum: u32, reclen: u16, file_type: u8, name: &[u8]) {
    buf[0..4].copy_from_slice(&inum.to_le_bytes());
    buf[4..6].copy_from_slice(&reclen.to_le_bytes());
    buf[6] = name.len() as u8;
    buf[7] = file_type;
    buf[NAME_OFF..NAME_OFF + name.len()].copy_from_slice(name);
}

/// Tombstones the record at the start of `buf`, leaving `reclen` untouched so
/// a subsequent insert can still reuse the space.
fn tombstone(buf: &mut [u8]) {
    buf[0..4].copy_from_slice(&0u32.to_le_bytes());
    buf[6] = 0;
    buf[7] = 0;
}

/// Reads and writes directory content, record by record.
pub struct DirectoryEngine;

impl DirectoryEngine {
    /// Invokes `visit` once per block of `inode`'s content, passing the whole
    /// block buffer. Stops early when `visit` returns `Ok(true)`.
    fn each_block(
        dev: &mut dyn BlockDevice,
        geo: &Geometry,
        inode: &Inode,
        mut visit: impl FnMut(&mut [u8]) -> FsResult<bool>,
    ) -> FsResult<()> {
        let block_size = geo.block_size as u64;
        let size = inode.size as u64;
        let mut scratch = *inode;
        let mut dummy_sb = Superblock::zeroed_for_reads();
        let mut off = 0u64;
        while off < size {
            let rel = (off / block_size) as u32;
            let Some(abs) = BlockMap::get(dev, &mut dummy_sb, geo, &mut scratch, rel, false)?
            else {
                break;
            };
            let mut buf = vec![0u8; block_size as usize];
            dev.read_at(abs as u64 * block_size, &mut buf)?;
            if visit(&mut buf)? {
                return Ok(());
            }
            off += block_size;
        }
        Ok(())
    }

    /// Returns the `(inum, name)` of the `index`th live (non-tombstone)
    /// record, or `None` once the directory is exhausted.
    pub fn readdir(
        dev: &mut dyn BlockDevice,
        geo: &Geometry,
        inode: &Inode,
        index: u32,
    ) -> FsResult<Option<(u32, Vec<u8>)>> {
        let mut logical = 0u32;
        let mut found = None;
        Self::each_block(dev, geo, inode, |buf| {
            let mut boff = 0usize;
            while boff + NAME_OFF <= buf.len() {
                let rec = RawEntry::decode(&buf[boff..])?;
                if rec.inum != 0 {
                    if logical == index {
                        found = Some((rec.inum, rec.name.to_vec()));
                        return Ok(true);
                    }
                    logical += 1;
                }
                boff += rec.reclen as usize;
            }
            Ok(false)
        })?;
        Ok(found)
    }

    /// Finds `name` by exact match, returning its inode number.
    pub fn find(
        dev: &mut dyn BlockDevice,
        geo: &Geometry,
        inode: &Inode,
        name: &[u8],
    ) -> FsResult<Option<u32>> {
        let mut found = None;
        Self::each_block(dev, geo, inode, |buf| {
            let mut boff = 0usize;
            while boff + NAME_OFF <= buf.len() {
                let rec = RawEntry::decode(&buf[boff..])?;
                if rec.inum != 0 && rec.name == name {
                    found = Some(rec.inum);
                    return Ok(true);
                }
                boff += rec.reclen as usize;
            }
            Ok(false)
        })?;
        Ok(found)
    }

    /// Inserts a record mapping `name` to `inum` into `dir_inode`'s content,
    /// reusing slack in an existing record's `reclen` before falling back to
    /// appending a fresh block. Increments `inum`'s link count.
    pub fn insert(
        dev: &mut dyn BlockDevice,
        sb: &mut Superblock,
        geo: &Geometry,
        dir_inum: u32,
        dir_inode: &mut Inode,
        name: &[u8],
        inum: u32,
        file_type: FileTypeHint,
    ) -> FsResult<()> {
        if name.len() > NAME_MAX {
            return Err(Error::NameTooLong);
        }
        let needed = align4(NAME_OFF + name.len()) as u16;
        if Self::try_split_insert(dev, geo, dir_inode, name, inum, file_type, needed)? {
            Self::bump_links(dev, sb, geo, inum, 1)?;
            return Ok(());
        }
        // No block had slack: append a fresh block, the new record claiming
        // the whole block so the directory's last live record in it always
        // extends to the block end.
        let block_size = geo.block_size;
        let rel = dir_inode.size / block_size;
        let abs = BlockMap::get(dev, sb, geo, dir_inode, rel, true)?
            .expect("BlockMap::get with create=true always returns a block");
        let mut buf = vec![0u8; block_size as usize];
        write_entry(&mut buf, inum, block_size as u16, file_type, name);
        dev.write_at(abs as u64 * block_size as u64, &buf)?;
        dir_inode.size += block_size;
        InodeStore::write(dev, sb, geo, dir_inum, dir_inode)?;
        Self::bump_links(dev, sb, geo, inum, 1)?;
        Ok(())
    }

    /// Scans existing blocks for a live record whose `reclen` exceeds its
    /// own footprint by at least `needed` bytes, or a tombstone at least
    /// `needed` bytes long, and splits/reuses it in place. Returns whether a
    /// slot was found.
    fn try_split_insert(
        dev: &mut dyn BlockDevice,
        geo: &Geometry,
        dir_inode: &Inode,
        name: &[u8],
        inum: u32,
        file_type: FileTypeHint,
        needed: u16,
    ) -> FsResult<bool> {
        let block_size = geo.block_size as u64;
        let size = dir_inode.size as u64;
        let mut scratch = *dir_inode;
        let mut dummy_sb = Superblock::zeroed_for_reads();
        let mut off = 0u64;
        while off < size {
            let rel = (off / block_size) as u32;
            let Some(abs) = BlockMap::get(dev, &mut dummy_sb, geo, &mut scratch, rel, false)?
            else {
                break;
            };
            let mut buf = vec![0u8; block_size as usize];
            dev.read_at(abs as u64 * block_size, &mut buf)?;
            let mut boff = 0usize;
            while boff + NAME_OFF <= buf.len() {
                let rec = RawEntry::decode(&buf[boff..])?;
                let footprint = align4(NAME_OFF + rec.name.len()) as u16;
                if rec.inum == 0 && rec.reclen >= needed {
                    write_entry(&mut buf[boff..], inum, rec.reclen, file_type, name);
                    dev.write_at(abs as u64 * block_size + boff as u64, &buf[boff..])?;
                    return Ok(true);
                }
                if rec.inum != 0 && rec.reclen - footprint >= needed {
                    let slack_off = boff + footprint as usize;
                    let slack_len = rec.reclen - footprint;
                    // Shrink the existing record to its true footprint
                    // (inum/file_type/name unchanged), then carve the new
                    // record out of the slack this frees up.
                    buf[boff + 4..boff + 6].copy_from_slice(&footprint.to_le_bytes());
                    write_entry(&mut buf[slack_off..], inum, slack_len, file_type, name);
                    dev.write_at(abs as u64 * block_size + boff as u64, &buf[boff..])?;
                    return Ok(true);
                }
                boff += rec.reclen as usize;
            }
            off += block_size;
        }
        Ok(false)
    }

    fn bump_links(
        dev: &mut dyn BlockDevice,
        sb: &Superblock,
        geo: &Geometry,
        inum: u32,
        delta: i32,
    ) -> FsResult<()> {
        let mut inode = InodeStore::read(dev, sb, geo, inum)?;
        inode.numlinks = (inode.numlinks as i32 + delta).max(0) as u16;
        InodeStore::write(dev, sb, geo, inum, &inode)
    }

    /// Removes the record named `name` from `dir_inode`'s content. Decrements
    /// the target inode's link count; when it drops to zero the caller is
    /// responsible for reclaiming the inode (see `Ext2Fs::reclaim_if_orphan`).
    /// Refuses to remove `.` or `..`.
    pub fn remove(
        dev: &mut dyn BlockDevice,
        sb: &mut Superblock,
        geo: &Geometry,
        dir_inode: &Inode,
        name: &[u8],
    ) -> FsResult<u32> {
        if name == b"." || name == b".." {
            return Err(Error::Invalid);
        }
        let block_size = geo.block_size as u64;
        let size = dir_inode.size as u64;
        let mut scratch = *dir_inode;
        let mut dummy_sb = Superblock::zeroed_for_reads();
        let mut off = 0u64;
        while off < size {
            let rel = (off / block_size) as u32;
            let Some(abs) = BlockMap::get(dev, &mut dummy_sb, geo, &mut scratch, rel, false)?
            else {
                break;
            };
            let mut buf = vec![0u8; block_size as usize];
            dev.read_at(abs as u64 * block_size, &mut buf)?;
            let mut prev_off: Option<usize> = None;
            let mut boff = 0usize;
            while boff + NAME_OFF <= buf.len() {
                let rec = RawEntry::decode(&buf[boff..])?;
                if rec.inum != 0 && rec.name == name {
                    let target_inum = rec.inum;
                    let target_reclen = rec.reclen;
                    if let Some(prev_off) = prev_off {
                        let prev = RawEntry::decode(&buf[prev_off..])?;
                        let merged = prev.reclen + target_reclen;
                        buf[prev_off + 4..prev_off + 6].copy_from_slice(&merged.to_le_bytes());
                    } else {
                        tombstone(&mut buf[boff..]);
                    }
                    dev.write_at(abs as u64 * block_size, &buf)?;
                    Self::bump_links(dev, sb, geo, target_inum, -1)?;
                    return Ok(target_inum);
                }
                prev_off = Some(boff);
                boff += rec.reclen as usize;
            }
            off += block_size;
        }
        Err(Error::NotFound)
    }
}
