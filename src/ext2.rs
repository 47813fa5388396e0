//! The ext2 mount: composes the bitmap allocator, inode store, block map,
//! file I/O, and directory engine behind the driver operations the VFS layer
//! dispatches to (`create`, `unlink`, `mkdir`, `symlink`, `link`, `stat`, ...).

use crate::bitmap;
use crate::device::BlockDevice;
use crate::dirent::{DirectoryEngine, FileTypeHint};
use crate::error::{Error, FsResult};
use crate::fileio::FileIo;
use crate::group::GroupTable;
use crate::inode::{Inode, InodeStore, MODE_DIRECTORY, MODE_REGULAR, MODE_SYMLINK, MODE_TYPE_MASK, ROOT_INUM};
use crate::superblock::{Geometry, Superblock};

/// A directory listing entry, as returned by [`Ext2Fs::readdir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inum: u32,
    pub name: Vec<u8>,
}

/// The stat record described in §6.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub dev: u64,
    pub inum: u32,
    pub mode: u16,
    pub link_count: u16,
    pub uid: u16,
    pub gid: u16,
    pub rdev: u64,
    pub size: u64,
    pub block_size: u32,
    pub blocks: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

/// The mounted ext2 filesystem: owns the block device and the in-memory
/// superblock, and carries out every operation a [`crate::vfs::VNode`]
/// forwards to it.
pub struct Ext2Fs {
    dev: Box<dyn BlockDevice>,
    sb: Superblock,
    geo: Geometry,
}

impl Ext2Fs {
    /// Mounts the image backing `dev`: loads and validates the superblock and
    /// derives its geometry.
    pub fn mount(mut dev: Box<dyn BlockDevice>) -> FsResult<Self> {
        let sb = Superblock::load(dev.as_mut())?;
        let geo = Geometry::from(&sb);
        Ok(Self { dev, sb, geo })
    }

    /// The root directory's inode number (always [`ROOT_INUM`]).
    pub fn root_inum(&self) -> u32 {
        ROOT_INUM
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    /// Reads the inode numbered `inum`.
    pub fn read_inode(&mut self, inum: u32) -> FsResult<Inode> {
        InodeStore::read(self.dev.as_mut(), &self.sb, &self.geo, inum)
    }

    fn write_inode(&mut self, inum: u32, inode: &Inode) -> FsResult<()> {
        InodeStore::write(self.dev.as_mut(), &self.sb, &self.geo, inum, inode)
    }

    /// Byte-range read from `inum`'s content.
    pub fn read(&mut self, inum: u32, off: u64, dst: &mut [u8]) -> FsResult<usize> {
        let inode = self.read_inode(inum)?;
        FileIo::read(self.dev.as_mut(), &self.geo, &inode, off, dst)
    }

    /// Byte-range write into `inum`'s content, looping until every byte of
    /// `src` is placed (each underlying call is limited to one block).
    pub fn write(&mut self, inum: u32, off: u64, src: &[u8]) -> FsResult<usize> {
        let mut inode = self.read_inode(inum)?;
        let mut total = 0;
        while total < src.len() {
            let n = FileIo::write(
                self.dev.as_mut(),
                &mut self.sb,
                &self.geo,
                inum,
                &mut inode,
                off + total as u64,
                &src[total..],
            )?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    /// Looks up `name` within directory `dir_inum`.
    pub fn find(&mut self, dir_inum: u32, name: &[u8]) -> FsResult<Option<u32>> {
        let dir = self.read_inode(dir_inum)?;
        if !dir.is_dir() {
            return Err(Error::NotDir);
        }
        DirectoryEngine::find(self.dev.as_mut(), &self.geo, &dir, name)
    }

    /// Returns the `index`th live entry of directory `dir_inum`.
    pub fn readdir(&mut self, dir_inum: u32, index: u32) -> FsResult<Option<DirEntry>> {
        let dir = self.read_inode(dir_inum)?;
        if !dir.is_dir() {
            return Err(Error::NotDir);
        }
        Ok(DirectoryEngine::readdir(self.dev.as_mut(), &self.geo, &dir, index)?
            .map(|(inum, name)| DirEntry { inum, name }))
    }

    /// Allocates a fresh inode of the given `mode`, rolling it back with
    /// `freeInode` if any step before the caller links it fails.
    fn alloc_inode(&mut self, mode: u16) -> FsResult<u32> {
        let inum = bitmap::alloc_inode(self.dev.as_mut(), &mut self.sb, &self.geo)?;
        let mut inode = Inode::zeroed();
        inode.mode = mode;
        if let Err(e) = self.write_inode(inum, &inode) {
            let _ = bitmap::free_inode(self.dev.as_mut(), &mut self.sb, &self.geo, inum);
            return Err(e);
        }
        Ok(inum)
    }

    /// Creates a new file (or, if `is_dir`, an empty directory) named `name`
    /// inside `parent_inum`. Fails with `FSExists` if the name is already
    /// taken.
    pub fn create(&mut self, parent_inum: u32, name: &[u8], is_dir: bool) -> FsResult<u32> {
        let parent = self.read_inode(parent_inum)?;
        if !parent.is_dir() {
            return Err(Error::NotDir);
        }
        if self.find(parent_inum, name)?.is_some() {
            return Err(Error::Exists);
        }
        let mode = if is_dir { MODE_DIRECTORY } else { MODE_REGULAR };
        let inum = self.alloc_inode(mode)?;
        let hint = FileTypeHint::from_mode(mode);
        let mut parent = parent;
        if let Err(e) = DirectoryEngine::insert(
            self.dev.as_mut(),
            &mut self.sb,
            &self.geo,
            parent_inum,
            &mut parent,
            name,
            inum,
            hint,
        ) {
            let _ = bitmap::free_inode(self.dev.as_mut(), &mut self.sb, &self.geo, inum);
            return Err(e);
        }
        if is_dir {
            if let Err(e) = self.populate_new_directory(inum, parent_inum) {
                let _ = bitmap::free_inode(self.dev.as_mut(), &mut self.sb, &self.geo, inum);
                return Err(e);
            }
            self.bump_group_dirs(inum, 1)?;
        }
        Ok(inum)
    }

    /// Writes `.` and `..` into a freshly allocated, empty directory inode,
    /// incrementing both its own link count (via `.`) and the parent's
    /// (via `..`).
    fn populate_new_directory(&mut self, inum: u32, parent_inum: u32) -> FsResult<()> {
        let mut inode = self.read_inode(inum)?;
        DirectoryEngine::insert(
            self.dev.as_mut(),
            &mut self.sb,
            &self.geo,
            inum,
            &mut inode,
            b".",
            inum,
            FileTypeHint::Directory,
        )?;
        // `insert` persisted the directory's grown size; re-read before the
        // second insert so it splits against the up-to-date record layout.
        let mut inode = self.read_inode(inum)?;
        DirectoryEngine::insert(
            self.dev.as_mut(),
            &mut self.sb,
            &self.geo,
            inum,
            &mut inode,
            b"..",
            parent_inum,
            FileTypeHint::Directory,
        )?;
        Ok(())
    }

    /// Increments (`delta > 0`) or decrements the `numdirs` counter of the
    /// group owning `inum`.
    fn bump_group_dirs(&mut self, inum: u32, delta: i32) -> FsResult<()> {
        let gi = (inum - 1) / self.sb.inodespergroup;
        let mut group = GroupTable::read(self.dev.as_mut(), &self.geo, gi)?;
        group.used_dirs_count = (group.used_dirs_count as i32 + delta).max(0) as u16;
        GroupTable::write(self.dev.as_mut(), &self.geo, gi, &group)
    }

    /// Frees every block referenced by `inum`'s content and resets its size.
    pub fn truncate(&mut self, inum: u32) -> FsResult<()> {
        let mut inode = self.read_inode(inum)?;
        FileIo::truncate(self.dev.as_mut(), &mut self.sb, &self.geo, inum, &mut inode)
    }

    /// Removes `name` from directory `parent_inum`. When the target's link
    /// count drops to zero, reclaims the inode: its blocks are freed, its
    /// bit is cleared, and `dtime` is stamped.
    pub fn unlink(&mut self, parent_inum: u32, name: &[u8]) -> FsResult<()> {
        let parent = self.read_inode(parent_inum)?;
        if !parent.is_dir() {
            return Err(Error::NotDir);
        }
        let target_inum = DirectoryEngine::remove(self.dev.as_mut(), &mut self.sb, &self.geo, &parent, name)?;
        self.reclaim_if_orphan(target_inum)
    }

    /// If `inum`'s link count has reached zero, frees its content blocks,
    /// clears its inode bit, and stamps `dtime`.
    fn reclaim_if_orphan(&mut self, inum: u32) -> FsResult<()> {
        let mut inode = self.read_inode(inum)?;
        if inode.numlinks != 0 {
            return Ok(());
        }
        if inode.is_dir() {
            self.bump_group_dirs(inum, -1)?;
        }
        FileIo::truncate(self.dev.as_mut(), &mut self.sb, &self.geo, inum, &mut inode)?;
        inode.dtime = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(1);
        self.write_inode(inum, &inode)?;
        bitmap::free_inode(self.dev.as_mut(), &mut self.sb, &self.geo, inum)
    }

    /// Creates a symbolic link named `name` inside `parent_inum` whose
    /// target is the raw bytes `value`.
    pub fn symlink(&mut self, parent_inum: u32, name: &[u8], value: &[u8]) -> FsResult<u32> {
        let inum = self.create(parent_inum, name, false)?;
        let mut inode = self.read_inode(inum)?;
        inode.mode = (inode.mode & !MODE_TYPE_MASK) | MODE_SYMLINK;
        self.write_inode(inum, &inode)?;
        self.write(inum, 0, value)?;
        Ok(inum)
    }

    /// Hard-links `old_inum` as `new_name` inside `newdir_inum`. Refuses to
    /// link a directory.
    pub fn link(&mut self, old_inum: u32, newdir_inum: u32, new_name: &[u8]) -> FsResult<()> {
        let old = self.read_inode(old_inum)?;
        if old.is_dir() {
            return Err(Error::Invalid);
        }
        let mut newdir = self.read_inode(newdir_inum)?;
        if !newdir.is_dir() {
            return Err(Error::NotDir);
        }
        if self.find(newdir_inum, new_name)?.is_some() {
            return Err(Error::Exists);
        }
        DirectoryEngine::insert(
            self.dev.as_mut(),
            &mut self.sb,
            &self.geo,
            newdir_inum,
            &mut newdir,
            new_name,
            old_inum,
            FileTypeHint::from_mode(old.mode),
        )
    }

    /// Returns the stat record for `inum`.
    pub fn stat(&mut self, inum: u32) -> FsResult<Stat> {
        let inode = self.read_inode(inum)?;
        Ok(Stat {
            dev: 0,
            inum,
            mode: inode.mode,
            link_count: inode.numlinks,
            uid: inode.uid,
            gid: inode.gid,
            rdev: 0,
            size: inode.size as u64,
            block_size: self.geo.block_size,
            blocks: inode.sectors,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
        })
    }
}
