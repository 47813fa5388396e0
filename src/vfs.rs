//! The virtual filesystem layer: path parsing, symlink-following resolution,
//! and the `create`/`unlink`/`mkdir`/`symlink`/`link` dispatchers that turn a
//! path into a sequence of [`Ext2Fs`] operations.
//!
//! A [`VNode`] is a cheap, `Copy` handle identifying an inode; every
//! operation takes the mount explicitly as `&mut Ext2Fs` rather than having
//! the node carry a reference to it, since the driver is single-threaded and
//! synchronous (no concurrent mounts to arbitrate between, see the crate's
//! design notes).

use crate::error::{Error, FsResult};
use crate::ext2::{DirEntry, Ext2Fs, Stat};
use crate::inode::MODE_DIRECTORY;

/// The bound on symbolic-link chasing during resolution (§4.9).
pub const MAX_SYMLINK_DEPTH: u32 = 8;
/// The bound on how many bytes of a symlink's target are read during
/// resolution.
const SYMLINK_READ_CAP: usize = 1024;

/// A cheap, value-typed handle to a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VNode {
    pub inum: u32,
    pub mode: u16,
}

impl VNode {
    pub fn is_dir(&self) -> bool {
        self.mode & crate::inode::MODE_TYPE_MASK == MODE_DIRECTORY
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & crate::inode::MODE_TYPE_MASK == crate::inode::MODE_SYMLINK
    }
}

/// A path split into its leading-slash flag and its non-empty components.
struct ParsedPath<'p> {
    absolute: bool,
    components: Vec<&'p [u8]>,
}

/// Splits `path` into its '/'-delimited components, skipping empty ones
/// (so `//a//b` yields `[a, b]`), and validating each against the 255-byte
/// name limit.
fn parse_path(path: &[u8]) -> FsResult<ParsedPath<'_>> {
    let absolute = path.first() == Some(&b'/');
    let mut components = Vec::new();
    for comp in path.split(|&b| b == b'/') {
        if comp.is_empty() {
            continue;
        }
        if comp.len() > crate::dirent::NAME_MAX {
            return Err(Error::NameTooLong);
        }
        components.push(comp);
    }
    Ok(ParsedPath { absolute, components })
}

/// The path-resolution and dispatch surface over a mounted [`Ext2Fs`].
pub struct Vfs;

impl Vfs {
    /// The root directory's node.
    pub fn root(fs: &mut Ext2Fs) -> FsResult<VNode> {
        let inum = fs.root_inum();
        Self::node(fs, inum)
    }

    fn node(fs: &mut Ext2Fs, inum: u32) -> FsResult<VNode> {
        let inode = fs.read_inode(inum)?;
        Ok(VNode { inum, mode: inode.mode })
    }

    /// Resolves `path` to a [`VNode`], starting from `root` if `path` is
    /// absolute or from `parent` otherwise, following symbolic links
    /// (relative to the directory each link is found in) up to
    /// [`MAX_SYMLINK_DEPTH`] times.
    pub fn resolve(fs: &mut Ext2Fs, root: VNode, parent: VNode, path: &[u8]) -> FsResult<VNode> {
        let parsed = parse_path(path)?;
        let mut depth = 0;
        Self::walk(fs, root, parent, parsed.absolute, &parsed.components, &mut depth)
    }

    /// Walks `components` starting from `root` (if `absolute`) or `parent`,
    /// following symbolic links along the way.
    fn walk(
        fs: &mut Ext2Fs,
        root: VNode,
        parent: VNode,
        absolute: bool,
        components: &[&[u8]],
        depth: &mut u32,
    ) -> FsResult<VNode> {
        let mut cursor = if absolute { root } else { parent };
        for comp in components {
            if !cursor.is_dir() {
                return Err(Error::NotDir);
            }
            let inum = fs.find(cursor.inum, comp)?.ok_or(Error::NotFound)?;
            let found = Self::node(fs, inum)?;
            cursor = if found.is_symlink() {
                *depth += 1;
                if *depth > MAX_SYMLINK_DEPTH {
                    return Err(Error::Loop);
                }
                let mut buf = vec![0u8; SYMLINK_READ_CAP];
                let n = fs.read(found.inum, 0, &mut buf)?;
                buf.truncate(n);
                let target = parse_path(&buf)?;
                Self::walk(fs, root, cursor, target.absolute, &target.components, depth)?
            } else {
                found
            };
        }
        Ok(cursor)
    }

    /// Walks `path` from `parent`, creating the tail component (and any
    /// missing intermediate directories) under the first directory it
    /// cannot find a further component in. Intermediate components are
    /// always created as directories, since further components always
    /// remain past them; the tail is a directory only if `is_dir` is set.
    /// An existing tail fails with `FSExists`.
    pub fn create(fs: &mut Ext2Fs, root: VNode, parent: VNode, path: &[u8], is_dir: bool) -> FsResult<VNode> {
        let parsed = parse_path(path)?;
        let Some((&tail, init)) = parsed.components.split_last() else {
            return Err(Error::Invalid);
        };
        let mut depth = 0;
        let mut cursor = if parsed.absolute { root } else { parent };
        for comp in init {
            if !cursor.is_dir() {
                return Err(Error::NotDir);
            }
            cursor = match fs.find(cursor.inum, comp)? {
                Some(inum) => {
                    let found = Self::node(fs, inum)?;
                    if found.is_symlink() {
                        depth += 1;
                        if depth > MAX_SYMLINK_DEPTH {
                            return Err(Error::Loop);
                        }
                        let mut buf = vec![0u8; SYMLINK_READ_CAP];
                        let n = fs.read(found.inum, 0, &mut buf)?;
                        buf.truncate(n);
                        let target = parse_path(&buf)?;
                        Self::walk(fs, root, cursor, target.absolute, &target.components, &mut depth)?
                    } else {
                        found
                    }
                }
                None => {
                    let inum = fs.create(cursor.inum, comp, true)?;
                    Self::node(fs, inum)?
                }
            };
        }
        if !cursor.is_dir() {
            return Err(Error::NotDir);
        }
        if fs.find(cursor.inum, tail)?.is_some() {
            return Err(Error::Exists);
        }
        let inum = fs.create(cursor.inum, tail, is_dir)?;
        Self::node(fs, inum)
    }

    /// Walks to the parent of the tail component and creates a symbolic link
    /// there named by the tail, with target `value`.
    pub fn symlink(fs: &mut Ext2Fs, root: VNode, parent: VNode, path: &[u8], value: &[u8]) -> FsResult<VNode> {
        let parsed = parse_path(path)?;
        let Some((&tail, init)) = parsed.components.split_last() else {
            return Err(Error::Invalid);
        };
        let mut depth = 0;
        let dir = Self::walk(fs, root, parent, parsed.absolute, init, &mut depth)?;
        if !dir.is_dir() {
            return Err(Error::NotDir);
        }
        let inum = fs.symlink(dir.inum, tail, value)?;
        Self::node(fs, inum)
    }

    /// Hard-links `old` as `new_name` inside `new_dir`. Refuses to link a
    /// directory.
    pub fn link(fs: &mut Ext2Fs, old: VNode, new_dir: VNode, new_name: &[u8]) -> FsResult<()> {
        if old.is_dir() {
            return Err(Error::Invalid);
        }
        fs.link(old.inum, new_dir.inum, new_name)
    }

    /// Resolves `path` to the parent-of-tail directory, then unlinks the
    /// tail component from it. Refuses to unlink the root (an empty path, or
    /// one with no parent to unlink from).
    pub fn unlink(fs: &mut Ext2Fs, root: VNode, parent: VNode, path: &[u8]) -> FsResult<()> {
        let parsed = parse_path(path)?;
        let Some((&tail, init)) = parsed.components.split_last() else {
            return Err(Error::Invalid);
        };
        let mut depth = 0;
        let dir = Self::walk(fs, root, parent, parsed.absolute, init, &mut depth)?;
        if !dir.is_dir() {
            return Err(Error::NotDir);
        }
        fs.unlink(dir.inum, tail)
    }

    pub fn readdir(fs: &mut Ext2Fs, dir: VNode, index: u32) -> FsResult<Option<DirEntry>> {
        fs.readdir(dir.inum, index)
    }

    pub fn read(fs: &mut Ext2Fs, node: VNode, off: u64, dst: &mut [u8]) -> FsResult<usize> {
        fs.read(node.inum, off, dst)
    }

    pub fn write(fs: &mut Ext2Fs, node: VNode, off: u64, src: &[u8]) -> FsResult<usize> {
        fs.write(node.inum, off, src)
    }

    pub fn truncate(fs: &mut Ext2Fs, node: VNode) -> FsResult<()> {
        fs.truncate(node.inum)
    }

    pub fn stat(fs: &mut Ext2Fs, node: VNode) -> FsResult<Stat> {
        fs.stat(node.inum)
    }
}
