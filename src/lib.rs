//! A read/write driver for the second extended filesystem (ext2), layered
//! under a small virtual filesystem abstraction.
//!
//! The on-disk layout engine (superblock, group descriptors, bitmaps,
//! inodes, block mapping, directory records) lives in [`superblock`],
//! [`group`], [`bitmap`], [`inode`], [`dirent`], and [`fileio`]; [`ext2`]
//! composes them into the mount-level driver operations that [`vfs`]
//! dispatches path-based requests to.

pub mod bitmap;
pub mod device;
pub mod dirent;
pub mod error;
pub mod ext2;
pub mod fileio;
pub mod group;
pub mod inode;
pub mod superblock;
pub mod vfs;

pub use error::{Error, FsResult};
pub use ext2::Ext2Fs;
pub use vfs::{VNode, Vfs};
