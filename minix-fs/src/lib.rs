//! MINIX v1 文件系统引擎
//!
//! 分层：块设备 → 块缓存 → 超级块与位图 → inode 缓存与块映射 → 目录与路径 → 会话。

#![no_std]

extern crate alloc;

mod block_cache;
mod block_dev;
mod bmap;
mod dir;
mod error;
mod file;
mod inode;
mod layout;
mod mfs;
pub mod path;
mod session;

pub use block_cache::{BlockCache, BlockCacheManager, BLOCK_CACHE_SIZE};
pub use block_dev::{BlockDevice, Clock, BLOCK_SZ};
pub use bmap::{BlockPath, BlockSpan, Chunk};
pub use dir::{DirEntryInfo, DirSlot};
pub use error::{describe, FsError, Result};
pub use file::{FileHandle, OpenFlags};
pub use inode::{Inode, InodeRef, Stat};
pub use layout::{
    Bitmap, DirEntry, DiskInode, InodeMode, SuperBlock, DIRENT_SZ, INODE_DIRECT_COUNT,
    LINK_MAX, MAX_FILE_BLOCKS, NAME_LEN, ROOT_INO, SUPER_MAGIC, ZONES_PER_BLOCK,
};
pub use mfs::{FormatParams, MinixFileSystem, MountFlags};
pub use session::{Fd, Session, NR_OPEN};
