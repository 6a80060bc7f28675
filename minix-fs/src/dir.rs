//! 目录项查找、插入与删除
//!
//! 目录文件由 16 字节的 [`DirEntry`] 顺序组成，inode 编号为 0 的项为空闲项。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::block_cache::BlockCache;
use crate::error::{FsError, Result};
use crate::inode::InodeRef;
use crate::layout::{DirEntry, DIRENT_SZ, DIR_ENTRIES_PER_BLOCK, NAME_LEN};

/// 目录项在缓存块中的位置
///
/// 持有所在块的缓存引用，存活期间该块不会被替换。
pub struct DirSlot {
    block: Arc<Mutex<BlockCache>>,
    offset: usize,
}

impl DirSlot {
    /// 读出目录项
    pub fn entry(&self) -> DirEntry {
        self.block.lock().read(self.offset, |entry: &DirEntry| *entry)
    }

    pub fn inode_number(&self) -> u32 {
        self.entry().inode_number()
    }

    /// 改写 inode 编号，所在块标脏
    pub fn set_inode_number(&self, ino: u32) {
        self.block
            .lock()
            .modify(self.offset, |entry: &mut DirEntry| entry.set_inode_number(ino));
    }

    /// 清空目录项（inode 编号置 0，名字保留）
    pub fn clear(&self) {
        self.set_inode_number(0);
    }
}

/// 目录列表中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub ino: u32,
}

impl InodeRef {
    /// 按顺序遍历目录项，`f` 返回 Some 时停止
    ///
    /// 只遍历 `size / 16` 项，跳过未分配的块。
    fn scan_entries<R>(
        &self,
        mut f: impl FnMut(usize, &Arc<Mutex<BlockCache>>, usize, &DirEntry) -> Option<R>,
    ) -> Result<Option<R>> {
        let entries = self.size() as usize / DIRENT_SZ;
        let blocks = (entries + DIR_ENTRIES_PER_BLOCK - 1) / DIR_ENTRIES_PER_BLOCK;
        for block in 0..blocks {
            let Some(block_id) = self.bmap(block)? else {
                continue;
            };
            let cache = self.fs().get_block(block_id as usize)?;
            let first = block * DIR_ENTRIES_PER_BLOCK;
            let last = entries.min(first + DIR_ENTRIES_PER_BLOCK);
            for index in first..last {
                let offset = (index - first) * DIRENT_SZ;
                let entry = cache.lock().read(offset, |entry: &DirEntry| *entry);
                if let Some(found) = f(index, &cache, offset, &entry) {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    /// 在目录中查找名字
    ///
    /// 空名字等同于 `.`；超过 14 字节的名字不会匹配任何项。
    pub fn find_entry(&self, name: &str) -> Result<Option<DirSlot>> {
        if !self.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let name = if name.is_empty() { "." } else { name };
        if name.len() > NAME_LEN {
            return Ok(None);
        }
        self.scan_entries(|_, cache, offset, entry| {
            entry.matches(name).then(|| DirSlot {
                block: Arc::clone(cache),
                offset,
            })
        })
    }

    /// 查找名字并取得对应 inode
    pub fn lookup(&self, name: &str) -> Result<InodeRef> {
        let ino = self
            .find_entry(name)?
            .ok_or(FsError::PathNotFound)?
            .inode_number();
        self.fs().get_inode(ino).map_err(|e| match e {
            FsError::Io => FsError::Io,
            _ => {
                log::error!("dir {}: entry {:?} points to bad inode {}", self.ino(), name, ino);
                FsError::InternalInconsistency
            }
        })
    }

    /// 插入目录项
    ///
    /// 复用第一个空闲项，没有空闲项时追加到末尾，必要时为目录分配新块。
    pub fn add_entry(&self, name: &str, ino: u32) -> Result<DirSlot> {
        if !self.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if name.is_empty() || name.len() > NAME_LEN {
            return Err(FsError::InvalidArgument);
        }
        let free = self.scan_entries(|index, cache, offset, entry| {
            (entry.inode_number() == 0).then(|| (index, Arc::clone(cache), offset))
        })?;
        let (index, block, offset) = match free {
            Some(found) => found,
            None => {
                let index = self.size() as usize / DIRENT_SZ;
                let block_id = self.create_block(index / DIR_ENTRIES_PER_BLOCK)?;
                let cache = self.fs().get_block(block_id as usize)?;
                (index, cache, (index % DIR_ENTRIES_PER_BLOCK) * DIRENT_SZ)
            }
        };
        block
            .lock()
            .modify(offset, |entry: &mut DirEntry| *entry = DirEntry::new(name, ino));
        self.extend_size((index + 1) * DIRENT_SZ);
        let now = self.fs().now();
        self.set_mtime(now);
        self.set_ctime(now);
        Ok(DirSlot { block, offset })
    }

    /// 列出所有占用的目录项
    pub fn entries(&self) -> Result<Vec<DirEntryInfo>> {
        if !self.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let mut list = Vec::new();
        self.scan_entries(|_, _, _, entry| {
            if entry.inode_number() != 0 {
                list.push(DirEntryInfo {
                    name: String::from(entry.name()),
                    ino: entry.inode_number(),
                });
            }
            None::<()>
        })?;
        Ok(list)
    }

    /// 目录是否只含 `.` 和 `..`
    ///
    /// 前两项不是 `.` 和 `..` 时视为损坏，按非空处理。
    pub fn is_empty_dir(&self) -> Result<bool> {
        let entries = self.size() as usize / DIRENT_SZ;
        if entries < 2 || self.read_disk(|disk_inode| disk_inode.zone[0]) == 0 {
            log::warn!("bad directory {} on dev {:04x}", self.ino(), self.dev());
            return Ok(false);
        }
        let own = self.ino();
        let verdict = self.scan_entries(|index, _, _, entry| match index {
            0 if entry.inode_number() != own || entry.name_bytes() != b"." => Some(true),
            1 if entry.inode_number() == 0 || entry.name_bytes() != b".." => Some(true),
            0 | 1 => None,
            _ => (entry.inode_number() != 0).then(|| false),
        })?;
        match verdict {
            None => Ok(true),
            Some(true) => {
                log::warn!("bad directory {} on dev {:04x}", own, self.dev());
                Ok(false)
            }
            Some(false) => Ok(false),
        }
    }

    /// 查找指向 `ino` 的名字，忽略 `.` 和 `..`
    pub fn name_of(&self, ino: u32) -> Result<Option<String>> {
        self.scan_entries(|_, _, _, entry| {
            let dot = entry.name_bytes() == b"." || entry.name_bytes() == b"..";
            (entry.inode_number() == ino && !dot).then(|| String::from(entry.name()))
        })
    }

    /// 为新目录写入 `.` 和 `..`，长度置为两项
    pub(crate) fn init_directory(&self, parent: u32) -> Result<()> {
        let block_id = self.create_block(0)?;
        self.fs()
            .get_block(block_id as usize)?
            .lock()
            .modify(0, |entries: &mut [DirEntry; 2]| {
                entries[0] = DirEntry::new(".", self.ino());
                entries[1] = DirEntry::new("..", parent);
            });
        self.extend_size(2 * DIRENT_SZ);
        Ok(())
    }
}
