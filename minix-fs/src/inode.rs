use alloc::sync::Arc;
use core::ops::Deref;
use spin::Mutex;

use crate::bmap::{BlockPath, BlockSpan};
use crate::error::{FsError, Result};
use crate::layout::{
    DataBlock, DiskInode, IndirectBlock, InodeMode, INDIRECT1_SLOT, INDIRECT2_SLOT,
    INODE_DIRECT_COUNT,
};
use crate::mfs::MinixFileSystem;

/// 内存中的 inode
///
/// 同一 (设备号, inode 编号) 在缓存中至多一个实例。
/// 访问时间和状态改变时间只保存在内存里，载入时取修改时间。
pub struct Inode {
    dev: u32,
    ino: u32,
    inner: Mutex<InodeInner>,
}

struct InodeInner {
    disk: DiskInode,
    atime: u32,
    ctime: u32,
    dirty: bool,
    /// 引用计数，由 [`InodeRef`] 维护
    count: usize,
}

/// inode 元数据快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub dev: u32,
    pub ino: u32,
    pub mode: InodeMode,
    pub nlinks: u32,
    pub size: u32,
    /// `zone[0]`
    pub first_zone: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

impl Inode {
    fn new(dev: u32, ino: u32, disk: DiskInode) -> Self {
        Self {
            dev,
            ino,
            inner: Mutex::new(InodeInner {
                disk,
                atime: disk.mtime,
                ctime: disk.mtime,
                dirty: false,
                count: 1,
            }),
        }
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn ino(&self) -> u32 {
        self.ino
    }

    /// 读取磁盘 inode 字段
    pub fn read_disk<V>(&self, f: impl FnOnce(&DiskInode) -> V) -> V {
        f(&self.inner.lock().disk)
    }

    /// 修改磁盘 inode 字段并标脏
    pub fn modify_disk<V>(&self, f: impl FnOnce(&mut DiskInode) -> V) -> V {
        let mut inner = self.inner.lock();
        inner.dirty = true;
        f(&mut inner.disk)
    }

    pub fn mode(&self) -> InodeMode {
        self.read_disk(|disk_inode| disk_inode.mode())
    }

    pub fn is_dir(&self) -> bool {
        self.mode().is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.mode().is_file()
    }

    pub fn size(&self) -> u32 {
        self.read_disk(|disk_inode| disk_inode.size)
    }

    pub fn nlinks(&self) -> u32 {
        self.read_disk(|disk_inode| disk_inode.nlinks as u32)
    }

    /// 当前引用计数
    pub fn count(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    pub(crate) fn set_atime(&self, now: u32) {
        self.inner.lock().atime = now;
    }

    pub(crate) fn set_mtime(&self, now: u32) {
        let mut inner = self.inner.lock();
        inner.disk.mtime = now;
        inner.dirty = true;
    }

    pub(crate) fn set_ctime(&self, now: u32) {
        let mut inner = self.inner.lock();
        inner.ctime = now;
        inner.dirty = true;
    }

    /// 文件长度增长到 `size`，不会缩短
    pub(crate) fn extend_size(&self, size: usize) {
        let mut inner = self.inner.lock();
        if size > inner.disk.size as usize {
            inner.disk.size = size as u32;
            inner.dirty = true;
        }
    }

    pub fn stat(&self) -> Stat {
        let inner = self.inner.lock();
        Stat {
            dev: self.dev,
            ino: self.ino,
            mode: inner.disk.mode(),
            nlinks: inner.disk.nlinks as u32,
            size: inner.disk.size,
            first_zone: inner.disk.zone[0] as u32,
            atime: inner.atime,
            mtime: inner.disk.mtime,
            ctime: inner.ctime,
        }
    }
}

/// 被计数的 inode 引用
///
/// 克隆即 `count + 1`，析构即放回：计数归零时写回脏 inode，
/// 链接数为 0 则释放其全部数据区和 inode 编号，然后移出缓存。
pub struct InodeRef {
    inode: Arc<Inode>,
    fs: Arc<MinixFileSystem>,
}

impl InodeRef {
    /// 所属文件系统
    pub fn fs(&self) -> &Arc<MinixFileSystem> {
        &self.fs
    }

    /// 两个引用是否指向同一个内存 inode
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inode, &b.inode)
    }

    /// 逻辑块号映射到磁盘块号，空洞返回 None
    pub fn bmap(&self, block: usize) -> Result<Option<u32>> {
        self.fs.bmap(&self.inode, block)
    }

    /// 映射逻辑块，缺失的数据块和间接块按需分配
    pub fn create_block(&self, block: usize) -> Result<u32> {
        self.fs.create_block(&self.inode, block)
    }

    /// 释放全部数据区，长度置 0
    pub fn truncate(&self) -> Result<()> {
        self.fs.truncate(&self.inode)
    }

    /// 从 `offset` 处读取，空洞读出 0，不超过文件长度
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        self.fs.read_at(&self.inode, offset, buf)
    }

    /// 写入 `offset` 处，长度按需增长
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        self.fs.write_at(&self.inode, offset, buf)
    }
}

impl Deref for InodeRef {
    type Target = Inode;

    fn deref(&self) -> &Inode {
        &self.inode
    }
}

impl Clone for InodeRef {
    fn clone(&self) -> Self {
        self.inode.inner.lock().count += 1;
        Self {
            inode: Arc::clone(&self.inode),
            fs: Arc::clone(&self.fs),
        }
    }
}

impl Drop for InodeRef {
    fn drop(&mut self) {
        self.fs.put_inode(&self.inode);
    }
}

impl core::fmt::Debug for InodeRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "InodeRef({:04x}:{})", self.inode.dev, self.inode.ino)
    }
}

impl MinixFileSystem {
    /// 获取 inode
    ///
    /// 已缓存时计数加一，否则从 inode 表读入。
    pub fn get_inode(self: &Arc<Self>, ino: u32) -> Result<InodeRef> {
        if ino == 0 || ino > self.geometry().ninodes as u32 {
            log::warn!("iget: inode {} out of range", ino);
            return Err(FsError::InvalidArgument);
        }
        let mut inodes = self.inodes.lock();
        let key = (self.dev(), ino);
        if let Some(inode) = inodes.get(&key) {
            inode.inner.lock().count += 1;
            return Ok(InodeRef {
                inode: Arc::clone(inode),
                fs: Arc::clone(self),
            });
        }
        let (block_id, offset) = self.disk_inode_pos(ino);
        let disk = self
            .get_block(block_id)?
            .lock()
            .read(offset, |disk_inode: &DiskInode| *disk_inode);
        let inode = Arc::new(Inode::new(self.dev(), ino, disk));
        inodes.insert(key, Arc::clone(&inode));
        Ok(InodeRef {
            inode,
            fs: Arc::clone(self),
        })
    }

    /// 分配一个新的 inode
    ///
    /// 链接数为 1，时间戳取当前时间，其余字段清零。
    pub fn new_inode(self: &Arc<Self>) -> Result<InodeRef> {
        let ino = self.alloc_inode_number()?;
        let now = self.now();
        let mut disk = DiskInode::empty();
        disk.nlinks = 1;
        disk.mtime = now;
        let inode = Arc::new(Inode::new(self.dev(), ino, disk));
        inode.inner.lock().dirty = true;
        let stale = self
            .inodes
            .lock()
            .insert((self.dev(), ino), Arc::clone(&inode));
        if stale.is_some() {
            log::error!("new_inode: inode {} was still cached", ino);
        }
        Ok(InodeRef {
            inode,
            fs: Arc::clone(self),
        })
    }

    fn put_inode(&self, inode: &Arc<Inode>) {
        let mut inodes = self.inodes.lock();
        let (reclaim, dirty) = {
            let mut inner = inode.inner.lock();
            if inner.count == 0 {
                log::error!("iput: inode {} already free", inode.ino);
                return;
            }
            inner.count -= 1;
            if inner.count > 0 {
                return;
            }
            (inner.disk.nlinks == 0, inner.dirty)
        };
        inodes.remove(&(inode.dev, inode.ino));
        drop(inodes);
        if reclaim {
            if let Err(e) = self.reclaim_inode(inode) {
                log::error!("iput: cannot free inode {}: {}", inode.ino, e);
            }
        } else if dirty {
            if let Err(e) = self.write_inode(inode) {
                log::error!("iput: cannot write inode {}: {}", inode.ino, e);
            }
        }
    }

    /// 链接数为 0 的 inode：释放数据区，清空磁盘 inode，回收编号
    fn reclaim_inode(&self, inode: &Inode) -> Result<()> {
        self.truncate(inode)?;
        inode.modify_disk(|disk_inode| *disk_inode = DiskInode::empty());
        self.write_inode(inode)?;
        self.free_inode_number(inode.ino)?;
        log::debug!("freed inode {}", inode.ino);
        Ok(())
    }

    fn write_inode(&self, inode: &Inode) -> Result<()> {
        if self.is_read_only() {
            inode.inner.lock().dirty = false;
            return Ok(());
        }
        let (block_id, offset) = self.disk_inode_pos(inode.ino);
        let disk = inode.read_disk(|disk_inode| *disk_inode);
        self.get_block(block_id)?
            .lock()
            .modify(offset, |disk_inode: &mut DiskInode| *disk_inode = disk);
        inode.inner.lock().dirty = false;
        Ok(())
    }

    /// 把所有脏的内存 inode 写入 inode 表
    pub fn sync_inodes(&self) -> Result<()> {
        let inodes = self.inodes.lock();
        for inode in inodes.values() {
            if inode.is_dirty() {
                self.write_inode(inode)?;
            }
        }
        Ok(())
    }

    /// 当前缓存的 inode 数
    pub fn cached_inodes(&self) -> usize {
        self.inodes.lock().len()
    }

    pub(crate) fn bmap(&self, inode: &Inode, block: usize) -> Result<Option<u32>> {
        let path = BlockPath::locate(block).ok_or(FsError::FileTooLarge)?;
        let zone = inode.read_disk(|disk_inode| disk_inode.zone);
        let entry = |table: u16, idx: usize| -> Result<u16> {
            if table == 0 {
                return Ok(0);
            }
            Ok(self
                .get_block(table as usize)?
                .lock()
                .read(0, |indirect: &IndirectBlock| indirect[idx]))
        };
        let block_id = match path {
            BlockPath::Direct(i) => zone[i],
            BlockPath::Indirect(i) => entry(zone[INDIRECT1_SLOT], i)?,
            BlockPath::DoubleIndirect(outer, i) => entry(entry(zone[INDIRECT2_SLOT], outer)?, i)?,
        };
        Ok((block_id != 0).then(|| block_id as u32))
    }

    pub(crate) fn create_block(&self, inode: &Inode, block: usize) -> Result<u32> {
        match BlockPath::locate(block).ok_or(FsError::FileTooLarge)? {
            BlockPath::Direct(i) => self.ensure_slot(inode, i),
            BlockPath::Indirect(i) => {
                let table = self.ensure_slot(inode, INDIRECT1_SLOT)?;
                self.ensure_entry(table, i)
            }
            BlockPath::DoubleIndirect(outer, i) => {
                let outer_table = self.ensure_slot(inode, INDIRECT2_SLOT)?;
                let table = self.ensure_entry(outer_table, outer)?;
                self.ensure_entry(table, i)
            }
        }
    }

    /// inode 中 `zone[slot]` 为空时分配一个新区
    fn ensure_slot(&self, inode: &Inode, slot: usize) -> Result<u32> {
        let mut inner = inode.inner.lock();
        let block_id = inner.disk.zone[slot];
        if block_id != 0 {
            return Ok(block_id as u32);
        }
        let block_id = self.alloc_zone()?;
        inner.disk.zone[slot] = block_id as u16;
        inner.ctime = self.now();
        inner.dirty = true;
        Ok(block_id)
    }

    /// 间接块第 `idx` 项为空时分配一个新区
    fn ensure_entry(&self, table: u32, idx: usize) -> Result<u32> {
        let table_block = self.get_block(table as usize)?;
        let mut table_block = table_block.lock();
        let block_id = table_block.read(0, |indirect: &IndirectBlock| indirect[idx]);
        if block_id != 0 {
            return Ok(block_id as u32);
        }
        let block_id = self.alloc_zone()?;
        table_block.modify(0, |indirect: &mut IndirectBlock| {
            indirect[idx] = block_id as u16
        });
        Ok(block_id)
    }

    /// 依次释放直接区、一级间接区及其表块、二级间接结构
    pub(crate) fn truncate(&self, inode: &Inode) -> Result<()> {
        if !(inode.is_dir() || inode.is_file()) {
            return Ok(());
        }
        let zone = inode.read_disk(|disk_inode| disk_inode.zone);
        for &block_id in zone[..INODE_DIRECT_COUNT].iter() {
            if block_id != 0 {
                self.free_zone(block_id as u32)?;
            }
        }
        if zone[INDIRECT1_SLOT] != 0 {
            self.free_indirect(zone[INDIRECT1_SLOT])?;
        }
        if zone[INDIRECT2_SLOT] != 0 {
            let outer = self.indirect_entries(zone[INDIRECT2_SLOT])?;
            for &table in outer.iter().filter(|&&t| t != 0) {
                self.free_indirect(table)?;
            }
            self.free_zone(zone[INDIRECT2_SLOT] as u32)?;
        }
        let now = self.now();
        let mut inner = inode.inner.lock();
        inner.disk.zone = [0; 9];
        inner.disk.size = 0;
        inner.disk.mtime = now;
        inner.ctime = now;
        inner.dirty = true;
        Ok(())
    }

    fn indirect_entries(&self, table: u16) -> Result<IndirectBlock> {
        Ok(self
            .get_block(table as usize)?
            .lock()
            .read(0, |indirect: &IndirectBlock| *indirect))
    }

    fn free_indirect(&self, table: u16) -> Result<()> {
        let entries = self.indirect_entries(table)?;
        for &block_id in entries.iter().filter(|&&b| b != 0) {
            self.free_zone(block_id as u32)?;
        }
        self.free_zone(table as u32)
    }

    pub(crate) fn read_at(&self, inode: &Inode, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let size = inode.size() as usize;
        if offset >= size {
            return Ok(0);
        }
        let len = buf.len().min(size - offset);
        let mut done = 0usize;
        for chunk in BlockSpan::new(offset, len) {
            let dst = &mut buf[done..done + chunk.len];
            let copied = self.bmap(inode, chunk.block).and_then(|mapped| match mapped {
                Some(block_id) => {
                    self.get_block(block_id as usize)?
                        .lock()
                        .read(0, |data: &DataBlock| {
                            dst.copy_from_slice(&data[chunk.offset..chunk.offset + chunk.len])
                        });
                    Ok(())
                }
                None => {
                    dst.fill(0);
                    Ok(())
                }
            });
            if let Err(e) = copied {
                if done == 0 {
                    return Err(e);
                }
                log::warn!("read inode {}: stopped after {} bytes: {}", inode.ino, done, e);
                break;
            }
            done += chunk.len;
        }
        Ok(done)
    }

    pub(crate) fn write_at(&self, inode: &Inode, offset: usize, buf: &[u8]) -> Result<usize> {
        let mut done = 0usize;
        for chunk in BlockSpan::new(offset, buf.len()) {
            let src = &buf[done..done + chunk.len];
            let written = self.create_block(inode, chunk.block).and_then(|block_id| {
                self.get_block(block_id as usize)?
                    .lock()
                    .modify(0, |data: &mut DataBlock| {
                        data[chunk.offset..chunk.offset + chunk.len].copy_from_slice(src)
                    });
                Ok(())
            });
            if let Err(e) = written {
                if done == 0 {
                    return Err(e);
                }
                log::warn!("write inode {}: stopped after {} bytes: {}", inode.ino, done, e);
                break;
            }
            done += chunk.len;
            inode.extend_size(offset + done);
        }
        Ok(done)
    }
}
