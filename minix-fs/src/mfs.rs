use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::block_cache::{BlockCache, BlockCacheManager, BLOCK_CACHE_SIZE};
use crate::block_dev::{BlockDevice, Clock, BLOCK_SZ};
use crate::error::{FsError, Result};
use crate::inode::{Inode, InodeRef};
use crate::layout::{
    Bitmap, InodeMode, SuperBlock, BLOCK_BITS, INODES_PER_BLOCK, INODE_SZ, I_MAP_SLOTS, ROOT_INO,
    SUPER_BLOCK_ID, Z_MAP_SLOTS,
};

/// 格式化参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatParams {
    /// inode 总数
    pub inodes: u16,
    /// 区总数（卷上的块数）
    pub zones: u16,
    /// inode 位图块数
    pub imap_blocks: u16,
    /// 区位图块数
    pub zmap_blocks: u16,
}

impl Default for FormatParams {
    /// 经典几何：3 块 inode 位图、8 块区位图，第一个数据区为 700
    fn default() -> Self {
        Self {
            inodes: (700 - 2 - 3 - 8) * INODES_PER_BLOCK as u16,
            zones: u16::MAX,
            imap_blocks: 3,
            zmap_blocks: 8,
        }
    }
}

bitflags::bitflags! {
    /// 挂载选项
    pub struct MountFlags: u32 {
        /// 只读挂载
        const RDONLY = 1 << 0;
    }
}

/// 超级块运行时标记
struct SuperFlags {
    /// 位图自上次同步以来被修改过
    dirty: bool,
    /// 只读卷
    read_only: bool,
}

/// 已挂载的 MINIX 文件系统
///
/// 整合磁盘布局、块缓存、位图和 inode 缓存，每个挂载的设备一个实例。
pub struct MinixFileSystem {
    /// 设备号
    dev: u32,
    /// 时间源
    clock: Arc<dyn Clock>,
    /// 超级块副本，挂载后不变
    super_block: SuperBlock,
    flags: Mutex<SuperFlags>,
    /// 块缓存
    cache: Mutex<BlockCacheManager>,
    /// inode 位图
    inode_bitmap: Bitmap,
    /// 区位图
    zone_bitmap: Bitmap,
    /// inode 缓存，键为 (设备号, inode 编号)
    pub(crate) inodes: Mutex<BTreeMap<(u32, u32), Arc<Inode>>>,
}

impl MinixFileSystem {
    /// 创建文件系统
    ///
    /// # 流程
    ///
    /// 1. 校验几何参数并探测卷的最后一块
    /// 2. 清零位图与 inode 表
    /// 3. 写入超级块并挂载
    /// 4. 创建根目录（`.` 与 `..` 都指向自身，链接数 2）
    /// 5. 同步并返回挂载好的实例
    pub fn format(
        dev: u32,
        block_device: Arc<dyn BlockDevice>,
        clock: Arc<dyn Clock>,
        params: FormatParams,
    ) -> Result<Arc<Self>> {
        let super_block = Self::check_geometry(&params)?;

        // 卷必须覆盖最后一个区
        let mut probe = [0u8; BLOCK_SZ];
        block_device.read_block(params.zones as usize - 1, &mut probe)?;

        let mut cache = BlockCacheManager::new(Arc::clone(&block_device), BLOCK_CACHE_SIZE);
        let zero = [0u8; BLOCK_SZ];
        for block_id in super_block.imap_start()..super_block.first_data_zone as usize {
            cache.write_through(block_id, &zero)?;
        }
        cache
            .get_zeroed_block(SUPER_BLOCK_ID)?
            .lock()
            .modify(0, |sb: &mut SuperBlock| *sb = super_block);
        cache.sync_all()?;

        let fs = Self::mount_with(dev, cache, super_block, clock, MountFlags::empty())?;

        let root = fs.new_inode()?;
        if root.ino() != ROOT_INO {
            log::error!("format: root got inode {}", root.ino());
            return Err(FsError::InternalInconsistency);
        }
        root.modify_disk(|disk_inode| {
            disk_inode.mode = InodeMode::directory().bits();
            disk_inode.nlinks = 2;
        });
        root.init_directory(ROOT_INO)?;
        drop(root);
        fs.sync()?;

        log::info!(
            "format: {} inodes, {} zones, first data zone {}",
            super_block.ninodes,
            super_block.nzones,
            super_block.first_data_zone
        );
        Ok(fs)
    }

    /// 打开文件系统
    ///
    /// 读取第 1 块的超级块并校验魔数，载入全部位图块，置位哨兵，检查根目录。
    pub fn mount(
        dev: u32,
        block_device: Arc<dyn BlockDevice>,
        clock: Arc<dyn Clock>,
        flags: MountFlags,
    ) -> Result<Arc<Self>> {
        let mut cache = BlockCacheManager::new(block_device, BLOCK_CACHE_SIZE);
        let super_block = cache
            .get_block_cache(SUPER_BLOCK_ID)?
            .lock()
            .read(0, |sb: &SuperBlock| *sb);
        if !super_block.is_valid() {
            log::warn!("mount: bad super block (magic {:#x})", super_block.magic);
            return Err(FsError::InvalidSuperBlock);
        }
        let fs = Self::mount_with(dev, cache, super_block, clock, flags)?;

        let root = fs.root_inode().map_err(|e| {
            log::error!("mount: cannot read root inode: {}", e);
            e
        })?;
        if !root.is_dir() {
            log::error!("mount: root inode is not a directory");
            return Err(FsError::InternalInconsistency);
        }
        drop(root);

        log::info!(
            "mount: {}/{} free blocks, {}/{} free inodes",
            fs.free_zone_count(),
            super_block.data_zones(),
            fs.free_inode_count(),
            super_block.ninodes
        );
        Ok(fs)
    }

    fn mount_with(
        dev: u32,
        mut cache: BlockCacheManager,
        super_block: SuperBlock,
        clock: Arc<dyn Clock>,
        flags: MountFlags,
    ) -> Result<Arc<Self>> {
        let imap = (0..super_block.imap_blocks as usize)
            .map(|i| cache.get_block_cache(super_block.imap_start() + i))
            .collect::<Result<Vec<_>>>()?;
        let zmap = (0..super_block.zmap_blocks as usize)
            .map(|i| cache.get_block_cache(super_block.zmap_start() + i))
            .collect::<Result<Vec<_>>>()?;
        let inode_bitmap = Bitmap::new(imap, super_block.ninodes as usize);
        let zone_bitmap = Bitmap::new(zmap, super_block.data_zones());
        inode_bitmap.reserve_sentinel();
        zone_bitmap.reserve_sentinel();

        Ok(Arc::new(Self {
            dev,
            clock,
            super_block,
            flags: Mutex::new(SuperFlags {
                dirty: false,
                read_only: flags.contains(MountFlags::RDONLY),
            }),
            cache: Mutex::new(cache),
            inode_bitmap,
            zone_bitmap,
            inodes: Mutex::new(BTreeMap::new()),
        }))
    }

    fn check_geometry(params: &FormatParams) -> Result<SuperBlock> {
        let invalid = |why: &str| {
            log::warn!("format: {}", why);
            Err(FsError::InvalidArgument)
        };
        if params.inodes == 0 {
            return invalid("no inodes");
        }
        if params.imap_blocks == 0 || params.imap_blocks as usize > I_MAP_SLOTS {
            return invalid("bad inode bitmap size");
        }
        if params.zmap_blocks == 0 || params.zmap_blocks as usize > Z_MAP_SLOTS {
            return invalid("bad zone bitmap size");
        }
        let table_blocks = (params.inodes as usize + INODES_PER_BLOCK - 1) / INODES_PER_BLOCK;
        let first_data_zone =
            2 + params.imap_blocks as usize + params.zmap_blocks as usize + table_blocks;
        if first_data_zone >= params.zones as usize {
            return invalid("metadata does not fit in the volume");
        }
        if params.imap_blocks as usize * BLOCK_BITS < params.inodes as usize + 1 {
            return invalid("inode bitmap too small");
        }
        if params.zmap_blocks as usize * BLOCK_BITS < params.zones as usize - first_data_zone + 1 {
            return invalid("zone bitmap too small");
        }
        Ok(SuperBlock::new(
            params.inodes,
            params.zones,
            params.imap_blocks,
            params.zmap_blocks,
        ))
    }

    /// 设备号
    pub fn dev(&self) -> u32 {
        self.dev
    }

    /// 超级块（卷几何）
    pub fn geometry(&self) -> SuperBlock {
        self.super_block
    }

    /// 当前时间
    pub fn now(&self) -> u32 {
        self.clock.now()
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.lock().read_only
    }

    /// 位图自上次同步后是否被修改
    pub fn is_dirty(&self) -> bool {
        self.flags.lock().dirty
    }

    /// 只读卷上的写操作返回 `PermissionDenied`
    pub fn check_writable(&self) -> Result<()> {
        if self.is_read_only() {
            Err(FsError::PermissionDenied)
        } else {
            Ok(())
        }
    }

    fn mark_dirty(&self) {
        self.flags.lock().dirty = true;
    }

    /// 获取根目录的 Inode
    pub fn root_inode(self: &Arc<Self>) -> Result<InodeRef> {
        self.get_inode(ROOT_INO)
    }

    /// 经块缓存获取一块
    pub fn get_block(&self, block_id: usize) -> Result<Arc<Mutex<BlockCache>>> {
        self.cache.lock().get_block_cache(block_id)
    }

    /// 获取磁盘 inode 的位置
    ///
    /// # Returns
    ///
    /// `(block_id, offset)` - 块号和块内偏移
    pub fn disk_inode_pos(&self, ino: u32) -> (usize, usize) {
        let index = ino as usize - 1;
        (
            self.super_block.inode_table_start() + index / INODES_PER_BLOCK,
            (index % INODES_PER_BLOCK) * INODE_SZ,
        )
    }

    /// 分配一个数据区
    ///
    /// 返回编号最小的空闲区的磁盘块号，新块内容清零。
    pub fn alloc_zone(&self) -> Result<u32> {
        self.check_writable()?;
        let bit = self.zone_bitmap.alloc().ok_or(FsError::OutOfSpace)?;
        self.mark_dirty();
        let block_id = self.super_block.first_data_zone as usize - 1 + bit;
        self.cache.lock().get_zeroed_block(block_id)?;
        log::debug!("alloc zone {}", block_id);
        Ok(block_id as u32)
    }

    /// 回收一个数据区
    ///
    /// 清除位图中的对应位，已缓存的块内容清零。
    pub fn free_zone(&self, block_id: u32) -> Result<()> {
        self.check_writable()?;
        let block_id = block_id as usize;
        let first = self.super_block.first_data_zone as usize;
        if block_id < first || block_id >= self.super_block.nzones as usize {
            log::error!("free_zone: block {} outside the data area", block_id);
            return Err(FsError::InvalidArgument);
        }
        if !self.zone_bitmap.dealloc(block_id - first + 1) {
            log::warn!("free_zone: bit of block {} already cleared", block_id);
        }
        self.mark_dirty();
        if let Some(cache) = self.cache.lock().lookup(block_id) {
            cache.lock().modify(0, |data: &mut [u8; BLOCK_SZ]| data.fill(0));
        }
        log::debug!("free zone {}", block_id);
        Ok(())
    }

    /// 分配一个 inode 编号
    pub fn alloc_inode_number(&self) -> Result<u32> {
        self.check_writable()?;
        let bit = self.inode_bitmap.alloc().ok_or(FsError::OutOfSpace)?;
        self.mark_dirty();
        log::debug!("alloc inode {}", bit);
        Ok(bit as u32)
    }

    /// 回收一个 inode 编号
    pub fn free_inode_number(&self, ino: u32) -> Result<()> {
        self.check_writable()?;
        if ino == 0 || ino > self.super_block.ninodes as u32 {
            log::error!("free_inode: inode {} out of range", ino);
            return Err(FsError::InvalidArgument);
        }
        if !self.inode_bitmap.dealloc(ino as usize) {
            log::warn!("free_inode: bit of inode {} already cleared", ino);
        }
        self.mark_dirty();
        log::debug!("free inode {}", ino);
        Ok(())
    }

    /// 区位图是否标记该块已分配
    pub fn zone_in_use(&self, block_id: u32) -> bool {
        let first = self.super_block.first_data_zone as u32;
        block_id >= first && self.zone_bitmap.is_set((block_id - first + 1) as usize)
    }

    /// inode 位图是否标记该编号已分配
    pub fn inode_in_use(&self, ino: u32) -> bool {
        self.inode_bitmap.is_set(ino as usize)
    }

    /// 空闲数据区数量
    pub fn free_zone_count(&self) -> usize {
        self.zone_bitmap.count_free()
    }

    /// 空闲 inode 数量
    pub fn free_inode_count(&self) -> usize {
        self.inode_bitmap.count_free()
    }

    /// 写回所有脏 inode 和脏块
    pub fn sync(&self) -> Result<()> {
        if self.is_read_only() {
            return Ok(());
        }
        self.sync_inodes()?;
        self.cache.lock().sync_all()?;
        self.flags.lock().dirty = false;
        Ok(())
    }

    /// 同步后丢弃所有无人引用的块缓存
    pub fn release_unused(&self) -> Result<()> {
        self.sync()?;
        self.cache.lock().release_unused()
    }
}
