use alloc::collections::VecDeque;
use alloc::sync::Arc;
use spin::Mutex;

use crate::block_dev::{BlockDevice, BLOCK_SZ};
use crate::error::Result;

/// 块缓存管理器默认容量
pub const BLOCK_CACHE_SIZE: usize = 64;

/// 块数据，按 8 字节对齐以便以 `u16`/`u32`/`u64` 视图访问
#[repr(C, align(8))]
struct BlockData([u8; BLOCK_SZ]);

/// 一个磁盘块在内存中的副本
///
/// 同一块号在任意时刻至多存在一个 `BlockCache`。
pub struct BlockCache {
    cache: BlockData,
    /// 块编号
    block_id: usize,
    block_device: Arc<dyn BlockDevice>,
    /// 内容与设备上不一致
    modified: bool,
}

impl BlockCache {
    /// 从块设备读入指定块，modified 初始为 false
    pub fn load(block_id: usize, block_device: Arc<dyn BlockDevice>) -> Result<Self> {
        let mut cache = BlockData([0u8; BLOCK_SZ]);
        block_device.read_block(block_id, &mut cache.0)?;
        Ok(Self {
            cache,
            block_id,
            block_device,
            modified: false,
        })
    }

    /// 不读设备，直接得到一块全零且已标脏的缓存
    fn zeroed(block_id: usize, block_device: Arc<dyn BlockDevice>) -> Self {
        Self {
            cache: BlockData([0u8; BLOCK_SZ]),
            block_id,
            block_device,
            modified: true,
        }
    }

    /// 块编号
    pub fn block_id(&self) -> usize {
        self.block_id
    }

    /// 是否有未写回的修改
    pub fn is_dirty(&self) -> bool {
        self.modified
    }

    /// 标记为脏，等待写回
    pub fn mark_dirty(&mut self) {
        self.modified = true;
    }

    /// `offset` 处 `T` 的只读视图
    ///
    /// # Safety
    /// 调用者需确保：
    /// - T 使用 #[repr(C)] 布局，且任意位模式都合法
    /// - offset 满足对齐要求（对齐不超过 8）
    /// - offset + size_of::<T>() <= 1024
    pub fn get_ref<T>(&self, offset: usize) -> &T {
        let type_size = core::mem::size_of::<T>();
        assert!(offset + type_size <= BLOCK_SZ);
        assert_eq!(offset % core::mem::align_of::<T>(), 0);
        let addr = self.cache.0[offset..].as_ptr() as *const T;
        unsafe { &*addr }
    }

    /// `offset` 处 `T` 的可写视图，块随之标脏，约束同 [`get_ref`](Self::get_ref)
    pub fn get_mut<T>(&mut self, offset: usize) -> &mut T {
        let type_size = core::mem::size_of::<T>();
        assert!(offset + type_size <= BLOCK_SZ);
        assert_eq!(offset % core::mem::align_of::<T>(), 0);
        self.modified = true;
        let addr = self.cache.0[offset..].as_mut_ptr() as *mut T;
        unsafe { &mut *addr }
    }

    /// 在只读视图上执行 `f`
    pub fn read<T, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.get_ref(offset))
    }

    /// 在可写视图上执行 `f`，块标脏
    pub fn modify<T, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        f(self.get_mut(offset))
    }

    /// 整块覆盖为给定内容，并清除脏标记（内容已在设备上）
    fn overwrite_clean(&mut self, data: &[u8; BLOCK_SZ]) {
        self.cache.0.copy_from_slice(data);
        self.modified = false;
    }

    /// 脏块写回设备
    pub fn sync(&mut self) -> Result<()> {
        if self.modified {
            self.block_device.write_block(self.block_id, &self.cache.0)?;
            self.modified = false;
        }
        Ok(())
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            log::error!("block {}: write back on drop failed: {}", self.block_id, e);
        }
    }
}

/// 块缓存管理器
///
/// 由挂载的文件系统实例持有，管理块缓存的复用和替换。
/// 外部持有的 `Arc` 即引用计数：只有管理器自己持有的条目才能被替换。
pub struct BlockCacheManager {
    /// 块设备
    block_device: Arc<dyn BlockDevice>,
    /// 按载入顺序排列，替换时从队首找起
    queue: VecDeque<(usize, Arc<Mutex<BlockCache>>)>,
    /// 期望容量
    capacity: usize,
}

impl BlockCacheManager {
    pub fn new(block_device: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        Self {
            block_device,
            queue: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// 已缓存的块，不触发读盘
    pub fn lookup(&self, block_id: usize) -> Option<Arc<Mutex<BlockCache>>> {
        self.queue
            .iter()
            .find(|pair| pair.0 == block_id)
            .map(|pair| Arc::clone(&pair.1))
    }

    /// 获取指定块的缓存
    ///
    /// 行为：
    /// - 已缓存：返回现有引用
    /// - 未缓存：必要时替换一个无人引用的条目，再从设备读入
    /// - 读盘失败：返回 `Io`，不缓存
    pub fn get_block_cache(&mut self, block_id: usize) -> Result<Arc<Mutex<BlockCache>>> {
        if let Some(cache) = self.lookup(block_id) {
            return Ok(cache);
        }
        self.make_room()?;
        let block_cache = Arc::new(Mutex::new(BlockCache::load(
            block_id,
            Arc::clone(&self.block_device),
        )?));
        self.queue.push_back((block_id, Arc::clone(&block_cache)));
        Ok(block_cache)
    }

    /// 获取一块清零的缓存（不读设备），用于新分配的块
    pub fn get_zeroed_block(&mut self, block_id: usize) -> Result<Arc<Mutex<BlockCache>>> {
        if let Some(cache) = self.lookup(block_id) {
            cache.lock().modify(0, |data: &mut [u8; BLOCK_SZ]| data.fill(0));
            return Ok(cache);
        }
        self.make_room()?;
        let block_cache = Arc::new(Mutex::new(BlockCache::zeroed(
            block_id,
            Arc::clone(&self.block_device),
        )));
        self.queue.push_back((block_id, Arc::clone(&block_cache)));
        Ok(block_cache)
    }

    /// 整块直写设备，并覆盖已缓存的副本
    pub fn write_through(&mut self, block_id: usize, data: &[u8; BLOCK_SZ]) -> Result<()> {
        self.block_device.write_block(block_id, data)?;
        if let Some(cache) = self.lookup(block_id) {
            cache.lock().overwrite_clean(data);
        }
        Ok(())
    }

    /// 写回全部脏块
    pub fn sync_all(&self) -> Result<()> {
        for (_, cache) in self.queue.iter() {
            cache.lock().sync()?;
        }
        Ok(())
    }

    /// 写回并丢弃所有无人引用的缓存
    pub fn release_unused(&mut self) -> Result<()> {
        self.sync_all()?;
        self.queue.retain(|(_, cache)| Arc::strong_count(cache) > 1);
        Ok(())
    }

    /// 当前缓存的块数
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// 是否没有缓存任何块
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// 队列已满时替换最早的、只被管理器持有的缓存；全部被引用时放宽容量
    fn make_room(&mut self) -> Result<()> {
        if self.queue.len() < self.capacity {
            return Ok(());
        }
        let victim = self
            .queue
            .iter()
            .position(|pair| Arc::strong_count(&pair.1) == 1);
        match victim {
            Some(idx) => {
                // 写回成功后才出队，失败时脏块留在缓存里
                self.queue[idx].1.lock().sync()?;
                self.queue.remove(idx);
            }
            None => log::warn!(
                "block cache: all {} buffers referenced, growing pool",
                self.queue.len()
            ),
        }
        Ok(())
    }
}
