use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem::size_of;
use spin::Mutex;

use crate::block_cache::BlockCache;
use crate::block_dev::BLOCK_SZ;

/// MINIX v1 魔数
pub const SUPER_MAGIC: u16 = 0x137f;
/// 根目录 inode 编号
pub const ROOT_INO: u32 = 1;
/// 文件名最大长度（不含终止符）
pub const NAME_LEN: usize = 14;
/// 单个 inode 的最大链接数
pub const LINK_MAX: u32 = 250;
/// 目录项大小（字节）
pub const DIRENT_SZ: usize = size_of::<DirEntry>();
/// 每块目录项数量 (1024 / 16 = 64)
pub const DIR_ENTRIES_PER_BLOCK: usize = BLOCK_SZ / DIRENT_SZ;
/// 磁盘 inode 大小（字节）
pub const INODE_SZ: usize = size_of::<DiskInode>();
/// 每块 inode 数量 (1024 / 32 = 32)
pub const INODES_PER_BLOCK: usize = BLOCK_SZ / INODE_SZ;
/// 直接索引数量
pub const INODE_DIRECT_COUNT: usize = 7;
/// 每个间接块可存储的区号数量 (1024 / 2 = 512)
pub const ZONES_PER_BLOCK: usize = BLOCK_SZ / size_of::<u16>();
/// 一级间接索引在 `zone` 中的下标
pub const INDIRECT1_SLOT: usize = INODE_DIRECT_COUNT;
/// 二级间接索引在 `zone` 中的下标
pub const INDIRECT2_SLOT: usize = INODE_DIRECT_COUNT + 1;
/// 单个文件能寻址的最大块数 (7 + 512 + 512 * 512)
pub const MAX_FILE_BLOCKS: usize =
    INODE_DIRECT_COUNT + ZONES_PER_BLOCK + ZONES_PER_BLOCK * ZONES_PER_BLOCK;
/// inode 位图最多块数
pub const I_MAP_SLOTS: usize = 8;
/// 区位图最多块数
pub const Z_MAP_SLOTS: usize = 8;
/// 每块的 bit 数量 (1024 * 8 = 8192)
pub const BLOCK_BITS: usize = BLOCK_SZ * 8;
/// 超级块所在块号
pub const SUPER_BLOCK_ID: usize = 1;

/// 超级块
///
/// 磁盘上的 MINIX v1 超级块，位于第 1 块。
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    /// inode 总数
    pub ninodes: u16,
    /// 区总数（含元数据区）
    pub nzones: u16,
    /// inode 位图块数
    pub imap_blocks: u16,
    /// 区位图块数
    pub zmap_blocks: u16,
    /// 第一个数据区的块号
    pub first_data_zone: u16,
    /// log2(区大小 / 块大小)，恒为 0
    pub log_zone_size: u16,
    /// 文件最大长度
    pub max_size: u32,
    /// 魔数
    pub magic: u16,
}

impl SuperBlock {
    /// 按给定几何参数构造超级块，派生第一个数据区和最大文件长度
    pub fn new(ninodes: u16, nzones: u16, imap_blocks: u16, zmap_blocks: u16) -> Self {
        let inode_table_blocks = (ninodes as usize + INODES_PER_BLOCK - 1) / INODES_PER_BLOCK;
        let first_data_zone =
            2 + imap_blocks as usize + zmap_blocks as usize + inode_table_blocks;
        let max_size = (nzones as u64 * BLOCK_SZ as u64)
            .min(BLOCK_SZ as u64 * MAX_FILE_BLOCKS as u64);
        Self {
            ninodes,
            nzones,
            imap_blocks,
            zmap_blocks,
            first_data_zone: first_data_zone.min(u16::MAX as usize) as u16,
            log_zone_size: 0,
            max_size: max_size as u32,
            magic: SUPER_MAGIC,
        }
    }

    /// 验证魔数与位图块数
    pub fn is_valid(&self) -> bool {
        self.magic == SUPER_MAGIC
            && self.imap_blocks as usize <= I_MAP_SLOTS
            && self.zmap_blocks as usize <= Z_MAP_SLOTS
            && self.first_data_zone < self.nzones
    }

    /// inode 位图起始块号
    pub fn imap_start(&self) -> usize {
        SUPER_BLOCK_ID + 1
    }

    /// 区位图起始块号
    pub fn zmap_start(&self) -> usize {
        self.imap_start() + self.imap_blocks as usize
    }

    /// inode 表起始块号
    pub fn inode_table_start(&self) -> usize {
        self.zmap_start() + self.zmap_blocks as usize
    }

    /// inode 表块数
    pub fn inode_table_blocks(&self) -> usize {
        (self.ninodes as usize + INODES_PER_BLOCK - 1) / INODES_PER_BLOCK
    }

    /// 数据区数量，即区位图中可用的最大 bit 编号
    pub fn data_zones(&self) -> usize {
        (self.nzones - self.first_data_zone) as usize
    }
}

bitflags::bitflags! {
    /// inode 类型与权限位
    pub struct InodeMode: u16 {
        /// 类型位掩码
        const IFMT = 0o170000;
        /// 普通文件
        const IFREG = 0o100000;
        /// 目录
        const IFDIR = 0o040000;
        const IRWXU = 0o700;
        const IRWXG = 0o070;
        const IRWXO = 0o007;
    }
}

impl InodeMode {
    /// 普通文件的默认模式 (0644)
    pub fn regular() -> Self {
        Self::from_bits_truncate(0o100644)
    }

    /// 目录的默认模式 (0755)
    pub fn directory() -> Self {
        Self::from_bits_truncate(0o040755)
    }

    /// 类型位
    pub fn file_type(&self) -> Self {
        *self & Self::IFMT
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == Self::IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == Self::IFREG
    }

    /// 权限位
    pub fn permissions(&self) -> u16 {
        self.bits() & 0o777
    }
}

/// 磁盘索引节点
///
/// MINIX v1 inode，大小为 32 字节。磁盘上只保存修改时间。
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskInode {
    /// 类型与权限
    pub mode: u16,
    /// 属主
    pub uid: u16,
    /// 文件大小（字节）
    pub size: u32,
    /// 修改时间
    pub mtime: u32,
    /// 属组
    pub gid: u8,
    /// 硬链接数
    pub nlinks: u8,
    /// 7 个直接索引、1 个一级间接索引、1 个二级间接索引
    pub zone: [u16; 9],
}

impl DiskInode {
    /// 全零的 inode
    pub const fn empty() -> Self {
        Self {
            mode: 0,
            uid: 0,
            size: 0,
            mtime: 0,
            gid: 0,
            nlinks: 0,
            zone: [0; 9],
        }
    }

    pub fn mode(&self) -> InodeMode {
        InodeMode::from_bits_truncate(self.mode)
    }

    /// 是否是目录
    pub fn is_dir(&self) -> bool {
        self.mode().is_dir()
    }

    /// 是否是普通文件
    pub fn is_file(&self) -> bool {
        self.mode().is_file()
    }

    /// 计算存储当前大小需要的数据块数量
    pub fn data_blocks(&self) -> usize {
        (self.size as usize + BLOCK_SZ - 1) / BLOCK_SZ
    }
}

/// 间接索引块类型
pub type IndirectBlock = [u16; ZONES_PER_BLOCK];
/// 数据块类型
pub type DataBlock = [u8; BLOCK_SZ];
/// 位图块类型（每块 128 个 u64）
type BitmapBlock = [u64; BLOCK_SZ / 8];

/// 目录项
///
/// 存储目录中的 inode 编号和定长文件名，inode 编号为 0 表示空闲项。
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    /// inode 编号
    inode: u16,
    /// 文件名（不足 14 字节时以 0 结尾）
    name: [u8; NAME_LEN],
}

impl DirEntry {
    /// 创建空目录项
    pub fn empty() -> Self {
        Self {
            inode: 0,
            name: [0u8; NAME_LEN],
        }
    }

    /// 创建新目录项，名字超长时截断到 `NAME_LEN`
    pub fn new(name: &str, inode_number: u32) -> Self {
        let mut bytes = [0u8; NAME_LEN];
        let len = name.len().min(NAME_LEN);
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            inode: inode_number as u16,
            name: bytes,
        }
    }

    /// 文件名的原始字节
    pub fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(NAME_LEN);
        &self.name[..len]
    }

    /// 获取文件名，非 UTF-8 的名字按有损方式处理
    pub fn name(&self) -> &str {
        let bytes = self.name_bytes();
        match core::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or(""),
        }
    }

    /// 定长比较名字
    pub fn matches(&self, name: &str) -> bool {
        self.inode != 0 && self.name_bytes() == name.as_bytes()
    }

    /// 获取 inode 编号
    pub fn inode_number(&self) -> u32 {
        self.inode as u32
    }

    pub fn set_inode_number(&mut self, inode_number: u32) {
        self.inode = inode_number as u16;
    }
}

/// 位图
///
/// 管理 inode 或数据区的分配状态。位图块在挂载期间常驻块缓存。
pub struct Bitmap {
    /// 位图块
    blocks: Vec<Arc<Mutex<BlockCache>>>,
    /// 可分配的最大 bit 编号（含）
    limit: usize,
}

impl Bitmap {
    /// 创建新的位图
    pub fn new(blocks: Vec<Arc<Mutex<BlockCache>>>, limit: usize) -> Self {
        let limit = limit.min((blocks.len() * BLOCK_BITS).saturating_sub(1));
        Self { blocks, limit }
    }

    /// 置位 bit 0 作为哨兵，0 号永不分配
    pub fn reserve_sentinel(&self) {
        if let Some(first) = self.blocks.first() {
            let mut first = first.lock();
            if !first.read(0, |bits: &BitmapBlock| bits[0] & 1 == 1) {
                first.modify(0, |bits: &mut BitmapBlock| bits[0] |= 1);
            }
        }
    }

    /// 分配一个空闲 bit
    ///
    /// 找到编号最小的 0 bit，将其置 1 并返回编号。
    /// 如果没有不超过上限的空闲 bit，返回 None。
    pub fn alloc(&self) -> Option<usize> {
        for (block_idx, block) in self.blocks.iter().enumerate() {
            let mut block = block.lock();
            let found = block.read(0, |bitmap_block: &BitmapBlock| {
                bitmap_block
                    .iter()
                    .enumerate()
                    .find(|(_, bits64)| **bits64 != u64::MAX)
                    .map(|(bits64_pos, bits64)| (bits64_pos, bits64.trailing_ones() as usize))
            });
            if let Some((bits64_pos, inner_pos)) = found {
                let bit = block_idx * BLOCK_BITS + bits64_pos * 64 + inner_pos;
                if bit > self.limit {
                    return None;
                }
                block.modify(0, |bitmap_block: &mut BitmapBlock| {
                    bitmap_block[bits64_pos] |= 1u64 << inner_pos;
                });
                return Some(bit);
            }
        }
        None
    }

    /// 释放指定 bit
    ///
    /// 返回该 bit 原来是否已置位。
    pub fn dealloc(&self, bit: usize) -> bool {
        let (block_idx, bits64_pos, inner_pos) = Self::decompose(bit);
        let Some(block) = self.blocks.get(block_idx) else {
            return false;
        };
        let mut block = block.lock();
        let was_set = block.read(0, |bitmap_block: &BitmapBlock| {
            bitmap_block[bits64_pos] & (1u64 << inner_pos) != 0
        });
        if was_set {
            block.modify(0, |bitmap_block: &mut BitmapBlock| {
                bitmap_block[bits64_pos] &= !(1u64 << inner_pos);
            });
        }
        was_set
    }

    /// 查询指定 bit 是否已置位
    pub fn is_set(&self, bit: usize) -> bool {
        let (block_idx, bits64_pos, inner_pos) = Self::decompose(bit);
        self.blocks.get(block_idx).map_or(false, |block| {
            block.lock().read(0, |bitmap_block: &BitmapBlock| {
                bitmap_block[bits64_pos] & (1u64 << inner_pos) != 0
            })
        })
    }

    /// 1..=limit 中空闲 bit 的数量
    pub fn count_free(&self) -> usize {
        let mut used = 0usize;
        for (block_idx, block) in self.blocks.iter().enumerate() {
            block.lock().read(0, |bitmap_block: &BitmapBlock| {
                for (bits64_pos, bits64) in bitmap_block.iter().enumerate() {
                    let base = block_idx * BLOCK_BITS + bits64_pos * 64;
                    if base > self.limit {
                        break;
                    }
                    let valid = (self.limit - base + 1).min(64);
                    let mask = if valid == 64 { u64::MAX } else { (1u64 << valid) - 1 };
                    used += (bits64 & mask).count_ones() as usize;
                }
            });
        }
        // 统计范围是 0..=limit，bit 0 是哨兵
        let sentinel = self.is_set(0) as usize;
        self.limit + sentinel - used
    }

    fn decompose(bit: usize) -> (usize, usize, usize) {
        (bit / BLOCK_BITS, (bit % BLOCK_BITS) / 64, bit % 64)
    }
}
