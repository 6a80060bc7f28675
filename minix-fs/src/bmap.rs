//! 逻辑块到索引路径的映射
//!
//! 纯函数，不访问缓存；`inode` 层按这里给出的路径逐级查表或分配。

use crate::block_dev::BLOCK_SZ;
use crate::layout::{INODE_DIRECT_COUNT, MAX_FILE_BLOCKS, ZONES_PER_BLOCK};

/// 直接索引边界
const DIRECT_BOUND: usize = INODE_DIRECT_COUNT;
/// 一级间接索引边界 (7 + 512 = 519)
const INDIRECT1_BOUND: usize = DIRECT_BOUND + ZONES_PER_BLOCK;

/// 文件内逻辑块在索引结构中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPath {
    /// `zone[i]`
    Direct(usize),
    /// 一级间接块中的第 i 项
    Indirect(usize),
    /// 二级间接块第 outer 项所指间接块中的第 inner 项
    DoubleIndirect(usize, usize),
}

impl BlockPath {
    /// 计算逻辑块号对应的索引路径，超出二级间接范围时返回 None
    pub fn locate(block: usize) -> Option<Self> {
        if block < DIRECT_BOUND {
            Some(Self::Direct(block))
        } else if block < INDIRECT1_BOUND {
            Some(Self::Indirect(block - DIRECT_BOUND))
        } else if block < MAX_FILE_BLOCKS {
            let inner_id = block - INDIRECT1_BOUND;
            Some(Self::DoubleIndirect(
                inner_id / ZONES_PER_BLOCK,
                inner_id % ZONES_PER_BLOCK,
            ))
        } else {
            None
        }
    }

    /// 路径经过的间接块层数
    pub fn depth(&self) -> usize {
        match self {
            Self::Direct(_) => 0,
            Self::Indirect(_) => 1,
            Self::DoubleIndirect(..) => 2,
        }
    }
}

/// 字节区间内的一段，不跨块
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// 逻辑块号
    pub block: usize,
    /// 块内偏移
    pub offset: usize,
    /// 长度
    pub len: usize,
}

/// 把字节区间 `[start, start + len)` 切成按块对齐的若干段
#[derive(Debug, Clone)]
pub struct BlockSpan {
    pos: usize,
    end: usize,
}

impl BlockSpan {
    pub fn new(start: usize, len: usize) -> Self {
        Self {
            pos: start,
            end: start.saturating_add(len),
        }
    }
}

impl Iterator for BlockSpan {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.pos >= self.end {
            return None;
        }
        let offset = self.pos % BLOCK_SZ;
        let len = (BLOCK_SZ - offset).min(self.end - self.pos);
        let chunk = Chunk {
            block: self.pos / BLOCK_SZ,
            offset,
            len,
        };
        self.pos += len;
        Some(chunk)
    }
}
