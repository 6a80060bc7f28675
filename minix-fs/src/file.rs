use crate::error::{FsError, Result};
use crate::inode::InodeRef;

bitflags::bitflags! {
    /// 文件打开标志
    pub struct OpenFlags: u32 {
        /// 只读
        const RDONLY = 0;
        /// 只写
        const WRONLY = 1 << 0;
        /// 读写
        const RDWR = 1 << 1;
        /// 创建
        const CREATE = 1 << 9;
        /// 截断
        const TRUNC = 1 << 10;
        /// 追加
        const APPEND = 1 << 11;
    }
}

impl OpenFlags {
    /// 根据标志返回读写权限
    ///
    /// # Returns
    ///
    /// `(readable, writable)` 元组。单独的 `APPEND` 视为只写。
    pub fn read_write(&self) -> (bool, bool) {
        if self.contains(Self::RDWR) {
            (true, true)
        } else if self.intersects(Self::WRONLY | Self::APPEND) {
            (false, true)
        } else {
            (true, false)
        }
    }
}

/// 文件句柄
///
/// 包含 inode 引用、打开标志和当前偏移。
pub struct FileHandle {
    inode: InodeRef,
    flags: OpenFlags,
    /// 当前偏移
    pub offset: usize,
}

impl FileHandle {
    /// 创建新的文件句柄，偏移为 0
    pub fn new(inode: InodeRef, flags: OpenFlags) -> Self {
        Self {
            inode,
            flags,
            offset: 0,
        }
    }

    pub fn inode(&self) -> &InodeRef {
        &self.inode
    }

    /// 是否可读
    pub fn readable(&self) -> bool {
        self.flags.read_write().0
    }

    /// 是否可写
    pub fn writable(&self) -> bool {
        self.flags.read_write().1
    }

    /// 从当前偏移读取
    ///
    /// 位于文件末尾或之后时返回 0；第一块就读失败时返回该错误。
    /// 成功后偏移前移并更新访问时间。
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.readable() {
            return Err(FsError::PermissionDenied);
        }
        if buf.is_empty() || self.offset >= self.inode.size() as usize {
            return Ok(0);
        }
        let read_size = self.inode.read_at(self.offset, buf)?;
        self.offset += read_size;
        self.inode.set_atime(self.inode.fs().now());
        Ok(read_size)
    }

    /// 写入
    ///
    /// 追加模式从文件末尾写，不移动偏移也不改状态时间；否则从当前偏移写，
    /// 之后偏移前移。中途空间耗尽时返回已写入的字节数，一个字节都没写入时
    /// 返回错误；修改时间无论成败都会更新。
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.writable() {
            return Err(FsError::PermissionDenied);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let append = self.flags.contains(OpenFlags::APPEND);
        let pos = if append {
            self.inode.size() as usize
        } else {
            self.offset
        };
        let written = self.inode.write_at(pos, buf);
        let now = self.inode.fs().now();
        self.inode.set_mtime(now);
        let write_size = written?;
        if !append {
            self.offset = pos + write_size;
            self.inode.set_ctime(now);
        }
        Ok(write_size)
    }

    /// 设置偏移，允许越过文件末尾
    pub fn seek(&mut self, pos: usize) {
        self.offset = pos;
    }
}
