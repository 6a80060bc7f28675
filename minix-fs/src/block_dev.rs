use crate::error::Result;

/// 块大小常量，MINIX v1 固定为 1024 字节
pub const BLOCK_SZ: usize = 1024;

/// 块设备抽象接口
///
/// 提供以 1024 字节块为单位的同步读写，供块缓存层调用。
/// 调用方需实现此 trait；读写失败返回 [`FsError::Io`](crate::FsError::Io)。
pub trait BlockDevice: Send + Sync {
    /// 读取指定块的内容到缓冲区
    ///
    /// # 参数
    /// - `block_id`: 块编号
    /// - `buf`: 目标缓冲区，长度必须为 1024 字节
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<()>;

    /// 将缓冲区内容写入指定块
    ///
    /// # 参数
    /// - `block_id`: 块编号
    /// - `buf`: 源缓冲区，长度必须为 1024 字节
    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<()>;
}

/// 时间源
///
/// 引擎运行在 no_std 环境下，inode 时间戳由调用方提供。
pub trait Clock: Send + Sync {
    /// 当前时间（秒）
    fn now(&self) -> u32;
}
