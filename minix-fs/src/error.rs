//! 错误类型
//!
//! 引擎内每一层都把错误原样返回给直接调用者，不做重试、不做回滚。
//! `errno()` 给出命令前端使用的负错误码。

use core::fmt;

/// 文件系统错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 路径中某一分量不存在
    PathNotFound,
    /// 非末尾分量或目录专用操作的目标不是目录
    NotADirectory,
    /// 对目录进行写类操作
    IsADirectory,
    /// 创建时名字已存在
    AlreadyExists,
    /// 删除非空目录
    NotEmpty,
    /// 位图中没有空闲位
    OutOfSpace,
    /// 打开方式与 inode 类型或卷状态不符
    PermissionDenied,
    /// 参数不合法，例如描述符越界
    InvalidArgument,
    /// 目录项指向的 inode 无法载入等内部不一致
    InternalInconsistency,
    /// 读操作一个字节也没有传输；引擎内部不产生，只用于错误码互转
    OutOfRange,
    /// 逻辑块号超出间接索引能表示的范围
    FileTooLarge,
    /// 目录链接数已达上限
    TooManyLinks,
    /// 块设备读写失败
    Io,
    /// 超级块魔数或几何参数无效
    InvalidSuperBlock,
}

const EPERM: isize = 1;
const ENOENT: isize = 2;
const EIO: isize = 5;
const EACCES: isize = 13;
const EEXIST: isize = 17;
const ENOTDIR: isize = 20;
const EISDIR: isize = 21;
const EINVAL: isize = 22;
const EFBIG: isize = 27;
const ENOSPC: isize = 28;
const EMLINK: isize = 31;
const ERANGE: isize = 34;
const ENOTEMPTY: isize = 39;
const EUCLEAN: isize = 117;

const ALL: [FsError; 14] = [
    FsError::PathNotFound,
    FsError::NotADirectory,
    FsError::IsADirectory,
    FsError::AlreadyExists,
    FsError::NotEmpty,
    FsError::OutOfSpace,
    FsError::PermissionDenied,
    FsError::InvalidArgument,
    FsError::InternalInconsistency,
    FsError::OutOfRange,
    FsError::FileTooLarge,
    FsError::TooManyLinks,
    FsError::Io,
    FsError::InvalidSuperBlock,
];

impl FsError {
    /// 负错误码
    pub fn errno(self) -> isize {
        -match self {
            Self::PathNotFound => ENOENT,
            Self::NotADirectory => ENOTDIR,
            Self::IsADirectory => EISDIR,
            Self::AlreadyExists => EEXIST,
            Self::NotEmpty => ENOTEMPTY,
            Self::OutOfSpace => ENOSPC,
            Self::PermissionDenied => EACCES,
            Self::InvalidArgument => EINVAL,
            Self::InternalInconsistency => EPERM,
            Self::OutOfRange => ERANGE,
            Self::FileTooLarge => EFBIG,
            Self::TooManyLinks => EMLINK,
            Self::Io => EIO,
            Self::InvalidSuperBlock => EUCLEAN,
        }
    }

    /// 由负错误码还原错误类型
    pub fn from_errno(code: isize) -> Option<Self> {
        ALL.iter().copied().find(|e| e.errno() == code)
    }

    /// 面向用户的说明文字
    pub fn message(self) -> &'static str {
        match self {
            Self::PathNotFound => "path not found",
            Self::NotADirectory => "not a directory",
            Self::IsADirectory => "is a directory",
            Self::AlreadyExists => "file already exists",
            Self::NotEmpty => "directory not empty",
            Self::OutOfSpace => "no space left on device",
            Self::PermissionDenied => "permission denied",
            Self::InvalidArgument => "invalid argument",
            Self::InternalInconsistency => "internal filesystem inconsistency",
            Self::OutOfRange => "nothing to read",
            Self::FileTooLarge => "file too large",
            Self::TooManyLinks => "too many links",
            Self::Io => "i/o error",
            Self::InvalidSuperBlock => "not a minix filesystem",
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// 把命令返回的错误码翻译成提示文字，未知错误码统一为 "unknown error"
pub fn describe(code: isize) -> &'static str {
    match FsError::from_errno(code) {
        Some(e) => e.message(),
        None => "unknown error",
    }
}

pub type Result<T> = core::result::Result<T, FsError>;
