//! 路径解析
//!
//! 以 `/` 开头的路径从根目录出发，否则从当前目录出发。空分量按 `.` 处理，
//! 中途经过的每个 inode 都必须是目录。

use alloc::string::String;

use crate::error::{FsError, Result};
use crate::inode::InodeRef;

/// 解析到最后一个分量所在的目录
///
/// # Returns
///
/// `(dir, basename)`，路径以 `/` 结尾时 basename 为空。
pub fn resolve_parent(root: &InodeRef, cwd: &InodeRef, path: &str) -> Result<(InodeRef, String)> {
    let (mut dir, mut rest) = match path.strip_prefix('/') {
        Some(rest) => (root.clone(), rest),
        None => (cwd.clone(), path),
    };
    loop {
        if !dir.is_dir() {
            return Err(FsError::NotADirectory);
        }
        match rest.split_once('/') {
            None => return Ok((dir, String::from(rest))),
            Some((component, tail)) => {
                dir = dir.lookup(component)?;
                rest = tail;
            }
        }
    }
}

/// 解析完整路径，basename 为空时得到目录本身
pub fn resolve(root: &InodeRef, cwd: &InodeRef, path: &str) -> Result<InodeRef> {
    let (dir, name) = resolve_parent(root, cwd, path)?;
    if name.is_empty() {
        return Ok(dir);
    }
    dir.lookup(&name)
}
