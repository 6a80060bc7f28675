//! 会话：挂载卷、根目录、当前目录和文件描述符表

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use crate::dir::DirEntryInfo;
use crate::error::{FsError, Result};
use crate::file::{FileHandle, OpenFlags};
use crate::inode::{InodeRef, Stat};
use crate::layout::{InodeMode, LINK_MAX};
use crate::mfs::MinixFileSystem;
use crate::path;

/// 每个会话可同时打开的文件数
pub const NR_OPEN: usize = 20;

/// 文件描述符
pub type Fd = usize;

/// 文件系统会话
///
/// 取代全局状态：持有挂载的卷、根目录与当前目录的引用，以及描述符表。
/// `dup` 出的描述符共享同一个 [`FileHandle`]（包括偏移）。
pub struct Session {
    fs: Arc<MinixFileSystem>,
    root: InodeRef,
    cwd: InodeRef,
    files: Vec<Option<Arc<Mutex<FileHandle>>>>,
}

impl Session {
    pub fn new(fs: Arc<MinixFileSystem>) -> Result<Self> {
        let root = fs.root_inode()?;
        let cwd = root.clone();
        Ok(Self {
            fs,
            root,
            cwd,
            files: vec![None; NR_OPEN],
        })
    }

    pub fn fs(&self) -> &Arc<MinixFileSystem> {
        &self.fs
    }

    pub fn root(&self) -> &InodeRef {
        &self.root
    }

    /// 当前目录
    pub fn cwd(&self) -> &InodeRef {
        &self.cwd
    }

    /// 按路径取得 inode
    pub fn lookup(&self, path: &str) -> Result<InodeRef> {
        path::resolve(&self.root, &self.cwd, path)
    }

    /// 解析父目录，basename 为空时返回 `PathNotFound`
    fn parent_of(&self, path: &str) -> Result<(InodeRef, String)> {
        let (dir, name) = path::resolve_parent(&self.root, &self.cwd, path)?;
        if name.is_empty() {
            return Err(FsError::PathNotFound);
        }
        Ok((dir, name))
    }

    fn handle(&self, fd: Fd) -> Result<Arc<Mutex<FileHandle>>> {
        self.files
            .get(fd)
            .and_then(|slot| slot.clone())
            .ok_or(FsError::InvalidArgument)
    }

    fn free_fd(&self) -> Result<Fd> {
        self.files
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::InvalidArgument)
    }

    /// 打开文件
    ///
    /// # Arguments
    ///
    /// * `path` - 文件路径
    /// * `flags` - 打开标志
    /// * `mode` - 以 `CREATE` 新建时的类型与权限，目录类型时建目录
    ///
    /// # Returns
    ///
    /// 编号最小的空闲描述符。
    pub fn open(&mut self, path: &str, flags: OpenFlags, mode: InodeMode) -> Result<Fd> {
        let fd = self.free_fd()?;
        let (_, writable) = flags.read_write();
        let (dir, name) = path::resolve_parent(&self.root, &self.cwd, path)?;
        if name.is_empty() {
            return Err(FsError::IsADirectory);
        }
        let inode = match dir.lookup(&name) {
            Ok(inode) => inode,
            Err(FsError::PathNotFound) if flags.contains(OpenFlags::CREATE) => {
                if mode.is_dir() {
                    self.make_dir(&dir, &name, mode)?
                } else {
                    self.make_node(&dir, &name, mode)?
                }
            }
            Err(e) => return Err(e),
        };
        drop(dir);
        if inode.is_dir() && writable {
            return Err(FsError::PermissionDenied);
        }
        if writable {
            self.fs.check_writable()?;
        }
        if flags.contains(OpenFlags::TRUNC) && writable && inode.is_file() {
            inode.truncate()?;
        }
        inode.set_atime(self.fs.now());
        self.files[fd] = Some(Arc::new(Mutex::new(FileHandle::new(inode, flags))));
        log::debug!("open {:?} as fd {}", path, fd);
        Ok(fd)
    }

    /// 关闭描述符，最后一个引用释放时放回 inode
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        self.files
            .get_mut(fd)
            .and_then(Option::take)
            .map(drop)
            .ok_or(FsError::InvalidArgument)
    }

    /// 复制描述符到编号最小的空闲位置
    pub fn dup(&mut self, fd: Fd) -> Result<Fd> {
        let handle = self.handle(fd)?;
        let new_fd = self.free_fd()?;
        self.files[new_fd] = Some(handle);
        Ok(new_fd)
    }

    pub fn seek(&mut self, fd: Fd, pos: usize) -> Result<()> {
        self.handle(fd)?.lock().seek(pos);
        Ok(())
    }

    /// 从描述符读取，只接受普通文件和目录
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let handle = self.handle(fd)?;
        let mut handle = handle.lock();
        let inode = handle.inode();
        if !(inode.is_dir() || inode.is_file()) {
            log::warn!("read: inode {} has mode {:o}", inode.ino(), inode.mode().bits());
            return Err(FsError::InvalidArgument);
        }
        handle.read(buf)
    }

    /// 写入描述符，只接受普通文件
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize> {
        let handle = self.handle(fd)?;
        let mut handle = handle.lock();
        let inode = handle.inode();
        if inode.is_dir() {
            return Err(FsError::IsADirectory);
        }
        if !inode.is_file() {
            log::warn!("write: inode {} has mode {:o}", inode.ino(), inode.mode().bits());
            return Err(FsError::InvalidArgument);
        }
        self.fs.check_writable()?;
        handle.write(buf)
    }

    pub fn fstat(&self, fd: Fd) -> Result<Stat> {
        Ok(self.handle(fd)?.lock().inode().stat())
    }

    /// 新建普通文件（`touch`）
    pub fn create(&mut self, path: &str, mode: InodeMode) -> Result<()> {
        self.fs.check_writable()?;
        let (dir, name) = self.parent_of(path)?;
        if dir.find_entry(&name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        self.make_node(&dir, &name, mode).map(drop)
    }

    /// 新建目录
    pub fn mkdir(&mut self, path: &str, mode: InodeMode) -> Result<()> {
        self.fs.check_writable()?;
        let (dir, name) = self.parent_of(path)?;
        if dir.find_entry(&name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        self.make_dir(&dir, &name, mode).map(drop)
    }

    fn make_node(&self, dir: &InodeRef, name: &str, mode: InodeMode) -> Result<InodeRef> {
        self.fs.check_writable()?;
        let mode = if mode.file_type().is_empty() {
            mode | InodeMode::IFREG
        } else {
            mode
        };
        let inode = self.fs.new_inode()?;
        inode.modify_disk(|disk_inode| disk_inode.mode = mode.bits());
        if let Err(e) = dir.add_entry(name, inode.ino()) {
            inode.modify_disk(|disk_inode| disk_inode.nlinks = 0);
            return Err(e);
        }
        log::debug!("created {:?} as inode {}", name, inode.ino());
        Ok(inode)
    }

    fn make_dir(&self, dir: &InodeRef, name: &str, mode: InodeMode) -> Result<InodeRef> {
        self.fs.check_writable()?;
        let mode = (mode & !InodeMode::IFMT) | InodeMode::IFDIR;
        if dir.nlinks() >= LINK_MAX {
            return Err(FsError::TooManyLinks);
        }
        let inode = self.fs.new_inode()?;
        inode.modify_disk(|disk_inode| disk_inode.mode = mode.bits());
        let linked = inode
            .init_directory(dir.ino())
            .and_then(|_| dir.add_entry(name, inode.ino()));
        if let Err(e) = linked {
            inode.modify_disk(|disk_inode| disk_inode.nlinks = 0);
            return Err(e);
        }
        inode.modify_disk(|disk_inode| disk_inode.nlinks = 2);
        dir.modify_disk(|disk_inode| disk_inode.nlinks += 1);
        log::debug!("mkdir {:?} as inode {}", name, inode.ino());
        Ok(inode)
    }

    /// 删除普通文件的一个链接（`rm`）
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        self.fs.check_writable()?;
        let (dir, name) = self.parent_of(path)?;
        let slot = dir.find_entry(&name)?.ok_or(FsError::PathNotFound)?;
        let inode = dir.lookup(&name)?;
        if inode.is_dir() {
            return Err(FsError::IsADirectory);
        }
        if inode.nlinks() == 0 {
            log::warn!(
                "deleting nonexistent file ({:04x}:{}), {}",
                inode.dev(),
                inode.ino(),
                inode.nlinks()
            );
            inode.modify_disk(|disk_inode| disk_inode.nlinks = 1);
        }
        slot.clear();
        inode.modify_disk(|disk_inode| disk_inode.nlinks -= 1);
        inode.set_ctime(self.fs.now());
        Ok(())
    }

    /// 删除空目录
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        self.fs.check_writable()?;
        let (dir, name) = self.parent_of(path)?;
        let slot = dir.find_entry(&name)?.ok_or(FsError::PathNotFound)?;
        let inode = dir.lookup(&name)?;
        // 本次查找持有一个引用，当前目录等持有者会让计数更大
        if inode.count() > 1 || InodeRef::ptr_eq(&inode, &dir) {
            return Err(FsError::PermissionDenied);
        }
        if !inode.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if !inode.is_empty_dir()? {
            return Err(FsError::NotEmpty);
        }
        if inode.nlinks() != 2 {
            log::warn!("empty directory {} has nlink {}", inode.ino(), inode.nlinks());
        }
        slot.clear();
        inode.modify_disk(|disk_inode| disk_inode.nlinks = 0);
        let now = self.fs.now();
        dir.modify_disk(|disk_inode| disk_inode.nlinks = disk_inode.nlinks.saturating_sub(1));
        dir.set_mtime(now);
        dir.set_ctime(now);
        Ok(())
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        Ok(self.lookup(path)?.stat())
    }

    /// 列出目录
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntryInfo>> {
        self.lookup(path)?.entries()
    }

    /// 切换当前目录
    pub fn chdir(&mut self, path: &str) -> Result<()> {
        let inode = self.lookup(path)?;
        if !inode.is_dir() {
            return Err(FsError::NotADirectory);
        }
        self.cwd = inode;
        Ok(())
    }

    /// 当前目录的绝对路径
    ///
    /// 沿 `..` 上溯到根目录，在每一级父目录中反查名字。
    pub fn getcwd(&self) -> Result<String> {
        let mut names = Vec::new();
        let mut current = self.cwd.clone();
        while current.ino() != self.root.ino() {
            let parent = current.lookup("..")?;
            if parent.ino() == current.ino() {
                log::error!("getcwd: inode {} is its own parent", current.ino());
                return Err(FsError::InternalInconsistency);
            }
            let name = parent
                .name_of(current.ino())?
                .ok_or(FsError::InternalInconsistency)?;
            names.push(name);
            current = parent;
        }
        if names.is_empty() {
            return Ok(String::from("/"));
        }
        let mut path = String::new();
        for name in names.iter().rev() {
            path.push('/');
            path.push_str(name);
        }
        Ok(path)
    }

    /// 读出整个文件（`cat`）
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let fd = self.open(path, OpenFlags::RDONLY, InodeMode::regular())?;
        let mut content = Vec::new();
        let mut buf = [0u8; 512];
        let result = loop {
            match self.read(fd, &mut buf) {
                Ok(0) => break Ok(()),
                Ok(len) => content.extend_from_slice(&buf[..len]),
                Err(e) => break Err(e),
            }
        };
        self.close(fd)?;
        result.map(|_| content)
    }

    /// 写回所有脏 inode 和脏块
    pub fn sync(&self) -> Result<()> {
        self.fs.sync()
    }

    /// 关闭所有描述符，放回根目录与当前目录，同步后释放缓存
    pub fn unmount(self) -> Result<Arc<MinixFileSystem>> {
        let Session {
            fs,
            root,
            cwd,
            files,
        } = self;
        drop(files);
        drop(cwd);
        drop(root);
        fs.release_unused()?;
        log::info!("unmounted dev {:04x}", fs.dev());
        Ok(fs)
    }
}
