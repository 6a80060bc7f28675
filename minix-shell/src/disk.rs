use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use minix_fs::{BlockDevice, Clock, FsError, BLOCK_SZ};

/// 以普通文件作为块设备的磁盘镜像
pub struct FileDisk {
    file: Mutex<File>,
    blocks: usize,
}

impl FileDisk {
    /// 打开已有镜像
    pub fn open(path: &Path, writable: bool) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        let blocks = (file.metadata()?.len() / BLOCK_SZ as u64) as usize;
        Ok(Self {
            file: Mutex::new(file),
            blocks,
        })
    }

    /// 新建（或截断）镜像，长度为 `blocks` 块
    pub fn create(path: &Path, blocks: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((blocks * BLOCK_SZ) as u64)?;
        Ok(Self {
            file: Mutex::new(file),
            blocks,
        })
    }

    /// 镜像包含的块数
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    fn transfer(
        &self,
        block_id: usize,
        op: impl FnOnce(&mut File) -> io::Result<()>,
    ) -> minix_fs::Result<()> {
        if block_id >= self.blocks {
            log::error!("disk: block {} beyond end of image ({} blocks)", block_id, self.blocks);
            return Err(FsError::Io);
        }
        let mut file = self.file.lock().map_err(|_| FsError::Io)?;
        file.seek(SeekFrom::Start((block_id * BLOCK_SZ) as u64))
            .and_then(|_| op(&mut file))
            .map_err(|e| {
                log::error!("disk: block {}: {}", block_id, e);
                FsError::Io
            })
    }
}

impl BlockDevice for FileDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> minix_fs::Result<()> {
        self.transfer(block_id, |file| file.read_exact(buf))
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> minix_fs::Result<()> {
        self.transfer(block_id, |file| file.write_all(buf))
    }
}

/// 系统时钟，秒级
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}
