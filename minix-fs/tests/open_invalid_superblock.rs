//! minix-fs 超级块与格式化参数校验测试

use std::sync::{Arc, Mutex};

use minix_fs::{
    BlockDevice, Clock, FormatParams, FsError, MinixFileSystem, MountFlags, BLOCK_SZ, SUPER_MAGIC,
};

// 简化的 Mock 块设备实现
struct MockBlockDevice {
    blocks: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockBlockDevice {
    fn new(num_blocks: usize) -> Self {
        let mut blocks = Vec::new();
        for _ in 0..num_blocks {
            blocks.push(vec![0u8; BLOCK_SZ]);
        }
        Self {
            blocks: Arc::new(Mutex::new(blocks)),
        }
    }
}

impl BlockDevice for MockBlockDevice {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> minix_fs::Result<()> {
        let blocks = self.blocks.lock().unwrap();
        let block = blocks.get(block_id).ok_or(FsError::Io)?;
        buf.copy_from_slice(&block[..buf.len()]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> minix_fs::Result<()> {
        let mut blocks = self.blocks.lock().unwrap();
        let block = blocks.get_mut(block_id).ok_or(FsError::Io)?;
        block[..buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

struct ZeroClock;

impl Clock for ZeroClock {
    fn now(&self) -> u32 {
        0
    }
}

fn params(inodes: u16, zones: u16, imap_blocks: u16, zmap_blocks: u16) -> FormatParams {
    FormatParams {
        inodes,
        zones,
        imap_blocks,
        zmap_blocks,
    }
}

#[test]
fn test_mount_rejects_blank_device() {
    // 未初始化的设备不应被 mount 接受
    let device = Arc::new(MockBlockDevice::new(32));
    let result = MinixFileSystem::mount(1, device, Arc::new(ZeroClock), MountFlags::empty());
    assert_eq!(result.err(), Some(FsError::InvalidSuperBlock));
}

#[test]
fn test_mount_rejects_bad_magic() {
    let device = Arc::new(MockBlockDevice::new(64));
    MinixFileSystem::format(1, device.clone(), Arc::new(ZeroClock), params(32, 64, 1, 1)).unwrap();
    {
        let mut blocks = device.blocks.lock().unwrap();
        // 魔数位于超级块偏移 16 处
        let magic = u16::from_le_bytes([blocks[1][16], blocks[1][17]]);
        assert_eq!(magic, SUPER_MAGIC);
        blocks[1][16] = 0x68;
        blocks[1][17] = 0x24;
    }
    let result = MinixFileSystem::mount(1, device, Arc::new(ZeroClock), MountFlags::empty());
    assert_eq!(result.err(), Some(FsError::InvalidSuperBlock));
}

#[test]
fn test_mount_rejects_missing_device() {
    let device = Arc::new(MockBlockDevice::new(1));
    let result = MinixFileSystem::mount(1, device, Arc::new(ZeroClock), MountFlags::empty());
    assert_eq!(result.err(), Some(FsError::Io));
}

#[test]
fn test_format_rejects_bad_geometry() {
    let device = Arc::new(MockBlockDevice::new(64));
    let clock = Arc::new(ZeroClock);
    let cases = [
        // 没有 inode
        params(0, 64, 1, 1),
        // 位图块数为 0 或超过 8
        params(32, 64, 0, 1),
        params(32, 64, 1, 9),
        // 元数据放不下
        params(32, 4, 1, 1),
        // 区位图覆盖不了 65535 个区
        params(32, u16::MAX, 1, 1),
    ];
    for case in cases {
        let result = MinixFileSystem::format(1, device.clone(), clock.clone(), case);
        assert_eq!(result.err(), Some(FsError::InvalidArgument), "{:?}", case);
    }
}

#[test]
fn test_format_probes_volume_size() {
    // 设备只有 32 块，却要求 64 个区
    let device = Arc::new(MockBlockDevice::new(32));
    let result = MinixFileSystem::format(1, device, Arc::new(ZeroClock), params(32, 64, 1, 1));
    assert_eq!(result.err(), Some(FsError::Io));
}

#[test]
fn test_superblock_layout_on_disk() {
    let device = Arc::new(MockBlockDevice::new(64));
    MinixFileSystem::format(1, device.clone(), Arc::new(ZeroClock), params(32, 64, 1, 1)).unwrap();
    let blocks = device.blocks.lock().unwrap();
    let field = |offset: usize| u16::from_le_bytes([blocks[1][offset], blocks[1][offset + 1]]);
    assert_eq!(field(0), 32);
    assert_eq!(field(2), 64);
    assert_eq!(field(4), 1);
    assert_eq!(field(6), 1);
    assert_eq!(field(8), 5);
    // 根目录的数据块：`.` 与 `..` 都指向 inode 1
    let root_dir = &blocks[5];
    assert_eq!(u16::from_le_bytes([root_dir[0], root_dir[1]]), 1);
    assert_eq!(&root_dir[2..3], b".");
    assert_eq!(u16::from_le_bytes([root_dir[16], root_dir[17]]), 1);
    assert_eq!(&root_dir[18..20], b"..");
    // inode 位图：哨兵与根目录
    assert_eq!(blocks[2][0], 0b11);
}
