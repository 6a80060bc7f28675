//! minix-fs crate 功能性验证测试
//!
//! 这些测试验证 minix-fs crate 对外提供的 API 的正确性。
//! 测试在用户态环境运行，使用 std。
//!
//! 注意：minix-fs 是一个 no_std crate，但测试使用 std 来创建 mock 块设备。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use minix_fs::{
    describe, BlockCacheManager, BlockDevice, BlockPath, BlockSpan, Chunk, Clock, FormatParams,
    FsError, InodeMode, MinixFileSystem, LINK_MAX, MountFlags, OpenFlags, Session, BLOCK_SZ,
    MAX_FILE_BLOCKS, NR_OPEN, ROOT_INO,
};

// Mock 块设备实现，用于测试
struct MockBlockDevice {
    blocks: Arc<StdMutex<Vec<Vec<u8>>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MockBlockDevice {
    fn new(num_blocks: usize) -> Self {
        let mut blocks = Vec::new();
        for _ in 0..num_blocks {
            blocks.push(vec![0u8; BLOCK_SZ]);
        }
        Self {
            blocks: Arc::new(StdMutex::new(blocks)),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    fn block(&self, block_id: usize) -> Vec<u8> {
        self.blocks.lock().unwrap()[block_id].clone()
    }
}

impl BlockDevice for MockBlockDevice {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> minix_fs::Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(FsError::Io);
        }
        let blocks = self.blocks.lock().unwrap();
        let block = blocks.get(block_id).ok_or(FsError::Io)?;
        buf.copy_from_slice(&block[..buf.len()]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> minix_fs::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FsError::Io);
        }
        let mut blocks = self.blocks.lock().unwrap();
        let block = blocks.get_mut(block_id).ok_or(FsError::Io)?;
        block[..buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

struct FixedClock(u32);

impl Clock for FixedClock {
    fn now(&self) -> u32 {
        self.0
    }
}

const TEST_ZONES: u16 = 2048;
const TEST_INODES: u16 = 64;
/// 2 + 1 + 1 + 64 / 32
const TEST_FIRST_DATA_ZONE: u32 = 6;

fn test_params() -> FormatParams {
    FormatParams {
        inodes: TEST_INODES,
        zones: TEST_ZONES,
        imap_blocks: 1,
        zmap_blocks: 1,
    }
}

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(1000))
}

fn format_device(device: Arc<MockBlockDevice>) -> Arc<MinixFileSystem> {
    MinixFileSystem::format(0x0301, device, clock(), test_params()).unwrap()
}

fn with_test_fs<T>(f: impl FnOnce(Arc<MockBlockDevice>, Arc<MinixFileSystem>) -> T) -> T {
    let device = Arc::new(MockBlockDevice::new(TEST_ZONES as usize));
    let fs = format_device(device.clone());
    f(device, fs)
}

fn with_session<T>(f: impl FnOnce(&mut Session) -> T) -> T {
    with_test_fs(|_device, fs| {
        let mut session = Session::new(fs).unwrap();
        f(&mut session)
    })
}

fn rw_create() -> OpenFlags {
    OpenFlags::RDWR | OpenFlags::CREATE
}

fn names(session: &Session, path: &str) -> Vec<String> {
    session
        .read_dir(path)
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect()
}

#[test]
fn test_block_size_constant() {
    assert_eq!(BLOCK_SZ, 1024);
}

#[test]
fn test_open_flags_bits() {
    assert_eq!(OpenFlags::RDONLY.bits(), 0);
    assert_eq!(OpenFlags::WRONLY.bits(), 1);
    assert_eq!(OpenFlags::RDWR.bits(), 2);
    assert_eq!(OpenFlags::CREATE.bits(), 512);
    assert_eq!(OpenFlags::TRUNC.bits(), 1024);
    assert_eq!(OpenFlags::APPEND.bits(), 2048);
}

#[test]
fn test_open_flags_read_write() {
    assert_eq!(OpenFlags::RDONLY.read_write(), (true, false));
    assert_eq!(OpenFlags::WRONLY.read_write(), (false, true));
    assert_eq!(OpenFlags::RDWR.read_write(), (true, true));
    assert_eq!(OpenFlags::APPEND.read_write(), (false, true));
    assert_eq!((OpenFlags::RDONLY | OpenFlags::CREATE).read_write(), (true, false));
}

#[test]
fn test_block_path_boundaries() {
    assert_eq!(BlockPath::locate(0), Some(BlockPath::Direct(0)));
    assert_eq!(BlockPath::locate(6), Some(BlockPath::Direct(6)));
    assert_eq!(BlockPath::locate(7), Some(BlockPath::Indirect(0)));
    assert_eq!(BlockPath::locate(518), Some(BlockPath::Indirect(511)));
    assert_eq!(BlockPath::locate(519), Some(BlockPath::DoubleIndirect(0, 0)));
    assert_eq!(
        BlockPath::locate(519 + 512 + 3),
        Some(BlockPath::DoubleIndirect(1, 3))
    );
    assert_eq!(
        BlockPath::locate(MAX_FILE_BLOCKS - 1),
        Some(BlockPath::DoubleIndirect(511, 511))
    );
    assert_eq!(BlockPath::locate(MAX_FILE_BLOCKS), None);
    assert_eq!(BlockPath::locate(519).map(|p| p.depth()), Some(2));
}

#[test]
fn test_block_span_chunks() {
    let chunks: Vec<Chunk> = BlockSpan::new(1000, 100).collect();
    assert_eq!(
        chunks,
        vec![
            Chunk { block: 0, offset: 1000, len: 24 },
            Chunk { block: 1, offset: 0, len: 76 },
        ]
    );
    assert_eq!(BlockSpan::new(2048, 1024).count(), 1);
    assert_eq!(BlockSpan::new(5, 0).count(), 0);
}

#[test]
fn test_block_cache_is_singleton() {
    let device = Arc::new(MockBlockDevice::new(8));
    let mut manager = BlockCacheManager::new(device.clone(), 4);
    let a = manager.get_block_cache(3).unwrap();
    let b = manager.get_block_cache(3).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(manager.len(), 1);

    a.lock().modify(0, |data: &mut [u8; BLOCK_SZ]| data[0] = 0x5a);
    assert!(b.lock().is_dirty());
    assert_eq!(device.block(3)[0], 0);
    manager.sync_all().unwrap();
    assert_eq!(device.block(3)[0], 0x5a);
    assert!(!a.lock().is_dirty());
}

#[test]
fn test_block_cache_evicts_unreferenced_and_writes_back() {
    let device = Arc::new(MockBlockDevice::new(8));
    let mut manager = BlockCacheManager::new(device.clone(), 2);
    manager
        .get_block_cache(0)
        .unwrap()
        .lock()
        .modify(0, |data: &mut [u8; BLOCK_SZ]| data[7] = 0xab);
    let _one = manager.get_block_cache(1).unwrap();
    let _two = manager.get_block_cache(2).unwrap();
    assert_eq!(manager.len(), 2);
    assert!(manager.lookup(0).is_none());
    assert_eq!(device.block(0)[7], 0xab);
}

#[test]
fn test_block_cache_never_evicts_held_buffers() {
    let device = Arc::new(MockBlockDevice::new(8));
    let mut manager = BlockCacheManager::new(device, 2);
    let zero = manager.get_block_cache(0).unwrap();
    let one = manager.get_block_cache(1).unwrap();
    let two = manager.get_block_cache(2).unwrap();
    assert_eq!(manager.len(), 3);
    drop((zero, one, two));
    manager.release_unused().unwrap();
    assert!(manager.is_empty());
}

#[test]
fn test_block_cache_keeps_dirty_victim_when_write_back_fails() {
    let device = Arc::new(MockBlockDevice::new(8));
    let mut manager = BlockCacheManager::new(device.clone(), 2);
    manager
        .get_block_cache(0)
        .unwrap()
        .lock()
        .modify(0, |data: &mut [u8; BLOCK_SZ]| data[7] = 0xab);
    let _one = manager.get_block_cache(1).unwrap();

    device.fail_writes.store(true, Ordering::SeqCst);
    assert_eq!(manager.get_block_cache(2).err(), Some(FsError::Io));
    let kept = manager.lookup(0).unwrap();
    assert!(kept.lock().is_dirty());
    kept.lock()
        .read(0, |data: &[u8; BLOCK_SZ]| assert_eq!(data[7], 0xab));
    drop(kept);
    assert_eq!(manager.len(), 2);

    device.fail_writes.store(false, Ordering::SeqCst);
    let _two = manager.get_block_cache(2).unwrap();
    assert!(manager.lookup(0).is_none());
    assert_eq!(device.block(0)[7], 0xab);
}

#[test]
fn test_write_failures_under_cache_pressure_lose_nothing() {
    with_test_fs(|device, fs| {
        let mut session = Session::new(fs.clone()).unwrap();
        let fd = session.open("/x", rw_create(), InodeMode::regular()).unwrap();
        session.write(fd, b"precious").unwrap();
        session.close(fd).unwrap();

        device.fail_writes.store(true, Ordering::SeqCst);
        let failures = (1000..1200)
            .filter(|&block_id| fs.get_block(block_id).is_err())
            .count();
        assert!(failures > 0);
        device.fail_writes.store(false, Ordering::SeqCst);

        assert_eq!(session.read_file("/x").unwrap(), b"precious");
        session.sync().unwrap();
        assert_eq!(session.read_file("/x").unwrap(), b"precious");
    })
}

#[test]
fn test_block_cache_read_error() {
    let device = Arc::new(MockBlockDevice::new(4));
    let mut manager = BlockCacheManager::new(device, 4);
    assert_eq!(manager.get_block_cache(9).err(), Some(FsError::Io));
    assert!(manager.is_empty());
}

#[test]
fn test_format_default_geometry() {
    let params = FormatParams::default();
    assert_eq!(params.inodes, 21984);
    assert_eq!(params.zones, 65535);
    let sb = minix_fs::SuperBlock::new(
        params.inodes,
        params.zones,
        params.imap_blocks,
        params.zmap_blocks,
    );
    assert_eq!(sb.first_data_zone, 700);
    assert!(sb.is_valid());
}

#[test]
fn test_format_creates_root() {
    with_test_fs(|_device, fs| {
        let sb = fs.geometry();
        assert_eq!(sb.first_data_zone as u32, TEST_FIRST_DATA_ZONE);
        assert_eq!(fs.free_inode_count(), TEST_INODES as usize - 1);
        assert_eq!(
            fs.free_zone_count(),
            (TEST_ZONES as u32 - TEST_FIRST_DATA_ZONE) as usize - 1
        );

        let root = fs.root_inode().unwrap();
        assert_eq!(root.ino(), ROOT_INO);
        let stat = root.stat();
        assert!(stat.mode.is_dir());
        assert_eq!(stat.nlinks, 2);
        assert_eq!(stat.size, 32);
        assert_eq!(stat.first_zone, TEST_FIRST_DATA_ZONE);
        assert_eq!(stat.mtime, 1000);

        let entries = root.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, ".");
        assert_eq!(entries[0].ino, ROOT_INO);
        assert_eq!(entries[1].name, "..");
        assert_eq!(entries[1].ino, ROOT_INO);
        assert!(root.is_empty_dir().unwrap());
    });
}

#[test]
fn test_zone_allocation_is_lowest_first() {
    with_test_fs(|_device, fs| {
        let a = fs.alloc_zone().unwrap();
        let b = fs.alloc_zone().unwrap();
        assert_eq!(a, TEST_FIRST_DATA_ZONE + 1);
        assert_eq!(b, TEST_FIRST_DATA_ZONE + 2);
        assert!(fs.zone_in_use(a));
        assert!(fs.is_dirty());

        fs.free_zone(a).unwrap();
        assert!(!fs.zone_in_use(a));
        assert_eq!(fs.alloc_zone().unwrap(), a);
        assert_eq!(fs.free_zone(1).err(), Some(FsError::InvalidArgument));
        assert_eq!(
            fs.free_zone(TEST_ZONES as u32).err(),
            Some(FsError::InvalidArgument)
        );
    });
}

#[test]
fn test_allocated_zone_is_zeroed() {
    with_test_fs(|_device, fs| {
        let block_id = fs.alloc_zone().unwrap();
        fs.get_block(block_id as usize)
            .unwrap()
            .lock()
            .modify(0, |data: &mut [u8; BLOCK_SZ]| data.fill(0xff));
        fs.free_zone(block_id).unwrap();
        let again = fs.alloc_zone().unwrap();
        assert_eq!(again, block_id);
        let zeroed = fs
            .get_block(again as usize)
            .unwrap()
            .lock()
            .read(0, |data: &[u8; BLOCK_SZ]| data.iter().all(|&b| b == 0));
        assert!(zeroed);
    });
}

#[test]
fn test_inode_number_allocation() {
    with_test_fs(|_device, fs| {
        assert!(fs.inode_in_use(ROOT_INO));
        assert_eq!(fs.alloc_inode_number().unwrap(), 2);
        assert_eq!(fs.alloc_inode_number().unwrap(), 3);
        fs.free_inode_number(2).unwrap();
        assert_eq!(fs.alloc_inode_number().unwrap(), 2);
        assert_eq!(fs.free_inode_number(0).err(), Some(FsError::InvalidArgument));
    });
}

#[test]
fn test_zone_exhaustion() {
    // 2 + 1 + 1 + 1 = 5，共 11 个数据区，根目录占 1 个
    let device = Arc::new(MockBlockDevice::new(16));
    let params = FormatParams {
        inodes: 32,
        zones: 16,
        imap_blocks: 1,
        zmap_blocks: 1,
    };
    let fs = MinixFileSystem::format(1, device, clock(), params).unwrap();
    assert_eq!(fs.free_zone_count(), 10);
    for _ in 0..10 {
        fs.alloc_zone().unwrap();
    }
    assert_eq!(fs.free_zone_count(), 0);
    assert_eq!(fs.alloc_zone().err(), Some(FsError::OutOfSpace));
}

#[test]
fn test_inode_cache_singleton() {
    with_test_fs(|_device, fs| {
        let a = fs.get_inode(ROOT_INO).unwrap();
        let b = fs.get_inode(ROOT_INO).unwrap();
        assert!(minix_fs::InodeRef::ptr_eq(&a, &b));
        assert_eq!(a.count(), 2);
        let c = b.clone();
        assert_eq!(a.count(), 3);
        drop((b, c));
        assert_eq!(a.count(), 1);
        drop(a);
        assert_eq!(fs.cached_inodes(), 0);
        assert_eq!(fs.get_inode(0).err(), Some(FsError::InvalidArgument));
        assert_eq!(
            fs.get_inode(TEST_INODES as u32 + 1).err(),
            Some(FsError::InvalidArgument)
        );
    });
}

#[test]
fn test_write_read_roundtrip() {
    with_session(|session| {
        let fd = session.open("/hello", rw_create(), InodeMode::regular()).unwrap();
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(session.write(fd, &data).unwrap(), data.len());
        assert_eq!(session.fstat(fd).unwrap().size, 3000);

        session.seek(fd, 0).unwrap();
        let mut buf = vec![0u8; 4096];
        assert_eq!(session.read(fd, &mut buf).unwrap(), 3000);
        assert_eq!(&buf[..3000], &data[..]);
        assert_eq!(session.read(fd, &mut buf).unwrap(), 0);
        session.close(fd).unwrap();

        assert_eq!(session.read_file("/hello").unwrap(), data);
    });
}

#[test]
fn test_holes_read_as_zero() {
    with_session(|session| {
        let fd = session.open("/sparse", rw_create(), InodeMode::regular()).unwrap();
        session.seek(fd, 5000).unwrap();
        assert_eq!(session.write(fd, b"xyz").unwrap(), 3);
        assert_eq!(session.fstat(fd).unwrap().size, 5003);

        let inode = session.lookup("/sparse").unwrap();
        for block in 0..4 {
            assert_eq!(inode.bmap(block).unwrap(), None);
        }
        assert!(inode.bmap(4).unwrap().is_some());
        drop(inode);

        session.seek(fd, 0).unwrap();
        let mut buf = vec![0xeeu8; 5003];
        assert_eq!(session.read(fd, &mut buf).unwrap(), 5003);
        assert!(buf[..5000].iter().all(|&b| b == 0));
        assert_eq!(&buf[5000..], b"xyz");
    });
}

#[test]
fn test_double_indirect_and_truncate() {
    with_test_fs(|_device, fs| {
        let before = fs.free_zone_count();
        let mut session = Session::new(fs.clone()).unwrap();
        let fd = session.open("/big", rw_create(), InodeMode::regular()).unwrap();
        session.seek(fd, 519 * BLOCK_SZ).unwrap();
        assert_eq!(session.write(fd, b"!").unwrap(), 1);
        session.close(fd).unwrap();
        // 二级间接表、间接表、数据块
        assert_eq!(fs.free_zone_count(), before - 3);

        let inode = session.lookup("/big").unwrap();
        assert!(inode.bmap(519).unwrap().is_some());
        assert_eq!(inode.bmap(7).unwrap(), None);
        drop(inode);

        let fd = session
            .open("/big", OpenFlags::WRONLY | OpenFlags::TRUNC, InodeMode::regular())
            .unwrap();
        assert_eq!(session.fstat(fd).unwrap().size, 0);
        session.close(fd).unwrap();
        assert_eq!(fs.free_zone_count(), before);
    });
}

#[test]
fn test_write_past_max_file_size() {
    with_session(|session| {
        let fd = session.open("/huge", rw_create(), InodeMode::regular()).unwrap();
        session.seek(fd, MAX_FILE_BLOCKS * BLOCK_SZ).unwrap();
        assert_eq!(session.write(fd, b"x").err(), Some(FsError::FileTooLarge));
    });
}

#[test]
fn test_failed_write_still_updates_mtime() {
    let device = Arc::new(MockBlockDevice::new(TEST_ZONES as usize));
    let fs = format_device(device.clone());
    let mut session = Session::new(fs).unwrap();
    session.create("/f", InodeMode::regular()).unwrap();
    assert_eq!(session.stat("/f").unwrap().mtime, 1000);
    drop(session.unmount().unwrap());

    let fs = MinixFileSystem::mount(0x0301, device, Arc::new(FixedClock(2000)), MountFlags::empty())
        .unwrap();
    let mut session = Session::new(fs).unwrap();
    let fd = session.open("/f", OpenFlags::RDWR, InodeMode::regular()).unwrap();
    session.seek(fd, MAX_FILE_BLOCKS * BLOCK_SZ).unwrap();
    assert_eq!(session.write(fd, b"x").err(), Some(FsError::FileTooLarge));
    let stat = session.fstat(fd).unwrap();
    assert_eq!(stat.mtime, 2000);
    assert_eq!(stat.size, 0);
    session.close(fd).unwrap();
}

#[test]
fn test_subdirectory_link_limit() {
    let device = Arc::new(MockBlockDevice::new(TEST_ZONES as usize));
    let params = FormatParams {
        inodes: 320,
        ..test_params()
    };
    let fs = MinixFileSystem::format(0x0301, device, clock(), params).unwrap();
    let mut session = Session::new(fs).unwrap();
    session.mkdir("/p", InodeMode::directory()).unwrap();
    let subdirs = LINK_MAX - 2;
    for i in 0..subdirs {
        session
            .mkdir(&format!("/p/d{}", i), InodeMode::directory())
            .unwrap();
    }
    assert_eq!(session.stat("/p").unwrap().nlinks, LINK_MAX);

    let free_inodes = session.fs().free_inode_count();
    assert_eq!(
        session.mkdir("/p/one-more", InodeMode::directory()).err(),
        Some(FsError::TooManyLinks)
    );
    assert_eq!(session.fs().free_inode_count(), free_inodes);
    assert_eq!(session.stat("/p/one-more").err(), Some(FsError::PathNotFound));

    let stat = session.stat("/p").unwrap();
    assert!(stat.mode.is_dir());
    assert_eq!(stat.nlinks, LINK_MAX);
    assert_eq!(session.read_dir("/p").unwrap().len(), subdirs as usize + 2);
    session.create("/p/file", InodeMode::regular()).unwrap();
    assert_eq!(FsError::TooManyLinks.errno(), -31);
}

#[test]
fn test_write_stops_when_volume_fills() {
    let device = Arc::new(MockBlockDevice::new(16));
    let params = FormatParams {
        inodes: 32,
        zones: 16,
        imap_blocks: 1,
        zmap_blocks: 1,
    };
    let fs = MinixFileSystem::format(1, device, clock(), params).unwrap();
    let mut session = Session::new(fs).unwrap();
    let fd = session.open("/fill", rw_create(), InodeMode::regular()).unwrap();
    // 10 个空闲区：7 个直接块 + 1 个间接表 + 2 个间接数据块
    let data = vec![b'z'; 12 * BLOCK_SZ];
    assert_eq!(session.write(fd, &data).unwrap(), 9 * BLOCK_SZ);
    assert_eq!(session.write(fd, b"more").err(), Some(FsError::OutOfSpace));
    assert_eq!(session.fstat(fd).unwrap().size as usize, 9 * BLOCK_SZ);
}

#[test]
fn test_append_twice() {
    with_session(|session| {
        let flags = OpenFlags::WRONLY | OpenFlags::APPEND | OpenFlags::CREATE;
        let fd = session.open("/log", flags, InodeMode::regular()).unwrap();
        assert_eq!(session.write(fd, b"0123456789").unwrap(), 10);
        assert_eq!(session.write(fd, b"abcdefghij").unwrap(), 10);
        assert_eq!(session.fstat(fd).unwrap().size, 20);
        let mut buf = [0u8; 4];
        assert_eq!(session.read(fd, &mut buf).err(), Some(FsError::PermissionDenied));
        session.close(fd).unwrap();
        assert_eq!(session.read_file("/log").unwrap(), b"0123456789abcdefghij");
    });
}

#[test]
fn test_directory_slot_reuse() {
    with_session(|session| {
        for name in ["/a", "/b", "/c"] {
            session.create(name, InodeMode::regular()).unwrap();
        }
        assert_eq!(session.stat("/").unwrap().size, 5 * 16);
        session.unlink("/b").unwrap();
        session.create("/d", InodeMode::regular()).unwrap();
        assert_eq!(names(session, "/"), vec![".", "..", "a", "d", "c"]);
        assert_eq!(session.stat("/").unwrap().size, 5 * 16);
    });
}

#[test]
fn test_directory_grows_into_second_block() {
    with_session(|session| {
        for i in 0..70 {
            session.create(&format!("/f{}", i), InodeMode::regular()).unwrap_or(());
        }
        // 64 个 inode 中根目录占 1 个，只能建 63 个文件
        assert_eq!(
            session.create("/extra", InodeMode::regular()).err(),
            Some(FsError::OutOfSpace)
        );
        let root = session.lookup("/").unwrap();
        assert_eq!(root.size() as usize, (2 + 63) * 16);
        assert!(root.bmap(1).unwrap().is_some());
        drop(root);
        assert_eq!(session.stat("/f62").unwrap().nlinks, 1);
    });
}

#[test]
fn test_mkdir_touch_cat_rmdir() {
    with_session(|session| {
        session.mkdir("/dir", InodeMode::directory()).unwrap();
        assert_eq!(session.stat("/").unwrap().nlinks, 3);
        let stat = session.stat("/dir").unwrap();
        assert!(stat.mode.is_dir());
        assert_eq!(stat.nlinks, 2);
        assert_eq!(stat.size, 32);
        assert_eq!(names(session, "/dir"), vec![".", ".."]);
        assert_eq!(session.stat("/dir/..").unwrap().ino, ROOT_INO);

        session.create("/dir/f", InodeMode::regular()).unwrap();
        assert!(session.read_file("/dir/f").unwrap().is_empty());
        assert_eq!(session.stat("/dir/f").unwrap().size, 0);
        let fd = session
            .open("/dir/f", OpenFlags::WRONLY, InodeMode::regular())
            .unwrap();
        session.write(fd, b"hello").unwrap();
        session.close(fd).unwrap();
        assert_eq!(session.read_file("/dir/f").unwrap(), b"hello");

        assert_eq!(session.rmdir("/dir").err(), Some(FsError::NotEmpty));
        session.unlink("/dir/f").unwrap();
        session.rmdir("/dir").unwrap();
        assert_eq!(session.stat("/dir").err(), Some(FsError::PathNotFound));
        assert_eq!(
            session.open("/dir", OpenFlags::RDONLY, InodeMode::regular()).err(),
            Some(FsError::PathNotFound)
        );
        assert_eq!(session.stat("/").unwrap().nlinks, 2);
    });
}

#[test]
fn test_unlink_reclaims_everything() {
    with_test_fs(|_device, fs| {
        let zones = fs.free_zone_count();
        let inodes = fs.free_inode_count();
        let mut session = Session::new(fs.clone()).unwrap();
        let fd = session.open("/tmp", rw_create(), InodeMode::regular()).unwrap();
        session.write(fd, &[7u8; 3000]).unwrap();
        session.close(fd).unwrap();
        assert_eq!(fs.free_zone_count(), zones - 3);
        assert_eq!(fs.free_inode_count(), inodes - 1);

        session.unlink("/tmp").unwrap();
        assert_eq!(fs.free_zone_count(), zones);
        assert_eq!(fs.free_inode_count(), inodes);
    });
}

#[test]
fn test_unlinked_open_file_survives_until_close() {
    with_test_fs(|_device, fs| {
        let inodes = fs.free_inode_count();
        let mut session = Session::new(fs.clone()).unwrap();
        let fd = session.open("/keep", rw_create(), InodeMode::regular()).unwrap();
        session.write(fd, b"still here").unwrap();
        session.unlink("/keep").unwrap();
        assert_eq!(session.stat("/keep").err(), Some(FsError::PathNotFound));

        session.seek(fd, 0).unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(session.read(fd, &mut buf).unwrap(), 10);
        assert_eq!(&buf, b"still here");
        assert_eq!(fs.free_inode_count(), inodes - 1);
        session.close(fd).unwrap();
        assert_eq!(fs.free_inode_count(), inodes);
    });
}

#[test]
fn test_error_rules() {
    with_session(|session| {
        session.mkdir("/d", InodeMode::directory()).unwrap();
        session.create("/f", InodeMode::regular()).unwrap();

        assert_eq!(
            session.create("/f", InodeMode::regular()).err(),
            Some(FsError::AlreadyExists)
        );
        assert_eq!(
            session.mkdir("/d", InodeMode::directory()).err(),
            Some(FsError::AlreadyExists)
        );
        assert_eq!(session.unlink("/d").err(), Some(FsError::IsADirectory));
        assert_eq!(session.unlink("/nope").err(), Some(FsError::PathNotFound));
        assert_eq!(session.rmdir("/f").err(), Some(FsError::NotADirectory));
        assert_eq!(session.rmdir("/d/.").err(), Some(FsError::PermissionDenied));
        assert_eq!(session.mkdir("/", InodeMode::directory()).err(), Some(FsError::PathNotFound));
        assert_eq!(session.stat("/f/x").err(), Some(FsError::NotADirectory));
        assert_eq!(session.stat("/x/y").err(), Some(FsError::PathNotFound));

        assert_eq!(
            session.open("/", OpenFlags::RDONLY, InodeMode::regular()).err(),
            Some(FsError::IsADirectory)
        );
        assert_eq!(
            session.open("/d", OpenFlags::WRONLY, InodeMode::regular()).err(),
            Some(FsError::PermissionDenied)
        );
        assert_eq!(
            session.open("/missing", OpenFlags::RDONLY, InodeMode::regular()).err(),
            Some(FsError::PathNotFound)
        );

        let fd = session.open("/d", OpenFlags::RDONLY, InodeMode::regular()).unwrap();
        assert_eq!(session.write(fd, b"x").err(), Some(FsError::IsADirectory));
        let mut buf = [0u8; 32];
        assert_eq!(session.read(fd, &mut buf).unwrap(), 32);
        assert_eq!(&buf[2..3], b".");
    });
}

#[test]
fn test_long_name_leaves_no_inode_behind() {
    with_test_fs(|_device, fs| {
        let inodes = fs.free_inode_count();
        let mut session = Session::new(fs.clone()).unwrap();
        assert_eq!(
            session.create("/abcdefghijklmnop", InodeMode::regular()).err(),
            Some(FsError::InvalidArgument)
        );
        assert_eq!(fs.free_inode_count(), inodes);
        assert_eq!(session.stat("/abcdefghijklmnop").err(), Some(FsError::PathNotFound));
    });
}

#[test]
fn test_cwd_and_relative_paths() {
    with_session(|session| {
        session.mkdir("/usr", InodeMode::directory()).unwrap();
        session.mkdir("/usr/lib", InodeMode::directory()).unwrap();
        session.chdir("/usr/lib").unwrap();
        assert_eq!(session.getcwd().unwrap(), "/usr/lib");

        session.create("x", InodeMode::regular()).unwrap();
        assert!(session.stat("/usr/lib/x").is_ok());
        assert!(session.stat("../lib//x").is_ok());

        assert_eq!(session.rmdir("/usr/lib").err(), Some(FsError::PermissionDenied));
        assert_eq!(session.chdir("x").err(), Some(FsError::NotADirectory));

        session.chdir("..").unwrap();
        assert_eq!(session.getcwd().unwrap(), "/usr");
        session.chdir("/").unwrap();
        assert_eq!(session.getcwd().unwrap(), "/");
    });
}

#[test]
fn test_descriptor_table() {
    with_session(|session| {
        session.create("/f", InodeMode::regular()).unwrap();
        let fds: Vec<_> = (0..NR_OPEN)
            .map(|_| session.open("/f", OpenFlags::RDONLY, InodeMode::regular()).unwrap())
            .collect();
        assert_eq!(fds, (0..NR_OPEN).collect::<Vec<_>>());
        assert_eq!(
            session.open("/f", OpenFlags::RDONLY, InodeMode::regular()).err(),
            Some(FsError::InvalidArgument)
        );
        session.close(5).unwrap();
        assert_eq!(session.close(5).err(), Some(FsError::InvalidArgument));
        assert_eq!(
            session.open("/f", OpenFlags::RDONLY, InodeMode::regular()).unwrap(),
            5
        );
        assert_eq!(session.close(NR_OPEN + 1).err(), Some(FsError::InvalidArgument));
    });
}

#[test]
fn test_dup_shares_offset() {
    with_session(|session| {
        let fd = session.open("/f", rw_create(), InodeMode::regular()).unwrap();
        session.write(fd, b"abcdef").unwrap();
        let copy = session.dup(fd).unwrap();
        assert_ne!(copy, fd);
        session.seek(fd, 0).unwrap();
        let mut buf = [0u8; 3];
        session.read(copy, &mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        session.read(fd, &mut buf).unwrap();
        assert_eq!(&buf, b"def");
        session.close(fd).unwrap();
        assert_eq!(session.fstat(copy).unwrap().size, 6);
    });
}

#[test]
fn test_persistence_across_mounts() {
    let device = Arc::new(MockBlockDevice::new(TEST_ZONES as usize));
    let fs = format_device(device.clone());
    let mut session = Session::new(fs).unwrap();
    session.mkdir("/etc", InodeMode::directory()).unwrap();
    let fd = session
        .open("/etc/motd", rw_create(), InodeMode::regular())
        .unwrap();
    session.write(fd, b"welcome").unwrap();
    session.close(fd).unwrap();
    let free_zones = session.fs().free_zone_count();
    drop(session.unmount().unwrap());

    let fs = MinixFileSystem::mount(0x0301, device, clock(), MountFlags::empty()).unwrap();
    assert_eq!(fs.free_zone_count(), free_zones);
    let mut session = Session::new(fs).unwrap();
    assert_eq!(session.read_file("/etc/motd").unwrap(), b"welcome");
    assert_eq!(names(&session, "/etc"), vec![".", "..", "motd"]);
    assert_eq!(session.stat("/etc").unwrap().nlinks, 2);
}

#[test]
fn test_read_only_mount() {
    let device = Arc::new(MockBlockDevice::new(TEST_ZONES as usize));
    let fs = format_device(device.clone());
    let mut session = Session::new(fs).unwrap();
    session.create("/f", InodeMode::regular()).unwrap();
    drop(session.unmount().unwrap());

    let fs = MinixFileSystem::mount(0x0301, device, clock(), MountFlags::RDONLY).unwrap();
    assert!(fs.is_read_only());
    let mut session = Session::new(fs).unwrap();
    assert_eq!(
        session.create("/g", InodeMode::regular()).err(),
        Some(FsError::PermissionDenied)
    );
    assert_eq!(session.unlink("/f").err(), Some(FsError::PermissionDenied));
    assert_eq!(
        session.open("/f", OpenFlags::WRONLY, InodeMode::regular()).err(),
        Some(FsError::PermissionDenied)
    );
    assert!(session.read_file("/f").unwrap().is_empty());
}

#[test]
fn test_device_read_failure_is_io() {
    let device = Arc::new(MockBlockDevice::new(TEST_ZONES as usize));
    let fs = format_device(device.clone());
    let mut session = Session::new(fs).unwrap();
    session.create("/f", InodeMode::regular()).unwrap();
    drop(session.unmount().unwrap());

    let fs = MinixFileSystem::mount(0x0301, device.clone(), clock(), MountFlags::empty()).unwrap();
    let mut session = Session::new(fs).unwrap();
    device.fail_reads.store(true, Ordering::SeqCst);
    assert_eq!(session.read_file("/f").err(), Some(FsError::Io));
    device.fail_reads.store(false, Ordering::SeqCst);
    assert!(session.read_file("/f").is_ok());
}

#[test]
fn test_describe_codes() {
    assert_eq!(FsError::PathNotFound.errno(), -2);
    assert_eq!(FsError::NotEmpty.errno(), -39);
    assert_eq!(FsError::from_errno(-21), Some(FsError::IsADirectory));
    assert_eq!(FsError::from_errno(-34), Some(FsError::OutOfRange));
    assert_eq!(describe(FsError::TooManyLinks.errno()), "too many links");
    assert_eq!(describe(FsError::OutOfSpace.errno()), "no space left on device");
    assert_eq!(describe(-9999), "unknown error");
    assert_eq!(describe(0), "unknown error");
}
