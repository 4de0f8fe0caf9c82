//! 单元测试用的内存块设备与文件系统

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use block_dev::BlockDevice;

use crate::{BLOCK_SIZE, DataBlock, FileSystem};

pub struct RamDisk {
    sectors: Mutex<Vec<DataBlock>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    pub fn new(sectors: usize) -> Self {
        Self {
            sectors: Mutex::new(vec![[0; BLOCK_SIZE]; sectors]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn fill(&self, block_id: usize, byte: u8) {
        self.sectors.lock().unwrap()[block_id].fill(byte);
    }

    pub fn sector(&self, block_id: usize) -> DataBlock {
        self.sectors.lock().unwrap()[block_id]
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        buf.copy_from_slice(&self.sectors.lock().unwrap()[block_id]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.sectors.lock().unwrap()[block_id].copy_from_slice(buf);
    }
}

pub fn formatted(sectors: u32) -> (Arc<RamDisk>, Arc<FileSystem>) {
    let disk = Arc::new(RamDisk::new(sectors as usize));
    let fs = FileSystem::format(disk.clone(), sectors).unwrap();
    (disk, fs)
}
