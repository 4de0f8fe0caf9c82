//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟缓冲区，
//! 把即将操作的扇区复制到内存中，对扇区的读写都在缓冲区中进行。
//!
//! 缓冲区至多容纳 [`CACHE_CAPACITY`] 个扇区，按最近使用顺序排列。
//! 缓冲区满时，写回并踢走最久未用且没有其它引用的扇区。
//! 脏扇区只在被踢走、[`BlockCacheManager::flush_dirty`] 与关闭时写回。

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;

use block_dev::BlockDevice;
use spin::Mutex;
use vfs::{Error, Result};

use crate::{BLOCK_SIZE, CACHE_CAPACITY, DataBlock};

/// 扇区数据，按 8 字节对齐以便直接映射为磁盘数据结构
#[repr(C, align(8))]
struct SectorData(DataBlock);

/// 内存中的块缓存
pub struct BlockCache {
    /// 缓存的数据
    data: SectorData,
    /// 对应的扇区号
    block_id: usize,
    /// 底层块设备的引用
    block_device: Arc<dyn BlockDevice>,
    /// 是否为脏块
    modified: bool,
}

impl BlockCache {
    fn new(block_id: usize, block_device: Arc<dyn BlockDevice>) -> Self {
        let mut data = SectorData([0; BLOCK_SIZE]);
        block_device.read_block(block_id, &mut data.0);

        Self {
            data,
            block_id,
            block_device,
            modified: false,
        }
    }

    #[inline]
    pub fn block_id(&self) -> usize {
        self.block_id
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.modified
    }

    pub fn sync(&mut self) {
        if self.modified {
            self.modified = false;
            self.block_device.write_block(self.block_id, &self.data.0);
        }
    }

    /// 从扇区内`offset`处起读满`buf`
    pub fn read(&self, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.data.0[offset..offset + buf.len()]);
    }

    /// 把`src`写到扇区内`offset`处
    pub fn write(&mut self, offset: usize, src: &[u8]) {
        self.data.0[offset..offset + src.len()].copy_from_slice(src);
        self.modified = true;
    }

    pub fn zeroize(&mut self) {
        self.data.0.fill(0);
        self.modified = true;
    }

    pub fn get<T: Sized>(&self, offset: usize) -> &T {
        let type_size = mem::size_of::<T>();
        assert!(type_size + offset <= BLOCK_SIZE);
        assert_eq!(offset % mem::align_of::<T>(), 0);
        let addr = self.offset(offset).cast();
        unsafe { &*addr }
    }

    pub fn get_mut<T: Sized>(&mut self, offset: usize) -> &mut T {
        let type_size = mem::size_of::<T>();
        assert!(type_size + offset <= BLOCK_SIZE);
        assert_eq!(offset % mem::align_of::<T>(), 0);
        self.modified = true;
        let addr = self.offset_mut(offset).cast();
        unsafe { &mut *addr }
    }

    #[inline]
    pub fn map<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.get(offset))
    }

    #[inline]
    pub fn map_mut<T: Sized, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        f(self.get_mut(offset))
    }
}

impl BlockCache {
    #[inline]
    fn offset(&self, count: usize) -> *const u8 {
        self.data.0[count..].as_ptr()
    }

    #[inline]
    fn offset_mut(&mut self, count: usize) -> *mut u8 {
        self.data.0[count..].as_mut_ptr()
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        self.sync();
    }
}

/// 块缓存管理器，缓存、调度某一块设备的扇区
pub struct BlockCacheManager {
    block_device: Arc<dyn BlockDevice>,
    /// 队首最久未用，队尾最近使用
    queue: Mutex<VecDeque<(usize, Arc<Mutex<BlockCache>>)>>,
}

impl BlockCacheManager {
    pub fn new(block_device: Arc<dyn BlockDevice>) -> Self {
        Self {
            block_device,
            queue: Mutex::new(VecDeque::with_capacity(CACHE_CAPACITY)),
        }
    }

    #[inline]
    pub fn block_device(&self) -> &Arc<dyn BlockDevice> {
        &self.block_device
    }

    // 块缓存调度策略：命中则移至队尾，未命中时踢走最久未用的闲置块
    pub fn get(&self, block_id: usize) -> Result<Arc<Mutex<BlockCache>>> {
        let mut queue = self.queue.lock();

        // 尝试从缓冲区中读取块
        if let Some(index) = queue.iter().position(|(id, _)| *id == block_id) {
            if let Some(entry) = queue.remove(index) {
                let cache = Arc::clone(&entry.1);
                queue.push_back(entry);
                return Ok(cache);
            }
        }

        // 触及上限，写回一个块
        if queue.len() == CACHE_CAPACITY {
            let index = queue
                .iter()
                .position(|(_, cache)| Arc::strong_count(cache) == 1) // 没有其它引用的才能写回
                .ok_or(Error::CacheExhausted)?;
            if let Some((victim, cache)) = queue.remove(index) {
                log::trace!("evict block {victim}");
                cache.lock().sync();
            }
        }

        // 缓存新块
        log::trace!("load block {block_id}");
        let block_cache = Arc::new(Mutex::new(BlockCache::new(
            block_id,
            self.block_device.clone(),
        )));
        queue.push_back((block_id, block_cache.clone()));

        Ok(block_cache)
    }

    #[inline]
    pub fn ensure_cached(&self, block_id: usize) -> Result<()> {
        self.get(block_id).map(drop)
    }

    pub fn read(&self, block_id: usize, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.get(block_id)?.lock().read(offset, buf);
        Ok(())
    }

    pub fn write(&self, block_id: usize, offset: usize, src: &[u8]) -> Result<()> {
        self.get(block_id)?.lock().write(offset, src);
        Ok(())
    }

    pub fn zero(&self, block_id: usize) -> Result<()> {
        self.get(block_id)?.lock().zeroize();
        Ok(())
    }

    /// 预取扇区，失败时直接放弃
    pub fn read_ahead(&self, block_id: usize) {
        if let Err(err) = self.ensure_cached(block_id) {
            log::trace!("skip read-ahead of block {block_id}: {err}");
        }
    }

    pub fn map<T: Sized, V>(
        &self,
        block_id: usize,
        offset: usize,
        f: impl FnOnce(&T) -> V,
    ) -> Result<V> {
        Ok(self.get(block_id)?.lock().map(offset, f))
    }

    pub fn map_mut<T: Sized, V>(
        &self,
        block_id: usize,
        offset: usize,
        f: impl FnOnce(&mut T) -> V,
    ) -> Result<V> {
        Ok(self.get(block_id)?.lock().map_mut(offset, f))
    }

    /// 写回全部脏块，但保留在缓冲区中
    pub fn flush_dirty(&self) {
        // 不在持有队列锁时等待块锁，且同一时刻只多占用一个块
        let block_ids: Vec<_> = self.queue.lock().iter().map(|(id, _)| *id).collect();
        for block_id in block_ids {
            let cache = self
                .queue
                .lock()
                .iter()
                .find_map(|(id, cache)| (*id == block_id).then(|| cache.clone()));
            if let Some(cache) = cache {
                cache.lock().sync();
            }
        }
    }

    /// 写回全部脏块并清空缓冲区
    pub fn shutdown(&self) {
        self.flush_dirty();
        let mut queue = self.queue.lock();
        log::debug!("drop {} cached blocks", queue.len());
        queue.clear();
    }

    pub fn contains(&self, block_id: usize) -> bool {
        self.queue.lock().iter().any(|(id, _)| *id == block_id)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
