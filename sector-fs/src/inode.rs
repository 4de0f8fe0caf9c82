//! # 索引节点层
//!
//! [`Inode`] 是磁盘索引节点的打开句柄，同一扇区同时至多存在一个句柄，
//! 由 [`InodeTable`] 登记并以打开计数管理其生命周期。
//! 最后一次关闭时，已被删除的索引节点连同其全部扇区一并释放。
//!
//! 句柄本身不缓存磁盘数据，每次操作都经块缓存层读写其扇区。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::{Mutex, MutexGuard};
use vfs::{Error, Result};

use crate::FileSystem;
use crate::layout::{DiskInode, MAX_FILE_SIZE};

/// 打开的索引节点
pub struct Inode {
    sector: u32,
    state: Mutex<InodeState>,
    /// 扩展锁：同一索引节点的增长互斥进行
    extension: Mutex<()>,
    /// 目录锁：同一目录内目录项的查找与增删互斥进行
    entries: Mutex<()>,
}

#[derive(Debug, Default)]
struct InodeState {
    open_count: usize,
    removed: bool,
    deny_write_count: usize,
}

impl Inode {
    fn new(sector: u32) -> Self {
        Self {
            sector,
            state: Mutex::new(InodeState {
                open_count: 1,
                ..Default::default()
            }),
            extension: Mutex::new(()),
            entries: Mutex::new(()),
        }
    }

    /// 在`sector`处写入长为`length`字节的新索引节点，数据全部为零。
    ///
    /// 失败时不留下任何已分配的扇区，`sector`本身仍归调用者所有。
    pub fn create(sector: u32, length: u32, is_dir: bool, fs: &FileSystem) -> Result<()> {
        let mut disk_inode = DiskInode::new(sector, is_dir);
        let new_blocks = grow(&mut disk_inode, length, fs)?;
        if let Err(err) = store(sector, &disk_inode, fs) {
            fs.release_sectors(&new_blocks);
            return Err(err);
        }
        log::debug!("create inode {sector}: {length} bytes, dir: {is_dir}");
        Ok(())
    }

    /// 索引节点所在扇区
    #[inline]
    pub fn sector(&self) -> u32 {
        self.sector
    }

    /// 索引节点编号，即其所在扇区
    #[inline]
    pub fn inumber(&self) -> u32 {
        self.sector
    }

    #[inline]
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    #[inline]
    pub fn deny_write_count(&self) -> usize {
        self.state.lock().deny_write_count
    }

    /// 标记删除，最后一次关闭时释放
    pub fn remove(&self) {
        self.state.lock().removed = true;
        log::debug!("inode {} marked removed", self.sector);
    }

    /// 读出磁盘索引节点的副本
    pub fn disk_inode(&self, fs: &FileSystem) -> Result<DiskInode> {
        load(self.sector, fs)
    }

    pub fn length(&self, fs: &FileSystem) -> Result<u32> {
        Ok(self.disk_inode(fs)?.length)
    }

    pub fn is_dir(&self, fs: &FileSystem) -> Result<bool> {
        Ok(self.disk_inode(fs)?.is_dir())
    }

    /// 从`offset`处读出数据填充`buf`，不越过文件末尾
    pub fn read_at(&self, offset: usize, buf: &mut [u8], fs: &FileSystem) -> Result<usize> {
        self.disk_inode(fs)?.read_at(offset, buf, fs.cache())
    }

    /// 把`buf`写到`offset`处，越过文件末尾时先增长文件
    pub fn write_at(&self, offset: usize, buf: &[u8], fs: &FileSystem) -> Result<usize> {
        if self.deny_write_count() > 0 {
            log::warn!("write to inode {} denied", self.sector);
            return Err(Error::WriteDenied);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let end = offset
            .checked_add(buf.len())
            .filter(|&end| end <= MAX_FILE_SIZE)
            .ok_or(Error::FileTooLarge)?;
        self.extend(end as u32, fs)?;

        self.disk_inode(fs)?.write_at(offset, buf, fs.cache())
    }

    /// 把长度增至`new_length`字节，不缩短。
    ///
    /// 所需扇区一次分配完毕，分配失败时长度与块树都不变。
    pub fn extend(&self, new_length: u32, fs: &FileSystem) -> Result<()> {
        if new_length <= self.length(fs)? {
            return Ok(());
        }

        let _extension = self.extension.lock();
        // 等锁期间可能已被其它写者扩展
        let mut disk_inode = self.disk_inode(fs)?;
        if new_length <= disk_inode.length {
            return Ok(());
        }

        let old_length = disk_inode.length;
        let new_blocks = grow(&mut disk_inode, new_length, fs)?;
        if let Err(err) = store(self.sector, &disk_inode, fs) {
            fs.release_sectors(&new_blocks);
            return Err(err);
        }
        log::debug!(
            "extend inode {}: {old_length} -> {new_length} bytes",
            self.sector
        );
        Ok(())
    }

    /// 禁止写入，次数不可超过打开计数
    pub fn deny_write(&self) {
        let mut state = self.state.lock();
        state.deny_write_count += 1;
        assert!(state.deny_write_count <= state.open_count);
    }

    /// 重新允许写入，须与一次 [`Inode::deny_write`] 配对
    pub fn allow_write(&self) {
        let mut state = self.state.lock();
        assert!(state.deny_write_count > 0);
        state.deny_write_count -= 1;
    }

    #[inline]
    pub(crate) fn lock_entries(&self) -> MutexGuard<'_, ()> {
        self.entries.lock()
    }
}

/// 打开索引节点的登记表
#[derive(Default)]
pub(crate) struct InodeTable {
    open: Mutex<BTreeMap<u32, Arc<Inode>>>,
}

impl InodeTable {
    /// 打开`sector`处的索引节点，已打开的则增加打开计数并返回同一个句柄
    pub fn open(&self, sector: u32, fs: &FileSystem) -> Result<Arc<Inode>> {
        let mut open = self.open.lock();
        if let Some(inode) = open.get(&sector) {
            inode.state.lock().open_count += 1;
            return Ok(inode.clone());
        }

        load(sector, fs)?;
        let inode = Arc::new(Inode::new(sector));
        open.insert(sector, inode.clone());
        log::debug!("open inode {sector}");
        Ok(inode)
    }

    pub fn reopen(&self, inode: &Arc<Inode>) -> Arc<Inode> {
        inode.state.lock().open_count += 1;
        inode.clone()
    }

    /// 减少打开计数。最后一次关闭时注销句柄，
    /// 若该索引节点已删除则返回真，由调用者回收
    pub fn close(&self, inode: Arc<Inode>) -> bool {
        let mut open = self.open.lock();
        let mut state = inode.state.lock();
        state.open_count -= 1;
        if state.open_count > 0 {
            return false;
        }

        open.remove(&inode.sector);
        log::debug!("close inode {}", inode.sector);
        state.removed
    }

    pub fn opened(&self) -> usize {
        self.open.lock().len()
    }
}

fn load(sector: u32, fs: &FileSystem) -> Result<DiskInode> {
    let disk_inode = fs
        .cache()
        .map(sector as usize, 0, |disk_inode: &DiskInode| disk_inode.clone())?;
    if !disk_inode.is_valid() {
        log::warn!("bad inode magic at sector {sector}");
        return Err(Error::CorruptInode { sector });
    }
    Ok(disk_inode)
}

fn store(sector: u32, disk_inode: &DiskInode, fs: &FileSystem) -> Result<()> {
    fs.cache()
        .map_mut(sector as usize, 0, |dest: &mut DiskInode| {
            dest.clone_from(disk_inode);
        })
}

/// 一次分配增长所需的全部扇区，任何一步失败都归还它们。
/// 成功时返回新分配的扇区
fn grow(disk_inode: &mut DiskInode, new_length: u32, fs: &FileSystem) -> Result<Vec<u32>> {
    if new_length as usize > MAX_FILE_SIZE {
        return Err(Error::FileTooLarge);
    }
    let needed = DiskInode::count_total_block(new_length)
        .saturating_sub(DiskInode::count_total_block(disk_inode.length));
    let new_blocks = fs.alloc_sectors(needed)?;
    if let Err(err) = disk_inode.grow(new_length, new_blocks.clone(), fs.cache()) {
        fs.release_sectors(&new_blocks);
        return Err(err);
    }
    Ok(new_blocks)
}
