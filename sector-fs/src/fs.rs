//! # 文件系统层
//!
//! [`FileSystem`] 持有块设备、块缓存、空闲扇区位图与打开索引节点的登记表，
//! 并提供按路径的创建、打开与删除。
//!
//! 相对路径从调用者给出的当前目录开始解析，绝对路径从根目录开始。

use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use spin::Mutex;
use vfs::{Error, Result};

use crate::inode::InodeTable;
use crate::layout::{DiskInode, FreeMap, SuperBlock};
use crate::{
    BlockCacheManager, Dir, File, FREE_MAP_START, Inode, NAME_MAX, Path, ROOT_DIR_ENTRIES,
    ROOT_DIR_SECTOR, SUPER_BLOCK_SECTOR,
};

pub struct FileSystem {
    cache: BlockCacheManager,
    free_map: Mutex<FreeMap>,
    inodes: InodeTable,
    total_sectors: u32,
}

impl FileSystem {
    /// 在块设备上建立空的文件系统，只含根目录
    pub fn format(block_device: Arc<dyn BlockDevice>, total_sectors: u32) -> Result<Arc<Self>> {
        let free_map_sectors = FreeMap::blocks_for(total_sectors as usize);
        // 超级块、根目录、位图，以及至少一个数据扇区
        let reserved = FREE_MAP_START as usize + free_map_sectors;
        if (total_sectors as usize) <= reserved {
            return Err(Error::NoSpace);
        }

        let cache = BlockCacheManager::new(block_device);
        cache.zero(SUPER_BLOCK_SECTOR as usize)?;
        for sector in FREE_MAP_START as usize..reserved {
            cache.zero(sector)?;
        }
        cache.map_mut(
            SUPER_BLOCK_SECTOR as usize,
            0,
            |super_block: &mut SuperBlock| {
                super_block.init(total_sectors, FREE_MAP_START, free_map_sectors as u32);
            },
        )?;

        let mut free_map = FreeMap::new(
            FREE_MAP_START as usize,
            free_map_sectors,
            total_sectors as usize,
        );
        free_map.reserve(0, reserved, &cache)?;

        let fs = Self {
            cache,
            free_map: Mutex::new(free_map),
            inodes: InodeTable::default(),
            total_sectors,
        };
        Dir::create(ROOT_DIR_SECTOR, ROOT_DIR_ENTRIES, ROOT_DIR_SECTOR, &fs)?;
        fs.flush();

        log::info!("format: {total_sectors} sectors, {free_map_sectors} bitmap sectors");
        Ok(Arc::new(fs))
    }

    /// 挂载块设备上已有的文件系统
    pub fn mount(block_device: Arc<dyn BlockDevice>) -> Result<Arc<Self>> {
        let cache = BlockCacheManager::new(block_device);
        let super_block = cache.map(
            SUPER_BLOCK_SECTOR as usize,
            0,
            |super_block: &SuperBlock| super_block.clone(),
        )?;
        if !super_block.is_valid()
            || (super_block.free_map_sectors as usize)
                < FreeMap::blocks_for(super_block.total_sectors as usize)
        {
            log::warn!("mount: bad super block {super_block:?}");
            return Err(Error::InvalidImage);
        }

        let fs = Self {
            cache,
            free_map: Mutex::new(FreeMap::new(
                super_block.free_map_start as usize,
                super_block.free_map_sectors as usize,
                super_block.total_sectors as usize,
            )),
            inodes: InodeTable::default(),
            total_sectors: super_block.total_sectors,
        };
        // 根目录必须可读
        fs.open_inode(ROOT_DIR_SECTOR).map(|root| fs.close_inode(root))?;

        log::info!("mount: {} sectors", fs.total_sectors);
        Ok(Arc::new(fs))
    }

    #[inline]
    pub fn cache(&self) -> &BlockCacheManager {
        &self.cache
    }

    #[inline]
    pub fn total_sectors(&self) -> u32 {
        self.total_sectors
    }

    pub fn free_sectors(&self) -> Result<usize> {
        self.free_map.lock().free_sectors(&self.cache)
    }

    pub fn root(&self) -> Result<Dir> {
        Dir::open_root(self)
    }

    /// 在`path`处创建文件或目录。
    ///
    /// 对文件，`initial_size`为初始字节数；对目录，为初始可容纳的项数。
    /// 失败时本次分配的扇区全部归还，不留下目录项。
    pub fn create(&self, cwd: &Dir, path: &str, initial_size: usize, is_dir: bool) -> Result<()> {
        let (dir, name) = self.resolve(cwd, path)?;
        let result = self.create_in(&dir, name, initial_size, is_dir);
        dir.close(self);
        result
    }

    /// 打开`path`处的文件或目录
    pub fn open(&self, cwd: &Dir, path: &str) -> Result<File> {
        let (dir, name) = self.resolve(cwd, path)?;
        let result = self.open_in(&dir, name);
        dir.close(self);
        result
    }

    /// 删除`path`处的文件或空目录。仍被打开的文件在最后一次关闭时释放
    pub fn remove(&self, cwd: &Dir, path: &str) -> Result<()> {
        let (dir, name) = self.resolve(cwd, path)?;
        let result = dir.remove(name, cwd.inumber(), self);
        dir.close(self);
        result
    }

    /// 把当前目录切换为`path`处的目录
    pub fn chdir(&self, cwd: &mut Dir, path: &str) -> Result<()> {
        let file = self.open(cwd, path)?;
        if !file.is_dir() {
            file.close(self);
            return Err(Error::NotADirectory);
        }

        let old = core::mem::replace(cwd, Dir::open(file.into_inode()));
        old.close(self);
        Ok(())
    }

    /// 写回全部脏扇区
    pub fn flush(&self) {
        self.cache.flush_dirty();
    }

    /// 写回全部脏扇区并清空块缓存
    pub fn shutdown(&self) {
        let opened = self.inodes.opened();
        if opened > 0 {
            log::warn!("shutdown with {opened} inodes still open");
        }
        self.cache.shutdown();
        log::info!("shutdown");
    }

    pub fn open_inode(&self, sector: u32) -> Result<Arc<Inode>> {
        self.inodes.open(sector, self)
    }

    pub fn reopen_inode(&self, inode: &Arc<Inode>) -> Arc<Inode> {
        self.inodes.reopen(inode)
    }

    /// 关闭索引节点，已删除者在最后一次关闭时连同其扇区一并释放
    pub fn close_inode(&self, inode: Arc<Inode>) {
        let sector = inode.sector();
        if self.inodes.close(inode) {
            self.discard(sector);
            log::debug!("inode {sector} reclaimed");
        }
    }

    /// 分配`count`个扇区，不要求连续。空间不足时一个也不分配
    pub(crate) fn alloc_sectors(&self, count: usize) -> Result<Vec<u32>> {
        let mut free_map = self.free_map.lock();
        let mut sectors = Vec::with_capacity(count);
        for _ in 0..count {
            match free_map.allocate_one(&self.cache) {
                Ok(sector) => sectors.push(sector),
                Err(err) => {
                    for &sector in &sectors {
                        if let Err(err) = free_map.release(sector, 1, &self.cache) {
                            log::warn!("leak sector {sector}: {err}");
                        }
                    }
                    log::warn!("cannot allocate {count} sectors: {err}");
                    return Err(err);
                }
            }
        }
        Ok(sectors)
    }

    pub(crate) fn release_sectors(&self, sectors: &[u32]) {
        let mut free_map = self.free_map.lock();
        for &sector in sectors {
            if let Err(err) = free_map.release(sector, 1, &self.cache) {
                log::warn!("leak sector {sector}: {err}");
            }
        }
    }

    /// 释放索引节点的全部数据扇区与索引块，不含其自身
    pub(crate) fn release_blocks(&self, disk_inode: &DiskInode) {
        match disk_inode.blocks(&self.cache) {
            Ok(blocks) => self.release_sectors(&blocks),
            Err(err) => log::warn!("leak blocks of inode {}: {err}", disk_inode.start),
        }
    }

    pub(crate) fn opened_inodes(&self) -> usize {
        self.inodes.opened()
    }
}

impl FileSystem {
    /// 解析出`path`最后一项所在的目录与最后一项的名字
    fn resolve<'p>(&self, cwd: &Dir, path: &'p str) -> Result<(Dir, &'p str)> {
        let (parents, name) = path.parent_file().ok_or(Error::InvalidPath)?;

        let mut dir = if path.is_absolute() {
            self.root()?
        } else {
            cwd.reopen(self)
        };
        for cmp in parents {
            let next = self.descend(&dir, cmp);
            dir.close(self);
            dir = next?;
        }

        if name.len() > NAME_MAX {
            dir.close(self);
            return Err(Error::NameTooLong);
        }
        Ok((dir, name))
    }

    /// 进入`dir`下名为`name`的子目录
    fn descend(&self, dir: &Dir, name: &str) -> Result<Dir> {
        if name.len() > NAME_MAX {
            return Err(Error::NameTooLong);
        }
        match dir.open_entry(name, self)? {
            Some((inode, true)) => Ok(Dir::open(inode)),
            Some((inode, false)) => {
                self.close_inode(inode);
                Err(Error::InvalidPath)
            }
            None => Err(Error::InvalidPath),
        }
    }

    fn create_in(&self, dir: &Dir, name: &str, initial_size: usize, is_dir: bool) -> Result<()> {
        if dir.lookup(name, self)?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let sector = self.alloc_sectors(1)?[0];
        let created = if is_dir {
            Dir::create(sector, initial_size, dir.inumber(), self)
        } else {
            u32::try_from(initial_size)
                .map_err(|_| Error::FileTooLarge)
                .and_then(|length| Inode::create(sector, length, false, self))
        };
        if let Err(err) = created {
            self.release_sectors(&[sector]);
            return Err(err);
        }

        if let Err(err) = dir.add(name, sector, is_dir, self) {
            self.discard(sector);
            return Err(err);
        }
        Ok(())
    }

    fn open_in(&self, dir: &Dir, name: &str) -> Result<File> {
        let (inode, is_dir) = dir.open_entry(name, self)?.ok_or(Error::NotFound)?;
        Ok(File::new(inode, is_dir))
    }

    /// 释放没有目录项指向、也没有打开者的索引节点。
    ///
    /// 先抹去其魔数，扇区再被打开时报告损坏
    fn discard(&self, sector: u32) {
        match self
            .cache
            .map_mut(sector as usize, 0, |disk_inode: &mut DiskInode| {
                let discarded = disk_inode.clone();
                disk_inode.invalidate();
                discarded
            }) {
            Ok(disk_inode) => self.release_blocks(&disk_inode),
            Err(err) => log::warn!("leak blocks of inode {sector}: {err}"),
        }
        self.release_sectors(&[sector]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BLOCK_SIZE;
    use crate::testing::{RamDisk, formatted};

    #[test]
    fn nested_paths() {
        let (_, fs) = formatted(2048);
        let mut cwd = fs.root().unwrap();
        fs.create(&cwd, "/a", 0, true).unwrap();
        fs.create(&cwd, "/a/b", 0, true).unwrap();
        fs.create(&cwd, "a/b/c", 5, false).unwrap();

        let file = fs.open(&cwd, "/a/./b//c").unwrap();
        assert!(!file.is_dir());
        assert_eq!(file.length(&fs), Ok(5));
        file.close(&fs);

        fs.chdir(&mut cwd, "a/b").unwrap();
        let file = fs.open(&cwd, "c").unwrap();
        file.close(&fs);
        let file = fs.open(&cwd, "../b/c").unwrap();
        file.close(&fs);
        let dir = fs.open(&cwd, "..").unwrap();
        assert!(dir.is_dir());
        dir.close(&fs);

        assert_eq!(fs.chdir(&mut cwd, "c").err(), Some(Error::NotADirectory));
        cwd.close(&fs);
        assert_eq!(fs.opened_inodes(), 0);
    }

    #[test]
    fn bad_paths() {
        let (_, fs) = formatted(1024);
        let cwd = fs.root().unwrap();
        fs.create(&cwd, "f", 0, false).unwrap();

        assert_eq!(fs.open(&cwd, "").err(), Some(Error::InvalidPath));
        assert_eq!(fs.open(&cwd, "missing/x").err(), Some(Error::InvalidPath));
        assert_eq!(fs.open(&cwd, "f/x").err(), Some(Error::InvalidPath));
        assert_eq!(fs.open(&cwd, "nothing").err(), Some(Error::NotFound));
        assert_eq!(
            fs.create(&cwd, "a-very-long-name", 0, false),
            Err(Error::NameTooLong)
        );
        assert_eq!(fs.create(&cwd, "f", 0, false), Err(Error::AlreadyExists));
        assert_eq!(fs.remove(&cwd, "/"), Err(Error::InvalidPath));
        cwd.close(&fs);
    }

    #[test]
    fn root_opens_as_directory() {
        let (_, fs) = formatted(1024);
        let cwd = fs.root().unwrap();
        let mut root = fs.open(&cwd, "/").unwrap();
        assert!(root.is_dir());
        assert_eq!(root.inumber(), ROOT_DIR_SECTOR);
        assert_eq!(root.write(b"x", &fs), Err(Error::IsADirectory));
        assert_eq!(root.readdir(&fs), Ok(None));
        root.close(&fs);
        cwd.close(&fs);
    }

    #[test]
    fn failed_create_leaves_nothing() {
        let (_, fs) = formatted(128);
        let cwd = fs.root().unwrap();
        let free = fs.free_sectors().unwrap();

        let too_big = (free + 1) * BLOCK_SIZE;
        assert_eq!(fs.create(&cwd, "big", too_big, false), Err(Error::NoSpace));
        assert_eq!(fs.free_sectors(), Ok(free));
        assert_eq!(cwd.lookup("big", &fs), Ok(None));
        cwd.close(&fs);
    }

    #[test]
    fn removed_file_lives_until_closed() {
        let (_, fs) = formatted(1024);
        let cwd = fs.root().unwrap();
        let free = fs.free_sectors().unwrap();
        fs.create(&cwd, "f", 0, false).unwrap();

        let mut file = fs.open(&cwd, "f").unwrap();
        file.write(&[7; 1000], &fs).unwrap();
        fs.remove(&cwd, "f").unwrap();
        assert_eq!(fs.open(&cwd, "f").err(), Some(Error::NotFound));

        let mut buf = [0; 1000];
        assert_eq!(file.read_at(0, &mut buf, &fs), Ok(1000));
        assert_eq!(buf, [7; 1000]);
        file.close(&fs);
        assert_eq!(fs.free_sectors(), Ok(free));
        cwd.close(&fs);
    }

    #[test]
    fn reclaimed_inode_cannot_be_reopened() {
        let (_, fs) = formatted(1024);
        let cwd = fs.root().unwrap();
        fs.create(&cwd, "f", 1000, false).unwrap();
        let (sector, _) = cwd.lookup("f", &fs).unwrap().unwrap();
        fs.remove(&cwd, "f").unwrap();

        // 目录项已不在，按旧扇区号也打不开
        assert_eq!(
            fs.open_inode(sector).err(),
            Some(Error::CorruptInode { sector })
        );
        assert_eq!(fs.opened_inodes(), 1);

        // 扇区被新文件复用后，两者互不相干
        fs.create(&cwd, "g", 1000, false).unwrap();
        let mut g = fs.open(&cwd, "g").unwrap();
        assert_eq!(g.inumber(), sector);
        assert_eq!(g.inode().open_count(), 1);
        let mut buf = [0xff; 4];
        assert_eq!(g.read(&mut buf, &fs), Ok(4));
        assert_eq!(buf, [0; 4]);
        g.close(&fs);
        cwd.close(&fs);
    }

    #[test]
    fn seek_far_past_the_end() {
        let (_, fs) = formatted(1024);
        let cwd = fs.root().unwrap();
        fs.create(&cwd, "f", 10, false).unwrap();
        let mut file = fs.open(&cwd, "f").unwrap();

        file.seek(usize::MAX - 1);
        assert_eq!(file.read(&mut [0; 8], &fs), Ok(0));
        assert_eq!(file.write(&[1; 8], &fs), Err(Error::FileTooLarge));
        assert_eq!(file.tell(), usize::MAX - 1);
        assert_eq!(file.length(&fs), Ok(10));
        file.close(&fs);
        cwd.close(&fs);
    }

    #[test]
    fn stat_counts_index_blocks() {
        let (_, fs) = formatted(1024);
        let cwd = fs.root().unwrap();
        fs.create(&cwd, "f", 116 * BLOCK_SIZE, false).unwrap();
        let file = fs.open(&cwd, "f").unwrap();
        let stat = file.stat(&fs).unwrap();
        assert_eq!(stat.size, 116 * BLOCK_SIZE as u64);
        assert_eq!(stat.blocks, 117);
        assert_eq!(stat.inode, file.inumber() as u64);
        file.close(&fs);
        cwd.close(&fs);
    }

    #[test]
    fn deny_write_is_undone_on_close() {
        let (_, fs) = formatted(1024);
        let cwd = fs.root().unwrap();
        fs.create(&cwd, "exe", 10, false).unwrap();

        let mut running = fs.open(&cwd, "exe").unwrap();
        running.deny_write();
        running.deny_write();
        let mut other = fs.open(&cwd, "exe").unwrap();
        assert_eq!(other.write(b"patch", &fs), Err(Error::WriteDenied));

        running.close(&fs);
        assert_eq!(other.write(b"patch", &fs), Ok(5));
        other.close(&fs);
        cwd.close(&fs);
    }

    #[test]
    fn remount_after_shutdown() {
        let (disk, fs) = formatted(1024);
        let cwd = fs.root().unwrap();
        fs.create(&cwd, "kept", 0, false).unwrap();
        let mut file = fs.open(&cwd, "kept").unwrap();
        file.write(b"hello", &fs).unwrap();
        file.close(&fs);
        cwd.close(&fs);
        fs.shutdown();
        assert!(fs.cache().is_empty());

        let fs = FileSystem::mount(disk).unwrap();
        let cwd = fs.root().unwrap();
        let mut file = fs.open(&cwd, "kept").unwrap();
        let mut buf = [0; 8];
        assert_eq!(file.read(&mut buf, &fs), Ok(5));
        assert_eq!(&buf[..5], b"hello");
        file.close(&fs);
        cwd.close(&fs);
    }

    #[test]
    fn mount_rejects_blank_device() {
        let disk = Arc::new(RamDisk::new(64));
        assert_eq!(FileSystem::mount(disk).err(), Some(Error::InvalidImage));
    }
}
