//! # 目录层
//!
//! 目录是一种特殊的文件，其内容为定长 [`DirEntry`] 的数组。
//! 空闲槽位可被新项复用，无空闲槽位时追加到末尾。
//! 除根目录外，每个目录的前两项为指向自身的`.`与指向父目录的`..`；
//! 根目录的`.`与`..`都指向自身。

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use vfs::{DirEntryType, Error, Result};

use crate::layout::DirEntry;
use crate::{FileSystem, Inode, NAME_MAX, ROOT_DIR_SECTOR};

/// 打开的目录
pub struct Dir {
    inode: Arc<Inode>,
    /// readdir 的位置(字节)
    pos: usize,
}

impl Dir {
    /// 在`sector`处创建可容纳`entry_count`项的目录。
    ///
    /// `parent`不为零时写入`.`与`..`两项。
    /// 失败时不留下任何已分配的扇区，`sector`本身仍归调用者所有。
    pub fn create(sector: u32, entry_count: usize, parent: u32, fs: &FileSystem) -> Result<()> {
        let length = entry_count
            .checked_mul(DirEntry::SIZE)
            .and_then(|length| u32::try_from(length).ok())
            .ok_or(Error::FileTooLarge)?;
        Inode::create(sector, length, true, fs)?;
        if parent == 0 {
            return Ok(());
        }

        let dir = Self::open(fs.open_inode(sector)?);
        let result = dir
            .add(".", sector, true, fs)
            .and_then(|()| dir.add("..", parent, true, fs));
        let inode = dir.into_inode();
        if result.is_err() {
            // 只释放块树，扇区本身留给调用者
            if let Ok(disk_inode) = inode.disk_inode(fs) {
                fs.release_blocks(&disk_inode);
            }
        }
        fs.close_inode(inode);
        result
    }

    /// 接管一个已打开的索引节点
    #[inline]
    pub fn open(inode: Arc<Inode>) -> Self {
        Self { inode, pos: 0 }
    }

    pub fn open_root(fs: &FileSystem) -> Result<Self> {
        Ok(Self::open(fs.open_inode(ROOT_DIR_SECTOR)?))
    }

    /// 同一目录的新句柄，位置从头开始
    pub fn reopen(&self, fs: &FileSystem) -> Self {
        Self::open(fs.reopen_inode(&self.inode))
    }

    pub fn close(self, fs: &FileSystem) {
        fs.close_inode(self.inode);
    }

    #[inline]
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    #[inline]
    pub fn inumber(&self) -> u32 {
        self.inode.inumber()
    }

    #[inline]
    pub(crate) fn into_inode(self) -> Arc<Inode> {
        self.inode
    }

    /// 查找名为`name`的项，返回其`(索引节点扇区, 是否为目录)`
    pub fn lookup(&self, name: &str, fs: &FileSystem) -> Result<Option<(u32, bool)>> {
        let _entries = self.inode.lock_entries();
        Ok(find(&self.inode, name, fs)?
            .map(|(_, entry)| (entry.inode_sector(), entry.is_dir())))
    }

    /// 打开名为`name`的项，返回其索引节点与是否为目录。
    ///
    /// 查找与打开在目录锁下一并完成，期间该项不会被删除
    pub fn open_entry(&self, name: &str, fs: &FileSystem) -> Result<Option<(Arc<Inode>, bool)>> {
        let _entries = self.inode.lock_entries();
        let Some((_, entry)) = find(&self.inode, name, fs)? else {
            return Ok(None);
        };
        Ok(Some((fs.open_inode(entry.inode_sector())?, entry.is_dir())))
    }

    /// 添加名为`name`、指向`inode_sector`的项
    pub fn add(&self, name: &str, inode_sector: u32, is_dir: bool, fs: &FileSystem) -> Result<()> {
        if name.is_empty() || name.contains('/') {
            return Err(Error::InvalidPath);
        }
        if name.len() > NAME_MAX {
            return Err(Error::NameTooLong);
        }

        let _entries = self.inode.lock_entries();
        if find(&self.inode, name, fs)?.is_some() {
            return Err(Error::AlreadyExists);
        }

        // 优先复用空闲槽位，否则追加到末尾
        let mut offset = 0;
        while let Some(entry) = read_entry(&self.inode, offset, fs)? {
            if !entry.is_used() {
                break;
            }
            offset += DirEntry::SIZE;
        }

        let entry = DirEntry::new(name, inode_sector, is_dir);
        self.inode.write_at(offset, entry.as_bytes(), fs)?;
        log::debug!(
            "dir {}: add {name:?} -> {inode_sector} at {offset}",
            self.inumber()
        );
        Ok(())
    }

    /// 删除名为`name`的项，并把其索引节点标记为删除。
    ///
    /// 拒绝删除`.`与`..`、进程的当前目录`cwd`、仍被他处打开的目录与非空目录。
    pub fn remove(&self, name: &str, cwd: u32, fs: &FileSystem) -> Result<()> {
        if matches!(name, "." | "..") {
            return Err(Error::InvalidPath);
        }

        let _entries = self.inode.lock_entries();
        let (offset, mut entry) = find(&self.inode, name, fs)?.ok_or(Error::NotFound)?;
        if entry.inode_sector() == cwd {
            log::warn!("refuse to remove the working directory {name:?}");
            return Err(Error::DirectoryBusy);
        }

        let inode = fs.open_inode(entry.inode_sector())?;
        let result = (|| -> Result<()> {
            if entry.is_dir() {
                // 本次打开与一个当前目录之外还有打开者
                if inode.open_count() > 2 {
                    log::warn!("refuse to remove the busy directory {name:?}");
                    return Err(Error::DirectoryBusy);
                }
                if !is_empty(&inode, fs)? {
                    return Err(Error::DirectoryNotEmpty);
                }
            }

            entry.release();
            self.inode.write_at(offset, entry.as_bytes(), fs)?;
            inode.remove();
            Ok(())
        })();
        fs.close_inode(inode);

        if result.is_ok() {
            log::debug!("dir {}: remove {name:?}", self.inumber());
        }
        result
    }

    /// 读出下一个项的名字，跳过`.`与`..`。已读完时返回`None`
    pub fn readdir(&mut self, fs: &FileSystem) -> Result<Option<String>> {
        next_name(&self.inode, &mut self.pos, fs)
    }

    /// 列出全部项，不含`.`与`..`
    pub fn entries(&self, fs: &FileSystem) -> Result<Vec<vfs::DirEntry>> {
        let mut entries = Vec::new();
        let mut offset = 0;
        while let Some(entry) = read_entry(&self.inode, offset, fs)? {
            offset += DirEntry::SIZE;
            if entry.is_used() && !entry.is_dot() {
                entries.push(vfs::DirEntry {
                    inode: entry.inode_sector() as u64,
                    ty: DirEntryType::from_is_dir(entry.is_dir()),
                    name: entry.name().to_string(),
                });
            }
        }
        Ok(entries)
    }
}

/// 读出`offset`处的项，越过末尾时返回`None`
fn read_entry(inode: &Inode, offset: usize, fs: &FileSystem) -> Result<Option<DirEntry>> {
    let mut entry = DirEntry::default();
    let read = inode.read_at(offset, entry.as_bytes_mut(), fs)?;
    Ok((read == DirEntry::SIZE).then_some(entry))
}

fn find(inode: &Inode, name: &str, fs: &FileSystem) -> Result<Option<(usize, DirEntry)>> {
    let mut offset = 0;
    while let Some(entry) = read_entry(inode, offset, fs)? {
        if entry.is_used() && entry.name() == name {
            return Ok(Some((offset, entry)));
        }
        offset += DirEntry::SIZE;
    }
    Ok(None)
}

fn is_empty(inode: &Inode, fs: &FileSystem) -> Result<bool> {
    let mut pos = 0;
    Ok(next_name(inode, &mut pos, fs)?.is_none())
}

/// 目录与以目录打开的文件共用的 readdir
pub(crate) fn next_name(inode: &Inode, pos: &mut usize, fs: &FileSystem) -> Result<Option<String>> {
    while let Some(entry) = read_entry(inode, *pos, fs)? {
        *pos += DirEntry::SIZE;
        if entry.is_used() && !entry.is_dot() {
            return Ok(Some(entry.name().to_string()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::formatted;

    fn new_dir(fs: &FileSystem, parent: &Dir, name: &str) -> u32 {
        let sector = fs.alloc_sectors(1).unwrap()[0];
        Dir::create(sector, 4, parent.inumber(), fs).unwrap();
        parent.add(name, sector, true, fs).unwrap();
        sector
    }

    #[test]
    fn root_dots_point_to_root() {
        let (_, fs) = formatted(1024);
        let root = Dir::open_root(&fs).unwrap();
        assert_eq!(root.lookup(".", &fs), Ok(Some((ROOT_DIR_SECTOR, true))));
        assert_eq!(root.lookup("..", &fs), Ok(Some((ROOT_DIR_SECTOR, true))));
        root.close(&fs);
    }

    #[test]
    fn readdir_skips_dots() {
        let (_, fs) = formatted(1024);
        let mut root = Dir::open_root(&fs).unwrap();
        let sub = new_dir(&fs, &root, "sub");
        root.add("f", 77, false, &fs).unwrap();

        assert_eq!(root.readdir(&fs), Ok(Some("sub".to_string())));
        assert_eq!(root.readdir(&fs), Ok(Some("f".to_string())));
        assert_eq!(root.readdir(&fs), Ok(None));

        let child = Dir::open(fs.open_inode(sub).unwrap());
        assert_eq!(child.lookup("..", &fs), Ok(Some((ROOT_DIR_SECTOR, true))));
        assert_eq!(child.lookup(".", &fs), Ok(Some((sub, true))));
        child.close(&fs);
        root.close(&fs);
    }

    #[test]
    fn add_checks_names() {
        let (_, fs) = formatted(1024);
        let root = Dir::open_root(&fs).unwrap();
        assert_eq!(root.add("", 9, false, &fs), Err(Error::InvalidPath));
        assert_eq!(
            root.add("fifteen-letters", 9, false, &fs),
            Err(Error::NameTooLong)
        );
        root.add("fourteen-chars", 9, false, &fs).unwrap();
        assert_eq!(
            root.add("fourteen-chars", 10, false, &fs),
            Err(Error::AlreadyExists)
        );
        root.close(&fs);
    }

    #[test]
    fn removed_slot_is_reused() {
        let (_, fs) = formatted(1024);
        let root = Dir::open_root(&fs).unwrap();
        let sector = fs.alloc_sectors(1).unwrap()[0];
        crate::Inode::create(sector, 0, false, &fs).unwrap();
        root.add("a", sector, false, &fs).unwrap();
        root.add("b", 99, false, &fs).unwrap();
        let length = root.inode().length(&fs).unwrap();

        root.remove("a", ROOT_DIR_SECTOR, &fs).unwrap();
        assert_eq!(root.lookup("a", &fs), Ok(None));
        root.add("c", 98, false, &fs).unwrap();
        assert_eq!(root.inode().length(&fs), Ok(length));
        root.close(&fs);
    }

    #[test]
    fn growing_past_initial_capacity() {
        let (_, fs) = formatted(1024);
        let root = Dir::open_root(&fs).unwrap();
        let sector = fs.alloc_sectors(1).unwrap()[0];
        Dir::create(sector, 2, ROOT_DIR_SECTOR, &fs).unwrap();
        let dir = Dir::open(fs.open_inode(sector).unwrap());
        for i in 0..40 {
            dir.add(&format!("f{i}"), 100 + i, false, &fs).unwrap();
        }
        assert_eq!(dir.entries(&fs).unwrap().len(), 40);
        assert_eq!(dir.lookup("f39", &fs), Ok(Some((139, false))));
        dir.close(&fs);
        root.close(&fs);
    }

    #[test]
    fn remove_refusals() {
        let (_, fs) = formatted(1024);
        let root = Dir::open_root(&fs).unwrap();
        let sub = new_dir(&fs, &root, "sub");

        assert_eq!(root.remove(".", ROOT_DIR_SECTOR, &fs), Err(Error::InvalidPath));
        assert_eq!(root.remove("..", ROOT_DIR_SECTOR, &fs), Err(Error::InvalidPath));
        assert_eq!(root.remove("nope", ROOT_DIR_SECTOR, &fs), Err(Error::NotFound));
        assert_eq!(root.remove("sub", sub, &fs), Err(Error::DirectoryBusy));

        let child = Dir::open(fs.open_inode(sub).unwrap());
        child.add("x", 55, false, &fs).unwrap();
        assert_eq!(
            root.remove("sub", ROOT_DIR_SECTOR, &fs),
            Err(Error::DirectoryNotEmpty)
        );

        let first = child.reopen(&fs);
        let second = child.reopen(&fs);
        assert_eq!(
            root.remove("sub", ROOT_DIR_SECTOR, &fs),
            Err(Error::DirectoryBusy)
        );
        first.close(&fs);
        second.close(&fs);
        child.close(&fs);
        root.close(&fs);
    }

    #[test]
    fn open_entry_registers_the_inode() {
        let (_, fs) = formatted(1024);
        let root = Dir::open_root(&fs).unwrap();
        let sub = new_dir(&fs, &root, "sub");
        assert!(root.open_entry("nope", &fs).unwrap().is_none());

        let (inode, is_dir) = root.open_entry("sub", &fs).unwrap().unwrap();
        assert!(is_dir);
        assert_eq!(inode.inumber(), sub);
        assert_eq!(inode.open_count(), 1);
        fs.close_inode(inode);
        root.close(&fs);
    }

    #[test]
    fn empty_dir_is_removed() {
        let (_, fs) = formatted(1024);
        let free = fs.free_sectors().unwrap();
        let root = Dir::open_root(&fs).unwrap();
        new_dir(&fs, &root, "sub");

        root.remove("sub", ROOT_DIR_SECTOR, &fs).unwrap();
        assert_eq!(root.lookup("sub", &fs), Ok(None));
        root.close(&fs);
        assert_eq!(fs.free_sectors(), Ok(free));
    }
}
