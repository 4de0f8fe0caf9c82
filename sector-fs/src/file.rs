use alloc::string::String;
use alloc::sync::Arc;

use vfs::{DirEntryType, Error, Result, Stat};

use crate::directory;
use crate::layout::DiskInode;
use crate::{BLOCK_SIZE, FileSystem, Inode};

/// 打开的文件，包括以文件方式打开的目录
pub struct File {
    inode: Arc<Inode>,
    /// 读写位置(字节)
    pos: usize,
    is_dir: bool,
    /// 本句柄是否禁止了写入
    deny_write: bool,
}

impl File {
    /// 接管一个已打开的索引节点
    pub(crate) fn new(inode: Arc<Inode>, is_dir: bool) -> Self {
        Self {
            inode,
            pos: 0,
            is_dir,
            deny_write: false,
        }
    }

    /// 同一文件的新句柄，位置从头开始且允许写入
    pub fn reopen(&self, fs: &FileSystem) -> Self {
        Self::new(fs.reopen_inode(&self.inode), self.is_dir)
    }

    pub fn close(mut self, fs: &FileSystem) {
        self.allow_write();
        fs.close_inode(self.inode);
    }

    #[inline]
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    #[inline]
    pub fn inumber(&self) -> u32 {
        self.inode.inumber()
    }

    /// 从当前位置读，位置前进实际读出的字节数
    pub fn read(&mut self, buf: &mut [u8], fs: &FileSystem) -> Result<usize> {
        let read = self.read_at(self.pos, buf, fs)?;
        self.pos += read;
        Ok(read)
    }

    /// 从当前位置写，位置前进实际写入的字节数
    pub fn write(&mut self, buf: &[u8], fs: &FileSystem) -> Result<usize> {
        let written = self.write_at(self.pos, buf, fs)?;
        self.pos += written;
        Ok(written)
    }

    pub fn read_at(&self, offset: usize, buf: &mut [u8], fs: &FileSystem) -> Result<usize> {
        self.inode.read_at(offset, buf, fs)
    }

    pub fn write_at(&self, offset: usize, buf: &[u8], fs: &FileSystem) -> Result<usize> {
        if self.is_dir {
            return Err(Error::IsADirectory);
        }
        self.inode.write_at(offset, buf, fs)
    }

    /// 位置可越过文件末尾，之后的写入会增长文件
    #[inline]
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    pub fn tell(&self) -> usize {
        self.pos
    }

    pub fn length(&self, fs: &FileSystem) -> Result<usize> {
        Ok(self.inode.length(fs)? as usize)
    }

    /// 禁止对该文件的任何写入，直到本句柄允许写入或关闭
    pub fn deny_write(&mut self) {
        if !self.deny_write {
            self.deny_write = true;
            self.inode.deny_write();
        }
    }

    pub fn allow_write(&mut self) {
        if self.deny_write {
            self.deny_write = false;
            self.inode.allow_write();
        }
    }

    /// 读出目录的下一项名字，跳过`.`与`..`
    pub fn readdir(&mut self, fs: &FileSystem) -> Result<Option<String>> {
        if !self.is_dir {
            return Err(Error::NotADirectory);
        }
        directory::next_name(&self.inode, &mut self.pos, fs)
    }

    pub fn stat(&self, fs: &FileSystem) -> Result<Stat> {
        let length = self.inode.length(fs)?;
        Ok(Stat {
            inode: self.inumber() as u64,
            mode: DirEntryType::from_is_dir(self.is_dir),
            block_size: BLOCK_SIZE as u64,
            blocks: DiskInode::count_total_block(length) as u64,
            size: length as u64,
        })
    }

    /// 交出索引节点，不改变打开计数
    pub(crate) fn into_inode(mut self) -> Arc<Inode> {
        self.allow_write();
        self.inode
    }
}
