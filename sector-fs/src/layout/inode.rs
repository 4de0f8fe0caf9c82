//! 磁盘上的索引节点，恰好占满一个扇区
//!
//! 数据扇区按逻辑索引分三层定位：
//! - 直接指针：[`DIRECT_COUNT`] 个，各指向一个**数据扇区**
//! - 一级指针：[`INDIRECT_COUNT`] 个，各指向一个连续存储扇区号的**索引块**
//! - 二级指针：[`DOUBLE_INDIRECT_COUNT`] 个，各指向一个索引块，其每项再指向一个一级索引块
//!
//! 目录的空间用于存放目录项；
//! 文件的空间用于存放它的数据。
//!
//! ## 块索引编码
//!
//! - 逻辑索引减去前几层的容量，得到在本层中的偏移
//! - 偏移除以下一层索引块的**可编号数量**得到指针的位置，取模得到块内位置

use alloc::vec::Vec;
use core::ops::Range;

use vfs::{Error, Result};

use crate::{BLOCK_SIZE, BlockCacheManager, INODE_MAGIC};

/// 索引块的编号容量，只用扇区的前一半
pub const POINTERS_PER_BLOCK: usize = 64;
/// 索引块
pub type IndirectBlock = [u32; POINTERS_PER_BLOCK];

/// 直接指针个数
pub const DIRECT_COUNT: usize = 115;
/// 一级指针个数
pub const INDIRECT_COUNT: usize = 5;
/// 二级指针个数
pub const DOUBLE_INDIRECT_COUNT: usize = 4;

/// 一个二级指针可编号的数据扇区数
const DOUBLE_INDIRECT_SPAN: usize = POINTERS_PER_BLOCK.pow(2);
/// 直接索引时的编号容量
const DIRECT_CAP: usize = DIRECT_COUNT;
/// 用上一级索引时的编号容量
const INDIRECT_CAP: usize = DIRECT_CAP + INDIRECT_COUNT * POINTERS_PER_BLOCK;
/// 用上二级索引时的编号容量
const DOUBLE_INDIRECT_CAP: usize = INDIRECT_CAP + DOUBLE_INDIRECT_COUNT * DOUBLE_INDIRECT_SPAN;

/// 单个文件最多的数据扇区数
pub const MAX_SECTORS: usize = DOUBLE_INDIRECT_CAP;
/// 单个文件的最大字节数
pub const MAX_FILE_SIZE: usize = MAX_SECTORS * BLOCK_SIZE;

#[derive(Debug, Clone)]
#[repr(C)]
pub struct DiskInode {
    /// 自身所在扇区，仅作记录
    pub start: u32,
    // 不用usize是为了严控布局
    pub length: u32,
    magic: u32,
    direct: [u32; DIRECT_COUNT],
    indirect: [u32; INDIRECT_COUNT],
    double_indirect: [u32; DOUBLE_INDIRECT_COUNT],
    is_dir: u32,
}

/// 逻辑索引在块树中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPos {
    /// 直接指针下标
    Direct(usize),
    /// (一级指针下标, 索引块内下标)
    Indirect(usize, usize),
    /// (二级指针下标, 二级索引块内下标, 一级索引块内下标)
    DoubleIndirect(usize, usize, usize),
}

/// 块树遍历时经过的节点种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Index,
    Data,
}

impl BlockPos {
    /// 超出最大文件大小时返回空
    pub fn locate(index: usize) -> Option<Self> {
        if index < DIRECT_CAP {
            Some(Self::Direct(index))
        } else if index < INDIRECT_CAP {
            let index = index - DIRECT_CAP;
            Some(Self::Indirect(
                index / POINTERS_PER_BLOCK,
                index % POINTERS_PER_BLOCK,
            ))
        } else if index < DOUBLE_INDIRECT_CAP {
            let index = index - INDIRECT_CAP;
            Some(Self::DoubleIndirect(
                index / DOUBLE_INDIRECT_SPAN,
                index % DOUBLE_INDIRECT_SPAN / POINTERS_PER_BLOCK,
                index % POINTERS_PER_BLOCK,
            ))
        } else {
            None
        }
    }
}

impl DiskInode {
    pub fn new(sector: u32, is_dir: bool) -> Self {
        Self {
            start: sector,
            length: 0,
            magic: INODE_MAGIC,
            direct: [0; DIRECT_COUNT],
            indirect: [0; INDIRECT_COUNT],
            double_indirect: [0; DOUBLE_INDIRECT_COUNT],
            is_dir: is_dir as u32,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == INODE_MAGIC
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }

    /// 抹去魔数，使该扇区不再被视为索引节点
    #[inline]
    pub fn invalidate(&mut self) {
        self.magic = 0;
    }

    /// 长度为`length`字节时的数据扇区数
    #[inline]
    pub fn count_data_block(length: u32) -> usize {
        (length as usize).div_ceil(BLOCK_SIZE)
    }

    /// 长度为`length`字节时数据扇区与索引块的总数
    pub fn count_total_block(length: u32) -> usize {
        let data_blocks = Self::count_data_block(length);
        let mut total = data_blocks;

        if data_blocks > DIRECT_CAP {
            total += (data_blocks.min(INDIRECT_CAP) - DIRECT_CAP).div_ceil(POINTERS_PER_BLOCK);
        }

        if data_blocks > INDIRECT_CAP {
            let rest = data_blocks - INDIRECT_CAP;
            // 二级索引块与其下的一级索引块
            total += rest.div_ceil(DOUBLE_INDIRECT_SPAN) + rest.div_ceil(POINTERS_PER_BLOCK);
        }

        total
    }

    /// 逻辑上 inode 指向一系列数据扇区，此处传入的是这些扇区的逻辑索引，
    /// 然后返回给**块缓存层**使用的扇区号
    pub fn block_id(&self, block_index: usize, cache: &BlockCacheManager) -> Result<u32> {
        match BlockPos::locate(block_index).ok_or(Error::FileTooLarge)? {
            BlockPos::Direct(i) => Ok(self.direct[i]),
            BlockPos::Indirect(i, j) => {
                cache.map(self.indirect[i] as usize, 0, |indirect: &IndirectBlock| {
                    indirect[j]
                })
            }
            BlockPos::DoubleIndirect(d, i, j) => {
                let indirect = cache.map(
                    self.double_indirect[d] as usize,
                    0,
                    |double_indirect: &IndirectBlock| double_indirect[i],
                )?;
                cache.map(indirect as usize, 0, |indirect: &IndirectBlock| indirect[j])
            }
        }
    }

    /// 增长到`larger_length`字节，新扇区全部取自`new_blocks`并清零。
    ///
    /// `new_blocks`须恰好包含增长前后 [`Self::count_total_block`] 之差个扇区。
    /// 长度最后才更新，失败时长度不变。
    pub fn grow(
        &mut self,
        larger_length: u32,
        new_blocks: Vec<u32>,
        cache: &BlockCacheManager,
    ) -> Result<()> {
        if larger_length <= self.length {
            return Ok(());
        }
        if larger_length as usize > MAX_FILE_SIZE {
            return Err(Error::FileTooLarge);
        }

        let old_data_blocks = Self::count_data_block(self.length);
        let new_data_blocks = Self::count_data_block(larger_length);
        debug_assert_eq!(
            new_blocks.len(),
            Self::count_total_block(larger_length) - Self::count_total_block(self.length)
        );

        let mut new_blocks = new_blocks.into_iter();
        self.walk(old_data_blocks..new_data_blocks, cache, &mut |node, ptr| {
            let block = new_blocks.next().ok_or(Error::NoSpace)?;
            if node == Node::Index {
                log::trace!("new index block {block}");
            }
            cache.zero(block as usize)?;
            *ptr = block;
            Ok(())
        })?;

        self.length = larger_length;
        Ok(())
    }

    /// 收集全部数据扇区与索引块
    pub fn blocks(&self, cache: &BlockCacheManager) -> Result<Vec<u32>> {
        let mut blocks = Vec::with_capacity(Self::count_total_block(self.length));
        let mut inode = self.clone();
        inode.walk(
            0..Self::count_data_block(self.length),
            cache,
            &mut |_, ptr| {
                blocks.push(*ptr);
                Ok(())
            },
        )?;
        Ok(blocks)
    }

    /// 从指定位置(字节偏移)读出数据填充`buf`，顺带预取下一个扇区
    pub fn read_at(
        &self,
        offset: usize,
        buf: &mut [u8],
        cache: &BlockCacheManager,
    ) -> Result<usize> {
        let mut start = offset;
        let end = start.saturating_add(buf.len()).min(self.length as usize);

        if start >= end {
            return Ok(0);
        }

        // 已读取多少字节
        let mut read_size = 0;
        loop {
            // 当前扇区的逻辑索引
            let block_index = start / BLOCK_SIZE;
            // 当前扇区的末地址(字节)
            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let block_read_size = current_block_end - start;

            cache.read(
                self.block_id(block_index, cache)? as usize,
                start % BLOCK_SIZE,
                &mut buf[read_size..read_size + block_read_size],
            )?;
            read_size += block_read_size;

            if current_block_end == end {
                // 预取只是提示，定位失败就放弃
                if (block_index + 1) * BLOCK_SIZE < self.length as usize {
                    if let Ok(next) = self.block_id(block_index + 1, cache) {
                        cache.read_ahead(next as usize);
                    }
                }
                break;
            }

            start = current_block_end;
        }

        Ok(read_size)
    }

    /// 向已分配的空间写入，超出长度的部分被截去
    pub fn write_at(&self, offset: usize, buf: &[u8], cache: &BlockCacheManager) -> Result<usize> {
        let mut start = offset;
        let end = start.saturating_add(buf.len()).min(self.length as usize);

        if start >= end {
            return Ok(0);
        }

        let mut written_size = 0;
        loop {
            let block_index = start / BLOCK_SIZE;
            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let block_write_size = current_block_end - start;

            cache.write(
                self.block_id(block_index, cache)? as usize,
                start % BLOCK_SIZE,
                &buf[written_size..written_size + block_write_size],
            )?;
            written_size += block_write_size;

            if current_block_end == end {
                break;
            }

            start = current_block_end;
        }

        Ok(written_size)
    }
}

impl DiskInode {
    /// 按逻辑索引依次访问`range`内的数据扇区指针，
    /// 并在首次进入某个索引块时先访问指向它的指针
    fn walk(
        &mut self,
        range: Range<usize>,
        cache: &BlockCacheManager,
        visit: &mut impl FnMut(Node, &mut u32) -> Result<()>,
    ) -> Result<()> {
        for block_index in range {
            match BlockPos::locate(block_index).ok_or(Error::FileTooLarge)? {
                BlockPos::Direct(i) => visit(Node::Data, &mut self.direct[i])?,
                BlockPos::Indirect(i, j) => {
                    // 子块索引为0表示进入新块
                    if j == 0 {
                        visit(Node::Index, &mut self.indirect[i])?;
                    }
                    visit_slot(self.indirect[i], j, Node::Data, cache, &mut *visit)?;
                }
                BlockPos::DoubleIndirect(d, i, j) => {
                    if i == 0 && j == 0 {
                        visit(Node::Index, &mut self.double_indirect[d])?;
                    }
                    let indirect = if j == 0 {
                        visit_slot(self.double_indirect[d], i, Node::Index, cache, &mut *visit)?
                    } else {
                        cache.map(
                            self.double_indirect[d] as usize,
                            0,
                            |double_indirect: &IndirectBlock| double_indirect[i],
                        )?
                    };
                    visit_slot(indirect, j, Node::Data, cache, &mut *visit)?;
                }
            }
        }

        Ok(())
    }
}

/// 访问索引块`block`的第`slot`项，被改动时写回，返回访问后的值
fn visit_slot(
    block: u32,
    slot: usize,
    node: Node,
    cache: &BlockCacheManager,
    visit: &mut impl FnMut(Node, &mut u32) -> Result<()>,
) -> Result<u32> {
    let old = cache.map(block as usize, 0, |indirect: &IndirectBlock| indirect[slot])?;
    let mut ptr = old;
    visit(node, &mut ptr)?;
    if ptr != old {
        cache.map_mut(block as usize, 0, |indirect: &mut IndirectBlock| {
            indirect[slot] = ptr;
        })?;
    }
    Ok(ptr)
}
