//! 空闲扇区位图，每一位对应整个设备上的一个扇区，置位表示已占用

use vfs::{Error, Result};

use crate::BLOCK_BITS;
use crate::BlockCacheManager;

/// 位图区域内块的结构
type BitmapBlock = [u64; BLOCK_BITS / 64];

/// 空闲扇区位图，分配须由外部加锁串行化
#[derive(Debug)]
pub struct FreeMap {
    /// 位图的起始扇区
    start_block_id: usize,
    /// 位图占用扇区数
    blocks: usize,
    /// 设备总扇区数，位图尾部多余的位不参与分配
    total: usize,
}

/// 扇区号在位图中的位置
struct BitPos {
    block_index: usize,
    group_index: usize,
    ingroup_index: usize,
}

impl FreeMap {
    #[inline]
    pub fn new(start_block_id: usize, blocks: usize, total: usize) -> Self {
        debug_assert!(total <= blocks * BLOCK_BITS);
        Self {
            start_block_id,
            blocks,
            total,
        }
    }

    /// 指示`total`个扇区所需的位图扇区数
    #[inline]
    pub fn blocks_for(total: usize) -> usize {
        total.div_ceil(BLOCK_BITS)
    }

    #[inline]
    pub fn start_block_id(&self) -> usize {
        self.start_block_id
    }

    #[inline]
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// 位图所指示的总扇区数
    #[inline]
    pub fn capacity(&self) -> usize {
        self.total
    }

    /// 分配一个空闲扇区，返回其扇区号
    pub fn allocate_one(&mut self, cache: &BlockCacheManager) -> Result<u32> {
        // 遍历位图区域内所有的块，寻找块内还有剩余空间的bit组(即还有0)。
        // 只读地查找，只有置位的那个块才被弄脏
        for block_index in 0..self.blocks {
            let found = cache.map(
                self.start_block_id + block_index,
                0,
                |bitmap_block: &BitmapBlock| {
                    bitmap_block
                        .iter()
                        .enumerate()
                        .find_map(|(group_index, &bits)| {
                            (bits != u64::MAX)
                                .then_some((group_index, bits.trailing_ones() as usize))
                        })
                },
            )?;
            let Some((group_index, ingroup_index)) = found else {
                continue;
            };

            let sector = BitPos {
                block_index,
                group_index,
                ingroup_index,
            }
            .encode();
            // 尾部的位不对应真实扇区
            if sector >= self.total {
                break;
            }
            self.set_range(sector, 1, true, cache)?;
            log::trace!("allocate sector {sector}");
            return Ok(sector as u32);
        }

        Err(Error::NoSpace)
    }

    /// 分配`count`个连续的空闲扇区，返回首个扇区号
    pub fn allocate(&mut self, count: usize, cache: &BlockCacheManager) -> Result<u32> {
        if count == 1 {
            return self.allocate_one(cache);
        }
        if count == 0 || count > self.total {
            return Err(Error::NoSpace);
        }

        // 首次适配：找到第一段足够长的空闲区间
        let mut run_start = 0;
        let mut run_len = 0;
        for block_index in 0..self.blocks {
            let bitmap_block = cache.map(
                self.start_block_id + block_index,
                0,
                |bitmap_block: &BitmapBlock| *bitmap_block,
            )?;
            let first = block_index * BLOCK_BITS;
            for bit in 0..BLOCK_BITS.min(self.total - first) {
                if bitmap_block[bit / 64] & (1 << (bit % 64)) != 0 {
                    run_len = 0;
                    run_start = first + bit + 1;
                    continue;
                }
                run_len += 1;
                if run_len == count {
                    self.set_range(run_start, count, true, cache)?;
                    log::trace!("allocate sectors {run_start}..{}", run_start + count);
                    return Ok(run_start as u32);
                }
            }
        }

        Err(Error::NoSpace)
    }

    /// 释放自`sector`起的`count`个扇区
    pub fn release(&mut self, sector: u32, count: usize, cache: &BlockCacheManager) -> Result<()> {
        debug_assert!(sector as usize + count <= self.total);
        log::trace!("release sectors {sector}..{}", sector as usize + count);
        self.set_range(sector as usize, count, false, cache)
    }

    /// 把自`sector`起的`count`个扇区标为已占用，格式化时用于保留元数据区
    pub fn reserve(&mut self, sector: u32, count: usize, cache: &BlockCacheManager) -> Result<()> {
        self.set_range(sector as usize, count, true, cache)
    }

    pub fn is_used(&self, sector: u32, cache: &BlockCacheManager) -> Result<bool> {
        let pos = BitPos::decode(sector as usize);
        cache.map(
            self.start_block_id + pos.block_index,
            0,
            |bitmap_block: &BitmapBlock| {
                bitmap_block[pos.group_index] & (1 << pos.ingroup_index) != 0
            },
        )
    }

    /// 统计空闲扇区数
    pub fn free_sectors(&self, cache: &BlockCacheManager) -> Result<usize> {
        let mut used = 0;
        for block_index in 0..self.blocks {
            used += cache.map(
                self.start_block_id + block_index,
                0,
                |bitmap_block: &BitmapBlock| {
                    bitmap_block
                        .iter()
                        .map(|bits| bits.count_ones() as usize)
                        .sum::<usize>()
                },
            )?;
        }
        Ok(self.total - used)
    }

    fn set_range(
        &mut self,
        start: usize,
        count: usize,
        used: bool,
        cache: &BlockCacheManager,
    ) -> Result<()> {
        for sector in start..start + count {
            let pos = BitPos::decode(sector);
            cache.map_mut(
                self.start_block_id + pos.block_index,
                0,
                |bitmap_block: &mut BitmapBlock| {
                    let mask = 1 << pos.ingroup_index;
                    // 分配与释放都必须改变该位
                    let was_used = bitmap_block[pos.group_index] & mask != 0;
                    debug_assert_ne!(was_used, used, "sector {sector} flipped twice");
                    if used {
                        bitmap_block[pos.group_index] |= mask;
                    } else {
                        bitmap_block[pos.group_index] &= !mask;
                    }
                },
            )?;
        }
        Ok(())
    }
}

impl BitPos {
    /// 线性映射编码得到扇区号
    #[inline]
    fn encode(&self) -> usize {
        self.block_index * BLOCK_BITS + self.group_index * 64 + self.ingroup_index
    }

    fn decode(mut sector: usize) -> Self {
        let block_index = sector / BLOCK_BITS;
        sector %= BLOCK_BITS;
        Self {
            block_index,
            group_index: sector / 64,
            ingroup_index: sector % 64,
        }
    }
}
