//! # 磁盘数据结构层
//!
//! sector-fs 的磁盘布局：
//! 超级块 | 根目录索引节点 | 空闲扇区位图 | 数据区
//!
//! 数据区中索引节点、索引块与数据块混杂存放，全部经由位图分配。

mod super_block;
pub use super_block::SuperBlock;

mod free_map;
pub use free_map::FreeMap;

mod inode;
pub use inode::{
    BlockPos, DIRECT_COUNT, DOUBLE_INDIRECT_COUNT, DiskInode, INDIRECT_COUNT, IndirectBlock,
    MAX_FILE_SIZE, MAX_SECTORS, POINTERS_PER_BLOCK,
};

/// 目录项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::DirEntry;
