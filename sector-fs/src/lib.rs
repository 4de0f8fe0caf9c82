#![cfg_attr(not(test), no_std)]

extern crate alloc;

/* sector-fs 的整体架构，自上而下 */

// 文件系统层：格式化、挂载以及按路径的创建、打开与删除
mod fs;

// 打开文件层：带读写位置的文件句柄
mod file;

// 路径解析
mod path;

// 目录层：在目录 inode 的字节流中存放目录项
mod directory;

// 索引节点层：打开句柄的登记、读写与按需增长
mod inode;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
pub mod layout;

// 块缓存层：内存上的扇区数据缓存
mod block_cache;

#[cfg(test)]
mod testing;

pub use self::{
    block_cache::{BlockCache, BlockCacheManager},
    directory::Dir,
    file::File,
    fs::FileSystem,
    inode::Inode,
    path::Path,
};

/// 扇区大小
pub const BLOCK_SIZE: usize = 512;
pub const BLOCK_BITS: usize = BLOCK_SIZE * 8;
/// 块缓存个数的上限
pub const CACHE_CAPACITY: usize = 64;

/// 超级块固定在 0 号扇区
pub const SUPER_BLOCK_SECTOR: u32 = 0;
/// 根目录 inode 固定在 1 号扇区
pub const ROOT_DIR_SECTOR: u32 = 1;
/// 空闲扇区位图的起始扇区
pub const FREE_MAP_START: u32 = 2;
/// 根目录初始可容纳的目录项个数
pub const ROOT_DIR_ENTRIES: usize = 16;

/// 文件名的最大长度(字节)
pub const NAME_MAX: usize = 14;

/// 超级块魔数
pub const MAGIC: u32 = 0x5346_5331;
/// inode 魔数
pub const INODE_MAGIC: u32 = 0x494e_4f44;

type DataBlock = [u8; BLOCK_SIZE];
