use core::{ptr, slice};

use crate::NAME_MAX;

/// 目录项：一个名字到一个索引节点扇区的映射
#[derive(Debug, Default, Clone)]
#[repr(C)]
pub struct DirEntry {
    inode_sector: u32,
    // 最后一字节留给 \0
    name: [u8; NAME_MAX + 1],
    in_use: u8,
    is_dir: u8,
    _reserved: [u8; 3],
}

impl DirEntry {
    /// 目录项大小恒为24字节
    pub const SIZE: usize = 24;

    /// 名字的合法性(非空、不超过 [`NAME_MAX`])由调用者保证
    #[inline]
    pub fn new(name: &str, inode_sector: u32, is_dir: bool) -> Self {
        let bytes = name.as_bytes();
        let mut name = [0; NAME_MAX + 1];
        name[..bytes.len()].copy_from_slice(bytes);

        Self {
            inode_sector,
            name,
            in_use: 1,
            is_dir: is_dir as u8,
            _reserved: [0; 3],
        }
    }

    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or_default()
    }

    #[inline]
    pub fn inode_sector(&self) -> u32 {
        self.inode_sector
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        self.in_use != 0
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }

    /// `.` 与 `..`
    #[inline]
    pub fn is_dot(&self) -> bool {
        matches!(self.name(), "." | "..")
    }

    /// 释放目录项，槽位可被之后的新项复用
    #[inline]
    pub fn release(&mut self) {
        self.in_use = 0;
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), Self::SIZE) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), Self::SIZE) }
    }
}
