use std::mem;

use sector_fs::BLOCK_SIZE;
use sector_fs::layout::{DirEntry, DiskInode, IndirectBlock, MAX_FILE_SIZE, SuperBlock};

#[test]
fn layout() {
    assert_eq!(BLOCK_SIZE, mem::size_of::<DiskInode>());
    assert_eq!(256, mem::size_of::<IndirectBlock>());
    assert_eq!(DirEntry::SIZE, mem::size_of::<DirEntry>());
    assert_eq!(16, mem::size_of::<SuperBlock>());
}

#[test]
fn max_file_size() {
    assert_eq!((115 + 5 * 64 + 4 * 64 * 64) * BLOCK_SIZE, MAX_FILE_SIZE);
}
