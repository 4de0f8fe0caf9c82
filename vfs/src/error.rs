use derive_more::Display;

pub type Result<T> = core::result::Result<T, Error>;

/// 文件系统操作的失败原因
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 空闲扇区用尽
    #[display(fmt = "no free sector left on device")]
    NoSpace,
    /// 块缓存的所有槽位都正被使用，无法换出
    #[display(fmt = "every block cache slot is in use")]
    CacheExhausted,
    /// 路径为空，或中间项不存在、不是目录
    #[display(fmt = "invalid path")]
    InvalidPath,
    #[display(fmt = "file name too long")]
    NameTooLong,
    #[display(fmt = "entry already exists")]
    AlreadyExists,
    #[display(fmt = "no such file or directory")]
    NotFound,
    #[display(fmt = "not a directory")]
    NotADirectory,
    #[display(fmt = "is a directory")]
    IsADirectory,
    #[display(fmt = "directory not empty")]
    DirectoryNotEmpty,
    /// 目录仍被他人打开，或是调用者的工作目录
    #[display(fmt = "directory is busy")]
    DirectoryBusy,
    /// 文件正作为程序镜像运行
    #[display(fmt = "file is write-protected")]
    WriteDenied,
    /// inode 的魔数不符
    #[display(fmt = "corrupt inode at sector {}", sector)]
    CorruptInode { sector: u32 },
    #[display(fmt = "file too large")]
    FileTooLarge,
    /// 超级块校验失败
    #[display(fmt = "not a sector-fs image")]
    InvalidImage,
}

impl core::error::Error for Error {}
