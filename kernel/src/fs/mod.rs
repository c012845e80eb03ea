//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!

//! 文件系统接口
//!
//! 调度核心把 VFS 当作外部协作者：exec 通过它读取映像，mmap 读取文件
//! 后备内容，文件类系统调用直接转发。`memfs` 是一个内存实现。

pub mod elf;
pub mod fd;
pub mod memfs;

use alloc::sync::Arc;
use bitflags::bitflags;

use crate::errno::{Errno, KResult};

pub use fd::{FdTable, FileDescriptor};
pub use memfs::MemFs;

/// 节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
    CharDevice,
}

/// 已打开的节点
pub trait VfsNode: Send + Sync {
    /// 节点唯一标识，也用作阻塞 I/O 等待队列的键
    fn id(&self) -> u64;

    fn kind(&self) -> NodeKind;

    fn size(&self) -> u64;

    /// 从 `offset` 读取，返回读取字节数
    ///
    /// 阻塞型节点没有数据时返回 `EAGAIN`
    fn read(&self, buf: &mut [u8], offset: u64) -> KResult<usize>;

    fn write(&self, data: &[u8], offset: u64) -> KResult<usize>;

    fn ioctl(&self, _request: u64, _arg: u64) -> KResult<u64> {
        Err(Errno::NotATypewriter)
    }

    /// 截断为空 (O_TRUNC)
    fn truncate(&self) -> KResult<()> {
        Err(Errno::InvalidArgument)
    }

    /// 读取会阻塞调用者（终端、管道）而不是立即返回 EAGAIN
    fn is_blocking(&self) -> bool {
        false
    }

    /// 是否支持 seek
    fn is_seekable(&self) -> bool {
        self.kind() == NodeKind::File
    }
}

pub type NodeRef = Arc<dyn VfsNode>;

bitflags! {
    /// open 标志 (O_*)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const WRONLY = 0o1;
        const RDWR = 0o2;
        const CREAT = 0o100;
        const TRUNC = 0o1000;
        const APPEND = 0o2000;
        const NONBLOCK = 0o4000;
        const DIRECTORY = 0o200000;
    }
}

impl OpenFlags {
    #[inline]
    pub fn readable(self) -> bool {
        !self.contains(OpenFlags::WRONLY)
    }

    #[inline]
    pub fn writable(self) -> bool {
        self.intersects(OpenFlags::WRONLY | OpenFlags::RDWR)
    }
}

/// access 模式
pub const F_OK: u32 = 0;
pub const X_OK: u32 = 1;
pub const W_OK: u32 = 2;
pub const R_OK: u32 = 4;

/// 路径命名空间
pub trait Vfs: Send {
    fn open(&self, path: &str, flags: OpenFlags) -> KResult<NodeRef>;

    fn mkdir(&self, path: &str) -> KResult<()>;

    fn access(&self, path: &str, mode: u32) -> KResult<()>;

    fn mount(&self, source: &str, target: &str, fstype: &str) -> KResult<()>;

    fn unmount(&self, target: &str) -> KResult<()>;

    /// 读取整个文件
    fn read_all(&self, path: &str) -> KResult<alloc::vec::Vec<u8>> {
        let node = self.open(path, OpenFlags::empty())?;
        if node.kind() == NodeKind::Directory {
            return Err(Errno::IsADirectory);
        }
        let mut data = alloc::vec![0u8; node.size() as usize];
        let mut done = 0;
        while done < data.len() {
            let n = node.read(&mut data[done..], done as u64)?;
            if n == 0 {
                break;
            }
            done += n;
        }
        data.truncate(done);
        Ok(data)
    }
}

/// 路径最后一个分量
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}
