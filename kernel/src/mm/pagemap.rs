//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 页表相关的公共类型

use super::{PageFlags, PhysAddr};
use crate::errno::Errno;

/// 页表根（顶级页表所在的物理页帧）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TableRoot(pub PhysAddr);

/// `get_page` 返回的页表项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    pub paddr: PhysAddr,
    pub flags: PageFlags,
    /// 映射粒度 (4K/2M/1G)
    pub size: usize,
}

impl PageEntry {
    #[inline]
    pub fn is_present(&self) -> bool {
        self.flags.contains(PageFlags::PRESENT)
    }

    #[inline]
    pub fn is_user(&self) -> bool {
        self.flags.contains(PageFlags::USER)
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.flags.contains(PageFlags::WRITABLE)
    }
}

/// 地址空间操作错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// 与已有区域重叠
    AlreadyMapped,
    /// 地址未映射
    NotMapped,
    /// 分界以下没有足够的空洞
    OutOfMemory,
    /// 访问权限不符
    PermissionDenied,
    /// 无效参数
    Invalid,
}

impl From<MapError> for Errno {
    fn from(err: MapError) -> Self {
        match err {
            MapError::AlreadyMapped => Errno::FileExists,
            MapError::NotMapped => Errno::BadAddress,
            MapError::OutOfMemory => Errno::OutOfMemory,
            MapError::PermissionDenied => Errno::BadAddress,
            MapError::Invalid => Errno::InvalidArgument,
        }
    }
}
