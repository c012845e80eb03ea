//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!

//! 内存管理
//!
//! 页表机制本身由 `arch::Machine` 提供；这里只有调度核心需要的部分：
//! - `pagemap`: 页表根、页表项和映射错误
//! - `vma`: 每进程的有序内存区域表
//! - `uaccess`: 经由页表访问用户内存和指针校验
//! - `mmap`: mmap 与缺页处理

pub mod mmap;
pub mod pagemap;
pub mod uaccess;
pub mod vma;

use bitflags::bitflags;

pub use crate::config::{PAGE_SHIFT, PAGE_SIZE};

/// 物理地址
pub type PhysAddr = u64;
/// 虚拟地址
pub type VirtAddr = u64;

bitflags! {
    /// 页表项标志，位定义与 x86-64 PTE 一致
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const NO_EXECUTE = 1 << 63;
    }
}

bitflags! {
    /// mmap 的 prot 参数 (PROT_*)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Prot: u32 {
        const READ = 0x1;
        const WRITE = 0x2;
        const EXEC = 0x4;
    }
}

bitflags! {
    /// mmap 的 flags 参数 (MAP_*)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        const SHARED = 0x01;
        const PRIVATE = 0x02;
        const FIXED = 0x10;
        const ANONYMOUS = 0x20;
    }
}

impl Prot {
    /// 转换为用户页表项标志
    pub fn page_flags(self) -> PageFlags {
        let mut flags = PageFlags::PRESENT | PageFlags::USER;
        if self.contains(Prot::WRITE) {
            flags |= PageFlags::WRITABLE;
        }
        if !self.contains(Prot::EXEC) {
            flags |= PageFlags::NO_EXECUTE;
        }
        flags
    }
}

#[inline]
pub const fn page_align_down(addr: u64) -> u64 {
    addr & !((PAGE_SIZE as u64) - 1)
}

#[inline]
pub const fn page_align_up(addr: u64) -> u64 {
    (addr + PAGE_SIZE as u64 - 1) & !((PAGE_SIZE as u64) - 1)
}

/// 用户给出的地址向上对齐，越过地址空间顶端时返回 `None`
#[inline]
pub const fn checked_page_align_up(addr: u64) -> Option<u64> {
    match addr.checked_add(PAGE_SIZE as u64 - 1) {
        Some(v) => Some(v & !((PAGE_SIZE as u64) - 1)),
        None => None,
    }
}

/// 覆盖 `len` 字节需要的页数
#[inline]
pub const fn pages_for(len: u64) -> usize {
    (page_align_up(len) >> PAGE_SHIFT) as usize
}
