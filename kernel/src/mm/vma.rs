//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 内存区域 (memory region) 管理
//!
//! 每个用户进程持有一张按起始地址排序、两两不重叠的区域表。
//! 区域数量很少，查找用 `BTreeMap` 的有序遍历即可。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;

use super::pagemap::MapError;
use super::{checked_page_align_up, page_align_up, MapFlags, Prot, VirtAddr, PAGE_SIZE};
use crate::fs::NodeRef;

/// 一段连续映射的虚拟地址区间
#[derive(Clone)]
pub struct MemoryRegion {
    pub base: VirtAddr,
    /// 字节数，页对齐
    pub size: u64,
    /// 文件偏移
    pub offset: u64,
    /// 后备文件，匿名映射为 None
    pub file: Option<NodeRef>,
    pub flags: MapFlags,
    pub prot: Prot,
}

impl MemoryRegion {
    pub fn anonymous(base: VirtAddr, size: u64, prot: Prot) -> Self {
        Self {
            base,
            size: page_align_up(size),
            offset: 0,
            file: None,
            flags: MapFlags::PRIVATE | MapFlags::ANONYMOUS,
            prot,
        }
    }

    #[inline]
    pub fn end(&self) -> VirtAddr {
        self.base + self.size
    }

    #[inline]
    pub fn contains(&self, addr: VirtAddr) -> bool {
        addr >= self.base && addr < self.end()
    }

    #[inline]
    pub fn overlaps(&self, base: VirtAddr, size: u64) -> bool {
        base < self.end() && self.base < base + size
    }

    pub fn page_count(&self) -> usize {
        (self.size / PAGE_SIZE as u64) as usize
    }
}

impl PartialEq for MemoryRegion {
    fn eq(&self, other: &Self) -> bool {
        let same_file = match (&self.file, &other.file) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        self.base == other.base
            && self.size == other.size
            && self.offset == other.offset
            && self.flags == other.flags
            && self.prot == other.prot
            && same_file
    }
}

impl fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .field("offset", &self.offset)
            .field("file", &self.file.as_ref().map(|n| n.id()))
            .field("flags", &self.flags)
            .field("prot", &self.prot)
            .finish()
    }
}

/// 进程的区域表，键为区域起始地址
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionList {
    regions: BTreeMap<VirtAddr, MemoryRegion>,
}

impl RegionList {
    pub fn new() -> Self {
        Self { regions: BTreeMap::new() }
    }

    /// 插入区域，与已有区域重叠时失败
    pub fn insert(&mut self, region: MemoryRegion) -> Result<(), MapError> {
        if region.size == 0 || region.base % PAGE_SIZE as u64 != 0 {
            return Err(MapError::Invalid);
        }
        if self.overlaps(region.base, region.size) {
            return Err(MapError::AlreadyMapped);
        }
        self.regions.insert(region.base, region);
        Ok(())
    }

    /// `[base, base + size)` 是否与任何区域相交
    pub fn overlaps(&self, base: VirtAddr, size: u64) -> bool {
        let end = base.saturating_add(size);
        // 只需检查起始地址在 end 之前的最后一个区域及之前的相邻区域
        self.regions
            .range(..end)
            .next_back()
            .map_or(false, |(_, r)| r.overlaps(base, size))
    }

    /// 查找包含 `addr` 的区域
    pub fn find(&self, addr: VirtAddr) -> Option<&MemoryRegion> {
        self.regions
            .range(..=addr)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(addr))
    }

    /// 从 `hint` 向上线性搜索 `size` 字节的空洞，必须整体位于 `limit` 之下
    pub fn find_free(&self, hint: VirtAddr, size: u64, limit: VirtAddr) -> Option<VirtAddr> {
        let mut candidate = checked_page_align_up(hint.max(PAGE_SIZE as u64))?;
        for region in self.regions.values() {
            if region.end() <= candidate {
                continue;
            }
            if candidate.checked_add(size)? <= region.base {
                break;
            }
            candidate = region.end();
        }
        match candidate.checked_add(size) {
            Some(end) if end <= limit => Some(candidate),
            _ => None,
        }
    }

    pub fn remove(&mut self, base: VirtAddr) -> Option<MemoryRegion> {
        self.regions.remove(&base)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.values()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn clear(&mut self) {
        self.regions.clear();
    }
}
