//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!

//! 宿主机模拟平台
//!
//! 用 `BTreeMap` 模拟物理内存和四级页表之外的一切：每个页帧是一块
//! `PAGE_SIZE` 字节的缓冲区，每张页表是 `vpn -> PageEntry` 的映射。
//! CPU 状态（当前页表、RSP0、中断开关、切换记录）保存在结构体里供测试检查。

use alloc::boxed::Box;
use core::any::Any;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use super::Machine;
use crate::config::{PAGE_SHIFT, PAGE_SIZE};
use crate::mm::pagemap::{PageEntry, TableRoot};
use crate::mm::{PageFlags, PhysAddr, VirtAddr};

/// 模拟物理内存起始地址（跳过低 1MB）
const PHYS_BASE: PhysAddr = 0x10_0000;

pub struct HostMachine {
    frames: BTreeMap<PhysAddr, Box<[u8]>>,
    /// 释放后可复用的单页帧
    free_list: Vec<PhysAddr>,
    next_frame: PhysAddr,
    frame_limit: usize,
    tables: BTreeMap<PhysAddr, BTreeMap<u64, PageEntry>>,

    pub active_table: Option<TableRoot>,
    pub kernel_stack: VirtAddr,
    pub interrupts_enabled: bool,
    pub halted: u64,
    /// 每次 context_switch 的目标内核栈指针
    pub switches: Vec<VirtAddr>,
}

impl HostMachine {
    pub fn new() -> Self {
        Self::with_frame_limit(usize::MAX)
    }

    /// 限制可分配的页帧总数，用于模拟内存耗尽
    pub fn with_frame_limit(limit: usize) -> Self {
        Self {
            frames: BTreeMap::new(),
            free_list: Vec::new(),
            next_frame: PHYS_BASE,
            frame_limit: limit,
            tables: BTreeMap::new(),
            active_table: None,
            kernel_stack: 0,
            interrupts_enabled: true,
            halted: 0,
            switches: Vec::new(),
        }
    }

    /// 当前已分配的页帧数
    pub fn frames_in_use(&self) -> usize {
        self.frames.len()
    }

    /// 页表中已映射的页数
    pub fn mapped_pages(&self, table: TableRoot) -> usize {
        self.tables.get(&table.0).map_or(0, |t| t.len())
    }

    fn frame_base(paddr: PhysAddr) -> PhysAddr {
        paddr & !((PAGE_SIZE as u64) - 1)
    }

    fn take_frame(&mut self) -> Option<PhysAddr> {
        if self.frames.len() >= self.frame_limit {
            return None;
        }
        let base = match self.free_list.pop() {
            Some(base) => base,
            None => {
                let base = self.next_frame;
                self.next_frame += PAGE_SIZE as u64;
                base
            }
        };
        self.frames.insert(base, vec![0u8; PAGE_SIZE].into_boxed_slice());
        Some(base)
    }
}

impl Default for HostMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine for HostMachine {
    fn alloc_frames(&mut self, count: usize) -> Option<PhysAddr> {
        if count == 0 {
            return None;
        }
        if count == 1 {
            return self.take_frame();
        }
        // 多页分配要求物理连续，直接从未使用的高端切出
        if self.frames.len() + count > self.frame_limit {
            return None;
        }
        let base = self.next_frame;
        for i in 0..count as u64 {
            self.frames
                .insert(base + (i << PAGE_SHIFT), vec![0u8; PAGE_SIZE].into_boxed_slice());
        }
        self.next_frame += (count as u64) << PAGE_SHIFT;
        Some(base)
    }

    fn free_frames(&mut self, base: PhysAddr, count: usize) {
        for i in 0..count as u64 {
            let frame = base + (i << PAGE_SHIFT);
            if self.frames.remove(&frame).is_some() {
                self.free_list.push(frame);
            }
        }
    }

    fn read_phys(&self, paddr: PhysAddr, buf: &mut [u8]) {
        let mut done = 0;
        while done < buf.len() {
            let addr = paddr + done as u64;
            let base = Self::frame_base(addr);
            let off = (addr - base) as usize;
            let n = (PAGE_SIZE - off).min(buf.len() - done);
            match self.frames.get(&base) {
                Some(frame) => buf[done..done + n].copy_from_slice(&frame[off..off + n]),
                None => buf[done..done + n].fill(0),
            }
            done += n;
        }
    }

    fn write_phys(&mut self, paddr: PhysAddr, data: &[u8]) {
        let mut done = 0;
        while done < data.len() {
            let addr = paddr + done as u64;
            let base = Self::frame_base(addr);
            let off = (addr - base) as usize;
            let n = (PAGE_SIZE - off).min(data.len() - done);
            if let Some(frame) = self.frames.get_mut(&base) {
                frame[off..off + n].copy_from_slice(&data[done..done + n]);
            }
            done += n;
        }
    }

    fn create_table(&mut self) -> Option<TableRoot> {
        let root = self.take_frame()?;
        self.tables.insert(root, BTreeMap::new());
        Some(TableRoot(root))
    }

    fn clone_table(&mut self, table: TableRoot) -> Option<TableRoot> {
        let entries: Vec<(u64, PageEntry)> = self
            .tables
            .get(&table.0)?
            .iter()
            .map(|(vpn, e)| (*vpn, *e))
            .collect();
        let root = self.create_table()?;
        let mut buf = vec![0u8; PAGE_SIZE];
        for (vpn, entry) in entries {
            let Some(frame) = self.take_frame() else {
                self.free_table(root);
                return None;
            };
            self.read_phys(entry.paddr, &mut buf);
            self.write_phys(frame, &buf);
            if let Some(t) = self.tables.get_mut(&root.0) {
                t.insert(vpn, PageEntry { paddr: frame, ..entry });
            }
        }
        Some(root)
    }

    fn free_table(&mut self, table: TableRoot) {
        if let Some(entries) = self.tables.remove(&table.0) {
            for entry in entries.values() {
                self.free_frames(entry.paddr, 1);
            }
        }
        self.free_frames(table.0, 1);
        if self.active_table == Some(table) {
            self.active_table = None;
        }
    }

    fn map_region(
        &mut self,
        table: TableRoot,
        pages: usize,
        vaddr: VirtAddr,
        paddr: PhysAddr,
        flags: PageFlags,
    ) {
        if let Some(t) = self.tables.get_mut(&table.0) {
            for i in 0..pages as u64 {
                let vpn = (vaddr >> PAGE_SHIFT) + i;
                t.insert(
                    vpn,
                    PageEntry {
                        paddr: paddr + (i << PAGE_SHIFT),
                        flags: flags | PageFlags::PRESENT,
                        size: PAGE_SIZE,
                    },
                );
            }
        }
    }

    fn get_page(&self, table: TableRoot, vaddr: VirtAddr) -> Option<PageEntry> {
        self.tables.get(&table.0)?.get(&(vaddr >> PAGE_SHIFT)).copied()
    }

    fn load_table(&mut self, table: TableRoot) {
        self.active_table = Some(table);
    }

    fn set_kernel_stack(&mut self, top: VirtAddr) {
        self.kernel_stack = top;
    }

    fn context_switch(&mut self, kernel_sp: VirtAddr) {
        self.switches.push(kernel_sp);
    }

    fn disable_interrupts(&mut self) {
        self.interrupts_enabled = false;
    }

    fn halt(&mut self) {
        self.halted += 1;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
