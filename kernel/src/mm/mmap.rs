//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! mmap 与缺页处理
//!
//! 所有映射都立即分配物理页帧并清零，没有按需分页和写时复制。
//! 因此缺页只有两种结果：页已存在（虚假缺页，直接返回）或访问违例。

use alloc::vec;

use super::vma::MemoryRegion;
use super::{page_align_up, pages_for, MapFlags, Prot, VirtAddr, PAGE_SIZE};
use crate::config::USER_SPLIT;
use crate::errno::{Errno, KResult};
use crate::fs::NodeRef;
use crate::kernel::Kernel;
use crate::process::Pid;
use crate::signal::SIGSEGV;

/// 缺页处理失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// 进程没有地址空间
    NoAddressSpace,
    /// 地址不在任何区域内
    Unmapped,
    /// 写只读区域
    WriteProtected,
    /// 区域内的页不存在或权限不符（不做按需填充）
    NotPresent,
}

impl From<FaultError> for Errno {
    fn from(_: FaultError) -> Self {
        Errno::BadAddress
    }
}

impl Kernel {
    /// 在 `pid` 的地址空间中建立映射，返回起始地址
    ///
    /// `MapFlags::FIXED` 时 `addr` 必须页对齐且不能与已有区域重叠；
    /// 否则从 `addr` 开始向上找第一个足够大的空洞
    #[allow(clippy::too_many_arguments)]
    pub fn proc_mmap(
        &mut self,
        pid: Pid,
        addr: VirtAddr,
        size: u64,
        prot: Prot,
        flags: MapFlags,
        file: Option<NodeRef>,
        offset: u64,
    ) -> KResult<VirtAddr> {
        if size == 0 || size > USER_SPLIT {
            return Err(Errno::InvalidArgument);
        }
        let size = page_align_up(size);
        let memory = self
            .procs
            .get(pid)
            .and_then(|p| p.memory.as_ref())
            .ok_or(Errno::InvalidArgument)?;

        let base = if flags.contains(MapFlags::FIXED) {
            if addr % PAGE_SIZE as u64 != 0 || addr < PAGE_SIZE as u64 {
                return Err(Errno::InvalidArgument);
            }
            match addr.checked_add(size) {
                Some(end) if end <= USER_SPLIT => {}
                _ => return Err(Errno::OutOfMemory),
            }
            if memory.regions.overlaps(addr, size) {
                return Err(Errno::FileExists);
            }
            addr
        } else {
            memory
                .regions
                .find_free(addr, size, USER_SPLIT)
                .ok_or(Errno::OutOfMemory)?
        };
        let table = memory.table;

        let pages = pages_for(size);
        let paddr = self.alloc_frames_or_die(pages);
        self.machine.write_phys(paddr, &vec![0u8; size as usize]);
        if let Some(node) = &file {
            // 文件末尾之后保持为零
            let mut buf = vec![0u8; size as usize];
            let n = node.read(&mut buf, offset)?;
            self.machine.write_phys(paddr, &buf[..n]);
        }
        self.machine.map_region(table, pages, base, paddr, prot.page_flags());

        let mut flags = flags;
        if file.is_none() {
            flags |= MapFlags::ANONYMOUS;
        }
        let region = MemoryRegion { base, size, offset, file, flags, prot };
        if let Some(memory) = self.procs.get_mut(pid).and_then(|p| p.memory.as_mut()) {
            memory.regions.insert(region)?;
        }
        log::debug!(target: "mm", "pid {} mmap {:#x}..{:#x} {:?}", pid, base, base + size, prot);
        Ok(base)
    }

    /// 处理 `pid` 在 `addr` 上的缺页
    pub fn handle_page_fault(&self, pid: Pid, addr: VirtAddr, write: bool) -> Result<(), FaultError> {
        let memory = self
            .procs
            .get(pid)
            .and_then(|p| p.memory.as_ref())
            .ok_or(FaultError::NoAddressSpace)?;
        let region = memory.regions.find(addr).ok_or(FaultError::Unmapped)?;
        if write && !region.prot.contains(Prot::WRITE) {
            return Err(FaultError::WriteProtected);
        }
        match self.machine.get_page(memory.table, addr) {
            Some(entry) if entry.is_present() && entry.is_user() && (!write || entry.is_writable()) => Ok(()),
            _ => Err(FaultError::NotPresent),
        }
    }

    /// 缺页异常入口：当前线程访问 `addr` 失败
    ///
    /// 无法处理时向当前线程发送 SIGSEGV
    pub fn page_fault(&mut self, addr: VirtAddr, write: bool) {
        let Some(t) = self.current() else {
            return;
        };
        let Err(err) = self.handle_page_fault(t.pid, addr, write) else {
            log::trace!(target: "mm", "spurious fault at {:#x} in pid {}", addr, t.pid);
            return;
        };
        log::info!(
            target: "mm",
            "pid {} tid {}: {:?} at {:#x} ({})",
            t.pid, t.tid, err, addr, if write { "write" } else { "read" }
        );
        let _ = self.signal_send(t.pid, Some(t.tid), SIGSEGV);
        if !self.thread(t).map_or(false, |th| th.state == crate::process::ThreadState::Running) {
            self.reschedule();
        }
    }
}
