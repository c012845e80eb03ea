//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 程序加载 (exec)
//!
//! 对应 Linux 的 load_elf_binary (fs/binfmt_elf.c) 与 setup_arg_pages：
//! 新地址空间完全构建成功后才替换旧的，失败时进程保持原样。
//!
//! 用户地址空间布局：
//!
//! ```text
//! USER_STACK_TOP + n   argv/envp 字符串区
//! USER_STACK_TOP       ---------------
//!                      用户栈 (USER_STACK_SIZE)，rsp 指向 argc
//! stack base           ---------------
//!                      保护页（只登记区域，不映射）
//! VDSO_BASE            vdso
//! ...                  ELF 段、mmap
//! ```

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use super::task::{MemoryBlock, UserStack};
use super::{Pid, ProcessType, ThreadRef, PID_INIT};
use crate::arch::TrapFrame;
use crate::config::{PAGE_SIZE, USER_SPLIT, USER_STACK_SIZE, USER_STACK_TOP, VDSO_BASE, VDSO_PATH};
use crate::errno::{Errno, KResult};
use crate::fs::elf::{ElfFile, PF_R, PF_W, PF_X};
use crate::fs::{basename, FileDescriptor, NodeRef, OpenFlags};
use crate::kernel::Kernel;
use crate::mm::uaccess::write_table;
use crate::mm::vma::MemoryRegion;
use crate::mm::{checked_page_align_up, page_align_down, page_align_up, pages_for, MapFlags, PageFlags, Prot};

/// argv + envp 字符串总长度上限
pub const ARG_MAX: usize = 128 * 1024;

/// vdso 导出的信号跳板符号
pub const VDSO_TRAMPOLINE_SYMBOL: &str = "__vdso_sigreturn";

/// init 的标准输入输出设备
pub const CONSOLE_PATH: &str = "/dev/tty";

fn segment_prot(p_flags: u32) -> Prot {
    let mut prot = Prot::empty();
    if p_flags & PF_R != 0 {
        prot |= Prot::READ;
    }
    if p_flags & PF_W != 0 {
        prot |= Prot::WRITE;
    }
    if p_flags & PF_X != 0 {
        prot |= Prot::EXEC;
    }
    prot
}

impl Kernel {
    /// 分配 `pages` 个清零的页帧
    fn alloc_zeroed(&mut self, pages: usize) -> u64 {
        let paddr = self.alloc_frames_or_die(pages);
        self.machine.write_phys(paddr, &vec![0u8; pages * PAGE_SIZE]);
        paddr
    }

    /// 把所有 PT_LOAD 段加载到 `mem`，地址加上 `bias`
    fn load_segments(
        &mut self,
        mem: &mut MemoryBlock,
        elf: &ElfFile,
        node: &NodeRef,
        bias: u64,
    ) -> KResult<()> {
        for phdr in elf.load_segments() {
            if phdr.p_memsz == 0 {
                continue;
            }
            let vaddr = bias.checked_add(phdr.p_vaddr).ok_or(Errno::ExecFormatError)?;
            let end = vaddr.checked_add(phdr.p_memsz).ok_or(Errno::ExecFormatError)?;
            let start = page_align_down(vaddr);
            let end = checked_page_align_up(end).ok_or(Errno::ExecFormatError)?;
            if start < PAGE_SIZE as u64 || end > USER_SPLIT {
                return Err(Errno::ExecFormatError);
            }
            if mem.regions.overlaps(start, end - start) {
                // BSS 尾部与另一个段共享页的情况不处理
                self.die(format_args!("segment {:#x}..{:#x} shares a page with another segment", start, end));
            }

            let pages = pages_for(end - start);
            let paddr = self.alloc_zeroed(pages);
            let data = elf.segment_data(&phdr)?;
            self.machine.write_phys(paddr + (vaddr - start), data);

            let mut flags = PageFlags::PRESENT | PageFlags::USER;
            if phdr.is_writable() {
                flags |= PageFlags::WRITABLE;
            }
            if !phdr.is_executable() {
                flags |= PageFlags::NO_EXECUTE;
            }
            self.machine.map_region(mem.table, pages, start, paddr, flags);
            mem.regions.insert(MemoryRegion {
                base: start,
                size: end - start,
                offset: page_align_down(phdr.p_offset),
                file: Some(node.clone()),
                flags: MapFlags::PRIVATE | MapFlags::FIXED,
                prot: segment_prot(phdr.p_flags),
            })?;
        }
        Ok(())
    }

    /// vdso 映像，首次使用时从 VDSO_PATH 读入并缓存
    fn vdso_image(&mut self) -> Option<Arc<Vec<u8>>> {
        if self.vdso_image.is_none() {
            match self.vfs.read_all(VDSO_PATH) {
                Ok(data) => self.vdso_image = Some(Arc::new(data)),
                Err(e) => {
                    log::warn!(target: "exec", "no vdso at {}: {}", VDSO_PATH, e);
                    return None;
                }
            }
        }
        self.vdso_image.clone()
    }

    /// 映射 vdso 并定位信号跳板；失败时进程没有跳板
    fn load_vdso(&mut self, mem: &mut MemoryBlock) {
        let Some(image) = self.vdso_image() else {
            return;
        };
        let elf = match ElfFile::parse_shared(&image) {
            Ok(elf) => elf,
            Err(e) => {
                log::warn!(target: "exec", "invalid vdso image: {:?}", e);
                return;
            }
        };
        let node = match self.vfs.open(VDSO_PATH, OpenFlags::empty()) {
            Ok(node) => node,
            Err(_) => return,
        };
        if let Err(e) = self.load_segments(mem, &elf, &node, VDSO_BASE) {
            log::warn!(target: "exec", "mapping vdso failed: {}", e);
            return;
        }
        mem.vdso = Some(VDSO_BASE);
        mem.trampoline = elf
            .find_dynamic_symbol(VDSO_TRAMPOLINE_SYMBOL)
            .map(|off| VDSO_BASE + off);
        if mem.trampoline.is_none() {
            log::warn!(target: "exec", "vdso exports no {}", VDSO_TRAMPOLINE_SYMBOL);
        }
    }

    /// 映射用户栈和其下方的保护页
    fn setup_stack(&mut self, mem: &mut MemoryBlock) -> KResult<UserStack> {
        let size = USER_STACK_SIZE as u64;
        let base = USER_STACK_TOP - size;
        let pages = pages_for(size);
        let paddr = self.alloc_zeroed(pages);
        let rw = Prot::READ | Prot::WRITE;
        self.machine.map_region(mem.table, pages, base, paddr, rw.page_flags());
        mem.regions.insert(MemoryRegion::anonymous(base, size, rw))?;
        // 保护页只登记区域，访问时缺页失败
        mem.regions
            .insert(MemoryRegion::anonymous(base - PAGE_SIZE as u64, PAGE_SIZE as u64, Prot::empty()))?;
        Ok(UserStack { base, size })
    }

    /// 把字符串复制到栈顶之上的区域，按 ABI 在栈上压入 argc/argv/envp
    ///
    /// 返回初始 rsp，指向 argc
    fn setup_args(&mut self, mem: &mut MemoryBlock, argv: &[String], envp: &[String]) -> KResult<u64> {
        let mut strings = Vec::new();
        let mut pointers = Vec::with_capacity(argv.len() + envp.len() + 3);
        pointers.push(argv.len() as u64);
        for list in [argv, envp] {
            for s in list {
                pointers.push(USER_STACK_TOP + strings.len() as u64);
                strings.extend_from_slice(s.as_bytes());
                strings.push(0);
            }
            pointers.push(0);
        }

        let area = page_align_up(strings.len().max(1) as u64);
        let pages = pages_for(area);
        let paddr = self.alloc_zeroed(pages);
        let rw = Prot::READ | Prot::WRITE;
        self.machine.map_region(mem.table, pages, USER_STACK_TOP, paddr, rw.page_flags());
        mem.regions.insert(MemoryRegion::anonymous(USER_STACK_TOP, area, rw))?;
        self.machine.write_phys(paddr, &strings);

        let words: Vec<u8> = pointers.iter().flat_map(|w| w.to_le_bytes()).collect();
        let sp = (USER_STACK_TOP - words.len() as u64) & !0xf;
        if sp < USER_STACK_TOP - USER_STACK_SIZE as u64 {
            return Err(Errno::ArgumentListTooLong);
        }
        write_table(&mut *self.machine, mem.table, sp, &words)?;
        Ok(sp)
    }

    /// 构建新地址空间，失败时释放已分配的部分
    fn build_image(
        &mut self,
        elf: &ElfFile,
        node: &NodeRef,
        argv: &[String],
        envp: &[String],
    ) -> KResult<(MemoryBlock, UserStack, u64)> {
        let table = match self.machine.create_table() {
            Some(table) => table,
            None => self.die(format_args!("out of frames for page table")),
        };
        let mut mem = MemoryBlock::new(table);
        let result = self.load_segments(&mut mem, elf, node, 0).and_then(|_| {
            let stack = self.setup_stack(&mut mem)?;
            let sp = self.setup_args(&mut mem, argv, envp)?;
            Ok((stack, sp))
        });
        match result {
            Ok((stack, sp)) => {
                self.load_vdso(&mut mem);
                Ok((mem, stack, sp))
            }
            Err(e) => {
                self.machine.free_table(table);
                Err(e)
            }
        }
    }

    /// 在线程 `t` 所在进程中执行 `path`
    ///
    /// 成功后：其他线程被杀死，被捕获的信号恢复默认，文件描述符保留，
    /// 进程改名为可执行文件的文件名，`t` 从入口点重新开始
    pub fn proc_exec(
        &mut self,
        t: ThreadRef,
        path: &str,
        argv: &[String],
        envp: &[String],
    ) -> KResult<()> {
        let process = self.procs.get(t.pid).ok_or(Errno::NoSuchProcess)?;
        if process.ptype != ProcessType::User {
            return Err(Errno::OperationNotPermitted);
        }
        if !process.threads.contains_key(&t.tid) {
            return Err(Errno::NoSuchProcess);
        }
        let total: usize = argv.iter().chain(envp).map(|s| s.len() + 1).sum();
        if total > ARG_MAX {
            return Err(Errno::ArgumentListTooLong);
        }

        let node = self.vfs.open(path, OpenFlags::empty())?;
        let image = self.vfs.read_all(path)?;
        let elf = ElfFile::parse_executable(&image).map_err(|e| {
            log::info!(target: "exec", "{}: not a loadable executable ({:?})", path, e);
            Errno::from(e)
        })?;
        let entry = elf.entry();
        let (mem, stack, sp) = self.build_image(&elf, &node, argv, envp)?;

        // 提交：此后不再失败
        let others: Vec<ThreadRef> = self
            .procs
            .get(t.pid)
            .map(|p| p.thread_refs())
            .unwrap_or_default()
            .into_iter()
            .filter(|&o| o != t)
            .collect();
        for other in others {
            self.proc_exit_thread(other);
            self.proc_reap_thread(other);
        }

        let table = mem.table;
        let old = match self.procs.get_mut(t.pid) {
            Some(p) => {
                p.signals.reset_caught();
                p.name = String::from(basename(path));
                p.memory.replace(mem)
            }
            None => None,
        };
        if let Some(old) = old {
            self.machine.free_table(old.table);
        }
        if let Some(th) = self.thread_mut(t) {
            th.regs = TrapFrame::new_user(entry, sp);
            th.regs.rdi = argv.len() as u64;
            th.regs.rsi = sp + 8;
            th.regs.rdx = sp + 8 * (argv.len() as u64 + 2);
            th.ustack = Some(stack);
            th.current_signal = 0;
            th.wait = None;
        }
        if self.current() == Some(t) {
            self.machine.load_table(table);
        }
        log::info!(target: "exec", "pid {} exec {} entry {:#x}", t.pid, path, entry);
        Ok(())
    }

    /// 创建 init 进程 (PID 1) 并加载 `path`
    ///
    /// 若存在控制台设备，它被打开为 fd 0/1/2
    pub fn spawn_init(&mut self, path: &str, argv: &[String], envp: &[String]) -> KResult<Pid> {
        if self.procs.contains(PID_INIT) {
            return Err(Errno::FileExists);
        }
        let pid = self.proc_create("init", ProcessType::User, None);
        if pid != PID_INIT {
            self.discard_process(pid);
            return Err(Errno::DeviceOrResourceBusy);
        }
        if let Ok(console) = self.vfs.open(CONSOLE_PATH, OpenFlags::RDWR) {
            if let Some(files) = self.procs.get_mut(pid).and_then(|p| p.files.as_mut()) {
                for _ in 0..3 {
                    files.install(FileDescriptor::new(console.clone(), OpenFlags::RDWR))?;
                }
            }
        }
        let t = ThreadRef::new(pid, 0);
        if let Err(e) = self.proc_exec(t, path, argv, envp) {
            log::error!(target: "exec", "cannot start init from {}: {}", path, e);
            self.discard_process(pid);
            return Err(e);
        }
        self.sched_enqueue(t);
        Ok(pid)
    }

    /// 丢弃从未运行过的进程
    fn discard_process(&mut self, pid: Pid) {
        let threads = self.procs.get(pid).map(|p| p.thread_refs()).unwrap_or_default();
        for t in threads {
            self.proc_exit_thread(t);
            self.proc_reap_thread(t);
        }
        self.proc_free(pid);
        self.proc_destroy(pid);
    }
}
