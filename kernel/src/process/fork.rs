//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 进程复制 (fork)
//!
//! 对应 Linux 的 copy_process (kernel/fork.c)，但没有写时复制：
//! - 页表深拷贝，每个用户页都复制到新页帧
//! - 区域表、文件描述符表、信号处理表按值复制
//! - 只复制调用 fork 的线程 (POSIX 语义)
//! - 子进程 rax = 0，父进程的返回值由调用者写入

use alloc::vec;

use super::task::MemoryBlock;
use super::{Pid, Process, Thread, ThreadRef, Tid};
use crate::config::PAGE_SIZE;
use crate::kernel::Kernel;

impl Kernel {
    /// 复制 `parent` 的 `tid` 线程所在进程
    ///
    /// 调用线程不存在时返回 None（系统调用层映射为 ESRCH）
    pub fn proc_fork(&mut self, parent: Pid, tid: Tid) -> Option<Pid> {
        let src = self.procs.get(parent)?;
        let src_thread = src.threads.get(&tid)?.clone();
        let name = src.name.clone();
        let ptype = src.ptype;
        let (group, session, identity) = (src.group, src.session, src.identity);
        let src_memory = src.memory.clone();
        let files = src.files.clone();
        let signals = src.signals.fork_copy();

        let child_pid = match self.procs.alloc_pid() {
            Some(pid) => pid,
            None => self.die(format_args!("pid space exhausted")),
        };

        let memory = match src_memory {
            Some(mem) => {
                let table = match self.machine.clone_table(mem.table) {
                    Some(table) => table,
                    None => self.die(format_args!("out of frames cloning pid {}", parent)),
                };
                Some(MemoryBlock {
                    table,
                    regions: mem.regions.clone(),
                    vdso: mem.vdso,
                    trampoline: mem.trampoline,
                })
            }
            None => None,
        };

        // 内核栈内容原样复制
        let kstack = self.alloc_kernel_stack();
        let mut buf = vec![0u8; PAGE_SIZE];
        for page in 0..kstack.pages as u64 {
            let off = page * PAGE_SIZE as u64;
            self.machine.read_phys(src_thread.kstack.base + off, &mut buf);
            self.machine.write_phys(kstack.base + off, &buf);
        }

        let mut thread = Thread::new(0, kstack);
        thread.regs = src_thread.regs;
        thread.regs.rax = 0;
        thread.ustack = src_thread.ustack;
        thread.signal_mask = src_thread.signal_mask;
        thread.current_signal = src_thread.current_signal;

        let mut child = Process::new(child_pid, &name, ptype, None);
        child.group = group;
        child.session = session;
        child.identity = identity;
        child.memory = memory;
        child.files = files;
        child.signals = signals;
        child.threads.insert(0, thread);

        self.procs.insert(child);
        self.procs.link_child(parent, child_pid);
        self.sched_enqueue(ThreadRef::new(child_pid, 0));

        log::debug!(target: "proc", "pid {} forked {} from thread {}", parent, child_pid, tid);
        Some(child_pid)
    }
}
