//! 进程与线程创建
//!
//! 对应 Linux 的 copy_process 之外的创建路径：
//! - `proc_create`: 新进程 + 线程 0（不入队）
//! - `proc_spawn_thread`: 在已有进程中增加线程 (clone with CLONE_THREAD)
//! - `spawn_kernel`: 内核进程 (kthread_create)

use super::task::UserStack;
use super::{Pid, Process, ProcessType, Thread, ThreadRef, Tid, PID_INIT};
use crate::arch::TrapFrame;
use crate::config::THREAD_STACK_SIZE;
use crate::errno::{Errno, KResult};
use crate::fs::FdTable;
use crate::kernel::Kernel;
use crate::mm::{MapFlags, Prot, VirtAddr};
use crate::process::MemoryBlock;

impl Kernel {
    /// 创建进程和它的线程 0
    ///
    /// 用户进程获得空地址空间和空文件描述符表。线程 0 处于 READY 但不在
    /// 运行队列中，由调用者设置入口后入队
    pub fn proc_create(&mut self, name: &str, ptype: ProcessType, parent: Option<Pid>) -> Pid {
        let pid = match self.procs.alloc_pid() {
            Some(pid) => pid,
            None => self.die(format_args!("pid space exhausted")),
        };
        let mut process = Process::new(pid, name, ptype, None);
        if let Some(p) = parent.and_then(|p| self.procs.get(p)) {
            process.group = p.group;
            process.session = p.session;
            process.identity = p.identity;
        }

        let kstack = self.alloc_kernel_stack();
        process.threads.insert(0, Thread::new(0, kstack));

        if ptype == ProcessType::User {
            let table = match self.machine.create_table() {
                Some(table) => table,
                None => self.die(format_args!("out of frames for page table")),
            };
            process.memory = Some(MemoryBlock::new(table));
            process.files = Some(FdTable::new());
        }

        self.procs.insert(process);
        if let Some(parent) = parent {
            self.procs.link_child(parent, pid);
        }
        log::debug!(target: "proc", "created pid {} ({}, {:?})", pid, name, ptype);
        pid
    }

    /// 在 `pid` 中创建新线程，从 `entry` 开始执行，rdi = `arg`
    ///
    /// 新线程继承 `caller` 的信号掩码；用户进程的线程获得独立的栈区域
    pub fn proc_spawn_thread(
        &mut self,
        pid: Pid,
        caller: Tid,
        entry: VirtAddr,
        arg: u64,
    ) -> KResult<ThreadRef> {
        let process = self.procs.get(pid).ok_or(Errno::NoSuchProcess)?;
        if process.is_zombie() {
            return Err(Errno::NoSuchProcess);
        }
        let mask = process
            .threads
            .get(&caller)
            .map(|th| th.signal_mask)
            .ok_or(Errno::NoSuchProcess)?;
        let tid = process.next_tid();
        let is_user = process.is_user();

        let (regs, ustack) = if is_user {
            let size = THREAD_STACK_SIZE as u64;
            let base = self.proc_mmap(
                pid,
                0,
                size,
                Prot::READ | Prot::WRITE,
                MapFlags::PRIVATE | MapFlags::ANONYMOUS,
                None,
                0,
            )?;
            let regs = TrapFrame::new_user(entry, base + size - 8);
            (regs, Some(UserStack { base, size }))
        } else {
            (TrapFrame::default(), None)
        };

        let kstack = self.alloc_kernel_stack();
        let mut thread = Thread::new(tid, kstack);
        thread.regs = if is_user {
            regs
        } else {
            TrapFrame::new_kernel(entry, (kstack.frame_pointer() & !0xf) - 8)
        };
        thread.regs.rdi = arg;
        thread.ustack = ustack;
        thread.signal_mask = mask;

        if let Some(p) = self.procs.get_mut(pid) {
            p.threads.insert(tid, thread);
        }
        let t = ThreadRef::new(pid, tid);
        self.sched_enqueue(t);
        log::debug!(target: "proc", "pid {} spawned thread {}", pid, tid);
        Ok(t)
    }

    /// 创建内核进程，线程 0 从 `entry` 开始
    pub fn spawn_kernel(&mut self, name: &str, entry: VirtAddr) -> Pid {
        let parent = self.procs.contains(PID_INIT).then_some(PID_INIT);
        let pid = self.proc_create(name, ProcessType::Kernel, parent);
        let t = ThreadRef::new(pid, 0);
        if let Some(th) = self.thread_mut(t) {
            th.regs = TrapFrame::new_kernel(entry, (th.kstack.frame_pointer() & !0xf) - 8);
        }
        self.sched_enqueue(t);
        pid
    }
}
