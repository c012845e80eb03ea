//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!

//! 内核上下文
//!
//! `Kernel` 持有一个 CPU 的全部可变状态：平台、VFS、进程表、调度器和
//! 等待队列。启动时构造一次，没有模块级单例，测试可以同时构造多个互不
//! 干扰的内核实例。

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::arch::{Machine, TrapFrame};
use crate::config::{KERNEL_NAME, KERNEL_STACK_PAGES, KERNEL_VERSION};
use crate::fs::Vfs;
use crate::mm::PhysAddr;
use crate::process::task::KernelStack;
use crate::process::wait::WaitQueue;
use crate::process::{
    Pid, Process, ProcessTable, ProcessType, Thread, ThreadRef, ThreadState, WaitKey, PID_SWAPPER,
};
use crate::sched::Scheduler;

pub struct Kernel {
    pub machine: Box<dyn Machine>,
    pub vfs: Box<dyn Vfs>,
    pub procs: ProcessTable,
    pub sched: Scheduler,
    pub(crate) wait_queues: BTreeMap<WaitKey, WaitQueue>,
    /// 首次 exec 时从 VDSO_PATH 读入的 vdso 映像
    pub(crate) vdso_image: Option<Arc<Vec<u8>>>,
    next_sem_id: u64,
}

impl Kernel {
    /// 启动：创建 idle 进程 (PID 0) 并把它设为当前线程
    pub fn boot(mut machine: Box<dyn Machine>, vfs: Box<dyn Vfs>) -> Self {
        log::info!(target: "sched", "{} {} booting", KERNEL_NAME, KERNEL_VERSION);

        let idle_ref = ThreadRef::new(PID_SWAPPER, 0);
        let kstack = match machine.alloc_frames(KERNEL_STACK_PAGES) {
            Some(base) => KernelStack { base, pages: KERNEL_STACK_PAGES },
            None => panic!("boot: no frames for idle stack"),
        };
        let mut idle = Process::new(PID_SWAPPER, "swapper", ProcessType::Kernel, None);
        let mut thread = Thread::new(0, kstack);
        thread.state = ThreadState::Running;
        idle.threads.insert(0, thread);
        idle.refresh_state();

        let mut procs = ProcessTable::new();
        procs.insert(idle);

        Self {
            machine,
            vfs,
            procs,
            sched: Scheduler::new(idle_ref),
            wait_queues: BTreeMap::new(),
            vdso_image: None,
            next_sem_id: 1,
        }
    }

    /// 当前线程
    #[inline]
    pub fn current(&self) -> Option<ThreadRef> {
        self.sched.current()
    }

    pub fn current_pid(&self) -> Option<Pid> {
        self.current().map(|t| t.pid)
    }

    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.procs.get(pid)
    }

    pub fn process_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.procs.get_mut(pid)
    }

    pub fn thread(&self, t: ThreadRef) -> Option<&Thread> {
        self.procs.thread(t)
    }

    pub fn thread_mut(&mut self, t: ThreadRef) -> Option<&mut Thread> {
        self.procs.thread_mut(t)
    }

    /// 线程保存的寄存器
    pub fn regs(&self, t: ThreadRef) -> Option<&TrapFrame> {
        self.thread(t).map(|th| &th.regs)
    }

    pub fn regs_mut(&mut self, t: ThreadRef) -> Option<&mut TrapFrame> {
        self.thread_mut(t).map(|th| &mut th.regs)
    }

    /// 修改线程状态并同步进程状态
    pub(crate) fn set_thread_state(&mut self, t: ThreadRef, state: ThreadState) {
        if let Some(p) = self.procs.get_mut(t.pid) {
            if let Some(th) = p.threads.get_mut(&t.tid) {
                th.state = state;
            }
            p.refresh_state();
        }
    }

    /// 分配页帧，耗尽时内核崩溃
    pub(crate) fn alloc_frames_or_die(&mut self, count: usize) -> PhysAddr {
        match self.machine.alloc_frames(count) {
            Some(base) => base,
            None => self.die(format_args!("out of physical frames (wanted {})", count)),
        }
    }

    pub(crate) fn alloc_kernel_stack(&mut self) -> KernelStack {
        let base = self.alloc_frames_or_die(KERNEL_STACK_PAGES);
        KernelStack { base, pages: KERNEL_STACK_PAGES }
    }

    pub(crate) fn alloc_sem_id(&mut self) -> u64 {
        let id = self.next_sem_id;
        self.next_sem_id += 1;
        id
    }

    /// 不可恢复的内核错误
    ///
    /// 关中断，打印当前 pid/tid/rip，然后 panic
    pub fn die(&mut self, args: fmt::Arguments) -> ! {
        self.machine.disable_interrupts();
        match self.current() {
            Some(t) => {
                let rip = self.regs(t).map_or(0, |r| r.rip);
                log::error!(
                    target: "sched",
                    "kernel panic: {} (pid {} tid {} rip {:#x})",
                    args, t.pid, t.tid, rip
                );
            }
            None => log::error!(target: "sched", "kernel panic: {} (no current thread)", args),
        }
        panic!("{}", args)
    }

    /// 时钟中断
    pub fn timer_tick(&mut self) {
        self.schedule();
    }

    /// 已运行的滴答数
    pub fn ticks(&self) -> u64 {
        self.sched.ticks()
    }
}
