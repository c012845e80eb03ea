//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 进程终止与回收
//!
//! 对应 Linux 的 do_exit / release_task / forget_original_parent (kernel/exit.c)。
//! 释放资源 (`proc_free`) 与从进程树摘除 (`proc_destroy`) 分开：
//! 僵尸进程保留 PID 和树中位置，直到父进程取走退出码。

use alloc::vec::Vec;

use super::{Pid, ProcessState, QueueLink, ThreadRef, ThreadState, PID_INIT, PID_SWAPPER};
use crate::errno::{Errno, KResult};
use crate::kernel::Kernel;
use crate::signal::SIGCHLD;

impl Kernel {
    /// 线程退出：从所有队列摘除并变为僵尸
    pub fn proc_exit_thread(&mut self, t: ThreadRef) {
        self.sched_dequeue(t, true);
        if let Some(th) = self.thread_mut(t) {
            th.wait = None;
        }
        self.set_thread_state(t, ThreadState::Zombie);
    }

    /// 释放线程记录和内核栈
    ///
    /// 线程必须已经离开所有队列
    pub fn proc_reap_thread(&mut self, t: ThreadRef) {
        let link = match self.thread(t).map(|th| (th.link, th.state)) {
            Some((link, ThreadState::Zombie)) => link,
            Some((_, state)) => self.die(format_args!("reaping live thread {:?} ({:?})", t, state)),
            None => return,
        };
        if link != QueueLink::Detached {
            self.die(format_args!("reaping {:?} still linked on {:?}", t, link));
        }
        let Some(thread) = self.procs.get_mut(t.pid).and_then(|p| p.threads.remove(&t.tid)) else {
            return;
        };
        self.machine.free_frames(thread.kstack.base, thread.kstack.pages);
    }

    /// 释放地址空间和文件描述符
    pub fn proc_free(&mut self, pid: Pid) {
        let Some(process) = self.procs.get_mut(pid) else {
            return;
        };
        let memory = process.memory.take();
        process.files = None;
        process.signals.pending = Default::default();
        if let Some(memory) = memory {
            self.machine.free_table(memory.table);
        }
    }

    /// 从进程树中删除进程，PID 不再可见
    pub fn proc_destroy(&mut self, pid: Pid) {
        self.procs.unlink_child(pid);
        if let Some(p) = self.procs.remove(pid) {
            log::trace!(target: "proc", "destroyed pid {} ({})", pid, p.name);
        }
    }

    /// 把 `pid` 的子进程全部交给 init
    fn reparent_children(&mut self, pid: Pid) {
        let children: Vec<Pid> = match self.procs.get_mut(pid) {
            Some(p) => core::mem::take(&mut p.children),
            None => return,
        };
        let has_init = self.procs.contains(PID_INIT);
        for child in children {
            if let Some(c) = self.procs.get_mut(child) {
                c.parent = None;
            }
            if !has_init {
                if self.procs.get(child).map_or(false, |c| c.is_zombie()) {
                    self.proc_destroy(child);
                }
                continue;
            }
            self.procs.link_child(PID_INIT, child);
            log::debug!(target: "proc", "pid {} reparented to init", child);
            let zombie = self.procs.get(child).map_or(false, |c| c.is_zombie());
            if zombie {
                if let Some(waiter) = self.find_waiting_thread(PID_INIT, child) {
                    self.proc_wait_wake(waiter, child);
                }
            }
        }
    }

    /// 终止进程
    ///
    /// 杀死所有线程、释放资源、把子进程交给 init、通知父进程。
    /// 父进程已有线程阻塞在匹配的 wait 上时，僵尸立即被回收
    pub fn proc_terminate(&mut self, pid: Pid, exit_code: i32) -> KResult<()> {
        if pid == PID_SWAPPER {
            return Err(Errno::OperationNotPermitted);
        }
        let state = self.procs.get(pid).map(|p| p.state).ok_or(Errno::NoSuchProcess)?;
        if state == ProcessState::Zombie {
            return Err(Errno::InvalidArgument);
        }
        if pid == PID_INIT {
            self.die(format_args!("init terminated with code {}", exit_code));
        }

        let threads = self.procs.get(pid).map(|p| p.thread_refs()).unwrap_or_default();
        for t in threads {
            self.proc_exit_thread(t);
            self.proc_reap_thread(t);
        }
        self.proc_free(pid);

        let parent = match self.procs.get_mut(pid) {
            Some(p) => {
                p.state = ProcessState::Zombie;
                p.exit_code = exit_code;
                log::info!(target: "proc", "pid {} ({}) exited with code {}", pid, p.name, exit_code);
                p.parent
            }
            None => return Ok(()),
        };

        self.reparent_children(pid);

        match parent {
            Some(parent) => {
                // SIGCHLD 的结果不影响终止流程
                let _ = self.signal_send(parent, None, SIGCHLD);
                if let Some(waiter) = self.find_waiting_thread(parent, pid) {
                    self.proc_wait_wake(waiter, pid);
                }
            }
            // 没有父进程就没有人回收
            None => self.proc_destroy(pid),
        }
        Ok(())
    }
}
