//! 等待队列 (Wait Queue) 与 wait/waitpid
//!
//! 参考 Linux 的等待队列 (kernel/sched/wait.c) 和 do_wait (kernel/exit.c)：
//! - 线程需要等待某个条件时，从运行队列摘下并挂入等待队列
//! - 条件满足时由另一个上下文（中断、信号量、子进程退出）唤醒
//!
//! 阻塞的 wait() 不挂在任何队列上，而是把 (目标, 状态指针) 记在线程上，
//! 子进程终止时由 `proc_wait_wake` 解析。

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::{Pid, Process, QueueLink, ThreadRef, ThreadState, WaitKey, WaitRequest};
use crate::errno::{Errno, KResult};
use crate::kernel::Kernel;
use crate::mm::uaccess::{check_user_range, copy_to_user};
use crate::mm::VirtAddr;

/// waitpid 选项：没有已退出的子进程时立即返回 0
pub const WNOHANG: u64 = 1;

/// 等待队列
///
/// 对应 Linux 的 wait_queue_head_t，FIFO 唤醒
#[derive(Debug, Default)]
pub struct WaitQueue {
    waiters: VecDeque<ThreadRef>,
}

impl WaitQueue {
    pub fn push(&mut self, t: ThreadRef) {
        self.waiters.push_back(t);
    }

    pub fn pop(&mut self) -> Option<ThreadRef> {
        self.waiters.pop_front()
    }

    pub fn remove(&mut self, t: ThreadRef) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|&w| w != t);
        before != self.waiters.len()
    }

    pub fn contains(&self, t: ThreadRef) -> bool {
        self.waiters.contains(&t)
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// wait 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// 回收了一个僵尸子进程
    Reaped(Pid),
    /// WNOHANG 且还没有子进程退出
    NoneExited,
    /// 调用线程已阻塞，稍后由 `proc_wait_wake` 填写返回值
    Blocked,
}

/// `child` 是否满足 `waiter` 的等待目标
///
/// target: -1 任意子进程，>0 指定 PID，0 同组，<-1 组 -target
fn wait_target_matches(waiter: &Process, target: i64, child: &Process) -> bool {
    if child.parent != Some(waiter.pid) {
        return false;
    }
    match target {
        -1 => true,
        t if t > 0 => child.pid as i64 == t,
        0 => child.group == waiter.group,
        t => t.checked_neg() == Some(child.group as i64),
    }
}

impl Kernel {
    /// 挂入等待队列并让出 CPU
    pub fn wait_queue_block(&mut self, t: ThreadRef, key: WaitKey) {
        self.sched_dequeue(t, true);
        self.wait_queues.entry(key).or_default().push(t);
        if let Some(th) = self.thread_mut(t) {
            th.link = QueueLink::WaitQueue(key);
        }
        self.set_thread_state(t, ThreadState::Sleeping);
    }

    /// 唤醒队首的一个等待者
    pub fn wake_one(&mut self, key: WaitKey) -> Option<ThreadRef> {
        let t = self.wait_queues.get_mut(&key)?.pop()?;
        if let Some(th) = self.thread_mut(t) {
            th.link = QueueLink::Detached;
        }
        self.sched_enqueue(t);
        Some(t)
    }

    /// 唤醒全部等待者，返回唤醒数
    pub fn wake_all(&mut self, key: WaitKey) -> usize {
        let mut n = 0;
        while self.wake_one(key).is_some() {
            n += 1;
        }
        self.wait_queues.remove(&key);
        n
    }

    /// 设备有数据可读：唤醒阻塞在节点上的线程，它们会重新执行 read
    pub fn wake_io(&mut self, node_id: u64) -> usize {
        self.wake_all(WaitKey::Io(node_id))
    }

    /// `parent` 中正在等待 `child` 的线程
    pub(crate) fn find_waiting_thread(&self, parent: Pid, child: Pid) -> Option<ThreadRef> {
        let waiter = self.procs.get(parent)?;
        let child = self.procs.get(child)?;
        waiter
            .threads
            .values()
            .find(|th| {
                th.state == ThreadState::Sleeping
                    && th
                        .wait
                        .map_or(false, |req| wait_target_matches(waiter, req.target, child))
            })
            .map(|th| ThreadRef::new(parent, th.tid))
    }

    /// 把退出状态写入 `pid` 的地址空间
    fn write_exit_status(&mut self, pid: Pid, status: VirtAddr, code: i32) -> KResult<()> {
        if status == 0 {
            return Ok(());
        }
        let table = self
            .procs
            .get(pid)
            .and_then(|p| p.memory.as_ref())
            .map(|m| m.table)
            .ok_or(Errno::BadAddress)?;
        copy_to_user(&mut *self.machine, table, status, &code.to_le_bytes())
    }

    /// wait/waitpid
    pub fn proc_wait(
        &mut self,
        t: ThreadRef,
        target: i64,
        status: VirtAddr,
        options: u64,
    ) -> KResult<WaitOutcome> {
        let waiter = self.procs.get(t.pid).ok_or(Errno::NoSuchProcess)?;
        let matching: Vec<(Pid, bool, i32)> = waiter
            .children
            .iter()
            .filter_map(|&c| self.procs.get(c))
            .filter(|c| wait_target_matches(waiter, target, c))
            .map(|c| (c.pid, c.is_zombie(), c.exit_code))
            .collect();
        if matching.is_empty() {
            return Err(Errno::NoChild);
        }

        if let Some(&(child, _, code)) = matching.iter().find(|(_, zombie, _)| *zombie) {
            self.write_exit_status(t.pid, status, code)?;
            self.proc_destroy(child);
            log::debug!(target: "proc", "pid {} reaped {} (status {})", t.pid, child, code);
            return Ok(WaitOutcome::Reaped(child));
        }

        if options & WNOHANG != 0 {
            return Ok(WaitOutcome::NoneExited);
        }

        // 子进程退出时父进程的地址空间不一定是当前页表，先确认指针可写
        if status != 0 {
            let table = self
                .procs
                .get(t.pid)
                .and_then(|p| p.memory.as_ref())
                .map(|m| m.table)
                .ok_or(Errno::BadAddress)?;
            check_user_range(&*self.machine, table, status, 4, true)?;
        }

        self.sched_dequeue(t, true);
        if let Some(th) = self.thread_mut(t) {
            th.wait = Some(WaitRequest { target, status });
            th.link = QueueLink::ChildWait;
        }
        self.set_thread_state(t, ThreadState::Sleeping);
        Ok(WaitOutcome::Blocked)
    }

    /// 子进程 `child` 已终止：完成 `waiter` 阻塞中的 wait 并回收子进程
    pub fn proc_wait_wake(&mut self, waiter: ThreadRef, child: Pid) {
        let request = match self.thread(waiter).and_then(|th| th.wait) {
            Some(req) => req,
            None => self.die(format_args!("{:?} woken for pid {} but not waiting", waiter, child)),
        };
        let code = self.procs.get(child).map_or(0, |c| c.exit_code);
        if let Err(e) = self.write_exit_status(waiter.pid, request.status, code) {
            log::warn!(target: "proc", "wait status write for pid {} failed: {}", waiter.pid, e);
        }
        if let Some(th) = self.thread_mut(waiter) {
            th.wait = None;
            th.link = QueueLink::Detached;
            th.regs.rax = child as u64;
        }
        self.sched_enqueue(waiter);
        self.proc_destroy(child);
        log::debug!(target: "proc", "{:?} woke on exit of {} (status {})", waiter, child, code);
    }
}
