//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!

//! 调度器实现
//!
//! 参考 Linux 内核的调度入口 (kernel/sched/core.c)：
//! schedule() -> pick_next_task() -> context_switch()
//!
//! 运行队列和睡眠队列由自旋锁保护，中断处理程序可以随时入队/出队，
//! 临界区只包含 O(1) 的队列操作，绝不跨越阻塞点。

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config::{TICK_HZ, TIME_SLICE_TICKS};
use crate::kernel::Kernel;
use crate::process::{QueueLink, ThreadRef, ThreadState};

/// 运行队列
#[derive(Debug, Default)]
pub struct RunQueue {
    queue: VecDeque<ThreadRef>,
}

impl RunQueue {
    pub fn push_back(&mut self, t: ThreadRef) {
        self.queue.push_back(t);
    }

    pub fn pop_front(&mut self) -> Option<ThreadRef> {
        self.queue.pop_front()
    }

    pub fn remove(&mut self, t: ThreadRef) -> bool {
        match self.queue.iter().position(|&x| x == t) {
            Some(i) => {
                self.queue.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, t: ThreadRef) -> bool {
        self.queue.contains(&t)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ThreadRef> {
        self.queue.iter().copied().collect()
    }
}

/// 睡眠队列项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepEntry {
    pub thread: ThreadRef,
    /// 剩余滴答数，到期后可能为负
    pub time_left: i64,
}

#[derive(Debug, Default)]
pub struct SleepQueue {
    entries: Vec<SleepEntry>,
}

impl SleepQueue {
    pub fn push(&mut self, thread: ThreadRef, ticks: i64) {
        self.entries.push(SleepEntry { thread, time_left: ticks });
    }

    /// 所有项递减一个滴答，取出超时最久的一项（相同时取队列中靠前的）
    pub fn tick(&mut self) -> Option<ThreadRef> {
        for e in self.entries.iter_mut() {
            e.time_left -= 1;
        }
        let mut best: Option<usize> = None;
        for (i, e) in self.entries.iter().enumerate() {
            if e.time_left <= 0 && best.map_or(true, |b| e.time_left < self.entries[b].time_left) {
                best = Some(i);
            }
        }
        best.map(|i| self.entries.remove(i).thread)
    }

    pub fn remove(&mut self, t: ThreadRef) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.thread != t);
        self.entries.len() != before
    }

    pub fn contains(&self, t: ThreadRef) -> bool {
        self.entries.iter().any(|e| e.thread == t)
    }

    pub fn time_left(&self, t: ThreadRef) -> Option<i64> {
        self.entries.iter().find(|e| e.thread == t).map(|e| e.time_left)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 单 CPU 调度器状态
pub struct Scheduler {
    pub run_queue: Mutex<RunQueue>,
    pub sleep_queue: Mutex<SleepQueue>,
    current: Option<ThreadRef>,
    idle: ThreadRef,
    slice_left: i64,
    ticks: u64,
}

impl Scheduler {
    pub fn new(idle: ThreadRef) -> Self {
        Self {
            run_queue: Mutex::new(RunQueue::default()),
            sleep_queue: Mutex::new(SleepQueue::default()),
            current: Some(idle),
            idle,
            slice_left: TIME_SLICE_TICKS,
            ticks: 0,
        }
    }

    #[inline]
    pub fn current(&self) -> Option<ThreadRef> {
        self.current
    }

    #[inline]
    pub fn idle(&self) -> ThreadRef {
        self.idle
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// 毫秒换算为滴答，至少一个
pub fn ms_to_ticks(ms: u64) -> i64 {
    let ticks = ms.saturating_mul(TICK_HZ).div_ceil(1000);
    ticks.clamp(1, i64::MAX as u64) as i64
}

impl Kernel {
    /// 加入运行队列尾部
    ///
    /// 线程的链接节点必须空闲，否则说明它同时挂在两个队列上
    pub fn sched_enqueue(&mut self, t: ThreadRef) {
        let link = match self.thread(t).map(|th| th.link) {
            Some(link) => link,
            None => self.die(format_args!("enqueue of missing thread {:?}", t)),
        };
        if link != QueueLink::Detached {
            self.die(format_args!("thread {:?} already linked on {:?}", t, link));
        }
        self.sched.run_queue.lock().push_back(t);
        if let Some(th) = self.thread_mut(t) {
            th.link = QueueLink::RunQueue;
        }
        self.set_thread_state(t, ThreadState::Ready);
    }

    /// 从线程当前所在的队列中摘除
    ///
    /// 可在中断上下文调用；`remove_from_current` 时若它是当前线程则清除当前线程，
    /// 下一次调度会选择新线程
    pub fn sched_dequeue(&mut self, t: ThreadRef, remove_from_current: bool) {
        let link = match self.thread(t) {
            Some(th) => th.link,
            None => return,
        };
        match link {
            QueueLink::Detached | QueueLink::ChildWait => {}
            QueueLink::RunQueue => {
                self.sched.run_queue.lock().remove(t);
            }
            QueueLink::SleepQueue => {
                self.sched.sleep_queue.lock().remove(t);
            }
            QueueLink::WaitQueue(key) => {
                if let Some(q) = self.wait_queues.get_mut(&key) {
                    q.remove(t);
                }
            }
        }
        if let Some(th) = self.thread_mut(t) {
            th.link = QueueLink::Detached;
        }
        if remove_from_current && self.sched.current == Some(t) {
            self.sched.current = None;
        }
    }

    /// 睡眠 `ms` 毫秒
    pub fn scheduler_sleep(&mut self, t: ThreadRef, ms: u64) {
        let ticks = ms_to_ticks(ms);
        self.sched_dequeue(t, true);
        self.sched.sleep_queue.lock().push(t, ticks);
        if let Some(th) = self.thread_mut(t) {
            th.link = QueueLink::SleepQueue;
        }
        self.set_thread_state(t, ThreadState::Sleeping);
        log::trace!(target: "sched", "{:?} sleeps {} ticks", t, ticks);
    }

    /// 把阻塞中的线程提前放回运行队列
    pub fn sched_wake(&mut self, t: ThreadRef) {
        match self.thread(t) {
            Some(th) if th.state == ThreadState::Sleeping => {}
            _ => return,
        }
        self.sched_dequeue(t, false);
        self.sched_enqueue(t);
    }

    /// 弹出下一个可运行线程并重新排到队尾
    ///
    /// 既不是 READY 也不是 RUNNING 的残留项直接丢弃
    fn pick_next(&mut self) -> Option<ThreadRef> {
        loop {
            let t = self.sched.run_queue.lock().pop_front()?;
            match self.thread(t).map(|th| th.is_runnable()) {
                Some(true) => {
                    self.sched.run_queue.lock().push_back(t);
                    return Some(t);
                }
                Some(false) => {
                    log::debug!(target: "sched", "dropping stale run queue entry {:?}", t);
                    if let Some(th) = self.thread_mut(t) {
                        if th.link == QueueLink::RunQueue {
                            th.link = QueueLink::Detached;
                        }
                    }
                }
                None => {}
            }
        }
    }

    /// 时钟驱动的调度
    pub fn schedule(&mut self) {
        self.sched.ticks += 1;

        let woken = self.sched.sleep_queue.lock().tick();
        let next = match woken {
            Some(t) => {
                if let Some(th) = self.thread_mut(t) {
                    th.link = QueueLink::Detached;
                }
                self.sched_enqueue(t);
                log::trace!(target: "sched", "{:?} woken by timer", t);
                Some(t)
            }
            None => {
                self.sched.slice_left -= 1;
                let keep = match self.sched.current {
                    Some(c) if c != self.sched.idle => {
                        self.sched.slice_left > 0
                            && self.thread(c).map_or(false, |th| th.is_runnable())
                    }
                    _ => false,
                };
                if keep {
                    return;
                }
                self.pick_next()
            }
        };
        self.sched.slice_left = TIME_SLICE_TICKS;
        let next = next.unwrap_or(self.sched.idle);
        self.scheduler_switch(next);
    }

    /// 不计时间片的主动调度（阻塞、退出之后）
    pub fn reschedule(&mut self) {
        let next = self.pick_next().unwrap_or(self.sched.idle);
        self.sched.slice_left = TIME_SLICE_TICKS;
        self.scheduler_switch(next);
    }

    /// 切换到 `next`
    ///
    /// 切换点就是信号投递点：新线程的待处理信号在这里消费，若因此被终止
    /// 则重新挑选
    pub fn scheduler_switch(&mut self, mut next: ThreadRef) {
        let idle = self.sched.idle;
        loop {
            if let Some(prev) = self.sched.current {
                if prev != next && self.thread(prev).map(|th| th.state) == Some(ThreadState::Running) {
                    self.set_thread_state(prev, ThreadState::Ready);
                }
            }
            if self.thread(next).map(|th| th.state) == Some(ThreadState::Ready) {
                self.set_thread_state(next, ThreadState::Running);
            }
            self.sched.current = Some(next);

            if next != idle {
                self.signal_deliver_pending(next);
            }
            if self.thread(next).map(|th| th.state) == Some(ThreadState::Running) {
                break;
            }
            next = self.pick_next().unwrap_or(idle);
        }

        let Some(process) = self.procs.get(next.pid) else {
            return;
        };
        let Some(thread) = process.threads.get(&next.tid) else {
            return;
        };
        let kernel_sp = thread.kernel_sp;
        let kstack_top = thread.kstack.top();
        let table = process.memory.as_ref().map(|m| m.table);
        if process.is_user() {
            self.machine.set_kernel_stack(kstack_top);
            if let Some(table) = table {
                self.machine.load_table(table);
            }
        }
        self.machine.context_switch(kernel_sp);
    }

    /// 空闲循环的一次迭代
    pub fn idle_once(&mut self) {
        self.machine.halt();
    }
}
