//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 信号量 (Semaphore) 机制
//!
//! 参考 Linux 内核 `kernel/locking/semaphore.c`：
//! - P 操作 (down): 获取信号量，可能阻塞
//! - V 操作 (up): 释放信号量，唤醒等待的线程
//!
//! 两条路径：
//! - `Semaphore::down` 忙等，不经过调度器，可在任何上下文使用
//! - `Kernel::sem_down` 把线程挂到信号量的等待队列上；`Kernel::sem_up`
//!   直接把计数交给队首等待者，被唤醒的线程不需要再竞争

use core::hint::spin_loop;
use core::sync::atomic::{AtomicI64, Ordering};

use crate::kernel::Kernel;
use crate::process::{ThreadRef, WaitKey};

/// 计数信号量
#[derive(Debug)]
pub struct Semaphore {
    id: u64,
    count: AtomicI64,
}

impl Semaphore {
    /// `id` 是等待队列的键，由 `Kernel::sem_create` 分配
    pub const fn new(id: u64, value: i64) -> Self {
        Self { id, count: AtomicI64::new(value) }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    /// 非阻塞 P 操作
    pub fn try_down(&self) -> bool {
        let mut cur = self.count.load(Ordering::Acquire);
        while cur > 0 {
            match self.count.compare_exchange_weak(cur, cur - 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
        false
    }

    /// P 操作（忙等）
    ///
    /// 计数为 0 时原地自旋直到其他上下文执行 `up`
    pub fn down(&self) {
        while !self.try_down() {
            spin_loop();
        }
    }

    /// V 操作
    pub fn up(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn key(&self) -> WaitKey {
        WaitKey::Semaphore(self.id)
    }
}

/// `Kernel::sem_down` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemDown {
    /// 立即获得
    Acquired,
    /// 线程已阻塞，被唤醒时即已持有信号量
    Blocked,
}

impl Kernel {
    pub fn sem_create(&mut self, value: i64) -> Semaphore {
        Semaphore::new(self.alloc_sem_id(), value)
    }

    /// 调度器感知的 P 操作
    pub fn sem_down(&mut self, sem: &Semaphore, t: ThreadRef) -> SemDown {
        if sem.try_down() {
            return SemDown::Acquired;
        }
        self.wait_queue_block(t, sem.key());
        log::trace!(target: "sched", "{:?} blocked on semaphore {}", t, sem.id);
        SemDown::Blocked
    }

    /// V 操作：有等待者时把计数直接交给队首线程
    pub fn sem_up(&mut self, sem: &Semaphore) -> Option<ThreadRef> {
        match self.wake_one(sem.key()) {
            Some(t) => Some(t),
            None => {
                sem.up();
                None
            }
        }
    }
}
