//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!

//! 调度器模块
//!
//! 单 CPU 的时间片轮转调度：
//! - 运行队列: FIFO，被选中的线程出队后立即重新排到队尾
//! - 睡眠队列: 每个滴答递减剩余时间，最早到期的优先唤醒
//! - 空闲线程: 运行队列为空时运行，只执行 halt
//! - 调度入口: timer_tick() -> schedule() -> scheduler_switch() -> context_switch()

pub mod sched;

pub use sched::{RunQueue, Scheduler, SleepEntry, SleepQueue};
