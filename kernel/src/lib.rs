//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!

//! Tachyon 进程/线程调度与执行控制核心
//!
//! 模块划分（由叶到根）：
//! - `process`: 进程/线程存储与进程树 (fork/exit/wait/exec)
//! - `sched`: 单 CPU 运行队列、睡眠队列与时间片轮转
//! - `signal`: 待处理位图、处置表、用户态信号帧
//! - `mm`: 地址空间区域管理 (mmap / 缺页)
//! - `syscall`: 系统调用分发与参数校验
//!
//! 硬件相关的协作者（页表、物理页帧、上下文切换）通过 `arch::Machine` 抽象，
//! 文件系统通过 `fs::Vfs` 抽象。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod errno;
pub mod fs;
pub mod kernel;
pub mod logger;
pub mod mm;
pub mod process;
pub mod sched;
pub mod signal;
pub mod sync;
pub mod syscall;

#[cfg(test)]
mod tests;

pub use kernel::Kernel;
