//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 内核集成测试
//!
//! 在宿主机平台上启动完整的内核实例，以“用户线程发起系统调用”的方式驱动：
//! 切换到目标线程，写入陷入帧，调用 `syscall_entry`。

pub mod util;

mod boundary;
mod scheduler;
mod user_syscall;
