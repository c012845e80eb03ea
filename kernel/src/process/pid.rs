//! PID 管理
//!
//! 参考 Linux 内核的 PID 管理机制 (kernel/pid.c)
//!
//! PID 空间：
//! - PID 0: swapper/idle 进程
//! - PID 1: init 进程
//! - PID 2+: 普通 PID
//!
//! 分配器单调递增，同一次启动内 PID 永不复用。

/// 进程号
pub type Pid = u32;
/// 线程号（进程内唯一）
pub type Tid = u32;

/// 特殊 PID 定义
pub const PID_SWAPPER: Pid = 0; // idle 进程
pub const PID_INIT: Pid = 1; // init 进程

/// 每个内核实例一个分配器
#[derive(Debug)]
pub struct PidAllocator {
    next: Pid,
}

impl PidAllocator {
    pub const fn new() -> Self {
        Self { next: PID_INIT }
    }

    /// 分配下一个 PID
    ///
    /// 对应 Linux 内核的 alloc_pid()
    pub fn alloc(&mut self) -> Option<Pid> {
        let pid = self.next;
        self.next = self.next.checked_add(1)?;
        Some(pid)
    }

    /// 下一个将被分配的 PID
    pub fn peek(&self) -> Pid {
        self.next
    }
}

impl Default for PidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_monotonic() {
        let mut a = PidAllocator::new();
        assert_eq!(a.alloc(), Some(PID_INIT));
        assert_eq!(a.alloc(), Some(2));
        assert_eq!(a.peek(), 3);
    }
}
