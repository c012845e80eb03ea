//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!

//! 信号处理机制
//!
//! 参考 Linux 内核的信号设计 (kernel/signal.c, include/linux/signal.h)
//!
//! 核心概念：
//! - 处理动作按进程保存，掩码按线程保存
//! - 待处理信号是进程上的 128 位位图，编号越小优先级越高
//! - 默认动作只有终止和忽略两种；终止在发送者的上下文中同步完成
//! - 有处理函数的信号通过用户栈上的 `SignalFrame` 进入处理函数，
//!   经 vdso 中的跳板调用 sigreturn 返回

pub mod delivery;
pub mod frame;

use crate::mm::VirtAddr;

/// 信号编号
pub type SigNum = u32;

/// 信号编号上界（有效编号 1..NSIG）
pub const NSIG: usize = 128;

pub const SIGHUP: SigNum = 1;
pub const SIGINT: SigNum = 2;
pub const SIGQUIT: SigNum = 3;
pub const SIGILL: SigNum = 4;
pub const SIGTRAP: SigNum = 5;
pub const SIGABRT: SigNum = 6;
pub const SIGBUS: SigNum = 7;
pub const SIGFPE: SigNum = 8;
/// 不可捕获、不可屏蔽
pub const SIGKILL: SigNum = 9;
pub const SIGUSR1: SigNum = 10;
pub const SIGSEGV: SigNum = 11;
pub const SIGUSR2: SigNum = 12;
pub const SIGPIPE: SigNum = 13;
pub const SIGALRM: SigNum = 14;
pub const SIGTERM: SigNum = 15;
pub const SIGSTKFLT: SigNum = 16;
pub const SIGCHLD: SigNum = 17;
pub const SIGCONT: SigNum = 18;
pub const SIGSTOP: SigNum = 19;
pub const SIGTSTP: SigNum = 20;
pub const SIGTTIN: SigNum = 21;
pub const SIGTTOU: SigNum = 22;
pub const SIGURG: SigNum = 23;
pub const SIGXCPU: SigNum = 24;
pub const SIGXFSZ: SigNum = 25;
pub const SIGVTALRM: SigNum = 26;
pub const SIGPROF: SigNum = 27;
pub const SIGWINCH: SigNum = 28;
pub const SIGIO: SigNum = 29;
pub const SIGPWR: SigNum = 30;
pub const SIGSYS: SigNum = 31;

/// 被信号杀死的进程退出码 = 基数 + 信号编号
pub const EXIT_SIGNAL_BASE: i32 = 127;

/// 用户态 signal() 的特殊处理函数值
pub const SIG_DFL: u64 = 0;
pub const SIG_IGN: u64 = 1;

#[inline]
pub fn is_valid(sig: SigNum) -> bool {
    sig >= 1 && (sig as usize) < NSIG
}

/// 信号处理动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigAction {
    Default,
    Ignore,
    Handler(VirtAddr),
}

impl SigAction {
    pub fn from_user(handler: u64) -> Self {
        match handler {
            SIG_DFL => SigAction::Default,
            SIG_IGN => SigAction::Ignore,
            addr => SigAction::Handler(addr),
        }
    }

    pub fn to_user(self) -> u64 {
        match self {
            SigAction::Default => SIG_DFL,
            SigAction::Ignore => SIG_IGN,
            SigAction::Handler(addr) => addr,
        }
    }
}

/// 默认动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    Terminate,
    Ignore,
}

/// 默认动作表
///
/// 没有作业控制，停止类信号按忽略处理
pub fn default_action(sig: SigNum) -> DefaultAction {
    match sig {
        SIGCHLD | SIGCONT | SIGURG | SIGWINCH => DefaultAction::Ignore,
        SIGSTOP | SIGTSTP | SIGTTIN | SIGTTOU => DefaultAction::Ignore,
        _ => DefaultAction::Terminate,
    }
}

/// 128 位信号集合，第 n 位对应信号 n
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SigSet(pub u128);

impl SigSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    fn bit(sig: SigNum) -> u128 {
        if is_valid(sig) {
            1u128 << sig
        } else {
            0
        }
    }

    pub fn add(&mut self, sig: SigNum) {
        self.0 |= Self::bit(sig);
    }

    pub fn remove(&mut self, sig: SigNum) {
        self.0 &= !Self::bit(sig);
    }

    pub fn contains(&self, sig: SigNum) -> bool {
        self.0 & Self::bit(sig) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// 编号最小的信号
    pub fn lowest(&self) -> Option<SigNum> {
        (self.0 != 0).then(|| self.0.trailing_zeros())
    }

    /// 低 64 位 / 高 64 位，用于写入信号帧
    pub fn split(&self) -> (u64, u64) {
        (self.0 as u64, (self.0 >> 64) as u64)
    }

    pub fn join(lo: u64, hi: u64) -> Self {
        Self((lo as u128) | ((hi as u128) << 64))
    }
}

/// 进程的信号状态
#[derive(Debug, Clone, PartialEq)]
pub struct SignalState {
    pub pending: SigSet,
    handlers: [SigAction; NSIG],
}

impl SignalState {
    pub fn new() -> Self {
        Self { pending: SigSet::empty(), handlers: [SigAction::Default; NSIG] }
    }

    pub fn handler(&self, sig: SigNum) -> SigAction {
        if is_valid(sig) {
            self.handlers[sig as usize]
        } else {
            SigAction::Default
        }
    }

    /// 设置处理动作，返回旧动作；SIGKILL 不可改变
    pub fn set_handler(&mut self, sig: SigNum, action: SigAction) -> Option<SigAction> {
        if !is_valid(sig) || sig == SIGKILL {
            return None;
        }
        Some(core::mem::replace(&mut self.handlers[sig as usize], action))
    }

    /// exec 后被捕获的信号恢复默认，忽略的保持忽略
    pub fn reset_caught(&mut self) {
        for h in self.handlers.iter_mut() {
            if matches!(h, SigAction::Handler(_)) {
                *h = SigAction::Default;
            }
        }
    }

    /// fork 时复制处理动作，待处理信号不继承
    pub fn fork_copy(&self) -> Self {
        Self { pending: SigSet::empty(), handlers: self.handlers }
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

/// `signal_send` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// 被忽略或被目标线程屏蔽
    Ignored,
    /// 目标进程已被终止
    Terminated,
    /// 目标线程已切入处理函数
    Delivered,
    /// 已标记为进程的待处理信号
    Pending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigset_lowest_first() {
        let mut set = SigSet::empty();
        set.add(SIGTERM);
        set.add(SIGUSR1);
        set.add(100);
        assert_eq!(set.lowest(), Some(SIGUSR1));
        set.remove(SIGUSR1);
        assert_eq!(set.lowest(), Some(SIGTERM));
        set.add(0);
        set.add(128);
        assert!(!set.contains(0) && !set.contains(128));
        let (lo, hi) = set.split();
        assert_eq!(SigSet::join(lo, hi), set);
    }

    #[test]
    fn test_sigkill_handler_cannot_change() {
        let mut state = SignalState::new();
        assert_eq!(state.set_handler(SIGKILL, SigAction::Ignore), None);
        assert_eq!(state.set_handler(SIGINT, SigAction::Handler(0x1000)), Some(SigAction::Default));
        state.set_handler(SIGTERM, SigAction::Ignore);
        state.reset_caught();
        assert_eq!(state.handler(SIGINT), SigAction::Default);
        assert_eq!(state.handler(SIGTERM), SigAction::Ignore);
    }

    #[test]
    fn test_default_actions() {
        assert_eq!(default_action(SIGCHLD), DefaultAction::Ignore);
        assert_eq!(default_action(SIGSEGV), DefaultAction::Terminate);
        assert_eq!(default_action(64), DefaultAction::Terminate);
    }
}
