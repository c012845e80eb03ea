//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 进程与线程控制块
//!
//! 对应 Linux 的 task_struct / signal_struct / mm_struct / files_struct，
//! 但拆成两层：`Process` 持有资源和在进程树中的位置，`Thread` 是调度单位。
//! 相互引用一律用 id（`Pid`/`ThreadRef`），不持有指针。

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use super::pid::{Pid, Tid};
use crate::arch::{phys_to_virt, TrapFrame};
use crate::config::PAGE_SIZE;
use crate::fs::FdTable;
use crate::mm::pagemap::TableRoot;
use crate::mm::vma::RegionList;
use crate::mm::{PhysAddr, VirtAddr};
use crate::signal::{SigNum, SigSet, SignalState};

/// 进程类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessType {
    Kernel,
    User,
}

/// 进程状态（由线程状态汇总）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked,
    Zombie,
}

/// 线程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// 可运行，在运行队列中
    Ready,
    /// 正在 CPU 上运行（同时仍在运行队列尾部）
    Running,
    /// 睡眠、等待信号量、等待子进程或阻塞 I/O
    Sleeping,
    /// 已退出，等待回收
    Zombie,
}

/// 线程句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadRef {
    pub pid: Pid,
    pub tid: Tid,
}

impl ThreadRef {
    pub const fn new(pid: Pid, tid: Tid) -> Self {
        Self { pid, tid }
    }
}

/// 等待队列的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WaitKey {
    /// 阻塞在某个 VFS 节点上的读
    Io(u64),
    /// 内核信号量
    Semaphore(u64),
}

/// 线程唯一的队列链接节点当前挂在哪里
///
/// 一个线程同一时刻最多在一个队列中
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueLink {
    Detached,
    RunQueue,
    SleepQueue,
    WaitQueue(WaitKey),
    /// 阻塞在 wait() 上，没有显式队列，由子进程退出时按 `wait` 请求查找
    ChildWait,
}

/// 阻塞中的 wait() 请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitRequest {
    /// 等待目标，编码同 waitpid 的 pid 参数
    pub target: i64,
    /// 用户空间状态指针，0 表示不需要
    pub status: VirtAddr,
}

/// 身份凭证
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub egid: u32,
}

/// 用户进程的地址空间
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryBlock {
    pub table: TableRoot,
    pub regions: RegionList,
    pub vdso: Option<VirtAddr>,
    /// 信号跳板地址，None 时带处理函数的信号一律按默认动作处理
    pub trampoline: Option<VirtAddr>,
}

impl MemoryBlock {
    pub fn new(table: TableRoot) -> Self {
        Self { table, regions: RegionList::new(), vdso: None, trampoline: None }
    }
}

/// 内核栈
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelStack {
    pub base: PhysAddr,
    pub pages: usize,
}

impl KernelStack {
    /// 栈顶（直接映射虚拟地址）
    pub fn top(&self) -> VirtAddr {
        phys_to_virt(self.base + (self.pages * PAGE_SIZE) as u64)
    }

    /// 陷入帧在栈顶下方的位置，即切换时保存的内核栈指针
    pub fn frame_pointer(&self) -> VirtAddr {
        self.top() - core::mem::size_of::<TrapFrame>() as u64
    }
}

/// 用户栈
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStack {
    pub base: VirtAddr,
    pub size: u64,
}

/// 线程控制块
#[derive(Debug, Clone)]
pub struct Thread {
    pub tid: Tid,
    pub state: ThreadState,
    pub kstack: KernelStack,
    /// 保存的内核栈指针
    pub kernel_sp: VirtAddr,
    pub ustack: Option<UserStack>,
    /// 陷入时保存的寄存器
    pub regs: TrapFrame,
    pub signal_mask: SigSet,
    /// 定向到本线程、尚未投递的信号
    pub pending: SigSet,
    /// 正在处理的信号，0 表示没有
    pub current_signal: SigNum,
    pub link: QueueLink,
    pub wait: Option<WaitRequest>,
}

impl Thread {
    pub fn new(tid: Tid, kstack: KernelStack) -> Self {
        Self {
            tid,
            state: ThreadState::Ready,
            kstack,
            kernel_sp: kstack.frame_pointer(),
            ustack: None,
            regs: TrapFrame::default(),
            signal_mask: SigSet::empty(),
            pending: SigSet::empty(),
            current_signal: 0,
            link: QueueLink::Detached,
            wait: None,
        }
    }

    #[inline]
    pub fn is_runnable(&self) -> bool {
        matches!(self.state, ThreadState::Ready | ThreadState::Running)
    }
}

/// 进程控制块
#[derive(Debug)]
pub struct Process {
    pub pid: Pid,
    pub name: String,
    pub ptype: ProcessType,
    pub state: ProcessState,
    pub exit_code: i32,
    /// 进程组 ID
    pub group: Pid,
    /// 会话 ID
    pub session: Pid,
    pub identity: Identity,
    pub threads: BTreeMap<Tid, Thread>,
    pub parent: Option<Pid>,
    pub children: Vec<Pid>,
    pub memory: Option<MemoryBlock>,
    pub files: Option<FdTable>,
    pub signals: SignalState,
}

impl Process {
    pub fn new(pid: Pid, name: &str, ptype: ProcessType, parent: Option<Pid>) -> Self {
        Self {
            pid,
            name: String::from(name),
            ptype,
            state: ProcessState::Ready,
            exit_code: 0,
            group: pid,
            session: pid,
            identity: Identity::default(),
            threads: BTreeMap::new(),
            parent,
            children: Vec::new(),
            memory: None,
            files: None,
            signals: SignalState::new(),
        }
    }

    #[inline]
    pub fn is_user(&self) -> bool {
        self.ptype == ProcessType::User
    }

    #[inline]
    pub fn is_zombie(&self) -> bool {
        self.state == ProcessState::Zombie
    }

    /// 下一个线程号：现有最大值加一
    pub fn next_tid(&self) -> Tid {
        self.threads.keys().next_back().map_or(0, |t| t + 1)
    }

    pub fn thread_refs(&self) -> Vec<ThreadRef> {
        self.threads.keys().map(|&tid| ThreadRef::new(self.pid, tid)).collect()
    }

    /// 根据线程状态重新计算进程状态，僵尸保持不变
    pub fn refresh_state(&mut self) {
        if self.is_zombie() {
            return;
        }
        let states = || self.threads.values().map(|t| t.state);
        self.state = if states().any(|s| s == ThreadState::Running) {
            ProcessState::Running
        } else if states().any(|s| s == ThreadState::Ready) {
            ProcessState::Ready
        } else {
            ProcessState::Blocked
        };
    }
}
