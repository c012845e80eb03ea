//! 进程管理模块
//!
//! 进程模型参考 Linux：
//! - `task`: 进程/线程控制块
//! - `pid`: PID 分配
//! - `create`: 创建进程、线程和内核进程
//! - `fork`: 复制进程 (kernel/fork.c)
//! - `exec`: 加载 ELF 映像 (fs/exec.c)
//! - `exit`: 终止、回收和托孤 (kernel/exit.c)
//! - `wait`: 等待队列与 wait/waitpid
//!
//! 所有进程存放在 `ProcessTable` 中，以 PID 为键；父子关系、线程归属都是 id。

pub mod create;
pub mod exec;
pub mod exit;
pub mod fork;
pub mod pid;
pub mod task;
pub mod wait;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

pub use pid::{Pid, Tid, PID_INIT, PID_SWAPPER};
pub use task::{
    Identity, MemoryBlock, Process, ProcessState, ProcessType, QueueLink, Thread, ThreadRef,
    ThreadState, WaitKey, WaitRequest,
};

use pid::PidAllocator;

/// 进程表
#[derive(Debug, Default)]
pub struct ProcessTable {
    procs: BTreeMap<Pid, Process>,
    pids: PidAllocator,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self { procs: BTreeMap::new(), pids: PidAllocator::new() }
    }

    pub fn alloc_pid(&mut self) -> Option<Pid> {
        self.pids.alloc()
    }

    pub fn insert(&mut self, process: Process) {
        self.procs.insert(process.pid, process);
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Process> {
        self.procs.remove(&pid)
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.procs.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.procs.get_mut(&pid)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.procs.contains_key(&pid)
    }

    pub fn thread(&self, t: ThreadRef) -> Option<&Thread> {
        self.procs.get(&t.pid)?.threads.get(&t.tid)
    }

    pub fn thread_mut(&mut self, t: ThreadRef) -> Option<&mut Thread> {
        self.procs.get_mut(&t.pid)?.threads.get_mut(&t.tid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.procs.values()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.procs.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn parent_of(&self, pid: Pid) -> Option<Pid> {
        self.procs.get(&pid)?.parent
    }

    /// `pid` 是否是 `ancestor` 的后代（不含自身）
    pub fn is_descendant(&self, ancestor: Pid, pid: Pid) -> bool {
        let mut cursor = self.parent_of(pid);
        // 树无环，深度不超过进程数
        let mut budget = self.procs.len();
        while let Some(p) = cursor {
            if p == ancestor {
                return true;
            }
            if budget == 0 {
                break;
            }
            budget -= 1;
            cursor = self.parent_of(p);
        }
        false
    }

    /// 把 `child` 挂到 `parent` 下
    pub fn link_child(&mut self, parent: Pid, child: Pid) {
        if let Some(c) = self.procs.get_mut(&child) {
            c.parent = Some(parent);
        }
        if let Some(p) = self.procs.get_mut(&parent) {
            if !p.children.contains(&child) {
                p.children.push(child);
            }
        }
    }

    /// 从父进程的子进程列表中摘除
    pub fn unlink_child(&mut self, child: Pid) {
        if let Some(parent) = self.parent_of(child) {
            if let Some(p) = self.procs.get_mut(&parent) {
                p.children.retain(|&c| c != child);
            }
        }
        if let Some(c) = self.procs.get_mut(&child) {
            c.parent = None;
        }
    }
}
