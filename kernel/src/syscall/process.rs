//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 进程相关系统调用

use alloc::string::String;
use alloc::vec::Vec;

use super::{SysRet, SyscallResult, PATH_MAX};
use crate::errno::{Errno, KResult};
use crate::kernel::Kernel;
use crate::mm::uaccess::{read_user_cstr, read_user_strv};
use crate::mm::VirtAddr;
use crate::process::exec::ARG_MAX;
use crate::process::wait::WaitOutcome;
use crate::process::{Pid, ThreadRef};
use crate::signal::SIGILL;

/// argv/envp 的最大项数
const MAX_ARG_ENTRIES: usize = 1024;

impl Kernel {
    pub(super) fn sys_exit(&mut self, t: ThreadRef, code: u64) -> SyscallResult {
        self.proc_terminate(t.pid, (code & 0xff) as i32)?;
        Ok(SysRet::Keep)
    }

    pub(super) fn sys_fork(&mut self, t: ThreadRef) -> SyscallResult {
        let child = self.proc_fork(t.pid, t.tid).ok_or(Errno::NoSuchProcess)?;
        Ok(SysRet::Value(child as u64))
    }

    fn exec_args(&self, t: ThreadRef, path: VirtAddr, argv: VirtAddr, envp: VirtAddr) -> KResult<(String, Vec<String>, Vec<String>)> {
        let table = self.user_table(t.pid)?;
        let machine = &*self.machine;
        let path = read_user_cstr(machine, table, path, PATH_MAX)?;
        let argv = read_user_strv(machine, table, argv, MAX_ARG_ENTRIES, ARG_MAX)?;
        let envp = read_user_strv(machine, table, envp, MAX_ARG_ENTRIES, ARG_MAX)?;
        Ok((path, argv, envp))
    }

    /// 无效映像除了返回 -ENOEXEC 还会向调用线程发送 SIGILL
    pub(super) fn sys_execve(&mut self, t: ThreadRef, path: VirtAddr, argv: VirtAddr, envp: VirtAddr) -> SyscallResult {
        let (path, argv, envp) = self.exec_args(t, path, argv, envp)?;
        match self.proc_exec(t, &path, &argv, &envp) {
            Ok(()) => Ok(SysRet::Keep),
            Err(Errno::ExecFormatError) => {
                if let Some(regs) = self.regs_mut(t) {
                    regs.rax = Errno::ExecFormatError.as_neg_u64();
                }
                // 返回值已写入，处理函数帧保存的是失败后的寄存器
                self.signal_send(t.pid, Some(t.tid), SIGILL)?;
                Ok(SysRet::Keep)
            }
            Err(e) => Err(e),
        }
    }

    pub(super) fn sys_wait(&mut self, t: ThreadRef, target: i64, status: VirtAddr, options: u64) -> SyscallResult {
        match self.proc_wait(t, target, status, options)? {
            WaitOutcome::Reaped(pid) => Ok(SysRet::Value(pid as u64)),
            WaitOutcome::NoneExited => Ok(SysRet::Value(0)),
            WaitOutcome::Blocked => Ok(SysRet::Keep),
        }
    }

    pub(super) fn sys_getppid(&mut self, t: ThreadRef) -> SyscallResult {
        Ok(SysRet::Value(self.procs.parent_of(t.pid).unwrap_or(0) as u64))
    }

    fn resolve_pid(t: ThreadRef, pid: u64) -> Pid {
        if pid == 0 {
            t.pid
        } else {
            pid as Pid
        }
    }

    /// setpgid：只能修改自己或后代，会话首进程不能换组，
    /// 目标组必须是同一会话中已存在的组（或以目标自身为首进程的新组）
    pub(super) fn sys_setpgid(&mut self, t: ThreadRef, pid: u64, pgid: u64) -> SyscallResult {
        if pgid > Pid::MAX as u64 || pid > Pid::MAX as u64 {
            return Err(Errno::InvalidArgument);
        }
        let target = Self::resolve_pid(t, pid);
        let group = if pgid == 0 { target } else { pgid as Pid };
        if target != t.pid && !self.procs.is_descendant(t.pid, target) {
            return Err(Errno::NoSuchProcess);
        }
        let (session, is_leader) = match self.procs.get(target) {
            Some(p) if !p.is_zombie() => (p.session, p.session == p.pid),
            _ => return Err(Errno::NoSuchProcess),
        };
        if is_leader {
            return Err(Errno::OperationNotPermitted);
        }
        if group != target {
            let exists = self
                .procs
                .iter()
                .any(|p| p.group == group && p.session == session && !p.is_zombie());
            if !exists {
                return Err(Errno::OperationNotPermitted);
            }
        }
        if let Some(p) = self.procs.get_mut(target) {
            p.group = group;
        }
        Ok(SysRet::Value(0))
    }

    pub(super) fn sys_getpgid(&mut self, t: ThreadRef, pid: u64) -> SyscallResult {
        let target = Self::resolve_pid(t, pid);
        let process = self.procs.get(target).ok_or(Errno::NoSuchProcess)?;
        Ok(SysRet::Value(process.group as u64))
    }

    /// 进程组首进程不能创建新会话
    pub(super) fn sys_setsid(&mut self, t: ThreadRef) -> SyscallResult {
        let process = self.procs.get_mut(t.pid).ok_or(Errno::NoSuchProcess)?;
        if process.group == process.pid {
            return Err(Errno::OperationNotPermitted);
        }
        process.group = process.pid;
        process.session = process.pid;
        Ok(SysRet::Value(t.pid as u64))
    }

    pub(super) fn sys_sleep(&mut self, t: ThreadRef, ms: u64) -> SyscallResult {
        if let Some(regs) = self.regs_mut(t) {
            regs.rax = 0;
        }
        self.scheduler_sleep(t, ms);
        Ok(SysRet::Keep)
    }
}
