//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 信号相关系统调用

use alloc::vec::Vec;

use super::{SysRet, SyscallResult};
use crate::errno::{Errno, KResult};
use crate::kernel::Kernel;
use crate::mm::uaccess::{copy_from_user, copy_to_user};
use crate::mm::VirtAddr;
use crate::process::{Pid, Process, ThreadRef, PID_INIT, PID_SWAPPER};
use crate::signal::{is_valid, SigAction, SigNum, SigSet, SIGKILL};

pub const SIG_BLOCK: u64 = 0;
pub const SIG_UNBLOCK: u64 = 1;
pub const SIG_SETMASK: u64 = 2;

/// 用户态信号集的字节数 (128 位)
const SIGSET_BYTES: usize = 16;

/// 发送者是否有权向目标发送信号
fn may_signal(sender: &Process, target: &Process) -> bool {
    let (s, t) = (sender.identity, target.identity);
    s.euid == 0 || s.uid == t.uid || s.euid == t.uid
}

impl Kernel {
    /// signal(sig, handler)，返回旧的处理函数
    pub(super) fn sys_signal(&mut self, t: ThreadRef, sig: u64, handler: VirtAddr) -> SyscallResult {
        let sig = SigNum::try_from(sig).map_err(|_| Errno::InvalidArgument)?;
        let old = self.proc_signal_set_handler(t.pid, sig, SigAction::from_user(handler))?;
        Ok(SysRet::Value(old.to_user()))
    }

    /// sigprocmask(how, set, oldset)
    pub(super) fn sys_sigprocmask(&mut self, t: ThreadRef, how: u64, set: VirtAddr, old: VirtAddr) -> SyscallResult {
        let table = self.user_table(t.pid)?;
        let current = self.thread(t).ok_or(Errno::NoSuchProcess)?.signal_mask;

        let new = if set != 0 {
            let mut raw = [0u8; SIGSET_BYTES];
            copy_from_user(&*self.machine, table, set, &mut raw)?;
            let requested = SigSet(u128::from_le_bytes(raw));
            let mut mask = match how {
                SIG_BLOCK => SigSet(current.0 | requested.0),
                SIG_UNBLOCK => SigSet(current.0 & !requested.0),
                SIG_SETMASK => requested,
                _ => return Err(Errno::InvalidArgument),
            };
            mask.remove(SIGKILL);
            // 位 0 不对应任何信号
            mask.0 &= !1;
            Some(mask)
        } else {
            None
        };

        if old != 0 {
            copy_to_user(&mut *self.machine, table, old, &current.0.to_le_bytes())?;
        }
        if let (Some(mask), Some(th)) = (new, self.thread_mut(t)) {
            th.signal_mask = mask;
        }
        Ok(SysRet::Value(0))
    }

    pub(super) fn sys_sigreturn(&mut self, t: ThreadRef) -> SyscallResult {
        self.sigreturn(t)?;
        Ok(SysRet::Keep)
    }

    /// kill 的目标进程
    ///
    /// pid > 0 指定进程；0 调用者所在组；-1 除 init 和调用者外的所有进程；
    /// < -1 组 -pid。只有用户进程可以成为目标
    fn kill_targets(&self, caller: Pid, pid: i64) -> KResult<Vec<Pid>> {
        let group = self.procs.get(caller).ok_or(Errno::NoSuchProcess)?.group;
        let live = self
            .procs
            .iter()
            .filter(|p| p.is_user() && !p.is_zombie() && p.pid != PID_SWAPPER);
        let targets: Vec<Pid> = match pid {
            p if p > 0 => {
                let pid = Pid::try_from(p).map_err(|_| Errno::NoSuchProcess)?;
                live.filter(|p| p.pid == pid).map(|p| p.pid).collect()
            }
            0 => live.filter(|p| p.group == group).map(|p| p.pid).collect(),
            -1 => live
                .filter(|p| p.pid != PID_INIT && p.pid != caller)
                .map(|p| p.pid)
                .collect(),
            p => {
                let g = p
                    .checked_neg()
                    .and_then(|g| Pid::try_from(g).ok())
                    .ok_or(Errno::NoSuchProcess)?;
                live.filter(|p| p.group == g).map(|p| p.pid).collect()
            }
        };
        if targets.is_empty() {
            return Err(Errno::NoSuchProcess);
        }
        Ok(targets)
    }

    /// kill(pid, sig)；sig 为 0 时只检查目标存在和权限
    pub(super) fn sys_kill(&mut self, t: ThreadRef, pid: i64, sig: u64) -> SyscallResult {
        let sig = SigNum::try_from(sig).map_err(|_| Errno::InvalidArgument)?;
        if sig != 0 && !is_valid(sig) {
            return Err(Errno::InvalidArgument);
        }
        let targets = self.kill_targets(t.pid, pid)?;
        let allowed: Vec<Pid> = {
            let sender = self.procs.get(t.pid).ok_or(Errno::NoSuchProcess)?;
            targets
                .into_iter()
                .filter(|&p| self.procs.get(p).map_or(false, |target| may_signal(sender, target)))
                .collect()
        };
        if allowed.is_empty() {
            return Err(Errno::OperationNotPermitted);
        }
        if sig == 0 {
            return Ok(SysRet::Value(0));
        }
        for target in allowed {
            // 前面的目标终止时可能连带回收了后面的僵尸
            match self.signal_send(target, None, sig) {
                Ok(_) | Err(Errno::NoSuchProcess) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(SysRet::Value(0))
    }
}
