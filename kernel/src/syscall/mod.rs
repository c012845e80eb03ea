//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 系统调用分发
//!
//! 调用号与 Linux x86-64 一致。参数取自陷入帧的 rdi, rsi, rdx, r10, r8, r9，
//! 返回值写回 rax，错误为负的 errno。
//!
//! 未知调用号不返回 -ENOSYS，而是向调用线程发送 SIGILL。

mod fs;
mod mm;
mod process;
mod signal;

pub use fs::{SEEK_CUR, SEEK_END, SEEK_SET};

use crate::errno::{Errno, KResult};
use crate::kernel::Kernel;
use crate::mm::pagemap::TableRoot;
use crate::process::{Pid, ThreadRef, ThreadState};
use crate::signal::SIGILL;

/// 路径参数的最大长度 (PATH_MAX)
pub const PATH_MAX: usize = 4096;

/// 系统调用号
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallNo {
    Read = 0,
    Write = 1,
    Open = 2,
    Close = 3,
    Seek = 8,
    Mmap = 9,
    Signal = 13,
    SigProcMask = 14,
    SigReturn = 15,
    Ioctl = 16,
    Pread = 17,
    Pwrite = 18,
    Access = 21,
    Sleep = 35,
    GetPid = 39,
    Fork = 57,
    Execve = 59,
    Exit = 60,
    Wait = 61,
    Kill = 62,
    Mkdir = 83,
    SetPgid = 109,
    GetPpid = 110,
    SetSid = 112,
    GetPgid = 121,
    Mount = 165,
    Unmount = 166,
}

impl SyscallNo {
    pub fn from_raw(no: u64) -> Option<Self> {
        use SyscallNo::*;
        Some(match no {
            0 => Read,
            1 => Write,
            2 => Open,
            3 => Close,
            8 => Seek,
            9 => Mmap,
            13 => Signal,
            14 => SigProcMask,
            15 => SigReturn,
            16 => Ioctl,
            17 => Pread,
            18 => Pwrite,
            21 => Access,
            35 => Sleep,
            39 => GetPid,
            57 => Fork,
            59 => Execve,
            60 => Exit,
            61 => Wait,
            62 => Kill,
            83 => Mkdir,
            109 => SetPgid,
            110 => GetPpid,
            112 => SetSid,
            121 => GetPgid,
            165 => Mount,
            166 => Unmount,
            _ => return None,
        })
    }
}

/// 系统调用的返回方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysRet {
    /// 写入 rax
    Value(u64),
    /// 不修改寄存器：调用线程已阻塞、已被替换 (exec, sigreturn) 或已退出
    Keep,
}

pub type SyscallResult = KResult<SysRet>;

impl Kernel {
    /// 系统调用入口：处理当前线程陷入帧中的调用
    ///
    /// 返回时若当前线程已不能继续运行（阻塞、退出、被杀死），已经切换到下一个线程
    pub fn syscall_entry(&mut self) {
        let Some(t) = self.current() else {
            return;
        };
        let Some(regs) = self.regs(t) else {
            return;
        };
        let raw = regs.syscall_no();
        let args = regs.syscall_args();

        let result = match SyscallNo::from_raw(raw) {
            Some(no) => {
                log::trace!(target: "syscall", "pid {} tid {}: {:?} {:x?}", t.pid, t.tid, no, args);
                self.dispatch(t, no, args)
            }
            None => {
                log::warn!(target: "syscall", "pid {} tid {}: unknown syscall {}", t.pid, t.tid, raw);
                self.signal_send(t.pid, Some(t.tid), SIGILL).map(|_| SysRet::Keep)
            }
        };

        let ret = match result {
            Ok(SysRet::Value(v)) => Some(v),
            Ok(SysRet::Keep) => None,
            Err(e) => {
                log::debug!(target: "syscall", "pid {} tid {}: syscall {} failed: {}", t.pid, t.tid, raw, e);
                Some(e.as_neg_u64())
            }
        };
        if let (Some(v), Some(regs)) = (ret, self.regs_mut(t)) {
            regs.rax = v;
        }

        if self.current() == Some(t) && self.is_running(t) {
            self.signal_deliver_pending(t);
        }
        if self.current() != Some(t) || !self.is_running(t) {
            self.reschedule();
        }
    }

    fn is_running(&self, t: ThreadRef) -> bool {
        self.thread(t).map_or(false, |th| th.state == ThreadState::Running)
    }

    fn dispatch(&mut self, t: ThreadRef, no: SyscallNo, a: [u64; 6]) -> SyscallResult {
        use SyscallNo::*;
        match no {
            Read => self.sys_read(t, a[0], a[1], a[2]),
            Write => self.sys_write(t, a[0], a[1], a[2]),
            Open => self.sys_open(t, a[0], a[1]),
            Close => self.sys_close(t, a[0]),
            Seek => self.sys_seek(t, a[0], a[1] as i64, a[2]),
            Mmap => self.sys_mmap(t, a),
            Signal => self.sys_signal(t, a[0], a[1]),
            SigProcMask => self.sys_sigprocmask(t, a[0], a[1], a[2]),
            SigReturn => self.sys_sigreturn(t),
            Ioctl => self.sys_ioctl(t, a[0], a[1], a[2]),
            Pread => self.sys_pread(t, a[0], a[1], a[2], a[3]),
            Pwrite => self.sys_pwrite(t, a[0], a[1], a[2], a[3]),
            Access => self.sys_access(t, a[0], a[1]),
            Sleep => self.sys_sleep(t, a[0]),
            GetPid => Ok(SysRet::Value(t.pid as u64)),
            Fork => self.sys_fork(t),
            Execve => self.sys_execve(t, a[0], a[1], a[2]),
            Exit => self.sys_exit(t, a[0]),
            Wait => self.sys_wait(t, a[0] as i64, a[1], a[2]),
            Kill => self.sys_kill(t, a[0] as i64, a[1]),
            Mkdir => self.sys_mkdir(t, a[0]),
            SetPgid => self.sys_setpgid(t, a[0], a[1]),
            GetPpid => self.sys_getppid(t),
            SetSid => self.sys_setsid(t),
            GetPgid => self.sys_getpgid(t, a[0]),
            Mount => self.sys_mount(t, a[0], a[1], a[2]),
            Unmount => self.sys_unmount(t, a[0]),
        }
    }

    /// 调用进程的页表，所有用户指针都对它校验
    pub(crate) fn user_table(&self, pid: Pid) -> KResult<TableRoot> {
        self.procs
            .get(pid)
            .and_then(|p| p.memory.as_ref())
            .map(|m| m.table)
            .ok_or(Errno::BadAddress)
    }
}
