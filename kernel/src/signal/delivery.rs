//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 信号发送与投递
//!
//! 对应 Linux 的 send_signal / get_signal / handle_signal / sys_rt_sigreturn。
//! 投递点有两个：
//! - 定向发送时立即把目标线程切入处理函数 (`thread_signal_switch`)
//! - 非定向信号挂在进程上，在切换到某个线程时消费 (`signal_deliver_pending`)
//!
//! 等待信号量的线程不可打断，定向给它的信号挂在线程自己的 `pending` 上

use super::frame::{frame_address, SignalFrame};
use super::{
    default_action, is_valid, DefaultAction, SigAction, SigNum, SignalOutcome, EXIT_SIGNAL_BASE,
    SIGILL, SIGKILL, SIGSEGV,
};
use crate::arch::{RFLAGS_IF, RFLAGS_USER_MASK, USER_CS, USER_SS};
use crate::errno::{Errno, KResult};
use crate::kernel::Kernel;
use crate::mm::uaccess::{copy_from_user, copy_to_user};
use crate::mm::VirtAddr;
use crate::process::{Pid, QueueLink, ThreadRef, ThreadState, Tid, WaitKey};

/// 解析后的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolved {
    Ignore,
    Terminate,
    Handler(VirtAddr),
}

impl Kernel {
    /// 信号 `sig` 在 `pid` 中的实际动作
    ///
    /// 内核进程没有信号状态，任何信号都被忽略。
    /// 没有信号跳板的进程无法进入处理函数，一律按默认动作处理
    fn resolve_action(&self, pid: Pid, sig: SigNum) -> Option<Resolved> {
        let process = self.procs.get(pid)?;
        if !process.is_user() {
            return Some(Resolved::Ignore);
        }
        let trampoline = process.memory.as_ref().and_then(|m| m.trampoline);
        let action = match (process.signals.handler(sig), trampoline) {
            (SigAction::Handler(_), None) => SigAction::Default,
            (action, _) => action,
        };
        Some(match action {
            SigAction::Ignore => Resolved::Ignore,
            SigAction::Handler(addr) => Resolved::Handler(addr),
            SigAction::Default => match default_action(sig) {
                DefaultAction::Ignore => Resolved::Ignore,
                DefaultAction::Terminate => Resolved::Terminate,
            },
        })
    }

    /// 被信号杀死：退出码为 127 + 信号编号
    fn signal_terminate(&mut self, pid: Pid, sig: SigNum) -> KResult<()> {
        log::info!(target: "signal", "pid {} killed by signal {}", pid, sig);
        self.proc_terminate(pid, EXIT_SIGNAL_BASE + sig as i32)
    }

    /// 向进程 `pid`（`tid` 非空时为其中的指定线程）发送信号
    pub fn signal_send(&mut self, pid: Pid, tid: Option<Tid>, sig: SigNum) -> KResult<SignalOutcome> {
        if !is_valid(sig) {
            return Err(Errno::InvalidArgument);
        }
        match self.procs.get(pid) {
            Some(p) if !p.is_zombie() => {
                if let Some(tid) = tid {
                    if !p.threads.contains_key(&tid) {
                        return Err(Errno::NoSuchProcess);
                    }
                }
            }
            _ => return Err(Errno::NoSuchProcess),
        }

        let action = self.resolve_action(pid, sig).ok_or(Errno::NoSuchProcess)?;
        log::trace!(target: "signal", "signal {} -> pid {} tid {:?}: {:?}", sig, pid, tid, action);
        let handler = match action {
            Resolved::Ignore => return Ok(SignalOutcome::Ignored),
            Resolved::Terminate => {
                self.signal_terminate(pid, sig)?;
                return Ok(SignalOutcome::Terminated);
            }
            Resolved::Handler(addr) => addr,
        };

        match tid {
            Some(tid) => {
                let t = ThreadRef::new(pid, tid);
                let (masked, uninterruptible) = match self.thread(t) {
                    Some(th) => (
                        sig != SIGKILL && th.signal_mask.contains(sig),
                        matches!(th.link, QueueLink::WaitQueue(WaitKey::Semaphore(_))),
                    ),
                    None => return Err(Errno::NoSuchProcess),
                };
                if masked {
                    return Ok(SignalOutcome::Ignored);
                }
                if uninterruptible {
                    // 信号量等待不可打断，挂在线程上，等它下次被调度时再投递
                    if let Some(th) = self.thread_mut(t) {
                        th.pending.add(sig);
                    }
                    return Ok(SignalOutcome::Pending);
                }
                self.thread_signal_switch(t, sig, handler);
                Ok(SignalOutcome::Delivered)
            }
            None => {
                self.mark_pending(pid, sig);
                Ok(SignalOutcome::Pending)
            }
        }
    }

    fn mark_pending(&mut self, pid: Pid, sig: SigNum) {
        if let Some(p) = self.procs.get_mut(pid) {
            p.signals.pending.add(sig);
        }
    }

    /// 把线程 `t` 切入信号处理函数
    ///
    /// 先取消线程的阻塞：wait 返回 -EINTR，sleep 返回 0，阻塞读在处理函数
    /// 返回后重新执行。然后在用户栈上压入信号帧并改写寄存器。
    /// 信号帧写入失败时进程被 SIGSEGV 杀死
    pub fn thread_signal_switch(&mut self, t: ThreadRef, sig: SigNum, handler: VirtAddr) {
        let Some(th) = self.thread(t) else {
            return;
        };
        let blocked = th.state == ThreadState::Sleeping;
        let link = th.link;
        let Some((table, trampoline)) = self
            .procs
            .get(t.pid)
            .and_then(|p| p.memory.as_ref())
            .and_then(|m| Some((m.table, m.trampoline?)))
        else {
            return;
        };

        if blocked {
            self.sched_dequeue(t, false);
            if let Some(th) = self.thread_mut(t) {
                match link {
                    QueueLink::ChildWait => {
                        th.wait = None;
                        th.regs.rax = Errno::InterruptedSystemCall.as_neg_u64();
                    }
                    QueueLink::SleepQueue => th.regs.rax = 0,
                    // 阻塞读已经回退到 syscall 指令，处理函数返回后重新执行
                    _ => {}
                }
            }
        }

        let Some(th) = self.thread(t) else {
            return;
        };
        let addr = frame_address(th.regs.rsp);
        let frame = SignalFrame::new(&th.regs, trampoline, sig, th.signal_mask, th.current_signal);
        if let Err(e) = copy_to_user(&mut *self.machine, table, addr, &frame.to_bytes()) {
            log::warn!(
                target: "signal",
                "pid {} tid {}: cannot push frame for signal {} at {:#x}: {}",
                t.pid, t.tid, sig, addr, e
            );
            let _ = self.signal_terminate(t.pid, SIGSEGV);
            return;
        }

        if let Some(th) = self.thread_mut(t) {
            th.regs.rip = handler;
            th.regs.rsp = addr;
            th.regs.rdi = sig as u64;
            th.signal_mask.add(sig);
            th.current_signal = sig;
        }
        log::debug!(target: "signal", "pid {} tid {} enters handler {:#x} for {}", t.pid, t.tid, handler, sig);
        if blocked {
            self.sched_enqueue(t);
        }
    }

    /// 线程 `t` 可以接收的最高优先级待处理信号
    ///
    /// 进程上的和定向到该线程的一起参与选择；SIGKILL 不受掩码影响
    pub fn thread_signal_get_pending(&self, t: ThreadRef) -> Option<SigNum> {
        let th = self.thread(t)?;
        let pending = super::SigSet(self.procs.get(t.pid)?.signals.pending.0 | th.pending.0);
        let mask = th.signal_mask;
        let mut eligible = super::SigSet(pending.0 & !mask.0);
        if pending.contains(SIGKILL) {
            eligible.add(SIGKILL);
        }
        eligible.lowest()
    }

    /// 切换到 `t` 之前消费一个待处理信号
    ///
    /// 动作在投递时重新解析：处理函数可能在挂起期间被改掉
    pub fn signal_deliver_pending(&mut self, t: ThreadRef) {
        match self.thread(t) {
            Some(th) if th.is_runnable() => {}
            _ => return,
        }
        let Some(sig) = self.thread_signal_get_pending(t) else {
            return;
        };
        match self.thread_mut(t) {
            Some(th) if th.pending.contains(sig) => th.pending.remove(sig),
            _ => {
                if let Some(p) = self.procs.get_mut(t.pid) {
                    p.signals.pending.remove(sig);
                }
            }
        }
        match self.resolve_action(t.pid, sig) {
            Some(Resolved::Handler(addr)) => self.thread_signal_switch(t, sig, addr),
            Some(Resolved::Terminate) => {
                let _ = self.signal_terminate(t.pid, sig);
            }
            Some(Resolved::Ignore) | None => {}
        }
    }

    /// 从信号处理函数返回
    ///
    /// 跳板执行 syscall 时处理函数的 `ret` 已经弹出返回地址，帧位于 rsp - 8。
    /// 校验值不符时不恢复任何寄存器，进程被 SIGILL 杀死
    pub fn sigreturn(&mut self, t: ThreadRef) -> KResult<()> {
        let rsp = self.regs(t).map(|r| r.rsp).ok_or(Errno::NoSuchProcess)?;
        let table = self
            .procs
            .get(t.pid)
            .and_then(|p| p.memory.as_ref())
            .map(|m| m.table)
            .ok_or(Errno::BadAddress)?;

        let addr = rsp.wrapping_sub(8);
        let mut raw = [0u8; SignalFrame::SIZE];
        let frame = copy_from_user(&*self.machine, table, addr, &mut raw)
            .ok()
            .and_then(|_| SignalFrame::from_bytes(&raw))
            .filter(|f| f.is_valid());
        let Some(frame) = frame else {
            log::warn!(target: "signal", "pid {} tid {}: bad signal frame at {:#x}", t.pid, t.tid, addr);
            self.signal_terminate(t.pid, SIGILL)?;
            return Err(Errno::BadAddress);
        };

        let prev = frame.prev_signal as SigNum;
        let th = self.thread_mut(t).ok_or(Errno::NoSuchProcess)?;
        th.regs.set_gprs(&frame.gprs);
        th.regs.rip = frame.rip;
        th.regs.rsp = frame.rsp;
        th.regs.rflags = (frame.rflags & RFLAGS_USER_MASK) | RFLAGS_IF;
        th.regs.cs = USER_CS;
        th.regs.ss = USER_SS;
        th.signal_mask = frame.saved_mask;
        th.signal_mask.remove(SIGKILL);
        th.current_signal = if is_valid(prev) { prev } else { 0 };
        log::trace!(target: "signal", "pid {} tid {} sigreturn to {:#x}", t.pid, t.tid, frame.rip);
        Ok(())
    }

    /// 设置处理动作，返回旧动作
    pub fn proc_signal_set_handler(&mut self, pid: Pid, sig: SigNum, action: SigAction) -> KResult<SigAction> {
        let process = self.procs.get_mut(pid).ok_or(Errno::NoSuchProcess)?;
        process
            .signals
            .set_handler(sig, action)
            .ok_or(Errno::InvalidArgument)
    }
}
