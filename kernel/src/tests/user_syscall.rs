//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 用户态系统调用的端到端场景：init 收割子进程、shell 阻塞读终端、文件操作

use alloc::vec::Vec;

use super::util::{
    boot_init, fork, peek, poke, poke_str, poke_strv, scratch, switch_to, syscall, syscall_as,
};
use crate::arch::SYSCALL_INSN_LEN;
use crate::errno::Errno;
use crate::fs::memfs::TCGETS;
use crate::fs::{OpenFlags, VfsNode};
use crate::process::wait::WNOHANG;
use crate::process::{QueueLink, ThreadRef, ThreadState, WaitKey, PID_INIT};
use crate::signal::SIGCHLD;
use crate::syscall::{SyscallNo, SEEK_CUR, SEEK_END, SEEK_SET};
use crate::Kernel;

const INIT: ThreadRef = ThreadRef::new(PID_INIT, 0);
const REAPER: u64 = 0x40_0060;
const ANY: u64 = -1i64 as u64;

/// init 的 SIGCHLD 处理函数：非阻塞地收割所有已退出的子进程，然后返回
fn run_reaper(k: &mut Kernel) -> (Vec<u64>, i64) {
    assert_eq!(k.current(), Some(INIT));
    assert_eq!(k.regs(INIT).unwrap().rip, REAPER);
    let mut reaped = Vec::new();
    let last = loop {
        let r = syscall(k, SyscallNo::Wait, [ANY, 0, WNOHANG, 0, 0, 0]) as i64;
        if r <= 0 {
            break r;
        }
        reaped.push(r as u64);
    };
    k.regs_mut(INIT).unwrap().rsp += 8;
    syscall(k, SyscallNo::SigReturn, [0; 6]);
    (reaped, last)
}

#[test]
fn test_init_shell_session() {
    let (mut k, tty) = boot_init();
    let buf = scratch(&mut k, PID_INIT, 1);
    assert_eq!(syscall(&mut k, SyscallNo::Signal, [SIGCHLD as u64, REAPER, 0, 0, 0, 0]), 0);
    let init_rip = k.regs(INIT).unwrap().rip;

    let sh = fork(&mut k);
    let job1 = fork(&mut k);
    let job2 = fork(&mut k);

    poke_str(&mut k, sh.pid, buf, "/sbin/sh.elf");
    poke_strv(&mut k, sh.pid, buf + 0x100, &["sh"]);
    syscall_as(&mut k, sh, SyscallNo::Execve, [buf, buf + 0x100, 0, 0, 0, 0]);
    assert_eq!(k.process(sh.pid).unwrap().name, "sh.elf");

    // 提示符
    let sbuf = scratch(&mut k, sh.pid, 1);
    poke(&mut k, sh.pid, sbuf, b"$ ");
    assert_eq!(syscall_as(&mut k, sh, SyscallNo::Write, [1, sbuf, 2, 0, 0, 0]), Some(2));
    assert_eq!(tty.take_output(), b"$ ");

    // 没有输入：阻塞在终端上，准备重新执行 read
    let rip = k.regs(sh).unwrap().rip;
    let line = sbuf + 0x100;
    assert_eq!(syscall_as(&mut k, sh, SyscallNo::Read, [0, line, 64, 0, 0, 0]), Some(0));
    let th = k.thread(sh).unwrap();
    assert_eq!(th.state, ThreadState::Sleeping);
    assert_eq!(th.link, QueueLink::WaitQueue(WaitKey::Io(tty.id())));
    assert_eq!(th.regs.rip, rip - SYSCALL_INSN_LEN);
    assert_ne!(k.current(), Some(sh));

    tty.push_input(b"ls\n");
    assert_eq!(k.wake_io(tty.id()), 1);
    assert_eq!(k.thread(sh).unwrap().link, QueueLink::RunQueue);
    switch_to(&mut k, sh);
    // 重新执行 syscall 指令
    k.regs_mut(sh).unwrap().rip += SYSCALL_INSN_LEN;
    k.syscall_entry();
    assert_eq!(k.regs(sh).unwrap().rax, 3);
    assert_eq!(k.regs(sh).unwrap().rip, rip);
    assert_eq!(peek(&k, sh.pid, line, 3), b"ls\n");

    // 两个作业结束，SIGCHLD 合并为一次投递
    k.proc_terminate(job1.pid, 0).unwrap();
    k.proc_terminate(job2.pid, 1).unwrap();
    assert!(k.process(PID_INIT).unwrap().signals.pending.contains(SIGCHLD));
    switch_to(&mut k, INIT);
    assert_eq!(k.regs(INIT).unwrap().rdi, SIGCHLD as u64);
    let (mut reaped, last) = run_reaper(&mut k);
    reaped.sort();
    assert_eq!(reaped, [job1.pid as u64, job2.pid as u64]);
    assert_eq!(last, 0);
    assert_eq!(k.regs(INIT).unwrap().rip, init_rip);
    assert!(k.thread(INIT).unwrap().signal_mask.is_empty());

    // shell 退出后 init 立即进入处理函数
    assert_eq!(syscall_as(&mut k, sh, SyscallNo::Exit, [0, 0, 0, 0, 0, 0]), None);
    let (reaped, last) = run_reaper(&mut k);
    assert_eq!(reaped, [sh.pid as u64]);
    assert_eq!(last, Errno::NoChild.as_neg_u64() as i64);
    assert!(k.process(PID_INIT).unwrap().children.is_empty());
}

#[test]
fn test_file_syscalls() {
    let (mut k, _) = boot_init();
    let buf = scratch(&mut k, PID_INIT, 2);
    let data = buf + 0x1000;
    let err = |e: Errno| e.as_neg_u64();

    let path_call = |k: &mut Kernel, no: SyscallNo, path: &str, rest: [u64; 5]| {
        poke_str(k, PID_INIT, buf, path);
        syscall(k, no, [buf, rest[0], rest[1], rest[2], rest[3], rest[4]])
    };
    let creat = (OpenFlags::CREAT | OpenFlags::RDWR).bits() as u64;

    assert_eq!(path_call(&mut k, SyscallNo::Mkdir, "/tmp", [0; 5]), 0);
    assert_eq!(path_call(&mut k, SyscallNo::Mkdir, "/tmp", [0; 5]), err(Errno::FileExists));
    assert_eq!(path_call(&mut k, SyscallNo::Open, "/tmp/log", [creat, 0, 0, 0, 0]), 3);
    assert_eq!(
        path_call(&mut k, SyscallNo::Open, "/tmp", [OpenFlags::RDWR.bits() as u64, 0, 0, 0, 0]),
        err(Errno::IsADirectory)
    );

    poke(&mut k, PID_INIT, data, b"hello world");
    assert_eq!(syscall(&mut k, SyscallNo::Write, [3, data, 11, 0, 0, 0]), 11);
    assert_eq!(syscall(&mut k, SyscallNo::Seek, [3, 0, SEEK_SET, 0, 0, 0]), 0);
    let out = data + 0x100;
    assert_eq!(syscall(&mut k, SyscallNo::Read, [3, out, 5, 0, 0, 0]), 5);
    assert_eq!(peek(&k, PID_INIT, out, 5), b"hello");
    assert_eq!(syscall(&mut k, SyscallNo::Read, [3, out, 100, 0, 0, 0]), 6);
    assert_eq!(peek(&k, PID_INIT, out, 6), b" world");
    assert_eq!(syscall(&mut k, SyscallNo::Read, [3, out, 100, 0, 0, 0]), 0);

    // pread/pwrite 不移动偏移
    poke(&mut k, PID_INIT, data, b"HELLO");
    assert_eq!(syscall(&mut k, SyscallNo::Pwrite, [3, data, 5, 0, 0, 0]), 5);
    assert_eq!(syscall(&mut k, SyscallNo::Pread, [3, out, 5, 6, 0, 0]), 5);
    assert_eq!(peek(&k, PID_INIT, out, 5), b"world");
    assert_eq!(syscall(&mut k, SyscallNo::Seek, [3, 0, SEEK_CUR, 0, 0, 0]), 11);
    assert_eq!(syscall(&mut k, SyscallNo::Seek, [3, -5i64 as u64, SEEK_END, 0, 0, 0]), 6);
    assert_eq!(syscall(&mut k, SyscallNo::Seek, [3, -20i64 as u64, SEEK_CUR, 0, 0, 0]), err(Errno::InvalidArgument));
    assert_eq!(syscall(&mut k, SyscallNo::Seek, [3, 0, 9, 0, 0, 0]), err(Errno::InvalidArgument));

    // 终端不可定位
    assert_eq!(syscall(&mut k, SyscallNo::Seek, [0, 0, SEEK_SET, 0, 0, 0]), err(Errno::IllegalSeek));
    assert_eq!(syscall(&mut k, SyscallNo::Pread, [0, out, 1, 0, 0, 0]), err(Errno::IllegalSeek));
    assert_eq!(syscall(&mut k, SyscallNo::Ioctl, [0, TCGETS, 0, 0, 0, 0]), 0);
    assert_eq!(syscall(&mut k, SyscallNo::Ioctl, [0, 0x1234, 0, 0, 0, 0]), err(Errno::InvalidArgument));
    assert_eq!(syscall(&mut k, SyscallNo::Ioctl, [3, TCGETS, 0, 0, 0, 0]), err(Errno::NotATypewriter));

    assert_eq!(path_call(&mut k, SyscallNo::Access, "/tmp/log", [0; 5]), 0);
    assert_eq!(path_call(&mut k, SyscallNo::Access, "/nope", [0; 5]), err(Errno::NoSuchFileOrDirectory));

    // 追加写
    let append = (OpenFlags::WRONLY | OpenFlags::APPEND).bits() as u64;
    assert_eq!(path_call(&mut k, SyscallNo::Open, "/tmp/log", [append, 0, 0, 0, 0]), 4);
    poke(&mut k, PID_INIT, data, b"!");
    assert_eq!(syscall(&mut k, SyscallNo::Write, [4, data, 1, 0, 0, 0]), 1);
    assert_eq!(syscall(&mut k, SyscallNo::Read, [4, out, 1, 0, 0, 0]), err(Errno::BadFileNumber));
    assert_eq!(syscall(&mut k, SyscallNo::Pread, [3, out, 64, 0, 0, 0]), 12);
    assert_eq!(peek(&k, PID_INIT, out, 12), b"HELLO world!");

    assert_eq!(syscall(&mut k, SyscallNo::Close, [3, 0, 0, 0, 0, 0]), 0);
    assert_eq!(syscall(&mut k, SyscallNo::Close, [3, 0, 0, 0, 0, 0]), err(Errno::BadFileNumber));
    assert_eq!(syscall(&mut k, SyscallNo::Read, [3, out, 1, 0, 0, 0]), err(Errno::BadFileNumber));
    // 最小的空闲 fd 被复用
    assert_eq!(path_call(&mut k, SyscallNo::Open, "/etc-motd", [0; 5]), 3);
    assert_eq!(syscall(&mut k, SyscallNo::Write, [3, data, 1, 0, 0, 0]), err(Errno::BadFileNumber));

    // 非阻塞终端读
    let nonblock = OpenFlags::NONBLOCK.bits() as u64;
    let fd = path_call(&mut k, SyscallNo::Open, "/dev/tty", [nonblock, 0, 0, 0, 0]);
    assert_eq!(fd, 5);
    assert_eq!(syscall(&mut k, SyscallNo::Read, [fd, out, 1, 0, 0, 0]), err(Errno::TryAgain));
    assert_eq!(k.thread(INIT).unwrap().state, ThreadState::Running);
}

#[test]
fn test_mount_syscalls() {
    let (mut k, _) = boot_init();
    let buf = scratch(&mut k, PID_INIT, 1);
    let (src, target, fstype, empty) = (buf, buf + 0x100, buf + 0x200, buf + 0x300);
    poke_str(&mut k, PID_INIT, src, "none");
    poke_str(&mut k, PID_INIT, target, "/mnt");
    poke_str(&mut k, PID_INIT, fstype, "tmpfs");
    poke_str(&mut k, PID_INIT, empty, "");
    let mount = |k: &mut Kernel, ty: u64| syscall(k, SyscallNo::Mount, [src, target, ty, 0, 0, 0]);

    assert_eq!(mount(&mut k, empty), Errno::InvalidArgument.as_neg_u64());
    assert_eq!(mount(&mut k, fstype), 0);
    assert_eq!(mount(&mut k, fstype), Errno::DeviceOrResourceBusy.as_neg_u64());
    assert_eq!(syscall(&mut k, SyscallNo::Unmount, [target, 0, 0, 0, 0, 0]), 0);
    assert_eq!(
        syscall(&mut k, SyscallNo::Unmount, [target, 0, 0, 0, 0, 0]),
        Errno::InvalidArgument.as_neg_u64()
    );

    poke_str(&mut k, PID_INIT, target, "/etc-motd");
    assert_eq!(mount(&mut k, fstype), Errno::NotADirectory.as_neg_u64());
}
