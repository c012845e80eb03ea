//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 边界条件：非法调用号、坏指针、非法信号、资源耗尽、坏的用户栈

use alloc::string::String;

use super::util::{
    boot_init, fork, poke, poke_str, scratch, switch_to, syscall, syscall_as, Fixture, INIT_ENTRY,
};
use crate::config::USER_SPLIT;
use crate::errno::Errno;
use crate::process::PID_INIT;
use crate::signal::{SigAction, EXIT_SIGNAL_BASE, SIGILL, SIGSEGV, SIGUSR1};
use crate::syscall::SyscallNo;
use crate::Kernel;

fn exit_code(k: &Kernel, pid: u32) -> i32 {
    let p = k.process(pid).unwrap();
    assert!(p.is_zombie());
    p.exit_code
}

#[test]
fn test_unknown_syscall_raises_sigill() {
    let (mut k, _) = boot_init();
    let child = fork(&mut k);
    switch_to(&mut k, child);
    k.regs_mut(child).unwrap().set_syscall(999, [0; 6]);
    k.syscall_entry();
    assert_eq!(exit_code(&k, child.pid), EXIT_SIGNAL_BASE + SIGILL as i32);
    assert_eq!(k.current().map(|t| t.pid), Some(PID_INIT));
}

#[test]
fn test_bad_user_pointers() {
    let (mut k, _) = boot_init();
    let buf = scratch(&mut k, PID_INIT, 1);
    let efault = Errno::BadAddress.as_neg_u64();

    assert_eq!(syscall(&mut k, SyscallNo::Write, [1, 0x10, 4, 0, 0, 0]), efault);
    // 读入只读代码段
    assert_eq!(syscall(&mut k, SyscallNo::Read, [0, INIT_ENTRY, 4, 0, 0, 0]), efault);
    assert_eq!(syscall(&mut k, SyscallNo::Write, [1, 0xffff_8000_0000_0000, 4, 0, 0, 0]), efault);
    assert_eq!(syscall(&mut k, SyscallNo::Write, [1, USER_SPLIT - 8, 16, 0, 0, 0]), efault);
    assert_eq!(syscall(&mut k, SyscallNo::Write, [1, u64::MAX - 2, 16, 0, 0, 0]), efault);
    // 跨出映射末尾
    assert_eq!(syscall(&mut k, SyscallNo::Write, [1, buf + 0xff0, 0x20, 0, 0, 0]), efault);
    assert_eq!(syscall(&mut k, SyscallNo::Open, [0, 0, 0, 0, 0, 0]), efault);
    // 长度为 0 不检查指针
    assert_eq!(syscall(&mut k, SyscallNo::Write, [1, 0x10, 0, 0, 0, 0]), 0);

    assert_eq!(syscall(&mut k, SyscallNo::Write, [99, buf, 1, 0, 0, 0]), Errno::BadFileNumber.as_neg_u64());
}

#[test]
fn test_path_too_long() {
    let (mut k, _) = boot_init();
    let buf = scratch(&mut k, PID_INIT, 2);
    let path = String::from("/").repeat(5000);
    poke_str(&mut k, PID_INIT, buf, &path);
    assert_eq!(
        syscall(&mut k, SyscallNo::Access, [buf, 0, 0, 0, 0, 0]),
        Errno::NameTooLong.as_neg_u64()
    );
}

#[test]
fn test_invalid_signal_numbers() {
    let (mut k, _) = boot_init();
    let einval = Errno::InvalidArgument.as_neg_u64();
    assert_eq!(syscall(&mut k, SyscallNo::Kill, [1, 128, 0, 0, 0, 0]), einval);
    assert_eq!(syscall(&mut k, SyscallNo::Kill, [1, 1 << 40, 0, 0, 0, 0]), einval);
    assert_eq!(syscall(&mut k, SyscallNo::Signal, [0, 0x40_0020, 0, 0, 0, 0]), einval);
    assert_eq!(syscall(&mut k, SyscallNo::Signal, [500, 0x40_0020, 0, 0, 0, 0]), einval);
    assert_eq!(k.signal_send(PID_INIT, None, 0), Err(Errno::InvalidArgument));
    assert_eq!(k.signal_send(PID_INIT, Some(7), SIGUSR1), Err(Errno::NoSuchProcess));
}

#[test]
#[should_panic(expected = "out of physical frames")]
fn test_frame_exhaustion_is_fatal() {
    let (mut k, _) = Fixture { frame_limit: 6, ..Default::default() }.boot();
    let _ = k.spawn_init("/sbin/init.elf", &[], &[]);
}

#[test]
fn test_unwritable_stack_on_delivery() {
    let (mut k, _) = boot_init();
    let child = fork(&mut k);
    k.proc_signal_set_handler(child.pid, SIGUSR1, SigAction::Handler(0x40_0020)).unwrap();
    k.regs_mut(child).unwrap().rsp = 0x5000;
    k.signal_send(child.pid, Some(0), SIGUSR1).unwrap();
    assert_eq!(exit_code(&k, child.pid), EXIT_SIGNAL_BASE + SIGSEGV as i32);
}

#[test]
fn test_sigreturn_with_bad_stack() {
    let (mut k, _) = boot_init();
    let child = fork(&mut k);
    k.regs_mut(child).unwrap().rsp = 0x5000;
    assert_eq!(syscall_as(&mut k, child, SyscallNo::SigReturn, [0; 6]), None);
    assert_eq!(exit_code(&k, child.pid), EXIT_SIGNAL_BASE + SIGILL as i32);

    // 帧可读但不是信号帧
    let buf = scratch(&mut k, PID_INIT, 1);
    let other = fork(&mut k);
    poke(&mut k, other.pid, buf, &[0xaa; 256]);
    k.regs_mut(other).unwrap().rsp = buf + 8;
    assert_eq!(syscall_as(&mut k, other, SyscallNo::SigReturn, [0; 6]), None);
    assert_eq!(exit_code(&k, other.pid), 131);
    assert_eq!(k.signal_send(other.pid, None, SIGUSR1), Err(Errno::NoSuchProcess));
}
