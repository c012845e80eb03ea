//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 文件相关系统调用
//!
//! 阻塞型节点（终端）读不到数据时，线程挂到节点的等待队列上，
//! rip 回退到 syscall 指令并恢复 rax 为调用号，被唤醒后整个调用重新执行。

use alloc::vec;

use super::{SysRet, SyscallNo, SyscallResult, PATH_MAX};
use crate::arch::SYSCALL_INSN_LEN;
use crate::errno::{Errno, KResult};
use crate::fs::{FileDescriptor, NodeRef, OpenFlags};
use crate::kernel::Kernel;
use crate::mm::uaccess::{check_user_range, copy_from_user, copy_to_user, read_user_cstr};
use crate::mm::VirtAddr;
use crate::process::{ThreadRef, WaitKey};

pub const SEEK_SET: u64 = 0;
pub const SEEK_CUR: u64 = 1;
pub const SEEK_END: u64 = 2;

impl Kernel {
    /// fd 对应的描述符（复制一份，避免持有进程表的借用）
    fn fd_lookup(&self, t: ThreadRef, fd: u64) -> KResult<FileDescriptor> {
        self.procs
            .get(t.pid)
            .and_then(|p| p.files.as_ref())
            .ok_or(Errno::BadFileNumber)?
            .get(fd)
            .cloned()
    }

    fn fd_set_offset(&mut self, t: ThreadRef, fd: u64, offset: u64) {
        if let Some(desc) = self
            .procs
            .get_mut(t.pid)
            .and_then(|p| p.files.as_mut())
            .and_then(|f| f.get_mut(fd).ok())
        {
            desc.offset = offset;
        }
    }

    fn user_path(&self, t: ThreadRef, addr: VirtAddr) -> KResult<alloc::string::String> {
        let table = self.user_table(t.pid)?;
        read_user_cstr(&*self.machine, table, addr, PATH_MAX)
    }

    /// 读 `node` 并写入用户缓冲区
    ///
    /// 返回 None 表示线程已阻塞等待数据
    fn read_into_user(
        &mut self,
        t: ThreadRef,
        desc: &FileDescriptor,
        buf: VirtAddr,
        count: u64,
        offset: u64,
        no: SyscallNo,
    ) -> KResult<Option<usize>> {
        let (node, flags) = (&desc.node, desc.flags);
        let table = self.user_table(t.pid)?;
        check_user_range(&*self.machine, table, buf, count as usize, true)?;
        let mut data = vec![0u8; count as usize];
        let n = match node.read(&mut data, offset) {
            Ok(n) => n,
            Err(Errno::TryAgain) if node.is_blocking() && !flags.contains(OpenFlags::NONBLOCK) => {
                if let Some(regs) = self.regs_mut(t) {
                    regs.rip -= SYSCALL_INSN_LEN;
                    regs.rax = no as u64;
                }
                self.wait_queue_block(t, WaitKey::Io(node.id()));
                log::trace!(target: "syscall", "{:?} blocked reading node {}", t, node.id());
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        copy_to_user(&mut *self.machine, table, buf, &data[..n])?;
        Ok(Some(n))
    }

    pub(super) fn sys_read(&mut self, t: ThreadRef, fd: u64, buf: VirtAddr, count: u64) -> SyscallResult {
        let desc = self.fd_lookup(t, fd)?;
        if !desc.flags.readable() {
            return Err(Errno::BadFileNumber);
        }
        match self.read_into_user(t, &desc, buf, count, desc.offset, SyscallNo::Read)? {
            Some(n) => {
                if desc.node.is_seekable() {
                    self.fd_set_offset(t, fd, desc.offset + n as u64);
                }
                Ok(SysRet::Value(n as u64))
            }
            None => Ok(SysRet::Keep),
        }
    }

    pub(super) fn sys_pread(
        &mut self,
        t: ThreadRef,
        fd: u64,
        buf: VirtAddr,
        count: u64,
        offset: u64,
    ) -> SyscallResult {
        let desc = self.fd_lookup(t, fd)?;
        if !desc.flags.readable() {
            return Err(Errno::BadFileNumber);
        }
        if !desc.node.is_seekable() {
            return Err(Errno::IllegalSeek);
        }
        match self.read_into_user(t, &desc, buf, count, offset, SyscallNo::Pread)? {
            Some(n) => Ok(SysRet::Value(n as u64)),
            None => Ok(SysRet::Keep),
        }
    }

    fn write_from_user(&mut self, t: ThreadRef, node: &NodeRef, buf: VirtAddr, count: u64, offset: u64) -> KResult<usize> {
        let table = self.user_table(t.pid)?;
        check_user_range(&*self.machine, table, buf, count as usize, false)?;
        let mut data = vec![0u8; count as usize];
        copy_from_user(&*self.machine, table, buf, &mut data)?;
        node.write(&data, offset)
    }

    pub(super) fn sys_write(&mut self, t: ThreadRef, fd: u64, buf: VirtAddr, count: u64) -> SyscallResult {
        let desc = self.fd_lookup(t, fd)?;
        if !desc.flags.writable() {
            return Err(Errno::BadFileNumber);
        }
        let offset = if desc.flags.contains(OpenFlags::APPEND) {
            desc.node.size()
        } else {
            desc.offset
        };
        let n = self.write_from_user(t, &desc.node, buf, count, offset)?;
        if desc.node.is_seekable() {
            self.fd_set_offset(t, fd, offset + n as u64);
        }
        Ok(SysRet::Value(n as u64))
    }

    pub(super) fn sys_pwrite(
        &mut self,
        t: ThreadRef,
        fd: u64,
        buf: VirtAddr,
        count: u64,
        offset: u64,
    ) -> SyscallResult {
        let desc = self.fd_lookup(t, fd)?;
        if !desc.flags.writable() {
            return Err(Errno::BadFileNumber);
        }
        if !desc.node.is_seekable() {
            return Err(Errno::IllegalSeek);
        }
        let n = self.write_from_user(t, &desc.node, buf, count, offset)?;
        Ok(SysRet::Value(n as u64))
    }

    pub(super) fn sys_seek(&mut self, t: ThreadRef, fd: u64, offset: i64, whence: u64) -> SyscallResult {
        let desc = self.fd_lookup(t, fd)?;
        if !desc.node.is_seekable() {
            return Err(Errno::IllegalSeek);
        }
        let base = match whence {
            SEEK_SET => 0,
            SEEK_CUR => desc.offset as i64,
            SEEK_END => desc.node.size() as i64,
            _ => return Err(Errno::InvalidArgument),
        };
        let pos = base.checked_add(offset).ok_or(Errno::OutOfRange)?;
        if pos < 0 {
            return Err(Errno::InvalidArgument);
        }
        self.fd_set_offset(t, fd, pos as u64);
        Ok(SysRet::Value(pos as u64))
    }

    pub(super) fn sys_open(&mut self, t: ThreadRef, path: VirtAddr, flags: u64) -> SyscallResult {
        let path = self.user_path(t, path)?;
        let flags = OpenFlags::from_bits_truncate(flags as u32);
        let node = self.vfs.open(&path, flags)?;
        let files = self
            .procs
            .get_mut(t.pid)
            .and_then(|p| p.files.as_mut())
            .ok_or(Errno::BadFileNumber)?;
        let fd = files.install(FileDescriptor::new(node, flags))?;
        log::debug!(target: "syscall", "pid {} opened {} as fd {}", t.pid, path, fd);
        Ok(SysRet::Value(fd as u64))
    }

    pub(super) fn sys_close(&mut self, t: ThreadRef, fd: u64) -> SyscallResult {
        self.procs
            .get_mut(t.pid)
            .and_then(|p| p.files.as_mut())
            .ok_or(Errno::BadFileNumber)?
            .close(fd)?;
        Ok(SysRet::Value(0))
    }

    pub(super) fn sys_mkdir(&mut self, t: ThreadRef, path: VirtAddr) -> SyscallResult {
        let path = self.user_path(t, path)?;
        self.vfs.mkdir(&path)?;
        Ok(SysRet::Value(0))
    }

    pub(super) fn sys_access(&mut self, t: ThreadRef, path: VirtAddr, mode: u64) -> SyscallResult {
        let path = self.user_path(t, path)?;
        self.vfs.access(&path, mode as u32)?;
        Ok(SysRet::Value(0))
    }

    pub(super) fn sys_ioctl(&mut self, t: ThreadRef, fd: u64, request: u64, arg: u64) -> SyscallResult {
        let desc = self.fd_lookup(t, fd)?;
        let ret = desc.node.ioctl(request, arg)?;
        Ok(SysRet::Value(ret))
    }

    pub(super) fn sys_mount(
        &mut self,
        t: ThreadRef,
        source: VirtAddr,
        target: VirtAddr,
        fstype: VirtAddr,
    ) -> SyscallResult {
        let source = self.user_path(t, source)?;
        let target = self.user_path(t, target)?;
        let fstype = self.user_path(t, fstype)?;
        self.vfs.mount(&source, &target, &fstype)?;
        log::info!(target: "syscall", "mounted {} ({}) on {}", source, fstype, target);
        Ok(SysRet::Value(0))
    }

    pub(super) fn sys_unmount(&mut self, t: ThreadRef, target: VirtAddr) -> SyscallResult {
        let target = self.user_path(t, target)?;
        self.vfs.unmount(&target)?;
        Ok(SysRet::Value(0))
    }
}
