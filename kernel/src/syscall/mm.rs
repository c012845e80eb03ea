//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 内存相关系统调用

use super::{SysRet, SyscallResult};
use crate::errno::Errno;
use crate::kernel::Kernel;
use crate::mm::{MapFlags, Prot};
use crate::process::ThreadRef;

impl Kernel {
    /// mmap(addr, length, prot, flags, fd, offset)
    ///
    /// 非匿名映射从 fd 对应的节点读取内容；fd 必须可读
    pub(super) fn sys_mmap(&mut self, t: ThreadRef, a: [u64; 6]) -> SyscallResult {
        let [addr, len, prot, flags, fd, offset] = a;
        let prot = u32::try_from(prot)
            .ok()
            .and_then(Prot::from_bits)
            .ok_or(Errno::InvalidArgument)?;
        let flags = u32::try_from(flags)
            .ok()
            .and_then(MapFlags::from_bits)
            .ok_or(Errno::InvalidArgument)?;
        if flags.contains(MapFlags::SHARED) == flags.contains(MapFlags::PRIVATE) {
            return Err(Errno::InvalidArgument);
        }
        let file = if flags.contains(MapFlags::ANONYMOUS) {
            None
        } else {
            let desc = self
                .procs
                .get(t.pid)
                .and_then(|p| p.files.as_ref())
                .ok_or(Errno::BadFileNumber)?
                .get(fd)?;
            if !desc.flags.readable() {
                return Err(Errno::PermissionDenied);
            }
            Some(desc.node.clone())
        };
        let base = self.proc_mmap(t.pid, addr, len, prot, flags, file, offset)?;
        Ok(SysRet::Value(base))
    }
}
