//! 文件描述符表
//!
//! 对应 Linux 的 struct files_struct：下标即 fd，空槽为 None。
//! fork 时整表按值复制，复制出的描述符共享同一节点但偏移量各自独立。

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::{NodeRef, OpenFlags};
use crate::config::MAX_FDS;
use crate::errno::{Errno, KResult};

#[derive(Clone)]
pub struct FileDescriptor {
    pub node: NodeRef,
    pub offset: u64,
    pub flags: OpenFlags,
}

impl FileDescriptor {
    pub fn new(node: NodeRef, flags: OpenFlags) -> Self {
        Self { node, offset: 0, flags }
    }
}

impl PartialEq for FileDescriptor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
            && self.offset == other.offset
            && self.flags == other.flags
    }
}

impl core::fmt::Debug for FileDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileDescriptor")
            .field("node", &self.node.id())
            .field("offset", &self.offset)
            .field("flags", &self.flags)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FdTable {
    slots: Vec<Option<FileDescriptor>>,
}

impl FdTable {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// 安装到最小的空闲 fd
    pub fn install(&mut self, desc: FileDescriptor) -> KResult<usize> {
        if let Some(fd) = self.slots.iter().position(|s| s.is_none()) {
            self.slots[fd] = Some(desc);
            return Ok(fd);
        }
        if self.slots.len() >= MAX_FDS {
            return Err(Errno::TooManyOpenFiles);
        }
        self.slots.push(Some(desc));
        Ok(self.slots.len() - 1)
    }

    pub fn get(&self, fd: u64) -> KResult<&FileDescriptor> {
        self.slots
            .get(fd as usize)
            .and_then(|s| s.as_ref())
            .ok_or(Errno::BadFileNumber)
    }

    pub fn get_mut(&mut self, fd: u64) -> KResult<&mut FileDescriptor> {
        self.slots
            .get_mut(fd as usize)
            .and_then(|s| s.as_mut())
            .ok_or(Errno::BadFileNumber)
    }

    pub fn close(&mut self, fd: u64) -> KResult<()> {
        let slot = self.slots.get_mut(fd as usize).ok_or(Errno::BadFileNumber)?;
        slot.take().ok_or(Errno::BadFileNumber)?;
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}
