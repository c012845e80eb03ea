//! 内存文件系统
//!
//! 扁平路径表实现的最小 VFS：目录、普通文件、一个终端字符设备和挂载表。
//! 启动时由平台把 init、shell、vdso 等映像写入其中。

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::{NodeKind, NodeRef, OpenFlags, Vfs, VfsNode};
use crate::errno::{Errno, KResult};

/// 终端 ioctl: TCGETS
pub const TCGETS: u64 = 0x5401;
/// 终端 ioctl: TIOCGWINSZ
pub const TIOCGWINSZ: u64 = 0x5413;

struct DirNode {
    id: u64,
}

impl VfsNode for DirNode {
    fn id(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Directory
    }

    fn size(&self) -> u64 {
        0
    }

    fn read(&self, _buf: &mut [u8], _offset: u64) -> KResult<usize> {
        Err(Errno::IsADirectory)
    }

    fn write(&self, _data: &[u8], _offset: u64) -> KResult<usize> {
        Err(Errno::IsADirectory)
    }
}

pub struct MemFile {
    id: u64,
    data: Mutex<Vec<u8>>,
}

impl VfsNode for MemFile {
    fn id(&self) -> u64 {
        self.id
    }

    fn truncate(&self) -> KResult<()> {
        self.data.lock().clear();
        Ok(())
    }

    fn kind(&self) -> NodeKind {
        NodeKind::File
    }

    fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn read(&self, buf: &mut [u8], offset: u64) -> KResult<usize> {
        let data = self.data.lock();
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write(&self, src: &[u8], offset: u64) -> KResult<usize> {
        let mut data = self.data.lock();
        let start = offset as usize;
        let end = start.checked_add(src.len()).ok_or(Errno::OutOfRange)?;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(src);
        Ok(src.len())
    }
}

/// 终端设备
///
/// 输入缓冲为空时读取返回 EAGAIN，由系统调用层挂起调用线程
pub struct TtyNode {
    id: u64,
    input: Mutex<VecDeque<u8>>,
    output: Mutex<Vec<u8>>,
}

impl TtyNode {
    /// 模拟键盘输入
    pub fn push_input(&self, bytes: &[u8]) {
        self.input.lock().extend(bytes.iter().copied());
    }

    /// 取走已输出的内容
    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut *self.output.lock())
    }
}

impl VfsNode for TtyNode {
    fn id(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::CharDevice
    }

    fn size(&self) -> u64 {
        0
    }

    fn read(&self, buf: &mut [u8], _offset: u64) -> KResult<usize> {
        let mut input = self.input.lock();
        if input.is_empty() {
            return Err(Errno::TryAgain);
        }
        let n = buf.len().min(input.len());
        for (dst, src) in buf.iter_mut().zip(input.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write(&self, data: &[u8], _offset: u64) -> KResult<usize> {
        self.output.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn ioctl(&self, request: u64, _arg: u64) -> KResult<u64> {
        match request {
            TCGETS | TIOCGWINSZ => Ok(0),
            _ => Err(Errno::InvalidArgument),
        }
    }

    fn is_blocking(&self) -> bool {
        true
    }
}

struct Inner {
    nodes: BTreeMap<String, NodeRef>,
    /// 挂载点 -> (源, 类型)
    mounts: BTreeMap<String, (String, String)>,
}

pub struct MemFs {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

/// 规范化绝对路径：合并重复的 '/'，去掉结尾的 '/'
fn normalize(path: &str) -> KResult<String> {
    if !path.starts_with('/') {
        return Err(Errno::NoSuchFileOrDirectory);
    }
    let mut out = String::new();
    for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

impl MemFs {
    pub fn new() -> Self {
        let fs = Self {
            inner: Mutex::new(Inner { nodes: BTreeMap::new(), mounts: BTreeMap::new() }),
            next_id: AtomicU64::new(1),
        };
        let root: NodeRef = Arc::new(DirNode { id: fs.alloc_id() });
        fs.inner.lock().nodes.insert("/".to_string(), root);
        fs
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// 插入新节点，父目录必须存在
    fn insert(&self, path: &str, node: NodeRef) -> KResult<()> {
        let path = normalize(path)?;
        let mut inner = self.inner.lock();
        if inner.nodes.contains_key(&path) {
            return Err(Errno::FileExists);
        }
        match inner.nodes.get(parent_of(&path)) {
            Some(p) if p.kind() == NodeKind::Directory => {}
            Some(_) => return Err(Errno::NotADirectory),
            None => return Err(Errno::NoSuchFileOrDirectory),
        }
        inner.nodes.insert(path, node);
        Ok(())
    }

    /// 创建普通文件并写入内容
    pub fn create_file(&self, path: &str, data: &[u8]) -> KResult<NodeRef> {
        let node: NodeRef = Arc::new(MemFile { id: self.alloc_id(), data: Mutex::new(data.to_vec()) });
        self.insert(path, node.clone())?;
        Ok(node)
    }

    /// 创建终端设备
    pub fn create_tty(&self, path: &str) -> KResult<Arc<TtyNode>> {
        let tty = Arc::new(TtyNode {
            id: self.alloc_id(),
            input: Mutex::new(VecDeque::new()),
            output: Mutex::new(Vec::new()),
        });
        self.insert(path, tty.clone())?;
        Ok(tty)
    }

    /// 逐级创建目录
    pub fn mkdir_all(&self, path: &str) -> KResult<()> {
        let path = normalize(path)?;
        let mut prefix = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            prefix.push('/');
            prefix.push_str(part);
            match self.mkdir(&prefix) {
                Ok(()) | Err(Errno::FileExists) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn is_mounted(&self, target: &str) -> bool {
        normalize(target).map_or(false, |t| self.inner.lock().mounts.contains_key(&t))
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs for MemFs {
    fn open(&self, path: &str, flags: OpenFlags) -> KResult<NodeRef> {
        let norm = normalize(path)?;
        let existing = self.inner.lock().nodes.get(&norm).cloned();
        let node = match existing {
            Some(node) => node,
            None if flags.contains(OpenFlags::CREAT) => self.create_file(&norm, &[])?,
            None => return Err(Errno::NoSuchFileOrDirectory),
        };
        match node.kind() {
            NodeKind::Directory if flags.writable() => return Err(Errno::IsADirectory),
            NodeKind::Directory => {}
            _ if flags.contains(OpenFlags::DIRECTORY) => return Err(Errno::NotADirectory),
            NodeKind::File if flags.contains(OpenFlags::TRUNC) && flags.writable() => {
                node.truncate()?;
            }
            _ => {}
        }
        Ok(node)
    }

    fn mkdir(&self, path: &str) -> KResult<()> {
        let node: NodeRef = Arc::new(DirNode { id: self.alloc_id() });
        self.insert(path, node)
    }

    fn access(&self, path: &str, _mode: u32) -> KResult<()> {
        let path = normalize(path)?;
        if self.inner.lock().nodes.contains_key(&path) {
            Ok(())
        } else {
            Err(Errno::NoSuchFileOrDirectory)
        }
    }

    fn mount(&self, source: &str, target: &str, fstype: &str) -> KResult<()> {
        if fstype.is_empty() {
            return Err(Errno::InvalidArgument);
        }
        let target = normalize(target)?;
        let mut inner = self.inner.lock();
        match inner.nodes.get(&target) {
            Some(n) if n.kind() == NodeKind::Directory => {}
            Some(_) => return Err(Errno::NotADirectory),
            None => return Err(Errno::NoSuchFileOrDirectory),
        }
        if inner.mounts.contains_key(&target) {
            return Err(Errno::DeviceOrResourceBusy);
        }
        inner.mounts.insert(target, (source.to_string(), fstype.to_string()));
        Ok(())
    }

    fn unmount(&self, target: &str) -> KResult<()> {
        let target = normalize(target)?;
        self.inner
            .lock()
            .mounts
            .remove(&target)
            .map(|_| ())
            .ok_or(Errno::InvalidArgument)
    }
}
