//! 用户内存访问
//!
//! 所有访问都显式指定页表，逐页通过 `get_page` 翻译，
//! 因此目标地址空间不必是当前加载的那一张（例如向等待中的父进程写退出状态）。

use alloc::string::String;
use alloc::vec::Vec;

use super::pagemap::TableRoot;
use super::{page_align_down, VirtAddr, PAGE_SIZE};
use crate::arch::Machine;
use crate::config::USER_SPLIT;
use crate::errno::{Errno, KResult};

/// 校验 `[addr, addr + len)` 在用户空间内且每一页都以所需权限映射
pub fn check_user_range(
    machine: &dyn Machine,
    table: TableRoot,
    addr: VirtAddr,
    len: usize,
    write: bool,
) -> KResult<()> {
    if len == 0 {
        return Ok(());
    }
    let end = addr.checked_add(len as u64).ok_or(Errno::BadAddress)?;
    if end > USER_SPLIT {
        return Err(Errno::BadAddress);
    }
    let mut page = page_align_down(addr);
    while page < end {
        let entry = machine.get_page(table, page).ok_or(Errno::BadAddress)?;
        if !entry.is_present() || !entry.is_user() || (write && !entry.is_writable()) {
            return Err(Errno::BadAddress);
        }
        page += PAGE_SIZE as u64;
    }
    Ok(())
}

/// 按页拆分 `[addr, addr + len)`，对每段回调 (物理地址, 缓冲区偏移, 长度)
fn for_each_chunk(
    machine: &dyn Machine,
    table: TableRoot,
    addr: VirtAddr,
    len: usize,
    mut f: impl FnMut(u64, usize, usize),
) -> KResult<()> {
    let mut done = 0usize;
    while done < len {
        let va = addr + done as u64;
        let off = (va % PAGE_SIZE as u64) as usize;
        let n = (PAGE_SIZE - off).min(len - done);
        let entry = machine.get_page(table, va).ok_or(Errno::BadAddress)?;
        if !entry.is_present() {
            return Err(Errno::BadAddress);
        }
        f(entry.paddr + off as u64, done, n);
        done += n;
    }
    Ok(())
}

pub fn copy_from_user(
    machine: &dyn Machine,
    table: TableRoot,
    addr: VirtAddr,
    buf: &mut [u8],
) -> KResult<()> {
    check_user_range(machine, table, addr, buf.len(), false)?;
    read_table(machine, table, addr, buf)
}

pub fn copy_to_user(
    machine: &mut dyn Machine,
    table: TableRoot,
    addr: VirtAddr,
    data: &[u8],
) -> KResult<()> {
    check_user_range(machine, table, addr, data.len(), true)?;
    write_table(machine, table, addr, data)
}

/// 不做权限检查的读取，只要求页存在
pub fn read_table(
    machine: &dyn Machine,
    table: TableRoot,
    addr: VirtAddr,
    buf: &mut [u8],
) -> KResult<()> {
    let len = buf.len();
    let mut chunks = Vec::new();
    for_each_chunk(machine, table, addr, len, |pa, off, n| chunks.push((pa, off, n)))?;
    for (pa, off, n) in chunks {
        machine.read_phys(pa, &mut buf[off..off + n]);
    }
    Ok(())
}

/// 内核向任意地址空间写入（exec 构造栈、加载段时使用）
pub fn write_table(
    machine: &mut dyn Machine,
    table: TableRoot,
    addr: VirtAddr,
    data: &[u8],
) -> KResult<()> {
    let mut chunks = Vec::new();
    for_each_chunk(machine, table, addr, data.len(), |pa, off, n| chunks.push((pa, off, n)))?;
    for (pa, off, n) in chunks {
        machine.write_phys(pa, &data[off..off + n]);
    }
    Ok(())
}

pub fn read_user_u64(machine: &dyn Machine, table: TableRoot, addr: VirtAddr) -> KResult<u64> {
    let mut raw = [0u8; 8];
    copy_from_user(machine, table, addr, &mut raw)?;
    Ok(u64::from_le_bytes(raw))
}

/// 读取以 NUL 结尾的字符串，超过 `max` 字节返回 ENAMETOOLONG
pub fn read_user_cstr(
    machine: &dyn Machine,
    table: TableRoot,
    addr: VirtAddr,
    max: usize,
) -> KResult<String> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if bytes.len() >= max {
            return Err(Errno::NameTooLong);
        }
        copy_from_user(machine, table, addr + bytes.len() as u64, &mut byte)?;
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
    }
    String::from_utf8(bytes).map_err(|_| Errno::InvalidArgument)
}

/// 读取以 NULL 结尾的字符串指针数组 (argv/envp)
pub fn read_user_strv(
    machine: &dyn Machine,
    table: TableRoot,
    addr: VirtAddr,
    max_entries: usize,
    max_len: usize,
) -> KResult<Vec<String>> {
    let mut out = Vec::new();
    if addr == 0 {
        return Ok(out);
    }
    loop {
        if out.len() >= max_entries {
            return Err(Errno::ArgumentListTooLong);
        }
        let ptr = read_user_u64(machine, table, addr + (out.len() as u64) * 8)?;
        if ptr == 0 {
            break;
        }
        out.push(read_user_cstr(machine, table, ptr, max_len)?);
    }
    Ok(out)
}
