//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 测试夹具
//!
//! - 在 `HostMachine` + `MemFs` 上启动的内核
//! - 最小的 ELF64 可执行文件 / vdso 构造器
//! - 以当前线程身份执行系统调用、读写用户内存

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::arch::host::HostMachine;
use crate::fs::elf::{ET_DYN, ET_EXEC, EM_X86_64, PF_R, PF_W, PF_X, SHT_DYNSYM, SHT_STRTAB};
use crate::fs::memfs::TtyNode;
use crate::fs::MemFs;
use crate::kernel::Kernel;
use crate::mm::uaccess::{read_table, write_table};
use crate::mm::{MapFlags, Prot, VirtAddr};
use crate::process::{Pid, ThreadRef, PID_INIT};
use crate::syscall::SyscallNo;

/// vdso 中信号跳板的偏移
pub const VDSO_TRAMPOLINE_OFFSET: u64 = 0x100;

pub const INIT_ENTRY: u64 = 0x40_0000;
pub const SH_ENTRY: u64 = 0x40_1000;
/// 测试程序的数据段
pub const DATA_BASE: u64 = 0x60_0000;
pub const DATA_INIT: &[u8] = b"tachyon-data";

/// 最小 ELF64 构造器
pub struct ElfBuilder {
    e_type: u16,
    entry: u64,
    segments: Vec<(u64, Vec<u8>, u64, u32)>,
    symbols: Vec<(String, u64)>,
}

fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

impl ElfBuilder {
    pub fn new(entry: u64) -> Self {
        Self { e_type: ET_EXEC, entry, segments: Vec::new(), symbols: Vec::new() }
    }

    /// 生成共享目标 (ET_DYN)
    pub fn shared(mut self) -> Self {
        self.e_type = ET_DYN;
        self
    }

    pub fn segment(mut self, vaddr: u64, data: &[u8], memsz: u64, flags: u32) -> Self {
        self.segments.push((vaddr, data.to_vec(), memsz, flags));
        self
    }

    /// 在 .dynsym 中导出符号
    pub fn symbol(mut self, name: &str, value: u64) -> Self {
        self.symbols.push((String::from(name), value));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let phnum = self.segments.len();
        let mut body = Vec::new();
        let data_start = 64 + 56 * phnum;
        let mut offsets = Vec::new();
        for (_, data, _, _) in &self.segments {
            offsets.push((data_start + body.len()) as u64);
            body.extend_from_slice(data);
        }

        // 节：null, .dynsym, .dynstr, .shstrtab
        let mut sections: Vec<[u64; 6]> = Vec::new();
        let mut shoff = 0u64;
        if !self.symbols.is_empty() {
            let mut dynstr = vec![0u8];
            let mut dynsym = vec![0u8; 24];
            for (name, value) in &self.symbols {
                put32(&mut dynsym, dynstr.len() as u32);
                dynsym.push(0x12); // STB_GLOBAL | STT_FUNC
                dynsym.push(0);
                put16(&mut dynsym, 1);
                put64(&mut dynsym, *value);
                put64(&mut dynsym, 0);
                dynstr.extend_from_slice(name.as_bytes());
                dynstr.push(0);
            }
            let shstrtab = b"\0.dynsym\0.dynstr\0.shstrtab\0".to_vec();

            let place = |bytes: &[u8], body: &mut Vec<u8>| {
                let off = (data_start + body.len()) as u64;
                body.extend_from_slice(bytes);
                off
            };
            let dynsym_off = place(&dynsym, &mut body);
            let dynstr_off = place(&dynstr, &mut body);
            let shstr_off = place(&shstrtab, &mut body);
            while (data_start + body.len()) % 8 != 0 {
                body.push(0);
            }
            shoff = (data_start + body.len()) as u64;

            // [name, type, offset, size, link, entsize]
            sections.push([0; 6]);
            sections.push([1, SHT_DYNSYM as u64, dynsym_off, dynsym.len() as u64, 2, 24]);
            sections.push([9, SHT_STRTAB as u64, dynstr_off, dynstr.len() as u64, 0, 0]);
            sections.push([17, SHT_STRTAB as u64, shstr_off, shstrtab.len() as u64, 0, 0]);
        }

        let mut out = Vec::new();
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        out.extend_from_slice(&[0u8; 8]);
        put16(&mut out, self.e_type);
        put16(&mut out, EM_X86_64);
        put32(&mut out, 1);
        put64(&mut out, self.entry);
        put64(&mut out, if phnum > 0 { 64 } else { 0 });
        put64(&mut out, shoff);
        put32(&mut out, 0);
        put16(&mut out, 64);
        put16(&mut out, 56);
        put16(&mut out, phnum as u16);
        put16(&mut out, 64);
        put16(&mut out, sections.len() as u16);
        put16(&mut out, if sections.is_empty() { 0 } else { 3 });

        for ((vaddr, data, memsz, flags), off) in self.segments.iter().zip(&offsets) {
            put32(&mut out, 1); // PT_LOAD
            put32(&mut out, *flags);
            put64(&mut out, *off);
            put64(&mut out, *vaddr);
            put64(&mut out, *vaddr);
            put64(&mut out, data.len() as u64);
            put64(&mut out, *memsz);
            put64(&mut out, 0x1000);
        }
        out.extend_from_slice(&body);

        for [name, ty, offset, size, link, entsize] in sections {
            put32(&mut out, name as u32);
            put32(&mut out, ty as u32);
            put64(&mut out, 0);
            put64(&mut out, 0);
            put64(&mut out, offset);
            put64(&mut out, size);
            put32(&mut out, link as u32);
            put32(&mut out, 0);
            put64(&mut out, 8);
            put64(&mut out, entsize);
        }
        out
    }
}

/// vdso：一个可执行段，`__vdso_sigreturn` 处是 `mov eax, 15; syscall`
pub fn build_vdso() -> Vec<u8> {
    let mut code = vec![0xccu8; VDSO_TRAMPOLINE_OFFSET as usize];
    code.extend_from_slice(&[0xb8, 0x0f, 0x00, 0x00, 0x00, 0x0f, 0x05]);
    ElfBuilder::new(0)
        .shared()
        .segment(0, &code, 0x1000, PF_R | PF_X)
        .symbol("__vdso_sigreturn", VDSO_TRAMPOLINE_OFFSET)
        .build()
}

/// 测试程序：代码段 + 带 BSS 的数据段
pub fn build_program(entry: u64) -> Vec<u8> {
    ElfBuilder::new(entry)
        .segment(entry & !0xfff, &[0x90; 64], 0x1000, PF_R | PF_X)
        .segment(DATA_BASE, DATA_INIT, 0x2000, PF_R | PF_W)
        .build()
}

/// 启动选项
pub struct Fixture {
    pub with_vdso: bool,
    pub frame_limit: usize,
}

impl Default for Fixture {
    fn default() -> Self {
        Self { with_vdso: true, frame_limit: usize::MAX }
    }
}

impl Fixture {
    pub fn boot(self) -> (Kernel, Arc<TtyNode>) {
        let fs = MemFs::new();
        for dir in ["/dev", "/lib", "/sbin", "/bin", "/mnt"] {
            fs.mkdir_all(dir).unwrap();
        }
        let tty = fs.create_tty("/dev/tty").unwrap();
        if self.with_vdso {
            fs.create_file("/lib/vdso.so", &build_vdso()).unwrap();
        }
        fs.create_file("/sbin/init.elf", &build_program(INIT_ENTRY)).unwrap();
        fs.create_file("/sbin/sh.elf", &build_program(SH_ENTRY)).unwrap();
        fs.create_file("/bin/bad.elf", b"#!/bin/sh\necho not an elf\n").unwrap();
        fs.create_file("/etc-motd", b"hello from memfs").unwrap();

        let machine = HostMachine::with_frame_limit(self.frame_limit);
        (Kernel::boot(Box::new(machine), Box::new(fs)), tty)
    }
}

/// 默认启动：带 vdso，不限页帧
pub fn boot() -> (Kernel, Arc<TtyNode>) {
    Fixture::default().boot()
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| String::from(*s)).collect()
}

/// 启动 init 并让它成为当前线程
pub fn boot_init() -> (Kernel, Arc<TtyNode>) {
    let (mut k, tty) = boot();
    start_init(&mut k);
    (k, tty)
}

pub fn start_init(k: &mut Kernel) -> ThreadRef {
    let pid = k.spawn_init("/sbin/init.elf", &strings(&["init"]), &strings(&["HOME=/"])).unwrap();
    assert_eq!(pid, PID_INIT);
    let t = ThreadRef::new(pid, 0);
    switch_to(k, t);
    t
}

pub fn host(k: &Kernel) -> &HostMachine {
    k.machine.as_any().downcast_ref::<HostMachine>().unwrap()
}

/// 让 `t` 成为当前线程
pub fn switch_to(k: &mut Kernel, t: ThreadRef) {
    if k.current() != Some(t) {
        k.scheduler_switch(t);
    }
    assert_eq!(k.current(), Some(t));
}

/// 以 `t` 的身份执行系统调用，返回 rax；线程已不存在时返回 None
pub fn syscall_as(k: &mut Kernel, t: ThreadRef, no: SyscallNo, args: [u64; 6]) -> Option<u64> {
    switch_to(k, t);
    k.regs_mut(t).unwrap().set_syscall(no as u64, args);
    k.syscall_entry();
    k.regs(t).map(|r| r.rax)
}

/// 以当前线程身份执行系统调用
pub fn syscall(k: &mut Kernel, no: SyscallNo, args: [u64; 6]) -> u64 {
    let t = k.current().unwrap();
    syscall_as(k, t, no, args).unwrap()
}

/// 把系统调用返回值解释为有符号数
pub fn ret(v: u64) -> i64 {
    v as i64
}

/// 在 `pid` 中映射一块读写内存
pub fn scratch(k: &mut Kernel, pid: Pid, pages: u64) -> VirtAddr {
    k.proc_mmap(
        pid,
        0x1000_0000,
        pages * 0x1000,
        Prot::READ | Prot::WRITE,
        MapFlags::PRIVATE | MapFlags::ANONYMOUS,
        None,
        0,
    )
    .unwrap()
}

pub fn poke(k: &mut Kernel, pid: Pid, addr: VirtAddr, data: &[u8]) {
    let table = k.process(pid).unwrap().memory.as_ref().unwrap().table;
    write_table(&mut *k.machine, table, addr, data).unwrap();
}

pub fn peek(k: &Kernel, pid: Pid, addr: VirtAddr, len: usize) -> Vec<u8> {
    let table = k.process(pid).unwrap().memory.as_ref().unwrap().table;
    let mut buf = vec![0u8; len];
    read_table(&*k.machine, table, addr, &mut buf).unwrap();
    buf
}

pub fn peek_u64(k: &Kernel, pid: Pid, addr: VirtAddr) -> u64 {
    u64::from_le_bytes(peek(k, pid, addr, 8).try_into().unwrap())
}

pub fn peek_i32(k: &Kernel, pid: Pid, addr: VirtAddr) -> i32 {
    i32::from_le_bytes(peek(k, pid, addr, 4).try_into().unwrap())
}

/// 写入以 NUL 结尾的字符串
pub fn poke_str(k: &mut Kernel, pid: Pid, addr: VirtAddr, s: &str) {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    poke(k, pid, addr, &bytes);
}

/// 在 `addr` 处构造 NULL 结尾的字符串指针数组，字符串放在 `addr + 0x200` 之后
pub fn poke_strv(k: &mut Kernel, pid: Pid, addr: VirtAddr, items: &[&str]) {
    let mut strings_at = addr + 0x200;
    for (i, s) in items.iter().enumerate() {
        poke_str(k, pid, strings_at, s);
        poke(k, pid, addr + 8 * i as u64, &strings_at.to_le_bytes());
        strings_at += s.len() as u64 + 1;
    }
    poke(k, pid, addr + 8 * items.len() as u64, &0u64.to_le_bytes());
}

/// 从当前线程 fork，返回子进程线程 0
pub fn fork(k: &mut Kernel) -> ThreadRef {
    let child = syscall(k, SyscallNo::Fork, [0; 6]);
    assert!(ret(child) > 0, "fork failed: {}", ret(child));
    ThreadRef::new(child as Pid, 0)
}
