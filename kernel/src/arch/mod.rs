//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!

//! 架构相关抽象
//!
//! 调度核心只通过 `Machine` 接触硬件：物理页帧、页表、内核栈寄存器和
//! 上下文切换。每个平台提供一个实现；`host` 是基于模拟物理内存的实现，
//! 单元测试和宿主机模拟都运行在它上面。
//!
//! 寄存器布局遵循 x86-64 System V：系统调用号与返回值在 rax，
//! 参数依次为 rdi, rsi, rdx, r10, r8, r9。

pub mod host;

use core::any::Any;

use crate::mm::{PageFlags, PhysAddr, VirtAddr};
use crate::mm::pagemap::{PageEntry, TableRoot};

/// 用户代码段选择子 (GDT 第 4 项, RPL=3)
pub const USER_CS: u64 = 0x23;
/// 用户数据段选择子 (GDT 第 5 项, RPL=3)
pub const USER_SS: u64 = 0x1b;
/// 内核代码段选择子
pub const KERNEL_CS: u64 = 0x08;
/// 内核数据段选择子
pub const KERNEL_SS: u64 = 0x10;

/// RFLAGS.IF
pub const RFLAGS_IF: u64 = 1 << 9;
/// 用户可以通过 sigreturn 恢复的 RFLAGS 位 (CF PF AF ZF SF TF DF OF)
pub const RFLAGS_USER_MASK: u64 = 0xdd5;

/// `syscall` 指令长度，重启系统调用时回退 rip
pub const SYSCALL_INSN_LEN: u64 = 2;

/// 内核直接映射区基址，内核栈通过它寻址
pub const KERNEL_DIRECT_MAP: u64 = 0xffff_8000_0000_0000;

/// 物理地址转内核直接映射虚拟地址
#[inline]
pub const fn phys_to_virt(paddr: PhysAddr) -> VirtAddr {
    paddr + KERNEL_DIRECT_MAP
}

/// 陷入时保存的寄存器帧
///
/// 布局与陷入入口汇编压栈顺序一致（低地址在前）
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// 用户态初始帧
    pub fn new_user(entry: VirtAddr, stack: VirtAddr) -> Self {
        Self {
            rip: entry,
            rsp: stack,
            cs: USER_CS,
            ss: USER_SS,
            rflags: RFLAGS_IF,
            ..Self::default()
        }
    }

    /// 内核线程初始帧
    pub fn new_kernel(entry: VirtAddr, stack: VirtAddr) -> Self {
        Self {
            rip: entry,
            rsp: stack,
            cs: KERNEL_CS,
            ss: KERNEL_SS,
            rflags: RFLAGS_IF,
            ..Self::default()
        }
    }

    /// 系统调用号
    #[inline]
    pub fn syscall_no(&self) -> u64 {
        self.rax
    }

    /// 六个系统调用参数
    #[inline]
    pub fn syscall_args(&self) -> [u64; 6] {
        [self.rdi, self.rsi, self.rdx, self.r10, self.r8, self.r9]
    }

    /// 设置系统调用参数（测试和用户态桩使用）
    pub fn set_syscall(&mut self, no: u64, args: [u64; 6]) {
        self.rax = no;
        self.rdi = args[0];
        self.rsi = args[1];
        self.rdx = args[2];
        self.r10 = args[3];
        self.r8 = args[4];
        self.r9 = args[5];
    }

    /// 通用寄存器，顺序 rax rbx rcx rdx rsi rdi rbp r8..r15
    pub fn gprs(&self) -> [u64; 15] {
        [
            self.rax, self.rbx, self.rcx, self.rdx, self.rsi, self.rdi, self.rbp,
            self.r8, self.r9, self.r10, self.r11, self.r12, self.r13, self.r14, self.r15,
        ]
    }

    pub fn set_gprs(&mut self, gprs: &[u64; 15]) {
        self.rax = gprs[0];
        self.rbx = gprs[1];
        self.rcx = gprs[2];
        self.rdx = gprs[3];
        self.rsi = gprs[4];
        self.rdi = gprs[5];
        self.rbp = gprs[6];
        self.r8 = gprs[7];
        self.r9 = gprs[8];
        self.r10 = gprs[9];
        self.r11 = gprs[10];
        self.r12 = gprs[11];
        self.r13 = gprs[12];
        self.r14 = gprs[13];
        self.r15 = gprs[14];
    }

    /// 是否从用户态陷入
    #[inline]
    pub fn is_user(&self) -> bool {
        self.cs & 3 == 3
    }
}

/// 平台原语
///
/// 页表拥有它映射的用户页帧：`free_table` 同时释放这些页帧，
/// `clone_table` 为每个映射分配新页帧并复制内容（不共享、无写时复制）。
pub trait Machine: Send {
    /// 分配 `count` 个物理连续的页帧，内容未定义
    fn alloc_frames(&mut self, count: usize) -> Option<PhysAddr>;

    /// 释放 `alloc_frames` 得到的页帧
    fn free_frames(&mut self, base: PhysAddr, count: usize);

    fn read_phys(&self, paddr: PhysAddr, buf: &mut [u8]);

    fn write_phys(&mut self, paddr: PhysAddr, data: &[u8]);

    /// 创建只含内核映射的新页表
    fn create_table(&mut self) -> Option<TableRoot>;

    /// 深拷贝页表
    fn clone_table(&mut self, table: TableRoot) -> Option<TableRoot>;

    fn free_table(&mut self, table: TableRoot);

    /// 映射 `pages` 个连续页
    fn map_region(
        &mut self,
        table: TableRoot,
        pages: usize,
        vaddr: VirtAddr,
        paddr: PhysAddr,
        flags: PageFlags,
    );

    /// 查询页表项（用于权限探测）
    fn get_page(&self, table: TableRoot, vaddr: VirtAddr) -> Option<PageEntry>;

    /// 加载页表根 (CR3)
    fn load_table(&mut self, table: TableRoot);

    /// 设置陷入时使用的内核栈 (TSS.RSP0)
    fn set_kernel_stack(&mut self, top: VirtAddr);

    /// 切换到保存在 `kernel_sp` 的寄存器帧
    ///
    /// 真实硬件上不会返回调用者；宿主实现记录切换后返回
    fn context_switch(&mut self, kernel_sp: VirtAddr);

    fn disable_interrupts(&mut self);

    /// 停机直到下一次中断
    fn halt(&mut self);

    /// 取回具体平台类型，用于读取平台特有的诊断状态
    fn as_any(&self) -> &dyn Any;
}
