//! 信号帧
//!
//! 投递信号时压入用户栈的固定布局记录，处理函数返回时 `ret` 弹出
//! `ret_addr` 跳到 vdso 跳板，跳板调用 sigreturn 恢复。
//!
//! 布局（小端，每项 8 字节，低地址在前）：
//!
//! ```text
//! +0    ret_addr        vdso 跳板
//! +8    gprs[15]        rax rbx rcx rdx rsi rdi rbp r8..r15
//! +128  signum
//! +136  magic
//! +144  rip
//! +152  rflags
//! +160  rsp
//! +168  mask_lo
//! +176  mask_hi
//! +184  prev_signal
//! ```

use crate::arch::TrapFrame;
use crate::signal::{SigNum, SigSet};

/// 帧校验值 ("SIGFRAME")
pub const SIGNAL_FRAME_MAGIC: u64 = 0x5349_4746_5241_4d45;

/// 不能覆盖的栈红区大小
pub const RED_ZONE: u64 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalFrame {
    pub ret_addr: u64,
    pub gprs: [u64; 15],
    pub signum: u64,
    pub magic: u64,
    pub rip: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub saved_mask: SigSet,
    /// 被打断时正在处理的信号，0 表示没有
    pub prev_signal: u64,
}

impl SignalFrame {
    pub const SIZE: usize = 24 * 8;

    pub fn new(regs: &TrapFrame, trampoline: u64, signum: SigNum, mask: SigSet, prev: SigNum) -> Self {
        Self {
            ret_addr: trampoline,
            gprs: regs.gprs(),
            signum: signum as u64,
            magic: SIGNAL_FRAME_MAGIC,
            rip: regs.rip,
            rflags: regs.rflags,
            rsp: regs.rsp,
            saved_mask: mask,
            prev_signal: prev as u64,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let (mask_lo, mask_hi) = self.saved_mask.split();
        let mut words = [0u64; 24];
        words[0] = self.ret_addr;
        words[1..16].copy_from_slice(&self.gprs);
        words[16] = self.signum;
        words[17] = self.magic;
        words[18] = self.rip;
        words[19] = self.rflags;
        words[20] = self.rsp;
        words[21] = mask_lo;
        words[22] = mask_hi;
        words[23] = self.prev_signal;

        let mut out = [0u8; Self::SIZE];
        for (chunk, word) in out.chunks_exact_mut(8).zip(words.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < Self::SIZE {
            return None;
        }
        let mut words = [0u64; 24];
        for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(8)) {
            *word = u64::from_le_bytes(chunk.try_into().ok()?);
        }
        let mut gprs = [0u64; 15];
        gprs.copy_from_slice(&words[1..16]);
        Some(Self {
            ret_addr: words[0],
            gprs,
            signum: words[16],
            magic: words[17],
            rip: words[18],
            rflags: words[19],
            rsp: words[20],
            saved_mask: SigSet::join(words[21], words[22]),
            prev_signal: words[23],
        })
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == SIGNAL_FRAME_MAGIC
    }
}

/// 帧的放置位置
///
/// 跳过红区后留出帧空间并向下 16 字节对齐，再减 8：
/// 处理函数入口处 `rsp + 8` 是 16 的倍数，与 `call` 之后的状态一致
pub fn frame_address(user_rsp: u64) -> u64 {
    let top = user_rsp.wrapping_sub(RED_ZONE + SignalFrame::SIZE as u64);
    (top & !0xf).wrapping_sub(8)
}
