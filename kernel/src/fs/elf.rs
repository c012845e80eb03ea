//! ELF 文件格式解析
//!
//! 参考 Linux 内核的 ELF 加载器 (fs/binfmt_elf.c)
//!
//! 支持的 ELF 格式：
//! - 64-bit ELF (ELF64)
//! - 小端序 (Little Endian)
//! - x86-64 可执行文件 (ET_EXEC) 和共享目标 (ET_DYN，仅 vdso)
//!
//! 所有字段都按偏移逐个解码，不对输入缓冲区做任何对齐假设。

use crate::errno::Errno;

/// ELF 识别 magic number
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1;
pub const EV_CURRENT: u8 = 1;

/// 可重定位文件
pub const ET_REL: u16 = 1;
/// 可执行文件
pub const ET_EXEC: u16 = 2;
/// 共享目标文件
pub const ET_DYN: u16 = 3;

/// AMD x86-64
pub const EM_X86_64: u16 = 62;

/// 可加载段
pub const PT_LOAD: u32 = 1;
/// 解释器路径
pub const PT_INTERP: u32 = 3;

/// 程序头段标志
pub const PF_X: u32 = 0x1; // 可执行
pub const PF_W: u32 = 0x2; // 可写
pub const PF_R: u32 = 0x4; // 可读

/// 节类型
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_DYNSYM: u32 = 11;

fn u16_at(data: &[u8], off: usize) -> Option<u16> {
    Some(u16::from_le_bytes(data.get(off..off + 2)?.try_into().ok()?))
}

fn u32_at(data: &[u8], off: usize) -> Option<u32> {
    Some(u32::from_le_bytes(data.get(off..off + 4)?.try_into().ok()?))
}

fn u64_at(data: &[u8], off: usize) -> Option<u64> {
    Some(u64::from_le_bytes(data.get(off..off + 8)?.try_into().ok()?))
}

/// ELF 文件头 (64-bit)
///
/// 对应 Elf64_Ehdr (include/uapi/linux/elf.h)
#[derive(Debug, Clone, Copy)]
pub struct Elf64Ehdr {
    pub e_ident: [u8; 16],
    /// 文件类型
    pub e_type: u16,
    /// 机器类型
    pub e_machine: u16,
    pub e_version: u32,
    /// 入口点地址
    pub e_entry: u64,
    /// 程序头表偏移
    pub e_phoff: u64,
    /// 节头表偏移
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    /// 节头字符串表索引
    pub e_shstrndx: u16,
}

impl Elf64Ehdr {
    pub const SIZE: usize = 64;

    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < Self::SIZE {
            return Err(ElfError::InvalidFormat);
        }
        let mut e_ident = [0u8; 16];
        e_ident.copy_from_slice(&data[..16]);
        let h = || -> Option<Self> {
            Some(Self {
                e_ident,
                e_type: u16_at(data, 16)?,
                e_machine: u16_at(data, 18)?,
                e_version: u32_at(data, 20)?,
                e_entry: u64_at(data, 24)?,
                e_phoff: u64_at(data, 32)?,
                e_shoff: u64_at(data, 40)?,
                e_flags: u32_at(data, 48)?,
                e_ehsize: u16_at(data, 52)?,
                e_phentsize: u16_at(data, 54)?,
                e_phnum: u16_at(data, 56)?,
                e_shentsize: u16_at(data, 58)?,
                e_shnum: u16_at(data, 60)?,
                e_shstrndx: u16_at(data, 62)?,
            })
        };
        h().ok_or(ElfError::InvalidFormat)
    }

    pub fn is_executable(&self) -> bool {
        self.e_type == ET_EXEC
    }

    pub fn check_machine(&self) -> bool {
        self.e_machine == EM_X86_64
    }
}

/// 程序头
///
/// 对应 Elf64_Phdr
#[derive(Debug, Clone, Copy)]
pub struct Elf64Phdr {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

impl Elf64Phdr {
    pub const SIZE: usize = 56;

    fn parse(data: &[u8], off: usize) -> Option<Self> {
        Some(Self {
            p_type: u32_at(data, off)?,
            p_flags: u32_at(data, off + 4)?,
            p_offset: u64_at(data, off + 8)?,
            p_vaddr: u64_at(data, off + 16)?,
            p_paddr: u64_at(data, off + 24)?,
            p_filesz: u64_at(data, off + 32)?,
            p_memsz: u64_at(data, off + 40)?,
            p_align: u64_at(data, off + 48)?,
        })
    }

    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    pub fn is_writable(&self) -> bool {
        self.p_flags & PF_W != 0
    }

    pub fn is_executable(&self) -> bool {
        self.p_flags & PF_X != 0
    }
}

/// 节头
///
/// 对应 Elf64_Shdr
#[derive(Debug, Clone, Copy)]
pub struct Elf64Shdr {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

impl Elf64Shdr {
    pub const SIZE: usize = 64;

    fn parse(data: &[u8], off: usize) -> Option<Self> {
        Some(Self {
            sh_name: u32_at(data, off)?,
            sh_type: u32_at(data, off + 4)?,
            sh_flags: u64_at(data, off + 8)?,
            sh_addr: u64_at(data, off + 16)?,
            sh_offset: u64_at(data, off + 24)?,
            sh_size: u64_at(data, off + 32)?,
            sh_link: u32_at(data, off + 40)?,
            sh_info: u32_at(data, off + 44)?,
            sh_addralign: u64_at(data, off + 48)?,
            sh_entsize: u64_at(data, off + 56)?,
        })
    }
}

/// 符号表项
///
/// 对应 Elf64_Sym
#[derive(Debug, Clone, Copy)]
pub struct Elf64Sym {
    pub st_name: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

impl Elf64Sym {
    pub const SIZE: usize = 24;

    fn parse(data: &[u8], off: usize) -> Option<Self> {
        Some(Self {
            st_name: u32_at(data, off)?,
            st_info: *data.get(off + 4)?,
            st_other: *data.get(off + 5)?,
            st_shndx: u16_at(data, off + 6)?,
            st_value: u64_at(data, off + 8)?,
            st_size: u64_at(data, off + 16)?,
        })
    }
}

/// 已校验的 ELF 映像
pub struct ElfFile<'a> {
    data: &'a [u8],
    pub header: Elf64Ehdr,
}

impl<'a> ElfFile<'a> {
    /// 解析并校验文件头和头表边界 (elf_verify)
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        let header = Elf64Ehdr::parse(data)?;
        let ident = &header.e_ident;
        if ident[..4] != ELF_MAGIC {
            return Err(ElfError::InvalidHeader);
        }
        if ident[4] != ELFCLASS64 || ident[5] != ELFDATA2LSB || ident[6] != EV_CURRENT {
            return Err(ElfError::InvalidHeader);
        }
        if !header.check_machine() {
            return Err(ElfError::WrongMachine);
        }
        if header.e_phnum > 0 {
            if header.e_phentsize as usize != Elf64Phdr::SIZE {
                return Err(ElfError::InvalidProgramHeaders);
            }
            table_in_bounds(data, header.e_phoff, header.e_phnum, Elf64Phdr::SIZE)
                .ok_or(ElfError::InvalidProgramHeaders)?;
        }
        if header.e_shnum > 0 {
            if header.e_shentsize as usize != Elf64Shdr::SIZE {
                return Err(ElfError::InvalidSectionHeaders);
            }
            table_in_bounds(data, header.e_shoff, header.e_shnum, Elf64Shdr::SIZE)
                .ok_or(ElfError::InvalidSectionHeaders)?;
        }
        Ok(Self { data, header })
    }

    /// 校验为可加载的可执行文件：ET_EXEC 且至少有一个合法的 PT_LOAD 段
    pub fn parse_executable(data: &'a [u8]) -> Result<Self, ElfError> {
        let elf = Self::parse(data)?;
        if !elf.header.is_executable() {
            return Err(ElfError::NotExecutable);
        }
        elf.check_load_segments()?;
        Ok(elf)
    }

    /// 校验为共享目标（vdso）
    pub fn parse_shared(data: &'a [u8]) -> Result<Self, ElfError> {
        let elf = Self::parse(data)?;
        if elf.header.e_type != ET_DYN {
            return Err(ElfError::NotExecutable);
        }
        elf.check_load_segments()?;
        Ok(elf)
    }

    fn check_load_segments(&self) -> Result<(), ElfError> {
        let mut count = 0;
        for phdr in self.load_segments() {
            if phdr.p_filesz > phdr.p_memsz {
                return Err(ElfError::InvalidSegment);
            }
            self.segment_data(&phdr)?;
            phdr.p_vaddr
                .checked_add(phdr.p_memsz)
                .ok_or(ElfError::InvalidSegment)?;
            count += 1;
        }
        if count == 0 {
            return Err(ElfError::NoLoadSegments);
        }
        Ok(())
    }

    pub fn entry(&self) -> u64 {
        self.header.e_entry
    }

    pub fn program_headers(&self) -> impl Iterator<Item = Elf64Phdr> + '_ {
        let base = self.header.e_phoff as usize;
        (0..self.header.e_phnum as usize)
            .filter_map(move |i| Elf64Phdr::parse(self.data, base + i * Elf64Phdr::SIZE))
    }

    pub fn load_segments(&self) -> impl Iterator<Item = Elf64Phdr> + '_ {
        self.program_headers().filter(|p| p.is_load())
    }

    /// 段在文件中的内容
    pub fn segment_data(&self, phdr: &Elf64Phdr) -> Result<&'a [u8], ElfError> {
        let start = phdr.p_offset as usize;
        let end = start
            .checked_add(phdr.p_filesz as usize)
            .ok_or(ElfError::InvalidSegment)?;
        self.data.get(start..end).ok_or(ElfError::InvalidSegment)
    }

    pub fn section_headers(&self) -> impl Iterator<Item = Elf64Shdr> + '_ {
        let base = self.header.e_shoff as usize;
        (0..self.header.e_shnum as usize)
            .filter_map(move |i| Elf64Shdr::parse(self.data, base + i * Elf64Shdr::SIZE))
    }

    fn section(&self, index: usize) -> Option<Elf64Shdr> {
        if index >= self.header.e_shnum as usize {
            return None;
        }
        Elf64Shdr::parse(self.data, self.header.e_shoff as usize + index * Elf64Shdr::SIZE)
    }

    fn section_data(&self, sh: &Elf64Shdr) -> Option<&'a [u8]> {
        let start = sh.sh_offset as usize;
        self.data.get(start..start.checked_add(sh.sh_size as usize)?)
    }

    /// 字符串表中 `offset` 处的字符串
    fn string_at(&self, strtab: &Elf64Shdr, offset: u32) -> Option<&'a str> {
        let table = self.section_data(strtab)?;
        let tail = table.get(offset as usize..)?;
        let len = tail.iter().position(|&b| b == 0)?;
        core::str::from_utf8(&tail[..len]).ok()
    }

    /// 按名称查找节 (elf_locate_section)
    pub fn locate_section(&self, name: &str) -> Option<Elf64Shdr> {
        let shstr = self.section(self.header.e_shstrndx as usize)?;
        self.section_headers()
            .find(|sh| self.string_at(&shstr, sh.sh_name) == Some(name))
    }

    /// 在 `.dynsym` 中按名称查找符号，返回 st_value (elf_locate_symbol)
    pub fn find_dynamic_symbol(&self, name: &str) -> Option<u64> {
        let dynsym = self.section_headers().find(|sh| sh.sh_type == SHT_DYNSYM)?;
        let strtab = self.section(dynsym.sh_link as usize)?;
        if strtab.sh_type != SHT_STRTAB {
            return None;
        }
        let syms = self.section_data(&dynsym)?;
        (0..syms.len() / Elf64Sym::SIZE)
            .filter_map(|i| Elf64Sym::parse(syms, i * Elf64Sym::SIZE))
            .find(|sym| sym.st_name != 0 && self.string_at(&strtab, sym.st_name) == Some(name))
            .map(|sym| sym.st_value)
    }
}

fn table_in_bounds(data: &[u8], offset: u64, count: u16, entsize: usize) -> Option<()> {
    let end = (offset as usize).checked_add(count as usize * entsize)?;
    (end <= data.len()).then_some(())
}

/// ELF 错误类型
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ElfError {
    /// 文件过短
    InvalidFormat,
    /// 无效的 ELF 头
    InvalidHeader,
    /// 不可执行文件
    NotExecutable,
    /// 机器类型不匹配
    WrongMachine,
    /// 无效的程序头
    InvalidProgramHeaders,
    InvalidSectionHeaders,
    /// 无效的段
    InvalidSegment,
    /// 没有 PT_LOAD 段
    NoLoadSegments,
}

impl From<ElfError> for Errno {
    fn from(_: ElfError) -> Self {
        Errno::ExecFormatError
    }
}
