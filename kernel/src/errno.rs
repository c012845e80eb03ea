//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 错误码
//!
//! 数值与 include/uapi/asm-generic/errno-base.h 一致。内核内部统一返回
//! `KResult<T>`，只有系统调用分发层把错误压平成负数写回 rax。

use core::fmt;

macro_rules! errno_table {
    ($($variant:ident = $code:literal, $name:literal, $desc:literal;)+) => {
        /// 系统调用可见的错误码
        #[repr(i32)]
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        pub enum Errno {
            $(
                #[doc = concat!($name, ": ", $desc)]
                $variant = $code,
            )+
        }

        impl Errno {
            /// 符号名，如 `ESRCH`
            pub const fn name(self) -> &'static str {
                match self {
                    $(Errno::$variant => $name,)+
                }
            }

            /// strerror 风格的描述
            pub const fn description(self) -> &'static str {
                match self {
                    $(Errno::$variant => $desc,)+
                }
            }

            /// 按数值查找，未收录的返回 `None`
            pub const fn from_code(code: i32) -> Option<Errno> {
                match code {
                    $($code => Some(Errno::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

errno_table! {
    OperationNotPermitted = 1, "EPERM", "Operation not permitted";
    NoSuchFileOrDirectory = 2, "ENOENT", "No such file or directory";
    NoSuchProcess = 3, "ESRCH", "No such process";
    InterruptedSystemCall = 4, "EINTR", "Interrupted system call";
    ArgumentListTooLong = 7, "E2BIG", "Argument list too long";
    ExecFormatError = 8, "ENOEXEC", "Exec format error";
    BadFileNumber = 9, "EBADF", "Bad file number";
    NoChild = 10, "ECHILD", "No child processes";
    TryAgain = 11, "EAGAIN", "Try again";
    OutOfMemory = 12, "ENOMEM", "Out of memory";
    PermissionDenied = 13, "EACCES", "Permission denied";
    BadAddress = 14, "EFAULT", "Bad address";
    DeviceOrResourceBusy = 16, "EBUSY", "Device or resource busy";
    FileExists = 17, "EEXIST", "File exists";
    NotADirectory = 20, "ENOTDIR", "Not a directory";
    IsADirectory = 21, "EISDIR", "Is a directory";
    InvalidArgument = 22, "EINVAL", "Invalid argument";
    TooManyOpenFiles = 24, "EMFILE", "Too many open files";
    NotATypewriter = 25, "ENOTTY", "Not a typewriter";
    IllegalSeek = 29, "ESPIPE", "Illegal seek";
    OutOfRange = 34, "ERANGE", "Math result not representable";
    NameTooLong = 36, "ENAMETOOLONG", "File name too long";
}

impl Errno {
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// 写入返回值寄存器的形式
    #[inline]
    pub const fn as_neg_u64(self) -> u64 {
        (-(self as i64)) as u64
    }

    /// 从返回值寄存器解码；非错误返回值给出 `None`
    pub const fn from_ret(ret: u64) -> Option<Errno> {
        let v = ret as i64;
        if v < 0 && v >= -4095 {
            Errno::from_code(-v as i32)
        } else {
            None
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.description())
    }
}

pub type KResult<T> = Result<T, Errno>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_codes_match_linux() {
        assert_eq!(Errno::NoSuchProcess.as_i32(), 3);
        assert_eq!(Errno::NoChild.as_i32(), 10);
        assert_eq!(Errno::NameTooLong.as_i32(), 36);
        assert_eq!(Errno::from_code(17), Some(Errno::FileExists));
        assert_eq!(Errno::from_code(6), None);
    }

    #[test]
    fn test_register_encoding() {
        let ret = Errno::BadAddress.as_neg_u64();
        assert_eq!(ret as i64, -14);
        assert_eq!(Errno::from_ret(ret), Some(Errno::BadAddress));
        assert_eq!(Errno::from_ret(0x40_0000), None);
        assert_eq!(Errno::from_ret(0), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Errno::IllegalSeek), "ESPIPE (Illegal seek)");
        assert_eq!(Errno::TryAgain.name(), "EAGAIN");
    }
}
