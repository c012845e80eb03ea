//! Tachyon 内核构建脚本
//!
//! 这个脚本在编译前运行，负责：
//! 1. 解析 Kernel.toml 配置文件
//! 2. 生成配置代码到 OUT_DIR/config.rs
//! 3. 导出内核名称/版本等环境变量

use std::env;
use std::fs;
use std::path::PathBuf;

/// 配置文件缺失时使用的默认值
const DEFAULT_CONFIG: &str = r#"
[general]
name = "Tachyon"
version = "0.1.0"
"#;

/// 按 `section.key` 读取整数，缺省时返回 `default`
fn int(config: &toml::Value, section: &str, key: &str, default: i64) -> i64 {
    config
        .get(section)
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_integer())
        .unwrap_or(default)
}

/// 按 `section.key` 读取字符串，缺省时返回 `default`
fn string<'a>(config: &'a toml::Value, section: &str, key: &str, default: &'a str) -> &'a str {
    config
        .get(section)
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_str())
        .unwrap_or(default)
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let config_path = manifest_dir.join("../Kernel.toml");

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={}", config_path.display());

    let content = fs::read_to_string(&config_path).unwrap_or_else(|_| {
        println!("cargo:warning=Kernel.toml not found, using built-in defaults");
        DEFAULT_CONFIG.to_string()
    });

    let config: toml::Value = toml::from_str(&content).expect("Kernel.toml 解析失败");

    let name = string(&config, "general", "name", "Tachyon");
    let version = string(&config, "general", "version", "0.1.0");
    println!("cargo:rustc-env=TACHYON_KERNEL_NAME={}", name);
    println!("cargo:rustc-env=TACHYON_KERNEL_VERSION={}", version);

    let page_size = int(&config, "memory", "page_size", 4096);
    assert!(page_size > 0 && (page_size & (page_size - 1)) == 0, "page_size 必须是 2 的幂");

    let log_level = match string(&config, "debug", "log_level", "info") {
        "error" => "Error",
        "warn" => "Warn",
        "debug" => "Debug",
        "trace" => "Trace",
        _ => "Info",
    };

    let generated = format!(
        r#"// Tachyon 内核配置（自动生成，请勿手动修改）

/// 内核名称
pub const KERNEL_NAME: &str = "{name}";

/// 内核版本
pub const KERNEL_VERSION: &str = "{version}";

/// 页大小
pub const PAGE_SIZE: usize = {page_size};

/// 页大小位移
pub const PAGE_SHIFT: usize = {page_shift};

/// 内核栈页数
pub const KERNEL_STACK_PAGES: usize = {kstack};

/// 主线程用户栈大小 (字节)
pub const USER_STACK_SIZE: usize = {ustack};

/// 附加线程用户栈大小 (字节)
pub const THREAD_STACK_SIZE: usize = {tstack};

/// 用户栈顶地址
pub const USER_STACK_TOP: u64 = {stack_top:#x};

/// 用户/内核地址空间分界
pub const USER_SPLIT: u64 = {split:#x};

/// vdso 映射基址
pub const VDSO_BASE: u64 = {vdso_base:#x};

/// 时钟频率 (Hz)
pub const TICK_HZ: u64 = {tick_hz};

/// 时间片滴答数
pub const TIME_SLICE_TICKS: i64 = {slice};

/// 每进程文件描述符上限
pub const MAX_FDS: usize = {max_fds};

/// init 程序路径
pub const INIT_PATH: &str = "{init_path}";

/// vdso 镜像路径
pub const VDSO_PATH: &str = "{vdso_path}";

/// 默认日志级别
pub const LOG_LEVEL: log::LevelFilter = log::LevelFilter::{log_level};
"#,
        name = name,
        version = version,
        page_size = page_size,
        page_shift = page_size.trailing_zeros(),
        kstack = int(&config, "memory", "kernel_stack_pages", 4),
        ustack = int(&config, "memory", "user_stack_size", 64) * 1024,
        tstack = int(&config, "memory", "thread_stack_size", 16) * 1024,
        stack_top = int(&config, "memory", "user_stack_top", 0x0000_7fff_ff00_0000),
        split = int(&config, "memory", "user_split", 0x0000_8000_0000_0000),
        vdso_base = int(&config, "memory", "vdso_base", 0x0000_7fff_f000_0000),
        tick_hz = int(&config, "scheduler", "tick_hz", 100),
        slice = int(&config, "scheduler", "time_slice_ticks", 1).max(1),
        max_fds = int(&config, "process", "max_fds", 64),
        init_path = string(&config, "process", "init_path", "/sbin/init.elf"),
        vdso_path = string(&config, "process", "vdso_path", "/lib/vdso.so"),
        log_level = log_level,
    );

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let config_file = out_dir.join("config.rs");

    // 只有内容变化时才写入，避免每次编译都更新文件时间戳
    let existing = fs::read_to_string(&config_file).unwrap_or_default();
    if existing != generated {
        fs::write(&config_file, &generated).expect("写入配置文件失败");
    }
}
