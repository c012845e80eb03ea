//! 内核日志
//!
//! `log` 门面的内核后端：每条记录格式化为 `[LEVEL target] message` 写入控制台。
//! 控制台由平台在启动时通过 `init()` 注册。

use core::fmt::{self, Write};

use log::{Log, Metadata, Record};
use spin::Once;

use crate::config::LOG_LEVEL;

/// 日志输出设备
pub trait Console: Sync {
    fn write_str(&self, s: &str);
}

struct ConsoleWriter<'a>(&'a dyn Console);

impl fmt::Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

pub struct KernelLogger {
    console: Once<&'static dyn Console>,
}

static LOGGER: KernelLogger = KernelLogger { console: Once::new() };

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(console) = self.console.get() {
            let mut out = ConsoleWriter(*console);
            let _ = writeln!(out, "[{:<5} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// 注册控制台并安装日志后端
///
/// 重复调用不会替换已注册的控制台，返回 false
pub fn init(console: &'static dyn Console) -> bool {
    if LOGGER.console.get().is_some() {
        return false;
    }
    LOGGER.console.call_once(|| console);
    match log::set_logger(&LOGGER) {
        Ok(()) => {
            log::set_max_level(LOG_LEVEL);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use spin::Mutex;

    struct Capture(Mutex<String>);

    impl Console for Capture {
        fn write_str(&self, s: &str) {
            self.0.lock().push_str(s);
        }
    }

    static CAPTURE: Capture = Capture(Mutex::new(String::new()));

    #[test]
    fn test_logger_formats_level_and_target() {
        init(&CAPTURE);
        log::set_max_level(log::LevelFilter::Info);
        log::info!(target: "logtest", "hello {}", 42);
        assert!(CAPTURE.0.lock().contains("logtest] hello 42"));
        // 第二次注册被拒绝
        assert!(!init(&CAPTURE));
    }
}
