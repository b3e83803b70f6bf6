//! 定义系统内核的输出方法与日志记录器

use core::fmt;

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::driver::console;
use crate::process::cpu::my_hart;
use crate::spinlock::SpinLock;

/// 零大小类型（ZST）的打印结构体，用于在多个 CPU 之间对打印操作进行排序。
struct Print;

impl fmt::Write for Print {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            console::putc(byte);
        }
        Ok(())
    }
}

/// 核心打印函数（被宏调用）
///
/// 使用自旋锁保证多核输出不交错。
/// 此函数被声明为pub，因为需要在宏中调用
pub fn _print(args: fmt::Arguments<'_>) {
    use fmt::Write;
    static PRINT: SpinLock<()> = SpinLock::new((), "print");

    let guard = PRINT.lock();
    // 控制台输出不会失败
    let _ = Print.write_fmt(args);
    drop(guard);
}

/// 在终端输出一串字符
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::printf::_print(format_args!($($arg)*));
    };
}

/// 在终端输出一行字符
#[macro_export]
macro_rules! println {
    () => {$crate::print!("\n")};
    ($fmt:expr) => {$crate::print!(concat!($fmt, "\n"))};
    ($fmt:expr, $($arg:tt)*) => {
        $crate::print!(concat!($fmt, "\n"), $($arg)*)
    };
}

/// 把 `log` 门面的记录输出到控制台的日志记录器
struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::println!(
            "[{:>5}][hart {}] {}",
            level_name(record.level()),
            my_hart(),
            record.args()
        );
    }

    fn flush(&self) {}
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// 安装内核日志记录器并设置最大日志级别。
///
/// 重复调用只会更新日志级别。
pub fn init_logger(level: LevelFilter) {
    static LOGGER: KernelLogger = KernelLogger;
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
