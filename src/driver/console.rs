//! 控制台输出接口

use crate_interface::call_interface;

/// 由内核的串口驱动实现的字符输出接口。
#[crate_interface::def_interface]
pub trait ConsoleIf {
    /// 同步输出一个字节。
    fn putc(c: u8);
}

/// 向控制台输出单个字符
pub fn putc(c: u8) {
    call_interface!(ConsoleIf::putc(c));
}
