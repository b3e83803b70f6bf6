//! 处理器状态接口，用于读取当前 hart 编号与控制中断开关

use crate_interface::call_interface;

/// 由内核的 CPU 管理器实现的处理器接口。
#[crate_interface::def_interface]
pub trait CpuIf {
    /// 当前 hart 的编号，取值范围为 `0..NCPU`。
    ///
    /// 必须在关闭中断的情况下调用，以防止读取期间被迁移到另一个 hart。
    fn cpu_id() -> usize;

    /// 关闭中断并增加嵌套计数。
    fn push_off();

    /// 减少嵌套计数，计数归零且之前中断为开启状态时重新开启中断。
    fn pop_off();
}

/// 读取当前 hart 编号。
///
/// # 安全性
/// 调用者必须已通过 [`push_off`] 关闭中断，否则返回值可能在使用前就已过期。
#[inline]
pub unsafe fn cpu_id() -> usize {
    call_interface!(CpuIf::cpu_id())
}

/// 关闭中断，与 [`pop_off`] 成对使用，允许嵌套。
#[inline]
pub fn push_off() {
    call_interface!(CpuIf::push_off());
}

/// 解除一层 [`push_off`]。
#[inline]
pub fn pop_off() {
    call_interface!(CpuIf::pop_off());
}

/// 在关闭中断的情况下读取当前 hart 编号。
///
/// 返回后调用者可能已经被迁移，只适合用于选择每核资源。
pub fn my_hart() -> usize {
    push_off();
    let id = unsafe { cpu_id() };
    pop_off();
    id
}
