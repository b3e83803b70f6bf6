//! 进程调度接口
//!
//! 块缓存与页分配器本身不包含调度器，而是通过 [`SchedIf`] 与 [`CpuIf`]
//! 向外部内核借用两类能力：
//! - 睡眠/唤醒：睡眠锁在锁被占用时挂起当前进程；
//! - 当前 hart 编号与中断开关：自旋锁与每核页池依赖它们。
//!
//! 内核需要通过 `#[crate_interface::impl_interface]` 各实现一次这些接口。

use crate_interface::call_interface;

use crate::spinlock::{SpinLock, SpinLockGuard};

pub use cpu::{cpu_id, pop_off, push_off, CpuIf};

pub mod cpu;

#[cfg(test)]
pub(crate) mod hosted;

/// 调度器向本模块提供的睡眠/唤醒原语。
#[crate_interface::def_interface]
pub trait SchedIf {
    /// 让当前进程在通道 `chan` 上睡眠。
    ///
    /// 实现必须先取得足以避免丢失唤醒的锁（如进程自身的锁），
    /// 再通过 [`SpinLock::unlock`] 释放 `lk`，然后让出 CPU。
    /// 返回时 `lk` 处于未持有状态，调用者需自行重新获取。
    fn sleep(chan: usize, lk: &SpinLock<()>);

    /// 唤醒所有睡眠在通道 `chan` 上的进程。
    fn wakeup(chan: usize);

    /// 当前进程的标识，用于睡眠锁记录持有者。
    fn my_pid() -> usize;
}

/// 释放 `guard` 对应的自旋锁并在通道 `chan` 上睡眠。
///
/// 被唤醒后锁不会自动重新获取。
pub fn sleep(chan: usize, guard: SpinLockGuard<'_, ()>) {
    let lk = guard.into_lock();
    call_interface!(SchedIf::sleep(chan, lk));
}

/// 唤醒睡眠在通道 `chan` 上的进程。
pub fn wakeup(chan: usize) {
    call_interface!(SchedIf::wakeup(chan));
}

/// 当前进程的标识。
pub fn my_pid() -> usize {
    call_interface!(SchedIf::my_pid())
}
