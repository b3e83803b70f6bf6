//! 以宿主线程模拟 hart 与进程，供单元测试使用
//!
//! - 每个线程首次调用时分配一个独立的 hart 号和 pid；
//! - 测试可以通过 [`set_hart`] 把当前线程固定到某个 hart 上；
//! - 睡眠实现为释放锁后让出时间片，由调用方循环重试；
//! - 控制台输出写到标准错误。

use std::cell::Cell;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::driver::console::ConsoleIf;
use crate::spinlock::SpinLock;

use super::{CpuIf, SchedIf};

// 自动分配的 hart 号从较大的值开始，避免与测试显式指定的小编号冲突
static NEXT_HART: AtomicUsize = AtomicUsize::new(0x1000);
static NEXT_PID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static HART: Cell<Option<usize>> = const { Cell::new(None) };
    static PID: Cell<Option<usize>> = const { Cell::new(None) };
    static NOFF: Cell<usize> = const { Cell::new(0) };
}

/// 把当前线程固定到 hart `id` 上。
pub(crate) fn set_hart(id: usize) {
    HART.with(|h| h.set(Some(id)));
}

fn hart() -> usize {
    HART.with(|h| match h.get() {
        Some(id) => id,
        None => {
            let id = NEXT_HART.fetch_add(1, Ordering::Relaxed);
            h.set(Some(id));
            id
        }
    })
}

fn pid() -> usize {
    PID.with(|p| match p.get() {
        Some(id) => id,
        None => {
            let id = NEXT_PID.fetch_add(1, Ordering::Relaxed);
            p.set(Some(id));
            id
        }
    })
}

struct HostedEnv;

#[crate_interface::impl_interface]
impl CpuIf for HostedEnv {
    fn cpu_id() -> usize {
        hart()
    }

    fn push_off() {
        NOFF.with(|n| n.set(n.get() + 1));
    }

    fn pop_off() {
        NOFF.with(|n| match n.get().checked_sub(1) {
            Some(left) => n.set(left),
            None => panic!("pop_off(): count not match"),
        });
    }
}

#[crate_interface::impl_interface]
impl SchedIf for HostedEnv {
    fn sleep(_chan: usize, lk: &SpinLock<()>) {
        unsafe { lk.unlock() };
        std::thread::yield_now();
    }

    fn wakeup(_chan: usize) {}

    fn my_pid() -> usize {
        pid()
    }
}

#[crate_interface::impl_interface]
impl ConsoleIf for HostedEnv {
    fn putc(c: u8) {
        let _ = std::io::stderr().write_all(&[c]);
    }
}
