//! xv6 内核的块缓存与物理页分配器
//!
//! - [`fs::Bcache`]：按块号分桶的 LRU 块缓存，缓冲块内容由睡眠锁保护；
//! - [`mm::Kmem`]：每个 hart 一条空闲页链表的物理页分配器，本地耗尽时跨核窃取。
//!
//! 处理器编号、中断开关、睡眠/唤醒与控制台输出由内核通过
//! [`process::CpuIf`]、[`process::SchedIf`] 与 [`driver::console::ConsoleIf`] 提供。

#![cfg_attr(not(test), no_std)]
#![warn(rust_2018_idioms)]

#[macro_use]
pub mod printf;

pub mod consts;
pub mod driver;
pub mod fs;
pub mod mm;
pub mod process;
pub mod sleeplock;
pub mod spinlock;
