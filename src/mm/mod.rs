//! 内存管理模块
//!
//! 以页为单位管理物理内存：每个 hart 拥有自己的空闲页链表，
//! 本地链表耗尽时再从其他 hart 窃取。

use core::fmt::{self, Display};

pub use addr::{pg_round_down, pg_round_up, Addr, PhysAddr};
pub use kalloc::Kmem;

pub mod addr;
pub mod kalloc;

/// 页分配失败的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KallocError {
    /// 所有 hart 的空闲链表都已耗尽。
    OutOfMemory,
}

impl Display for KallocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KallocError::OutOfMemory => write!(f, "out of physical pages"),
        }
    }
}
