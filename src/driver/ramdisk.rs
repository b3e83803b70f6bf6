//! 内存盘驱动：用一段内存模拟单个块设备

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::consts::fs::BSIZE;
use crate::fs::Buf;
use crate::spinlock::SpinLock;

use super::BlockDevice;

/// 拥有 `N` 个块、设备号为 `dev` 的内存盘。
///
/// 可以在常量上下文中构造，因此能直接放进 `static`。
/// 同时统计读写次数，便于观察块缓存的命中情况。
pub struct RamDisk<const N: usize> {
    dev: u32,
    blocks: SpinLock<[[u8; BSIZE]; N]>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl<const N: usize> RamDisk<N> {
    pub const fn new(dev: u32) -> Self {
        Self {
            dev,
            blocks: SpinLock::new([[0; BSIZE]; N], "ramdisk"),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// 已完成的读操作次数
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// 已完成的写操作次数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// 绕过块缓存直接读取磁盘上某个块的第 `offset` 个字节。
    pub fn peek(&self, blockno: u32, offset: usize) -> u8 {
        self.blocks.lock()[blockno as usize][offset]
    }
}

impl<const N: usize> BlockDevice for RamDisk<N> {
    /// # 可能的错误
    /// 设备号不符或块号越界时 panic，这说明上层传入了错误的块地址。
    fn rw(&self, buf: &mut Buf<'_>, writing: bool) {
        if buf.dev() != self.dev {
            panic!("ramdisk: no such device {}", buf.dev());
        }
        let blockno = buf.blockno() as usize;
        if blockno >= N {
            panic!("ramdisk: blockno {} out of range", blockno);
        }

        let mut blocks = self.blocks.lock();
        if writing {
            blocks[blockno].copy_from_slice(&buf.data()[..]);
            self.writes.fetch_add(1, Ordering::Relaxed);
        } else {
            buf.data_mut().copy_from_slice(&blocks[blockno]);
            self.reads.fetch_add(1, Ordering::Relaxed);
        }
        drop(blocks);
    }
}
