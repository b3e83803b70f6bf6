//! 设备驱动模块，包含控制台输出接口与块设备接口

use crate::fs::Buf;

pub mod console;
pub mod ramdisk;

pub use ramdisk::RamDisk;

/// 块设备驱动接口，由块缓存在缓存未命中与写回时调用。
///
/// 读写均为同步操作：返回时数据传输已经完成。
/// 调用时缓冲块的睡眠锁由调用方持有，驱动可以在内部睡眠等待设备中断。
pub trait BlockDevice: Send + Sync {
    /// 在缓冲块 `buf` 与其 `(dev, blockno)` 对应的磁盘块之间传输数据。
    ///
    /// - `writing == false`：从磁盘读入 `buf`；
    /// - `writing == true`：把 `buf` 的内容写到磁盘。
    fn rw(&self, buf: &mut Buf<'_>, writing: bool);
}
