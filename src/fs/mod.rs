//! 文件系统之下的块缓存层
//!
//! 文件系统通过 [`Bcache::bread`] 取得带锁的缓冲块，修改后调用
//! [`Buf::bwrite`] 写回磁盘，用完后释放（丢弃 [`Buf`] 或调用 [`Bcache::brelse`]）。

pub use bio::{Bcache, Buf, BufData};

mod bio;
