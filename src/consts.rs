//! 内核常量参数

/// 页内偏移位数
pub const PGSHIFT: usize = 12;

/// 物理页大小（字节）
pub const PGSIZE: usize = 1 << PGSHIFT;

/// 支持的最大硬件线程（hart）数
pub const NCPU: usize = 8;

/// 文件系统与块缓存相关参数
pub mod fs {
    /// 磁盘块大小（字节）
    pub const BSIZE: usize = 1024;

    /// 单次文件系统操作最多写入的块数
    pub const MAXOPBLOCKS: usize = 10;

    /// 每个缓存桶中的缓冲块数量
    pub const NBUF: usize = MAXOPBLOCKS * 3;

    /// 块缓存的桶数，取质数以使块号分布均匀
    pub const NBUCKET: usize = 13;
}

/// 物理页分配器相关参数
pub mod mm {
    /// 页面释放时填充的字节，用于暴露悬垂引用
    pub const FREE_JUNK: u8 = 0x01;

    /// 页面分配时填充的字节，用于暴露未初始化读取
    pub const ALLOC_JUNK: u8 = 0x05;
}
