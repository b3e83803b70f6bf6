//! 缓存层
//!
//! 块缓存由 `NBUCKET` 个桶组成，块号对桶数取模决定所在的桶。
//! 每个桶各自拥有 `NBUF` 个缓冲块、一条按最近使用排序的环形链表，
//! 以及保护链表与元数据的自旋锁；不同桶之间不会发生锁竞争。
//! 缓冲块内容由各自的睡眠锁保护，持有者可以在持锁期间进行磁盘 I/O。

use array_macro::array;

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::consts::fs::{BSIZE, NBUCKET, NBUF};
use crate::driver::BlockDevice;
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::SpinLock;

/// 缓冲区缓存（Buffer Cache）结构体，用于块设备的读写缓存。
///
/// `Bcache` 提供了一个固定大小的内存缓冲区池，用于缓存磁盘块数据，
/// 以减少重复的磁盘访问并提升 I/O 性能。它结合 LRU（最近最少使用）替换策略
/// 维护块缓冲的使用顺序，并通过自旋锁与睡眠锁机制实现线程安全的数据访问。
///
/// 该结构可以在常量上下文中构造，通常放在内核的 `static` 中，
/// 之后以共享引用的方式交给文件系统使用。
pub struct Bcache {
    /// 按 `blockno % NBUCKET` 划分的桶，每个桶持有完整的 `NBUF` 个缓冲块。
    buckets: [Bucket; NBUCKET],

    /// 缓存未命中与写回时使用的块设备。
    disk: &'static dyn BlockDevice,
}

impl Bcache {
    /// 创建块缓存，每个桶的链表在构造时即已建立，所有缓冲块内容均无效。
    pub const fn new(disk: &'static dyn BlockDevice) -> Self {
        Self {
            buckets: array![_ => Bucket::new(); NBUCKET],
            disk,
        }
    }

    fn bucket(&self, blockno: u32) -> &Bucket {
        &self.buckets[blockno as usize % NBUCKET]
    }

    /// 获取指定设备与块号对应的缓冲块。
    ///
    /// # 功能说明
    /// 查找是否已缓存给定的 `(dev, blockno)`：命中则返回已存在的缓冲块；
    /// 否则回收所在桶中最久未使用且未被引用的缓冲块，并将其分配给新请求。
    /// 该函数不涉及磁盘读写，返回的缓冲块内容可能无效。
    ///
    /// # 流程解释
    /// - 锁住所在桶的 `BufLru`，保证查找与回收的原子性；
    /// - 调用 `find_cached` 查找缓存，命中则增加引用计数；
    /// - 未命中时调用 `recycle` 从 LRU 端回收一个引用计数为 0 的缓冲块，
    ///   重置其 `valid` 状态并更新 `(dev, blockno)`；
    /// - 释放桶锁后才获取缓冲块的睡眠锁，此处可能睡眠。
    ///
    /// # 可能的错误
    /// - 当桶内所有缓冲块都处于被引用状态时，触发 panic（`"bget: no buffers"`），
    ///   这意味着上层泄漏了缓冲块。
    pub fn bget(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let bucket = self.bucket(blockno);
        let mut ctrl = bucket.ctrl.lock();

        let (index, recycled) = match ctrl.find_cached(dev, blockno) {
            Some(index) => (index, false),
            None => match ctrl.recycle(dev, blockno) {
                Some(index) => {
                    bucket.bufs[index].valid.store(false, Ordering::Relaxed);
                    (index, true)
                }
                None => panic!("bget: no buffers"),
            },
        };
        drop(ctrl);

        if recycled {
            log::debug!("bcache: block ({}, {}) takes slot {}", dev, blockno, index);
        }

        Buf {
            index,
            dev,
            blockno,
            bucket,
            disk: self.disk,
            data: Some(bucket.bufs[index].data.lock()),
        }
    }

    /// 从缓冲区缓存中读取指定设备与块号对应的数据。
    ///
    /// 若缓冲块尚未从磁盘加载，则同步读取一次并标记为有效。
    /// 返回的缓冲块仍然持有睡眠锁。
    pub fn bread(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let mut b = self.bget(dev, blockno);
        let bucket = b.bucket;
        let valid = &bucket.bufs[b.index].valid;
        if !valid.load(Ordering::Relaxed) {
            self.disk.rw(&mut b, false);
            valid.store(true, Ordering::Relaxed);
        }
        b
    }

    /// 释放缓冲块，等价于丢弃 `b`。
    pub fn brelse(&self, b: Buf<'_>) {
        drop(b);
    }

    /// 查询驻留在缓存中的块的引用计数，块不在缓存中时返回 `None`。
    pub fn refcnt(&self, dev: u32, blockno: u32) -> Option<usize> {
        let ctrl = self.bucket(blockno).ctrl.lock();
        ctrl.position(dev, blockno).map(|index| ctrl.inner[index].refcnt)
    }
}

/// 一个缓存桶：缓冲块数组及其控制结构。
struct Bucket {
    /// 控制 LRU 链表与元数据（引用计数、块号、设备号）的自旋锁。
    ctrl: SpinLock<BufLru>,

    /// 缓冲块数组，下标与 `BufLru::inner` 一一对应。
    bufs: [BufInner; NBUF],
}

impl Bucket {
    const fn new() -> Self {
        Self {
            ctrl: SpinLock::new(BufLru::new(), "bcache"),
            bufs: array![_ => BufInner::new(); NBUF],
        }
    }

    /// 减少缓冲块的引用计数，归零时移至 LRU 链表的最近使用端。
    fn brelse(&self, index: usize) {
        self.ctrl.lock().move_if_no_ref(index);
    }
}

/// 缓冲块数据的包装结构，表示一个已分配的磁盘块缓存实体。
///
/// `Buf` 代表一个特定 `(dev, blockno)` 的缓冲块，
/// 持有对其数据的独占访问权限（由 `SleepLockGuard` 保护），
/// 并在生命周期结束时自动释放睡眠锁、更新引用计数与 LRU 状态。
/// 因此每次获取都恰好对应一次释放。
pub struct Buf<'a> {
    /// 缓冲块在所在桶中的下标。
    index: usize,

    dev: u32,

    blockno: u32,

    /// 缓冲块所在的桶，释放与 pin/unpin 时使用。
    bucket: &'a Bucket,

    /// 写回时使用的块设备。
    disk: &'a dyn BlockDevice,

    /// 缓冲数据的睡眠锁保护访问器。
    ///
    /// 在 `Buf` 生命周期内保证始终为 `Some`，
    /// 在 `Drop` 中先取出并释放，再更新引用计数。
    data: Option<SleepLockGuard<'a, BufData>>,
}

impl<'a> Buf<'a> {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    pub fn data(&self) -> &BufData {
        match self.data.as_deref() {
            Some(data) => data,
            None => panic!("buf: data not locked"),
        }
    }

    pub fn data_mut(&mut self) -> &mut BufData {
        match self.data.as_deref_mut() {
            Some(data) => data,
            None => panic!("buf: data not locked"),
        }
    }

    /// 当前进程是否持有该缓冲块的睡眠锁。
    fn holding(&self) -> bool {
        self.data.as_ref().map_or(false, |guard| guard.holding())
    }

    /// 将缓冲块内容同步写回磁盘。
    ///
    /// 不释放睡眠锁，也不改变引用计数。
    /// 调用者必须是持有睡眠锁的进程，否则 panic。
    pub fn bwrite(&mut self) {
        if !self.holding() {
            panic!("bwrite");
        }
        let disk = self.disk;
        disk.rw(self, true);
    }

    /// 将当前缓冲块的引用计数加一，表示“钉住”该块，防止其被回收。
    ///
    /// 钉住的效果在释放缓冲块之后依然保持，需与 `unpin` 配对使用。
    pub fn pin(&self) {
        self.bucket.ctrl.lock().inner[self.index].refcnt += 1;
    }

    /// 将当前缓冲块的引用计数减一，释放“钉住”状态。
    ///
    /// # 可能的错误
    /// 引用计数只剩持有者自身的一份时，说明没有匹配的 `pin`，触发 panic。
    pub fn unpin(&self) {
        let mut ctrl = self.bucket.ctrl.lock();
        let rc = &mut ctrl.inner[self.index].refcnt;
        if *rc <= 1 {
            panic!("bunpin: unmatched");
        }
        *rc -= 1;
    }
}

impl<'a> Drop for Buf<'a> {
    fn drop(&mut self) {
        match self.data.take() {
            Some(guard) if guard.holding() => drop(guard),
            _ => panic!("brelse"),
        }
        self.bucket.brelse(self.index);
    }
}

/// 缓存桶的 LRU（最近最少使用）链表控制结构。
///
/// 链表是以下标链接的环形双向链表：`head` 为最近使用端，
/// `inner[head].prev` 为最久未使用端。
struct BufLru {
    inner: [BufCtrl; NBUF],
    head: usize,
}

impl BufLru {
    /// 构造时把所有控制块按下标顺序连成环。
    const fn new() -> Self {
        let mut inner = array![_ => BufCtrl::new(); NBUF];
        let mut i = 0;
        while i < NBUF {
            inner[i].prev = (i + NBUF - 1) % NBUF;
            inner[i].next = (i + 1) % NBUF;
            i += 1;
        }
        Self { inner, head: 0 }
    }

    /// 从最近使用端开始查找 `(dev, blockno)` 所在的下标。
    fn position(&self, dev: u32, blockno: u32) -> Option<usize> {
        let mut b = self.head;
        loop {
            let bref = &self.inner[b];
            if bref.dev == dev && bref.blockno == blockno {
                return Some(b);
            }
            b = bref.next;
            if b == self.head {
                return None;
            }
        }
    }

    /// 查找缓存中的 `(dev, blockno)`，命中时引用计数加一并返回其下标。
    fn find_cached(&mut self, dev: u32, blockno: u32) -> Option<usize> {
        let index = self.position(dev, blockno)?;
        self.inner[index].refcnt += 1;
        Some(index)
    }

    /// 从最久未使用端开始寻找引用计数为 0 的缓冲块并分配给 `(dev, blockno)`。
    ///
    /// 只有未被引用的块会被选中，被持有或被钉住的块不会被替换。
    fn recycle(&mut self, dev: u32, blockno: u32) -> Option<usize> {
        let tail = self.inner[self.head].prev;
        let mut b = tail;
        loop {
            let bref = &mut self.inner[b];
            if bref.refcnt == 0 {
                bref.dev = dev;
                bref.blockno = blockno;
                bref.refcnt = 1;
                return Some(b);
            }
            b = bref.prev;
            if b == tail {
                return None;
            }
        }
    }

    /// 引用计数减一，归零时把缓冲块移到最近使用端。
    fn move_if_no_ref(&mut self, index: usize) {
        let b = &mut self.inner[index];
        b.refcnt = match b.refcnt.checked_sub(1) {
            Some(rc) => rc,
            None => panic!("brelse: refcnt underflow"),
        };
        if b.refcnt != 0 || index == self.head {
            return;
        }

        // 分离
        let (prev, next) = (b.prev, b.next);
        self.inner[prev].next = next;
        self.inner[next].prev = prev;

        // 插入到 head 之前
        let head = self.head;
        let tail = self.inner[head].prev;
        self.inner[index].prev = tail;
        self.inner[index].next = head;
        self.inner[tail].next = index;
        self.inner[head].prev = index;
        self.head = index;
    }
}

/// 缓冲块控制结构，记录缓冲区的元信息并构建 LRU 链表。
struct BufCtrl {
    dev: u32,
    blockno: u32,
    prev: usize,
    next: usize,

    /// 持有者、等待者与 pin 的总数；为 0 时可被 `recycle` 回收。
    refcnt: usize,
}

impl BufCtrl {
    const fn new() -> Self {
        Self {
            // 初始身份不对应任何真实块
            dev: u32::MAX,
            blockno: u32::MAX,
            prev: 0,
            next: 0,
            refcnt: 0,
        }
    }
}

/// 缓冲块的数据部分，包含实际的磁盘块内容及其有效性标志。
struct BufInner {
    /// 内容是否与磁盘一致。
    ///
    /// 由 `bget` 在持有桶锁时清除，由 `bread` 在持有睡眠锁时置位。
    valid: AtomicBool,

    /// 缓冲块的实际数据，受睡眠锁保护。
    data: SleepLock<BufData>,
}

impl BufInner {
    const fn new() -> Self {
        Self {
            valid: AtomicBool::new(false),
            data: SleepLock::new(BufData::new(), "buffer"),
        }
    }
}

/// BufData 的对齐方式应足以满足可能由此结构体转换而来的其他结构体的需求。
#[repr(C, align(8))]
pub struct BufData([u8; BSIZE]);

impl BufData {
    const fn new() -> Self {
        Self([0; BSIZE])
    }
}

impl Deref for BufData {
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::panic::{self, AssertUnwindSafe};
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::driver::RamDisk;

    const DEV: u32 = 1;
    const NBLOCK: usize = 512;

    /// 第 `bucket` 个桶中的第 `k` 个块号
    fn block_in(bucket: usize, k: usize) -> u32 {
        (bucket + k * NBUCKET) as u32
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let start = Instant::now();
        while !cond() {
            assert!(start.elapsed() < Duration::from_secs(10), "timed out");
            thread::yield_now();
        }
    }

    #[test]
    fn read_hits_cache_after_first_fill() {
        static DISK: RamDisk<NBLOCK> = RamDisk::new(DEV);
        static BCACHE: Bcache = Bcache::new(&DISK);

        let b = BCACHE.bread(DEV, 5);
        assert_eq!(b.blockno(), 5);
        assert!(b.data().iter().all(|&x| x == 0));
        drop(b);
        assert_eq!(DISK.reads(), 1);

        let b = BCACHE.bread(DEV, 5);
        BCACHE.brelse(b);
        assert_eq!(DISK.reads(), 1);
        assert_eq!(BCACHE.refcnt(DEV, 5), Some(0));
    }

    #[test]
    fn write_survives_eviction() {
        static DISK: RamDisk<NBLOCK> = RamDisk::new(DEV);
        static BCACHE: Bcache = Bcache::new(&DISK);

        let mut b = BCACHE.bread(DEV, 3);
        b.data_mut()[..4].copy_from_slice(b"xv6!");
        b.bwrite();
        assert_eq!(b.refcnt_now(), 1);
        drop(b);
        assert_eq!(DISK.writes(), 1);
        assert_eq!(DISK.peek(3, 0), b'x');

        // 依次访问同一个桶中的 NBUF 个其他块，把块 3 挤出缓存
        for k in 1..=NBUF {
            drop(BCACHE.bread(DEV, block_in(3, k)));
        }
        assert_eq!(BCACHE.refcnt(DEV, 3), None);

        let reads = DISK.reads();
        let b = BCACHE.bread(DEV, 3);
        assert_eq!(DISK.reads(), reads + 1);
        assert_eq!(&b.data()[..4], b"xv6!");
    }

    #[test]
    fn recycles_in_release_order() {
        static DISK: RamDisk<NBLOCK> = RamDisk::new(DEV);
        static BCACHE: Bcache = Bcache::new(&DISK);

        let mut held: Vec<Option<Buf<'_>>> =
            (0..NBUF).map(|k| Some(BCACHE.bget(DEV, block_in(0, k)))).collect();

        let mut slots = Vec::new();
        for k in [5, 9, 2] {
            let b = held[k].take().unwrap();
            slots.push(b.index);
            drop(b);
        }

        for (i, k) in (NBUF..NBUF + 3).enumerate() {
            let b = BCACHE.bget(DEV, block_in(0, k));
            assert_eq!(b.index, slots[i]);
            held.push(Some(b));
        }
        for k in [5, 9, 2] {
            assert_eq!(BCACHE.refcnt(DEV, block_in(0, k)), None);
        }
    }

    #[test]
    fn held_buffer_is_never_evicted() {
        static DISK: RamDisk<NBLOCK> = RamDisk::new(DEV);
        static BCACHE: Bcache = Bcache::new(&DISK);

        let mut x = BCACHE.bread(DEV, 0);
        x.data_mut().fill(0xab);
        let others: Vec<Buf<'_>> = (1..NBUF).map(|k| BCACHE.bread(DEV, block_in(0, k))).collect();

        let r = panic::catch_unwind(AssertUnwindSafe(|| {
            drop(BCACHE.bget(DEV, block_in(0, NBUF)));
        }));
        assert!(r.is_err());

        assert_eq!(x.blockno(), 0);
        assert!(x.data().iter().all(|&v| v == 0xab));
        assert_eq!(BCACHE.refcnt(DEV, 0), Some(1));
        assert_eq!(BCACHE.refcnt(DEV, block_in(0, NBUF)), None);

        drop(others);
        drop(x);
        // 释放之后桶又可以容纳新块
        drop(BCACHE.bget(DEV, block_in(0, NBUF)));
    }

    #[test]
    fn concurrent_acquirers_share_one_slot() {
        static DISK: RamDisk<NBLOCK> = RamDisk::new(DEV);
        static BCACHE: Bcache = Bcache::new(&DISK);
        const WAITERS: usize = 4;

        let b = BCACHE.bread(DEV, 7);
        let slot = b.index;

        let seen: Vec<usize> = thread::scope(|s| {
            let handles: Vec<_> = (0..WAITERS)
                .map(|_| {
                    s.spawn(|| {
                        let mut b = BCACHE.bread(DEV, 7);
                        b.data_mut()[0] += 1;
                        b.index
                    })
                })
                .collect();

            wait_until(|| BCACHE.refcnt(DEV, 7) == Some(WAITERS + 1));
            drop(b);
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(seen.iter().all(|&i| i == slot));
        assert_eq!(BCACHE.refcnt(DEV, 7), Some(0));
        assert_eq!(BCACHE.bread(DEV, 7).data()[0], WAITERS as u8);
        assert_eq!(DISK.reads(), 1);
    }

    #[test]
    fn bwrite_from_non_holder_panics() {
        static DISK: RamDisk<NBLOCK> = RamDisk::new(DEV);
        static BCACHE: Bcache = Bcache::new(&DISK);

        let b = BCACHE.bread(DEV, 9);
        let b = thread::scope(|s| {
            s.spawn(move || {
                let mut b = b;
                let r = panic::catch_unwind(AssertUnwindSafe(|| b.bwrite()));
                assert!(r.is_err());
                b
            })
            .join()
            .unwrap()
        });
        assert_eq!(DISK.writes(), 0);
        drop(b);
        assert_eq!(BCACHE.refcnt(DEV, 9), Some(0));
    }

    #[test]
    fn brelse_from_non_holder_panics() {
        static DISK: RamDisk<NBLOCK> = RamDisk::new(DEV);
        static BCACHE: Bcache = Bcache::new(&DISK);

        let b = BCACHE.bread(DEV, 11);
        let r = thread::scope(|s| {
            s.spawn(move || panic::catch_unwind(AssertUnwindSafe(move || drop(b))).is_err())
                .join()
                .unwrap()
        });
        assert!(r);
        // 失败的释放不会归还引用计数
        assert_eq!(BCACHE.refcnt(DEV, 11), Some(1));
    }

    #[test]
    fn pinned_buffer_stays_resident() {
        static DISK: RamDisk<NBLOCK> = RamDisk::new(DEV);
        static BCACHE: Bcache = Bcache::new(&DISK);

        let b = BCACHE.bread(DEV, 1);
        b.pin();
        drop(b);
        assert_eq!(BCACHE.refcnt(DEV, 1), Some(1));

        for k in 1..=NBUF + 1 {
            drop(BCACHE.bread(DEV, block_in(1, k)));
        }
        assert_eq!(BCACHE.refcnt(DEV, 1), Some(1));

        let reads = DISK.reads();
        let b = BCACHE.bread(DEV, 1);
        assert_eq!(DISK.reads(), reads);
        b.unpin();
        drop(b);
        assert_eq!(BCACHE.refcnt(DEV, 1), Some(0));
    }

    #[test]
    #[should_panic(expected = "bunpin: unmatched")]
    fn unpin_without_pin_panics() {
        static DISK: RamDisk<NBLOCK> = RamDisk::new(DEV);
        static BCACHE: Bcache = Bcache::new(&DISK);

        let b = BCACHE.bread(DEV, 2);
        b.unpin();
    }

    #[test]
    fn threads_updating_shared_blocks() {
        static DISK: RamDisk<NBLOCK> = RamDisk::new(DEV);
        static BCACHE: Bcache = Bcache::new(&DISK);
        const THREADS: usize = 4;
        const ROUNDS: usize = 50;

        thread::scope(|s| {
            for t in 0..THREADS {
                s.spawn(move || {
                    for _ in 0..ROUNDS {
                        for blockno in [t as u32 + 20, 100] {
                            let mut b = BCACHE.bread(DEV, blockno);
                            b.data_mut()[0] += 1;
                            b.bwrite();
                        }
                    }
                });
            }
        });

        for t in 0..THREADS {
            assert_eq!(DISK.peek(t as u32 + 20, 0), ROUNDS as u8);
        }
        assert_eq!(DISK.peek(100, 0), (THREADS * ROUNDS) as u8);
    }

    impl Buf<'_> {
        fn refcnt_now(&self) -> usize {
            self.bucket.ctrl.lock().inner[self.index].refcnt
        }
    }
}
