//! 物理页分配器，每个 hart 维护各自的空闲页链表

use array_macro::array;

use core::mem::size_of;
use core::ptr;
use core::slice;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::consts::mm::{ALLOC_JUNK, FREE_JUNK};
use crate::consts::{NCPU, PGSIZE};
use crate::process::{cpu_id, pop_off, push_off};
use crate::spinlock::SpinLock;

use super::addr::{pg_round_down, pg_round_up, Addr, PhysAddr};
use super::KallocError;

/// 链表结束标记
const NIL: usize = usize::MAX;

/// 页已被分配，不在任何空闲链表中
const IN_USE: usize = usize::MAX - 1;

/// 按 hart 划分的物理页分配器。
///
/// `Kmem` 管理一段连续物理内存中的 4KB 页面。每个 hart 拥有一条受自旋锁保护的
/// 空闲链表：释放的页面进入当前 hart 的链表，分配优先从当前 hart 的链表取页，
/// 本地耗尽时再依次尝试其他 hart。同一时刻最多只持有一把链表锁。
///
/// 链表的后继关系不写在空闲页内部，而是记录在区间开头预留的链接表中，
/// 因此空闲页的全部内容都可以填充为释放标记。
pub struct Kmem {
    /// 各 hart 的空闲链表，只有前 `nharts` 个会被使用。
    pools: [SpinLock<FreeList>; NCPU],

    nharts: usize,

    /// 第一个可分配页的物理地址。
    base: usize,

    /// 最后一个可分配页之后的地址。
    end: usize,

    /// 链接表：第 `i` 项记录第 `i` 页在空闲链表中的后继，
    /// 页被分配出去时为 `IN_USE`。
    links: &'static [AtomicUsize],
}

impl Kmem {
    /// 接管物理内存区间 `[pa_start, pa_end)` 并建立分配器。
    ///
    /// # 功能说明
    /// - 将区间收缩到页边界，开头的若干页用作链接表；
    /// - 剩余页面平均分给 `nharts` 个 hart，每个 hart 得到一段连续的页，
    ///   余下的页归最后一个 hart；
    /// - 每个页面填充释放标记后压入对应的空闲链表。
    ///
    /// # 参数
    /// - `pa_start`、`pa_end`: 交给分配器的物理内存区间；
    /// - `nharts`: 参与分配的 hart 数，取值范围为 `1..=NCPU`。
    ///
    /// # 安全性
    /// 调用者必须保证该区间可读写，且在分配器的整个生命周期内不再被其他代码使用。
    pub unsafe fn new(pa_start: usize, pa_end: usize, nharts: usize) -> Self {
        if nharts == 0 || nharts > NCPU {
            panic!("kinit: bad nharts {}", nharts);
        }

        let start = pg_round_up(pa_start);
        let stop = pg_round_down(pa_end);
        let total = if stop > start { (stop - start) / PGSIZE } else { 0 };
        let nlink = pg_round_up(total * size_of::<AtomicUsize>()) / PGSIZE;
        let npages = total.saturating_sub(nlink);
        let base = start + nlink * PGSIZE;
        let end = base + npages * PGSIZE;

        let links: &'static [AtomicUsize] = if npages == 0 {
            &[]
        } else {
            let table = start as *mut AtomicUsize;
            for i in 0..npages {
                table.add(i).write(AtomicUsize::new(IN_USE));
            }
            slice::from_raw_parts(table, npages)
        };

        let mut kmem = Self {
            pools: array![_ => SpinLock::new(FreeList::new(), "kmem"); NCPU],
            nharts,
            base,
            end,
            links,
        };

        let share = npages / nharts;
        for hart in 0..nharts {
            let first = hart * share;
            let last = if hart == nharts - 1 { npages } else { first + share };
            let list = kmem.pools[hart].get_mut();
            // 逆序压入，链表头为地址最低的页
            for page in (first..last).rev() {
                ptr::write_bytes((base + page * PGSIZE) as *mut u8, FREE_JUNK, PGSIZE);
                list.push(page, links);
            }
            #[cfg(feature = "verbose_init_info")]
            log::info!(
                "kmem: hart {} owns {} pages from {:#x}",
                hart,
                list.len,
                base + first * PGSIZE
            );
        }

        log::info!(
            "kmem: {} pages in [{:#x}, {:#x}) across {} harts",
            npages,
            base,
            end,
            nharts
        );
        kmem
    }

    /// 释放一个物理页，放入当前 hart 的空闲链表。
    ///
    /// # 功能说明
    /// 页面内容先被填充为释放标记，使悬垂引用读到明显的垃圾数据。
    ///
    /// # 可能的错误
    /// 地址未页对齐、不在管理区间内，或页面本来就是空闲的，均会 panic。
    pub fn kfree(&self, pa: PhysAddr) {
        let addr = pa.as_usize();
        if !pa.is_page_aligned() || addr < self.base || addr >= self.end {
            panic!("kfree: bad address {:#x}", addr);
        }
        let page = (addr - self.base) / PGSIZE;
        // 先认领该页，并发的重复释放只有一个能成功
        if self.links[page]
            .compare_exchange(IN_USE, NIL, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            panic!("kfree: page {:#x} is already free", addr);
        }

        unsafe { ptr::write_bytes(addr as *mut u8, FREE_JUNK, PGSIZE) };

        push_off();
        let hart = unsafe { self.this_hart() };
        self.pools[hart].lock().push(page, self.links);
        pop_off();
    }

    /// 分配一个物理页。
    ///
    /// # 功能说明
    /// 先从当前 hart 的空闲链表取页；本地为空时，按 hart 编号顺序（跳过自身）
    /// 依次尝试其他 hart 的链表，取到一页即停止。
    /// 检查本地链表与窃取之间不持有本地锁。
    ///
    /// # 返回值
    /// - `Ok(PhysAddr)`: 页对齐的物理页地址，内容已填充为分配标记；
    /// - `Err(KallocError::OutOfMemory)`: 所有链表均为空。
    pub fn kalloc(&self) -> Result<PhysAddr, KallocError> {
        push_off();
        let hart = unsafe { self.this_hart() };
        let local = self.pools[hart].lock().pop(self.links);
        let page = match local {
            Some(page) => Some(page),
            None => self.steal(hart),
        };
        pop_off();

        match page {
            Some(page) => {
                let addr = self.base + page * PGSIZE;
                unsafe {
                    ptr::write_bytes(addr as *mut u8, ALLOC_JUNK, PGSIZE);
                    Ok(PhysAddr::from_raw(addr))
                }
            }
            None => {
                #[cfg(feature = "kernel_warning")]
                log::warn!("kalloc: hart {} found no free page", hart);
                Err(KallocError::OutOfMemory)
            }
        }
    }

    /// 从其他 hart 的链表中取一页，每次只持有一把锁。
    fn steal(&self, hart: usize) -> Option<usize> {
        (0..self.nharts)
            .filter(|&victim| victim != hart)
            .find_map(|victim| {
                let page = self.pools[victim].lock().pop(self.links)?;
                log::debug!(
                    "kmem: hart {} stole page {:#x} from hart {}",
                    hart,
                    self.base + page * PGSIZE,
                    victim
                );
                Some(page)
            })
    }

    /// # 安全性
    /// 必须在关闭中断的情况下调用。
    unsafe fn this_hart(&self) -> usize {
        let id = cpu_id();
        if id >= self.nharts {
            panic!("kmem: hart {} not managed", id);
        }
        id
    }

    /// 所有 hart 空闲页的总数。
    ///
    /// 各链表依次加锁统计，并发分配时结果只是近似值。
    pub fn free_pages(&self) -> usize {
        self.pools[..self.nharts]
            .iter()
            .map(|pool| pool.lock().len)
            .sum()
    }

    /// 指定 hart 的空闲页数。
    pub fn free_pages_on(&self, hart: usize) -> usize {
        if hart >= self.nharts {
            panic!("kmem: hart {} not managed", hart);
        }
        self.pools[hart].lock().len
    }

    pub fn nharts(&self) -> usize {
        self.nharts
    }

    /// 可分配页所在的区间 `[base, end)`。
    pub fn range(&self) -> (usize, usize) {
        (self.base, self.end)
    }
}

/// 单个 hart 的空闲链表，以页序号串联。
struct FreeList {
    head: usize,
    len: usize,
}

impl FreeList {
    const fn new() -> Self {
        Self { head: NIL, len: 0 }
    }

    fn push(&mut self, page: usize, links: &[AtomicUsize]) {
        links[page].store(self.head, Ordering::Relaxed);
        self.head = page;
        self.len += 1;
    }

    fn pop(&mut self, links: &[AtomicUsize]) -> Option<usize> {
        if self.head == NIL {
            return None;
        }
        let page = self.head;
        self.head = links[page].swap(IN_USE, Ordering::Relaxed);
        self.len -= 1;
        Some(page)
    }
}
