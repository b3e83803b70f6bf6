//! 提供物理地址包装

use bit_field::BitField;

use crate::consts::{PGSHIFT, PGSIZE};

/// 向上取整到页边界
#[inline]
pub const fn pg_round_up(addr: usize) -> usize {
    (addr + PGSIZE - 1) & !(PGSIZE - 1)
}

/// 向下取整到页边界
#[inline]
pub const fn pg_round_down(addr: usize) -> usize {
    addr & !(PGSIZE - 1)
}

/// 地址类型通用接口
///
/// 定义地址类型共有的操作方法，包括页对齐调整、地址转换等。
pub trait Addr {
    /// 获取内部地址值的不可变引用
    fn data_ref(&self) -> &usize;

    /// 获取内部地址值的可变引用
    fn data_mut(&mut self) -> &mut usize;

    /// 向上取整到页边界
    #[inline]
    fn pg_round_up(&mut self) {
        *self.data_mut() = pg_round_up(*self.data_ref());
    }

    /// 向下取整到页边界
    #[inline]
    fn pg_round_down(&mut self) {
        *self.data_mut() = pg_round_down(*self.data_ref());
    }

    /// 页内偏移为 0 时返回 `true`
    #[inline]
    fn is_page_aligned(&self) -> bool {
        self.data_ref().get_bits(0..PGSHIFT) == 0
    }

    /// 获取地址的usize表示
    #[inline]
    fn as_usize(&self) -> usize {
        *self.data_ref()
    }

    /// 转换为只读裸指针
    #[inline]
    fn as_ptr(&self) -> *const u8 {
        *self.data_ref() as *const u8
    }

    /// 转换为可变裸指针
    ///
    /// # 安全性
    /// 调用者需确保经由指针的写入不会破坏内存安全
    #[inline]
    fn as_mut_ptr(&mut self) -> *mut u8 {
        *self.data_mut() as *mut u8
    }
}

/// 物理页地址封装类型
///
/// # 合法性保证
/// 通过 `TryFrom` 构造的地址必然页对齐。
/// 页分配器只接受和返回该类型。
#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PhysAddr(usize);

impl Addr for PhysAddr {
    #[inline]
    fn data_ref(&self) -> &usize {
        &self.0
    }

    #[inline]
    fn data_mut(&mut self) -> &mut usize {
        &mut self.0
    }
}

impl PhysAddr {
    /// 从原始usize值构造物理地址
    ///
    /// # 安全性
    /// 调用者必须确保 `raw` 是有效且页对齐的物理地址
    #[inline]
    pub unsafe fn from_raw(raw: usize) -> Self {
        Self(raw)
    }
}

impl TryFrom<usize> for PhysAddr {
    type Error = &'static str;

    /// 尝试从usize创建物理地址，未页对齐时返回错误
    fn try_from(addr: usize) -> Result<Self, Self::Error> {
        if addr.get_bits(0..PGSHIFT) != 0 {
            return Err("PhysAddr addr not aligned");
        }
        Ok(PhysAddr(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(pg_round_up(0), 0);
        assert_eq!(pg_round_up(1), PGSIZE);
        assert_eq!(pg_round_up(PGSIZE), PGSIZE);
        assert_eq!(pg_round_down(2 * PGSIZE - 1), PGSIZE);

        let mut pa = unsafe { PhysAddr::from_raw(3 * PGSIZE + 7) };
        assert!(!pa.is_page_aligned());
        pa.pg_round_down();
        assert_eq!(pa.as_usize(), 3 * PGSIZE);
        assert!(pa.is_page_aligned());
    }

    #[test]
    fn try_from_rejects_unaligned() {
        assert!(PhysAddr::try_from(0x8000_1000).is_ok());
        assert_eq!(
            PhysAddr::try_from(0x8000_1008),
            Err("PhysAddr addr not aligned")
        );
    }
}
