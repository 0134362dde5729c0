//! 単一のバッファを固定サイズのユニット群に分割して管理するブロックアロケータ関連の構成要素.
pub use self::allocator::BlockAllocator;
pub use self::header::{RunHeader, HEADER_SIZE, MAX_RUN_UNITS};

use crate::{ErrorKind, Result};

mod allocator;
mod header;

/// [`BlockAllocator`]のユニットサイズを表現するための構造体.
///
/// "ユニット"は割当の最小単位であり、一つの割当要求は、連続する一つ以上のユニット(ラン)によって満たされる.
///
/// 指定されたユニット境界にアライメントを行うための補助メソッド群も提供している.
///
/// [`BlockAllocator`]: ./struct.BlockAllocator.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitSize(u32);
impl UnitSize {
    /// 許容されるユニットサイズの最小値.
    ///
    /// ランのヘッダおよびフリーリストのリンクを格納した上で、
    /// 最低一バイトのペイロードを確保できるだけのサイズ.
    pub const MIN: u32 = 8;

    /// 指定された値のユニットサイズを表現する`UnitSize`インスタンスを生成する.
    ///
    /// # Errors
    ///
    /// `unit_size`が`UnitSize::MIN`未満の場合には、種類が`ErrorKind::InvalidInput`のエラーが返される.
    ///
    /// # Examples
    ///
    /// ```
    /// use bucketalloc::ErrorKind;
    /// use bucketalloc::block::UnitSize;
    ///
    /// assert_eq!(UnitSize::new(8).ok().map(|u| u.as_u32()), Some(8));
    /// assert_eq!(UnitSize::new(4100).ok().map(|u| u.as_u32()), Some(4100));
    ///
    /// assert_eq!(UnitSize::new(4).err().map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
    /// ```
    #[allow(clippy::new_ret_no_self)]
    pub fn new(unit_size: u32) -> Result<Self> {
        track_assert!(unit_size >= Self::MIN, ErrorKind::InvalidInput; unit_size);
        Ok(UnitSize(unit_size))
    }

    /// `bytes`を格納するために必要なユニット数を返す.
    ///
    /// # Examples
    ///
    /// ```
    /// use bucketalloc::block::UnitSize;
    ///
    /// let unit = UnitSize::new(8).unwrap();
    /// assert_eq!(unit.units_for(0), 0);
    /// assert_eq!(unit.units_for(1), 1);
    /// assert_eq!(unit.units_for(8), 1);
    /// assert_eq!(unit.units_for(16), 2);
    /// assert_eq!(unit.units_for(17), 3);
    /// ```
    pub fn units_for(self, bytes: usize) -> usize {
        let unit = self.as_usize();
        bytes / unit + if bytes % unit == 0 { 0 } else { 1 }
    }

    /// 指定サイズ以上の最小のユニット境界を返す.
    ///
    /// オーバーフローする場合には`None`が返される.
    ///
    /// # Examples
    ///
    /// ```
    /// use bucketalloc::block::UnitSize;
    ///
    /// let unit = UnitSize::new(12).unwrap();
    /// assert_eq!(unit.ceil_align(0), Some(0));
    /// assert_eq!(unit.ceil_align(1), Some(12));
    /// assert_eq!(unit.ceil_align(24), Some(24));
    /// assert_eq!(unit.ceil_align(usize::MAX), None);
    /// ```
    pub fn ceil_align(self, bytes: usize) -> Option<usize> {
        self.units_for(bytes).checked_mul(self.as_usize())
    }

    /// 指定サイズ以下の最大のユニット境界を返す.
    ///
    /// # Examples
    ///
    /// ```
    /// use bucketalloc::block::UnitSize;
    ///
    /// let unit = UnitSize::new(12).unwrap();
    /// assert_eq!(unit.floor_align(0), 0);
    /// assert_eq!(unit.floor_align(11), 0);
    /// assert_eq!(unit.floor_align(25), 24);
    /// ```
    pub fn floor_align(self, bytes: usize) -> usize {
        let unit = self.as_usize();
        (bytes / unit) * unit
    }

    /// ユニットサイズ値を`u32`に変換して返す.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// ユニットサイズ値を`usize`に変換して返す.
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}
impl Default for UnitSize {
    fn default() -> Self {
        UnitSize(Self::MIN)
    }
}
