//! サイズクラスの定義.
//!
//! 要求サイズは、昇順に並んだ固定のテーブルを先頭から走査して、
//! 最初に要求サイズ以上となったクラスに分類される.
//! どのクラスにも収まらない要求は、末尾の"上限なし"クラスに分類される.
use crate::block::{UnitSize, HEADER_SIZE};

/// サイズクラスの数(上限なしクラスを含む).
pub const NUM_CLASSES: usize = SIZE_TABLE.len() + 1;

/// 上限なしクラスのインデックス.
///
/// このクラスのユニットサイズは、個々の要求サイズにヘッダ分を加えたもの.
pub const UNBOUNDED_CLASS: usize = NUM_CLASSES - 1;

/// サイズクラスのテーブルの一要素.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass {
    /// このクラスで扱う最大の要求サイズ(バイト単位).
    pub size: usize,

    /// クラスの最初のバケツが保持するユニット数.
    ///
    /// 新規に作成されるバケツのサイズを決めるためだけに使われる調整用の値であり、
    /// 正しさには影響しない.
    pub default_count: usize,
}

const fn class(size: usize, default_count: usize) -> SizeClass {
    SizeClass {
        size,
        default_count,
    }
}

const SIZE_TABLE: [SizeClass; 21] = [
    class(4, 1024),
    class(8, 1024),
    class(16, 1024),
    class(24, 512),
    class(32, 512),
    class(48, 256),
    class(64, 256),
    class(96, 128),
    class(128, 128),
    class(192, 64),
    class(256, 64),
    class(384, 32),
    class(512, 32),
    class(768, 16),
    class(1024, 16),
    class(2048, 8),
    class(4096, 8),
    class(8192, 4),
    class(16384, 2),
    class(32768, 1),
    class(65536, 1),
];

/// `length`バイトの要求が属するクラスのインデックスを返す.
///
/// # Examples
///
/// ```
/// use bucketalloc::manager::size_class::{classify, UNBOUNDED_CLASS};
///
/// assert_eq!(classify(1), 0);
/// assert_eq!(classify(4), 0);
/// assert_eq!(classify(5), 1);
/// assert_eq!(classify(65536), UNBOUNDED_CLASS - 1);
/// assert_eq!(classify(65537), UNBOUNDED_CLASS);
/// ```
pub fn classify(length: usize) -> usize {
    SIZE_TABLE
        .iter()
        .position(|c| c.size >= length)
        .unwrap_or(UNBOUNDED_CLASS)
}

/// 指定されたインデックスのクラスを返す.
///
/// 上限なしクラスおよび範囲外のインデックスに対しては`None`が返される.
pub fn size_class(class: usize) -> Option<SizeClass> {
    SIZE_TABLE.get(class).cloned()
}

/// クラスの最初のバケツが保持するユニット数を返す.
pub fn default_count(class: usize) -> usize {
    size_class(class).map_or(1, |c| c.default_count)
}

/// `length`バイトの要求を、指定クラスで扱う際のユニットサイズを返す.
///
/// 上限なしクラスの場合には、ユニットサイズは要求毎に異なる.
/// いずれの場合も、ユニットサイズは`HEADER_SIZE`の倍数となる.
///
/// ユニットサイズが表現できない(大き過ぎる)場合には`None`が返される.
pub fn unit_size(class: usize, length: usize) -> Option<UnitSize> {
    let size = size_class(class).map_or(length, |c| c.size);
    let unit = size.checked_add(2 * HEADER_SIZE - 1)? / HEADER_SIZE * HEADER_SIZE;
    let unit = unit.max(UnitSize::MIN as usize);
    if unit > u32::max_value() as usize {
        return None;
    }
    UnitSize::new(unit as u32).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_works() {
        assert_eq!(classify(0), 0);
        assert_eq!(classify(3), 0);
        assert_eq!(classify(9), 2);
        assert_eq!(classify(24), 3);
        assert_eq!(classify(25), 4);
        assert_eq!(classify(4096), 16);
        assert_eq!(classify(4097), 17);
        assert_eq!(classify(usize::max_value()), UNBOUNDED_CLASS);
    }

    #[test]
    fn table_is_ascending() {
        for i in 1..SIZE_TABLE.len() {
            assert!(SIZE_TABLE[i - 1].size < SIZE_TABLE[i].size, "index={}", i);
            assert!(SIZE_TABLE[i].default_count > 0);
        }
    }

    #[test]
    fn classification_is_total() {
        for length in 1..70_000 {
            let class = classify(length);
            assert!(class < NUM_CLASSES);
            let unit = unit_size(class, length).expect("representable");
            assert!(unit.as_usize() >= length + HEADER_SIZE);
            assert_eq!(unit.as_usize() % HEADER_SIZE, 0);
        }
    }

    #[test]
    fn unit_size_works() {
        assert_eq!(unit_size(0, 1).map(|u| u.as_u32()), Some(8));
        assert_eq!(unit_size(16, 4096).map(|u| u.as_u32()), Some(4100));
        assert_eq!(unit_size(16, 1).map(|u| u.as_u32()), Some(4100));
        assert_eq!(unit_size(UNBOUNDED_CLASS, 100_000).map(|u| u.as_u32()), Some(100_004));
        assert_eq!(unit_size(UNBOUNDED_CLASS, 100_001).map(|u| u.as_u32()), Some(100_008));
        assert_eq!(unit_size(UNBOUNDED_CLASS, 1).map(|u| u.as_u32()), Some(8));
        assert_eq!(unit_size(UNBOUNDED_CLASS, usize::max_value()), None);
    }

    #[test]
    fn default_count_works() {
        assert_eq!(default_count(0), 1024);
        assert_eq!(default_count(16), 8);
        assert_eq!(default_count(UNBOUNDED_CLASS), 1);
    }
}
