//! Block Allocator.

use std::ptr::NonNull;
use std::slice;

use super::header::{self, RunHeader, END_OF_LIST, HEADER_SIZE, MAX_RUN_UNITS, MAX_UNIT_COUNT};
use super::UnitSize;
use crate::{ErrorKind, Result};

/// 単一のバッファを管理するブロックアロケータ.
///
/// バッファは固定サイズのユニット群に分割され、割当要求は連続する一つ以上のユニット(ラン)で満たされる.
///
/// ユニットは`base + index * unit_size`の位置にあり、インデックスで識別される.
///
/// # 割当戦略
///
/// 空きユニットは、その先頭に次の空きユニットのインデックスを格納する、侵入型のフリーリストで管理される.
///
/// 新規割当要求が発行された際には、フリーリストを先頭から辿り、
/// 「リンクが`index + 1`で連続している」すなわち物理的に連続した空きユニット群を探す.
///
/// 割当済みランの先頭ユニットにはヘッダ(マーカーとユニット数)が書き込まれ、
/// 利用者にはヘッダ直後の位置が返される.
///
/// # 注意
///
/// フリーリスト上でアドレス順に連続していない空きユニット群は、
/// 物理的に隣接していても一つのランとしては見つからない.
/// そのため、断片化が進むと、空き容量が十分でも割当に失敗することがある.
///
/// また、解放されたランを隣接する空き領域と結合することも無い.
///
/// このアロケータ自体は排他制御を行わないので、共有する場合には呼び出し元でロックを取る必要がある.
#[derive(Debug)]
pub struct BlockAllocator {
    base: NonNull<u8>,
    unit_size: UnitSize,
    unit_count: usize,
    free_head: u32,
    allocated_bytes: usize,
}
unsafe impl Send for BlockAllocator {}
impl BlockAllocator {
    /// `buffer`から始まる`len`バイトの領域を管理するアロケータを生成する.
    ///
    /// 末尾の、一つのユニットに満たない端数部分は管理対象外となる.
    ///
    /// # Errors
    ///
    /// 以下の場合には、種類が`ErrorKind::InvalidInput`のエラーが返される:
    ///
    /// - `len`が`unit_size`未満
    /// - ユニット数が、一つのアロケータで管理可能な上限を超えている
    ///
    /// # Safety
    ///
    /// `buffer`から`len`バイトの領域は、読み書き可能かつ、
    /// このインスタンスが破棄されるまで他から参照されないものである必要がある.
    pub unsafe fn new(buffer: NonNull<u8>, len: usize, unit_size: UnitSize) -> Result<Self> {
        let unit_count = len / unit_size.as_usize();
        track_assert!(unit_count > 0, ErrorKind::InvalidInput; len, unit_size);
        track_assert!(unit_count <= MAX_UNIT_COUNT, ErrorKind::InvalidInput; len, unit_size);

        let mut allocator = BlockAllocator {
            base: buffer,
            unit_size,
            unit_count,
            free_head: 0,
            allocated_bytes: 0,
        };
        for index in 0..unit_count {
            let next = if index + 1 == unit_count {
                END_OF_LIST
            } else {
                (index + 1) as u32
            };
            allocator.set_link(index, next);
        }
        Ok(allocator)
    }

    /// `length`バイト分の領域を割り当てる.
    ///
    /// 以下の場合には`None`が返される:
    ///
    /// - `length`が`0`
    /// - `length`が`max_allocation_unit()`を超えている
    /// - 十分な長さの連続した空きユニット群が見つからなかった
    pub fn allocate(&mut self, length: usize) -> Option<NonNull<u8>> {
        let run_units = Self::run_bytes(self.unit_size, length)? / self.unit_size.as_usize();

        let (prev, start) = self.find_run(run_units)?;
        let after = self.link(start + run_units - 1);
        match prev {
            None => self.free_head = after,
            Some(prev) => self.set_link(prev, after),
        }
        RunHeader::new(run_units as u16).write_to(self.unit_word_mut(start));
        self.allocated_bytes += run_units * self.unit_size.as_usize();

        let ptr = unsafe { self.unit_ptr(start).add(HEADER_SIZE) };
        NonNull::new(ptr)
    }

    /// `allocate`で割り当てた領域を解放する.
    ///
    /// `ptr`が、このアロケータが割り当てた(かつ未解放の)領域を指していない場合には、何もせずに`false`が返される.
    /// 呼び出し元は、別のアロケータでの解放を試みることができる.
    ///
    /// 解放されたランのユニット群は、インデックスの昇順でフリーリストの先頭に繋ぎ直される.
    pub fn free(&mut self, ptr: *const u8) -> bool {
        let start = match self.run_index_of(ptr) {
            None => return false,
            Some(start) => start,
        };
        let run_units = match RunHeader::read_from(self.unit_word(start)) {
            None => return false,
            Some(header) => header.run_units(),
        };
        let run_bytes = run_units * self.unit_size.as_usize();
        if start + run_units > self.unit_count || run_bytes > self.allocated_bytes {
            return false;
        }

        for index in start..start + run_units - 1 {
            self.set_link(index, (index + 1) as u32);
        }
        let head = self.free_head;
        self.set_link(start + run_units - 1, head);
        self.free_head = start as u32;
        self.allocated_bytes -= run_bytes;
        true
    }

    /// ユニットサイズが`unit_size`のアロケータで、`length`バイトの要求を満たすランのバイト数を返す.
    ///
    /// `length`が`0`の場合や、ランの長さがヘッダで表現可能な上限を超える場合には`None`が返される.
    ///
    /// バケツマネージャは、新しいバケツの大きさを決める際にこの値を使う.
    pub fn run_bytes(unit_size: UnitSize, length: usize) -> Option<usize> {
        if length == 0 {
            return None;
        }
        let run_units = unit_size.units_for(length.checked_add(HEADER_SIZE)?);
        if run_units > MAX_RUN_UNITS {
            return None;
        }
        Some(run_units * unit_size.as_usize())
    }

    /// 一回の割当で要求可能な最大サイズ(バイト単位)を返す.
    ///
    /// ヘッダ分を含むため、実際に割当可能な最大サイズは、これより`HEADER_SIZE`だけ小さい.
    pub fn max_allocation_unit(&self) -> usize {
        self.unit_size.as_usize() * MAX_RUN_UNITS
    }

    /// 割当の最小単位(i.e., ユニットサイズ)を返す.
    pub fn min_allocation_unit(&self) -> usize {
        self.unit_size.as_usize()
    }

    /// ユニットサイズを返す.
    pub fn unit_size(&self) -> UnitSize {
        self.unit_size
    }

    /// 管理対象のバイト数を返す.
    pub fn capacity(&self) -> usize {
        self.unit_count * self.unit_size.as_usize()
    }

    /// 割当済みのバイト数を返す.
    ///
    /// ランのヘッダや、ユニット境界に揃えるための余剰分も含まれる.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// 空きのバイト数を返す.
    pub fn free_bytes(&self) -> usize {
        self.capacity() - self.allocated_bytes
    }

    /// `ptr`が、このアロケータの管理領域内を指しているかどうかを判定する.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let base = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        base <= addr && addr < base + self.capacity()
    }

    // 利用者に返したポインタから、ランの先頭ユニットのインデックスを求める.
    fn run_index_of(&self, ptr: *const u8) -> Option<usize> {
        let base = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        let unit = self.unit_size.as_usize();
        let upper = base + self.capacity() - (unit - HEADER_SIZE);
        if addr < base + HEADER_SIZE || addr > upper {
            return None;
        }
        let offset = addr - base - HEADER_SIZE;
        if offset % unit != 0 {
            None
        } else {
            Some(offset / unit)
        }
    }

    // 割当可能なランを探し、「フリーリスト上の直前のユニット」と「ランの先頭」の組を返す.
    //
    // 直前のユニットが`None`の場合には、ランの先頭はリストの先頭でもある.
    fn find_run(&self, run_units: usize) -> Option<(Option<usize>, usize)> {
        let mut prev = None;
        let mut candidate = self.free_head;
        while candidate != END_OF_LIST {
            let start = candidate as usize;
            let mut last = start;
            while last + 1 < start + run_units && self.link(last) == (last + 1) as u32 {
                last += 1;
            }
            if last + 1 == start + run_units {
                return Some((prev, start));
            }

            // 連続が途切れたユニットのリンク先から探索を再開する
            prev = Some(last);
            candidate = self.link(last);
        }
        None
    }

    fn unit_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.unit_count);
        unsafe { self.base.as_ptr().add(index * self.unit_size.as_usize()) }
    }

    fn unit_word(&self, index: usize) -> &[u8] {
        unsafe { slice::from_raw_parts(self.unit_ptr(index), HEADER_SIZE) }
    }

    fn unit_word_mut(&mut self, index: usize) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.unit_ptr(index), HEADER_SIZE) }
    }

    fn link(&self, index: usize) -> u32 {
        header::read_link(self.unit_word(index))
    }

    fn set_link(&mut self, index: usize, next: u32) {
        header::write_link(self.unit_word_mut(index), next);
    }
}
