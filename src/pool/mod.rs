//! アロケータの管理用構造体専用のプール.
//!
//! [BucketManager](../manager/struct.BucketManager.html)は、
//! バケツやリポジトリのノードといった自身の管理用構造体を、利用者向けの割当経路とは別の、
//! このプールから割り当てる.
//!
//! これにより「管理用構造体を割り当てるために、アロケータ自身を呼び出す」という循環が発生しない.
//! プールは成長せず、チャンクの取得元やアロケータの公開APIを呼び出すことも無い.
use std::mem;
use std::ptr::{self, NonNull};

pub use self::buffer::PoolBuffer;

use crate::block::{BlockAllocator, UnitSize, HEADER_SIZE};
use crate::lock::{ContextLock, LockMode};
use crate::{ErrorKind, Result};

mod buffer;

/// 管理用構造体専用のプール.
///
/// 固定の小さなユニットサイズを持つ[`BlockAllocator`]を、専用のバッファ上に構築したもの.
///
/// 割当済みの値は、ランの先頭ユニット内で、その型のアライメントに揃えた位置に配置される.
///
/// [`BlockAllocator`]: ../block/struct.BlockAllocator.html
#[derive(Debug)]
pub struct PrivatePool {
    buffer: PoolBuffer,
    allocator: ContextLock<BlockAllocator>,
}
impl PrivatePool {
    /// プールのユニットサイズ.
    pub const UNIT_SIZE: u32 = 64;

    /// プールに配置可能な型のアライメントの上限.
    pub const MAX_ALIGNMENT: usize = 32;

    /// `buffer`を管理対象とするプールを生成する.
    ///
    /// # Errors
    ///
    /// `buffer`が一つのユニットも保持できない場合には、種類が`ErrorKind::InvalidInput`のエラーが返される.
    pub fn new(buffer: PoolBuffer) -> Result<Self> {
        let unit_size = track!(UnitSize::new(Self::UNIT_SIZE))?;
        track_assert!(
            buffer.len() >= unit_size.as_usize(),
            ErrorKind::InvalidInput; buffer.len()
        );
        let allocator = unsafe { track!(BlockAllocator::new(buffer.as_ptr(), buffer.len(), unit_size))? };
        Ok(PrivatePool {
            buffer,
            allocator: ContextLock::new(allocator),
        })
    }

    /// `value`をプール上に配置して、その位置を返す.
    ///
    /// プールに空きがない場合や、`T`のアライメントが`MAX_ALIGNMENT`を超えている場合には、
    /// `value`は破棄されて`None`が返される.
    pub fn allocate<T>(&self, mode: LockMode, value: T) -> Option<NonNull<T>> {
        let align = mem::align_of::<T>();
        if align > Self::MAX_ALIGNMENT {
            return None;
        }
        let size = mem::size_of::<T>().max(1) + align - 1;
        let raw = self.allocator.lock(mode).allocate(size)?;

        let addr = raw.as_ptr() as usize;
        let aligned = (addr + align - 1) / align * align;
        let ptr = aligned as *mut T;
        unsafe {
            ptr::write(ptr, value);
        }
        NonNull::new(ptr)
    }

    /// `allocate`で配置した値を破棄して、その領域を解放する.
    ///
    /// # Safety
    ///
    /// `ptr`は、このプールの`allocate`が返した未解放のポインタである必要がある.
    /// また、解放後に`ptr`が参照されることはあってはならない.
    pub unsafe fn release<T>(&self, mode: LockMode, ptr: NonNull<T>) -> bool {
        ptr::drop_in_place(ptr.as_ptr());

        // 値はランの先頭ユニット内に配置されているので、ユニット境界からヘッダの直後の位置を求める
        let base = self.buffer.as_ptr().as_ptr() as usize;
        let offset = ptr.as_ptr() as usize - base;
        let unit_start = offset - offset % Self::UNIT_SIZE as usize;
        let raw = (base + unit_start + HEADER_SIZE) as *const u8;
        self.allocator.lock(mode).free(raw)
    }

    /// 割当済みのバイト数を返す.
    pub fn allocated_bytes(&self) -> usize {
        self.allocator.lock(LockMode::Blocking).allocated_bytes()
    }

    /// 空きのバイト数を返す.
    pub fn free_bytes(&self) -> usize {
        self.allocator.lock(LockMode::Blocking).free_bytes()
    }

    /// プールの容量を返す.
    pub fn capacity(&self) -> usize {
        self.allocator.lock(LockMode::Blocking).capacity()
    }
}
