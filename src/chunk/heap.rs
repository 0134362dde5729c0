use libc;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::chunk::ChunkSource;
use crate::{ErrorKind, Result};

/// プロセスのヒープ(`posix_memalign`)をチャンクの取得元とする`ChunkSource`の実装.
///
/// 任意で、同時に保持可能なチャンクの合計サイズに上限を設けることができる.
/// 上限を超える要求には`None`が返されるので、資源不足時の挙動の確認にも使用可能.
#[derive(Debug)]
pub struct HeapChunkSource {
    page_alignment: usize,
    limit: Option<usize>,
    outstanding_bytes: AtomicUsize,
    outstanding_chunks: AtomicUsize,
}
impl HeapChunkSource {
    /// デフォルトのアライメント.
    pub const DEFAULT_PAGE_ALIGNMENT: usize = 4096;

    /// 上限なしの新しい`HeapChunkSource`インスタンスを生成する.
    pub fn new() -> Self {
        HeapChunkSource {
            page_alignment: Self::DEFAULT_PAGE_ALIGNMENT,
            limit: None,
            outstanding_bytes: AtomicUsize::new(0),
            outstanding_chunks: AtomicUsize::new(0),
        }
    }

    /// 保持可能なチャンクの合計サイズに上限を設けた`HeapChunkSource`インスタンスを生成する.
    pub fn with_limit(limit: usize) -> Self {
        HeapChunkSource {
            limit: Some(limit),
            ..Self::new()
        }
    }

    /// チャンクのアライメントを変更する.
    ///
    /// # Errors
    ///
    /// `page_alignment`が2の冪乗ではない、ないしポインタのサイズ未満の場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    pub fn set_page_alignment(&mut self, page_alignment: usize) -> Result<()> {
        track_assert!(page_alignment.is_power_of_two(), ErrorKind::InvalidInput; page_alignment);
        track_assert!(
            page_alignment >= std::mem::size_of::<usize>(),
            ErrorKind::InvalidInput; page_alignment
        );
        self.page_alignment = page_alignment;
        Ok(())
    }

    /// 取得済みかつ未返却のチャンクの合計サイズを返す.
    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding_bytes.load(Ordering::SeqCst)
    }

    /// 取得済みかつ未返却のチャンクの数を返す.
    pub fn outstanding_chunks(&self) -> usize {
        self.outstanding_chunks.load(Ordering::SeqCst)
    }

    fn reserve(&self, length: usize) -> bool {
        let mut current = self.outstanding_bytes.load(Ordering::SeqCst);
        loop {
            let next = match current.checked_add(length) {
                None => return false,
                Some(next) => next,
            };
            if self.limit.map_or(false, |limit| next > limit) {
                return false;
            }
            match self.outstanding_bytes.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}
impl Default for HeapChunkSource {
    fn default() -> Self {
        Self::new()
    }
}
impl ChunkSource for HeapChunkSource {
    fn page_alignment(&self) -> usize {
        self.page_alignment
    }

    fn allocate_chunk(&self, length: usize) -> Option<NonNull<u8>> {
        if length == 0 || !self.reserve(length) {
            return None;
        }

        let mut memory = ptr::null_mut();
        let code = unsafe { libc::posix_memalign(&mut memory, self.page_alignment, length) };
        match NonNull::new(memory as *mut u8) {
            Some(chunk) if code == 0 => {
                self.outstanding_chunks.fetch_add(1, Ordering::SeqCst);
                Some(chunk)
            }
            _ => {
                self.outstanding_bytes.fetch_sub(length, Ordering::SeqCst);
                None
            }
        }
    }

    unsafe fn free_chunk(&self, chunk: NonNull<u8>, length: usize) {
        libc::free(chunk.as_ptr() as *mut libc::c_void);
        self.outstanding_bytes.fetch_sub(length, Ordering::SeqCst);
        self.outstanding_chunks.fetch_sub(1, Ordering::SeqCst);
    }
}
