use std::fmt;
use std::ptr::NonNull;

/// [`PrivatePool`]が管理対象とするバッファ.
///
/// 自前で確保したバッファ(`PoolBuffer::new`)と、
/// 呼び出し元から渡された領域(`PoolBuffer::from_raw_parts`)のいずれかを保持する.
///
/// [`PrivatePool`]: ./struct.PrivatePool.html
pub struct PoolBuffer {
    storage: Option<Vec<u8>>,
    ptr: NonNull<u8>,
    len: usize,
}
unsafe impl Send for PoolBuffer {}
unsafe impl Sync for PoolBuffer {}
impl PoolBuffer {
    /// `PoolBuffer::new`で確保されるバッファの開始位置のアライメント.
    pub const ALIGNMENT: usize = 64;

    /// `size`バイトのバッファを新たに確保する.
    ///
    /// バッファの開始位置は`ALIGNMENT`の境界に揃えられる.
    /// なお、ここでの確保はアロケータの構築時に一度だけ行われる.
    pub fn new(size: usize) -> Self {
        // バッファの先頭をアライメント境界に合わせるために十分なだけの領域を確保しておく
        let capacity = size + Self::ALIGNMENT - 1;
        let mut storage = vec![0; capacity];
        let offset = alignment_offset(&storage, Self::ALIGNMENT);
        let ptr = unsafe { NonNull::new_unchecked(storage.as_mut_ptr().add(offset)) };
        PoolBuffer {
            storage: Some(storage),
            ptr,
            len: size,
        }
    }

    /// 呼び出し元が用意した領域を、そのままバッファとして使う.
    ///
    /// # Safety
    ///
    /// `ptr`から`len`バイトの領域は、読み書き可能かつ、
    /// このインスタンス(およびそれを使うプール)が破棄されるまで、他から参照されないものである必要がある.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        PoolBuffer {
            storage: None,
            ptr,
            len,
        }
    }

    /// バッファの開始位置を返す.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// バッファのサイズを返す.
    pub fn len(&self) -> usize {
        self.len
    }

    /// バッファのサイズが`0`かどうかを判定する.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// バッファを自前で確保したかどうかを判定する.
    pub fn is_owned(&self) -> bool {
        self.storage.is_some()
    }
}
impl fmt::Debug for PoolBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PoolBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("owned", &self.is_owned())
            .finish()
    }
}

fn alignment_offset(buf: &[u8], alignment: usize) -> usize {
    let ptr_usize = buf.as_ptr() as usize;
    let aligned_ptr_usize = (ptr_usize + alignment - 1) / alignment * alignment;
    aligned_ptr_usize - ptr_usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_works() {
        let buf = PoolBuffer::new(1000);
        assert_eq!(buf.len(), 1000);
        assert!(buf.is_owned());
        assert_eq!(buf.as_ptr().as_ptr() as usize % PoolBuffer::ALIGNMENT, 0);
    }

    #[test]
    fn from_raw_parts_works() {
        let mut region = vec![0u8; 256];
        let ptr = NonNull::new(region.as_mut_ptr()).expect("never null");
        let buf = unsafe { PoolBuffer::from_raw_parts(ptr, region.len()) };
        assert_eq!(buf.len(), 256);
        assert!(!buf.is_owned());
        assert_eq!(buf.as_ptr(), ptr);
    }

    #[test]
    fn alignment_offset_works() {
        let buf = vec![0u8; 128];
        let offset = alignment_offset(&buf, 64);
        assert!(offset < 64);
        assert_eq!((buf.as_ptr() as usize + offset) % 64, 0);
    }
}
