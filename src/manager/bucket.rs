use std::ptr::NonNull;

use crate::block::{BlockAllocator, UnitSize};
use crate::lock::{ContextLock, LockMode};

/// 一つのサイズクラスに属する、バッファとブロックアロケータの組.
///
/// バケツはプライベートプール上に配置され、クラス毎の単方向リストの先頭に追加される.
/// 一度リストに追加されたバケツは、マネージャが破棄されるまで削除されることは無い.
#[derive(Debug)]
pub struct Bucket {
    allocator: ContextLock<BlockAllocator>,
    unit_size: UnitSize,
    start: usize,
    end: usize,
    pub(crate) next: *mut Bucket,
}
unsafe impl Send for Bucket {}
unsafe impl Sync for Bucket {}
impl Bucket {
    pub(crate) fn new(allocator: BlockAllocator, start: NonNull<u8>, next: *mut Bucket) -> Self {
        let unit_size = allocator.unit_size();
        let start = start.as_ptr() as usize;
        let end = start + allocator.capacity();
        Bucket {
            allocator: ContextLock::new(allocator),
            unit_size,
            start,
            end,
            next,
        }
    }

    /// ユニットサイズを返す.
    pub fn unit_size(&self) -> UnitSize {
        self.unit_size
    }

    /// 管理対象のバイト数を返す.
    pub fn capacity(&self) -> usize {
        self.end - self.start
    }

    /// `ptr`が、このバケツの管理領域内を指しているかどうかを判定する.
    ///
    /// ロックは取得しない.
    pub fn owns(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        self.start <= addr && addr < self.end
    }

    /// 割当済みのバイト数を返す.
    pub fn allocated_bytes(&self, mode: LockMode) -> usize {
        self.allocator.lock(mode).allocated_bytes()
    }

    /// 空きのバイト数を返す.
    pub fn free_bytes(&self, mode: LockMode) -> usize {
        self.allocator.lock(mode).free_bytes()
    }

    pub(crate) fn allocate(&self, mode: LockMode, length: usize) -> Option<NonNull<u8>> {
        self.allocator.lock(mode).allocate(length)
    }

    pub(crate) fn free(&self, mode: LockMode, ptr: *const u8) -> bool {
        self.allocator.lock(mode).free(ptr)
    }
}

/// クラス毎のバケツを、リストの先頭から順に走査するイテレータ.
#[derive(Debug)]
pub struct Buckets<'a> {
    current: *const Bucket,
    _manager: std::marker::PhantomData<&'a Bucket>,
}
impl<'a> Buckets<'a> {
    pub(crate) fn new(head: *const Bucket) -> Self {
        Buckets {
            current: head,
            _manager: std::marker::PhantomData,
        }
    }
}
impl<'a> Iterator for Buckets<'a> {
    type Item = &'a Bucket;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_null() {
            return None;
        }
        let bucket = unsafe { &*self.current };
        self.current = bucket.next;
        Some(bucket)
    }
}

#[cfg(test)]
mod tests {
    use std::ptr;
    use trackable::result::TestResult;

    use super::*;

    #[test]
    fn it_works() -> TestResult {
        let mut buf = vec![0u8; 64];
        let start = NonNull::new(buf.as_mut_ptr()).expect("never null");
        let unit = track!(UnitSize::new(16))?;
        let allocator = unsafe { track!(BlockAllocator::new(start, buf.len(), unit))? };
        let bucket = Bucket::new(allocator, start, ptr::null_mut());
        assert_eq!(bucket.capacity(), 64);
        assert_eq!(bucket.unit_size(), unit);

        let p = bucket.allocate(LockMode::Spin, 12).expect("allocated");
        assert!(bucket.owns(p.as_ptr()));
        assert_eq!(bucket.allocated_bytes(LockMode::Blocking), 16);
        assert_eq!(bucket.free_bytes(LockMode::Spin), 48);

        let outside = unsafe { buf.as_ptr().add(64) };
        assert!(!bucket.owns(outside));
        assert!(!bucket.free(LockMode::Blocking, outside));
        assert!(bucket.free(LockMode::Blocking, p.as_ptr()));
        assert_eq!(bucket.allocated_bytes(LockMode::Blocking), 0);
        Ok(())
    }

    #[test]
    fn iteration_works() -> TestResult {
        let mut buf = vec![0u8; 64];
        let unit = track!(UnitSize::new(8))?;
        let mut make = |offset: usize, next: *mut Bucket| -> Result<Bucket, crate::Error> {
            let start = NonNull::new(unsafe { buf.as_mut_ptr().add(offset) }).expect("never null");
            let allocator = unsafe { track!(BlockAllocator::new(start, 32, unit))? };
            Ok(Bucket::new(allocator, start, next))
        };
        let mut first = track!(make(0, ptr::null_mut()))?;
        let second = track!(make(32, &mut first))?;

        let capacities = Buckets::new(&second).map(|b| b.capacity()).collect::<Vec<_>>();
        assert_eq!(capacities, vec![32, 32]);
        assert_eq!(Buckets::new(ptr::null()).count(), 0);
        Ok(())
    }
}
