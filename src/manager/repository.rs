//! チャンクの一覧と、そこからのバケツ用領域の切り出し.
use std::ptr::NonNull;

use crate::block::UnitSize;

/// 切り出された領域の開始位置のアライメント.
pub const REGION_ALIGNMENT: usize = 16;

/// チャンクから切り出された領域.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub ptr: NonNull<u8>,
    pub len: usize,
}

/// リポジトリ内の一つのチャンクを表すノード.
///
/// ノード自体はプライベートプール上に配置される.
#[derive(Debug)]
pub struct RepositoryNode {
    chunk: NonNull<u8>,
    len: usize,
    cursor: usize,
    next: Option<NonNull<RepositoryNode>>,
}
impl RepositoryNode {
    pub fn new(chunk: NonNull<u8>, len: usize) -> Self {
        RepositoryNode {
            chunk,
            len,
            cursor: 0,
            next: None,
        }
    }

    pub fn chunk(&self) -> NonNull<u8> {
        self.chunk
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn unused_bytes(&self) -> usize {
        self.aligned_cursor()
            .map_or(0, |start| self.len.saturating_sub(start))
    }

    // `requested`と末尾の残りの小さい方を、ユニット境界に切り下げた分だけ切り出す.
    //
    // 切り出せるサイズが`minimum`に満たない場合には失敗する.
    fn carve(&mut self, requested: usize, minimum: usize, unit: UnitSize) -> Option<Region> {
        let size = unit.floor_align(requested.min(self.unused_bytes()));
        if size == 0 || size < minimum {
            return None;
        }
        self.take(size)
    }

    fn take(&mut self, size: usize) -> Option<Region> {
        let start = self.aligned_cursor()?;
        let ptr = NonNull::new(unsafe { self.chunk.as_ptr().add(start) })?;
        self.cursor = start + size;
        debug_assert!(self.cursor <= self.len);
        Some(Region { ptr, len: size })
    }

    fn aligned_cursor(&self) -> Option<usize> {
        let base = self.chunk.as_ptr() as usize;
        let addr = base.checked_add(self.cursor)?;
        let aligned = addr.checked_add(REGION_ALIGNMENT - 1)? / REGION_ALIGNMENT * REGION_ALIGNMENT;
        let start = aligned - base;
        if start > self.len {
            None
        } else {
            Some(start)
        }
    }
}

/// 取得済みのチャンク群を管理するリポジトリ.
///
/// チャンクは新しいものが先頭となる単方向リストで保持される.
/// 切り出しは古いチャンクから順に試される.
///
/// 一度切り出した領域が回収されることは無い.
/// チャンク自体は、マネージャの破棄時に`pop`で取り出されて返却される.
#[derive(Debug, Default)]
pub struct Repository {
    head: Option<NonNull<RepositoryNode>>,
    chunks: usize,
    raw_bytes: usize,
}
unsafe impl Send for Repository {}
impl Repository {
    pub fn new() -> Self {
        Repository::default()
    }

    /// 最も古い、末尾に`minimum`バイト以上が残っているチャンクから領域を切り出す.
    ///
    /// 末尾に`requested`バイトが残っていれば`requested`を、
    /// そうでなければ残りの内でユニット境界に収まる最大のサイズを切り出す.
    /// 返される領域が`minimum`バイトを下回ることは無い.
    pub fn allocate(&mut self, requested: usize, minimum: usize, unit: UnitSize) -> Option<Region> {
        Self::allocate_from(self.head, requested, minimum, unit)
    }

    /// 最も古い、末尾に`minimum`バイト以上が残っているチャンクから、残りのユニット全てを切り出す.
    pub fn minimum_allocation(&mut self, minimum: usize, unit: UnitSize) -> Option<Region> {
        Self::minimum_allocation_from(self.head, minimum, unit)
    }

    /// 新たに取得したチャンクのノードを先頭に追加する.
    ///
    /// # Safety
    ///
    /// `node`は、このリポジトリから`pop`されるまで有効である必要がある.
    pub unsafe fn push(&mut self, mut node: NonNull<RepositoryNode>) {
        node.as_mut().next = self.head;
        self.raw_bytes += node.as_ref().len;
        self.chunks += 1;
        self.head = Some(node);
    }

    /// 先頭(最も新しい)ノードを取り出す.
    pub fn pop(&mut self) -> Option<NonNull<RepositoryNode>> {
        let mut node = self.head?;
        let node_ref = unsafe { node.as_mut() };
        self.head = node_ref.next.take();
        self.raw_bytes -= node_ref.len;
        self.chunks -= 1;
        Some(node)
    }

    /// 未使用のバイト数を返す.
    pub fn unused_bytes(&self) -> usize {
        let mut total = 0;
        let mut current = self.head;
        while let Some(node) = current {
            let node = unsafe { node.as_ref() };
            total += node.unused_bytes();
            current = node.next;
        }
        total
    }

    /// 保持しているチャンクの数を返す.
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// 保持しているチャンクの合計サイズを返す.
    pub fn raw_bytes(&self) -> usize {
        self.raw_bytes
    }

    fn allocate_from(
        node: Option<NonNull<RepositoryNode>>,
        requested: usize,
        minimum: usize,
        unit: UnitSize,
    ) -> Option<Region> {
        let mut node = node?;
        let node = unsafe { node.as_mut() };
        Self::allocate_from(node.next, requested, minimum, unit)
            .or_else(|| node.carve(requested, minimum, unit))
    }

    fn minimum_allocation_from(
        node: Option<NonNull<RepositoryNode>>,
        minimum: usize,
        unit: UnitSize,
    ) -> Option<Region> {
        let mut node = node?;
        let node = unsafe { node.as_mut() };
        Self::minimum_allocation_from(node.next, minimum, unit)
            .or_else(|| node.carve(usize::MAX, minimum, unit))
    }
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;

    struct Chunks {
        buffers: Vec<Vec<u8>>,
        nodes: Vec<NonNull<RepositoryNode>>,
    }
    impl Chunks {
        fn new() -> Self {
            Chunks {
                buffers: Vec::new(),
                nodes: Vec::new(),
            }
        }

        // 開始位置が`REGION_ALIGNMENT`に揃ったノードを作る
        fn node(&mut self, len: usize) -> NonNull<RepositoryNode> {
            let mut buf = vec![0u8; len + REGION_ALIGNMENT];
            let offset = buf.as_ptr().align_offset(REGION_ALIGNMENT);
            let chunk = NonNull::new(unsafe { buf.as_mut_ptr().add(offset) }).expect("never null");
            self.buffers.push(buf);

            let node = Box::into_raw(Box::new(RepositoryNode::new(chunk, len)));
            let node = NonNull::new(node).expect("never null");
            self.nodes.push(node);
            node
        }
    }
    impl Drop for Chunks {
        fn drop(&mut self) {
            for node in self.nodes.drain(..) {
                unsafe {
                    drop(Box::from_raw(node.as_ptr()));
                }
            }
        }
    }

    #[test]
    fn it_works() -> TestResult {
        let mut chunks = Chunks::new();
        let mut repository = Repository::new();
        assert_eq!(repository.allocate(16, 8, UnitSize::default()), None);

        unsafe { repository.push(chunks.node(1024)) };
        assert_eq!(repository.chunk_count(), 1);
        assert_eq!(repository.raw_bytes(), 1024);
        assert_eq!(repository.unused_bytes(), 1024);

        let unit = track!(UnitSize::new(100))?;
        let a = repository.allocate(250, 100, unit).expect("carved");
        assert_eq!(a.len, 200);
        assert_eq!(a.ptr.as_ptr() as usize % REGION_ALIGNMENT, 0);

        let b = repository.allocate(500, 500, unit).expect("carved");
        assert_eq!(b.len, 500);
        assert_eq!(b.ptr.as_ptr() as usize, a.ptr.as_ptr() as usize + 208);
        assert_eq!(repository.unused_bytes(), 1024 - 720);

        // 末尾が`requested`に満たなくても、`minimum`以上なら残りが切り出される
        assert_eq!(repository.allocate(400, 400, unit), None);
        let c = repository.allocate(400, 300, unit).expect("carved");
        assert_eq!(c.len, 300);
        assert_eq!(repository.allocate(50, 1, unit), None);
        Ok(())
    }

    #[test]
    fn older_chunk_is_used_first() -> TestResult {
        let mut chunks = Chunks::new();
        let mut repository = Repository::new();
        let old = chunks.node(256);
        let new = chunks.node(1024);
        unsafe {
            repository.push(old);
            repository.push(new);
        }
        assert_eq!(repository.chunk_count(), 2);

        let unit = track!(UnitSize::new(64))?;
        let old_start = unsafe { old.as_ref().chunk().as_ptr() as usize };
        let new_start = unsafe { new.as_ref().chunk().as_ptr() as usize };

        let a = repository.allocate(256, 256, unit).expect("carved");
        assert_eq!(a.ptr.as_ptr() as usize, old_start);
        let b = repository.allocate(64, 64, unit).expect("carved");
        assert_eq!(b.ptr.as_ptr() as usize, new_start);
        Ok(())
    }

    #[test]
    fn partial_fit_in_older_chunk_is_preferred() -> TestResult {
        let mut chunks = Chunks::new();
        let mut repository = Repository::new();
        let old = chunks.node(300);
        let new = chunks.node(1024);
        unsafe {
            repository.push(old);
            repository.push(new);
        }
        let unit = track!(UnitSize::new(100))?;
        let old_start = unsafe { old.as_ref().chunk().as_ptr() as usize };
        let new_start = unsafe { new.as_ref().chunk().as_ptr() as usize };

        // 新しいチャンクには全体が収まるが、古いチャンクの残りが優先される
        let a = repository.allocate(500, 200, unit).expect("carved");
        assert_eq!(a.ptr.as_ptr() as usize, old_start);
        assert_eq!(a.len, 300);
        assert_eq!(unsafe { old.as_ref().unused_bytes() }, 0);

        let b = repository.allocate(500, 200, unit).expect("carved");
        assert_eq!(b.ptr.as_ptr() as usize, new_start);
        assert_eq!(b.len, 500);
        Ok(())
    }

    #[test]
    fn older_chunk_below_minimum_is_skipped() -> TestResult {
        let mut chunks = Chunks::new();
        let mut repository = Repository::new();
        let old = chunks.node(300);
        let new = chunks.node(1024);
        unsafe {
            repository.push(old);
            repository.push(new);
        }
        let unit = track!(UnitSize::new(100))?;
        let new_start = unsafe { new.as_ref().chunk().as_ptr() as usize };

        let a = repository.allocate(500, 400, unit).expect("carved");
        assert_eq!(a.ptr.as_ptr() as usize, new_start);
        assert_eq!(a.len, 500);
        assert_eq!(unsafe { old.as_ref().unused_bytes() }, 300);
        Ok(())
    }

    #[test]
    fn minimum_allocation_works() -> TestResult {
        let mut chunks = Chunks::new();
        let mut repository = Repository::new();
        unsafe { repository.push(chunks.node(1000)) };

        let unit = track!(UnitSize::new(96))?;
        assert_eq!(repository.allocate(800, 800, unit), None);
        let r = repository.allocate(800, 768, unit).expect("carved");
        assert_eq!(r.len, 768);
        assert_eq!(repository.unused_bytes(), 1000 - 768);

        assert_eq!(repository.minimum_allocation(288, unit), None);
        let r = repository.minimum_allocation(192, unit).expect("carved");
        assert_eq!(r.len, 192);
        assert_eq!(repository.minimum_allocation(96, unit), None);
        Ok(())
    }

    #[test]
    fn pop_works() {
        let mut chunks = Chunks::new();
        let mut repository = Repository::new();
        let a = chunks.node(128);
        let b = chunks.node(256);
        unsafe {
            repository.push(a);
            repository.push(b);
        }
        assert_eq!(repository.pop(), Some(b));
        assert_eq!(repository.raw_bytes(), 128);
        assert_eq!(repository.pop(), Some(a));
        assert_eq!(repository.pop(), None);
        assert_eq!(repository.chunk_count(), 0);
        assert_eq!(repository.raw_bytes(), 0);
    }
}
