//! 生メモリの取得元のインターフェース定義と実装群.
//!
//! このモジュールは[BucketManager](../manager/struct.BucketManager.html)が、
//! 細分化の元となる大きなメモリ領域(チャンク)を取得するために使用する取得元を提供する.
use std::ptr::NonNull;
use std::sync::Arc;

pub use self::heap::HeapChunkSource;

mod heap;

/// 生メモリの取得元を表すトレイト.
///
/// "チャンク"は、一度の呼び出しで取得される大きな連続領域であり、
/// アロケータはそれを手元で細分化して利用する.
///
/// このトレイトの実装は、ホスト環境の一括アロケータ(e.g., OSのページアロケータ、テスト用のヒープ)を
/// 呼び出すことが許されている唯一の構成要素である.
///
/// # 呼び出し規約
///
/// アロケータは、内部のロックを保持したまま、このトレイトのメソッドを呼び出すことは無い.
/// また、制限付きのコンテキストから呼び出されることも無い.
/// そのため実装は、ブロッキングしたり、長時間を要したりしても構わない.
pub trait ChunkSource: Send + Sync {
    /// チャンクに要求されるアライメント(バイト単位)を返す.
    ///
    /// 取得要求のサイズは、常にこの値の倍数となる.
    fn page_alignment(&self) -> usize;

    /// `length`バイトのチャンクを取得する.
    ///
    /// 結果の領域は`page_alignment()`の境界に揃っている必要がある.
    ///
    /// 資源が不足している場合には`None`を返しても良い.
    fn allocate_chunk(&self, length: usize) -> Option<NonNull<u8>>;

    /// 以前に取得したチャンクを返却する.
    ///
    /// アロケータの破棄時にのみ呼び出される.
    ///
    /// # Safety
    ///
    /// `chunk`と`length`は、このインスタンスの`allocate_chunk`が返した領域と、その時の要求サイズである必要がある.
    /// また、返却後の領域が参照されることはあってはならない.
    unsafe fn free_chunk(&self, chunk: NonNull<u8>, length: usize);

    /// `length`を`page_alignment()`の境界に切り上げる.
    ///
    /// オーバーフローする場合には`None`が返される.
    fn ceil_align(&self, length: usize) -> Option<usize> {
        let alignment = self.page_alignment();
        let units = length / alignment + if length % alignment == 0 { 0 } else { 1 };
        units.checked_mul(alignment)
    }
}
impl<T: ChunkSource> ChunkSource for Arc<T> {
    fn page_alignment(&self) -> usize {
        (**self).page_alignment()
    }
    fn allocate_chunk(&self, length: usize) -> Option<NonNull<u8>> {
        (**self).allocate_chunk(length)
    }
    unsafe fn free_chunk(&self, chunk: NonNull<u8>, length: usize) {
        (**self).free_chunk(chunk, length)
    }
}
