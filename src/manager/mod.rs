//! サイズクラス毎のバケツ群を束ねるアロケータの本体.
//!
//! # 割当の流れ
//!
//! 1. 要求サイズを[サイズクラス](./size_class/index.html)に分類する
//! 2. 分類されたクラスから昇順に(末尾まで達したら先頭に戻って)全クラスを走査する
//!    - 各クラスでは、リストの先頭から順にバケツでの割当を試す
//!    - 全てのバケツで失敗した場合には、リポジトリから領域を切り出して、新しいバケツを作成する
//! 3. 全てのクラスで失敗した場合には、割当失敗となる
//!
//! リポジトリ自体の成長(チャンクの追加)は、割当経路では行われず、
//! 定期的に呼び出される[`BucketManager::manage_memory`]でのみ行われる.
//!
//! [`BucketManager::manage_memory`]: ./struct.BucketManager.html#method.manage_memory
use prometrics::metrics::MetricBuilder;
use slog::Logger;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

pub use self::bucket::{Bucket, Buckets};
pub use self::builder::BucketManagerBuilder;

use self::repository::{Region, Repository, RepositoryNode};
use self::size_class::NUM_CLASSES;
use crate::block::{BlockAllocator, UnitSize};
use crate::chunk::ChunkSource;
use crate::lock::{ContextLock, LockMode};
use crate::metrics::AllocatorMetrics;
use crate::pool::PrivatePool;

pub mod size_class;

/// 新しいバケツが、可能であれば保持するユニット数の下限.
///
/// リポジトリの残りがこれに満たない場合でも、一つのランが収まれば、残り全てを使ってバケツが作られる.
pub const MIN_BUCKET_UNITS: usize = 16;

mod bucket;
mod builder;
mod repository;

/// `manage_memory`の結果.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthOutcome {
    /// 指定バイト数のチャンクが追加された.
    Grown(usize),

    /// 消費量が少ないため、追加の必要がなかった.
    NotNeeded,

    /// 取得済みチャンクの合計サイズが上限に達している.
    CeilingReached,

    /// チャンクの取得元、ないしプライベートプールに空きがなかった.
    Exhausted,

    /// 他の呼び出し元が`manage_memory`を実行中だった.
    InProgress,
}

/// サイズクラス毎のバケツ群を束ねるアロケータ.
///
/// 構築には[`BucketManagerBuilder`]を使用する.
///
/// このインスタンスに対する`allocate`/`free`の呼び出しは、ブロッキングが許される通常のコンテキスト用である.
/// 制限付きのコンテキストからは、[`restricted`]で得られるハンドルを使う必要がある.
///
/// # 破棄
///
/// インスタンスの破棄時には、全てのチャンクが取得元に返却される.
/// その時点で未解放の領域が残っている場合には、リークとしてログ出力され、メトリクスに計上される.
///
/// [`BucketManagerBuilder`]: ./struct.BucketManagerBuilder.html
/// [`restricted`]: #method.restricted
#[derive(Debug)]
pub struct BucketManager<S: ChunkSource> {
    source: S,
    pool: PrivatePool,
    heads: Vec<AtomicPtr<Bucket>>,
    repository: ContextLock<Repository>,
    class_bytes: Vec<AtomicUsize>,
    raw_bytes: AtomicUsize,
    carved_bytes: AtomicUsize,
    bucket_count: AtomicUsize,
    max_size: usize,
    growing: AtomicBool,
    metrics: AllocatorMetrics,
    logger: Logger,
}
impl<S: ChunkSource> BucketManager<S> {
    pub(crate) fn new(
        source: S,
        pool: PrivatePool,
        initial_chunk: NonNull<RepositoryNode>,
        max_size: usize,
        logger: Logger,
        metrics: &MetricBuilder,
    ) -> Self {
        let mut repository = Repository::new();
        unsafe { repository.push(initial_chunk) };
        let raw_bytes = repository.raw_bytes();

        let metrics = AllocatorMetrics::new(metrics);
        metrics.raw_bytes.set(raw_bytes as f64);
        BucketManager {
            source,
            pool,
            heads: (0..NUM_CLASSES)
                .map(|_| AtomicPtr::new(ptr::null_mut()))
                .collect(),
            repository: ContextLock::new(repository),
            class_bytes: (0..NUM_CLASSES).map(|_| AtomicUsize::new(0)).collect(),
            raw_bytes: AtomicUsize::new(raw_bytes),
            carved_bytes: AtomicUsize::new(0),
            bucket_count: AtomicUsize::new(0),
            max_size,
            growing: AtomicBool::new(false),
            metrics,
            logger,
        }
    }

    /// `length`バイト分の領域を割り当てる.
    ///
    /// `length`が`0`の場合や、どのクラスでも割当に失敗した場合には`None`が返される.
    ///
    /// 返されるポインタは、ランのヘッダ幅(`HEADER_SIZE`)の境界にのみ揃っている.
    pub fn allocate(&self, length: usize) -> Option<NonNull<u8>> {
        self.allocate_in(LockMode::Blocking, length)
    }

    /// `allocate`で割り当てた領域を解放する.
    ///
    /// `ptr`がnull、ないしどのバケツにも属していない(または解放済みの)場合には`false`が返される.
    pub fn free(&self, ptr: *const u8) -> bool {
        self.free_in(LockMode::Blocking, ptr)
    }

    /// 制限付きのコンテキスト(e.g., 割り込み相当)から使用するためのハンドルを返す.
    pub fn restricted(&self) -> RestrictedContext<S> {
        RestrictedContext { manager: self }
    }

    /// 必要に応じて、チャンクの取得元から新しいチャンクを取得してリポジトリに追加する.
    ///
    /// バケツに切り出された量が、取得済みチャンクの合計の半分を超えている場合に、
    /// 上限までの残りの半分(取得元のアライメントに切り上げ)を要求する.
    /// 取得元が要求に応えられなかった場合には、一ページになるまでサイズを半分にして再試行する.
    ///
    /// 取得元の呼び出し中は、いずれのロックも保持していない.
    ///
    /// 同時に一つの呼び出し元のみが実行可能であり、
    /// 既に実行中の場合には`GrowthOutcome::InProgress`が返される.
    pub fn manage_memory(&self) -> GrowthOutcome {
        if self
            .growing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return GrowthOutcome::InProgress;
        }
        let outcome = self.grow_repository();
        self.growing.store(false, Ordering::Release);
        debug!(self.logger, "Memory management finished"; "outcome" => ?outcome);
        outcome
    }

    /// 全てのバケツの割当済みバイト数の合計を返す.
    ///
    /// ランのヘッダや、ユニット境界に揃えるための余剰分も含まれる.
    pub fn allocated_bytes(&self) -> usize {
        self.all_buckets()
            .map(|b| b.allocated_bytes(LockMode::Blocking))
            .sum()
    }

    /// 全てのバケツの空きバイト数の合計を返す.
    ///
    /// リポジトリ内の、まだバケツに切り出されていない領域は含まれない.
    pub fn free_bytes(&self) -> usize {
        self.all_buckets()
            .map(|b| b.free_bytes(LockMode::Blocking))
            .sum()
    }

    /// 取得元から得たチャンクの合計サイズを返す.
    pub fn raw_bytes(&self) -> usize {
        self.raw_bytes.load(Ordering::SeqCst)
    }

    /// バケツに切り出されたバイト数の合計を返す.
    pub fn carved_bytes(&self) -> usize {
        self.carved_bytes.load(Ordering::SeqCst)
    }

    /// バケツの数を返す.
    pub fn bucket_count(&self) -> usize {
        self.bucket_count.load(Ordering::SeqCst)
    }

    /// 取得済みのチャンクの数を返す.
    pub fn chunk_count(&self) -> usize {
        self.repository.lock(LockMode::Blocking).chunk_count()
    }

    /// 指定クラスのバケツ群を、リストの先頭から順に返す.
    ///
    /// 範囲外のクラスに対しては、空のイテレータが返される.
    pub fn buckets(&self, class: usize) -> Buckets {
        let head = self
            .heads
            .get(class)
            .map_or(ptr::null_mut(), |h| h.load(Ordering::Acquire));
        Buckets::new(head)
    }

    /// チャンクの取得元を返す.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// プライベートプールを返す.
    pub fn private_pool(&self) -> &PrivatePool {
        &self.pool
    }

    /// メトリクスを返す.
    pub fn metrics(&self) -> &AllocatorMetrics {
        &self.metrics
    }

    fn all_buckets(&self) -> impl Iterator<Item = &Bucket> {
        (0..NUM_CLASSES).flat_map(move |class| self.buckets(class))
    }

    fn allocate_in(&self, mode: LockMode, length: usize) -> Option<NonNull<u8>> {
        if length == 0 {
            self.metrics.failed_allocations.increment();
            return None;
        }
        let first = size_class::classify(length);
        for i in 0..NUM_CLASSES {
            let class = (first + i) % NUM_CLASSES;
            let head = self.heads[class].load(Ordering::Acquire);
            let ptr = allocate_from_buckets(mode, head, ptr::null_mut(), length)
                .or_else(|| self.grow_class(mode, class, length, head));
            if ptr.is_some() {
                self.metrics.allocations.increment();
                return ptr;
            }
        }
        self.metrics.failed_allocations.increment();
        None
    }

    fn free_in(&self, mode: LockMode, ptr: *const u8) -> bool {
        if ptr.is_null() {
            self.metrics.foreign_frees.increment();
            return false;
        }

        // バケツの領域は互いに重ならないので、最初に見つかったものが唯一の候補
        let freed = self
            .all_buckets()
            .find(|b| b.owns(ptr))
            .map_or(false, |b| b.free(mode, ptr));
        if freed {
            self.metrics.frees.increment();
        } else {
            self.metrics.foreign_frees.increment();
        }
        freed
    }

    // リポジトリから領域を切り出して、`class`に新しいバケツを追加し、そこから割り当てる.
    //
    // `observed`は、呼び出し元がバケツ群を走査した時点でのリストの先頭.
    fn grow_class(
        &self,
        mode: LockMode,
        class: usize,
        length: usize,
        observed: *mut Bucket,
    ) -> Option<NonNull<u8>> {
        let unit = size_class::unit_size(class, length)?;
        let run = BlockAllocator::run_bytes(unit, length)?;
        let preferred = match self.class_bytes[class].load(Ordering::SeqCst) {
            0 => size_class::default_count(class).saturating_mul(unit.as_usize()),
            n => n,
        }
        .max(run);
        let minimum = unit
            .as_usize()
            .saturating_mul(MIN_BUCKET_UNITS)
            .min(preferred)
            .max(run);

        let mut repository = self.repository.lock(mode);

        // 走査後に他の呼び出し元が追加したバケツがあれば、まずはそれを試す
        let head = self.heads[class].load(Ordering::Acquire);
        if head != observed {
            if let Some(ptr) = allocate_from_buckets(mode, head, observed, length) {
                return Some(ptr);
            }
        }

        let slot = self.pool.allocate(mode, MaybeUninit::<Bucket>::uninit())?;
        let carving = carve_region(&mut repository, preferred, minimum, run, unit);
        let (region, desperate) = match carving {
            Some(x) => x,
            None => {
                unsafe { self.pool.release(mode, slot) };
                return None;
            }
        };
        let allocator = match unsafe { BlockAllocator::new(region.ptr, region.len, unit) } {
            Ok(allocator) => allocator,
            Err(_) => {
                unsafe { self.pool.release(mode, slot) };
                return None;
            }
        };
        let bucket = unsafe {
            slot.as_ptr()
                .write(MaybeUninit::new(Bucket::new(allocator, region.ptr, head)));
            slot.cast::<Bucket>()
        };
        let ptr = unsafe { bucket.as_ref() }.allocate(mode, length);
        self.heads[class].store(bucket.as_ptr(), Ordering::Release);
        drop(repository);

        self.class_bytes[class].fetch_add(region.len, Ordering::SeqCst);
        let carved = self.carved_bytes.fetch_add(region.len, Ordering::SeqCst) + region.len;
        let buckets = self.bucket_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.bucket_growths.increment();
        if desperate {
            self.metrics.desperate_growths.increment();
        }
        self.metrics.carved_bytes.set(carved as f64);
        self.metrics.buckets.set(buckets as f64);
        ptr
    }

    fn grow_repository(&self) -> GrowthOutcome {
        let raw = self.raw_bytes();
        if self.carved_bytes() <= raw / 2 {
            return GrowthOutcome::NotNeeded;
        }
        if raw >= self.max_size {
            return GrowthOutcome::CeilingReached;
        }

        let alignment = self.source.page_alignment();
        let headroom = self.max_size - raw;
        let ceiling = headroom / alignment * alignment;
        if ceiling == 0 {
            return GrowthOutcome::CeilingReached;
        }
        let mut size = self
            .source
            .ceil_align(headroom / 2)
            .map_or(ceiling, |s| s.min(ceiling))
            .max(alignment);

        // ロックを保持せずに取得元を呼び出す
        let chunk = loop {
            if let Some(chunk) = self.source.allocate_chunk(size) {
                break chunk;
            }
            self.metrics.failed_chunk_requests.increment();
            warn!(self.logger, "Chunk source refused a request"; "size" => size);
            if size <= alignment {
                return GrowthOutcome::Exhausted;
            }
            size = self
                .source
                .ceil_align(size / 2)
                .map_or(alignment, |s| s.max(alignment));
        };

        let mut repository = self.repository.lock(LockMode::Blocking);
        let node = match self
            .pool
            .allocate(LockMode::Blocking, RepositoryNode::new(chunk, size))
        {
            Some(node) => node,
            None => {
                drop(repository);
                unsafe { self.source.free_chunk(chunk, size) };
                warn!(self.logger, "Private pool is exhausted"; "chunk_size" => size);
                return GrowthOutcome::Exhausted;
            }
        };
        unsafe { repository.push(node) };
        let raw = repository.raw_bytes();
        let chunks = repository.chunk_count();
        self.raw_bytes.store(raw, Ordering::SeqCst);
        drop(repository);

        self.metrics.chunk_growths.increment();
        self.metrics.raw_bytes.set(raw as f64);
        info!(self.logger, "New chunk is added";
              "size" => size, "raw_bytes" => raw, "chunks" => chunks);
        GrowthOutcome::Grown(size)
    }
}
impl<S: ChunkSource> Drop for BucketManager<S> {
    fn drop(&mut self) {
        let mut leaked_bytes = 0;
        for (class, head) in self.heads.iter().enumerate() {
            let mut current = head.swap(ptr::null_mut(), Ordering::SeqCst);
            while let Some(bucket) = NonNull::new(current) {
                let bucket_ref = unsafe { bucket.as_ref() };
                current = bucket_ref.next;

                let allocated = bucket_ref.allocated_bytes(LockMode::Blocking);
                if allocated > 0 {
                    warn!(self.logger, "Leaked memory is detected";
                          "class" => class, "unit_size" => bucket_ref.unit_size().as_u32(),
                          "allocated_bytes" => allocated);
                    leaked_bytes += allocated;
                }
                unsafe { self.pool.release(LockMode::Blocking, bucket) };
            }
        }
        self.metrics.leaked_bytes.add_u64(leaked_bytes as u64);

        let mut chunks = 0;
        let repository = self.repository.get_mut();
        while let Some(node) = repository.pop() {
            let (chunk, len) = unsafe { (node.as_ref().chunk(), node.as_ref().len()) };
            unsafe {
                self.pool.release(LockMode::Blocking, node);
                self.source.free_chunk(chunk, len);
            }
            chunks += 1;
        }
        info!(self.logger, "Bucket manager is dropped";
              "returned_chunks" => chunks, "leaked_bytes" => leaked_bytes);
    }
}

/// 制限付きのコンテキスト(e.g., 割り込み相当)用のハンドル.
///
/// ロックの獲得時には決してスリープせずにスピンする.
///
/// 公開されているのは`allocate`と`free`のみであり、
/// チャンクの取得元を呼び出す経路(`manage_memory`)には、このハンドルからは到達できない.
#[derive(Debug)]
pub struct RestrictedContext<'a, S: ChunkSource> {
    manager: &'a BucketManager<S>,
}
impl<'a, S: ChunkSource> RestrictedContext<'a, S> {
    /// `BucketManager::allocate`と同様.
    pub fn allocate(&self, length: usize) -> Option<NonNull<u8>> {
        self.manager.allocate_in(LockMode::Spin, length)
    }

    /// `BucketManager::free`と同様.
    pub fn free(&self, ptr: *const u8) -> bool {
        self.manager.free_in(LockMode::Spin, ptr)
    }
}
impl<'a, S: ChunkSource> Clone for RestrictedContext<'a, S> {
    fn clone(&self) -> Self {
        RestrictedContext {
            manager: self.manager,
        }
    }
}
impl<'a, S: ChunkSource> Copy for RestrictedContext<'a, S> {}

fn allocate_from_buckets(
    mode: LockMode,
    from: *mut Bucket,
    until: *mut Bucket,
    length: usize,
) -> Option<NonNull<u8>> {
    Buckets::new(from)
        .take_while(|b| *b as *const Bucket != until as *const Bucket)
        .find_map(|b| b.allocate(mode, length))
}

// 希望サイズから半分ずつ減らしながら切り出しを試みる.
//
// 各段階では、要求の半分(ただし`minimum`以上)までなら、古いチャンクの残りで妥協する.
// `minimum`でも失敗した場合には、一つのラン(`run`)が収まるチャンクの残り全てを使う.
fn carve_region(
    repository: &mut Repository,
    preferred: usize,
    minimum: usize,
    run: usize,
    unit: UnitSize,
) -> Option<(Region, bool)> {
    let mut size = preferred;
    while size >= minimum {
        if let Some(region) = repository.allocate(size, (size / 2).max(minimum), unit) {
            return Some((region, false));
        }
        size /= 2;
    }
    repository
        .minimum_allocation(run, unit)
        .map(|region| (region, true))
}
