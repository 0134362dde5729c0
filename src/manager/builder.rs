use prometrics::metrics::MetricBuilder;
use slog::{Discard, Logger};

use super::repository::RepositoryNode;
use super::BucketManager;
use crate::chunk::ChunkSource;
use crate::lock::LockMode;
use crate::pool::{PoolBuffer, PrivatePool};
use crate::{ErrorKind, Result};

/// `BucketManager`のビルダ.
#[derive(Debug, Clone)]
pub struct BucketManagerBuilder {
    initial_size: usize,
    max_size: usize,
    private_pool_size: usize,
    logger: Logger,
    metrics: MetricBuilder,
}
impl BucketManagerBuilder {
    /// 初期チャンクのサイズとして指定可能な最小値.
    pub const MIN_INITIAL_SIZE: usize = 1024 * 1024;

    /// 新しい`BucketManagerBuilder`インスタンスを生成する.
    pub fn new() -> Self {
        BucketManagerBuilder {
            initial_size: 4 * 1024 * 1024,
            max_size: 256 * 1024 * 1024,
            private_pool_size: 64 * 1024,
            logger: Logger::root(Discard, o!()),
            metrics: MetricBuilder::new(),
        }
    }

    /// 構築時に取得する初期チャンクのサイズを設定する.
    ///
    /// 実際の要求サイズは、チャンクの取得元のアライメントに切り上げられる.
    ///
    /// `MIN_INITIAL_SIZE`未満の値が指定された場合には、構築時にエラーとなる.
    ///
    /// デフォルト値は`4MiB`.
    pub fn initial_size(&mut self, size: usize) -> &mut Self {
        self.initial_size = size;
        self
    }

    /// 取得するチャンクの合計サイズの上限を設定する.
    ///
    /// 合計がこの値に達すると、`manage_memory`によるチャンクの追加は行われなくなる.
    ///
    /// デフォルト値は`256MiB`.
    pub fn max_size(&mut self, size: usize) -> &mut Self {
        self.max_size = size;
        self
    }

    /// `build`時に確保されるプライベートプールのサイズを設定する.
    ///
    /// プールに空きがないとバケツやチャンクを追加できなくなるため、
    /// 実質的には、作成可能なバケツ数の上限となる.
    ///
    /// デフォルト値は`64KiB`.
    pub fn private_pool_size(&mut self, size: usize) -> &mut Self {
        self.private_pool_size = size;
        self
    }

    /// ロガーを設定する.
    ///
    /// デフォルト値は`Logger::root(Discard, o!())`.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// `source`から初期チャンクを取得して、`BucketManager`を構築する.
    ///
    /// プライベートプールのバッファは、ここで一度だけ確保される.
    pub fn build<S: ChunkSource>(&self, source: S) -> Result<BucketManager<S>> {
        let buffer = PoolBuffer::new(self.private_pool_size);
        track!(self.build_with_pool(source, buffer))
    }

    /// 呼び出し元が用意したバッファをプライベートプールとして使って、`BucketManager`を構築する.
    ///
    /// `private_pool_size`の設定は無視される.
    ///
    /// # Errors
    ///
    /// 以下の場合には、種類が`ErrorKind::InvalidInput`のエラーが返される:
    ///
    /// - 初期チャンクのサイズが`MIN_INITIAL_SIZE`未満、ないし`max_size`を超えている
    /// - プライベートプールが、初期チャンクの管理用構造体を保持できないほど小さい
    ///
    /// `source`が初期チャンクを返さなかった場合には、種類が`ErrorKind::ResourceExhausted`のエラーが返される.
    pub fn build_with_pool<S: ChunkSource>(
        &self,
        source: S,
        buffer: PoolBuffer,
    ) -> Result<BucketManager<S>> {
        track_assert!(
            self.initial_size >= Self::MIN_INITIAL_SIZE,
            ErrorKind::InvalidInput; self.initial_size
        );
        track_assert!(
            self.initial_size <= self.max_size,
            ErrorKind::InvalidInput; self.initial_size, self.max_size
        );
        let pool = track!(PrivatePool::new(buffer))?;

        let size = track_assert_some!(
            source.ceil_align(self.initial_size),
            ErrorKind::InvalidInput; self.initial_size, source.page_alignment()
        );
        let chunk = track_assert_some!(
            source.allocate_chunk(size),
            ErrorKind::ResourceExhausted; size
        );
        let node = match pool.allocate(LockMode::Blocking, RepositoryNode::new(chunk, size)) {
            Some(node) => node,
            None => {
                unsafe { source.free_chunk(chunk, size) };
                track_panic!(ErrorKind::InvalidInput, "Too small private pool"; pool.capacity());
            }
        };

        let manager = BucketManager::new(
            source,
            pool,
            node,
            self.max_size,
            self.logger.clone(),
            &self.metrics,
        );
        info!(manager.logger, "Bucket manager is initialized";
              "initial_size" => size, "max_size" => self.max_size,
              "private_pool_size" => manager.pool.capacity());
        Ok(manager)
    }
}
impl Default for BucketManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
