//! `BucketManager::manage_memory`を定期的に実行するための保守スレッド.
//!
//! リポジトリの成長はチャンクの取得元の呼び出しを伴い、ブロッキングする可能性があるため、
//! 割当経路からは行われない.
//! 代わりに、通常のコンテキストで動作するこのスレッドが、一定間隔で成長の要否を判定する.
use prometrics::metrics::MetricBuilder;
use slog::{Discard, Logger};
use std::sync::Arc;
use std::time::Duration;

pub use self::thread::{MaintenanceHandle, MaintenanceMonitor, MaintenanceThread};

use crate::chunk::ChunkSource;
use crate::manager::BucketManager;

mod thread;

/// `MaintenanceThread`のビルダ.
#[derive(Debug, Clone)]
pub struct MaintenanceBuilder {
    pub(crate) interval: Duration,
    pub(crate) logger: Logger,
    pub(crate) metrics: MetricBuilder,
}
impl MaintenanceBuilder {
    /// デフォルト設定で`MaintenanceBuilder`インスタンスを生成する.
    pub fn new() -> Self {
        MaintenanceBuilder {
            interval: Duration::from_millis(100),
            logger: Logger::root(Discard, o!()),
            metrics: MetricBuilder::new(),
        }
    }

    /// `manage_memory`の実行間隔を設定する.
    ///
    /// デフォルト値は`Duration::from_millis(100)`.
    pub fn interval(&mut self, interval: Duration) -> &mut Self {
        self.interval = interval;
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

    /// 保守スレッドを起動する.
    ///
    /// スレッドは、ハンドル経由で停止が指示されるか、全てのハンドルが破棄されるまで動作し続ける.
    pub fn spawn<S>(&self, manager: Arc<BucketManager<S>>) -> (MaintenanceHandle, MaintenanceMonitor)
    where
        S: ChunkSource + 'static,
    {
        MaintenanceThread::spawn(self.clone(), manager)
    }
}
impl Default for MaintenanceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
