use fibers::sync::oneshot;
use futures::{Future, Poll};
use slog::Logger;
use std::sync::mpsc as std_mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use trackable::error::ErrorKindExt;

use super::MaintenanceBuilder;
use crate::chunk::ChunkSource;
use crate::manager::{BucketManager, GrowthOutcome};
use crate::metrics::MaintenanceMetrics;
use crate::{Error, ErrorKind};

#[derive(Debug)]
enum Command {
    RunNow,
    Stop,
}

/// 保守スレッド.
#[derive(Debug)]
pub struct MaintenanceThread<S: ChunkSource> {
    manager: Arc<BucketManager<S>>,
    interval: Duration,
    metrics: MaintenanceMetrics,
    logger: Logger,
    command_rx: std_mpsc::Receiver<Command>,
}
impl<S> MaintenanceThread<S>
where
    S: ChunkSource + 'static,
{
    /// 保守スレッドを起動する.
    pub fn spawn(
        builder: MaintenanceBuilder,
        manager: Arc<BucketManager<S>>,
    ) -> (MaintenanceHandle, MaintenanceMonitor) {
        let metrics = MaintenanceMetrics::new(&builder.metrics);
        let (command_tx, command_rx) = std_mpsc::channel();
        let (monitored, monitor) = oneshot::monitor();
        let handle = MaintenanceHandle {
            command_tx,
            metrics: Arc::new(metrics.clone()),
        };

        thread::spawn(move || {
            let mut this = MaintenanceThread {
                manager,
                interval: builder.interval,
                metrics,
                logger: builder.logger,
                command_rx,
            };
            info!(this.logger, "Maintenance thread started"; "interval" => ?this.interval);
            while this.run_once() {}
            info!(this.logger, "Maintenance thread stopped"; "runs" => this.metrics.runs());
            monitored.exit(Ok(()));
        });

        (handle, MaintenanceMonitor(monitor))
    }

    fn run_once(&mut self) -> bool {
        match self.command_rx.recv_timeout(self.interval) {
            Err(RecvTimeoutError::Disconnected) | Ok(Command::Stop) => false,
            Err(RecvTimeoutError::Timeout) | Ok(Command::RunNow) => {
                self.manage_memory();
                true
            }
        }
    }

    fn manage_memory(&mut self) {
        self.metrics.runs.increment();
        let outcome = self.manager.manage_memory();
        if let GrowthOutcome::Grown(size) = outcome {
            self.metrics.grown_bytes.add_u64(size as u64);
        }
        debug!(self.logger, "Memory management ran"; "outcome" => ?outcome,
               "raw_bytes" => self.manager.raw_bytes(),
               "carved_bytes" => self.manager.carved_bytes());
    }
}

/// 保守スレッドの死活監視用オブジェクト.
///
/// スレッドが停止すると完了する.
#[derive(Debug)]
pub struct MaintenanceMonitor(oneshot::Monitor<(), Error>);
impl Future for MaintenanceMonitor {
    type Item = ();
    type Error = Error;
    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        track!(self.0.poll().map_err(|e| e.unwrap_or_else(|| ErrorKind::Other
            .cause("`MaintenanceThread` terminated unintentionally")
            .into())))
    }
}

/// 保守スレッドを操作するためのハンドル.
#[derive(Debug, Clone)]
pub struct MaintenanceHandle {
    command_tx: std_mpsc::Sender<Command>,
    metrics: Arc<MaintenanceMetrics>,
}
impl MaintenanceHandle {
    /// 次の実行間隔を待たずに、`manage_memory`を実行させる.
    pub fn run_now(&self) {
        let _ = self.command_tx.send(Command::RunNow);
    }

    /// スレッドを停止させる.
    ///
    /// 停止の完了は`MaintenanceMonitor`で検知できる.
    pub fn stop(&self) {
        let _ = self.command_tx.send(Command::Stop);
    }

    /// メトリクスを返す.
    pub fn metrics(&self) -> &Arc<MaintenanceMetrics> {
        &self.metrics
    }
}
