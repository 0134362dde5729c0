//! [Prometheus][prometheus]用のメトリクス.
//!
//! [prometheus]: https://prometheus.io/
use prometrics::metrics::{Counter, Gauge, MetricBuilder};

/// [`BucketManager`]のメトリクス.
///
/// [`BucketManager`]: ../manager/struct.BucketManager.html
#[derive(Debug, Clone)]
pub struct AllocatorMetrics {
    pub(crate) allocations: Counter,
    pub(crate) failed_allocations: Counter,
    pub(crate) frees: Counter,
    pub(crate) foreign_frees: Counter,
    pub(crate) bucket_growths: Counter,
    pub(crate) desperate_growths: Counter,
    pub(crate) chunk_growths: Counter,
    pub(crate) failed_chunk_requests: Counter,
    pub(crate) leaked_bytes: Counter,
    pub(crate) raw_bytes: Gauge,
    pub(crate) carved_bytes: Gauge,
    pub(crate) buckets: Gauge,
}
impl AllocatorMetrics {
    /// 成功した割当の回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// bucketalloc_manager_allocations_total <COUNTER>
    /// ```
    pub fn allocations(&self) -> u64 {
        self.allocations.value() as u64
    }

    /// 失敗した割当の回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// bucketalloc_manager_failed_allocations_total <COUNTER>
    /// ```
    pub fn failed_allocations(&self) -> u64 {
        self.failed_allocations.value() as u64
    }

    /// 成功した解放の回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// bucketalloc_manager_frees_total <COUNTER>
    /// ```
    pub fn frees(&self) -> u64 {
        self.frees.value() as u64
    }

    /// どのバケツにも属さないポインタの解放が要求された回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// bucketalloc_manager_foreign_frees_total <COUNTER>
    /// ```
    pub fn foreign_frees(&self) -> u64 {
        self.foreign_frees.value() as u64
    }

    /// 新規に作成されたバケツの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// bucketalloc_manager_bucket_growths_total <COUNTER>
    /// ```
    pub fn bucket_growths(&self) -> u64 {
        self.bucket_growths.value() as u64
    }

    /// チャンクの残り全てを使って作成されたバケツの数.
    ///
    /// `bucket_growths`の内数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// bucketalloc_manager_desperate_growths_total <COUNTER>
    /// ```
    pub fn desperate_growths(&self) -> u64 {
        self.desperate_growths.value() as u64
    }

    /// 初期チャンク以降に追加で取得したチャンクの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// bucketalloc_manager_chunk_growths_total <COUNTER>
    /// ```
    pub fn chunk_growths(&self) -> u64 {
        self.chunk_growths.value() as u64
    }

    /// チャンクの取得元が要求に応えられなかった回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// bucketalloc_manager_failed_chunk_requests_total <COUNTER>
    /// ```
    pub fn failed_chunk_requests(&self) -> u64 {
        self.failed_chunk_requests.value() as u64
    }

    /// 破棄時に解放されずに残っていたバイト数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// bucketalloc_manager_leaked_bytes_total <COUNTER>
    /// ```
    pub fn leaked_bytes(&self) -> u64 {
        self.leaked_bytes.value() as u64
    }

    /// 取得元から得たチャンクの合計サイズ.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// bucketalloc_manager_raw_bytes <GAUGE>
    /// ```
    pub fn raw_bytes(&self) -> u64 {
        self.raw_bytes.value() as u64
    }

    /// バケツに切り出されたバイト数の合計.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// bucketalloc_manager_carved_bytes <GAUGE>
    /// ```
    pub fn carved_bytes(&self) -> u64 {
        self.carved_bytes.value() as u64
    }

    /// バケツの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// bucketalloc_manager_buckets <GAUGE>
    /// ```
    pub fn buckets(&self) -> u64 {
        self.buckets.value() as u64
    }

    pub(crate) fn new(builder: &MetricBuilder) -> Self {
        let mut builder = builder.clone();
        builder.namespace("bucketalloc").subsystem("manager");
        AllocatorMetrics {
            allocations: builder
                .counter("allocations_total")
                .help("Number of successful allocations")
                .finish()
                .expect("Never fails"),
            failed_allocations: builder
                .counter("failed_allocations_total")
                .help("Number of failed allocations")
                .finish()
                .expect("Never fails"),
            frees: builder
                .counter("frees_total")
                .help("Number of successful frees")
                .finish()
                .expect("Never fails"),
            foreign_frees: builder
                .counter("foreign_frees_total")
                .help("Number of frees of pointers not owned by any bucket")
                .finish()
                .expect("Never fails"),
            bucket_growths: builder
                .counter("bucket_growths_total")
                .help("Number of created buckets")
                .finish()
                .expect("Never fails"),
            desperate_growths: builder
                .counter("desperate_growths_total")
                .help("Number of buckets created from the whole remaining tail of a chunk")
                .finish()
                .expect("Never fails"),
            chunk_growths: builder
                .counter("chunk_growths_total")
                .help("Number of raw chunks obtained after initialization")
                .finish()
                .expect("Never fails"),
            failed_chunk_requests: builder
                .counter("failed_chunk_requests_total")
                .help("Number of raw chunk requests refused by the source")
                .finish()
                .expect("Never fails"),
            leaked_bytes: builder
                .counter("leaked_bytes_total")
                .help("Number of bytes still allocated at teardown")
                .finish()
                .expect("Never fails"),
            raw_bytes: builder
                .gauge("raw_bytes")
                .help("Total bytes of raw chunks")
                .finish()
                .expect("Never fails"),
            carved_bytes: builder
                .gauge("carved_bytes")
                .help("Total bytes carved into buckets")
                .finish()
                .expect("Never fails"),
            buckets: builder
                .gauge("buckets")
                .help("Number of buckets")
                .finish()
                .expect("Never fails"),
        }
    }
}

/// [`MaintenanceThread`]のメトリクス.
///
/// [`MaintenanceThread`]: ../maintenance/struct.MaintenanceThread.html
#[derive(Debug, Clone)]
pub struct MaintenanceMetrics {
    pub(crate) runs: Counter,
    pub(crate) grown_bytes: Counter,
}
impl MaintenanceMetrics {
    /// `manage_memory`の実行回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// bucketalloc_maintenance_runs_total <COUNTER>
    /// ```
    pub fn runs(&self) -> u64 {
        self.runs.value() as u64
    }

    /// `manage_memory`の結果として追加されたチャンクの合計サイズ.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// bucketalloc_maintenance_grown_bytes_total <COUNTER>
    /// ```
    pub fn grown_bytes(&self) -> u64 {
        self.grown_bytes.value() as u64
    }

    pub(crate) fn new(builder: &MetricBuilder) -> Self {
        let mut builder = builder.clone();
        builder.namespace("bucketalloc").subsystem("maintenance");
        MaintenanceMetrics {
            runs: builder
                .counter("runs_total")
                .help("Number of memory management runs")
                .finish()
                .expect("Never fails"),
            grown_bytes: builder
                .counter("grown_bytes_total")
                .help("Number of bytes of raw chunks obtained by memory management runs")
                .finish()
                .expect("Never fails"),
        }
    }
}
