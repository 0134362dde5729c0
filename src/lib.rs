//! Bucket Allocator.
//!
//! `bucketalloc`は、外部から粗い粒度で取得した生メモリ(チャンク)を手元で細分化して、
//! プロセス全体の`allocate`/`free`を提供するための汎用メモリアロケータ.
//!
//! # 特徴
//!
//! - サイズクラス毎のフロントエンドと、侵入型フリーリストを持つブロックアロケータ群、からなる二段構成
//!   - 要求サイズは[サイズクラス][size_class]に分類され、各クラスは一つ以上の[Bucket]を持つ
//!   - [Bucket]の実体は、固定サイズの単位(ユニット)に分割されたバッファを管理する[BlockAllocator]
//! - 生メモリは[ChunkSource]経由でまとめて取得され、[BucketManager]内のリポジトリが切り出して使う
//! - アロケータ自身の管理用構造体は、専用の小さな[PrivatePool]から割り当てられる
//!   - i.e., 自分自身を使って自分の管理構造を割り当てる、という再帰は発生しない
//! - 呼び出し元のコンテキストに応じて、ロックの取得方法(スピン or ブロッキング)を選択可能
//!   - 制限付きのコンテキスト(e.g., 割り込み相当)からは[RestrictedContext]経由で操作する
//!   - [ChunkSource]の呼び出しを伴う成長処理は、制限付きコンテキストからは到達できない
//! - 解放済み領域の結合(コンパクション)やGCは行わない
//!
//! # モジュールの依存関係
//!
//! ```text
//! maintenance => manager => (pool, block, chunk, lock)
//! ```
//!
//! - [manager]モジュール:
//!   - 主に[BucketManager]構造体を提供
//!   - 利用者が直接触るのはこの構造体
//! - [block]モジュール:
//!   - 単一バッファを管理する[BlockAllocator]を提供
//! - [chunk]モジュール:
//!   - 生メモリの取得元を表す[ChunkSource]トレイトと、その実装を提供
//! - [pool]モジュール:
//!   - 管理用構造体専用のアロケータである[PrivatePool]を提供
//! - [maintenance]モジュール:
//!   - [BucketManager::manage_memory]を定期的に実行するためのスレッドを提供
//!
//! [size_class]: ./manager/size_class/index.html
//! [Bucket]: ./manager/struct.Bucket.html
//! [BlockAllocator]: ./block/struct.BlockAllocator.html
//! [ChunkSource]: ./chunk/trait.ChunkSource.html
//! [BucketManager]: ./manager/struct.BucketManager.html
//! [BucketManager::manage_memory]: ./manager/struct.BucketManager.html#method.manage_memory
//! [RestrictedContext]: ./manager/struct.RestrictedContext.html
//! [PrivatePool]: ./pool/struct.PrivatePool.html
//! [manager]: ./manager/index.html
//! [block]: ./block/index.html
//! [chunk]: ./chunk/index.html
//! [pool]: ./pool/index.html
//! [maintenance]: ./maintenance/index.html
#![warn(missing_docs)]
extern crate byteorder;
#[cfg(feature = "maintenance")]
extern crate fibers;
#[cfg(test)]
#[cfg(feature = "maintenance")]
extern crate fibers_global;
#[cfg(feature = "maintenance")]
extern crate futures;
extern crate libc;
extern crate parking_lot;
extern crate prometrics;
extern crate spin;
#[macro_use]
extern crate trackable;
#[macro_use]
extern crate slog;

pub use crate::error::{Error, ErrorKind};

pub mod block;
pub mod chunk;
pub mod lock;
#[cfg(feature = "maintenance")]
pub mod maintenance;
pub mod manager;
pub mod metrics;
pub mod pool;

mod error;

/// crate固有の`Result`型.
pub type Result<T> = std::result::Result<T, Error>;
