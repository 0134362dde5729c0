use trackable;

/// crate固有のエラー型.
///
/// このエラー型が使われるのは、アロケータの構築時等の致命的な失敗のみである.
/// 割当・解放といった通常の操作の失敗は、`Option`ないし`bool`で表現される.
#[derive(Debug, Clone, TrackableError)]
pub struct Error(trackable::error::TrackableError<ErrorKind>);

/// 発生し得るエラーの種別.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 入力(設定値)が不正.
    ///
    /// E.g., 初期チャンクのサイズが`MIN_INITIAL_SIZE`未満
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者側のプログラムを修正して入力を正しくする
    InvalidInput,

    /// 生メモリの取得元から、必要なメモリが得られなかった.
    ///
    /// 構築時に最初のチャンクが取得できなかった場合にこのエラーが返される.
    ///
    /// # 典型的な対応策
    ///
    /// - より小さな初期サイズを指定して構築し直す
    /// - 時間をおいてリトライする
    ResourceExhausted,

    /// その他エラー.
    ///
    /// E.g., 管理スレッドの予期せぬ終了
    Other,
}
impl trackable::error::ErrorKind for ErrorKind {}
