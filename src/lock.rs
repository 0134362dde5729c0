//! 呼び出し元のコンテキストに応じて取得方法を切り替えられるロック.
//!
//! アロケータは、ブロッキングが許される通常のコンテキストと、
//! ブロッキングやプリエンプションが許されない制限付きのコンテキスト(e.g., 割り込み相当)の、
//! 両方から呼び出される可能性がある.
//!
//! [`ContextLock`]は、保護対象のデータをスピンロックで守った上で、
//! ロック取得時に指定された[`LockMode`]に応じて待機方法を切り替える.
//!
//! [`ContextLock`]: ./struct.ContextLock.html
//! [`LockMode`]: ./enum.LockMode.html
use std::fmt;
use std::ops::{Deref, DerefMut};

/// ロックの取得方法.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// ブロッキングが許されるコンテキスト用.
    ///
    /// 同じモードで競合している呼び出し元同士は、スピンせずにスリープして待機する.
    Blocking,

    /// ブロッキングが許されないコンテキスト用.
    ///
    /// 決してスリープせず、ロックが獲得できるまでスピンする.
    Spin,
}

/// [`LockMode`]を指定して取得するロック.
///
/// データ自体は常にスピンロックで保護されている.
/// `LockMode::Blocking`での取得時には、その前に待機用のミューテックスを獲得するため、
/// スピンロック上で同時に待機する`Blocking`の呼び出し元は高々一つとなる.
///
/// [`LockMode`]: ./enum.LockMode.html
pub struct ContextLock<T> {
    gate: parking_lot::Mutex<()>,
    inner: spin::Mutex<T>,
}
impl<T> ContextLock<T> {
    /// 新しい`ContextLock`インスタンスを生成する.
    pub fn new(value: T) -> Self {
        ContextLock {
            gate: parking_lot::Mutex::new(()),
            inner: spin::Mutex::new(value),
        }
    }

    /// 指定されたモードでロックを獲得する.
    pub fn lock(&self, mode: LockMode) -> ContextGuard<T> {
        match mode {
            LockMode::Spin => ContextGuard {
                inner: self.inner.lock(),
                _gate: None,
            },
            LockMode::Blocking => {
                let gate = self.gate.lock();
                ContextGuard {
                    inner: self.inner.lock(),
                    _gate: Some(gate),
                }
            }
        }
    }

    /// 保護対象のデータへの可変参照を返す.
    ///
    /// 排他的な参照が得られているため、ロックは不要.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// インスタンスを破棄して、保護対象のデータを返す.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
impl<T: fmt::Debug> fmt::Debug for ContextLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.try_lock() {
            Some(inner) => f.debug_struct("ContextLock").field("inner", &*inner).finish(),
            None => f.debug_struct("ContextLock").field("inner", &"<locked>").finish(),
        }
    }
}

/// [`ContextLock`]のガード.
///
/// スコープを抜けると、スピンロック、待機用ミューテックスの順にロックが解放される.
///
/// [`ContextLock`]: ./struct.ContextLock.html
pub struct ContextGuard<'a, T> {
    // フィールドの宣言順に解放されるので、`inner`を先に置く必要がある
    inner: spin::MutexGuard<'a, T>,
    _gate: Option<parking_lot::MutexGuard<'a, ()>>,
}
impl<'a, T> Deref for ContextGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &*self.inner
    }
}
impl<'a, T> DerefMut for ContextGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn it_works() {
        let lock = ContextLock::new(10);
        *lock.lock(LockMode::Blocking) += 1;
        *lock.lock(LockMode::Spin) += 1;
        assert_eq!(*lock.lock(LockMode::Spin), 12);
        assert_eq!(lock.into_inner(), 12);
    }

    #[test]
    fn guard_releases_both_locks() {
        let lock = ContextLock::new(());
        {
            let _guard = lock.lock(LockMode::Blocking);
            assert!(lock.inner.try_lock().is_none());
            assert!(lock.gate.try_lock().is_none());
        }
        assert!(lock.inner.try_lock().is_some());
        assert!(lock.gate.try_lock().is_some());

        {
            let _guard = lock.lock(LockMode::Spin);
            assert!(lock.inner.try_lock().is_none());
            assert!(lock.gate.try_lock().is_some());
        }
    }

    #[test]
    fn mixed_modes_are_mutually_exclusive() {
        let lock = Arc::new(ContextLock::new(0u64));
        let threads = (0..8)
            .map(|i| {
                let lock = lock.clone();
                let mode = if i % 2 == 0 {
                    LockMode::Spin
                } else {
                    LockMode::Blocking
                };
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        *lock.lock(mode) += 1;
                    }
                })
            })
            .collect::<Vec<_>>();
        for t in threads {
            t.join().expect("never panics");
        }
        assert_eq!(*lock.lock(LockMode::Spin), 80_000);
    }
}
