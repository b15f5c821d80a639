//! Binary mutual exclusion around one physical channel.
//!
//! `enter` waits until no other caller holds the lock; `leave` (or dropping
//! the guard) releases it. Waiters are queued: the blocking flavour hands the
//! lock over fairly, the async flavour is tokio's FIFO mutex.

use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};

/// Non-reentrant lock owned by one channel descriptor.
#[derive(Debug, Default)]
pub struct ChannelLock<T> {
    inner: Mutex<T>,
}

impl<T> ChannelLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Block until the lock is free and take it.
    pub fn enter(&self) -> LockGuard<'_, T> {
        LockGuard {
            guard: Some(self.inner.lock()),
        }
    }

    /// Take the lock only if nobody holds it.
    pub fn try_enter(&self) -> Option<LockGuard<'_, T>> {
        self.inner
            .try_lock()
            .map(|guard| LockGuard { guard: Some(guard) })
    }

    /// Whether some caller currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

/// Proof of holding a [`ChannelLock`]. Releases on drop.
pub struct LockGuard<'a, T> {
    guard: Option<MutexGuard<'a, T>>,
}

impl<T> LockGuard<'_, T> {
    /// Release the lock, handing it to the longest waiter.
    pub fn leave(mut self) {
        if let Some(guard) = self.guard.take() {
            MutexGuard::unlock_fair(guard);
        }
    }
}

impl<T> Deref for LockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `leave`/`drop` take the guard, and both consume `self`.
        self.guard.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for LockGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            MutexGuard::unlock_fair(guard);
        }
    }
}

/// Suspend-style counterpart of [`ChannelLock`].
#[cfg(feature = "async")]
#[derive(Debug, Default)]
pub struct AsyncChannelLock<T> {
    inner: tokio::sync::Mutex<T>,
}

#[cfg(feature = "async")]
impl<T> AsyncChannelLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(value),
        }
    }

    /// Suspend until the lock is free and take it. Waiters resume in FIFO order.
    pub async fn enter(&self) -> tokio::sync::MutexGuard<'_, T> {
        self.inner.lock().await
    }

    pub fn try_enter(&self) -> Option<tokio::sync::MutexGuard<'_, T>> {
        self.inner.try_lock().ok()
    }
}
