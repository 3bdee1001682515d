//! The lock capability tiers that [`crate::safe`] and [`crate::multilock`]
//! are generic over.
//!
//! Rather than sniffing at runtime whether a given lock also supports
//! shared access (as the source library does, since its host language
//! cannot express the distinction statically), this crate defines two
//! traits and dispatches between them at compile time: [`ExclusiveLock`]
//! for anything that can be locked/unlocked, and [`SharedLock`] for
//! anything that additionally supports concurrent readers. The fallback
//! behaviour the source describes — treat any lock polymorphically, and
//! still benefit from parallel readers where available — is implemented by
//! [`crate::safe::read_lock_or_exclusive`] and friends rather than by a
//! blanket trait impl (which Rust's coherence rules would not allow to
//! coexist with real `SharedLock` implementations).

use crate::{cancel::Cancel, error::Error};

/// A lock that can be exclusively acquired and released.
///
/// Implementations must never be re-entrant-safe by accident: calling
/// `lock` while the same thread already holds the lock is expected to
/// deadlock, matching [`crate::spinlock::SpinLock`] and
/// [`crate::semaphore::Semaphore`].
///
/// The raw methods here are the "fatal on misuse" tier described by the
/// source spec: `unlock` on a lock that is not held should panic. Compose
/// these through [`crate::safe`] whenever the caller is not the lock's
/// only, trusted user.
pub trait ExclusiveLock: Send + Sync {
    /// Blocks until the lock is acquired.
    fn lock(&self);
    /// Attempts to acquire the lock without blocking.
    fn try_lock(&self) -> bool;
    /// Releases a held lock. Panics if it was not held.
    fn unlock(&self);
}

/// An [`ExclusiveLock`] that additionally supports any number of concurrent
/// readers.
pub trait SharedLock: ExclusiveLock {
    /// Blocks until shared (read) access is acquired.
    fn read_lock(&self);
    /// Attempts to acquire shared access without blocking.
    fn try_read_lock(&self) -> bool;
    /// Releases held shared access. Panics if it was not held.
    fn read_unlock(&self);
}

/// An [`ExclusiveLock`] whose blocking acquire can be raced against a
/// [`Cancel`] signal.
pub trait CancellableLock: ExclusiveLock {
    /// Blocks until the lock is acquired or `cancel` fires.
    ///
    /// `cancel` is checked both before waiting begins and while suspended.
    /// On cancellation no lock is held.
    fn lock_with_cancel(&self, cancel: &Cancel) -> Result<(), Error>;
}

/// A [`SharedLock`] + [`CancellableLock`] whose shared acquire can also be
/// raced against a [`Cancel`] signal.
pub trait CancellableSharedLock: CancellableLock + SharedLock {
    /// Blocks until shared access is acquired or `cancel` fires.
    fn read_lock_with_cancel(&self, cancel: &Cancel) -> Result<(), Error>;
}
