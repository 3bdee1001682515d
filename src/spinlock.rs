//! A single-word busy-wait exclusive lock.
//!
//! `SpinLock` is meant for short critical sections only: `lock` never parks
//! the calling thread on a scheduler wait queue, it spins and yields. Use a
//! [`crate::semaphore::Semaphore`] for anything that can hold the lock for
//! longer than a handful of instructions.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Error, ErrorKind};

const UNLOCKED: u8 = 0;
const LOCKED: u8 = 1;

/// A single machine-word exclusive lock, atomically swapped between "free"
/// and "held".
///
/// The all-zero value is a valid, unlocked `SpinLock`: `SpinLock::default()`
/// and a `static` `SpinLock::new()` behave identically. `SpinLock` is not
/// re-entrant; locking it twice from the same thread deadlocks.
pub struct SpinLock {
    state: AtomicU8,
}

impl SpinLock {
    /// Creates a new, unlocked `SpinLock`.
    #[inline]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNLOCKED),
        }
    }

    /// Attempts to acquire the lock with a single compare-and-swap.
    ///
    /// Never blocks or yields.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Spins until the lock can be acquired, yielding to the scheduler
    /// between attempts.
    #[inline]
    pub fn lock(&self) {
        let mut spin = crate::spinlock::SpinWait::new();
        while !self.try_lock() {
            if !spin.spin(std::thread::yield_now) {
                // Past the backoff's own threshold: keep yielding every
                // attempt rather than degrading into a tight busy loop that
                // never gives the scheduler a chance to run the holder.
                std::thread::yield_now();
            }
        }
    }

    /// Releases a held lock.
    ///
    /// # Panics
    ///
    /// Panics if the lock was not held. Unlocking a free `SpinLock` is a
    /// programmer error (`ErrorKind::UnlockOfUnlocked`); use
    /// [`crate::safe::safe_unlock`] if the caller cannot guarantee it holds
    /// the lock.
    #[inline]
    pub fn unlock(&self) {
        if self
            .state
            .compare_exchange(LOCKED, UNLOCKED, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            panic!("{}", Error::new(ErrorKind::UnlockOfUnlocked));
        }
    }

    /// Like [`unlock`](Self::unlock), but returns an error instead of
    /// panicking when the lock was not held.
    #[inline]
    pub fn checked_unlock(&self) -> Result<(), Error> {
        self.state
            .compare_exchange(LOCKED, UNLOCKED, Ordering::Release, Ordering::Relaxed)
            .map(|_| ())
            .map_err(|_| Error::new(ErrorKind::UnlockOfUnlocked))
    }

    /// Returns whether the lock is currently held by someone.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) == LOCKED
    }
}

impl Default for SpinLock {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SpinLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl crate::capability::ExclusiveLock for SpinLock {
    fn lock(&self) {
        SpinLock::lock(self)
    }

    fn try_lock(&self) -> bool {
        SpinLock::try_lock(self)
    }

    fn unlock(&self) {
        SpinLock::unlock(self)
    }
}

// Based on the exponential-backoff spin helper used throughout this
// workspace's `parking_lot`-derived lock implementations.
// Copyright 2016 Amanieu d'Antras
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
const SLEEP_THRESHOLD: usize = 10;
const YIELD_THRESHOLDS: usize = 3;

/// A counter used to perform exponential backoff in spin loops.
#[derive(Debug, Default)]
pub(crate) struct SpinWait {
    count: usize,
}

impl SpinWait {
    #[inline]
    pub(crate) fn new() -> Self {
        Default::default()
    }

    /// Spins until the sleep threshold has been reached.
    ///
    /// Returns whether it is still worth spinning further: the spin
    /// strategy starts with a CPU-bound loop and falls back to yielding
    /// the CPU to the scheduler after a few iterations.
    #[inline]
    pub(crate) fn spin(&mut self, r#yield: impl FnOnce()) -> bool {
        if self.count >= SLEEP_THRESHOLD {
            return false;
        }

        self.count += 1;
        if self.count <= YIELD_THRESHOLDS {
            for _ in 0..(1usize << self.count) {
                std::hint::spin_loop();
            }
        } else {
            r#yield();
        }

        true
    }
}
