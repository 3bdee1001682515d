//! Safe wrappers over the lock capability traits in [`crate::capability`].
//!
//! Every function here has the same contract: it never panics across its
//! own boundary. A `None` lock is reported as [`ErrorKind::NilLock`] rather
//! than dereferenced, and any panic raised by the wrapped lock's own
//! methods is caught by [`crate::panic::catch`] and reported as
//! [`ErrorKind::AbnormalTermination`]. [`crate::multilock`] builds entirely
//! on top of these so that one misbehaving lock in a composed acquisition
//! can never unwind across the composition.
//!
//! The source spec dynamically detects at runtime whether a given lock also
//! supports shared access and falls back to the exclusive operation when it
//! does not. Rust can express that distinction statically instead: this
//! module offers one family of functions keyed to [`ExclusiveLock`] and a
//! second keyed to [`SharedLock`], plus an explicit `*_or_exclusive` family
//! that takes any [`ExclusiveLock`] and performs the same degradation the
//! source describes, without requiring a blanket trait impl coherence would
//! not allow.

use crate::cancel::Cancel;
use crate::capability::{CancellableLock, CancellableSharedLock, ExclusiveLock, SharedLock};
use crate::error::{Error, ErrorKind};
use crate::panic;

/// Blocks until `lock` is acquired. Returns [`ErrorKind::NilLock`] for a
/// `None` lock.
pub fn safe_lock(lock: Option<&dyn ExclusiveLock>) -> Result<(), Error> {
    let lock = lock.ok_or_else(|| Error::new(ErrorKind::NilLock))?;
    panic::catch(|| lock.lock())
}

/// Attempts to acquire `lock` without blocking.
pub fn safe_try_lock(lock: Option<&dyn ExclusiveLock>) -> Result<bool, Error> {
    let lock = lock.ok_or_else(|| Error::new(ErrorKind::NilLock))?;
    panic::catch(|| lock.try_lock())
}

/// Releases `lock`.
pub fn safe_unlock(lock: Option<&dyn ExclusiveLock>) -> Result<(), Error> {
    let lock = lock.ok_or_else(|| Error::new(ErrorKind::NilLock))?;
    panic::catch(|| lock.unlock())
}

/// Blocks until `lock` is acquired or `cancel` fires.
pub fn safe_lock_with_cancel(
    lock: Option<&dyn CancellableLock>,
    cancel: Option<&Cancel>,
) -> Result<(), Error> {
    let lock = lock.ok_or_else(|| Error::new(ErrorKind::NilLock))?;
    let cancel = cancel.ok_or_else(|| Error::new(ErrorKind::NilCancel))?;
    match panic::catch(|| lock.lock_with_cancel(cancel)) {
        Ok(inner) => inner,
        Err(caught) => Err(caught),
    }
}

/// Blocks until `lock` is acquired for reading. Returns
/// [`ErrorKind::NilLock`] for a `None` lock.
pub fn safe_read_lock(lock: Option<&dyn SharedLock>) -> Result<(), Error> {
    let lock = lock.ok_or_else(|| Error::new(ErrorKind::NilLock))?;
    panic::catch(|| lock.read_lock())
}

/// Attempts to acquire `lock` for reading without blocking.
pub fn safe_try_read_lock(lock: Option<&dyn SharedLock>) -> Result<bool, Error> {
    let lock = lock.ok_or_else(|| Error::new(ErrorKind::NilLock))?;
    panic::catch(|| lock.try_read_lock())
}

/// Releases a held read lock on `lock`.
pub fn safe_read_unlock(lock: Option<&dyn SharedLock>) -> Result<(), Error> {
    let lock = lock.ok_or_else(|| Error::new(ErrorKind::NilLock))?;
    panic::catch(|| lock.read_unlock())
}

/// Blocks until `lock` is acquired for reading or `cancel` fires.
pub fn safe_read_lock_with_cancel(
    lock: Option<&dyn CancellableSharedLock>,
    cancel: Option<&Cancel>,
) -> Result<(), Error> {
    let lock = lock.ok_or_else(|| Error::new(ErrorKind::NilLock))?;
    let cancel = cancel.ok_or_else(|| Error::new(ErrorKind::NilCancel))?;
    match panic::catch(|| lock.read_lock_with_cancel(cancel)) {
        Ok(inner) => inner,
        Err(caught) => Err(caught),
    }
}

/// Degrades a shared-read acquire to a plain exclusive acquire for any lock
/// that does not implement [`SharedLock`].
///
/// This is the documented fallback: callers that only know they have an
/// [`ExclusiveLock`] still benefit from the same polymorphic call site used
/// for locks that do support concurrent readers, at the cost of losing
/// reader parallelism for this particular lock.
pub fn safe_read_lock_or_exclusive(lock: Option<&dyn ExclusiveLock>) -> Result<(), Error> {
    safe_lock(lock)
}

/// The try-acquire counterpart of [`safe_read_lock_or_exclusive`].
pub fn safe_try_read_lock_or_exclusive(lock: Option<&dyn ExclusiveLock>) -> Result<bool, Error> {
    safe_try_lock(lock)
}

/// The release counterpart of [`safe_read_lock_or_exclusive`].
pub fn safe_read_unlock_or_exclusive(lock: Option<&dyn ExclusiveLock>) -> Result<(), Error> {
    safe_unlock(lock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spinlock::SpinLock;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    struct PanicsOnEverything;

    impl ExclusiveLock for PanicsOnEverything {
        fn lock(&self) {
            panic!("lock")
        }
        fn try_lock(&self) -> bool {
            panic!("try_lock")
        }
        fn unlock(&self) {
            panic!("unlock")
        }
    }

    #[test]
    fn nil_lock_is_reported_not_dereferenced() {
        assert_eq!(safe_lock(None).unwrap_err().kind(), ErrorKind::NilLock);
        assert_eq!(
            safe_try_lock(None).unwrap_err().kind(),
            ErrorKind::NilLock
        );
        assert_eq!(safe_unlock(None).unwrap_err().kind(), ErrorKind::NilLock);
    }

    #[test]
    fn panics_are_caught_never_propagated() {
        let lock = PanicsOnEverything;
        let prev_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));

        let result = catch_unwind(AssertUnwindSafe(|| safe_lock(Some(&lock))));
        std::panic::set_hook(prev_hook);

        let err = result.expect("safe_lock must not unwind").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AbnormalTermination);
    }

    #[test]
    fn well_behaved_lock_round_trips() {
        let lock = SpinLock::new();
        assert!(safe_try_lock(Some(&lock)).unwrap());
        safe_unlock(Some(&lock)).unwrap();
    }

    #[test]
    fn degraded_shared_read_uses_exclusive_path() {
        let lock = SpinLock::new();
        assert!(safe_try_read_lock_or_exclusive(Some(&lock)).unwrap());
        safe_read_unlock_or_exclusive(Some(&lock)).unwrap();
    }
}
