//! Atomic acquisition of a slice of locks, with reverse-order rollback on
//! partial failure.
//!
//! Every function here attempts its slice left-to-right; lock ordering for
//! deadlock avoidance is the caller's responsibility, this module does not
//! reorder anything. On a failure at index `i`, the already-acquired
//! `L[0..i)` are released right-to-left and every release is attempted even
//! if an earlier one errors, with all causes aggregated into one
//! [`Error::compound`]. A successful result guarantees every lock in the
//! slice is held by the caller; any other result guarantees none of them
//! are.
//!
//! A `None` element in the slice is a "nil lock": it produces
//! [`ErrorKind::NilLock`] for that slot but — in the release helpers, which
//! must attempt every entry regardless — does not stop the remaining
//! entries from being processed.

use crate::capability::{ExclusiveLock, SharedLock};
use crate::error::{Error, ErrorKind};
use crate::safe;

fn nil_lock_error() -> Error {
    Error::new(ErrorKind::NilLock)
}

fn fold_causes(first: Error, rollback_causes: Vec<Error>) -> Error {
    if rollback_causes.is_empty() {
        first
    } else {
        let mut causes = Vec::with_capacity(1 + rollback_causes.len());
        causes.push(first);
        causes.extend(rollback_causes);
        Error::compound(causes)
    }
}

/// Releases every lock in `locks` that lies in `[0, upto)`, right to left,
/// attempting every entry and collecting every failure.
fn rollback_exclusive(locks: &[Option<&dyn ExclusiveLock>], upto: usize) -> Vec<Error> {
    locks[..upto]
        .iter()
        .rev()
        .filter_map(|lock| safe::safe_unlock(*lock).err())
        .collect()
}

fn rollback_shared(locks: &[Option<&dyn SharedLock>], upto: usize) -> Vec<Error> {
    locks[..upto]
        .iter()
        .rev()
        .filter_map(|lock| safe::safe_read_unlock(*lock).err())
        .collect()
}

/// Acquires every lock in `locks`, in order, blocking on each.
///
/// An empty slice is a trivial success. On the first failure, every lock
/// acquired so far is released in reverse order and a compound error
/// (original cause plus any rollback failures) is returned; no lock in
/// `locks` is held by the caller afterwards.
pub fn lock_all(locks: &[Option<&dyn ExclusiveLock>]) -> Result<(), Error> {
    for (i, lock) in locks.iter().enumerate() {
        if let Err(err) = safe::safe_lock(*lock) {
            let rollback_causes = rollback_exclusive(locks, i);
            return Err(fold_causes(err, rollback_causes));
        }
    }
    Ok(())
}

/// Attempts to acquire every lock in `locks` without blocking on any of
/// them.
///
/// Returns `Ok(true)` only if every lock was acquired (all are now held).
/// Returns `Ok(false)` if some lock could not be acquired and the rollback
/// of everything acquired so far completed cleanly (none are held). Returns
/// `Err` only if the rollback itself also failed, in which case the state
/// of the unreleased locks is indeterminate and reported via the compound
/// error's causes.
pub fn try_lock_all(locks: &[Option<&dyn ExclusiveLock>]) -> Result<bool, Error> {
    for (i, lock) in locks.iter().enumerate() {
        match safe::safe_try_lock(*lock) {
            Ok(true) => continue,
            Ok(false) => {
                let rollback_causes = rollback_exclusive(locks, i);
                return if rollback_causes.is_empty() {
                    Ok(false)
                } else {
                    Err(Error::compound(rollback_causes))
                };
            }
            Err(err) => {
                let rollback_causes = rollback_exclusive(locks, i);
                return Err(fold_causes(err, rollback_causes));
            }
        }
    }
    Ok(true)
}

/// The shared-capability analogue of [`lock_all`].
pub fn read_lock_all(locks: &[Option<&dyn SharedLock>]) -> Result<(), Error> {
    for (i, lock) in locks.iter().enumerate() {
        if let Err(err) = safe::safe_read_lock(*lock) {
            let rollback_causes = rollback_shared(locks, i);
            return Err(fold_causes(err, rollback_causes));
        }
    }
    Ok(())
}

/// The shared-capability analogue of [`try_lock_all`].
pub fn try_read_lock_all(locks: &[Option<&dyn SharedLock>]) -> Result<bool, Error> {
    for (i, lock) in locks.iter().enumerate() {
        match safe::safe_try_read_lock(*lock) {
            Ok(true) => continue,
            Ok(false) => {
                let rollback_causes = rollback_shared(locks, i);
                return if rollback_causes.is_empty() {
                    Ok(false)
                } else {
                    Err(Error::compound(rollback_causes))
                };
            }
            Err(err) => {
                let rollback_causes = rollback_shared(locks, i);
                return Err(fold_causes(err, rollback_causes));
            }
        }
    }
    Ok(true)
}

/// Releases every lock in `locks`, left to right, attempting every entry
/// even if an earlier one errors (including a `None` entry, which
/// contributes [`ErrorKind::NilLock`] but does not stop the pass).
///
/// Returns `Ok(())` only if every release succeeded.
pub fn unlock_all(locks: &[Option<&dyn ExclusiveLock>]) -> Result<(), Error> {
    let causes: Vec<Error> = locks
        .iter()
        .filter_map(|lock| match lock {
            None => Some(nil_lock_error()),
            Some(_) => safe::safe_unlock(*lock).err(),
        })
        .collect();
    aggregate(causes)
}

/// Like [`unlock_all`], but releases right to left. Used for manual
/// rollback in composite operations that built up a partial acquisition
/// outside of [`lock_all`]/[`try_lock_all`].
pub fn unlock_all_reverse(locks: &[Option<&dyn ExclusiveLock>]) -> Result<(), Error> {
    let causes: Vec<Error> = locks
        .iter()
        .rev()
        .filter_map(|lock| match lock {
            None => Some(nil_lock_error()),
            Some(_) => safe::safe_unlock(*lock).err(),
        })
        .collect();
    aggregate(causes)
}

/// The shared-capability analogue of [`unlock_all`].
pub fn read_unlock_all(locks: &[Option<&dyn SharedLock>]) -> Result<(), Error> {
    let causes: Vec<Error> = locks
        .iter()
        .filter_map(|lock| match lock {
            None => Some(nil_lock_error()),
            Some(_) => safe::safe_read_unlock(*lock).err(),
        })
        .collect();
    aggregate(causes)
}

/// The shared-capability analogue of [`unlock_all_reverse`].
pub fn read_unlock_all_reverse(locks: &[Option<&dyn SharedLock>]) -> Result<(), Error> {
    let causes: Vec<Error> = locks
        .iter()
        .rev()
        .filter_map(|lock| match lock {
            None => Some(nil_lock_error()),
            Some(_) => safe::safe_read_unlock(*lock).err(),
        })
        .collect();
    aggregate(causes)
}

fn aggregate(causes: Vec<Error>) -> Result<(), Error> {
    if causes.is_empty() {
        Ok(())
    } else {
        Err(Error::compound(causes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spinlock::SpinLock;

    #[test]
    fn empty_slice_is_trivial_success() {
        assert!(lock_all(&[]).is_ok());
        assert_eq!(try_lock_all(&[]).unwrap(), true);
        assert!(unlock_all(&[]).is_ok());
    }

    #[test]
    fn lock_all_then_unlock_all_leaves_everything_unlocked() {
        let a = SpinLock::new();
        let b = SpinLock::new();
        let c = SpinLock::new();
        let locks: Vec<Option<&dyn ExclusiveLock>> = vec![Some(&a), Some(&b), Some(&c)];

        lock_all(&locks).unwrap();
        assert!(a.is_locked() && b.is_locked() && c.is_locked());

        unlock_all(&locks).unwrap();
        assert!(!a.is_locked() && !b.is_locked() && !c.is_locked());
    }

    #[test]
    fn rollback_on_contended_third_lock() {
        // A and B are free, C is already held by someone else: try_lock_all
        // must fail cleanly, releasing A and B in reverse order, leaving
        // all three unheld by the caller (C was never ours to begin with).
        let a = SpinLock::new();
        let b = SpinLock::new();
        let c = SpinLock::new();
        c.lock();

        let locks: Vec<Option<&dyn ExclusiveLock>> = vec![Some(&a), Some(&b), Some(&c)];
        let result = try_lock_all(&locks).unwrap();

        assert!(!result);
        assert!(!a.is_locked());
        assert!(!b.is_locked());
        assert!(c.is_locked(), "C was never acquired by try_lock_all");

        c.unlock();
    }

    #[test]
    fn nil_lock_in_slice_errors_without_acquiring() {
        let a = SpinLock::new();
        let locks: Vec<Option<&dyn ExclusiveLock>> = vec![Some(&a), None];

        let err = lock_all(&locks).unwrap_err();
        assert!(!a.is_locked(), "the nil slot rolled A back");
        // The original NilLock cause is preserved, no rollback error since
        // A's release succeeded.
        assert_eq!(err.kind(), ErrorKind::NilLock);
    }

    #[test]
    fn unlock_all_processes_every_entry_despite_a_nil_slot() {
        let a = SpinLock::new();
        let c = SpinLock::new();
        a.lock();
        c.lock();
        let locks: Vec<Option<&dyn ExclusiveLock>> = vec![Some(&a), None, Some(&c)];

        let err = unlock_all(&locks).unwrap_err();
        assert!(!a.is_locked(), "A was still released");
        assert!(!c.is_locked(), "C was still released despite the nil slot");
        assert_eq!(err.kind(), ErrorKind::Compound);
        assert_eq!(err.causes().len(), 1);
        assert_eq!(err.causes()[0].kind(), ErrorKind::NilLock);
    }
}
