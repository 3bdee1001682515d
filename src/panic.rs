//! Translating abnormal termination of a closure into a typed [`Error`].
//!
//! This is the primitive that [`crate::safe`] and every composed primitive
//! (`MultiLock`, `Semaphore`) build on to guarantee that a misbehaving lock
//! implementation can never unwind across an API boundary that promises not
//! to panic.

use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe, UnwindSafe};

use crate::error::{AbnormalTermination, Error};

/// A typed sentinel a caller may panic with to signal an intentional abort.
///
/// [`catch`] treats this identically to any other panic payload: the source
/// library's documented requirement is that programmer-intent aborts and
/// foreign aborts be indistinguishable to the catcher.
#[derive(Debug, Clone)]
pub struct Abort(pub String);

/// Runs `f`, translating any unwind into `Err(Error::AbnormalTermination)`.
///
/// This function is reentrant: catching a panic from within a closure that
/// is itself already running inside another `catch` works exactly like any
/// other nested `catch_unwind`. On success it does not otherwise affect the
/// happens-before relationship between `f` and the caller.
pub fn catch<F, R>(f: F) -> Result<R, Error>
where
    F: FnOnce() -> R,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => {
            let fingerprint = fingerprint();
            log::warn!("caught abnormal termination (fingerprint {fingerprint:#x})");
            Err(Error::abnormal(AbnormalTermination::new(
                payload,
                fingerprint,
            )))
        }
    }
}

/// Runs `f`, requiring it to be statically [`UnwindSafe`].
///
/// Prefer this over [`catch`] whenever `f` does not capture interior
/// mutability across the boundary; it makes the "no half-mutated state
/// leaks out on panic" property a compile-time guarantee instead of an
/// assertion.
pub fn catch_unwind_safe<F, R>(f: F) -> Result<R, Error>
where
    F: FnOnce() -> R + UnwindSafe,
{
    match panic::catch_unwind(f) {
        Ok(value) => Ok(value),
        Err(payload) => {
            let fingerprint = fingerprint();
            log::warn!("caught abnormal termination (fingerprint {fingerprint:#x})");
            Err(Error::abnormal(AbnormalTermination::new(
                payload,
                fingerprint,
            )))
        }
    }
}

/// Hashes the current backtrace to produce a stable-ish identifier for the
/// unwind currently being caught.
fn fingerprint() -> u64 {
    let backtrace = std::backtrace::Backtrace::capture();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    backtrace.to_string().hash(&mut hasher);
    hasher.finish()
}
