//! A composable cancellation signal: a deadline, an explicit abort, or
//! both.
//!
//! `Cancel` values are passed by reference into the `*_with_cancel` family
//! of operations ([`crate::semaphore::Semaphore::lock_with_cancel`],
//! [`crate::count_zero::CountZero::wait_with_abort`]); those operations race
//! the signal against their own suspending wait using one
//! [`crossbeam_channel::Select`], so cancellation can never be observed
//! after the primitive has already committed to handing out the resource.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

/// An abortable signal carrying an optional deadline and/or an optional
/// explicit cancellation reason.
pub struct Cancel {
    deadline: Option<Receiver<Instant>>,
    explicit: Option<Receiver<()>>,
    fired: AtomicBool,
}

impl Cancel {
    /// A signal that never fires.
    pub fn none() -> Self {
        Self {
            deadline: None,
            explicit: None,
            fired: AtomicBool::new(false),
        }
    }

    /// A signal that fires once `duration` has elapsed.
    pub fn after(duration: Duration) -> Self {
        Self {
            deadline: Some(crossbeam_channel::after(duration)),
            explicit: None,
            fired: AtomicBool::new(false),
        }
    }

    /// A signal that fires only when the returned [`CancelHandle`] is used.
    pub fn manual() -> (CancelHandle, Self) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (
            CancelHandle { tx },
            Self {
                deadline: None,
                explicit: Some(rx),
                fired: AtomicBool::new(false),
            },
        )
    }

    /// A signal that fires on whichever of a deadline or an explicit cancel
    /// comes first.
    pub fn deadline_and_manual(duration: Duration) -> (CancelHandle, Self) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (
            CancelHandle { tx },
            Self {
                deadline: Some(crossbeam_channel::after(duration)),
                explicit: Some(rx),
                fired: AtomicBool::new(false),
            },
        )
    }

    /// Returns whether the signal has already fired, without blocking.
    ///
    /// Once a signal is observed to have fired it stays fired; this method
    /// is safe to call repeatedly.
    pub fn is_fired(&self) -> bool {
        if self.fired.load(Ordering::Acquire) {
            return true;
        }
        let hit = self
            .deadline
            .as_ref()
            .map(|r| r.try_recv().is_ok())
            .unwrap_or(false)
            || self
                .explicit
                .as_ref()
                .map(|r| r.try_recv().is_ok())
                .unwrap_or(false);
        if hit {
            self.fired.store(true, Ordering::Release);
        }
        hit
    }

    pub(crate) fn mark_fired(&self) {
        self.fired.store(true, Ordering::Release);
    }

    pub(crate) fn deadline_receiver(&self) -> Option<&Receiver<Instant>> {
        self.deadline.as_ref()
    }

    pub(crate) fn explicit_receiver(&self) -> Option<&Receiver<()>> {
        self.explicit.as_ref()
    }
}

impl std::fmt::Debug for Cancel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancel")
            .field("fired", &self.is_fired())
            .finish()
    }
}

/// The send side of a [`Cancel::manual`] pair.
///
/// Cloning and firing from multiple threads is safe; only the first
/// [`cancel`](Self::cancel) call has any effect.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Sender<()>,
}

impl CancelHandle {
    /// Fires the associated [`Cancel`] signal.
    pub fn cancel(&self) {
        // Best-effort: if the paired Cancel was already dropped there is
        // nothing left to wake up.
        let _ = self.tx.try_send(());
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle").finish_non_exhaustive()
    }
}
