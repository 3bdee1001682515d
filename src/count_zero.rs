//! A non-negative counter whose waiters unblock when it reaches zero.
//!
//! `CountZero` is built directly on top of [`Barrier`]: every time `dec`
//! brings the value to zero, the barrier's current token is broadcast and
//! replaced, waking anyone parked in [`CountZero::wait`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::barrier::Barrier;
use crate::cancel::Cancel;
use crate::error::{Error, ErrorKind};
use crate::token::{Token, WaitOutcome};

/// A non-negative counter with zero-transition wake-up.
pub struct CountZero {
    value: AtomicI64,
    initialised: AtomicBool,
    closed: AtomicBool,
    barrier: Barrier,
}

impl CountZero {
    /// Creates an uninitialised counter. Call [`init`](Self::init) before
    /// using it.
    pub fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
            initialised: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            barrier: Barrier::new(),
        }
    }

    /// Initialises the counter with `initial`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadyInitialised`] if called more than once.
    pub fn init(&self, initial: i64) -> Result<(), Error> {
        if self
            .initialised
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::new(ErrorKind::AlreadyInitialised));
        }
        self.value.store(initial, Ordering::Release);
        self.barrier.init()?;
        if initial == 0 {
            // Arm a fresh, already-satisfied generation so waiters that
            // arrive before the first inc/dec still return immediately.
            self.barrier.broadcast()?;
        }
        Ok(())
    }

    /// The current value.
    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Increments the counter.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Overflow`] if the counter would exceed `i64::MAX`.
    pub fn inc(&self) -> Result<(), Error> {
        let mut current = self.value.load(Ordering::Relaxed);
        loop {
            let next = current
                .checked_add(1)
                .ok_or_else(|| Error::new(ErrorKind::Overflow))?;
            match self.value.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Decrements the counter, waking any waiters if it reaches zero.
    ///
    /// # Panics
    ///
    /// Decrementing below zero is a programmer error and panics, matching
    /// the source spec's "must fault loudly" requirement. Use
    /// [`crate::safe`] to translate this into an error instead.
    pub fn dec(&self) {
        let mut current = self.value.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                panic!("CountZero::dec called while value was already zero");
            }
            let next = current - 1;
            match self.value.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if next == 0 {
                        // Broadcast failures here mean the counter was
                        // closed concurrently; there is nothing further to
                        // wake.
                        let _ = self.barrier.broadcast();
                    }
                    return;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Returns the current wake-up generation's token without claiming
    /// exclusivity, for composing this counter's zero-transition wake-up
    /// into a larger [`crossbeam_channel::Select`] (see
    /// [`crate::semaphore`], which races this against its own closing
    /// signal).
    pub(crate) fn current_token(&self) -> Result<Token, Error> {
        self.barrier.token()
    }

    /// Blocks until the value reaches zero. Returns immediately if it is
    /// already zero.
    ///
    /// The current generation's token is fetched *before* re-checking the
    /// value, not after: checking first and only then fetching the token to
    /// wait on would leave a window where a concurrent `dec` reaches zero
    /// and rotates in a fresh, not-yet-closed generation between the two
    /// steps, and the waiter would then block on a token that will never be
    /// closed by the transition it meant to observe.
    pub fn wait(&self) {
        loop {
            let Ok(token) = self.barrier.token() else {
                return;
            };
            if self.value() == 0 {
                return;
            }
            if token.wait() == WaitOutcome::Closed {
                return;
            }
        }
    }

    /// Blocks until the value reaches zero or `cancel` fires.
    ///
    /// A cancelled wait does not disturb the counter.
    pub fn wait_with_abort(&self, cancel: &Cancel) -> Result<(), Error> {
        loop {
            if cancel.is_fired() {
                return Err(Error::new(ErrorKind::Cancelled));
            }
            let token = self.barrier.token()?;
            if self.value() == 0 {
                return Ok(());
            }
            token.wait_with_cancel(cancel)?;
        }
    }

    /// Releases all current and future waiters with a closed indication.
    pub fn close(&self) -> Result<(), Error> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("CountZero::close called on an already-closed counter");
            return Err(Error::new(ErrorKind::AlreadyClosed));
        }
        self.barrier.close()
    }
}

impl Default for CountZero {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CountZero {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountZero")
            .field("value", &self.value())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
