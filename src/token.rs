//! A reusable single-slot rendezvous signalling object.
//!
//! A `Token` may be waited on by any number of observers. `signal` wakes at
//! most one of them; `close` wakes all of them, permanently. A fresh
//! `Token` is always "armed": not yet signalled, not yet closed.
//!
//! This is realised as a rendezvous (zero-capacity) [`crossbeam_channel`]
//! pair rather than a mutex/condvar pair: `signal` is a non-blocking
//! attempt to hand a unit value directly to a waiter (which only succeeds
//! if one is currently parked in `recv`), and `close` drops the sending
//! side so every current and future `recv` call observes disconnection
//! immediately. This matches the source spec's explicit requirement that
//! the state slots not be reimplemented with plain atomics.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Select, Sender, TrySendError};
use parking_lot::Mutex;

use crate::cancel::Cancel;
use crate::error::{Error, ErrorKind};

struct Inner {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

/// A reusable, broadcast-on-close rendezvous signal.
///
/// Cloning a `Token` clones the handle, not the generation: all clones
/// observe the same `signal`/`close` events. [`crate::barrier::Barrier`]
/// is what regenerates fresh `Token`s across broadcasts.
#[derive(Clone)]
pub struct Token {
    inner: Arc<Inner>,
}

/// The outcome of waiting on a [`Token`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WaitOutcome {
    /// The token was signalled or broadcast-closed while this call waited.
    Woken,
    /// The token was already closed when the wait began.
    Closed,
}

impl Token {
    /// Creates a fresh, armed `Token`.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                tx: Mutex::new(Some(tx)),
                rx,
            }),
        }
    }

    /// Blocks until the token is signalled or closed.
    pub fn wait(&self) -> WaitOutcome {
        match self.inner.rx.recv() {
            Ok(()) => WaitOutcome::Woken,
            Err(_) => WaitOutcome::Closed,
        }
    }

    /// Blocks until the token is signalled/closed or `cancel` fires.
    pub fn wait_with_cancel(&self, cancel: &Cancel) -> Result<WaitOutcome, Error> {
        if cancel.is_fired() {
            return Err(Error::new(ErrorKind::Cancelled));
        }

        let mut sel = Select::new();
        let token_idx = sel.recv(&self.inner.rx);
        let deadline_idx = cancel.deadline_receiver().map(|r| sel.recv(r));
        let explicit_idx = cancel.explicit_receiver().map(|r| sel.recv(r));

        loop {
            let oper = sel.select();
            let idx = oper.index();
            if idx == token_idx {
                return Ok(match oper.recv(&self.inner.rx) {
                    Ok(()) => WaitOutcome::Woken,
                    Err(_) => WaitOutcome::Closed,
                });
            } else if Some(idx) == deadline_idx {
                let _ = oper.recv(cancel.deadline_receiver().unwrap());
                cancel.mark_fired();
                return Err(Error::new(ErrorKind::Cancelled));
            } else if Some(idx) == explicit_idx {
                let _ = oper.recv(cancel.explicit_receiver().unwrap());
                cancel.mark_fired();
                return Err(Error::new(ErrorKind::Cancelled));
            } else {
                unreachable!("Select returned an operation we did not register");
            }
        }
    }

    /// Attempts to wake exactly one waiter of the current generation.
    ///
    /// Returns whether a waiter was actually released: `signal` never
    /// blocks and never queues a wakeup for a waiter that arrives later.
    pub fn signal(&self) -> bool {
        let tx = self.inner.tx.lock();
        match tx.as_ref() {
            Some(tx) => match tx.try_send(()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
            },
            None => false,
        }
    }

    /// Permanently releases every current and future waiter.
    pub fn close(&self) {
        self.inner.tx.lock().take();
    }

    /// Returns whether `close` has been called on this token (or any clone
    /// of it).
    pub fn is_closed(&self) -> bool {
        self.inner.tx.lock().is_none()
    }

    /// Exposes the underlying receiver for use inside an external
    /// `crossbeam_channel::Select`, so a caller can wait on "this token OR
    /// some other wake-up source" without polling.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.rx
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("closed", &self.is_closed())
            .finish()
    }
}
