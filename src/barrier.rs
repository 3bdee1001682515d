//! A reusable wrapper around a [`Token`] that serialises access to
//! bookkeeping and hands out regenerable signalling generations.
//!
//! The mailbox holding the current token is itself a single-slot
//! `crossbeam_channel`, not a mutex: `acquire` is a suspending take,
//! `try_acquire` a non-blocking one, and `release` puts the token back. This
//! is the same "single-slot channel" pattern [`crate::token::Token`] uses
//! for its own signalling slot, applied one level up.

use std::fmt;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::error::{Error, ErrorKind};
use crate::token::Token;

enum State {
    Uninit,
    Active {
        tx: Sender<Token>,
        rx: Receiver<Token>,
    },
    Closed,
}

/// Exclusive access to a regenerable [`Token`] generation.
pub struct Barrier {
    state: Mutex<State>,
}

impl Barrier {
    /// Creates an uninitialised `Barrier`. Call [`init`](Self::init) before
    /// using it.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Uninit),
        }
    }

    /// Installs a fresh, armed token in the barrier's mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadyInitialised`] if `init` was already
    /// called.
    pub fn init(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        match &*state {
            State::Uninit => {
                let (tx, rx) = crossbeam_channel::bounded(1);
                tx.try_send(Token::new())
                    .expect("freshly created mailbox has capacity for one token");
                *state = State::Active { tx, rx };
                Ok(())
            }
            State::Active { .. } => Err(Error::new(ErrorKind::AlreadyInitialised)),
            State::Closed => Err(Error::new(ErrorKind::AlreadyInitialised)),
        }
    }

    fn channel(&self) -> Result<(Sender<Token>, Receiver<Token>), Error> {
        match &*self.state.lock() {
            State::Uninit => Err(Error::new(ErrorKind::NotInitialised)),
            State::Active { tx, rx } => Ok((tx.clone(), rx.clone())),
            State::Closed => Err(Error::new(ErrorKind::Closed)),
        }
    }

    /// Removes the token from the mailbox, blocking if it is currently held
    /// elsewhere.
    pub fn acquire(&self) -> Result<Token, Error> {
        let (_tx, rx) = self.channel()?;
        rx.recv().map_err(|_| Error::new(ErrorKind::Closed))
    }

    /// Removes the token from the mailbox without blocking.
    ///
    /// Returns `Ok(None)` (not an error) if the mailbox is currently empty.
    pub fn try_acquire(&self) -> Result<Option<Token>, Error> {
        let (_tx, rx) = self.channel()?;
        match rx.try_recv() {
            Ok(token) => Ok(Some(token)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::new(ErrorKind::Closed)),
        }
    }

    /// Returns a token to the mailbox.
    ///
    /// A no-op if the barrier has since been closed: this makes cleanup
    /// during shutdown idempotent rather than an error.
    pub fn release(&self, token: Token) {
        if let Ok((tx, _rx)) = self.channel() {
            // The mailbox only ever holds at most one token and callers are
            // expected to release exactly the token they acquired, so this
            // send cannot block in well-behaved use.
            let _ = tx.send(token);
        }
    }

    /// Acquires the current token, wakes exactly one waiter on it, then
    /// releases it.
    pub fn signal(&self) -> Result<bool, Error> {
        let token = self.acquire()?;
        let woke = token.signal();
        self.release(token);
        Ok(woke)
    }

    /// Acquires the current token, closes it (waking every waiter on that
    /// generation permanently), installs a fresh armed token, and releases.
    pub fn broadcast(&self) -> Result<(), Error> {
        let token = self.acquire()?;
        token.close();
        self.release(Token::new());
        Ok(())
    }

    /// Returns the current token without claiming exclusivity, for use as
    /// the other side of an externally multiplexed wait.
    ///
    /// This does not suspend beyond whatever `acquire` would; it briefly
    /// takes and immediately gives back the mailbox's token.
    pub fn token(&self) -> Result<Token, Error> {
        let token = self.acquire()?;
        let clone = token.clone();
        self.release(token);
        Ok(clone)
    }

    /// Closes the barrier: the current token is closed and no new token is
    /// ever installed again. Subsequent `acquire`/`try_acquire` calls fail.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadyClosed`] on a second call.
    pub fn close(&self) -> Result<(), Error> {
        // The state mutex is only ever held long enough to swap in
        // `State::Closed` and pull the channel pair out — never across the
        // `rx.recv()` below. Holding it across a potentially-blocking recv
        // would deadlock against a concurrent `release` (which needs this
        // same mutex, briefly, to clone the channel handles) for whoever is
        // holding the very token this call is waiting to receive back.
        let prev = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, State::Closed)
        };
        match prev {
            State::Uninit => {
                *self.state.lock() = State::Uninit;
                Err(Error::new(ErrorKind::NotInitialised))
            }
            State::Active { tx, rx } => {
                // Take whatever token is sitting in the mailbox (or wait
                // for whoever is holding it to release it) so we can close
                // its current generation before tearing the channel down.
                drop(tx);
                match rx.recv() {
                    Ok(token) => token.close(),
                    Err(_) => {
                        log::warn!("barrier closed with no token left in its mailbox");
                    }
                }
                Ok(())
            }
            State::Closed => {
                *self.state.lock() = State::Closed;
                Err(Error::new(ErrorKind::AlreadyClosed))
            }
        }
    }
}

impl Default for Barrier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match &*self.state.lock() {
            State::Uninit => "uninitialised",
            State::Active { .. } => "active",
            State::Closed => "closed",
        };
        f.debug_struct("Barrier").field("state", &label).finish()
    }
}
