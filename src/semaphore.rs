//! A context-cancellable reader/writer lock with writer preference and a
//! draining close.
//!
//! `Semaphore` is built from one [`Barrier`] (which serialises its own
//! bookkeeping — counter increments, closed-flag checks — but is released
//! before any suspending wait), two [`CountZero`] counters (`active`,
//! `writers_waiting`), and two single-slot `crossbeam_channel` state slots:
//! `global` carries one [`Slot`] value meaning "the exclusive-or-shared slot
//! is occupied", and `readers` carries the current reader count, meaningful
//! only while `global` holds [`Slot::Shared`]. A write acquire sends
//! [`Slot::Exclusive`] into `global`, blocking while it is full. A read
//! acquire either sends [`Slot::Shared`] into `global` (first reader) or
//! takes the count out of `readers`, increments it, and puts it back
//! (subsequent reader); the last reader to leave receives from `global` to
//! vacate it.
//!
//! Every suspending operation races against one dedicated `closing` token
//! (closed once by [`Semaphore::close`]) inside the same
//! [`crossbeam_channel::Select`] used to race the caller's own [`Cancel`],
//! so a single mechanism handles both "someone closed the semaphore while I
//! waited" and "my cancellation fired while I waited" without ever leaving
//! a half-taken `readers` count behind: the count is only ever read and
//! immediately written back within one Select iteration, with no
//! suspension point in between where a cancellation could be observed.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Select, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::barrier::Barrier;
use crate::cancel::Cancel;
use crate::capability::{CancellableLock, CancellableSharedLock, ExclusiveLock, SharedLock};
use crate::count_zero::CountZero;
use crate::error::{Error, ErrorKind};
use crate::token::Token;

/// The value carried by the `global` state slot: which kind of access, if
/// any, currently occupies it.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Slot {
    Exclusive,
    Shared,
}

struct Inner {
    barrier: Barrier,
    active: CountZero,
    writers_waiting: CountZero,
    closing: Token,
    global_tx: Sender<Slot>,
    global_rx: Receiver<Slot>,
    readers_tx: Sender<usize>,
    readers_rx: Receiver<usize>,
}

impl Inner {
    fn new() -> Result<Self, Error> {
        let barrier = Barrier::new();
        barrier.init()?;
        let active = CountZero::new();
        active.init(0)?;
        let writers_waiting = CountZero::new();
        writers_waiting.init(0)?;
        let (global_tx, global_rx) = crossbeam_channel::bounded(1);
        let (readers_tx, readers_rx) = crossbeam_channel::bounded(1);
        Ok(Self {
            barrier,
            active,
            writers_waiting,
            closing: Token::new(),
            global_tx,
            global_rx,
            readers_tx,
            readers_rx,
        })
    }
}

enum SemState {
    Uninit,
    Active(Arc<Inner>),
    /// `close` has claimed exclusivity and is draining `active`; a second
    /// concurrent `close` observes this (rather than re-reading `Active`)
    /// and reports `AlreadyClosed` instead of racing the first call's
    /// teardown.
    Closing(Arc<Inner>),
    Closed,
}

/// A context-cancellable reader/writer lock with writer preference and a
/// draining close.
///
/// Lazily initialised on first use; terminated by a single successful
/// [`close`](Self::close). Implements [`ExclusiveLock`], [`SharedLock`],
/// [`CancellableLock`] and [`CancellableSharedLock`] so it composes with
/// [`crate::multilock`] like any other lock, though the raw trait surface
/// panics where the typed methods below would return a typed `Closed`
/// error — prefer [`crate::safe`] when composing a `Semaphore` behind a
/// trait object.
pub struct Semaphore {
    state: Mutex<SemState>,
}

impl Semaphore {
    /// Creates a new, uninitialised `Semaphore`. The first lock/read-lock
    /// call lazily initialises it.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SemState::Uninit),
        }
    }

    fn inner(&self) -> Result<Arc<Inner>, Error> {
        let mut state = self.state.lock();
        match &*state {
            SemState::Uninit => {
                let inner = Arc::new(Inner::new()?);
                *state = SemState::Active(inner.clone());
                Ok(inner)
            }
            SemState::Active(inner) => Ok(inner.clone()),
            SemState::Closing(_) | SemState::Closed => Err(Error::new(ErrorKind::Closed)),
        }
    }

    fn try_inner(&self) -> Option<Arc<Inner>> {
        self.inner().ok()
    }

    fn existing_inner(&self) -> Option<Arc<Inner>> {
        match &*self.state.lock() {
            // `Closing` still has to resolve in-flight `unlock`/`read_unlock`
            // calls from slots that were legitimately held before `close`
            // started draining `active`.
            SemState::Active(inner) | SemState::Closing(inner) => Some(inner.clone()),
            SemState::Uninit | SemState::Closed => None,
        }
    }

    /// Blocks until the writer slot is acquired.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Closed`] if the semaphore has been closed.
    pub fn lock(&self) -> Result<(), Error> {
        self.lock_with_cancel(&Cancel::none())
    }

    /// Never blocks. Returns whether the writer slot was acquired; returns
    /// `false` (not an error) on a closed semaphore.
    pub fn try_lock(&self) -> bool {
        let inner = match self.try_inner() {
            Some(inner) => inner,
            None => return false,
        };
        if inner.closing.is_closed() {
            return false;
        }
        if inner.active.inc().is_err() {
            return false;
        }
        match inner.global_tx.try_send(Slot::Exclusive) {
            Ok(()) => true,
            Err(_) => {
                inner.active.dec();
                false
            }
        }
    }

    /// Blocks until the writer slot is acquired or `cancel` fires.
    ///
    /// `cancel` is checked both before waiting begins and while suspended.
    /// On cancellation no slot is held.
    pub fn lock_with_cancel(&self, cancel: &Cancel) -> Result<(), Error> {
        let inner = self.inner()?;

        let token = inner.barrier.acquire()?;
        if inner.closing.is_closed() {
            inner.barrier.release(token);
            return Err(Error::new(ErrorKind::Closed));
        }
        inner.active.inc()?;
        inner.writers_waiting.inc()?;
        inner.barrier.release(token);

        let result = acquire_exclusive_slot(&inner, cancel);

        let token = inner.barrier.acquire()?;
        inner.writers_waiting.dec();
        inner.barrier.release(token);

        if result.is_err() {
            inner.active.dec();
        }
        result
    }

    /// Releases a held write slot.
    ///
    /// # Panics
    ///
    /// Panics with [`ErrorKind::UnlockOfUnlocked`] if the writer slot was
    /// not held, or [`ErrorKind::UnlockOfReadLocked`] if the caller instead
    /// holds (or some other caller holds) the shared slot.
    pub fn unlock(&self) {
        let inner = match self.existing_inner() {
            Some(inner) => inner,
            None => panic!("{}", Error::new(ErrorKind::UnlockOfUnlocked)),
        };
        match inner.global_rx.try_recv() {
            Ok(Slot::Exclusive) => {
                inner.active.dec();
            }
            Ok(Slot::Shared) => {
                let _ = inner.global_tx.try_send(Slot::Shared);
                panic!("{}", Error::new(ErrorKind::UnlockOfReadLocked));
            }
            Err(_) => panic!("{}", Error::new(ErrorKind::UnlockOfUnlocked)),
        }
    }

    /// Blocks until shared (read) access is acquired.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Closed`] if the semaphore has been closed.
    pub fn read_lock(&self) -> Result<(), Error> {
        self.read_lock_with_cancel(&Cancel::none())
    }

    /// Never blocks. Returns whether shared access was acquired; returns
    /// `false` (not an error) on a closed semaphore or while a writer is
    /// waiting (writer preference).
    pub fn try_read_lock(&self) -> bool {
        let inner = match self.try_inner() {
            Some(inner) => inner,
            None => return false,
        };
        if inner.closing.is_closed() || inner.writers_waiting.value() > 0 {
            return false;
        }
        if inner.active.inc().is_err() {
            return false;
        }
        match inner.readers_rx.try_recv() {
            Ok(n) => {
                let _ = inner.readers_tx.send(n + 1);
                true
            }
            Err(TryRecvError::Empty) => match inner.global_tx.try_send(Slot::Shared) {
                Ok(()) => {
                    let _ = inner.readers_tx.send(1);
                    true
                }
                Err(_) => {
                    inner.active.dec();
                    false
                }
            },
            Err(TryRecvError::Disconnected) => {
                inner.active.dec();
                false
            }
        }
    }

    /// Blocks until shared access is acquired or `cancel` fires.
    ///
    /// While any writer is waiting, new readers block on `writers_waiting`
    /// reaching zero rather than entering immediately (writer preference).
    pub fn read_lock_with_cancel(&self, cancel: &Cancel) -> Result<(), Error> {
        let inner = self.inner()?;

        let token = inner.barrier.acquire()?;
        if inner.closing.is_closed() {
            inner.barrier.release(token);
            return Err(Error::new(ErrorKind::Closed));
        }
        inner.active.inc()?;
        inner.barrier.release(token);

        let result =
            wait_for_no_writers(&inner, cancel).and_then(|()| acquire_shared_slot(&inner, cancel));

        if result.is_err() {
            inner.active.dec();
        }
        result
    }

    /// Releases a held shared (read) slot.
    ///
    /// # Panics
    ///
    /// Panics with [`ErrorKind::ReadUnlockOfUnlocked`] if shared access was
    /// not held.
    pub fn read_unlock(&self) {
        let inner = match self.existing_inner() {
            Some(inner) => inner,
            None => panic!("{}", Error::new(ErrorKind::ReadUnlockOfUnlocked)),
        };
        match inner.readers_rx.try_recv() {
            Ok(n) if n > 1 => {
                inner
                    .readers_tx
                    .send(n - 1)
                    .expect("readers slot must be free immediately after taking its value");
                inner.active.dec();
            }
            Ok(_) => {
                // The last reader: vacate the shared slot by receiving it.
                match inner.global_rx.try_recv() {
                    Ok(Slot::Shared) => inner.active.dec(),
                    Ok(Slot::Exclusive) => {
                        let _ = inner.global_tx.try_send(Slot::Exclusive);
                        panic!("{}", Error::new(ErrorKind::ReadUnlockOfUnlocked));
                    }
                    Err(_) => panic!("{}", Error::new(ErrorKind::ReadUnlockOfUnlocked)),
                }
            }
            Err(_) => panic!("{}", Error::new(ErrorKind::ReadUnlockOfUnlocked)),
        }
    }

    /// Acquires the write slot, returning an RAII guard that releases it on
    /// drop.
    pub fn lock_guard(&self) -> Result<SemaphoreGuard<'_>, Error> {
        self.lock()?;
        Ok(SemaphoreGuard { sem: self })
    }

    /// Acquires the shared slot, returning an RAII guard that releases it
    /// on drop.
    pub fn read_lock_guard(&self) -> Result<SemaphoreReadGuard<'_>, Error> {
        self.read_lock()?;
        Ok(SemaphoreReadGuard { sem: self })
    }

    /// Initiates shutdown: no new acquisitions succeed, any already
    /// suspended acquire observes [`ErrorKind::Closed`] promptly, and this
    /// call blocks until every existing holder (and in-flight acquirer)
    /// has left before returning.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadyClosed`] on a second call.
    pub fn close(&self) -> Result<(), Error> {
        // Claiming exclusivity (the `Active` -> `Closing` transition) and
        // reading the state that authorises teardown happen inside the same
        // critical section: two threads calling `close` concurrently both
        // contend for `self.state`'s lock, so only the first can observe
        // `Active` and move to `Closing`. The second always observes either
        // `Closing` or `Closed` and reports `AlreadyClosed` instead of
        // re-running the drain below.
        let inner = {
            let mut state = self.state.lock();
            let inner = match &*state {
                SemState::Uninit => {
                    *state = SemState::Closed;
                    return Ok(());
                }
                SemState::Closing(_) | SemState::Closed => {
                    return Err(Error::new(ErrorKind::AlreadyClosed))
                }
                SemState::Active(inner) => inner.clone(),
            };
            *state = SemState::Closing(inner.clone());
            inner
        };

        inner.closing.close();
        if let Err(err) = inner.writers_waiting.close() {
            log::warn!("Semaphore::close observed an already-closed writers_waiting counter: {err}");
        }

        inner.active.wait();

        *self.state.lock() = SemState::Closed;
        Ok(())
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match &*self.state.lock() {
            SemState::Uninit => "uninitialised",
            SemState::Active(_) => "active",
            SemState::Closing(_) => "closing",
            SemState::Closed => "closed",
        };
        f.debug_struct("Semaphore").field("state", &label).finish()
    }
}

/// Races the caller's exclusive acquire against the closing signal and
/// `cancel`, using one [`Select`] so a cancelled call never leaves a
/// half-completed send in flight.
fn acquire_exclusive_slot(inner: &Inner, cancel: &Cancel) -> Result<(), Error> {
    if cancel.is_fired() {
        return Err(Error::new(ErrorKind::Cancelled));
    }
    if inner.closing.is_closed() {
        return Err(Error::new(ErrorKind::Closed));
    }

    let mut sel = Select::new();
    let send_idx = sel.send(&inner.global_tx);
    let closing_idx = sel.recv(inner.closing.receiver());
    let deadline_idx = cancel.deadline_receiver().map(|r| sel.recv(r));
    let explicit_idx = cancel.explicit_receiver().map(|r| sel.recv(r));

    loop {
        let oper = sel.select();
        let idx = oper.index();
        if idx == send_idx {
            return match oper.send(&inner.global_tx, Slot::Exclusive) {
                Ok(()) => Ok(()),
                Err(_) => Err(Error::new(ErrorKind::Closed)),
            };
        } else if idx == closing_idx {
            let _ = oper.recv(inner.closing.receiver());
            return Err(Error::new(ErrorKind::Closed));
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

/// Blocks while `writers_waiting` is non-zero, so readers do not enter
/// ahead of a queued writer. Races against `cancel` and the closing
/// signal exactly like [`acquire_exclusive_slot`].
///
/// The writers_waiting token is fetched before re-checking its value, for
/// the same reason [`CountZero::wait`](crate::count_zero::CountZero::wait)
/// does: checking first would leave a window where the last waiting writer
/// decrements to zero and rotates in a fresh generation between the check
/// and the fetch, and this call would then block on a token nothing will
/// ever close.
fn wait_for_no_writers(inner: &Inner, cancel: &Cancel) -> Result<(), Error> {
    loop {
        if cancel.is_fired() {
            return Err(Error::new(ErrorKind::Cancelled));
        }
        if inner.closing.is_closed() {
            return Err(Error::new(ErrorKind::Closed));
        }
        let token = inner.writers_waiting.current_token()?;
        if inner.writers_waiting.value() == 0 {
            return Ok(());
        }
        race_token(&token, &inner.closing, cancel)?;
    }
}

/// Waits for `token` to be signalled/closed, `closing` to close, or
/// `cancel` to fire — whichever happens first.
fn race_token(token: &Token, closing: &Token, cancel: &Cancel) -> Result<(), Error> {
    let mut sel = Select::new();
    let token_idx = sel.recv(token.receiver());
    let closing_idx = sel.recv(closing.receiver());
    let deadline_idx = cancel.deadline_receiver().map(|r| sel.recv(r));
    let explicit_idx = cancel.explicit_receiver().map(|r| sel.recv(r));

    loop {
        let oper = sel.select();
        let idx = oper.index();
        if idx == token_idx {
            let _ = oper.recv(token.receiver());
            return Ok(());
        } else if idx == closing_idx {
            let _ = oper.recv(closing.receiver());
            return Err(Error::new(ErrorKind::Closed));
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

/// Races the caller's shared acquire against the closing signal and
/// `cancel`. The "first reader" and "subsequent reader" paths are each
/// resolved atomically within a single `Select` iteration: the `readers`
/// count, when taken, is always written back incremented before this
/// function can return, so a cancellation observed on a *later* iteration
/// can never see a skewed count.
fn acquire_shared_slot(inner: &Inner, cancel: &Cancel) -> Result<(), Error> {
    if cancel.is_fired() {
        return Err(Error::new(ErrorKind::Cancelled));
    }
    if inner.closing.is_closed() {
        return Err(Error::new(ErrorKind::Closed));
    }

    let mut sel = Select::new();
    let readers_idx = sel.recv(&inner.readers_rx);
    let global_idx = sel.send(&inner.global_tx);
    let closing_idx = sel.recv(inner.closing.receiver());
    let deadline_idx = cancel.deadline_receiver().map(|r| sel.recv(r));
    let explicit_idx = cancel.explicit_receiver().map(|r| sel.recv(r));

    loop {
        let oper = sel.select();
        let idx = oper.index();
        if idx == readers_idx {
            return match oper.recv(&inner.readers_rx) {
                Ok(n) => {
                    inner
                        .readers_tx
                        .send(n + 1)
                        .expect("readers slot must be free immediately after taking its value");
                    Ok(())
                }
                Err(_) => Err(Error::new(ErrorKind::Closed)),
            };
        } else if idx == global_idx {
            return match oper.send(&inner.global_tx, Slot::Shared) {
                Ok(()) => {
                    inner
                        .readers_tx
                        .send(1)
                        .expect("readers slot must be free for the first reader");
                    Ok(())
                }
                Err(_) => Err(Error::new(ErrorKind::Closed)),
            };
        } else if idx == closing_idx {
            let _ = oper.recv(inner.closing.receiver());
            return Err(Error::new(ErrorKind::Closed));
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

/// RAII guard releasing a held write slot when dropped.
///
/// Created by [`Semaphore::lock_guard`]. This is purely an ergonomic
/// convenience layer over the explicit `lock`/`unlock` pair; it adds no new
/// state machine of its own.
#[must_use = "if unused the Semaphore will immediately unlock"]
pub struct SemaphoreGuard<'a> {
    sem: &'a Semaphore,
}

impl SemaphoreGuard<'_> {
    /// Releases the write slot. Convenience for `drop(self)`.
    pub fn unlock(self) {
        drop(self)
    }
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        self.sem.unlock();
    }
}

impl fmt::Debug for SemaphoreGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphoreGuard").finish_non_exhaustive()
    }
}

/// RAII guard releasing a held shared slot when dropped.
///
/// Created by [`Semaphore::read_lock_guard`].
#[must_use = "if unused the Semaphore will immediately unlock"]
pub struct SemaphoreReadGuard<'a> {
    sem: &'a Semaphore,
}

impl SemaphoreReadGuard<'_> {
    /// Releases the shared slot. Convenience for `drop(self)`.
    pub fn unlock(self) {
        drop(self)
    }
}

impl Drop for SemaphoreReadGuard<'_> {
    fn drop(&mut self) {
        self.sem.read_unlock();
    }
}

impl fmt::Debug for SemaphoreReadGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphoreReadGuard").finish_non_exhaustive()
    }
}

impl ExclusiveLock for Semaphore {
    fn lock(&self) {
        Semaphore::lock(self).expect(
            "Semaphore::lock observed Closed through the raw ExclusiveLock surface; use the \
             typed API or crate::safe to handle this without panicking",
        )
    }

    fn try_lock(&self) -> bool {
        Semaphore::try_lock(self)
    }

    fn unlock(&self) {
        Semaphore::unlock(self)
    }
}

impl SharedLock for Semaphore {
    fn read_lock(&self) {
        Semaphore::read_lock(self).expect(
            "Semaphore::read_lock observed Closed through the raw SharedLock surface; use the \
             typed API or crate::safe to handle this without panicking",
        )
    }

    fn try_read_lock(&self) -> bool {
        Semaphore::try_read_lock(self)
    }

    fn read_unlock(&self) {
        Semaphore::read_unlock(self)
    }
}

impl CancellableLock for Semaphore {
    fn lock_with_cancel(&self, cancel: &Cancel) -> Result<(), Error> {
        Semaphore::lock_with_cancel(self, cancel)
    }
}

impl CancellableSharedLock for Semaphore {
    fn read_lock_with_cancel(&self, cancel: &Cancel) -> Result<(), Error> {
        Semaphore::read_lock_with_cancel(self, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier as StdBarrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn try_lock_then_unlock_round_trips() {
        let sem = Semaphore::new();
        assert!(sem.try_lock());
        sem.unlock();
        assert!(sem.try_lock());
        sem.unlock();
    }

    #[test]
    fn concurrent_readers_share_the_slot() {
        let sem = Arc::new(Semaphore::new());
        assert!(sem.try_read_lock());
        assert!(sem.try_read_lock());
        assert!(sem.try_read_lock());
        // A writer must not enter while readers hold the slot.
        assert!(!sem.try_lock());
        sem.read_unlock();
        sem.read_unlock();
        sem.read_unlock();
        assert!(sem.try_lock());
        sem.unlock();
    }

    #[test]
    #[should_panic]
    fn unlock_of_unlocked_panics() {
        Semaphore::new().unlock();
    }

    #[test]
    #[should_panic]
    fn read_unlock_of_unlocked_panics() {
        Semaphore::new().read_unlock();
    }

    #[test]
    fn reader_writer_rendezvous() {
        let sem = Arc::new(Semaphore::new());
        let entered = Arc::new(AtomicUsize::new(0));

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let sem = sem.clone();
                thread::spawn(move || {
                    sem.read_lock().unwrap();
                    thread::sleep(Duration::from_millis(30));
                    sem.read_unlock();
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(10));

        let writer_entered = Arc::new(AtomicUsize::new(0));
        let writer = {
            let sem = sem.clone();
            let entered = writer_entered.clone();
            thread::spawn(move || {
                sem.lock().unwrap();
                entered.fetch_add(1, Ordering::SeqCst);
                sem.unlock();
            })
        };

        for r in readers {
            r.join().unwrap();
        }
        writer.join().unwrap();
        assert_eq!(writer_entered.load(Ordering::SeqCst), 1);
        let _ = entered;
    }

    #[test]
    fn writer_preference_blocks_new_readers() {
        let sem = Arc::new(Semaphore::new());
        sem.lock().unwrap();

        let sem_for_writer = sem.clone();
        sem.unlock();
        let _ = sem_for_writer;

        // A simpler, deterministic check of the preference flag itself:
        // while writers_waiting is nonzero a fresh reader's try_read_lock
        // must observe it and refuse to enter.
        let sem = Semaphore::new();
        sem.lock().unwrap();
        let sem = Arc::new(sem);

        let blocked_writer = {
            let sem = sem.clone();
            thread::spawn(move || sem.lock().unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(
            !sem.try_read_lock(),
            "a new reader must not enter while a writer is queued"
        );
        sem.unlock();
        blocked_writer.join().unwrap();
        sem.unlock();
    }

    #[test]
    fn close_drains_active_holders() {
        let sem = Arc::new(Semaphore::new());
        sem.read_lock().unwrap();

        let sem_for_reader = sem.clone();
        let reader = thread::spawn(move || {
            thread::sleep(Duration::from_millis(40));
            sem_for_reader.read_unlock();
        });

        let start = std::time::Instant::now();
        sem.close().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));

        reader.join().unwrap();
        assert_eq!(sem.lock().unwrap_err().kind(), ErrorKind::Closed);
        assert!(!sem.try_lock());
    }

    #[test]
    fn cancel_mid_wait_leaves_no_trace() {
        let sem = Arc::new(Semaphore::new());
        sem.lock().unwrap();

        let cancel = Cancel::after(Duration::from_millis(20));
        let start = std::time::Instant::now();
        let result = sem.lock_with_cancel(&cancel);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
        assert!(start.elapsed() >= Duration::from_millis(15));

        // The original writer still holds the slot; nothing else can enter.
        assert!(!sem.try_lock());
        sem.unlock();
        assert!(sem.try_lock());
        sem.unlock();
    }

    #[test]
    fn double_close_errors() {
        let sem = Semaphore::new();
        sem.close().unwrap();
        assert_eq!(sem.close().unwrap_err().kind(), ErrorKind::AlreadyClosed);
    }

    #[test]
    fn concurrent_double_close_only_one_winner() {
        // Regression test: a held writer slot gives both closers a wide
        // window in which to race `self.state` before either one drains
        // `active`, so a close that merely reads `Active` without claiming
        // exclusivity in the same step would let both calls through.
        let sem = Arc::new(Semaphore::new());
        sem.lock().unwrap();

        let gate = Arc::new(StdBarrier::new(2));
        let closers: Vec<_> = (0..2)
            .map(|_| {
                let sem = sem.clone();
                let gate = gate.clone();
                thread::spawn(move || {
                    gate.wait();
                    sem.close()
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(10));
        sem.unlock();

        let results: Vec<_> = closers.into_iter().map(|h| h.join().unwrap()).collect();
        let ok_count = results.iter().filter(|r| r.is_ok()).count();
        let already_closed_count = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.kind() == ErrorKind::AlreadyClosed))
            .count();
        assert_eq!(ok_count, 1, "exactly one concurrent close must succeed");
        assert_eq!(
            already_closed_count, 1,
            "the other concurrent close must observe AlreadyClosed, not re-run teardown"
        );
    }

    #[test]
    fn unlock_after_close_on_a_legitimately_held_slot_succeeds() {
        let sem = Arc::new(Semaphore::new());
        sem.lock().unwrap();

        let sem_for_close = sem.clone();
        let closer = thread::spawn(move || sem_for_close.close().unwrap());
        thread::sleep(Duration::from_millis(10));
        sem.unlock();
        closer.join().unwrap();
    }

    #[test]
    fn guard_releases_on_drop() {
        let sem = Semaphore::new();
        {
            let _guard = sem.lock_guard().unwrap();
            assert!(!sem.try_lock());
        }
        assert!(sem.try_lock());
        sem.unlock();
    }
}
