//! Composable mutual-exclusion and signalling primitives.
//!
//! This crate provides the concurrency core of a larger systems utility
//! library: atomic acquisition of a slice of locks with reverse-order
//! rollback ([`multilock`]), a reusable single-slot rendezvous channel that
//! underlies broadcast/signal/close semantics ([`token`], [`barrier`]), a
//! zero-waiting counter built on top of it ([`count_zero`]), and a
//! context-cancellable reader/writer semaphore with writer preference and a
//! draining close ([`semaphore`]).
//!
//! None of the primitives here assume a particular scheduler: callers may be
//! native OS threads or tasks on a cooperative runtime. Spinning operations
//! yield to whatever scheduler is ambient; suspending operations block the
//! calling thread.
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    rustdoc::broken_intra_doc_links
)]

pub mod barrier;
pub mod cancel;
pub mod capability;
pub mod count_zero;
pub mod error;
pub mod multilock;
pub mod panic;
pub mod safe;
pub mod semaphore;
pub mod spinlock;
pub mod token;

pub use barrier::Barrier;
pub use cancel::{Cancel, CancelHandle};
pub use count_zero::CountZero;
pub use error::{Error, ErrorKind};
pub use semaphore::{Semaphore, SemaphoreGuard, SemaphoreReadGuard};
pub use spinlock::SpinLock;
pub use token::Token;
