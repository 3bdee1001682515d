//! The error type shared by every primitive in this crate.
//!
//! Following the shape used by this workspace's module-loading error type,
//! an [`Error`] is a [`Copy`] [`ErrorKind`] plus an optional boxed payload.
//! There is deliberately only one error type: [`AbnormalTermination`] and
//! [`CompoundError`] are payload variants of it rather than separate public
//! types, so every fallible operation in the crate returns `Result<T,
//! Error>`.

use std::any::Any;
use std::fmt;

/// The kind of failure carried by an [`Error`].
///
/// Exact variant names are the only part of this enum that is an
/// implementation detail; the set of identities matches the canonical list
/// every primitive in this crate commits to.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// A method was called through a `None` receiver.
    NilReceiver,
    /// A lock slot in a composed operation (e.g. [`crate::multilock`]) was `None`.
    NilLock,
    /// A cancellation signal was required but not supplied.
    NilCancel,
    /// The primitive was used before it was initialised.
    NotInitialised,
    /// The primitive was initialised more than once.
    AlreadyInitialised,
    /// The primitive has been closed.
    Closed,
    /// `close` was called on an already-closed primitive.
    AlreadyClosed,
    /// The operation observed its cancellation signal before it could complete.
    Cancelled,
    /// `unlock` was called on a lock that was not held.
    UnlockOfUnlocked,
    /// `unlock` was called on a lock that is only held for reading.
    UnlockOfReadLocked,
    /// `read_unlock` was called on a lock that was not read-held.
    ReadUnlockOfUnlocked,
    /// A counter would have exceeded its maximum representable value.
    Overflow,
    /// The operation was aborted by an abnormal termination (panic) that was
    /// caught and translated into a value; see [`Error::abnormal_payload`].
    AbnormalTermination,
    /// Several causes were aggregated by an operation that attempts every
    /// step regardless of earlier failures; see [`Error::causes`].
    Compound,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NilReceiver => "method called through a nil receiver",
            ErrorKind::NilLock => "nil lock",
            ErrorKind::NilCancel => "nil cancel signal",
            ErrorKind::NotInitialised => "not initialised",
            ErrorKind::AlreadyInitialised => "already initialised",
            ErrorKind::Closed => "closed",
            ErrorKind::AlreadyClosed => "already closed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::UnlockOfUnlocked => "unlock of unlocked lock",
            ErrorKind::UnlockOfReadLocked => "unlock of a read-locked lock",
            ErrorKind::ReadUnlockOfUnlocked => "read-unlock of unlocked lock",
            ErrorKind::Overflow => "counter overflow",
            ErrorKind::AbnormalTermination => "abnormal termination",
            ErrorKind::Compound => "multiple errors occurred",
        }
    }
}

/// A boxed `panic` payload together with a fingerprint identifying the
/// unwind that produced it.
///
/// The fingerprint is a hash of the backtrace captured at the moment the
/// panic was caught by [`crate::panic::catch`]; two `AbnormalTermination`
/// values produced by unwinds through the same call path will (with very
/// high probability) carry the same fingerprint, which is useful for
/// deduplicating logs without formatting the full backtrace every time.
pub struct AbnormalTermination {
    payload: Box<dyn Any + Send>,
    fingerprint: u64,
}

impl AbnormalTermination {
    pub(crate) fn new(payload: Box<dyn Any + Send>, fingerprint: u64) -> Self {
        Self {
            payload,
            fingerprint,
        }
    }

    /// The fingerprint of the unwind that produced this payload.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Borrows the payload as a `&str`, if the panic was raised with one.
    pub fn as_str(&self) -> Option<&str> {
        self.payload.downcast_ref::<&str>().copied()
    }

    /// Borrows the payload as a `String`, if the panic was raised with one.
    pub fn as_string(&self) -> Option<&String> {
        self.payload.downcast_ref::<String>()
    }

    /// Returns the raw payload, for callers that raised a typed panic.
    pub fn payload(&self) -> &(dyn Any + Send) {
        &*self.payload
    }
}

impl fmt::Debug for AbnormalTermination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbnormalTermination")
            .field("fingerprint", &self.fingerprint)
            .field(
                "payload",
                &self
                    .as_str()
                    .map(str::to_owned)
                    .or_else(|| self.as_string().cloned())
                    .unwrap_or_else(|| "<opaque payload>".to_owned()),
            )
            .finish()
    }
}

enum Payload {
    None,
    Abnormal(AbnormalTermination),
    Compound(Vec<Error>),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::None => f.write_str("None"),
            Payload::Abnormal(a) => fmt::Debug::fmt(a, f),
            Payload::Compound(causes) => f.debug_list().entries(causes.iter()).finish(),
        }
    }
}

/// The error type returned by every fallible operation in this crate.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    payload: Payload,
}

impl Error {
    /// Creates a plain error of `kind` with no payload.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            payload: Payload::None,
        }
    }

    pub(crate) fn abnormal(a: AbnormalTermination) -> Self {
        Self {
            kind: ErrorKind::AbnormalTermination,
            payload: Payload::Abnormal(a),
        }
    }

    /// Aggregates `causes`, encountered in order, into one compound error.
    ///
    /// Panics if `causes` is empty: callers (see [`crate::multilock`]) only
    /// build a compound error once they know at least one failure occurred.
    pub fn compound(causes: Vec<Error>) -> Self {
        assert!(
            !causes.is_empty(),
            "Error::compound requires at least one cause"
        );
        Self {
            kind: ErrorKind::Compound,
            payload: Payload::Compound(causes),
        }
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The captured panic payload, if this is an [`ErrorKind::AbnormalTermination`].
    pub fn abnormal_payload(&self) -> Option<&AbnormalTermination> {
        match &self.payload {
            Payload::Abnormal(a) => Some(a),
            _ => None,
        }
    }

    /// The aggregated causes, in encounter order, if this is an
    /// [`ErrorKind::Compound`] error.
    pub fn causes(&self) -> &[Error] {
        match &self.payload {
            Payload::Compound(causes) => causes,
            _ => &[],
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::None => f.write_str(self.kind.as_str()),
            Payload::Abnormal(a) => {
                write!(f, "{}: ", self.kind.as_str())?;
                match a.as_str().map(str::to_string).or_else(|| a.as_string().cloned()) {
                    Some(msg) => write!(f, "{msg}"),
                    None => write!(f, "<opaque payload, fingerprint {:#x}>", a.fingerprint()),
                }
            }
            Payload::Compound(causes) => {
                write!(f, "{} ({} causes):", self.kind.as_str(), causes.len())?;
                for (i, cause) in causes.iter().enumerate() {
                    write!(f, "\n  [{i}] {cause}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl Error {
    /// Shorthand for `matches!(self.kind(), kind)`.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}
