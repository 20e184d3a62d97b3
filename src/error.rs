//! Error and Result types.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Result type returned from methods that can fail with this crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Errors raised by the dispatcher, its nodes, the ring, and the control-message codec.
pub struct Error {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// Bad `host:port`, duplicate path prefix, missing master, oversized ring
    /// settings, or a resize attempted after open.
    Config(&'static str),
    /// A node's path prefix collides with one already registered.
    PrefixConflict,
    /// `node_remove` was called against a prefix bound to a different node.
    NodeMismatch,
    /// `node_remove` was called against a prefix with no node bound.
    RouteNotFound,
    /// A post referenced a session address with no live handle.
    NoSuchSession,
    /// A pub payload exceeded half the ring's data capacity.
    PayloadTooLarge,
    /// Another dispatcher is already running on this thread.
    ThreadBusy,
    /// The event loop's non-blocking tick failed.
    LoopTick,
    /// Underlying transport I/O failure.
    Io,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Self {
        Error { kind, cause: None }
    }

    pub(crate) fn with_cause(kind: Kind, cause: impl Into<Cause>) -> Self {
        Error {
            kind,
            cause: Some(cause.into()),
        }
    }

    pub(crate) fn config(msg: &'static str) -> Self {
        Error::new(Kind::Config(msg))
    }

    /// True if this error means "no session lives at that address".
    pub fn is_no_such_session(&self) -> bool {
        matches!(self.kind, Kind::NoSuchSession)
    }

    /// True if this error means a pub payload was rejected for size.
    pub fn is_payload_too_large(&self) -> bool {
        matches!(self.kind, Kind::PayloadTooLarge)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("cause", &self.cause)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Config(msg) => write!(f, "configuration error: {}", msg),
            Kind::PrefixConflict => write!(f, "path prefix already registered"),
            Kind::NodeMismatch => write!(f, "node_remove against a mismatched node"),
            Kind::RouteNotFound => write!(f, "no node bound to that path prefix"),
            Kind::NoSuchSession => write!(f, "no such session"),
            Kind::PayloadTooLarge => write!(f, "payload larger than half the ring's data capacity"),
            Kind::ThreadBusy => write!(f, "a dispatcher is already running on this thread"),
            Kind::LoopTick => write!(f, "event loop tick failed"),
            Kind::Io => write!(f, "transport I/O error"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|c| &**c as &(dyn StdError + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::with_cause(Kind::Io, err)
    }
}
