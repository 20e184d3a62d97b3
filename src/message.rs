//! The internal message ABI exchanged between nodes and their upstream
//! consumer (§3 Control records, §4.C/§4.D/§4.E inbound/outbound contracts).
//!
//! This crate does not implement "the channel framework itself" (§1 out of
//! scope) — only the boundary it needs: nodes call [`Upstream::on_message`]
//! for everything they produce, and callers drive a node's outbound side
//! through [`Node::post`] (see `crate::node`).

use bytes::Bytes;

use crate::addr::Addr;
use crate::scheme;

/// One event a node emits toward its upstream consumer.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A new session connected; always the first message for its address.
    Connect {
        /// Session address.
        addr: Addr,
        /// Decoded `Connect` control record.
        record: scheme::Connect,
    },
    /// A chunk of inbound data for a live session, in arrival order.
    Data {
        /// Session address.
        addr: Addr,
        /// Opaque payload (an HTTP body chunk or one WS frame).
        body: Bytes,
    },
    /// A session ended; always the last message for its address.
    Disconnect {
        /// Session address.
        addr: Addr,
        /// Decoded `Disconnect` control record.
        record: scheme::Disconnect,
    },
}

/// A message an upstream consumer posts back to a node, addressed to one
/// session (§4.C/§4.D/§4.E outbound contracts).
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Write this payload out the session (HTTP reply body, WS frame, or a
    /// pub-ring publish).
    Data(Bytes),
    /// Close the session; any buffered outbound data is dropped.
    Disconnect,
}

/// The boundary a node emits [`Inbound`] messages across.
///
/// Implemented by whatever sits upstream of this crate in the hosting
/// channel framework; out of scope here beyond this interface (§1).
pub trait Upstream {
    /// Receives one message produced by a node.
    fn on_message(&self, msg: Inbound);
}

/// An [`Upstream`] that records every message, for tests.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
pub struct RecordingUpstream {
    messages: std::cell::RefCell<Vec<Inbound>>,
}

#[cfg(any(test, feature = "test-util"))]
impl Upstream for RecordingUpstream {
    fn on_message(&self, msg: Inbound) {
        self.messages.borrow_mut().push(msg);
    }
}

#[cfg(any(test, feature = "test-util"))]
impl RecordingUpstream {
    /// Snapshots all messages received so far.
    pub fn take(&self) -> Vec<Inbound> {
        self.messages.borrow_mut().drain(..).collect()
    }
}
