//! Request-reply HTTP node (§4.C).
//!
//! One session per accepted request. The node mints an address, emits a
//! `Connect`, and then forwards body chunks as `Data` as they arrive. The
//! single outbound `Data` an upstream consumer posts back becomes the
//! response body; it is delivered across a one-shot channel to whatever
//! task is driving the `hyper` service for that connection (see
//! `crate::dispatcher::routing`), mirroring the state machine in §4.C
//! exactly: `OPEN` holds the sender until either a reply or a disconnect
//! consumes it.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

use crate::addr::{Addr, AddrSeq};
use crate::error::Result;
use crate::message::{Inbound, Outbound, Upstream};
use crate::method::Method;
use crate::node::{emit_connect, emit_disconnect, normalize_prefix};
use crate::scheme::Header;
use crate::session::SessionTable;

/// What an HTTP session resolves to: a reply body, or an upstream-initiated
/// close.
#[derive(Debug)]
pub enum Reply {
    /// Write this as the response body with status 200.
    Data(Bytes),
    /// Drop the connection without writing a response.
    Disconnect,
}

struct Session {
    reply_tx: Option<oneshot::Sender<Reply>>,
}

/// An HTTP request-reply node bound to one path prefix.
pub struct HttpNode {
    prefix: String,
    addrs: RefCell<AddrSeq>,
    sessions: RefCell<SessionTable<Session>>,
}

impl HttpNode {
    /// Creates a node bound at `configured_path` (normalized per §6).
    pub fn new(configured_path: &str) -> Rc<HttpNode> {
        Rc::new(HttpNode {
            prefix: normalize_prefix(configured_path),
            addrs: RefCell::new(AddrSeq::default()),
            sessions: RefCell::new(SessionTable::new()),
        })
    }

    /// The bound path prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of in-flight requests.
    pub fn session_count(&self) -> usize {
        self.sessions.borrow().len()
    }

    /// Begins a session for a newly parsed request: mints an address, emits
    /// `Connect` with the request's headers (§4.C), and returns the
    /// receiving half of the reply channel the caller awaits to produce an
    /// HTTP response.
    pub fn open_session(
        &self,
        upstream: &dyn Upstream,
        method: Method,
        path: &str,
        headers: &[Header],
    ) -> (Addr, oneshot::Receiver<Reply>) {
        let addr = self.addrs.borrow_mut().next();
        let (tx, rx) = oneshot::channel();
        self.sessions
            .borrow_mut()
            .insert(addr, Session { reply_tx: Some(tx) })
            .expect("freshly minted address is never already bound");
        emit_connect(upstream, addr, method, path, headers);
        debug!(prefix = %self.prefix, %addr, %method, "http session opened");
        (addr, rx)
    }

    /// Forwards one inbound body chunk (§4.C: "zero or more Data messages").
    ///
    /// The body-read loop driving this races independently of the reply
    /// channel, so a chunk can still arrive after `post`/`aborted` already
    /// removed the session (e.g. upstream replied before the client
    /// finished streaming the request). No-ops and reports `false` in that
    /// case so the caller can stop reading rather than emit a `Data` for an
    /// address no `Connect`/`Disconnect` framing covers any more.
    pub fn data(&self, upstream: &dyn Upstream, addr: Addr, chunk: Bytes) -> bool {
        if self.sessions.borrow().get(addr).is_none() {
            return false;
        }
        upstream.on_message(Inbound::Data { addr, body: chunk });
        true
    }

    /// The peer aborted before a reply was posted: removes the session and
    /// emits `Disconnect`.
    pub fn aborted(&self, upstream: &dyn Upstream, addr: Addr) {
        if self.sessions.borrow_mut().remove(addr).is_some() {
            emit_disconnect(upstream, addr, 0);
            debug!(prefix = %self.prefix, %addr, "http session aborted before reply");
        }
    }

    /// Applies an upstream post addressed to `addr`.
    ///
    /// For `Data`, the session is removed as part of handling the post, so a
    /// second post against the same address naturally reports "no such
    /// session" (§8 invariant 2) rather than a separate error kind.
    pub fn post(&self, addr: Addr, msg: Outbound) -> Result<()> {
        let mut sessions = self.sessions.borrow_mut();
        let session = sessions.require(addr)?;
        match msg {
            Outbound::Data(bytes) => {
                let tx = session
                    .reply_tx
                    .take()
                    .expect("a session's reply sender is only ever taken once, here");
                sessions.remove(addr);
                let _ = tx.send(Reply::Data(bytes));
                debug!(prefix = %self.prefix, %addr, "http session replied");
                Ok(())
            }
            Outbound::Disconnect => {
                let tx = session.reply_tx.take();
                sessions.remove(addr);
                if let Some(tx) = tx {
                    let _ = tx.send(Reply::Disconnect);
                }
                debug!(prefix = %self.prefix, %addr, "http session disconnected by upstream");
                Ok(())
            }
        }
    }

    /// Closes every in-flight session without a reply (§4.B node close).
    pub fn close_all_sessions(&self) {
        let mut sessions = self.sessions.borrow_mut();
        sessions.drain_into(|_addr, session| {
            if let Some(tx) = session.reply_tx {
                let _ = tx.send(Reply::Disconnect);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RecordingUpstream;

    #[test]
    fn open_session_emits_connect_with_fresh_address() {
        let node = HttpNode::new("a");
        assert_eq!(node.prefix(), "/a");
        let upstream = RecordingUpstream::default();
        let (addr, _rx) = node.open_session(&upstream, Method::Get, "/a", &[]);
        let messages = upstream.take();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Inbound::Connect { addr: a, record } => {
                assert_eq!(*a, addr);
                assert_eq!(record.method, Method::Get);
                assert_eq!(record.path, "/a");
            }
            _ => panic!("expected Connect"),
        }
    }

    #[test]
    fn open_session_forwards_request_headers() {
        let node = HttpNode::new("/a");
        let upstream = RecordingUpstream::default();
        let headers = [Header { name: "host".into(), value: "x".into() }];
        let (_addr, _rx) = node.open_session(&upstream, Method::Get, "/a", &headers);
        let messages = upstream.take();
        match &messages[0] {
            Inbound::Connect { record, .. } => assert_eq!(record.headers, headers.to_vec()),
            _ => panic!("expected Connect"),
        }
    }

    #[test]
    fn post_data_delivers_reply_and_closes_session() {
        let node = HttpNode::new("/a");
        let upstream = RecordingUpstream::default();
        let (addr, mut rx) = node.open_session(&upstream, Method::Get, "/a", &[]);
        node.post(addr, Outbound::Data(Bytes::from_static(b"hello"))).unwrap();
        let reply = rx.try_recv().expect("reply delivered synchronously");
        match reply {
            Reply::Data(b) => assert_eq!(b, Bytes::from_static(b"hello")),
            Reply::Disconnect => panic!("expected Data"),
        }
        assert_eq!(node.session_count(), 0);
    }

    #[test]
    fn second_post_on_completed_session_is_no_such_session() {
        let node = HttpNode::new("/a");
        let upstream = RecordingUpstream::default();
        let (addr, _rx) = node.open_session(&upstream, Method::Get, "/a", &[]);
        node.post(addr, Outbound::Data(Bytes::from_static(b"x"))).unwrap();
        let err = node.post(addr, Outbound::Data(Bytes::from_static(b"y"))).unwrap_err();
        assert!(err.is_no_such_session());
    }

    #[test]
    fn data_after_reply_is_posted_is_a_no_op() {
        let node = HttpNode::new("/a");
        let upstream = RecordingUpstream::default();
        let (addr, _rx) = node.open_session(&upstream, Method::Get, "/a", &[]);
        node.post(addr, Outbound::Data(Bytes::from_static(b"hello"))).unwrap();
        upstream.take();
        let delivered = node.data(&upstream, addr, Bytes::from_static(b"late chunk"));
        assert!(!delivered);
        assert!(upstream.take().is_empty());
    }

    #[test]
    fn aborted_removes_session_and_emits_disconnect() {
        let node = HttpNode::new("/a");
        let upstream = RecordingUpstream::default();
        let (addr, _rx) = node.open_session(&upstream, Method::Get, "/a", &[]);
        upstream.take();
        node.aborted(&upstream, addr);
        let messages = upstream.take();
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], Inbound::Disconnect { addr: a, .. } if a == addr));
        assert_eq!(node.session_count(), 0);
    }
}
