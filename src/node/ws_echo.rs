//! WebSocket echo node (§4.D).
//!
//! Shares the connect/disconnect contract of the HTTP node (§4.C) but stays
//! open for the life of the connection: each inbound frame becomes one
//! `Data`, and each outbound `Data` is sent as a single WebSocket text
//! frame. The connection task owns the actual socket; the node only holds
//! an unbounded command queue into it, the way the pub node's subscribers
//! are driven (§4.E) but without a ring in between.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::addr::{Addr, AddrSeq};
use crate::error::{Error, Kind, Result};
use crate::message::{Inbound, Outbound, Upstream};
use crate::node::{emit_connect, emit_disconnect, normalize_prefix};
use crate::method::Method;
use crate::session::SessionTable;

/// A command sent from the node to a connection's writer task.
#[derive(Debug)]
pub enum WsCmd {
    /// Send one WebSocket text frame.
    Send(Bytes),
    /// Close the connection.
    Close,
}

struct Session {
    tx: mpsc::UnboundedSender<WsCmd>,
}

/// A WebSocket echo node bound to one path prefix.
pub struct WsEchoNode {
    prefix: String,
    addrs: RefCell<AddrSeq>,
    sessions: RefCell<SessionTable<Session>>,
}

impl WsEchoNode {
    /// Creates a node bound at `configured_path` (normalized per §6).
    pub fn new(configured_path: &str) -> Rc<WsEchoNode> {
        Rc::new(WsEchoNode {
            prefix: normalize_prefix(configured_path),
            addrs: RefCell::new(AddrSeq::default()),
            sessions: RefCell::new(SessionTable::new()),
        })
    }

    /// The bound path prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of live connections.
    pub fn session_count(&self) -> usize {
        self.sessions.borrow().len()
    }

    /// Registers a freshly upgraded connection and emits `Connect`.
    pub fn connect(
        &self,
        upstream: &dyn Upstream,
        tx: mpsc::UnboundedSender<WsCmd>,
    ) -> Addr {
        let addr = self.addrs.borrow_mut().next();
        self.sessions
            .borrow_mut()
            .insert(addr, Session { tx })
            .expect("freshly minted address is never already bound");
        emit_connect(upstream, addr, Method::Undefined, &self.prefix, &[]);
        debug!(prefix = %self.prefix, %addr, "ws echo session connected");
        addr
    }

    /// Forwards one inbound WebSocket frame as a `Data` message.
    pub fn data(&self, upstream: &dyn Upstream, addr: Addr, frame: Bytes) {
        upstream.on_message(Inbound::Data { addr, body: frame });
    }

    /// The wire connection closed (peer close, idle timeout, or error):
    /// removes the session and emits `Disconnect`. A no-op if the session
    /// was already removed by an upstream-initiated [`Self::post`].
    pub fn closed(&self, upstream: &dyn Upstream, addr: Addr) {
        if self.sessions.borrow_mut().remove(addr).is_some() {
            emit_disconnect(upstream, addr, 0);
            debug!(prefix = %self.prefix, %addr, "ws echo session disconnected");
        }
    }

    /// Applies an upstream post addressed to `addr`.
    pub fn post(&self, addr: Addr, msg: Outbound) -> Result<()> {
        match msg {
            Outbound::Data(bytes) => {
                let sessions = self.sessions.borrow();
                let session = sessions.require(addr)?;
                let _ = session.tx.send(WsCmd::Send(bytes));
                Ok(())
            }
            Outbound::Disconnect => {
                let session = self
                    .sessions
                    .borrow_mut()
                    .remove(addr)
                    .ok_or_else(|| Error::new(Kind::NoSuchSession))?;
                let _ = session.tx.send(WsCmd::Close);
                Ok(())
            }
        }
    }

    /// Closes every live connection (§4.B node close).
    pub fn close_all_sessions(&self) {
        self.sessions.borrow_mut().drain_into(|_addr, session| {
            let _ = session.tx.send(WsCmd::Close);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RecordingUpstream;

    fn channel() -> (mpsc::UnboundedSender<WsCmd>, mpsc::UnboundedReceiver<WsCmd>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn connect_emits_connect_with_undefined_method() {
        let node = WsEchoNode::new("e");
        let upstream = RecordingUpstream::default();
        let (tx, _rx) = channel();
        let addr = node.connect(&upstream, tx);
        let messages = upstream.take();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Inbound::Connect { addr: a, record } => {
                assert_eq!(*a, addr);
                assert_eq!(record.method, Method::Undefined);
                assert_eq!(record.path, "/e");
            }
            _ => panic!("expected Connect"),
        }
    }

    #[test]
    fn post_data_forwards_send_command() {
        let node = WsEchoNode::new("/e");
        let upstream = RecordingUpstream::default();
        let (tx, mut rx) = channel();
        let addr = node.connect(&upstream, tx);
        node.post(addr, Outbound::Data(Bytes::from_static(b"pong"))).unwrap();
        match rx.try_recv().unwrap() {
            WsCmd::Send(b) => assert_eq!(b, Bytes::from_static(b"pong")),
            WsCmd::Close => panic!("expected Send"),
        }
    }

    #[test]
    fn post_disconnect_removes_session_immediately() {
        let node = WsEchoNode::new("/e");
        let upstream = RecordingUpstream::default();
        let (tx, mut rx) = channel();
        let addr = node.connect(&upstream, tx);
        node.post(addr, Outbound::Disconnect).unwrap();
        assert!(matches!(rx.try_recv().unwrap(), WsCmd::Close));
        let err = node.post(addr, Outbound::Data(Bytes::from_static(b"x"))).unwrap_err();
        assert!(err.is_no_such_session());
    }

    #[test]
    fn closed_is_idempotent_after_post_disconnect() {
        let node = WsEchoNode::new("/e");
        let upstream = RecordingUpstream::default();
        let (tx, _rx) = channel();
        let addr = node.connect(&upstream, tx);
        upstream.take();
        node.post(addr, Outbound::Disconnect).unwrap();
        node.closed(&upstream, addr);
        assert!(upstream.take().is_empty());
    }
}
