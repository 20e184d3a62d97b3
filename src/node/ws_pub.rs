//! WebSocket publish node (§4.E).
//!
//! Every subscriber shares one ring (§4.A). A publish is a single upstream
//! post, handled synchronously against the ring and every subscriber's
//! cursor; draining a caught-up subscriber is left to its own connection
//! task, woken with a [`tokio::sync::Notify`] rather than invoked through a
//! wire-level "drained" callback. Because the actual send is
//! `sink.send(frame).await`, the outbound socket's own flow control *is*
//! the backpressure signal — a slow subscriber's drain loop simply stays
//! suspended inside that `await` instead of polling a `buffered_amount`
//! counter, which is the natural async-Rust reading of the original's
//! non-blocking-send-plus-drain-callback protocol.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bytes::Bytes;
use tokio::sync::Notify;

use tracing::debug;

use crate::addr::{Addr, AddrSeq};
use crate::error::{Error, Kind, Result};
use crate::message::{Outbound, Upstream};
use crate::method::Method;
use crate::node::{emit_connect, emit_disconnect, normalize_prefix};
use crate::ring::{Cursor, Ring};
use crate::session::SessionTable;
use crate::size;

/// Per-subscriber state shared between the node and that subscriber's
/// connection task.
pub struct Subscriber {
    position: Cell<Cursor>,
    notify: Notify,
    closing: Cell<bool>,
}

impl Subscriber {
    fn new(position: Cursor) -> Rc<Subscriber> {
        Rc::new(Subscriber {
            position: Cell::new(position),
            notify: Notify::new(),
            closing: Cell::new(false),
        })
    }

    /// Wakes the connection task, either to drain or to close.
    fn wake(&self) {
        self.notify.notify_one();
    }

    /// Awaits the next wake (drain opportunity or close request).
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// True once the node has decided this subscriber must be closed
    /// (slow-subscriber eviction or an upstream `Disconnect` post).
    pub fn is_closing(&self) -> bool {
        self.closing.get()
    }
}

struct Session {
    sub: Rc<Subscriber>,
}

/// A WebSocket publish node bound to one path prefix.
pub struct WsPubNode {
    prefix: String,
    addrs: RefCell<AddrSeq>,
    sessions: RefCell<SessionTable<Session>>,
    ring: RefCell<Ring>,
}

impl WsPubNode {
    /// Creates a node bound at `configured_path` with the given ring
    /// geometry (§6 `ring-size`/`data-size`). The ring is locked
    /// immediately: node options are resolved once, at construction, by
    /// the dispatcher builder (§9 Open Questions — ring resize after open
    /// is forbidden).
    pub fn new(configured_path: &str, slot_capacity: usize, data_capacity: usize) -> Rc<WsPubNode> {
        let mut ring = Ring::new(slot_capacity, data_capacity);
        ring.lock();
        Rc::new(WsPubNode {
            prefix: normalize_prefix(configured_path),
            addrs: RefCell::new(AddrSeq::default()),
            sessions: RefCell::new(SessionTable::new()),
            ring: RefCell::new(ring),
        })
    }

    /// Creates a node from the configured `ring-size`/`data-size` option
    /// strings (§6: `ring-size` default 1024, `data-size` default 1 MiB).
    /// `ring_size` is a plain slot count; `data_size` accepts the `K`/`M`
    /// suffixes parsed by [`crate::size::parse_bytes`].
    pub fn from_options(configured_path: &str, ring_size: &str, data_size: &str) -> Result<Rc<WsPubNode>> {
        let slot_capacity: usize = ring_size
            .trim()
            .parse()
            .map_err(|_| Error::config("ring-size is not a number"))?;
        let data_capacity = size::parse_bytes(data_size)?;
        Ok(WsPubNode::new(configured_path, slot_capacity, data_capacity))
    }

    /// The bound path prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of live subscribers.
    pub fn session_count(&self) -> usize {
        self.sessions.borrow().len()
    }

    /// Registers a freshly upgraded subscriber at `ring.end()` and emits
    /// `Connect`.
    pub fn connect(&self, upstream: &dyn Upstream) -> (Addr, Rc<Subscriber>) {
        let addr = self.addrs.borrow_mut().next();
        let sub = Subscriber::new(self.ring.borrow().end());
        self.sessions
            .borrow_mut()
            .insert(addr, Session { sub: sub.clone() })
            .expect("freshly minted address is never already bound");
        emit_connect(upstream, addr, Method::Undefined, &self.prefix, &[]);
        debug!(prefix = %self.prefix, %addr, "pub subscriber connected");
        (addr, sub)
    }

    /// The wire connection closed: removes the session and emits
    /// `Disconnect`. A no-op if already removed by eviction or an
    /// upstream-posted `Disconnect`.
    pub fn closed(&self, upstream: &dyn Upstream, addr: Addr) {
        if self.sessions.borrow_mut().remove(addr).is_some() {
            emit_disconnect(upstream, addr, 0);
            debug!(prefix = %self.prefix, %addr, "pub subscriber disconnected");
        }
    }

    /// Returns the next payload `sub` has not yet seen, advancing its
    /// cursor, or `None` once it is caught up to `ring.end()`. Called in a
    /// loop by the subscriber's own connection task; each `Some` is meant
    /// to be sent before asking again, so that an awaited send provides
    /// backpressure (§4.E drain loop).
    pub fn next_payload(&self, sub: &Subscriber) -> Option<Bytes> {
        let ring = self.ring.borrow();
        let pos = sub.position.get();
        if pos == ring.end() {
            return None;
        }
        match ring.get(pos) {
            Some(payload) => {
                sub.position.set(Ring::advance(pos));
                Some(payload)
            }
            None => {
                // Cursor was invalidated by eviction between wake and read;
                // the subscriber is already marked closing.
                None
            }
        }
    }

    /// Applies an upstream post. `Data` always broadcasts via [`Self::publish`]
    /// regardless of `addr` (only `Disconnect` targets one subscriber) — the
    /// pub node's outbound side is the ring, not a per-session channel.
    pub fn post(&self, addr: Addr, msg: Outbound) -> Result<()> {
        match msg {
            Outbound::Data(bytes) => self.publish(bytes),
            Outbound::Disconnect => {
                let session = self
                    .sessions
                    .borrow_mut()
                    .remove(addr)
                    .ok_or_else(|| Error::new(Kind::NoSuchSession))?;
                session.sub.closing.set(true);
                session.sub.wake();
                Ok(())
            }
        }
    }

    /// Publishes one payload to the ring, evicting any subscriber caught
    /// at the slot being overwritten, then re-arms every subscriber that
    /// was caught up at the moment of the call (§4.E steps 1-4).
    pub fn publish(&self, payload: Bytes) -> Result<()> {
        let data_capacity = self.ring.borrow().data_capacity();
        if payload.len() > data_capacity / 2 {
            return Err(Error::new(Kind::PayloadTooLarge));
        }

        let last = self.ring.borrow().end();
        loop {
            let result = self.ring.borrow_mut().push_back(payload.clone());
            if result.is_ok() {
                break;
            }
            let first = self.ring.borrow().begin();
            self.ring.borrow_mut().pop_front();
            for session in self.sessions.borrow().iter().map(|(_, s)| s) {
                if session.sub.position.get() == first {
                    session.sub.closing.set(true);
                    session.sub.wake();
                    debug!(prefix = %self.prefix, "pub subscriber evicted for falling behind the ring");
                }
            }
        }

        for session in self.sessions.borrow().iter().map(|(_, s)| s) {
            if session.sub.position.get() == last {
                session.sub.wake();
            }
        }
        Ok(())
    }

    /// Closes every live subscriber (§4.B node close).
    pub fn close_all_sessions(&self) {
        self.sessions.borrow_mut().drain_into(|_addr, session| {
            session.sub.closing.set(true);
            session.sub.wake();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RecordingUpstream;

    #[test]
    fn from_options_parses_human_readable_data_size() {
        let node = WsPubNode::from_options("/p", "4", "1K").unwrap();
        assert_eq!(node.ring.borrow().data_capacity(), 1024);
    }

    #[test]
    fn from_options_rejects_non_numeric_ring_size() {
        let err = WsPubNode::from_options("/p", "many", "1K").unwrap_err();
        assert!(format!("{}", err).contains("configuration error"));
    }

    #[test]
    fn connect_starts_at_ring_end() {
        let node = WsPubNode::new("/p", 4, 1024);
        let upstream = RecordingUpstream::default();
        let (_addr, sub) = node.connect(&upstream);
        assert!(node.next_payload(&sub).is_none());
    }

    #[test]
    fn publish_rejects_oversize_payload() {
        let node = WsPubNode::new("/p", 4, 64);
        let err = node.publish(Bytes::from(vec![0u8; 40])).unwrap_err();
        assert!(err.is_payload_too_large());
    }

    #[test]
    fn two_subscribers_see_same_prefix_until_one_falls_behind() {
        let node = WsPubNode::new("/p", 2, 64);
        let upstream = RecordingUpstream::default();
        let (_a1, s1) = node.connect(&upstream);
        let (_a2, s2) = node.connect(&upstream);

        node.publish(Bytes::from_static(b"111111111111111111111111")).unwrap(); // 24 B
        node.publish(Bytes::from_static(b"222222222222222222222222")).unwrap(); // 24 B

        assert_eq!(node.next_payload(&s1).unwrap(), Bytes::from_static(b"111111111111111111111111"));
        assert_eq!(node.next_payload(&s1).unwrap(), Bytes::from_static(b"222222222222222222222222"));
        assert!(node.next_payload(&s1).is_none());

        // s2 never drains, so it is still at begin when P3 forces an eviction.
        node.publish(Bytes::from_static(b"333333333333333333333333")).unwrap(); // 24 B
        assert!(s2.is_closing());
        assert!(!s1.is_closing());

        assert_eq!(node.next_payload(&s1).unwrap(), Bytes::from_static(b"333333333333333333333333"));
    }

    #[test]
    fn capacity_headroom_never_evicts() {
        let node = WsPubNode::new("/p", 8, 1024);
        let upstream = RecordingUpstream::default();
        let (_a, sub) = node.connect(&upstream);
        for _ in 0..5 {
            node.publish(Bytes::from_static(b"abc")).unwrap();
        }
        assert!(!sub.is_closing());
    }

    #[test]
    fn post_disconnect_closes_one_subscriber_without_touching_others() {
        let node = WsPubNode::new("/p", 4, 1024);
        let upstream = RecordingUpstream::default();
        let (a1, s1) = node.connect(&upstream);
        let (_a2, s2) = node.connect(&upstream);
        node.post(a1, Outbound::Disconnect).unwrap();
        assert!(s1.is_closing());
        assert!(!s2.is_closing());
        assert_eq!(node.session_count(), 1);
    }
}
