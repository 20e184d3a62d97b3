//! Node kinds bound to a dispatcher's routing table (§4.C/§4.D/§4.E).
//!
//! The original distinguishes HTTP, WS-echo, and WS-pub nodes with a
//! tagged union of raw pointers (§9 design note). This rewrite uses a
//! tagged `enum` over `Rc`-shared node state — arenas of one, effectively,
//! since each node is independently heap-allocated and the routing table
//! only ever stores a cheap clone of the tag (§9: "the routing table holds
//! references into those arenas; never pointer equality across threads" —
//! here enforced by `Rc` not being `Send`, so it cannot cross a thread at
//! all).

pub mod http;
pub mod ws_echo;
pub mod ws_pub;

use std::rc::Rc;

use crate::addr::Addr;
use crate::method::Method;
use crate::message::{Inbound, Upstream};
use crate::scheme;

pub use http::HttpNode;
pub use ws_echo::WsEchoNode;
pub use ws_pub::WsPubNode;

/// Which of the three node kinds a path is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Request-reply HTTP node (§4.C).
    Http,
    /// WebSocket echo node (§4.D).
    WsEcho,
    /// WebSocket publish node (§4.E).
    WsPub,
}

impl NodeKind {
    /// True for the two WebSocket-only kinds.
    pub fn is_ws(self) -> bool {
        matches!(self, NodeKind::WsEcho | NodeKind::WsPub)
    }
}

/// A routing-table entry: a tagged, cheaply-cloned reference to one of the
/// three node kinds.
#[derive(Clone)]
pub enum NodeHandle {
    /// An HTTP node.
    Http(Rc<HttpNode>),
    /// A WS echo node.
    WsEcho(Rc<WsEchoNode>),
    /// A WS publish node.
    WsPub(Rc<WsPubNode>),
}

impl NodeHandle {
    /// The node's bound path prefix.
    pub fn prefix(&self) -> &str {
        match self {
            NodeHandle::Http(n) => n.prefix(),
            NodeHandle::WsEcho(n) => n.prefix(),
            NodeHandle::WsPub(n) => n.prefix(),
        }
    }

    /// The node's kind.
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeHandle::Http(_) => NodeKind::Http,
            NodeHandle::WsEcho(_) => NodeKind::WsEcho,
            NodeHandle::WsPub(_) => NodeKind::WsPub,
        }
    }

    /// Closes every live session and empties the node's table (§4.B).
    pub fn close_all_sessions(&self) {
        match self {
            NodeHandle::Http(n) => n.close_all_sessions(),
            NodeHandle::WsEcho(n) => n.close_all_sessions(),
            NodeHandle::WsPub(n) => n.close_all_sessions(),
        }
    }

    /// True if `a` and `b` are handles to the very same node (`Rc` identity,
    /// not structural equality) — used by `node_remove`'s defensive
    /// mismatch check (§4.F).
    pub fn same(a: &NodeHandle, b: &NodeHandle) -> bool {
        match (a, b) {
            (NodeHandle::Http(x), NodeHandle::Http(y)) => Rc::ptr_eq(x, y),
            (NodeHandle::WsEcho(x), NodeHandle::WsEcho(y)) => Rc::ptr_eq(x, y),
            (NodeHandle::WsPub(x), NodeHandle::WsPub(y)) => Rc::ptr_eq(x, y),
            _ => false,
        }
    }
}

/// Emits the `Connect` control message shared by every node kind (§4.C
/// `_connected`/§4.D/§4.E, generalized from the original's `WSNode::_connected`
/// template member). WS nodes have no request headers to carry, so they call
/// this with an empty slice; the HTTP node forwards the request's headers.
pub(crate) fn emit_connect(upstream: &dyn Upstream, addr: Addr, method: Method, path: &str, headers: &[scheme::Header]) {
    let record = scheme::decode_connect(&scheme::encode_connect_with_headers(method, path, headers))
        .expect("freshly encoded Connect record always decodes");
    upstream.on_message(Inbound::Connect { addr, record });
}

/// Emits the `Disconnect` control message shared by every node kind,
/// mirroring the original's `WSNode::_disconnected`.
pub(crate) fn emit_disconnect(upstream: &dyn Upstream, addr: Addr, code: i16) {
    let record = scheme::decode_disconnect(&scheme::encode_disconnect(code, ""))
        .expect("freshly encoded Disconnect record always decodes");
    upstream.on_message(Inbound::Disconnect { addr, record });
}

/// Normalizes a configured node path the way §6 specifies: empty becomes
/// `/`, a leading `/` is kept verbatim, anything else gets `/` prepended.
pub fn normalize_prefix(configured: &str) -> String {
    if configured.is_empty() {
        "/".to_string()
    } else if configured.starts_with('/') {
        configured.to_string()
    } else {
        format!("/{}", configured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_prefix_rules() {
        assert_eq!(normalize_prefix(""), "/");
        assert_eq!(normalize_prefix("/a"), "/a");
        assert_eq!(normalize_prefix("a"), "/a");
    }
}
