//! Path-prefix routing table (§3 "Routing table", §4.F `node_add`/`node_remove`).

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::{Error, Kind, Result};
use crate::node::NodeHandle;

/// Maps a bound path prefix to the node serving it. Exact-match lookup:
/// every node in this crate claims exactly one path, never a subtree.
#[derive(Default)]
pub struct RoutingTable {
    routes: BTreeMap<String, NodeHandle>,
}

impl RoutingTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        RoutingTable::default()
    }

    /// Binds `handle` at its own prefix. Fails if the prefix is already
    /// taken by any node (§4.F `node_add`).
    pub fn add(&mut self, handle: NodeHandle) -> Result<()> {
        let prefix = handle.prefix().to_string();
        if self.routes.contains_key(&prefix) {
            return Err(Error::new(Kind::PrefixConflict));
        }
        debug!(%prefix, "route bound");
        self.routes.insert(prefix, handle);
        Ok(())
    }

    /// Unbinds the node at `prefix`, verifying `handle` is the node that
    /// currently owns it (§4.F `node_remove`: "fails if the prefix maps to
    /// a different node").
    pub fn remove(&mut self, prefix: &str, handle: &NodeHandle) -> Result<()> {
        match self.routes.get(prefix) {
            None => {
                info!(%prefix, "node_remove against a prefix with no node bound");
                Err(Error::new(Kind::RouteNotFound))
            }
            Some(existing) if !NodeHandle::same(existing, handle) => {
                info!(%prefix, "node_remove against a mismatched node");
                Err(Error::new(Kind::NodeMismatch))
            }
            Some(_) => {
                debug!(%prefix, "route unbound");
                self.routes.remove(prefix);
                Ok(())
            }
        }
    }

    /// Looks up the node bound to an exact request path.
    pub fn get(&self, path: &str) -> Option<NodeHandle> {
        self.routes.get(path).cloned()
    }

    /// Every bound node, for a coordinated close (§4.F `close`).
    pub fn drain(&mut self) -> Vec<NodeHandle> {
        std::mem::take(&mut self.routes).into_values().collect()
    }

    /// Number of bound routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::HttpNode;

    #[test]
    fn add_then_get_round_trips() {
        let mut routes = RoutingTable::new();
        let node = HttpNode::new("/a");
        routes.add(NodeHandle::Http(node.clone())).unwrap();
        assert!(routes.get("/a").is_some());
        assert!(routes.get("/b").is_none());
    }

    #[test]
    fn duplicate_prefix_is_a_conflict() {
        let mut routes = RoutingTable::new();
        routes.add(NodeHandle::Http(HttpNode::new("/a"))).unwrap();
        let err = routes.add(NodeHandle::Http(HttpNode::new("/a"))).unwrap_err();
        assert!(matches!(format!("{}", err).as_str(), s if s.contains("already registered")));
    }

    #[test]
    fn remove_with_wrong_handle_is_a_mismatch() {
        let mut routes = RoutingTable::new();
        let a = HttpNode::new("/a");
        let b = HttpNode::new("/a");
        routes.add(NodeHandle::Http(a.clone())).unwrap();
        let err = routes.remove("/a", &NodeHandle::Http(b)).unwrap_err();
        assert!(format!("{}", err).contains("mismatched"));
    }

    #[test]
    fn remove_unknown_prefix_is_not_found() {
        let mut routes = RoutingTable::new();
        let node = HttpNode::new("/a");
        let err = routes.remove("/z", &NodeHandle::Http(node)).unwrap_err();
        assert!(format!("{}", err).contains("no node bound"));
    }
}
