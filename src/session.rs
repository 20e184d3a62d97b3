//! Per-node session table: address → connection handle.

use std::collections::BTreeMap;

use crate::addr::Addr;
use crate::error::{Error, Kind};

/// Map from a live session's [`Addr`] to its connection handle.
///
/// Not `Sync`: every node runs on the single worker thread that owns its
/// dispatcher (§5), so a plain `BTreeMap` is all the table needs — no
/// locking, no atomics.
#[derive(Debug)]
pub struct SessionTable<H> {
    sessions: BTreeMap<Addr, H>,
}

impl<H> Default for SessionTable<H> {
    fn default() -> Self {
        SessionTable {
            sessions: BTreeMap::new(),
        }
    }
}

impl<H> SessionTable<H> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a freshly connected session. Fails if `addr` is already bound,
    /// which would mean the address minter handed out a duplicate.
    pub fn insert(&mut self, addr: Addr, handle: H) -> Result<(), Error> {
        if self.sessions.insert(addr, handle).is_some() {
            return Err(Error::config("duplicate session address"));
        }
        Ok(())
    }

    /// Looks up a handle by address.
    pub fn get(&self, addr: Addr) -> Option<&H> {
        self.sessions.get(&addr)
    }

    /// Looks up a handle by address, mutably.
    pub fn get_mut(&mut self, addr: Addr) -> Option<&mut H> {
        self.sessions.get_mut(&addr)
    }

    /// Removes a session, returning its handle if it was present.
    pub fn remove(&mut self, addr: Addr) -> Option<H> {
        self.sessions.remove(&addr)
    }

    /// Looks up a handle by address or produces a "no such session" error,
    /// the contract every `_post` entry point relies on (§8 invariant 2).
    pub fn require(&self, addr: Addr) -> Result<&H, Error> {
        self.get(addr).ok_or_else(|| Error::new(Kind::NoSuchSession))
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True if no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterates over all `(address, handle)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Addr, &H)> {
        self.sessions.iter()
    }

    /// Iterates mutably over all `(address, handle)` pairs.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Addr, &mut H)> {
        self.sessions.iter_mut()
    }

    /// Empties the table, handing every `(address, handle)` pair to `f` so
    /// the caller can close each connection. Used on node close (§4.B: "on
    /// node close, every remaining handle is closed and the table is
    /// emptied").
    pub fn drain_into(&mut self, mut f: impl FnMut(Addr, H)) {
        for (addr, handle) in std::mem::take(&mut self.sessions) {
            f(addr, handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut table = SessionTable::new();
        table.insert(Addr(1), "a").unwrap();
        assert_eq!(table.get(Addr(1)), Some(&"a"));
        assert_eq!(table.remove(Addr(1)), Some("a"));
        assert!(table.get(Addr(1)).is_none());
    }

    #[test]
    fn duplicate_insert_is_an_error() {
        let mut table = SessionTable::new();
        table.insert(Addr(1), "a").unwrap();
        assert!(table.insert(Addr(1), "b").is_err());
    }

    #[test]
    fn require_reports_missing_session() {
        let table: SessionTable<&str> = SessionTable::new();
        let err = table.require(Addr(42)).unwrap_err();
        assert!(err.is_no_such_session());
    }

    #[test]
    fn drain_into_empties_table_and_visits_all() {
        let mut table = SessionTable::new();
        table.insert(Addr(1), "a").unwrap();
        table.insert(Addr(2), "b").unwrap();
        let mut seen = Vec::new();
        table.drain_into(|addr, h| seen.push((addr, h)));
        assert_eq!(seen.len(), 2);
        assert!(table.is_empty());
    }
}
