//! Bounded ring buffer of opaque payloads with cursors that survive pushes.
//!
//! Backs the WS publish node (§4.E). A cursor is a plain sequence number
//! rather than a buffer index: every pushed slot gets the next number in a
//! strictly increasing, never-reused counter, so "does this cursor still
//! point at a live slot" reduces to comparing two integers instead of
//! tracking epochs around a reused index (§9 design note on cursor safety).

use bytes::Bytes;
use std::collections::VecDeque;

/// A position in a [`Ring`]: either `end` (one past the newest slot) or the
/// identity of a slot that was live when the cursor was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(u64);

/// `push_back` failure: neither the slot count nor the byte budget had room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoRoom;

struct Slot {
    seq: u64,
    data: Bytes,
}

/// A bounded FIFO of byte payloads, sized both by slot count and by total
/// bytes, with cursor-based iteration that tolerates concurrent eviction.
#[derive(Debug)]
pub struct Ring {
    slots: VecDeque<Slot>,
    next_seq: u64,
    data_len: usize,
    slot_capacity: usize,
    data_capacity: usize,
    locked: bool,
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("seq", &self.seq)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Ring {
    /// Creates a ring with the given slot count and byte capacity.
    pub fn new(slot_capacity: usize, data_capacity: usize) -> Self {
        Ring {
            slots: VecDeque::new(),
            next_seq: 0,
            data_len: 0,
            slot_capacity,
            data_capacity,
            locked: false,
        }
    }

    /// The configured byte capacity, used by callers to bound payload size
    /// (half-capacity rejection happens in the node, not here — §4.A).
    pub fn data_capacity(&self) -> usize {
        self.data_capacity
    }

    /// The configured slot capacity.
    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    /// Marks the ring as open; after this, `resize`/`resize_data` fail.
    ///
    /// Resolves the open question in §9: resizing after sessions may hold
    /// cursors into the ring is forbidden rather than silently unsound.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Changes the slot capacity. Only valid before the owning node opens.
    pub fn resize(&mut self, slots: usize) -> Result<(), &'static str> {
        if self.locked {
            return Err("ring cannot be resized after the node has opened");
        }
        self.slot_capacity = slots;
        Ok(())
    }

    /// Changes the byte capacity. Only valid before the owning node opens.
    pub fn resize_data(&mut self, bytes: usize) -> Result<(), &'static str> {
        if self.locked {
            return Err("ring cannot be resized after the node has opened");
        }
        self.data_capacity = bytes;
        Ok(())
    }

    /// Removes every slot, resetting to empty (cursors taken before `clear`
    /// all compare equal to the post-clear `begin`/`end`).
    pub fn clear(&mut self) {
        self.slots.clear();
        self.data_len = 0;
    }

    /// A cursor one-past the newest slot: "nothing further to read yet".
    pub fn end(&self) -> Cursor {
        Cursor(self.next_seq)
    }

    /// A cursor at the oldest live slot, or `end()` if the ring is empty.
    pub fn begin(&self) -> Cursor {
        match self.slots.front() {
            Some(slot) => Cursor(slot.seq),
            None => self.end(),
        }
    }

    /// Appends a copy of `data`, returning a cursor to the new slot, or
    /// `NoRoom` if either the slot or byte budget would be exceeded.
    pub fn push_back(&mut self, data: Bytes) -> Result<Cursor, NoRoom> {
        if self.slots.len() >= self.slot_capacity || self.data_len + data.len() > self.data_capacity {
            return Err(NoRoom);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.data_len += data.len();
        self.slots.push_back(Slot { seq, data });
        Ok(Cursor(seq))
    }

    /// Removes the oldest slot. No-op if the ring is empty.
    pub fn pop_front(&mut self) {
        if let Some(slot) = self.slots.pop_front() {
            self.data_len -= slot.data.len();
        }
    }

    /// Returns the payload at `cursor`, or `None` if `cursor` is `end` or
    /// has been evicted (should not happen for a cursor a caller is
    /// correctly tracking — see the eviction protocol in §4.E).
    pub fn get(&self, cursor: Cursor) -> Option<Bytes> {
        let front_seq = self.slots.front()?.seq;
        if cursor.0 < front_seq {
            return None;
        }
        let idx = (cursor.0 - front_seq) as usize;
        self.slots.get(idx).map(|slot| slot.data.clone())
    }

    /// Advances `cursor` by one slot. Callers must not advance past `end()`.
    pub fn advance(cursor: Cursor) -> Cursor {
        Cursor(cursor.0 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_end_on_empty_ring_coincide() {
        let ring = Ring::new(4, 1024);
        assert_eq!(ring.begin(), ring.end());
    }

    #[test]
    fn push_then_pop_advances_begin_to_dropped_cursor() {
        let mut ring = Ring::new(4, 1024);
        let c1 = ring.push_back(Bytes::from_static(b"a")).unwrap();
        let _c2 = ring.push_back(Bytes::from_static(b"b")).unwrap();
        assert_eq!(ring.begin(), c1);
        ring.pop_front();
        // Eviction is detected by comparing a saved cursor to the *new* begin.
        assert_eq!(ring.begin(), Cursor(c1.0 + 1));
    }

    #[test]
    fn end_is_stable_across_pushes_until_popped() {
        let mut ring = Ring::new(4, 1024);
        let before = ring.end();
        ring.push_back(Bytes::from_static(b"a")).unwrap();
        // `end()` always points one past the newest slot, so it moves on push...
        assert_ne!(ring.end(), before);
        // ...but a cursor snapshotted before the push still identifies "caught up
        // at publish time" relative to that snapshot (§4.E step 2/4).
        assert_eq!(before, Cursor(0));
    }

    #[test]
    fn slot_capacity_rejects_overflow() {
        let mut ring = Ring::new(1, 1024);
        ring.push_back(Bytes::from_static(b"a")).unwrap();
        assert_eq!(ring.push_back(Bytes::from_static(b"b")), Err(NoRoom));
    }

    #[test]
    fn data_capacity_rejects_overflow() {
        let mut ring = Ring::new(16, 4);
        ring.push_back(Bytes::from_static(b"abcd")).unwrap();
        assert_eq!(ring.push_back(Bytes::from_static(b"e")), Err(NoRoom));
    }

    #[test]
    fn get_returns_none_past_end_and_for_evicted_cursor() {
        let mut ring = Ring::new(2, 1024);
        let c1 = ring.push_back(Bytes::from_static(b"a")).unwrap();
        assert!(ring.get(ring.end()).is_none());
        ring.pop_front();
        assert!(ring.get(c1).is_none());
    }

    #[test]
    fn advance_then_get_reads_next_slot_in_order() {
        let mut ring = Ring::new(4, 1024);
        let c1 = ring.push_back(Bytes::from_static(b"a")).unwrap();
        let _c2 = ring.push_back(Bytes::from_static(b"b")).unwrap();
        assert_eq!(ring.get(c1).unwrap(), Bytes::from_static(b"a"));
        let c1_next = Ring::advance(c1);
        assert_eq!(ring.get(c1_next).unwrap(), Bytes::from_static(b"b"));
    }

    #[test]
    fn resize_after_lock_is_rejected() {
        let mut ring = Ring::new(4, 1024);
        ring.lock();
        assert!(ring.resize(8).is_err());
        assert!(ring.resize_data(2048).is_err());
    }
}
