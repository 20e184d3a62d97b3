//! One-dispatcher-per-thread enforcement (§5, §9 design note).
//!
//! The original relies on a hidden thread-local sentinel inside the
//! channel base class. This rewrite makes the guard an explicit value a
//! [`crate::dispatcher::Dispatcher`] owns and drops, so the rule is visible
//! at the construction site rather than buried in a base-class
//! constructor.

use std::cell::Cell;

thread_local! {
    static ACTIVE: Cell<bool> = Cell::new(false);
}

/// Held for the lifetime of one [`crate::dispatcher::Dispatcher`]. Dropping
/// it frees the calling thread to host another dispatcher.
pub struct ThreadGuard {
    _private: (),
}

impl ThreadGuard {
    /// Claims the calling thread for one dispatcher. Fails if another
    /// guard is already held on this thread.
    pub fn claim() -> crate::error::Result<ThreadGuard> {
        ACTIVE.with(|active| {
            if active.get() {
                return Err(crate::error::Error::new(crate::error::Kind::ThreadBusy));
            }
            active.set(true);
            Ok(ThreadGuard { _private: () })
        })
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.set(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_on_same_thread_fails() {
        let first = ThreadGuard::claim().unwrap();
        let err = ThreadGuard::claim().unwrap_err();
        assert_eq!(format!("{}", err), "a dispatcher is already running on this thread");
        drop(first);
        let _second = ThreadGuard::claim().unwrap();
    }
}
