//! Backpressure Tokens
//!
//! A blocker masks a watcher for as long as it lives. A stage whose
//! downstream queue is full allocates one against the pump that produced the
//! overflowing record and drops it from the queue's pop-ready callback,
//! which restarts the source on the next loop turn.

use crate::upump::Upump;

/// Token masking a watcher while alive.
pub struct UpumpBlocker {
    upump: Upump,
}

impl UpumpBlocker {
    /// Masks `upump` until the token is dropped.
    pub fn new(upump: &Upump) -> Self {
        upump.block();
        Self {
            upump: upump.clone(),
        }
    }
}

impl Drop for UpumpBlocker {
    fn drop(&mut self) {
        self.upump.unblock();
    }
}

impl std::fmt::Debug for UpumpBlocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpumpBlocker").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upump::UpumpMgr;

    #[test]
    fn test_nested_blockers() {
        let mgr = UpumpMgr::new().unwrap();
        let idler = mgr.alloc_idler(|_| {});
        idler.start();

        let outer = UpumpBlocker::new(&idler);
        let inner = UpumpBlocker::new(&idler);
        drop(outer);
        // One blocker still alive: the loop must see no active watcher and
        // return immediately.
        mgr.run().unwrap();
        drop(inner);
    }
}
