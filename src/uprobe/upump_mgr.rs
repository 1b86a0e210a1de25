//! Event-Loop Holder Probe
//!
//! Holds one event-loop manager and answers `NEED-UPUMP-MGR` with it. For
//! per-thread resolution use
//! [`UprobePthreadUpumpMgr`](crate::uprobe::UprobePthreadUpumpMgr) instead.

use crate::error::Result;
use crate::upipe::Upipe;
use crate::uprobe::{Event, ProbeOps, Uprobe};
use crate::upump::UpumpMgr;

/// Probe providing an event-loop manager.
pub struct UprobeUpumpMgr {
    mgr: UpumpMgr,
    next: Uprobe,
}

impl UprobeUpumpMgr {
    /// Wraps `next`, providing `mgr`.
    pub fn new(mgr: UpumpMgr, next: Uprobe) -> Uprobe {
        Uprobe::new(Self { mgr, next })
    }
}

impl ProbeOps for UprobeUpumpMgr {
    fn throw(&self, pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
        match event {
            Event::NeedUpumpMgr(slot) => {
                **slot = Some(self.mgr.clone());
                Ok(())
            }
            _ => self.next.throw(pipe, event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provides_manager() {
        let mgr = UpumpMgr::new().unwrap();
        let probe = UprobeUpumpMgr::new(mgr, Uprobe::null());
        let mut slot = None;
        probe
            .throw(None, &mut Event::NeedUpumpMgr(&mut slot))
            .unwrap();
        assert!(slot.is_some());
    }
}
