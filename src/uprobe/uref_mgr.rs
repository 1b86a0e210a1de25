//! Record-Manager Holder Probe
//!
//! Holds one record manager and answers `NEED-UREF-MGR` events as well as
//! `UREF-MGR` requests rising as `PROVIDE-REQUEST`.

use crate::error::Result;
use crate::upipe::Upipe;
use crate::uprobe::{Event, ProbeOps, Uprobe};
use crate::uref::UrefMgr;
use crate::urequest::{Provision, UrequestType};

/// Probe providing a record manager.
pub struct UprobeUrefMgr {
    mgr: UrefMgr,
    next: Uprobe,
}

impl UprobeUrefMgr {
    /// Wraps `next`, providing `mgr`.
    pub fn new(mgr: UrefMgr, next: Uprobe) -> Uprobe {
        Uprobe::new(Self { mgr, next })
    }
}

impl ProbeOps for UprobeUrefMgr {
    fn throw(&self, pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
        match event {
            Event::NeedUrefMgr(slot) => {
                **slot = Some(self.mgr.clone());
                Ok(())
            }
            Event::ProvideRequest(request) if request.rtype() == UrequestType::UrefMgr => {
                request.provide(Provision::UrefMgr(self.mgr.clone()))
            }
            _ => self.next.throw(pipe, event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urequest::Urequest;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_answers_need_event() {
        let probe = UprobeUrefMgr::new(UrefMgr::default(), Uprobe::null());
        let mut slot = None;
        probe.throw(None, &mut Event::NeedUrefMgr(&mut slot)).unwrap();
        assert!(slot.is_some());
    }

    #[test]
    fn test_answers_request() {
        let probe = UprobeUrefMgr::new(UrefMgr::default(), Uprobe::null());
        let answered = Arc::new(AtomicBool::new(false));
        let flag = answered.clone();
        let request = Urequest::new(UrequestType::UrefMgr, None, move |p| {
            assert!(matches!(p, Provision::UrefMgr(_)));
            flag.store(true, Ordering::SeqCst);
        });
        probe
            .throw(None, &mut Event::ProvideRequest(&request))
            .unwrap();
        assert!(answered.load(Ordering::SeqCst));
    }
}
