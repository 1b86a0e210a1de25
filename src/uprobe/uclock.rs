//! Clock Holder Probe
//!
//! Holds one clock and answers `NEED-UCLOCK` events as well as `UCLOCK`
//! requests rising as `PROVIDE-REQUEST`.

use crate::error::Result;
use crate::uclock::Uclock;
use crate::upipe::Upipe;
use crate::uprobe::{Event, ProbeOps, Uprobe};
use crate::urequest::{Provision, UrequestType};

/// Probe providing a clock.
pub struct UprobeUclock {
    uclock: Uclock,
    next: Uprobe,
}

impl UprobeUclock {
    /// Wraps `next`, providing `uclock`.
    pub fn new(uclock: Uclock, next: Uprobe) -> Uprobe {
        Uprobe::new(Self { uclock, next })
    }
}

impl ProbeOps for UprobeUclock {
    fn throw(&self, pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
        match event {
            Event::NeedUclock(slot) => {
                **slot = Some(self.uclock.clone());
                Ok(())
            }
            Event::ProvideRequest(request) if request.rtype() == UrequestType::Uclock => {
                request.provide(Provision::Uclock(self.uclock.clone()))
            }
            _ => self.next.throw(pipe, event),
        }
    }
}
