//! Thread-Local Event-Loop Probe
//!
//! Same contract as [`UprobeUpumpMgr`](crate::uprobe::UprobeUpumpMgr), but
//! resolved per thread: each worker registers its own loop manager on the
//! shared probe, and a pipe asking for one receives the manager of the
//! thread it currently runs on. `FREEZE-UPUMP-MGR` / `THAW-UPUMP-MGR` nest,
//! letting a caller assert that no manager is fetched within a region (while
//! pipes are being migrated, typically).

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;
use crate::upipe::Upipe;
use crate::uprobe::{Event, ProbeOps, Uprobe};
use crate::upump::UpumpMgr;

static NEXT_KEY: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static REGISTRY: RefCell<HashMap<usize, ThreadEntry>> = RefCell::new(HashMap::new());
}

#[derive(Default)]
struct ThreadEntry {
    mgr: Option<UpumpMgr>,
    freeze: usize,
}

/// Probe resolving the event-loop manager per thread.
pub struct UprobePthreadUpumpMgr {
    key: usize,
    next: Uprobe,
}

impl UprobePthreadUpumpMgr {
    /// Wraps `next`; the returned handle registers per-thread managers.
    pub fn new(next: Uprobe) -> (Uprobe, PthreadUpumpMgrHandle) {
        let key = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
        (
            Uprobe::new(Self { key, next }),
            PthreadUpumpMgrHandle { key },
        )
    }
}

impl ProbeOps for UprobePthreadUpumpMgr {
    fn throw(&self, pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
        match event {
            Event::NeedUpumpMgr(slot) => {
                let provided = REGISTRY.with(|registry| {
                    let registry = registry.borrow();
                    match registry.get(&self.key) {
                        Some(entry) if entry.freeze == 0 => entry.mgr.clone(),
                        _ => None,
                    }
                });
                match provided {
                    Some(mgr) => {
                        **slot = Some(mgr);
                        Ok(())
                    }
                    None => self.next.throw(pipe, event),
                }
            }
            Event::FreezeUpumpMgr => {
                REGISTRY.with(|registry| {
                    registry.borrow_mut().entry(self.key).or_default().freeze += 1;
                });
                Ok(())
            }
            Event::ThawUpumpMgr => {
                REGISTRY.with(|registry| {
                    let mut registry = registry.borrow_mut();
                    let entry = registry.entry(self.key).or_default();
                    entry.freeze = entry.freeze.saturating_sub(1);
                });
                Ok(())
            }
            _ => self.next.throw(pipe, event),
        }
    }
}

/// Registration handle for [`UprobePthreadUpumpMgr`].
#[derive(Clone, Debug)]
pub struct PthreadUpumpMgrHandle {
    key: usize,
}

impl PthreadUpumpMgrHandle {
    /// Registers `mgr` as the calling thread's event loop.
    pub fn set_for_this_thread(&self, mgr: UpumpMgr) {
        REGISTRY.with(|registry| {
            registry.borrow_mut().entry(self.key).or_default().mgr = Some(mgr);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn fetch(probe: &Uprobe) -> Option<UpumpMgr> {
        let mut slot = None;
        let _ = probe.throw(None, &mut Event::NeedUpumpMgr(&mut slot));
        slot
    }

    #[test]
    fn test_resolution_is_per_thread() {
        let (probe, handle) = UprobePthreadUpumpMgr::new(Uprobe::null());
        handle.set_for_this_thread(UpumpMgr::new().unwrap());
        assert!(fetch(&probe).is_some());

        let probe2 = probe.clone();
        std::thread::spawn(move || {
            // This thread never registered a manager.
            assert!(fetch(&probe2).is_none());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_freeze_thaw_nest() {
        let (probe, handle) = UprobePthreadUpumpMgr::new(Uprobe::null());
        handle.set_for_this_thread(UpumpMgr::new().unwrap());

        probe.throw(None, &mut Event::FreezeUpumpMgr).unwrap();
        probe.throw(None, &mut Event::FreezeUpumpMgr).unwrap();
        assert!(fetch(&probe).is_none());

        probe.throw(None, &mut Event::ThawUpumpMgr).unwrap();
        assert!(fetch(&probe).is_none());
        probe.throw(None, &mut Event::ThawUpumpMgr).unwrap();
        assert!(fetch(&probe).is_some());
    }

    #[test]
    fn test_unrelated_events_pass() {
        let (probe, _handle) = UprobePthreadUpumpMgr::new(Uprobe::null());
        assert_eq!(probe.throw(None, &mut Event::SourceEnd), Err(Error::Unhandled));
    }
}
