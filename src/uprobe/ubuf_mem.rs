//! Buffer-Manager Pool Probe
//!
//! Satisfies `NEED-UBUF-MGR` events and `UBUF-MGR` requests by building
//! buffer managers from the requested flow definition, pooled by the
//! fingerprint of the relevant flow-format attributes: two flows of the same
//! format share one manager and therefore one memory pool.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ubuf::UbufMgr;
use crate::umem::UmemMgr;
use crate::upipe::Upipe;
use crate::uprobe::{Event, ProbeOps, Uprobe};
use crate::uref::Uref;
use crate::urequest::{Provision, UrequestType};

/// Probe pooling buffer managers per flow format.
pub struct UprobeUbufMem {
    umem: UmemMgr,
    pools: Mutex<HashMap<String, UbufMgr>>,
    next: Uprobe,
}

impl UprobeUbufMem {
    /// Wraps `next`, building managers from `umem`.
    pub fn new(umem: UmemMgr, next: Uprobe) -> Uprobe {
        Uprobe::new(Self {
            umem,
            pools: Mutex::new(HashMap::new()),
            next,
        })
    }

    fn mgr_for(&self, flow_def: &Uref) -> Result<UbufMgr> {
        let fingerprint = UbufMgr::fingerprint(flow_def)?;
        let mut pools = self.pools.lock();
        if let Some(mgr) = pools.get(&fingerprint) {
            return Ok(mgr.clone());
        }
        let mgr = UbufMgr::for_flow_def(&self.umem, flow_def)?;
        debug!("pooled new ubuf manager for {fingerprint}");
        pools.insert(fingerprint, mgr.clone());
        Ok(mgr)
    }
}

impl ProbeOps for UprobeUbufMem {
    fn throw(&self, pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
        match event {
            Event::NeedUbufMgr { flow_def, slot } => match self.mgr_for(flow_def) {
                Ok(mgr) => {
                    **slot = Some(mgr);
                    Ok(())
                }
                Err(Error::Invalid) => self.next.throw(pipe, event),
                Err(err) => Err(err),
            },
            Event::ProvideRequest(request) if request.rtype() == UrequestType::UbufMgr => {
                let flow_def = request.flow_def().ok_or(Error::Invalid)?;
                let mgr = self.mgr_for(&flow_def)?;
                request.provide(Provision::UbufMgr(mgr))
            }
            _ => self.next.throw(pipe, event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uref::{alloc_flow_def, UrefMgr};

    #[test]
    fn test_builds_block_manager() {
        let probe = UprobeUbufMem::new(UmemMgr::new(), Uprobe::null());
        let mgr = UrefMgr::default();
        let flow_def = alloc_flow_def(&mgr, "block.mpegts.").unwrap();
        let mut slot = None;
        probe
            .throw(
                None,
                &mut Event::NeedUbufMgr {
                    flow_def: &flow_def,
                    slot: &mut slot,
                },
            )
            .unwrap();
        assert!(matches!(slot, Some(UbufMgr::Block(_))));
    }

    #[test]
    fn test_same_format_reuses_manager() {
        let umem = UmemMgr::new();
        let probe = UprobeUbufMem::new(umem, Uprobe::null());
        let mgr = UrefMgr::default();
        let flow_def = alloc_flow_def(&mgr, "block.").unwrap();

        let fetch = |probe: &Uprobe| {
            let mut slot = None;
            probe
                .throw(
                    None,
                    &mut Event::NeedUbufMgr {
                        flow_def: &flow_def,
                        slot: &mut slot,
                    },
                )
                .unwrap();
            slot.unwrap()
        };
        // Two fetches of the same fingerprint come from the pool; allocate
        // through both and check they draw on one umem pool.
        let first = fetch(&probe);
        let second = fetch(&probe);
        let (UbufMgr::Block(a), UbufMgr::Block(b)) = (first, second) else {
            panic!("expected block managers");
        };
        drop(a.alloc(100));
        let buf = b.alloc(100);
        assert!(buf.size() == 100);
    }

    #[test]
    fn test_unknown_flow_falls_through() {
        let probe = UprobeUbufMem::new(UmemMgr::new(), Uprobe::null());
        let mgr = UrefMgr::default();
        let flow_def = alloc_flow_def(&mgr, "void.").unwrap();
        let mut slot = None;
        let result = probe.throw(
            None,
            &mut Event::NeedUbufMgr {
                flow_def: &flow_def,
                slot: &mut slot,
            },
        );
        assert_eq!(result, Err(Error::Unhandled));
    }
}
