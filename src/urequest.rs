//! Requests
//!
//! A request is a lazy typed query for a resource a pipe cannot know at
//! allocation time: a negotiated flow format, a buffer or record manager, a
//! clock, or the accumulated sink latency. The requester registers it on a
//! pipe; the registration walks upstream (through `REGISTER-REQUEST`
//! relaying and the `PROVIDE-REQUEST` probe event) until a provider calls
//! back with the resource. Unregistering is mandatory before the requester
//! goes away.
//!
//! `SINK-LATENCY` requests accumulate: every pipe relaying one adds its own
//! intrinsic latency, so the provider reports the sum.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ubuf::UbufMgr;
use crate::uclock::Uclock;
use crate::uref::{Uref, UrefMgr};

/// Type of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrequestType {
    /// Negotiated flow format.
    FlowFormat,
    /// Buffer manager for the carried flow format.
    UbufMgr,
    /// Record manager.
    UrefMgr,
    /// Clock.
    Uclock,
    /// Accumulated latency to the sink, in 27 MHz ticks.
    SinkLatency,
}

/// Resource handed to a request's callback.
#[derive(Debug, Clone)]
pub enum Provision {
    /// Negotiated flow format.
    FlowFormat(Arc<Uref>),
    /// Buffer manager.
    UbufMgr(UbufMgr),
    /// Record manager.
    UrefMgr(UrefMgr),
    /// Clock.
    Uclock(Uclock),
    /// Accumulated latency in 27 MHz ticks.
    SinkLatency(u64),
}

impl Provision {
    /// The request type this provision satisfies.
    pub fn rtype(&self) -> UrequestType {
        match self {
            Provision::FlowFormat(_) => UrequestType::FlowFormat,
            Provision::UbufMgr(_) => UrequestType::UbufMgr,
            Provision::UrefMgr(_) => UrequestType::UrefMgr,
            Provision::Uclock(_) => UrequestType::Uclock,
            Provision::SinkLatency(_) => UrequestType::SinkLatency,
        }
    }
}

struct UrequestInner {
    rtype: UrequestType,
    flow_def: Mutex<Option<Uref>>,
    provided: AtomicBool,
    latency: AtomicU64,
    on_provide: Mutex<Box<dyn FnMut(Provision) + Send>>,
}

/// Shared handle to one request.
///
/// Identity is by handle: relayed copies of the same request compare equal
/// through [`Urequest::same`], which is what unregistration matches on.
#[derive(Clone)]
pub struct Urequest {
    inner: Arc<UrequestInner>,
}

impl Urequest {
    /// Creates a request carrying an optional flow definition.
    pub fn new(
        rtype: UrequestType,
        flow_def: Option<Uref>,
        on_provide: impl FnMut(Provision) + Send + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(UrequestInner {
                rtype,
                flow_def: Mutex::new(flow_def),
                provided: AtomicBool::new(false),
                latency: AtomicU64::new(0),
                on_provide: Mutex::new(Box::new(on_provide)),
            }),
        }
    }

    /// The request type.
    pub fn rtype(&self) -> UrequestType {
        self.inner.rtype
    }

    /// Duplicates the carried flow definition.
    pub fn flow_def(&self) -> Option<Uref> {
        self.inner.flow_def.lock().as_ref().map(Uref::dup)
    }

    /// Whether a provider answered already.
    pub fn is_provided(&self) -> bool {
        self.inner.provided.load(Ordering::SeqCst)
    }

    /// Adds a relaying pipe's intrinsic latency.
    pub fn add_latency(&self, ticks: u64) {
        self.inner.latency.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Latency accumulated by the pipes this request travelled through.
    pub fn accumulated_latency(&self) -> u64 {
        self.inner.latency.load(Ordering::SeqCst)
    }

    /// Answers the request.
    ///
    /// `SINK-LATENCY` provisions are completed with the accumulated latency
    /// of the path. A provision of the wrong type is refused.
    pub fn provide(&self, provision: Provision) -> Result<()> {
        if provision.rtype() != self.inner.rtype {
            return Err(Error::Invalid);
        }
        let provision = match provision {
            Provision::SinkLatency(sink) => {
                Provision::SinkLatency(sink + self.accumulated_latency())
            }
            other => other,
        };
        self.inner.provided.store(true, Ordering::SeqCst);
        let mut on_provide = self.inner.on_provide.lock();
        (*on_provide)(provision);
        Ok(())
    }

    /// Whether two handles designate the same request.
    pub fn same(&self, other: &Urequest) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Urequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Urequest")
            .field("rtype", &self.inner.rtype)
            .field("provided", &self.is_provided())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as TestCounter;

    #[test]
    fn test_provide_matching_type() {
        let provided = Arc::new(AtomicBool::new(false));
        let flag = provided.clone();
        let request = Urequest::new(UrequestType::UrefMgr, None, move |p| {
            assert!(matches!(p, Provision::UrefMgr(_)));
            flag.store(true, Ordering::SeqCst);
        });
        request
            .provide(Provision::UrefMgr(UrefMgr::default()))
            .unwrap();
        assert!(provided.load(Ordering::SeqCst));
        assert!(request.is_provided());
    }

    #[test]
    fn test_provide_wrong_type_refused() {
        let request = Urequest::new(UrequestType::Uclock, None, |_| {});
        assert_eq!(
            request.provide(Provision::SinkLatency(0)),
            Err(Error::Invalid)
        );
        assert!(!request.is_provided());
    }

    #[test]
    fn test_sink_latency_accumulates() {
        let total = Arc::new(TestCounter::new(0));
        let seen = total.clone();
        let request = Urequest::new(UrequestType::SinkLatency, None, move |p| {
            if let Provision::SinkLatency(ticks) = p {
                seen.store(ticks, Ordering::SeqCst);
            }
        });
        request.add_latency(100);
        request.add_latency(50);
        request.provide(Provision::SinkLatency(1_000)).unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 1_150);
    }

    #[test]
    fn test_handle_identity() {
        let a = Urequest::new(UrequestType::Uclock, None, |_| {});
        let b = a.clone();
        let c = Urequest::new(UrequestType::Uclock, None, |_| {});
        assert!(a.same(&b));
        assert!(!a.same(&c));
    }
}
