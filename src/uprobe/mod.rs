//! Probes
//!
//! Probes form a pipe's upward channel: a chain of event handlers composed
//! by wrapping, each probe holding the next. [`Uprobe::throw`] offers an
//! event to the chain head; a probe either handles it, rewrites it and
//! forwards, or passes it along untouched. The chain end reports
//! [`Error::Unhandled`], which callers of informational events ignore.
//!
//! `NEED-*` events carry an out-slot filled by the providing probe, which is
//! how pipes lazily discover managers and clocks. Probe handlers returning
//! other errors are ignored by throw helpers; `FATAL` is the channel for
//! unrecoverable errors and always reaches the application.

pub mod log;
pub mod prefix;
pub mod pthread_upump_mgr;
pub mod selflow;
pub mod ubuf_mem;
pub mod uclock;
pub mod upump_mgr;
pub mod uref_mgr;

pub use log::UprobeLog;
pub use prefix::UprobePrefix;
pub use pthread_upump_mgr::{PthreadUpumpMgrHandle, UprobePthreadUpumpMgr};
pub use selflow::UprobeSelflow;
pub use ubuf_mem::UprobeUbufMem;
pub use uclock::UprobeUclock;
pub use upump_mgr::UprobeUpumpMgr;
pub use uref_mgr::UprobeUrefMgr;

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ubuf::UbufMgr;
use crate::uclock::Uclock;
use crate::upipe::Upipe;
use crate::upump::UpumpMgr;
use crate::uref::{Uref, UrefMgr};
use crate::urequest::Urequest;

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Development chatter.
    Verbose,
    /// Debugging detail.
    Debug,
    /// Normal operation.
    Info,
    /// Unusual but handled conditions.
    Notice,
    /// Degraded operation.
    Warning,
    /// Failures.
    Error,
}

/// A structured log event travelling up the probe chain.
#[derive(Debug, Clone)]
pub struct LogEvent {
    /// Severity.
    pub level: LogLevel,
    /// Prefix tags, outermost first.
    pub tags: Vec<String>,
    /// Message.
    pub msg: String,
}

/// Event tags, used for transfer whitelists and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Pipe is constructed and operational.
    Ready,
    /// Pipe is about to be destroyed.
    Dead,
    /// Unrecoverable error.
    Fatal,
    /// Structured log.
    Log,
    /// The effective flow definition changed.
    NewFlowDef,
    /// Pipe needs an event loop.
    NeedUpumpMgr,
    /// Pipe needs a record manager.
    NeedUrefMgr,
    /// Pipe needs a buffer manager.
    NeedUbufMgr,
    /// Pipe needs a clock.
    NeedUclock,
    /// A request is looking for a provider.
    ProvideRequest,
    /// Clock reference.
    ClockRef,
    /// Timestamped record.
    ClockTs,
    /// Source exhausted.
    SourceEnd,
    /// Sink finished.
    SinkEnd,
    /// Framer locked onto frame boundaries.
    SyncAcquired,
    /// Framer lost frame boundaries.
    SyncLost,
    /// A split pipe's set of sub-flows changed.
    SplitUpdate,
    /// No event-loop manager may be fetched until thawed.
    FreezeUpumpMgr,
    /// Undoes one freeze.
    ThawUpumpMgr,
    /// Module-local event.
    Local,
}

/// An event offered to a probe chain.
pub enum Event<'a> {
    /// Pipe is constructed and operational.
    Ready,
    /// Pipe is about to be destroyed.
    Dead,
    /// Unrecoverable error; the application should tear the pipe down.
    Fatal(Error),
    /// Structured log; probes may rewrite tags on the way up.
    Log(&'a mut LogEvent),
    /// The effective flow definition changed.
    NewFlowDef(&'a Uref),
    /// Out-slot for an event loop.
    NeedUpumpMgr(&'a mut Option<UpumpMgr>),
    /// Out-slot for a record manager.
    NeedUrefMgr(&'a mut Option<UrefMgr>),
    /// Out-slot for a buffer manager matching a flow definition.
    NeedUbufMgr {
        /// Desired flow format.
        flow_def: &'a Uref,
        /// Filled by the provider.
        slot: &'a mut Option<UbufMgr>,
    },
    /// Out-slot for a clock.
    NeedUclock(&'a mut Option<Uclock>),
    /// A request walking up until a provider answers it.
    ProvideRequest(&'a Urequest),
    /// Clock reference emitted by a demuxer.
    ClockRef {
        /// Reference date in 27 MHz ticks.
        cr: u64,
        /// Whether the timeline restarted.
        discontinuity: bool,
    },
    /// Record whose timestamps were just decoded.
    ClockTs(&'a Uref),
    /// Source exhausted.
    SourceEnd,
    /// Sink finished.
    SinkEnd,
    /// Framer locked onto frame boundaries.
    SyncAcquired,
    /// Framer lost frame boundaries.
    SyncLost,
    /// A split pipe's set of sub-flows changed.
    SplitUpdate,
    /// No event-loop manager may be fetched until thawed.
    FreezeUpumpMgr,
    /// Undoes one freeze.
    ThawUpumpMgr,
    /// Module-local event, gated by the module signature.
    Local {
        /// Signature of the emitting module.
        signature: u32,
        /// Module-defined payload.
        args: &'a mut dyn std::any::Any,
    },
}

impl Event<'_> {
    /// The tag of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Ready => EventKind::Ready,
            Event::Dead => EventKind::Dead,
            Event::Fatal(_) => EventKind::Fatal,
            Event::Log(_) => EventKind::Log,
            Event::NewFlowDef(_) => EventKind::NewFlowDef,
            Event::NeedUpumpMgr(_) => EventKind::NeedUpumpMgr,
            Event::NeedUrefMgr(_) => EventKind::NeedUrefMgr,
            Event::NeedUbufMgr { .. } => EventKind::NeedUbufMgr,
            Event::NeedUclock(_) => EventKind::NeedUclock,
            Event::ProvideRequest(_) => EventKind::ProvideRequest,
            Event::ClockRef { .. } => EventKind::ClockRef,
            Event::ClockTs(_) => EventKind::ClockTs,
            Event::SourceEnd => EventKind::SourceEnd,
            Event::SinkEnd => EventKind::SinkEnd,
            Event::SyncAcquired => EventKind::SyncAcquired,
            Event::SyncLost => EventKind::SyncLost,
            Event::SplitUpdate => EventKind::SplitUpdate,
            Event::FreezeUpumpMgr => EventKind::FreezeUpumpMgr,
            Event::ThawUpumpMgr => EventKind::ThawUpumpMgr,
            Event::Local { .. } => EventKind::Local,
        }
    }
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event::{:?}", self.kind())
    }
}

/// Probe implementation.
pub trait ProbeOps: Send + Sync {
    /// Handles an event thrown by `pipe` (absent during teardown).
    ///
    /// Return `Ok` when handled; delegate to the wrapped probe otherwise.
    fn throw(&self, pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()>;
}

/// Shared handle to a probe chain.
///
/// The same probe may back several pipes.
#[derive(Clone, Default)]
pub struct Uprobe {
    inner: Option<Arc<dyn ProbeOps>>,
}

impl Uprobe {
    /// The empty chain: every event is unhandled.
    pub fn null() -> Self {
        Self { inner: None }
    }

    /// Wraps a probe implementation.
    pub fn new(ops: impl ProbeOps + 'static) -> Self {
        Self {
            inner: Some(Arc::new(ops)),
        }
    }

    /// Offers an event to the chain.
    pub fn throw(&self, pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
        match &self.inner {
            Some(ops) => ops.throw(pipe, event),
            None => Err(Error::Unhandled),
        }
    }

    /// Throws a log event with the given severity.
    pub fn log(&self, pipe: Option<&Upipe>, level: LogLevel, msg: impl Into<String>) {
        let mut event = LogEvent {
            level,
            tags: Vec::new(),
            msg: msg.into(),
        };
        let _ = self.throw(pipe, &mut Event::Log(&mut event));
    }
}

impl fmt::Debug for Uprobe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uprobe")
            .field("empty", &self.inner.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        kind: EventKind,
        count: Arc<AtomicUsize>,
        next: Uprobe,
    }

    impl ProbeOps for Counter {
        fn throw(&self, pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
            if event.kind() == self.kind {
                self.count.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
            self.next.throw(pipe, event)
        }
    }

    #[test]
    fn test_propagation_stops_at_handler() {
        let outer_count = Arc::new(AtomicUsize::new(0));
        let inner_count = Arc::new(AtomicUsize::new(0));
        let inner = Uprobe::new(Counter {
            kind: EventKind::SourceEnd,
            count: inner_count.clone(),
            next: Uprobe::null(),
        });
        let outer = Uprobe::new(Counter {
            kind: EventKind::SourceEnd,
            count: outer_count.clone(),
            next: inner,
        });

        outer.throw(None, &mut Event::SourceEnd).unwrap();
        assert_eq!(outer_count.load(Ordering::SeqCst), 1);
        assert_eq!(inner_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unhandled_reaches_chain_end() {
        let count = Arc::new(AtomicUsize::new(0));
        let probe = Uprobe::new(Counter {
            kind: EventKind::SourceEnd,
            count,
            next: Uprobe::null(),
        });
        assert_eq!(probe.throw(None, &mut Event::SinkEnd), Err(Error::Unhandled));
    }

    #[test]
    fn test_shared_probe_backs_several_chains() {
        let count = Arc::new(AtomicUsize::new(0));
        let probe = Uprobe::new(Counter {
            kind: EventKind::SyncAcquired,
            count: count.clone(),
            next: Uprobe::null(),
        });
        let alias = probe.clone();
        probe.throw(None, &mut Event::SyncAcquired).unwrap();
        alias.throw(None, &mut Event::SyncAcquired).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
