//! Pipe State Helpers
//!
//! Reusable substructures for the recurring parts of a pipe implementation:
//! output wiring with flow-definition propagation, and framer sync state.
//! Modules embed them in their private state and delegate the matching
//! control commands.

use crate::error::{Error, Result};
use crate::uprobe::Event;
use crate::upump::Upump;
use crate::uref::Uref;
use crate::urequest::{Urequest, UrequestType};

use super::{Command, Upipe};

/// Output wiring: downstream pipe, effective flow definition, request
/// relaying.
///
/// `SET-FLOW-DEF` contract: after validation the module calls
/// [`store_flow_def`](Self::store_flow_def), which emits `NEW-FLOW-DEF`
/// upstream; the stored definition is propagated downstream before the next
/// record.
#[derive(Default)]
pub struct HelperOutput {
    output: Option<Upipe>,
    flow_def: Option<Uref>,
    flow_def_sent: bool,
    requests: Vec<Urequest>,
}

impl HelperOutput {
    /// Creates an unwired helper.
    pub fn new() -> Self {
        Self::default()
    }

    /// The downstream pipe.
    pub fn output_pipe(&self) -> Option<&Upipe> {
        self.output.as_ref()
    }

    /// The stored flow definition.
    pub fn flow_def(&self) -> Option<&Uref> {
        self.flow_def.as_ref()
    }

    /// Stores a new effective flow definition and emits `NEW-FLOW-DEF`.
    pub fn store_flow_def(&mut self, pipe: &Upipe, flow_def: Uref) {
        let _ = pipe.throw(&mut Event::NewFlowDef(&flow_def));
        self.flow_def = Some(flow_def);
        self.flow_def_sent = false;
    }

    /// Sends one record downstream, propagating the flow definition first
    /// when it changed. Records without a wired output are dropped.
    pub fn output(&mut self, uref: Uref, upump: Option<&Upump>) {
        let Some(output) = self.output.clone() else {
            return;
        };
        if !self.flow_def_sent {
            if let Some(flow_def) = &self.flow_def {
                let _ = output.set_flow_def(flow_def);
            }
            self.flow_def_sent = true;
        }
        output.input(uref, upump);
    }

    /// Registers a request, adding this pipe's intrinsic latency.
    ///
    /// `SINK-LATENCY` requests relay downstream towards their provider; the
    /// others are first offered to the probe chain and relayed downstream
    /// only when no probe answers.
    pub fn register_request(
        &mut self,
        pipe: &Upipe,
        request: Urequest,
        intrinsic_latency: u64,
    ) -> Result<()> {
        request.add_latency(intrinsic_latency);
        let relayed = match request.rtype() {
            UrequestType::SinkLatency => None,
            _ => Some(pipe.throw(&mut Event::ProvideRequest(&request))),
        };
        let result = match relayed {
            Some(Ok(())) => Ok(()),
            Some(Err(Error::Unhandled)) | None => match &self.output {
                Some(output) => output.register_request(request.clone()),
                None => Err(Error::Unhandled),
            },
            Some(Err(err)) => Err(err),
        };
        if result.is_ok() {
            self.requests.push(request);
        }
        result
    }

    /// Unregisters a previously registered request.
    pub fn unregister_request(&mut self, request: &Urequest) -> Result<()> {
        let Some(idx) = self.requests.iter().position(|r| r.same(request)) else {
            return Err(Error::Invalid);
        };
        self.requests.remove(idx);
        if let Some(output) = &self.output {
            let _ = output.unregister_request(request);
        }
        Ok(())
    }

    /// Handles the output-related subset of control commands.
    pub fn control(&mut self, pipe: &Upipe, command: Command<'_>) -> Result<()> {
        match command {
            Command::GetFlowDef(slot) => {
                *slot = self.flow_def.as_ref().map(Uref::dup);
                Ok(())
            }
            Command::SetOutput(output) => {
                self.output = output;
                self.flow_def_sent = false;
                // Requests in flight move with the wire.
                if let Some(out) = &self.output {
                    for request in &self.requests {
                        let _ = out.register_request(request.clone());
                    }
                }
                Ok(())
            }
            Command::GetOutput(slot) => {
                *slot = self.output.clone();
                Ok(())
            }
            Command::RegisterRequest(request) => self.register_request(pipe, request, 0),
            Command::UnregisterRequest(request) => self.unregister_request(request),
            _ => Err(Error::Unhandled),
        }
    }
}

/// Framer sync state, emitting `SYNC-ACQUIRED` / `SYNC-LOST` on edges only.
#[derive(Default)]
pub struct HelperSync {
    acquired: bool,
}

impl HelperSync {
    /// Creates an unsynchronised helper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the framer currently holds sync.
    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    /// Marks sync acquired.
    pub fn sync_acquired(&mut self, pipe: &Upipe) {
        if !self.acquired {
            self.acquired = true;
            let _ = pipe.throw(&mut Event::SyncAcquired);
        }
    }

    /// Marks sync lost.
    pub fn sync_lost(&mut self, pipe: &Upipe) {
        if self.acquired {
            self.acquired = false;
            let _ = pipe.throw(&mut Event::SyncLost);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upipe::{signature, PipeOps};
    use crate::uprobe::{EventKind, ProbeOps, Uprobe};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const TEST_SIG: u32 = signature(*b"hlpr");

    struct Recorder {
        events: Arc<Mutex<Vec<EventKind>>>,
    }

    impl ProbeOps for Recorder {
        fn throw(&self, _pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
            self.events.lock().push(event.kind());
            Ok(())
        }
    }

    struct Sink {
        received: Arc<AtomicUsize>,
        flow_defs: Arc<AtomicUsize>,
    }

    impl PipeOps for Sink {
        fn input(&mut self, _pipe: &Upipe, _uref: Uref, _upump: Option<&Upump>) {
            self.received.fetch_add(1, Ordering::SeqCst);
        }

        fn control(&mut self, _pipe: &Upipe, command: Command<'_>) -> Result<()> {
            match command {
                Command::SetFlowDef(_) => {
                    self.flow_defs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                _ => Err(Error::Unhandled),
            }
        }
    }

    fn sink(received: &Arc<AtomicUsize>, flow_defs: &Arc<AtomicUsize>) -> Upipe {
        Upipe::new(
            TEST_SIG,
            Uprobe::null(),
            Sink {
                received: received.clone(),
                flow_defs: flow_defs.clone(),
            },
        )
    }

    fn probed_pipe(events: &Arc<Mutex<Vec<EventKind>>>) -> Upipe {
        Upipe::new(
            TEST_SIG,
            Uprobe::new(Recorder {
                events: events.clone(),
            }),
            Sink {
                received: Arc::new(AtomicUsize::new(0)),
                flow_defs: Arc::new(AtomicUsize::new(0)),
            },
        )
    }

    #[test]
    fn test_flow_def_sent_before_first_record() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let pipe = probed_pipe(&events);
        let received = Arc::new(AtomicUsize::new(0));
        let flow_defs = Arc::new(AtomicUsize::new(0));

        let mut helper = HelperOutput::new();
        let mgr = crate::uref::UrefMgr::default();
        let flow_def = crate::uref::alloc_flow_def(&mgr, "block.").unwrap();
        helper.store_flow_def(&pipe, flow_def);
        assert!(events.lock().contains(&EventKind::NewFlowDef));

        helper
            .control(&pipe, Command::SetOutput(Some(sink(&received, &flow_defs))))
            .unwrap();
        helper.output(Uref::new(), None);
        helper.output(Uref::new(), None);

        assert_eq!(flow_defs.load(Ordering::SeqCst), 1);
        assert_eq!(received.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_records_without_output_are_dropped() {
        let mut helper = HelperOutput::new();
        helper.output(Uref::new(), None);
    }

    #[test]
    fn test_sync_edges_only() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let pipe = probed_pipe(&events);
        events.lock().clear();

        let mut sync = HelperSync::new();
        sync.sync_acquired(&pipe);
        sync.sync_acquired(&pipe);
        sync.sync_lost(&pipe);
        sync.sync_lost(&pipe);
        sync.sync_acquired(&pipe);

        assert_eq!(
            &*events.lock(),
            &[
                EventKind::SyncAcquired,
                EventKind::SyncLost,
                EventKind::SyncAcquired
            ]
        );
    }
}
