//! Cross-Thread Transfer
//!
//! Moves a running pipe from one event loop to another. The pair consists
//! of a proxy pipe usable on the source thread and the inner pipe living on
//! the target thread: control commands on the proxy are marshalled as
//! messages through a lock-free queue and executed by a consumer watcher on
//! the target loop, in enqueue order. Feeding records into the proxy is
//! illegal; data flows through output wiring created on the target thread.
//!
//! Events emitted by the inner pipe travel the other way through
//! [`XferProbe`], which forwards a whitelist of event kinds over a second
//! queue back to a probe chain on the source thread; everything else is
//! handled on the target thread.
//!
//! [`XferMgr::with_worker`] bundles the usual setup: spawn a worker thread,
//! build its event loop, register it with a thread-local pump probe, attach
//! the transfer manager and run.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::upipe::{signature, Command, PipeOps, Upipe};
use crate::uprobe::{Event, EventKind, LogEvent, ProbeOps, Uprobe};
use crate::upump::{Upump, UpumpMgr};
use crate::uqueue::Uqueue;
use crate::uref::Uref;
use crate::uprobe::pthread_upump_mgr::PthreadUpumpMgrHandle;

/// Module signature of transfer pipes.
pub const XFER_SIGNATURE: u32 = signature(*b"xfer");

/// Default capacity of the event queue behind an [`XferProbe`].
const EVENT_QUEUE_LENGTH: usize = 64;

enum XferMsg {
    SetUri {
        pipe: Upipe,
        uri: String,
    },
    SetOption {
        pipe: Upipe,
        key: String,
        value: String,
    },
    SetOutput {
        pipe: Upipe,
        output: Option<Upipe>,
    },
    AttachUpumpMgr(Upipe),
    AttachUclock(Upipe),
    EndPreroll(Upipe),
    /// Final release of the proxy's reference, on the target thread.
    Release(Upipe),
}

struct XferMgrInner {
    queue: Uqueue<XferMsg>,
    attached: AtomicBool,
    /// Target loop, set by `attach`; used for shutdown.
    target: Mutex<Option<(UpumpMgr, Upump)>>,
}

/// Manager marshalling pipes to one target event loop.
#[derive(Clone)]
pub struct XferMgr {
    inner: Arc<XferMgrInner>,
}

impl XferMgr {
    /// Creates a manager with an internal command queue of `queue_length`.
    pub fn new(queue_length: usize) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(XferMgrInner {
                queue: Uqueue::new(queue_length)?,
                attached: AtomicBool::new(false),
                target: Mutex::new(None),
            }),
        })
    }

    /// Binds the manager to the target thread's loop and spawns the
    /// consumer watcher. To be called on the target thread.
    pub fn attach(&self, upump_mgr: &UpumpMgr) -> Result<()> {
        let inner = self.inner.clone();
        let pump = self.inner.queue.upump_alloc_pop(upump_mgr, move |_| {
            while let Some(msg) = inner.queue.pop() {
                process(msg);
            }
        });
        pump.start();
        *self.inner.target.lock() = Some((upump_mgr.clone(), pump));
        self.inner.attached.store(true, Ordering::SeqCst);
        debug!("xfer manager attached to target loop");
        Ok(())
    }

    /// Wraps `inner_pipe` in a proxy pipe usable on the calling thread.
    ///
    /// The inner pipe must not be used directly afterwards: every command
    /// goes through the proxy and executes on the target thread.
    pub fn alloc(&self, probe: Uprobe, inner_pipe: Upipe) -> Result<Upipe> {
        if !self.inner.attached.load(Ordering::SeqCst) {
            return Err(Error::Invalid);
        }
        Ok(Upipe::new(
            XFER_SIGNATURE,
            probe,
            XferProxy {
                mgr: self.clone(),
                inner: Some(inner_pipe),
                output: None,
            },
        ))
    }

    /// Detaches from the target loop and asks it to stop.
    ///
    /// Release every proxy and give the target loop a chance to drain the
    /// queue before calling this: messages still queued afterwards are
    /// dropped on whatever thread releases the manager last.
    pub fn shutdown(&self) {
        self.inner.attached.store(false, Ordering::SeqCst);
        if let Some((upump_mgr, pump)) = self.inner.target.lock().take() {
            pump.free();
            upump_mgr.stop_all();
        }
    }

    /// Spawns a worker thread running its own event loop, registers the
    /// loop with `pthread_probe`, attaches this kind of manager to it and
    /// returns once the worker is operational.
    pub fn with_worker(
        queue_length: usize,
        pthread_probe: Option<PthreadUpumpMgrHandle>,
    ) -> Result<(XferMgr, std::thread::JoinHandle<()>)> {
        let mgr = XferMgr::new(queue_length)?;
        let worker_mgr = mgr.clone();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let handle = std::thread::Builder::new()
            .name("upipe-xfer".into())
            .spawn(move || {
                let upump_mgr = match UpumpMgr::new() {
                    Ok(upump_mgr) => upump_mgr,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if let Some(probe) = pthread_probe {
                    probe.set_for_this_thread(upump_mgr.clone());
                }
                if let Err(err) = worker_mgr.attach(&upump_mgr) {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                if let Err(err) = upump_mgr.run() {
                    warn!("xfer worker loop failed: {err}");
                }
            })
            .map_err(|_| Error::External)?;
        match ready_rx.recv() {
            Ok(Ok(())) => Ok((mgr, handle)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(Error::External),
        }
    }

    fn post(&self, msg: XferMsg) -> Result<()> {
        let mut msg = msg;
        loop {
            match self.inner.queue.push(msg) {
                Ok(()) => return Ok(()),
                Err(back) => {
                    if !self.inner.attached.load(Ordering::SeqCst) {
                        return Err(Error::Busy);
                    }
                    msg = back;
                    std::thread::yield_now();
                }
            }
        }
    }
}

impl std::fmt::Debug for XferMgr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XferMgr")
            .field("attached", &self.inner.attached.load(Ordering::SeqCst))
            .field("pending", &self.inner.queue.len())
            .finish()
    }
}

/// Executes one marshalled command on the target thread.
fn process(msg: XferMsg) {
    let result = match msg {
        XferMsg::SetUri { pipe, uri } => pipe.set_uri(&uri),
        XferMsg::SetOption { pipe, key, value } => pipe.set_option(&key, &value),
        XferMsg::SetOutput { pipe, output } => pipe.set_output(output),
        XferMsg::AttachUpumpMgr(pipe) => pipe.attach_upump_mgr(),
        XferMsg::AttachUclock(pipe) => pipe.attach_uclock(),
        XferMsg::EndPreroll(pipe) => pipe.control(Command::EndPreroll),
        XferMsg::Release(pipe) => {
            drop(pipe);
            Ok(())
        }
    };
    if let Err(err) = result {
        warn!("transferred command failed: {err}");
    }
}

struct XferProxy {
    mgr: XferMgr,
    inner: Option<Upipe>,
    /// Local mirror of the remote output wiring.
    output: Option<Upipe>,
}

impl PipeOps for XferProxy {
    fn input(&mut self, pipe: &Upipe, _uref: Uref, _upump: Option<&Upump>) {
        pipe.err("input on a transfer proxy is illegal, dropping record");
    }

    fn control(&mut self, _pipe: &Upipe, command: Command<'_>) -> Result<()> {
        let Some(inner) = self.inner.clone() else {
            return Err(Error::Invalid);
        };
        match command {
            Command::SetUri(uri) => self.mgr.post(XferMsg::SetUri {
                pipe: inner,
                uri: uri.to_owned(),
            }),
            Command::SetOption { key, value } => self.mgr.post(XferMsg::SetOption {
                pipe: inner,
                key: key.to_owned(),
                value: value.to_owned(),
            }),
            Command::SetOutput(output) => {
                self.output = output.clone();
                self.mgr.post(XferMsg::SetOutput {
                    pipe: inner,
                    output,
                })
            }
            Command::GetOutput(slot) => {
                *slot = self.output.clone();
                Ok(())
            }
            Command::AttachUpumpMgr => self.mgr.post(XferMsg::AttachUpumpMgr(inner)),
            Command::AttachUclock => self.mgr.post(XferMsg::AttachUclock(inner)),
            Command::EndPreroll => self.mgr.post(XferMsg::EndPreroll(inner)),
            _ => Err(Error::Unhandled),
        }
    }
}

impl Drop for XferProxy {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            // The reference must drop on the target thread, where DEAD will
            // be thrown.
            let _ = self.mgr.post(XferMsg::Release(inner));
        }
    }
}

/// Owned form of the events a transfer probe forwards.
enum ForwardedEvent {
    Fatal(Error),
    Log(LogEvent),
    NewFlowDef(Uref),
    SourceEnd,
    SinkEnd,
    SyncAcquired,
    SyncLost,
}

impl ForwardedEvent {
    fn capture(event: &Event<'_>) -> Option<ForwardedEvent> {
        match event {
            Event::Fatal(err) => Some(ForwardedEvent::Fatal(*err)),
            Event::Log(log) => Some(ForwardedEvent::Log((*log).clone())),
            Event::NewFlowDef(flow_def) => Some(ForwardedEvent::NewFlowDef(flow_def.dup())),
            Event::SourceEnd => Some(ForwardedEvent::SourceEnd),
            Event::SinkEnd => Some(ForwardedEvent::SinkEnd),
            Event::SyncAcquired => Some(ForwardedEvent::SyncAcquired),
            Event::SyncLost => Some(ForwardedEvent::SyncLost),
            _ => None,
        }
    }

    fn rethrow(self, remote: &Uprobe) {
        let _ = match self {
            ForwardedEvent::Fatal(err) => remote.throw(None, &mut Event::Fatal(err)),
            ForwardedEvent::Log(mut log) => remote.throw(None, &mut Event::Log(&mut log)),
            ForwardedEvent::NewFlowDef(flow_def) => {
                remote.throw(None, &mut Event::NewFlowDef(&flow_def))
            }
            ForwardedEvent::SourceEnd => remote.throw(None, &mut Event::SourceEnd),
            ForwardedEvent::SinkEnd => remote.throw(None, &mut Event::SinkEnd),
            ForwardedEvent::SyncAcquired => remote.throw(None, &mut Event::SyncAcquired),
            ForwardedEvent::SyncLost => remote.throw(None, &mut Event::SyncLost),
        };
    }
}

/// Probe re-posting whitelisted events to another thread's probe chain.
pub struct XferProbe {
    whitelist: Vec<EventKind>,
    queue: Arc<Uqueue<ForwardedEvent>>,
    pump: Upump,
    local_next: Uprobe,
}

impl XferProbe {
    /// Builds a probe for a pipe about to be transferred.
    ///
    /// Events whose kind is in `whitelist` are queued and re-thrown into
    /// `remote` by a watcher on `source_upump_mgr`'s loop (the thread the
    /// events should surface on, in enqueue order). Everything else goes to
    /// `local_next` on the emitting thread.
    pub fn new(
        remote: Uprobe,
        local_next: Uprobe,
        source_upump_mgr: &UpumpMgr,
        whitelist: &[EventKind],
    ) -> Result<Uprobe> {
        let queue = Arc::new(Uqueue::<ForwardedEvent>::new(EVENT_QUEUE_LENGTH)?);
        let consumer = queue.clone();
        let pump = queue.upump_alloc_pop(source_upump_mgr, move |_| {
            while let Some(event) = consumer.pop() {
                event.rethrow(&remote);
            }
        });
        pump.start();
        Ok(Uprobe::new(Self {
            whitelist: whitelist.to_vec(),
            queue,
            pump,
            local_next,
        }))
    }
}

impl ProbeOps for XferProbe {
    fn throw(&self, pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
        if self.whitelist.contains(&event.kind()) {
            if let Some(owned) = ForwardedEvent::capture(event) {
                if self.queue.push(owned).is_err() {
                    warn!("xfer event queue full, dropping {:?}", event.kind());
                }
                return Ok(());
            }
        }
        self.local_next.throw(pipe, event)
    }
}

impl Drop for XferProbe {
    fn drop(&mut self) {
        self.pump.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_requires_attach() {
        let mgr = XferMgr::new(8).unwrap();
        let inner = Upipe::new(XFER_SIGNATURE, Uprobe::null(), NullOps);
        assert!(mgr.alloc(Uprobe::null(), inner).is_err());
    }

    struct NullOps;

    impl PipeOps for NullOps {
        fn input(&mut self, _: &Upipe, _: Uref, _: Option<&Upump>) {}

        fn control(&mut self, _: &Upipe, _: Command<'_>) -> Result<()> {
            Ok(())
        }
    }
}
