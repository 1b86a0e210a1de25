//! Pipes
//!
//! A pipe is one stage of a pipeline: a uniform polymorphic object with
//! typed input, a bidirectional control channel, a probe chain for upward
//! events and a reference-counted lifecycle. Stages implement [`PipeOps`];
//! applications and neighbouring stages hold [`Upipe`] handles.
//!
//! Records move downstream through [`Upipe::input`]; configuration moves
//! both ways through [`Upipe::control`]; everything else moves upstream
//! through the probe chain. A pipe emits `READY` right after construction
//! and `DEAD` when its last handle goes away.
//!
//! Module-local commands and events are gated by the owning module's
//! four-character signature and rejected by other pipes.

pub mod helper;

pub use helper::{HelperOutput, HelperSync};

use parking_lot::ReentrantMutex;
use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;
use tracing::warn;

use crate::error::{Error, Result};
use crate::ubuf::UbufMgr;
use crate::uclock::Uclock;
use crate::uprobe::{Event, LogLevel, Uprobe};
use crate::upump::{Upump, UpumpMgr};
use crate::uref::{Uref, UrefMgr};
use crate::urequest::Urequest;

/// Builds a module signature from four characters.
pub const fn signature(tag: [u8; 4]) -> u32 {
    u32::from_be_bytes(tag)
}

/// A control command.
///
/// Out-parameters are mutable slots filled by the pipe. Module-local
/// commands carry the module signature and an opaque payload.
pub enum Command<'a> {
    /// Proposes an input flow definition; the pipe validates and stores it.
    SetFlowDef(&'a Uref),
    /// Reads the pipe's flow definition.
    GetFlowDef(&'a mut Option<Uref>),
    /// Wires (or unwires) the downstream pipe.
    SetOutput(Option<Upipe>),
    /// Reads the downstream pipe.
    GetOutput(&'a mut Option<Upipe>),
    /// Sets the source or sink location.
    SetUri(&'a str),
    /// Reads the source or sink location.
    GetUri(&'a mut Option<String>),
    /// Sets a module option.
    SetOption {
        /// Option name.
        key: &'a str,
        /// Option value.
        value: &'a str,
    },
    /// Reads a module option.
    GetOption {
        /// Option name.
        key: &'a str,
        /// Filled with the value.
        value: &'a mut Option<String>,
    },
    /// Sets the output chunk size.
    SetOutputSize(usize),
    /// Reads the output chunk size.
    GetOutputSize(&'a mut Option<usize>),
    /// Registers a request on this pipe.
    RegisterRequest(Urequest),
    /// Unregisters a previously registered request.
    UnregisterRequest(&'a Urequest),
    /// Tells the pipe to (re)fetch its event loop through the probe chain.
    AttachUpumpMgr,
    /// Tells the pipe to (re)fetch its clock through the probe chain.
    AttachUclock,
    /// Ends the preroll period.
    EndPreroll,
    /// Iterates the sub-pipes of a split or join pipe.
    IterateSub {
        /// Zero-based index.
        index: usize,
        /// Filled with the sub-pipe, or left empty past the end.
        slot: &'a mut Option<Upipe>,
    },
    /// Module-local command.
    Local {
        /// Signature of the addressed module.
        signature: u32,
        /// Module-defined payload.
        args: &'a mut dyn Any,
    },
}

/// Pipe implementation: private state plus behaviour.
///
/// Calls are serialised by the handle; `input` and `control` never run
/// concurrently for one pipe.
pub trait PipeOps: Send {
    /// Consumes one record.
    ///
    /// `upump` identifies the watcher that produced the call, for blockers.
    /// Input-path failures drop the record (raising `FATAL` when state is
    /// corrupt) rather than returning.
    fn input(&mut self, pipe: &Upipe, uref: Uref, upump: Option<&Upump>);

    /// Processes a control command.
    fn control(&mut self, pipe: &Upipe, command: Command<'_>) -> Result<()>;
}

struct UpipeInner {
    signature: u32,
    probe: Uprobe,
    /// Reentrant so a probe handler may address the throwing pipe; the
    /// inner cell still refuses a second mutable entry with `Busy`.
    ops: ReentrantMutex<RefCell<Box<dyn PipeOps>>>,
}

impl Drop for UpipeInner {
    fn drop(&mut self) {
        let _ = self.probe.throw(None, &mut Event::Dead);
    }
}

/// Shared handle to a pipe.
///
/// Cloning acquires a reference; dropping the last one destroys the pipe
/// after `DEAD` is emitted.
#[derive(Clone)]
pub struct Upipe {
    inner: Arc<UpipeInner>,
}

impl Upipe {
    /// Constructs a pipe from its implementation and emits `READY`.
    pub fn new(signature: u32, probe: Uprobe, ops: impl PipeOps + 'static) -> Upipe {
        let pipe = Upipe {
            inner: Arc::new(UpipeInner {
                signature,
                probe,
                ops: ReentrantMutex::new(RefCell::new(Box::new(ops))),
            }),
        };
        let _ = pipe.throw(&mut Event::Ready);
        pipe
    }

    /// The owning module's signature.
    pub fn sig(&self) -> u32 {
        self.inner.signature
    }

    /// The probe chain head.
    pub fn probe(&self) -> &Uprobe {
        &self.inner.probe
    }

    /// Whether two handles designate the same pipe.
    pub fn same(&self, other: &Upipe) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Feeds one record into the pipe.
    ///
    /// A record arriving while the pipe is re-entered through its own probe
    /// chain is dropped.
    pub fn input(&self, uref: Uref, upump: Option<&Upump>) {
        let guard = self.inner.ops.lock();
        match guard.try_borrow_mut() {
            Ok(mut ops) => ops.input(self, uref, upump),
            Err(_) => warn!("reentrant input, dropping record"),
        };
    }

    /// Sends a control command.
    ///
    /// Returns [`Error::Busy`] when the pipe is re-entered through its own
    /// probe chain.
    pub fn control(&self, command: Command<'_>) -> Result<()> {
        let guard = self.inner.ops.lock();
        let mut ops = guard.try_borrow_mut().map_err(|_| Error::Busy)?;
        ops.control(self, command)
    }

    /// Throws an event up the probe chain.
    pub fn throw(&self, event: &mut Event<'_>) -> Result<()> {
        self.inner.probe.throw(Some(self), event)
    }

    /// Throws `FATAL`; the application is expected to tear the pipe down.
    pub fn throw_fatal(&self, error: Error) {
        let _ = self.throw(&mut Event::Fatal(error));
    }

    /// Logs through the probe chain.
    pub fn log(&self, level: LogLevel, msg: impl Into<String>) {
        self.inner.probe.log(Some(self), level, msg);
    }

    /// Logs at debug severity.
    pub fn dbg(&self, msg: impl Into<String>) {
        self.log(LogLevel::Debug, msg);
    }

    /// Logs at warning severity.
    pub fn warn(&self, msg: impl Into<String>) {
        self.log(LogLevel::Warning, msg);
    }

    /// Logs at error severity.
    pub fn err(&self, msg: impl Into<String>) {
        self.log(LogLevel::Error, msg);
    }

    // ------------------------------------------------------------------
    // Control conveniences
    // ------------------------------------------------------------------

    /// Proposes an input flow definition.
    pub fn set_flow_def(&self, flow_def: &Uref) -> Result<()> {
        self.control(Command::SetFlowDef(flow_def))
    }

    /// Reads the pipe's flow definition.
    pub fn get_flow_def(&self) -> Result<Option<Uref>> {
        let mut slot = None;
        self.control(Command::GetFlowDef(&mut slot))?;
        Ok(slot)
    }

    /// Wires the downstream pipe.
    pub fn set_output(&self, output: Option<Upipe>) -> Result<()> {
        self.control(Command::SetOutput(output))
    }

    /// Reads the downstream pipe.
    pub fn get_output(&self) -> Result<Option<Upipe>> {
        let mut slot = None;
        self.control(Command::GetOutput(&mut slot))?;
        Ok(slot)
    }

    /// Sets the source or sink location.
    pub fn set_uri(&self, uri: &str) -> Result<()> {
        self.control(Command::SetUri(uri))
    }

    /// Sets a module option.
    pub fn set_option(&self, key: &str, value: &str) -> Result<()> {
        self.control(Command::SetOption { key, value })
    }

    /// Registers a request on this pipe.
    pub fn register_request(&self, request: Urequest) -> Result<()> {
        self.control(Command::RegisterRequest(request))
    }

    /// Unregisters a previously registered request.
    pub fn unregister_request(&self, request: &Urequest) -> Result<()> {
        self.control(Command::UnregisterRequest(request))
    }

    /// Tells the pipe to (re)fetch its event loop.
    pub fn attach_upump_mgr(&self) -> Result<()> {
        self.control(Command::AttachUpumpMgr)
    }

    /// Tells the pipe to (re)fetch its clock.
    pub fn attach_uclock(&self) -> Result<()> {
        self.control(Command::AttachUclock)
    }

    /// Iterates the sub-pipes of a split or join pipe.
    pub fn iterate_sub(&self, index: usize) -> Result<Option<Upipe>> {
        let mut slot = None;
        self.control(Command::IterateSub {
            index,
            slot: &mut slot,
        })?;
        Ok(slot)
    }

    // ------------------------------------------------------------------
    // Probe-chain discovery
    // ------------------------------------------------------------------

    /// Fetches an event loop through the probe chain.
    pub fn need_upump_mgr(&self) -> Result<UpumpMgr> {
        let mut slot = None;
        let _ = self.throw(&mut Event::NeedUpumpMgr(&mut slot));
        slot.ok_or(Error::Upump)
    }

    /// Fetches a record manager through the probe chain.
    pub fn need_uref_mgr(&self) -> Result<UrefMgr> {
        let mut slot = None;
        let _ = self.throw(&mut Event::NeedUrefMgr(&mut slot));
        slot.ok_or(Error::Unhandled)
    }

    /// Fetches a buffer manager for `flow_def` through the probe chain.
    pub fn need_ubuf_mgr(&self, flow_def: &Uref) -> Result<UbufMgr> {
        let mut slot = None;
        let _ = self.throw(&mut Event::NeedUbufMgr {
            flow_def,
            slot: &mut slot,
        });
        slot.ok_or(Error::Unhandled)
    }

    /// Fetches a clock through the probe chain.
    pub fn need_uclock(&self) -> Result<Uclock> {
        let mut slot = None;
        let _ = self.throw(&mut Event::NeedUclock(&mut slot));
        slot.ok_or(Error::Unhandled)
    }
}

impl std::fmt::Debug for Upipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = self.inner.signature.to_be_bytes();
        f.debug_struct("Upipe")
            .field("signature", &String::from_utf8_lossy(&tag))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uprobe::{EventKind, ProbeOps};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TEST_SIG: u32 = signature(*b"test");

    struct Recorder {
        events: Arc<Mutex<Vec<EventKind>>>,
    }

    impl ProbeOps for Recorder {
        fn throw(&self, _pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
            self.events.lock().push(event.kind());
            Ok(())
        }
    }

    struct CountingSink {
        received: Arc<AtomicUsize>,
    }

    impl PipeOps for CountingSink {
        fn input(&mut self, _pipe: &Upipe, _uref: Uref, _upump: Option<&Upump>) {
            self.received.fetch_add(1, Ordering::SeqCst);
        }

        fn control(&mut self, _pipe: &Upipe, command: Command<'_>) -> Result<()> {
            match command {
                Command::SetFlowDef(_) => Ok(()),
                _ => Err(Error::Unhandled),
            }
        }
    }

    #[test]
    fn test_ready_and_dead_lifecycle() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let probe = Uprobe::new(Recorder {
            events: events.clone(),
        });
        let pipe = Upipe::new(
            TEST_SIG,
            probe,
            CountingSink {
                received: Arc::new(AtomicUsize::new(0)),
            },
        );
        let alias = pipe.clone();
        drop(pipe);
        assert_eq!(&*events.lock(), &[EventKind::Ready]);
        drop(alias);
        assert_eq!(&*events.lock(), &[EventKind::Ready, EventKind::Dead]);
    }

    #[test]
    fn test_input_reaches_ops() {
        let received = Arc::new(AtomicUsize::new(0));
        let pipe = Upipe::new(
            TEST_SIG,
            Uprobe::null(),
            CountingSink {
                received: received.clone(),
            },
        );
        pipe.input(Uref::new(), None);
        pipe.input(Uref::new(), None);
        assert_eq!(received.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_command_unhandled() {
        let pipe = Upipe::new(
            TEST_SIG,
            Uprobe::null(),
            CountingSink {
                received: Arc::new(AtomicUsize::new(0)),
            },
        );
        assert_eq!(pipe.set_uri("nowhere"), Err(Error::Unhandled));
    }

    #[test]
    fn test_signature_tag() {
        assert_eq!(signature(*b"test"), 0x74657374);
    }
}
