//! Event Loop
//!
//! A [`UpumpMgr`] owns one cooperative event loop. Watchers ([`Upump`]) come
//! in five kinds: timers (one-shot or periodic), file-descriptor read/write
//! readiness (level-triggered), POSIX signals (delivery deferred to a loop
//! turn), idlers (fire every turn), and eventfd wakeups. A watcher may carry
//! a mutual-exclusion handle, taken around its callback.
//!
//! `run` executes on the loop's owning thread and returns when no active
//! watcher remains or [`UpumpMgr::stop_all`] is called. Only one callback
//! executes at a time; backpressure is expressed by allocating an
//! [`UpumpBlocker`] against a watcher and returning to the loop.
//!
//! The manager itself is a shared handle so that watchers can be allocated,
//! started and stopped from other threads; the loop picks up changes through
//! an internal wakeup channel.

mod blocker;

pub use blocker::UpumpBlocker;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::ueventfd::Ueventfd;

/// Mutual-exclusion handle optionally carried by a watcher.
pub type Umutex = Arc<Mutex<()>>;

type Callback = Arc<Mutex<Box<dyn FnMut(&Upump) + Send>>>;

/// Highest signal number handled.
const NSIG: usize = 65;

const SIGNAL_TARGET_INIT: AtomicI32 = AtomicI32::new(-1);
const SIGNAL_PENDING_INIT: AtomicBool = AtomicBool::new(false);

/// Eventfd written by the handler of each signal number. One loop owns a
/// given signal number at a time.
static SIGNAL_TARGET: [AtomicI32; NSIG] = [SIGNAL_TARGET_INIT; NSIG];
static SIGNAL_PENDING: [AtomicBool; NSIG] = [SIGNAL_PENDING_INIT; NSIG];

extern "C" fn signal_handler(signo: libc::c_int) {
    let signo = signo as usize;
    if signo >= NSIG {
        return;
    }
    SIGNAL_PENDING[signo].store(true, Ordering::SeqCst);
    let fd = SIGNAL_TARGET[signo].load(Ordering::SeqCst);
    if fd >= 0 {
        let value: u64 = 1;
        unsafe {
            libc::write(fd, value.to_ne_bytes().as_ptr().cast(), 8);
        }
    }
}

enum WatcherKind {
    Timer {
        first: Duration,
        /// Zero means one-shot.
        period: Duration,
        next: Option<Instant>,
    },
    FdRead(RawFd),
    FdWrite(RawFd),
    Signal(i32),
    Idler,
    Eventfd {
        event: Ueventfd,
        auto_reset: bool,
    },
}

struct Watcher {
    kind: WatcherKind,
    cb: Callback,
    started: bool,
    blockers: usize,
    /// Collected for dispatch this turn; cleared by `stop` so an earlier
    /// callback can cancel a queued invocation.
    pending: bool,
    mutex: Option<Umutex>,
}

impl Watcher {
    fn active(&self) -> bool {
        self.started && self.blockers == 0
    }
}

struct LoopShared {
    state: Mutex<LoopState>,
    /// Interrupts `poll` when the watcher set changes.
    wakeup: Ueventfd,
    /// Written by signal handlers.
    sig_event: Ueventfd,
    stop: AtomicBool,
}

struct LoopState {
    watchers: HashMap<u64, Watcher>,
    next_id: u64,
}

/// Shared handle to one event loop.
#[derive(Clone)]
pub struct UpumpMgr {
    shared: Arc<LoopShared>,
}

impl UpumpMgr {
    /// Creates an event loop.
    pub fn new() -> Result<Self> {
        Ok(Self {
            shared: Arc::new(LoopShared {
                state: Mutex::new(LoopState {
                    watchers: HashMap::new(),
                    next_id: 1,
                }),
                wakeup: Ueventfd::new(false)?,
                sig_event: Ueventfd::new(false)?,
                stop: AtomicBool::new(false),
            }),
        })
    }

    fn alloc(&self, kind: WatcherKind, cb: impl FnMut(&Upump) + Send + 'static) -> Upump {
        let mut state = self.shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.watchers.insert(
            id,
            Watcher {
                kind,
                cb: Arc::new(Mutex::new(Box::new(cb))),
                started: false,
                blockers: 0,
                pending: false,
                mutex: None,
            },
        );
        Upump {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Allocates a timer firing once after `first`, then every `period`.
    ///
    /// A zero `period` makes it one-shot. Delays are guaranteed minimums
    /// with a tolerance of about one millisecond.
    pub fn alloc_timer(
        &self,
        first: Duration,
        period: Duration,
        cb: impl FnMut(&Upump) + Send + 'static,
    ) -> Upump {
        self.alloc(
            WatcherKind::Timer {
                first,
                period,
                next: None,
            },
            cb,
        )
    }

    /// Allocates a level-triggered read-readiness watcher on `fd`.
    pub fn alloc_fd_read(&self, fd: RawFd, cb: impl FnMut(&Upump) + Send + 'static) -> Upump {
        self.alloc(WatcherKind::FdRead(fd), cb)
    }

    /// Allocates a level-triggered write-readiness watcher on `fd`.
    pub fn alloc_fd_write(&self, fd: RawFd, cb: impl FnMut(&Upump) + Send + 'static) -> Upump {
        self.alloc(WatcherKind::FdWrite(fd), cb)
    }

    /// Allocates a watcher on a POSIX signal, delivered on loop turns.
    pub fn alloc_signal(
        &self,
        signo: i32,
        cb: impl FnMut(&Upump) + Send + 'static,
    ) -> Result<Upump> {
        use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

        if signo <= 0 || signo as usize >= NSIG {
            return Err(Error::Invalid);
        }
        let signal = Signal::try_from(signo).map_err(|_| Error::Invalid)?;
        let action = SigAction::new(
            SigHandler::Handler(signal_handler),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        unsafe { sigaction(signal, &action) }.map_err(|_| Error::External)?;
        SIGNAL_TARGET[signo as usize]
            .store(self.shared.sig_event.as_raw_fd(), Ordering::SeqCst);
        Ok(self.alloc(WatcherKind::Signal(signo), cb))
    }

    /// Allocates an idler, firing every loop turn until stopped.
    pub fn alloc_idler(&self, cb: impl FnMut(&Upump) + Send + 'static) -> Upump {
        self.alloc(WatcherKind::Idler, cb)
    }

    /// Allocates a watcher on a wakeup channel.
    ///
    /// With `auto_reset` the channel is drained before the callback fires,
    /// giving edge-triggered delivery.
    pub fn alloc_eventfd(
        &self,
        event: &Ueventfd,
        auto_reset: bool,
        cb: impl FnMut(&Upump) + Send + 'static,
    ) -> Upump {
        self.alloc(
            WatcherKind::Eventfd {
                event: event.clone(),
                auto_reset,
            },
            cb,
        )
    }

    /// Requests loop exit from any thread or callback.
    pub fn stop_all(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.wakeup.signal();
    }

    /// Runs the loop on the calling thread until no active watcher remains
    /// or [`stop_all`](Self::stop_all) is called.
    pub fn run(&self) -> Result<()> {
        let shared = &self.shared;
        loop {
            if shared.stop.swap(false, Ordering::SeqCst) {
                trace!("event loop stopped by request");
                return Ok(());
            }

            let mut pollfds = vec![libc::pollfd {
                fd: shared.wakeup.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            }];
            // Watcher id behind each pollfd past the wakeup channel.
            let mut slots: Vec<u64> = vec![0];
            let mut sig_slot = None;
            let mut any_idler = false;
            let mut nearest: Option<Instant> = None;

            {
                let state = shared.state.lock();
                let mut any_active = false;
                for (&id, watcher) in &state.watchers {
                    if !watcher.active() {
                        continue;
                    }
                    any_active = true;
                    match &watcher.kind {
                        WatcherKind::Timer { next: Some(at), .. } => {
                            nearest = Some(nearest.map_or(*at, |n: Instant| n.min(*at)));
                        }
                        WatcherKind::Timer { next: None, .. } => {}
                        WatcherKind::FdRead(fd) => {
                            pollfds.push(libc::pollfd {
                                fd: *fd,
                                events: libc::POLLIN,
                                revents: 0,
                            });
                            slots.push(id);
                        }
                        WatcherKind::FdWrite(fd) => {
                            pollfds.push(libc::pollfd {
                                fd: *fd,
                                events: libc::POLLOUT,
                                revents: 0,
                            });
                            slots.push(id);
                        }
                        WatcherKind::Signal(_) => {
                            if sig_slot.is_none() {
                                pollfds.push(libc::pollfd {
                                    fd: shared.sig_event.as_raw_fd(),
                                    events: libc::POLLIN,
                                    revents: 0,
                                });
                                slots.push(0);
                                sig_slot = Some(pollfds.len() - 1);
                            }
                        }
                        WatcherKind::Idler => any_idler = true,
                        WatcherKind::Eventfd { event, .. } => {
                            pollfds.push(libc::pollfd {
                                fd: event.as_raw_fd(),
                                events: libc::POLLIN,
                                revents: 0,
                            });
                            slots.push(id);
                        }
                    }
                }
                if !any_active {
                    trace!("event loop drained, exiting");
                    return Ok(());
                }
            }

            let timeout = if any_idler {
                0
            } else {
                match nearest {
                    Some(at) => {
                        let now = Instant::now();
                        if at <= now {
                            0
                        } else {
                            // Round up so timers never fire early.
                            (at - now).as_millis().min(i32::MAX as u128 - 1) as i32 + 1
                        }
                    }
                    None => -1,
                }
            };

            let ret = unsafe {
                libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout)
            };
            if ret < 0 {
                let errno = std::io::Error::last_os_error();
                if errno.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                warn!("poll failed: {errno}");
                return Err(Error::External);
            }

            if pollfds[0].revents & libc::POLLIN != 0 {
                shared.wakeup.reset();
            }

            let mut pending_signals = Vec::new();
            if let Some(idx) = sig_slot {
                if pollfds[idx].revents & libc::POLLIN != 0 {
                    shared.sig_event.reset();
                }
            }
            for (signo, pending) in SIGNAL_PENDING.iter().enumerate() {
                // Only consume signals routed to this loop.
                if SIGNAL_TARGET[signo].load(Ordering::SeqCst) == shared.sig_event.as_raw_fd()
                    && pending.swap(false, Ordering::SeqCst)
                {
                    pending_signals.push(signo as i32);
                }
            }

            let now = Instant::now();
            let mut fired = Vec::new();
            {
                let mut state = shared.state.lock();
                for (idx, pollfd) in pollfds.iter().enumerate() {
                    let id = slots[idx];
                    if id != 0
                        && pollfd.revents & (pollfd.events | libc::POLLERR | libc::POLLHUP) != 0
                    {
                        if let Some(watcher) = state.watchers.get_mut(&id) {
                            if watcher.active() {
                                watcher.pending = true;
                                fired.push(id);
                            }
                        }
                    }
                }
                for (&id, watcher) in state.watchers.iter_mut() {
                    if !watcher.active() {
                        continue;
                    }
                    match &mut watcher.kind {
                        WatcherKind::Timer { period, next, .. } => {
                            if let Some(at) = *next {
                                if at <= now {
                                    watcher.pending = true;
                                    fired.push(id);
                                    if period.is_zero() {
                                        watcher.started = false;
                                        *next = None;
                                    } else {
                                        *next = Some(at + *period);
                                    }
                                }
                            }
                        }
                        WatcherKind::Signal(signo) => {
                            if pending_signals.contains(signo) {
                                watcher.pending = true;
                                fired.push(id);
                            }
                        }
                        WatcherKind::Idler => {
                            watcher.pending = true;
                            fired.push(id);
                        }
                        _ => {}
                    }
                }
            }

            for id in fired {
                let (cb, mutex, reset) = {
                    let mut state = shared.state.lock();
                    match state.watchers.get_mut(&id) {
                        // A previous callback may have stopped or freed it,
                        // cancelling the queued invocation.
                        Some(watcher) if watcher.pending => {
                            watcher.pending = false;
                            let reset = match &watcher.kind {
                                WatcherKind::Eventfd {
                                    event,
                                    auto_reset: true,
                                } => Some(event.clone()),
                                _ => None,
                            };
                            (watcher.cb.clone(), watcher.mutex.clone(), reset)
                        }
                        _ => continue,
                    }
                };
                if let Some(event) = reset {
                    event.reset();
                }
                let upump = Upump {
                    id,
                    shared: Arc::downgrade(shared),
                };
                let _guard = mutex.as_ref().map(|m| m.lock());
                let mut callback = cb.lock();
                (*callback)(&upump);
            }
        }
    }
}

impl std::fmt::Debug for UpumpMgr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("UpumpMgr")
            .field("watchers", &state.watchers.len())
            .finish()
    }
}

/// Handle to one watcher.
///
/// Handles are cheap to clone and do not own the watcher: `free` removes it
/// from the loop, and every watcher is released with its manager.
#[derive(Clone)]
pub struct Upump {
    id: u64,
    shared: Weak<LoopShared>,
}

impl Upump {
    fn with_state<R>(&self, f: impl FnOnce(&mut LoopState) -> R) -> Option<R> {
        let shared = self.shared.upgrade()?;
        let result = f(&mut shared.state.lock());
        shared.wakeup.signal();
        Some(result)
    }

    /// Starts the watcher.
    pub fn start(&self) {
        let id = self.id;
        self.with_state(|state| {
            if let Some(watcher) = state.watchers.get_mut(&id) {
                watcher.started = true;
                if let WatcherKind::Timer { first, next, .. } = &mut watcher.kind {
                    *next = Some(Instant::now() + *first);
                }
            }
        });
    }

    /// Stops the watcher without releasing it. Cancels a queued invocation.
    pub fn stop(&self) {
        let id = self.id;
        self.with_state(|state| {
            if let Some(watcher) = state.watchers.get_mut(&id) {
                watcher.started = false;
                watcher.pending = false;
                if let WatcherKind::Timer { next, .. } = &mut watcher.kind {
                    *next = None;
                }
            }
        });
    }

    /// Stops then starts the watcher, rearming timers.
    pub fn restart(&self) {
        self.stop();
        self.start();
    }

    /// Removes the watcher from its loop.
    pub fn free(&self) {
        let id = self.id;
        self.with_state(|state| {
            state.watchers.remove(&id);
        });
    }

    /// Sets or clears the mutual-exclusion handle taken around callbacks.
    pub fn set_mutex(&self, mutex: Option<Umutex>) {
        let id = self.id;
        self.with_state(|state| {
            if let Some(watcher) = state.watchers.get_mut(&id) {
                watcher.mutex = mutex;
            }
        });
    }

    pub(crate) fn block(&self) {
        let id = self.id;
        self.with_state(|state| {
            if let Some(watcher) = state.watchers.get_mut(&id) {
                watcher.blockers += 1;
                watcher.pending = false;
            }
        });
    }

    pub(crate) fn unblock(&self) {
        let id = self.id;
        self.with_state(|state| {
            if let Some(watcher) = state.watchers.get_mut(&id) {
                watcher.blockers = watcher.blockers.saturating_sub(1);
            }
        });
    }
}

impl std::fmt::Debug for Upump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upump").field("id", &self.id).finish()
    }
}
