//! Cross-thread transfer integration: commands execute on the target
//! thread, whitelisted events surface on the source thread.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;
use upipe::upipe::{signature, Command, PipeOps, Upipe};
use upipe::uprobe::{Event, EventKind, ProbeOps, UprobePthreadUpumpMgr, Uprobe};
use upipe::upump::{Upump, UpumpMgr};
use upipe::uref::Uref;
use upipe::xfer::{XferMgr, XferProbe};
use upipe::Result;

const TEST_SIG: u32 = signature(*b"tstp");

/// Test pipe recording which thread served `SET-URI`, then signalling the
/// end of its source.
struct RecordingSource {
    uri_thread: Arc<Mutex<Option<ThreadId>>>,
}

impl PipeOps for RecordingSource {
    fn input(&mut self, _pipe: &Upipe, _uref: Uref, _upump: Option<&Upump>) {}

    fn control(&mut self, pipe: &Upipe, command: Command<'_>) -> Result<()> {
        match command {
            Command::SetUri(_) => {
                *self.uri_thread.lock() = Some(std::thread::current().id());
                let _ = pipe.throw(&mut Event::SourceEnd);
                Ok(())
            }
            _ => Err(upipe::Error::Unhandled),
        }
    }
}

/// Probe recording the thread each event surfaces on.
struct ThreadRecorder {
    seen: Arc<Mutex<Vec<(EventKind, ThreadId)>>>,
    on_source_end: UpumpMgr,
}

impl ProbeOps for ThreadRecorder {
    fn throw(&self, _pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
        self.seen
            .lock()
            .push((event.kind(), std::thread::current().id()));
        if matches!(event, Event::SourceEnd) {
            self.on_source_end.stop_all();
        }
        Ok(())
    }
}

#[test]
fn control_runs_remotely_and_events_come_home() {
    let main_thread = std::thread::current().id();

    // Worker thread with its own loop, registered on a thread-local probe.
    let (_pthread_probe, handle) = UprobePthreadUpumpMgr::new(Uprobe::null());
    let (xfer_mgr, worker) = XferMgr::with_worker(16, Some(handle)).unwrap();
    let worker_thread = worker.thread().id();

    // Source-thread loop receiving forwarded events.
    let source_mgr = UpumpMgr::new().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Uprobe::new(ThreadRecorder {
        seen: seen.clone(),
        on_source_end: source_mgr.clone(),
    });
    let inner_probe = XferProbe::new(
        recorder,
        Uprobe::null(),
        &source_mgr,
        &[EventKind::SourceEnd],
    )
    .unwrap();

    let uri_thread = Arc::new(Mutex::new(None));
    let inner = Upipe::new(
        TEST_SIG,
        inner_probe,
        RecordingSource {
            uri_thread: uri_thread.clone(),
        },
    );

    let proxy = xfer_mgr.alloc(Uprobe::null(), inner).unwrap();
    proxy.set_uri("toto").unwrap();

    // Safety net so a broken transfer fails instead of hanging.
    let watchdog_mgr = source_mgr.clone();
    let watchdog = source_mgr.alloc_timer(Duration::from_secs(5), Duration::ZERO, move |_| {
        watchdog_mgr.stop_all();
    });
    watchdog.start();
    source_mgr.run().unwrap();

    // The inner pipe's control ran on the worker thread.
    let served_on = uri_thread.lock().expect("SET-URI never executed");
    assert_eq!(served_on, worker_thread);
    assert_ne!(served_on, main_thread);

    // The SOURCE-END it threw surfaced on this thread.
    let events = seen.lock().clone();
    assert!(events.contains(&(EventKind::SourceEnd, main_thread)));

    drop(proxy);
    std::thread::sleep(Duration::from_millis(50));
    xfer_mgr.shutdown();
    worker.join().unwrap();
}

#[test]
fn proxy_release_reaches_the_target_thread() {
    let (xfer_mgr, worker) = XferMgr::with_worker(8, None).unwrap();

    let dead = Arc::new(Mutex::new(Vec::new()));
    struct DeadRecorder {
        dead: Arc<Mutex<Vec<ThreadId>>>,
    }
    impl ProbeOps for DeadRecorder {
        fn throw(&self, _pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
            if matches!(event, Event::Dead) {
                self.dead.lock().push(std::thread::current().id());
            }
            Ok(())
        }
    }

    struct Inert;
    impl PipeOps for Inert {
        fn input(&mut self, _: &Upipe, _: Uref, _: Option<&Upump>) {}
        fn control(&mut self, _: &Upipe, _: Command<'_>) -> Result<()> {
            Ok(())
        }
    }

    let inner = Upipe::new(
        TEST_SIG,
        Uprobe::new(DeadRecorder { dead: dead.clone() }),
        Inert,
    );
    let proxy = xfer_mgr.alloc(Uprobe::null(), inner).unwrap();

    drop(proxy);
    // Give the worker a turn to process the release message.
    std::thread::sleep(Duration::from_millis(100));

    let dead = dead.lock().clone();
    assert_eq!(dead.len(), 1, "inner pipe was not released exactly once");
    assert_eq!(dead[0], worker.thread().id());

    xfer_mgr.shutdown();
    worker.join().unwrap();
}
