//! Align a transport stream and keep one PID.
//!
//! Feeds a file (or a synthetic stream) through source → ts_sync →
//! ts_pid_filter → sink on one event loop, chunk by chunk, and reports how
//! many packets survived the filter.
//!
//! ```text
//! cargo run --example ts-filter -- --pid 256 capture.ts
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use upipe::modules::{UpipeNull, UpipeTsPidFilter, UpipeTsSync, TS_PACKET_SIZE, TS_SYNC_BYTE};
use upipe::ubuf::{Ubuf, UbufBlockMgr};
use upipe::umem::UmemMgr;
use upipe::uprobe::{LogLevel, UprobeLog, UprobePrefix, Uprobe};
use upipe::upump::UpumpMgr;
use upipe::uref::{alloc_flow_def, Uref, UrefMgr};

/// Octets fed to the pipeline per loop turn.
const CHUNK_SIZE: usize = 10 * TS_PACKET_SIZE;

#[derive(Parser)]
#[command(about = "Align a transport stream and keep one PID")]
struct Args {
    /// PID to keep.
    #[arg(long, default_value_t = 0x100)]
    pid: u16,

    /// Transport-stream file; synthetic packets when omitted.
    file: Option<PathBuf>,
}

fn synthetic_stream(kept_pid: u16) -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..200u16 {
        let pid = if i % 3 == 0 { kept_pid } else { 0x1fff };
        let mut packet = vec![0u8; TS_PACKET_SIZE];
        packet[0] = TS_SYNC_BYTE;
        packet[1] = (pid >> 8) as u8 & 0x1f;
        packet[2] = pid as u8;
        packet[3] = 0x10;
        data.extend(packet);
    }
    data
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let data = match &args.file {
        Some(path) => std::fs::read(path).with_context(|| format!("reading {}", path.display()))?,
        None => synthetic_stream(args.pid),
    };

    let log = UprobeLog::new(LogLevel::Debug, Uprobe::null());
    let sync = UpipeTsSync::new(UprobePrefix::new("sync", log.clone()));
    let filter = UpipeTsPidFilter::new(UprobePrefix::new("pidf", log.clone()));
    let (sink, received) = UpipeNull::new(UprobePrefix::new("sink", log));

    filter.set_output(Some(sink))?;
    UpipeTsPidFilter::add_pid(&filter, args.pid)?;
    sync.set_output(Some(filter))?;

    let uref_mgr = UrefMgr::default();
    let flow_def = alloc_flow_def(&uref_mgr, "block.")?;
    sync.set_flow_def(&flow_def)?;

    // Feed one chunk per timer tick; stop the loop at end of stream.
    let upump_mgr = UpumpMgr::new()?;
    let block_mgr = UbufBlockMgr::new(UmemMgr::new());
    let stop_mgr = upump_mgr.clone();
    let mut offset = 0;
    let total_len = data.len();
    let source = upump_mgr.alloc_timer(Duration::ZERO, Duration::from_millis(1), move |pump| {
        if offset >= data.len() {
            stop_mgr.stop_all();
            return;
        }
        let end = (offset + CHUNK_SIZE).min(data.len());
        let mut uref = Uref::new();
        uref.attach_ubuf(Ubuf::Block(block_mgr.alloc_from(&data[offset..end])));
        offset = end;
        sync.input(uref, Some(pump));
    });
    source.start();
    upump_mgr.run()?;

    println!(
        "kept {} packets on PID {:#x} out of {} input octets",
        received.load(Ordering::SeqCst),
        args.pid,
        total_len,
    );
    Ok(())
}
