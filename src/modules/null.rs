//! Counting Sink
//!
//! Accepts any flow and discards every record, counting them. The endpoint
//! of test pipelines and a drain for unwanted split outputs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::upipe::{signature, Command, PipeOps, Upipe};
use crate::uprobe::Uprobe;
use crate::upump::Upump;
use crate::uref::Uref;

/// Module signature.
pub const NULL_SIGNATURE: u32 = signature(*b"null");

/// Counting sink pipe.
pub struct UpipeNull;

impl UpipeNull {
    /// Allocates a sink; the returned counter tracks received records.
    pub fn new(probe: Uprobe) -> (Upipe, Arc<AtomicU64>) {
        let received = Arc::new(AtomicU64::new(0));
        let pipe = Upipe::new(
            NULL_SIGNATURE,
            probe,
            Null {
                received: received.clone(),
            },
        );
        (pipe, received)
    }
}

struct Null {
    received: Arc<AtomicU64>,
}

impl PipeOps for Null {
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
