//! Transport-Stream Synchroniser
//!
//! Locks onto the 0x47 sync bytes of a raw byte stream and outputs one
//! aligned 188-octet packet per record. Alignment is acquired when two
//! consecutive sync positions check out, and a packet is only released once
//! the octet behind it is known, so a truncated tail is never mistaken for
//! a packet. `SYNC-ACQUIRED` / `SYNC-LOST` are thrown on edges.
//!
//! Accepts `block.` flows and outputs `block.mpegts.`.

use crate::error::{Error, Result};
use crate::ubuf::{Ubuf, UbufBlock};
use crate::upipe::{signature, Command, HelperOutput, HelperSync, PipeOps, Upipe};
use crate::uprobe::Uprobe;
use crate::upump::Upump;
use crate::uref::Uref;

use super::{TS_PACKET_SIZE, TS_SYNC_BYTE};

/// Module signature.
pub const TS_SYNC_SIGNATURE: u32 = signature(*b"tsyn");

/// Transport-stream synchroniser pipe.
pub struct UpipeTsSync;

impl UpipeTsSync {
    /// Allocates a synchroniser.
    pub fn new(probe: Uprobe) -> Upipe {
        Upipe::new(
            TS_SYNC_SIGNATURE,
            probe,
            TsSync {
                output: HelperOutput::new(),
                sync: HelperSync::new(),
                acc: None,
                template: None,
            },
        )
    }
}

struct TsSync {
    output: HelperOutput,
    sync: HelperSync,
    /// Accumulated not-yet-aligned input.
    acc: Option<UbufBlock>,
    /// Latest input record, cloned for outgoing packets.
    template: Option<Uref>,
}

impl TsSync {
    fn byte_at(acc: &UbufBlock, offset: usize) -> Option<u8> {
        let mut scratch = [0u8; 1];
        acc.peek(offset, &mut scratch).ok().map(|b| b[0])
    }

    /// Looks for two consecutive sync positions; on success trims the junk
    /// in front of the first one.
    fn acquire(&mut self, pipe: &Upipe) -> bool {
        enum Outcome {
            /// Everything buffered is junk.
            Junk,
            /// Unconfirmed candidate at this offset; keep the tail.
            Keep(usize),
            /// Confirmed sync at this offset.
            Lock(usize),
        }

        let outcome = {
            let Some(acc) = &self.acc else {
                return false;
            };
            let mut pos = 0;
            loop {
                if acc.scan(&mut pos, TS_SYNC_BYTE).is_err() {
                    break Outcome::Junk;
                }
                if acc.size() < pos + TS_PACKET_SIZE + 1 {
                    break Outcome::Keep(pos);
                }
                if Self::byte_at(acc, pos + TS_PACKET_SIZE) == Some(TS_SYNC_BYTE) {
                    break Outcome::Lock(pos);
                }
                pos += 1;
            }
        };
        let trim = |acc: &mut Option<UbufBlock>, pos: usize| {
            if pos > 0 {
                if let Some(acc) = acc {
                    let _ = acc.resize(-(pos as isize), 0);
                }
            }
        };
        match outcome {
            Outcome::Junk => {
                self.acc = None;
                false
            }
            Outcome::Keep(pos) => {
                trim(&mut self.acc, pos);
                false
            }
            Outcome::Lock(pos) => {
                trim(&mut self.acc, pos);
                self.sync.sync_acquired(pipe);
                true
            }
        }
    }

    /// Emits every confirmed packet at the head of the buffer.
    fn drain(&mut self, pipe: &Upipe, upump: Option<&Upump>) {
        loop {
            if !self.sync.is_acquired() && !self.acquire(pipe) {
                return;
            }
            let Some(acc) = &mut self.acc else {
                return;
            };
            // A packet is released once the octet behind it arrived.
            if acc.size() < TS_PACKET_SIZE + 1 {
                return;
            }
            if Self::byte_at(acc, 0) != Some(TS_SYNC_BYTE) {
                self.sync.sync_lost(pipe);
                continue;
            }
            let packet = match acc.splice(0, TS_PACKET_SIZE) {
                Ok(packet) => packet,
                Err(_) => {
                    pipe.throw_fatal(Error::Alloc);
                    return;
                }
            };
            let _ = acc.resize(-(TS_PACKET_SIZE as isize), 0);

            let mut uref = self.template.as_ref().map(Uref::dup).unwrap_or_default();
            uref.attach_ubuf(Ubuf::Block(packet));
            self.output.output(uref, upump);
        }
    }
}

impl PipeOps for TsSync {
    fn input(&mut self, pipe: &Upipe, mut uref: Uref, upump: Option<&Upump>) {
        let Some(Ubuf::Block(block)) = uref.detach_ubuf() else {
            pipe.warn("dropping record without block payload");
            return;
        };
        match &mut self.acc {
            Some(acc) => {
                if acc.append(block).is_err() {
                    pipe.throw_fatal(Error::Alloc);
                    return;
                }
            }
            None => self.acc = Some(block),
        }
        self.template = Some(uref);
        self.drain(pipe, upump);
    }

    fn control(&mut self, pipe: &Upipe, command: Command<'_>) -> Result<()> {
        match command {
            Command::SetFlowDef(flow_def) => {
                flow_def.expect_flow_def("block.")?;
                let mut flow_def = flow_def.dup();
                flow_def.set_flow_def("block.mpegts.")?;
                self.output.store_flow_def(pipe, flow_def);
                Ok(())
            }
            other => self.output.control(pipe, other),
        }
    }
}
