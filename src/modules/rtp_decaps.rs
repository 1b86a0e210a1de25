//! RTP Decapsulator
//!
//! Strips the RTP header from `block.rtp.` records through a cheap splice
//! and tracks sequence numbers: a gap marks the following record with
//! `flow.discontinuity` and feeds the packets-lost counter. CSRC entries,
//! header extensions and padding are honoured.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ubuf::Ubuf;
use crate::upipe::{signature, Command, HelperOutput, PipeOps, Upipe};
use crate::uprobe::Uprobe;
use crate::upump::Upump;
use crate::uref::Uref;

use super::RTP_HEADER_SIZE;

/// Module signature.
pub const RTP_DECAPS_SIGNATURE: u32 = signature(*b"rtpd");

/// RTP decapsulator pipe.
pub struct UpipeRtpDecaps;

impl UpipeRtpDecaps {
    /// Allocates a decapsulator; the returned counter tracks lost packets.
    pub fn new(probe: Uprobe) -> (Upipe, Arc<AtomicU64>) {
        let lost = Arc::new(AtomicU64::new(0));
        let pipe = Upipe::new(
            RTP_DECAPS_SIGNATURE,
            probe,
            RtpDecaps {
                output: HelperOutput::new(),
                last_seq: None,
                lost: lost.clone(),
            },
        );
        (pipe, lost)
    }
}

struct RtpDecaps {
    output: HelperOutput,
    last_seq: Option<u16>,
    lost: Arc<AtomicU64>,
}

impl RtpDecaps {
    /// Parses the header and returns `(header_size, padding, sequence)`.
    fn parse_header(uref: &Uref) -> Result<(usize, usize, u16)> {
        let block = uref.block()?;
        let mut scratch = [0u8; RTP_HEADER_SIZE];
        let header = block.peek(0, &mut scratch)?;

        if header[0] >> 6 != 2 {
            return Err(Error::Invalid);
        }
        let csrc_count = usize::from(header[0] & 0x0f);
        let has_extension = header[0] & 0x10 != 0;
        let has_padding = header[0] & 0x20 != 0;
        let seq = u16::from_be_bytes([header[2], header[3]]);

        let mut header_size = RTP_HEADER_SIZE + 4 * csrc_count;
        if has_extension {
            let mut ext = [0u8; 4];
            block.extract(header_size, &mut ext)?;
            let words = usize::from(u16::from_be_bytes([ext[2], ext[3]]));
            header_size += 4 + 4 * words;
        }
        let padding = if has_padding {
            let mut pad = [0u8; 1];
            block.extract(block.size() - 1, &mut pad)?;
            usize::from(pad[0])
        } else {
            0
        };
        if header_size + padding > block.size() {
            return Err(Error::Invalid);
        }
        Ok((header_size, padding, seq))
    }
}

impl PipeOps for RtpDecaps {
    fn input(&mut self, pipe: &Upipe, mut uref: Uref, upump: Option<&Upump>) {
        let (header_size, padding, seq) = match Self::parse_header(&uref) {
            Ok(parsed) => parsed,
            Err(_) => {
                pipe.warn("dropping malformed RTP packet");
                return;
            }
        };

        let payload = {
            let block = match uref.block() {
                Ok(block) => block,
                Err(_) => return,
            };
            let len = block.size() - header_size - padding;
            match block.splice(header_size, len) {
                Ok(payload) => payload,
                Err(_) => {
                    pipe.throw_fatal(Error::Alloc);
                    return;
                }
            }
        };
        uref.attach_ubuf(Ubuf::Block(payload));

        if let Some(last) = self.last_seq {
            let expected = last.wrapping_add(1);
            if seq != expected {
                let gap = u64::from(seq.wrapping_sub(expected));
                self.lost.fetch_add(gap, Ordering::SeqCst);
                let _ = uref.set_flow_discontinuity();
                pipe.warn(format!("{gap} RTP packets lost"));
            }
        }
        self.last_seq = Some(seq);

        self.output.output(uref, upump);
    }

    fn control(&mut self, pipe: &Upipe, command: Command<'_>) -> Result<()> {
        match command {
            Command::SetFlowDef(flow_def) => {
                flow_def.expect_flow_def("block.rtp.")?;
                let mut flow_def = flow_def.dup();
                flow_def.set_flow_def("block.")?;
                self.output.store_flow_def(pipe, flow_def);
                Ok(())
            }
            other => self.output.control(pipe, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ubuf::UbufBlockMgr;
    use crate::umem::UmemMgr;

    fn rtp_packet(seq: u16, payload: &[u8]) -> Uref {
        let mut data = vec![0x80, 33];
        data.extend_from_slice(&seq.to_be_bytes());
        data.extend_from_slice(&[0; 8]);
        data.extend_from_slice(payload);
        let block = UbufBlockMgr::new(UmemMgr::new()).alloc_from(&data);
        let mut uref = Uref::new();
        uref.attach_ubuf(Ubuf::Block(block));
        uref
    }

    #[test]
    fn test_strips_header() {
        let (pipe, _) = UpipeRtpDecaps::new(Uprobe::null());
        let (sink, received) = crate::modules::UpipeNull::new(Uprobe::null());
        pipe.set_output(Some(sink)).unwrap();
        pipe.input(rtp_packet(1, &[0xaa, 0xbb]), None);
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sequence_gap_counts_losses() {
        let (pipe, lost) = UpipeRtpDecaps::new(Uprobe::null());
        pipe.input(rtp_packet(1, &[0]), None);
        pipe.input(rtp_packet(42, &[0]), None);
        assert_eq!(lost.load(Ordering::SeqCst), 40);
    }

    #[test]
    fn test_malformed_version_dropped() {
        let (pipe, _) = UpipeRtpDecaps::new(Uprobe::null());
        let (sink, received) = crate::modules::UpipeNull::new(Uprobe::null());
        pipe.set_output(Some(sink)).unwrap();
        let mut uref = Uref::new();
        let block = UbufBlockMgr::new(UmemMgr::new()).alloc_from(&[0u8; 16]);
        uref.attach_ubuf(Ubuf::Block(block));
        pipe.input(uref, None);
        assert_eq!(received.load(Ordering::SeqCst), 0);
    }
}
