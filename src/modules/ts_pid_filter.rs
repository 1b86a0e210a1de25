//! Transport-Stream PID Filter
//!
//! Forwards the `block.mpegts.` packets whose PID is enabled and drops the
//! rest. PIDs are toggled through module-local commands gated by the module
//! signature.

use crate::error::{Error, Result};
use crate::upipe::{signature, Command, HelperOutput, PipeOps, Upipe};
use crate::uprobe::Uprobe;
use crate::upump::Upump;
use crate::uref::Uref;

use super::TS_HEADER_SIZE;

/// Module signature.
pub const TS_PID_FILTER_SIGNATURE: u32 = signature(*b"tspf");

/// Highest PID plus one.
const MAX_PIDS: usize = 8192;

/// Module-local commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsPidFilterCommand {
    /// Enables a PID.
    AddPid(u16),
    /// Disables a PID.
    DelPid(u16),
}

/// Transport-stream PID filter pipe.
pub struct UpipeTsPidFilter;

impl UpipeTsPidFilter {
    /// Allocates a filter with every PID disabled.
    pub fn new(probe: Uprobe) -> Upipe {
        Upipe::new(
            TS_PID_FILTER_SIGNATURE,
            probe,
            TsPidFilter {
                output: HelperOutput::new(),
                enabled_pids: [0u8; MAX_PIDS / 8],
            },
        )
    }

    /// Enables `pid` on a filter pipe.
    pub fn add_pid(pipe: &Upipe, pid: u16) -> Result<()> {
        let mut command = TsPidFilterCommand::AddPid(pid);
        pipe.control(Command::Local {
            signature: TS_PID_FILTER_SIGNATURE,
            args: &mut command,
        })
    }

    /// Disables `pid` on a filter pipe.
    pub fn del_pid(pipe: &Upipe, pid: u16) -> Result<()> {
        let mut command = TsPidFilterCommand::DelPid(pid);
        pipe.control(Command::Local {
            signature: TS_PID_FILTER_SIGNATURE,
            args: &mut command,
        })
    }
}

struct TsPidFilter {
    output: HelperOutput,
    enabled_pids: [u8; MAX_PIDS / 8],
}

impl TsPidFilter {
    fn pid_of(uref: &Uref) -> Result<u16> {
        let block = uref.block()?;
        let mut scratch = [0u8; TS_HEADER_SIZE];
        let header = block.peek(0, &mut scratch)?;
        Ok(u16::from(header[1] & 0x1f) << 8 | u16::from(header[2]))
    }

    fn is_enabled(&self, pid: u16) -> bool {
        self.enabled_pids[usize::from(pid) / 8] & (1 << (pid & 0x7)) != 0
    }
}

impl PipeOps for TsPidFilter {
    fn input(&mut self, pipe: &Upipe, uref: Uref, upump: Option<&Upump>) {
        let pid = match Self::pid_of(&uref) {
            Ok(pid) => pid,
            Err(_) => {
                pipe.throw_fatal(Error::Alloc);
                return;
            }
        };
        if self.is_enabled(pid) {
            self.output.output(uref, upump);
        }
    }

    fn control(&mut self, pipe: &Upipe, command: Command<'_>) -> Result<()> {
        match command {
            Command::SetFlowDef(flow_def) => {
                flow_def.expect_flow_def("block.mpegts.")?;
                self.output.store_flow_def(pipe, flow_def.dup());
                Ok(())
            }
            Command::Local { signature, args } => {
                if signature != TS_PID_FILTER_SIGNATURE {
                    return Err(Error::Unhandled);
                }
                let command = args
                    .downcast_ref::<TsPidFilterCommand>()
                    .ok_or(Error::Invalid)?;
                match *command {
                    TsPidFilterCommand::AddPid(pid) => {
                        self.enabled_pids[usize::from(pid) / 8] |= 1 << (pid & 0x7);
                    }
                    TsPidFilterCommand::DelPid(pid) => {
                        self.enabled_pids[usize::from(pid) / 8] &= !(1 << (pid & 0x7));
                    }
                }
                Ok(())
            }
            other => self.output.control(pipe, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ubuf::{Ubuf, UbufBlockMgr};
    use crate::umem::UmemMgr;
    use crate::modules::{TS_PACKET_SIZE, TS_SYNC_BYTE};
    use std::sync::atomic::Ordering;

    fn ts_packet(pid: u16) -> Uref {
        let mut data = vec![0u8; TS_PACKET_SIZE];
        data[0] = TS_SYNC_BYTE;
        data[1] = (pid >> 8) as u8 & 0x1f;
        data[2] = pid as u8;
        data[3] = 0x10;
        let block = UbufBlockMgr::new(UmemMgr::new()).alloc_from(&data);
        let mut uref = Uref::new();
        uref.attach_ubuf(Ubuf::Block(block));
        uref
    }

    #[test]
    fn test_filters_by_pid() {
        let pipe = UpipeTsPidFilter::new(Uprobe::null());
        let (sink, received) = crate::modules::UpipeNull::new(Uprobe::null());
        pipe.set_output(Some(sink)).unwrap();

        UpipeTsPidFilter::add_pid(&pipe, 68).unwrap();
        pipe.input(ts_packet(68), None);
        pipe.input(ts_packet(69), None);
        pipe.input(ts_packet(68), None);
        assert_eq!(received.load(Ordering::SeqCst), 2);

        UpipeTsPidFilter::del_pid(&pipe, 68).unwrap();
        pipe.input(ts_packet(68), None);
        assert_eq!(received.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let pipe = UpipeTsPidFilter::new(Uprobe::null());
        let mut command = TsPidFilterCommand::AddPid(1);
        let result = pipe.control(Command::Local {
            signature: signature(*b"evil"),
            args: &mut command,
        });
        assert_eq!(result, Err(Error::Unhandled));
    }

    #[test]
    fn test_requires_aligned_flow() {
        let pipe = UpipeTsPidFilter::new(Uprobe::null());
        let mgr = crate::uref::UrefMgr::default();
        let raw = crate::uref::alloc_flow_def(&mgr, "block.").unwrap();
        assert_eq!(pipe.set_flow_def(&raw), Err(Error::Invalid));
        let aligned = crate::uref::alloc_flow_def(&mgr, "block.mpegts.").unwrap();
        pipe.set_flow_def(&aligned).unwrap();
    }
}
