//! `flow.` Attributes
//!
//! Flow definitions are hierarchical strings (`"block.mpegts."`, `"pic."`,
//! `"sound.s16."`): a definition matches a prefix when it starts with it,
//! which gives both exact and category matching.

use crate::error::{Error, Result};
use crate::udict::{UdictShorthand, UdictType, UdictValue};
use crate::uref::{Uref, UrefMgr};

impl Uref {
    /// The flow definition string.
    pub fn flow_def(&self) -> Result<Option<&str>> {
        match self.attr(UdictShorthand::FlowDef, UdictType::String)? {
            Some(UdictValue::String(s)) => Ok(Some(s)),
            _ => Ok(None),
        }
    }

    /// Sets the flow definition string.
    pub fn set_flow_def(&mut self, def: &str) -> Result<()> {
        self.set_attr(UdictShorthand::FlowDef, UdictValue::String(def.to_owned()))
    }

    /// Whether the flow definition starts with `prefix`.
    pub fn flow_def_matches(&self, prefix: &str) -> bool {
        matches!(self.flow_def(), Ok(Some(def)) if def.starts_with(prefix))
    }

    /// Checks the flow definition against `prefix`, failing with
    /// [`Error::Invalid`] on a mismatch.
    pub fn expect_flow_def(&self, prefix: &str) -> Result<&str> {
        match self.flow_def()? {
            Some(def) if def.starts_with(prefix) => Ok(def),
            _ => Err(Error::Invalid),
        }
    }

    /// The flow name.
    pub fn flow_name(&self) -> Result<Option<&str>> {
        match self.attr(UdictShorthand::FlowName, UdictType::String)? {
            Some(UdictValue::String(s)) => Ok(Some(s)),
            _ => Ok(None),
        }
    }

    /// Sets the flow name.
    pub fn set_flow_name(&mut self, name: &str) -> Result<()> {
        self.set_attr(UdictShorthand::FlowName, UdictValue::String(name.to_owned()))
    }

    /// The flow identifier.
    pub fn flow_id(&self) -> Result<Option<u64>> {
        match self.attr(UdictShorthand::FlowId, UdictType::Unsigned)? {
            Some(UdictValue::Unsigned(v)) => Ok(Some(*v)),
            _ => Ok(None),
        }
    }

    /// Sets the flow identifier.
    pub fn set_flow_id(&mut self, id: u64) -> Result<()> {
        self.set_attr(UdictShorthand::FlowId, UdictValue::Unsigned(id))
    }

    /// Marks a timeline discontinuity on this record.
    pub fn set_flow_discontinuity(&mut self) -> Result<()> {
        self.set_attr(UdictShorthand::FlowDiscontinuity, UdictValue::Void)
    }

    /// Whether the record marks a timeline discontinuity.
    pub fn flow_discontinuity(&self) -> bool {
        self.has_attr(UdictShorthand::FlowDiscontinuity)
    }

    /// Marks the payload as starting at a random access point.
    pub fn set_flow_random(&mut self) -> Result<()> {
        self.set_attr(UdictShorthand::FlowRandom, UdictValue::Void)
    }

    /// Whether the payload starts at a random access point.
    pub fn flow_random(&self) -> bool {
        self.has_attr(UdictShorthand::FlowRandom)
    }

    /// Marks the payload as corrupt.
    pub fn set_flow_error(&mut self) -> Result<()> {
        self.set_attr(UdictShorthand::FlowError, UdictValue::Void)
    }

    /// Whether the payload is marked corrupt.
    pub fn flow_error(&self) -> bool {
        self.has_attr(UdictShorthand::FlowError)
    }

    /// Accumulated flow latency, in 27 MHz ticks.
    pub fn flow_latency(&self) -> Result<Option<u64>> {
        match self.attr(UdictShorthand::FlowLatency, UdictType::Unsigned)? {
            Some(UdictValue::Unsigned(v)) => Ok(Some(*v)),
            _ => Ok(None),
        }
    }

    /// Sets the accumulated flow latency.
    pub fn set_flow_latency(&mut self, latency: u64) -> Result<()> {
        self.set_attr(UdictShorthand::FlowLatency, UdictValue::Unsigned(latency))
    }
}

/// Allocates a flow definition record.
pub fn alloc_flow_def(mgr: &UrefMgr, def: &str) -> Result<Uref> {
    let mut uref = mgr.alloc();
    uref.set_flow_def(def)?;
    Ok(uref)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_def_prefix_match() {
        let mgr = UrefMgr::default();
        let flow_def = alloc_flow_def(&mgr, "block.mpegts.").unwrap();
        assert!(flow_def.flow_def_matches("block."));
        assert!(flow_def.flow_def_matches("block.mpegts."));
        assert!(!flow_def.flow_def_matches("pic."));
    }

    #[test]
    fn test_expect_flow_def() {
        let mgr = UrefMgr::default();
        let flow_def = alloc_flow_def(&mgr, "sound.s16.").unwrap();
        assert_eq!(flow_def.expect_flow_def("sound."), Ok("sound.s16."));
        assert_eq!(flow_def.expect_flow_def("block."), Err(Error::Invalid));
    }

    #[test]
    fn test_void_markers() {
        let mut uref = Uref::new();
        assert!(!uref.flow_discontinuity());
        uref.set_flow_discontinuity().unwrap();
        assert!(uref.flow_discontinuity());
    }
}
