//! Records
//!
//! A [`Uref`] is one unit of flow through a pipeline: an optional payload
//! buffer, an optional attribute dictionary and a pre-parsed clock
//! sub-record. Duplication copies the three handles only; payloads and
//! dictionaries are shared until someone writes.
//!
//! Attribute setters detach a shared dictionary before mutating, so a
//! duplicate never observes changes made through another record.

mod clock;
mod flow;
mod pic;
mod sound;

pub use clock::{UrefDate, UrefDateType, UrefFlags};
pub use flow::alloc_flow_def;

use std::sync::Arc;

use crate::error::Result;
use crate::ubuf::Ubuf;
use crate::udict::{KeyRef, Udict, UdictKey, UdictMgr, UdictType, UdictValue};

/// One record flowing through the pipeline.
#[derive(Debug, Default)]
pub struct Uref {
    ubuf: Option<Ubuf>,
    udict: Option<Arc<Udict>>,
    clock: clock::UrefClock,
    mgr: Option<UrefMgr>,
}

impl Uref {
    /// Creates an empty record without a manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicates the record, sharing dictionary and payload.
    pub fn dup(&self) -> Uref {
        Uref {
            ubuf: self.ubuf.as_ref().map(Ubuf::dup),
            udict: self.udict.clone(),
            clock: self.clock,
            mgr: self.mgr.clone(),
        }
    }

    /// Attaches a payload buffer, returning the previous one.
    pub fn attach_ubuf(&mut self, ubuf: Ubuf) -> Option<Ubuf> {
        self.ubuf.replace(ubuf)
    }

    /// Detaches the payload buffer.
    pub fn detach_ubuf(&mut self) -> Option<Ubuf> {
        self.ubuf.take()
    }

    /// Payload buffer, if any.
    pub fn ubuf(&self) -> Option<&Ubuf> {
        self.ubuf.as_ref()
    }

    /// Mutable payload buffer, if any.
    pub fn ubuf_mut(&mut self) -> Option<&mut Ubuf> {
        self.ubuf.as_mut()
    }

    /// Block payload, or [`Error::Invalid`](crate::Error) for other shapes.
    pub fn block(&self) -> Result<&crate::ubuf::UbufBlock> {
        self.ubuf
            .as_ref()
            .ok_or(crate::Error::Invalid)?
            .as_block()
    }

    /// Mutable block payload.
    pub fn block_mut(&mut self) -> Result<&mut crate::ubuf::UbufBlock> {
        self.ubuf
            .as_mut()
            .ok_or(crate::Error::Invalid)?
            .as_block_mut()
    }

    /// Attribute dictionary, if any.
    pub fn udict(&self) -> Option<&Udict> {
        self.udict.as_deref()
    }

    /// Looks up an attribute.
    pub fn attr<'a, 'k>(
        &'a self,
        key: impl Into<KeyRef<'k>>,
        vtype: UdictType,
    ) -> Result<Option<&'a UdictValue>> {
        match &self.udict {
            Some(dict) => dict.get(key, vtype),
            None => Ok(None),
        }
    }

    /// Sets an attribute, detaching a shared dictionary first.
    pub fn set_attr(&mut self, key: impl Into<UdictKey>, value: UdictValue) -> Result<()> {
        self.udict_mut().set(key, value)
    }

    /// Removes an attribute. Returns whether it was present.
    pub fn delete_attr<'k>(&mut self, key: impl Into<KeyRef<'k>>) -> bool {
        match &mut self.udict {
            Some(dict) => Arc::make_mut(dict).delete(key),
            None => false,
        }
    }

    /// Whether a void attribute is present.
    pub fn has_attr<'k>(&self, key: impl Into<KeyRef<'k>>) -> bool {
        matches!(self.attr(key, UdictType::Void), Ok(Some(_)))
    }

    fn udict_mut(&mut self) -> &mut Udict {
        let dict = self.udict.get_or_insert_with(|| {
            let dict = match &self.mgr {
                Some(mgr) => mgr.inner.udict_mgr.alloc(),
                None => Udict::new(),
            };
            Arc::new(dict)
        });
        Arc::make_mut(dict)
    }
}

struct UrefMgrInner {
    udict_mgr: UdictMgr,
}

/// Shared manager producing records whose dictionaries come from a pooled
/// dictionary manager.
#[derive(Clone)]
pub struct UrefMgr {
    inner: Arc<UrefMgrInner>,
}

impl UrefMgr {
    /// Creates a manager around a dictionary manager.
    pub fn new(udict_mgr: UdictMgr) -> Self {
        Self {
            inner: Arc::new(UrefMgrInner { udict_mgr }),
        }
    }

    /// Allocates an empty record.
    pub fn alloc(&self) -> Uref {
        Uref {
            ubuf: None,
            udict: None,
            clock: clock::UrefClock::default(),
            mgr: Some(self.clone()),
        }
    }
}

impl Default for UrefMgr {
    fn default() -> Self {
        Self::new(UdictMgr::new())
    }
}

impl std::fmt::Debug for UrefMgr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrefMgr").finish()
    }
}
