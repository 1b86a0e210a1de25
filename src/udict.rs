//! Attribute Dictionaries
//!
//! A [`Udict`] is an ordered mapping of `(key, type)` to a typed value,
//! carried by every record flowing through a pipeline. Iteration follows
//! insertion order, lookup is linear; typical dictionaries hold a few dozen
//! entries so ordering beats hashing here.
//!
//! Well-known attributes (the reserved `flow.`, `pic.` and `sound.`
//! namespaces) are addressed through [`UdictShorthand`] keys, which compress
//! storage and make type mismatches unrepresentable at the call site.
//! Free-form attributes use UTF-8 string names.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Default entry capacity reserved for a fresh dictionary.
const DEFAULT_CAPACITY: usize = 16;

/// Default number of recycled entry vectors kept by a manager.
const DEFAULT_POOL_DEPTH: usize = 64;

/// A signed rational number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Urational {
    /// Numerator.
    pub num: i64,
    /// Denominator.
    pub den: u64,
}

impl fmt::Display for Urational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Type tag of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdictType {
    /// Opaque byte run.
    Opaque,
    /// UTF-8 string.
    String,
    /// Presence marker without a payload.
    Void,
    /// Boolean.
    Bool,
    /// 8-bit unsigned.
    SmallUnsigned,
    /// 8-bit signed.
    SmallSigned,
    /// 64-bit unsigned.
    Unsigned,
    /// 64-bit signed.
    Signed,
    /// IEEE-754 double.
    Float,
    /// Signed rational.
    Rational,
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum UdictValue {
    /// Opaque byte run.
    Opaque(Vec<u8>),
    /// UTF-8 string.
    String(String),
    /// Presence marker.
    Void,
    /// Boolean.
    Bool(bool),
    /// 8-bit unsigned.
    SmallUnsigned(u8),
    /// 8-bit signed.
    SmallSigned(i8),
    /// 64-bit unsigned.
    Unsigned(u64),
    /// 64-bit signed.
    Signed(i64),
    /// IEEE-754 double.
    Float(f64),
    /// Signed rational.
    Rational(Urational),
}

impl UdictValue {
    /// Returns the type tag of this value.
    pub fn vtype(&self) -> UdictType {
        match self {
            UdictValue::Opaque(_) => UdictType::Opaque,
            UdictValue::String(_) => UdictType::String,
            UdictValue::Void => UdictType::Void,
            UdictValue::Bool(_) => UdictType::Bool,
            UdictValue::SmallUnsigned(_) => UdictType::SmallUnsigned,
            UdictValue::SmallSigned(_) => UdictType::SmallSigned,
            UdictValue::Unsigned(_) => UdictType::Unsigned,
            UdictValue::Signed(_) => UdictType::Signed,
            UdictValue::Float(_) => UdictType::Float,
            UdictValue::Rational(_) => UdictType::Rational,
        }
    }
}

impl fmt::Display for UdictValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UdictValue::Opaque(bytes) => write!(f, "[{} octets]", bytes.len()),
            UdictValue::String(s) => write!(f, "\"{s}\""),
            UdictValue::Void => write!(f, "[void]"),
            UdictValue::Bool(b) => write!(f, "{b}"),
            UdictValue::SmallUnsigned(v) => write!(f, "{v}"),
            UdictValue::SmallSigned(v) => write!(f, "{v}"),
            UdictValue::Unsigned(v) => write!(f, "{v}"),
            UdictValue::Signed(v) => write!(f, "{v}"),
            UdictValue::Float(v) => write!(f, "{v}"),
            UdictValue::Rational(r) => write!(f, "{r}"),
        }
    }
}

macro_rules! shorthands {
    ($($variant:ident => ($name:literal, $vtype:ident),)*) => {
        /// Pre-declared shorthand keys for the reserved attribute namespaces.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum UdictShorthand {
            $(
                #[doc = $name]
                $variant,
            )*
        }

        impl UdictShorthand {
            /// The full attribute name this shorthand stands for.
            pub fn name(self) -> &'static str {
                match self {
                    $(UdictShorthand::$variant => $name,)*
                }
            }

            /// The value type this shorthand carries.
            pub fn vtype(self) -> UdictType {
                match self {
                    $(UdictShorthand::$variant => UdictType::$vtype,)*
                }
            }
        }
    };
}

shorthands! {
    FlowDef => ("flow.def", String),
    FlowName => ("flow.name", String),
    FlowId => ("flow.id", Unsigned),
    FlowDiscontinuity => ("flow.discontinuity", Void),
    FlowRandom => ("flow.random", Void),
    FlowError => ("flow.error", Void),
    FlowLatency => ("flow.latency", Unsigned),
    PicHsize => ("pic.hsize", Unsigned),
    PicVsize => ("pic.vsize", Unsigned),
    PicHposition => ("pic.hposition", Unsigned),
    PicVposition => ("pic.vposition", Unsigned),
    PicFps => ("pic.fps", Rational),
    PicSar => ("pic.sar", Rational),
    PicProgressive => ("pic.progressive", Void),
    PicTf => ("pic.tf", Void),
    PicBf => ("pic.bf", Void),
    SoundRate => ("sound.rate", Unsigned),
    SoundSamples => ("sound.samples", Unsigned),
    SoundChannels => ("sound.channels", SmallUnsigned),
    SoundPlanes => ("sound.planes", SmallUnsigned),
}

/// Owned attribute key: free-form name or shorthand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdictKey {
    /// Free-form UTF-8 name.
    Name(String),
    /// Pre-declared shorthand.
    Shorthand(UdictShorthand),
}

impl UdictKey {
    /// Borrowed view for lookups.
    pub fn as_ref(&self) -> KeyRef<'_> {
        match self {
            UdictKey::Name(s) => KeyRef::Name(s),
            UdictKey::Shorthand(s) => KeyRef::Shorthand(*s),
        }
    }

    /// The attribute name, resolving shorthands.
    pub fn name(&self) -> &str {
        match self {
            UdictKey::Name(s) => s,
            UdictKey::Shorthand(s) => s.name(),
        }
    }
}

impl From<UdictShorthand> for UdictKey {
    fn from(s: UdictShorthand) -> Self {
        UdictKey::Shorthand(s)
    }
}

impl From<&str> for UdictKey {
    fn from(s: &str) -> Self {
        UdictKey::Name(s.to_owned())
    }
}

/// Borrowed attribute key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRef<'a> {
    /// Free-form UTF-8 name.
    Name(&'a str),
    /// Pre-declared shorthand.
    Shorthand(UdictShorthand),
}

impl KeyRef<'_> {
    fn matches(&self, key: &UdictKey) -> bool {
        match (self, key) {
            (KeyRef::Name(a), UdictKey::Name(b)) => a == b,
            (KeyRef::Shorthand(a), UdictKey::Shorthand(b)) => a == b,
            // A shorthand and a free-form name naming the same attribute
            // address the same entry.
            (KeyRef::Name(a), UdictKey::Shorthand(b)) => *a == b.name(),
            (KeyRef::Shorthand(a), UdictKey::Name(b)) => a.name() == b,
        }
    }
}

impl<'a> From<&'a str> for KeyRef<'a> {
    fn from(s: &'a str) -> Self {
        KeyRef::Name(s)
    }
}

impl From<UdictShorthand> for KeyRef<'static> {
    fn from(s: UdictShorthand) -> Self {
        KeyRef::Shorthand(s)
    }
}

/// One dictionary entry.
#[derive(Debug, Clone, PartialEq)]
pub struct UdictEntry {
    /// Attribute key.
    pub key: UdictKey,
    /// Attribute value.
    pub value: UdictValue,
}

/// Ordered attribute dictionary.
#[derive(Debug, Default)]
pub struct Udict {
    entries: Vec<UdictEntry>,
    mgr: Option<UdictMgr>,
}

impl Udict {
    /// Creates an empty dictionary without a manager.
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(DEFAULT_CAPACITY),
            mgr: None,
        }
    }

    /// Looks up an attribute by key, checking the stored type.
    ///
    /// Returns `Ok(None)` when the attribute is absent, and
    /// [`Error::Invalid`] when it is present with a different type.
    pub fn get<'a, 'k>(
        &'a self,
        key: impl Into<KeyRef<'k>>,
        vtype: UdictType,
    ) -> Result<Option<&'a UdictValue>> {
        let key = key.into();
        match self.entries.iter().find(|e| key.matches(&e.key)) {
            None => Ok(None),
            Some(entry) if entry.value.vtype() == vtype => Ok(Some(&entry.value)),
            Some(_) => Err(Error::Invalid),
        }
    }

    /// Sets an attribute, appending on first occurrence and overwriting in
    /// place on subsequent ones.
    ///
    /// Shorthand keys reject values of the wrong type.
    pub fn set(&mut self, key: impl Into<UdictKey>, value: UdictValue) -> Result<()> {
        let key = key.into();
        if let UdictKey::Shorthand(s) = key {
            if s.vtype() != value.vtype() {
                return Err(Error::Invalid);
            }
        }
        match self
            .entries
            .iter_mut()
            .find(|e| key.as_ref().matches(&e.key))
        {
            Some(entry) => {
                entry.value = value;
            }
            None => self.entries.push(UdictEntry { key, value }),
        }
        Ok(())
    }

    /// Removes an attribute. Returns whether it was present.
    ///
    /// A later `set` of the same key re-appends at the tail: insertion order
    /// is strict, gaps do not keep their slot.
    pub fn delete<'k>(&mut self, key: impl Into<KeyRef<'k>>) -> bool {
        let key = key.into();
        match self.entries.iter().position(|e| key.matches(&e.key)) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &UdictEntry> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary carries no attribute.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deep-copies every entry, preserving insertion order.
    pub fn dup(&self) -> Udict {
        Udict {
            entries: self.entries.clone(),
            mgr: self.mgr.clone(),
        }
    }
}

impl Clone for Udict {
    fn clone(&self) -> Self {
        self.dup()
    }
}

impl PartialEq for Udict {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Drop for Udict {
    fn drop(&mut self) {
        if let Some(mgr) = self.mgr.take() {
            mgr.recycle(std::mem::take(&mut self.entries));
        }
    }
}

impl fmt::Display for Udict {
    /// Renders every attribute in insertion order, for log events.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "{{}}");
        }
        write!(f, "{{")?;
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", entry.key.name(), entry.value)?;
        }
        write!(f, "}}")
    }
}

struct UdictMgrInner {
    pool_depth: usize,
    pool: Mutex<Vec<Vec<UdictEntry>>>,
}

/// Shared manager recycling dictionary storage.
#[derive(Clone)]
pub struct UdictMgr {
    inner: Arc<UdictMgrInner>,
}

impl UdictMgr {
    /// Creates a manager with the default pool depth.
    pub fn new() -> Self {
        Self::with_pool_depth(DEFAULT_POOL_DEPTH)
    }

    /// Creates a manager keeping at most `pool_depth` recycled vectors.
    pub fn with_pool_depth(pool_depth: usize) -> Self {
        Self {
            inner: Arc::new(UdictMgrInner {
                pool_depth,
                pool: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Allocates an empty dictionary backed by this manager's pool.
    pub fn alloc(&self) -> Udict {
        let entries = self
            .inner
            .pool
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(DEFAULT_CAPACITY));
        Udict {
            entries,
            mgr: Some(self.clone()),
        }
    }

    fn recycle(&self, mut entries: Vec<UdictEntry>) {
        entries.clear();
        let mut pool = self.inner.pool.lock();
        if pool.len() < self.inner.pool_depth {
            pool.push(entries);
        }
    }
}

impl Default for UdictMgr {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UdictMgr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdictMgr").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use UdictShorthand::{FlowDef, FlowId};

    #[test]
    fn test_set_get() {
        let mut dict = Udict::new();
        dict.set(FlowDef, UdictValue::String("block.mpegts.".into()))
            .unwrap();
        let value = dict.get(FlowDef, UdictType::String).unwrap().unwrap();
        assert_eq!(value, &UdictValue::String("block.mpegts.".into()));
    }

    #[test]
    fn test_get_wrong_type() {
        let mut dict = Udict::new();
        dict.set("x.custom", UdictValue::Unsigned(3)).unwrap();
        assert_eq!(dict.get("x.custom", UdictType::String), Err(Error::Invalid));
    }

    #[test]
    fn test_shorthand_type_enforced() {
        let mut dict = Udict::new();
        assert_eq!(dict.set(FlowId, UdictValue::Void), Err(Error::Invalid));
    }

    #[test]
    fn test_shorthand_and_name_alias() {
        let mut dict = Udict::new();
        dict.set(FlowDef, UdictValue::String("pic.".into())).unwrap();
        let by_name = dict.get("flow.def", UdictType::String).unwrap();
        assert!(by_name.is_some());
    }

    #[test]
    fn test_insertion_order_and_overwrite() {
        let mut dict = Udict::new();
        dict.set("a", UdictValue::Unsigned(1)).unwrap();
        dict.set("b", UdictValue::Unsigned(2)).unwrap();
        dict.set("a", UdictValue::Unsigned(3)).unwrap();
        let names: Vec<_> = dict.iter().map(|e| e.key.name().to_owned()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(
            dict.get("a", UdictType::Unsigned).unwrap(),
            Some(&UdictValue::Unsigned(3))
        );
    }

    #[test]
    fn test_delete_reinsert_appends() {
        let mut dict = Udict::new();
        dict.set("a", UdictValue::Void).unwrap();
        dict.set("b", UdictValue::Void).unwrap();
        assert!(dict.delete("a"));
        dict.set("a", UdictValue::Void).unwrap();
        let names: Vec<_> = dict.iter().map(|e| e.key.name().to_owned()).collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn test_dup_preserves_order() {
        let mut dict = Udict::new();
        for name in ["one", "two", "three"] {
            dict.set(name, UdictValue::String(name.to_uppercase())).unwrap();
        }
        let copy = dict.dup();
        let orig: Vec<_> = dict.iter().map(|e| e.key.name().to_owned()).collect();
        let duped: Vec<_> = copy.iter().map(|e| e.key.name().to_owned()).collect();
        assert_eq!(orig, duped);
    }

    #[test]
    fn test_mgr_recycles_storage() {
        let mgr = UdictMgr::new();
        let mut dict = mgr.alloc();
        dict.set("a", UdictValue::Void).unwrap();
        drop(dict);
        let dict = mgr.alloc();
        assert!(dict.is_empty());
    }

    #[test]
    fn test_dump_format() {
        let mut dict = Udict::new();
        dict.set(FlowDef, UdictValue::String("sound.s16.".into()))
            .unwrap();
        dict.set(FlowId, UdictValue::Unsigned(12)).unwrap();
        assert_eq!(
            dict.to_string(),
            "{flow.def=\"sound.s16.\", flow.id=12}"
        );
    }
}
