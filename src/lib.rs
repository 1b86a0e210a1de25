//! # upipe
//!
//! Modular zero-copy pipeline framework for continuous multimedia streams
//! (transport streams, elementary video and audio, uncompressed pictures
//! and sound). Applications compose directed graphs of processing stages
//! and push typed reference-counted records between them; the framework
//! guarantees zero-copy data movement, explicit backpressure, deterministic
//! resource reclamation and clock-synchronised output.
//!
//! # Architecture
//!
//! ```text
//! L0  umem            pooled memory managers, refcounted handles
//! L1  udict / uref    attribute dictionaries, records with clock sub-record
//! L2  ubuf            block / picture / sound buffers, copy-on-write
//! L3  upump / uqueue  cooperative event loop, lock-free MPMC queue, blockers
//! L4  upipe / uprobe  pipe protocol, probe chain, request/provide
//! L5  xfer            cross-thread transfer of running pipes
//! ```
//!
//! Each layer is usable standalone; higher layers compose lower ones.
//!
//! # Data Flow
//!
//! Records ([`uref::Uref`]) travel downstream through [`upipe::Upipe::input`];
//! configuration flows both ways on the control channel; events, logs and
//! lazy resource discovery travel upstream through the probe chain
//! ([`uprobe::Uprobe`]). Payloads ([`ubuf::Ubuf`]) are shared by reference
//! and deep-copied only when someone writes to a shared substrate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod modules;
pub mod ubuf;
pub mod uclock;
pub mod udict;
pub mod ueventfd;
pub mod umem;
pub mod upipe;
pub mod uprobe;
pub mod upump;
pub mod uqueue;
pub mod uref;
pub mod urequest;
pub mod xfer;

pub use error::{Error, Result};
pub use ubuf::Ubuf;
pub use uclock::Uclock;
pub use udict::Udict;
pub use ueventfd::Ueventfd;
pub use umem::UmemMgr;
pub use upipe::Upipe;
pub use uprobe::Uprobe;
pub use upump::{Upump, UpumpBlocker, UpumpMgr};
pub use uqueue::Uqueue;
pub use uref::Uref;
pub use urequest::Urequest;
