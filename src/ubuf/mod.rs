//! Buffers
//!
//! [`Ubuf`] is the polymorphic reference-counted payload carried by records:
//! block data (scatter lists of byte segments), pictures (multi-plane with
//! stride and subsampling) and sound (multi-plane sample frames).
//!
//! All shapes share the same discipline: `dup` shares the substrate, read
//! mappings may be concurrent, and a write mapping detaches a shared
//! substrate by deep copy first, so logical contents never change under
//! another holder.

pub mod block;
pub mod pic;
pub mod sound;
pub mod stream;

pub use block::{UbufBlock, UbufBlockConfig, UbufBlockMgr};
pub use pic::{PicPlaneDesc, UbufPic, UbufPicConfig, UbufPicMgr};
pub use sound::{UbufSound, UbufSoundMgr};
pub use stream::{Ubits, UbufBlockStream};

use crate::error::{Error, Result};
use crate::umem::UmemMgr;
use crate::uref::Uref;

/// Polymorphic payload buffer.
#[derive(Debug)]
pub enum Ubuf {
    /// Logical byte sequence.
    Block(UbufBlock),
    /// Multi-plane picture.
    Pic(UbufPic),
    /// Multi-plane sound.
    Sound(UbufSound),
}

impl Ubuf {
    /// Duplicates the buffer, sharing payload.
    pub fn dup(&self) -> Ubuf {
        match self {
            Ubuf::Block(b) => Ubuf::Block(b.dup()),
            Ubuf::Pic(p) => Ubuf::Pic(p.dup()),
            Ubuf::Sound(s) => Ubuf::Sound(s.dup()),
        }
    }

    /// Block view, or [`Error::Invalid`] for other shapes.
    pub fn as_block(&self) -> Result<&UbufBlock> {
        match self {
            Ubuf::Block(b) => Ok(b),
            _ => Err(Error::Invalid),
        }
    }

    /// Mutable block view.
    pub fn as_block_mut(&mut self) -> Result<&mut UbufBlock> {
        match self {
            Ubuf::Block(b) => Ok(b),
            _ => Err(Error::Invalid),
        }
    }

    /// Picture view.
    pub fn as_pic(&self) -> Result<&UbufPic> {
        match self {
            Ubuf::Pic(p) => Ok(p),
            _ => Err(Error::Invalid),
        }
    }

    /// Mutable picture view.
    pub fn as_pic_mut(&mut self) -> Result<&mut UbufPic> {
        match self {
            Ubuf::Pic(p) => Ok(p),
            _ => Err(Error::Invalid),
        }
    }

    /// Sound view.
    pub fn as_sound(&self) -> Result<&UbufSound> {
        match self {
            Ubuf::Sound(s) => Ok(s),
            _ => Err(Error::Invalid),
        }
    }

    /// Mutable sound view.
    pub fn as_sound_mut(&mut self) -> Result<&mut UbufSound> {
        match self {
            Ubuf::Sound(s) => Ok(s),
            _ => Err(Error::Invalid),
        }
    }
}

impl From<UbufBlock> for Ubuf {
    fn from(b: UbufBlock) -> Self {
        Ubuf::Block(b)
    }
}

impl From<UbufPic> for Ubuf {
    fn from(p: UbufPic) -> Self {
        Ubuf::Pic(p)
    }
}

impl From<UbufSound> for Ubuf {
    fn from(s: UbufSound) -> Self {
        Ubuf::Sound(s)
    }
}

/// A buffer manager of any shape, as provided through requests.
#[derive(Debug, Clone)]
pub enum UbufMgr {
    /// Block manager.
    Block(UbufBlockMgr),
    /// Picture manager.
    Pic(UbufPicMgr),
    /// Sound manager.
    Sound(UbufSoundMgr),
}

impl UbufMgr {
    /// Builds a manager matching a flow definition.
    ///
    /// `block.` flows map to a block manager; `sound.` flows read the sample
    /// format from the definition string (`s16`, `f32`, `u8`) and the layout
    /// from the `sound.channels` / `sound.planes` attributes; `pic.` flows
    /// map to planar YUV 4:2:0.
    pub fn for_flow_def(umem: &UmemMgr, flow_def: &Uref) -> Result<UbufMgr> {
        let def = flow_def.flow_def()?.ok_or(Error::Invalid)?;
        if def.starts_with("block.") {
            return Ok(UbufMgr::Block(UbufBlockMgr::new(umem.clone())));
        }
        if def.starts_with("pic.") {
            return Ok(UbufMgr::Pic(UbufPicMgr::yuv420(umem.clone())));
        }
        if def.starts_with("sound.") {
            let unit = if def.contains(".f32.") {
                4
            } else if def.contains(".u8.") {
                1
            } else {
                2
            };
            let channels = flow_def.sound_channels()?.unwrap_or(2).max(1) as usize;
            let planar = flow_def.sound_planes()?.unwrap_or(0) > 0;
            let mgr = if planar {
                let mut builder = UbufSoundMgr::builder(umem.clone(), unit);
                for i in 0..channels {
                    builder = builder.plane(&format!("c{i}"));
                }
                builder.build()?
            } else {
                UbufSoundMgr::builder(umem.clone(), unit * channels)
                    .plane("all")
                    .build()?
            };
            return Ok(UbufMgr::Sound(mgr));
        }
        Err(Error::Invalid)
    }

    /// Fingerprint of the flow-format attributes this manager depends on,
    /// used to pool managers per format.
    pub fn fingerprint(flow_def: &Uref) -> Result<String> {
        let def = flow_def.flow_def()?.ok_or(Error::Invalid)?;
        let channels = flow_def.sound_channels()?.unwrap_or(0);
        let planes = flow_def.sound_planes()?.unwrap_or(0);
        let rate = flow_def.sound_rate()?.unwrap_or(0);
        Ok(format!("{def}|c{channels}|p{planes}|r{rate}"))
    }
}
