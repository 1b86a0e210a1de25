//! `pic.` Attributes

use crate::error::Result;
use crate::udict::{UdictShorthand, UdictType, UdictValue, Urational};
use crate::uref::Uref;

macro_rules! unsigned_attr {
    ($get:ident, $set:ident, $key:ident, $doc:literal) => {
        #[doc = $doc]
        pub fn $get(&self) -> Result<Option<u64>> {
            match self.attr(UdictShorthand::$key, UdictType::Unsigned)? {
                Some(UdictValue::Unsigned(v)) => Ok(Some(*v)),
                _ => Ok(None),
            }
        }

        #[doc = concat!("Sets: ", $doc)]
        pub fn $set(&mut self, value: u64) -> Result<()> {
            self.set_attr(UdictShorthand::$key, UdictValue::Unsigned(value))
        }
    };
}

macro_rules! rational_attr {
    ($get:ident, $set:ident, $key:ident, $doc:literal) => {
        #[doc = $doc]
        pub fn $get(&self) -> Result<Option<Urational>> {
            match self.attr(UdictShorthand::$key, UdictType::Rational)? {
                Some(UdictValue::Rational(v)) => Ok(Some(*v)),
                _ => Ok(None),
            }
        }

        #[doc = concat!("Sets: ", $doc)]
        pub fn $set(&mut self, value: Urational) -> Result<()> {
            self.set_attr(UdictShorthand::$key, UdictValue::Rational(value))
        }
    };
}

macro_rules! void_attr {
    ($get:ident, $set:ident, $key:ident, $doc:literal) => {
        #[doc = $doc]
        pub fn $get(&self) -> bool {
            self.has_attr(UdictShorthand::$key)
        }

        #[doc = concat!("Sets: ", $doc)]
        pub fn $set(&mut self) -> Result<()> {
            self.set_attr(UdictShorthand::$key, UdictValue::Void)
        }
    };
}

impl Uref {
    unsigned_attr!(pic_hsize, set_pic_hsize, PicHsize, "Horizontal size in pixels.");
    unsigned_attr!(pic_vsize, set_pic_vsize, PicVsize, "Vertical size in pixels.");
    unsigned_attr!(
        pic_hposition,
        set_pic_hposition,
        PicHposition,
        "Horizontal position of the window."
    );
    unsigned_attr!(
        pic_vposition,
        set_pic_vposition,
        PicVposition,
        "Vertical position of the window."
    );
    rational_attr!(pic_fps, set_pic_fps, PicFps, "Frames per second.");
    rational_attr!(pic_sar, set_pic_sar, PicSar, "Sample aspect ratio.");
    void_attr!(pic_progressive, set_pic_progressive, PicProgressive, "Progressive scanning.");
    void_attr!(pic_tf, set_pic_tf, PicTf, "Top field present.");
    void_attr!(pic_bf, set_pic_bf, PicBf, "Bottom field present.");
}

pub(super) use rational_attr;
pub(super) use unsigned_attr;
pub(super) use void_attr;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_attrs() {
        let mut uref = Uref::new();
        uref.set_pic_hsize(1920).unwrap();
        uref.set_pic_vsize(1080).unwrap();
        assert_eq!(uref.pic_hsize().unwrap(), Some(1920));
        assert_eq!(uref.pic_vsize().unwrap(), Some(1080));
    }

    #[test]
    fn test_fps_rational() {
        let mut uref = Uref::new();
        uref.set_pic_fps(Urational { num: 30000, den: 1001 }).unwrap();
        assert_eq!(
            uref.pic_fps().unwrap(),
            Some(Urational { num: 30000, den: 1001 })
        );
    }

    #[test]
    fn test_field_markers() {
        let mut uref = Uref::new();
        assert!(!uref.pic_progressive());
        uref.set_pic_progressive().unwrap();
        assert!(uref.pic_progressive());
    }
}
