//! `sound.` Attributes

use crate::error::Result;
use crate::udict::{UdictShorthand, UdictType, UdictValue};
use crate::uref::pic::unsigned_attr;
use crate::uref::Uref;

macro_rules! small_unsigned_attr {
    ($get:ident, $set:ident, $key:ident, $doc:literal) => {
        #[doc = $doc]
        pub fn $get(&self) -> Result<Option<u8>> {
            match self.attr(UdictShorthand::$key, UdictType::SmallUnsigned)? {
                Some(UdictValue::SmallUnsigned(v)) => Ok(Some(*v)),
                _ => Ok(None),
            }
        }

        #[doc = concat!("Sets: ", $doc)]
        pub fn $set(&mut self, value: u8) -> Result<()> {
            self.set_attr(UdictShorthand::$key, UdictValue::SmallUnsigned(value))
        }
    };
}

impl Uref {
    unsigned_attr!(sound_rate, set_sound_rate, SoundRate, "Sample rate in Hz.");
    unsigned_attr!(
        sound_samples,
        set_sound_samples,
        SoundSamples,
        "Number of sample frames in the payload."
    );
    small_unsigned_attr!(
        sound_channels,
        set_sound_channels,
        SoundChannels,
        "Number of channels."
    );
    small_unsigned_attr!(
        sound_planes,
        set_sound_planes,
        SoundPlanes,
        "Number of planes (0 means interleaved)."
    );
}

#[cfg(test)]
mod tests {
    use crate::uref::Uref;

    #[test]
    fn test_sound_attrs() {
        let mut uref = Uref::new();
        uref.set_sound_rate(48_000).unwrap();
        uref.set_sound_channels(2).unwrap();
        uref.set_sound_planes(0).unwrap();
        assert_eq!(uref.sound_rate().unwrap(), Some(48_000));
        assert_eq!(uref.sound_channels().unwrap(), Some(2));
        assert_eq!(uref.sound_planes().unwrap(), Some(0));
    }
}
