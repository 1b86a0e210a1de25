//! Clock Sub-Record
//!
//! Every record carries three optional dates (system, programme and original
//! timelines), delays tying the clock-reference / decoding / presentation
//! timestamps together, a duration, the system date of the latest random
//! access point, and a small flag set.
//!
//! A date is stored once with its kind; the other two timestamps of the same
//! timeline derive from the delays: `pts = dts + dts_pts_delay` and
//! `cr = dts - cr_dts_delay`.

use bitflags::bitflags;

use crate::uref::Uref;

bitflags! {
    /// Per-record flags.
    #[derive(Default)]
    pub struct UrefFlags: u32 {
        /// The record does not follow its predecessor contiguously.
        const DISCONTINUITY = 0x1;
        /// The payload is known to be corrupt.
        const ERROR = 0x2;
        /// Decoding may start on this record.
        const RANDOM_ACCESS = 0x4;
        /// First record of a flow.
        const FLOW_START = 0x8;
    }
}

/// Kind of a stored date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrefDateType {
    /// Clock reference.
    Cr,
    /// Decoding timestamp.
    Dts,
    /// Presentation timestamp.
    Pts,
}

/// A date with its kind, in 27 MHz ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrefDate {
    /// Tick value.
    pub value: u64,
    /// What the value dates.
    pub kind: UrefDateType,
}

/// Pre-parsed clock sub-record.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct UrefClock {
    pub date_sys: Option<UrefDate>,
    pub date_prog: Option<UrefDate>,
    pub date_orig: Option<UrefDate>,
    pub dts_pts_delay: Option<u64>,
    pub cr_dts_delay: Option<u64>,
    pub duration: Option<u64>,
    pub rap_sys: Option<u64>,
    pub flags: UrefFlags,
}

impl UrefClock {
    fn dts(&self, date: Option<UrefDate>) -> Option<u64> {
        let date = date?;
        match date.kind {
            UrefDateType::Dts => Some(date.value),
            UrefDateType::Pts => Some(date.value.checked_sub(self.dts_pts_delay?)?),
            UrefDateType::Cr => Some(date.value.checked_add(self.cr_dts_delay?)?),
        }
    }

    fn pts(&self, date: Option<UrefDate>) -> Option<u64> {
        if let Some(d) = date {
            if d.kind == UrefDateType::Pts {
                return Some(d.value);
            }
        }
        self.dts(date)?.checked_add(self.dts_pts_delay?)
    }

    fn cr(&self, date: Option<UrefDate>) -> Option<u64> {
        if let Some(d) = date {
            if d.kind == UrefDateType::Cr {
                return Some(d.value);
            }
        }
        self.dts(date)?.checked_sub(self.cr_dts_delay?)
    }
}

macro_rules! timeline {
    ($field:ident, $raw:ident, $set_raw:ident,
     $cr:ident, $dts:ident, $pts:ident,
     $set_cr:ident, $set_dts:ident, $set_pts:ident) => {
        /// Raw stored date of this timeline.
        pub fn $raw(&self) -> Option<UrefDate> {
            self.clock.$field
        }

        /// Stores a raw date on this timeline.
        pub fn $set_raw(&mut self, date: UrefDate) {
            self.clock.$field = Some(date);
        }

        /// Clock-reference timestamp on this timeline.
        pub fn $cr(&self) -> Option<u64> {
            self.clock.cr(self.clock.$field)
        }

        /// Decoding timestamp on this timeline.
        pub fn $dts(&self) -> Option<u64> {
            self.clock.dts(self.clock.$field)
        }

        /// Presentation timestamp on this timeline.
        pub fn $pts(&self) -> Option<u64> {
            self.clock.pts(self.clock.$field)
        }

        /// Dates this timeline with a clock reference.
        pub fn $set_cr(&mut self, value: u64) {
            self.clock.$field = Some(UrefDate {
                value,
                kind: UrefDateType::Cr,
            });
        }

        /// Dates this timeline with a decoding timestamp.
        pub fn $set_dts(&mut self, value: u64) {
            self.clock.$field = Some(UrefDate {
                value,
                kind: UrefDateType::Dts,
            });
        }

        /// Dates this timeline with a presentation timestamp.
        pub fn $set_pts(&mut self, value: u64) {
            self.clock.$field = Some(UrefDate {
                value,
                kind: UrefDateType::Pts,
            });
        }
    };
}

impl Uref {
    timeline!(date_sys, date_sys, set_date_sys, cr_sys, dts_sys, pts_sys, set_cr_sys, set_dts_sys, set_pts_sys);
    timeline!(date_prog, date_prog, set_date_prog, cr_prog, dts_prog, pts_prog, set_cr_prog, set_dts_prog, set_pts_prog);
    timeline!(date_orig, date_orig, set_date_orig, cr_orig, dts_orig, pts_orig, set_cr_orig, set_dts_orig, set_pts_orig);

    /// Delay between decoding and presentation timestamps.
    pub fn dts_pts_delay(&self) -> Option<u64> {
        self.clock.dts_pts_delay
    }

    /// Sets the decoding-to-presentation delay.
    pub fn set_dts_pts_delay(&mut self, delay: u64) {
        self.clock.dts_pts_delay = Some(delay);
    }

    /// Delay between clock reference and decoding timestamp.
    pub fn cr_dts_delay(&self) -> Option<u64> {
        self.clock.cr_dts_delay
    }

    /// Sets the clock-reference-to-decoding delay.
    pub fn set_cr_dts_delay(&mut self, delay: u64) {
        self.clock.cr_dts_delay = Some(delay);
    }

    /// Duration of the payload.
    pub fn duration(&self) -> Option<u64> {
        self.clock.duration
    }

    /// Sets the payload duration.
    pub fn set_duration(&mut self, duration: u64) {
        self.clock.duration = Some(duration);
    }

    /// System date of the latest random access point.
    ///
    /// Non-decreasing within one flow.
    pub fn rap_sys(&self) -> Option<u64> {
        self.clock.rap_sys
    }

    /// Sets the system date of the latest random access point.
    pub fn set_rap_sys(&mut self, rap: u64) {
        self.clock.rap_sys = Some(rap);
    }

    /// Per-record flags.
    pub fn flags(&self) -> UrefFlags {
        self.clock.flags
    }

    /// Inserts flags.
    pub fn set_flags(&mut self, flags: UrefFlags) {
        self.clock.flags |= flags;
    }

    /// Removes flags.
    pub fn clear_flags(&mut self, flags: UrefFlags) {
        self.clock.flags &= !flags;
    }
}
