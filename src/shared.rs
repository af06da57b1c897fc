// Types every layer agrees on: channel identity, the idle light patterns,
// and the button/control events that drive the mode controller.
//
// Physical layout of the channel groups (front view):
//
//   position:  0  1  2  3  4  5  6  7  8  9
//   channel:   9  8  1  6  5  3  2  4  7  0
//
// StepUp walks positions 0 -> 9, StepDown walks 9 -> 0. Raw channel index
// order is NOT the physical order.

use std::fmt;

pub const NUM_CHANNELS: usize = 10;

pub const PHYSICAL_ORDER: [ChannelId; NUM_CHANNELS] = [
    ChannelId(9),
    ChannelId(8),
    ChannelId(1),
    ChannelId(6),
    ChannelId(5),
    ChannelId(3),
    ChannelId(2),
    ChannelId(4),
    ChannelId(7),
    ChannelId(0),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u8);

impl ChannelId {
    /// Returns `None` for anything outside `0..NUM_CHANNELS`.
    pub fn new(index: i64) -> Option<Self> {
        if (0..NUM_CHANNELS as i64).contains(&index) {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = ChannelId> {
        (0..NUM_CHANNELS as u8).map(ChannelId)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

// bit n set = channel n affected
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChannelMask(u16);

impl ChannelMask {
    pub const ALL: ChannelMask = ChannelMask((1 << NUM_CHANNELS) - 1);

    pub fn single(channel: ChannelId) -> Self {
        Self(1 << channel.0)
    }

    pub fn contains(self, channel: ChannelId) -> bool {
        self.0 & (1 << channel.0) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn channels(self) -> impl Iterator<Item = ChannelId> {
        ChannelId::all().filter(move |c| self.contains(*c))
    }
}

impl From<ChannelId> for ChannelMask {
    fn from(channel: ChannelId) -> Self {
        Self::single(channel)
    }
}

/// Idle light pattern. Also the target of in-song `flash_mode` actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightPattern {
    Always,
    SlowFlash,
    MedFlash,
    FastFlash,
}

impl LightPattern {
    pub fn next(self) -> Self {
        match self {
            LightPattern::Always => LightPattern::SlowFlash,
            LightPattern::SlowFlash => LightPattern::MedFlash,
            LightPattern::MedFlash => LightPattern::FastFlash,
            LightPattern::FastFlash => LightPattern::Always,
        }
    }

    /// Upper bound of the random on/off interval, seconds. `None` = steady on.
    pub fn flash_scale(self) -> Option<f64> {
        match self {
            LightPattern::Always => None,
            LightPattern::SlowFlash => Some(5.0),
            LightPattern::MedFlash => Some(3.0),
            LightPattern::FastFlash => Some(0.5),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LightPattern::Always => "Always On",
            LightPattern::SlowFlash => "Slow Flash",
            LightPattern::MedFlash => "Medium Flash",
            LightPattern::FastFlash => "Fast Flash",
        }
    }
}

/// Wire value of a `flash_mode` action: -1 restores, 0..=3 pick a pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashMode {
    Restore,
    Pattern(LightPattern),
}

impl FlashMode {
    pub fn from_wire(mode: i64) -> Option<Self> {
        match mode {
            -1 => Some(FlashMode::Restore),
            0 => Some(FlashMode::Pattern(LightPattern::Always)),
            1 => Some(FlashMode::Pattern(LightPattern::SlowFlash)),
            2 => Some(FlashMode::Pattern(LightPattern::MedFlash)),
            3 => Some(FlashMode::Pattern(LightPattern::FastFlash)),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Button {
    Power,
    Mode,
    Lightshow,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    Press(Button),
    // integration endpoint said "go"; same as a Lightshow press while idle
    ExternalTrigger,
    Quit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_order_covers_every_channel_once() {
        let mut seen = [false; NUM_CHANNELS];
        for ch in PHYSICAL_ORDER {
            assert!(!seen[ch.index()], "{ch} listed twice");
            seen[ch.index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn channel_id_rejects_out_of_range() {
        assert!(ChannelId::new(-1).is_none());
        assert!(ChannelId::new(10).is_none());
        assert_eq!(ChannelId::new(9).map(ChannelId::index), Some(9));
    }

    #[test]
    fn all_mask_holds_ten_channels() {
        assert_eq!(ChannelMask::ALL.channels().count(), NUM_CHANNELS);
        let one = ChannelMask::single(ChannelId(3));
        assert_eq!(one.channels().collect::<Vec<_>>(), vec![ChannelId(3)]);
    }

    #[test]
    fn pattern_cycle_wraps() {
        let mut p = LightPattern::Always;
        for _ in 0..4 {
            p = p.next();
        }
        assert_eq!(p, LightPattern::Always);
        assert_eq!(LightPattern::FastFlash.next(), LightPattern::Always);
    }

    #[test]
    fn flash_mode_wire_values() {
        assert_eq!(FlashMode::from_wire(-1), Some(FlashMode::Restore));
        assert_eq!(
            FlashMode::from_wire(3),
            Some(FlashMode::Pattern(LightPattern::FastFlash))
        );
        assert_eq!(FlashMode::from_wire(4), None);
    }
}
