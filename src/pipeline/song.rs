// A validated song: everything here has passed the loader's checks, so the
// scheduler never has to second-guess a tempo or a channel index.
use std::collections::BTreeMap;

use crate::shared::{ChannelId, FlashMode};

#[derive(Clone, Debug)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub description: String,
    pub audio_file: String,
    pub sections: Vec<Section>,
    pub phrases: BTreeMap<String, Phrase>,
}

impl Song {
    pub fn phrase(&self, id: &str) -> Option<&Phrase> {
        self.phrases.get(id)
    }
}

#[derive(Clone, Debug)]
pub enum Section {
    Simple { name: String, timing: Timing },
    // independently timed regions, for songs that change tempo mid-section
    Segmented { name: String, segments: Vec<Timing> },
}

impl Section {
    pub fn name(&self) -> &str {
        match self {
            Section::Simple { name, .. } | Section::Segmented { name, .. } => name,
        }
    }

    /// Each timing region of the section, in declaration order.
    pub fn timings(&self) -> &[Timing] {
        match self {
            Section::Simple { timing, .. } => std::slice::from_ref(timing),
            Section::Segmented { segments, .. } => segments,
        }
    }
}

/// One contiguous timing region: a simple section or a single segment.
#[derive(Clone, Debug)]
pub struct Timing {
    pub start_time: f64,
    pub tempo: f64,        // seconds per beat, > 0
    pub total_beats: u32,  // >= 1
    pub sequences: Vec<Sequence>,
}

impl Timing {
    /// Beats are 1-indexed. Always computed from the region's own start so
    /// rounding never accumulates across beats.
    pub fn beat_time(&self, beat: u32) -> f64 {
        self.start_time + f64::from(beat - 1) * self.tempo
    }
}

#[derive(Clone, Debug)]
pub struct Sequence {
    pub beats: BeatSpec,
    pub actions: Vec<Action>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BeatSpec {
    Single(u32),
    List(Vec<u32>),
    All,
}

impl BeatSpec {
    pub fn beats(&self, total_beats: u32) -> Vec<u32> {
        match self {
            BeatSpec::Single(b) => vec![*b],
            BeatSpec::List(bs) => bs.clone(),
            BeatSpec::All => (1..=total_beats).collect(),
        }
    }
}

// A timing field is either absolute seconds or a multiple of the owning tempo.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimeValue {
    Seconds(f64),
    Multiplier(f64),
}

impl TimeValue {
    pub fn resolve(self, tempo: f64) -> f64 {
        match self {
            TimeValue::Seconds(s) => s,
            TimeValue::Multiplier(m) => m * tempo,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Note {
        channel: ChannelId,
        delay: TimeValue,
        duration: TimeValue,
    },
    Phrase {
        id: String,
    },
    AllChannels {
        duration: TimeValue,
    },
    StepUp,
    StepDown,
    FlashMode(FlashMode),
}

#[derive(Clone, Debug)]
pub struct Phrase {
    pub description: String,
    pub notes: Vec<PhraseNote>,
}

// phrase timing is always tempo-relative
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhraseNote {
    pub channel: ChannelId,
    pub delay_multiplier: f64,
    pub duration_multiplier: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn beat_one_lands_on_start_time() {
        let t = Timing { start_time: 5.692, tempo: 0.6295, total_beats: 8, sequences: vec![] };
        assert_eq!(t.beat_time(1), 5.692);
        assert_relative_eq!(t.beat_time(8), 5.692 + 7.0 * 0.6295);
    }

    #[test]
    fn all_beats_expands_to_full_range() {
        assert_eq!(BeatSpec::All.beats(4), vec![1, 2, 3, 4]);
        assert_eq!(BeatSpec::Single(3).beats(4), vec![3]);
    }

    #[test]
    fn multiplier_scales_by_tempo() {
        assert_relative_eq!(TimeValue::Multiplier(0.5).resolve(0.6), 0.3);
        assert_relative_eq!(TimeValue::Seconds(0.25).resolve(0.6), 0.25);
    }
}
