// Song -> flat, time-ordered list of channel effects.
//
// Every absolute time is computed here, once, from the owning section or
// segment's start_time. The dispatcher never derives a time from a previous
// firing, so per-event jitter can't accumulate into drift.

use tracing::warn;

use crate::shared::{ChannelMask, FlashMode, PHYSICAL_ORDER};

use super::song::{Action, Song, Timing};

/// Ties an `On` to the `Off` that ends it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HoldId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ChannelEffect {
    On { channels: ChannelMask, hold: HoldId },
    Off { channels: ChannelMask, hold: HoldId },
    FlashMode(FlashMode),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduledAction {
    pub time: f64, // seconds of song time
    pub effect: ChannelEffect,
}

pub struct BeatScheduler {
    stagger_fraction: f64,
}

pub const DEFAULT_STAGGER_FRACTION: f64 = 0.1;

impl Default for BeatScheduler {
    fn default() -> Self {
        Self { stagger_fraction: DEFAULT_STAGGER_FRACTION }
    }
}

impl BeatScheduler {
    /// `stagger_fraction` is the StepUp/StepDown gap between neighbouring
    /// positions, as a fraction of the tempo. The last position has to come
    /// on before the next beat, so anything outside `(0, 1/9)` falls back to
    /// the default.
    pub fn new(stagger_fraction: f64) -> Self {
        let last_position = (PHYSICAL_ORDER.len() - 1) as f64;
        if stagger_fraction > 0.0 && stagger_fraction * last_position < 1.0 {
            return Self { stagger_fraction };
        }
        warn!(
            stagger_fraction,
            fallback = DEFAULT_STAGGER_FRACTION,
            "step stagger out of range"
        );
        Self::default()
    }

    pub fn stagger_fraction(&self) -> f64 {
        self.stagger_fraction
    }

    pub fn expand(&self, song: &Song) -> Vec<ScheduledAction> {
        let mut out = Emitter::default();
        for section in &song.sections {
            for timing in section.timings() {
                self.expand_timing(song, timing, &mut out);
            }
        }
        let mut actions = out.actions;
        // sort_by is stable: equal times keep declaration order
        actions.sort_by(|a, b| a.time.total_cmp(&b.time));
        actions
    }

    fn expand_timing(&self, song: &Song, timing: &Timing, out: &mut Emitter) {
        let tempo = timing.tempo;
        for sequence in &timing.sequences {
            for beat in sequence.beats.beats(timing.total_beats) {
                let beat_time = timing.beat_time(beat);
                for action in &sequence.actions {
                    self.expand_action(song, action, beat_time, tempo, out);
                }
            }
        }
    }

    fn expand_action(
        &self,
        song: &Song,
        action: &Action,
        beat_time: f64,
        tempo: f64,
        out: &mut Emitter,
    ) {
        match action {
            Action::Note { channel, delay, duration } => {
                let start = beat_time + delay.resolve(tempo);
                out.hold((*channel).into(), start, duration.resolve(tempo));
            }
            Action::Phrase { id } => {
                // loader guarantees the id resolves
                let Some(phrase) = song.phrase(id) else { return };
                for note in &phrase.notes {
                    let start = beat_time + note.delay_multiplier * tempo;
                    out.hold(note.channel.into(), start, note.duration_multiplier * tempo);
                }
            }
            Action::AllChannels { duration } => {
                out.hold(ChannelMask::ALL, beat_time, duration.resolve(tempo));
            }
            Action::StepUp => self.step(PHYSICAL_ORDER.iter(), beat_time, tempo, out),
            Action::StepDown => self.step(PHYSICAL_ORDER.iter().rev(), beat_time, tempo, out),
            Action::FlashMode(mode) => out.push(beat_time, ChannelEffect::FlashMode(*mode)),
        }
    }

    // position k on at beat + k*stagger, everything off at the next beat
    fn step<'a>(
        &self,
        order: impl Iterator<Item = &'a crate::shared::ChannelId>,
        beat_time: f64,
        tempo: f64,
        out: &mut Emitter,
    ) {
        let stagger = self.stagger_fraction * tempo;
        let end = beat_time + tempo;
        for (k, channel) in order.enumerate() {
            let start = beat_time + k as f64 * stagger;
            out.hold((*channel).into(), start, end - start);
        }
    }
}

#[derive(Default)]
struct Emitter {
    actions: Vec<ScheduledAction>,
    next_hold: u32,
}

impl Emitter {
    fn push(&mut self, time: f64, effect: ChannelEffect) {
        self.actions.push(ScheduledAction { time, effect });
    }

    fn hold(&mut self, channels: ChannelMask, start: f64, duration: f64) {
        let hold = HoldId(self.next_hold);
        self.next_hold += 1;
        self.push(start, ChannelEffect::On { channels, hold });
        self.push(start + duration, ChannelEffect::Off { channels, hold });
    }
}

/// Time of the last effect in a schedule; 0 for an empty one.
pub fn last_action_time(schedule: &[ScheduledAction]) -> f64 {
    schedule.last().map_or(0.0, |a| a.time)
}
