use std::path::Path;

use crate::error::PlayerError;

// How far a backend's reported position can be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PositionTiming {
    // position_seconds() tracks what's audible; use it as the song clock
    Direct,
    // position lags real output; the clock falls back to wall-clock
    // compensation once playback is confirmed
    Lagging,
}

/// One audio output backend. A player plays at most one track at a time.
pub trait AudioPlayer: Send {
    fn load(&mut self, path: &Path) -> Result<(), PlayerError>;
    fn play(&mut self) -> Result<(), PlayerError>;
    fn stop(&mut self);
    fn is_playing(&mut self) -> bool;
    // seconds into the track; only promised to be non-decreasing while playing
    fn position_seconds(&mut self) -> f64;
    fn timing(&self) -> PositionTiming;
}

// The controller needs a fresh player per song.
pub trait PlayerFactory: Send {
    fn create(&self) -> Box<dyn AudioPlayer>;
}
