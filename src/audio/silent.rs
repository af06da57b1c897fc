use std::path::Path;

use crate::audio_api::{AudioPlayer, PositionTiming};
use crate::error::PlayerError;

// No audio output at all. Every load fails, so the clock runs the show on
// simulated time.
#[derive(Debug, Default)]
pub struct SilentPlayer;

impl AudioPlayer for SilentPlayer {
    fn load(&mut self, path: &Path) -> Result<(), PlayerError> {
        Err(PlayerError::Unavailable(format!(
            "silent backend, not playing {}",
            path.display()
        )))
    }

    fn play(&mut self) -> Result<(), PlayerError> {
        Err(PlayerError::Unavailable("silent backend".into()))
    }

    fn stop(&mut self) {}

    fn is_playing(&mut self) -> bool {
        false
    }

    fn position_seconds(&mut self) -> f64 {
        0.0
    }

    fn timing(&self) -> PositionTiming {
        PositionTiming::Direct
    }
}
