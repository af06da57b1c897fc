// Song time.
//
// [`PlaybackClock`] answers one question, "how many seconds into the song
// are we", for whichever backend is playing. Depending on what the backend
// can report it reads the backend position directly, compensates a lagging
// backend with the wall clock, or runs purely on the wall clock when there's
// no audio at all. The answer never goes backwards.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::audio_api::{AudioPlayer, PositionTiming};

/// Where "now" comes from. Swapped for [`ManualClock`] in tests.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self { base: Instant::now(), offset: Mutex::new(Duration::ZERO) }
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    pub fn advance_secs(&self, secs: f64) {
        self.advance(Duration::from_secs_f64(secs));
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ClockSettings {
    /// Added to the moment a lagging backend first reports playing.
    pub settle_delay: Duration,
    /// How long a lagging backend gets to report playing before we give up
    /// and run on simulated time.
    pub start_timeout: Duration,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
            start_timeout: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug)]
enum Strategy {
    Direct { seen_playing: bool, requested_at: Instant },
    WallClock { reference: Option<Instant>, requested_at: Instant },
    Simulated { reference: Instant },
}

pub struct PlaybackClock {
    player: Option<Box<dyn AudioPlayer>>,
    strategy: Strategy,
    time: Arc<dyn TimeSource>,
    settings: ClockSettings,
    last: f64,
    stopped: bool,
}

impl PlaybackClock {
    /// Load and start `audio` on `player`. Any failure along the way drops
    /// the player and the clock runs simulated, so the lights still go.
    pub fn start(
        mut player: Box<dyn AudioPlayer>,
        audio: Option<&Path>,
        time: Arc<dyn TimeSource>,
        settings: ClockSettings,
    ) -> Self {
        let Some(path) = audio else {
            info!("no audio for this song, running on simulated time");
            return Self::simulated(time);
        };
        if let Err(e) = player.load(path) {
            warn!(path = %path.display(), "audio load failed, running on simulated time: {e}");
            return Self::simulated(time);
        }
        if let Err(e) = player.play() {
            warn!(path = %path.display(), "audio play failed, running on simulated time: {e}");
            player.stop();
            return Self::simulated(time);
        }

        let requested_at = time.now();
        let strategy = match player.timing() {
            PositionTiming::Direct => Strategy::Direct { seen_playing: false, requested_at },
            PositionTiming::Lagging => Strategy::WallClock { reference: None, requested_at },
        };
        debug!(?strategy, "playback clock started");
        Self { player: Some(player), strategy, time, settings, last: 0.0, stopped: false }
    }

    /// Wall-clock only, anchored now.
    pub fn simulated(time: Arc<dyn TimeSource>) -> Self {
        let reference = time.now();
        Self {
            player: None,
            strategy: Strategy::Simulated { reference },
            time,
            settings: ClockSettings::default(),
            last: 0.0,
            stopped: false,
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.strategy, Strategy::Simulated { .. })
    }

    /// Seconds into the song. Non-decreasing; 0 until playback is confirmed.
    pub fn current_song_time(&mut self) -> f64 {
        if self.stopped {
            return self.last;
        }
        let now = self.time.now();
        let reading = match &mut self.strategy {
            Strategy::Simulated { reference } => secs_since(now, *reference),
            Strategy::WallClock { reference: Some(r), .. } => secs_since(now, *r),
            Strategy::WallClock { reference: reference @ None, requested_at } => {
                let playing = self.player.as_mut().is_some_and(|p| p.is_playing());
                if playing {
                    let r = now + self.settings.settle_delay;
                    debug!("backend reports playing, song time anchored");
                    *reference = Some(r);
                    secs_since(now, r)
                } else if now.saturating_duration_since(*requested_at)
                    > self.settings.start_timeout
                {
                    warn!("backend never reported playing, running on simulated time");
                    let anchor = *requested_at;
                    self.strategy = Strategy::Simulated { reference: anchor };
                    secs_since(now, anchor)
                } else {
                    0.0
                }
            }
            Strategy::Direct { seen_playing, requested_at } => {
                let requested_at = *requested_at;
                let playing = self.player.as_mut().is_some_and(|p| p.is_playing());
                if playing {
                    *seen_playing = true;
                    self.player.as_mut().map_or(self.last, |p| p.position_seconds())
                } else if *seen_playing {
                    // audio ended (or died) before the lights: carry on
                    // from the last reading
                    debug!(at = self.last, "audio finished, continuing on wall clock");
                    let anchor = Duration::try_from_secs_f64(self.last)
                        .ok()
                        .and_then(|d| now.checked_sub(d))
                        .unwrap_or(now);
                    self.strategy = Strategy::Simulated { reference: anchor };
                    self.last
                } else if now.saturating_duration_since(requested_at)
                    > self.settings.start_timeout
                {
                    warn!("backend never reported playing, running on simulated time");
                    self.strategy = Strategy::Simulated { reference: requested_at };
                    secs_since(now, requested_at)
                } else {
                    0.0
                }
            }
        };
        if reading > self.last {
            self.last = reading;
        }
        self.last
    }

    /// True while real audio is coming out.
    pub fn is_audio_playing(&mut self) -> bool {
        if self.stopped || self.is_simulated() {
            return false;
        }
        self.player.as_mut().is_some_and(|p| p.is_playing())
    }

    /// False while still waiting for a backend to confirm playback.
    pub fn has_started(&self) -> bool {
        match self.strategy {
            Strategy::Simulated { .. } => true,
            Strategy::WallClock { reference, .. } => reference.is_some(),
            Strategy::Direct { seen_playing, .. } => seen_playing,
        }
    }

    /// Stop audio and freeze the song time.
    pub fn stop(&mut self) {
        if let Some(p) = self.player.as_mut() {
            p.stop();
        }
        self.stopped = true;
    }
}

impl Drop for PlaybackClock {
    fn drop(&mut self) {
        self.stop();
    }
}

fn secs_since(now: Instant, reference: Instant) -> f64 {
    now.saturating_duration_since(reference).as_secs_f64()
}
