// Flash layer: each channel toggles on its own random timer, the interval
// drawn uniformly from [0, scale) for the active pattern.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::shared::{LightPattern, NUM_CHANNELS};

pub struct FlashPattern {
    pattern: Option<LightPattern>,
    states: [bool; NUM_CHANNELS],
    deadlines: [Option<Instant>; NUM_CHANNELS],
    rng: StdRng,
}

impl Default for FlashPattern {
    fn default() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl FlashPattern {
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            pattern: None,
            states: [false; NUM_CHANNELS],
            deadlines: [None; NUM_CHANNELS],
            rng,
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn pattern(&self) -> Option<LightPattern> {
        self.pattern
    }

    /// `None` turns the layer off.
    pub fn set(&mut self, pattern: Option<LightPattern>, now: Instant) {
        self.pattern = pattern;
        match pattern.map(|p| (p, p.flash_scale())) {
            None => {
                self.states = [false; NUM_CHANNELS];
                self.deadlines = [None; NUM_CHANNELS];
            }
            Some((_, None)) => {
                self.states = [true; NUM_CHANNELS];
                self.deadlines = [None; NUM_CHANNELS];
            }
            Some((_, Some(scale))) => {
                // every channel starts dark and comes on after its own delay
                self.states = [false; NUM_CHANNELS];
                for i in 0..NUM_CHANNELS {
                    let delay = self.interval(scale);
                    self.deadlines[i] = Some(now + delay);
                }
            }
        }
    }

    /// Toggle every channel whose timer has run out. Returns whether
    /// anything changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(scale) = self.pattern.and_then(LightPattern::flash_scale) else {
            return false;
        };
        let mut changed = false;
        for i in 0..NUM_CHANNELS {
            if let Some(due) = self.deadlines[i] {
                if due <= now {
                    self.states[i] = !self.states[i];
                    let delay = self.interval(scale);
                    self.deadlines[i] = Some(now + delay);
                    changed = true;
                }
            }
        }
        changed
    }

    pub fn states(&self) -> [bool; NUM_CHANNELS] {
        self.states
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    fn interval(&mut self, scale: f64) -> Duration {
        Duration::from_secs_f64(self.rng.gen_range(0.0..scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_is_steady_on() {
        let mut p = FlashPattern::seeded(1);
        let now = Instant::now();
        p.set(Some(LightPattern::Always), now);
        assert_eq!(p.states(), [true; NUM_CHANNELS]);
        assert!(p.next_deadline().is_none());
        assert!(!p.tick(now + Duration::from_secs(60)));
    }

    #[test]
    fn flashing_starts_dark_and_toggles_within_scale() {
        let mut p = FlashPattern::seeded(7);
        let now = Instant::now();
        p.set(Some(LightPattern::FastFlash), now);
        assert_eq!(p.states(), [false; NUM_CHANNELS]);
        let first = p.next_deadline().unwrap();
        assert!(first < now + Duration::from_millis(500));

        // by the end of one full scale every channel has toggled at least once
        assert!(p.tick(now + Duration::from_millis(500)));
        assert!(p.states().iter().all(|s| *s));
    }

    #[test]
    fn off_clears_everything() {
        let mut p = FlashPattern::seeded(3);
        let now = Instant::now();
        p.set(Some(LightPattern::SlowFlash), now);
        p.set(None, now);
        assert_eq!(p.states(), [false; NUM_CHANNELS]);
        assert!(p.next_deadline().is_none());
        assert_eq!(p.pattern(), None);
    }
}
