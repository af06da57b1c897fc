// The mode state machine behind the three buttons.
//
// ```text
//            Mode: next pattern
//          +-------+
//          v       |
//        Idle(pattern) --Lightshow / trigger--> MusicLightshow(song, gen)
//          ^                                       |   Lightshow: skip to next
//          +--------- Mode / song finished --------+
//
//        any state --Power--> ShuttingDown --grace delay--> power off
// ```
//
// The controller is the only thing that mints generations; starting a song
// always cancels the one before it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use crate::audio_api::PlayerFactory;
use crate::clock::{ClockSettings, PlaybackClock, TimeSource};
use crate::config::TimingConfig;
use crate::dispatch::{Generation, TimerDispatch};
use crate::pipeline::loader::SongLibrary;
use crate::pipeline::schedule::BeatScheduler;
use crate::shared::{Button, ControlEvent, LightPattern};

#[derive(Clone, Debug, PartialEq)]
pub enum Mode {
    Idle {
        pattern: LightPattern,
    },
    MusicLightshow {
        song_index: usize,
        song_id: String,
        generation: Generation,
        // idle pattern to go back to
        previous: LightPattern,
    },
    ShuttingDown,
}

/// Whatever actually powers the box down.
pub trait PowerControl: Send {
    fn power_off(&mut self) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct SystemPower;

impl PowerControl for SystemPower {
    fn power_off(&mut self) -> anyhow::Result<()> {
        use anyhow::Context;
        let status = std::process::Command::new("shutdown")
            .args(["-h", "now"])
            .status()
            .context("running shutdown")?;
        anyhow::ensure!(status.success(), "shutdown exited with {status}");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SimulatedPower;

impl PowerControl for SimulatedPower {
    fn power_off(&mut self) -> anyhow::Result<()> {
        info!("simulated power off");
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ControllerSettings {
    pub debounce: Duration,
    pub grace_delay: Duration,
    pub clock: ClockSettings,
    pub stagger_fraction: f64,
    pub initial_pattern: LightPattern,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

impl From<&TimingConfig> for ControllerSettings {
    fn from(t: &TimingConfig) -> Self {
        Self {
            debounce: Duration::from_millis(t.debounce_ms),
            grace_delay: Duration::from_millis(t.grace_delay_ms),
            clock: t.clock(),
            stagger_fraction: t.step_stagger_fraction,
            initial_pattern: t.initial_pattern,
        }
    }
}

pub struct ModeController {
    mode: Mode,
    library: SongLibrary,
    song_index: usize,
    dispatch: TimerDispatch,
    players: Box<dyn PlayerFactory>,
    power: Box<dyn PowerControl>,
    completions: Option<Sender<String>>,
    time: Arc<dyn TimeSource>,
    settings: ControllerSettings,
    scheduler: BeatScheduler,
    last_generation: Generation,
    last_press: Option<Instant>,
    idle_flag: Arc<AtomicBool>,
    shutdown_at: Option<Instant>,
    finished: bool,
}

impl ModeController {
    pub fn new(
        library: SongLibrary,
        dispatch: TimerDispatch,
        players: Box<dyn PlayerFactory>,
        power: Box<dyn PowerControl>,
        time: Arc<dyn TimeSource>,
        settings: ControllerSettings,
    ) -> Self {
        let pattern = settings.initial_pattern;
        dispatch.set_idle_pattern(pattern);
        Self {
            mode: Mode::Idle { pattern },
            library,
            song_index: 0,
            dispatch,
            players,
            power,
            completions: None,
            time,
            scheduler: BeatScheduler::new(settings.stagger_fraction),
            settings,
            last_generation: Generation(0),
            last_press: None,
            idle_flag: Arc::new(AtomicBool::new(true)),
            shutdown_at: None,
            finished: false,
        }
    }

    /// Song ids that finish on their own are sent here.
    pub fn with_completions(mut self, tx: Sender<String>) -> Self {
        self.completions = Some(tx);
        self
    }

    /// Set while idle; the trigger poller only polls then.
    pub fn idle_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.idle_flag)
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn song_index(&self) -> usize {
        self.song_index
    }

    pub fn library(&self) -> &SongLibrary {
        &self.library
    }

    /// Nothing left to do: quit, or power-off issued.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn handle(&mut self, event: ControlEvent) {
        if self.finished || self.mode == Mode::ShuttingDown {
            debug!(?event, "ignoring input while shutting down");
            return;
        }
        match event {
            ControlEvent::Press(button) => {
                if !self.accept_press() {
                    debug!(?button, "debounced");
                    return;
                }
                info!(?button, "button press");
                match button {
                    Button::Power => self.begin_shutdown(),
                    Button::Mode => self.mode_pressed(),
                    Button::Lightshow => self.lightshow_pressed(),
                }
            }
            ControlEvent::ExternalTrigger => {
                if let Mode::Idle { pattern } = self.mode {
                    info!("external trigger, starting lightshow");
                    self.start_show(pattern);
                } else {
                    debug!("external trigger ignored, not idle");
                }
            }
            ControlEvent::Quit => self.quit(),
        }
    }

    /// Check for natural song completion and the shutdown deadline.
    pub fn tick(&mut self) {
        if self.finished {
            return;
        }
        match self.mode.clone() {
            Mode::MusicLightshow { song_index, song_id, generation, previous } => {
                if self.dispatch.session_finished(generation) {
                    info!(song = %song_id, "song finished");
                    self.dispatch.cancel_generation(generation);
                    if let Some(tx) = &self.completions {
                        let _ = tx.send(song_id);
                    }
                    self.song_index = song_index + 1;
                    self.enter_idle(previous);
                }
            }
            Mode::ShuttingDown => {
                let due = self.shutdown_at.is_some_and(|at| self.time.now() >= at);
                if due && !self.finished {
                    info!("powering off");
                    if let Err(e) = self.power.power_off() {
                        error!("power off failed: {e:#}");
                    }
                    self.finished = true;
                }
            }
            Mode::Idle { .. } => {}
        }
    }

    fn accept_press(&mut self) -> bool {
        let now = self.time.now();
        if let Some(last) = self.last_press {
            if now.saturating_duration_since(last) < self.settings.debounce {
                return false;
            }
        }
        self.last_press = Some(now);
        true
    }

    fn mode_pressed(&mut self) {
        match self.mode.clone() {
            Mode::Idle { pattern } => {
                let next = pattern.next();
                info!(pattern = next.label(), "idle pattern");
                self.enter_idle(next);
            }
            Mode::MusicLightshow { generation, previous, .. } => {
                info!("stopping lightshow");
                self.dispatch.cancel_generation(generation);
                self.enter_idle(previous);
            }
            Mode::ShuttingDown => {}
        }
    }

    fn lightshow_pressed(&mut self) {
        match self.mode.clone() {
            Mode::Idle { pattern } => self.start_show(pattern),
            Mode::MusicLightshow { song_index, generation, previous, .. } => {
                info!("skipping to next song");
                self.dispatch.cancel_generation(generation);
                self.song_index = song_index + 1;
                self.start_show(previous);
            }
            Mode::ShuttingDown => {}
        }
    }

    // Start the song at song_index, or the next one that loads. Falls back
    // to idle when nothing in the playlist loads.
    fn start_show(&mut self, previous: LightPattern) {
        loop {
            if self.library.is_empty() {
                warn!("no playable songs, staying idle");
                self.enter_idle(previous);
                return;
            }
            let index = self.song_index % self.library.len();
            let id = self.library.ids()[index].clone();
            let song = match self.library.load(&id) {
                Ok(song) => song,
                Err(e) => {
                    error!(song = %id, "removing song from rotation: {e}");
                    self.library.exclude(&id);
                    // the next song slid into this index
                    self.song_index = index;
                    continue;
                }
            };

            let schedule = self.scheduler.expand(&song);
            let audio = self.library.resolve_audio(&song);
            let clock = PlaybackClock::start(
                self.players.create(),
                audio.as_deref(),
                Arc::clone(&self.time),
                self.settings.clock,
            );

            self.last_generation = self.last_generation.next();
            let generation = self.last_generation;
            self.dispatch.begin_session(generation, clock);
            let accepted = self.dispatch.schedule_all(schedule, generation);
            info!(
                song = %id,
                title = %song.title,
                generation = generation.0,
                actions = accepted,
                "lightshow started"
            );

            self.song_index = index;
            self.idle_flag.store(false, Ordering::SeqCst);
            self.mode = Mode::MusicLightshow {
                song_index: index,
                song_id: id,
                generation,
                previous,
            };
            return;
        }
    }

    fn enter_idle(&mut self, pattern: LightPattern) {
        self.dispatch.set_idle_pattern(pattern);
        self.mode = Mode::Idle { pattern };
        self.idle_flag.store(true, Ordering::SeqCst);
    }

    fn cancel_current(&mut self) {
        if let Mode::MusicLightshow { generation, .. } = self.mode {
            self.dispatch.cancel_generation(generation);
        }
        self.dispatch.blackout();
        self.idle_flag.store(false, Ordering::SeqCst);
    }

    fn begin_shutdown(&mut self) {
        info!(grace = ?self.settings.grace_delay, "shutting down");
        self.cancel_current();
        self.mode = Mode::ShuttingDown;
        self.shutdown_at = Some(self.time.now() + self.settings.grace_delay);
    }

    fn quit(&mut self) {
        info!("quit");
        self.cancel_current();
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BackendFactory;
    use crate::channel::RecordingDriver;
    use crate::clock::ManualClock;
    use crate::dispatch::{DispatchSettings, Dispatcher, FlashPattern};
    use crate::shared::{ChannelId, NUM_CHANNELS};
    use std::sync::atomic::AtomicUsize;

    struct CountingPower(Arc<AtomicUsize>);

    impl PowerControl for CountingPower {
        fn power_off(&mut self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Rig {
        controller: ModeController,
        dispatch: TimerDispatch,
        probe: RecordingDriver,
        time: Arc<ManualClock>,
        power_offs: Arc<AtomicUsize>,
        completed: crossbeam_channel::Receiver<String>,
        _dir: tempfile::TempDir,
    }

    impl Rig {
        fn press(&mut self, button: Button) {
            self.time.advance_secs(1.0); // clear the debounce window
            self.controller.handle(ControlEvent::Press(button));
        }

        fn run_for(&mut self, secs: f64) {
            let steps = (secs / 0.05).round() as usize;
            for _ in 0..steps {
                self.time.advance_secs(0.05);
                self.dispatch.poll_now();
                self.controller.tick();
            }
        }
    }

    const SONG: &str = r#"{"title": "T", "mp3_file": "", "sections": [
        {"name": "a", "start_time": 0.0, "tempo": 0.5, "total_beats": 2, "sequences": [
            {"all_beats": true, "actions": [{"type": "note", "channel": 3, "duration": 0.25}]}
        ]}
    ]}"#;

    fn rig(songs: &[(&str, &str)]) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        for (id, body) in songs {
            std::fs::write(dir.path().join(format!("{id}.json")), body).unwrap();
        }
        let library = SongLibrary::open(dir.path());
        let probe = RecordingDriver::new();
        let time = Arc::new(ManualClock::new());
        let dispatcher = Dispatcher::with_flash(
            Box::new(probe.clone()),
            time.clone(),
            DispatchSettings::default(),
            FlashPattern::seeded(5),
        );
        let dispatch = TimerDispatch::without_worker(dispatcher);
        let power_offs = Arc::new(AtomicUsize::new(0));
        let settings = ControllerSettings {
            initial_pattern: LightPattern::Always,
            ..ControllerSettings::default()
        };
        let (tx, completed) = crossbeam_channel::unbounded();
        let controller = ModeController::new(
            library,
            dispatch.clone(),
            Box::new(BackendFactory::silent()),
            Box::new(CountingPower(power_offs.clone())),
            time.clone(),
            settings,
        )
        .with_completions(tx);
        Rig { controller, dispatch, probe, time, power_offs, completed, _dir: dir }
    }

    fn current_song(c: &ModeController) -> Option<String> {
        match c.mode() {
            Mode::MusicLightshow { song_id, .. } => Some(song_id.clone()),
            _ => None,
        }
    }

    #[test]
    fn mode_button_cycles_idle_patterns() {
        let mut r = rig(&[]);
        assert_eq!(r.controller.mode(), &Mode::Idle { pattern: LightPattern::Always });
        assert_eq!(r.probe.states(), [true; NUM_CHANNELS]);
        r.press(Button::Mode);
        assert_eq!(r.controller.mode(), &Mode::Idle { pattern: LightPattern::SlowFlash });
        for _ in 0..3 {
            r.press(Button::Mode);
        }
        assert_eq!(r.controller.mode(), &Mode::Idle { pattern: LightPattern::Always });
    }

    #[test]
    fn presses_inside_debounce_are_ignored() {
        let mut r = rig(&[]);
        r.press(Button::Mode);
        r.controller.handle(ControlEvent::Press(Button::Mode));
        assert_eq!(r.controller.mode(), &Mode::Idle { pattern: LightPattern::SlowFlash });
    }

    #[test]
    fn song_plays_to_completion_and_returns_to_idle() {
        let mut r = rig(&[("one", SONG), ("two", SONG)]);

        r.press(Button::Lightshow);
        assert_eq!(current_song(&r.controller).as_deref(), Some("one"));
        assert!(!r.controller.idle_flag().load(Ordering::SeqCst));

        r.run_for(0.1);
        assert!(r.probe.is_on(ChannelId::new(3).unwrap()));

        r.run_for(1.0);
        assert_eq!(r.controller.mode(), &Mode::Idle { pattern: LightPattern::Always });
        assert_eq!(r.completed.try_recv().unwrap(), "one");
        assert_eq!(r.controller.song_index(), 1);
        assert!(r.controller.idle_flag().load(Ordering::SeqCst));

        r.press(Button::Lightshow);
        assert_eq!(current_song(&r.controller).as_deref(), Some("two"));
    }

    #[test]
    fn lightshow_during_show_skips_and_wraps() {
        let mut r = rig(&[("one", SONG), ("two", SONG)]);
        r.press(Button::Lightshow);
        let first = match r.controller.mode() {
            Mode::MusicLightshow { generation, .. } => *generation,
            other => panic!("unexpected {other:?}"),
        };
        r.press(Button::Lightshow);
        assert_eq!(current_song(&r.controller).as_deref(), Some("two"));
        assert_ne!(r.dispatch.active(), Some(first));
        r.press(Button::Lightshow);
        assert_eq!(current_song(&r.controller).as_deref(), Some("one"));
    }

    #[test]
    fn mode_during_show_stops_and_restores_pattern() {
        let mut r = rig(&[("one", SONG)]);
        r.press(Button::Lightshow);
        r.run_for(0.1);
        r.press(Button::Mode);
        assert_eq!(r.controller.mode(), &Mode::Idle { pattern: LightPattern::Always });
        assert!(r.dispatch.active().is_none());
        assert_eq!(r.probe.states(), [true; NUM_CHANNELS]);
    }

    #[test]
    fn broken_song_is_skipped_and_removed() {
        let mut r = rig(&[("a_broken", "{ not json"), ("b_good", SONG)]);
        r.press(Button::Lightshow);
        assert_eq!(current_song(&r.controller).as_deref(), Some("b_good"));
        assert_eq!(r.controller.library().ids(), ["b_good"]);
    }

    #[test]
    fn nothing_playable_stays_idle() {
        let mut r = rig(&[("bad", "[]")]);
        r.press(Button::Lightshow);
        assert_eq!(r.controller.mode(), &Mode::Idle { pattern: LightPattern::Always });
        assert!(r.controller.library().is_empty());
    }

    #[test]
    fn external_trigger_only_while_idle() {
        let mut r = rig(&[("one", SONG), ("two", SONG)]);
        r.controller.handle(ControlEvent::ExternalTrigger);
        assert_eq!(current_song(&r.controller).as_deref(), Some("one"));
        r.controller.handle(ControlEvent::ExternalTrigger);
        assert_eq!(current_song(&r.controller).as_deref(), Some("one"));
    }

    #[test]
    fn power_goes_dark_then_powers_off_after_grace() {
        let mut r = rig(&[("one", SONG)]);
        r.press(Button::Lightshow);
        r.run_for(0.1);
        r.press(Button::Power);
        assert_eq!(r.controller.mode(), &Mode::ShuttingDown);
        assert!(r.probe.all_off());

        r.controller.handle(ControlEvent::Press(Button::Mode));
        assert_eq!(r.controller.mode(), &Mode::ShuttingDown);

        r.run_for(1.0);
        assert_eq!(r.power_offs.load(Ordering::SeqCst), 0);
        r.run_for(1.5);
        assert_eq!(r.power_offs.load(Ordering::SeqCst), 1);
        assert!(r.controller.is_finished());
        r.run_for(0.5);
        assert_eq!(r.power_offs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn quit_goes_dark_without_power_off() {
        let mut r = rig(&[("one", SONG)]);
        r.press(Button::Lightshow);
        r.controller.handle(ControlEvent::Quit);
        assert!(r.controller.is_finished());
        assert!(r.probe.all_off());
        r.run_for(3.0);
        assert_eq!(r.power_offs.load(Ordering::SeqCst), 0);
    }
}
