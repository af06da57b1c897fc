// Firing scheduled channel effects against song time.
//
// [`Dispatcher`] is the deterministic core: it owns the playback clock of
// the current session, the pending queue and the channel bank, and does
// nothing until [`Dispatcher::poll`] is called. [`TimerDispatch`] puts it
// behind a mutex with a worker thread that polls at each deadline.
//
// Cancellation is generation based. Every entry carries the generation it
// was scheduled under; once that generation stops being the active one its
// entries are dropped instead of fired. The check and the firing happen
// under the same lock as the cancel, so nothing fires late.

mod bank;
mod pattern;
mod queue;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

pub use bank::ChannelBank;
pub use pattern::FlashPattern;
pub use queue::{DispatchQueue, Generation};

use crate::channel::ChannelDriver;
use crate::clock::{PlaybackClock, TimeSource};
use crate::pipeline::schedule::{ChannelEffect, ScheduledAction};
use crate::shared::{FlashMode, LightPattern, NUM_CHANNELS};

#[derive(Clone, Copy, Debug)]
pub struct DispatchSettings {
    /// Longest the worker sleeps, so input and idle flashing stay responsive.
    pub poll_interval: Duration,
    pub sweep_every: usize,
    pub max_resident: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            sweep_every: 64,
            max_resident: 4096,
        }
    }
}

struct Session {
    generation: Generation,
    clock: PlaybackClock,
    last_action: f64,
    // idle pattern in force when the session began
    before: Option<LightPattern>,
}

pub struct Dispatcher {
    queue: DispatchQueue,
    bank: ChannelBank,
    flash: FlashPattern,
    time: Arc<dyn TimeSource>,
    settings: DispatchSettings,
    active: Option<Generation>,
    session: Option<Session>,
    idle: Option<LightPattern>,
}

impl Dispatcher {
    pub fn new(
        driver: Box<dyn ChannelDriver>,
        time: Arc<dyn TimeSource>,
        settings: DispatchSettings,
    ) -> Self {
        Self::with_flash(driver, time, settings, FlashPattern::default())
    }

    pub fn with_flash(
        driver: Box<dyn ChannelDriver>,
        time: Arc<dyn TimeSource>,
        settings: DispatchSettings,
        flash: FlashPattern,
    ) -> Self {
        Self {
            queue: DispatchQueue::new(settings.sweep_every, settings.max_resident),
            bank: ChannelBank::new(driver),
            flash,
            time,
            settings,
            active: None,
            session: None,
            idle: None,
        }
    }

    /// Make `generation` the active session, driven by `clock`. Any previous
    /// session is cancelled first and every channel starts dark.
    pub fn begin_session(&mut self, generation: Generation, clock: PlaybackClock) {
        if let Some(old) = self.active {
            self.cancel_generation(old);
        }
        self.flash.set(None, self.time.now());
        self.bank.all_off();
        self.active = Some(generation);
        self.session = Some(Session {
            generation,
            clock,
            last_action: 0.0,
            before: self.idle,
        });
        info!(generation = generation.0, "session started");
    }

    /// Queue one action. Returns false (and drops it) if `generation` isn't
    /// the active one.
    pub fn schedule(&mut self, action: ScheduledAction, generation: Generation) -> bool {
        if self.active != Some(generation) {
            trace!(generation = generation.0, "not scheduling for inactive generation");
            return false;
        }
        if let Some(s) = self.session.as_mut() {
            s.last_action = s.last_action.max(action.time);
        }
        self.queue.push(action, generation, self.active);
        true
    }

    pub fn schedule_all(
        &mut self,
        actions: impl IntoIterator<Item = ScheduledAction>,
        generation: Generation,
    ) -> usize {
        actions
            .into_iter()
            .map(|a| self.schedule(a, generation))
            .filter(|accepted| *accepted)
            .count()
    }

    /// End `generation`: its pending entries become no-ops, audio stops,
    /// and every channel is written off before this returns. Returns false
    /// if it wasn't active.
    pub fn cancel_generation(&mut self, generation: Generation) -> bool {
        if self.active != Some(generation) {
            return false;
        }
        self.active = None;
        if let Some(mut session) = self.session.take() {
            session.clock.stop();
        }
        self.flash.set(None, self.time.now());
        self.bank.all_off();
        info!(generation = generation.0, "session cancelled");
        true
    }

    /// Idle flashing. Ignored while a session is running.
    pub fn set_idle_pattern(&mut self, pattern: LightPattern) {
        if self.active.is_some() {
            warn!(?pattern, "ignoring idle pattern while a session is active");
            return;
        }
        self.idle = Some(pattern);
        self.flash.set(Some(pattern), self.time.now());
        self.bank.set_flash(self.flash.states());
        debug!(pattern = pattern.label(), "idle pattern set");
    }

    /// Every channel dark, no pattern, no session.
    pub fn blackout(&mut self) {
        if let Some(g) = self.active {
            self.cancel_generation(g);
        }
        self.idle = None;
        self.flash.set(None, self.time.now());
        self.bank.all_off();
    }

    /// Fire everything due, advance the flash layer, and return how long the
    /// caller may sleep before the next thing is due.
    pub fn poll(&mut self) -> Duration {
        let song_time = self.session.as_mut().map(|s| s.clock.current_song_time());

        if let Some(t) = song_time {
            while let Some(entry) = self.queue.pop_due(t) {
                if Some(entry.generation) != self.active {
                    trace!(generation = entry.generation.0, "discarding stale entry");
                    continue;
                }
                self.fire(entry.action);
            }
        }

        let now = self.time.now();
        if self.flash.tick(now) {
            self.bank.set_flash(self.flash.states());
        }

        let mut wait = self.settings.poll_interval;
        if let (Some(t), Some(next)) = (song_time, self.queue.next_time()) {
            // too far off for a Duration: the poll interval is the wait
            if let Ok(until) = Duration::try_from_secs_f64((next - t).max(0.0)) {
                wait = wait.min(until);
            }
        }
        if let Some(deadline) = self.flash.next_deadline() {
            wait = wait.min(deadline.saturating_duration_since(now));
        }
        wait
    }

    fn fire(&mut self, action: ScheduledAction) {
        match action.effect {
            ChannelEffect::On { channels, hold } => self.bank.hold_on(channels, hold),
            ChannelEffect::Off { channels, hold } => self.bank.hold_off(channels, hold),
            ChannelEffect::FlashMode(mode) => {
                let pattern = match mode {
                    FlashMode::Restore => self.session.as_ref().and_then(|s| s.before),
                    FlashMode::Pattern(p) => Some(p),
                };
                self.flash.set(pattern, self.time.now());
                self.bank.set_flash(self.flash.states());
            }
        }
    }

    /// The active session has played out: song time is past its last action
    /// and no audio is still playing.
    pub fn session_finished(&mut self, generation: Generation) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.generation != generation || !session.clock.has_started() {
            return false;
        }
        let t = session.clock.current_song_time();
        t >= session.last_action && !session.clock.is_audio_playing()
    }

    pub fn active(&self) -> Option<Generation> {
        self.active
    }

    pub fn song_time(&mut self) -> Option<f64> {
        self.session.as_mut().map(|s| s.clock.current_song_time())
    }

    pub fn resident_count(&self) -> usize {
        self.queue.resident_count()
    }

    pub fn lit(&self) -> [bool; NUM_CHANNELS] {
        self.bank.lit()
    }
}

struct Shared {
    dispatcher: Mutex<Dispatcher>,
    wake: Condvar,
    running: AtomicBool,
}

/// Thread-safe handle to a [`Dispatcher`]. Clones share the same dispatcher.
#[derive(Clone)]
pub struct TimerDispatch {
    shared: Arc<Shared>,
    worker: Option<Arc<Mutex<Option<JoinHandle<()>>>>>,
}

impl TimerDispatch {
    /// Start a worker thread that polls the dispatcher at every deadline.
    pub fn spawn(dispatcher: Dispatcher) -> anyhow::Result<Self> {
        let mut handle = Self::without_worker(dispatcher);
        let shared = Arc::clone(&handle.shared);
        let thread = std::thread::Builder::new()
            .name("dispatch".into())
            .spawn(move || worker_loop(&shared))?;
        handle.worker = Some(Arc::new(Mutex::new(Some(thread))));
        Ok(handle)
    }

    /// No worker: the owner drives it with [`TimerDispatch::poll_now`].
    pub fn without_worker(dispatcher: Dispatcher) -> Self {
        Self {
            shared: Arc::new(Shared {
                dispatcher: Mutex::new(dispatcher),
                wake: Condvar::new(),
                running: AtomicBool::new(true),
            }),
            worker: None,
        }
    }

    // run `f` under the lock, then nudge the worker to re-plan its sleep
    fn with<R>(&self, f: impl FnOnce(&mut Dispatcher) -> R) -> R {
        let out = {
            let mut dispatcher = self.shared.dispatcher.lock();
            f(&mut *dispatcher)
        };
        self.shared.wake.notify_one();
        out
    }

    pub fn begin_session(&self, generation: Generation, clock: PlaybackClock) {
        self.with(|d| d.begin_session(generation, clock))
    }

    pub fn schedule(&self, action: ScheduledAction, generation: Generation) -> bool {
        self.with(|d| d.schedule(action, generation))
    }

    pub fn schedule_all(&self, actions: Vec<ScheduledAction>, generation: Generation) -> usize {
        self.with(|d| d.schedule_all(actions, generation))
    }

    pub fn cancel_generation(&self, generation: Generation) -> bool {
        self.with(|d| d.cancel_generation(generation))
    }

    pub fn set_idle_pattern(&self, pattern: LightPattern) {
        self.with(|d| d.set_idle_pattern(pattern))
    }

    pub fn blackout(&self) {
        self.with(|d| d.blackout())
    }

    pub fn session_finished(&self, generation: Generation) -> bool {
        self.shared.dispatcher.lock().session_finished(generation)
    }

    pub fn poll_now(&self) -> Duration {
        self.shared.dispatcher.lock().poll()
    }

    pub fn song_time(&self) -> Option<f64> {
        self.shared.dispatcher.lock().song_time()
    }

    pub fn active(&self) -> Option<Generation> {
        self.shared.dispatcher.lock().active()
    }

    pub fn resident_count(&self) -> usize {
        self.shared.dispatcher.lock().resident_count()
    }

    pub fn lit(&self) -> [bool; NUM_CHANNELS] {
        self.shared.dispatcher.lock().lit()
    }

    /// Stop the worker and wait for it. Channels are left as they are.
    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.wake.notify_all();
        let Some(worker) = &self.worker else { return };
        if let Some(thread) = worker.lock().take() {
            if thread.join().is_err() {
                warn!("dispatch worker panicked");
            }
        }
    }
}

fn worker_loop(shared: &Shared) {
    debug!("dispatch worker running");
    let mut dispatcher = shared.dispatcher.lock();
    while shared.running.load(Ordering::SeqCst) {
        let wait = dispatcher.poll();
        let deadline = Instant::now() + wait;
        shared.wake.wait_until(&mut dispatcher, deadline);
    }
    debug!("dispatch worker stopped");
}
