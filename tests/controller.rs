use std::sync::Arc;

use lightshow::audio::BackendFactory;
use lightshow::channel::RecordingDriver;
use lightshow::clock::ManualClock;
use lightshow::controller::{ControllerSettings, Mode, ModeController, SimulatedPower};
use lightshow::dispatch::{DispatchSettings, Dispatcher, FlashPattern, TimerDispatch};
use lightshow::pipeline::loader::SongLibrary;
use lightshow::shared::{Button, ControlEvent, LightPattern};

fn song(title: &str, beats: u32) -> String {
    format!(
        r#"{{"title": "{title}", "sections": [
            {{"name": "all", "start_time": 0.0, "tempo": 0.5, "total_beats": {beats}, "sequences": [
                {{"all_beats": true, "actions": [{{"type": "step_down"}}]}}
            ]}}
        ]}}"#
    )
}

struct Show {
    controller: ModeController,
    dispatch: TimerDispatch,
    probe: RecordingDriver,
    time: Arc<ManualClock>,
    done: crossbeam_channel::Receiver<String>,
    _dir: tempfile::TempDir,
}

fn show() -> Show {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("anthem.json"), song("Anthem", 2)).unwrap();
    std::fs::write(dir.path().join("carol.json"), song("Carol", 4)).unwrap();
    std::fs::write(dir.path().join("russian.json"), song("Russian", 1)).unwrap();
    std::fs::write(
        dir.path().join("playlist.json"),
        r#"{"playlist": ["russian", "carol", "anthem"]}"#,
    )
    .unwrap();

    let probe = RecordingDriver::new();
    let time = Arc::new(ManualClock::new());
    let dispatch = TimerDispatch::without_worker(Dispatcher::with_flash(
        Box::new(probe.clone()),
        time.clone(),
        DispatchSettings::default(),
        FlashPattern::seeded(9),
    ));
    let (tx, done) = crossbeam_channel::unbounded();
    let controller = ModeController::new(
        SongLibrary::open(dir.path()),
        dispatch.clone(),
        Box::new(BackendFactory::silent()),
        Box::new(SimulatedPower),
        time.clone(),
        ControllerSettings::default(),
    )
    .with_completions(tx);
    Show { controller, dispatch, probe, time, done, _dir: dir }
}

impl Show {
    fn press(&mut self, button: Button) {
        self.time.advance_secs(0.6);
        self.controller.handle(ControlEvent::Press(button));
    }

    fn run_until_idle(&mut self) {
        for _ in 0..2000 {
            if matches!(self.controller.mode(), Mode::Idle { .. }) {
                return;
            }
            self.time.advance_secs(0.01);
            self.dispatch.poll_now();
            self.controller.tick();
        }
        panic!("show never returned to idle");
    }

    fn playing(&self) -> Option<&str> {
        match self.controller.mode() {
            Mode::MusicLightshow { song_id, .. } => Some(song_id),
            _ => None,
        }
    }
}

#[test]
fn playlist_order_drives_consecutive_shows() {
    let mut s = show();
    assert_eq!(s.controller.mode(), &Mode::Idle { pattern: LightPattern::SlowFlash });

    let mut played = Vec::new();
    for _ in 0..4 {
        s.press(Button::Lightshow);
        played.push(s.playing().unwrap().to_string());
        s.run_until_idle();
        // slow flash starts dark
        assert!(s.probe.all_off());
    }
    assert_eq!(played, ["russian", "carol", "anthem", "russian"]);

    let finished: Vec<String> = s.done.try_iter().collect();
    assert_eq!(finished, played);
}

#[test]
fn trigger_and_buttons_share_one_session_at_a_time() {
    let mut s = show();
    s.controller.handle(ControlEvent::ExternalTrigger);
    assert_eq!(s.playing(), Some("russian"));
    let first = s.dispatch.active().unwrap();

    s.press(Button::Lightshow);
    assert_eq!(s.playing(), Some("carol"));
    let second = s.dispatch.active().unwrap();
    assert!(second > first);

    s.press(Button::Mode);
    assert_eq!(s.controller.mode(), &Mode::Idle { pattern: LightPattern::SlowFlash });
    assert!(s.dispatch.active().is_none());
    assert!(s.done.try_recv().is_err());
}

#[test]
fn power_from_idle_shuts_down_after_grace() {
    let mut s = show();
    s.press(Button::Power);
    assert_eq!(s.controller.mode(), &Mode::ShuttingDown);
    assert!(s.probe.all_off());
    s.controller.handle(ControlEvent::ExternalTrigger);
    assert_eq!(s.controller.mode(), &Mode::ShuttingDown);

    s.time.advance_secs(2.1);
    s.controller.tick();
    assert!(s.controller.is_finished());
}
