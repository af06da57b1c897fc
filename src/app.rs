// Wires the pieces together and runs the control loop until quit or power
// off.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use tracing::{info, warn};

use crate::audio::BackendFactory;
use crate::channel::{ChannelDriver, LogDriver};
use crate::clock::{SystemTime, TimeSource};
use crate::config::Config;
use crate::controller::{
    ControllerSettings, ModeController, PowerControl, SimulatedPower, SystemPower,
};
use crate::dispatch::{Dispatcher, TimerDispatch};
use crate::pipeline::loader::SongLibrary;
use crate::shared::ControlEvent;
use crate::trigger::{self, PollSettings, TriggerClient};
use crate::tui;

// how often the controller checks for song completion with no input
const TICK: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub simulate: bool,
    pub songs_dir: PathBuf,
}

pub fn run(config: &Config, opts: &RunOptions) -> anyhow::Result<()> {
    let time: Arc<dyn TimeSource> = Arc::new(SystemTime);

    // terminal lamps need raw mode so key presses don't echo over them
    let _raw = if opts.simulate { Some(tui::RawModeGuard::enable()?) } else { None };

    let driver: Box<dyn ChannelDriver> = if opts.simulate {
        Box::new(tui::TerminalLamps::stdout())
    } else {
        Box::new(LogDriver)
    };
    let dispatcher = Dispatcher::new(driver, Arc::clone(&time), config.timing.dispatch());
    let dispatch = TimerDispatch::spawn(dispatcher).context("starting dispatch worker")?;

    let players = BackendFactory::new(config.audio.backend, config.audio.command.clone());
    let power: Box<dyn PowerControl> = if opts.simulate {
        Box::new(SimulatedPower)
    } else {
        Box::new(SystemPower)
    };
    let library = SongLibrary::open(&opts.songs_dir);
    if library.is_empty() {
        warn!(dir = %opts.songs_dir.display(), "no songs found");
    }

    let (events_tx, events_rx) = unbounded::<ControlEvent>();
    let mut controller = ModeController::new(
        library,
        dispatch.clone(),
        Box::new(players),
        power,
        Arc::clone(&time),
        ControllerSettings::from(&config.timing),
    );

    let mut poller = None;
    match TriggerClient::from_config(&config.api) {
        Ok(Some(client)) => {
            let (done_tx, done_rx) = unbounded();
            controller = controller.with_completions(done_tx);
            let settings = PollSettings {
                interval: Duration::from_millis(config.timing.trigger_poll_interval_ms),
                backoff: Duration::from_millis(config.timing.trigger_backoff_ms),
            };
            let idle = controller.idle_flag();
            poller = Some(
                trigger::spawn_poller(client, settings, idle, events_tx.clone(), done_rx)
                    .context("starting trigger poller")?,
            );
        }
        Ok(None) => {}
        Err(e) => warn!("integration disabled: {e}"),
    }

    if opts.simulate {
        tui::spawn_input(events_tx.clone()).context("starting keyboard input")?;
        info!("keys: l/space lightshow, m mode, p power, q/esc quit");
    }

    control_loop(&mut controller, &events_rx);

    dispatch.blackout();
    dispatch.shutdown();
    drop(controller); // closes the completion channel, poller exits
    if let Some(handle) = poller {
        let _ = handle.join();
    }
    info!("stopped");
    Ok(())
}

fn control_loop(controller: &mut ModeController, events: &Receiver<ControlEvent>) {
    while !controller.is_finished() {
        match events.recv_timeout(TICK) {
            Ok(event) => controller.handle(event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        controller.tick();
    }
}
