// Terminal stand-in for the button box and the lamps.

pub mod input;
pub mod lamps;

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use crossterm::terminal;
use tracing::{debug, warn};

use crate::shared::ControlEvent;

pub use lamps::TerminalLamps;

/// Raw mode for as long as this lives.
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        // leave the lamp row on its own line
        let _ = crossterm::execute!(std::io::stdout(), crossterm::style::Print("\n"));
    }
}

// keyboard -> control events until quit or the receiver goes away
pub fn spawn_input(events: Sender<ControlEvent>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new().name("keyboard".into()).spawn(move || {
        loop {
            match input::poll_input(Duration::from_millis(50)) {
                Ok(Some(event)) => {
                    let quit = event == ControlEvent::Quit;
                    if events.send(event).is_err() || quit {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("keyboard input failed: {e:#}");
                    let _ = events.send(ControlEvent::Quit);
                    break;
                }
            }
        }
        debug!("keyboard thread stopped");
    })
}
