// Hands the track to an external player process (e.g. `omxplayer -o local`
// on a Pi, or `mpg123 -q` on a desktop). The process can't be asked where it
// is, and it takes a moment to open the device, so position is only an
// estimate: Lagging timing, the clock compensates.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Instant;

use tracing::{debug, warn};

use crate::audio_api::{AudioPlayer, PositionTiming};
use crate::error::PlayerError;

pub struct ProcessPlayer {
    command: Vec<String>,
    track: Option<PathBuf>,
    child: Option<Child>,
    started: Option<Instant>,
}

impl ProcessPlayer {
    pub fn new(command: Vec<String>) -> Self {
        Self { command, track: None, child: None, started: None }
    }
}

impl AudioPlayer for ProcessPlayer {
    fn load(&mut self, path: &Path) -> Result<(), PlayerError> {
        self.stop();
        if self.command.is_empty() {
            return Err(PlayerError::Unavailable("no player command configured".into()));
        }
        if !path.is_file() {
            return Err(PlayerError::Unavailable(format!("{} does not exist", path.display())));
        }
        self.track = Some(path.to_path_buf());
        Ok(())
    }

    fn play(&mut self) -> Result<(), PlayerError> {
        let track = self
            .track
            .clone()
            .ok_or_else(|| PlayerError::Unavailable("nothing loaded".into()))?;
        self.stop();
        let (program, args) = match self.command.split_first() {
            Some(split) => split,
            None => return Err(PlayerError::Unavailable("no player command configured".into())),
        };
        let child = Command::new(program)
            .args(args)
            .arg(&track)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        debug!(pid = child.id(), program = %program, "player process started");
        self.child = Some(child);
        self.started = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            // already exited is fine
            let _ = child.kill();
            if let Err(e) = child.wait() {
                warn!("could not reap player process: {e}");
            }
        }
        self.started = None;
    }

    fn is_playing(&mut self) -> bool {
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                debug!(%status, "player process exited");
                false
            }
            Some(Err(e)) => {
                warn!("cannot poll player process: {e}");
                false
            }
            None => false,
        }
    }

    fn position_seconds(&mut self) -> f64 {
        self.started.map_or(0.0, |t| t.elapsed().as_secs_f64())
    }

    fn timing(&self) -> PositionTiming {
        PositionTiming::Lagging
    }
}

impl Drop for ProcessPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}
