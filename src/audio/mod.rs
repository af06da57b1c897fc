// Audio output backends behind the `AudioPlayer` adapter.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audio_api::{AudioPlayer, PlayerFactory};

mod process;
#[cfg(feature = "streaming")]
mod sample_buffer;
mod silent;
#[cfg(feature = "streaming")]
mod wav;

pub use process::ProcessPlayer;
pub use silent::SilentPlayer;
#[cfg(feature = "streaming")]
pub use wav::WavPlayer;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioBackend {
    // process if a command is configured, else wav if built with
    // `streaming`, else silent
    #[default]
    Auto,
    Wav,
    Process,
    Silent,
}

pub struct BackendFactory {
    backend: AudioBackend,
    command: Vec<String>,
}

impl BackendFactory {
    pub fn new(backend: AudioBackend, command: Vec<String>) -> Self {
        let backend = match backend {
            AudioBackend::Auto if !command.is_empty() => AudioBackend::Process,
            AudioBackend::Auto if cfg!(feature = "streaming") => AudioBackend::Wav,
            AudioBackend::Auto => AudioBackend::Silent,
            other => other,
        };
        info!(?backend, "audio backend selected");
        Self { backend, command }
    }

    pub fn silent() -> Self {
        Self { backend: AudioBackend::Silent, command: Vec::new() }
    }

    pub fn backend(&self) -> AudioBackend {
        self.backend
    }
}

impl PlayerFactory for BackendFactory {
    fn create(&self) -> Box<dyn AudioPlayer> {
        match self.backend {
            AudioBackend::Process => Box::new(ProcessPlayer::new(self.command.clone())),
            #[cfg(feature = "streaming")]
            AudioBackend::Wav => Box::new(WavPlayer::new()),
            #[cfg(not(feature = "streaming"))]
            AudioBackend::Wav => {
                tracing::warn!("built without the `streaming` feature, wav backend is silent");
                Box::new(SilentPlayer)
            }
            AudioBackend::Auto | AudioBackend::Silent => Box::new(SilentPlayer),
        }
    }
}
