// WAV playback through the default cpal output device.
//
// cpal::Stream is !Send, so the stream lives on its own thread for the whole
// track; the player talks to it through atomics and a stop channel. The
// output callback advances a frame cursor, which doubles as the playback
// position, so this backend reports Direct timing.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Sender, bounded};
use tracing::{debug, warn};

use super::sample_buffer::{TrackBuffer, decode_wav};
use crate::audio_api::{AudioPlayer, PositionTiming};
use crate::error::PlayerError;

struct Playback {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

#[derive(Default)]
pub struct WavPlayer {
    track: Option<Arc<TrackBuffer>>,
    cursor: Arc<AtomicUsize>,
    finished: Arc<AtomicBool>,
    playback: Option<Playback>,
}

impl WavPlayer {
    pub fn new() -> Self {
        Self::default()
    }
}

fn output_device() -> Result<(cpal::Device, cpal::SupportedStreamConfig), PlayerError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlayerError::Device("no default output device".into()))?;
    let config = device
        .default_output_config()
        .map_err(|e| PlayerError::Device(e.to_string()))?;
    if config.sample_format() != cpal::SampleFormat::F32 {
        return Err(PlayerError::Device(format!(
            "unsupported sample format {:?} (only f32)",
            config.sample_format()
        )));
    }
    Ok((device, config))
}

impl AudioPlayer for WavPlayer {
    fn load(&mut self, path: &Path) -> Result<(), PlayerError> {
        self.stop();
        let is_wav = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if !is_wav {
            return Err(PlayerError::Unavailable(format!(
                "{} is not a WAV file",
                path.display()
            )));
        }
        let (_, config) = output_device()?;
        let track = decode_wav(path, config.sample_rate().0)?;
        debug!(path = %path.display(), seconds = track.duration_seconds(), "decoded track");
        self.track = Some(Arc::new(track));
        Ok(())
    }

    fn play(&mut self) -> Result<(), PlayerError> {
        let track = self
            .track
            .clone()
            .ok_or_else(|| PlayerError::Unavailable("nothing loaded".into()))?;
        self.stop();
        self.cursor.store(0, Ordering::Relaxed);
        self.finished.store(false, Ordering::Relaxed);

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<(), PlayerError>>(1);
        let cursor = Arc::clone(&self.cursor);
        let finished = Arc::clone(&self.finished);

        let thread = std::thread::Builder::new()
            .name("wav-output".into())
            .spawn(move || {
                let stream = match build_stream(track, cursor, finished) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(PlayerError::Device(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // park until stop() or the player is dropped
                let _ = stop_rx.recv();
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.playback = Some(Playback { stop_tx, thread });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(PlayerError::Device("output thread exited early".into())),
        }
    }

    fn stop(&mut self) {
        if let Some(p) = self.playback.take() {
            let _ = p.stop_tx.send(());
            if p.thread.join().is_err() {
                warn!("wav output thread panicked");
            }
        }
        self.finished.store(true, Ordering::Relaxed);
    }

    fn is_playing(&mut self) -> bool {
        self.playback.is_some() && !self.finished.load(Ordering::Relaxed)
    }

    fn position_seconds(&mut self) -> f64 {
        match &self.track {
            Some(t) => self.cursor.load(Ordering::Relaxed) as f64 / f64::from(t.sample_rate),
            None => 0.0,
        }
    }

    fn timing(&self) -> PositionTiming {
        PositionTiming::Direct
    }
}

impl Drop for WavPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream(
    track: Arc<TrackBuffer>,
    cursor: Arc<AtomicUsize>,
    finished: Arc<AtomicBool>,
) -> Result<cpal::Stream, PlayerError> {
    let (device, supported) = output_device()?;
    let config: cpal::StreamConfig = supported.into();
    let channels = usize::from(config.channels);

    let err_fn = |err| warn!("audio output stream error: {err}");

    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info| {
                let mut pos = cursor.load(Ordering::Relaxed);
                for out in data.chunks_mut(channels) {
                    let frame = track.frames.get(pos).copied().unwrap_or_default();
                    for (i, sample) in out.iter_mut().enumerate() {
                        *sample = if i % 2 == 0 { frame.left } else { frame.right };
                    }
                    if pos < track.frames.len() {
                        pos += 1;
                    }
                }
                cursor.store(pos, Ordering::Relaxed);
                if pos >= track.frames.len() {
                    finished.store(true, Ordering::Relaxed);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| PlayerError::Device(e.to_string()))
}
