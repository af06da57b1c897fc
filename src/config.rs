// config.json: where the songs are, which audio backend to use, integration
// URLs and the timing knobs that were tuned per device. Everything has a
// default, so a missing file or a missing key is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audio::AudioBackend;
use crate::clock::ClockSettings;
use crate::dispatch::DispatchSettings;
use crate::shared::LightPattern;

pub const CHECK_URL_ENV: &str = "INTEGRATION_CHECK_URL";
pub const DONE_URL_ENV: &str = "INTEGRATION_DONE_URL";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub songs_dir: Option<PathBuf>,
    pub api: ApiConfig,
    pub audio: AudioConfig,
    pub timing: TimingConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub integration_check_url: String,
    pub integration_done_url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub backend: AudioBackend,
    // program + args; the track path is appended
    pub command: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub settle_delay_ms: u64,
    pub start_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub sweep_every: usize,
    pub max_resident_entries: usize,
    pub step_stagger_fraction: f64,
    pub grace_delay_ms: u64,
    pub debounce_ms: u64,
    pub trigger_poll_interval_ms: u64,
    pub trigger_backoff_ms: u64,
    pub initial_pattern: LightPattern,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 100,
            start_timeout_ms: 2000,
            poll_interval_ms: 10,
            sweep_every: 64,
            max_resident_entries: 4096,
            step_stagger_fraction: 0.1,
            grace_delay_ms: 2000,
            debounce_ms: 500,
            trigger_poll_interval_ms: 1000,
            trigger_backoff_ms: 10_000,
            initial_pattern: LightPattern::SlowFlash,
        }
    }
}

impl TimingConfig {
    pub fn clock(&self) -> ClockSettings {
        ClockSettings {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            start_timeout: Duration::from_millis(self.start_timeout_ms),
        }
    }

    pub fn dispatch(&self) -> DispatchSettings {
        DispatchSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            sweep_every: self.sweep_every,
            max_resident: self.max_resident_entries,
        }
    }
}

impl Config {
    /// Read `path`. Missing file -> defaults; unreadable or invalid -> a
    /// warning and defaults. Environment overrides are applied either way.
    pub fn load(path: &Path) -> Self {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<Config>(&text) {
                Ok(c) => {
                    info!(path = %path.display(), "loaded config");
                    c
                }
                Err(e) => {
                    warn!(path = %path.display(), "invalid config, using defaults: {e}");
                    Config::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => {
                warn!(path = %path.display(), "cannot read config, using defaults: {e}");
                Config::default()
            }
        };
        config.apply_env(env);
        config
    }

    // env only fills URLs the file left empty
    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if self.api.integration_check_url.is_empty() {
            if let Some(url) = env(CHECK_URL_ENV) {
                self.api.integration_check_url = url;
            }
        }
        if self.api.integration_done_url.is_empty() {
            if let Some(url) = env(DONE_URL_ENV) {
                self.api.integration_done_url = url;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = Config::load_with_env(&dir.path().join("config.json"), no_env);
        assert_eq!(c, Config::default());
        assert_eq!(c.timing.initial_pattern, LightPattern::SlowFlash);
        assert_eq!(c.timing.clock().settle_delay, Duration::from_millis(100));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"api": {"integration_check_url": "http://host/check"},
                "audio": {"backend": "process", "command": ["mpg123", "-q"]},
                "timing": {"debounce_ms": 250, "initial_pattern": "fast_flash"}}"#,
        )
        .unwrap();
        let c = Config::load_with_env(&path, no_env);
        assert_eq!(c.api.integration_check_url, "http://host/check");
        assert_eq!(c.audio.backend, AudioBackend::Process);
        assert_eq!(c.timing.debounce_ms, 250);
        assert_eq!(c.timing.initial_pattern, LightPattern::FastFlash);
        assert_eq!(c.timing.grace_delay_ms, 2000);
    }

    #[test]
    fn invalid_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert_eq!(Config::load_with_env(&path, no_env), Config::default());
    }

    #[test]
    fn env_fills_empty_urls_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api": {"integration_done_url": "http://file/done"}}"#).unwrap();
        let env = |key: &str| match key {
            CHECK_URL_ENV => Some("http://env/check".to_string()),
            DONE_URL_ENV => Some("http://env/done".to_string()),
            _ => None,
        };
        let c = Config::load_with_env(&path, env);
        assert_eq!(c.api.integration_check_url, "http://env/check");
        assert_eq!(c.api.integration_done_url, "http://file/done");
    }
}
