// Optional HTTP integration. While idle, a check URL is polled; a body of
// "1" starts the show as if the lightshow button had been pressed. When a
// song finishes on its own, the done URL is called with the song id.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::error::TriggerError;
use crate::shared::ControlEvent;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TriggerClient {
    http: reqwest::blocking::Client,
    check_url: String,
    done_url: Option<String>,
}

impl TriggerClient {
    /// `None` when no check URL is configured: there's nothing to poll.
    pub fn from_config(api: &ApiConfig) -> Result<Option<Self>, TriggerError> {
        if api.integration_check_url.is_empty() {
            return Ok(None);
        }
        let done_url = Some(api.integration_done_url.clone()).filter(|u| !u.is_empty());
        Self::new(api.integration_check_url.clone(), done_url).map(Some)
    }

    pub fn new(check_url: String, done_url: Option<String>) -> Result<Self, TriggerError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, check_url, done_url })
    }

    pub fn check(&self) -> Result<bool, TriggerError> {
        let body = self
            .http
            .get(&self.check_url)
            .send()?
            .error_for_status()?
            .text()?;
        Ok(body.trim() == "1")
    }

    pub fn notify_done(&self, song_id: &str) -> Result<(), TriggerError> {
        let url = self.done_url.as_ref().ok_or(TriggerError::NotConfigured)?;
        self.http
            .get(url)
            .query(&[("song", song_id)])
            .send()?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PollSettings {
    pub interval: Duration,
    // pause after a failed request
    pub backoff: Duration,
}

/// Poll `client` on its own thread. Checks only happen while `idle` is set.
/// Song ids arriving on `completions` are reported to the done URL. The
/// thread exits when the `completions` sender is dropped or `events` has no
/// receiver left.
pub fn spawn_poller(
    client: TriggerClient,
    settings: PollSettings,
    idle: Arc<AtomicBool>,
    events: Sender<ControlEvent>,
    completions: Receiver<String>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("trigger-poll".into())
        .spawn(move || {
            info!(url = %client.check_url, "polling integration endpoint");
            let mut wait = settings.interval;
            loop {
                match completions.recv_timeout(wait) {
                    Ok(song_id) => {
                        if let Err(e) = client.notify_done(&song_id) {
                            warn!(song = %song_id, "completion notification failed: {e}");
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }

                wait = settings.interval;
                if !idle.load(Ordering::SeqCst) {
                    continue;
                }
                match client.check() {
                    Ok(true) => {
                        debug!("integration trigger received");
                        if events.send(ControlEvent::ExternalTrigger).is_err() {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("integration check failed, backing off: {e}");
                        wait = settings.backoff;
                    }
                }
            }
            debug!("trigger poller stopped");
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_check_url_means_no_client() {
        let api = ApiConfig::default();
        assert!(TriggerClient::from_config(&api).unwrap().is_none());
    }

    #[test]
    fn done_without_url_is_not_configured() {
        let client = TriggerClient::new("http://127.0.0.1:9/check".into(), None).unwrap();
        assert!(matches!(client.notify_done("song"), Err(TriggerError::NotConfigured)));
    }

    #[test]
    fn poller_exits_when_completions_close() {
        let client = TriggerClient::new("http://127.0.0.1:9/check".into(), None).unwrap();
        let (events_tx, _events_rx) = crossbeam_channel::unbounded();
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<String>();
        let idle = Arc::new(AtomicBool::new(false));
        let settings = PollSettings {
            interval: Duration::from_millis(10),
            backoff: Duration::from_millis(10),
        };
        let handle = spawn_poller(client, settings, idle, events_tx, done_rx).unwrap();
        drop(done_tx);
        handle.join().unwrap();
    }
}
