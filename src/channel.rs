// Output side: something that can switch a light channel on or off.
//
// Drivers only ever see writes from the dispatcher's channel bank, one at a
// time, so implementations don't need their own locking.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::DriverError;
use crate::shared::{ChannelId, NUM_CHANNELS};

pub trait ChannelDriver: Send {
    fn set_channel(&mut self, channel: ChannelId, on: bool) -> Result<(), DriverError>;
}

// For headless runs: every write becomes a trace line.
#[derive(Debug, Default)]
pub struct LogDriver;

impl ChannelDriver for LogDriver {
    fn set_channel(&mut self, channel: ChannelId, on: bool) -> Result<(), DriverError> {
        debug!(%channel, on, "channel write");
        Ok(())
    }
}

/// Keeps every write and the resulting channel states. Clones share the
/// same record, so a test can hand one clone to the dispatcher and inspect
/// the other.
#[derive(Clone, Debug, Default)]
pub struct RecordingDriver {
    inner: Arc<Mutex<Recording>>,
}

#[derive(Debug, Default)]
struct Recording {
    writes: Vec<(ChannelId, bool)>,
    states: [bool; NUM_CHANNELS],
    fail: bool,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<(ChannelId, bool)> {
        self.inner.lock().writes.clone()
    }

    pub fn states(&self) -> [bool; NUM_CHANNELS] {
        self.inner.lock().states
    }

    pub fn is_on(&self, channel: ChannelId) -> bool {
        self.inner.lock().states[channel.index()]
    }

    pub fn all_off(&self) -> bool {
        self.inner.lock().states.iter().all(|s| !s)
    }

    pub fn clear_writes(&self) {
        self.inner.lock().writes.clear();
    }

    // make every later write fail, to exercise error logging
    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().fail = fail;
    }
}

impl ChannelDriver for RecordingDriver {
    fn set_channel(&mut self, channel: ChannelId, on: bool) -> Result<(), DriverError> {
        let mut rec = self.inner.lock();
        if rec.fail {
            return Err(DriverError(format!("{channel} rejected write")));
        }
        rec.writes.push((channel, on));
        rec.states[channel.index()] = on;
        Ok(())
    }
}
