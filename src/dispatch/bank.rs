// The only writer to the channel driver.
//
// A channel is lit if a note holds it or the flash layer has it on. Holds
// are tracked per channel by HoldId: a later On takes the channel over, and
// an Off only releases the channel if its hold still owns it. A note that
// starts inside a longer one owns the channel from then on, so its Off ends
// the longer note early too.

use tracing::warn;

use crate::channel::ChannelDriver;
use crate::pipeline::schedule::HoldId;
use crate::shared::{ChannelId, ChannelMask, NUM_CHANNELS};

pub struct ChannelBank {
    driver: Box<dyn ChannelDriver>,
    holders: [Option<HoldId>; NUM_CHANNELS],
    flash: [bool; NUM_CHANNELS],
    output: [bool; NUM_CHANNELS], // last value written to the driver
}

impl ChannelBank {
    pub fn new(driver: Box<dyn ChannelDriver>) -> Self {
        Self {
            driver,
            holders: [None; NUM_CHANNELS],
            flash: [false; NUM_CHANNELS],
            output: [false; NUM_CHANNELS],
        }
    }

    pub fn hold_on(&mut self, channels: ChannelMask, hold: HoldId) {
        for ch in channels.channels() {
            self.holders[ch.index()] = Some(hold);
        }
        self.sync();
    }

    pub fn hold_off(&mut self, channels: ChannelMask, hold: HoldId) {
        for ch in channels.channels() {
            if self.holders[ch.index()] == Some(hold) {
                self.holders[ch.index()] = None;
            }
        }
        self.sync();
    }

    pub fn set_flash(&mut self, states: [bool; NUM_CHANNELS]) {
        self.flash = states;
        self.sync();
    }

    pub fn is_lit(&self, channel: ChannelId) -> bool {
        self.output[channel.index()]
    }

    pub fn lit(&self) -> [bool; NUM_CHANNELS] {
        self.output
    }

    /// Drop every hold and the flash layer, then write every channel off,
    /// whether or not we think it's already off.
    pub fn all_off(&mut self) {
        self.holders = [None; NUM_CHANNELS];
        self.flash = [false; NUM_CHANNELS];
        for ch in ChannelId::all() {
            self.write(ch, false);
        }
    }

    fn sync(&mut self) {
        for ch in ChannelId::all() {
            let i = ch.index();
            let want = self.holders[i].is_some() || self.flash[i];
            if want != self.output[i] {
                self.write(ch, want);
            }
        }
    }

    fn write(&mut self, channel: ChannelId, on: bool) {
        // keep the intended state even if the write failed; the next change
        // retries
        self.output[channel.index()] = on;
        if let Err(e) = self.driver.set_channel(channel, on) {
            warn!(%channel, on, "{e}");
        }
    }
}
