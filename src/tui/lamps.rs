// Lamp row on one terminal line, in physical order, redrawn in place on
// every write.

use std::io::Write;

use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::queue;

use crate::channel::ChannelDriver;
use crate::error::DriverError;
use crate::shared::{ChannelId, NUM_CHANNELS, PHYSICAL_ORDER};

pub struct TerminalLamps<W: Write + Send> {
    out: W,
    states: [bool; NUM_CHANNELS],
}

impl TerminalLamps<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TerminalLamps<W> {
    pub fn new(out: W) -> Self {
        Self { out, states: [false; NUM_CHANNELS] }
    }

    pub fn row(&self) -> String {
        PHYSICAL_ORDER
            .iter()
            .map(|ch| if self.states[ch.index()] { '●' } else { '○' })
            .map(|c| format!("{c} "))
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    fn redraw(&mut self) -> std::io::Result<()> {
        let row = self.row();
        queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine), Print(row))?;
        self.out.flush()
    }
}

impl<W: Write + Send> ChannelDriver for TerminalLamps<W> {
    fn set_channel(&mut self, channel: ChannelId, on: bool) -> Result<(), DriverError> {
        self.states[channel.index()] = on;
        self.redraw().map_err(|e| DriverError(e.to_string()))
    }
}
