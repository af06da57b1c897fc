use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};

use crate::shared::{Button, ControlEvent};

// poll the terminal for one key and map it to a control event
pub fn poll_input(timeout: Duration) -> anyhow::Result<Option<ControlEvent>> {
    if !event::poll(timeout)? {
        return Ok(None);
    }
    if let Event::Key(key) = event::read()? {
        if key.kind != KeyEventKind::Press {
            return Ok(None);
        }
        // raw mode swallows ctrl-c, treat it as quit
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Ok(Some(ControlEvent::Quit));
        }
        return Ok(map_key(key.code));
    }
    Ok(None)
}

pub fn map_key(code: KeyCode) -> Option<ControlEvent> {
    match code {
        KeyCode::Esc | KeyCode::Char('q') => Some(ControlEvent::Quit),
        KeyCode::Char('p') => Some(ControlEvent::Press(Button::Power)),
        KeyCode::Char('m') => Some(ControlEvent::Press(Button::Mode)),
        KeyCode::Char('l') | KeyCode::Char(' ') => Some(ControlEvent::Press(Button::Lightshow)),
        _ => None,
    }
}
