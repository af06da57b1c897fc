// Beat-synchronised light choreography.
//
// A song's timing document is validated ([`pipeline::loader`]), expanded to
// absolute channel on/off times ([`pipeline::schedule`]), and fired against
// the song clock of whatever audio backend is playing ([`dispatch`],
// [`clock`]). [`controller::ModeController`] maps the three buttons onto
// idle patterns, song playback, and power off.

pub mod app;
pub mod audio;
pub mod audio_api;
pub mod channel;
pub mod clock;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod shared;
pub mod trigger;
pub mod tui;
