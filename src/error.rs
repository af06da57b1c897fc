// Error types for the lightshow engine.
//
// Only failures that stop a whole unit of work are errors here. Problems
// confined to one section or action of a timing document are logged and the
// offending item is dropped (see `pipeline::loader`).

use std::path::PathBuf;

use thiserror::Error;

/// A timing document that cannot be used at all. The song is excluded from
/// the playlist rotation.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("song '{song}' is not valid JSON: {source}")]
    Parse {
        song: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("song '{song}' is malformed: {message}")]
    Structure { song: String, message: String },
}

/// An audio backend that could not load or start a track. The playback clock
/// falls back to simulated timing when it sees one of these.
#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("audio backend unavailable: {0}")]
    Unavailable(String),

    #[error("cannot decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("audio device error: {0}")]
    Device(String),

    #[error("player process failed: {0}")]
    Process(#[from] std::io::Error),
}

#[derive(Error, Debug)]
#[error("channel write failed: {0}")]
pub struct DriverError(pub String);

/// Integration endpoint could not be reached or answered with an error.
/// The poller backs off and tries again later.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("integration request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("integration endpoint not configured")]
    NotConfigured,
}
