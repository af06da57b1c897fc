// Wire shape of a song timing document. The editor and the simulator write
// these field names, so they're a contract: don't rename.
//
// Deliberately loose: sections, sequences and actions stay as raw JSON values
// at this level so one bad entry can be dropped on its own instead of failing
// the whole song. `loader.rs` deserializes them one at a time.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct SongDocument {
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mp3_file: String,
    pub sections: Vec<Value>,
    #[serde(default)]
    pub phrases: BTreeMap<String, Value>,
}

// simple section: timing fields + sequences
// segmented section: name + segments, each segment shaped like a simple section
#[derive(Debug, Default, Deserialize)]
pub struct SectionDocument {
    #[serde(default)]
    pub name: Option<String>,
    pub start_time: Option<f64>,
    pub tempo: Option<f64>,
    pub total_beats: Option<i64>,
    pub sequences: Option<Vec<Value>>,
    pub segments: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
pub struct SequenceDocument {
    pub beat: Option<i64>,
    pub beats: Option<Vec<i64>>,
    #[serde(default)]
    pub all_beats: bool,
    #[serde(default)]
    pub actions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionDocument {
    Note {
        channel: i64,
        delay: Option<f64>,
        delay_multiplier: Option<f64>,
        duration: Option<f64>,
        duration_multiplier: Option<f64>,
    },
    Phrase {
        id: PhraseKey,
    },
    AllChannels {
        duration: Option<f64>,
        duration_multiplier: Option<f64>,
    },
    StepUp,
    StepDown,
    FlashMode {
        mode: i64,
    },
}

// the editor writes phrase ids as either "1" or 1
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PhraseKey {
    Text(String),
    Number(i64),
}

impl PhraseKey {
    pub fn into_key(self) -> String {
        match self {
            PhraseKey::Text(s) => s,
            PhraseKey::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PhraseDocument {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub notes: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct PhraseNoteDocument {
    pub channel: i64,
    #[serde(default)]
    pub delay_multiplier: f64,
    pub duration_multiplier: f64,
}

// <songs_dir>/playlist.json
#[derive(Debug, Default, Deserialize)]
pub struct PlaylistDocument {
    #[serde(default)]
    pub playlist: Vec<String>,
}
