// Turns timing documents into validated `Song`s, and keeps the playlist of
// songs found in the songs directory.
//
// Failure granularity:
//   - document unreadable / not JSON / missing title or sections -> LoadError,
//     the song leaves the rotation
//   - bad section or segment -> that region is dropped
//   - bad sequence -> that sequence is dropped
//   - bad action or phrase note -> that one item is dropped
// Every drop is logged with the song id and where it happened.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::document::{
    ActionDocument, PhraseDocument, PhraseNoteDocument, PlaylistDocument, SectionDocument,
    SequenceDocument, SongDocument,
};
use super::song::{Action, BeatSpec, Phrase, PhraseNote, Section, Sequence, Song, TimeValue, Timing};
use crate::error::LoadError;
use crate::shared::{ChannelId, FlashMode};

const PLAYLIST_FILE: &str = "playlist.json";
const SONG_EXT: &str = "json";

/// Parse and validate one timing document.
pub fn load(document: &str, song_id: &str) -> Result<Song, LoadError> {
    let raw: Value = serde_json::from_str(document).map_err(|source| LoadError::Parse {
        song: song_id.to_string(),
        source,
    })?;
    if !raw.is_object() {
        return Err(LoadError::Structure {
            song: song_id.to_string(),
            message: "top level is not an object".to_string(),
        });
    }
    let doc: SongDocument = serde_json::from_value(raw).map_err(|e| LoadError::Structure {
        song: song_id.to_string(),
        message: e.to_string(),
    })?;

    // phrases first: Phrase actions are checked against this map
    let mut phrases = BTreeMap::new();
    for (id, value) in doc.phrases {
        let ctx = Ctx::new(song_id, format!("phrase '{id}'"));
        if let Some(phrase) = build_phrase(&ctx, value) {
            phrases.insert(id, phrase);
        }
    }

    let mut sections = Vec::with_capacity(doc.sections.len());
    for (idx, value) in doc.sections.into_iter().enumerate() {
        if let Some(section) = build_section(song_id, idx, value, &phrases) {
            sections.push(section);
        }
    }

    Ok(Song {
        id: song_id.to_string(),
        title: doc.title,
        artist: doc.artist,
        description: doc.description,
        audio_file: doc.mp3_file,
        sections,
        phrases,
    })
}

// Where in the document we are, for log lines.
struct Ctx<'a> {
    song: &'a str,
    at: String,
}

impl<'a> Ctx<'a> {
    fn new(song: &'a str, at: String) -> Self {
        Self { song, at }
    }

    fn child(&self, at: impl std::fmt::Display) -> Ctx<'a> {
        Ctx { song: self.song, at: format!("{} / {at}", self.at) }
    }

    fn drop_item(&self, why: impl std::fmt::Display) {
        warn!(song = self.song, at = %self.at, "dropped: {why}");
    }
}

fn parse_part<T: DeserializeOwned>(ctx: &Ctx<'_>, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            ctx.drop_item(e);
            None
        }
    }
}

fn build_section(
    song: &str,
    idx: usize,
    value: Value,
    phrases: &BTreeMap<String, Phrase>,
) -> Option<Section> {
    let ctx = Ctx::new(song, format!("section #{idx}"));
    let mut doc: SectionDocument = parse_part(&ctx, value)?;
    let name = doc.name.clone().unwrap_or_else(|| format!("section {idx}"));
    let ctx = Ctx::new(song, format!("section '{name}'"));

    let has_simple = doc.start_time.is_some()
        || doc.tempo.is_some()
        || doc.total_beats.is_some()
        || doc.sequences.is_some();

    match (doc.segments.take(), has_simple) {
        (Some(_), true) => {
            ctx.drop_item("has both timing fields and segments");
            None
        }
        (None, false) => {
            ctx.drop_item("has neither timing fields nor segments");
            None
        }
        (Some(segments), false) => {
            let timings: Vec<Timing> = segments
                .into_iter()
                .enumerate()
                .filter_map(|(i, seg)| {
                    let seg_ctx = ctx.child(format_args!("segment #{i}"));
                    let seg_doc: SectionDocument = parse_part(&seg_ctx, seg)?;
                    if seg_doc.segments.is_some() {
                        seg_ctx.drop_item("segments cannot nest");
                        return None;
                    }
                    build_timing(&seg_ctx, seg_doc, phrases)
                })
                .collect();
            if timings.is_empty() {
                ctx.drop_item("no valid segments left");
                return None;
            }
            Some(Section::Segmented { name, segments: timings })
        }
        (None, true) => {
            let timing = build_timing(&ctx, doc, phrases)?;
            Some(Section::Simple { name, timing })
        }
    }
}

fn build_timing(
    ctx: &Ctx<'_>,
    doc: SectionDocument,
    phrases: &BTreeMap<String, Phrase>,
) -> Option<Timing> {
    let start_time = doc.start_time.unwrap_or(0.0);
    if !start_time.is_finite() || start_time < 0.0 {
        ctx.drop_item(format_args!("start_time {start_time} is not a valid time"));
        return None;
    }
    let tempo = match doc.tempo {
        Some(t) if t.is_finite() && t > 0.0 => t,
        Some(t) => {
            ctx.drop_item(format_args!("tempo {t} must be > 0"));
            return None;
        }
        None => {
            ctx.drop_item("missing tempo");
            return None;
        }
    };
    let total_beats = match doc.total_beats {
        Some(n) if n >= 1 && n <= i64::from(u32::MAX) => n as u32,
        Some(n) => {
            ctx.drop_item(format_args!("total_beats {n} must be >= 1"));
            return None;
        }
        None => {
            ctx.drop_item("missing total_beats");
            return None;
        }
    };

    let sequences = doc
        .sequences
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .filter_map(|(i, v)| {
            build_sequence(&ctx.child(format_args!("sequence #{i}")), v, total_beats, phrases)
        })
        .collect();

    Some(Timing { start_time, tempo, total_beats, sequences })
}

fn build_sequence(
    ctx: &Ctx<'_>,
    value: Value,
    total_beats: u32,
    phrases: &BTreeMap<String, Phrase>,
) -> Option<Sequence> {
    let doc: SequenceDocument = parse_part(ctx, value)?;

    let selectors = usize::from(doc.beat.is_some())
        + usize::from(doc.beats.is_some())
        + usize::from(doc.all_beats);
    if selectors != 1 {
        ctx.drop_item(format_args!("needs exactly one of beat/beats/all_beats, found {selectors}"));
        return None;
    }

    let in_range = |b: i64| b >= 1 && b <= i64::from(total_beats);
    let beats = if doc.all_beats {
        BeatSpec::All
    } else if let Some(b) = doc.beat {
        if !in_range(b) {
            ctx.drop_item(format_args!("beat {b} outside 1..={total_beats}"));
            return None;
        }
        BeatSpec::Single(b as u32)
    } else {
        let listed = doc.beats.unwrap_or_default();
        if listed.is_empty() {
            ctx.drop_item("empty beats list");
            return None;
        }
        let mut kept = Vec::with_capacity(listed.len());
        for b in listed {
            if in_range(b) {
                kept.push(b as u32);
            } else {
                warn!(song = ctx.song, at = %ctx.at, "skipping beat {b} outside 1..={total_beats}");
            }
        }
        if kept.is_empty() {
            ctx.drop_item("no beats inside the section");
            return None;
        }
        BeatSpec::List(kept)
    };

    let actions = doc
        .actions
        .into_iter()
        .enumerate()
        .filter_map(|(i, v)| build_action(&ctx.child(format_args!("action #{i}")), v, phrases))
        .collect();

    Some(Sequence { beats, actions })
}

fn build_action(ctx: &Ctx<'_>, value: Value, phrases: &BTreeMap<String, Phrase>) -> Option<Action> {
    let doc: ActionDocument = parse_part(ctx, value)?;
    let action = match doc {
        ActionDocument::Note {
            channel,
            delay,
            delay_multiplier,
            duration,
            duration_multiplier,
        } => {
            let Some(channel) = ChannelId::new(channel) else {
                ctx.drop_item(format_args!("channel {channel} outside 0..=9"));
                return None;
            };
            let delay = match timing_pair(ctx, "delay", delay, delay_multiplier)? {
                Some(d) => d,
                None => TimeValue::Seconds(0.0),
            };
            let Some(duration) = timing_pair(ctx, "duration", duration, duration_multiplier)? else {
                ctx.drop_item("missing duration or duration_multiplier");
                return None;
            };
            if !positive(duration) {
                ctx.drop_item("duration must be > 0");
                return None;
            }
            Action::Note { channel, delay, duration }
        }
        ActionDocument::Phrase { id } => {
            let id = id.into_key();
            if !phrases.contains_key(&id) {
                ctx.drop_item(format_args!("unknown phrase id '{id}'"));
                return None;
            }
            Action::Phrase { id }
        }
        ActionDocument::AllChannels { duration, duration_multiplier } => {
            let Some(duration) = timing_pair(ctx, "duration", duration, duration_multiplier)? else {
                ctx.drop_item("missing duration or duration_multiplier");
                return None;
            };
            if !positive(duration) {
                ctx.drop_item("duration must be > 0");
                return None;
            }
            Action::AllChannels { duration }
        }
        ActionDocument::StepUp => Action::StepUp,
        ActionDocument::StepDown => Action::StepDown,
        ActionDocument::FlashMode { mode } => match FlashMode::from_wire(mode) {
            Some(m) => Action::FlashMode(m),
            None => {
                ctx.drop_item(format_args!("flash mode {mode} not in -1..=3"));
                return None;
            }
        },
    };
    Some(action)
}

// Outer None = invalid (already logged), inner None = field absent.
fn timing_pair(
    ctx: &Ctx<'_>,
    field: &str,
    seconds: Option<f64>,
    multiplier: Option<f64>,
) -> Option<Option<TimeValue>> {
    let value = match (seconds, multiplier) {
        (Some(_), Some(_)) => {
            ctx.drop_item(format_args!("both {field} and {field}_multiplier given"));
            return None;
        }
        (Some(s), None) => TimeValue::Seconds(s),
        (None, Some(m)) => TimeValue::Multiplier(m),
        (None, None) => return Some(None),
    };
    let raw = match value {
        TimeValue::Seconds(v) | TimeValue::Multiplier(v) => v,
    };
    if !raw.is_finite() || raw < 0.0 {
        ctx.drop_item(format_args!("{field} {raw} must be a non-negative number"));
        return None;
    }
    Some(Some(value))
}

fn positive(value: TimeValue) -> bool {
    match value {
        TimeValue::Seconds(v) | TimeValue::Multiplier(v) => v > 0.0,
    }
}

fn build_phrase(ctx: &Ctx<'_>, value: Value) -> Option<Phrase> {
    let doc: PhraseDocument = parse_part(ctx, value)?;
    let notes = doc
        .notes
        .into_iter()
        .enumerate()
        .filter_map(|(i, v)| {
            let note_ctx = ctx.child(format_args!("note #{i}"));
            let note: PhraseNoteDocument = parse_part(&note_ctx, v)?;
            let Some(channel) = ChannelId::new(note.channel) else {
                note_ctx.drop_item(format_args!("channel {} outside 0..=9", note.channel));
                return None;
            };
            let valid = note.delay_multiplier.is_finite()
                && note.delay_multiplier >= 0.0
                && note.duration_multiplier.is_finite()
                && note.duration_multiplier > 0.0;
            if !valid {
                note_ctx.drop_item("multipliers must be finite, delay >= 0, duration > 0");
                return None;
            }
            Some(PhraseNote {
                channel,
                delay_multiplier: note.delay_multiplier,
                duration_multiplier: note.duration_multiplier,
            })
        })
        .collect();
    Some(Phrase { description: doc.description, notes })
}

/// Songs available in a directory, in playback order.
///
/// `<dir>/<id>.json` is song `id`. Order comes from `<dir>/playlist.json`
/// when present (unknown ids skipped), otherwise alphabetical by id.
#[derive(Debug, Clone)]
pub struct SongLibrary {
    dir: PathBuf,
    order: Vec<String>,
}

impl SongLibrary {
    pub fn open(dir: &Path) -> Self {
        let mut found = index_songs_in_dir(dir);
        found.sort();

        let order = match read_playlist(dir) {
            Some(listed) => {
                let mut order = Vec::with_capacity(listed.len());
                for id in listed {
                    if found.contains(&id) {
                        order.push(id);
                    } else {
                        warn!(song = %id, "playlist entry has no song file, skipping");
                    }
                }
                order
            }
            None => found,
        };

        info!(dir = %dir.display(), songs = order.len(), "song library ready");
        Self { dir: dir.to_path_buf(), order }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn load(&self, id: &str) -> Result<Song, LoadError> {
        let path = self.song_path(id);
        let text = std::fs::read_to_string(&path).map_err(|source| LoadError::Io { path, source })?;
        load(&text, id)
    }

    /// Take a song out of the rotation (it failed to load).
    pub fn exclude(&mut self, id: &str) {
        self.order.retain(|s| s != id);
    }

    /// Audio path for a song: relative to the songs directory first, then as
    /// written. `None` means run lights only.
    pub fn resolve_audio(&self, song: &Song) -> Option<PathBuf> {
        if song.audio_file.is_empty() {
            return None;
        }
        let relative = self.dir.join(&song.audio_file);
        if relative.exists() {
            return Some(relative);
        }
        let as_given = PathBuf::from(&song.audio_file);
        if as_given.exists() {
            return Some(as_given);
        }
        warn!(song = %song.id, file = %song.audio_file, "audio file not found, lights only");
        None
    }

    fn song_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{SONG_EXT}"))
    }
}

fn index_songs_in_dir(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!(dir = %dir.display(), "cannot read songs directory: {e}");
            return Vec::new();
        }
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == SONG_EXT))
        .filter(|p| p.file_name().is_some_and(|n| n != PLAYLIST_FILE))
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect()
}

fn read_playlist(dir: &Path) -> Option<Vec<String>> {
    let path = dir.join(PLAYLIST_FILE);
    let data = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<PlaylistDocument>(&data) {
        Ok(doc) if !doc.playlist.is_empty() => {
            debug!(entries = doc.playlist.len(), "loaded playlist");
            Some(doc.playlist)
        }
        Ok(_) => None,
        Err(e) => {
            warn!(path = %path.display(), "ignoring unreadable playlist: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_fixture::{simple_section, song_doc};
    use serde_json::json;

    fn only_timing(song: &Song, idx: usize) -> &Timing {
        &song.sections[idx].timings()[0]
    }

    #[test]
    fn invalid_json_is_a_structural_error() {
        let err = load("{ not json", "broken").unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
    }

    #[test]
    fn missing_sections_is_a_structural_error() {
        let err = load(r#"{"title": "x"}"#, "x").unwrap_err();
        assert!(matches!(err, LoadError::Structure { .. }));
        let err = load("[]", "x").unwrap_err();
        assert!(matches!(err, LoadError::Structure { .. }));
    }

    #[test]
    fn zero_tempo_drops_only_that_section() {
        let doc = song_doc(
            vec![
                simple_section("bad", 0.0, 0.0, 4, vec![]),
                simple_section("good", 1.0, 0.5, 4, vec![]),
            ],
            json!({}),
        );
        let song = load(&doc, "s").unwrap();
        assert_eq!(song.sections.len(), 1);
        assert_eq!(song.sections[0].name(), "good");
    }

    #[test]
    fn zero_total_beats_drops_section() {
        let doc = song_doc(vec![simple_section("bad", 0.0, 0.5, 0, vec![])], json!({}));
        assert!(load(&doc, "s").unwrap().sections.is_empty());
    }

    #[test]
    fn section_with_both_shapes_is_dropped() {
        let doc = song_doc(
            vec![json!({"name": "both", "tempo": 0.5, "total_beats": 4, "segments": []})],
            json!({}),
        );
        assert!(load(&doc, "s").unwrap().sections.is_empty());
    }

    #[test]
    fn bad_segment_drops_only_itself() {
        let doc = song_doc(
            vec![json!({"name": "main", "segments": [
                {"start_time": 0.7, "tempo": 0.624, "total_beats": 8, "sequences": []},
                {"start_time": 5.0, "tempo": -1.0, "total_beats": 8, "sequences": []},
            ]})],
            json!({}),
        );
        let song = load(&doc, "s").unwrap();
        assert_eq!(song.sections[0].timings().len(), 1);
    }

    #[test]
    fn bad_actions_are_dropped_individually() {
        let seq = json!({"beat": 1, "actions": [
            {"type": "note", "channel": 12, "duration": 0.1},
            {"type": "note", "channel": 2, "duration": 0.1, "duration_multiplier": 0.5},
            {"type": "note", "channel": 2},
            {"type": "phrase", "id": "missing"},
            {"type": "flash_mode", "mode": 7},
            {"type": "laser"},
            {"type": "note", "channel": 2, "delay_multiplier": 0.5, "duration": 0.1},
        ]});
        let doc = song_doc(vec![simple_section("a", 0.0, 0.5, 4, vec![seq])], json!({}));
        let song = load(&doc, "s").unwrap();
        let actions = &only_timing(&song, 0).sequences[0].actions;
        assert_eq!(
            actions,
            &vec![Action::Note {
                channel: ChannelId::new(2).unwrap(),
                delay: TimeValue::Multiplier(0.5),
                duration: TimeValue::Seconds(0.1),
            }]
        );
    }

    #[test]
    fn sequence_selectors_are_validated() {
        let seqs = vec![
            json!({"beats": [], "actions": []}),
            json!({"beat": 1, "all_beats": true, "actions": []}),
            json!({"actions": []}),
            json!({"beats": [0, 2, 9], "actions": []}),
        ];
        let doc = song_doc(vec![simple_section("a", 0.0, 0.5, 4, seqs)], json!({}));
        let song = load(&doc, "s").unwrap();
        let sequences = &only_timing(&song, 0).sequences;
        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences[0].beats, BeatSpec::List(vec![2]));
    }

    #[test]
    fn phrase_ids_accept_numbers() {
        let phrases = json!({"1": {"description": "run", "notes": [
            {"channel": 0, "delay_multiplier": 0.0, "duration_multiplier": 0.5},
            {"channel": 11, "delay_multiplier": 0.5, "duration_multiplier": 0.5},
        ]}});
        let seq = json!({"beat": 1, "actions": [{"type": "phrase", "id": 1}]});
        let doc = song_doc(vec![simple_section("a", 0.0, 0.5, 4, vec![seq])], phrases);
        let song = load(&doc, "s").unwrap();
        assert_eq!(song.phrase("1").map(|p| p.notes.len()), Some(1));
        assert_eq!(only_timing(&song, 0).sequences[0].actions.len(), 1);
    }

    #[test]
    fn library_orders_by_playlist_then_alphabet() {
        let dir = tempfile::tempdir().unwrap();
        for id in ["carol", "anthem", "russian"] {
            std::fs::write(dir.path().join(format!("{id}.json")), "{}").unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let lib = SongLibrary::open(dir.path());
        assert_eq!(lib.ids(), ["anthem", "carol", "russian"]);

        std::fs::write(
            dir.path().join(PLAYLIST_FILE),
            r#"{"playlist": ["russian", "ghost", "carol"]}"#,
        )
        .unwrap();
        let lib = SongLibrary::open(dir.path());
        assert_eq!(lib.ids(), ["russian", "carol"]);
    }

    #[test]
    fn audio_resolves_relative_to_songs_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("track.wav"), b"RIFF").unwrap();
        let lib = SongLibrary::open(dir.path());
        let mut song = load(&song_doc(vec![], json!({})), "s").unwrap();

        song.audio_file = "track.wav".into();
        assert_eq!(lib.resolve_audio(&song), Some(dir.path().join("track.wav")));
        song.audio_file = "nope.mp3".into();
        assert_eq!(lib.resolve_audio(&song), None);
        song.audio_file.clear();
        assert_eq!(lib.resolve_audio(&song), None);
    }
}
