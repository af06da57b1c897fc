// Purely for testing: build timing documents without hand-writing JSON strings.

use serde_json::{Value, json};

pub fn song_doc(sections: Vec<Value>, phrases: Value) -> String {
    json!({
        "title": "Fixture",
        "artist": "Test",
        "mp3_file": "",
        "sections": sections,
        "phrases": phrases,
    })
    .to_string()
}

pub fn simple_section(
    name: &str,
    start_time: f64,
    tempo: f64,
    total_beats: i64,
    sequences: Vec<Value>,
) -> Value {
    json!({
        "name": name,
        "start_time": start_time,
        "tempo": tempo,
        "total_beats": total_beats,
        "sequences": sequences,
    })
}

pub fn note(channel: i64, delay: f64, duration: f64) -> Value {
    json!({"type": "note", "channel": channel, "delay": delay, "duration": duration})
}

pub fn on_beat(beat: i64, actions: Vec<Value>) -> Value {
    json!({"beat": beat, "actions": actions})
}
