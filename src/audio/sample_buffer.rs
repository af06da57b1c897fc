// Decoded track, held fully in memory and resampled to the device rate so
// the output callback never touches the filesystem.

use std::path::Path;

use crate::error::PlayerError;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StereoFrame {
    pub left: f32,
    pub right: f32,
}

#[derive(Clone, Debug)]
pub struct TrackBuffer {
    pub frames: Vec<StereoFrame>,
    pub sample_rate: u32,
}

impl TrackBuffer {
    pub fn duration_seconds(&self) -> f64 {
        self.frames.len() as f64 / f64::from(self.sample_rate)
    }
}

pub fn decode_wav(path: &Path, target_rate: u32) -> Result<TrackBuffer, PlayerError> {
    let decode_err = |message: String| PlayerError::Decode { path: path.to_path_buf(), message };

    let mut reader = hound::WavReader::open(path).map_err(|e| decode_err(e.to_string()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| decode_err(e.to_string()))?,
        hound::SampleFormat::Int => {
            // full-scale int -> [-1, 1]
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|x| x as f32 / max))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| decode_err(e.to_string()))?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let frames: Vec<StereoFrame> = samples
        .chunks_exact(channels)
        .map(|c| StereoFrame {
            left: c[0],
            right: if channels > 1 { c[1] } else { c[0] }, // mono: duplicate
        })
        .collect();

    Ok(TrackBuffer {
        frames: resample_linear(&frames, spec.sample_rate, target_rate),
        sample_rate: target_rate,
    })
}

// linear interpolation is plenty for a backing track under party lights
fn resample_linear(frames: &[StereoFrame], source_rate: u32, target_rate: u32) -> Vec<StereoFrame> {
    if source_rate == target_rate || frames.is_empty() {
        return frames.to_vec();
    }
    let step = f64::from(source_rate) / f64::from(target_rate);
    let out_len = (frames.len() as f64 / step).ceil() as usize;
    let last = frames[frames.len() - 1];

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            if idx + 1 >= frames.len() {
                return last;
            }
            let frac = (pos - idx as f64) as f32;
            let (a, b) = (frames[idx], frames[idx + 1]);
            StereoFrame {
                left: a.left + (b.left - a.left) * frac,
                right: a.right + (b.right - a.right) * frac,
            }
        })
        .collect()
}
