//! WAV decoding into in-memory assets

use super::{AudioError, Result};
use hound::{SampleFormat, WavReader};
use std::io::Read;
use std::path::Path;
use tenuto_core::domain::audio::AssetData;
use tracing::debug;

/// Read a WAV file as interleaved f32 samples
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<AssetData> {
    let path = path.as_ref();
    let data = decode_wav(WavReader::open(path)?)?;
    debug!(
        path = %path.display(),
        channels = data.channels,
        sample_rate = data.sample_rate,
        frames = data.frames(),
        "WAV decoded"
    );
    Ok(data)
}

/// Decode an opened WAV stream
///
/// Integer samples are scaled into [-1, 1); channels stay interleaved.
pub fn decode_wav<R: Read>(reader: WavReader<R>) -> Result<AssetData> {
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(AudioError::UnsupportedFormat("WAV has no channels".to_string()));
    }

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            if bits == 0 || bits > 32 {
                return Err(AudioError::UnsupportedFormat(format!(
                    "{}-bit integer samples",
                    bits
                )));
            }
            let scale = (1u64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    Ok(AssetData::new(samples, spec.channels, spec.sample_rate))
}
