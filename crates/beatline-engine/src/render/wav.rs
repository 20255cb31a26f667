//! WAV export/import: byte-exact RIFF/WAVE PCM16, per §6.
//!
//! Grounded on `hound`'s `WavSpec`/`WavWriter` usage the way
//! `other_examples/.../track-export.rs` writes a canonical
//! PCM16/44100/stereo RIFF file — `hound` already produces exactly the
//! header layout §6 specifies, so this module is a thin, documented
//! wrapper rather than a hand-rolled RIFF writer.

use std::path::Path;

use beatline_core::RenderError;

/// Writes interleaved Float32 PCM to `path` as 16-bit little-endian
/// signed, interleaved, per the RIFF/WAVE layout in §6.
pub fn export_wav(pcm: &[f32], sample_rate: u32, channels: u16, path: &Path) -> Result<(), RenderError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| RenderError::new(format!("failed to open WAV writer: {e}")))?;

    for &sample in pcm {
        let clamped = sample.clamp(-1.0, 1.0);
        let quantized = (clamped * i16::MAX as f32).round() as i16;
        writer
            .write_sample(quantized)
            .map_err(|e| RenderError::new(format!("failed to write WAV sample: {e}")))?;
    }

    writer
        .finalize()
        .map_err(|e| RenderError::new(format!("failed to finalize WAV file: {e}")))
}

/// Decoded WAV audio, returned by [`decode_wav`] for round-trip tests.
pub struct DecodedWav {
    pub pcm: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Reads back a WAV file written by [`export_wav`], for the §8
/// round-trip invariant ("decoding a WAV emitted by the renderer and
/// re-decoding yields identical PCM sample values ±1 LSB").
pub fn decode_wav(path: &Path) -> Result<DecodedWav, RenderError> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| RenderError::new(format!("failed to open WAV: {e}")))?;
    let spec = reader.spec();
    let pcm: Result<Vec<f32>, _> = reader
        .samples::<i16>()
        .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
        .collect();
    let pcm = pcm.map_err(|e| RenderError::new(format!("failed to read WAV samples: {e}")))?;

    Ok(DecodedWav {
        pcm,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trips_silence_exactly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("silence.wav");
        let frames = 44_100 * 10; // 10 s
        let pcm = vec![0.0f32; frames * 2];

        export_wav(&pcm, 44_100, 2, &path).unwrap();
        let decoded = decode_wav(&path).unwrap();

        assert_eq!(decoded.sample_rate, 44_100);
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.pcm.len(), pcm.len());
        assert!(decoded.pcm.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn round_trips_within_one_lsb() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        let pcm: Vec<f32> = (0..44_100)
            .map(|i| (i as f32 * 0.01).sin() * 0.5)
            .collect();

        export_wav(&pcm, 44_100, 1, &path).unwrap();
        let decoded = decode_wav(&path).unwrap();

        let lsb = 1.0 / i16::MAX as f32;
        for (original, round_tripped) in pcm.iter().zip(decoded.pcm.iter()) {
            assert!((original - round_tripped).abs() <= lsb + 1e-6);
        }
    }
}
