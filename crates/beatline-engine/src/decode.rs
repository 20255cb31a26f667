//! C1: Decoder & Resampler.
//!
//! Probes and decodes compressed audio via `symphonia` into interleaved
//! stereo Float32, then resamples to the canonical 44.1 kHz via `rubato`
//! when the source rate differs.

use std::io::Read;

use beatline_core::DecodeError;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

pub const CANONICAL_SAMPLE_RATE: u32 = 44_100;
pub const CANONICAL_CHANNELS: u16 = 2;

/// Decoded, canonicalised audio: interleaved stereo Float32 at 44.1 kHz.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub pcm: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_seconds: f64,
}

impl DecodedAudio {
    pub fn frame_count(&self) -> usize {
        self.pcm.len() / self.channels.max(1) as usize
    }
}

/// Decodes `bytes` (with an optional filename hint, e.g. for extension
/// sniffing) to canonical 44.1 kHz stereo Float32 PCM.
pub fn decode_bytes(bytes: Vec<u8>, filename_hint: Option<&str>) -> Result<DecodedAudio, DecodeError> {
    let cursor = std::io::Cursor::new(bytes);
    let source = ReadOnlySource::new(cursor);
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    if let Some(name) = filename_hint {
        if let Some(ext) = name.rsplit('.').next() {
            hint.with_extension(ext);
        }
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::new(format!("unrecognised container: {e}")))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::new("no audio track found"))?
        .clone();

    let track_id = track.id;
    let source_rate = track.codec_params.sample_rate.unwrap_or(CANONICAL_SAMPLE_RATE);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::new(format!("unsupported codec: {e}")))?;

    let mut channels: u16 = CANONICAL_CHANNELS;
    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                log::warn!("stopping decode early after packet read error: {e}");
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                channels = decoded.spec().channels.count() as u16;
                append_stereo_samples(&mut interleaved, &decoded);
            }
            Err(e) => {
                log::warn!("dropping undecodable packet: {e}");
            }
        }
    }

    if interleaved.is_empty() {
        return Err(DecodeError::new("stream contained no decodable audio"));
    }

    let resampled = if source_rate == CANONICAL_SAMPLE_RATE {
        interleaved
    } else {
        resample_interleaved(&interleaved, channels as usize, source_rate, CANONICAL_SAMPLE_RATE)
            .map_err(|e| DecodeError::new(format!("resample failed: {e}")))?
    };

    let duration_seconds = resampled.len() as f64 / channels.max(1) as f64 / CANONICAL_SAMPLE_RATE as f64;

    Ok(DecodedAudio {
        pcm: resampled,
        sample_rate: CANONICAL_SAMPLE_RATE,
        channels: channels.max(1),
        duration_seconds,
    })
}

pub fn decode_file(path: &std::path::Path) -> Result<DecodedAudio, DecodeError> {
    let mut file =
        std::fs::File::open(path).map_err(|e| DecodeError::new(format!("cannot open file: {e}")))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| DecodeError::new(format!("cannot read file: {e}")))?;
    decode_bytes(bytes, path.file_name().and_then(|n| n.to_str()))
}

/// Appends interleaved samples from a decoded buffer, preserving channel
/// count (mono sources are duplicated to stereo so downstream code can
/// always assume interleaved stereo).
fn append_stereo_samples(interleaved: &mut Vec<f32>, decoded: &AudioBufferRef) {
    macro_rules! push_frames {
        ($buf:expr, $convert:expr) => {{
            let channels = $buf.spec().channels.count();
            for frame in 0..$buf.frames() {
                if channels >= 2 {
                    interleaved.push($convert($buf.chan(0)[frame]));
                    interleaved.push($convert($buf.chan(1)[frame]));
                } else {
                    let v = $convert($buf.chan(0)[frame]);
                    interleaved.push(v);
                    interleaved.push(v);
                }
            }
        }};
    }

    match decoded {
        AudioBufferRef::F32(buf) => push_frames!(buf, |s: f32| s),
        AudioBufferRef::S16(buf) => push_frames!(buf, |s: i16| s as f32 / 32768.0),
        AudioBufferRef::S32(buf) => push_frames!(buf, |s: i32| s as f32 / 2147483648.0),
        AudioBufferRef::U8(buf) => push_frames!(buf, |s: u8| (s as f32 - 128.0) / 128.0),
        _ => {}
    }
}

fn resample_interleaved(
    interleaved: &[f32],
    channels: usize,
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<f32>, rubato::ResamplerConstructionError> {
    let channels = channels.max(1);
    let frame_count = interleaved.len() / channels;

    let mut deinterleaved: Vec<Vec<f32>> = vec![Vec::with_capacity(frame_count); channels];
    for frame in 0..frame_count {
        for ch in 0..channels {
            deinterleaved[ch].push(interleaved[frame * channels + ch]);
        }
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, frame_count, channels)?;
    let resampled = resampler
        .process(&deinterleaved, None)
        .unwrap_or_else(|_| deinterleaved.clone());

    let out_frames = resampled[0].len();
    let mut out = Vec::with_capacity(out_frames * channels);
    for frame in 0..out_frames {
        for ch in &resampled {
            out.push(ch[frame]);
        }
    }
    Ok(out)
}

/// Normalises loudness to a target LUFS using integrated loudness when
/// available, else a peak-RMS fallback, hard-clamped to ±1.0 (§4.1).
pub fn normalize_loudness(pcm: &mut [f32], target_lufs: f64, measured_lufs: Option<f64>) {
    let current = measured_lufs.unwrap_or_else(|| peak_rms_lufs_estimate(pcm));
    if !current.is_finite() {
        return;
    }
    let gain_db = target_lufs - current;
    let gain = 10f64.powf(gain_db / 20.0) as f32;
    for sample in pcm.iter_mut() {
        *sample = (*sample * gain).clamp(-1.0, 1.0);
    }
}

fn peak_rms_lufs_estimate(pcm: &[f32]) -> f64 {
    if pcm.is_empty() {
        return -70.0;
    }
    let mean_sq: f64 = pcm.iter().map(|s| (*s as f64) * (*s as f64)).sum::<f64>() / pcm.len() as f64;
    let rms = mean_sq.sqrt().max(1e-9);
    20.0 * rms.log10() - 0.691
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_loudness_clamps_to_unit_range() {
        let mut pcm = vec![0.9f32; 100];
        normalize_loudness(&mut pcm, -6.0, Some(-40.0));
        for s in pcm {
            assert!(s <= 1.0 && s >= -1.0);
        }
    }

    #[test]
    fn normalize_loudness_is_noop_on_silence() {
        let mut pcm = vec![0.0f32; 100];
        normalize_loudness(&mut pcm, -14.0, None);
        assert!(pcm.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn resample_preserves_frame_ratio_roughly() {
        let channels = 2usize;
        let frames = 44_100usize;
        let interleaved: Vec<f32> = (0..frames * channels)
            .map(|i| ((i / channels) as f32 * 0.01).sin())
            .collect();
        let out = resample_interleaved(&interleaved, channels, 44_100, 48_000).unwrap();
        let out_frames = out.len() / channels;
        let expected = frames * 48_000 / 44_100;
        assert!((out_frames as i64 - expected as i64).unsigned_abs() < 2000);
    }
}
