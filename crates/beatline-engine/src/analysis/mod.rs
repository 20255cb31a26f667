//! C2 + C3 orchestration: runs tempo/key/feature extraction for a batch
//! of tracks, up to 5 in parallel per §5, each analysis offloaded to a
//! blocking-pool task via `tokio::task::spawn_blocking` since this is
//! CPU-bound work.

pub mod features;
pub mod key;
pub mod tempo;

use beatline_core::{AnalysisConfig, AnalysisError, Mode, Track, TrackAnalysis, TrackKey};
use tokio::task::JoinSet;

const ANALYSIS_BATCH_SIZE: usize = 5;

/// Converts interleaved stereo PCM to mono by averaging channels, the
/// representation every analysis stage in this module operates on.
fn to_mono(pcm: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return pcm.to_vec();
    }
    pcm.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Runs C2 (tempo + key) and C3 (per-beat features + onsets) for one
/// track, preferring the primary path and falling back per §4.2/§4.3
/// whenever the primary path declines to produce a result.
pub fn analyze_track(track: &Track, config: &AnalysisConfig) -> Result<TrackAnalysis, AnalysisError> {
    if track.pcm.is_empty() || track.duration_seconds <= 0.0 {
        return Err(AnalysisError::new("track has no decoded audio"));
    }

    let mono = to_mono(&track.pcm, track.channels);

    let raw_beats = tempo::detect_primary(&mono, track.sample_rate, config)
        .unwrap_or_else(|| tempo::detect_fallback(&mono, track.sample_rate, config));

    if raw_beats.beats_seconds.len() < 2 {
        return Err(AnalysisError::new("beat tracker produced fewer than 2 beats"));
    }

    let loudness_per_beat = beat_loudness_estimates(&mono, track.sample_rate, &raw_beats.beats_seconds);
    let beat_grid = tempo::build_beat_grid(&raw_beats, &loudness_per_beat, track.duration_seconds);

    let key = key::detect_primary(&mono, track.sample_rate, config)
        .unwrap_or_else(|| key::detect_fallback(&mono, track.sample_rate, config));

    let features = features::extract_per_beat_features(&mono, track.sample_rate, &beat_grid, config);
    let onsets = features::detect_onsets(&mono, track.sample_rate, config);

    let integrated_loudness_lufs = peak_rms_lufs(&mono);
    let replay_gain_db = config.target_loudness_lufs - integrated_loudness_lufs;

    Ok(TrackAnalysis {
        beat_grid,
        key,
        features,
        onsets,
        integrated_loudness_lufs,
        replay_gain_db,
    })
}

fn beat_loudness_estimates(mono: &[f32], sample_rate: u32, beats_seconds: &[f64]) -> Vec<f32> {
    let mut loudness = Vec::with_capacity(beats_seconds.len());
    for i in 0..beats_seconds.len() {
        let start = (beats_seconds[i] * sample_rate as f64) as usize;
        let end = beats_seconds
            .get(i + 1)
            .map(|&t| (t * sample_rate as f64) as usize)
            .unwrap_or(mono.len())
            .min(mono.len());
        if start >= end {
            loudness.push(0.0);
            continue;
        }
        let span = &mono[start..end];
        let sum_sq: f64 = span.iter().map(|&s| (s as f64) * (s as f64)).sum();
        loudness.push(((sum_sq / span.len() as f64).sqrt()) as f32);
    }
    loudness
}

fn peak_rms_lufs(mono: &[f32]) -> f64 {
    if mono.is_empty() {
        return -70.0;
    }
    let mean_sq: f64 = mono.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / mono.len() as f64;
    20.0 * mean_sq.sqrt().max(1e-9).log10() - 0.691
}

/// Analyzes every track in `tracks`, at most [`ANALYSIS_BATCH_SIZE`] at
/// once, returning one result per input track in the original order.
/// A track whose analysis fails is reported as an `Err` in its slot
/// rather than aborting the batch, per §7 ("per-track errors never
/// abort the batch").
pub async fn analyze_batch(
    tracks: Vec<Track>,
    config: AnalysisConfig,
) -> Vec<(Track, Result<TrackAnalysis, AnalysisError>)> {
    let mut results: Vec<Option<(Track, Result<TrackAnalysis, AnalysisError>)>> =
        (0..tracks.len()).map(|_| None).collect();

    let mut remaining: Vec<(usize, Track)> = tracks.into_iter().enumerate().collect();
    remaining.reverse();

    let mut in_flight = JoinSet::new();

    for _ in 0..ANALYSIS_BATCH_SIZE {
        if let Some((index, track)) = remaining.pop() {
            let config = config;
            in_flight.spawn_blocking(move || {
                let analysis = analyze_track(&track, &config);
                (index, track, analysis)
            });
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        match joined {
            Ok((index, track, analysis)) => {
                results[index] = Some((track, analysis));
            }
            Err(join_error) => {
                log::error!("analysis task panicked: {join_error}");
            }
        }

        if let Some((index, track)) = remaining.pop() {
            let config = config;
            in_flight.spawn_blocking(move || {
                let analysis = analyze_track(&track, &config);
                (index, track, analysis)
            });
        }
    }

    results.into_iter().flatten().collect()
}

pub fn camelot_semitone_distance(a: &TrackKey, b: &TrackKey) -> u8 {
    let diff = (a.pitch_class as i16 - b.pitch_class as i16).rem_euclid(12) as u8;
    diff.min(12 - diff)
}

pub fn same_mode(a: &TrackKey, b: &TrackKey) -> bool {
    matches!(
        (a.mode, b.mode),
        (Mode::Major, Mode::Major) | (Mode::Minor, Mode::Minor)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatline_core::TrackId;

    fn silent_track(duration_seconds: f64, sample_rate: u32) -> Track {
        let frames = (duration_seconds * sample_rate as f64) as usize;
        Track::new(TrackId(0), "silence", duration_seconds, sample_rate, 2, vec![0.0; frames * 2])
    }

    #[test]
    fn analyze_track_rejects_empty_pcm() {
        let track = Track::new(TrackId(0), "empty", 0.0, 44_100, 2, Vec::new());
        let config = AnalysisConfig::default();
        assert!(analyze_track(&track, &config).is_err());
    }

    #[test]
    fn to_mono_averages_stereo_channels() {
        let pcm = vec![1.0, -1.0, 0.5, 0.5];
        let mono = to_mono(&pcm, 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn silent_track_still_produces_fallback_grid() {
        let track = silent_track(10.0, 44_100);
        let config = AnalysisConfig::default();
        let result = analyze_track(&track, &config);
        assert!(result.is_ok());
        let analysis = result.unwrap();
        assert!(!analysis.beat_grid.beats.is_empty());
    }
}
