//! C3 per-beat feature extraction: energy, spectral centroid, a vocal
//! presence flag, and the track-wide onset list.
//!
//! Splits each analysis window into bass/mid/high bands (vocals fall in
//! the mid band) and derives a spectral-flux onset envelope for onset
//! picking.

use std::f32::consts::PI;

use beatline_core::{AnalysisConfig, BeatGrid, PerBeatFeatures};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

const VOCAL_ENERGY_THRESHOLD: f32 = 0.05;
const VOCAL_CENTROID_LOW_HZ: f32 = 300.0;
const VOCAL_CENTROID_HIGH_HZ: f32 = 2500.0;

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (size - 1) as f32).cos()))
        .collect()
}

/// Normalised RMS energy of a beat's span in [0,1], over the first
/// `feature_energy_max_samples` of the range per §3/§4.3.
fn beat_energy(samples_mono: &[f32], start_sample: usize, end_sample: usize, config: &AnalysisConfig) -> f32 {
    let end_sample = end_sample.min(samples_mono.len()).min(start_sample + config.feature_energy_max_samples);
    if start_sample >= end_sample {
        return 0.0;
    }
    let span = &samples_mono[start_sample..end_sample];
    let sum_sq: f64 = span.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (((sum_sq / span.len() as f64).sqrt()) as f32).clamp(0.0, 1.0)
}

/// Spectral centroid over a beat's span via a single Hann-windowed FFT,
/// zero when the span is too short for a meaningful estimate.
fn beat_spectral_centroid(
    samples_mono: &[f32],
    start_sample: usize,
    end_sample: usize,
    sample_rate: u32,
    config: &AnalysisConfig,
) -> f32 {
    let end_sample = end_sample.min(samples_mono.len());
    if start_sample >= end_sample {
        return 0.0;
    }
    let span_len = (end_sample - start_sample).min(config.feature_centroid_max_samples);
    if span_len < config.feature_centroid_min_samples {
        return 0.0;
    }

    let fft_size = span_len.next_power_of_two();
    let mut buffer: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); fft_size];
    let window = hann_window(span_len);
    for (i, w) in window.iter().enumerate() {
        buffer[i] = Complex::new(samples_mono[start_sample + i] * w, 0.0);
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);
    fft.process(&mut buffer);

    let bin_hz = sample_rate as f32 / fft_size as f32;
    let num_bins = fft_size / 2;

    let mut weighted_sum = 0.0f32;
    let mut magnitude_sum = 0.0f32;
    for (bin, c) in buffer.iter().take(num_bins).enumerate() {
        let magnitude = c.norm();
        weighted_sum += bin as f32 * bin_hz * magnitude;
        magnitude_sum += magnitude;
    }

    if magnitude_sum > 0.0 {
        weighted_sum / magnitude_sum
    } else {
        0.0
    }
}

/// `hasVocal[i] = energy[i] > 0.05 AND 300 < centroid[i] < 2500`, per §3.
fn beat_has_vocal(energy: f32, centroid: f32) -> bool {
    energy > VOCAL_ENERGY_THRESHOLD && centroid > VOCAL_CENTROID_LOW_HZ && centroid < VOCAL_CENTROID_HIGH_HZ
}

/// Extracts energy, spectral centroid and a vocal flag for every beat in
/// `grid`, parallel arrays indexed the same as `grid.beats`.
pub fn extract_per_beat_features(
    samples_mono: &[f32],
    sample_rate: u32,
    grid: &BeatGrid,
    config: &AnalysisConfig,
) -> PerBeatFeatures {
    let mut energy = Vec::with_capacity(grid.beats.len());
    let mut spectral_centroid = Vec::with_capacity(grid.beats.len());
    let mut has_vocal = Vec::with_capacity(grid.beats.len());

    for beat in &grid.beats {
        let start_sample = (beat.start * sample_rate as f64) as usize;
        let end_sample = ((beat.start + beat.duration) * sample_rate as f64) as usize;

        let beat_energy_value = beat_energy(samples_mono, start_sample, end_sample, config);
        let beat_centroid_value = beat_spectral_centroid(
            samples_mono,
            start_sample,
            end_sample,
            sample_rate,
            config,
        );

        energy.push(beat_energy_value);
        spectral_centroid.push(beat_centroid_value);
        has_vocal.push(beat_has_vocal(beat_energy_value, beat_centroid_value));
    }

    PerBeatFeatures {
        energy,
        spectral_centroid,
        has_vocal,
    }
}

/// Track-wide onset list via a short-window spectral-flux envelope
/// (10 ms windows, 50% overlap), thresholded at 3x the envelope mean
/// with a 50 ms minimum spacing, per §4.3.
pub fn detect_onsets(samples_mono: &[f32], sample_rate: u32, config: &AnalysisConfig) -> Vec<f64> {
    let window_samples = ((config.onset_window_ms / 1000.0) * sample_rate as f64) as usize;
    if window_samples == 0 || samples_mono.len() < window_samples * 2 {
        return Vec::new();
    }
    let hop_samples = ((1.0 - config.onset_overlap) * window_samples as f64).max(1.0) as usize;

    let window = hann_window(window_samples);
    let mut planner = FftPlanner::new();
    let fft_size = window_samples.next_power_of_two();
    let fft = planner.plan_fft_forward(fft_size);

    let mut prev_magnitude: Option<Vec<f32>> = None;
    let mut flux = Vec::new();
    let mut frame_times = Vec::new();

    let mut start = 0;
    while start + window_samples <= samples_mono.len() {
        let mut buffer: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); fft_size];
        for (i, w) in window.iter().enumerate() {
            buffer[i] = Complex::new(samples_mono[start + i] * w, 0.0);
        }
        fft.process(&mut buffer);

        let magnitude: Vec<f32> = buffer.iter().take(fft_size / 2).map(|c| c.norm()).collect();
        let value = match &prev_magnitude {
            Some(prev) => magnitude
                .iter()
                .zip(prev.iter())
                .map(|(m, p)| (m - p).max(0.0))
                .sum::<f32>(),
            None => 0.0,
        };
        flux.push(value);
        frame_times.push(start as f64 / sample_rate as f64);
        prev_magnitude = Some(magnitude);

        start += hop_samples;
    }

    if flux.is_empty() {
        return Vec::new();
    }

    let mean: f32 = flux.iter().sum::<f32>() / flux.len() as f32;
    let threshold = mean * config.onset_threshold_multiplier as f32;
    let min_spacing = config.onset_min_spacing_ms / 1000.0;

    let mut onsets = Vec::new();
    for (i, &value) in flux.iter().enumerate() {
        if value <= threshold {
            continue;
        }
        let is_local_max = (i == 0 || flux[i - 1] <= value) && (i + 1 == flux.len() || flux[i + 1] <= value);
        if !is_local_max {
            continue;
        }
        let time = frame_times[i];
        if onsets.last().map_or(true, |&last: &f64| time - last >= min_spacing) {
            onsets.push(time);
        }
    }
    onsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatline_core::{Beat, Meter};

    fn grid_with_one_beat(start: f64, duration: f64) -> BeatGrid {
        BeatGrid {
            beats: vec![Beat {
                start,
                duration,
                confidence: 1.0,
                is_downbeat: true,
            }],
            bpm: 120.0,
            meter: Meter::FOUR_FOUR,
            downbeat_offset: 0,
            confidence: 1.0,
        }
    }

    #[test]
    fn silent_beat_has_zero_energy() {
        let sample_rate = 44_100;
        let samples = vec![0.0f32; sample_rate as usize];
        let grid = grid_with_one_beat(0.0, 0.5);
        let config = AnalysisConfig::default();
        let features = extract_per_beat_features(&samples, sample_rate, &grid, &config);
        assert_eq!(features.energy[0], 0.0);
        assert!(!features.has_vocal[0]);
    }

    #[test]
    fn loud_beat_has_positive_energy() {
        let sample_rate = 44_100;
        let samples: Vec<f32> = (0..sample_rate as usize)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / sample_rate as f32).sin())
            .collect();
        let grid = grid_with_one_beat(0.0, 0.5);
        let config = AnalysisConfig::default();
        let features = extract_per_beat_features(&samples, sample_rate, &grid, &config);
        assert!(features.energy[0] > 0.0);
    }

    #[test]
    fn detect_onsets_finds_sparse_clicks() {
        let sample_rate = 44_100;
        let mut samples = vec![0.0f32; sample_rate as usize * 2];
        for &click_time in &[0.5, 1.0, 1.5] {
            let start = (click_time * sample_rate as f64) as usize;
            for i in 0..100.min(samples.len() - start) {
                samples[start + i] = 1.0;
            }
        }
        let config = AnalysisConfig::default();
        let onsets = detect_onsets(&samples, sample_rate, &config);
        assert!(onsets.len() >= 2, "expected at least 2 onsets, got {}", onsets.len());
    }
}
