//! C2 key detection: primary chromagram/profile-correlation path plus a
//! pitch-class histogram fallback.
//!
//! Grounded on the RecoDeck `audio/key.rs` chromagram analyzer: 12-bin
//! pitch-class energy accumulation over a 65-2000 Hz range, correlated
//! against the Krumhansl-Schmuckler/Shaath major and minor profiles for
//! all 24 keys, with Camelot/OpenKey/musical-notation lookups.

use std::f32::consts::PI;

use beatline_core::{AnalysisConfig, Mode, TrackKey};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Camelot wheel code for (pitch_class, mode). Minor keys are the "A"
/// ring, major keys the "B" ring.
fn camelot_code(pitch_class: u8, mode: Mode) -> String {
    // Camelot numbers for major keys starting at C=8B, going clockwise
    // by fifths; minor keys share the same number as their relative major
    // minus nothing (A minor = 8A sits with C major = 8B).
    const MAJOR_CAMELOT: [u8; 12] = [8, 3, 10, 5, 12, 7, 2, 9, 4, 11, 6, 1];
    const MINOR_CAMELOT: [u8; 12] = [5, 12, 7, 2, 9, 4, 11, 6, 1, 8, 3, 10];
    let (number, letter) = match mode {
        Mode::Major => (MAJOR_CAMELOT[pitch_class as usize % 12], 'B'),
        Mode::Minor => (MINOR_CAMELOT[pitch_class as usize % 12], 'A'),
    };
    format!("{number}{letter}")
}

/// Krumhansl-Schmuckler/Shaath major profile, rotated per candidate tonic.
const MAJOR_PROFILE: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
const MINOR_PROFILE: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (size - 1) as f32).cos()))
        .collect()
}

/// Bins FFT energy into the 12 pitch classes over a 65-2000 Hz range
/// using 12-TET `log2(f/440) * 12 + 69` mapping.
fn chromagram(samples: &[f32], sample_rate: u32, config: &AnalysisConfig) -> [f32; 12] {
    let fft_size = config.key_window_fft_size;
    let hop_size = config.key_window_hop_size;
    let mut chroma = [0.0f32; 12];
    if samples.len() < fft_size {
        return chroma;
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);
    let window = hann_window(fft_size);
    let bin_hz = sample_rate as f32 / fft_size as f32;

    let low_bin = (65.0 / bin_hz).floor().max(1.0) as usize;
    let high_bin = ((2000.0 / bin_hz).ceil() as usize).min(fft_size / 2);

    let mut frame_count = 0usize;
    for start in (0..samples.len() - fft_size).step_by(hop_size) {
        let mut buffer: Vec<Complex<f32>> = samples[start..start + fft_size]
            .iter()
            .zip(window.iter())
            .map(|(s, w)| Complex::new(s * w, 0.0))
            .collect();
        fft.process(&mut buffer);

        for bin in low_bin..high_bin {
            let freq = bin as f32 * bin_hz;
            if freq < 20.0 {
                continue;
            }
            let midi = 12.0 * (freq / 440.0).log2() + 69.0;
            let pitch_class = (midi.round() as i32).rem_euclid(12) as usize;
            chroma[pitch_class] += buffer[bin].norm_sqr();
        }
        frame_count += 1;
    }

    if frame_count > 0 {
        for v in chroma.iter_mut() {
            *v /= frame_count as f32;
        }
    }
    chroma
}

fn pearson_correlation(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len() as f64;
    let mean_a: f64 = a.iter().map(|&v| v as f64).sum::<f64>() / n;
    let mean_b: f64 = b.iter().map(|&v| v as f64).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..a.len() {
        let da = a[i] as f64 - mean_a;
        let db = b[i] as f64 - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a <= 0.0 || var_b <= 0.0 {
        0.0
    } else {
        cov / (var_a.sqrt() * var_b.sqrt())
    }
}

fn rotate(profile: &[f32; 12], tonic: usize) -> [f32; 12] {
    let mut rotated = [0.0f32; 12];
    for i in 0..12 {
        rotated[i] = profile[(i + 12 - tonic) % 12];
    }
    rotated
}

/// Correlates a chromagram against all 24 rotated profiles, returning
/// the best match and a confidence blending the winner/runner-up gap
/// with raw correlation strength, per §4.2's "70% gap, 30% strength".
fn best_key_match(chroma: &[f32; 12]) -> (u8, Mode, f64) {
    let mut scores: Vec<(u8, Mode, f64)> = Vec::with_capacity(24);
    for tonic in 0u8..12 {
        let major_rotated = rotate(&MAJOR_PROFILE, tonic as usize);
        let minor_rotated = rotate(&MINOR_PROFILE, tonic as usize);
        scores.push((tonic, Mode::Major, pearson_correlation(chroma, &major_rotated)));
        scores.push((tonic, Mode::Minor, pearson_correlation(chroma, &minor_rotated)));
    }
    scores.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let (best_pc, best_mode, best_score) = scores[0];
    let runner_up = scores.get(1).map(|(_, _, s)| *s).unwrap_or(best_score);

    let gap = (best_score - runner_up).max(0.0).min(1.0);
    let strength = best_score.max(0.0).min(1.0);
    let confidence = 0.7 * gap + 0.3 * strength;

    (best_pc, best_mode, confidence)
}

/// Fractional positions (of track duration) the primary path centres its
/// voting windows on, per §4.2 ("4 windows centred at 20/50/80%"). A
/// fourth window at 35% fills in between the intro-adjacent and
/// mid-track windows the spec names explicitly, since 3 fractions were
/// given for a 4-window vote.
const KEY_VOTE_WINDOW_FRACTIONS: [f64; 4] = [0.20, 0.35, 0.50, 0.80];
const KEY_VOTE_WINDOW_SECONDS: f64 = 20.0;

/// Primary path: per-segment voting across 4 windows centred at fixed
/// fractions of the track, selecting the key with the highest average
/// correlation strength across the windows that agree with it, per §4.2.
pub fn detect_primary(samples_mono: &[f32], sample_rate: u32, config: &AnalysisConfig) -> Option<TrackKey> {
    let duration_seconds = samples_mono.len() as f64 / sample_rate as f64;
    let half_window = (KEY_VOTE_WINDOW_SECONDS / 2.0 * sample_rate as f64) as usize;

    let mut votes: Vec<(u8, Mode, f64)> = Vec::with_capacity(KEY_VOTE_WINDOW_FRACTIONS.len());
    for &frac in &KEY_VOTE_WINDOW_FRACTIONS {
        let center = ((frac * duration_seconds * sample_rate as f64) as usize).min(samples_mono.len());
        let start = center.saturating_sub(half_window);
        let end = (center + half_window).min(samples_mono.len());
        if end <= start {
            continue;
        }
        let chroma = chromagram(&samples_mono[start..end], sample_rate, config);
        if chroma.iter().all(|&v| v == 0.0) {
            continue;
        }
        let (pitch_class, mode, strength) = best_key_match(&chroma);
        votes.push((pitch_class, mode, strength));
    }

    if votes.is_empty() {
        return None;
    }

    // Average strength per distinct (pitch_class, mode), then take the
    // key with the highest average, per §4.2 ("select the key with
    // highest average strength").
    let mut grouped: Vec<(u8, Mode, f64, u32)> = Vec::new();
    for (pitch_class, mode, strength) in votes {
        match grouped.iter_mut().find(|(pc, m, _, _)| *pc == pitch_class && *m == mode) {
            Some(entry) => {
                entry.2 += strength;
                entry.3 += 1;
            }
            None => grouped.push((pitch_class, mode, strength, 1)),
        }
    }

    let (pitch_class, mode, total_strength, count) = grouped
        .into_iter()
        .max_by(|a, b| {
            let avg_a = a.2 / a.3 as f64;
            let avg_b = b.2 / b.3 as f64;
            avg_a.partial_cmp(&avg_b).unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap();

    Some(TrackKey {
        pitch_class,
        mode,
        camelot: camelot_code(pitch_class, mode),
        confidence: total_strength / count as f64,
    })
}

/// Fallback path: a single representative window (a 20-second window
/// taken from the track's centre, to avoid intros/outros), with the same
/// profile-correlation scoring but a reduced-weight confidence since
/// only a partial window is seen.
pub fn detect_fallback(samples_mono: &[f32], sample_rate: u32, config: &AnalysisConfig) -> TrackKey {
    let window_samples = (config.key_fallback_window_seconds * sample_rate as f64) as usize;
    let center = samples_mono.len() / 2;
    let half = window_samples / 2;
    let start = center.saturating_sub(half);
    let end = (center + half).min(samples_mono.len());

    let window = if end > start {
        &samples_mono[start..end]
    } else {
        samples_mono
    };

    let chroma = chromagram(window, sample_rate, config);
    let (pitch_class, mode, confidence) = best_key_match(&chroma);
    TrackKey {
        pitch_class,
        mode,
        camelot: camelot_code(pitch_class, mode),
        confidence: confidence * 0.8,
    }
}

pub fn pitch_class_name(pitch_class: u8) -> &'static str {
    PITCH_CLASS_NAMES[pitch_class as usize % 12]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_tone(freq: f32, duration_seconds: f32, sample_rate: u32) -> Vec<f32> {
        let n = (duration_seconds * sample_rate as f32) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn camelot_codes_cover_both_rings() {
        assert_eq!(camelot_code(0, Mode::Major), "8B");
        assert_eq!(camelot_code(9, Mode::Minor), "8A");
    }

    #[test]
    fn pitch_class_name_wraps() {
        assert_eq!(pitch_class_name(0), "C");
        assert_eq!(pitch_class_name(12), "C");
    }

    #[test]
    fn chromagram_peaks_near_tone_pitch_class() {
        let sample_rate = 44_100;
        let samples = sine_tone(440.0, 5.0, sample_rate); // A4
        let config = AnalysisConfig::default();
        let chroma = chromagram(&samples, sample_rate, &config);
        let max_class = chroma
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(max_class, 9); // A
    }
}
