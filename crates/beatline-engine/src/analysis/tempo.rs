//! C2 tempo/beat estimation: primary multi-feature tracker plus an
//! autocorrelation fallback.
//!
//! The primary path follows a Queen-Mary-style pipeline (complex-domain
//! onset detection function, comb-filterbank tempo curve, Viterbi
//! tempo-path tracking, dynamic programming beat placement). The fallback
//! path is a plain FFT-autocorrelation BPM estimate with an explicit
//! octave-ratio correction.

use std::f32::consts::PI;

use beatline_core::{AnalysisConfig, Beat, BeatGrid, Meter};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Result of either tempo-tracking path: beat onsets in seconds plus a
/// confidence in [0, 1]. Meter/downbeat inference is a separate pass
/// (see [`infer_meter`]) shared by both paths.
pub struct RawBeatTrack {
    pub beats_seconds: Vec<f64>,
    pub bpm: f64,
    pub confidence: f32,
}

/// Primary path: complex-domain onset detection function, comb-filterbank
/// tempo curve, Viterbi tempo-path selection, DP beat placement.
pub fn detect_primary(samples_mono: &[f32], sample_rate: u32, config: &AnalysisConfig) -> Option<RawBeatTrack> {
    if samples_mono.len() < sample_rate as usize * 4 {
        return None;
    }

    let odf = complex_domain_odf(samples_mono, sample_rate, config);
    if odf.is_empty() {
        return None;
    }

    let odf_sr = sample_rate as f32 / config.hop_size as f32;
    let tempo_curve = tempo_curve_via_comb_filterbank(&odf, odf_sr, config);
    if tempo_curve.is_empty() {
        return None;
    }

    let (path, confidence) = viterbi_tempo_path(&tempo_curve, config);
    let mut bpm = median(&path).unwrap_or(120.0);

    let (_, alignment) = best_first_beat_offset(&odf, odf_sr, bpm, 16);
    bpm = validate_with_alignment(&odf, odf_sr, bpm, alignment, config);

    let beats = dp_beat_tracking(&odf, odf_sr, bpm);
    let beats_seconds: Vec<f64> = beats.iter().map(|&f| f as f64 / odf_sr as f64).collect();

    if beats_seconds.len() < 4 {
        return None;
    }

    Some(RawBeatTrack {
        beats_seconds,
        bpm,
        confidence,
    })
}

/// Fallback path: FFT-autocorrelation BPM estimation on the bass-band
/// onset envelope, with octave-ratio correction preferring 80-140 BPM.
pub fn detect_fallback(samples_mono: &[f32], sample_rate: u32, config: &AnalysisConfig) -> RawBeatTrack {
    let envelope = bass_onset_envelope(samples_mono, sample_rate, config);
    let (mut bpm, confidence) = autocorrelation_bpm(&envelope, sample_rate, config);
    bpm = correct_octave_ambiguity(bpm, config);

    let beat_interval = 60.0 / bpm;
    let first_beat = find_first_beat_phase(&envelope, sample_rate, beat_interval);

    let duration = samples_mono.len() as f64 / sample_rate as f64;
    let mut beats_seconds = Vec::new();
    let mut t = first_beat;
    while t < duration {
        beats_seconds.push(t);
        t += beat_interval;
    }

    RawBeatTrack {
        beats_seconds,
        bpm,
        confidence,
    }
}

/// Builds the beat grid from raw onset times: assigns per-beat duration
/// from the following onset, infers meter by per-beat loudness voting
/// over numerators `{2..=12}`, and marks downbeats at the modulo class
/// with maximum mean loudness.
pub fn build_beat_grid(track: &RawBeatTrack, loudness_per_beat: &[f32], duration_seconds: f64) -> BeatGrid {
    let mut beats = Vec::with_capacity(track.beats_seconds.len());
    for (i, &start) in track.beats_seconds.iter().enumerate() {
        let end = track
            .beats_seconds
            .get(i + 1)
            .copied()
            .unwrap_or(duration_seconds);
        beats.push(Beat {
            start,
            duration: (end - start).max(0.0),
            confidence: track.confidence,
            is_downbeat: false,
        });
    }

    let (meter, offset) = infer_meter(loudness_per_beat);
    for (i, beat) in beats.iter_mut().enumerate() {
        beat.is_downbeat = (i as u8).wrapping_rem(meter.numerator) == offset;
    }

    BeatGrid {
        beats,
        bpm: track.bpm,
        meter,
        downbeat_offset: offset,
        confidence: track.confidence,
    }
}

/// Votes over candidate numerators `{2..=12}` by how consistently the
/// modulo-`n` loudness pattern repeats, per §4.2. Returns the winning
/// meter plus the downbeat offset (modulo class with max mean loudness).
pub fn infer_meter(loudness_per_beat: &[f32]) -> (Meter, u8) {
    if loudness_per_beat.len() < 4 {
        return (Meter::FOUR_FOUR, 0);
    }

    let mut best_numerator = 4u8;
    let mut best_offset = 0u8;
    let mut best_agreement = f32::MIN;

    for numerator in 2u8..=12 {
        let n = numerator as usize;
        if loudness_per_beat.len() < n * 2 {
            continue;
        }
        let mut class_means = vec![0.0f32; n];
        let mut class_counts = vec![0usize; n];
        for (i, &loudness) in loudness_per_beat.iter().enumerate() {
            let class = i % n;
            class_means[class] += loudness;
            class_counts[class] += 1;
        }
        for (mean, count) in class_means.iter_mut().zip(class_counts.iter()) {
            if *count > 0 {
                *mean /= *count as f32;
            }
        }

        let overall: f32 = class_means.iter().sum::<f32>() / n as f32;
        let variance: f32 =
            class_means.iter().map(|m| (m - overall).powi(2)).sum::<f32>() / n as f32;

        // Agreement favours a meter whose downbeat class stands out from
        // the rest (high variance) while still having enough support.
        if variance > best_agreement {
            best_agreement = variance;
            best_numerator = numerator;
            best_offset = class_means
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i as u8)
                .unwrap_or(0);
        }
    }

    (
        Meter {
            numerator: best_numerator,
            denominator: Meter::denominator_for_numerator(best_numerator),
        },
        best_offset,
    )
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(sorted[sorted.len() / 2])
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (size - 1) as f32).cos()))
        .collect()
}

/// Complex-domain onset detection function (Duxbury et al 2003), with
/// adaptive spectral whitening.
fn complex_domain_odf(samples: &[f32], sample_rate: u32, config: &AnalysisConfig) -> Vec<f32> {
    let fft_size = config.fft_size;
    let hop_size = config.hop_size;
    if samples.len() < fft_size {
        return Vec::new();
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);
    let window = hann_window(fft_size);
    let num_bins = fft_size / 2 + 1;

    let mut prev_magnitude = vec![0.0f32; num_bins];
    let mut prev_phase = vec![0.0f32; num_bins];
    let mut prev_prev_phase = vec![0.0f32; num_bins];
    let mut whitening_memory = vec![0.0f32; num_bins];
    let whitening_decay = 0.9997_f32.powf(fft_size as f32 / sample_rate as f32);
    let whitening_floor = 1e-6_f32;

    let mut odf = Vec::new();

    for start in (0..samples.len() - fft_size).step_by(hop_size) {
        let mut buffer: Vec<Complex<f32>> = samples[start..start + fft_size]
            .iter()
            .zip(window.iter())
            .map(|(s, w)| Complex::new(s * w, 0.0))
            .collect();
        fft.process(&mut buffer);

        let mut magnitudes = Vec::with_capacity(num_bins);
        let mut phases = Vec::with_capacity(num_bins);
        for c in buffer.iter().take(num_bins) {
            magnitudes.push(c.norm());
            phases.push(c.arg());
        }

        for (i, mag) in magnitudes.iter_mut().enumerate() {
            whitening_memory[i] = (whitening_memory[i] * whitening_decay).max(*mag);
            let divisor = whitening_memory[i].max(whitening_floor);
            *mag /= divisor;
        }

        let mut onset_value = 0.0f32;
        for i in 0..num_bins {
            let predicted_phase = 2.0 * prev_phase[i] - prev_prev_phase[i];
            let predicted = Complex::from_polar(prev_magnitude[i], predicted_phase);
            let actual = Complex::from_polar(magnitudes[i], phases[i]);
            onset_value += (actual - predicted).norm();

            prev_prev_phase[i] = prev_phase[i];
            prev_phase[i] = phases[i];
            prev_magnitude[i] = magnitudes[i];
        }
        odf.push(onset_value);
    }

    normalize_and_smooth(&mut odf);
    odf
}

fn normalize_and_smooth(odf: &mut Vec<f32>) {
    if odf.is_empty() {
        return;
    }
    let mean: f32 = odf.iter().sum::<f32>() / odf.len() as f32;
    for v in odf.iter_mut() {
        *v = (*v - mean).max(0.0);
    }
    let max = odf.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        for v in odf.iter_mut() {
            *v /= max;
        }
    }
    let original = odf.clone();
    for i in 1..odf.len().saturating_sub(1) {
        let mut window = [original[i - 1], original[i], original[i + 1]];
        window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        odf[i] = window[1];
    }
}

fn tempo_curve_via_comb_filterbank(odf: &[f32], odf_sr: f32, config: &AnalysisConfig) -> Vec<(f64, f32)> {
    let window_seconds = 6.0f32;
    let hop_seconds = 1.5f32;
    let window_samples = (window_seconds * odf_sr) as usize;
    let hop_samples = (hop_seconds * odf_sr) as usize;

    if odf.len() < window_samples.max(1) {
        return vec![analyze_tempo_window(odf, odf_sr, config)];
    }

    let mut estimates = Vec::new();
    let mut start = 0;
    while start + window_samples <= odf.len() {
        estimates.push(analyze_tempo_window(&odf[start..start + window_samples], odf_sr, config));
        start += hop_samples.max(1);
    }
    if start < odf.len() && odf.len() - start > window_samples / 2 {
        estimates.push(analyze_tempo_window(&odf[start..], odf_sr, config));
    }
    estimates
}

fn analyze_tempo_window(window: &[f32], odf_sr: f32, config: &AnalysisConfig) -> (f64, f32) {
    let autocorr = fft_autocorrelation(window);

    let min_lag = (60.0 * odf_sr as f64 / config.max_bpm) as usize;
    let max_lag = ((60.0 * odf_sr as f64 / config.min_bpm) as usize).min(autocorr.len() / 2);
    if max_lag <= min_lag || autocorr.len() < 8 {
        return (120.0, 0.0);
    }

    let mut scores = Vec::new();
    let mut bpm = config.min_bpm;
    while bpm <= config.max_bpm {
        let period = 60.0 * odf_sr as f64 / bpm;
        let lag = period as usize;
        if lag >= min_lag && lag <= max_lag && lag < autocorr.len() / 4 {
            scores.push((bpm, resonant_comb_score(&autocorr, period)));
        }
        bpm += 0.5;
    }

    if scores.is_empty() {
        return (120.0, 0.0);
    }

    let total: f32 = scores.iter().map(|(_, s)| *s).sum();
    let norm = if total > 0.0 { 1.0 / total } else { 1.0 };

    let mut best_bpm = 120.0;
    let mut best_score = 0.0f32;
    for (bpm, raw) in &scores {
        let weighted = raw * norm * rayleigh_tempo_weight(*bpm);
        if weighted > best_score {
            best_score = weighted;
            best_bpm = *bpm;
        }
    }

    let confidence = if best_score > 0.0 {
        (best_score / scores.iter().map(|(_, s)| *s).sum::<f32>().max(1e-6)).min(1.0)
    } else {
        0.0
    };
    (best_bpm, confidence)
}

fn resonant_comb_score(autocorr: &[f32], period: f64) -> f32 {
    let lag = period as usize;
    if lag == 0 || lag >= autocorr.len() / 4 {
        return 0.0;
    }
    let num_harmonics = 4i32;
    let mut score = 0.0f32;
    for a in 1..=num_harmonics {
        let mut harmonic_sum = 0.0f32;
        for b in (1 - a)..=(a - 1) {
            let idx = a * lag as i32 + b;
            if idx >= 0 && (idx as usize) < autocorr.len() {
                harmonic_sum += autocorr[idx as usize];
            }
        }
        score += harmonic_sum / (2 * a - 1) as f32;
    }
    score.max(0.0)
}

fn rayleigh_tempo_weight(bpm: f64) -> f32 {
    let log_bpm = bpm.ln();
    let log_center = 120.0f64.ln();
    let log_sigma = 0.5;
    let diff = log_bpm - log_center;
    ((-(diff * diff) / (2.0 * log_sigma * log_sigma)).exp() as f32).max(0.1)
}

/// Autocorrelation via the Wiener-Khinchin theorem: forward FFT, power
/// spectrum, inverse FFT, with a short median filter to suppress noise.
fn fft_autocorrelation(signal: &[f32]) -> Vec<f32> {
    let n = (signal.len().next_power_of_two() * 2).max(8);
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    let ifft = planner.plan_fft_inverse(n);

    let mut buffer: Vec<Complex<f32>> = signal
        .iter()
        .map(|&x| Complex::new(x, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(n)
        .collect();

    fft.process(&mut buffer);
    for c in buffer.iter_mut() {
        *c = Complex::new(c.norm_sqr(), 0.0);
    }
    ifft.process(&mut buffer);

    let norm = 1.0 / n as f32;
    let mut autocorr: Vec<f32> = buffer.iter().map(|c| c.re * norm).collect();

    let original = autocorr.clone();
    for i in 2..autocorr.len().saturating_sub(2) {
        let mut window = [
            original[i - 2],
            original[i - 1],
            original[i],
            original[i + 1],
            original[i + 2],
        ];
        window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        autocorr[i] = window[2];
    }
    autocorr
}

fn viterbi_tempo_path(tempo_estimates: &[(f64, f32)], config: &AnalysisConfig) -> (Vec<f64>, f32) {
    if tempo_estimates.is_empty() {
        return (Vec::new(), 0.0);
    }
    if tempo_estimates.len() == 1 {
        return (vec![tempo_estimates[0].0], tempo_estimates[0].1);
    }

    let resolution = 1.0;
    let num_states = ((config.max_bpm - config.min_bpm) / resolution) as usize + 1;

    let observations: Vec<Vec<f32>> = tempo_estimates
        .iter()
        .map(|(obs_bpm, obs_conf)| {
            (0..num_states)
                .map(|state| {
                    let state_bpm = config.min_bpm + state as f64 * resolution;
                    let diff = state_bpm - obs_bpm;
                    (-(diff * diff) / 50.0).exp() as f32 * obs_conf
                })
                .collect()
        })
        .collect();

    let sigma = 8.0f64;
    let transition = |from: usize, to: usize| -> f32 {
        let diff = (to as f64 - from as f64) * resolution;
        (-(diff * diff) / (2.0 * sigma * sigma)).exp() as f32
    };

    let mut viterbi = vec![vec![0.0f32; num_states]; observations.len()];
    let mut backpointer = vec![vec![0usize; num_states]; observations.len()];

    for state in 0..num_states {
        viterbi[0][state] = observations[0][state];
    }

    for t in 1..observations.len() {
        for state in 0..num_states {
            let search_range = 20usize;
            let start_state = state.saturating_sub(search_range);
            let end_state = (state + search_range).min(num_states);

            let mut best_prev_score = 0.0f32;
            let mut best_prev_state = 0usize;
            for prev_state in start_state..end_state {
                let score = viterbi[t - 1][prev_state] * transition(prev_state, state);
                if score > best_prev_score {
                    best_prev_score = score;
                    best_prev_state = prev_state;
                }
            }
            viterbi[t][state] = best_prev_score * observations[t][state];
            backpointer[t][state] = best_prev_state;
        }
        let sum: f32 = viterbi[t].iter().sum();
        if sum > 0.0 {
            for v in &mut viterbi[t] {
                *v /= sum;
            }
        }
    }

    let last_t = observations.len() - 1;
    let mut path = vec![0usize; observations.len()];
    let (best_final_state, _) = viterbi[last_t]
        .iter()
        .enumerate()
        .fold((0usize, 0.0f32), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
    path[last_t] = best_final_state;
    for t in (0..last_t).rev() {
        path[t] = backpointer[t + 1][path[t + 1]];
    }

    let tempo_path: Vec<f64> = path
        .iter()
        .map(|&s| config.min_bpm + s as f64 * resolution)
        .collect();
    let avg_confidence =
        tempo_estimates.iter().map(|(_, c)| c).sum::<f32>() / tempo_estimates.len() as f32;
    (tempo_path, avg_confidence)
}

fn adaptive_threshold(odf: &[f32], percentile: f32) -> f32 {
    if odf.is_empty() {
        return 0.0;
    }
    let mut sorted = odf.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((sorted.len() - 1) as f32 * percentile) as usize;
    sorted[idx]
}

fn transient_alignment(odf: &[f32], odf_sr: f32, bpm: f64, first_beat_frame: usize) -> f32 {
    if odf.is_empty() || bpm <= 0.0 {
        return 0.0;
    }
    let beat_period = (60.0 * odf_sr as f64 / bpm) as usize;
    if beat_period == 0 {
        return 0.0;
    }
    let tolerance = beat_period / 4;
    let threshold = adaptive_threshold(odf, 0.3);

    let mut beat_frame = first_beat_frame;
    let mut aligned = 0;
    let mut total = 0;
    while beat_frame < odf.len() {
        let start = beat_frame.saturating_sub(tolerance);
        let end = (beat_frame + tolerance).min(odf.len());
        let peak = odf[start..end].iter().cloned().fold(0.0f32, f32::max);
        if peak > threshold {
            aligned += 1;
        }
        total += 1;
        beat_frame += beat_period;
    }
    if total == 0 {
        0.0
    } else {
        aligned as f32 / total as f32
    }
}

fn best_first_beat_offset(odf: &[f32], odf_sr: f32, bpm: f64, num_phases: usize) -> (usize, f32) {
    if odf.is_empty() || bpm <= 0.0 || num_phases == 0 {
        return (0, 0.0);
    }
    let beat_period = (60.0 * odf_sr as f64 / bpm) as usize;
    if beat_period == 0 {
        return (0, 0.0);
    }
    let phase_step = (beat_period / num_phases).max(1);

    let mut best_offset = 0;
    let mut best_score = 0.0f32;
    for phase in 0..num_phases {
        let offset = phase * phase_step;
        let score = transient_alignment(odf, odf_sr, bpm, offset);
        if score > best_score {
            best_score = score;
            best_offset = offset;
        }
    }
    (best_offset, best_score)
}

fn validate_with_alignment(
    odf: &[f32],
    odf_sr: f32,
    detected_bpm: f64,
    detected_alignment: f32,
    config: &AnalysisConfig,
) -> f64 {
    let mut best_bpm = detected_bpm;
    let mut best_score = detected_alignment;

    let double_bpm = detected_bpm * 2.0;
    if double_bpm <= config.max_bpm {
        let (_, alignment) = best_first_beat_offset(odf, odf_sr, double_bpm, 16);
        if alignment > best_score + 0.15 {
            best_bpm = double_bpm;
            best_score = alignment;
        }
    }

    let half_bpm = detected_bpm * 0.5;
    if half_bpm >= config.min_bpm {
        let (_, alignment) = best_first_beat_offset(odf, odf_sr, half_bpm, 16);
        if alignment > best_score + 0.25 {
            best_bpm = half_bpm;
        }
    }

    best_bpm
}

fn dp_beat_tracking(odf: &[f32], odf_sr: f32, bpm: f64) -> Vec<usize> {
    if odf.is_empty() || bpm <= 0.0 {
        return Vec::new();
    }
    let beat_period = (60.0 * odf_sr as f64 / bpm) as usize;
    if beat_period == 0 {
        return Vec::new();
    }

    let n = odf.len();
    let alpha = 100.0f32;
    let mut score = vec![0.0f32; n];
    let mut backpointer = vec![0usize; n];

    for i in 0..beat_period.min(n) {
        score[i] = odf[i];
    }

    for t in beat_period..n {
        let mut best_score = f32::NEG_INFINITY;
        let mut best_prev = 0usize;
        let search_start = ((t as f32 - beat_period as f32 * 1.2).max(0.0)) as usize;
        let search_end = ((t as f32 - beat_period as f32 * 0.8).max(0.0) as usize).min(t);
        for prev in search_start..search_end {
            let expected_prev = t - beat_period;
            let deviation = (prev as f32 - expected_prev as f32).abs();
            let penalty = alpha * (deviation / beat_period as f32).powi(2);
            let candidate = score[prev] - penalty;
            if candidate > best_score {
                best_score = candidate;
                best_prev = prev;
            }
        }
        score[t] = odf[t] + best_score;
        backpointer[t] = best_prev;
    }

    let search_start = n.saturating_sub(beat_period);
    let (mut best_end, mut best_end_score) = (search_start, score[search_start]);
    for i in search_start..n {
        if score[i] > best_end_score {
            best_end_score = score[i];
            best_end = i;
        }
    }

    let mut beats = Vec::new();
    let mut current = best_end;
    while current > 0 {
        beats.push(current);
        let prev = backpointer[current];
        if prev >= current {
            break;
        }
        current = prev;
    }
    beats.push(current);
    beats.reverse();
    beats
}

/// Half-wave rectified spectral-flux envelope in the bass band (fallback
/// path), grounded on `calculate_bass_onset_envelope`.
fn bass_onset_envelope(samples: &[f32], sample_rate: u32, config: &AnalysisConfig) -> Vec<f32> {
    let fft_size = config.fft_size;
    let hop_size = config.hop_size;
    if samples.len() < fft_size {
        return Vec::new();
    }
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);
    let window = hann_window(fft_size);

    let low_bin = (40.0 * fft_size as f32 / sample_rate as f32) as usize;
    let high_bin = ((200.0 * fft_size as f32 / sample_rate as f32) as usize).max(low_bin + 1);

    let mut prev_energy = 0.0f32;
    let mut envelope = Vec::new();
    for start in (0..samples.len() - fft_size).step_by(hop_size) {
        let mut buffer: Vec<Complex<f32>> = samples[start..start + fft_size]
            .iter()
            .zip(window.iter())
            .map(|(s, w)| Complex::new(s * w, 0.0))
            .collect();
        fft.process(&mut buffer);
        let energy: f32 = buffer[low_bin..high_bin.min(buffer.len())]
            .iter()
            .map(|c| c.norm_sqr())
            .sum();
        envelope.push((energy - prev_energy).max(0.0));
        prev_energy = energy;
    }
    envelope
}

fn autocorrelation_bpm(envelope: &[f32], sample_rate: u32, config: &AnalysisConfig) -> (f64, f32) {
    if envelope.is_empty() {
        return (120.0, 0.0);
    }
    let odf_sr = sample_rate as f64 / config.hop_size as f64;
    let autocorr = fft_autocorrelation(envelope);

    let min_lag = (60.0 * odf_sr / config.fallback_max_bpm) as usize;
    let max_lag = ((60.0 * odf_sr / config.fallback_min_bpm) as usize).min(autocorr.len().saturating_sub(1));
    if max_lag <= min_lag + 1 {
        return (120.0, 0.0);
    }

    let (mut best_lag, mut best_value) = (min_lag, f32::MIN);
    for lag in min_lag..=max_lag {
        if autocorr[lag] > best_value {
            best_value = autocorr[lag];
            best_lag = lag;
        }
    }
    let max_autocorr = autocorr[min_lag..=max_lag].iter().cloned().fold(0.0f32, f32::max).max(1e-9);
    let confidence = (best_value / max_autocorr).clamp(0.0, 1.0);
    let bpm = 60.0 * odf_sr / best_lag.max(1) as f64;
    (bpm, confidence)
}

/// Octave-correction preferring 80-140 BPM when two candidates differ by
/// an integer ratio of 2:1, 3:2 or 4:3, per §4.2.
fn correct_octave_ambiguity(bpm: f64, config: &AnalysisConfig) -> f64 {
    let candidates = [
        bpm,
        bpm * 2.0,
        bpm / 2.0,
        bpm * 3.0 / 2.0,
        bpm * 2.0 / 3.0,
        bpm * 4.0 / 3.0,
        bpm * 3.0 / 4.0,
    ];
    candidates
        .into_iter()
        .filter(|&b| b >= config.fallback_min_bpm && b <= config.fallback_max_bpm)
        .min_by(|a, b| {
            let da = preference_distance(*a, config);
            let db = preference_distance(*b, config);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(bpm)
}

fn preference_distance(bpm: f64, config: &AnalysisConfig) -> f64 {
    if bpm >= config.fallback_preferred_min_bpm && bpm <= config.fallback_preferred_max_bpm {
        0.0
    } else if bpm < config.fallback_preferred_min_bpm {
        config.fallback_preferred_min_bpm - bpm
    } else {
        bpm - config.fallback_preferred_max_bpm
    }
}

fn find_first_beat_phase(envelope: &[f32], sample_rate: u32, beat_interval: f64) -> f64 {
    if envelope.is_empty() {
        return 0.0;
    }
    let hop_seconds = 512.0 / sample_rate as f64;
    let sigma = beat_interval * 0.1;
    let onset_times: Vec<f64> = envelope
        .iter()
        .enumerate()
        .filter(|(_, &v)| v > 0.0)
        .map(|(i, _)| i as f64 * hop_seconds)
        .collect();

    if onset_times.is_empty() {
        return 0.0;
    }

    let mut best_offset = 0.0;
    let mut best_score = f64::MIN;
    for candidate in 0..100 {
        let offset = candidate as f64 * beat_interval / 100.0;
        let mut score = 0.0;
        for &onset in &onset_times {
            let phase_error = ((onset - offset) % beat_interval).min(beat_interval - (onset - offset) % beat_interval);
            score += (-(phase_error * phase_error) / (2.0 * sigma * sigma)).exp();
        }
        if score > best_score {
            best_score = score;
            best_offset = offset;
        }
    }
    best_offset
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_track(bpm: f64, duration_seconds: f64, sample_rate: u32) -> Vec<f32> {
        let interval = 60.0 / bpm;
        let mut samples = vec![0.0f32; (duration_seconds * sample_rate as f64) as usize];
        let mut t = 0.0;
        while t < duration_seconds {
            let start = (t * sample_rate as f64) as usize;
            for i in 0..200.min(samples.len().saturating_sub(start)) {
                let decay = (-(i as f32) / 40.0).exp();
                samples[start + i] += decay * (2.0 * PI * 1000.0 * i as f32 / sample_rate as f32).sin();
            }
            t += interval;
        }
        samples
    }

    #[test]
    fn fallback_recovers_approximate_bpm_from_click_track() {
        let sample_rate = 44_100;
        let samples = click_track(128.0, 20.0, sample_rate);
        let config = AnalysisConfig::default();
        let result = detect_fallback(&samples, sample_rate, &config);
        let ratio = result.bpm / 128.0;
        let nearest_integer_ratio = [0.5, 1.0, 2.0, 0.75, 1.5, 4.0 / 3.0]
            .iter()
            .map(|r| (ratio - r).abs())
            .fold(f64::MAX, f64::min);
        assert!(nearest_integer_ratio < 0.1, "bpm {} not near a ratio of 128", result.bpm);
    }

    #[test]
    fn infer_meter_favours_four_four_with_strong_downbeats() {
        let mut loudness = Vec::new();
        for _ in 0..16 {
            loudness.extend_from_slice(&[0.9, 0.2, 0.3, 0.2]);
        }
        let (meter, offset) = infer_meter(&loudness);
        assert_eq!(meter.numerator, 4);
        assert_eq!(offset, 0);
    }

    #[test]
    fn octave_correction_prefers_80_140_range() {
        let config = AnalysisConfig::default();
        let corrected = correct_octave_ambiguity(60.0, &config);
        assert!(corrected >= config.fallback_preferred_min_bpm);
    }
}
