//! C6 Pair Scorer, per §4.6.
//!
//! Every weight is sourced from [`beatline_core::ScoringWeights`] rather
//! than hard-coded, so the rubric can be tuned without a rebuild.

use beatline_core::{
    PointQuality, ScoreBreakdown, ScoringWeights, SectionType, TransitionKind, TransitionPoint,
};

/// Inputs the scorer needs about each endpoint's track beyond the point
/// itself: its key, current BPM, current energy, and how many times the
/// destination has already been used in the route so far.
#[derive(Debug, Clone, Copy)]
pub struct EndpointContext {
    pub pitch_class: u8,
    pub same_mode_as_other: bool,
    pub bpm: f64,
    pub energy: f64,
    pub is_downbeat: bool,
    pub section_type: Option<SectionType>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MoodMatch {
    pub shared_themes: u32,
    pub matching_axes: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct VarietyContext {
    pub times_destination_used: u32,
    pub repeated_structural_pair: bool,
    pub from_section: Option<SectionType>,
    pub to_section: Option<SectionType>,
}

/// A fully scored pair, before playback-rate/crossfade-duration are
/// attached by the caller (the planner owns that, since it already knows
/// both tracks' BPM at the call site).
pub struct PairScore {
    pub breakdown: ScoreBreakdown,
    pub total_score: f64,
}

fn structure_score(
    from_is_downbeat: bool,
    to_is_downbeat: bool,
    from_section: Option<SectionType>,
    to_section: Option<SectionType>,
    weights: &ScoringWeights,
) -> f64 {
    let base = match (from_is_downbeat, to_is_downbeat) {
        (true, true) => weights.structure_downbeat_both,
        (true, false) | (false, true) => weights.structure_downbeat_one,
        (false, false) => weights.structure_downbeat_none,
    };

    let multiplier = match (from_section, to_section) {
        (Some(SectionType::Outro), Some(SectionType::Intro)) => weights.structure_outro_to_intro_multiplier,
        (Some(SectionType::Instrumental), Some(SectionType::Intro))
        | (Some(SectionType::Instrumental), Some(SectionType::Verse)) => {
            weights.structure_instrumental_to_verse_or_chorus_multiplier
        }
        (Some(SectionType::Verse), Some(SectionType::Instrumental))
        | (Some(SectionType::Chorus), Some(SectionType::Instrumental)) => {
            weights.structure_verse_or_chorus_to_instrumental_multiplier
        }
        _ => 1.0,
    };

    (base * multiplier).min(weights.structure_clamp)
}

/// Harmony sub-score and the multiplier it implies on the total, per
/// §4.6.3. Symmetric in `from`/`to` up to mode parity, satisfying §8's
/// symmetry invariant.
fn harmony_score(delta: u8, same_mode: bool, weights: &ScoringWeights) -> (f64, f64) {
    let bucket = match delta {
        0 => weights.harmony_delta_0,
        3 | 9 => weights.harmony_delta_3_or_9,
        5 | 7 => weights.harmony_delta_5_or_7,
        1 | 2 | 10 | 11 => weights.harmony_delta_near,
        _ => return (0.0, weights.harmony_zero_total_multiplier),
    };
    let score = if same_mode { bucket.same_mode } else { bucket.diff_mode };
    (score, 1.0)
}

fn energy_score(from_energy: f64, to_energy: f64, weights: &ScoringWeights) -> f64 {
    (weights.energy_scale * 100.0 / 3.0 * (1.0 - 3.0 * (from_energy - to_energy).abs())).max(0.0)
}

fn mood_score(mood: MoodMatch, weights: &ScoringWeights) -> f64 {
    let theme_score = (mood.shared_themes as f64 * weights.mood_theme_points).min(weights.mood_theme_cap);
    let axis_score = mood.matching_axes as f64 * weights.mood_axis_points;
    theme_score + axis_score
}

fn variety_score(variety: &VarietyContext, weights: &ScoringWeights) -> f64 {
    let mut score = match variety.times_destination_used {
        0 => weights.variety_used_0,
        1 => weights.variety_used_1,
        2 => weights.variety_used_2,
        _ => weights.variety_used_3_plus,
    };

    if variety.repeated_structural_pair {
        score += weights.variety_repeat_pattern_penalty;
    }

    score += match (variety.from_section, variety.to_section) {
        (Some(SectionType::Outro), Some(SectionType::Intro)) => weights.variety_outro_to_intro_bonus,
        (Some(SectionType::Instrumental), Some(SectionType::Verse)) => {
            weights.variety_instrumental_to_verse_bonus
        }
        (Some(SectionType::Bridge), Some(SectionType::Chorus)) => weights.variety_bridge_to_chorus_bonus,
        _ => 0.0,
    };

    score
}

fn semantic_hint_score(from_quality: Option<PointQuality>, to_quality: Option<PointQuality>, weights: &ScoringWeights) -> f64 {
    let quality_points = |q: PointQuality| match q {
        PointQuality::Excellent => weights.semantic_hint_excellent,
        PointQuality::Good => weights.semantic_hint_good,
        PointQuality::Fair => weights.semantic_hint_fair,
    };
    from_quality.map(quality_points).unwrap_or(0.0) + to_quality.map(quality_points).unwrap_or(0.0)
}

/// Total tempo penalty multiplier from the BPM ratio `r = |toBpm - fromBpm| / fromBpm`.
/// Monotone non-increasing in `r`, satisfying §8's monotonicity invariant.
pub fn tempo_penalty_multiplier(from_bpm: f64, to_bpm: f64, weights: &ScoringWeights) -> f64 {
    if from_bpm <= 0.0 {
        return 1.0;
    }
    let r = (to_bpm - from_bpm).abs() / from_bpm;
    if r > weights.tempo_penalty_ratio_severe {
        weights.tempo_penalty_severe_multiplier
    } else if r > weights.tempo_penalty_ratio_moderate {
        weights.tempo_penalty_moderate_multiplier
    } else {
        1.0
    }
}

pub fn playback_rate(from_bpm: f64, to_bpm: f64, weights: &ScoringWeights) -> f64 {
    if from_bpm <= 0.0 {
        return 1.0;
    }
    (to_bpm / from_bpm).clamp(weights.playback_rate_min, weights.playback_rate_max)
}

/// Full §4.6 scoring: seven sub-scores, harmony-zero multiplier, tempo
/// penalty.
#[allow(clippy::too_many_arguments)]
pub fn score_pair(
    from_point: &TransitionPoint,
    to_point: &TransitionPoint,
    from_ctx: EndpointContext,
    to_ctx: EndpointContext,
    mood: MoodMatch,
    variety: VarietyContext,
    weights: &ScoringWeights,
) -> PairScore {
    let delta = {
        let raw = (from_ctx.pitch_class as i16 - to_ctx.pitch_class as i16).rem_euclid(12) as u8;
        raw.min(12 - raw)
    };
    let (harmony, harmony_multiplier) = harmony_score(delta, from_ctx.same_mode_as_other, weights);

    let breakdown = ScoreBreakdown {
        point_quality: weights.point_quality_multiplier * (from_point.score + to_point.score),
        structure: structure_score(from_ctx.is_downbeat, to_ctx.is_downbeat, from_ctx.section_type, to_ctx.section_type, weights),
        harmony,
        energy: energy_score(from_ctx.energy, to_ctx.energy, weights),
        mood: mood_score(mood, weights),
        variety: variety_score(&variety, weights),
        semantic_hint: semantic_hint_score(Some(from_point.quality), Some(to_point.quality), weights),
    };

    let tempo_multiplier = tempo_penalty_multiplier(from_ctx.bpm, to_ctx.bpm, weights);
    let total_score = breakdown.sum() * harmony_multiplier * tempo_multiplier;

    PairScore { breakdown, total_score }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatline_core::{PositionTag, TrackId};

    fn point(score: f64, quality: PointQuality) -> TransitionPoint {
        TransitionPoint {
            track: TrackId(0),
            beat_index: 0,
            time: 0.0,
            score,
            quality,
            preferred_kind: TransitionKind::Crossfade,
            position: PositionTag::Early,
        }
    }

    #[test]
    fn same_key_same_bpm_scores_full_harmony_and_no_tempo_penalty() {
        let weights = ScoringWeights::default();
        let from = point(200.0, PointQuality::Excellent);
        let to = point(200.0, PointQuality::Excellent);
        let from_ctx = EndpointContext { pitch_class: 0, same_mode_as_other: true, bpm: 120.0, energy: 0.5, is_downbeat: true, section_type: None };
        let to_ctx = EndpointContext { pitch_class: 0, same_mode_as_other: true, bpm: 120.0, energy: 0.5, is_downbeat: true, section_type: None };
        let variety = VarietyContext { times_destination_used: 0, repeated_structural_pair: false, from_section: None, to_section: None };
        let result = score_pair(&from, &to, from_ctx, to_ctx, MoodMatch::default(), variety, &weights);
        assert_eq!(result.breakdown.harmony, 250.0);
        assert_eq!(tempo_penalty_multiplier(120.0, 120.0, &weights), 1.0);
    }

    #[test]
    fn harmonic_mismatch_multiplies_total_by_point_six() {
        let weights = ScoringWeights::default();
        let delta6_same_mode = false;
        let (harmony, multiplier) = harmony_score(6, delta6_same_mode, &weights);
        assert_eq!(harmony, 0.0);
        assert_eq!(multiplier, weights.harmony_zero_total_multiplier);
    }

    #[test]
    fn tempo_penalty_is_monotone_non_increasing_in_ratio() {
        let weights = ScoringWeights::default();
        let p1 = tempo_penalty_multiplier(100.0, 110.0, &weights); // r=0.1
        let p2 = tempo_penalty_multiplier(100.0, 130.0, &weights); // r=0.3
        let p3 = tempo_penalty_multiplier(100.0, 160.0, &weights); // r=0.6
        assert!(p1 >= p2);
        assert!(p2 >= p3);
    }

    #[test]
    fn playback_rate_clamps_to_tempo_extremes() {
        let weights = ScoringWeights::default();
        assert_eq!(playback_rate(100.0, 200.0, &weights), 1.1);
        assert_eq!(playback_rate(200.0, 100.0, &weights), 0.9);
    }

    #[test]
    fn harmony_symmetric_up_to_mode_parity() {
        let weights = ScoringWeights::default();
        let (a_to_b, _) = harmony_score(3, true, &weights);
        let (b_to_a, _) = harmony_score(3, true, &weights);
        assert_eq!(a_to_b, b_to_a);
    }
}
