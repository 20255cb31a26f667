//! C5 Transition-Point Finder.
//!
//! Scores candidate positions on a beat grid against downbeat alignment,
//! section boundaries and suggested-point proximity: plain scoring
//! functions over `&BeatGrid`/`&Timeline`, `Vec`-based candidate
//! collection, no hidden global state.

use beatline_core::{
    AnalysisError, BeatGrid, PerBeatFeatures, PointQuality, PositionTag, Section, SectionType, Timeline,
    TransitionKind, TransitionPoint, TrackId,
};

const MAX_RETAINED_POINTS: usize = 50;
const MIN_RETAINED_SCORE: f64 = 60.0;
const MIN_HEURISTIC_SCORE: f64 = 50.0;

fn section_end_score_and_kind(section: &Section, next: Option<&Section>, is_downbeat: bool) -> (f64, TransitionKind) {
    match section.section_type {
        SectionType::Chorus => {
            let next_is_chorus = next.map(|n| n.section_type == SectionType::Chorus).unwrap_or(false);
            let score = 300.0 + if is_downbeat { 30.0 } else { 0.0 } + if next_is_chorus { 50.0 } else { 0.0 };
            (score, TransitionKind::Beatmatch)
        }
        SectionType::Instrumental | SectionType::Breakdown => (280.0, TransitionKind::Crossfade),
        SectionType::Bridge => (250.0, TransitionKind::Crossfade),
        SectionType::Verse | SectionType::PreChorus => (220.0, TransitionKind::Crossfade),
        SectionType::Outro => (200.0, TransitionKind::Crossfade),
        SectionType::Intro => (180.0, TransitionKind::Crossfade),
    }
}

fn quality_for_score(score: f64) -> PointQuality {
    if score >= 250.0 {
        PointQuality::Excellent
    } else if score >= 150.0 {
        PointQuality::Good
    } else {
        PointQuality::Fair
    }
}

/// Section-based candidates: one point at the end of each section
/// (snapped to the nearest beat at/after `section.end`), plus one entry
/// point at time 0.
fn section_based_points(
    track: TrackId,
    grid: &BeatGrid,
    doc: &beatline_core::TimelineDoc,
    duration_seconds: f64,
) -> Vec<TransitionPoint> {
    let mut points = Vec::new();

    if let Some(first_beat) = grid.beats.first() {
        points.push(TransitionPoint {
            track,
            beat_index: 0,
            time: first_beat.start,
            score: 100.0,
            quality: PointQuality::Good,
            preferred_kind: TransitionKind::Crossfade,
            position: PositionTag::classify(first_beat.start, duration_seconds),
        });
    }

    for (i, section) in doc.sections.iter().enumerate() {
        let beat_index = match grid.beat_at_or_after(section.end) {
            Some(idx) => idx,
            None => continue,
        };
        let beat = &grid.beats[beat_index];
        let (score, kind) = section_end_score_and_kind(section, doc.sections.get(i + 1), beat.is_downbeat);

        points.push(TransitionPoint {
            track,
            beat_index,
            time: beat.start,
            score,
            quality: quality_for_score(score),
            preferred_kind: kind,
            position: PositionTag::classify(beat.start, duration_seconds),
        });
    }

    points
}

/// Heuristic per-downbeat score for tracks without a semantic timeline,
/// per §4.5's point-by-point additive rubric.
fn heuristic_score(
    beat_index: usize,
    grid: &BeatGrid,
    features: &PerBeatFeatures,
    suggested_points_seconds: &[f64],
    used_ranges: &[(f64, f64)],
) -> f64 {
    let beat = &grid.beats[beat_index];
    let mut score = 0.0;

    let energy = features.energy.get(beat_index).copied().unwrap_or(0.0) as f64;
    if energy > 0.7 {
        score += 150.0;
    } else if energy > 0.35 && energy <= 0.5 {
        score += 60.0;
    }
    if energy < 0.15 {
        score -= 150.0;
    }
    if energy < 0.05 {
        score -= 300.0;
    }

    let has_vocal = features.has_vocal.get(beat_index).copied().unwrap_or(false);
    score += if has_vocal { -100.0 } else { 100.0 };

    if beat.is_downbeat {
        score += 100.0;
    }

    let proximity_bonus = suggested_points_seconds
        .iter()
        .map(|&t| (t - beat.start).abs())
        .filter(|&d| d <= 2.0)
        .map(|d| 200.0 - (d / 2.0) * 100.0)
        .fold(0.0_f64, f64::max);
    score += proximity_bonus;

    if used_ranges.iter().any(|&(start, end)| beat.start >= start && beat.start < end) {
        score -= 500.0;
    }

    score
}

/// Finds and scores candidate transition points for one track. Fails
/// only on an empty beat grid, per §4.5.
pub fn find_transition_points(
    track: TrackId,
    grid: &BeatGrid,
    features: &PerBeatFeatures,
    timeline: &Timeline,
    duration_seconds: f64,
    suggested_points_seconds: &[f64],
    used_ranges: &[(f64, f64)],
) -> Result<Vec<TransitionPoint>, AnalysisError> {
    if grid.beats.is_empty() {
        return Err(AnalysisError::new("cannot find transition points on an empty beat grid"));
    }

    let mut points = match timeline.doc() {
        Some(doc) => section_based_points(track, grid, doc, duration_seconds),
        None => grid
            .downbeats()
            .map(|(i, beat)| {
                let score = heuristic_score(i, grid, features, suggested_points_seconds, used_ranges);
                TransitionPoint {
                    track,
                    beat_index: i,
                    time: beat.start,
                    score,
                    quality: quality_for_score(score),
                    preferred_kind: TransitionKind::Crossfade,
                    position: PositionTag::classify(beat.start, duration_seconds),
                }
            })
            .filter(|p| p.score >= MIN_HEURISTIC_SCORE)
            .collect(),
    };

    points.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    points.retain(|p| p.score >= MIN_RETAINED_SCORE);
    points.truncate(MAX_RETAINED_POINTS);

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatline_core::{Beat, Meter};

    fn grid() -> BeatGrid {
        BeatGrid {
            beats: (0..32)
                .map(|i| Beat {
                    start: i as f64 * 0.5,
                    duration: 0.5,
                    confidence: 1.0,
                    is_downbeat: i % 4 == 0,
                })
                .collect(),
            bpm: 120.0,
            meter: Meter::FOUR_FOUR,
            downbeat_offset: 0,
            confidence: 0.9,
        }
    }

    #[test]
    fn empty_grid_is_an_error() {
        let empty = BeatGrid {
            beats: Vec::new(),
            bpm: 120.0,
            meter: Meter::FOUR_FOUR,
            downbeat_offset: 0,
            confidence: 0.0,
        };
        let features = PerBeatFeatures::default();
        let result = find_transition_points(TrackId(0), &empty, &features, &Timeline::Absent("no llm".into()), 16.0, &[], &[]);
        assert!(result.is_err());
    }

    #[test]
    fn heuristic_mode_keeps_only_high_scoring_downbeats() {
        let grid = grid();
        let features = PerBeatFeatures {
            energy: vec![0.9; grid.beats.len()],
            spectral_centroid: vec![1000.0; grid.beats.len()],
            has_vocal: vec![false; grid.beats.len()],
        };
        let points = find_transition_points(
            TrackId(0),
            &grid,
            &features,
            &Timeline::Absent("no llm".into()),
            16.0,
            &[],
            &[],
        )
        .unwrap();
        assert!(!points.is_empty());
        assert!(points.iter().all(|p| p.score >= MIN_RETAINED_SCORE));
        for w in points.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
    }

    #[test]
    fn used_range_penalty_suppresses_a_point() {
        let grid = grid();
        let features = PerBeatFeatures {
            energy: vec![0.9; grid.beats.len()],
            spectral_centroid: vec![1000.0; grid.beats.len()],
            has_vocal: vec![false; grid.beats.len()],
        };
        let used = vec![(0.0, 2.0)];
        let points = find_transition_points(
            TrackId(0),
            &grid,
            &features,
            &Timeline::Absent("no llm".into()),
            16.0,
            &[],
            &used,
        )
        .unwrap();
        assert!(points.iter().all(|p| p.time >= 2.0));
    }
}
