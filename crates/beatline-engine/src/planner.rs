//! C7 Route Planner: beam-pruned A* over `(track, point)` states.
//!
//! Plain structs and free functions, as `analysis::tempo`'s pipeline uses
//! for other CPU-bound work, rather than trait machinery. States are
//! keyed by an arena track index and a point index rather than carrying
//! a pointer into another track's point list, so the search frontier has
//! no borrow-lifetime ties back into the track pool.

use std::collections::VecDeque;
use std::rc::Rc;

use beatline_core::{
    BeatGrid, PerBeatFeatures, PlanError, PlannedRoute, ScoringWeights, SectionType, Timeline,
    TrackId, TrackKey, TransitionCandidate, TransitionPoint, TransitionPointRef,
};

use crate::analysis::same_mode;
use crate::scoring::{self, EndpointContext, MoodMatch, VarietyContext};

/// Everything the planner needs about one track, gathered once up front
/// so A* expansion never touches the decoded PCM.
pub struct PlanningTrack<'a> {
    pub id: TrackId,
    pub bpm: f64,
    pub key: &'a TrackKey,
    pub beat_grid: &'a BeatGrid,
    pub features: &'a PerBeatFeatures,
    pub timeline: &'a Timeline,
    /// Candidate points for this track, already sorted by score
    /// descending and truncated per §4.5 (`find_transition_points`'s
    /// output).
    pub points: Vec<TransitionPoint>,
}

impl<'a> PlanningTrack<'a> {
    fn energy_at(&self, beat_index: usize) -> f64 {
        self.features.energy.get(beat_index).copied().unwrap_or(0.0) as f64
    }

    fn is_downbeat(&self, beat_index: usize) -> bool {
        self.beat_grid
            .beats
            .get(beat_index)
            .map(|b| b.is_downbeat)
            .unwrap_or(false)
    }

    fn section_at(&self, time: f64) -> Option<SectionType> {
        let doc = self.timeline.doc()?;
        doc.sections
            .iter()
            .find(|s| time >= s.start && time < s.end)
            .or_else(|| doc.sections.last())
            .map(|s| s.section_type)
    }

    fn desc_words_at(&self, time: f64) -> Vec<String> {
        let doc = match self.timeline.doc() {
            Some(doc) => doc,
            None => return Vec::new(),
        };
        doc.sections
            .iter()
            .find(|s| time >= s.start && time < s.end)
            .and_then(|s| s.desc.as_ref())
            .map(|desc| {
                desc.to_lowercase()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn has_vocal_at(&self, beat_index: usize) -> bool {
        self.features.has_vocal.get(beat_index).copied().unwrap_or(false)
    }
}

/// Shared theme/axis overlap between two endpoints' section descriptions,
/// feeding the "mood" sub-score. Derives both from the post-processed
/// timeline already on hand: desc-word overlap for themes, energy-band
/// and vocal-presence agreement for axes. See DESIGN.md for why this
/// shape was chosen over a dedicated mood model.
fn mood_match(from: &PlanningTrack, from_beat: usize, to: &PlanningTrack, to_beat: usize) -> MoodMatch {
    let from_words = from.desc_words_at(from.beat_grid.beats[from_beat].start);
    let to_words = to.desc_words_at(to.beat_grid.beats[to_beat].start);
    let shared_themes = from_words.iter().filter(|w| to_words.contains(w)).count() as u32;

    let energy_axis_matches =
        (from.energy_at(from_beat) - to.energy_at(to_beat)).abs() < 0.15;
    let emotion_axis_matches = from.has_vocal_at(from_beat) == to.has_vocal_at(to_beat);
    let matching_axes = energy_axis_matches as u32 + emotion_axis_matches as u32;

    MoodMatch {
        shared_themes,
        matching_axes,
    }
}

fn endpoint_context(track: &PlanningTrack, point: &TransitionPoint, other_key: &TrackKey) -> EndpointContext {
    EndpointContext {
        pitch_class: track.key.pitch_class,
        same_mode_as_other: same_mode(track.key, other_key),
        bpm: track.bpm,
        energy: track.energy_at(point.beat_index),
        is_downbeat: track.is_downbeat(point.beat_index),
        section_type: track.section_at(point.time),
    }
}

/// Scores one candidate edge `from -> to`, producing the full
/// [`TransitionCandidate`]. `times_destination_used` and
/// `repeated_structural_pair` are supplied by the caller: during A*
/// expansion the former is a property of the path being explored (safe
/// to compute live) while the latter is always `false`, since §9 records
/// the decision that structural-history penalties apply only at route
/// finalisation, never during search (to avoid path-order dependence).
fn score_edge(
    from_track: &PlanningTrack,
    from_point_idx: usize,
    to_track: &PlanningTrack,
    to_point_idx: usize,
    times_destination_used: u32,
    repeated_structural_pair: bool,
    weights: &ScoringWeights,
) -> TransitionCandidate {
    let from_point = &from_track.points[from_point_idx];
    let to_point = &to_track.points[to_point_idx];

    let from_ctx = endpoint_context(from_track, from_point, to_track.key);
    let to_ctx = endpoint_context(to_track, to_point, from_track.key);

    let mood = mood_match(from_track, from_point.beat_index, to_track, to_point.beat_index);
    let variety = VarietyContext {
        times_destination_used,
        repeated_structural_pair,
        from_section: from_ctx.section_type,
        to_section: to_ctx.section_type,
    };

    let pair = scoring::score_pair(from_point, to_point, from_ctx, to_ctx, mood, variety, weights);
    let playback_rate = scoring::playback_rate(from_track.bpm, to_track.bpm, weights);

    TransitionCandidate {
        from: TransitionPointRef {
            track: from_track.id,
            point_index: from_point_idx,
            beat_index: from_point.beat_index,
            time: from_point.time,
        },
        to: TransitionPointRef {
            track: to_track.id,
            point_index: to_point_idx,
            beat_index: to_point.beat_index,
            time: to_point.time,
        },
        breakdown: pair.breakdown,
        total_score: pair.total_score,
        playback_rate,
        kind: from_point.preferred_kind,
        crossfade_duration: from_point.preferred_kind.default_duration_seconds(),
    }
}

/// One link of a path, stored as a reverse-linked list so that cloning a
/// frontier state (cheap: an `Rc` bump) never copies the whole path, per
/// §5's "no memoisation... recomputation is intentional to preserve
/// breadth of exploration" — memory, not redundant scoring, is what this
/// avoids duplicating.
struct PathLink {
    candidate: TransitionCandidate,
    parent: Option<Rc<PathLink>>,
}

#[derive(Clone)]
struct PlannerState {
    track: usize,
    point_idx: usize,
    /// Bitset of tracks visited at least once. Supports up to 64 tracks,
    /// which comfortably covers any real mix; a larger library is
    /// rejected up front with `PlanError`.
    visited: u64,
    times_used: Vec<u8>,
    g: f64,
    depth: usize,
    path: Option<Rc<PathLink>>,
}

impl PlannerState {
    fn f(&self, h: f64) -> f64 {
        self.g + h
    }
}

fn materialize_route(path: Option<Rc<PathLink>>) -> PlannedRoute {
    let mut candidates = Vec::new();
    let mut cursor = path;
    while let Some(link) = cursor {
        candidates.push(link.candidate.clone());
        cursor = link.parent.clone();
    }
    candidates.reverse();
    PlannedRoute { candidates }
}

/// Point-index signature of a route, used to tell distinct routes apart
/// per §4.7's "3 distinct routes (different point-index signatures)"
/// termination clause.
fn route_signature(state: &PlannerState) -> Vec<(usize, usize)> {
    let mut signature = Vec::new();
    let mut cursor = state.path.clone();
    while let Some(link) = cursor {
        signature.push((link.candidate.from.point_index, link.candidate.to.point_index));
        cursor = link.parent.clone();
    }
    signature.reverse();
    signature
}

fn beam_width_for_depth(depth: usize, cfg: &beatline_core::PlannerConfig) -> usize {
    if depth <= cfg.beam_width_reduction_depth {
        return cfg.beam_width;
    }
    let steps_past = (depth - cfg.beam_width_reduction_depth) / 5;
    let decayed = cfg.beam_width as f64 * cfg.beam_decay_factor.powi(steps_past as i32);
    (decayed as usize).max(cfg.beam_width_floor)
}

/// Plans a route visiting every track in `tracks` exactly once, starting
/// at `seed`, maximising total transition score via beam-pruned A*, per
/// §4.7. Fails only when the frontier empties out without ever reaching
/// a state that has visited every track.
pub fn plan_route(
    tracks: &[PlanningTrack],
    seed: usize,
    weights: &ScoringWeights,
    cfg: &beatline_core::PlannerConfig,
) -> Result<PlannedRoute, PlanError> {
    if tracks.is_empty() {
        return Err(PlanError::new("no tracks to plan a route over"));
    }
    if tracks.len() > 64 {
        return Err(PlanError::new("route planner supports at most 64 tracks"));
    }
    if tracks[seed].points.is_empty() {
        return Err(PlanError::new("seed track has no retained transition points"));
    }

    let avg_best_point_score = {
        let sum: f64 = tracks
            .iter()
            .map(|t| t.points.first().map(|p| p.score).unwrap_or(0.0))
            .sum();
        sum / tracks.len() as f64
    };
    let heuristic = |remaining: usize| -> f64 {
        (avg_best_point_score * cfg.heuristic_score_multiplier + cfg.heuristic_remaining_bonus)
            * remaining as f64
    };

    let mut frontier: Vec<PlannerState> = (0..tracks[seed].points.len())
        .map(|point_idx| PlannerState {
            track: seed,
            point_idx,
            visited: 1 << seed,
            times_used: {
                let mut v = vec![0u8; tracks.len()];
                v[seed] = 1;
                v
            },
            g: 0.0,
            depth: 0,
            path: None,
        })
        .collect();

    let target = tracks.len() as u32;
    let mut best_goal: Option<PlannerState> = None;
    let mut best_goal_score = f64::NEG_INFINITY;
    let mut distinct_routes: Vec<Vec<(usize, usize)>> = Vec::new();
    let mut iterations: u64 = 0;
    let mut depth = 0usize;

    while !frontier.is_empty() && iterations < cfg.max_iterations {
        let mut next_frontier: Vec<PlannerState> = Vec::new();

        for state in &frontier {
            iterations += 1;
            if iterations >= cfg.max_iterations {
                break;
            }

            let visited_count = state.visited.count_ones();
            if visited_count == target {
                if state.g > best_goal_score {
                    best_goal_score = state.g;
                    best_goal = Some(state.clone());
                }
                let sig = route_signature(state);
                if !distinct_routes.contains(&sig) {
                    distinct_routes.push(sig);
                }
                continue;
            }

            for (candidate_track_idx, candidate_track) in tracks.iter().enumerate() {
                if state.visited & (1 << candidate_track_idx) != 0 {
                    continue;
                }
                let take = candidate_track.points.len().min(cfg.neighbors_per_song);
                for to_point_idx in 0..take {
                    let candidate = score_edge(
                        &tracks[state.track],
                        state.point_idx,
                        candidate_track,
                        to_point_idx,
                        state.times_used[candidate_track_idx] as u32,
                        false,
                        weights,
                    );
                    let g = state.g + candidate.total_score;
                    let remaining = (target - (visited_count + 1)) as usize;
                    let h = heuristic(remaining);

                    if best_goal_score.is_finite() && (g + h) < cfg.prune_factor * best_goal_score {
                        continue;
                    }

                    let mut times_used = state.times_used.clone();
                    times_used[candidate_track_idx] += 1;

                    next_frontier.push(PlannerState {
                        track: candidate_track_idx,
                        point_idx: to_point_idx,
                        visited: state.visited | (1 << candidate_track_idx),
                        times_used,
                        g,
                        depth: state.depth + 1,
                        path: Some(Rc::new(PathLink {
                            candidate,
                            parent: state.path.clone(),
                        })),
                    });
                }
            }
        }

        if next_frontier.is_empty() {
            break;
        }

        depth += 1;
        next_frontier.sort_by(|a, b| {
            let fa = a.g + heuristic((target - a.visited.count_ones()) as usize);
            let fb = b.g + heuristic((target - b.visited.count_ones()) as usize);
            fb.partial_cmp(&fa).unwrap_or(std::cmp::Ordering::Equal)
        });

        let width = beam_width_for_depth(depth, cfg).min(cfg.max_memory_nodes);
        next_frontier.truncate(width);
        if next_frontier.len() > cfg.max_memory_nodes {
            let keep = (next_frontier.len() as f64 * cfg.max_memory_truncate_fraction) as usize;
            next_frontier.truncate(keep);
        }

        frontier = next_frontier;

        if best_goal.is_some()
            && (distinct_routes.len() >= cfg.max_distinct_routes
                || iterations >= cfg.extra_iterations_after_goal)
        {
            break;
        }
    }

    match best_goal {
        Some(state) => Ok(materialize_route(state.path)),
        None => Err(PlanError::new("no feasible route visiting every track")),
    }
}

/// The planner's post-finalisation bookkeeping: mark a window around
/// every destination beat as used, and append structural pairs to a
/// bounded history. Mutated exactly once per finalised route, never
/// during A* expansion, per §4.7/§5.
#[derive(Debug, Clone, Default)]
pub struct RouteBookkeeping {
    pub used_ranges: Vec<(TrackId, f64, f64)>,
    pub structural_history: VecDeque<(SectionType, SectionType)>,
}

impl RouteBookkeeping {
    pub fn used_ranges_for(&self, track: TrackId) -> Vec<(f64, f64)> {
        self.used_ranges
            .iter()
            .filter(|(t, _, _)| *t == track)
            .map(|(_, s, e)| (*s, *e))
            .collect()
    }
}

/// Applies a finalised route to the bookkeeping: for every transition,
/// marks a `window_seconds`-wide range around the destination beat as
/// used and (when both endpoints' sections are known) appends the
/// structural pair to a history bounded at `history_len` entries.
pub fn apply_route(
    route: &PlannedRoute,
    tracks: &[PlanningTrack],
    window_seconds: f64,
    history_len: usize,
    bookkeeping: &mut RouteBookkeeping,
) {
    for candidate in &route.candidates {
        let half = window_seconds / 2.0;
        bookkeeping.used_ranges.push((
            candidate.to.track,
            (candidate.to.time - half).max(0.0),
            candidate.to.time + half,
        ));

        let from_track = tracks.iter().find(|t| t.id == candidate.from.track);
        let to_track = tracks.iter().find(|t| t.id == candidate.to.track);
        if let (Some(from_track), Some(to_track)) = (from_track, to_track) {
            if let (Some(from_section), Some(to_section)) = (
                from_track.section_at(candidate.from.time),
                to_track.section_at(candidate.to.time),
            ) {
                bookkeeping.structural_history.push_back((from_section, to_section));
                while bookkeeping.structural_history.len() > history_len {
                    bookkeeping.structural_history.pop_front();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatline_core::{Beat, Meter, Mode, PointQuality, PositionTag, TransitionKind};

    fn grid(bpm: f64) -> BeatGrid {
        BeatGrid {
            beats: (0..32)
                .map(|i| Beat {
                    start: i as f64 * (60.0 / bpm),
                    duration: 60.0 / bpm,
                    confidence: 1.0,
                    is_downbeat: i % 4 == 0,
                })
                .collect(),
            bpm,
            meter: Meter::FOUR_FOUR,
            downbeat_offset: 0,
            confidence: 0.9,
        }
    }

    fn key(pitch_class: u8, mode: Mode, camelot: &str) -> TrackKey {
        TrackKey {
            pitch_class,
            mode,
            camelot: camelot.to_string(),
            confidence: 0.9,
        }
    }

    fn flat_features(n: usize) -> PerBeatFeatures {
        PerBeatFeatures {
            energy: vec![0.5; n],
            spectral_centroid: vec![1000.0; n],
            has_vocal: vec![false; n],
        }
    }

    fn points_for(track: TrackId, grid: &BeatGrid) -> Vec<TransitionPoint> {
        grid.downbeats()
            .map(|(i, b)| TransitionPoint {
                track,
                beat_index: i,
                time: b.start,
                score: 200.0,
                quality: PointQuality::Good,
                preferred_kind: TransitionKind::Crossfade,
                position: PositionTag::classify(b.start, grid.beats.last().unwrap().start),
            })
            .collect()
    }

    #[test]
    fn plans_a_route_visiting_every_track_once() {
        let grid_a = grid(120.0);
        let grid_b = grid(120.0);
        let grid_c = grid(120.0);
        let key_a = key(0, Mode::Major, "8B");
        let key_b = key(0, Mode::Major, "8B");
        let key_c = key(0, Mode::Major, "8B");
        let features = flat_features(32);
        let timeline = Timeline::Absent("heuristic".into());

        let tracks = vec![
            PlanningTrack {
                id: TrackId(0),
                bpm: 120.0,
                key: &key_a,
                beat_grid: &grid_a,
                features: &features,
                timeline: &timeline,
                points: points_for(TrackId(0), &grid_a),
            },
            PlanningTrack {
                id: TrackId(1),
                bpm: 120.0,
                key: &key_b,
                beat_grid: &grid_b,
                features: &features,
                timeline: &timeline,
                points: points_for(TrackId(1), &grid_b),
            },
            PlanningTrack {
                id: TrackId(2),
                bpm: 120.0,
                key: &key_c,
                beat_grid: &grid_c,
                features: &features,
                timeline: &timeline,
                points: points_for(TrackId(2), &grid_c),
            },
        ];

        let weights = ScoringWeights::default();
        let cfg = beatline_core::PlannerConfig::default();
        let route = plan_route(&tracks, 0, &weights, &cfg).unwrap();

        assert_eq!(route.candidates.first().unwrap().from.track, TrackId(0));
        let visited = route.visited_tracks();
        assert_eq!(visited.len(), 3);
        for i in 0..route.candidates.len() - 1 {
            assert_eq!(route.candidates[i].to.track, route.candidates[i + 1].from.track);
        }
    }

    #[test]
    fn empty_track_list_is_an_error() {
        let weights = ScoringWeights::default();
        let cfg = beatline_core::PlannerConfig::default();
        let tracks: Vec<PlanningTrack> = Vec::new();
        assert!(plan_route(&tracks, 0, &weights, &cfg).is_err());
    }

    #[test]
    fn bookkeeping_marks_used_windows_only_at_finalisation() {
        let grid_a = grid(120.0);
        let grid_b = grid(120.0);
        let key_a = key(0, Mode::Major, "8B");
        let key_b = key(0, Mode::Major, "8B");
        let features = flat_features(32);
        let timeline = Timeline::Absent("heuristic".into());

        let tracks = vec![
            PlanningTrack {
                id: TrackId(0),
                bpm: 120.0,
                key: &key_a,
                beat_grid: &grid_a,
                features: &features,
                timeline: &timeline,
                points: points_for(TrackId(0), &grid_a),
            },
            PlanningTrack {
                id: TrackId(1),
                bpm: 120.0,
                key: &key_b,
                beat_grid: &grid_b,
                features: &features,
                timeline: &timeline,
                points: points_for(TrackId(1), &grid_b),
            },
        ];

        let weights = ScoringWeights::default();
        let cfg = beatline_core::PlannerConfig::default();
        let route = plan_route(&tracks, 0, &weights, &cfg).unwrap();

        let mut bookkeeping = RouteBookkeeping::default();
        assert!(bookkeeping.used_ranges.is_empty());
        apply_route(&route, &tracks, cfg.used_segment_window_seconds, cfg.structural_history_len, &mut bookkeeping);
        assert_eq!(bookkeeping.used_ranges.len(), route.candidates.len());
    }
}
