//! Shared data model for tracks, beat grids, keys, sections and routes.
//!
//! Tracks live in an arena indexed by [`TrackId`]; everything else
//! (sections, transition points, candidates) references a track by id
//! rather than by pointer, per the object-graph design used throughout
//! this crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable arena index for a track. Never reused within a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackId(pub usize);

impl From<usize> for TrackId {
    fn from(value: usize) -> Self {
        TrackId(value)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track#{}", self.0)
    }
}

/// A decoded, resampled audio track plus whatever analysis has been attached.
///
/// Created once on ingest and immutable thereafter, except that the
/// semantic timeline is attached exactly once after the C4 call resolves
/// (or falls back to a default).
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub display_name: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved 44.1 kHz stereo Float32 PCM, owned until the renderer
    /// is done with it.
    pub pcm: Vec<f32>,
    pub analysis: Option<TrackAnalysis>,
    pub timeline: Option<Timeline>,
}

impl Track {
    pub fn new(
        id: TrackId,
        display_name: impl Into<String>,
        duration_seconds: f64,
        sample_rate: u32,
        channels: u16,
        pcm: Vec<f32>,
    ) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            duration_seconds,
            sample_rate,
            channels,
            pcm,
            analysis: None,
            timeline: None,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.pcm.len() / self.channels.max(1) as usize
    }
}

/// Everything C2/C3 produce for one track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackAnalysis {
    pub beat_grid: BeatGrid,
    pub key: TrackKey,
    pub features: PerBeatFeatures,
    pub onsets: Vec<f64>,
    pub integrated_loudness_lufs: f64,
    pub replay_gain_db: f64,
}

/// A single tick of the beat grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Beat {
    pub start: f64,
    pub duration: f64,
    pub confidence: f32,
    pub is_downbeat: bool,
}

/// Inferred meter: numerator over a fixed denominator class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub numerator: u8,
    pub denominator: u8,
}

impl Meter {
    pub const FOUR_FOUR: Meter = Meter {
        numerator: 4,
        denominator: 4,
    };

    /// Denominator class used when voting over candidate numerators
    /// `{2..=12}`: 2/3/4/5/7 vote in 4, 6/9/12 vote in 8.
    pub fn denominator_for_numerator(numerator: u8) -> u8 {
        match numerator {
            6 | 9 | 12 => 8,
            _ => 4,
        }
    }
}

/// Ordered beat grid for one track, plus the inferred tempo and meter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatGrid {
    pub beats: Vec<Beat>,
    pub bpm: f64,
    pub meter: Meter,
    /// The modulo class (0-based) of beats that are downbeats, i.e.
    /// `beat_index % meter.numerator == downbeat_offset`.
    pub downbeat_offset: u8,
    pub confidence: f32,
}

impl BeatGrid {
    pub fn downbeats(&self) -> impl Iterator<Item = (usize, &Beat)> {
        self.beats
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_downbeat)
    }

    /// Phrase (8-downbeat) boundaries, as beat indices.
    pub fn phrase_starts(&self) -> Vec<usize> {
        self.downbeats()
            .map(|(i, _)| i)
            .step_by(8)
            .collect()
    }

    pub fn nearest_beat_index(&self, time: f64) -> Option<usize> {
        if self.beats.is_empty() {
            return None;
        }
        let mut best = 0usize;
        let mut best_dist = f64::MAX;
        for (i, b) in self.beats.iter().enumerate() {
            let d = (b.start - time).abs();
            if d < best_dist {
                best_dist = d;
                best = i;
            }
        }
        Some(best)
    }

    /// Nearest beat index at or after `time` ("snap forward").
    pub fn beat_at_or_after(&self, time: f64) -> Option<usize> {
        self.beats.iter().position(|b| b.start >= time)
    }
}

/// Per-beat arrays parallel to the beat grid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerBeatFeatures {
    pub energy: Vec<f32>,
    pub spectral_centroid: Vec<f32>,
    pub has_vocal: Vec<bool>,
}

/// Major/minor mode, matching the Camelot wheel's A (minor) / B (major) rings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Minor,
    Major,
}

/// Pitch class (0=C .. 11=B) plus mode, with the Camelot code cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackKey {
    pub pitch_class: u8,
    pub mode: Mode,
    pub camelot: String,
    pub confidence: f64,
}

/// Section tags usable in a semantic timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionType {
    Intro,
    Verse,
    #[serde(rename = "pre-chorus")]
    PreChorus,
    Chorus,
    Bridge,
    Outro,
    Instrumental,
    Breakdown,
}

/// A half-open, labelled interval of a track's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub start: f64,
    pub end: f64,
    pub section_type: SectionType,
    pub has_vocals: bool,
    pub desc: Option<String>,
}

/// A short musically-interesting loop candidate from the semantic model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopCandidate {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Fully post-processed semantic timeline for one track.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimelineDoc {
    pub sections: Vec<Section>,
    pub loops: Vec<LoopCandidate>,
}

/// "No timeline" and "timeline with zero sections" are never conflated:
/// `Absent` carries the reason heuristic mode was entered.
#[derive(Debug, Clone)]
pub enum Timeline {
    Present(TimelineDoc),
    Absent(String),
}

impl Timeline {
    pub fn doc(&self) -> Option<&TimelineDoc> {
        match self {
            Timeline::Present(doc) => Some(doc),
            Timeline::Absent(_) => None,
        }
    }
}

/// Quality tag for a [`TransitionPoint`], also used for the "semantic hint"
/// bonus in the pair scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointQuality {
    Excellent,
    Good,
    Fair,
}

/// Preferred transition shape at a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    Crossfade,
    Cut,
    Beatmatch,
}

impl TransitionKind {
    /// Default crossfade-window duration in seconds for this kind.
    pub fn default_duration_seconds(self) -> f64 {
        match self {
            TransitionKind::Cut => 2.0,
            TransitionKind::Crossfade => 8.0,
            TransitionKind::Beatmatch => 12.0,
        }
    }
}

/// Coarse position of a point within its track, by fraction of duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionTag {
    Early,
    Middle,
    Late,
}

impl PositionTag {
    pub fn classify(time: f64, duration: f64) -> Self {
        if duration <= 0.0 {
            return PositionTag::Early;
        }
        let frac = time / duration;
        if frac < 0.33 {
            PositionTag::Early
        } else if frac < 0.67 {
            PositionTag::Middle
        } else {
            PositionTag::Late
        }
    }
}

/// A candidate splice position on a track.
#[derive(Debug, Clone)]
pub struct TransitionPoint {
    pub track: TrackId,
    pub beat_index: usize,
    pub time: f64,
    pub score: f64,
    pub quality: PointQuality,
    pub preferred_kind: TransitionKind,
    pub position: PositionTag,
}

/// The seven-component breakdown of a [`TransitionCandidate`]'s score.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub point_quality: f64,
    pub structure: f64,
    pub harmony: f64,
    pub energy: f64,
    pub mood: f64,
    pub variety: f64,
    pub semantic_hint: f64,
}

impl ScoreBreakdown {
    pub fn sum(&self) -> f64 {
        self.point_quality
            + self.structure
            + self.harmony
            + self.energy
            + self.mood
            + self.variety
            + self.semantic_hint
    }
}

/// An ordered, scored transition between two points on different tracks.
#[derive(Debug, Clone)]
pub struct TransitionCandidate {
    pub from: TransitionPointRef,
    pub to: TransitionPointRef,
    pub breakdown: ScoreBreakdown,
    pub total_score: f64,
    pub playback_rate: f64,
    pub kind: TransitionKind,
    pub crossfade_duration: f64,
}

/// A lightweight reference to a point: enough to identify it without
/// borrowing the owning track's point list.
#[derive(Debug, Clone, Copy)]
pub struct TransitionPointRef {
    pub track: TrackId,
    pub point_index: usize,
    pub beat_index: usize,
    pub time: f64,
}

/// The planner's output: an ordered sequence of candidates.
#[derive(Debug, Clone, Default)]
pub struct PlannedRoute {
    pub candidates: Vec<TransitionCandidate>,
}

impl PlannedRoute {
    /// Tracks visited by this route, in order of first appearance.
    pub fn visited_tracks(&self) -> Vec<TrackId> {
        let mut seen = Vec::new();
        for c in &self.candidates {
            if !seen.contains(&c.from.track) {
                seen.push(c.from.track);
            }
            if !seen.contains(&c.to.track) {
                seen.push(c.to.track);
            }
        }
        seen
    }
}

/// One row of the pre-render schedule: a beat that will sound in the mix.
#[derive(Debug, Clone, Copy)]
pub struct TimeMapRow {
    pub mix_time: f64,
    pub track: TrackId,
    pub beat_index: usize,
    pub is_transition: bool,
}

/// The full per-beat schedule produced before rendering.
#[derive(Debug, Clone, Default)]
pub struct TimeMap {
    pub rows: Vec<TimeMapRow>,
}

impl TimeMap {
    pub fn total_duration(&self) -> f64 {
        self.rows.last().map(|r| r.mix_time).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beat(start: f64, is_downbeat: bool) -> Beat {
        Beat {
            start,
            duration: 0.5,
            confidence: 1.0,
            is_downbeat,
        }
    }

    #[test]
    fn downbeats_are_a_subsequence() {
        let grid = BeatGrid {
            beats: (0..16)
                .map(|i| beat(i as f64 * 0.5, i % 4 == 0))
                .collect(),
            bpm: 120.0,
            meter: Meter::FOUR_FOUR,
            downbeat_offset: 0,
            confidence: 0.9,
        };
        let downbeat_indices: Vec<usize> = grid.downbeats().map(|(i, _)| i).collect();
        assert_eq!(downbeat_indices, vec![0, 4, 8, 12]);
        for i in &downbeat_indices {
            assert_eq!(i % 4, 0);
        }
    }

    #[test]
    fn phrase_starts_every_eight_downbeats() {
        let grid = BeatGrid {
            beats: (0..64)
                .map(|i| beat(i as f64 * 0.5, i % 4 == 0))
                .collect(),
            bpm: 120.0,
            meter: Meter::FOUR_FOUR,
            downbeat_offset: 0,
            confidence: 0.9,
        };
        let phrases = grid.phrase_starts();
        assert_eq!(phrases, vec![0, 32]);
    }

    #[test]
    fn position_tag_thresholds() {
        assert_eq!(PositionTag::classify(0.0, 300.0), PositionTag::Early);
        assert_eq!(PositionTag::classify(100.0, 300.0), PositionTag::Middle);
        assert_eq!(PositionTag::classify(250.0, 300.0), PositionTag::Late);
    }

    #[test]
    fn crossfade_kind_defaults() {
        assert_eq!(TransitionKind::Cut.default_duration_seconds(), 2.0);
        assert_eq!(TransitionKind::Crossfade.default_duration_seconds(), 8.0);
        assert_eq!(TransitionKind::Beatmatch.default_duration_seconds(), 12.0);
    }
}
