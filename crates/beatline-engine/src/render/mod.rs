//! C8 Mix Renderer: TimeMap construction, offline audio-graph scheduling
//! and sample-accurate rendering.
//!
//! Each scheduled source owns its own gain/EQ state across a rendered
//! segment, generalised from two concurrently-playing sources to N. The
//! render step itself is a pure function of a schedule, `(Schedule) ->
//! Pcm`, deterministic and independent of wall-clock time.

pub mod filters;
pub mod wav;

use beatline_core::{
    BeatGrid, PlannedRoute, RenderConfig, RenderError, SectionType, Timeline, Track, TrackId,
    TransitionCandidate, TransitionKind, TimeMap, TimeMapRow,
};

use filters::SourceChain;

/// Everything the renderer needs about one track: decoded PCM plus the
/// analysis the planner already used to pick transition points.
pub struct RenderSource<'a> {
    pub track: &'a Track,
    pub beat_grid: &'a BeatGrid,
    pub timeline: &'a Timeline,
}

fn find_source<'a, 'b>(sources: &'b [RenderSource<'a>], id: TrackId) -> Option<&'b RenderSource<'a>> {
    sources.iter().find(|s| s.track.id == id)
}

/// One contiguous stretch of the mix during which a single track is
/// audible, bounded by the transitions that lead into and out of it.
struct Segment {
    track: TrackId,
    beat_rows: Vec<(f64, usize)>,
    incoming: Option<TransitionCandidate>,
    outgoing: Option<TransitionCandidate>,
    playback_rate: f64,
}

fn determine_start_beat(dest: &RenderSource, entry_time: f64, entry_beat_index: usize) -> usize {
    match dest.timeline.doc() {
        Some(doc) if entry_time >= 20.0 => doc
            .sections
            .iter()
            .find(|s| entry_time >= s.start && entry_time < s.end)
            .and_then(|s| dest.beat_grid.beat_at_or_after(s.start))
            .unwrap_or(entry_beat_index),
        Some(_) => 0,
        None => entry_beat_index,
    }
}

/// Chooses the exit beat for a track with no following transition in
/// the route (only ever the last segment), per §4.8 step 2: prefer
/// "after the second chorus ≥ minDuration", else "after the first
/// chorus", else "start of the outro if ≥ minDuration", else
/// `idealDuration`, clamped to `maxDuration`.
fn exit_beat_via_preference(dest: &RenderSource, start_beat: usize, cfg: &RenderConfig) -> usize {
    let last_index = dest.beat_grid.beats.len().saturating_sub(1);
    let start_time = dest.beat_grid.beats[start_beat].start;

    let doc = match dest.timeline.doc() {
        Some(doc) => doc,
        None => {
            let no_timeline_end = start_beat + cfg.no_timeline_default_beats;
            let floor = start_beat + cfg.no_timeline_min_beats;
            return no_timeline_end.max(floor).min(last_index);
        }
    };

    let choruses: Vec<_> = doc
        .sections
        .iter()
        .filter(|s| s.section_type == SectionType::Chorus && s.start >= start_time)
        .collect();

    if let Some(second) = choruses.get(1) {
        if second.end - start_time >= cfg.min_duration_seconds {
            return dest.beat_grid.beat_at_or_after(second.end).unwrap_or(last_index);
        }
    }
    if let Some(first) = choruses.first() {
        return dest.beat_grid.beat_at_or_after(first.end).unwrap_or(last_index);
    }
    if let Some(outro) = doc
        .sections
        .iter()
        .find(|s| s.section_type == SectionType::Outro && s.start >= start_time)
    {
        if outro.start - start_time >= cfg.min_duration_seconds {
            return dest.beat_grid.beat_at_or_after(outro.start).unwrap_or(last_index);
        }
    }

    let ideal_time = (start_time + cfg.ideal_duration_seconds).min(start_time + cfg.max_duration_seconds);
    dest.beat_grid.beat_at_or_after(ideal_time).unwrap_or(last_index)
}

/// Walks the planned route once, producing one [`Segment`] per audible
/// track stretch (seed, then each transition's destination), with mix
/// time accumulated per beat as `beat.duration / playback_rate`.
fn walk_segments(route: &PlannedRoute, sources: &[RenderSource], cfg: &RenderConfig) -> Result<Vec<Segment>, RenderError> {
    let first = route
        .candidates
        .first()
        .ok_or_else(|| RenderError::new("route has no transitions to render"))?;

    let mut segments = Vec::with_capacity(route.candidates.len() + 1);
    let mut mix_time = 0.0;

    let seed = find_source(sources, first.from.track)
        .ok_or_else(|| RenderError::new("seed track missing from render sources"))?;
    let seed_end = first
        .from
        .beat_index
        .clamp(cfg.seed_min_beats, cfg.seed_max_beats)
        .min(seed.beat_grid.beats.len().saturating_sub(1));

    let mut rows = Vec::with_capacity(seed_end + 1);
    for b in 0..=seed_end {
        rows.push((mix_time, b));
        mix_time += seed.beat_grid.beats[b].duration;
    }
    segments.push(Segment {
        track: first.from.track,
        beat_rows: rows,
        incoming: None,
        outgoing: Some(first.clone()),
        playback_rate: 1.0,
    });

    for (i, candidate) in route.candidates.iter().enumerate() {
        let dest = find_source(sources, candidate.to.track)
            .ok_or_else(|| RenderError::new("destination track missing from render sources"))?;

        let start_beat = determine_start_beat(dest, candidate.to.time, candidate.to.beat_index).min(
            dest.beat_grid.beats.len().saturating_sub(1),
        );
        let end_beat = match route.candidates.get(i + 1) {
            Some(next) => next.from.beat_index.max(start_beat),
            None => exit_beat_via_preference(dest, start_beat, cfg),
        }
        .min(dest.beat_grid.beats.len().saturating_sub(1));

        let mut rows = Vec::with_capacity(end_beat.saturating_sub(start_beat) + 1);
        for b in start_beat..=end_beat {
            rows.push((mix_time, b));
            mix_time += dest.beat_grid.beats[b].duration / candidate.playback_rate;
        }

        segments.push(Segment {
            track: candidate.to.track,
            beat_rows: rows,
            incoming: Some(candidate.clone()),
            outgoing: route.candidates.get(i + 1).cloned(),
            playback_rate: candidate.playback_rate,
        });
    }

    Ok(segments)
}

/// Builds the pre-render TimeMap: every beat that will sound in the
/// final mix, with `mixTime` non-decreasing and starting at 0, per §4.8.
pub fn build_time_map(route: &PlannedRoute, sources: &[RenderSource], cfg: &RenderConfig) -> Result<TimeMap, RenderError> {
    let segments = walk_segments(route, sources, cfg)?;
    let mut rows = Vec::new();

    for segment in &segments {
        let last_index = segment.beat_rows.len().saturating_sub(1);
        for (i, (mix_time, beat_index)) in segment.beat_rows.iter().enumerate() {
            rows.push(TimeMapRow {
                mix_time: *mix_time,
                track: segment.track,
                beat_index: *beat_index,
                is_transition: i == 0 || i == last_index,
            });
        }
    }

    Ok(TimeMap { rows })
}

/// A scheduled source in the offline audio graph: when it starts (both
/// in mix time and within its own audio), how long it plays, at what
/// rate, and the gain/low-shelf automation curves that realise its
/// fade-in/fade-out, per §4.8.
#[derive(Debug, Clone)]
pub struct SourceSchedule {
    pub track: TrackId,
    pub start_in_mix: f64,
    pub start_in_audio: f64,
    pub duration: f64,
    pub playback_rate: f64,
    /// `(mix_time, linear_gain)` control points, exponential between
    /// points.
    pub gain_points: Vec<(f64, f64)>,
    /// `(mix_time, low_shelf_gain_db)` control points, linear between
    /// points.
    pub low_shelf_points: Vec<(f64, f64)>,
}

fn exponential_points(from: f64, to: f64, start: f64, duration: f64, n: usize) -> Vec<(f64, f64)> {
    let from = from.max(1e-6);
    (0..n)
        .map(|i| {
            let frac = i as f64 / (n - 1) as f64;
            (start + duration * frac, from * (to / from).powf(frac))
        })
        .collect()
}

fn linear_points(from: f64, to: f64, start: f64, duration: f64, n: usize) -> Vec<(f64, f64)> {
    (0..n)
        .map(|i| {
            let frac = i as f64 / (n - 1) as f64;
            (start + duration * frac, from + (to - from) * frac)
        })
        .collect()
}

const FADE_CURVE_POINTS: usize = 4;

fn crossfade_shape(candidate: &TransitionCandidate, cfg: &RenderConfig) -> (f64, f64) {
    match candidate.kind {
        TransitionKind::Cut => (cfg.cut_fade_seconds, 0.0),
        TransitionKind::Crossfade => (candidate.crossfade_duration, cfg.crossfade_low_shelf_start_db),
        TransitionKind::Beatmatch => (candidate.crossfade_duration, cfg.beatmatch_low_shelf_start_db),
    }
}

/// Builds the full schedule for every source in the route, per §4.8:
/// `startInMix = transitionTime - crossfade - overlap`, exponential
/// fade-in/out curves, the first source's click-guard fade-in and the
/// last source's closing fade-out.
pub fn build_schedule(route: &PlannedRoute, sources: &[RenderSource], cfg: &RenderConfig) -> Result<Vec<SourceSchedule>, RenderError> {
    let segments = walk_segments(route, sources, cfg)?;
    let mix_end = segments
        .last()
        .and_then(|s| s.beat_rows.last())
        .map(|(t, _)| *t)
        .unwrap_or(0.0)
        + cfg.min_duration_seconds;

    let mut schedules = Vec::with_capacity(segments.len());

    for (i, segment) in segments.iter().enumerate() {
        let nominal_start = segment.beat_rows.first().map(|(t, _)| *t).unwrap_or(0.0);

        let (start_in_mix, start_in_audio, mut gain_points, mut low_shelf_points) = match &segment.incoming {
            None => {
                let duration = cfg.first_source_fade_in_seconds;
                (
                    0.0,
                    0.0,
                    exponential_points(0.001, 1.0, 0.0, duration, FADE_CURVE_POINTS),
                    Vec::new(),
                )
            }
            Some(candidate) => {
                let (duration, shelf_start_db) = crossfade_shape(candidate, cfg);
                let start_in_mix = nominal_start - duration - cfg.transition_overlap_seconds;
                let start_in_audio = candidate.to.time - duration - cfg.transition_overlap_seconds;
                if start_in_audio < -1e-6 {
                    return Err(RenderError::new("transition schedule would require a negative start time"));
                }
                let start_in_audio = start_in_audio.max(0.0);
                let gain = exponential_points(0.001, 1.0, start_in_mix, duration, FADE_CURVE_POINTS);
                let shelf = if shelf_start_db != 0.0 {
                    linear_points(shelf_start_db, 0.0, start_in_mix, duration, FADE_CURVE_POINTS)
                } else {
                    Vec::new()
                };
                (start_in_mix.max(0.0), start_in_audio, gain, shelf)
            }
        };

        let (end_in_mix, outgoing_gain, outgoing_shelf) = match &segment.outgoing {
            Some(candidate) if i + 1 < segments.len() => {
                let exit_time = segments[i + 1].beat_rows.first().map(|(t, _)| *t).unwrap_or(mix_end);
                let (duration, shelf_start_db) = crossfade_shape(candidate, cfg);
                let gain = exponential_points(1.0, 0.001, exit_time, duration, FADE_CURVE_POINTS);
                let shelf = if shelf_start_db != 0.0 {
                    linear_points(0.0, shelf_start_db, exit_time, duration, FADE_CURVE_POINTS)
                } else {
                    Vec::new()
                };
                (exit_time + duration, gain, shelf)
            }
            _ => {
                let duration = cfg.last_source_fade_out_seconds;
                let start = (mix_end - duration).max(start_in_mix);
                (mix_end, exponential_points(1.0, 0.001, start, duration, FADE_CURVE_POINTS), Vec::new())
            }
        };

        gain_points.extend(outgoing_gain);
        low_shelf_points.extend(outgoing_shelf);

        schedules.push(SourceSchedule {
            track: segment.track,
            start_in_mix,
            start_in_audio,
            duration: (end_in_mix - start_in_mix).max(0.0),
            playback_rate: segment.playback_rate,
            gain_points,
            low_shelf_points,
        });
    }

    Ok(schedules)
}

fn interpolate(points: &[(f64, f64)], t: f64, default: f64) -> f64 {
    if points.is_empty() {
        return default;
    }
    if t <= points[0].0 {
        return points[0].1;
    }
    if t >= points[points.len() - 1].0 {
        return points[points.len() - 1].1;
    }
    for w in points.windows(2) {
        let (t0, v0) = w[0];
        let (t1, v1) = w[1];
        if t >= t0 && t <= t1 {
            let span = (t1 - t0).max(1e-9);
            let frac = (t - t0) / span;
            return v0 + (v1 - v0) * frac;
        }
    }
    points[points.len() - 1].1
}

fn sample_at(track: &Track, time_seconds: f64, channel: usize) -> f32 {
    if time_seconds < 0.0 {
        return 0.0;
    }
    let channels = track.channels.max(1) as usize;
    let idx = time_seconds * track.sample_rate as f64;
    let i0 = idx.floor() as usize;
    let frac = idx - i0 as f64;
    let frames = track.frame_count();
    if i0 >= frames {
        return 0.0;
    }
    let s0 = track.pcm[i0 * channels + channel];
    let s1 = if i0 + 1 < frames {
        track.pcm[(i0 + 1) * channels + channel]
    } else {
        s0
    };
    (s0 as f64 + (s1 as f64 - s0 as f64) * frac) as f32
}

/// Renders `schedules` to one interleaved PCM buffer spanning
/// `[0, total_duration)`. A pure function of its inputs: scheduling
/// order and timestamps are the single source of truth, never
/// wall-clock time, per §5/§9.
pub fn render_mix(
    schedules: &[SourceSchedule],
    sources: &[RenderSource],
    total_duration: f64,
    cfg: &RenderConfig,
) -> Result<Vec<f32>, RenderError> {
    render_window(schedules, sources, 0.0, total_duration, cfg)
}

/// Renders only the frames falling in `[window_start, window_end)`,
/// used by the streaming block renderer. A whole-mix render must equal
/// the concatenation of block renders (modulo rounding at boundaries
/// inside sustained silence), per §9.
pub fn render_window(
    schedules: &[SourceSchedule],
    sources: &[RenderSource],
    window_start: f64,
    window_end: f64,
    cfg: &RenderConfig,
) -> Result<Vec<f32>, RenderError> {
    if window_end < window_start {
        return Err(RenderError::new("render window end precedes its start"));
    }
    let channels = cfg.channels as usize;
    let window_frames = ((window_end - window_start) * cfg.sample_rate as f64).round() as usize;
    let mut out = vec![0f32; window_frames * channels];

    for schedule in schedules {
        let track = find_source(sources, schedule.track)
            .ok_or_else(|| RenderError::new("scheduled track missing from render sources"))?
            .track;

        let seg_start = schedule.start_in_mix.max(window_start);
        let seg_end = (schedule.start_in_mix + schedule.duration).min(window_end);
        if seg_end <= seg_start {
            continue;
        }

        let mut chain = SourceChain::new();
        let start_frame = ((seg_start - window_start) * cfg.sample_rate as f64).round() as usize;
        let end_frame = ((seg_end - window_start) * cfg.sample_rate as f64).round() as usize;

        for frame in start_frame..end_frame.min(window_frames) {
            let mix_time = window_start + frame as f64 / cfg.sample_rate as f64;
            let audio_time = schedule.start_in_audio + (mix_time - schedule.start_in_mix) * schedule.playback_rate;
            let gain = interpolate(&schedule.gain_points, mix_time, 1.0) as f32;
            let shelf_db = interpolate(&schedule.low_shelf_points, mix_time, 0.0);
            chain.set_low_shelf_db(cfg.sample_rate as f64, cfg.low_shelf_hz, shelf_db);

            for ch in 0..channels {
                let raw = sample_at(track, audio_time, ch);
                let filtered = chain.process(raw);
                out[frame * channels + ch] += filtered * gain;
            }
        }
    }

    for sample in out.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }

    Ok(out)
}

/// One 5-minute (default) render block, per §4.8's streaming mode.
#[derive(Debug, Clone, Copy)]
pub struct BlockPlan {
    pub index: usize,
    pub start: f64,
    pub end: f64,
}

/// Splits `[0, total_duration)` into `block_seconds`-wide blocks.
pub fn plan_blocks(total_duration: f64, block_seconds: f64) -> Vec<BlockPlan> {
    if total_duration <= 0.0 || block_seconds <= 0.0 {
        return Vec::new();
    }
    let mut blocks = Vec::new();
    let mut start = 0.0;
    let mut index = 0;
    while start < total_duration {
        let end = (start + block_seconds).min(total_duration);
        blocks.push(BlockPlan { index, start, end });
        start = end;
        index += 1;
    }
    blocks
}

/// Keeps one block loaded behind and one ahead of `current`, evicting
/// everything else, per §4.8's "keep 5 min loaded behind and 5 min
/// ahead" sliding window. Eviction and preloading are driven by a
/// single-threaded queue at the caller; this type only tracks which
/// block indices should be resident.
#[derive(Debug, Default)]
pub struct StreamingWindow {
    loaded: Vec<usize>,
}

impl StreamingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(to_load, to_evict)` for moving the window so that
    /// `current` plus one block behind and one ahead are resident.
    pub fn advance(&mut self, current: usize, block_count: usize) -> (Vec<usize>, Vec<usize>) {
        let mut wanted: Vec<usize> = Vec::new();
        if current > 0 {
            wanted.push(current - 1);
        }
        wanted.push(current);
        if current + 1 < block_count {
            wanted.push(current + 1);
        }

        let to_load: Vec<usize> = wanted.iter().copied().filter(|b| !self.loaded.contains(b)).collect();
        let to_evict: Vec<usize> = self.loaded.iter().copied().filter(|b| !wanted.contains(b)).collect();

        self.loaded = wanted;
        (to_load, to_evict)
    }

    pub fn resident(&self) -> &[usize] {
        &self.loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatline_core::{Beat, Meter, TransitionPointRef};

    fn grid(n: usize, bpm: f64) -> BeatGrid {
        BeatGrid {
            beats: (0..n)
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

    fn silent_track(id: usize, seconds: f64) -> Track {
        let frames = (seconds * 44_100.0) as usize;
        Track::new(TrackId(id), format!("t{id}"), seconds, 44_100, 2, vec![0.0; frames * 2])
    }

    fn candidate(from_track: TrackId, from_beat: usize, from_time: f64, to_track: TrackId, to_beat: usize, to_time: f64) -> TransitionCandidate {
        TransitionCandidate {
            from: TransitionPointRef { track: from_track, point_index: 0, beat_index: from_beat, time: from_time },
            to: TransitionPointRef { track: to_track, point_index: 0, beat_index: to_beat, time: to_time },
            breakdown: Default::default(),
            total_score: 900.0,
            playback_rate: 1.0,
            kind: TransitionKind::Crossfade,
            crossfade_duration: 8.0,
        }
    }

    #[test]
    fn time_map_is_monotonic_and_starts_at_zero() {
        let track_a = silent_track(0, 200.0);
        let track_b = silent_track(1, 200.0);
        let grid_a = grid(400, 120.0);
        let grid_b = grid(400, 120.0);
        let timeline = Timeline::Absent("heuristic".into());

        let sources = vec![
            RenderSource { track: &track_a, beat_grid: &grid_a, timeline: &timeline },
            RenderSource { track: &track_b, beat_grid: &grid_b, timeline: &timeline },
        ];

        let route = PlannedRoute {
            candidates: vec![candidate(TrackId(0), 300, 150.0, TrackId(1), 0, 0.0)],
        };

        let cfg = RenderConfig::default();
        let time_map = build_time_map(&route, &sources, &cfg).unwrap();

        assert_eq!(time_map.rows.first().unwrap().mix_time, 0.0);
        for w in time_map.rows.windows(2) {
            assert!(w[1].mix_time >= w[0].mix_time);
        }
    }

    #[test]
    fn schedule_rejects_impossible_negative_start() {
        let track_a = silent_track(0, 10.0);
        let track_b = silent_track(1, 10.0);
        let grid_a = grid(20, 120.0);
        let grid_b = grid(20, 120.0);
        let timeline = Timeline::Absent("heuristic".into());

        let sources = vec![
            RenderSource { track: &track_a, beat_grid: &grid_a, timeline: &timeline },
            RenderSource { track: &track_b, beat_grid: &grid_b, timeline: &timeline },
        ];

        // Destination entry time of 1 s leaves no room for an 8 s crossfade pre-roll.
        let route = PlannedRoute {
            candidates: vec![candidate(TrackId(0), 10, 5.0, TrackId(1), 2, 1.0)],
        };
        let cfg = RenderConfig::default();
        let result = build_schedule(&route, &sources, &cfg);
        assert!(result.is_err());
    }

    #[test]
    fn render_silence_is_silent_and_correct_length() {
        let track_a = silent_track(0, 20.0);
        let grid_a = grid(40, 120.0);
        let timeline = Timeline::Absent("heuristic".into());
        let sources = vec![RenderSource { track: &track_a, beat_grid: &grid_a, timeline: &timeline }];

        let schedule = SourceSchedule {
            track: TrackId(0),
            start_in_mix: 0.0,
            start_in_audio: 0.0,
            duration: 10.0,
            playback_rate: 1.0,
            gain_points: vec![(0.0, 1.0), (10.0, 1.0)],
            low_shelf_points: Vec::new(),
        };
        let cfg = RenderConfig::default();
        let pcm = render_mix(&[schedule], &sources, 10.0, &cfg).unwrap();
        assert_eq!(pcm.len(), (10.0 * cfg.sample_rate as f64) as usize * cfg.channels as usize);
        assert!(pcm.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn block_plan_covers_whole_duration_without_gaps() {
        let blocks = plan_blocks(700.0, 300.0);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].start, 0.0);
        for w in blocks.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
        assert_eq!(blocks.last().unwrap().end, 700.0);
    }

    #[test]
    fn streaming_window_evicts_blocks_outside_range() {
        let mut window = StreamingWindow::new();
        let (loaded, _) = window.advance(0, 10);
        assert_eq!(loaded, vec![0, 1]);
        let (loaded, evicted) = window.advance(5, 10);
        assert_eq!(loaded, vec![4, 5, 6]);
        assert!(evicted.contains(&0));
        assert!(!window.resident().contains(&0));
    }
}
