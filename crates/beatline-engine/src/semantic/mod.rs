//! C4 semantic timeline: an external-collaborator trait plus the strict,
//! deterministic post-processing pipeline described in §4.4.
//!
//! The collaborator trait follows the `async_trait` + typed-`Result`
//! shape used elsewhere for async boundaries, scoped to a single
//! request/response call with retries rather than a running service.

pub mod retry;

use async_trait::async_trait;
use beatline_core::{LoopCandidate, Section, SectionType, SemanticError, Timeline, TimelineDoc};
use serde::{Deserialize, Serialize};

/// Wire-format document the collaborator returns, before post-processing
/// (timestamps still strings, per the §6 JSON contract).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawTimelineDoc {
    #[serde(default)]
    pub timeline: Vec<RawSection>,
    #[serde(default)]
    pub loops: Vec<RawLoop>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSection {
    pub s: String,
    pub e: String,
    #[serde(rename = "type")]
    pub section_type: SectionType,
    pub has_vocals: bool,
    #[serde(default)]
    pub desc: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLoop {
    pub s: String,
    pub e: String,
    pub text: String,
}

/// A single external call: given a track, return its raw timeline
/// document or a [`SemanticError`]. Implementations own their own
/// transport, credential rotation and request batching.
#[async_trait]
pub trait SemanticTimelineProvider: Send + Sync {
    async fn fetch(&self, track_display_name: &str, duration_seconds: f64) -> Result<RawTimelineDoc, SemanticError>;
}

/// Parses `MM:SS.d` into seconds. Malformed input yields `None`, which
/// post-processing treats as a dropped entry.
fn parse_timestamp(text: &str) -> Option<f64> {
    let (minutes, rest) = text.split_once(':')?;
    let minutes: f64 = minutes.parse().ok()?;
    let seconds: f64 = rest.parse().ok()?;
    Some(minutes * 60.0 + seconds)
}

/// Runs the full §4.4 post-processing pipeline against a raw document,
/// producing either a `Timeline::Present` doc or, if the document is
/// empty/malformed, the three-section default described in step 8.
pub fn post_process(raw: &RawTimelineDoc, duration_seconds: f64, merge_gap_seconds: f64) -> Timeline {
    let mut sections = parse_and_clamp_sections(raw, duration_seconds);

    if sections.is_empty() {
        return Timeline::Present(default_timeline(duration_seconds));
    }

    sections.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
    extend_last_section(&mut sections, duration_seconds);
    let merged = merge_adjacent_same_type(sections, merge_gap_seconds);
    let merged = close_gaps(merged, duration_seconds);

    let loops = raw
        .loops
        .iter()
        .filter_map(|l| {
            let start = parse_timestamp(&l.s)?;
            let end = parse_timestamp(&l.e)?;
            if end <= start {
                return None;
            }
            Some(LoopCandidate {
                start: start.clamp(0.0, duration_seconds),
                end: end.clamp(0.0, duration_seconds),
                text: l.text.clone(),
            })
        })
        .take(10)
        .collect();

    Timeline::Present(TimelineDoc {
        sections: merged,
        loops,
    })
}

fn parse_and_clamp_sections(raw: &RawTimelineDoc, duration_seconds: f64) -> Vec<Section> {
    raw.timeline
        .iter()
        .filter_map(|s| {
            let start = parse_timestamp(&s.s)?.clamp(0.0, duration_seconds);
            let end = parse_timestamp(&s.e)?.clamp(0.0, duration_seconds);
            if end <= start {
                return None;
            }
            Some(Section {
                start,
                end,
                section_type: s.section_type,
                has_vocals: s.has_vocals,
                desc: s.desc.clone(),
            })
        })
        .collect()
}

fn extend_last_section(sections: &mut [Section], duration_seconds: f64) {
    if let Some(last) = sections.last_mut() {
        if duration_seconds - last.end < 2.0 {
            last.end = duration_seconds;
        }
    }
}

/// Fuses two consecutive same-type sections when the gap between them
/// is under `merge_gap_seconds`. Idempotent: a second pass over already
/// merged output changes nothing, per §8's idempotence invariant.
pub fn merge_adjacent_same_type(sections: Vec<Section>, merge_gap_seconds: f64) -> Vec<Section> {
    let mut merged: Vec<Section> = Vec::with_capacity(sections.len());
    for section in sections {
        if let Some(last) = merged.last_mut() {
            let gap = section.start - last.end;
            if last.section_type == section.section_type && gap < merge_gap_seconds {
                last.end = section.end;
                last.has_vocals = last.has_vocals || section.has_vocals;
                continue;
            }
        }
        merged.push(section);
    }
    merged
}

/// Closes any remaining gaps so the timeline is contiguous and covers
/// `[0, duration)`, per §3's invariant (`Sᵢ.end == Sᵢ₊₁.start`,
/// `S₀.start == 0`, `Sₙ.end == duration`). Neither the merge pass nor the
/// last-section extension guarantees this on their own when two
/// differently-typed sections leave a gap between them, so each boundary
/// is pulled forward to the later of the two edges it separates, closing
/// the gap without shrinking either section's already-used bound.
fn close_gaps(mut sections: Vec<Section>, duration_seconds: f64) -> Vec<Section> {
    if sections.is_empty() {
        return sections;
    }
    sections[0].start = 0.0;
    for i in 0..sections.len() - 1 {
        let boundary = sections[i].end.max(sections[i + 1].start);
        sections[i].end = boundary;
        sections[i + 1].start = boundary;
    }
    if let Some(last) = sections.last_mut() {
        last.end = duration_seconds;
    }
    sections
}

fn default_timeline(duration_seconds: f64) -> TimelineDoc {
    let intro_end = 15.0_f64.min(duration_seconds);
    let outro_start = (duration_seconds - 15.0).max(intro_end);

    let mut sections = vec![Section {
        start: 0.0,
        end: intro_end,
        section_type: SectionType::Intro,
        has_vocals: false,
        desc: None,
    }];

    if outro_start > intro_end {
        sections.push(Section {
            start: intro_end,
            end: outro_start,
            section_type: SectionType::Verse,
            has_vocals: true,
            desc: None,
        });
    }

    if outro_start < duration_seconds {
        sections.push(Section {
            start: outro_start,
            end: duration_seconds,
            section_type: SectionType::Outro,
            has_vocals: false,
            desc: None,
        });
    }

    TimelineDoc {
        sections,
        loops: Vec::new(),
    }
}

/// A block of consecutive vocal-bearing audio, tagged by whether it
/// falls on a chorus/hook (`Hook`) or any other vocal section (`Verse`),
/// per §4.4 step 5 ("bloque_coro" / "bloque_verso").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocalBlockKind {
    Hook,
    Verse,
}

#[derive(Debug, Clone, Copy)]
pub struct VocalBlock {
    pub start: f64,
    pub end: f64,
    pub kind: VocalBlockKind,
}

/// Derives vocal blocks from a post-processed timeline: every section
/// with `has_vocals == true` becomes a block, tagged `Hook` for
/// chorus/hook-typed sections and `Verse` for everything else, per §4.4
/// step 5.
pub fn vocal_blocks(doc: &TimelineDoc) -> Vec<VocalBlock> {
    doc.sections
        .iter()
        .filter(|s| s.has_vocals)
        .map(|s| VocalBlock {
            start: s.start,
            end: s.end,
            kind: if s.section_type == SectionType::Chorus {
                VocalBlockKind::Hook
            } else {
                VocalBlockKind::Verse
            },
        })
        .collect()
}

/// Derives instrumental gaps: every section with `has_vocals == false`,
/// per §4.4 step 6.
pub fn instrumental_gaps(doc: &TimelineDoc) -> Vec<(f64, f64)> {
    doc.sections
        .iter()
        .filter(|s| !s.has_vocals)
        .map(|s| (s.start, s.end))
        .collect()
}

/// Snaps a suggested transition time to the nearest downbeat within
/// `snap_window_seconds`; downbeats win over non-downbeats within the
/// window by `downbeat_priority_bonus_seconds`, per §4.4 step 7.
pub fn snap_to_nearest_downbeat(
    suggested_time: f64,
    beats: &[beatline_core::Beat],
    snap_window_seconds: f64,
    downbeat_priority_bonus_seconds: f64,
) -> Option<f64> {
    let mut best: Option<(f64, f64)> = None; // (effective_distance, beat.start)
    for beat in beats {
        let distance = (beat.start - suggested_time).abs();
        if distance > snap_window_seconds {
            continue;
        }
        let effective_distance = if beat.is_downbeat {
            (distance - downbeat_priority_bonus_seconds).max(0.0)
        } else {
            distance
        };
        match best {
            Some((best_distance, _)) if effective_distance >= best_distance => {}
            _ => best = Some((effective_distance, beat.start)),
        }
    }
    best.map(|(_, start)| start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatline_core::Beat;

    fn section(start: f64, end: f64, section_type: SectionType) -> Section {
        Section {
            start,
            end,
            section_type,
            has_vocals: false,
            desc: None,
        }
    }

    #[test]
    fn parse_timestamp_reads_mm_ss_tenths() {
        assert_eq!(parse_timestamp("01:02.5"), Some(62.5));
        assert!(parse_timestamp("garbage").is_none());
    }

    #[test]
    fn empty_document_falls_back_to_default_timeline() {
        let raw = RawTimelineDoc::default();
        let timeline = post_process(&raw, 200.0, 6.0);
        let doc = timeline.doc().unwrap();
        assert_eq!(doc.sections.first().unwrap().section_type, SectionType::Intro);
        assert_eq!(doc.sections.last().unwrap().section_type, SectionType::Outro);
        assert_eq!(doc.sections.last().unwrap().end, 200.0);
    }

    #[test]
    fn post_processed_sections_are_contiguous_and_cover_the_track() {
        let raw = RawTimelineDoc {
            timeline: vec![
                RawSection {
                    s: "00:02.0".into(),
                    e: "00:20.0".into(),
                    section_type: SectionType::Intro,
                    has_vocals: false,
                    desc: None,
                },
                RawSection {
                    s: "00:28.0".into(),
                    e: "01:10.0".into(),
                    section_type: SectionType::Chorus,
                    has_vocals: true,
                    desc: None,
                },
            ],
            loops: Vec::new(),
        };
        let timeline = post_process(&raw, 200.0, 6.0);
        let doc = timeline.doc().unwrap();
        assert_eq!(doc.sections.first().unwrap().start, 0.0);
        assert_eq!(doc.sections.last().unwrap().end, 200.0);
        for w in doc.sections.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
    }

    #[test]
    fn merge_is_idempotent() {
        let sections = vec![
            section(0.0, 20.0, SectionType::Verse),
            section(22.0, 40.0, SectionType::Verse),
        ];
        let once = merge_adjacent_same_type(sections, 6.0);
        let twice = merge_adjacent_same_type(once.clone(), 6.0);
        assert_eq!(once.len(), twice.len());
        assert_eq!(once[0].end, twice[0].end);
    }

    #[test]
    fn merge_fuses_gaps_under_threshold_only() {
        let sections = vec![
            section(0.0, 20.0, SectionType::Verse),
            section(24.0, 40.0, SectionType::Verse),
            section(70.0, 90.0, SectionType::Chorus),
        ];
        let merged = merge_adjacent_same_type(sections, 6.0);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].end, 40.0);
    }

    #[test]
    fn vocal_blocks_split_by_chorus_vs_other() {
        let mut chorus = section(40.0, 60.0, SectionType::Chorus);
        chorus.has_vocals = true;
        let mut verse = section(0.0, 40.0, SectionType::Verse);
        verse.has_vocals = true;
        let mut outro = section(60.0, 80.0, SectionType::Outro);
        outro.has_vocals = false;
        let doc = TimelineDoc {
            sections: vec![verse, chorus, outro],
            loops: Vec::new(),
        };
        let blocks = vocal_blocks(&doc);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].kind, VocalBlockKind::Verse);
        assert_eq!(blocks[1].kind, VocalBlockKind::Hook);

        let gaps = instrumental_gaps(&doc);
        assert_eq!(gaps, vec![(60.0, 80.0)]);
    }

    #[test]
    fn snap_prefers_downbeats_within_window() {
        let beats = vec![
            Beat { start: 9.95, duration: 0.5, confidence: 1.0, is_downbeat: false },
            Beat { start: 10.0, duration: 0.5, confidence: 1.0, is_downbeat: true },
        ];
        let snapped = snap_to_nearest_downbeat(10.0, &beats, 2.0, 0.1).unwrap();
        assert_eq!(snapped, 10.0);
    }
}
