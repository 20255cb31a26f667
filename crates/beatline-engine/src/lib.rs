//! Analysis, transition scoring, route planning and offline rendering
//! for the beatline automatic DJ mixing engine.
//!
//! Each module implements one stage of the pipeline described in §4:
//!
//! - [`decode`] — C1, decode + resample to 44.1 kHz stereo Float32.
//! - [`analysis`] — C2 + C3, beat grid/key detection and per-beat
//!   features.
//! - [`semantic`] — C4, the external semantic-timeline collaborator and
//!   its deterministic post-processing pipeline.
//! - [`transitions`] — C5, transition-point finding per track.
//! - [`scoring`] — C6, the pair scorer.
//! - [`planner`] — C7, beam-pruned A* route planning.
//! - [`render`] — C8, TimeMap construction and offline mix rendering.

pub mod analysis;
pub mod decode;
pub mod planner;
pub mod render;
pub mod scoring;
pub mod semantic;
pub mod transitions;

pub use analysis::{analyze_batch, analyze_track, camelot_semitone_distance, same_mode};
pub use decode::{decode_bytes, decode_file, normalize_loudness, DecodedAudio};
pub use planner::{apply_route, plan_route, PlanningTrack, RouteBookkeeping};
pub use render::{build_schedule, build_time_map, plan_blocks, render_mix, render_window, RenderSource, SourceSchedule};
pub use scoring::{score_pair, EndpointContext, MoodMatch, PairScore, VarietyContext};
pub use semantic::{post_process, SemanticTimelineProvider};
pub use transitions::find_transition_points;
