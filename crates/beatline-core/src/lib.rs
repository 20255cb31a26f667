//! Shared data model, configuration and error types for the beatline
//! automatic DJ mixing engine.
//!
//! # Crates
//!
//! - `beatline-core` (this crate): tracks, beat grids, keys, sections,
//!   routes, the scoring/planner/render configuration record, and the
//!   error kinds every other crate folds into.
//! - `beatline-engine`: the C1-C8 analysis, planning and rendering
//!   pipeline built on top of this crate's types.
//! - `beatline-cli`: the `analyze`/`plan`/`render`/`mix` command-line
//!   surface, plus the optional SQLite analysis cache.

pub mod cancel;
pub mod config;
pub mod error;
pub mod model;

pub use cancel::CancelToken;
pub use config::{AnalysisConfig, BeatlineConfig, ConfigManager, PlannerConfig, RenderConfig, ScoringWeights, SemanticConfig};
pub use error::{AnalysisError, BeatlineError, ConfigError, DecodeError, PlanError, RenderError, SemanticError};
pub use model::*;
