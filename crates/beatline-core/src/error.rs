//! Error kinds shared across the workspace, per §7.
//!
//! Each kind is a distinct `thiserror` enum carrying the stable textual
//! tag tests key off (`kind()`), folded into [`BeatlineError`] at crate
//! boundaries the way per-module errors are folded into one enum in
//! larger Rust services.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(String),
    #[error("failed to write config: {0}")]
    Write(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("failed to serialize config: {0}")]
    Serialize(String),
    #[error("config validation failed: {0:?}")]
    Validation(Vec<String>),
}

/// Per-track decode failure. Fatal to that track; the track is dropped
/// from planning with a warning, never aborting the batch.
#[derive(Debug, Error)]
#[error("failed to decode track: {reason}")]
pub struct DecodeError {
    pub reason: String,
}

impl DecodeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Beat/key extraction failed; callers fall back to the heuristic path.
/// Never fatal.
#[derive(Debug, Error)]
#[error("analysis failed: {reason}")]
pub struct AnalysisError {
    pub reason: String,
}

impl AnalysisError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Semantic-timeline collaborator failed after retries, or timed out.
/// The planner proceeds heuristically; this is logged once per track.
#[derive(Debug, Error)]
pub enum SemanticError {
    #[error("semantic timeline unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("semantic timeline request timed out after {attempts} attempts")]
    Timeout { attempts: u32 },
    #[error("semantic timeline quota exhausted")]
    QuotaExhausted,
}

/// No route visits every track. The planner still returns the best
/// partial route; this error is only raised when that route is empty.
#[derive(Debug, Error)]
#[error("planning failed: {reason}")]
pub struct PlanError {
    pub reason: String,
}

impl PlanError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Graph-scheduling inconsistency (e.g. a negative start time). Fatal to
/// the mix being rendered.
#[derive(Debug, Error)]
#[error("render failed: {reason}")]
pub struct RenderError {
    pub reason: String,
}

impl RenderError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Top-level error enum unifying every module's error kind, so the CLI
/// layer can translate any failure into an exit code (§6) with a single
/// `match`.
#[derive(Debug, Error)]
pub enum BeatlineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Semantic(#[from] SemanticError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BeatlineError {
    /// Stable textual kind tag, independent of the human-readable message,
    /// for tests to key off per §7 ("all errors carry a stable textual
    /// kind tag for tests").
    pub fn kind(&self) -> &'static str {
        match self {
            BeatlineError::Decode(_) => "decode",
            BeatlineError::Analysis(_) => "analysis",
            BeatlineError::Semantic(_) => "semantic",
            BeatlineError::Plan(_) => "plan",
            BeatlineError::Render(_) => "render",
            BeatlineError::Config(_) => "config",
        }
    }

    /// Process exit code per §6/§7.
    pub fn exit_code(&self) -> i32 {
        match self {
            BeatlineError::Decode(_) => 3,
            BeatlineError::Plan(_) => 4,
            BeatlineError::Render(_) => 5,
            BeatlineError::Analysis(_) | BeatlineError::Semantic(_) | BeatlineError::Config(_) => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        let err = BeatlineError::from(DecodeError::new("bad header"));
        assert_eq!(err.kind(), "decode");
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn plan_error_exit_code() {
        let err = BeatlineError::from(PlanError::new("no feasible route"));
        assert_eq!(err.exit_code(), 4);
    }
}
