//! Scoring weights and runtime tunables as data, not code.
//!
//! A schema of typed sub-records, a `Default` impl carrying each
//! field's documented default value, JSON persistence, and a validation
//! pass that returns every problem found rather than bailing on the
//! first one.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Harmony sub-score for one `(Δ, same_mode)` bucket, per §4.6.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HarmonyBucket {
    pub same_mode: f64,
    pub diff_mode: f64,
}

/// The full weights table used by the pair scorer (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub point_quality_multiplier: f64,

    pub structure_downbeat_both: f64,
    pub structure_downbeat_one: f64,
    pub structure_downbeat_none: f64,
    pub structure_outro_to_intro_multiplier: f64,
    pub structure_instrumental_to_verse_or_chorus_multiplier: f64,
    pub structure_verse_or_chorus_to_instrumental_multiplier: f64,
    pub structure_clamp: f64,

    /// Harmony table indexed by Camelot semitone distance; distances not
    /// present default to `{0.0, 0.0}` (i.e. no compatibility bonus).
    pub harmony_delta_0: HarmonyBucket,
    pub harmony_delta_3_or_9: HarmonyBucket,
    pub harmony_delta_5_or_7: HarmonyBucket,
    pub harmony_delta_near: HarmonyBucket,
    pub harmony_zero_total_multiplier: f64,

    pub energy_scale: f64,

    pub mood_theme_points: f64,
    pub mood_theme_cap: f64,
    pub mood_axis_points: f64,

    pub variety_used_0: f64,
    pub variety_used_1: f64,
    pub variety_used_2: f64,
    pub variety_used_3_plus: f64,
    pub variety_repeat_pattern_penalty: f64,
    pub variety_outro_to_intro_bonus: f64,
    pub variety_instrumental_to_verse_bonus: f64,
    pub variety_bridge_to_chorus_bonus: f64,

    pub semantic_hint_excellent: f64,
    pub semantic_hint_good: f64,
    pub semantic_hint_fair: f64,

    pub tempo_penalty_ratio_severe: f64,
    pub tempo_penalty_severe_multiplier: f64,
    pub tempo_penalty_ratio_moderate: f64,
    pub tempo_penalty_moderate_multiplier: f64,

    pub playback_rate_min: f64,
    pub playback_rate_max: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            point_quality_multiplier: 2.0,

            structure_downbeat_both: 300.0,
            structure_downbeat_one: 100.0,
            structure_downbeat_none: 20.0,
            structure_outro_to_intro_multiplier: 1.5,
            structure_instrumental_to_verse_or_chorus_multiplier: 1.2,
            structure_verse_or_chorus_to_instrumental_multiplier: 1.2,
            structure_clamp: 300.0,

            harmony_delta_0: HarmonyBucket {
                same_mode: 250.0,
                diff_mode: 180.0,
            },
            harmony_delta_3_or_9: HarmonyBucket {
                same_mode: 200.0,
                diff_mode: 160.0,
            },
            harmony_delta_5_or_7: HarmonyBucket {
                same_mode: 170.0,
                diff_mode: 130.0,
            },
            harmony_delta_near: HarmonyBucket {
                same_mode: 100.0,
                diff_mode: 60.0,
            },
            harmony_zero_total_multiplier: 0.6,

            energy_scale: 3.0,

            mood_theme_points: 30.0,
            mood_theme_cap: 150.0,
            mood_axis_points: 50.0,

            variety_used_0: 100.0,
            variety_used_1: 50.0,
            variety_used_2: 20.0,
            variety_used_3_plus: -50.0,
            variety_repeat_pattern_penalty: -150.0,
            variety_outro_to_intro_bonus: 100.0,
            variety_instrumental_to_verse_bonus: 80.0,
            variety_bridge_to_chorus_bonus: 60.0,

            semantic_hint_excellent: 100.0,
            semantic_hint_good: 70.0,
            semantic_hint_fair: 40.0,

            tempo_penalty_ratio_severe: 0.5,
            tempo_penalty_severe_multiplier: 0.5,
            tempo_penalty_ratio_moderate: 0.25,
            tempo_penalty_moderate_multiplier: 0.75,

            playback_rate_min: 0.9,
            playback_rate_max: 1.1,
        }
    }
}

/// Beam-pruned A* tunables, per §4.7.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub neighbors_per_song: usize,
    pub beam_width: usize,
    pub beam_width_reduction_depth: usize,
    pub beam_decay_factor: f64,
    pub beam_width_floor: usize,
    pub max_memory_nodes: usize,
    pub max_memory_truncate_fraction: f64,
    pub prune_factor: f64,
    pub max_iterations: u64,
    pub extra_iterations_after_goal: u64,
    pub max_distinct_routes: usize,
    pub heuristic_score_multiplier: f64,
    pub heuristic_remaining_bonus: f64,
    /// Seconds around the destination beat marked "used" once a route is
    /// finalised (never during A* expansion itself).
    pub used_segment_window_seconds: f64,
    pub structural_history_len: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            neighbors_per_song: 25,
            beam_width: 5000,
            beam_width_reduction_depth: 5,
            beam_decay_factor: 0.8,
            beam_width_floor: 500,
            max_memory_nodes: 10_000,
            max_memory_truncate_fraction: 0.8,
            prune_factor: 0.30,
            max_iterations: 5_000_000,
            extra_iterations_after_goal: 10_000,
            max_distinct_routes: 3,
            heuristic_score_multiplier: 2.0,
            heuristic_remaining_bonus: 800.0,
            used_segment_window_seconds: 30.0,
            structural_history_len: 5,
        }
    }
}

/// Mix-renderer timing and TimeMap tunables, per §4.8.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub seed_min_beats: usize,
    pub seed_max_beats: usize,
    pub no_timeline_min_beats: usize,
    pub no_timeline_default_beats: usize,
    pub min_duration_seconds: f64,
    pub ideal_duration_seconds: f64,
    pub max_duration_seconds: f64,
    pub transition_overlap_seconds: f64,
    pub first_source_fade_in_seconds: f64,
    pub last_source_fade_out_seconds: f64,
    pub cut_fade_seconds: f64,
    pub beatmatch_low_shelf_start_db: f64,
    pub crossfade_low_shelf_start_db: f64,
    pub low_shelf_hz: f64,
    pub peaking_hz: f64,
    pub peaking_q: f64,
    pub high_shelf_hz: f64,
    pub block_seconds: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            seed_min_beats: 240,
            seed_max_beats: 360,
            no_timeline_min_beats: 240,
            no_timeline_default_beats: 360,
            min_duration_seconds: 60.0,
            ideal_duration_seconds: 90.0,
            max_duration_seconds: 150.0,
            transition_overlap_seconds: 0.2,
            first_source_fade_in_seconds: 0.05,
            last_source_fade_out_seconds: 2.0,
            cut_fade_seconds: 0.05,
            beatmatch_low_shelf_start_db: -24.0,
            crossfade_low_shelf_start_db: -12.0,
            low_shelf_hz: 320.0,
            peaking_hz: 1000.0,
            peaking_q: 0.5,
            high_shelf_hz: 3200.0,
            block_seconds: 300.0,
        }
    }
}

/// C2/C3 analysis tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub fft_size: usize,
    pub hop_size: usize,
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub fallback_min_bpm: f64,
    pub fallback_max_bpm: f64,
    pub fallback_preferred_min_bpm: f64,
    pub fallback_preferred_max_bpm: f64,
    pub key_window_fft_size: usize,
    pub key_window_hop_size: usize,
    pub key_fallback_window_seconds: f64,
    pub target_loudness_lufs: f64,
    pub feature_energy_max_samples: usize,
    pub feature_centroid_max_samples: usize,
    pub feature_centroid_min_samples: usize,
    pub onset_window_ms: f64,
    pub onset_overlap: f64,
    pub onset_threshold_multiplier: f64,
    pub onset_min_spacing_ms: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            hop_size: 512,
            min_bpm: 60.0,
            max_bpm: 200.0,
            fallback_min_bpm: 60.0,
            fallback_max_bpm: 180.0,
            fallback_preferred_min_bpm: 80.0,
            fallback_preferred_max_bpm: 140.0,
            key_window_fft_size: 4096,
            key_window_hop_size: 2048,
            key_fallback_window_seconds: 20.0,
            target_loudness_lufs: -14.0,
            feature_energy_max_samples: 8192,
            feature_centroid_max_samples: 4096,
            feature_centroid_min_samples: 512,
            onset_window_ms: 10.0,
            onset_overlap: 0.5,
            onset_threshold_multiplier: 3.0,
            onset_min_spacing_ms: 50.0,
        }
    }
}

/// C4 semantic-timeline batching and retry tunables, per §4.4/§5.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    pub max_attempts: u32,
    pub poll_interval_seconds: f64,
    pub max_polls: u32,
    pub batch_size: usize,
    pub coalesce_window_seconds: f64,
    pub snap_window_seconds: f64,
    pub downbeat_priority_bonus_seconds: f64,
    pub merge_gap_seconds: f64,
    pub extend_last_section_seconds: f64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            poll_interval_seconds: 2.0,
            max_polls: 30,
            batch_size: 10,
            coalesce_window_seconds: 2.0,
            snap_window_seconds: 2.0,
            downbeat_priority_bonus_seconds: 0.1,
            merge_gap_seconds: 6.0,
            extend_last_section_seconds: 2.0,
        }
    }
}

/// Top-level configuration record, persisted as a single JSON document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BeatlineConfig {
    pub analysis: AnalysisConfig,
    pub scoring: ScoringWeights,
    pub planner: PlannerConfig,
    pub render: RenderConfig,
    pub semantic: SemanticConfig,
}

impl BeatlineConfig {
    /// Collects every validation problem instead of stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.analysis.min_bpm <= 0.0 || self.analysis.min_bpm >= self.analysis.max_bpm {
            errors.push(format!(
                "analysis.min_bpm ({}) must be positive and less than max_bpm ({})",
                self.analysis.min_bpm, self.analysis.max_bpm
            ));
        }
        if self.planner.beam_width_floor > self.planner.beam_width {
            errors.push(format!(
                "planner.beam_width_floor ({}) must not exceed beam_width ({})",
                self.planner.beam_width_floor, self.planner.beam_width
            ));
        }
        if !(0.0..=1.0).contains(&self.planner.max_memory_truncate_fraction) {
            errors.push("planner.max_memory_truncate_fraction must be in [0, 1]".to_string());
        }
        if self.render.min_duration_seconds > self.render.ideal_duration_seconds
            || self.render.ideal_duration_seconds > self.render.max_duration_seconds
        {
            errors.push(
                "render duration thresholds must satisfy min <= ideal <= max".to_string(),
            );
        }
        if self.render.channels == 0 {
            errors.push("render.channels must be non-zero".to_string());
        }
        if self.planner.playback_rate_bounds_invalid(&self.scoring) {
            errors.push("scoring.playback_rate_min must be <= playback_rate_max".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl PlannerConfig {
    fn playback_rate_bounds_invalid(&self, scoring: &ScoringWeights) -> bool {
        scoring.playback_rate_min > scoring.playback_rate_max
    }
}

/// Loads, validates and persists a [`BeatlineConfig`] from a JSON file on disk.
pub struct ConfigManager {
    config_path: PathBuf,
    config: BeatlineConfig,
}

impl ConfigManager {
    /// Uses `path` if given, else `$XDG_CONFIG_HOME/beatline/config.json`
    /// (via the `dirs` crate), falling back to defaults if nothing exists yet.
    pub fn new(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = path.unwrap_or_else(Self::default_path);
        let config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            BeatlineConfig::default()
        };
        config.validate().map_err(ConfigError::Validation)?;
        Ok(Self {
            config_path,
            config,
        })
    }

    fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("beatline")
            .join("config.json")
    }

    fn load_from(path: &Path) -> Result<BeatlineConfig, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn config(&self) -> &BeatlineConfig {
        &self.config
    }

    pub fn update(&mut self, config: BeatlineConfig) -> Result<(), ConfigError> {
        config.validate().map_err(ConfigError::Validation)?;
        self.config = config;
        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Write(e.to_string()))?;
        }
        let text = serde_json::to_string_pretty(&self.config)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(&self.config_path, text).map_err(|e| ConfigError::Write(e.to_string()))
    }

    pub fn reset_to_defaults(&mut self) {
        self.config = BeatlineConfig::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_validate_cleanly() {
        assert!(BeatlineConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_bpm_range_is_reported() {
        let mut config = BeatlineConfig::default();
        config.analysis.min_bpm = 300.0;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("min_bpm")));
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut manager = ConfigManager::new(Some(path.clone())).unwrap();
        let mut custom = manager.config().clone();
        custom.planner.beam_width = 42;
        manager.update(custom).unwrap();
        manager.save().unwrap();

        let reloaded = ConfigManager::new(Some(path)).unwrap();
        assert_eq!(reloaded.config().planner.beam_width, 42);
    }
}
