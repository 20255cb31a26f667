//! `beatline`: analyze, plan, render and mix command-line surface, per §6.
//!
//! Subcommand dispatch follows `halo`'s `main.rs` (`#[derive(Parser)]`,
//! a small `fn main` that builds a config and calls into library code),
//! extended to `#[derive(Subcommand)]` since this binary exposes four
//! operations rather than one.

mod cache;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use beatline_core::{BeatlineConfig, BeatlineError, ConfigManager, Timeline, Track, TrackId, TransitionPoint};
use beatline_engine::render::RenderSource;
use beatline_engine::semantic::RawTimelineDoc;
use beatline_engine::{planner, render};

#[derive(Parser, Debug)]
#[command(name = "beatline")]
#[command(about = "Automatic DJ mixing engine: analyze tracks, plan a route, render a mix")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to a JSON config file; defaults to the XDG config location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode and analyze tracks, printing BPM/key/transition-point summaries.
    Analyze {
        paths: Vec<PathBuf>,
    },
    /// Analyze tracks and plan a route starting from `--seed`.
    Plan {
        paths: Vec<PathBuf>,
        #[arg(long, default_value_t = 0)]
        seed: usize,
    },
    /// Render a previously-planned route is not supported standalone;
    /// `render` re-runs analysis and planning, then renders the result.
    Render {
        paths: Vec<PathBuf>,
        #[arg(long, default_value_t = 0)]
        seed: usize,
        #[arg(long)]
        out: PathBuf,
    },
    /// Convenience command composing analyze + plan + render.
    Mix {
        paths: Vec<PathBuf>,
        #[arg(long, default_value_t = 0)]
        seed: usize,
        #[arg(long)]
        out: PathBuf,
    },
}

/// One decoded, analyzed track, carrying everything later stages need.
struct PreparedTrack {
    track: Track,
    key: beatline_core::TrackKey,
    beat_grid: beatline_core::BeatGrid,
    features: beatline_core::PerBeatFeatures,
    timeline: Timeline,
    points: Vec<TransitionPoint>,
}

/// Opens the analysis cache at the path named by `BEATLINE_DATABASE_URL`
/// (the §6 "DATABASE_URL analogue"), if set. Absent or unopenable is
/// treated the same: no cache, never fatal.
fn open_cache() -> Option<cache::AnalysisCache> {
    let url = std::env::var("BEATLINE_DATABASE_URL").ok()?;
    match cache::AnalysisCache::open(&url) {
        Ok(cache) => Some(cache),
        Err(e) => {
            log::warn!("failed to open analysis cache at {url}: {e}");
            None
        }
    }
}

fn track_cache_key(path: &PathBuf, decoded: &beatline_engine::decode::DecodedAudio) -> String {
    let name = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("track");
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    cache::cache_key(name, size, decoded.duration_seconds)
}

/// Decodes, analyzes and finds transition points for every path, per
/// C1-C5. A track that fails to decode or analyze is dropped with a
/// warning rather than aborting the run, per §7. Analysis results are
/// read through `cache` when present, and written back on a cache miss
/// — reads and writes are both best-effort and never block planning.
async fn prepare_tracks(paths: &[PathBuf], config: &BeatlineConfig, cache: Option<&cache::AnalysisCache>) -> Vec<PreparedTrack> {
    let mut to_analyze = Vec::with_capacity(paths.len());
    let mut cached: Vec<(Track, beatline_core::TrackAnalysis)> = Vec::new();

    for (index, path) in paths.iter().enumerate() {
        match beatline_engine::decode::decode_file(path) {
            Ok(decoded) => {
                let display_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("track")
                    .to_string();
                let key = track_cache_key(path, &decoded);
                let track = Track::new(
                    TrackId(index),
                    display_name,
                    decoded.duration_seconds,
                    decoded.sample_rate,
                    decoded.channels,
                    decoded.pcm,
                );

                match cache.and_then(|c| c.get(&key)).and_then(|json| serde_json::from_str(&json).ok()) {
                    Some(analysis) => cached.push((track, analysis)),
                    None => to_analyze.push((track, key)),
                }
            }
            Err(e) => {
                log::warn!("dropping {}: decode failed: {e}", path.display());
            }
        }
    }

    let keys: Vec<String> = to_analyze.iter().map(|(_, key)| key.clone()).collect();
    let tracks: Vec<Track> = to_analyze.into_iter().map(|(track, _)| track).collect();
    let analyzed = beatline_engine::analyze_batch(tracks, config.analysis.clone()).await;

    let mut all = cached;
    for ((track, result), key) in analyzed.into_iter().zip(keys) {
        match result {
            Ok(analysis) => {
                if let Some(cache) = cache {
                    if let Ok(json) = serde_json::to_string(&analysis) {
                        if let Err(e) = cache.put(&key, &json) {
                            log::warn!("failed to write analysis cache entry for {key}: {e}");
                        }
                    }
                }
                all.push((track, analysis));
            }
            Err(e) => {
                log::warn!("dropping {}: analysis failed: {e}", track.display_name);
            }
        }
    }

    let mut prepared = Vec::with_capacity(all.len());
    for (track, analysis) in all {
        // No HTTP-backed semantic-timeline collaborator ships in this
        // binary (the corpus this crate is grounded on has no HTTP
        // client dependency); every track takes the same heuristic
        // fallback path a failed collaborator call would take, per
        // §4.4 step 8.
        let timeline = beatline_engine::semantic::post_process(
            &RawTimelineDoc::default(),
            track.duration_seconds,
            config.semantic.merge_gap_seconds,
        );

        let points = match beatline_engine::find_transition_points(
            track.id,
            &analysis.beat_grid,
            &analysis.features,
            &timeline,
            track.duration_seconds,
            &[],
            &[],
        ) {
            Ok(points) => points,
            Err(e) => {
                log::warn!("dropping {}: no transition points found: {e}", track.display_name);
                continue;
            }
        };

        prepared.push(PreparedTrack {
            track,
            key: analysis.key,
            beat_grid: analysis.beat_grid,
            features: analysis.features,
            timeline,
            points,
        });
    }

    prepared
}

fn plan(prepared: &[PreparedTrack], seed: usize, config: &BeatlineConfig) -> Result<beatline_core::PlannedRoute, BeatlineError> {
    let planning_tracks: Vec<planner::PlanningTrack> = prepared
        .iter()
        .map(|p| planner::PlanningTrack {
            id: p.track.id,
            bpm: p.beat_grid.bpm,
            key: &p.key,
            beat_grid: &p.beat_grid,
            features: &p.features,
            timeline: &p.timeline,
            points: p.points.clone(),
        })
        .collect();

    let route = planner::plan_route(&planning_tracks, seed, &config.scoring, &config.planner)?;
    Ok(route)
}

/// `prepare_tracks` drops every undecodable/unanalyzable track with a
/// warning rather than failing the batch (§7), so a run whose inputs all
/// fail to decode would otherwise fall through to exit 0 (empty analyze
/// output) or exit 4 (a seed/planning error masking the real cause).
/// Surface it here instead, once, as the decode failure it actually is.
fn require_prepared(paths: &[PathBuf], prepared: &[PreparedTrack]) -> Result<(), BeatlineError> {
    if !paths.is_empty() && prepared.is_empty() {
        return Err(BeatlineError::Decode(beatline_core::DecodeError::new(format!(
            "none of the {} input track(s) could be decoded",
            paths.len()
        ))));
    }
    Ok(())
}

async fn run_analyze(paths: Vec<PathBuf>, config: &BeatlineConfig, cache: Option<&cache::AnalysisCache>) -> Result<(), BeatlineError> {
    let prepared = prepare_tracks(&paths, config, cache).await;
    require_prepared(&paths, &prepared)?;
    for p in &prepared {
        println!(
            "{}\tbpm={:.1}\tkey={}\tduration={:.1}s\tpoints={}",
            p.track.display_name,
            p.beat_grid.bpm,
            p.key.camelot,
            p.track.duration_seconds,
            p.points.len(),
        );
    }
    Ok(())
}

async fn run_plan(paths: Vec<PathBuf>, seed: usize, config: &BeatlineConfig, cache: Option<&cache::AnalysisCache>) -> Result<(), BeatlineError> {
    let prepared = prepare_tracks(&paths, config, cache).await;
    require_prepared(&paths, &prepared)?;
    if seed >= prepared.len() {
        return Err(BeatlineError::Plan(beatline_core::PlanError::new(format!(
            "seed index {seed} out of range for {} prepared tracks",
            prepared.len()
        ))));
    }
    let route = plan(&prepared, seed, config)?;
    for c in &route.candidates {
        println!(
            "track {} @ {:.2}s -> track {} @ {:.2}s\tscore={:.1}\tkind={:?}\trate={:.3}",
            c.from.track.0, c.from.time, c.to.track.0, c.to.time, c.total_score, c.kind, c.playback_rate,
        );
    }
    Ok(())
}

async fn run_render(paths: Vec<PathBuf>, seed: usize, out: PathBuf, config: &BeatlineConfig, cache: Option<&cache::AnalysisCache>) -> Result<(), BeatlineError> {
    let prepared = prepare_tracks(&paths, config, cache).await;
    require_prepared(&paths, &prepared)?;
    if seed >= prepared.len() {
        return Err(BeatlineError::Plan(beatline_core::PlanError::new(format!(
            "seed index {seed} out of range for {} prepared tracks",
            prepared.len()
        ))));
    }
    let route = plan(&prepared, seed, config)?;

    let sources: Vec<RenderSource> = prepared
        .iter()
        .map(|p| RenderSource {
            track: &p.track,
            beat_grid: &p.beat_grid,
            timeline: &p.timeline,
        })
        .collect();

    let time_map = render::build_time_map(&route, &sources, &config.render)?;
    let schedule = render::build_schedule(&route, &sources, &config.render)?;
    let total_duration = time_map.total_duration() + config.render.min_duration_seconds;
    let pcm = render::render_mix(&schedule, &sources, total_duration, &config.render)?;

    beatline_engine::render::wav::export_wav(&pcm, config.render.sample_rate, config.render.channels, &out)?;
    log::info!("rendered {:.1}s mix to {}", total_duration, out.display());
    Ok(())
}

async fn dispatch(command: Command, config: &BeatlineConfig) -> Result<(), BeatlineError> {
    let cache = open_cache();
    let cache = cache.as_ref();
    match command {
        Command::Analyze { paths } => run_analyze(paths, config, cache).await,
        Command::Plan { paths, seed } => run_plan(paths, seed, config, cache).await,
        Command::Render { paths, seed, out } => run_render(paths, seed, out, config, cache).await,
        Command::Mix { paths, seed, out } => run_render(paths, seed, out, config, cache).await,
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let config_manager = match ConfigManager::new(cli.config) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(dispatch(cli.command, config_manager.config())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
