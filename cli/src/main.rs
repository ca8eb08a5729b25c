//! `locomotion` CLI: scenario runs, trail resampling, parameter training.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use locomotion_core::{uv, AgentParams, BarrierField, Uv};
use sim::replay::save_replay;
use sim::scenarios::{Scenario, ScenarioKind, Simulation};
use sim::training::{run_trials, CancellationToken, TrailFitness, TrainingConfig};
use sim::AnimationClock;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use walking_trail::{PolylineSketch, WalkingTrail};

#[derive(Parser)]
#[command(name = "locomotion", about = "Pedestrian locomotion simulator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a named scenario and report the walked path.
    RunScenario {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// JSON file overriding the agent parameters
        #[arg(long)]
        params: Option<PathBuf>,
        /// Step at wall-clock pace instead of the fixed timestep
        #[arg(long)]
        realtime: bool,
        /// Output a run summary to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also save the full replay log
        #[arg(long)]
        save_replay: Option<PathBuf>,
    },
    /// Fit a walking trail and write its resampled points and states.
    ResampleTrail {
        /// Trail text file, or a polyline of `u,v` lines with --speed
        input: PathBuf,
        /// Treat the input as a drawn polyline walked at this speed
        #[arg(long)]
        speed: Option<f64>,
        #[arg(long, default_value_t = 1.0)]
        curvature: f64,
        #[arg(long, default_value_t = 5.0)]
        points_per_unit_length: f64,
        #[arg(long, default_value_t = 5.0)]
        states_per_unit_length: f64,
        /// Output resampled points/states to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also write the trail in text format
        #[arg(long)]
        save_trail: Option<PathBuf>,
    },
    /// Score a sweep of velocity caps against recorded trails.
    TrainFitness {
        /// Trail text files
        #[arg(required = true)]
        trails: Vec<PathBuf>,
        /// JSON file with the base agent parameters
        #[arg(long)]
        params: Option<PathBuf>,
        #[arg(long, default_value_t = 0.5)]
        min_speed: f64,
        #[arg(long, default_value_t = 3.0)]
        max_speed: f64,
        #[arg(long, default_value_t = 11)]
        trials: usize,
        /// Seconds ahead on the trail used as destination
        #[arg(long, default_value_t = 1.0)]
        look_ahead: f64,
        /// Stop after this many seconds (between trials)
        #[arg(long)]
        time_budget: Option<f64>,
        /// Output all trial results to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RunScenario {
            scenario,
            seed,
            params,
            realtime,
            output,
            save_replay: save_path,
        } => {
            run_scenario(
                scenario,
                seed,
                params.as_deref(),
                realtime,
                output.as_deref(),
                save_path.as_deref(),
            )?;
        }
        Commands::ResampleTrail {
            input,
            speed,
            curvature,
            points_per_unit_length,
            states_per_unit_length,
            output,
            save_trail,
        } => {
            let mut trail = match speed {
                Some(speed) => read_polyline(&input)?.to_trail(speed)?,
                None => read_trail(&input)?,
            };
            trail.set_curvature(curvature)?;
            trail.set_points_per_unit_length(points_per_unit_length)?;
            trail.set_states_per_unit_length(states_per_unit_length)?;
            resample_trail(&trail, output.as_deref(), save_trail.as_deref())?;
        }
        Commands::TrainFitness {
            trails,
            params,
            min_speed,
            max_speed,
            trials,
            look_ahead,
            time_budget,
            output,
        } => {
            train_fitness(
                &trails,
                params.as_deref(),
                (min_speed, max_speed, trials),
                look_ahead,
                time_budget,
                output.as_deref(),
            )?;
        }
    }

    Ok(())
}

fn load_params(path: Option<&Path>) -> Result<Option<AgentParams>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading parameters from {}", path.display()))?;
    let params: AgentParams = serde_json::from_str(&text)
        .with_context(|| format!("parsing parameters in {}", path.display()))?;
    Ok(Some(params))
}

fn run_scenario(
    kind: ScenarioKind,
    seed: u64,
    params_path: Option<&Path>,
    realtime: bool,
    output_path: Option<&Path>,
    replay_path: Option<&Path>,
) -> Result<()> {
    let mut scenario = Scenario::build(kind, seed);
    if let Some(params) = load_params(params_path)? {
        scenario.params = params;
    }
    let mut sim = Simulation::new(&scenario);

    println!(
        "Running scenario '{}' (seed={}, duration={:.1}s, h={})...",
        scenario.name, seed, scenario.duration, scenario.h
    );
    let start = Instant::now();

    if realtime {
        let mut clock = AnimationClock::new(5.0 * scenario.h);
        while sim.time < scenario.duration {
            let h = clock.tick(start.elapsed().as_secs_f64());
            sim.step(h)?;
            std::thread::sleep(Duration::from_millis(16));
        }
    } else {
        sim.run()?;
    }

    let elapsed = start.elapsed();
    let log = sim.replay();
    let last = sim.agent.state;
    println!(
        "Done: {} steps, {} contacts, path length {:.2}, final location [{:.3}, {:.3}], elapsed={:.2}s",
        log.frames.len(),
        log.total_contacts(),
        log.path_length(),
        last.location.x,
        last.location.y,
        elapsed.as_secs_f64(),
    );

    if let Some(rpath) = replay_path {
        save_replay(&log, rpath)?;
        println!("Replay saved to {}", rpath.display());
    }

    if let Some(opath) = output_path {
        let json = serde_json::json!({
            "scenario": scenario.name,
            "seed": seed,
            "elapsed_s": elapsed.as_secs_f64(),
            "steps": log.frames.len(),
            "contacts": log.total_contacts(),
            "path_length": log.path_length(),
            "final_state": last,
        });
        std::fs::write(opath, serde_json::to_string_pretty(&json)?)?;
        println!("Summary saved to {}", opath.display());
    }

    Ok(())
}

fn read_trail(path: &Path) -> Result<WalkingTrail> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading trail {}", path.display()))?;
    let trail = WalkingTrail::from_string_representation(&text)
        .with_context(|| format!("parsing trail {}", path.display()))?;
    Ok(trail)
}

/// One `u,v` point per line; blank and `#` lines are skipped.
fn read_polyline(path: &Path) -> Result<PolylineSketch> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading polyline {}", path.display()))?;
    let mut sketch = PolylineSketch::default();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((u, v)) = line.split_once(',') else {
            bail!("line {}: expected 'u,v', found '{line}'", n + 1);
        };
        let point: Uv = uv(u.trim().parse()?, v.trim().parse()?);
        sketch.push(point);
    }
    Ok(sketch)
}

fn resample_trail(
    trail: &WalkingTrail,
    output_path: Option<&Path>,
    trail_path: Option<&Path>,
) -> Result<()> {
    println!(
        "Trail: {} observations, length {:.2}, duration {:.2}s, {} points, {} states (every {:.3}s)",
        trail.observation_times().len(),
        trail.total_length(),
        trail.duration(),
        trail.approximated_points().len(),
        trail.interpolated_states().len(),
        trail.time_interval_between_interpolated_states(),
    );

    if let Some(tpath) = trail_path {
        std::fs::write(tpath, trail.to_string_representation())?;
        println!("Trail saved to {}", tpath.display());
    }

    if let Some(opath) = output_path {
        let json = serde_json::json!({
            "curvature": trail.curvature(),
            "length": trail.total_length(),
            "duration": trail.duration(),
            "approximated_points": trail.approximated_points(),
            "interpolated_states": trail.interpolated_states(),
            "time_interval": trail.time_interval_between_interpolated_states(),
        });
        std::fs::write(opath, serde_json::to_string_pretty(&json)?)?;
        println!("Resampled trail saved to {}", opath.display());
    }

    Ok(())
}

/// Wall-clock budget in seconds; rejects negative, non-finite and
/// out-of-range values.
fn parse_time_budget(seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .with_context(|| format!("invalid --time-budget {seconds}"))
}

fn train_fitness(
    trail_paths: &[PathBuf],
    params_path: Option<&Path>,
    (min_speed, max_speed, count): (f64, f64, usize),
    look_ahead: f64,
    time_budget: Option<f64>,
    output_path: Option<&Path>,
) -> Result<()> {
    if count == 0 || !(min_speed > 0.0 && max_speed >= min_speed) {
        bail!("need at least one trial over a positive speed range");
    }
    let trails = trail_paths
        .iter()
        .map(|p| read_trail(p))
        .collect::<Result<Vec<_>>>()?;
    let base = load_params(params_path)?.unwrap_or_default();

    let candidates: Vec<AgentParams> = (0..count)
        .map(|k| {
            let f = if count > 1 {
                k as f64 / (count - 1) as f64
            } else {
                0.0
            };
            AgentParams {
                velocity_magnitude: min_speed + f * (max_speed - min_speed),
                ..base.clone()
            }
        })
        .collect();

    let token = CancellationToken::new();
    if let Some(seconds) = time_budget {
        let budget = parse_time_budget(seconds)?;
        let token = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(budget);
            tracing::info!(seconds, "time budget spent; cancelling remaining trials");
            token.cancel();
        });
    }

    // Floor geometry is not part of a trail file; train in open space
    let field = BarrierField::default();
    let config = TrainingConfig {
        look_ahead,
        ..Default::default()
    };
    let mut fitness = TrailFitness::new(&trails, &field, base, config);

    println!(
        "Training on {} trails with {} candidates...",
        trails.len(),
        candidates.len()
    );
    let start = Instant::now();
    let summary = run_trials(&mut fitness, &candidates, &token);

    for r in &summary.results {
        println!(
            "  trial {:>3}: velocity {:.3} -> fitness {:.6}",
            r.index, r.params.velocity_magnitude, r.fitness
        );
    }
    match &summary.best {
        Some(best) => println!(
            "Best: trial {} (velocity {:.3}, fitness {:.6}){}, elapsed={:.2}s",
            best.index,
            best.params.velocity_magnitude,
            best.fitness,
            if summary.cancelled { " [cancelled]" } else { "" },
            start.elapsed().as_secs_f64()
        ),
        None => println!("No trial completed"),
    }

    if let Some(opath) = output_path {
        std::fs::write(opath, serde_json::to_string_pretty(&summary)?)?;
        println!("Trial results saved to {}", opath.display());
    }

    Ok(())
}
