// ========================================================================================
//
//                      THE SIMULATION DRIVER: MULTISTATE
//
// ========================================================================================
//
// This binary is a thin shell around the library. It parses a TOML model
// configuration, runs the trajectory simulator over every
// (strategy, patient, parameter sample) unit, and writes flat CSV tables for a
// downstream cost/QALY aggregator:
//
// 1.  `transitions.csv`: one row per transition record, including the censoring
//     record that closes a trajectory at its horizon.
//
// 2.  `stateprobs.csv`: state-occupancy probabilities at the configured query
//     times, per strategy and parameter sample.
//
// 3.  `statetimes.csv`: restricted mean time in each state, when the output
//     section sets a restriction time.
//
// Both occupancy tables carry the configured state name next to the state index.

use clap::{Parser, Subcommand};
use multistate::config::{LoadedModel, ModelConfig};
use multistate::occupancy::{StateProbability, StateTime, expected_state_times, state_probabilities};
use multistate::simulator::{Trajectory, transition_table};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

// ========================================================================================
//                         COMMAND-LINE INTERFACE DEFINITION
// ========================================================================================

#[derive(Parser)]
#[command(
    name = "multistate",
    version,
    about = "Continuous-time individual-level multi-state disease progression simulator."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate trajectories for the model described by a TOML configuration.
    Simulate {
        /// Path to the model configuration.
        config: PathBuf,

        /// Directory receiving the output tables.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Worker threads; defaults to one per logical core.
        #[arg(long)]
        threads: Option<usize>,

        /// Overrides the seed given in the configuration.
        #[arg(long)]
        seed: Option<u64>,
    },
}

// ========================================================================================
//                           THE MAIN ORCHESTRATION LOGIC
// ========================================================================================

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let result = match Cli::parse().command {
        Commands::Simulate {
            config,
            out_dir,
            threads,
            seed,
        } => run_simulate(&config, &out_dir, threads, seed),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_simulate(
    config_path: &Path,
    out_dir: &Path,
    threads: Option<usize>,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let start_time = Instant::now();
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    // --- Phase 1: Configuration ---
    log::info!("Reading model configuration from {}", config_path.display());
    let mut model = ModelConfig::load(config_path)?.build()?;
    if let Some(seed) = seed {
        model.simulation.seed = seed;
    }

    // --- Phase 2: Simulation ---
    let trajectories = model.simulator()?.run()?;

    // --- Phase 3: Output ---
    fs::create_dir_all(out_dir)?;
    let n_records = write_table(&out_dir.join("transitions.csv"), transition_table(&trajectories))?;
    log::info!("Wrote {n_records} transition records");
    write_occupancy(&model, &trajectories, out_dir)?;

    log::info!(
        "Finished in {:.2?}; results in {}",
        start_time.elapsed(),
        out_dir.display()
    );
    Ok(())
}

fn write_occupancy(
    model: &LoadedModel,
    trajectories: &[Trajectory],
    out_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let n_states = model.transitions.matrix().n_states();
    if model.output.times.is_empty() {
        log::warn!("No output times configured; skipping state-occupancy probabilities");
    } else {
        let probabilities = state_probabilities(trajectories, n_states, &model.output.times)?;
        let rows = probabilities.iter().map(|p| NamedStateProbability::new(model, p));
        write_table(&out_dir.join("stateprobs.csv"), rows)?;
    }
    if let Some(restriction) = model.output.restriction {
        let times = expected_state_times(trajectories, n_states, restriction)?;
        let rows = times.iter().map(|t| NamedStateTime::new(model, t));
        write_table(&out_dir.join("statetimes.csv"), rows)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct NamedStateProbability {
    strategy_id: u64,
    sample: usize,
    state: usize,
    state_name: String,
    time: f64,
    probability: f64,
}

impl NamedStateProbability {
    fn new(model: &LoadedModel, row: &StateProbability) -> Self {
        Self {
            strategy_id: row.strategy_id,
            sample: row.sample,
            state: row.state,
            state_name: model.state_name(row.state),
            time: row.time,
            probability: row.probability,
        }
    }
}

#[derive(Serialize)]
struct NamedStateTime {
    strategy_id: u64,
    sample: usize,
    state: usize,
    state_name: String,
    restriction: f64,
    expected_time: f64,
}

impl NamedStateTime {
    fn new(model: &LoadedModel, row: &StateTime) -> Self {
        Self {
            strategy_id: row.strategy_id,
            sample: row.sample,
            state: row.state,
            state_name: model.state_name(row.state),
            restriction: row.restriction,
            expected_time: row.expected_time,
        }
    }
}

fn write_table<I>(path: &Path, rows: I) -> Result<usize, Box<dyn std::error::Error>>
where
    I: IntoIterator,
    I::Item: Serialize,
{
    let mut writer = csv::Writer::from_path(path)?;
    let mut count = 0;
    for row in rows {
        writer.serialize(row)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}
