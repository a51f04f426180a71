//! Competing-risks trajectory stepper.
//!
//! Each simulation unit `(strategy, patient, sample)` walks the transition
//! matrix from its initial state. In every visited state one candidate time is
//! drawn per outgoing edge; the earliest candidate wins (ties go to the lowest
//! edge id) and the unit moves to that edge's target. A unit stops when it
//! reaches an absorbing state, or when no candidate falls before its horizon,
//! in which case a censoring record `from == to` closes the trajectory.
//!
//! Candidates are drawn on the clock of their edge:
//!
//! * clock-reset: time since entering the current state, `lower = 0`,
//!   `upper = horizon - t`;
//! * clock-forward: time since the unit started, `lower = t`, `upper = horizon`,
//!   which left-truncates the edge's distribution at `t`.

use crate::population::{Population, PopulationError, UnitId};
use crate::rng::unit_stream;
use crate::sampler::{Draw, SamplerSettings, SamplingError, SurvivalSampler};
use crate::transition::{TransitionError, TransitionModel};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Population(#[from] PopulationError),
    #[error("The population has {found} rows but the edge design matrices have {expected}")]
    PopulationSize { expected: usize, found: usize },
    #[error("Population row {row} starts in state {state}, but the model has {n_states} states")]
    InitialState {
        row: usize,
        state: usize,
        n_states: usize,
    },
    #[error("Edge {edge} uses the {family} family, which cannot be sampled on the clock-forward timescale")]
    UnsupportedClock { edge: usize, family: &'static str },
    #[error("A per-edge clock policy lists {found} clocks for {expected} edges")]
    ClockEdges { expected: usize, found: usize },
    #[error("The clock policy names state {state}, but the model has {n_states} states")]
    ClockState { state: usize, n_states: usize },
    #[error("Simulation limit {name} must be positive, got {value}")]
    InvalidLimit { name: &'static str, value: f64 },
    #[error("Population row {row} has no time at risk (horizon {horizon})")]
    NoTimeAtRisk { row: usize, horizon: f64 },
    #[error("Unit {unit:?} exceeded {limit} transitions")]
    TransitionLimit { unit: UnitId, limit: usize },
    #[error("Sampling failed for unit {unit:?} on edge {edge}: {source}")]
    Sampling {
        unit: UnitId,
        edge: usize,
        #[source]
        source: SamplingError,
    },
}

/// Timescale of one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clock {
    Reset,
    Forward,
}

/// Which timescale each edge is sampled on.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ClockPolicy {
    #[default]
    Reset,
    Forward,
    /// Reset when leaving one of `reset_states`, forward otherwise.
    Mixed { reset_states: Vec<usize> },
    /// One clock per edge, indexed by `id - 1`.
    PerEdge(Vec<Clock>),
}

impl ClockPolicy {
    pub fn clock(&self, edge: usize, from: usize) -> Clock {
        match self {
            ClockPolicy::Reset => Clock::Reset,
            ClockPolicy::Forward => Clock::Forward,
            ClockPolicy::Mixed { reset_states } => {
                if reset_states.contains(&from) {
                    Clock::Reset
                } else {
                    Clock::Forward
                }
            }
            ClockPolicy::PerEdge(clocks) => clocks
                .get(edge.wrapping_sub(1))
                .copied()
                .unwrap_or(Clock::Reset),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub clock: ClockPolicy,
    /// Maximum simulated time per unit.
    pub max_time: Option<f64>,
    /// Maximum age; each unit's horizon is shortened by its start age.
    pub max_age: Option<f64>,
    pub max_transitions: usize,
    pub seed: u64,
    pub sampler: SamplerSettings,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            clock: ClockPolicy::Reset,
            max_time: None,
            max_age: None,
            max_transitions: 10_000,
            seed: 0,
            sampler: SamplerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Absorbed,
    Censored,
}

/// One row of the flat transition table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub strategy_id: u64,
    pub patient_id: u64,
    pub sample: usize,
    pub from: usize,
    pub to: usize,
    pub time_start: f64,
    pub time_stop: f64,
    pub censored: bool,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub unit: UnitId,
    pub initial_state: usize,
    pub weight: f64,
    pub records: Vec<TransitionRecord>,
    pub outcome: Outcome,
}

impl Trajectory {
    /// State occupied after the last record.
    pub fn final_state(&self) -> usize {
        self.records.last().map_or(self.initial_state, |r| r.to)
    }
}

/// Every record of every trajectory, in trajectory order.
pub fn transition_table(trajectories: &[Trajectory]) -> impl Iterator<Item = &TransitionRecord> {
    trajectories.iter().flat_map(|t| t.records.iter())
}

pub struct Simulator<'a> {
    model: &'a TransitionModel,
    population: &'a Population,
    config: SimulationConfig,
    sampler: SurvivalSampler,
    horizons: Vec<f64>,
    n_samples: usize,
}

impl<'a> Simulator<'a> {
    /// Validates the model against the population and settings. All
    /// configuration faults surface here, before any unit is simulated.
    pub fn new(
        model: &'a TransitionModel,
        population: &'a Population,
        config: SimulationConfig,
    ) -> Result<Self, SimulationError> {
        let matrix = model.matrix();
        let n_states = matrix.n_states();
        if matrix.n_transitions() > 0 && population.len() != model.n_rows() {
            return Err(SimulationError::PopulationSize {
                expected: model.n_rows(),
                found: population.len(),
            });
        }
        for (row, entry) in population.rows().iter().enumerate() {
            if entry.initial_state >= n_states {
                return Err(SimulationError::InitialState {
                    row,
                    state: entry.initial_state,
                    n_states,
                });
            }
        }

        match &config.clock {
            ClockPolicy::PerEdge(clocks) if clocks.len() != matrix.n_transitions() => {
                return Err(SimulationError::ClockEdges {
                    expected: matrix.n_transitions(),
                    found: clocks.len(),
                });
            }
            ClockPolicy::Mixed { reset_states } => {
                if let Some(&state) = reset_states.iter().find(|&&s| s >= n_states) {
                    return Err(SimulationError::ClockState { state, n_states });
                }
            }
            _ => {}
        }
        for id in 1..=matrix.n_transitions() {
            let Some(((from, _), edge)) = matrix.edge(id).zip(model.edge_hazard(id)) else {
                continue;
            };
            let family = edge.spec.family();
            if config.clock.clock(id, from) == Clock::Forward && !family.supports_left_truncation() {
                return Err(SimulationError::UnsupportedClock {
                    edge: id,
                    family: family.name(),
                });
            }
        }

        let settings = config.sampler;
        for (name, value) in [
            ("max_time", config.max_time),
            ("max_horizon", Some(settings.max_horizon)),
        ] {
            if let Some(value) = value {
                if !(value > 0.0) {
                    return Err(SimulationError::InvalidLimit { name, value });
                }
            }
        }
        if config.max_transitions == 0 {
            return Err(SimulationError::InvalidLimit {
                name: "max_transitions",
                value: 0.0,
            });
        }
        let horizons = population
            .rows()
            .iter()
            .enumerate()
            .map(|(row, entry)| {
                let by_age = config.max_age.map(|max_age| max_age - entry.start_age);
                let horizon = match (config.max_time, by_age) {
                    (Some(max_time), Some(by_age)) => max_time.min(by_age),
                    (Some(limit), None) | (None, Some(limit)) => limit,
                    (None, None) => settings.max_horizon,
                };
                if horizon > 0.0 {
                    Ok(horizon)
                } else {
                    Err(SimulationError::NoTimeAtRisk { row, horizon })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let n_samples = if matrix.n_transitions() > 0 {
            model.n_samples()
        } else {
            1
        };
        Ok(Self {
            model,
            population,
            sampler: SurvivalSampler::new(settings),
            config,
            horizons,
            n_samples,
        })
    }

    pub fn n_units(&self) -> usize {
        self.population.len() * self.n_samples
    }

    pub fn horizon(&self, row: usize) -> Option<f64> {
        self.horizons.get(row).copied()
    }

    /// Simulates every unit in parallel. Output is ordered by population row,
    /// then parameter sample, whatever the scheduling.
    pub fn run(&self) -> Result<Vec<Trajectory>, SimulationError> {
        let n_units = self.n_units();
        log::info!(
            "Simulating {} units ({} population rows x {} parameter samples)",
            n_units,
            self.population.len(),
            self.n_samples
        );
        let start = Instant::now();
        let trajectories = (0..n_units)
            .into_par_iter()
            .map(|index| self.simulate_unit(index / self.n_samples, index % self.n_samples))
            .collect::<Result<Vec<_>, _>>()?;
        let censored = trajectories
            .iter()
            .filter(|t| t.outcome == Outcome::Censored)
            .count();
        log::info!(
            "Simulated {} units in {:.2?}: {} absorbed, {} censored",
            trajectories.len(),
            start.elapsed(),
            trajectories.len() - censored,
            censored
        );
        Ok(trajectories)
    }

    /// Simulates the unit for population `row` and parameter `sample`.
    pub fn simulate_unit(&self, row: usize, sample: usize) -> Result<Trajectory, SimulationError> {
        let (Some(entry), Some(&horizon)) = (self.population.rows().get(row), self.horizons.get(row))
        else {
            return Err(TransitionError::RowOutOfRange {
                row,
                n_rows: self.population.len(),
            }
            .into());
        };
        let unit = UnitId {
            strategy_id: entry.strategy_id,
            patient_id: entry.patient_id,
            sample,
        };
        let mut rng = unit_stream(self.config.seed, unit);
        let bound = self.model.bind(row, sample)?;
        let matrix = self.model.matrix();

        let mut records: Vec<TransitionRecord> = Vec::new();
        let mut state = entry.initial_state;
        let mut t = 0.0;
        let record = |from, to, time_start, time_stop, censored| TransitionRecord {
            strategy_id: unit.strategy_id,
            patient_id: unit.patient_id,
            sample,
            from,
            to,
            time_start,
            time_stop,
            censored,
            is_final: false,
        };

        let outcome = loop {
            let outgoing = bound.outgoing(state);
            if outgoing.is_empty() {
                break Outcome::Absorbed;
            }
            if records.len() >= self.config.max_transitions {
                return Err(SimulationError::TransitionLimit {
                    unit,
                    limit: self.config.max_transitions,
                });
            }

            let mut winner: Option<(f64, usize)> = None;
            for &id in outgoing {
                let clock = self.config.clock.clock(id, state);
                let (lower, upper) = match clock {
                    Clock::Reset => (0.0, horizon - t),
                    Clock::Forward => (t, horizon),
                };
                let draw = self
                    .sampler
                    .sample(bound.model(id), bound.sampling(id), lower, upper, &mut rng)
                    .map_err(|source| SimulationError::Sampling {
                        unit,
                        edge: id,
                        source,
                    })?;
                let Draw::Event(time) = draw else { continue };
                let sojourn = match clock {
                    Clock::Reset => time,
                    Clock::Forward => time - t,
                };
                if winner.is_none_or(|(best, _)| sojourn < best) {
                    winner = Some((sojourn, id));
                }
            }

            let next = winner.and_then(|(sojourn, id)| {
                let mut stop = t + sojourn;
                if stop <= t {
                    // Sojourn below the resolution of `t`.
                    stop = t + f64::EPSILON * t.max(1.0);
                }
                (stop < horizon).then_some((stop, id))
            });
            match next {
                Some((stop, id)) => {
                    let to = matrix.edge(id).map_or(state, |(_, to)| to);
                    records.push(record(state, to, t, stop, false));
                    t = stop;
                    state = to;
                }
                None => {
                    records.push(record(state, state, t, horizon, true));
                    break Outcome::Censored;
                }
            }
        };
        if let Some(last) = records.last_mut() {
            last.is_final = true;
        }

        Ok(Trajectory {
            unit,
            initial_state: entry.initial_state,
            weight: entry.weight,
            records,
            outcome,
        })
    }
}
