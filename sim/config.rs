//! TOML model configuration.
//!
//! A configuration file describes one complete model: the transition matrix in
//! the `0 = no transition` integer encoding, one `[[edges]]` table per edge id
//! with its family and natural-scale parameter values per parameter sample, the
//! population, and the simulation and output settings.
//!
//! ```toml
//! seed = 2024
//! states = ["healthy", "sick", "dead"]
//! transitions = [[0, 1, 2], [3, 0, 4], [0, 0, 0]]
//!
//! [simulation]
//! clock = "reset"
//! max_time = 40.0
//!
//! [[edges]]
//! id = 1
//! family = "weibull"
//! parameters = [[1.3, 8.0], [1.2, 8.5]]
//!
//! [[population]]
//! strategy_id = 1
//! patient_id = 1
//! initial_state = 0
//!
//! [output]
//! times = [0.0, 5.0, 10.0]
//! ```
//!
//! Every edge uses an intercept-only design, so each population row shares the
//! edge's parameter samples.

use crate::hazard::Family;
use crate::params::{HazardSpec, ParameterError};
use crate::population::{Population, PopulationError, PopulationRow};
use crate::sampler::{SamplerSettings, SamplingMethod};
use crate::simulator::{Clock, ClockPolicy, SimulationConfig, SimulationError, Simulator};
use crate::transition::{EdgeHazard, TransitionError, TransitionMatrix, TransitionModel};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read model configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML model configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid transition structure: {0}")]
    Transition(#[from] TransitionError),
    #[error("Invalid parameters for edge {edge}: {source}")]
    Parameters {
        edge: usize,
        #[source]
        source: ParameterError,
    },
    #[error("Invalid population: {0}")]
    Population(#[from] PopulationError),
    #[error("{found} state names were given for a {expected}-state transition matrix")]
    StateNames { expected: usize, found: usize },
    #[error("Edge {edge} has unknown key '{key}' for the {family} family")]
    UnknownEdgeKey {
        edge: usize,
        family: &'static str,
        key: String,
    },
}

/// Keys every `[[edges]]` table may carry.
const EDGE_KEYS: [&str; 5] = ["id", "family", "parameters", "sampling", "clock"];

/// Auxiliary keys of `family` on top of [`EDGE_KEYS`].
fn family_keys(family: &Family) -> &'static [&'static str] {
    match family {
        Family::PiecewiseExponential { .. } => &["breaks"],
        Family::Spline { .. } => &["knots", "scale", "integration"],
        Family::FractionalPolynomial { .. } => &["powers", "integration"],
        _ => &[],
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub states: Vec<String>,
    pub transitions: Vec<Vec<usize>>,
    #[serde(default)]
    pub simulation: SimulationSection,
    #[serde(default)]
    pub sampler: SamplerSettings,
    pub edges: Vec<EdgeConfig>,
    pub population: Vec<PopulationRow>,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationSection {
    /// Global clock; individual edges may override it.
    #[serde(default)]
    pub clock: Option<Clock>,
    /// States whose outgoing edges run on the reset clock while every other
    /// edge runs forward.
    #[serde(default)]
    pub reset_states: Option<Vec<usize>>,
    pub max_time: Option<f64>,
    pub max_age: Option<f64>,
    #[serde(default = "default_max_transitions")]
    pub max_transitions: usize,
}

fn default_max_transitions() -> usize {
    SimulationConfig::default().max_transitions
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            clock: None,
            reset_states: None,
            max_time: None,
            max_age: None,
            max_transitions: default_max_transitions(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeConfig {
    pub id: usize,
    #[serde(flatten)]
    pub family: Family,
    /// Natural-scale parameter values, one inner list per parameter sample.
    pub parameters: Vec<Vec<f64>>,
    #[serde(default)]
    pub sampling: SamplingMethod,
    #[serde(default)]
    pub clock: Option<Clock>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Query times for state-occupancy probabilities.
    #[serde(default)]
    pub times: Vec<f64>,
    /// Restriction time for expected time in each state.
    pub restriction: Option<f64>,
}

/// A configuration turned into validated model objects.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub states: Vec<String>,
    pub transitions: TransitionModel,
    pub population: Population,
    pub simulation: SimulationConfig,
    pub output: OutputConfig,
}

impl LoadedModel {
    pub fn simulator(&self) -> Result<Simulator<'_>, SimulationError> {
        Simulator::new(&self.transitions, &self.population, self.simulation.clone())
    }

    /// Display name of `state`, falling back to its index.
    pub fn state_name(&self, state: usize) -> String {
        self.states
            .get(state)
            .cloned()
            .unwrap_or_else(|| state.to_string())
    }
}

impl ModelConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml(&toml_string)
    }

    pub fn from_toml(toml_string: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_string)?;
        // Edge tables flatten the family tag, so serde cannot reject stray keys.
        let raw: toml::Table = toml::from_str(toml_string)?;
        let raw_edges = raw
            .get("edges")
            .and_then(toml::Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        for (edge, raw_edge) in config.edges.iter().zip(raw_edges) {
            let Some(table) = raw_edge.as_table() else {
                continue;
            };
            let allowed = family_keys(&edge.family);
            if let Some(key) = table
                .keys()
                .find(|key| !EDGE_KEYS.contains(&key.as_str()) && !allowed.contains(&key.as_str()))
            {
                return Err(ConfigError::UnknownEdgeKey {
                    edge: edge.id,
                    family: edge.family.name(),
                    key: key.clone(),
                });
            }
        }
        Ok(config)
    }

    pub fn build(&self) -> Result<LoadedModel, ConfigError> {
        let matrix = TransitionMatrix::from_ids(&self.transitions)?;
        if !self.states.is_empty() && self.states.len() != matrix.n_states() {
            return Err(ConfigError::StateNames {
                expected: matrix.n_states(),
                found: self.states.len(),
            });
        }
        let population = Population::new(self.population.clone())?;

        let hazards = self
            .edges
            .iter()
            .map(|edge| {
                HazardSpec::from_samples(edge.family.clone(), &edge.parameters, edge.sampling)
                    .map(|spec| (edge.id, EdgeHazard::intercept(spec, population.len())))
                    .map_err(|source| ConfigError::Parameters {
                        edge: edge.id,
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let clock = self.clock_policy(&matrix);
        let transitions = TransitionModel::new(matrix, hazards)?;

        let simulation = SimulationConfig {
            clock,
            max_time: self.simulation.max_time,
            max_age: self.simulation.max_age,
            max_transitions: self.simulation.max_transitions,
            seed: self.seed,
            sampler: self.sampler,
        };
        log::info!(
            "Loaded model: {} states, {} edges, {} population rows, {} parameter samples",
            transitions.matrix().n_states(),
            transitions.matrix().n_transitions(),
            population.len(),
            transitions.n_samples()
        );
        Ok(LoadedModel {
            states: self.states.clone(),
            transitions,
            population,
            simulation,
            output: self.output.clone(),
        })
    }

    fn clock_policy(&self, matrix: &TransitionMatrix) -> ClockPolicy {
        let global = match (&self.simulation.reset_states, self.simulation.clock) {
            (Some(reset_states), _) => ClockPolicy::Mixed {
                reset_states: reset_states.clone(),
            },
            (None, Some(Clock::Forward)) => ClockPolicy::Forward,
            (None, _) => ClockPolicy::Reset,
        };
        if self.edges.iter().all(|e| e.clock.is_none()) {
            return global;
        }
        let clocks = (1..=matrix.n_transitions())
            .map(|id| {
                let from = matrix.edge(id).map_or(0, |(from, _)| from);
                self.edges
                    .iter()
                    .find(|e| e.id == id)
                    .and_then(|e| e.clock)
                    .unwrap_or_else(|| global.clock(id, from))
            })
            .collect();
        ClockPolicy::PerEdge(clocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazard::{Integration, QuadratureTolerance, SplineScale};

    const ILLNESS_DEATH: &str = r#"
        seed = 7
        states = ["healthy", "sick", "dead"]
        transitions = [[0, 1, 2], [3, 0, 4], [0, 0, 0]]

        [simulation]
        clock = "forward"
        max_time = 30.0

        [sampler]
        max_horizon = 500.0

        [[edges]]
        id = 1
        family = "weibull"
        parameters = [[1.3, 8.0], [1.2, 8.5]]

        [[edges]]
        id = 2
        family = "gompertz"
        parameters = [[0.05, 0.01], [0.04, 0.012]]

        [[edges]]
        id = 3
        family = "spline"
        knots = [-1.0, 1.0, 3.0]
        integration = { method = "riemann", step = 0.05 }
        sampling = { method = "discrete_inversion", step = 0.05 }
        parameters = [[-2.0, 1.1, 0.01], [-2.1, 1.0, 0.02]]
        clock = "reset"

        [[edges]]
        id = 4
        family = "exponential"
        parameters = [[0.3], [0.25]]

        [[population]]
        strategy_id = 1
        patient_id = 1
        initial_state = 0
        start_age = 60.0

        [[population]]
        strategy_id = 2
        patient_id = 1
        initial_state = 0
        weight = 2.0

        [output]
        times = [0.0, 10.0, 20.0]
        restriction = 20.0
    "#;

    #[test]
    fn illness_death_configuration_builds() {
        let config = ModelConfig::from_toml(ILLNESS_DEATH).unwrap();
        assert_eq!(config.edges.len(), 4);
        match &config.edges[2].family {
            Family::Spline {
                knots,
                scale,
                integration,
            } => {
                assert_eq!(knots.len(), 3);
                assert_eq!(*scale, SplineScale::LogCumHazard);
                assert_eq!(*integration, Integration::Riemann { step: 0.05 });
            }
            other => panic!("unexpected family {other:?}"),
        }
        assert_eq!(
            config.edges[2].sampling,
            SamplingMethod::DiscreteInversion { step: 0.05 }
        );

        let model = config.build().unwrap();
        assert_eq!(model.transitions.n_samples(), 2);
        assert_eq!(model.population.len(), 2);
        assert_eq!(model.population.rows()[1].weight, 2.0);
        assert_eq!(model.simulation.sampler.max_horizon, 500.0);
        assert_eq!(
            model.simulation.clock,
            ClockPolicy::PerEdge(vec![
                Clock::Forward,
                Clock::Forward,
                Clock::Reset,
                Clock::Forward
            ])
        );
        assert_eq!(model.state_name(1), "sick");
        assert!(model.simulator().is_ok());
    }

    #[test]
    fn parameter_errors_name_the_edge() {
        let broken = ILLNESS_DEATH.replace("parameters = [[0.3], [0.25]]", "parameters = [[0.3], [-0.25]]");
        let config = ModelConfig::from_toml(&broken).unwrap();
        match config.build().unwrap_err() {
            ConfigError::Parameters { edge, .. } => assert_eq!(edge, 4),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn state_names_must_match_the_matrix() {
        let broken = ILLNESS_DEATH.replace(r#"states = ["healthy", "sick", "dead"]"#, r#"states = ["alive", "dead"]"#);
        assert!(matches!(
            ModelConfig::from_toml(&broken).unwrap().build(),
            Err(ConfigError::StateNames {
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn misspelled_edge_keys_are_rejected() {
        let broken = ILLNESS_DEATH.replace(
            "integration = { method = \"riemann\", step = 0.05 }",
            "integraton = { method = \"riemann\", step = 0.05 }",
        );
        match ModelConfig::from_toml(&broken).unwrap_err() {
            ConfigError::UnknownEdgeKey { edge, family, key } => {
                assert_eq!(edge, 3);
                assert_eq!(family, "spline");
                assert_eq!(key, "integraton");
            }
            other => panic!("unexpected error {other:?}"),
        }

        // Auxiliary keys of one family are stray keys on another.
        let broken = ILLNESS_DEATH.replace(
            "parameters = [[0.3], [0.25]]",
            "knots = [0.0, 1.0]\n        parameters = [[0.3], [0.25]]",
        );
        assert!(matches!(
            ModelConfig::from_toml(&broken),
            Err(ConfigError::UnknownEdgeKey { edge: 4, key, .. }) if key == "knots"
        ));
    }

    #[test]
    fn quadrature_tolerances_are_configurable() {
        let tuned = ILLNESS_DEATH
            .replace(
                "max_horizon = 500.0",
                "max_horizon = 500.0\n        quadrature = { relative = 1e-8, max_subintervals = 800 }",
            )
            .replace(
                "integration = { method = \"riemann\", step = 0.05 }",
                "integration = { method = \"quadrature\", tolerance = { relative = 1e-9, absolute = 1e-12 } }",
            );
        let config = ModelConfig::from_toml(&tuned).unwrap();
        assert_eq!(
            config.sampler.quadrature,
            QuadratureTolerance {
                relative: 1e-8,
                absolute: 1e-10,
                max_subintervals: 800,
            }
        );
        match &config.edges[2].family {
            Family::Spline { integration, .. } => assert_eq!(
                *integration,
                Integration::Quadrature {
                    tolerance: QuadratureTolerance {
                        relative: 1e-9,
                        absolute: 1e-12,
                        max_subintervals: 500,
                    }
                }
            ),
            other => panic!("unexpected family {other:?}"),
        }
        let model = config.build().unwrap();
        assert_eq!(model.simulation.sampler.quadrature.relative, 1e-8);
        assert!(model.simulator().unwrap().run().is_ok());

        let bare = ILLNESS_DEATH.replace(
            "integration = { method = \"riemann\", step = 0.05 }",
            "integration = { method = \"quadrature\" }",
        );
        match &ModelConfig::from_toml(&bare).unwrap().edges[2].family {
            Family::Spline { integration, .. } => {
                assert_eq!(*integration, Integration::quadrature())
            }
            other => panic!("unexpected family {other:?}"),
        }

        let invalid = ILLNESS_DEATH.replace(
            "integration = { method = \"riemann\", step = 0.05 }",
            "integration = { method = \"quadrature\", tolerance = { relative = -1.0 } }",
        );
        assert!(matches!(
            ModelConfig::from_toml(&invalid).unwrap().build(),
            Err(ConfigError::Parameters { edge: 3, .. })
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            ModelConfig::from_toml("transitions = [[0, 1]"),
            Err(ConfigError::Toml(_))
        ));
    }
}
