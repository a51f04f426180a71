//! Simulated population: one row per (strategy, patient) pair.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PopulationError {
    #[error("The population has no rows")]
    Empty,
    #[error("Row {row} has weight {weight}; weights must be finite and non-negative")]
    InvalidWeight { row: usize, weight: f64 },
    #[error("Row {row} has start age {age}; ages must be finite and non-negative")]
    InvalidAge { row: usize, age: f64 },
    #[error("Patient {patient_id} appears more than once in strategy {strategy_id}")]
    DuplicateUnit { strategy_id: u64, patient_id: u64 },
}

/// Identity of one simulated unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UnitId {
    pub strategy_id: u64,
    pub patient_id: u64,
    pub sample: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationRow {
    pub strategy_id: u64,
    pub patient_id: u64,
    pub initial_state: usize,
    #[serde(default)]
    pub start_age: f64,
    #[serde(default = "unit_weight")]
    pub weight: f64,
}

fn unit_weight() -> f64 {
    1.0
}

impl PopulationRow {
    pub fn new(strategy_id: u64, patient_id: u64, initial_state: usize) -> Self {
        Self {
            strategy_id,
            patient_id,
            initial_state,
            start_age: 0.0,
            weight: unit_weight(),
        }
    }
}

/// Ordered population rows. Row `i` lines up with row `i` of every edge's
/// covariate design matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    rows: Vec<PopulationRow>,
}

impl Population {
    pub fn new(rows: Vec<PopulationRow>) -> Result<Self, PopulationError> {
        if rows.is_empty() {
            return Err(PopulationError::Empty);
        }
        for (row, entry) in rows.iter().enumerate() {
            if !entry.weight.is_finite() || entry.weight < 0.0 {
                return Err(PopulationError::InvalidWeight {
                    row,
                    weight: entry.weight,
                });
            }
            if !entry.start_age.is_finite() || entry.start_age < 0.0 {
                return Err(PopulationError::InvalidAge {
                    row,
                    age: entry.start_age,
                });
            }
        }
        if let Some(duplicate) = rows
            .iter()
            .map(|r| (r.strategy_id, r.patient_id))
            .duplicates()
            .next()
        {
            return Err(PopulationError::DuplicateUnit {
                strategy_id: duplicate.0,
                patient_id: duplicate.1,
            });
        }
        Ok(Self { rows })
    }

    /// `n_patients` identical patients per strategy, all starting in
    /// `initial_state` at age 0 with unit weight.
    pub fn uniform(strategies: &[u64], n_patients: u64, initial_state: usize) -> Result<Self, PopulationError> {
        let rows = strategies
            .iter()
            .flat_map(|&strategy| {
                (1..=n_patients).map(move |patient| PopulationRow::new(strategy, patient, initial_state))
            })
            .collect();
        Self::new(rows)
    }

    pub fn rows(&self) -> &[PopulationRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct strategy ids in ascending order.
    pub fn strategies(&self) -> Vec<u64> {
        self.rows.iter().map(|r| r.strategy_id).sorted().dedup().collect()
    }
}
