//! Transition topology and per-edge hazard bindings.

use crate::hazard::{HazardError, HazardModel};
use crate::params::{HazardSpec, ParameterError};
use crate::sampler::SamplingMethod;
use ndarray::Array2;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("Transition matrix row {row} has {found} entries, expected {expected}")]
    NotSquare {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Transition matrix has no states")]
    NoStates,
    #[error("State {0} has a transition to itself")]
    SelfTransition(usize),
    #[error("Edge id {id} at ({from}, {to}) is outside 1..={n_transitions}")]
    EdgeIdOutOfRange {
        id: usize,
        from: usize,
        to: usize,
        n_transitions: usize,
    },
    #[error("Edge id {0} appears more than once in the transition matrix")]
    DuplicateEdgeId(usize),
    #[error("Edge {0} has no hazard specification")]
    MissingHazard(usize),
    #[error("A hazard specification was given for edge {0}, which is not in the transition matrix")]
    UnknownEdge(usize),
    #[error("Edge {0} has more than one hazard specification")]
    DuplicateHazard(usize),
    #[error("Edge {edge} has {coefficients} coefficient columns but {design} design columns")]
    CovariateMismatch {
        edge: usize,
        coefficients: usize,
        design: usize,
    },
    #[error("Edge {edge} has {found} design rows, expected {expected}")]
    RowMismatch {
        edge: usize,
        expected: usize,
        found: usize,
    },
    #[error("Edge {edge} has {found} parameter samples, expected {expected}")]
    SampleMismatch {
        edge: usize,
        expected: usize,
        found: usize,
    },
    #[error("State {state} is out of range for {n_states} states")]
    StateOutOfRange { state: usize, n_states: usize },
    #[error("Row {row} is out of range for {n_rows} design rows")]
    RowOutOfRange { row: usize, n_rows: usize },
    #[error("Failed to bind edge {edge}: {source}")]
    Binding {
        edge: usize,
        #[source]
        source: ParameterError,
    },
}

/// Square state-transition matrix. Entry `(r, s)` is the id of the edge from
/// `r` to `s`, or `None`. Edge ids are a bijection onto `1..=E`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    entries: Array2<Option<usize>>,
    /// `(from, to)` of edge `id` at index `id - 1`.
    edges: Vec<(usize, usize)>,
    /// Outgoing edge ids per state, ascending.
    outgoing: Vec<Vec<usize>>,
}

impl TransitionMatrix {
    pub fn from_rows(rows: Vec<Vec<Option<usize>>>) -> Result<Self, TransitionError> {
        let n = rows.len();
        if n == 0 {
            return Err(TransitionError::NoStates);
        }
        for (row, entries) in rows.iter().enumerate() {
            if entries.len() != n {
                return Err(TransitionError::NotSquare {
                    row,
                    expected: n,
                    found: entries.len(),
                });
            }
        }

        let n_transitions = rows.iter().flatten().filter(|e| e.is_some()).count();
        let mut edges = vec![None; n_transitions];
        let mut outgoing = vec![Vec::new(); n];
        for (from, entries) in rows.iter().enumerate() {
            for (to, entry) in entries.iter().enumerate() {
                let Some(id) = *entry else { continue };
                if from == to {
                    return Err(TransitionError::SelfTransition(from));
                }
                if id == 0 || id > n_transitions {
                    return Err(TransitionError::EdgeIdOutOfRange {
                        id,
                        from,
                        to,
                        n_transitions,
                    });
                }
                if edges[id - 1].replace((from, to)).is_some() {
                    return Err(TransitionError::DuplicateEdgeId(id));
                }
                outgoing[from].push(id);
            }
        }
        for ids in &mut outgoing {
            ids.sort_unstable();
        }
        // Range and uniqueness together make every slot filled.
        let edges = edges.into_iter().flatten().collect();
        let entries = Array2::from_shape_fn((n, n), |(r, s)| rows[r][s]);
        Ok(Self {
            entries,
            edges,
            outgoing,
        })
    }

    /// Builds a matrix from the `0 = no transition` integer encoding.
    pub fn from_ids(rows: &[Vec<usize>]) -> Result<Self, TransitionError> {
        Self::from_rows(
            rows.iter()
                .map(|row| row.iter().map(|&id| (id != 0).then_some(id)).collect())
                .collect(),
        )
    }

    pub fn n_states(&self) -> usize {
        self.entries.nrows()
    }

    pub fn n_transitions(&self) -> usize {
        self.edges.len()
    }

    /// Outgoing edge ids of `state` in ascending order.
    pub fn outgoing(&self, state: usize) -> &[usize] {
        self.outgoing.get(state).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `(from, to)` of edge `id`.
    pub fn edge(&self, id: usize) -> Option<(usize, usize)> {
        id.checked_sub(1).and_then(|index| self.edges.get(index)).copied()
    }

    pub fn is_absorbing(&self, state: usize) -> bool {
        self.outgoing(state).is_empty()
    }
}

/// Hazard specification of one edge plus its covariate design matrix
/// (one row per population row).
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeHazard {
    pub spec: HazardSpec,
    pub design: Array2<f64>,
}

impl EdgeHazard {
    pub fn new(spec: HazardSpec, design: Array2<f64>) -> Self {
        Self { spec, design }
    }

    /// Intercept-only design for `n_rows` population rows.
    pub fn intercept(spec: HazardSpec, n_rows: usize) -> Self {
        Self::new(spec, Array2::ones((n_rows, 1)))
    }
}

/// A transition matrix with one bound hazard specification per edge.
#[derive(Debug, Clone)]
pub struct TransitionModel {
    matrix: TransitionMatrix,
    /// Edge `id` at index `id - 1`.
    edges: Vec<EdgeHazard>,
    n_rows: usize,
    n_samples: usize,
}

impl TransitionModel {
    pub fn new(
        matrix: TransitionMatrix,
        hazards: Vec<(usize, EdgeHazard)>,
    ) -> Result<Self, TransitionError> {
        let mut slots: Vec<Option<EdgeHazard>> = vec![None; matrix.n_transitions()];
        for (id, hazard) in hazards {
            let slot = id
                .checked_sub(1)
                .and_then(|index| slots.get_mut(index))
                .ok_or(TransitionError::UnknownEdge(id))?;
            if slot.replace(hazard).is_some() {
                return Err(TransitionError::DuplicateHazard(id));
            }
        }
        let edges = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or(TransitionError::MissingHazard(index + 1)))
            .collect::<Result<Vec<_>, _>>()?;

        let (n_rows, n_samples) = edges
            .first()
            .map_or((0, 0), |e| (e.design.nrows(), e.spec.n_samples()));
        for (index, edge) in edges.iter().enumerate() {
            let id = index + 1;
            if edge.spec.n_covariates() != edge.design.ncols() {
                return Err(TransitionError::CovariateMismatch {
                    edge: id,
                    coefficients: edge.spec.n_covariates(),
                    design: edge.design.ncols(),
                });
            }
            if edge.design.nrows() != n_rows {
                return Err(TransitionError::RowMismatch {
                    edge: id,
                    expected: n_rows,
                    found: edge.design.nrows(),
                });
            }
            if edge.spec.n_samples() != n_samples {
                return Err(TransitionError::SampleMismatch {
                    edge: id,
                    expected: n_samples,
                    found: edge.spec.n_samples(),
                });
            }
        }

        log::debug!(
            "Transition model: {} states, {} edges, {} design rows, {} parameter samples",
            matrix.n_states(),
            edges.len(),
            n_rows,
            n_samples
        );
        Ok(Self {
            matrix,
            edges,
            n_rows,
            n_samples,
        })
    }

    pub fn matrix(&self) -> &TransitionMatrix {
        &self.matrix
    }

    /// Design rows shared by every edge; zero when the matrix has no edges.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Parameter samples shared by every edge; zero when the matrix has no edges.
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn edge_hazard(&self, id: usize) -> Option<&EdgeHazard> {
        id.checked_sub(1).and_then(|index| self.edges.get(index))
    }

    pub fn outgoing(&self, state: usize) -> &[usize] {
        self.matrix.outgoing(state)
    }

    /// Hazard models of every edge for one design row and parameter sample.
    pub fn bind(&self, row: usize, sample: usize) -> Result<BoundTransitions<'_>, TransitionError> {
        if !self.edges.is_empty() && row >= self.n_rows {
            return Err(TransitionError::RowOutOfRange {
                row,
                n_rows: self.n_rows,
            });
        }
        let models = self
            .edges
            .iter()
            .enumerate()
            .map(|(index, edge)| {
                edge.spec
                    .model(sample, edge.design.row(row))
                    .map_err(|source| TransitionError::Binding {
                        edge: index + 1,
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BoundTransitions { model: self, models })
    }
}

/// Hazard models of every edge bound for one unit.
#[derive(Debug, Clone)]
pub struct BoundTransitions<'a> {
    model: &'a TransitionModel,
    models: Vec<HazardModel>,
}

impl BoundTransitions<'_> {
    pub fn outgoing(&self, state: usize) -> &[usize] {
        self.model.outgoing(state)
    }

    /// Panics if `id` is not an edge of the matrix.
    pub fn model(&self, id: usize) -> &HazardModel {
        &self.models[id - 1]
    }

    pub fn sampling(&self, id: usize) -> SamplingMethod {
        self.model.edges[id - 1].spec.sampling()
    }

    /// `(to_state, hazard)` for every edge leaving `state`, in edge-id order.
    pub fn hazard(&self, state: usize, t: f64) -> Result<Vec<(usize, f64)>, HazardError> {
        self.over_outgoing(state, |m| m.hazard(t))
    }

    /// `(to_state, H(t0, t1))` for every edge leaving `state`, in edge-id order.
    pub fn cumulative_hazard(
        &self,
        state: usize,
        t0: f64,
        t1: f64,
    ) -> Result<Vec<(usize, f64)>, HazardError> {
        self.over_outgoing(state, |m| m.cumulative_hazard(t0, t1))
    }

    fn over_outgoing<F>(&self, state: usize, mut f: F) -> Result<Vec<(usize, f64)>, HazardError>
    where
        F: FnMut(&HazardModel) -> Result<f64, HazardError>,
    {
        self.outgoing(state)
            .iter()
            .map(|&id| {
                let (_, to) = self.model.matrix.edges[id - 1];
                Ok((to, f(self.model(id))?))
            })
            .collect()
    }
}
