//! Struct-of-arrays parameter store for one edge.
//!
//! Each distribution parameter owns a coefficient matrix with one row per
//! parameter sample and one column per covariate. The natural-scale value of
//! parameter `k` for a unit is `link_k^-1(x · beta_k[sample])`.

use crate::hazard::{Family, HazardError, HazardModel};
use crate::sampler::{SamplingError, SamplingMethod};
use ndarray::{Array2, ArrayView1};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("The {family} family needs {expected} coefficient blocks, got {found}")]
    BlockCount {
        family: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Coefficient block {index} has shape {rows}x{columns}, but block 0 is {expected_rows}x{expected_columns}")]
    BlockShape {
        index: usize,
        rows: usize,
        columns: usize,
        expected_rows: usize,
        expected_columns: usize,
    },
    #[error("At least one parameter sample and one covariate column are required")]
    Empty,
    #[error("Sample {sample} gives {found} natural-scale values for the {family} family, which has {expected} parameters")]
    SampleLength {
        family: &'static str,
        sample: usize,
        expected: usize,
        found: usize,
    },
    #[error("Sample {sample} of the {family} family has a value {value} for parameter {index} outside its link's domain")]
    OutsideLinkDomain {
        family: &'static str,
        sample: usize,
        index: usize,
        value: f64,
    },
    #[error("Sample index {sample} is out of range for {n_samples} samples")]
    SampleOutOfRange { sample: usize, n_samples: usize },
    #[error("Covariate row has {found} columns, but the coefficients have {expected}")]
    CovariateLength { expected: usize, found: usize },
    #[error(transparent)]
    Hazard(#[from] HazardError),
    #[error(transparent)]
    Sampling(#[from] SamplingError),
}

/// Everything needed to build the hazard of one edge for any unit.
#[derive(Debug, Clone, PartialEq)]
pub struct HazardSpec {
    family: Family,
    coefficients: Vec<Array2<f64>>,
    sampling: SamplingMethod,
}

impl HazardSpec {
    pub fn new(
        family: Family,
        coefficients: Vec<Array2<f64>>,
        sampling: SamplingMethod,
    ) -> Result<Self, ParameterError> {
        family.validate()?;
        sampling.validate()?;
        let expected = family.n_parameters();
        if coefficients.len() != expected {
            return Err(ParameterError::BlockCount {
                family: family.name(),
                expected,
                found: coefficients.len(),
            });
        }
        let (rows, columns) = coefficients[0].dim();
        if rows == 0 || columns == 0 {
            return Err(ParameterError::Empty);
        }
        for (index, block) in coefficients.iter().enumerate() {
            if block.dim() != (rows, columns) {
                return Err(ParameterError::BlockShape {
                    index,
                    rows: block.nrows(),
                    columns: block.ncols(),
                    expected_rows: rows,
                    expected_columns: columns,
                });
            }
        }
        Ok(Self {
            family,
            coefficients,
            sampling,
        })
    }

    /// Intercept-only spec from natural-scale parameter values, one inner
    /// vector per parameter sample.
    pub fn from_samples(
        family: Family,
        samples: &[Vec<f64>],
        sampling: SamplingMethod,
    ) -> Result<Self, ParameterError> {
        let expected = family.n_parameters();
        let mut coefficients = vec![Array2::zeros((samples.len(), 1)); expected];
        for (sample, values) in samples.iter().enumerate() {
            if values.len() != expected {
                return Err(ParameterError::SampleLength {
                    family: family.name(),
                    sample,
                    expected,
                    found: values.len(),
                });
            }
            for (index, &value) in values.iter().enumerate() {
                let eta = family.link(index).apply(value);
                if eta.is_nan() {
                    return Err(ParameterError::OutsideLinkDomain {
                        family: family.name(),
                        sample,
                        index,
                        value,
                    });
                }
                coefficients[index][[sample, 0]] = eta;
            }
        }
        Self::new(family, coefficients, sampling)
    }

    /// Single-sample intercept-only spec.
    pub fn constant(family: Family, values: &[f64]) -> Result<Self, ParameterError> {
        Self::from_samples(family, &[values.to_vec()], SamplingMethod::default())
    }

    pub fn family(&self) -> &Family {
        &self.family
    }

    pub fn sampling(&self) -> SamplingMethod {
        self.sampling
    }

    pub fn n_samples(&self) -> usize {
        self.coefficients[0].nrows()
    }

    pub fn n_covariates(&self) -> usize {
        self.coefficients[0].ncols()
    }

    /// Natural-scale parameter values for one sample and covariate row.
    pub fn parameters(
        &self,
        sample: usize,
        covariates: ArrayView1<f64>,
    ) -> Result<Vec<f64>, ParameterError> {
        if sample >= self.n_samples() {
            return Err(ParameterError::SampleOutOfRange {
                sample,
                n_samples: self.n_samples(),
            });
        }
        if covariates.len() != self.n_covariates() {
            return Err(ParameterError::CovariateLength {
                expected: self.n_covariates(),
                found: covariates.len(),
            });
        }
        Ok(self
            .coefficients
            .iter()
            .enumerate()
            .map(|(index, block)| {
                let eta = block.row(sample).dot(&covariates);
                self.family.link(index).inverse(eta)
            })
            .collect())
    }

    pub fn model(
        &self,
        sample: usize,
        covariates: ArrayView1<f64>,
    ) -> Result<HazardModel, ParameterError> {
        let parameters = self.parameters(sample, covariates)?;
        Ok(self.family.build(&parameters)?)
    }
}
