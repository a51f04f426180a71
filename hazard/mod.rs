//! Hazard and cumulative-hazard evaluators for the supported survival-time families.
//!
//! Every family is a variant of the closed [`HazardModel`] enum carrying its own
//! natural-scale parameters. Families are selected by a [`Family`] tag, which also
//! carries the auxiliary configuration (knots, powers, breakpoints, integration
//! method) and knows how to map linear-predictor values onto the natural scale.
//!
//! Closed-form families evaluate `H(t)` analytically. Flexible families (restricted
//! cubic splines and fractional polynomials) integrate their hazard numerically
//! with either a fixed-step Riemann sum or adaptive Gauss-Kronrod quadrature.

pub mod flexible;
pub mod integrate;
pub mod parametric;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use flexible::{FractionalPolynomial, RestrictedCubicSpline, SplineScale};
pub use integrate::{Integration, QuadratureTolerance};
pub use parametric::{
    Exponential, GeneralizedGamma, Gamma, Gompertz, LogLogistic, LogNormal, PiecewiseExponential,
    Weibull, WeibullPh,
};

/// Errors raised while building or evaluating a hazard model.
///
/// Parameter and auxiliary-configuration errors are configuration faults; the
/// evaluation variants flag a numerical-domain bug. None of them is retried.
#[derive(Debug, Error)]
pub enum HazardError {
    #[error("Parameter '{name}' of the {family} family must be {requirement}, got {value}")]
    InvalidParameter {
        family: &'static str,
        name: &'static str,
        requirement: &'static str,
        value: f64,
    },
    #[error("The {family} family expects {expected} parameters, got {found}")]
    ParameterCount {
        family: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Invalid auxiliary configuration for the {family} family: {reason}")]
    InvalidAuxiliary { family: &'static str, reason: String },
    #[error("The {quantity} of the {family} family evaluated to {value} at t = {time}")]
    InvalidEvaluation {
        family: &'static str,
        quantity: &'static str,
        time: f64,
        value: f64,
    },
    #[error("Evaluation interval [{start}, {stop}] is not a valid sub-interval of [0, inf)")]
    InvalidInterval { start: f64, stop: f64 },
    #[error("The {0} family is a point mass and has no hazard function")]
    PointMass(&'static str),
}

/// Link connecting a linear predictor to a natural-scale distribution parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    /// Natural parameter is `exp(eta)`; used for strictly positive parameters.
    Log,
    /// Natural parameter is `eta`.
    Identity,
}

impl Link {
    #[inline]
    pub fn inverse(self, eta: f64) -> f64 {
        match self {
            Link::Log => eta.exp(),
            Link::Identity => eta,
        }
    }

    #[inline]
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Link::Log => value.ln(),
            Link::Identity => value,
        }
    }
}

/// Family tag plus the auxiliary configuration each family needs.
///
/// This is the serialisable half of a hazard specification: the parameter values
/// themselves live in the parameter store and are bound per simulated unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Family {
    Exponential,
    /// Accelerated-failure-time Weibull with `H(t) = (t / scale)^shape`.
    Weibull,
    /// Proportional-hazards Weibull with `H(t) = scale * t^shape`.
    WeibullPh,
    Gompertz,
    Gamma,
    LogNormal,
    LogLogistic,
    /// Prentice's generalized gamma (`mu`, `sigma`, `q`).
    GeneralizedGamma,
    PiecewiseExponential {
        /// Interval start times; the first must be 0.
        breaks: Vec<f64>,
    },
    Spline {
        /// Boundary and interior knots on the log-time scale.
        knots: Vec<f64>,
        #[serde(default)]
        scale: SplineScale,
        #[serde(default)]
        integration: Integration,
    },
    FractionalPolynomial {
        powers: Vec<f64>,
        #[serde(default)]
        integration: Integration,
    },
    /// Deterministic sojourn of length `duration`.
    Fixed,
}

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Family::Exponential => "exponential",
            Family::Weibull => "weibull",
            Family::WeibullPh => "weibull_ph",
            Family::Gompertz => "gompertz",
            Family::Gamma => "gamma",
            Family::LogNormal => "log_normal",
            Family::LogLogistic => "log_logistic",
            Family::GeneralizedGamma => "generalized_gamma",
            Family::PiecewiseExponential { .. } => "piecewise_exponential",
            Family::Spline { .. } => "spline",
            Family::FractionalPolynomial { .. } => "fractional_polynomial",
            Family::Fixed => "fixed",
        }
    }

    /// Number of distribution parameters (and therefore coefficient blocks).
    pub fn n_parameters(&self) -> usize {
        match self {
            Family::Exponential | Family::Fixed => 1,
            Family::Weibull
            | Family::WeibullPh
            | Family::Gompertz
            | Family::Gamma
            | Family::LogNormal
            | Family::LogLogistic => 2,
            Family::GeneralizedGamma => 3,
            Family::PiecewiseExponential { breaks } => breaks.len(),
            Family::Spline { knots, .. } => knots.len(),
            Family::FractionalPolynomial { powers, .. } => powers.len() + 1,
        }
    }

    /// Link function of the `index`-th parameter.
    pub fn link(&self, index: usize) -> Link {
        match (self, index) {
            (Family::Gompertz, 0) => Link::Identity,
            (Family::LogNormal, 0) => Link::Identity,
            (Family::GeneralizedGamma, 0) | (Family::GeneralizedGamma, 2) => Link::Identity,
            (Family::Spline { .. }, _) | (Family::FractionalPolynomial { .. }, _) => Link::Identity,
            _ => Link::Log,
        }
    }

    /// Whether draws from this family can be conditioned on survival to a
    /// non-zero lower bound, which the clock-forward convention requires.
    pub fn supports_left_truncation(&self) -> bool {
        !matches!(self, Family::Fixed)
    }

    /// Checks the auxiliary configuration independently of any parameter values.
    pub fn validate(&self) -> Result<(), HazardError> {
        match self {
            Family::PiecewiseExponential { breaks } => {
                parametric::validate_breaks(breaks)
            }
            Family::Spline {
                knots, integration, ..
            } => {
                flexible::validate_knots(knots)?;
                integration.validate(self.name())
            }
            Family::FractionalPolynomial {
                powers,
                integration,
            } => {
                flexible::validate_powers(powers)?;
                integration.validate(self.name())
            }
            _ => Ok(()),
        }
    }

    /// Builds a hazard model from natural-scale parameter values.
    pub fn build(&self, params: &[f64]) -> Result<HazardModel, HazardError> {
        let expected = self.n_parameters();
        if params.len() != expected {
            return Err(HazardError::ParameterCount {
                family: self.name(),
                expected,
                found: params.len(),
            });
        }
        let model = match self {
            Family::Exponential => HazardModel::Exponential(Exponential::new(params[0])?),
            Family::Weibull => HazardModel::Weibull(Weibull::new(params[0], params[1])?),
            Family::WeibullPh => HazardModel::WeibullPh(WeibullPh::new(params[0], params[1])?),
            Family::Gompertz => HazardModel::Gompertz(Gompertz::new(params[0], params[1])?),
            Family::Gamma => HazardModel::Gamma(Gamma::new(params[0], params[1])?),
            Family::LogNormal => HazardModel::LogNormal(LogNormal::new(params[0], params[1])?),
            Family::LogLogistic => {
                HazardModel::LogLogistic(LogLogistic::new(params[0], params[1])?)
            }
            Family::GeneralizedGamma => HazardModel::GeneralizedGamma(GeneralizedGamma::new(
                params[0], params[1], params[2],
            )?),
            Family::PiecewiseExponential { breaks } => HazardModel::PiecewiseExponential(
                PiecewiseExponential::new(params.to_vec(), breaks.clone())?,
            ),
            Family::Spline {
                knots,
                scale,
                integration,
            } => HazardModel::Spline(RestrictedCubicSpline::new(
                params.to_vec(),
                knots.clone(),
                *scale,
                *integration,
            )?),
            Family::FractionalPolynomial {
                powers,
                integration,
            } => HazardModel::FractionalPolynomial(FractionalPolynomial::new(
                params.to_vec(),
                powers.clone(),
                *integration,
            )?),
            Family::Fixed => {
                let duration = params[0];
                if !duration.is_finite() || duration <= 0.0 {
                    return Err(HazardError::InvalidParameter {
                        family: "fixed",
                        name: "duration",
                        requirement: "positive and finite",
                        value: duration,
                    });
                }
                HazardModel::Fixed { duration }
            }
        };
        Ok(model)
    }
}

/// Result of inverting a cumulative hazard in closed form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Inverse {
    /// The time at which the cumulative hazard from 0 reaches the requested level.
    At(f64),
    /// The cumulative hazard plateaus below the requested level (e.g. a cure fraction).
    Unreachable,
}

/// Closed-form building block shared by the parametric families.
///
/// `cumulative_hazard` is measured from time 0.
pub(crate) trait ClosedForm {
    fn hazard(&self, t: f64) -> f64;
    fn cumulative_hazard(&self, t: f64) -> f64;
    fn inverse_cumulative_hazard(&self, h: f64) -> Option<Inverse>;
}

/// A survival-time distribution with its parameters bound.
#[derive(Debug, Clone, PartialEq)]
pub enum HazardModel {
    Exponential(Exponential),
    Weibull(Weibull),
    WeibullPh(WeibullPh),
    Gompertz(Gompertz),
    Gamma(Gamma),
    LogNormal(LogNormal),
    LogLogistic(LogLogistic),
    GeneralizedGamma(GeneralizedGamma),
    PiecewiseExponential(PiecewiseExponential),
    Spline(RestrictedCubicSpline),
    FractionalPolynomial(FractionalPolynomial),
    Fixed { duration: f64 },
}

impl HazardModel {
    pub fn family_name(&self) -> &'static str {
        match self {
            HazardModel::Exponential(_) => "exponential",
            HazardModel::Weibull(_) => "weibull",
            HazardModel::WeibullPh(_) => "weibull_ph",
            HazardModel::Gompertz(_) => "gompertz",
            HazardModel::Gamma(_) => "gamma",
            HazardModel::LogNormal(_) => "log_normal",
            HazardModel::LogLogistic(_) => "log_logistic",
            HazardModel::GeneralizedGamma(_) => "generalized_gamma",
            HazardModel::PiecewiseExponential(_) => "piecewise_exponential",
            HazardModel::Spline(_) => "spline",
            HazardModel::FractionalPolynomial(_) => "fractional_polynomial",
            HazardModel::Fixed { .. } => "fixed",
        }
    }

    fn closed_form(&self) -> Option<&dyn ClosedForm> {
        match self {
            HazardModel::Exponential(m) => Some(m),
            HazardModel::Weibull(m) => Some(m),
            HazardModel::WeibullPh(m) => Some(m),
            HazardModel::Gompertz(m) => Some(m),
            HazardModel::Gamma(m) => Some(m),
            HazardModel::LogNormal(m) => Some(m),
            HazardModel::LogLogistic(m) => Some(m),
            HazardModel::GeneralizedGamma(m) => Some(m),
            HazardModel::PiecewiseExponential(m) => Some(m),
            HazardModel::Spline(_)
            | HazardModel::FractionalPolynomial(_)
            | HazardModel::Fixed { .. } => None,
        }
    }

    /// Numerical integration method for flexible families, `None` otherwise.
    pub fn integration(&self) -> Option<Integration> {
        match self {
            HazardModel::Spline(m) => Some(m.integration()),
            HazardModel::FractionalPolynomial(m) => Some(m.integration()),
            _ => None,
        }
    }

    /// Instantaneous hazard at `t`.
    pub fn hazard(&self, t: f64) -> Result<f64, HazardError> {
        if !t.is_finite() || t < 0.0 {
            return Err(HazardError::InvalidInterval { start: t, stop: t });
        }
        let value = match self {
            HazardModel::Spline(m) => m.hazard(t),
            HazardModel::FractionalPolynomial(m) => m.hazard(t),
            HazardModel::Fixed { .. } => return Err(HazardError::PointMass("fixed")),
            other => match other.closed_form() {
                Some(form) => form.hazard(t),
                None => return Err(HazardError::PointMass(other.family_name())),
            },
        };
        self.checked("hazard", t, value)
    }

    /// Cumulative hazard accumulated over `[t0, t1]`.
    pub fn cumulative_hazard(&self, t0: f64, t1: f64) -> Result<f64, HazardError> {
        match self.integration() {
            Some(method) => self.cumulative_hazard_with(t0, t1, method),
            None => self.cumulative_hazard_with(t0, t1, Integration::quadrature()),
        }
    }

    /// Cumulative hazard over `[t0, t1]` using an explicit integration method.
    ///
    /// Closed-form families ignore `method`.
    pub fn cumulative_hazard_with(
        &self,
        t0: f64,
        t1: f64,
        method: Integration,
    ) -> Result<f64, HazardError> {
        validate_interval(t0, t1)?;
        if t0 == t1 {
            return Ok(0.0);
        }
        let value = match self {
            HazardModel::Fixed { .. } => return Err(HazardError::PointMass("fixed")),
            HazardModel::Spline(_) | HazardModel::FractionalPolynomial(_) => {
                integrate::integrate_hazard(|t| self.hazard(t), t0, t1, method)?
            }
            other => match other.closed_form() {
                Some(form) => {
                    let upper = self.checked(
                        "cumulative hazard",
                        t1,
                        form.cumulative_hazard(t1),
                    )?;
                    let lower = self.checked(
                        "cumulative hazard",
                        t0,
                        form.cumulative_hazard(t0),
                    )?;
                    settle_difference(upper - lower, upper)
                }
                None => return Err(HazardError::PointMass(other.family_name())),
            },
        };
        self.checked("cumulative hazard", t1, value)
    }

    /// Cumulative hazard over a single sampling-grid cell `[a, b]`.
    ///
    /// Riemann-integrated flexible families contribute the right-end-point
    /// increment `hazard(b) * (b - a)`, so walking consecutive cells reproduces
    /// the fixed-step sum in one pass instead of re-summing from 0 per cell.
    pub fn cumulative_hazard_increment(&self, a: f64, b: f64) -> Result<f64, HazardError> {
        match self.integration() {
            Some(Integration::Riemann { .. }) => {
                validate_interval(a, b)?;
                Ok(self.hazard(b)? * (b - a))
            }
            _ => self.cumulative_hazard(a, b),
        }
    }

    /// Survival probability `exp(-H(0, t))`.
    pub fn survival(&self, t: f64) -> Result<f64, HazardError> {
        Ok((-self.cumulative_hazard(0.0, t)?).exp())
    }

    /// Time at which the cumulative hazard from 0 reaches `h`, when the family
    /// has a closed-form inverse.
    pub fn inverse_cumulative_hazard(&self, h: f64) -> Option<Inverse> {
        if !(h >= 0.0) {
            return None;
        }
        self.closed_form()
            .and_then(|form| form.inverse_cumulative_hazard(h))
    }

    pub fn has_closed_form_inverse(&self) -> bool {
        self.inverse_cumulative_hazard(0.0).is_some()
    }

    fn checked(&self, quantity: &'static str, time: f64, value: f64) -> Result<f64, HazardError> {
        if value.is_finite() && value >= 0.0 {
            Ok(value)
        } else {
            Err(HazardError::InvalidEvaluation {
                family: self.family_name(),
                quantity,
                time,
                value,
            })
        }
    }
}

fn validate_interval(t0: f64, t1: f64) -> Result<(), HazardError> {
    if !t0.is_finite() || !t1.is_finite() || t0 < 0.0 || t1 < t0 {
        return Err(HazardError::InvalidInterval {
            start: t0,
            stop: t1,
        });
    }
    Ok(())
}

/// Rounds a cancellation residue of two nearly equal cumulative hazards to zero.
fn settle_difference(difference: f64, scale: f64) -> f64 {
    if difference < 0.0 && difference > -1e-12 * (1.0 + scale.abs()) {
        0.0
    } else {
        difference
    }
}
