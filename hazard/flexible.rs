//! Flexible families: restricted cubic splines and fractional polynomials.
//!
//! Neither family has a general closed form for its cumulative hazard over an
//! arbitrary interval once it is embedded in a multi-state model, so cumulative
//! hazards are always obtained by integrating [`RestrictedCubicSpline::hazard`] or
//! [`FractionalPolynomial::hazard`] with the configured [`Integration`].

use super::{HazardError, Integration};
use serde::{Deserialize, Serialize};

/// Scale on which the spline is linear in its coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SplineScale {
    /// Royston-Parmar: `ln H(t) = s(ln t)`.
    #[default]
    LogCumHazard,
    /// `ln h(t) = s(ln t)`.
    LogHazard,
}

pub(super) fn validate_knots(knots: &[f64]) -> Result<(), HazardError> {
    let invalid = |reason: &str| HazardError::InvalidAuxiliary {
        family: "spline",
        reason: reason.to_string(),
    };
    if knots.len() < 2 {
        return Err(invalid("at least the two boundary knots are required"));
    }
    if knots.iter().any(|k| !k.is_finite()) {
        return Err(invalid("knots must be finite"));
    }
    if knots.windows(2).any(|w| w[0] >= w[1]) {
        return Err(invalid("knots must be strictly increasing"));
    }
    Ok(())
}

pub(super) fn validate_powers(powers: &[f64]) -> Result<(), HazardError> {
    let invalid = |reason: &str| HazardError::InvalidAuxiliary {
        family: "fractional_polynomial",
        reason: reason.to_string(),
    };
    if powers.is_empty() {
        return Err(invalid("at least one power is required"));
    }
    if powers.iter().any(|p| !p.is_finite()) {
        return Err(invalid("powers must be finite"));
    }
    if powers.windows(2).any(|w| w[0] > w[1]) {
        return Err(invalid("powers must be sorted so repeated powers are adjacent"));
    }
    Ok(())
}

/// Restricted cubic spline in log time (natural cubic spline with the
/// Royston-Parmar truncated-power basis).
#[derive(Debug, Clone, PartialEq)]
pub struct RestrictedCubicSpline {
    gamma: Vec<f64>,
    knots: Vec<f64>,
    scale: SplineScale,
    integration: Integration,
}

impl RestrictedCubicSpline {
    pub fn new(
        gamma: Vec<f64>,
        knots: Vec<f64>,
        scale: SplineScale,
        integration: Integration,
    ) -> Result<Self, HazardError> {
        validate_knots(&knots)?;
        integration.validate("spline")?;
        if gamma.len() != knots.len() {
            return Err(HazardError::ParameterCount {
                family: "spline",
                expected: knots.len(),
                found: gamma.len(),
            });
        }
        if let Some(&value) = gamma.iter().find(|g| !g.is_finite()) {
            return Err(HazardError::InvalidParameter {
                family: "spline",
                name: "gamma",
                requirement: "finite",
                value,
            });
        }
        Ok(Self {
            gamma,
            knots,
            scale,
            integration,
        })
    }

    pub fn integration(&self) -> Integration {
        self.integration
    }

    /// Returns `(s(x), s'(x))` for the spline at log time `x`.
    fn evaluate(&self, x: f64) -> (f64, f64) {
        let k_min = self.knots[0];
        let k_max = self.knots[self.knots.len() - 1];
        let span = k_max - k_min;

        let mut value = self.gamma[0] + self.gamma[1] * x;
        let mut slope = self.gamma[1];
        for (j, &knot) in self.knots[1..self.knots.len() - 1].iter().enumerate() {
            let lambda = (k_max - knot) / span;
            let basis = cube_plus(x - knot)
                - lambda * cube_plus(x - k_min)
                - (1.0 - lambda) * cube_plus(x - k_max);
            let derivative = 3.0
                * (square_plus(x - knot)
                    - lambda * square_plus(x - k_min)
                    - (1.0 - lambda) * square_plus(x - k_max));
            value += self.gamma[j + 2] * basis;
            slope += self.gamma[j + 2] * derivative;
        }
        (value, slope)
    }

    /// Hazard at `t`. On the cumulative-hazard scale a decreasing spline
    /// yields a negative value, which the caller rejects.
    pub fn hazard(&self, t: f64) -> f64 {
        let t = t.max(f64::MIN_POSITIVE);
        let (value, slope) = self.evaluate(t.ln());
        match self.scale {
            SplineScale::LogCumHazard => slope / t * value.exp(),
            SplineScale::LogHazard => value.exp(),
        }
    }

    /// `exp(s(ln t))`: the analytic cumulative hazard from 0 on the
    /// log-cumulative-hazard scale.
    pub fn log_scale_cumulative_hazard(&self, t: f64) -> Option<f64> {
        match self.scale {
            SplineScale::LogCumHazard if t > 0.0 => Some(self.evaluate(t.ln()).0.exp()),
            SplineScale::LogCumHazard => Some(0.0),
            SplineScale::LogHazard => None,
        }
    }
}

#[inline]
fn cube_plus(x: f64) -> f64 {
    if x > 0.0 { x * x * x } else { 0.0 }
}

#[inline]
fn square_plus(x: f64) -> f64 {
    if x > 0.0 { x * x } else { 0.0 }
}

/// Fractional polynomial on the log-hazard scale.
///
/// With powers `p_1 <= ... <= p_m` the basis is `t^p` (`ln t` for `p = 0`);
/// a repeated power multiplies the previous term by `ln t`.
#[derive(Debug, Clone, PartialEq)]
pub struct FractionalPolynomial {
    gamma: Vec<f64>,
    powers: Vec<f64>,
    integration: Integration,
}

impl FractionalPolynomial {
    pub fn new(
        gamma: Vec<f64>,
        powers: Vec<f64>,
        integration: Integration,
    ) -> Result<Self, HazardError> {
        validate_powers(&powers)?;
        integration.validate("fractional_polynomial")?;
        if gamma.len() != powers.len() + 1 {
            return Err(HazardError::ParameterCount {
                family: "fractional_polynomial",
                expected: powers.len() + 1,
                found: gamma.len(),
            });
        }
        if let Some(&value) = gamma.iter().find(|g| !g.is_finite()) {
            return Err(HazardError::InvalidParameter {
                family: "fractional_polynomial",
                name: "gamma",
                requirement: "finite",
                value,
            });
        }
        Ok(Self {
            gamma,
            powers,
            integration,
        })
    }

    pub fn integration(&self) -> Integration {
        self.integration
    }

    fn log_hazard(&self, t: f64) -> f64 {
        let ln_t = t.ln();
        let mut eta = self.gamma[0];
        let mut previous: Option<(f64, f64)> = None;
        for (j, &power) in self.powers.iter().enumerate() {
            let term = match previous {
                Some((p, value)) if p == power => value * ln_t,
                _ if power == 0.0 => ln_t,
                _ => t.powf(power),
            };
            eta += self.gamma[j + 1] * term;
            previous = Some((power, term));
        }
        eta
    }

    pub fn hazard(&self, t: f64) -> f64 {
        self.log_hazard(t.max(f64::MIN_POSITIVE)).exp()
    }
}
