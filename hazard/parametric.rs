//! Closed-form parametric families.
//!
//! Parameterisations follow the conventions used by flexsurv, so coefficient
//! draws exported from a fitted model plug in unchanged. Survival functions that
//! underflow are evaluated on the log scale, which keeps the cumulative hazard
//! finite far into the tail.

use super::{ClosedForm, HazardError, Inverse};
use statrs::function::erf::{erfc, erfc_inv};
use statrs::function::gamma::{gamma_lr, gamma_ur, ln_gamma};
use std::f64::consts::{LN_2, SQRT_2};

/// Below this value a regularised incomplete gamma is replaced by its
/// leading-order asymptotic expansion.
const UNDERFLOW_GUARD: f64 = 1e-280;

/// `ln sqrt(2 pi)`.
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

fn positive(
    family: &'static str,
    name: &'static str,
    value: f64,
) -> Result<f64, HazardError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(HazardError::InvalidParameter {
            family,
            name,
            requirement: "positive and finite",
            value,
        })
    }
}

fn finite(family: &'static str, name: &'static str, value: f64) -> Result<f64, HazardError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(HazardError::InvalidParameter {
            family,
            name,
            requirement: "finite",
            value,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exponential {
    rate: f64,
}

impl Exponential {
    pub fn new(rate: f64) -> Result<Self, HazardError> {
        if !rate.is_finite() || rate < 0.0 {
            return Err(HazardError::InvalidParameter {
                family: "exponential",
                name: "rate",
                requirement: "non-negative and finite",
                value: rate,
            });
        }
        Ok(Self { rate })
    }
}

impl ClosedForm for Exponential {
    fn hazard(&self, _: f64) -> f64 {
        self.rate
    }

    fn cumulative_hazard(&self, t: f64) -> f64 {
        self.rate * t
    }

    fn inverse_cumulative_hazard(&self, h: f64) -> Option<Inverse> {
        if h == 0.0 {
            return Some(Inverse::At(0.0));
        }
        if self.rate == 0.0 {
            return Some(Inverse::Unreachable);
        }
        Some(Inverse::At(h / self.rate))
    }
}

/// Accelerated-failure-time Weibull.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weibull {
    shape: f64,
    scale: f64,
}

impl Weibull {
    pub fn new(shape: f64, scale: f64) -> Result<Self, HazardError> {
        Ok(Self {
            shape: positive("weibull", "shape", shape)?,
            scale: positive("weibull", "scale", scale)?,
        })
    }
}

impl ClosedForm for Weibull {
    fn hazard(&self, t: f64) -> f64 {
        (self.shape / self.scale) * (t / self.scale).powf(self.shape - 1.0)
    }

    fn cumulative_hazard(&self, t: f64) -> f64 {
        (t / self.scale).powf(self.shape)
    }

    fn inverse_cumulative_hazard(&self, h: f64) -> Option<Inverse> {
        Some(Inverse::At(self.scale * h.powf(1.0 / self.shape)))
    }
}

/// Proportional-hazards Weibull.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeibullPh {
    shape: f64,
    scale: f64,
}

impl WeibullPh {
    pub fn new(shape: f64, scale: f64) -> Result<Self, HazardError> {
        Ok(Self {
            shape: positive("weibull_ph", "shape", shape)?,
            scale: positive("weibull_ph", "scale", scale)?,
        })
    }
}

impl ClosedForm for WeibullPh {
    fn hazard(&self, t: f64) -> f64 {
        self.shape * self.scale * t.powf(self.shape - 1.0)
    }

    fn cumulative_hazard(&self, t: f64) -> f64 {
        self.scale * t.powf(self.shape)
    }

    fn inverse_cumulative_hazard(&self, h: f64) -> Option<Inverse> {
        Some(Inverse::At((h / self.scale).powf(1.0 / self.shape)))
    }
}

/// Gompertz with `h(t) = rate * exp(shape * t)`. A negative shape leaves a
/// cured fraction: the cumulative hazard plateaus at `-rate / shape`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gompertz {
    shape: f64,
    rate: f64,
}

impl Gompertz {
    pub fn new(shape: f64, rate: f64) -> Result<Self, HazardError> {
        Ok(Self {
            shape: finite("gompertz", "shape", shape)?,
            rate: positive("gompertz", "rate", rate)?,
        })
    }
}

impl ClosedForm for Gompertz {
    fn hazard(&self, t: f64) -> f64 {
        self.rate * (self.shape * t).exp()
    }

    fn cumulative_hazard(&self, t: f64) -> f64 {
        if self.shape.abs() < 1e-12 {
            self.rate * t
        } else {
            (self.rate / self.shape) * (self.shape * t).exp_m1()
        }
    }

    fn inverse_cumulative_hazard(&self, h: f64) -> Option<Inverse> {
        if self.shape.abs() < 1e-12 {
            return Some(Inverse::At(h / self.rate));
        }
        let argument = self.shape * h / self.rate;
        if argument <= -1.0 {
            return Some(Inverse::Unreachable);
        }
        Some(Inverse::At(argument.ln_1p() / self.shape))
    }
}

/// Gamma with shape/rate parameterisation. No closed-form inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gamma {
    shape: f64,
    rate: f64,
}

impl Gamma {
    pub fn new(shape: f64, rate: f64) -> Result<Self, HazardError> {
        Ok(Self {
            shape: positive("gamma", "shape", shape)?,
            rate: positive("gamma", "rate", rate)?,
        })
    }
}

impl ClosedForm for Gamma {
    fn hazard(&self, t: f64) -> f64 {
        let x = (self.rate * t).max(f64::MIN_POSITIVE);
        let ln_density =
            self.rate.ln() + (self.shape - 1.0) * x.ln() - x - ln_gamma(self.shape);
        (ln_density - ln_upper_regularized(self.shape, x)).exp()
    }

    fn cumulative_hazard(&self, t: f64) -> f64 {
        upper_tail_cumulative_hazard(self.shape, self.rate * t)
    }

    fn inverse_cumulative_hazard(&self, _: f64) -> Option<Inverse> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogNormal {
    meanlog: f64,
    sdlog: f64,
}

impl LogNormal {
    pub fn new(meanlog: f64, sdlog: f64) -> Result<Self, HazardError> {
        Ok(Self {
            meanlog: finite("log_normal", "meanlog", meanlog)?,
            sdlog: positive("log_normal", "sdlog", sdlog)?,
        })
    }

    fn standardise(&self, t: f64) -> f64 {
        (t.ln() - self.meanlog) / self.sdlog
    }
}

impl ClosedForm for LogNormal {
    fn hazard(&self, t: f64) -> f64 {
        if t == 0.0 {
            return 0.0;
        }
        let z = self.standardise(t);
        let ln_phi = -0.5 * z * z - LN_SQRT_2PI;
        (ln_phi - (self.sdlog * t).ln() - ln_normal_upper_tail(z)).exp()
    }

    fn cumulative_hazard(&self, t: f64) -> f64 {
        if t == 0.0 {
            return 0.0;
        }
        normal_upper_tail_cumulative_hazard(self.standardise(t))
    }

    fn inverse_cumulative_hazard(&self, h: f64) -> Option<Inverse> {
        if h == 0.0 {
            return Some(Inverse::At(0.0));
        }
        // S = exp(-h) = Phi(-z), so z = sqrt(2) * erfc_inv(2 S). Below the
        // median the distribution function F = 1 - S keeps the precision.
        let z = if h < LN_2 {
            let distribution = -(-h).exp_m1();
            -SQRT_2 * erfc_inv(2.0 * distribution)
        } else {
            SQRT_2 * erfc_inv(2.0 * (-h).exp())
        };
        Some(Inverse::At((self.meanlog + self.sdlog * z).exp()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogLogistic {
    shape: f64,
    scale: f64,
}

impl LogLogistic {
    pub fn new(shape: f64, scale: f64) -> Result<Self, HazardError> {
        Ok(Self {
            shape: positive("log_logistic", "shape", shape)?,
            scale: positive("log_logistic", "scale", scale)?,
        })
    }
}

impl ClosedForm for LogLogistic {
    fn hazard(&self, t: f64) -> f64 {
        let ratio = t / self.scale;
        let z = ratio.powf(self.shape);
        (self.shape / self.scale) * ratio.powf(self.shape - 1.0) / (1.0 + z)
    }

    fn cumulative_hazard(&self, t: f64) -> f64 {
        (t / self.scale).powf(self.shape).ln_1p()
    }

    fn inverse_cumulative_hazard(&self, h: f64) -> Option<Inverse> {
        Some(Inverse::At(self.scale * h.exp_m1().powf(1.0 / self.shape)))
    }
}

/// Prentice's generalized gamma. `q = 0` reduces to the log-normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneralizedGamma {
    mu: f64,
    sigma: f64,
    q: f64,
}

impl GeneralizedGamma {
    /// Below this `|q|` the incomplete gamma shape `1 / q^2` exceeds 1e8, where
    /// it loses accuracy; the log-normal limit is used instead.
    const LOG_NORMAL_LIMIT: f64 = 1e-4;

    pub fn new(mu: f64, sigma: f64, q: f64) -> Result<Self, HazardError> {
        Ok(Self {
            mu: finite("generalized_gamma", "mu", mu)?,
            sigma: positive("generalized_gamma", "sigma", sigma)?,
            q: finite("generalized_gamma", "q", q)?,
        })
    }

    fn is_log_normal(&self) -> bool {
        self.q.abs() < Self::LOG_NORMAL_LIMIT
    }

    /// Returns `(w, u, 1 / q^2)` with `w` the standardised log time and
    /// `u = exp(q w) / q^2` the gamma argument.
    fn transformed(&self, t: f64) -> (f64, f64, f64) {
        let w = (t.ln() - self.mu) / self.sigma;
        let inv_q2 = 1.0 / (self.q * self.q);
        (w, inv_q2 * (self.q * w).exp(), inv_q2)
    }

    fn ln_survival(&self, t: f64) -> f64 {
        let (_, u, inv_q2) = self.transformed(t);
        if self.q > 0.0 {
            ln_upper_regularized(inv_q2, u)
        } else {
            ln_lower_regularized(inv_q2, u)
        }
    }
}

impl ClosedForm for GeneralizedGamma {
    fn hazard(&self, t: f64) -> f64 {
        let t = t.max(f64::MIN_POSITIVE);
        if self.is_log_normal() {
            let z = (t.ln() - self.mu) / self.sigma;
            let ln_phi = -0.5 * z * z - LN_SQRT_2PI;
            return (ln_phi - (self.sigma * t).ln() - ln_normal_upper_tail(z)).exp();
        }
        let (w, _, inv_q2) = self.transformed(t);
        let qw = self.q * w;
        let ln_density = -(self.sigma * t).ln() + self.q.abs().ln() + inv_q2 * inv_q2.ln()
            + inv_q2 * (qw - qw.exp())
            - ln_gamma(inv_q2);
        (ln_density - self.ln_survival(t)).exp()
    }

    fn cumulative_hazard(&self, t: f64) -> f64 {
        if t == 0.0 {
            return 0.0;
        }
        if self.is_log_normal() {
            return normal_upper_tail_cumulative_hazard((t.ln() - self.mu) / self.sigma);
        }
        let (_, u, inv_q2) = self.transformed(t);
        if self.q > 0.0 {
            upper_tail_cumulative_hazard(inv_q2, u)
        } else {
            // S = P(1/q^2, u); H = -ln P, with P close to 1 near t = 0.
            if u > 0.0 && u.is_finite() {
                let complement = gamma_ur(inv_q2, u);
                if complement < 0.5 {
                    return -(-complement).ln_1p();
                }
            }
            -ln_lower_regularized(inv_q2, u)
        }
    }

    fn inverse_cumulative_hazard(&self, _: f64) -> Option<Inverse> {
        None
    }
}

/// Piecewise-constant hazard: `rates[k]` applies on `[breaks[k], breaks[k + 1])`,
/// the last rate extends to infinity.
#[derive(Debug, Clone, PartialEq)]
pub struct PiecewiseExponential {
    rates: Vec<f64>,
    breaks: Vec<f64>,
    /// Cumulative hazard at each break.
    cumulative: Vec<f64>,
}

pub(super) fn validate_breaks(breaks: &[f64]) -> Result<(), HazardError> {
    let invalid = |reason: &str| HazardError::InvalidAuxiliary {
        family: "piecewise_exponential",
        reason: reason.to_string(),
    };
    match breaks.first() {
        None => return Err(invalid("at least one interval is required")),
        Some(&first) if first != 0.0 => return Err(invalid("the first break must be 0")),
        Some(_) => {}
    }
    if breaks.iter().any(|b| !b.is_finite()) {
        return Err(invalid("breaks must be finite"));
    }
    if breaks.windows(2).any(|w| w[0] >= w[1]) {
        return Err(invalid("breaks must be strictly increasing"));
    }
    Ok(())
}

impl PiecewiseExponential {
    pub fn new(rates: Vec<f64>, breaks: Vec<f64>) -> Result<Self, HazardError> {
        validate_breaks(&breaks)?;
        if rates.len() != breaks.len() {
            return Err(HazardError::ParameterCount {
                family: "piecewise_exponential",
                expected: breaks.len(),
                found: rates.len(),
            });
        }
        for &rate in &rates {
            if !rate.is_finite() || rate < 0.0 {
                return Err(HazardError::InvalidParameter {
                    family: "piecewise_exponential",
                    name: "rate",
                    requirement: "non-negative and finite",
                    value: rate,
                });
            }
        }
        let mut cumulative = Vec::with_capacity(breaks.len());
        let mut total = 0.0;
        cumulative.push(0.0);
        for k in 1..breaks.len() {
            total += rates[k - 1] * (breaks[k] - breaks[k - 1]);
            cumulative.push(total);
        }
        Ok(Self {
            rates,
            breaks,
            cumulative,
        })
    }

    fn interval(&self, t: f64) -> usize {
        self.breaks.partition_point(|&b| b <= t).saturating_sub(1)
    }
}

impl ClosedForm for PiecewiseExponential {
    fn hazard(&self, t: f64) -> f64 {
        self.rates[self.interval(t)]
    }

    fn cumulative_hazard(&self, t: f64) -> f64 {
        let k = self.interval(t);
        self.cumulative[k] + self.rates[k] * (t - self.breaks[k])
    }

    fn inverse_cumulative_hazard(&self, h: f64) -> Option<Inverse> {
        let k = self
            .cumulative
            .partition_point(|&c| c <= h)
            .saturating_sub(1);
        let residual = h - self.cumulative[k];
        if residual == 0.0 {
            return Some(Inverse::At(self.breaks[k]));
        }
        if self.rates[k] == 0.0 {
            // Only the last interval can absorb a residual with a zero rate.
            return Some(Inverse::Unreachable);
        }
        Some(Inverse::At(self.breaks[k] + residual / self.rates[k]))
    }
}

/// `ln Q(a, x)` for the regularised upper incomplete gamma.
fn ln_upper_regularized(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if !x.is_finite() {
        return f64::NEG_INFINITY;
    }
    let q = gamma_ur(a, x);
    if q > UNDERFLOW_GUARD {
        q.ln()
    } else {
        (a - 1.0) * x.ln() - x - ln_gamma(a) + (1.0 + (a - 1.0) / x).ln()
    }
}

/// `ln P(a, x)` for the regularised lower incomplete gamma.
fn ln_lower_regularized(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if !x.is_finite() {
        return 0.0;
    }
    let p = gamma_lr(a, x);
    if p > UNDERFLOW_GUARD {
        p.ln()
    } else {
        a * x.ln() - x - ln_gamma(a + 1.0)
    }
}

/// `-ln Q(a, x)`, switching to `-ln(1 - P)` where `Q` is close to one.
fn upper_tail_cumulative_hazard(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x.is_finite() {
        let p = gamma_lr(a, x);
        if p < 0.5 {
            return -(-p).ln_1p();
        }
    }
    -ln_upper_regularized(a, x)
}

/// `ln(1 - Phi(z))` with a Mills-ratio expansion once `erfc` underflows.
fn ln_normal_upper_tail(z: f64) -> f64 {
    let tail = 0.5 * erfc(z / SQRT_2);
    if tail > UNDERFLOW_GUARD {
        tail.ln()
    } else {
        let z2 = z * z;
        -0.5 * z2 - LN_SQRT_2PI - z.ln() + (1.0 - 1.0 / z2 + 3.0 / (z2 * z2)).ln()
    }
}

/// `-ln(1 - Phi(z))`, accurate on both sides of the median.
fn normal_upper_tail_cumulative_hazard(z: f64) -> f64 {
    if z < 0.0 {
        let lower = 0.5 * erfc(-z / SQRT_2);
        return -(-lower).ln_1p();
    }
    -ln_normal_upper_tail(z)
}
