//! Random time-to-event sampling by cumulative-hazard inversion.
//!
//! A draw solves `H(lower, T) = -ln U` for `U ~ Uniform(0, 1)`. When the hazard
//! never accumulates `-ln U` before `upper` the draw is [`Draw::NoEvent`], which
//! the simulator treats as censoring rather than as a failure.
//!
//! Families with a closed-form inverse cumulative hazard are always sampled
//! through it. Everything else goes through the strategy configured on the edge:
//!
//! * [`SamplingMethod::DiscreteInversion`] walks a grid from `lower` in cells of
//!   width `step`, accumulating per-cell cumulative hazard, and interpolates
//!   linearly inside the cell in which the target is crossed.
//! * [`SamplingMethod::ContinuousInverseCdf`] brackets the root by doubling the
//!   search window from `lower` and then runs Brent's method on
//!   `H(lower, T) - target`, with `H` integrated by adaptive quadrature.

use crate::hazard::{HazardError, HazardModel, Integration, Inverse, QuadratureTolerance};
use rand::Rng;
use rand::distributions::Open01;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of the first bracket tried by the continuous strategy.
const INITIAL_BRACKET: f64 = 1.0;

#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("Sampling bounds must satisfy 0 <= lower < upper, got lower = {lower}, upper = {upper}")]
    InvalidBounds { lower: f64, upper: f64 },
    #[error("Discrete-inversion step must be positive and finite, got {0}")]
    InvalidStep(f64),
    #[error("Root finding did not converge within {iterations} iterations (bracket [{low}, {high}])")]
    NoConvergence {
        iterations: usize,
        low: f64,
        high: f64,
    },
    #[error("Hazard evaluation failed while sampling: {0}")]
    Hazard(#[from] HazardError),
}

/// How an event time is resolved when the family has no closed-form quantile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SamplingMethod {
    DiscreteInversion {
        step: f64,
    },
    #[default]
    ContinuousInverseCdf,
}

impl SamplingMethod {
    pub fn validate(&self) -> Result<(), SamplingError> {
        match *self {
            SamplingMethod::DiscreteInversion { step } if !(step.is_finite() && step > 0.0) => {
                Err(SamplingError::InvalidStep(step))
            }
            _ => Ok(()),
        }
    }
}

/// Numerical settings shared by every draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplerSettings {
    /// Replaces an infinite upper bound by `lower + max_horizon`. Finite
    /// bounds are left as given.
    pub max_horizon: f64,
    /// Absolute tolerance on event times found by root finding.
    pub root_tolerance: f64,
    pub max_root_iterations: usize,
    /// Quadrature used by the continuous strategy when the family does not
    /// carry its own quadrature tolerance.
    pub quadrature: QuadratureTolerance,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            max_horizon: 1000.0,
            root_tolerance: 1e-9,
            max_root_iterations: 200,
            quadrature: QuadratureTolerance::default(),
        }
    }
}

/// Outcome of a single draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Draw {
    /// Event at the given time, on the same scale as the bounds.
    Event(f64),
    /// No event strictly before the upper bound.
    NoEvent,
}

impl Draw {
    pub fn time(self) -> Option<f64> {
        match self {
            Draw::Event(t) => Some(t),
            Draw::NoEvent => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SurvivalSampler {
    settings: SamplerSettings,
}

impl SurvivalSampler {
    pub fn new(settings: SamplerSettings) -> Self {
        Self { settings }
    }

    /// Draws an event time `T >= lower` from `model`, left-truncated at `lower`.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        model: &HazardModel,
        method: SamplingMethod,
        lower: f64,
        upper: f64,
        rng: &mut R,
    ) -> Result<Draw, SamplingError> {
        let upper = self.effective_upper(lower, upper)?;
        if let HazardModel::Fixed { duration } = *model {
            return Ok(event_before(lower + duration, lower, upper));
        }
        let u: f64 = rng.sample(Open01);
        self.solve(model, method, lower, upper, -u.ln())
    }

    /// Finds `T` with `H(lower, T) = target`, using the closed-form quantile
    /// when the family has one.
    pub fn solve(
        &self,
        model: &HazardModel,
        method: SamplingMethod,
        lower: f64,
        upper: f64,
        target: f64,
    ) -> Result<Draw, SamplingError> {
        let upper = self.effective_upper(lower, upper)?;
        if model.has_closed_form_inverse() {
            let base = model.cumulative_hazard(0.0, lower)?;
            match model.inverse_cumulative_hazard(base + target) {
                Some(Inverse::At(t)) => return Ok(event_before(t, lower, upper)),
                Some(Inverse::Unreachable) => return Ok(Draw::NoEvent),
                None => {}
            }
        }
        self.invert(model, method, lower, upper, target)
    }

    /// Numerical inversion only, bypassing any closed-form quantile.
    pub fn invert(
        &self,
        model: &HazardModel,
        method: SamplingMethod,
        lower: f64,
        upper: f64,
        target: f64,
    ) -> Result<Draw, SamplingError> {
        let upper = self.effective_upper(lower, upper)?;
        match method {
            SamplingMethod::DiscreteInversion { step } => {
                method.validate()?;
                discrete_inversion(model, lower, upper, step, target)
            }
            SamplingMethod::ContinuousInverseCdf => self.continuous_inversion(model, lower, upper, target),
        }
    }

    fn effective_upper(&self, lower: f64, upper: f64) -> Result<f64, SamplingError> {
        if !lower.is_finite() || lower < 0.0 || upper.is_nan() || lower >= upper {
            return Err(SamplingError::InvalidBounds { lower, upper });
        }
        if upper.is_infinite() {
            Ok(lower + self.settings.max_horizon)
        } else {
            Ok(upper)
        }
    }

    fn continuous_inversion(
        &self,
        model: &HazardModel,
        lower: f64,
        upper: f64,
        target: f64,
    ) -> Result<Draw, SamplingError> {
        let method = match model.integration() {
            Some(own @ Integration::Quadrature { .. }) => own,
            _ => Integration::Quadrature {
                tolerance: self.settings.quadrature,
            },
        };
        let excess = |t: f64| -> Result<f64, HazardError> {
            Ok(model.cumulative_hazard_with(lower, t, method)? - target)
        };

        // Expand [low, high] until the target is bracketed or the window is spent.
        let mut low = lower;
        let mut f_low = -target;
        let mut width = INITIAL_BRACKET;
        let (high, f_high) = loop {
            let high = (lower + width).min(upper);
            let f_high = excess(high)?;
            if f_high >= 0.0 {
                break (high, f_high);
            }
            if high >= upper {
                return Ok(Draw::NoEvent);
            }
            low = high;
            f_low = f_high;
            width *= 2.0;
        };

        let root = brent(
            excess,
            (low, f_low),
            (high, f_high),
            self.settings.root_tolerance,
            self.settings.max_root_iterations,
        )?;
        Ok(event_before(root, lower, upper))
    }
}

/// Resolves a candidate time against the bounds: strictly before `upper` and
/// strictly after `lower`.
fn event_before(t: f64, lower: f64, upper: f64) -> Draw {
    if !(t < upper) {
        return Draw::NoEvent;
    }
    if t > lower {
        Draw::Event(t)
    } else {
        let nudged = lower + f64::EPSILON * lower.max(1.0);
        if nudged < upper {
            Draw::Event(nudged)
        } else {
            Draw::NoEvent
        }
    }
}

fn discrete_inversion(
    model: &HazardModel,
    lower: f64,
    upper: f64,
    step: f64,
    target: f64,
) -> Result<Draw, SamplingError> {
    let mut accumulated = 0.0;
    let mut cell = 0usize;
    loop {
        let a = lower + cell as f64 * step;
        let b = (lower + (cell + 1) as f64 * step).min(upper);
        let increment = model.cumulative_hazard_increment(a, b)?;
        if accumulated + increment >= target && increment > 0.0 {
            let fraction = (target - accumulated) / increment;
            return Ok(event_before(a + fraction * (b - a), lower, upper));
        }
        accumulated += increment;
        if b >= upper {
            return Ok(Draw::NoEvent);
        }
        cell += 1;
    }
}

/// Brent's method on a bracket with `f(low) < 0 <= f(high)`.
fn brent<F>(
    mut f: F,
    (low, f_low): (f64, f64),
    (high, f_high): (f64, f64),
    tolerance: f64,
    max_iterations: usize,
) -> Result<f64, SamplingError>
where
    F: FnMut(f64) -> Result<f64, HazardError>,
{
    let (mut a, mut fa) = (low, f_low);
    let (mut b, mut fb) = (high, f_high);
    let (mut c, mut fc) = (b, fb);
    let mut d = b - a;
    let mut e = d;

    for _ in 0..max_iterations {
        if (fb > 0.0 && fc > 0.0) || (fb < 0.0 && fc < 0.0) {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }
        let tol = 2.0 * f64::EPSILON * b.abs() + 0.5 * tolerance;
        let midpoint = 0.5 * (c - b);
        if midpoint.abs() <= tol || fb == 0.0 {
            return Ok(b);
        }
        if e.abs() >= tol && fa.abs() > fb.abs() {
            // Inverse quadratic interpolation, or secant when only two points differ.
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                (2.0 * midpoint * s, 1.0 - s)
            } else {
                let q = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * midpoint * q * (q - r) - (b - a) * (r - 1.0)),
                    (q - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            let bound = (3.0 * midpoint * q - (tol * q).abs()).min((e * q).abs());
            if 2.0 * p < bound {
                e = d;
                d = p / q;
            } else {
                d = midpoint;
                e = d;
            }
        } else {
            d = midpoint;
            e = d;
        }
        a = b;
        fa = fb;
        b += if d.abs() > tol { d } else { tol.copysign(midpoint) };
        fb = f(b)?;
    }
    Err(SamplingError::NoConvergence {
        iterations: max_iterations,
        low,
        high,
    })
}
