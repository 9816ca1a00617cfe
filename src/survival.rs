//! Parametric survival distributions.
//!
//! Used to derive time-dependent transition probabilities from a fitted
//! survival curve: the probability of leaving a state during cycle `t` is
//! `1 - S(t) / S(t - 1)`.

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Exp, Gamma, LogNormal, Weibull};

/// Parametric survival distribution.
///
/// Parameterisations follow the usual survival-analysis conventions:
/// Weibull and log-logistic by shape and scale, Gompertz by shape and rate
/// (`h(t) = rate * exp(shape * t)`), gamma by shape and rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dist", rename_all = "snake_case")]
pub enum SurvivalDist {
    Exponential { rate: f64 },
    Weibull { shape: f64, scale: f64 },
    Gompertz { shape: f64, rate: f64 },
    #[serde(rename = "llogis")]
    LogLogistic { shape: f64, scale: f64 },
    #[serde(rename = "lognormal")]
    LogNormal { meanlog: f64, sdlog: f64 },
    Gamma { shape: f64, rate: f64 },
}

impl SurvivalDist {
    /// Validate the parameters and build a curve that can be evaluated.
    pub fn curve(&self) -> ModelResult<SurvivalCurve> {
        let kind = match *self {
            SurvivalDist::Exponential { rate } => {
                Kind::Exponential(Exp::new(rate).map_err(|err| ModelError::param("exponential", err))?)
            }
            SurvivalDist::Weibull { shape, scale } => Kind::Weibull(
                Weibull::new(shape, scale).map_err(|err| ModelError::param("weibull", err))?,
            ),
            SurvivalDist::Gompertz { shape, rate } => {
                if !(shape.is_finite() && rate.is_finite() && rate > 0.0) {
                    return Err(ModelError::param(
                        "gompertz",
                        format!("shape must be finite and rate positive, got {shape} and {rate}"),
                    ));
                }
                Kind::Gompertz { shape, rate }
            }
            SurvivalDist::LogLogistic { shape, scale } => {
                if !(shape.is_finite() && scale.is_finite() && shape > 0.0 && scale > 0.0) {
                    return Err(ModelError::param(
                        "log-logistic",
                        format!("shape and scale must be positive, got {shape} and {scale}"),
                    ));
                }
                Kind::LogLogistic { shape, scale }
            }
            SurvivalDist::LogNormal { meanlog, sdlog } => Kind::LogNormal(
                LogNormal::new(meanlog, sdlog).map_err(|err| ModelError::param("lognormal", err))?,
            ),
            SurvivalDist::Gamma { shape, rate } => {
                Kind::Gamma(Gamma::new(shape, rate).map_err(|err| ModelError::param("gamma", err))?)
            }
        };
        Ok(SurvivalCurve { kind })
    }
}

#[derive(Debug, Clone)]
enum Kind {
    Exponential(Exp),
    Weibull(Weibull),
    Gompertz { shape: f64, rate: f64 },
    LogLogistic { shape: f64, scale: f64 },
    LogNormal(LogNormal),
    Gamma(Gamma),
}

/// Validated survival distribution.
///
/// All functions take time `t >= 0`; negative times are clamped to 0.
#[derive(Debug, Clone)]
pub struct SurvivalCurve {
    kind: Kind,
}

impl SurvivalCurve {
    pub fn pdf(&self, t: f64) -> f64 {
        let t = t.max(0.0);
        match &self.kind {
            Kind::Exponential(dist) => dist.pdf(t),
            Kind::Weibull(dist) => dist.pdf(t),
            Kind::LogNormal(dist) => dist.pdf(t),
            Kind::Gamma(dist) => dist.pdf(t),
            Kind::Gompertz { .. } | Kind::LogLogistic { .. } => self.hazard(t) * self.survival(t),
        }
    }

    pub fn cdf(&self, t: f64) -> f64 {
        1.0 - self.survival(t)
    }

    pub fn survival(&self, t: f64) -> f64 {
        let t = t.max(0.0);
        match &self.kind {
            Kind::Exponential(dist) => dist.sf(t),
            Kind::Weibull(dist) => dist.sf(t),
            Kind::LogNormal(dist) => dist.sf(t),
            Kind::Gamma(dist) => dist.sf(t),
            Kind::Gompertz { .. } => (-self.cumulative_hazard(t)).exp(),
            &Kind::LogLogistic { shape, scale } => 1.0 / (1.0 + (t / scale).powf(shape)),
        }
    }

    pub fn hazard(&self, t: f64) -> f64 {
        let t = t.max(0.0);
        match &self.kind {
            Kind::Exponential(dist) => dist.rate(),
            &Kind::Gompertz { shape, rate } => rate * (shape * t).exp(),
            &Kind::LogLogistic { shape, scale } => {
                let ratio = (t / scale).powf(shape - 1.0);
                (shape / scale) * ratio / (1.0 + (t / scale).powf(shape))
            }
            Kind::Weibull(_) | Kind::LogNormal(_) | Kind::Gamma(_) => {
                let surv = self.survival(t);
                if surv > 0.0 { self.pdf(t) / surv } else { f64::INFINITY }
            }
        }
    }

    pub fn cumulative_hazard(&self, t: f64) -> f64 {
        let t = t.max(0.0);
        match &self.kind {
            Kind::Exponential(dist) => dist.rate() * t,
            &Kind::Gompertz { shape, rate } => {
                if shape == 0.0 {
                    rate * t
                } else {
                    rate / shape * ((shape * t).exp() - 1.0)
                }
            }
            _ => -self.survival(t).ln(),
        }
    }

    /// Per-cycle probability of an event among those still at risk.
    ///
    /// Entry `t - 1` is `1 - S(t * cycle_len) / S((t - 1) * cycle_len)` for
    /// `t = 1..=n_cycles`; once survival reaches zero the probability is 1.
    pub fn transition_probs(&self, cycle_len: f64, n_cycles: usize) -> ModelResult<Vec<f64>> {
        if !(cycle_len.is_finite() && cycle_len > 0.0) {
            return Err(ModelError::param(
                "cycle length",
                format!("must be positive, but is {cycle_len}"),
            ));
        }
        let probs = (1..=n_cycles)
            .map(|cycle| {
                let surv_prev = self.survival((cycle - 1) as f64 * cycle_len);
                let surv = self.survival(cycle as f64 * cycle_len);
                if surv_prev > 0.0 {
                    (1.0 - surv / surv_prev).clamp(0.0, 1.0)
                } else {
                    1.0
                }
            })
            .collect();
        Ok(probs)
    }
}

/// Probability of at least one event over `time` given a constant `rate`.
pub fn rate_to_prob(rate: f64, time: f64) -> f64 {
    1.0 - (-rate * time).exp()
}

/// Constant rate that yields probability `prob` over `time`.
pub fn prob_to_rate(prob: f64, time: f64) -> f64 {
    -(1.0 - prob).ln() / time
}
