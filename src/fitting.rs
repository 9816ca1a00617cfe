//! Method-of-moments parameter fits.
//!
//! Each fit turns a mean and variance (or observed counts) into the natural
//! parameters of a distribution family used for probabilistic sensitivity
//! analysis.

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaParams {
    pub alpha: f64,
    pub beta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GammaParams {
    pub shape: f64,
    pub scale: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogNormalParams {
    /// Mean on the log scale.
    pub mu: f64,
    /// Standard deviation on the log scale.
    pub sigma: f64,
}

/// Beta distribution with the given mean and variance.
///
/// # Errors
/// The mean must lie strictly between 0 and 1 and the variance must be
/// positive and below `mean * (1 - mean)`.
pub fn beta_from_moments(mean: f64, var: f64) -> ModelResult<BetaParams> {
    if !(mean > 0.0 && mean < 1.0) {
        return Err(ModelError::param(
            "beta mean",
            format!("must be in the range (0, 1), but is {mean}"),
        ));
    }
    check_var("beta variance", var)?;
    let max_var = mean * (1.0 - mean);
    if var >= max_var {
        return Err(ModelError::param(
            "beta variance",
            format!("must be below mean * (1 - mean) = {max_var}, but is {var}"),
        ));
    }
    let k = max_var / var - 1.0;
    Ok(BetaParams {
        alpha: mean * k,
        beta: (1.0 - mean) * k,
    })
}

/// Gamma distribution (shape/scale) with the given mean and variance.
pub fn gamma_from_moments(mean: f64, var: f64) -> ModelResult<GammaParams> {
    check_mean("gamma mean", mean)?;
    check_var("gamma variance", var)?;
    Ok(GammaParams {
        shape: mean * mean / var,
        scale: var / mean,
    })
}

/// Lognormal distribution whose arithmetic mean and variance are given.
pub fn lognormal_from_moments(mean: f64, var: f64) -> ModelResult<LogNormalParams> {
    check_mean("lognormal mean", mean)?;
    check_var("lognormal variance", var)?;
    let sigma2 = (1.0 + var / (mean * mean)).ln();
    Ok(LogNormalParams {
        mu: mean.ln() - sigma2 / 2.0,
        sigma: sigma2.sqrt(),
    })
}

/// Dirichlet concentration parameters from observed transition counts.
///
/// Zero counts are kept and produce structural zeros when sampled.
pub fn dirichlet_from_counts(counts: &[f64]) -> ModelResult<Vec<f64>> {
    if counts.iter().any(|&cnt| !cnt.is_finite() || cnt < 0.0) {
        return Err(ModelError::param(
            "dirichlet counts",
            "counts must be finite and non-negative",
        ));
    }
    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return Err(ModelError::param(
            "dirichlet counts",
            "at least one count must be positive",
        ));
    }
    Ok(counts.to_vec())
}

fn check_mean(what: &str, mean: f64) -> ModelResult<()> {
    if !(mean.is_finite() && mean > 0.0) {
        return Err(ModelError::param(what, format!("must be positive, but is {mean}")));
    }
    Ok(())
}

fn check_var(what: &str, var: f64) -> ModelResult<()> {
    if !(var.is_finite() && var > 0.0) {
        return Err(ModelError::param(what, format!("must be positive, but is {var}")));
    }
    Ok(())
}
