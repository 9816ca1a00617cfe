//! Random sampling for probabilistic sensitivity analysis.

use crate::error::{ModelError, ModelResult};
use crate::fitting::{beta_from_moments, gamma_from_moments, lognormal_from_moments};
use nalgebra::{DMatrix, DVector};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Beta, Gamma, LogNormal, Normal, StandardNormal, Uniform};
use serde::{Deserialize, Serialize};

/// Sampling service with one method per distribution family.
///
/// Implementations own their random state; callers decide how it is seeded.
pub trait Sampler {
    fn normal(&mut self, mean: f64, sd: f64) -> ModelResult<f64>;

    /// Draw from a multivariate normal with covariance matrix `cov`.
    fn mvnormal(&mut self, mean: &[f64], cov: &[Vec<f64>]) -> ModelResult<Vec<f64>>;

    fn beta(&mut self, alpha: f64, beta: f64) -> ModelResult<f64>;

    /// Draw a probability vector; zero concentrations give structural zeros.
    fn dirichlet(&mut self, alpha: &[f64]) -> ModelResult<Vec<f64>>;

    fn gamma(&mut self, shape: f64, scale: f64) -> ModelResult<f64>;

    fn lognormal(&mut self, mu: f64, sigma: f64) -> ModelResult<f64>;

    fn uniform(&mut self, low: f64, high: f64) -> ModelResult<f64>;
}

/// [`Sampler`] backed by a `rand` generator.
#[derive(Debug, Clone)]
pub struct RngSampler<R> {
    rng: R,
}

impl<R: Rng> RngSampler<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RngSampler<ChaCha12Rng> {
    /// Sampler on stream `stream` of the ChaCha12 generator seeded with `seed`.
    ///
    /// Different streams of the same seed are independent, which lets each
    /// replication of an analysis own its own generator.
    pub fn seeded(seed: u64, stream: u64) -> Self {
        let mut rng = ChaCha12Rng::seed_from_u64(seed);
        rng.set_stream(stream);
        Self { rng }
    }
}

impl<R: Rng> Sampler for RngSampler<R> {
    fn normal(&mut self, mean: f64, sd: f64) -> ModelResult<f64> {
        let dist = Normal::new(mean, sd).map_err(|err| ModelError::param("normal", err))?;
        Ok(dist.sample(&mut self.rng))
    }

    fn mvnormal(&mut self, mean: &[f64], cov: &[Vec<f64>]) -> ModelResult<Vec<f64>> {
        let n_dim = mean.len();
        if cov.len() != n_dim {
            return Err(ModelError::dim("covariance rows", n_dim, cov.len()));
        }
        if let Some(row) = cov.iter().find(|row| row.len() != n_dim) {
            return Err(ModelError::dim("covariance columns", n_dim, row.len()));
        }
        let cov = DMatrix::from_fn(n_dim, n_dim, |i, j| cov[i][j]);
        let tol = 1e-9 * cov.amax().max(1.0);
        if (&cov - cov.transpose()).amax() > tol {
            return Err(ModelError::param("covariance", "matrix must be symmetric"));
        }
        let chol = cov
            .cholesky()
            .ok_or_else(|| ModelError::param("covariance", "matrix must be positive definite"))?;

        let std_norm = DVector::from_iterator(
            n_dim,
            (0..n_dim).map(|_| self.rng.sample::<f64, _>(StandardNormal)),
        );
        let draw = DVector::from_column_slice(mean) + chol.l() * std_norm;
        Ok(draw.iter().copied().collect())
    }

    fn beta(&mut self, alpha: f64, beta: f64) -> ModelResult<f64> {
        let dist = Beta::new(alpha, beta).map_err(|err| ModelError::param("beta", err))?;
        Ok(dist.sample(&mut self.rng))
    }

    fn dirichlet(&mut self, alpha: &[f64]) -> ModelResult<Vec<f64>> {
        if alpha.iter().any(|&a| !a.is_finite() || a < 0.0) {
            return Err(ModelError::param(
                "dirichlet",
                "concentrations must be finite and non-negative",
            ));
        }

        // Normalised independent gamma draws.
        let mut draws = Vec::with_capacity(alpha.len());
        for &a in alpha {
            if a == 0.0 {
                draws.push(0.0);
                continue;
            }
            let dist = Gamma::new(a, 1.0).map_err(|err| ModelError::param("dirichlet", err))?;
            draws.push(dist.sample(&mut self.rng));
        }
        let sum: f64 = draws.iter().sum();
        if !(sum > 0.0) {
            return Err(ModelError::param(
                "dirichlet",
                "at least one concentration must be positive",
            ));
        }
        draws.iter_mut().for_each(|ele| *ele /= sum);
        Ok(draws)
    }

    fn gamma(&mut self, shape: f64, scale: f64) -> ModelResult<f64> {
        let dist = Gamma::new(shape, scale).map_err(|err| ModelError::param("gamma", err))?;
        Ok(dist.sample(&mut self.rng))
    }

    fn lognormal(&mut self, mu: f64, sigma: f64) -> ModelResult<f64> {
        let dist = LogNormal::new(mu, sigma).map_err(|err| ModelError::param("lognormal", err))?;
        Ok(dist.sample(&mut self.rng))
    }

    fn uniform(&mut self, low: f64, high: f64) -> ModelResult<f64> {
        let dist = Uniform::new(low, high).map_err(|err| ModelError::param("uniform", err))?;
        Ok(dist.sample(&mut self.rng))
    }
}

/// Uncertain scalar model parameter.
///
/// Either a fixed number or a distribution given by its moments (or bounds
/// for the uniform case). In TOML a fixed value is a plain number and a
/// distribution is an inline table, e.g.
/// `{ dist = "gamma", mean = 5034.0, sd = 500.0 }`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    Fixed(f64),
    Dist(ParamDist),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dist", rename_all = "snake_case")]
pub enum ParamDist {
    Normal { mean: f64, sd: f64 },
    Beta { mean: f64, sd: f64 },
    Gamma { mean: f64, sd: f64 },
    #[serde(rename = "lognormal")]
    LogNormal { mean: f64, sd: f64 },
    Uniform { low: f64, high: f64 },
}

impl Param {
    /// Base-case value.
    pub fn mean(&self) -> f64 {
        match *self {
            Param::Fixed(val) => val,
            Param::Dist(dist) => match dist {
                ParamDist::Normal { mean, .. }
                | ParamDist::Beta { mean, .. }
                | ParamDist::Gamma { mean, .. }
                | ParamDist::LogNormal { mean, .. } => mean,
                ParamDist::Uniform { low, high } => (low + high) / 2.0,
            },
        }
    }

    /// Check that the parameter can be sampled.
    pub fn validate(&self) -> ModelResult<()> {
        match *self {
            Param::Fixed(val) => {
                if !val.is_finite() {
                    return Err(ModelError::param("fixed value", "must be finite"));
                }
            }
            Param::Dist(dist) => match dist {
                ParamDist::Normal { mean, sd } => {
                    if !(mean.is_finite() && sd.is_finite() && sd >= 0.0) {
                        return Err(ModelError::param(
                            "normal",
                            format!("mean must be finite and sd non-negative, got {mean} and {sd}"),
                        ));
                    }
                }
                ParamDist::Beta { mean, sd } => {
                    beta_from_moments(mean, sd * sd)?;
                }
                ParamDist::Gamma { mean, sd } => {
                    gamma_from_moments(mean, sd * sd)?;
                }
                ParamDist::LogNormal { mean, sd } => {
                    lognormal_from_moments(mean, sd * sd)?;
                }
                ParamDist::Uniform { low, high } => {
                    if !(low.is_finite() && high.is_finite() && low < high) {
                        return Err(ModelError::param(
                            "uniform",
                            format!("bounds must be finite with low < high, got {low} and {high}"),
                        ));
                    }
                }
            },
        }
        Ok(())
    }

    /// Value for one model evaluation.
    ///
    /// Without a sampler this is the base-case mean; with one, a fresh draw.
    pub fn resolve(&self, sampler: Option<&mut (dyn Sampler + '_)>) -> ModelResult<f64> {
        let (Param::Dist(dist), Some(sampler)) = (self, sampler) else {
            return Ok(self.mean());
        };
        match *dist {
            ParamDist::Normal { mean, sd } => sampler.normal(mean, sd),
            ParamDist::Beta { mean, sd } => {
                let par = beta_from_moments(mean, sd * sd)?;
                sampler.beta(par.alpha, par.beta)
            }
            ParamDist::Gamma { mean, sd } => {
                let par = gamma_from_moments(mean, sd * sd)?;
                sampler.gamma(par.shape, par.scale)
            }
            ParamDist::LogNormal { mean, sd } => {
                let par = lognormal_from_moments(mean, sd * sd)?;
                sampler.lognormal(par.mu, par.sigma)
            }
            ParamDist::Uniform { low, high } => sampler.uniform(low, high),
        }
    }
}
