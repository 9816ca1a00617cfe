//! Probabilistic sensitivity analysis.

use crate::config::Config;
use crate::error::ModelResult;
use crate::model::Outcome;
use crate::sampling::RngSampler;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Outcomes of every arm for one parameter draw, in arm order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsaSample {
    pub outcomes: Vec<Outcome>,
}

/// Batch of PSA samples as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsaBatch {
    pub arm_names: Vec<String>,
    pub seed: u64,
    /// Stream of the first replication in the batch.
    pub stream_offset: u64,
    pub samples: Vec<PsaSample>,
}

/// Approximate number of progress reports per run.
const N_PROGRESS_REPORTS: usize = 10;

/// Parallel PSA runner.
///
/// Replication `i` draws its parameters from ChaCha12 stream
/// `stream_offset + i` of `seed`, so results do not depend on how rayon
/// schedules the work.
pub struct Psa<'a> {
    cfg: &'a Config,
}

impl<'a> Psa<'a> {
    pub fn new(cfg: &'a Config) -> Self {
        Self { cfg }
    }

    pub fn run(&self, n_samples: usize, seed: u64, stream_offset: u64) -> ModelResult<PsaBatch> {
        let report_every = n_samples.div_ceil(N_PROGRESS_REPORTS).max(1);
        let n_done = AtomicUsize::new(0);

        let samples = (0..n_samples)
            .into_par_iter()
            .map(|i_sample| {
                let sample = self.replicate(seed, stream_offset + i_sample as u64)?;
                let done = n_done.fetch_add(1, Ordering::Relaxed) + 1;
                if done % report_every == 0 || done == n_samples {
                    let progress = 100.0 * done as f64 / n_samples as f64;
                    log::info!("completed {progress:06.2}%");
                }
                Ok(sample)
            })
            .collect::<ModelResult<Vec<_>>>()?;

        Ok(PsaBatch {
            arm_names: self.cfg.arm_names(),
            seed,
            stream_offset,
            samples,
        })
    }

    fn replicate(&self, seed: u64, stream: u64) -> ModelResult<PsaSample> {
        let mut sampler = RngSampler::seeded(seed, stream);
        let results = self.cfg.evaluate(Some(&mut sampler))?;
        Ok(PsaSample {
            outcomes: results.iter().map(|res| res.outcome()).collect(),
        })
    }
}
