use serde::{Deserialize, Serialize};

/// Streaming mean and standard deviation (Welford's algorithm).
#[derive(Debug, Clone)]
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub n_vals: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            n_vals: 0,
            mean: 0.0,
            diff_2_sum: 0.0,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;
    }

    pub fn n_vals(&self) -> usize {
        self.n_vals
    }

    pub fn mean(&self) -> f64 {
        if self.n_vals == 0 { f64::NAN } else { self.mean }
    }

    pub fn report(&self) -> AccumulatorReport {
        AccumulatorReport {
            n_vals: self.n_vals,
            mean: self.mean(),
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals as f64 - 1.0)).sqrt()
            } else {
                f64::NAN
            },
        }
    }
}

/// Sample values kept for interval estimates.
#[derive(Debug, Clone, Default)]
pub struct Samples {
    acc: Accumulator,
    vals: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplesReport {
    pub mean: f64,
    pub std_dev: f64,
    /// 2.5th percentile.
    pub lower: f64,
    /// 97.5th percentile.
    pub upper: f64,
}

impl Samples {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, val: f64) {
        self.acc.add(val);
        self.vals.push(val);
    }

    pub fn report(&self) -> SamplesReport {
        let mut sorted = self.vals.clone();
        sorted.sort_by(f64::total_cmp);
        let acc = self.acc.report();
        SamplesReport {
            mean: acc.mean,
            std_dev: acc.std_dev,
            lower: compute_quantile(&sorted, 0.025),
            upper: compute_quantile(&sorted, 0.975),
        }
    }
}

/// Linearly interpolated quantile of sorted values.
fn compute_quantile(sorted: &[f64], q: f64) -> f64 {
    let n_vals = sorted.len();
    if n_vals == 0 {
        return f64::NAN;
    }
    let pos = q * (n_vals - 1) as f64;
    let i_low = pos.floor() as usize;
    let i_high = pos.ceil() as usize;
    let frac = pos - i_low as f64;
    sorted[i_low] + frac * (sorted[i_high] - sorted[i_low])
}
