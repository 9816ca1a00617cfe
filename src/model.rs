//! Cohort data types.

use crate::error::{ModelError, ModelResult};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Record of the cohort at the end of a single cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    /// Cycle number, starting at 1.
    pub cycle: usize,

    /// Number (or fraction) of the cohort in each state.
    pub state: Array1<f64>,

    /// Cost accrued during the cycle, after discounting.
    pub cost: f64,
    /// Effect accrued during the cycle, discounted only if effect discounting is on.
    pub effect: f64,

    pub undiscounted_cost: f64,
    pub undiscounted_effect: f64,
}

/// Total cost and effect of one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub cost: f64,
    pub effect: f64,
}

/// Result of one cohort simulation.
///
/// Holds the initial state vector and one [`CycleRecord`] per simulated cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    init: Array1<f64>,
    records: Vec<CycleRecord>,
}

impl SimulationResult {
    pub(crate) fn new(init: Array1<f64>, records: Vec<CycleRecord>) -> Self {
        Self { init, records }
    }

    pub fn init(&self) -> &Array1<f64> {
        &self.init
    }

    pub fn records(&self) -> &[CycleRecord] {
        &self.records
    }

    pub fn n_cycles(&self) -> usize {
        self.records.len()
    }

    pub fn total_cost(&self) -> f64 {
        self.records.iter().map(|rec| rec.cost).sum()
    }

    pub fn total_effect(&self) -> f64 {
        self.records.iter().map(|rec| rec.effect).sum()
    }

    pub fn undiscounted_total_cost(&self) -> f64 {
        self.records.iter().map(|rec| rec.undiscounted_cost).sum()
    }

    pub fn undiscounted_total_effect(&self) -> f64 {
        self.records.iter().map(|rec| rec.undiscounted_effect).sum()
    }

    pub fn outcome(&self) -> Outcome {
        Outcome {
            cost: self.total_cost(),
            effect: self.total_effect(),
        }
    }

    /// State vectors for cycles `1..=n_cycles`, as plain rows.
    pub fn state_trace(&self) -> Vec<Vec<f64>> {
        self.records.iter().map(|rec| rec.state.to_vec()).collect()
    }

    /// Fraction of the initial cohort outside `death_state` at each cycle.
    pub fn fraction_alive(&self, death_state: usize) -> ModelResult<Vec<f64>> {
        let n_states = self.init.len();
        if death_state >= n_states {
            return Err(ModelError::param(
                "death state",
                format!("index must be below {n_states}, but is {death_state}"),
            ));
        }
        let size = self.init.sum();
        Ok(self
            .records
            .iter()
            .map(|rec| 1.0 - rec.state[death_state] / size)
            .collect())
    }
}
