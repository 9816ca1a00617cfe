//! Markov cohort simulation engine.

use crate::error::{ModelError, ModelResult};
use crate::model::{CycleRecord, SimulationResult};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Tolerance on transition matrix row sums.
pub const ROW_SUM_TOL: f64 = 1e-6;

/// Model input that is either the same for every cycle or given per cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PerCycle<T> {
    /// One value replicated for all cycles.
    Constant(T),
    /// Exactly one value per cycle, in cycle order.
    Varying(Vec<T>),
}

impl<T> PerCycle<T> {
    /// Value used during cycle `i_cycle` (zero-based).
    pub fn get(&self, i_cycle: usize) -> &T {
        match self {
            PerCycle::Constant(val) => val,
            PerCycle::Varying(vals) => &vals[i_cycle],
        }
    }

    /// Distinct values held, with the zero-based cycle each one first applies to.
    fn entries(&self) -> impl Iterator<Item = (usize, &T)> {
        let vals = match self {
            PerCycle::Constant(val) => std::slice::from_ref(val),
            PerCycle::Varying(vals) => vals.as_slice(),
        };
        vals.iter().enumerate()
    }

    fn check_len(&self, what: &str, n_cycles: usize) -> ModelResult<()> {
        if let PerCycle::Varying(vals) = self {
            if vals.len() != n_cycles {
                return Err(ModelError::dim(format!("{what} sequence"), n_cycles, vals.len()));
            }
        }
        Ok(())
    }
}

/// Everything a single cohort run needs apart from discounting.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortInputs {
    /// Initial state vector.
    pub init: Array1<f64>,
    /// Number of cycles to simulate.
    pub n_cycles: usize,
    /// Transition matrices (`n_states x n_states`).
    pub transitions: PerCycle<Array2<f64>>,
    /// Per-state costs accrued each cycle.
    pub costs: PerCycle<Array1<f64>>,
    /// Per-state effects (life-years or quality weights) accrued each cycle.
    pub effects: PerCycle<Array1<f64>>,
}

impl CohortInputs {
    pub fn n_states(&self) -> usize {
        self.init.len()
    }
}

/// Discounting applied to per-cycle accruals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    /// Annual (per-cycle) discount rate in `[0, 1)`.
    pub rate: f64,
    /// Whether effects are discounted as well as costs.
    pub effects: bool,
}

impl Discount {
    pub fn new(rate: f64, effects: bool) -> ModelResult<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(ModelError::param(
                "discount rate",
                format!("must be in the range 0.0..1.0, but is {rate}"),
            ));
        }
        Ok(Self { rate, effects })
    }

    pub fn none() -> Self {
        Self {
            rate: 0.0,
            effects: false,
        }
    }

    fn apply(&self, val: f64, cycle: usize) -> f64 {
        val / (1.0 + self.rate).powi(cycle as i32)
    }
}

/// Discrete-time cohort simulator.
///
/// Propagates a state vector through one transition matrix per cycle and
/// records the discounted cost and effect of every cycle. Holds no state
/// between calls, so one simulator can be shared across threads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CohortSimulator {
    discount: Discount,
}

impl CohortSimulator {
    pub fn new(discount: Discount) -> ModelResult<Self> {
        let discount = Discount::new(discount.rate, discount.effects)?;
        Ok(Self { discount })
    }

    pub fn discount(&self) -> Discount {
        self.discount
    }

    /// Run the cohort for `inputs.n_cycles` cycles.
    ///
    /// # Errors
    /// Returns [`ModelError::DimensionMismatch`] if any vector, matrix or
    /// per-cycle sequence disagrees with the number of states or cycles,
    /// [`ModelError::InvalidTransitionMatrix`] if a matrix row has a negative
    /// entry or does not sum to 1, and [`ModelError::InvalidParameter`] for
    /// negative or non-finite initial counts, an empty cohort and non-finite
    /// accrual values.
    pub fn simulate(&self, inputs: &CohortInputs) -> ModelResult<SimulationResult> {
        validate(inputs)?;

        let mut state = inputs.init.clone();
        let mut records = Vec::with_capacity(inputs.n_cycles);
        for i_cycle in 0..inputs.n_cycles {
            let cycle = i_cycle + 1;

            // Row vector times matrix.
            state = state.dot(inputs.transitions.get(i_cycle));

            let undiscounted_cost = state.dot(inputs.costs.get(i_cycle));
            let undiscounted_effect = state.dot(inputs.effects.get(i_cycle));

            let cost = self.discount.apply(undiscounted_cost, cycle);
            let effect = if self.discount.effects {
                self.discount.apply(undiscounted_effect, cycle)
            } else {
                undiscounted_effect
            };

            records.push(CycleRecord {
                cycle,
                state: state.clone(),
                cost,
                effect,
                undiscounted_cost,
                undiscounted_effect,
            });
        }

        let result = SimulationResult::new(inputs.init.clone(), records);
        log::debug!(
            "simulated {} cycles: cost {:.2}, effect {:.4}",
            result.n_cycles(),
            result.total_cost(),
            result.total_effect()
        );
        Ok(result)
    }
}

fn validate(inputs: &CohortInputs) -> ModelResult<()> {
    let n_states = inputs.n_states();
    if n_states == 0 {
        return Err(ModelError::param("initial state", "must have at least one state"));
    }
    if inputs.init.iter().any(|&ele| !ele.is_finite() || ele < 0.0) {
        return Err(ModelError::param(
            "initial state",
            "entries must be finite and non-negative",
        ));
    }
    if inputs.init.sum() <= 0.0 {
        return Err(ModelError::param("initial state", "cohort size must be positive"));
    }

    inputs.transitions.check_len("transition matrix", inputs.n_cycles)?;
    inputs.costs.check_len("cost vector", inputs.n_cycles)?;
    inputs.effects.check_len("effect vector", inputs.n_cycles)?;

    for (i_cycle, mat) in inputs.transitions.entries() {
        check_transition_matrix(mat, n_states, i_cycle + 1)?;
    }
    for (i_cycle, costs) in inputs.costs.entries() {
        check_accruals(costs.view(), n_states, "cost vector", i_cycle + 1)?;
    }
    for (i_cycle, effects) in inputs.effects.entries() {
        check_accruals(effects.view(), n_states, "effect vector", i_cycle + 1)?;
    }

    Ok(())
}

/// Check that `mat` is an `n_states x n_states` row-stochastic matrix.
pub fn check_transition_matrix(mat: &Array2<f64>, n_states: usize, cycle: usize) -> ModelResult<()> {
    let (n_rows, n_cols) = mat.dim();
    if n_rows != n_states {
        return Err(ModelError::dim(
            format!("transition matrix rows (cycle {cycle})"),
            n_states,
            n_rows,
        ));
    }
    if n_cols != n_states {
        return Err(ModelError::dim(
            format!("transition matrix columns (cycle {cycle})"),
            n_states,
            n_cols,
        ));
    }

    for (row, probs) in mat.outer_iter().enumerate() {
        let invalid = |reason: String| ModelError::InvalidTransitionMatrix { cycle, row, reason };
        if let Some(&ele) = probs.iter().find(|&&ele| !ele.is_finite() || ele < 0.0) {
            return Err(invalid(format!(
                "probabilities must be finite and non-negative, found {ele}"
            )));
        }
        let sum = probs.sum();
        if (sum - 1.0).abs() > ROW_SUM_TOL {
            return Err(invalid(format!(
                "row must sum to 1.0 (tolerance: {ROW_SUM_TOL}), but sums to {sum}"
            )));
        }
    }

    Ok(())
}

fn check_accruals(vals: ArrayView1<f64>, n_states: usize, what: &str, cycle: usize) -> ModelResult<()> {
    let len = vals.len();
    if len != n_states {
        return Err(ModelError::dim(format!("{what} (cycle {cycle})"), n_states, len));
    }
    if vals.iter().any(|ele| !ele.is_finite()) {
        return Err(ModelError::param(
            format!("{what} (cycle {cycle})"),
            "entries must be finite",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    fn two_state(n_cycles: usize) -> CohortInputs {
        CohortInputs {
            init: array![100.0, 0.0],
            n_cycles,
            transitions: PerCycle::Constant(array![[0.9, 0.1], [0.0, 1.0]]),
            costs: PerCycle::Constant(array![10.0, 0.0]),
            effects: PerCycle::Constant(array![1.0, 0.0]),
        }
    }

    #[test]
    fn first_cycle_applies_matrix_once() {
        let sim = CohortSimulator::new(Discount::none()).unwrap();
        let res = sim.simulate(&two_state(1)).unwrap();
        let rec = &res.records()[0];
        assert_eq!(rec.cycle, 1);
        assert!((rec.state[0] - 90.0).abs() < 1e-12);
        assert!((rec.state[1] - 10.0).abs() < 1e-12);
        assert!((rec.cost - 900.0).abs() < 1e-9);
        assert!((rec.effect - 90.0).abs() < 1e-12);
    }

    #[test]
    fn zero_cycles_gives_empty_result() {
        let sim = CohortSimulator::new(Discount::none()).unwrap();
        let res = sim.simulate(&two_state(0)).unwrap();
        assert_eq!(res.n_cycles(), 0);
        assert_eq!(res.total_cost(), 0.0);
    }

    #[test]
    fn discounts_costs_but_not_effects_by_default() {
        let sim = CohortSimulator::new(Discount::new(0.05, false).unwrap()).unwrap();
        let res = sim.simulate(&two_state(5)).unwrap();
        for rec in res.records() {
            assert_eq!(rec.cost, rec.undiscounted_cost / 1.05f64.powi(rec.cycle as i32));
            assert_eq!(rec.effect, rec.undiscounted_effect);
        }
    }

    #[test]
    fn discounts_effects_when_requested() {
        let sim = CohortSimulator::new(Discount::new(0.05, true).unwrap()).unwrap();
        let res = sim.simulate(&two_state(5)).unwrap();
        for rec in res.records() {
            assert_eq!(rec.effect, rec.undiscounted_effect / 1.05f64.powi(rec.cycle as i32));
        }
        assert!(res.total_effect() < res.undiscounted_total_effect());
    }

    #[test]
    fn varying_inputs_are_used_in_cycle_order() {
        let mut inputs = two_state(2);
        inputs.transitions = PerCycle::Varying(vec![
            Array2::eye(2),
            array![[0.5, 0.5], [0.0, 1.0]],
        ]);
        inputs.costs = PerCycle::Varying(vec![array![1.0, 0.0], array![2.0, 0.0]]);
        let sim = CohortSimulator::new(Discount::none()).unwrap();
        let res = sim.simulate(&inputs).unwrap();
        assert_eq!(res.records()[0].state, array![100.0, 0.0]);
        assert_eq!(res.records()[0].cost, 100.0);
        assert_eq!(res.records()[1].state, array![50.0, 50.0]);
        assert_eq!(res.records()[1].cost, 100.0);
    }

    #[test]
    fn rejects_short_varying_sequence() {
        let mut inputs = two_state(3);
        inputs.costs = PerCycle::Varying(vec![array![1.0, 0.0]; 2]);
        let sim = CohortSimulator::new(Discount::none()).unwrap();
        let err = sim.simulate(&inputs).unwrap_err();
        assert!(matches!(
            err,
            ModelError::DimensionMismatch {
                expected: 3,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn rejects_negative_probability() {
        let mut inputs = two_state(3);
        inputs.transitions = PerCycle::Constant(array![[1.1, -0.1], [0.0, 1.0]]);
        let sim = CohortSimulator::new(Discount::none()).unwrap();
        let err = sim.simulate(&inputs).unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidTransitionMatrix { cycle: 1, row: 0, .. }
        ));
    }

    #[test]
    fn reports_cycle_of_bad_varying_matrix() {
        let mut inputs = two_state(3);
        inputs.transitions = PerCycle::Varying(vec![
            Array2::eye(2),
            Array2::eye(2),
            array![[0.5, 0.5], [0.2, 0.7]],
        ]);
        let sim = CohortSimulator::new(Discount::none()).unwrap();
        let err = sim.simulate(&inputs).unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidTransitionMatrix { cycle: 3, row: 1, .. }
        ));
    }

    #[test]
    fn rejects_negative_initial_state() {
        let mut inputs = two_state(3);
        inputs.init = array![-1.0, 0.0];
        let sim = CohortSimulator::new(Discount::none()).unwrap();
        assert!(matches!(
            sim.simulate(&inputs),
            Err(ModelError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn rejects_empty_cohort() {
        let mut inputs = two_state(3);
        inputs.init = array![0.0, 0.0];
        let sim = CohortSimulator::new(Discount::none()).unwrap();
        assert!(matches!(
            sim.simulate(&inputs),
            Err(ModelError::InvalidParameter { .. })
        ));
    }

    fn four_state(n_cycles: usize) -> CohortInputs {
        CohortInputs {
            init: array![1000.0, 0.0, 0.0, 0.0],
            n_cycles,
            transitions: PerCycle::Constant(Array2::eye(4)),
            costs: PerCycle::Constant(array![1.0, 1.0, 1.0, 0.0]),
            effects: PerCycle::Constant(array![1.0, 1.0, 1.0, 0.0]),
        }
    }

    #[test]
    fn rejects_matrix_smaller_than_state_vector() {
        let mut inputs = four_state(2);
        inputs.transitions = PerCycle::Constant(Array2::eye(3));
        let sim = CohortSimulator::new(Discount::none()).unwrap();
        assert!(matches!(
            sim.simulate(&inputs),
            Err(ModelError::DimensionMismatch {
                expected: 4,
                found: 3,
                ..
            })
        ));
    }

    #[test]
    fn rejects_non_square_matrix() {
        let mut inputs = four_state(2);
        inputs.transitions = PerCycle::Constant(Array2::from_elem((4, 5), 0.2));
        let sim = CohortSimulator::new(Discount::none()).unwrap();
        let err = sim.simulate(&inputs).unwrap_err();
        assert!(matches!(
            err,
            ModelError::DimensionMismatch {
                expected: 4,
                found: 5,
                ..
            }
        ));
        assert!(err.to_string().contains("columns"));
    }

    #[test]
    fn rejects_effect_vector_of_wrong_length() {
        let mut inputs = four_state(2);
        inputs.effects = PerCycle::Varying(vec![array![1.0, 1.0, 1.0, 0.0], array![1.0, 1.0, 0.0]]);
        let sim = CohortSimulator::new(Discount::none()).unwrap();
        let err = sim.simulate(&inputs).unwrap_err();
        assert!(matches!(
            err,
            ModelError::DimensionMismatch {
                expected: 4,
                found: 3,
                ..
            }
        ));
        assert!(err.to_string().contains("effect vector (cycle 2)"));
    }

    #[test]
    fn rejects_out_of_range_discount() {
        assert!(Discount::new(1.0, false).is_err());
        assert!(Discount::new(-0.01, false).is_err());
        assert!(Discount::new(0.0, true).is_ok());
    }
}
