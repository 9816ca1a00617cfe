use crate::engine::{CohortInputs, CohortSimulator, Discount};
use crate::error::{ModelError, ModelResult};
use crate::fitting::dirichlet_from_counts;
use crate::model::SimulationResult;
use crate::sampling::{Param, Sampler};
use crate::schedule::Schedule;
use crate::utils::{VecKind, check_mat, check_num, check_vec};
use anyhow::{Context, Result, bail};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

/// Model configuration.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub model: ModelConfig,

    /// Named scalar parameters, fixed or uncertain.
    #[serde(default)]
    pub params: BTreeMap<String, Param>,
    /// Named transition matrices.
    #[serde(default)]
    pub matrices: BTreeMap<String, MatrixSpec>,

    /// Strategies to compare; the first one is the reference.
    pub arms: Vec<ArmConfig>,

    #[serde(default)]
    pub psa: PsaConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// State names, in matrix order.
    pub states: Vec<String>,
    /// Initial number of individuals in each state.
    pub init: Vec<f64>,
    /// Number of cycles simulated.
    pub n_cycles: usize,

    /// Discount rate per cycle.
    pub discount_rate: f64,
    /// Whether effects are discounted too.
    #[serde(default)]
    pub discount_effects: bool,

    /// Absorbing state used to report the fraction alive.
    #[serde(default)]
    pub death_state: Option<String>,
}

/// Transition matrix given by probabilities or by observed transition counts.
///
/// Count matrices use row proportions in the base case and Dirichlet draws
/// in probabilistic analyses.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixSpec {
    Probs(Vec<Vec<f64>>),
    Counts(Vec<Vec<f64>>),
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArmConfig {
    pub name: String,
    /// Consecutive phases of the strategy.
    pub segments: Vec<SegmentConfig>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SegmentConfig {
    /// Number of cycles this segment lasts.
    pub cycles: usize,
    /// Name of the transition matrix used.
    pub transitions: String,
    /// Relative risk applied to every off-diagonal transition.
    #[serde(default)]
    pub relative_risk: Option<Term>,
    /// Per-state costs.
    pub costs: Vec<Term>,
    /// Per-state effects.
    pub effects: Vec<Term>,
}

/// Numeric value in a segment: a number, a parameter name or a sum of terms.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Term {
    Value(f64),
    Param(String),
    Sum(Vec<Term>),
}

#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PsaConfig {
    /// Willingness-to-pay thresholds for the acceptability curve.
    #[serde(default)]
    pub wtp: Vec<f64>,
}

/// Parameter values and matrices used for one model evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSet {
    values: BTreeMap<String, f64>,
    matrices: BTreeMap<String, Array2<f64>>,
}

impl ParamSet {
    pub fn value(&self, name: &str) -> ModelResult<f64> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::param(name, "unknown parameter"))
    }

    pub fn matrix(&self, name: &str) -> ModelResult<&Array2<f64>> {
        self.matrices
            .get(name)
            .ok_or_else(|| ModelError::param(name, "unknown transition matrix"))
    }
}

impl Term {
    pub fn eval(&self, params: &ParamSet) -> ModelResult<f64> {
        match self {
            Term::Value(val) => Ok(*val),
            Term::Param(name) => params.value(name),
            Term::Sum(terms) => terms.iter().map(|term| term.eval(params)).sum(),
        }
    }

    fn check_refs(&self, params: &BTreeMap<String, Param>) -> Result<()> {
        match self {
            Term::Value(val) => check_num(*val, f64::MIN..=f64::MAX),
            Term::Param(name) => {
                if !params.contains_key(name) {
                    bail!("unknown parameter {name:?}");
                }
                Ok(())
            }
            Term::Sum(terms) => terms.iter().try_for_each(|term| term.check_refs(params)),
        }
    }
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents = fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a [`Config`] from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;
        config.validate().context("failed to validate config")?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let n_states = self.n_states();
        check_num(n_states, 1..100).context("invalid number of states")?;
        for (i_state, name) in self.model.states.iter().enumerate() {
            if self.model.states[..i_state].contains(name) {
                bail!("duplicate state {name:?}");
            }
        }
        check_vec(&self.model.init, n_states, VecKind::Counts).context("invalid initial state")?;
        check_num(self.model.n_cycles, 1..10_000).context("invalid number of cycles")?;
        check_num(self.model.discount_rate, 0.0..1.0).context("invalid discount rate")?;
        if let Some(name) = &self.model.death_state {
            self.state_index(name).context("invalid death state")?;
        }

        for (name, par) in &self.params {
            par.validate().with_context(|| format!("invalid parameter {name:?}"))?;
        }
        for (name, spec) in &self.matrices {
            let (mat, kind) = match spec {
                MatrixSpec::Probs(mat) => (mat, VecKind::Prob),
                MatrixSpec::Counts(mat) => (mat, VecKind::Counts),
            };
            check_mat(mat, (n_states, n_states), kind)
                .with_context(|| format!("invalid transition matrix {name:?}"))?;
        }

        check_num(self.arms.len(), 1..100).context("invalid number of arms")?;
        for (i_arm, arm) in self.arms.iter().enumerate() {
            if self.arms[..i_arm].iter().any(|other| other.name == arm.name) {
                bail!("duplicate arm {:?}", arm.name);
            }
            self.validate_arm(arm)
                .with_context(|| format!("invalid arm {:?}", arm.name))?;
        }

        check_vec(&self.psa.wtp, self.psa.wtp.len(), VecKind::NonNegative)
            .context("invalid willingness-to-pay thresholds")?;

        // Fails on anything the structural checks cannot see, such as a
        // relative risk that pushes a diagonal entry below zero.
        self.evaluate(None).context("failed to evaluate base case")?;

        Ok(())
    }

    fn validate_arm(&self, arm: &ArmConfig) -> Result<()> {
        let n_states = self.n_states();
        let n_cycles: usize = arm.segments.iter().map(|seg| seg.cycles).sum();
        if n_cycles != self.model.n_cycles {
            bail!(
                "segments must cover {} cycles, but cover {n_cycles}",
                self.model.n_cycles
            );
        }
        for (i_seg, seg) in arm.segments.iter().enumerate() {
            let check_seg = || -> Result<()> {
                if !self.matrices.contains_key(&seg.transitions) {
                    bail!("unknown transition matrix {:?}", seg.transitions);
                }
                if let Some(rr) = &seg.relative_risk {
                    rr.check_refs(&self.params).context("invalid relative risk")?;
                }
                check_num(seg.costs.len(), n_states..=n_states).context("invalid number of costs")?;
                check_num(seg.effects.len(), n_states..=n_states)
                    .context("invalid number of effects")?;
                for term in seg.costs.iter().chain(&seg.effects) {
                    term.check_refs(&self.params)?;
                }
                Ok(())
            };
            check_seg().with_context(|| format!("invalid segment {i_seg}"))?;
        }
        Ok(())
    }

    pub fn n_states(&self) -> usize {
        self.model.states.len()
    }

    pub fn arm_names(&self) -> Vec<String> {
        self.arms.iter().map(|arm| arm.name.clone()).collect()
    }

    pub fn state_index(&self, name: &str) -> Result<usize> {
        self.model
            .states
            .iter()
            .position(|state| state == name)
            .with_context(|| format!("unknown state {name:?}"))
    }

    pub fn death_index(&self) -> Option<usize> {
        let name = self.model.death_state.as_ref()?;
        self.model.states.iter().position(|state| state == name)
    }

    pub fn simulator(&self) -> ModelResult<CohortSimulator> {
        CohortSimulator::new(Discount::new(
            self.model.discount_rate,
            self.model.discount_effects,
        )?)
    }

    /// Resolve every parameter and matrix once.
    ///
    /// Without a sampler the base-case values are used; with one, each
    /// uncertain parameter is drawn and each count matrix row is drawn from
    /// its Dirichlet distribution. Parameters are resolved in name order so
    /// a seeded sampler always gives the same set.
    pub fn draw_params(&self, mut sampler: Option<&mut (dyn Sampler + '_)>) -> ModelResult<ParamSet> {
        let mut values = BTreeMap::new();
        for (name, par) in &self.params {
            values.insert(name.clone(), par.resolve(sampler.as_deref_mut())?);
        }

        let n_states = self.n_states();
        let mut matrices = BTreeMap::new();
        for (name, spec) in &self.matrices {
            let mut mat = Array2::zeros((n_states, n_states));
            let rows = match spec {
                MatrixSpec::Probs(rows) | MatrixSpec::Counts(rows) => rows,
            };
            if rows.len() != n_states {
                return Err(ModelError::dim(format!("matrix {name:?} rows"), n_states, rows.len()));
            }
            for (i_row, row) in rows.iter().enumerate() {
                if row.len() != n_states {
                    return Err(ModelError::dim(format!("matrix {name:?} row {i_row}"), n_states, row.len()));
                }
                let probs = match (spec, sampler.as_deref_mut()) {
                    (MatrixSpec::Probs(_), _) => row.clone(),
                    (MatrixSpec::Counts(_), Some(sampler)) => {
                        sampler.dirichlet(&dirichlet_from_counts(row)?)?
                    }
                    (MatrixSpec::Counts(_), None) => {
                        let alpha = dirichlet_from_counts(row)?;
                        let total: f64 = alpha.iter().sum();
                        alpha.iter().map(|cnt| cnt / total).collect()
                    }
                };
                mat.row_mut(i_row).assign(&Array1::from(probs));
            }
            matrices.insert(name.clone(), mat);
        }

        Ok(ParamSet { values, matrices })
    }

    /// Build the simulator inputs of one arm from a resolved parameter set.
    pub fn arm_inputs(&self, arm: &ArmConfig, params: &ParamSet) -> ModelResult<CohortInputs> {
        let mut transitions = Schedule::new();
        let mut costs = Schedule::new();
        let mut effects = Schedule::new();
        for seg in &arm.segments {
            let mut mat = params.matrix(&seg.transitions)?.clone();
            if let Some(rr) = &seg.relative_risk {
                apply_relative_risk(&mut mat, rr.eval(params)?)?;
            }
            transitions.push(mat, seg.cycles);
            costs.push(eval_terms(&seg.costs, params)?, seg.cycles);
            effects.push(eval_terms(&seg.effects, params)?, seg.cycles);
        }

        Ok(CohortInputs {
            init: Array1::from(self.model.init.clone()),
            n_cycles: self.model.n_cycles,
            transitions: transitions.into_per_cycle(),
            costs: costs.into_per_cycle(),
            effects: effects.into_per_cycle(),
        })
    }

    /// Resolve parameters and simulate every arm, in arm order.
    pub fn evaluate(&self, mut sampler: Option<&mut (dyn Sampler + '_)>) -> ModelResult<Vec<SimulationResult>> {
        let simulator = self.simulator()?;
        let params = self.draw_params(sampler.as_deref_mut())?;
        self.arms
            .iter()
            .map(|arm| simulator.simulate(&self.arm_inputs(arm, &params)?))
            .collect()
    }
}

fn eval_terms(terms: &[Term], params: &ParamSet) -> ModelResult<Array1<f64>> {
    terms.iter().map(|term| term.eval(params)).collect()
}

/// Scale every off-diagonal probability by `rr`; the diagonal takes up the rest.
pub fn apply_relative_risk(mat: &mut Array2<f64>, rr: f64) -> ModelResult<()> {
    if !(rr.is_finite() && rr >= 0.0) {
        return Err(ModelError::param(
            "relative risk",
            format!("must be finite and non-negative, but is {rr}"),
        ));
    }
    for (i_row, mut row) in mat.outer_iter_mut().enumerate() {
        let mut off_diag = 0.0;
        for (i_col, prob) in row.iter_mut().enumerate() {
            if i_col != i_row {
                *prob *= rr;
                off_diag += *prob;
            }
        }
        row[i_row] = 1.0 - off_diag;
    }
    Ok(())
}
