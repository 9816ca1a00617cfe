use crate::error::{ModelError, ModelResult};
use crate::model::Outcome;
use crate::psa::{PsaBatch, PsaSample};
use crate::stats::{Accumulator, Samples};
use anyhow::{Context, Result, bail};
use rmp_serde::decode;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

/// Incremental cost-effectiveness ratio of `b` against `a`.
///
/// # Errors
/// Returns [`ModelError::InvalidParameter`] if both have the same effect.
pub fn icer(a: &Outcome, b: &Outcome) -> ModelResult<f64> {
    let inc_effect = b.effect - a.effect;
    if inc_effect == 0.0 {
        return Err(ModelError::param(
            "incremental effect",
            "ratio is undefined for equal effects",
        ));
    }
    Ok((b.cost - a.cost) / inc_effect)
}

pub fn net_monetary_benefit(outcome: &Outcome, wtp: f64) -> f64 {
    wtp * outcome.effect - outcome.cost
}

/// Index of the arm with the highest net monetary benefit at `wtp`.
///
/// Ties go to the earlier arm.
pub fn optimal_arm(outcomes: &[Outcome], wtp: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i_arm, outcome) in outcomes.iter().enumerate() {
        let nmb = net_monetary_benefit(outcome, wtp);
        if best.is_none_or(|(_, best_nmb)| nmb > best_nmb) {
            best = Some((i_arm, nmb));
        }
    }
    best.map(|(i_arm, _)| i_arm)
}

/// Result of one arm compared with the reference arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incremental {
    pub arm: String,
    pub cost: f64,
    pub effect: f64,
    pub inc_cost: f64,
    pub inc_effect: f64,
    /// `None` for the reference arm and for zero incremental effect.
    pub icer: Option<f64>,
}

/// Compare every arm with the arm at index `reference`.
pub fn incremental(
    names: &[String],
    outcomes: &[Outcome],
    reference: usize,
) -> ModelResult<Vec<Incremental>> {
    if names.len() != outcomes.len() {
        return Err(ModelError::dim("arm outcomes", names.len(), outcomes.len()));
    }
    let Some(ref_outcome) = outcomes.get(reference) else {
        return Err(ModelError::param(
            "reference arm",
            format!("index must be below {}, but is {reference}", outcomes.len()),
        ));
    };

    let rows = names
        .iter()
        .zip(outcomes)
        .enumerate()
        .map(|(i_arm, (name, outcome))| Incremental {
            arm: name.clone(),
            cost: outcome.cost,
            effect: outcome.effect,
            inc_cost: outcome.cost - ref_outcome.cost,
            inc_effect: outcome.effect - ref_outcome.effect,
            icer: if i_arm == reference {
                None
            } else {
                icer(ref_outcome, outcome).ok()
            },
        })
        .collect();
    Ok(rows)
}

/// Point of the cost-effectiveness acceptability curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CeacPoint {
    pub wtp: f64,
    /// Fraction of samples in which each arm is optimal, in arm order.
    pub prob_optimal: Vec<f64>,
}

/// Cost-effectiveness acceptability curve over `wtps`.
///
/// The first sample fixes the number of arms.
///
/// # Errors
/// Returns [`ModelError::DimensionMismatch`] if any sample has a different
/// number of outcomes.
pub fn ceac(samples: &[PsaSample], wtps: &[f64]) -> ModelResult<Vec<CeacPoint>> {
    let n_arms = samples.first().map_or(0, |sample| sample.outcomes.len());
    check_samples(samples, n_arms)?;
    let mut obs = Acceptability::new(n_arms, wtps.to_vec());
    for sample in samples {
        obs.update(sample);
    }
    Ok(obs.points())
}

/// Per-arm cost and effect distributions and incremental means against arm 0.
pub fn summarize(arm_names: &[String], samples: &[PsaSample]) -> ModelResult<serde_json::Value> {
    check_samples(samples, arm_names.len())?;
    let mut arms = ArmOutcomes::new(arm_names.to_vec());
    let mut inc = IncrementalOutcomes::new(arm_names.to_vec());
    for sample in samples {
        arms.update(sample);
        inc.update(sample);
    }
    Ok(serde_json::Value::Array(vec![arms.report(), inc.report()]))
}

fn check_samples(samples: &[PsaSample], n_arms: usize) -> ModelResult<()> {
    for (i_sample, sample) in samples.iter().enumerate() {
        let found = sample.outcomes.len();
        if found != n_arms {
            return Err(ModelError::dim(
                format!("outcomes of sample {i_sample}"),
                n_arms,
                found,
            ));
        }
    }
    Ok(())
}

/// Quantity tracked over PSA samples.
pub trait Obs {
    fn update(&mut self, sample: &PsaSample);
    fn report(&self) -> serde_json::Value;
}

/// Distribution of cost and effect of every arm.
pub struct ArmOutcomes {
    arm_names: Vec<String>,
    costs: Vec<Samples>,
    effects: Vec<Samples>,
}

impl ArmOutcomes {
    pub fn new(arm_names: Vec<String>) -> Self {
        let n_arms = arm_names.len();
        let mut costs = Vec::new();
        costs.resize_with(n_arms, Samples::new);
        let mut effects = Vec::new();
        effects.resize_with(n_arms, Samples::new);
        Self {
            arm_names,
            costs,
            effects,
        }
    }
}

impl Obs for ArmOutcomes {
    fn update(&mut self, sample: &PsaSample) {
        let arms = self.costs.iter_mut().zip(&mut self.effects);
        for ((cost, effect), outcome) in arms.zip(&sample.outcomes) {
            cost.push(outcome.cost);
            effect.push(outcome.effect);
        }
    }

    fn report(&self) -> serde_json::Value {
        let reports: Vec<_> = self
            .arm_names
            .iter()
            .zip(self.costs.iter().zip(&self.effects))
            .map(|(name, (cost, effect))| {
                serde_json::json!({
                    "arm": name,
                    "cost": cost.report(),
                    "effect": effect.report(),
                })
            })
            .collect();
        serde_json::json!({ "arms": reports })
    }
}

/// Incremental cost and effect of every arm against the first one.
pub struct IncrementalOutcomes {
    arm_names: Vec<String>,
    inc_costs: Vec<Accumulator>,
    inc_effects: Vec<Accumulator>,
}

impl IncrementalOutcomes {
    pub fn new(arm_names: Vec<String>) -> Self {
        let n_arms = arm_names.len();
        let mut inc_costs = Vec::new();
        inc_costs.resize_with(n_arms, Accumulator::new);
        let mut inc_effects = Vec::new();
        inc_effects.resize_with(n_arms, Accumulator::new);
        Self {
            arm_names,
            inc_costs,
            inc_effects,
        }
    }
}

impl Obs for IncrementalOutcomes {
    fn update(&mut self, sample: &PsaSample) {
        let Some(reference) = sample.outcomes.first() else {
            return;
        };
        let arms = self.inc_costs.iter_mut().zip(&mut self.inc_effects);
        for ((inc_cost, inc_effect), outcome) in arms.zip(&sample.outcomes) {
            inc_cost.add(outcome.cost - reference.cost);
            inc_effect.add(outcome.effect - reference.effect);
        }
    }

    fn report(&self) -> serde_json::Value {
        let reports: Vec<_> = self
            .arm_names
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i_arm, name)| {
                let inc_cost = self.inc_costs[i_arm].mean();
                let inc_effect = self.inc_effects[i_arm].mean();
                // Ratio of mean increments, not mean of per-sample ratios.
                let icer = (inc_effect != 0.0).then(|| inc_cost / inc_effect);
                serde_json::json!({
                    "arm": name,
                    "inc_cost": self.inc_costs[i_arm].report(),
                    "inc_effect": self.inc_effects[i_arm].report(),
                    "icer": icer,
                })
            })
            .collect();
        serde_json::json!({ "incremental": reports })
    }
}

/// Cost-effectiveness acceptability curve.
pub struct Acceptability {
    wtps: Vec<f64>,
    n_optimal: Vec<Vec<usize>>,
    n_samples: usize,
}

impl Acceptability {
    pub fn new(n_arms: usize, wtps: Vec<f64>) -> Self {
        let n_optimal = vec![vec![0; n_arms]; wtps.len()];
        Self {
            wtps,
            n_optimal,
            n_samples: 0,
        }
    }

    pub fn points(&self) -> Vec<CeacPoint> {
        self.wtps
            .iter()
            .zip(&self.n_optimal)
            .map(|(&wtp, counts)| CeacPoint {
                wtp,
                prob_optimal: counts
                    .iter()
                    .map(|&cnt| cnt as f64 / self.n_samples as f64)
                    .collect(),
            })
            .collect()
    }
}

impl Obs for Acceptability {
    fn update(&mut self, sample: &PsaSample) {
        self.n_samples += 1;
        for (&wtp, counts) in self.wtps.iter().zip(&mut self.n_optimal) {
            if let Some(cnt) = optimal_arm(&sample.outcomes, wtp).and_then(|i_arm| counts.get_mut(i_arm)) {
                *cnt += 1;
            }
        }
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "ceac": self.points() })
    }
}

/// Summarises stored PSA batches.
pub struct Analyzer {
    arm_names: Vec<String>,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new(arm_names: Vec<String>, wtps: Vec<f64>) -> Self {
        let n_arms = arm_names.len();
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(ArmOutcomes::new(arm_names.clone())),
            Box::new(IncrementalOutcomes::new(arm_names.clone())),
            Box::new(Acceptability::new(n_arms, wtps)),
        ];
        Self {
            arm_names,
            obs_ptr_vec,
        }
    }

    pub fn add_batch(&mut self, batch: &PsaBatch) -> Result<()> {
        if batch.arm_names != self.arm_names {
            bail!(
                "batch arms {:?} differ from the configured arms {:?}",
                batch.arm_names,
                self.arm_names
            );
        }
        for sample in &batch.samples {
            if sample.outcomes.len() != self.arm_names.len() {
                bail!("sample has {} outcomes", sample.outcomes.len());
            }
            for obs in &mut self.obs_ptr_vec {
                obs.update(sample);
            }
        }
        Ok(())
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let batch: PsaBatch = decode::from_read(&mut reader).context("failed to read batch")?;
        self.add_batch(&batch)
    }

    pub fn report(&self) -> serde_json::Value {
        let reports: Vec<_> = self.obs_ptr_vec.iter().map(|obs| obs.report()).collect();
        serde_json::Value::Array(reports)
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &self.report()).context("failed to write results")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(cost: f64, effect: f64) -> Outcome {
        Outcome { cost, effect }
    }

    #[test]
    fn icer_is_cost_over_effect_difference() {
        let a = outcome(1000.0, 5.0);
        let b = outcome(3000.0, 5.5);
        assert!((icer(&a, &b).unwrap() - 4000.0).abs() < 1e-9);
        assert!(icer(&a, &a).is_err());
    }

    #[test]
    fn incremental_skips_reference_ratio() {
        let names = vec!["a".to_string(), "b".to_string()];
        let rows = incremental(&names, &[outcome(10.0, 1.0), outcome(30.0, 2.0)], 0).unwrap();
        assert_eq!(rows[0].icer, None);
        assert_eq!(rows[1].inc_cost, 20.0);
        assert_eq!(rows[1].icer, Some(20.0));
        assert!(incremental(&names, &[outcome(1.0, 1.0)], 0).is_err());
        assert!(incremental(&names, &[outcome(1.0, 1.0), outcome(1.0, 1.0)], 2).is_err());
    }

    #[test]
    fn optimal_arm_switches_with_wtp() {
        let outcomes = [outcome(1000.0, 1.0), outcome(5000.0, 1.5)];
        assert_eq!(optimal_arm(&outcomes, 0.0), Some(0));
        assert_eq!(optimal_arm(&outcomes, 10_000.0), Some(1));
        assert_eq!(optimal_arm(&[], 10.0), None);
    }

    #[test]
    fn ceac_fractions_sum_to_one() {
        let samples = vec![
            PsaSample {
                outcomes: vec![outcome(1000.0, 1.0), outcome(5000.0, 1.5)],
            },
            PsaSample {
                outcomes: vec![outcome(1000.0, 1.0), outcome(2000.0, 1.5)],
            },
        ];
        let points = ceac(&samples, &[0.0, 4000.0, 20_000.0]).unwrap();
        assert_eq!(points[0].prob_optimal, vec![1.0, 0.0]);
        assert_eq!(points[1].prob_optimal, vec![0.5, 0.5]);
        assert_eq!(points[2].prob_optimal, vec![0.0, 1.0]);
    }

    #[test]
    fn summarize_reports_means_and_increments() {
        let names = vec!["a".to_string(), "b".to_string()];
        let samples = vec![
            PsaSample {
                outcomes: vec![outcome(100.0, 1.0), outcome(200.0, 2.0)],
            },
            PsaSample {
                outcomes: vec![outcome(300.0, 1.0), outcome(600.0, 2.0)],
            },
        ];
        let summary = summarize(&names, &samples).unwrap();
        assert_eq!(summary[0]["arms"][0]["cost"]["mean"], 200.0);
        assert_eq!(summary[1]["incremental"][0]["arm"], "b");
        assert_eq!(summary[1]["incremental"][0]["inc_cost"]["mean"], 200.0);
        assert_eq!(summary[1]["incremental"][0]["icer"], 200.0);
    }

    #[test]
    fn ragged_samples_are_rejected() {
        let samples = vec![
            PsaSample {
                outcomes: vec![outcome(1000.0, 1.0)],
            },
            PsaSample {
                outcomes: vec![outcome(1000.0, 1.0), outcome(2000.0, 1.5)],
            },
        ];
        assert!(matches!(
            ceac(&samples, &[0.0, 1000.0]),
            Err(ModelError::DimensionMismatch {
                expected: 1,
                found: 2,
                ..
            })
        ));
        let names = vec!["a".to_string(), "b".to_string()];
        assert!(matches!(
            summarize(&names, &samples),
            Err(ModelError::DimensionMismatch {
                expected: 2,
                found: 1,
                ..
            })
        ));
        assert!(ceac(&[], &[0.0]).unwrap()[0].prob_optimal.is_empty());
    }

    #[test]
    fn analyzer_rejects_foreign_batch() {
        let mut analyzer = Analyzer::new(vec!["a".into(), "b".into()], vec![0.0]);
        let batch = PsaBatch {
            arm_names: vec!["a".into(), "c".into()],
            seed: 0,
            stream_offset: 0,
            samples: Vec::new(),
        };
        assert!(analyzer.add_batch(&batch).is_err());
    }

    #[test]
    fn analyzer_reports_every_observable() {
        let mut analyzer = Analyzer::new(vec!["a".into(), "b".into()], vec![1000.0]);
        let batch = PsaBatch {
            arm_names: vec!["a".into(), "b".into()],
            seed: 0,
            stream_offset: 0,
            samples: vec![
                PsaSample {
                    outcomes: vec![outcome(100.0, 1.0), outcome(300.0, 1.1)],
                },
                PsaSample {
                    outcomes: vec![outcome(120.0, 1.0), outcome(320.0, 1.3)],
                },
            ],
        };
        analyzer.add_batch(&batch).unwrap();
        let report = analyzer.report();
        let icer = report[1]["incremental"][0]["icer"].as_f64().unwrap();
        assert!((icer - 1000.0).abs() < 1e-6);
        assert_eq!(report[0]["arms"][1]["arm"], "b");
        assert_eq!(report[2]["ceac"][0]["prob_optimal"][1], 0.5);
    }
}
