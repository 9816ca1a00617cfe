use crate::analysis::{Analyzer, Incremental, incremental};
use crate::config::Config;
use crate::model::Outcome;
use crate::psa::Psa;
use anyhow::{Context, Result};
use glob::glob;
use rmp_serde::encode;
use serde::Serialize;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Streams reserved for each PSA batch file.
const STREAMS_PER_BATCH: u64 = 1 << 32;

/// Deterministic results of one arm.
#[derive(Debug, Serialize)]
pub struct ArmReport {
    pub name: String,
    pub total_cost: f64,
    pub total_effect: f64,
    pub undiscounted_total_cost: f64,
    pub undiscounted_total_effect: f64,
    pub costs: Vec<f64>,
    pub effects: Vec<f64>,
    pub trace: Vec<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraction_alive: Option<Vec<f64>>,
}

#[derive(Debug, Serialize)]
pub struct BaseCaseReport {
    pub states: Vec<String>,
    pub arms: Vec<ArmReport>,
    pub incremental: Vec<Incremental>,
}

/// Runs analyses of the model stored in a directory and manages their outputs.
pub struct Manager {
    model_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(model_dir: P) -> Result<Self> {
        let model_dir = model_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(model_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { model_dir, cfg })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn run_base_case(&self) -> Result<()> {
        let results = self
            .cfg
            .evaluate(None)
            .context("failed to evaluate base case")?;

        let death_idx = self.cfg.death_index();
        let mut arms = Vec::with_capacity(results.len());
        for (arm, res) in self.cfg.arms.iter().zip(&results) {
            let fraction_alive = death_idx
                .map(|idx| res.fraction_alive(idx))
                .transpose()
                .context("failed to compute fraction alive")?;
            arms.push(ArmReport {
                name: arm.name.clone(),
                total_cost: res.total_cost(),
                total_effect: res.total_effect(),
                undiscounted_total_cost: res.undiscounted_total_cost(),
                undiscounted_total_effect: res.undiscounted_total_effect(),
                costs: res.records().iter().map(|rec| rec.cost).collect(),
                effects: res.records().iter().map(|rec| rec.effect).collect(),
                trace: res.state_trace(),
                fraction_alive,
            });
            log::info!(
                "{}: cost {:.2}, effect {:.4}",
                arm.name,
                res.total_cost(),
                res.total_effect()
            );
        }

        let outcomes: Vec<Outcome> = results.iter().map(|res| res.outcome()).collect();
        let incremental = incremental(&self.cfg.arm_names(), &outcomes, 0)
            .context("failed to compute incremental results")?;
        for row in incremental.iter().skip(1) {
            match row.icer {
                Some(icer) => log::info!("{} vs {}: ICER {icer:.2}", row.arm, incremental[0].arm),
                None => log::warn!("{} vs {}: ICER undefined", row.arm, incremental[0].arm),
            }
        }

        let report = BaseCaseReport {
            states: self.cfg.model.states.clone(),
            arms,
            incremental,
        };
        let file = self.base_case_file();
        write_json(&file, &report).with_context(|| format!("failed to write {file:?}"))?;
        log::info!("wrote {file:?}");

        Ok(())
    }

    pub fn run_psa(&self, n_samples: usize, seed: Option<u64>) -> Result<()> {
        let file_idx = self
            .next_psa_idx()
            .context("failed to find next psa file index")?;
        let seed = seed.unwrap_or_else(rand::random);
        let stream_offset = file_idx as u64 * STREAMS_PER_BATCH;
        log::info!("running {n_samples} samples with seed {seed} from stream {stream_offset}");

        let batch = Psa::new(&self.cfg)
            .run(n_samples, seed, stream_offset)
            .context("failed to run psa")?;

        let file = self.psa_file(file_idx);
        let writer = File::create(&file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(writer);
        encode::write(&mut writer, &batch).context("failed to serialize batch")?;
        writer.flush().context("failed to flush writer stream")?;
        log::info!("wrote {file:?}");

        Ok(())
    }

    pub fn analyze_psa(&self) -> Result<()> {
        let mut analyzer = Analyzer::new(self.cfg.arm_names(), self.cfg.psa.wtp.clone());

        let files = self.glob_psa_files().context("failed to find psa files")?;
        for (_, file) in &files {
            analyzer
                .add_file(file)
                .with_context(|| format!("failed to add {file:?}"))?;
        }
        log::info!("analyzed {} psa files", files.len());

        let file = self.summary_file();
        analyzer
            .save_results(&file)
            .context("failed to save results")?;
        log::info!("wrote {file:?}");

        Ok(())
    }

    pub fn clean(&self) -> Result<()> {
        let mut outputs = vec![self.base_case_file(), self.summary_file()];
        outputs.extend(self.glob_psa_files()?.into_iter().map(|(_, file)| file));
        for file in outputs {
            if file.is_file() {
                fs::remove_file(&file).with_context(|| format!("failed to remove {file:?}"))?;
                log::info!("removed {file:?}");
            }
        }
        Ok(())
    }

    /// Stored PSA batch files with their indices, in index order.
    fn glob_psa_files(&self) -> Result<Vec<(usize, PathBuf)>> {
        let pattern = self.model_dir.join("psa-*.msgpack");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let mut files: Vec<_> = glob(pattern)
            .context("failed to glob psa files")?
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .filter_map(|p| Some((parse_psa_idx(&p)?, p)))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Index after the highest stored batch.
    fn next_psa_idx(&self) -> Result<usize> {
        let last = self.glob_psa_files()?.last().map(|(idx, _)| *idx);
        Ok(last.map_or(0, |idx| idx + 1))
    }

    fn base_case_file(&self) -> PathBuf {
        self.model_dir.join("base-case.json")
    }

    fn psa_file(&self, file_idx: usize) -> PathBuf {
        self.model_dir.join(format!("psa-{file_idx:04}.msgpack"))
    }

    fn summary_file(&self) -> PathBuf {
        self.model_dir.join("psa-summary.json")
    }
}

fn parse_psa_idx(file: &Path) -> Option<usize> {
    file.file_name()?
        .to_str()?
        .strip_prefix("psa-")?
        .strip_suffix(".msgpack")?
        .parse()
        .ok()
}

fn write_json<T: Serialize>(file: &Path, value: &T) -> Result<()> {
    let file = File::create(file)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}
