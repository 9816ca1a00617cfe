//! Markov cohort cost-effectiveness models.
//!
//! The core is [`engine::CohortSimulator`], which moves a cohort through a
//! sequence of transition matrices and accumulates discounted costs and
//! effects. Around it sit the pieces needed for a full analysis: time-varying
//! [`schedule`]s, incremental [`analysis`], method-of-moments [`fitting`],
//! seeded [`sampling`], parametric [`survival`] curves and a parallel
//! probabilistic sensitivity analysis runner ([`psa`]).

pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod fitting;
pub mod manager;
pub mod model;
pub mod psa;
pub mod sampling;
pub mod schedule;
pub mod stats;
pub mod survival;
pub mod utils;

pub use engine::{CohortInputs, CohortSimulator, Discount, PerCycle};
pub use error::{ModelError, ModelResult};
pub use model::{CycleRecord, Outcome, SimulationResult};
pub use schedule::Schedule;
