pub mod analyzer;
pub mod engine;
pub mod error;
pub mod network;
pub mod recorder;
pub mod scenario_runner;
pub mod sink;
pub mod trace;
pub mod transport;
pub mod utilization;
pub mod workload;

pub use engine::Simulator;
pub use error::{ConfigError, SimError};
pub use scenario_runner::RunSummary;
pub use trace::SimulationReport;
pub use utilization::{Utilization, UtilizationAccumulator};
pub use workload::{SizeCdf, StopSignal, WorkloadGenerator, WorkloadSpec};
