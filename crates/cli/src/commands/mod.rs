//! CLI command implementations

mod check_config;
mod simulate;

pub use check_config::{check_config, CheckConfigArgs};
pub use simulate::{simulate_batch, simulate_stream, SimulateBatchArgs, SimulateStreamArgs};
