mod config;
mod error;
mod models;

pub use config::RunnerConfig;
pub use error::{FfrunError, Result};
pub use models::{as_millis_u64, StopOutcome, DEFAULT_DEADLINE, DEFAULT_EXECUTABLE};
