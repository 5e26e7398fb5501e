//! Run one external media binary (ffmpeg by default) under a deadline.
//!
//! ```no_run
//! use ffrun_runner::Invocation;
//! use std::time::Duration;
//!
//! let invocation = Invocation::ffmpeg()
//!     .with_capture_output(false)
//!     .with_deadline(Duration::from_secs(60))
//!     .add_args(["-i input.mp4", "-c:v copy", "output.mp4"]);
//!
//! if let Err(e) = invocation.execute_blocking() {
//!     eprintln!("ffmpeg failed: {}\n{}", e, invocation.last_error());
//! }
//! ```

mod args;
mod executor;
mod process;

pub use args::split_args;
pub use executor::Invocation;
pub use ffrun_core::{FfrunError, Result, RunnerConfig, StopOutcome};
pub use process::{LaunchOptions, StopHandle};
