use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FfrunError {
    #[error("Failed to launch {program}: {source}")]
    LaunchFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process exited with {}: {}", describe_exit(.code), .stderr)]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Deadline of {deadline:?} exceeded, process killed")]
    DeadlineExceeded { deadline: Duration },

    #[error("Process was stopped before it exited")]
    Stopped,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

impl FfrunError {
    /// True for failures where the child never got as far as running.
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, FfrunError::LaunchFailure { .. })
    }

    /// True when the process was killed by the runner, either by deadline or by `stop`.
    pub fn is_killed(&self) -> bool {
        matches!(self, FfrunError::DeadlineExceeded { .. } | FfrunError::Stopped)
    }
}

pub type Result<T> = std::result::Result<T, FfrunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_zero_exit_message_includes_stderr() {
        let err = FfrunError::NonZeroExit {
            code: Some(1),
            stderr: "input.mp4: No such file or directory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Process exited with status 1: input.mp4: No such file or directory"
        );
    }

    #[test]
    fn test_signal_exit_message() {
        let err = FfrunError::NonZeroExit { code: None, stderr: String::new() };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_error_classification() {
        let launch = FfrunError::LaunchFailure {
            program: "ffmpeg".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(launch.is_launch_failure());
        assert!(!launch.is_killed());

        let timeout = FfrunError::DeadlineExceeded { deadline: Duration::from_secs(1) };
        assert!(timeout.is_killed());
        assert!(FfrunError::Stopped.is_killed());
    }
}
