use crate::error::{FfrunError, Result};
use crate::models::{DEFAULT_DEADLINE, DEFAULT_EXECUTABLE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runner settings loadable from a TOML file.
///
/// Every key is optional; missing keys take the same defaults as a freshly
/// constructed invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    pub executable: String,
    pub deadline_secs: f64,
    pub capture_output: bool,
    pub debug: bool,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            executable: DEFAULT_EXECUTABLE.to_string(),
            deadline_secs: DEFAULT_DEADLINE.as_secs_f64(),
            capture_output: true,
            debug: false,
            env: BTreeMap::new(),
            working_dir: None,
        }
    }
}

impl RunnerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: RunnerConfig = toml::from_str(input)
            .map_err(|e| FfrunError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// The deadline as a `Duration`. Zero is allowed and times out immediately.
    pub fn deadline(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.deadline_secs).map_err(|e| {
            FfrunError::InvalidConfiguration(format!(
                "deadline_secs must be a non-negative number, got {}: {}",
                self.deadline_secs, e
            ))
        })
    }

    fn validate(&self) -> Result<()> {
        if self.executable.trim().is_empty() {
            return Err(FfrunError::InvalidConfiguration(
                "executable must not be empty".to_string(),
            ));
        }
        self.deadline()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_config_default() {
        let config = RunnerConfig::default();
        assert_eq!(config.executable, "ffmpeg");
        assert_eq!(config.deadline().unwrap(), Duration::from_secs(30));
        assert!(config.capture_output);
        assert!(!config.debug);
        assert!(config.env.is_empty());
        assert!(config.working_dir.is_none());
    }

    #[test]
    fn test_runner_config_empty_file_uses_defaults() {
        let config = RunnerConfig::from_toml_str("").unwrap();
        assert_eq!(config, RunnerConfig::default());
    }

    #[test]
    fn test_runner_config_full_file() {
        let config = RunnerConfig::from_toml_str(
            r#"
executable = "/usr/local/bin/ffmpeg"
deadline_secs = 1.5
capture_output = false
debug = true
working_dir = "/tmp/renders"

[env]
AV_LOG_FORCE_NOCOLOR = "1"
"#,
        )
        .unwrap();

        assert_eq!(config.executable, "/usr/local/bin/ffmpeg");
        assert_eq!(config.deadline().unwrap(), Duration::from_millis(1500));
        assert!(!config.capture_output);
        assert!(config.debug);
        assert_eq!(config.working_dir, Some(PathBuf::from("/tmp/renders")));
        assert_eq!(config.env.get("AV_LOG_FORCE_NOCOLOR").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_runner_config_zero_deadline_accepted() {
        let config = RunnerConfig::from_toml_str("deadline_secs = 0").unwrap();
        assert_eq!(config.deadline().unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_runner_config_rejects_negative_deadline() {
        let err = RunnerConfig::from_toml_str("deadline_secs = -1").unwrap_err();
        assert!(matches!(err, FfrunError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_runner_config_rejects_empty_executable() {
        let err = RunnerConfig::from_toml_str(r#"executable = "  ""#).unwrap_err();
        assert!(matches!(err, FfrunError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_runner_config_rejects_malformed_toml() {
        let err = RunnerConfig::from_toml_str("deadline_secs = ").unwrap_err();
        assert!(matches!(err, FfrunError::InvalidConfiguration(_)));
    }
}
