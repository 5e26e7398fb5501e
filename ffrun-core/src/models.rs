use std::time::Duration;

/// Binary launched when no executable is configured
pub const DEFAULT_EXECUTABLE: &str = "ffmpeg";

/// Deadline applied to a freshly constructed invocation
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Result of asking an invocation to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A kill was requested for the tracked process
    Requested,
    /// Nothing was running, so there was nothing to kill
    AlreadyTerminated,
}

impl StopOutcome {
    pub fn was_requested(self) -> bool {
        self == StopOutcome::Requested
    }
}

/// Milliseconds in a duration, saturating instead of truncating
pub fn as_millis_u64(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
