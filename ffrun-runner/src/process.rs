// Process slot shared between a running invocation and whoever wants to stop it

use ffrun_core::StopOutcome;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, info};

/// Launch settings layered over the inherited environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchOptions {
    pub env: BTreeMap<String, String>,
    pub working_directory: Option<PathBuf>,
}

#[derive(Debug)]
struct TrackedProcess {
    pid: Option<u32>,
    kill: Arc<Notify>,
}

/// Cloneable handle for stopping or inspecting an invocation from another
/// thread or task.
///
/// All reads and writes of the tracked process go through one mutex, so a
/// `stop` racing with the launch either sees the new process or sees nothing.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    slot: Arc<Mutex<Option<TrackedProcess>>>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the tracked process to be killed immediately.
    ///
    /// Does not wait for the kill to land. Calling this with nothing running
    /// is a no-op.
    pub fn stop(&self) -> StopOutcome {
        match self.lock().as_ref() {
            Some(process) => {
                info!(pid = ?process.pid, "Stop requested, killing process");
                process.kill.notify_one();
                StopOutcome::Requested
            }
            None => {
                debug!("Stop requested but no process is running");
                StopOutcome::AlreadyTerminated
            }
        }
    }

    /// True from launch until the executing call has observed the exit.
    ///
    /// The process may already be gone inside that window; the slot is only
    /// released once the wait completes.
    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    /// OS id of the tracked process, if any
    pub fn pid(&self) -> Option<u32> {
        self.lock().as_ref().and_then(|process| process.pid)
    }

    /// Publish a freshly launched process. The slot is released when the
    /// returned guard drops.
    pub(crate) fn track(&self, pid: Option<u32>) -> Tracked {
        let kill = Arc::new(Notify::new());
        *self.lock() = Some(TrackedProcess {
            pid,
            kill: Arc::clone(&kill),
        });
        Tracked {
            handle: self.clone(),
            kill,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<TrackedProcess>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ownership of the slot for the duration of one execution
pub(crate) struct Tracked {
    handle: StopHandle,
    kill: Arc<Notify>,
}

impl Tracked {
    /// Resolves once `stop` has been called for this process.
    pub(crate) async fn stop_requested(&self) {
        self.kill.notified().await
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        let mut slot = self.handle.lock();
        // Overlapping executions: leave a newer process in place
        if slot
            .as_ref()
            .is_some_and(|process| Arc::ptr_eq(&process.kill, &self.kill))
        {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stop_with_nothing_tracked() {
        let handle = StopHandle::new();
        assert_eq!(handle.stop(), StopOutcome::AlreadyTerminated);
        assert!(!handle.is_running());
        assert_eq!(handle.pid(), None);
    }

    #[test]
    fn test_track_and_release() {
        let handle = StopHandle::new();
        let tracked = handle.track(Some(4242));
        assert!(handle.is_running());
        assert_eq!(handle.pid(), Some(4242));

        drop(tracked);
        assert!(!handle.is_running());
        assert_eq!(handle.stop(), StopOutcome::AlreadyTerminated);
    }

    #[test]
    fn test_clones_share_the_slot() {
        let handle = StopHandle::new();
        let observer = handle.clone();
        let _tracked = handle.track(Some(7));
        assert!(observer.is_running());
        assert_eq!(observer.stop(), StopOutcome::Requested);
    }

    #[test]
    fn test_stale_guard_does_not_release_newer_process() {
        let handle = StopHandle::new();
        let first = handle.track(Some(1));
        let _second = handle.track(Some(2));

        drop(first);
        assert_eq!(handle.pid(), Some(2));
    }

    #[tokio::test]
    async fn test_stop_before_wait_is_not_lost() {
        let handle = StopHandle::new();
        let tracked = handle.track(None);
        assert!(handle.stop().was_requested());

        tokio::time::timeout(Duration::from_secs(1), tracked.stop_requested())
            .await
            .expect("stop notification should be stored until awaited");
    }

    #[cfg(unix)]
    #[test]
    fn test_is_running_stays_true_until_exit_is_observed() {
        let handle = StopHandle::new();
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let tracked = handle.track(Some(child.id()));

        // The child has exited and been reaped, but the slot only clears when
        // the executing side releases it: is_running is stale in this window
        assert!(child.wait().unwrap().success());
        assert!(handle.is_running());
        assert_eq!(handle.stop(), StopOutcome::Requested);

        drop(tracked);
        assert!(!handle.is_running());
    }

    #[test]
    fn test_launch_options_default_inherits() {
        let options = LaunchOptions::default();
        assert!(options.env.is_empty());
        assert!(options.working_directory.is_none());
    }
}
