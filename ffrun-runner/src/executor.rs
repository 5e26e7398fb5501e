use crate::args::{render_command_line, split_args};
use crate::process::{LaunchOptions, StopHandle};
use ffrun_core::{
    as_millis_u64, FfrunError, Result, RunnerConfig, StopOutcome, DEFAULT_DEADLINE,
    DEFAULT_EXECUTABLE,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long stream readers get to drain after the child was killed
const KILL_DRAIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
struct LastRun {
    error: String,
    exit_code: Option<i32>,
}

/// How the wait for the child ended
enum Completion {
    Exited(std::process::ExitStatus),
    DeadlineExceeded,
    Stopped,
}

/// One configured external process invocation.
///
/// Configuration is done with consuming builders before the invocation is
/// shared. `execute`, `stop` and `is_running` take `&self`, so an
/// `Arc<Invocation>` or a [`StopHandle`] can be handed to a supervisor.
///
/// Only one `execute` should be in flight at a time. Overlapping calls do
/// not corrupt anything, but `stop` and `is_running` then only see the most
/// recently launched process.
#[derive(Debug)]
pub struct Invocation {
    id: Uuid,
    args: Vec<String>,
    deadline: Duration,
    capture_output: bool,
    debug: bool,
    launch: LaunchOptions,
    handle: StopHandle,
    last_run: Mutex<LastRun>,
}

impl Invocation {
    /// `executable` is used verbatim as the first argument and never split.
    pub fn new<S: Into<String>>(executable: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            args: vec![executable.into()],
            deadline: DEFAULT_DEADLINE,
            capture_output: true,
            debug: false,
            launch: LaunchOptions::default(),
            handle: StopHandle::new(),
            last_run: Mutex::new(LastRun::default()),
        }
    }

    pub fn ffmpeg() -> Self {
        Self::new(DEFAULT_EXECUTABLE)
    }

    pub fn from_config(config: &RunnerConfig) -> Result<Self> {
        let mut invocation = Self::new(config.executable.clone())
            .with_deadline(config.deadline()?)
            .with_capture_output(config.capture_output)
            .with_debug(config.debug);
        invocation.launch.env = config.env.clone();
        invocation.launch.working_directory = config.working_dir.clone();
        Ok(invocation)
    }

    /// Append arguments, word-splitting each token on whitespace.
    pub fn add_args<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for token in tokens {
            self.args.extend(split_args(token.as_ref()));
        }
        self
    }

    pub fn arg<S: AsRef<str>>(self, token: S) -> Self {
        self.add_args([token])
    }

    /// Applies to the next `execute`; zero times out right away.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Log the full stderr of failed runs at warn level.
    pub fn with_debug(mut self, enable: bool) -> Self {
        self.debug = enable;
        self
    }

    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.launch.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.launch.working_directory = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_launch_options(mut self, options: LaunchOptions) -> Self {
        self.launch = options;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn executable(&self) -> &str {
        &self.args[0]
    }

    /// Full argument vector, executable first
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn capture_output(&self) -> bool {
        self.capture_output
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn launch_options(&self) -> &LaunchOptions {
        &self.launch
    }

    /// Stderr of the most recent failed run, empty if no run has failed yet
    pub fn last_error(&self) -> String {
        self.last_run().error.clone()
    }

    /// Exit code of the most recent run that exited on its own
    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_run().exit_code
    }

    pub fn command_line(&self) -> String {
        render_command_line(&self.args)
    }

    /// Locate the executable on `PATH`. Diagnostic only: `execute` does not
    /// call this and reports a missing binary as a launch failure instead.
    pub fn resolve_executable(&self) -> Result<PathBuf> {
        which::which(self.executable()).map_err(|e| FfrunError::LaunchFailure {
            program: self.executable().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, e),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.handle.clone()
    }

    pub fn stop(&self) -> StopOutcome {
        self.handle.stop()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.pid()
    }

    /// Run the process to completion, the deadline, or a `stop`.
    ///
    /// Returns captured stdout on success, or an empty string when capture
    /// is off. A killed process is reaped before this returns.
    pub async fn execute(&self) -> Result<String> {
        let program = self.executable();
        let deadline = self.deadline;

        let mut command = Command::new(program);
        command
            .args(&self.args[1..])
            .envs(&self.launch.env)
            .stdin(Stdio::null())
            .stdout(if self.capture_output {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.launch.working_directory {
            command.current_dir(dir);
        }

        info!(
            invocation_id = %self.id,
            command = %self.command_line(),
            deadline_ms = as_millis_u64(deadline),
            "Launching process"
        );

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(
                    invocation_id = %self.id,
                    program = %program,
                    error = %e,
                    "Process could not be started"
                );
                self.record_failure(e.to_string(), None);
                return Err(FfrunError::LaunchFailure {
                    program: program.to_string(),
                    source: e,
                });
            }
        };

        let pid = child.id();
        let tracked = self.handle.track(pid);
        debug!(invocation_id = %self.id, pid = ?pid, "Process started");

        let mut stdout_reader = child.stdout.take().map(|out| tokio::spawn(read_stream(out)));
        let mut stderr_reader = child.stderr.take().map(|err| tokio::spawn(read_stream(err)));

        // The deadline covers draining the pipes too: a forked grandchild can
        // keep them open long after the child itself has exited.
        let waited = tokio::time::timeout(deadline, async {
            tokio::select! {
                finished = async {
                    let status = child.wait().await?;
                    let stdout = collect_output(stdout_reader.as_mut(), None).await;
                    let stderr = collect_output(stderr_reader.as_mut(), None).await;
                    Ok::<_, std::io::Error>((status, stdout, stderr))
                } => Some(finished),
                _ = tracked.stop_requested() => None,
            }
        })
        .await;

        let (completion, stdout, stderr) = match waited {
            Ok(Some(Ok((status, stdout, stderr)))) => (Completion::Exited(status), stdout, stderr),
            Ok(Some(Err(e))) => return Err(self.wait_failed(e)),
            Ok(None) => {
                self.kill(&mut child).await;
                abort_reader(stdout_reader.as_ref());
                let stderr = collect_output(stderr_reader.as_mut(), Some(KILL_DRAIN_GRACE)).await;
                (Completion::Stopped, String::new(), stderr)
            }
            Err(_) => {
                warn!(
                    invocation_id = %self.id,
                    pid = ?pid,
                    deadline_ms = as_millis_u64(deadline),
                    "Deadline exceeded, killing process"
                );
                self.kill(&mut child).await;
                abort_reader(stdout_reader.as_ref());
                let stderr = collect_output(stderr_reader.as_mut(), Some(KILL_DRAIN_GRACE)).await;
                (Completion::DeadlineExceeded, String::new(), stderr)
            }
        };
        drop(tracked);

        match completion {
            Completion::Exited(status) if status.success() => {
                self.last_run().exit_code = status.code();
                info!(invocation_id = %self.id, exit_code = ?status.code(), "Process completed");
                if self.capture_output {
                    Ok(stdout)
                } else {
                    Ok(String::new())
                }
            }
            Completion::Exited(status) => {
                warn!(invocation_id = %self.id, exit_code = ?status.code(), "Process failed");
                self.record_failure(stderr.clone(), status.code());
                Err(FfrunError::NonZeroExit {
                    code: status.code(),
                    stderr,
                })
            }
            Completion::DeadlineExceeded => {
                self.record_failure(stderr, None);
                Err(FfrunError::DeadlineExceeded { deadline })
            }
            Completion::Stopped => {
                info!(invocation_id = %self.id, pid = ?pid, "Process stopped");
                self.record_failure(stderr, None);
                Err(FfrunError::Stopped)
            }
        }
    }

    /// Blocking variant of [`Invocation::execute`] on a private runtime.
    ///
    /// Must not be called from inside a tokio runtime.
    pub fn execute_blocking(&self) -> Result<String> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.execute())
    }

    async fn kill(&self, child: &mut Child) {
        // Exited already, only its pipes were still open
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        // kill() also waits, so the child is reaped here
        if let Err(e) = child.kill().await {
            warn!(invocation_id = %self.id, error = %e, "Failed to kill process");
        }
    }

    fn wait_failed(&self, e: std::io::Error) -> FfrunError {
        error!(invocation_id = %self.id, error = %e, "Failed to wait for process");
        self.record_failure(e.to_string(), None);
        e.into()
    }

    fn record_failure(&self, stderr: String, exit_code: Option<i32>) {
        if self.debug {
            warn!(invocation_id = %self.id, stderr = %stderr, "Execution error output");
        }
        let mut last_run = self.last_run();
        last_run.error = stderr;
        last_run.exit_code = exit_code;
    }

    fn last_run(&self) -> MutexGuard<'_, LastRun> {
        self.last_run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Invocation {
    fn default() -> Self {
        Self::ffmpeg()
    }
}

async fn read_stream<R: AsyncRead + Unpin>(mut stream: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(buf)
}

fn abort_reader(reader: Option<&JoinHandle<std::io::Result<Vec<u8>>>>) {
    if let Some(reader) = reader {
        reader.abort();
    }
}

/// Join a stream reader. With a grace period the reader is aborted once it
/// elapses; without one this waits for the pipe to close.
async fn collect_output(
    reader: Option<&mut JoinHandle<std::io::Result<Vec<u8>>>>,
    grace: Option<Duration>,
) -> String {
    let Some(reader) = reader else {
        return String::new();
    };

    let joined = match grace {
        Some(grace) => match tokio::time::timeout(grace, &mut *reader).await {
            Ok(joined) => joined,
            Err(_) => {
                debug!("Output stream still open after kill, discarding");
                reader.abort();
                return String::new();
            }
        },
        None => (&mut *reader).await,
    };

    match joined {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to read process output");
            String::new()
        }
        Err(e) if e.is_cancelled() => String::new(),
        Err(e) => {
            warn!(error = %e, "Output reader task failed");
            String::new()
        }
    }
}
