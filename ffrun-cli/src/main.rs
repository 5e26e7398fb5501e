use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use ffrun_core::{as_millis_u64, RunnerConfig};
use ffrun_runner::{FfrunError, Invocation};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ffrun")]
#[command(about = "Run ffmpeg (or another media binary) under a deadline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML file with runner defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output and the full stderr of failed runs
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the binary once with the given arguments
    Run(RunArgs),

    /// Show where the executable resolves on PATH
    Which {
        /// Executable to look up (defaults to the configured one)
        #[arg(short, long)]
        executable: Option<String>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Executable to launch (defaults to ffmpeg)
    #[arg(short, long)]
    executable: Option<String>,

    /// Deadline in seconds; the process is killed when it elapses
    #[arg(short, long)]
    deadline: Option<f64>,

    /// Discard standard output instead of printing it
    #[arg(long)]
    no_capture: bool,

    /// Print a JSON report instead of raw output
    #[arg(long)]
    json: bool,

    /// Arguments passed to the executable, e.g. `-- -i in.mp4 -c:v copy out.mp4`.
    ///
    /// Each argument is split again on whitespace, so a quoted path with
    /// spaces such as "my clip.mp4" arrives as two arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Serialize)]
struct RunReport {
    invocation_id: String,
    command: String,
    success: bool,
    exit_code: Option<i32>,
    duration_ms: u64,
    stdout: String,
    error: Option<String>,
    stderr: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => RunnerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RunnerConfig::default(),
    };
    config.debug |= cli.debug;

    match cli.command {
        Commands::Run(args) => {
            let code = run(config, args).await?;
            process::exit(code);
        }
        Commands::Which { executable } => {
            if let Some(executable) = executable {
                config.executable = executable;
            }
            let path = Invocation::from_config(&config)?.resolve_executable()?;
            println!("{}", path.display());
        }
    }

    Ok(())
}

async fn run(mut config: RunnerConfig, args: RunArgs) -> anyhow::Result<i32> {
    if let Some(executable) = args.executable {
        config.executable = executable;
    }
    if let Some(deadline) = args.deadline {
        config.deadline_secs = deadline;
    }
    if args.no_capture {
        config.capture_output = false;
    }

    let invocation = Arc::new(Invocation::from_config(&config)?.add_args(&args.args));

    // Ctrl-C kills the child instead of leaving it behind
    let stop_handle = invocation.stop_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping process");
            stop_handle.stop();
        }
    });

    let started = Instant::now();
    let result = invocation.execute().await;
    let duration = started.elapsed();
    ctrl_c.abort();

    info!(
        invocation_id = %invocation.id(),
        duration_ms = as_millis_u64(duration),
        success = result.is_ok(),
        "Run finished"
    );

    let code = exit_code_for(&result);
    if args.json {
        let report = build_report(&invocation, &result, duration);
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match &result {
            Ok(stdout) => print!("{}", stdout),
            Err(e) => {
                eprintln!("ffrun: {}", e);
                let stderr = invocation.last_error();
                if !stderr.is_empty() && !matches!(e, FfrunError::NonZeroExit { .. }) {
                    eprintln!("{}", stderr.trim_end());
                }
            }
        }
    }

    Ok(code)
}

fn build_report(invocation: &Invocation, result: &Result<String, FfrunError>, duration: Duration) -> RunReport {
    let (stdout, error) = match result {
        Ok(stdout) => (stdout.clone(), None),
        Err(e) => (String::new(), Some(e.to_string())),
    };
    RunReport {
        invocation_id: invocation.id().to_string(),
        command: invocation.command_line(),
        success: result.is_ok(),
        exit_code: invocation.last_exit_code(),
        duration_ms: as_millis_u64(duration),
        stdout,
        error,
        stderr: if result.is_err() {
            invocation.last_error()
        } else {
            String::new()
        },
    }
}

/// Follows the GNU timeout conventions for killed and unlaunchable commands
fn exit_code_for(result: &Result<String, FfrunError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(FfrunError::NonZeroExit { code: Some(code), .. }) => *code,
        Err(FfrunError::NonZeroExit { code: None, .. }) => 1,
        Err(FfrunError::DeadlineExceeded { .. }) => 124,
        Err(FfrunError::Stopped) => 130,
        Err(FfrunError::LaunchFailure { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            127
        }
        Err(FfrunError::LaunchFailure { .. }) => 126,
        Err(_) => 1,
    }
}
