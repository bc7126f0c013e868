//! CLI argument definitions and shared statics.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

pub fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

#[derive(Parser, Debug)]
#[command(name = "flash", version, about = "Flash-sintering experiment controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/flash_config.toml")]
    pub config: PathBuf,

    /// Print results and errors as JSON lines; log as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG wins when set
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    pub fn os_default() -> Self {
        if cfg!(target_os = "linux") {
            RtLock::Current
        } else {
            RtLock::None
        }
    }
}

/// On-disk layout of the experiment record.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RecordFormat {
    Csv,
    Jsonl,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RtArgs {
    /// Enable real-time mode (SCHED_FIFO, affinity, mlockall)
    #[arg(
        long,
        action = ArgAction::SetTrue,
        long_help = "Enable real-time mode on supported OSes.\n\nLinux: requests SCHED_FIFO priority, pins the process to one CPU and locks memory with mlockall. Needs CAP_SYS_NICE / CAP_IPC_LOCK (or root); failures are logged and the run continues without them.\n\nOther OSes: only memory locking is attempted."
    )]
    pub rt: bool,
    /// SCHED_FIFO priority when --rt is enabled (Linux only; defaults to the maximum)
    #[arg(long, value_name = "PRIO")]
    pub rt_prio: Option<i32>,
    /// Memory locking mode for --rt: none, current, or all
    #[arg(long, value_enum, value_name = "MODE")]
    pub rt_lock: Option<RtLock>,
    /// CPU index to pin to when --rt is enabled (Linux only; defaults to 0)
    #[arg(long, value_name = "CPU")]
    pub rt_cpu: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Write every record of the experiment to this file
    #[arg(long, value_name = "FILE")]
    pub record: Option<PathBuf>,
    /// Record file format
    #[arg(long, value_enum, default_value = "csv")]
    pub format: RecordFormat,
    /// Override the ramp target voltage (V)
    #[arg(long, value_name = "VOLTS")]
    pub target_voltage: Option<f64>,
    /// Override the post-flash current setpoint (A)
    #[arg(long, value_name = "AMPS")]
    pub current: Option<f64>,
    /// Override the current-limited dwell (ms)
    #[arg(long, value_name = "MS")]
    pub dwell_ms: Option<u64>,
    /// Abort the experiment if it has not finished after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout_s: Option<u64>,
    /// Print control loop stats to stderr
    #[arg(long, action = ArgAction::SetTrue)]
    pub stats: bool,
    #[command(flatten)]
    pub rt: RtArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one experiment on the simulated rig
    Run(RunArgs),
    /// Validate the config and print the derived experiment parameters
    CheckConfig,
    /// Read every channel of the rig once and zero both outputs
    SelfCheck,
}
