//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use transferq_core::{Direction, TaskId, TaskStatus};

/// Default database location, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = ".transferq/transfers.db";

/// Durable, resumable upload/download queue for a remote object store.
///
/// Tasks are persisted in a local SQLite database; `run` executes them and
/// picks up where an interrupted run left off.
#[derive(Parser, Debug)]
#[command(name = "transferq")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Task database path (defaults to the config value, then .transferq/transfers.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Config file path (defaults to $XDG_CONFIG_HOME/transferq/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Queue a download of a remote object to a local file
    Download(DownloadArgs),

    /// Queue an upload of a local file to a remote path
    Upload(UploadArgs),

    /// Run queued transfers until the queues drain
    Run(RunArgs),

    /// List tasks
    List(ListArgs),

    /// Pause a pending or active task
    Pause(TaskArg),

    /// Resume a paused or resumable failed task
    Resume(TaskArg),

    /// Run a failed or cancelled task again
    Retry(TaskArg),

    /// Cancel a task (downloads lose their partial file)
    Cancel(TaskArg),

    /// Delete finished task records
    Clear(ClearArgs),
}

/// Options shared by `download` and `upload`.
#[derive(Args, Debug, Clone)]
pub struct EnqueueOptions {
    /// Scheduling priority (lower runs first)
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i64,

    /// Owner tag stored with the task
    #[arg(long, default_value = "")]
    pub owner: String,
}

/// Arguments for `download`.
#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// Remote object path (relative to the store base URL, or an absolute URL)
    pub remote: String,

    /// Local destination file
    pub local: PathBuf,

    /// Expected size in bytes, if known
    #[arg(long)]
    pub size: Option<u64>,

    #[command(flatten)]
    pub options: EnqueueOptions,
}

/// Arguments for `upload`.
#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
    /// Local source file
    pub local: PathBuf,

    /// Remote destination path
    pub remote: String,

    #[command(flatten)]
    pub options: EnqueueOptions,
}

/// Arguments for `run`.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Remote store base URL (overrides config)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Maximum concurrent uploads (1-100, overrides config)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub upload_concurrency: Option<u8>,

    /// Maximum concurrent downloads (1-100, overrides config)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub download_concurrency: Option<u8>,

    /// Maximum automatic retries for transient failures (0-10, overrides config)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Emit events as JSON lines instead of text
    #[arg(long)]
    pub json: bool,
}

/// Status filter values for `list`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusArg {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl From<StatusArg> for TaskStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => Self::Pending,
            StatusArg::Active => Self::Active,
            StatusArg::Paused => Self::Paused,
            StatusArg::Completed => Self::Completed,
            StatusArg::Failed => Self::Failed,
            StatusArg::Cancelled => Self::Cancelled,
        }
    }
}

/// Direction filter values.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionArg {
    Upload,
    Download,
}

impl From<DirectionArg> for Direction {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::Upload => Self::Upload,
            DirectionArg::Download => Self::Download,
        }
    }
}

/// Arguments for `list`.
#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Only tasks in this status
    #[arg(long, value_enum)]
    pub status: Option<StatusArg>,

    /// Only tasks of this direction
    #[arg(long, value_enum)]
    pub direction: Option<DirectionArg>,

    /// Only tasks with this owner tag
    #[arg(long)]
    pub owner: Option<String>,

    /// Print tasks as JSON
    #[arg(long)]
    pub json: bool,
}

/// A single task id.
#[derive(Args, Debug, Clone, Copy)]
pub struct TaskArg {
    /// Task id
    pub id: TaskId,
}

/// Arguments for `clear`.
#[derive(Args, Debug, Clone, Copy)]
pub struct ClearArgs {
    /// Clear failed and cancelled tasks instead of completed ones
    #[arg(long)]
    pub failed: bool,

    /// Only clear this direction
    #[arg(long, value_enum)]
    pub direction: Option<DirectionArg>,
}
