use std::path::PathBuf;
use std::sync::LazyLock;

use clap::{Args, Parser, Subcommand};

use crate::db::connection::DEFAULT_DB_PATH;

static VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_HASH").unwrap_or("dev"),
        env!("BUILD_TIMESTAMP")
    )
});

#[derive(Parser)]
#[command(
    name = "autowebprompt",
    version = VERSION.as_str(),
    about = "Drive multi-prompt tasks through the ChatGPT and Claude web chats"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single task config
    Run(RunArgs),
    /// Run a list of tasks against one provider
    Batch(BatchArgs),
    /// Validate a task config or task list
    Validate(ValidateArgs),
    /// Check that Chrome is installed and reachable over CDP
    Check(CheckArgs),
    /// Manage the task store
    Tasks(TasksArgs),
}

#[derive(Args, Clone)]
pub struct RunArgs {
    /// Task config YAML
    #[arg(short, long)]
    pub config: PathBuf,

    /// Keep the browser open after a success until interrupted
    #[arg(long)]
    pub hold: bool,

    /// Stop the run after this many seconds
    #[arg(long)]
    pub max_runtime: Option<u64>,

    /// Task store used to record uploaded attempts
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Where uploaded results are archived
    #[arg(long, default_value = "archive")]
    pub archive_dir: PathBuf,
}

#[derive(Args, Clone)]
pub struct BatchArgs {
    /// Task list YAML (not needed with --from-db)
    #[arg(long)]
    pub tasks: Option<PathBuf>,

    /// Template config merged under every task
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Web chat to drive: claude or chatgpt
    #[arg(long, default_value = "claude", value_parser = ["claude", "chatgpt"])]
    pub provider: String,

    /// Print each merged config without running it
    #[arg(long)]
    pub dry_run: bool,

    /// First task index to run
    #[arg(long, default_value = "0")]
    pub start: usize,

    /// Stop before this task index
    #[arg(long)]
    pub end: Option<usize>,

    /// Stop at the first failed task
    #[arg(long)]
    pub stop_on_failure: bool,

    /// Default per-task timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Stage task input files from the task store
    #[arg(long)]
    pub fetch_from_db: bool,

    /// Load the task list from the task store (implies --fetch-from-db)
    #[arg(long)]
    pub from_db: bool,

    /// Task source filter when loading from the task store
    #[arg(long, default_value = "wsp")]
    pub source: String,

    /// SQLite task store path
    #[arg(long, default_value = DEFAULT_DB_PATH)]
    pub db: PathBuf,

    /// Directory for staged task inputs
    #[arg(long, default_value = "task_inputs")]
    pub stage_dir: PathBuf,

    /// Where uploaded results are archived
    #[arg(long, default_value = "archive")]
    pub archive_dir: PathBuf,

    /// Directory for the batch results file
    #[arg(long, default_value = "logs")]
    pub results_dir: PathBuf,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Task config or task list to validate
    pub config: PathBuf,
}

#[derive(Args, Clone)]
pub struct CheckArgs {
    /// CDP port to probe
    #[arg(long, default_value = "9222")]
    pub port: u16,

    /// Explicit Chrome binary
    #[arg(long)]
    pub chrome_path: Option<PathBuf>,
}

#[derive(Args, Clone)]
pub struct TasksArgs {
    #[command(subcommand)]
    pub command: TasksCommand,

    /// SQLite task store path
    #[arg(long, default_value = DEFAULT_DB_PATH, global = true)]
    pub db: PathBuf,
}

#[derive(Subcommand, Clone)]
pub enum TasksCommand {
    /// List stored tasks
    List {
        /// Only tasks from this source
        #[arg(long)]
        source: Option<String>,

        /// Include deprecated tasks
        #[arg(long)]
        all: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import task definitions from a YAML or JSON list
    Import {
        file: PathBuf,
    },
    /// Mark a task as deprecated
    Deprecate {
        id: i64,

        #[arg(long, default_value = "Deprecated manually")]
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_defaults() {
        let cli = Cli::try_parse_from(["autowebprompt", "batch", "--tasks", "tasks.yaml"]).unwrap();
        let Commands::Batch(args) = cli.command else { panic!("expected batch") };
        assert_eq!(args.provider, "claude");
        assert_eq!(args.source, "wsp");
        assert_eq!(args.start, 0);
        assert!(!args.stop_on_failure);
        assert_eq!(args.db, PathBuf::from(DEFAULT_DB_PATH));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(Cli::try_parse_from(["autowebprompt", "batch", "--provider", "bard"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["autowebprompt", "run", "-c", "task.yaml", "-vv", "--log-json", "--hold"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.log_json);
        let Commands::Run(args) = cli.command else { panic!("expected run") };
        assert!(args.hold);
        assert_eq!(args.config, PathBuf::from("task.yaml"));
    }

    #[test]
    fn test_tasks_subcommands() {
        let cli = Cli::try_parse_from(["autowebprompt", "tasks", "deprecate", "7", "--db", "x.db"]).unwrap();
        let Commands::Tasks(args) = cli.command else { panic!("expected tasks") };
        assert_eq!(args.db, PathBuf::from("x.db"));
        assert!(matches!(args.command, TasksCommand::Deprecate { id: 7, .. }));
    }
}
