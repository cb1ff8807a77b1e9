//! Command-line definitions

use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Bind local projects to a remote build engine and keep them in sync"
)]
pub struct Args {
    /// Engine API base URL (overrides the config file)
    #[arg(long, env = "PROJSYNC_URL", global = true)]
    pub url: Option<String>,

    /// Bearer token for the engine
    #[arg(long, env = "PROJSYNC_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Disable certificate checking
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Output as JSON
    #[arg(short = 'j', long, global = true)]
    pub json: bool,

    /// Show individual file operations as they happen
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Append text log lines to this file
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    /// Config file (default: <config dir>/projsync.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a project with the engine and upload all of its files
    Bind(BindOpts),
    /// Upload files changed since the last sync
    Sync(SyncOpts),
    /// Resend the end call of a run whose uploads finished but whose end call failed
    ResendEnd {
        /// The project id of the unfinished run
        #[arg(short, long)]
        id: String,
    },
    /// Detect the language and build type of a project directory
    Validate {
        /// Project directory
        path: PathBuf,
    },
    /// Inspect or change the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct FilterOpts {
    /// Exclude files matching patterns
    #[arg(long = "xf", action = ArgAction::Append)]
    pub exclude_files: Vec<String>,

    /// Exclude directories matching patterns
    #[arg(long = "xd", action = ArgAction::Append)]
    pub exclude_dirs: Vec<String>,

    /// Also send empty directories
    #[arg(long = "empty-dirs")]
    pub empty_dirs: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct BindOpts {
    /// The name of the project
    #[arg(short, long)]
    pub name: String,

    /// The project language
    #[arg(short, long)]
    pub language: String,

    /// The build type of the project
    #[arg(short = 't', long = "type")]
    pub build_type: String,

    /// The path to the project
    #[arg(short, long)]
    pub path: PathBuf,

    #[command(flatten)]
    pub filter: FilterOpts,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SyncOpts {
    /// The path to the project
    #[arg(short, long)]
    pub path: PathBuf,

    /// The project id assigned at bind time
    #[arg(short, long)]
    pub id: String,

    /// Time of the last sync in ms since the epoch (default: last completed run)
    #[arg(short, long)]
    pub time: Option<i64>,

    #[command(flatten)]
    pub filter: FilterOpts,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Print the effective config file
    Show,
    /// Store the engine URL
    SetUrl { url: String },
}
