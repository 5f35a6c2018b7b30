//! Command-line surface: argument parsing only. Dispatch lives in `commands/`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// AutoForge build orchestration engine.
#[derive(Parser, Debug)]
#[command(name = env!("CARGO_PKG_NAME"), version, about = "Build orchestration engine for firmware/embedded solutions")]
pub struct Cli {
    /// Path to the solution file. Defaults to `solution.jsonc` (or `solution.json`)
    /// in the current directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the tracing filter (defaults to `RUST_LOG`, then `info`).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Suppress informational logging; only warnings and errors are emitted.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Emit machine-readable JSON instead of text where a command supports it.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build one project/configuration from the loaded solution.
    Build(BuildArgs),
    /// Inspect or change variables in the Variable Store.
    Vars {
        #[command(subcommand)]
        action: VarsCommand,
    },
    /// Inspect the loaded solution.
    Solution {
        #[command(subcommand)]
        action: SolutionCommand,
    },
}

#[derive(clap::Args, Debug)]
pub struct BuildArgs {
    /// Solution name to load. Defaults to the first solution declared in the file.
    pub solution: String,
    /// Project name within the solution.
    pub project: String,
    /// Configuration name within the project.
    pub configuration: String,

    /// Run the configuration's `clean` step and stop (no build runs afterward).
    #[arg(long)]
    pub clean: bool,

    /// Run the configuration's `clean` step, then continue into the normal build.
    #[arg(long)]
    pub clean_build: bool,

    /// Opaque `key=value` pairs forwarded to build steps, after a literal `--`.
    #[arg(last = true)]
    pub extra: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum VarsCommand {
    /// List every variable, expanded, in declaration order.
    List,
    /// Print one variable's expanded value.
    Get { key: String },
    /// Set an existing variable's raw value for the remainder of this process.
    Set { key: String, value: String },
}

#[derive(Subcommand, Debug)]
pub enum SolutionCommand {
    /// Print the loaded solution's projects and configurations.
    Show,
}
