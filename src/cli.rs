use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "workbench", about = "Multi-scenario data-analysis workbench", version)]
pub struct Cli {
    /// Project directory (overrides PROJECT_PATH).
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,

    /// Large language model to use.
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Prettify Markdown output.
    #[arg(long, global = true)]
    pub md: bool,
    /// Print plain text instead of rendered Markdown.
    #[arg(long = "no-md", global = true, conflicts_with = "md")]
    pub no_md: bool,

    /// More logging (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Manage scenarios.
    #[command(subcommand)]
    Scenario(ScenarioCommand),

    /// Generate an analysis script for PROMPT and run it in a scenario,
    /// repairing it on failure.
    Run(RunArgs),

    /// Apply a structured edit to a scenario's data.
    Modify(ModifyArgs),

    /// Compare a table or query across scenarios.
    Compare(CompareArgs),

    /// Show execution attempts of a scenario, newest first.
    History {
        /// Scenario id or name (defaults to the current scenario).
        #[arg(long)]
        scenario: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show saved comparisons, newest first.
    Comparisons {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ScenarioCommand {
    /// Create a scenario, branching from a parent or seeding from a dataset.
    Create {
        name: String,
        /// Parent scenario id or name (defaults to the root).
        #[arg(long)]
        parent: Option<String>,
        /// SQLite dataset to seed from when no parent is given.
        #[arg(long)]
        seed: Option<PathBuf>,
        #[arg(long)]
        description: Option<String>,
        /// Make the new scenario current.
        #[arg(long)]
        switch: bool,
    },
    /// List scenarios; the current one is starred.
    List,
    /// Show a scenario's metadata and schema.
    Show { scenario: Option<String> },
    /// Make a scenario current.
    Switch { scenario: String },
    /// Delete a scenario with its history and data.
    Delete { scenario: String },
    /// Overwrite TARGET's data with SOURCE's.
    Copy { source: String, target: String },
    /// Show the parent chain up to the root.
    Lineage { scenario: Option<String> },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// What to analyse, in plain language.
    #[arg(value_name = "PROMPT")]
    pub prompt: String,

    /// Scenario id or name (defaults to the current scenario).
    #[arg(long)]
    pub scenario: Option<String>,

    /// Run this script instead of generating one.
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// File name of the script inside the scenario directory.
    #[arg(long, default_value = "analysis.py")]
    pub name: String,

    /// Attempt budget (overrides MAX_ATTEMPTS).
    #[arg(long = "max-attempts")]
    pub max_attempts: Option<u32>,

    /// Per-attempt timeout in seconds (overrides EXECUTION_TIMEOUT).
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Do not reuse or store generated scripts in the request cache.
    #[arg(long = "no-cache")]
    pub no_cache: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ModifyArgs {
    pub table: String,
    pub column: String,

    /// New value for every matching row.
    #[arg(long, conflicts_with = "percent", required_unless_present = "percent")]
    pub set: Option<String>,

    /// Scale matching rows by this percentage (10 = +10%).
    #[arg(long, allow_hyphen_values = true)]
    pub percent: Option<f64>,

    /// Restrict to rows where COLUMN=VALUE.
    #[arg(long = "where", value_name = "COLUMN=VALUE")]
    pub filter: Option<String>,

    /// Scenario id or name (defaults to the current scenario).
    #[arg(long)]
    pub scenario: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    /// Table name or read-only SELECT query.
    pub target: String,

    /// Scenarios to compare (ids or names); the first is the baseline.
    #[arg(long = "scenario", short = 's', required = true, num_args = 1..)]
    pub scenarios: Vec<String>,

    /// Columns every scenario must have.
    #[arg(long, value_delimiter = ',')]
    pub required: Vec<String>,

    /// Columns to place after the required ones when present.
    #[arg(long, value_delimiter = ',')]
    pub optional: Vec<String>,

    /// Key column for a baseline diff.
    #[arg(long)]
    pub key: Option<String>,

    /// Value columns for the diff (defaults to the required columns minus the key).
    #[arg(long = "values", value_delimiter = ',')]
    pub values: Vec<String>,

    /// Save the result under this name.
    #[arg(long)]
    pub save: Option<String>,

    #[arg(long)]
    pub description: Option<String>,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
