use anyhow::Result;
use is_terminal::IsTerminal;
use tracing_subscriber::EnvFilter;

use scenario_workbench::{
    cli::{Cli, Command},
    config::Config,
    handlers::{self, Workspace},
    scenario::SnapshotStore,
};

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn,scenario_workbench=info",
        1 => "scenario_workbench=debug",
        _ => "scenario_workbench=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose);

    // Load config; CLI flags override it
    let mut cfg = Config::load();
    if let Some(project) = &args.project {
        cfg.set("PROJECT_PATH", project.to_string_lossy());
    }
    let model = args
        .model
        .clone()
        .or_else(|| cfg.get("DEFAULT_MODEL"))
        .unwrap_or_else(|| "gpt-4o".to_string());
    let markdown = if args.no_md {
        false
    } else if args.md {
        true
    } else {
        // Piped output stays plain unless asked for
        cfg.get_bool("PRETTIFY_MARKDOWN") && std::io::stdout().is_terminal()
    };

    let store = SnapshotStore::open(&cfg.project_path())?;
    let ws = Workspace { cfg, store, markdown };

    match args.command {
        Command::Scenario(command) => handlers::scenario::run(&ws, command).await,
        Command::Run(run) => handlers::run::run(&ws, run, &model).await,
        Command::Modify(modify) => handlers::modify::run(&ws, modify).await,
        Command::Compare(compare) => handlers::compare::run(&ws, compare),
        Command::History { scenario, limit } => handlers::history::attempts(&ws, scenario.as_deref(), limit),
        Command::Comparisons { limit } => handlers::history::comparisons(&ws, limit),
    }
}
