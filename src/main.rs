use std::{
    path::{Path, PathBuf},
    process,
};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use seed_module::{
    config::SeedConfig,
    module::RankedPublication,
    scenario::{Scenario, ScenarioError},
};

//==================== arguments ====================//

#[derive(Parser)]
#[command(name = "seed", version, about = "Replay seed module scenarios and rank threads")]
struct Cli {
    /// TOML or JSON config; overrides the scenario's own config block.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a scenario and print outcomes plus the final ledger snapshot.
    Replay {
        scenario: PathBuf,
        /// Pretty-print the JSON report.
        #[arg(long)]
        pretty: bool,
    },
    /// Replay a scenario, then rank the children in one thread.
    Rank {
        scenario: PathBuf,
        /// Profile of the thread's root post.
        #[arg(long)]
        profile: u64,
        /// Publication id of the thread's root post.
        #[arg(long = "pub")]
        pub_id: u64,
        /// Index whose children are ranked; defaults to the root's.
        #[arg(long)]
        index: Option<u64>,
        /// How many children to keep; defaults to the configured width.
        #[arg(long)]
        k: Option<usize>,
    },
}

#[derive(Serialize)]
struct RankReport {
    thread: (u64, u64),
    index: u64,
    count: u64,
    ranked: Vec<RankedPublication>,
}

fn load_config(path: Option<&Path>) -> Result<Option<SeedConfig>, ScenarioError> {
    let Some(path) = path else {
        return Ok(None);
    };
    let mut config = SeedConfig::load_from_file(path)?;
    config.merge_with_env()?;
    Ok(Some(config))
}

fn print_json<T: Serialize>(value: &T, pretty: bool) {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match rendered {
        Ok(json) => println!("{json}"),
        Err(err) => fail(&format!("cannot encode report: {err}")),
    }
}

fn fail(msg: &str) -> ! {
    eprintln!("error: {msg}");
    process::exit(2)
}

//==================== commands ====================//

fn replay_cmd(
    config: Option<SeedConfig>,
    scenario: &Path,
    pretty: bool,
) -> Result<(), ScenarioError> {
    let scenario = Scenario::load(scenario)?;
    let (_, report) = scenario.run(config)?;
    if report.claimable_total > report.module_holdings {
        tracing::warn!(
            claimable = report.claimable_total,
            holdings = report.module_holdings,
            "ledger holdings do not cover outstanding rewards"
        );
    }
    print_json(&report, pretty);
    Ok(())
}

fn rank_cmd(
    config: Option<SeedConfig>,
    scenario: &Path,
    root: (u64, u64),
    index: Option<u64>,
    k: Option<usize>,
) -> Result<(), ScenarioError> {
    let scenario = Scenario::load(scenario)?;
    let (module, _) = scenario.run(config)?;
    let index = index.unwrap_or(root.1);
    let Some(tree) = module.threads().thread(root) else {
        fail(&format!("no thread rooted at {}/{}", root.0, root.1));
    };
    let count = tree.count_descendants_with_index(index);
    let ranked = match module.top_children(root, index, k) {
        Ok(ranked) => ranked,
        Err(err) => fail(&err.to_string()),
    };
    print_json(
        &RankReport {
            thread: root,
            index,
            count,
            ranked,
        },
        true,
    );
    Ok(())
}

//==================== main ====================//

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => fail(&err.to_string()),
    };
    let result = match &cli.command {
        Command::Replay { scenario, pretty } => replay_cmd(config, scenario, *pretty),
        Command::Rank {
            scenario,
            profile,
            pub_id,
            index,
            k,
        } => rank_cmd(config, scenario, (*profile, *pub_id), *index, *k),
    };
    if let Err(err) = result {
        fail(&err.to_string());
    }
}
