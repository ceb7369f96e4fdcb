use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trackpilot_app::{Overrides, Settings, resolve_track, run_drive, run_evolve, run_train};

#[derive(Parser, Debug)]
#[command(
    name = "trackpilot",
    version,
    about = "Evolve or train autonomous drivers on occupancy tracks"
)]
struct Cli {
    /// JSON settings file; missing sections keep their defaults.
    #[arg(long, global = true, env = "TRACKPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Track manifest describing the road bitmap or brush strokes.
    #[arg(long, global = true)]
    track: Option<PathBuf>,

    /// Fall back to the built-in open arena when no --track is given.
    #[arg(long, global = true)]
    default_track: bool,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OverrideArgs {
    /// Seed for every random choice in the run.
    #[arg(long, global = true)]
    seed: Option<u64>,
    #[arg(long, global = true)]
    generations: Option<u32>,
    #[arg(long, global = true)]
    population: Option<usize>,
    #[arg(long, global = true)]
    episodes: Option<u32>,
    /// Tick budget per episode.
    #[arg(long, global = true)]
    step_budget: Option<u32>,
}

impl From<&OverrideArgs> for Overrides {
    fn from(args: &OverrideArgs) -> Self {
        Self {
            seed: args.seed,
            generations: args.generations,
            population: args.population,
            episodes: args.episodes,
            step_budget: args.step_budget,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evolve a population of steering brains and save the champion.
    Evolve {
        #[arg(long, default_value = "trackpilot-evolved.json")]
        output: PathBuf,
        /// Append one JSON line per generation to this file.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Train a value network with experience replay and save it.
    TrainDqn {
        #[arg(long, default_value = "trackpilot-dqn.json")]
        output: PathBuf,
        /// Append one JSON line per episode to this file.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Drive one greedy episode with a saved policy and print the result.
    Drive {
        /// Policy artifact written by `evolve` or `train-dqn`.
        artifact: PathBuf,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    settings.apply(&Overrides::from(&cli.overrides));
    let track = resolve_track(cli.track.as_deref(), cli.default_track)?;

    match &cli.command {
        Command::Evolve { output, log } => {
            let summary = run_evolve(&settings, &track, output, log.as_deref())?;
            info!(
                generations = summary.generations_run,
                goal_reached = summary.goal_reached,
                "evolution finished",
            );
            print_json(&summary)?;
        }
        Command::TrainDqn { output, log } => {
            let summary = run_train(&settings, &track, output, log.as_deref())?;
            info!(
                episodes = summary.episodes,
                goals = summary.goals_reached,
                artifact = %output.display(),
                "training finished",
            );
            print_json(&summary)?;
        }
        Command::Drive { artifact } => {
            let result = run_drive(&settings, &track, artifact)?;
            print_json(&result)?;
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to encode result")?;
    println!("{json}");
    Ok(())
}
