//! Budget-aware goal-oriented action planner.
//!
//! Reads an action catalog from `goap.toml`, plans the cheapest action
//! sequence from a current state to a goal state, and optionally runs it
//! against a persisted daily budget ledger. Results are printed as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use goap::core::world::WorldState;
use goap::driver::{PlanReport, Session, parse_state};
use goap::exit_codes;
use goap::io::clock::SystemClock;
use goap::io::config::init_config;
use goap::logging;

#[derive(Parser)]
#[command(
    name = "goap",
    version,
    about = "Budget-aware goal-oriented action planner"
)]
struct Cli {
    /// Config file with budget, executor and action catalog.
    #[arg(long, global = true, default_value = "goap.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter config with one action if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Load the config and check every catalog entry.
    Validate,
    /// Print the cheapest plan from the current state to the goal.
    Plan {
        #[command(flatten)]
        states: StateArgs,
        /// Ledger snapshot used to compute `can_afford`.
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
    /// Plan and execute, recording spend in the ledger.
    Run {
        #[command(flatten)]
        states: StateArgs,
        /// Ledger snapshot restored before and written after the run.
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
    /// Print today's budget status and spend breakdowns.
    Status {
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
}

#[derive(Args)]
struct StateArgs {
    /// Current world state as a JSON object.
    #[arg(long, default_value = "{}")]
    current: String,
    /// Goal state as a JSON object.
    #[arg(long)]
    goal: String,
}

impl StateArgs {
    fn parse(&self) -> Result<(WorldState, WorldState)> {
        let current = parse_state(&self.current).context("--current")?;
        let goal = parse_state(&self.goal).context("--goal")?;
        Ok((current, goal))
    }
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = cli.config;
    let load = || Session::load(&config);
    let clock = Arc::new(SystemClock);

    match cli.command {
        Command::Init { force } => {
            let verb = if init_config(&config, force)? {
                "wrote"
            } else {
                "kept existing"
            };
            println!("{verb} {}", config.display());
            Ok(exit_codes::OK)
        }
        Command::Validate => {
            println!("ok: {} actions", load()?.catalog.len());
            Ok(exit_codes::OK)
        }
        Command::Plan { states, ledger } => {
            let session = load()?;
            let (current, goal) = states.parse()?;
            let ledger = session.ledger(ledger.as_deref(), clock)?;
            let report = session.plan(&current, &goal, &ledger);
            print_json(&report)?;
            Ok(match &report {
                PlanReport::Found { .. } => exit_codes::OK,
                PlanReport::NoPlan { failure } => exit_codes::for_signal(failure),
            })
        }
        Command::Run { states, ledger } => {
            let session = load()?;
            let (current, goal) = states.parse()?;
            let report = session.run(&current, &goal, ledger.as_deref(), clock)?;
            print_json(&report)?;
            Ok(report
                .failure
                .as_ref()
                .map_or(exit_codes::OK, exit_codes::for_signal))
        }
        Command::Status { ledger } => {
            let report = load()?.status(ledger.as_deref(), clock)?;
            print_json(&report)?;
            Ok(exit_codes::OK)
        }
    }
}

/// Print `value` as pretty JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
