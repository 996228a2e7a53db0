//! Headless Battle Runner
//!
//! Loads a scenario, resolves every attack in it and prints the outcome as
//! JSON. With `--trials` it runs the odds calculator instead.

use std::path::PathBuf;
use std::process::ExitCode;

use battle_engine::battle::{commit_attacks, resolve_all, BattleRecord, BattleRegistry, ResolutionSummary};
use battle_engine::bridge::{AutoCasualtySelector, AutoRemote, BattleContext, InMemoryHistory, SeededDice, TracingDisplay};
use battle_engine::core::{load_rules, BattleError, Result, RulesConfig};
use battle_engine::odds::{self, OddsReport, OddsSettings};
use battle_engine::scenario::Scenario;
use clap::Parser;
use serde::Serialize;

/// Headless Battle Runner - resolve a scenario's battles
#[derive(Parser, Debug)]
#[command(name = "battle_runner")]
#[command(about = "Resolve the battles of a scenario and print the results as JSON")]
struct Args {
    /// Scenario file (TOML)
    #[arg(long)]
    scenario: PathBuf,

    /// Ruleset name (loaded from data/rules/). Defaults to the scenario's own.
    #[arg(long)]
    rules: Option<String>,

    /// Random seed for deterministic runs
    #[arg(long)]
    seed: Option<u64>,

    /// Run this many simulations and report odds instead of one resolution
    #[arg(long)]
    trials: Option<u32>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Serialize)]
struct PlayerTreasury {
    name: String,
    pus: u32,
}

/// JSON output of a single resolution
#[derive(Serialize)]
struct RunOutput<'a> {
    scenario: &'a str,
    rules: &'a str,
    seed: u64,
    summary: ResolutionSummary,
    records: &'a [BattleRecord],
    treasuries: Vec<PlayerTreasury>,
    history: Vec<String>,
}

/// JSON output of an odds run
#[derive(Serialize)]
struct OddsOutput<'a> {
    scenario: &'a str,
    rules: &'a str,
    seed: u64,
    site: String,
    attacker_win_ratio: f64,
    defender_win_ratio: f64,
    draw_ratio: f64,
    report: OddsReport,
}

fn resolve_once(scenario: &Scenario, rules: &RulesConfig, seed: u64, pretty: bool) -> Result<String> {
    let mut state = scenario.state.clone();
    let mut registry = BattleRegistry::new();
    let mut dice = SeededDice::new(seed);
    let (mut casualties, mut remote) = (AutoCasualtySelector, AutoRemote);
    let (mut display, mut history) = (TracingDisplay, InMemoryHistory::new());
    let summary = {
        let mut ctx = BattleContext::new(
            &mut state,
            rules,
            &mut dice,
            &mut casualties,
            &mut remote,
            &mut display,
            &mut history,
        );
        commit_attacks(&mut registry, &scenario.attacks, &mut ctx)?;
        resolve_all(&mut registry, &mut ctx)?
    };
    let output = RunOutput {
        scenario: &scenario.name,
        rules: &rules.name,
        seed,
        summary,
        records: registry.records().all(),
        treasuries: state
            .players
            .iter()
            .map(|p| PlayerTreasury {
                name: p.name.clone(),
                pus: p.pus,
            })
            .collect(),
        history: history.lines(),
    };
    to_json(&output, pretty)
}

fn run_odds(scenario: &Scenario, rules: &RulesConfig, seed: u64, trials: u32, pretty: bool) -> Result<String> {
    let site = scenario
        .focus()
        .ok_or_else(|| BattleError::Config("scenario has no attacks to measure".into()))?;
    let settings = OddsSettings { trials, seed };
    let report = odds::calculate(&scenario.state, rules, &scenario.attacks, site, &settings)?;
    let output = OddsOutput {
        scenario: &scenario.name,
        rules: &rules.name,
        seed,
        site: scenario.state.territory_name(site),
        attacker_win_ratio: report.attacker_win_ratio(),
        defender_win_ratio: report.defender_win_ratio(),
        draw_ratio: report.draw_ratio(),
        report,
    };
    to_json(&output, pretty)
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    })
}

fn run(args: &Args) -> Result<String> {
    let scenario = Scenario::from_path(&args.scenario)?;
    let rules_name = args
        .rules
        .clone()
        .or_else(|| scenario.rules.clone())
        .unwrap_or_else(|| "classic".to_string());
    let rules = load_rules(&rules_name)?;
    let seed = args.seed.unwrap_or_else(rand::random);
    tracing::info!(scenario = %scenario.name, rules = %rules.name, seed, "running scenario");
    match args.trials {
        Some(trials) => run_odds(&scenario, &rules, seed, trials, args.pretty),
        None => resolve_once(&scenario, &rules, seed, args.pretty),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("battle_engine=info")),
        )
        .init();

    match run(&args) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "battle runner failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
