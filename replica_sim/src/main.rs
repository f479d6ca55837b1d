//! Replica DST Simulator CLI
//!
//! Runs the replication scenarios over one or more consecutive seeds and
//! exits non-zero if any run fails.

use clap::Parser;
use replica_sim::scenarios::ScenarioId;
use replica_sim::{ScenarioResult, ScenarioRunner};
use serde::Serialize;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "replica-sim", version)]
#[command(about = "Deterministic replication scenarios for the replica host")]
struct Args {
    /// Base seed; 0 picks one from the wall clock
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Scenario name or DST code (e.g. `flicker`, `dst-003`), or `all`
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Shorthand for `--scenario all`
    #[arg(long)]
    all: bool,

    /// How many consecutive seeds to run, starting at --seed
    #[arg(long, default_value_t = 1)]
    seeds: u64,

    /// Ticks per scenario, never below the scenario's own minimum
    #[arg(short, long, default_value_t = 200)]
    ticks: u64,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    /// Print one JSON summary instead of log lines
    #[arg(long)]
    json: bool,
}

/// Everything a CI job needs from one invocation.
#[derive(Serialize)]
struct RunSummary {
    total: usize,
    passed: usize,
    failed: usize,
    results: Vec<ScenarioResult>,
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn select_scenarios(args: &Args) -> Result<Vec<ScenarioId>, String> {
    if args.all || args.scenario.eq_ignore_ascii_case("all") {
        return Ok(ScenarioId::all());
    }
    args.scenario.parse().map(|id| vec![id])
}

fn resolve_seed(requested: u64) -> u64 {
    if requested != 0 {
        return requested;
    }
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(42)
}

fn log_result(result: &ScenarioResult) {
    let id = result.scenario;
    match &result.failure_reason {
        None => info!(
            "✓ {} {} (seed={}) PASSED | {} spawns, {} syncs, {} removes, {} failed sends",
            id.code(),
            id.name(),
            result.seed,
            result.metrics.spawns,
            result.metrics.syncs,
            result.metrics.removes,
            result.metrics.send_failures
        ),
        Some(reason) => error!("✗ {} {} (seed={}) FAILED: {}", id.code(), id.name(), result.seed, reason),
    }
}

fn log_summary(summary: &RunSummary) {
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if summary.failed == 0 {
        info!("✅ {}/{} scenario runs passed", summary.passed, summary.total);
        return;
    }

    error!("❌ {}/{} scenario runs failed", summary.failed, summary.total);
    for result in summary.results.iter().filter(|r| !r.passed) {
        error!(
            "  - {} seed={}: {}",
            result.scenario,
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let scenarios = match select_scenarios(&args) {
        Ok(scenarios) => scenarios,
        Err(e) => {
            let known: Vec<_> = ScenarioId::all().iter().map(|id| id.name()).collect();
            eprintln!("Error: {e}");
            eprintln!("Known scenarios: {}, all", known.join(", "));
            return ExitCode::from(2);
        }
    };

    let base_seed = resolve_seed(args.seed);
    if !args.json {
        info!("Replica DST Simulator v{} | base seed {}", env!("CARGO_PKG_VERSION"), base_seed);
    }

    let mut results = Vec::with_capacity(scenarios.len() * args.seeds.max(1) as usize);
    for offset in 0..args.seeds.max(1) {
        let runner = ScenarioRunner::new(base_seed.wrapping_add(offset)).with_ticks(args.ticks);
        for &scenario in &scenarios {
            let result = runner.run(scenario);
            if !args.json {
                log_result(&result);
            }
            results.push(result);
        }
    }

    let failed = results.iter().filter(|r| !r.passed).count();
    let summary = RunSummary {
        total: results.len(),
        passed: results.len() - failed,
        failed,
        results,
    };

    if args.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error: cannot render summary: {e}");
                return ExitCode::from(2);
            }
        }
    } else {
        log_summary(&summary);
    }

    if summary.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
