//! BlastGrid Simulator CLI
//!
//! Run multi-client scenarios, or play/watch a simulated room in the terminal.

use blastgrid_core::GameConfig;
use blastgrid_env::StartPosition;
use blastgrid_sim::{
    run_session, ScenarioId, ScenarioResult, ScenarioRunner, SessionMode, SessionOptions,
};
use clap::{Parser, ValueEnum};
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Run scenarios and report pass/fail
    Scenario,
    /// Join a room as --player alongside bots
    Play,
    /// Spectate a room of bots from --at
    Watch,
}

/// BlastGrid simulation CLI
#[derive(Parser, Debug)]
#[command(name = "blastgrid-sim")]
#[command(about = "Simulate BlastGrid rooms in one process", long_about = None)]
struct Args {
    /// What to run
    #[arg(short, long, value_enum, default_value = "scenario")]
    mode: Mode,

    /// Room name for play/watch (default: a fresh random room)
    #[arg(short, long)]
    room: Option<String>,

    /// Player name for play mode
    #[arg(short, long, default_value = "player")]
    player: String,

    /// Where a watcher starts reading (earliest, latest)
    #[arg(long, default_value = "earliest")]
    at: StartPosition,

    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of bot clients
    #[arg(short, long, default_value = "4")]
    bots: usize,

    /// Scenario to run (skirmish, redelivery, failover, replay, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Playing time in seconds
    #[arg(short, long, default_value = "20")]
    duration: f64,

    /// Tick length in milliseconds
    #[arg(long, default_value = "100")]
    tick_ms: u64,

    /// Render the board every N ticks in play/watch mode
    #[arg(long, default_value = "10")]
    render_every: u64,

    /// Run play/watch at wall-clock speed
    #[arg(long)]
    realtime: bool,

    /// JSON file with GameConfig overrides
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export recorded frames of a single scenario to this JSON file
    #[arg(long)]
    export: Option<String>,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let config = match &args.config {
        Some(path) => match GameConfig::from_json_file(path) {
            Ok(config) => Some(config),
            Err(e) => {
                error!("{}", e);
                std::process::exit(2);
            }
        },
        None => None,
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    match args.mode {
        Mode::Scenario => run_scenarios(&args, base_seed, config),
        Mode::Play => run_live(&args, base_seed, config, SessionMode::Play),
        Mode::Watch => run_live(&args, base_seed, config, SessionMode::Watch(args.at)),
    }
}

fn run_live(args: &Args, seed: u64, config: Option<GameConfig>, mode: SessionMode) {
    let room = args
        .room
        .clone()
        .unwrap_or_else(|| format!("room-{}", &Uuid::new_v4().simple().to_string()[..8]));
    let options = SessionOptions {
        room,
        player: args.player.clone(),
        mode,
        bots: args.bots,
        duration: Duration::from_secs_f64(args.duration.max(0.0)),
        tick: Duration::from_millis(args.tick_ms.max(1)),
        render_every: args.render_every,
        realtime: args.realtime,
    };

    match run_session(seed, config.unwrap_or_default(), options, |frame| println!("{}", frame)) {
        Ok(report) => info!(
            "Room {} finished after {} ticks ({:.1}s), {} players",
            report.room,
            report.ticks,
            report.final_time_secs,
            report.snapshot.players.len()
        ),
        Err(e) => {
            error!("Session failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_scenarios(args: &Args, base_seed: u64, config: Option<GameConfig>) {
    if !args.json {
        info!("BlastGrid Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: skirmish, redelivery, failover, replay, all");
            std::process::exit(1);
        })]
    };

    let make_runner = |seed: u64| {
        let runner = ScenarioRunner::new(seed, args.bots)
            .with_duration(args.duration)
            .with_tick_ms(args.tick_ms);
        match &config {
            Some(config) => runner.with_config(config.clone()),
            None => runner,
        }
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }

        let result = make_runner(base_seed).with_export(10).run(scenarios[0]);
        match &result.export {
            Some(export) => match export.write_to_file(export_path) {
                Ok(()) => info!("Exported {} frames to {}", export.frames.len(), export_path),
                Err(e) => error!("Failed to write export: {}", e),
            },
            None => error!("Scenario produced no frames"),
        }
        report(&result, args.json);
        if !result.passed {
            std::process::exit(1);
        }
        return;
    }

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = make_runner(seed);
        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                report(&result, false);
            }
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "events": r.metrics.events_published,
                    "layouts": r.metrics.layouts_published,
                    "redelivered": r.metrics.redelivered,
                    "dropped": r.metrics.dropped_events,
                    "kills": r.metrics.kills,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to encode summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}

fn report(result: &ScenarioResult, json: bool) {
    if json {
        return;
    }
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED: {} events, {} layouts, {} kills",
            result.scenario.name(),
            result.seed,
            result.metrics.events_published,
            result.metrics.layouts_published,
            result.metrics.kills
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}
