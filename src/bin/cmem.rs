/// cmem - Continuum Memory Command Line Tool
///
/// Drives the continuum memory subsystem from the shell for inspection and
/// tuning.
///
/// Usage:
///   cmem simulate --agent <id> --cycles <n> [--seed <s>] [--json]
///   cmem config                          - Show the effective configuration
///   cmem demo-surprise                   - Compare matched and mismatched predictions
use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use colored::*;
use continuum_memory::prelude::*;
use continuum_memory::{OuterLoopReport, ScopeStatistics};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// cmem - Continuum Memory
///
/// Tiered memory for LLM agents: strata, surprise, compression, retention and
/// a dual-loop orchestrator.
#[derive(Parser)]
#[command(name = "cmem")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic observe/reflect workload and print tier statistics
    ///
    /// Every feature is switched on; numeric tunables come from CONTINUUM_*
    /// variables. Time is simulated, one minute per cycle.
    ///
    /// Examples:
    ///   cmem simulate --agent alice --cycles 50
    ///   cmem simulate --agent alice --cycles 200 --seed 7 --json
    Simulate {
        /// Agent id owning the simulated memories
        #[arg(short, long, default_value = "agent-1")]
        agent: String,

        /// Number of reasoning cycles
        #[arg(short, long, default_value_t = 25)]
        cycles: u64,

        /// Seed for the workload and eviction RNGs
        #[arg(short, long)]
        seed: Option<u64>,

        /// Print final statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration (CONTINUUM_* variables applied) as JSON
    Config,

    /// Score a confident prediction against a matching and a contradicting outcome
    DemoSurprise,
}

const TOPICS: &[(&str, &str)] = &[
    ("weather", "The weather service reported rain over the harbor district"),
    ("billing", "The billing api flagged a duplicate invoice for the customer"),
    ("deploy", "The deploy pipeline rolled out release candidate to staging"),
    ("search", "The search index returned stale results for product queries"),
    ("support", "The support queue grew after the login outage this morning"),
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate {
            agent,
            cycles,
            seed,
            json,
        } => simulate(&agent, cycles, seed, json).await,
        Commands::Config => {
            let config = ContinuumConfig::from_env();
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("Failed to serialize configuration")?
            );
            Ok(())
        }
        Commands::DemoSurprise => demo_surprise(),
    }
}

async fn simulate(agent: &str, cycles: u64, seed: Option<u64>, json: bool) -> Result<()> {
    let mut config = ContinuumConfig::from_env();
    config.enabled = true;
    config.surprise_enabled = true;
    config.consolidation_enabled = true;
    config.pattern_detection_enabled = true;
    if seed.is_some() {
        config.rng_seed = seed;
    }

    let clock = Arc::new(ManualClock::starting_now());
    let memory = ContinuumMemory::builder(config)
        .with_clock(clock.clone())
        .build()
        .context("Invalid configuration")?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let scope = Scope::agent(agent);
    let mut reports: Vec<OuterLoopReport> = Vec::new();
    let mut repairs = 0usize;

    for cycle in 1..=cycles {
        clock.advance(Duration::minutes(1));
        memory.begin_cycle(&scope);

        let (topic, base) = TOPICS[rng.gen_range(0..TOPICS.len())];
        let importance = Importance::ALL[rng.gen_range(0..Importance::ALL.len())];
        memory.observe(
            &scope,
            MemoryDraft::new(format!("{} during cycle {}.", base, cycle))
                .with_importance(importance)
                .with_tags([topic]),
        );
        memory.recall(&scope, &MemoryQuery::new(topic).limit(3));

        let expected = if rng.gen_bool(0.7) { "stable" } else { "degraded" };
        let actual = if rng.gen_bool(0.7) { "stable" } else { "degraded" };
        let prediction_id = format!("p{}", cycle);
        let prediction = Prediction::new(
            prediction_id.clone(),
            scope.clone(),
            format!("{} status", topic),
            json!({ "status": expected }),
            0.8,
        );
        let outcome = Outcome::new(
            format!("o{}", cycle),
            scope.clone(),
            format!("{} status", topic),
            json!({ "status": actual }),
        )
        .for_prediction(prediction_id);

        let tool_ok = rng.gen_bool(0.8);
        let tool = if tool_ok {
            ToolResult::ok(format!("{}_api", topic), base)
        } else {
            ToolResult::failed(format!("{}_api", topic), "request timed out")
        };
        let reflection = memory
            .reflect(
                &scope,
                Reflection::new(format!("{}. The {} status looks {}.", base, topic, actual))
                    .with_tool(tool)
                    .with_prediction(prediction)
                    .with_outcome(outcome),
            )
            .context("Reflection failed")?;
        if reflection.is_some_and(|r| r.repair.is_some()) {
            repairs += 1;
        }

        if let Some(report) = memory.end_cycle(&scope).await.context("Outer loop failed")? {
            reports.push(report);
        }
    }

    let stats = memory.statistics(&scope);
    if json {
        let summary = json!({
            "cycles": cycles,
            "outer_loops": reports.len(),
            "repairs": repairs,
            "statistics": stats,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    print_statistics(&stats, cycles, repairs, &reports);
    Ok(())
}

fn print_statistics(stats: &ScopeStatistics, cycles: u64, repairs: usize, reports: &[OuterLoopReport]) {
    println!("{}", format!("Simulation for {}", stats.scope).bold().cyan());
    println!();
    println!("  {} {}", "Cycles:".bright_white(), cycles);
    println!("  {} {}", "Outer loops:".bright_white(), reports.len());
    println!("  {} {}", "Repairs:".bright_white(), repairs);
    println!(
        "  {} {}",
        "Removed by retention:".bright_white(),
        reports.iter().map(|r| r.removed).sum::<usize>()
    );
    println!(
        "  {} {}",
        "Promoted:".bright_white(),
        reports.iter().map(|r| r.promoted.len()).sum::<usize>()
    );
    println!(
        "  {} {}",
        "Patterns:".bright_white(),
        reports.iter().map(|r| r.patterns_detected).sum::<usize>()
    );
    println!();

    println!("{}", "Strata:".bold());
    for stratum in Stratum::ALL {
        let count = stats.strata.by_stratum.get(&stratum).copied().unwrap_or(0);
        println!("  {:<10} {}", stratum.to_string().cyan(), count);
    }
    println!();
    println!(
        "  {} {:.3}",
        "Momentum:".bright_white(),
        stats.surprise.momentum
    );
    println!(
        "  {} {:.3}",
        "Average surprise:".bright_white(),
        stats.surprise.average_surprise
    );
    println!(
        "  {} {} bytes",
        "Estimated size:".bright_white(),
        stats.strata.estimated_bytes
    );
}

fn demo_surprise() -> Result<()> {
    let memory = ContinuumMemory::new(ContinuumConfig::enabled()).context("Invalid configuration")?;
    let surprise = memory.surprise();

    let run = |name: &str, actual: &str| {
        let scope = Scope::agent(name);
        surprise.store_prediction(Prediction::new(
            "p1",
            scope.clone(),
            "user sentiment",
            json!({ "sentiment": "positive" }),
            0.95,
        ));
        surprise.calculate_surprise(
            &Outcome::new("o1", scope, "user sentiment", json!({ "sentiment": actual }))
                .for_prediction("p1"),
        )
    };
    let matched = run("matched", "positive");
    let mismatched = run("mismatched", "negative");

    println!("{}", "Prediction: sentiment = positive (confidence 0.95)".bold());
    println!();
    println!(
        "  {} momentary {:.3}, effective {:.3}",
        "positive outcome:".green(),
        matched.momentary_surprise,
        matched.effective_surprise
    );
    println!(
        "  {} momentary {:.3}, effective {:.3}",
        "negative outcome:".red(),
        mismatched.momentary_surprise,
        mismatched.effective_surprise
    );
    println!();
    if mismatched.momentary_surprise > matched.momentary_surprise {
        println!("{}", "Contradicted prediction is more surprising.".bold());
    } else {
        println!("{}", "Outcomes were equally surprising.".yellow());
    }
    Ok(())
}
