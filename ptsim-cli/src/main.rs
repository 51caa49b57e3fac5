//! Process-tree log simulator CLI
//!
//! Loads a YAML simulation document, simulates the requested number of cases
//! and writes one JSON object per case to stdout. Diagnostics go to stderr.
//!
//! Usage:
//!   ptsim order_flow.yaml --cases 1000 --seed 42 --timestamps > log.jsonl
//!   RUST_LOG=ptsim_core=debug ptsim order_flow.yaml --cases 10 --noisy 5

use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use ptsim_core::authoring::{load_scenario_yaml, Scenario};
use ptsim_core::types::Log;
use ptsim_core::LogSimulator;

/// Generate synthetic event logs from a process tree
#[derive(Parser, Debug)]
#[command(name = "ptsim")]
#[command(about = "Simulate cases of a process tree and emit them as JSON lines")]
struct Args {
    /// YAML simulation document (tree, attributes, rules, config)
    spec: PathBuf,

    /// Number of regular cases to simulate
    #[arg(long, short = 'n', default_value_t = 100)]
    cases: usize,

    /// Additional cases simulated under the document's noise rules
    #[arg(long, default_value_t = 0)]
    noisy: usize,

    /// RNG seed (overrides the document's config)
    #[arg(long, env = "PTSIM_SEED")]
    seed: Option<u64>,

    /// Attach start/end timestamps to every trace event
    #[arg(long)]
    timestamps: bool,

    /// Include the runtime event journal in each case
    #[arg(long)]
    events: bool,

    /// Print the compiled execution sequence instead of simulating
    #[arg(long)]
    compile_only: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let yaml = std::fs::read_to_string(&args.spec)
        .with_context(|| format!("reading {}", args.spec.display()))?;
    let Scenario {
        tree,
        attributes,
        rules,
        noise_rules,
        mut config,
    } = load_scenario_yaml(&yaml)
        .with_context(|| format!("loading simulation document {}", args.spec.display()))?;

    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.record_timestamps |= args.timestamps;
    config.record_events |= args.events;

    let mut simulator =
        LogSimulator::with_rules(&tree, rules, attributes, config).context("preparing simulator")?;

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    if args.compile_only {
        serde_json::to_writer_pretty(&mut out, simulator.sequence())?;
        writeln!(out)?;
        return Ok(());
    }

    let log = simulator.simulate(args.cases);
    write_cases(&mut out, &log)?;
    warn_aborted("regular", &log);

    if args.noisy > 0 {
        let noise = simulator
            .simulate_noise(args.noisy, &noise_rules)
            .context("simulating noise cases")?;
        write_cases(&mut out, &noise)?;
        warn_aborted("noise", &noise);
    }
    out.flush()?;
    Ok(())
}

/// Warn when `log` skipped cases; returns how many it skipped.
fn warn_aborted(kind: &str, log: &Log) -> usize {
    let aborted = log.aborted.len();
    if aborted > 0 {
        tracing::warn!(kind, aborted, "some cases were skipped");
    }
    aborted
}

fn write_cases(out: &mut impl Write, log: &Log) -> Result<()> {
    for case in &log.cases {
        serde_json::to_writer(&mut *out, case)?;
        writeln!(out)?;
    }
    Ok(())
}
