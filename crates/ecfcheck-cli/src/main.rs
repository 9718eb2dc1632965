// crates/ecfcheck-cli/src/main.rs

#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ecfcheck_core::{Checker, CheckerConfig, JsonlSink};
use ecfcheck_trace::generator::{generate_log, GeneratorConfig};
use ecfcheck_trace::io::{read_log_auto, write_log_auto};
use ecfcheck_trace::replay::replay_log;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "ecfcheck",
    about = "ECF reentrancy monitor reference CLI",
    long_about = "ECF reentrancy monitor reference CLI.\n\nUse this tool to generate synthetic instrumentation event logs and to replay logs through the checker, emitting a violation report per contract-call span that cannot be serialized.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    /// Increase log verbosity (-v: debug, -vv: trace); RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Generate a synthetic instrumentation event log.
    Simulate {
        /// Transactions to generate (>0)
        #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u32).range(1..))]
        txs: u32,

        /// Contract-id cardinality (>0)
        #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u64).range(1..))]
        contracts: u64,

        /// Storage-key cardinality (>0)
        #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u64).range(1..))]
        keys: u64,

        /// Maximum call depth (>0)
        #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
        max_depth: u32,

        /// Chance a nested call re-enters an ancestor contract
        #[arg(long, default_value_t = 0.3)]
        callback_prob: f64,

        /// Chance a re-entrant callee conflicts with its ancestor's storage
        #[arg(long, default_value_t = 0.3)]
        conflict_prob: f64,

        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Output path for the event log (JSON/CBOR by extension)
        #[arg(long, default_value = "log.json")]
        out: PathBuf,
    },

    /// Replay an event log through the checker and emit violation reports.
    Check {
        /// Input event log (JSON/CBOR by extension)
        #[arg(long)]
        log: PathBuf,

        /// Output path for violation reports (JSON Lines)
        #[arg(long, default_value = "reports.jsonl")]
        out_reports: PathBuf,

        /// Disable checking entirely (hooks become no-ops)
        #[arg(long, default_value_t = false)]
        disable: bool,

        /// Last transaction id of a previous run; ids continue from here
        #[arg(long, default_value_t = 0)]
        tx_id_seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.cmd {
        Cmd::Simulate {
            txs,
            contracts,
            keys,
            max_depth,
            callback_prob,
            conflict_prob,
            seed,
            out,
        } => simulate(
            txs,
            contracts,
            keys,
            max_depth,
            callback_prob,
            conflict_prob,
            seed,
            out,
        ),

        Cmd::Check {
            log,
            out_reports,
            disable,
            tx_id_seed,
        } => check(log, out_reports, disable, tx_id_seed),
    }
}

/// Initialize tracing; `-v` flags set the default filter, RUST_LOG overrides.
fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let fmt_layer = fmt::layer().with_target(false).with_level(true).compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

/// Ensure the parent directory for a file exists.
fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating parent directory {}", dir.display()))?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn simulate(
    txs: u32,
    contracts: u64,
    keys: u64,
    max_depth: u32,
    callback_prob: f64,
    conflict_prob: f64,
    seed: u64,
    out: PathBuf,
) -> Result<()> {
    if !(0.0..=1.0).contains(&callback_prob) || !(0.0..=1.0).contains(&conflict_prob) {
        bail!("--callback-prob and --conflict-prob must be within [0, 1]");
    }

    let cfg = GeneratorConfig {
        txs,
        contracts,
        keys,
        max_depth,
        callback_prob,
        conflict_prob,
        seed,
        ..GeneratorConfig::default()
    };

    info!(txs, contracts, keys, max_depth, seed, "generating synthetic event log");
    let log = generate_log(&cfg);

    ensure_parent_dir(&out)?;
    write_log_auto(&out, &log)
        .with_context(|| format!("writing event log to {}", out.display()))?;

    println!(
        "Simulated {} transactions ({} events) → {}",
        log.len(),
        log.event_count(),
        out.display()
    );
    Ok(())
}

fn check(log_path: PathBuf, out_reports: PathBuf, disable: bool, tx_id_seed: u64) -> Result<()> {
    info!(log = %log_path.display(), reports = %out_reports.display(), disable, "checking event log");

    let log = read_log_auto(&log_path)
        .with_context(|| format!("reading event log from {}", log_path.display()))?;

    ensure_parent_dir(&out_reports)?;
    let sink = JsonlSink::create(&out_reports)
        .with_context(|| format!("creating report sink {}", out_reports.display()))?;

    let cfg = CheckerConfig {
        enabled: !disable,
        tx_id_seed,
        ..CheckerConfig::default()
    };
    let mut checker = Checker::new(cfg, sink);

    let stats = replay_log(&log, &mut checker).context("replaying event log")?;
    let last_tx_id = checker.transaction_id();
    let violations = checker.into_sink().written();

    println!(
        "Checked {} transactions ({} events): {} violation(s) → {} (last tx id {})",
        stats.txs,
        stats.events,
        violations,
        out_reports.display(),
        last_tx_id
    );
    Ok(())
}
