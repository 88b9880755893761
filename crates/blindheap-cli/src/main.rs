//! blindheap CLI
//!
//! Drives a [`Store`] over an in-memory random heap.
//!
//! Usage:
//!   blindheap demo [--json]            Canonical tag 33/34 scenario with dumps
//!   blindheap soak [updates] [--json]  Random updates, then verify the heap
//!
//! Configuration comes from `BLINDHEAP_*` environment variables
//! (tag count, seed, budgets); logging from `RUST_LOG`.

use blindheap_core::{Error as StoreError, HeapSnapshot, RandomHeap, Store, StoreConfig, Tag, UpdateOutcome};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default number of updates in a soak run.
const DEFAULT_SOAK_UPDATES: u32 = 20;

/// Resumes allowed for one parked update before giving up.
const MAX_RESUMES: u32 = 1_000_000;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),

    #[error("soak check failed: {0}")]
    Soak(String),

    #[error("update of tag {tag} still parked after {resumes} resumes")]
    Stuck { tag: u8, resumes: u32 },
}

type Result<T> = std::result::Result<T, CliError>;

fn print_usage() {
    eprintln!("blindheap - associative store over a random-access-only heap");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  blindheap demo [--json]            Run the tag 33/34 scenario");
    eprintln!("  blindheap soak [updates] [--json]  Apply random updates and verify");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  BLINDHEAP_TAG_COUNT          Tags in the heap (1-128, default 128)");
    eprintln!("  BLINDHEAP_SEED               RNG seed (default: OS entropy)");
    eprintln!("  BLINDHEAP_MAX_SCAN_SAMPLES   Reads per scan before parking");
    eprintln!("  BLINDHEAP_MAX_ATTEMPTS       Repair attempts before parking");
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blindheap_cli=info,blindheap_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let json = args.iter().any(|a| a == "--json");
    let positional: Vec<&str> = args
        .iter()
        .map(String::as_str)
        .filter(|a| !a.starts_with("--"))
        .collect();

    let config = StoreConfig::from_env()?;
    info!(
        tag_count = config.tag_count,
        seed = ?config.seed,
        max_scan_samples = ?config.max_scan_samples,
        max_attempts = ?config.max_attempts,
        "configured"
    );

    let result = match positional.as_slice() {
        ["demo"] => run_demo(&config, json),
        ["soak"] => run_soak(&config, DEFAULT_SOAK_UPDATES, json),
        ["soak", count] => count
            .parse()
            .map_err(|_| CliError::Usage(format!("invalid update count: {count}")))
            .and_then(|n| run_soak(&config, n, json)),
        [] | ["help"] => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            Err(CliError::Usage(format!("unknown command: {}", args.join(" "))))
        }
    };

    result.map_err(Into::into)
}

/// Print the heap contents, sorted.
fn dump(snapshot: &HeapSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
    } else {
        let raw: Vec<u8> = snapshot.cells.iter().map(|c| c.raw()).collect();
        println!("{raw:?}");
    }
    Ok(())
}

fn show_resolve(store: &mut Store<RandomHeap>, tag: u8, json: bool) -> Result<()> {
    let found = store.lookup(tag)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "tag": tag, "bit": found.cell.bit(), "cell": found.cell, "samples": found.samples })
        );
    } else {
        println!("{}", found.cell.raw());
    }
    Ok(())
}

/// Apply an update, resuming it for as long as budgets keep parking it.
///
/// Returns the outcome and how many resumes it took.
fn apply(store: &mut Store<RandomHeap>, tag: u8, bit: bool) -> Result<(UpdateOutcome, u32)> {
    let mut result = store.update(tag, bit);
    let mut resumes = 0u32;
    loop {
        match result {
            Ok(outcome) => return Ok((outcome, resumes)),
            Err(StoreError::ScanBudgetExhausted { .. } | StoreError::AttemptsExhausted { .. })
                if resumes < MAX_RESUMES =>
            {
                resumes += 1;
                result = store.resume();
            }
            Err(StoreError::ScanBudgetExhausted { .. } | StoreError::AttemptsExhausted { .. }) => {
                return Err(CliError::Stuck { tag, resumes });
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn run_demo(config: &StoreConfig, json: bool) -> Result<()> {
    let mut store = Store::zeroed(config)?;
    if store.tag_count() <= 34 {
        return Err(CliError::Usage(format!(
            "demo needs at least 35 tags, configured {}",
            store.tag_count()
        )));
    }

    show_resolve(&mut store, 33, json)?;
    dump(&store.substrate().snapshot(), json)?;

    for tag in [33u8, 34] {
        let (outcome, resumes) = apply(&mut store, tag, true)?;
        if let Some(report) = outcome.report() {
            info!(
                tag,
                resumes,
                attempts = report.attempts,
                passes = report.repair.passes,
                deductions = report.repair.deductions,
                reads = report.reads(),
                "update applied"
            );
        }
        dump(&store.substrate().snapshot(), json)?;
        show_resolve(&mut store, tag, json)?;
    }
    Ok(())
}

/// Aggregate statistics for a soak run.
#[derive(Debug, Default, Serialize)]
struct SoakSummary {
    updates: u32,
    applied: u32,
    redundant: u32,
    resumed: u32,
    attempts: u64,
    passes: u64,
    deductions: u64,
    reads: u64,
    writes: u64,
    consistent: bool,
}

impl SoakSummary {
    fn mean(&self, total: u64) -> f64 {
        if self.applied == 0 {
            0.0
        } else {
            total as f64 / f64::from(self.applied)
        }
    }
}

fn run_soak(config: &StoreConfig, updates: u32, json: bool) -> Result<()> {
    let mut store = Store::zeroed(config)?;
    let tag_count = store.tag_count();
    let mut picker = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
        None => StdRng::from_entropy(),
    };
    let mut model = vec![false; tag_count];
    let mut summary = SoakSummary {
        updates,
        ..SoakSummary::default()
    };

    for _ in 0..updates {
        let tag = picker.gen_range(0..tag_count) as u8;
        let bit = picker.gen_bool(0.5);

        let (outcome, resumes) = apply(&mut store, tag, bit)?;
        summary.resumed += resumes;
        let report = match outcome {
            UpdateOutcome::Redundant => {
                summary.redundant += 1;
                None
            }
            UpdateOutcome::Applied(report) => Some(report),
        };

        if let Some(report) = report {
            summary.applied += 1;
            summary.attempts += u64::from(report.attempts);
            summary.passes += u64::from(report.repair.passes);
            summary.deductions += u64::from(report.repair.deductions);
            summary.reads += report.reads();
            summary.writes += report.writes();
        }
        model[usize::from(tag)] = bit;
    }

    let heap = store.substrate();
    summary.consistent = heap.is_consistent() && heap.parity() == store.checksum();
    if !summary.consistent {
        return Err(CliError::Soak("heap lost a tag or its checksum".into()));
    }
    for (tag, &bit) in model.iter().enumerate() {
        let stored = Tag::new(tag as u8).ok().and_then(|t| heap.peek(t));
        if stored != Some(bit) {
            return Err(CliError::Soak(format!("tag {tag} holds {stored:?}, expected {bit}")));
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Soak complete:");
        println!("  Updates:    {} ({} applied, {} redundant)", summary.updates, summary.applied, summary.redundant);
        println!("  Resumes:    {}", summary.resumed);
        println!("  Attempts:   {:.2} per update", summary.mean(summary.attempts));
        println!("  Passes:     {:.2} per update", summary.mean(summary.passes));
        println!("  Deductions: {:.2} per update", summary.mean(summary.deductions));
        println!("  Reads:      {:.0} per update", summary.mean(summary.reads));
        println!("  Heap:       consistent, checksum verified");
    }
    Ok(())
}
