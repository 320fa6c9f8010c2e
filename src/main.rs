//! MVCC Simulator - drives the engine through a few concurrency scenarios

use anyhow::{anyhow, Context, Result};
use clap::Parser as ClapParser;
use log::{debug, info};
use mvccdb::{
    Database, DatabaseStats, GcStats, IsolationLevel, MvccError, TransactionId, Version,
};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

/// MVCC Simulator - exercises an in-memory multi-version key-value store
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Isolation level used by the concurrent writers
    #[arg(short, long, default_value = "read-committed")]
    isolation: IsolationLevel,

    /// Number of concurrent writers
    #[arg(short, long, default_value = "2")]
    writers: usize,

    /// Number of keys the writers pick from
    #[arg(short, long, default_value = "1")]
    keys: usize,

    /// Attempts per writer before it gives up
    #[arg(short, long, default_value = "10")]
    max_retries: usize,

    /// Print the garbage collection report as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Machine-readable result of the garbage collection step.
#[derive(Serialize)]
struct GcReport {
    gc: GcStats,
    stats: DatabaseStats,
    chains: BTreeMap<String, Vec<Version>>,
}

/// What one writer thread ended up doing.
struct WriterReport {
    writer: usize,
    key: String,
    value: String,
    committed_as: Option<TransactionId>,
    attempts: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    println!("MVCC Simulator v{}", env!("CARGO_PKG_VERSION"));
    println!("   - Isolation: {}", args.isolation);
    println!("   - Writers: {}", args.writers);
    println!("   - Keys: {}", args.keys);
    println!("   - Max retries: {}", args.max_retries);
    println!();

    let db = Arc::new(Database::new());

    simulate_transactions(&db).context("Step 1 failed")?;
    simulate_concurrent_writers(&db, &args).context("Step 2 failed")?;
    simulate_gc(&db, args.json).context("Step 3 failed")?;

    println!("=== Program Completed ===");
    Ok(())
}

/// Two readers look at a write before and after it commits.
fn simulate_transactions(db: &Database) -> Result<()> {
    println!("=== Step 1: Simulate Transactions ===");

    let mut tx1 = db.begin(IsolationLevel::ReadCommitted);
    db.write(&mut tx1, "key1", "value1")?;
    println!("{} wrote 'value1'.", tx1.id());

    let mut tx2 = db.begin(IsolationLevel::ReadCommitted);
    match db.read(&mut tx2, "key1") {
        Ok(value) => println!("{} read (committed): {}", tx2.id(), value),
        Err(MvccError::VersionNotFound) => {
            println!("{} read (committed): nothing visible yet", tx2.id())
        }
        Err(err) => return Err(err.into()),
    }

    let mut dirty = db.begin(IsolationLevel::ReadUncommitted);
    let value = db.read(&mut dirty, "key1")?;
    println!("{} read (uncommitted): {}", dirty.id(), value);

    db.commit(&mut tx1)?;
    println!("{} committed.", tx1.id());

    let value = db.read(&mut tx2, "key1")?;
    println!("{} read (committed): {}", tx2.id(), value);

    db.commit(&mut tx2)?;
    db.commit(&mut dirty)?;
    println!();
    Ok(())
}

/// Writers race for a small set of keys, retrying on retryable errors.
fn simulate_concurrent_writers(db: &Arc<Database>, args: &Args) -> Result<()> {
    println!("=== Step 2: Simulate Concurrent Transactions ===");

    let keys = args.keys.max(1);
    let attempts = args.max_retries.max(1);
    let barrier = Arc::new(Barrier::new(args.writers));

    let handles: Vec<_> = (1..=args.writers)
        .map(|writer| {
            let db = Arc::clone(db);
            let barrier = Arc::clone(&barrier);
            let isolation = args.isolation;
            thread::spawn(move || {
                barrier.wait();
                run_writer(&db, writer, isolation, keys, attempts)
            })
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        let report = handle
            .join()
            .map_err(|_| anyhow!("writer thread panicked"))??;
        reports.push(report);
    }

    for report in &reports {
        match report.committed_as {
            Some(tid) => println!(
                "writer {} committed '{}' to {} as {} after {} attempt(s)",
                report.writer, report.value, report.key, tid, report.attempts
            ),
            None => println!(
                "writer {} gave up on {} after {} attempt(s)",
                report.writer, report.key, report.attempts
            ),
        }
    }

    let mut reader = db.begin(IsolationLevel::ReadCommitted);
    for key in db.keys() {
        match db.read(&mut reader, &key) {
            Ok(value) => println!("{} read (committed) {}: {}", reader.id(), key, value),
            Err(MvccError::VersionNotFound) => {
                println!("{} read (committed) {}: nothing committed", reader.id(), key)
            }
            Err(err) => return Err(err.into()),
        }
    }
    db.commit(&mut reader)?;
    println!();
    Ok(())
}

fn run_writer(
    db: &Database,
    writer: usize,
    isolation: IsolationLevel,
    keys: usize,
    attempts: usize,
) -> Result<WriterReport> {
    let mut rng = rand::thread_rng();
    let key = format!("key{}", rng.gen_range(1..=keys));
    let value = format!("value-from-writer-{}", writer);

    for attempt in 1..=attempts {
        let mut tx = db.begin(isolation);
        let outcome = db
            .write(&mut tx, &key, value.as_str())
            .and_then(|()| db.commit(&mut tx));

        match outcome {
            Ok(()) => {
                info!("writer {} committed {} as {}", writer, key, tx.id());
                return Ok(WriterReport {
                    writer,
                    key,
                    value,
                    committed_as: Some(tx.id()),
                    attempts: attempt,
                });
            }
            Err(err) if err.is_retryable() => {
                debug!("writer {} attempt {} on {}: {}", writer, attempt, key, err);
                db.rollback(&mut tx)?;
                thread::sleep(Duration::from_millis(rng.gen_range(1..5)));
            }
            Err(err) => {
                return Err(err).with_context(|| format!("writer {} failed on {}", writer, key));
            }
        }
    }

    Ok(WriterReport {
        writer,
        key,
        value,
        committed_as: None,
        attempts,
    })
}

/// Moves the clock past every version and collects the stale ones.
fn simulate_gc(db: &Database, json: bool) -> Result<()> {
    println!("=== Step 3: Garbage Collection ===");

    let before = db.stats();
    db.advance_time(10);
    let gc = db.cleanup_old_versions();
    let after = db.stats();

    if json {
        let mut chains = BTreeMap::new();
        for key in db.keys() {
            if let Some(versions) = db.versions(&key) {
                chains.insert(key, versions);
            }
        }
        let report = GcReport {
            gc,
            stats: after,
            chains,
        };
        let encoded =
            serde_json::to_string_pretty(&report).context("Failed to encode GC report")?;
        println!("{}", encoded);
        println!();
        return Ok(());
    }

    println!("Watermark: {}", gc.watermark);
    println!(
        "Removed {} of {} versions across {} records in {:?}",
        gc.versions_removed, before.total_versions, gc.records_scanned, gc.duration
    );
    println!(
        "Remaining: {} versions, {} active transactions, {} locks",
        after.total_versions, after.active_transactions, after.held_locks
    );

    for key in db.keys() {
        let versions = db
            .versions(&key)
            .with_context(|| format!("record for {} disappeared", key))?;
        for version in versions {
            println!(
                "   {} {} created={} ended={} committed={}",
                key,
                version.value,
                version.created_at,
                version
                    .ended_at
                    .map(|ts| ts.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                version.committed
            );
        }
    }
    println!();
    Ok(())
}
