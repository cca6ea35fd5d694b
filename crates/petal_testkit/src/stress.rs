//! Stress tests for PetalDB.
//!
//! These tests verify behavior under heavy load and concurrent access,
//! including reads and writes racing a running GC cycle.

use crate::fixtures::{get_key, get_value};
use petal_core::{CoreError, DataType, Database};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Size of values in bytes.
    pub value_size: usize,
    /// Number of distinct keys.
    pub key_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            value_size: 16,
            key_count: 1_000,
        }
    }
}

fn populate(db: &Database, config: &StressConfig) {
    let value = get_value(config.value_size);
    for i in 0..config.key_count {
        let _ = db.set(&get_key(i), &value);
    }
}

fn tally(result: Result<(), CoreError>, successful: &mut usize, failed: &mut usize) {
    match result {
        Ok(()) => *successful += 1,
        Err(_) => *failed += 1,
    }
}

/// Run a sequential write stress test.
pub fn stress_sequential_writes(db: &Database, config: &StressConfig) -> StressTestResult {
    let value = get_value(config.value_size);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = get_key(i % config.key_count);
        tally(db.set(&key, &value), &mut successful, &mut failed);
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a sequential read stress test.
pub fn stress_sequential_reads(db: &Database, config: &StressConfig) -> StressTestResult {
    populate(db, config);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = get_key(i % config.key_count);
        tally(db.get(&key).map(|_| ()), &mut successful, &mut failed);
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a mixed set/get/delete stress test.
pub fn stress_mixed_operations(db: &Database, config: &StressConfig) -> StressTestResult {
    let value = get_value(config.value_size);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = get_key(i % config.key_count);

        let result = match i % 3 {
            0 => db.set(&key, &value),
            // Not found is still a successful read
            1 => match db.get(&key) {
                Ok(_) | Err(CoreError::KeyNotFound) => Ok(()),
                Err(err) => Err(err),
            },
            _ => db.delete(&key),
        };
        tally(result, &mut successful, &mut failed);
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a list push/pop stress test: each thread pushes onto its own list
/// and pops everything back.
pub fn stress_list_operations(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads / 2;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                let key = format!("list-{t}").into_bytes();
                let record = |ok: bool| {
                    let counter = if ok { &successful } else { &failed };
                    counter.fetch_add(1, Ordering::Relaxed);
                };
                for i in 0..ops_per_thread {
                    record(db.rpush(&key, &[i.to_le_bytes()]).is_ok());
                }
                for i in 0..ops_per_thread {
                    record(db.lpop(&key).is_ok_and(|v| v == i.to_le_bytes()));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run concurrent readers over every data type.
///
/// Each key gets a string, a one-element list, a hash field, a set member
/// and a sorted-set member; thread `t` reads data type `t % 5`, so the
/// readers spread over the five independent type locks.
pub fn stress_concurrent_reads(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    let value = get_value(config.value_size);
    for i in 0..config.key_count {
        let key = get_key(i);
        let _ = db.set(&key, &value);
        let _ = db.rpush(&key, &[&value]);
        let _ = db.hset(&key, b"field", &value);
        let _ = db.sadd(&key, &[b"member"]);
        let _ = db.zadd(&key, i as f64, b"member");
    }

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let key_count = config.key_count;
            let data_type = DataType::ALL[t % DataType::ALL.len()];

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let n = (t * ops_per_thread + i) % key_count;
                    let key = get_key(n);
                    let ok = match data_type {
                        DataType::String => db.get(&key).is_ok(),
                        DataType::List => db.lindex(&key, 0).is_ok(),
                        DataType::Hash => db.hget(&key, b"field").is_ok(),
                        DataType::Set => db.sismember(&key, b"member").unwrap_or(false),
                        DataType::ZSet => db.zscore(&key, b"member").is_ok_and(|s| s == n as f64),
                    };
                    let counter = if ok { &successful } else { &failed };
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run readers and writers against a database while another thread keeps
/// running GC cycles with a zero ratio.
///
/// Keys `0..key_count` are written first and never deleted, so every read
/// of them must succeed. Writers overwrite and delete keys above that range
/// to keep producing garbage. A read counts as failed if it errors, which
/// includes observing a corrupt entry.
pub fn stress_reads_during_gc(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    populate(&db, config);

    let stop = Arc::new(AtomicBool::new(false));
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let collector = {
        let db = Arc::clone(&db);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut cycles = 0usize;
            while !stop.load(Ordering::Relaxed) {
                if db.compact_with_ratio(0.0).is_ok() {
                    cycles += 1;
                }
            }
            cycles
        })
    };

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let key_count = config.key_count;
            let value = get_value(config.value_size);

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let ok = if t % 2 == 0 {
                        db.get(&get_key((t + i * 7) % key_count)).is_ok()
                    } else {
                        let key = get_key(key_count + (i % 64));
                        if i % 4 == 3 {
                            db.delete(&key).is_ok()
                        } else {
                            db.set(&key, &value).is_ok()
                        }
                    };
                    let counter = if ok { &successful } else { &failed };
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    stop.store(true, Ordering::Relaxed);
    collector.join().expect("GC thread panicked");

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
