//! Stress tests for egstore.
//!
//! These workloads hammer a datastore from several threads and check that
//! no committed increment is lost, whatever the consistency policy.

use crate::fixtures::{scenarios, TestDatastore, COUNT_PROPERTY};
use egstore_core::{Caller, Datastore};
use egstore_storage::{Entity, PropertyValue};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone, Serialize)]
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

    /// Renders the result as JSON.
    ///
    /// # Errors
    ///
    /// Fails only if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
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
    /// Number of counters, each in its own entity group.
    pub groups: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 2_000,
            threads: 4,
            groups: 8,
        }
    }
}

fn counter_id(index: usize, groups: usize) -> i64 {
    i64::try_from(index % groups.max(1)).unwrap_or_default() + 1
}

/// Run a sequential put stress test, one implicit transaction per put.
pub fn stress_sequential_puts(ds: &TestDatastore, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = TestDatastore::counter_key(counter_id(i, config.groups));
        let entity = Entity::new(key).with(COUNT_PROPERTY, i64::try_from(i).unwrap_or_default());
        match ds.put(vec![entity], None, &ds.caller) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run concurrent read-modify-write increments spread over the counters.
pub fn stress_concurrent_increments(
    ds: &Datastore,
    caller: &Caller,
    config: &StressConfig,
) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let ops_per_thread = config.operations / config.threads.max(1);

    let start = Instant::now();
    thread::scope(|scope| {
        for t in 0..config.threads {
            let (successful, failed) = (&successful, &failed);
            scope.spawn(move || {
                for i in 0..ops_per_thread {
                    let id = counter_id(t * ops_per_thread + i, config.groups);
                    match scenarios::increment_counter(ds, caller, id) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Flushes pending applies and returns the sum of counters `0..groups`.
pub fn counter_total(ds: &Datastore, caller: &Caller, groups: usize) -> i64 {
    ds.write().expect("Failed to flush");
    let keys: Vec<_> = (0..groups)
        .map(|g| TestDatastore::counter_key(counter_id(g, groups)))
        .collect();
    ds.get(&keys, None, true, caller)
        .expect("Failed to read counters")
        .iter()
        .filter_map(|lookup| lookup.entity.as_ref())
        .filter_map(|e| e.get(COUNT_PROPERTY).and_then(PropertyValue::as_integer))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_puts() {
        let ds = TestDatastore::master_slave();
        let config = StressConfig {
            operations: 500,
            ..Default::default()
        };

        let result = stress_sequential_puts(&ds, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 500);

        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["total_ops"], 500);
    }

    #[test]
    fn test_concurrent_increments_master_slave() {
        let ds = TestDatastore::master_slave();
        let config = StressConfig {
            operations: 400,
            threads: 4,
            groups: 4,
        };

        let result = stress_concurrent_increments(&ds, &ds.caller, &config);
        assert_eq!(result.total_ops, 400);
        let total = counter_total(&ds, &ds.caller, config.groups);
        assert_eq!(total, i64::try_from(result.successful_ops).unwrap());
    }

    #[test]
    fn test_concurrent_increments_high_replication() {
        let ds = TestDatastore::pseudo_random(0.3, 7);
        let config = StressConfig {
            operations: 400,
            threads: 4,
            groups: 2,
        };

        let result = stress_concurrent_increments(&ds, &ds.caller, &config);
        let total = counter_total(&ds, &ds.caller, config.groups);
        assert_eq!(total, i64::try_from(result.successful_ops).unwrap());
    }
}
