//! Simulate command implementation.
//!
//! Worker threads increment counters spread over entity groups, each
//! increment a read-modify-write transaction. After the run every pending
//! apply is flushed and the counters must add up to the committed
//! increments.

use clap::ValueEnum;
use egstore_core::{
    Caller, Config, ConsistencyPolicy, CoreError, Datastore, RetryConfig, StatsSnapshot,
};
use egstore_storage::{Entity, Key, PropertyValue};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

const APP: &str = "simulation";
const KIND: &str = "Counter";
const COUNT: &str = "count";

/// Consistency policy selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyArg {
    /// Every commit is applied immediately.
    MasterSlave,
    /// High replication with the default delay curve.
    TimeBased,
    /// High replication with a seeded coin flip per apply.
    PseudoRandom,
}

/// Report format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable summary.
    Text,
    /// A single JSON document.
    Json,
}

/// Workload parameters.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Consistency policy.
    pub policy: PolicyArg,
    /// Worker threads.
    pub threads: usize,
    /// Transactions per thread.
    pub ops: usize,
    /// Counters, one per entity group.
    pub groups: usize,
    /// Apply probability of the pseudo-random policy.
    pub probability: f64,
    /// Seed of the pseudo-random policy.
    pub seed: u64,
    /// Retry conflicts without sleeping.
    pub no_backoff: bool,
}

/// Failures of a simulation run.
#[derive(Debug, Error)]
pub enum SimulateError {
    /// The engine rejected a setup or verification request.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Counters disagree with the committed increments.
    #[error("lost updates: {committed} increments committed but counters sum to {observed}")]
    LostUpdates {
        /// Increments whose transaction committed.
        committed: u64,
        /// Sum of the counters after flushing.
        observed: u64,
    },

    /// The workload was configured without threads or groups.
    #[error("threads and groups must be at least 1")]
    EmptyWorkload,
}

/// Outcome of a simulation run.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Policy the run used.
    pub policy: PolicyArg,
    /// Increments attempted.
    pub attempted: u64,
    /// Increments committed.
    pub committed: u64,
    /// Increments that gave up after exhausting retries.
    pub failed: u64,
    /// Sum of the counters after flushing.
    pub observed: u64,
    /// Wall time of the workload in milliseconds.
    pub elapsed_ms: u64,
    /// Engine counters at the end of the run.
    pub stats: StatsSnapshot,
}

/// Runs the simulate command.
pub fn run(
    options: &SimulateOptions,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = simulate(options)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_text(&report),
    }
    Ok(())
}

/// Runs the workload and verifies the counters.
///
/// # Errors
///
/// Returns `LostUpdates` if the counters do not add up, plus engine errors.
pub fn simulate(options: &SimulateOptions) -> Result<SimulationReport, SimulateError> {
    if options.threads == 0 || options.groups == 0 {
        return Err(SimulateError::EmptyWorkload);
    }
    let policy = match options.policy {
        PolicyArg::MasterSlave => ConsistencyPolicy::MasterSlave,
        PolicyArg::TimeBased => ConsistencyPolicy::time_based(),
        PolicyArg::PseudoRandom => {
            ConsistencyPolicy::pseudo_random(options.probability, options.seed)?
        }
    };
    let mut config = Config::default().consistency(policy);
    if options.no_backoff {
        let max_retries = config.retry.max_retries;
        config = config.retry(RetryConfig::immediate(max_retries));
    }
    let datastore = Datastore::in_memory(config);
    let caller = Caller::app(APP);
    info!(
        policy = ?options.policy,
        threads = options.threads,
        ops = options.ops,
        groups = options.groups,
        "starting simulation"
    );

    let committed = AtomicU64::new(0);
    let failed = AtomicU64::new(0);
    let start = Instant::now();
    thread::scope(|scope| {
        for worker in 0..options.threads {
            let (datastore, caller) = (&datastore, &caller);
            let (committed, failed) = (&committed, &failed);
            scope.spawn(move || {
                for op in 0..options.ops {
                    let key = counter_key(worker * options.ops + op, options.groups);
                    match increment(datastore, caller, &key) {
                        Ok(()) => committed.fetch_add(1, Ordering::Relaxed),
                        Err(err) => {
                            debug!(worker, %key, error = %err, "increment gave up");
                            failed.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                }
            });
        }
    });
    let elapsed = start.elapsed();

    datastore.write()?;
    let keys: Vec<Key> = (0..options.groups)
        .map(|g| counter_key(g, options.groups))
        .collect();
    let observed: u64 = datastore
        .get(&keys, None, true, &caller)?
        .iter()
        .filter_map(|lookup| lookup.entity.as_ref())
        .filter_map(|e| e.get(COUNT).and_then(PropertyValue::as_integer))
        .map(|n| u64::try_from(n).unwrap_or_default())
        .sum();

    let committed = committed.into_inner();
    if observed != committed {
        return Err(SimulateError::LostUpdates {
            committed,
            observed,
        });
    }
    let report = SimulationReport {
        policy: options.policy,
        attempted: u64::try_from(options.threads * options.ops).unwrap_or(u64::MAX),
        committed,
        failed: failed.into_inner(),
        observed,
        elapsed_ms: millis(elapsed),
        stats: datastore.stats(),
    };
    datastore.close()?;
    info!(committed = report.committed, failed = report.failed, "simulation finished");
    Ok(report)
}

fn counter_key(index: usize, groups: usize) -> Key {
    let id = i64::try_from(index % groups).unwrap_or_default() + 1;
    Key::with_id(APP, KIND, id)
}

fn increment(datastore: &Datastore, caller: &Caller, key: &Key) -> Result<(), CoreError> {
    datastore.run_in_transaction(APP, false, caller, |ds, handle| {
        let lookups = ds.get(std::slice::from_ref(key), Some(handle), false, caller)?;
        let current = lookups[0]
            .entity
            .as_ref()
            .and_then(|e| e.get(COUNT))
            .and_then(PropertyValue::as_integer)
            .unwrap_or(0);
        ds.put(
            vec![Entity::new(key.clone()).with(COUNT, current + 1)],
            Some(handle),
            caller,
        )?;
        Ok(())
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn print_text(report: &SimulationReport) {
    let stats = &report.stats;
    println!("=== Simulation ({:?}) ===", report.policy);
    println!("Attempted:    {}", report.attempted);
    println!("Committed:    {}", report.committed);
    println!("Failed:       {}", report.failed);
    println!("Counter sum:  {}", report.observed);
    println!("Duration:     {} ms", report.elapsed_ms);
    println!();
    println!("Transactions started:     {}", stats.transactions_started);
    println!("Transactions committed:   {}", stats.transactions_committed);
    println!("Transactions rolled back: {}", stats.transactions_rolled_back);
    println!("Conflicts:                {}", stats.conflicts);
    println!("Retries:                  {}", stats.retries);
    println!("Applies:                  {}", stats.applies);
    println!("Grooms:                   {}", stats.grooms);
    println!("Flushes:                  {}", stats.flushes);
    println!("Entity writes:            {}", stats.entity_writes);
    println!("Index writes:             {}", stats.index_writes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(policy: PolicyArg) -> SimulateOptions {
        SimulateOptions {
            policy,
            threads: 3,
            ops: 40,
            groups: 2,
            probability: 0.3,
            seed: 5,
            no_backoff: true,
        }
    }

    #[test]
    fn every_policy_keeps_all_committed_increments() {
        for policy in [PolicyArg::MasterSlave, PolicyArg::TimeBased, PolicyArg::PseudoRandom] {
            let report = simulate(&options(policy)).unwrap();
            assert_eq!(report.attempted, 120);
            assert_eq!(report.committed + report.failed, 120);
            assert_eq!(report.observed, report.committed);
            assert!(report.stats.transactions_committed >= report.committed);
        }
    }

    #[test]
    fn empty_workloads_are_rejected() {
        let mut opts = options(PolicyArg::MasterSlave);
        opts.groups = 0;
        assert!(matches!(simulate(&opts), Err(SimulateError::EmptyWorkload)));
    }

    #[test]
    fn invalid_probability_is_a_core_error() {
        let mut opts = options(PolicyArg::PseudoRandom);
        opts.probability = 2.0;
        assert!(matches!(simulate(&opts), Err(SimulateError::Core(_))));
    }

    #[test]
    fn report_serializes_policy_in_kebab_case() {
        let report = simulate(&options(PolicyArg::TimeBased)).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["policy"], "time-based");
        assert_eq!(json["stats"]["flushes"], 1);
    }
}
