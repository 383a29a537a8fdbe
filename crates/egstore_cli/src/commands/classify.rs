//! Classify command implementation.

use egstore_core::TimeBasedPolicy;

/// Runs the classify command against the default classification map.
pub fn run(txn: u64, group: u64) {
    let policy = TimeBasedPolicy::default();
    let classification = TimeBasedPolicy::classify(txn, group);
    println!("classification: {classification:.6}");
    match delay_ms(&policy, classification) {
        Some(delay) => println!("visible after:  {delay} ms"),
        None => println!("visible after:  never"),
    }
}

/// The smallest bucket delay after which `classification` is applied.
pub fn delay_ms(policy: &TimeBasedPolicy, classification: f64) -> Option<u64> {
    policy
        .classification_map()
        .iter()
        .map(|&(_, delay)| delay)
        .find(|&delay| policy.should_apply_after(delay, classification))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_follow_the_buckets() {
        let policy = TimeBasedPolicy::default();
        assert_eq!(delay_ms(&policy, 0.5), Some(100));
        assert_eq!(delay_ms(&policy, 0.985), Some(300));
        assert_eq!(delay_ms(&policy, 0.999), Some(240_000));
    }
}
