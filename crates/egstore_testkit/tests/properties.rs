//! End-to-end behaviour of the datastore under each consistency policy.

use egstore_core::{
    ApplyPredicate, CompositeIndex, Config, ConsistencyPolicy, CoreError, IndexDefinition,
    IndexProperty, IndexState, Order, Query, TimeBasedPolicy,
};
use egstore_storage::{Entity, Key, PropertyValue};
use egstore_testkit::prelude::*;

fn value(entity: Option<&Entity>, property: &str) -> Option<i64> {
    entity
        .and_then(|e| e.get(property))
        .and_then(PropertyValue::as_integer)
}

fn lookup_version(ds: &TestDatastore, key: &Key) -> Option<u64> {
    ds.get(std::slice::from_ref(key), None, false, &ds.caller)
        .unwrap()
        .remove(0)
        .version
}

#[test]
fn get_after_put_sees_the_new_value_and_versions_grow() {
    for ds in [TestDatastore::master_slave(), TestDatastore::high_replication()] {
        let mut last = None;
        for n in 0..5 {
            ds.clock.advance(1);
            ds.put_counter(1, n);
            assert_eq!(ds.counter(1), Some(n));
            let version = lookup_version(&ds, &TestDatastore::counter_key(1));
            assert!(version > last, "{version:?} after {last:?}");
            last = version;
        }
    }
}

#[test]
fn identical_put_keeps_the_version() {
    let ds = TestDatastore::high_replication();
    let first = ds.put_counter(1, 7);
    ds.clock.advance(10);
    let second = ds.put_counter(1, 7);
    assert_eq!(first, second);
    assert_eq!(lookup_version(&ds, &TestDatastore::counter_key(1)), first);
    assert_eq!(ds.stats().noop_writes, 1);

    let third = ds.put_counter(1, 8);
    assert!(third > first);
}

/// Group G holds A and B. Txn1 rewrites A. A transaction that began before
/// Txn1's commit and writes B conflicts; one that begins after succeeds and
/// gives B a version above A's.
#[test]
fn snapshot_age_decides_conflicts() {
    let ds = TestDatastore::master_slave();
    let root = Key::with_id(TEST_APP, "Group", 1);
    let a = root.child("Item", 1);
    let b = root.child("Item", 2);
    ds.put(
        vec![
            Entity::new(a.clone()).with("v", 1),
            Entity::new(b.clone()).with("v", 1),
        ],
        None,
        &ds.caller,
    )
    .unwrap();
    let b_before = lookup_version(&ds, &b);

    let txn1 = ds.begin_transaction(TEST_APP, false, &ds.caller).unwrap();
    let early = ds.begin_transaction(TEST_APP, false, &ds.caller).unwrap();
    ds.get(std::slice::from_ref(&a), Some(&txn1), false, &ds.caller)
        .unwrap();
    ds.get(std::slice::from_ref(&b), Some(&early), false, &ds.caller)
        .unwrap();

    ds.clock.advance(1);
    ds.put(vec![Entity::new(a.clone()).with("v", 2)], Some(&txn1), &ds.caller)
        .unwrap();
    ds.commit(&txn1, &ds.caller).unwrap();
    let a_version = lookup_version(&ds, &a);
    assert_eq!(lookup_version(&ds, &b), b_before);

    ds.put(vec![Entity::new(b.clone()).with("v", 2)], Some(&early), &ds.caller)
        .unwrap();
    let err = ds.commit(&early, &ds.caller).unwrap_err();
    assert!(matches!(err, CoreError::ConcurrentTransaction { .. }));

    let late = ds.begin_transaction(TEST_APP, false, &ds.caller).unwrap();
    ds.get(std::slice::from_ref(&b), Some(&late), false, &ds.caller)
        .unwrap();
    ds.clock.advance(1);
    ds.put(vec![Entity::new(b.clone()).with("v", 3)], Some(&late), &ds.caller)
        .unwrap();
    ds.commit(&late, &ds.caller).unwrap();
    assert!(lookup_version(&ds, &b) > a_version);
}

#[test]
fn transaction_helpers_hold_for_high_replication() {
    let ds = TestDatastore::high_replication();
    transaction::test_transaction_isolation(&ds, &ds.caller);
    transaction::test_conflict_detection(&ds, &ds.caller);
    transaction::test_disjoint_groups(&ds, &ds.caller);
}

#[test]
fn compiled_cursors_resume_without_skipping() {
    let ds = TestDatastore::master_slave();
    let item =
        |id: i64, rank: i64| Entity::new(Key::with_id(TEST_APP, "Item", id)).with("rank", rank);
    ds.put((1..=5).map(|i| item(i, i * 10)).collect(), None, &ds.caller)
        .unwrap();
    let query = Query::new(TEST_APP, "Item").order(Order::asc("rank"));
    let ranks = |query: &Query| -> Vec<i64> {
        let mut cursor = ds.get_query_cursor(query, &ds.caller).unwrap();
        let page = cursor
            .populate_query_result(Some(10), None, false, true)
            .unwrap();
        page.results
            .iter()
            .filter_map(|e| value(Some(e), "rank"))
            .collect()
    };

    let mut cursor = ds.get_query_cursor(&query, &ds.caller).unwrap();
    let page = cursor
        .populate_query_result(Some(2), None, true, true)
        .unwrap();
    assert!(page.more_results);
    let after_two = page.compiled_cursor.clone().unwrap();
    let bytes = after_two.to_bytes().unwrap();
    let decoded = egstore_core::CompiledCursor::from_bytes(&bytes).unwrap();
    assert_eq!(ranks(&query.clone().start_cursor(decoded.clone())), vec![30, 40, 50]);

    ds.put(vec![item(6, 60), item(7, 5)], None, &ds.caller).unwrap();
    assert_eq!(
        ranks(&query.clone().start_cursor(decoded.clone())),
        vec![30, 40, 50, 60]
    );

    ds.delete(&[Key::with_id(TEST_APP, "Item", 3)], None, &ds.caller)
        .unwrap();
    assert_eq!(ranks(&query.start_cursor(decoded)), vec![40, 50, 60]);
}

#[test]
fn deleted_indexes_can_only_move_to_error() {
    let ds = TestDatastore::master_slave();
    let definition = IndexDefinition::new(
        "Item",
        vec![IndexProperty::asc("a"), IndexProperty::desc("b")],
    );
    let index = CompositeIndex::new(TEST_APP, definition);
    ds.create_index(index.clone(), &ds.caller).unwrap();
    ds.update_index(&index.clone().with_state(IndexState::Deleted), &ds.caller)
        .unwrap();

    let err = ds
        .update_index(&index.clone().with_state(IndexState::ReadWrite), &ds.caller)
        .unwrap_err();
    assert!(err.is_bad_request());
    ds.update_index(&index.clone().with_state(IndexState::Error), &ds.caller)
        .unwrap();
    let stored = ds.get_indexes(TEST_APP, &ds.caller).unwrap();
    assert_eq!(stored[0].state, IndexState::Error);
}

#[test]
fn time_based_writes_appear_exactly_after_the_delay() {
    let policy = TimeBasedPolicy::with_classification_map(vec![(1.0, 500)]).unwrap();
    let ds = TestDatastore::with_config(
        Config::default()
            .consistency(ConsistencyPolicy::HighReplication(ApplyPredicate::TimeBased(policy))),
    );
    ds.put_counter(1, 1);

    for _ in 0..5 {
        ds.clock.advance(99);
        assert_eq!(ds.eventual_counter(1), None);
    }
    ds.clock.advance(5);
    assert_eq!(ds.eventual_counter(1), Some(1));
    ds.clock.advance(10_000);
    assert_eq!(ds.eventual_counter(1), Some(1));
}

#[test]
fn default_curve_shows_everything_eventually() {
    with_high_replication(|ds| {
        scenarios::populate_counters(ds, 20);
        ds.clock.advance(240_000);
        for id in 1..=20 {
            assert_eq!(ds.eventual_counter(id), Some(0));
        }
    });
}

#[test]
fn pseudo_random_visibility_replays_per_seed() {
    let visibility = |seed: u64| -> Vec<bool> {
        let ds = TestDatastore::pseudo_random(0.5, seed);
        scenarios::populate_counters(&ds, 1);
        for id in 2..=12 {
            ds.put_counter(id, id);
        }
        (1..=12)
            .map(|id| ds.eventual_counter(id).is_some())
            .collect()
    };
    assert_eq!(visibility(42), visibility(42));
    assert_eq!(visibility(9), visibility(9));
}

#[test]
fn pseudo_random_extremes() {
    let never = TestDatastore::pseudo_random(0.0, 1);
    never.put_counter(1, 1);
    assert_eq!(never.eventual_counter(1), None);
    assert_eq!(never.counter(1), Some(1));
    assert_eq!(never.eventual_counter(1), Some(1));

    let always = TestDatastore::pseudo_random(1.0, 1);
    always.put_counter(1, 1);
    assert_eq!(always.eventual_counter(1), Some(1));
}

#[test]
fn write_makes_every_commit_visible() {
    let ds = TestDatastore::pseudo_random(0.0, 3);
    scenarios::populate_counters(&ds, 5);
    assert_eq!(ds.eventual_counter(3), None);
    ds.write().unwrap();
    for id in 1..=5 {
        assert_eq!(ds.eventual_counter(id), Some(0));
    }
    assert!(ds.stats().flushes >= 1);
}

#[test]
fn exhausted_retries_surface_the_conflict() {
    let ds = TestDatastore::master_slave();
    ds.put_counter(1, 0);
    let key = TestDatastore::counter_key(1);
    let caller = &ds.caller;
    let mut attempts = 0;
    let err = ds
        .run_in_transaction(TEST_APP, false, caller, |store, handle| {
            attempts += 1;
            store.get(std::slice::from_ref(&key), Some(handle), false, caller)?;
            scenarios::increment_counter(store, caller, 1)?;
            store.put(vec![Entity::new(key.clone())], Some(handle), caller)?;
            Ok(())
        })
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(attempts, 4);
    assert_eq!(ds.counter(1), Some(4));
    assert_eq!(ds.stats().retries, 3);
    assert_eq!(ds.transaction_manager().active_count(), 0);
}

#[test]
fn generated_workloads_match_the_model() {
    let mut harness = IntegrationHarness::with_datastore(TestDatastore::pseudo_random(0.2, 11));
    let item = Key::with_id(TEST_APP, "Item", 1);
    let part = item.child("Part", 1);
    let ops = [
        EntityOperation::Put { key: item.clone(), value: 1 },
        EntityOperation::Put { key: part.clone(), value: 2 },
        EntityOperation::Get { key: item.clone() },
        EntityOperation::Put { key: item.clone(), value: 1 },
        EntityOperation::Delete { key: item },
        EntityOperation::Get { key: part },
    ];
    for op in &ops {
        harness.apply(op);
    }
    harness.verify_all();
    assert_eq!(harness.tracked_count(), 1);
}
