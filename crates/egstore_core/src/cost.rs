//! Write cost model.
//!
//! A put or delete costs one entity write plus the index rows it changes:
//! the ascending and descending built-in index of every property involved,
//! plus every composite index of the kind. Writes that leave the entity
//! unchanged cost nothing.

use crate::index::CompositeIndex;
use egstore_storage::{Entity, PropertyValue};
use std::collections::{BTreeMap, BTreeSet};

/// Property values grouped by name, in entity order.
fn multimap(entity: &Entity, indexed: bool) -> BTreeMap<&str, Vec<&PropertyValue>> {
    let mut map: BTreeMap<&str, Vec<&PropertyValue>> = BTreeMap::new();
    for property in entity.properties.iter().filter(|p| p.indexed == indexed) {
        map.entry(property.name.as_str())
            .or_default()
            .push(&property.value);
    }
    map
}

/// Returns true if replacing `old` with `new` changes nothing.
///
/// Both absent counts as a no-op. Otherwise both must carry the same
/// indexed and unindexed values per name, in the same order.
#[must_use]
pub fn is_noop_write(old: Option<&Entity>, new: Option<&Entity>) -> bool {
    match (old, new) {
        (Some(old), Some(new)) => {
            multimap(old, true) == multimap(new, true)
                && multimap(old, false) == multimap(new, false)
        }
        (None, None) => true,
        _ => false,
    }
}

/// Unique indexed values per name.
fn unique_values(entity: &Entity) -> BTreeMap<&str, BTreeSet<&PropertyValue>> {
    let mut map: BTreeMap<&str, BTreeSet<&PropertyValue>> = BTreeMap::new();
    for property in entity.properties.iter().filter(|p| p.indexed) {
        map.entry(property.name.as_str())
            .or_default()
            .insert(&property.value);
    }
    map
}

/// Number of index rows that change when `old` becomes `new`.
fn changed_index_rows(indexes: &[CompositeIndex], old: Option<&Entity>, new: &Entity) -> u64 {
    let old_values = old.map(unique_values).unwrap_or_default();
    let new_values = unique_values(new);

    let mut unchanged: BTreeMap<&str, i64> = BTreeMap::new();
    for property in new.properties.iter().filter(|p| p.indexed) {
        let name = property.name.as_str();
        if old_values
            .get(name)
            .is_some_and(|values| values.contains(&property.value))
        {
            *unchanged.entry(name).or_default() += 1;
        }
    }

    let names: BTreeSet<&str> = old_values
        .keys()
        .chain(new_values.keys())
        .chain(unchanged.keys())
        .copied()
        .collect();

    let count = |map: &BTreeMap<&str, BTreeSet<&PropertyValue>>, name: &str| {
        map.get(name).map_or(0, |values| values.len() as i64)
    };
    let index_rows = |properties: &[&str], ancestor: bool| -> i64 {
        let mut old_count = 1;
        let mut new_count = 1;
        let mut common_count = 1;
        for &name in properties {
            old_count *= count(&old_values, name);
            new_count *= count(&new_values, name);
            common_count *= unchanged.get(name).copied().unwrap_or(0);
        }
        let multiplier = if ancestor && properties.len() > 1 {
            new.key.path.len() as i64
        } else {
            1
        };
        ((old_count - common_count) + (new_count - common_count)) * multiplier
    };

    // Built-in single property indexes, ascending and descending.
    let mut writes: i64 = names.iter().map(|name| 2 * index_rows(&[*name], false)).sum();
    for index in indexes {
        let properties: Vec<&str> = index
            .definition
            .properties
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        writes += index_rows(&properties, index.definition.ancestor);
    }
    u64::try_from(writes).unwrap_or(0)
}

/// Returns `(entity_writes, index_writes)` for writing `new` over `old`.
///
/// A deletion is charged as `write_ops(indexes, None, old)`.
#[must_use]
pub fn write_ops(indexes: &[CompositeIndex], old: Option<&Entity>, new: &Entity) -> (u64, u64) {
    if is_noop_write(old, Some(new)) {
        return (0, 0);
    }
    let mut index_writes = changed_index_rows(indexes, old, new);
    if old.is_none() {
        // Entities-by-kind row.
        index_writes += 1;
    }
    (1, index_writes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexDefinition, IndexProperty};
    use egstore_storage::Key;
    use proptest::prelude::*;

    fn entity() -> Entity {
        Entity::new(Key::with_id("app", "K", 1))
    }

    #[test]
    fn noop_detection() {
        let a = entity().with("x", 1).with_unindexed("blob", "b");
        assert!(is_noop_write(Some(&a), Some(&a.clone())));
        assert!(is_noop_write(None, None));
        assert!(!is_noop_write(None, Some(&a)));
        assert!(!is_noop_write(Some(&a), None));

        let unindexed_change = entity().with("x", 1).with_unindexed("blob", "c");
        assert!(!is_noop_write(Some(&a), Some(&unindexed_change)));

        let reordered = entity().with("x", 1).with("x", 2);
        let original = entity().with("x", 2).with("x", 1);
        assert!(!is_noop_write(Some(&original), Some(&reordered)));

        let interleaved = entity().with("y", 1).with("x", 1).with_unindexed("blob", "b");
        let plain = entity().with("x", 1).with_unindexed("blob", "b").with("y", 1);
        assert!(is_noop_write(Some(&interleaved), Some(&plain)));
    }

    #[test]
    fn new_entity_cost() {
        let new = entity().with("a", 1).with("b", 2);
        // 1 kind row + 2 rows (asc, desc) per property.
        assert_eq!(write_ops(&[], None, &new), (1, 5));
    }

    #[test]
    fn update_charges_only_changed_rows() {
        let old = entity().with("a", 1).with("b", 2);
        let new = entity().with("a", 1).with("b", 3);
        // b: one row removed and one added in each direction.
        assert_eq!(write_ops(&[], Some(&old), &new), (1, 4));
    }

    #[test]
    fn removed_property_is_charged() {
        let old = entity().with("a", 1).with("b", 2);
        let new = entity().with("a", 1);
        assert_eq!(write_ops(&[], Some(&old), &new), (1, 2));
    }

    #[test]
    fn unindexed_values_are_free() {
        let new = entity().with_unindexed("blob", "x");
        assert_eq!(write_ops(&[], None, &new), (1, 1));
    }

    #[test]
    fn composite_indexes_multiply_values() {
        let index = CompositeIndex::new(
            "app",
            IndexDefinition::new("K", vec![IndexProperty::asc("a"), IndexProperty::desc("b")]),
        );
        let new = entity().with("a", 1).with("a", 2).with("b", 3);
        // kind row + a: 2*2 + b: 1*2 + composite: 2*1
        assert_eq!(write_ops(&[index], None, &new), (1, 9));
    }

    #[test]
    fn ancestor_composite_scales_with_path() {
        let index = CompositeIndex::new(
            "app",
            IndexDefinition::new("K", vec![IndexProperty::asc("a"), IndexProperty::asc("b")])
                .with_ancestor(),
        );
        let key = Key::with_id("app", "P", 1).child("K", 1);
        let new = Entity::new(key).with("a", 1).with("b", 2);
        // kind row + 4 built-in rows + composite row per path element
        assert_eq!(write_ops(&[index], None, &new), (1, 7));
    }

    #[test]
    fn identical_write_is_free() {
        let old = entity().with("a", 1);
        assert_eq!(write_ops(&[], Some(&old), &old.clone()), (0, 0));
    }

    proptest! {
        #[test]
        fn rewriting_the_same_values_is_free(values in prop::collection::vec(any::<i64>(), 0..6)) {
            let mut e = entity();
            for v in &values {
                e = e.with("p", *v);
            }
            prop_assert_eq!(write_ops(&[], Some(&e), &e.clone()), (0, 0));
            prop_assert!(is_noop_write(Some(&e), Some(&e.clone())));
        }
    }
}
