//! Composite index requirements of queries.

use crate::index::{IndexDefinition, IndexProperty};
use crate::query::{normalize, Plan, Query, KEY_PROPERTY};
use crate::types::Direction;
use std::collections::BTreeSet;

/// The composite index shape a query needs.
///
/// An index serves the query when its properties are the `prefix` names in
/// any order and direction, followed by `postfix_ordered` exactly (a missing
/// direction matches either), then `postfix_group_by` and finally
/// `postfix_unordered`, each in any order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredIndex {
    /// Kind queried.
    pub kind: String,
    /// Whether the query has an ancestor.
    pub ancestor: bool,
    /// Equality-filtered properties.
    pub prefix: BTreeSet<String>,
    /// Sort orders, with the inequality property first when present.
    pub postfix_ordered: Vec<(String, Option<Direction>)>,
    /// Grouped properties that are neither filtered nor ordered.
    pub postfix_group_by: BTreeSet<String>,
    /// Projected properties that are neither filtered nor ordered.
    pub postfix_unordered: BTreeSet<String>,
}

impl RequiredIndex {
    /// The recommended index definition: the prefix, the ordered
    /// properties (ascending when any direction works), then the grouped
    /// and the remaining projected properties, sets sorted by name.
    #[must_use]
    pub fn definition(&self) -> IndexDefinition {
        let mut properties: Vec<IndexProperty> =
            self.prefix.iter().map(IndexProperty::asc).collect();
        properties.extend(self.postfix_ordered.iter().map(|(name, direction)| IndexProperty {
            name: name.clone(),
            direction: direction.unwrap_or(Direction::Ascending),
        }));
        properties.extend(self.postfix_group_by.iter().map(IndexProperty::asc));
        properties.extend(self.postfix_unordered.iter().map(IndexProperty::asc));
        IndexDefinition {
            kind: self.kind.clone(),
            ancestor: self.ancestor,
            properties,
        }
    }

    /// Returns true if an index with `definition` serves the query.
    ///
    /// The postfix groups are matched from the end of the index; whatever
    /// precedes them must be exactly the prefix names.
    #[must_use]
    pub fn is_satisfied_by(&self, definition: &IndexDefinition) -> bool {
        if definition.kind != self.kind || definition.ancestor != self.ancestor {
            return false;
        }
        let mut remaining = definition.properties.as_slice();

        for group in [&self.postfix_unordered, &self.postfix_group_by] {
            let Some(rest) = strip_set(remaining, group) else {
                return false;
            };
            remaining = rest;
        }

        let ordered = self.postfix_ordered.len();
        if remaining.len() < ordered {
            return false;
        }
        let (rest, tail) = remaining.split_at(remaining.len() - ordered);
        let ordered_ok = tail
            .iter()
            .zip(&self.postfix_ordered)
            .all(|(property, (name, direction))| {
                &property.name == name && direction.map_or(true, |d| d == property.direction)
            });
        if !ordered_ok {
            return false;
        }

        strip_set(rest, &self.prefix).is_some_and(<[IndexProperty]>::is_empty)
    }
}

/// Removes a trailing run of `properties` holding exactly the names of
/// `group`, in any order and direction.
fn strip_set<'a>(
    properties: &'a [IndexProperty],
    group: &BTreeSet<String>,
) -> Option<&'a [IndexProperty]> {
    if properties.len() < group.len() {
        return None;
    }
    let (rest, tail) = properties.split_at(properties.len() - group.len());
    let names: BTreeSet<&String> = tail.iter().map(|p| &p.name).collect();
    (names.len() == group.len() && names.into_iter().eq(group.iter())).then_some(rest)
}

/// Computes the composite index `query` needs, or `None` when the built-in
/// indexes serve it.
///
/// Built-in indexes cover kindless queries, queries on a kind with only
/// equality filters, and kind queries without ancestor involving at most
/// one property (except a descending `__key__` order). Ascending `__key__`
/// orders and `__key__` filters are served natively and never require an
/// index.
#[must_use]
pub fn required_index(query: &Query) -> Option<RequiredIndex> {
    let kind = query.kind.clone()?;
    let ancestor = query.ancestor.is_some();
    let exists = query.property_names.iter().chain(&query.group_by);
    let plan = strip_native(normalize(&query.filters, &query.orders, exists));

    let inequality = plan
        .filters
        .iter()
        .find(|f| f.op.is_inequality())
        .map(|f| f.property.clone());
    if inequality.is_none() && plan.exists.is_empty() && plan.orders.is_empty() {
        let key_equality = plan
            .filters
            .iter()
            .any(|f| !f.op.is_inequality() && f.property == KEY_PROPERTY);
        if !key_equality {
            return None;
        }
    }

    let group_by: BTreeSet<&String> = query.group_by.iter().collect();
    let prefix: BTreeSet<String> = plan
        .filters
        .iter()
        .filter(|f| !f.op.is_inequality())
        .map(|f| f.property.clone())
        .collect();
    let mut postfix_ordered: Vec<(String, Option<Direction>)> = plan
        .orders
        .iter()
        .map(|o| (o.property.clone(), Some(o.direction)))
        .collect();
    let (postfix_group_by, postfix_unordered): (BTreeSet<String>, BTreeSet<String>) =
        plan.exists.iter().cloned().partition(|name| group_by.contains(name));
    if let Some(name) = inequality {
        if postfix_ordered.is_empty() {
            postfix_ordered.push((name, None));
        }
    }

    let property_count =
        prefix.len() + postfix_ordered.len() + postfix_group_by.len() + postfix_unordered.len();
    if !ancestor && property_count <= 1 {
        let key_descending = postfix_ordered
            .first()
            .is_some_and(|(name, d)| name == KEY_PROPERTY && *d == Some(Direction::Descending));
        if !key_descending {
            return None;
        }
    }

    Some(RequiredIndex {
        kind,
        ancestor,
        prefix,
        postfix_ordered,
        postfix_group_by,
        postfix_unordered,
    })
}

/// Drops the components the datastore serves without a composite index.
fn strip_native(mut plan: Plan) -> Plan {
    if !plan.exists.is_empty() {
        return plan;
    }
    let mut key_descending = false;
    if let Some(last) = plan.orders.last() {
        if last.property == KEY_PROPERTY {
            if last.direction == Direction::Ascending {
                plan.orders.pop();
            } else {
                key_descending = true;
            }
        }
    }
    let other_inequality = plan
        .filters
        .iter()
        .any(|f| f.op.is_inequality() && f.property != KEY_PROPERTY);
    if !key_descending && !other_inequality {
        plan.filters.retain(|f| f.property != KEY_PROPERTY);
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FilterOp, Order};
    use egstore_storage::Key;

    #[test]
    fn built_in_indexes_need_nothing() {
        assert!(required_index(&Query::kindless("app")).is_none());
        assert!(required_index(&Query::new("app", "K")).is_none());
        assert!(required_index(&Query::new("app", "K").order(Order::desc("a"))).is_none());
        let inequality = Query::new("app", "K").filter("a", FilterOp::GreaterThan, 1);
        assert!(required_index(&inequality).is_none());
        let equalities = Query::new("app", "K")
            .filter("a", FilterOp::Equal, 1)
            .filter("b", FilterOp::Equal, 2);
        assert!(required_index(&equalities).is_none());
        assert!(required_index(&Query::new("app", "K").order(Order::asc(KEY_PROPERTY))).is_none());
    }

    #[test]
    fn descending_key_order_needs_an_index() {
        let required = required_index(&Query::new("app", "K").order(Order::desc(KEY_PROPERTY)))
            .expect("index required");
        assert_eq!(
            required.definition().properties,
            vec![IndexProperty::desc(KEY_PROPERTY)]
        );
    }

    #[test]
    fn equality_then_order() {
        let query = Query::new("app", "K")
            .filter("b", FilterOp::Equal, 1)
            .filter("a", FilterOp::Equal, 1)
            .order(Order::desc("c"));
        let required = required_index(&query).expect("index required");
        let definition = required.definition();
        assert_eq!(
            definition.properties,
            vec![
                IndexProperty::asc("a"),
                IndexProperty::asc("b"),
                IndexProperty::desc("c")
            ]
        );
        assert!(required.is_satisfied_by(&definition));

        let reordered_prefix = IndexDefinition::new(
            "K",
            vec![
                IndexProperty::desc("b"),
                IndexProperty::asc("a"),
                IndexProperty::desc("c"),
            ],
        );
        assert!(required.is_satisfied_by(&reordered_prefix));

        let wrong_direction = IndexDefinition::new(
            "K",
            vec![
                IndexProperty::asc("a"),
                IndexProperty::asc("b"),
                IndexProperty::asc("c"),
            ],
        );
        assert!(!required.is_satisfied_by(&wrong_direction));
        assert!(!required.is_satisfied_by(&definition.clone().with_ancestor()));
    }

    #[test]
    fn inequality_direction_is_free() {
        let query = Query::new("app", "K")
            .filter("a", FilterOp::Equal, 1)
            .filter("b", FilterOp::LessThan, 5);
        let required = required_index(&query).expect("index required");
        assert_eq!(required.postfix_ordered, vec![("b".to_string(), None)]);
        let descending = IndexDefinition::new(
            "K",
            vec![IndexProperty::asc("a"), IndexProperty::desc("b")],
        );
        assert!(required.is_satisfied_by(&descending));
    }

    #[test]
    fn ancestor_queries_with_orders_need_an_index() {
        let query = Query::new("app", "K")
            .ancestor(Key::with_id("app", "P", 1))
            .order(Order::asc("a"));
        let required = required_index(&query).expect("index required");
        assert!(required.definition().ancestor);

        let plain = Query::new("app", "K").ancestor(Key::with_id("app", "P", 1));
        assert!(required_index(&plain).is_none());
    }

    #[test]
    fn projection_adds_unordered_postfix() {
        let query = Query::new("app", "K")
            .filter("a", FilterOp::Equal, 1)
            .project("c")
            .project("b");
        let required = required_index(&query).expect("index required");
        assert_eq!(
            required.definition().properties,
            vec![
                IndexProperty::asc("a"),
                IndexProperty::asc("b"),
                IndexProperty::asc("c")
            ]
        );
        let swapped = IndexDefinition::new(
            "K",
            vec![
                IndexProperty::asc("a"),
                IndexProperty::desc("c"),
                IndexProperty::asc("b"),
            ],
        );
        assert!(required.is_satisfied_by(&swapped));
    }
}
