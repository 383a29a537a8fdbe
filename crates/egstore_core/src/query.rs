//! Queries and their in-memory execution.
//!
//! A query runs over a superset of its results: the snapshot of an entity
//! group for ancestor queries, or a backend scan of the kind otherwise.
//! Execution normalizes filters and orders, guesses the implicit ordering,
//! filters and sorts the candidates, and hands them to a [`ListCursor`].

use crate::config::Config;
use crate::cursor::{CompiledCursor, ListCursor};
use crate::error::{CoreError, CoreResult};
use crate::index::CompositeIndex;
use crate::types::{Direction, TransactionHandle};
use egstore_storage::{Entity, EntityRecord, Key, PropertyValue};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Name of the special property that filters and sorts on entity keys.
pub const KEY_PROPERTY: &str = "__key__";

/// Upper bound on filters plus orders plus ancestor of one query.
pub const MAX_QUERY_COMPONENTS: usize = 100;

/// Comparison operator of a property filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `=`
    Equal,
    /// `>=`
    GreaterThanOrEqual,
    /// `>`
    GreaterThan,
}

impl FilterOp {
    /// Returns true for the four range operators.
    #[must_use]
    pub fn is_inequality(self) -> bool {
        !matches!(self, Self::Equal)
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::LessThan => ordering == Ordering::Less,
            Self::LessThanOrEqual => ordering != Ordering::Greater,
            Self::Equal => ordering == Ordering::Equal,
            Self::GreaterThanOrEqual => ordering != Ordering::Less,
            Self::GreaterThan => ordering == Ordering::Greater,
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Equal => "=",
            Self::GreaterThanOrEqual => ">=",
            Self::GreaterThan => ">",
        };
        f.write_str(op)
    }
}

/// A filter `property op value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Property name, or [`KEY_PROPERTY`].
    pub property: String,
    /// Comparison operator.
    pub op: FilterOp,
    /// Value compared against.
    pub value: PropertyValue,
}

impl Filter {
    /// Creates a filter.
    pub fn new(property: impl Into<String>, op: FilterOp, value: impl Into<PropertyValue>) -> Self {
        Self {
            property: property.into(),
            op,
            value: value.into(),
        }
    }

    fn matches(&self, value: &PropertyValue) -> bool {
        self.op.accepts(value.cmp(&self.value))
    }
}

/// A sort order on one property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Property name, or [`KEY_PROPERTY`].
    pub property: String,
    /// Sort direction.
    pub direction: Direction,
}

impl Order {
    /// Creates an ascending order.
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Ascending,
        }
    }

    /// Creates a descending order.
    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Descending,
        }
    }
}

/// A datastore query.
///
/// Fields are public; the builder methods cover the common cases.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// App queried.
    pub app: String,
    /// Namespace queried.
    pub namespace: String,
    /// Kind queried; `None` for a kindless query.
    pub kind: Option<String>,
    /// Restricts results to descendants of this key (inclusive).
    pub ancestor: Option<Key>,
    /// Property filters, all of which must match.
    pub filters: Vec<Filter>,
    /// Explicit sort orders.
    pub orders: Vec<Order>,
    /// Properties whose distinct value combinations are returned once.
    pub group_by: Vec<String>,
    /// Projected properties; empty for full entities.
    pub property_names: Vec<String>,
    /// Return keys only.
    pub keys_only: bool,
    /// Maximum number of results after the offset.
    pub limit: Option<usize>,
    /// Number of results to skip.
    pub offset: usize,
    /// Size of the first page.
    pub count: Option<usize>,
    /// Position to start from.
    pub compiled_cursor: Option<CompiledCursor>,
    /// Position to stop at.
    pub end_compiled_cursor: Option<CompiledCursor>,
    /// Transaction the query runs in.
    pub transaction: Option<TransactionHandle>,
    /// Whether an offset not yet skipped carries over to the next page.
    pub persist_offset: bool,
}

impl Query {
    /// Creates a query on `kind`.
    pub fn new(app: impl Into<String>, kind: impl Into<String>) -> Self {
        let mut query = Self::kindless(app);
        query.kind = Some(kind.into());
        query
    }

    /// Creates a query over every kind of `app`.
    pub fn kindless(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            namespace: String::new(),
            kind: None,
            ancestor: None,
            filters: Vec::new(),
            orders: Vec::new(),
            group_by: Vec::new(),
            property_names: Vec::new(),
            keys_only: false,
            limit: None,
            offset: 0,
            count: None,
            compiled_cursor: None,
            end_compiled_cursor: None,
            transaction: None,
            persist_offset: true,
        }
    }

    /// Sets the namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Restricts the query to descendants of `ancestor`.
    #[must_use]
    pub fn ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    /// Adds a filter.
    #[must_use]
    pub fn filter(
        mut self,
        property: impl Into<String>,
        op: FilterOp,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.filters.push(Filter::new(property, op, value));
        self
    }

    /// Adds a sort order.
    #[must_use]
    pub fn order(mut self, order: Order) -> Self {
        self.orders.push(order);
        self
    }

    /// Adds a group-by property.
    #[must_use]
    pub fn group_by(mut self, property: impl Into<String>) -> Self {
        self.group_by.push(property.into());
        self
    }

    /// Adds a projected property.
    #[must_use]
    pub fn project(mut self, property: impl Into<String>) -> Self {
        self.property_names.push(property.into());
        self
    }

    /// Returns keys only.
    #[must_use]
    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    /// Sets the limit.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the offset.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the size of the first page.
    #[must_use]
    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Resumes from `cursor`.
    #[must_use]
    pub fn start_cursor(mut self, cursor: CompiledCursor) -> Self {
        self.compiled_cursor = Some(cursor);
        self
    }

    /// Stops at `cursor`.
    #[must_use]
    pub fn end_cursor(mut self, cursor: CompiledCursor) -> Self {
        self.end_compiled_cursor = Some(cursor);
        self
    }

    /// Runs the query inside a transaction.
    #[must_use]
    pub fn transaction(mut self, handle: TransactionHandle) -> Self {
        self.transaction = Some(handle);
        self
    }

    /// Returns the kind, or `""` for a kindless query.
    #[must_use]
    pub fn kind_name(&self) -> &str {
        self.kind.as_deref().unwrap_or("")
    }

    /// Checks the query for unsupported shapes.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` describing the first problem found.
    pub fn validate(&self) -> CoreResult<()> {
        Plan::new(self).check(self)
    }
}

fn check(condition: bool, message: impl FnOnce() -> String) -> CoreResult<()> {
    if condition {
        Ok(())
    } else {
        Err(CoreError::bad_request(message()))
    }
}

/// Filters and orders of a query with redundant parts removed.
///
/// Equality-filtered properties are never ordered, orders after `__key__`
/// are dropped, and projected or grouped properties without any filter
/// become existence requirements.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Plan {
    pub(crate) filters: Vec<Filter>,
    pub(crate) exists: Vec<String>,
    pub(crate) orders: Vec<Order>,
}

impl Plan {
    pub(crate) fn new(query: &Query) -> Self {
        let exists = query.property_names.iter().chain(&query.group_by);
        normalize(&query.filters, &query.orders, exists)
    }

    fn check(&self, query: &Query) -> CoreResult<()> {
        check(query.property_names.is_empty() || !query.keys_only, || {
            "projection and keys_only cannot both be set".to_string()
        })?;
        let projected: BTreeSet<&str> = query.property_names.iter().map(String::as_str).collect();
        for name in &query.property_names {
            check(!is_reserved(name), || {
                format!("projections are not supported for the property: {name}")
            })?;
        }
        check(projected.len() == query.property_names.len(), || {
            "cannot project a property multiple times".to_string()
        })?;

        if query.transaction.is_some() {
            check(query.ancestor.is_some(), || {
                "Only ancestor queries are allowed inside transactions.".to_string()
            })?;
        }

        let components =
            self.filters.len() + self.orders.len() + usize::from(query.ancestor.is_some());
        check(components <= MAX_QUERY_COMPONENTS, || {
            format!(
                "query is too large. may not have more than {MAX_QUERY_COMPONENTS} filters + sort orders ancestor total"
            )
        })?;

        if let Some(ancestor) = &query.ancestor {
            check(ancestor.app == query.app, || {
                format!("query app is {} but ancestor app is {}", query.app, ancestor.app)
            })?;
            check(ancestor.namespace == query.namespace, || {
                format!(
                    "query namespace is {} but ancestor namespace is {}",
                    query.namespace, ancestor.namespace
                )
            })?;
        }

        let mut group_by: BTreeSet<&str> = query.group_by.iter().map(String::as_str).collect();
        for order in &self.orders {
            if group_by.is_empty() {
                break;
            }
            check(group_by.remove(order.property.as_str()), || {
                "items in the group by clause must be specified first in the ordering".to_string()
            })?;
        }

        let mut inequality: Option<&str> = None;
        for filter in &self.filters {
            let name = filter.property.as_str();
            if name == KEY_PROPERTY {
                let PropertyValue::Key(key) = &filter.value else {
                    return Err(CoreError::bad_request(format!(
                        "{KEY_PROPERTY} filter value must be a Key"
                    )));
                };
                check(key.app == query.app, || {
                    format!(
                        "{KEY_PROPERTY} filter app is {} but query app is {}",
                        key.app, query.app
                    )
                })?;
                check(key.namespace == query.namespace, || {
                    format!(
                        "{KEY_PROPERTY} filter namespace is {} but query namespace is {}",
                        key.namespace, query.namespace
                    )
                })?;
            }
            if filter.op.is_inequality() {
                match inequality {
                    None => inequality = Some(name),
                    Some(first) => check(first == name, || {
                        format!(
                            "Only one inequality filter per query is supported. Encountered both {first} and {name}"
                        )
                    })?,
                }
            } else {
                check(!projected.contains(name), || {
                    "cannot use projection on a property with an equality filter".to_string()
                })?;
            }
        }

        if let Some(name) = inequality {
            if !query.group_by.is_empty() && self.orders.is_empty() {
                check(query.group_by.iter().any(|g| g == name), || {
                    format!(
                        "Inequality filter on {name} must also be a group by property when group by properties are set."
                    )
                })?;
            }
            if let Some(first) = self.orders.first() {
                check(first.property == name, || {
                    format!(
                        "The first sort property must be the same as the property to which the inequality filter is applied.  In your query the first sort property is {} but the inequality filter is on {name}",
                        first.property
                    )
                })?;
            }
        }

        if query.kind.is_none() {
            for filter in &self.filters {
                check(filter.property == KEY_PROPERTY, || {
                    "kind is required for non-__key__ filters".to_string()
                })?;
            }
            for order in &self.orders {
                check(
                    order.property == KEY_PROPERTY && order.direction == Direction::Ascending,
                    || "kind is required for all orders except __key__ ascending".to_string(),
                )?;
            }
        }
        Ok(())
    }
}

fn is_reserved(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// Removes filter and order components that cannot change the result.
pub(crate) fn normalize<'a>(
    filters: &[Filter],
    orders: &[Order],
    exists: impl IntoIterator<Item = &'a String>,
) -> Plan {
    let inequality: BTreeSet<&str> = filters
        .iter()
        .filter(|f| f.op.is_inequality())
        .map(|f| f.property.as_str())
        .collect();
    let equality: BTreeSet<&str> = filters
        .iter()
        .filter(|f| !f.op.is_inequality())
        .map(|f| f.property.as_str())
        .filter(|name| !inequality.contains(name))
        .collect();

    let mut seen: BTreeSet<&str> = equality.clone();
    let mut kept_orders: Vec<Order> = Vec::new();
    for order in orders {
        if seen.insert(order.property.as_str()) {
            kept_orders.push(order.clone());
        }
    }
    seen.extend(inequality.iter().copied());

    let mut exists_props = Vec::new();
    for name in exists {
        if seen.insert(name.as_str()) {
            exists_props.push(name.clone());
        }
    }

    if equality.contains(KEY_PROPERTY) {
        kept_orders.clear();
    }
    if let Some(position) = kept_orders.iter().position(|o| o.property == KEY_PROPERTY) {
        kept_orders.truncate(position + 1);
    }

    Plan {
        filters: filters.to_vec(),
        exists: exists_props,
        orders: kept_orders,
    }
}

/// Completes the orders of a plan with the ordering results get anyway.
///
/// Without explicit orders the first inequality property is sorted
/// ascending. Existence requirements follow by name, and `__key__`
/// ascending always ends the list.
pub(crate) fn guess_orders(plan: &Plan) -> Vec<Order> {
    let mut orders = plan.orders.clone();
    if orders.is_empty() {
        if let Some(filter) = plan.filters.iter().find(|f| f.op.is_inequality()) {
            orders.push(Order::asc(filter.property.clone()));
        }
    }
    let sorted_exists: BTreeSet<&String> = plan.exists.iter().collect();
    orders.extend(sorted_exists.into_iter().map(|name| Order::asc(name.clone())));
    if orders.last().map_or(true, |o| o.property != KEY_PROPERTY) {
        orders.push(Order::asc(KEY_PROPERTY));
    }
    orders
}

/// Something that exposes sortable values by property name.
pub(crate) trait Sortable {
    /// Indexed values of `name`; the key for [`KEY_PROPERTY`].
    fn sort_values(&self, name: &str) -> Vec<Cow<'_, PropertyValue>>;
}

impl Sortable for Entity {
    fn sort_values(&self, name: &str) -> Vec<Cow<'_, PropertyValue>> {
        if name == KEY_PROPERTY {
            return vec![Cow::Owned(PropertyValue::Key(self.key.clone()))];
        }
        self.properties
            .iter()
            .filter(|p| p.indexed && p.name == name)
            .map(|p| Cow::Borrowed(&p.value))
            .collect()
    }
}

/// Decides which entities match a query and in which order they come.
#[derive(Debug, Clone)]
pub(crate) struct Matcher {
    kind: Option<String>,
    ancestor: Option<Key>,
    orders: Vec<Order>,
    required: Vec<String>,
    equality: Vec<Filter>,
    ranges: BTreeMap<String, Vec<Filter>>,
}

impl Matcher {
    pub(crate) fn new(query: &Query, plan: &Plan, orders: Vec<Order>) -> Self {
        let mut ranges: BTreeMap<String, Vec<Filter>> = BTreeMap::new();
        let mut equality = Vec::new();
        for filter in &plan.filters {
            if filter.op.is_inequality() {
                ranges
                    .entry(filter.property.clone())
                    .or_default()
                    .push(filter.clone());
            } else {
                equality.push(filter.clone());
            }
        }
        let required = plan
            .exists
            .iter()
            .chain(orders.iter().map(|o| &o.property))
            .filter(|name| name.as_str() != KEY_PROPERTY)
            .cloned()
            .collect();
        Self {
            kind: query.kind.clone(),
            ancestor: query.ancestor.clone(),
            orders,
            required,
            equality,
            ranges,
        }
    }

    pub(crate) fn orders(&self) -> &[Order] {
        &self.orders
    }

    fn in_range(&self, name: &str, value: &PropertyValue) -> bool {
        self.ranges
            .get(name)
            .map_or(true, |range| range.iter().all(|f| f.matches(value)))
    }

    /// Returns true if `entity` satisfies the query's kind, ancestor and filters.
    pub(crate) fn matches(&self, entity: &Entity) -> bool {
        if let Some(kind) = &self.kind {
            if entity.key.kind() != kind {
                return false;
            }
        }
        if let Some(ancestor) = &self.ancestor {
            if !entity.key.has_ancestor(ancestor) {
                return false;
            }
        }
        let equality_ok = self.equality.iter().all(|filter| {
            entity
                .sort_values(&filter.property)
                .iter()
                .any(|value| filter.matches(value))
        });
        let ranges_ok = self.ranges.keys().all(|name| {
            entity
                .sort_values(name)
                .iter()
                .any(|value| self.in_range(name, value))
        });
        let required_ok = self
            .required
            .iter()
            .all(|name| entity.indexed_values(name).next().is_some());
        equality_ok && ranges_ok && required_ok
    }

    /// Picks the value of a multi-valued property that decides its position.
    ///
    /// Only values matching the property's filters are candidates when any
    /// do; ascending takes the smallest, descending the largest.
    fn sort_value<'a>(
        &self,
        values: Vec<Cow<'a, PropertyValue>>,
        order: &Order,
    ) -> Option<Cow<'a, PropertyValue>> {
        let equal: Vec<&PropertyValue> = self
            .equality
            .iter()
            .filter(|f| f.property == order.property)
            .map(|f| &f.value)
            .collect();
        let matching = |value: &PropertyValue| {
            self.in_range(&order.property, value) && (equal.is_empty() || equal.contains(&value))
        };
        let any_match = values.iter().any(|v| matching(&**v));
        let candidates = values.into_iter().filter(|v| !any_match || matching(&**v));
        match order.direction {
            Direction::Ascending => candidates.min(),
            Direction::Descending => candidates.max(),
        }
    }

    /// Compares two sortable items by the query's orders.
    pub(crate) fn compare<A, B>(&self, a: &A, b: &B) -> Ordering
    where
        A: Sortable + ?Sized,
        B: Sortable + ?Sized,
    {
        for order in &self.orders {
            let left = self.sort_value(a.sort_values(&order.property), order);
            let right = self.sort_value(b.sort_values(&order.property), order);
            let ordering = match order.direction {
                Direction::Ascending => left.cmp(&right),
                Direction::Descending => right.cmp(&left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// Splits records whose ordered properties are multi-valued into one record
/// per distinct value combination, the way an index scan returns them.
fn split_for_projection(records: Vec<EntityRecord>, split: &BTreeSet<&str>) -> Vec<EntityRecord> {
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        let mut values: BTreeMap<&str, Vec<&PropertyValue>> = BTreeMap::new();
        let mut needs_split = false;
        for property in record.entity.properties.iter().filter(|p| p.indexed) {
            if let Some(&name) = split.get(property.name.as_str()) {
                let entry = values.entry(name).or_default();
                needs_split |= !entry.is_empty();
                if !entry.contains(&&property.value) {
                    entry.push(&property.value);
                }
            }
        }
        if !needs_split {
            out.push(record);
            continue;
        }

        let mut base = record.entity.clone();
        base.properties.retain(|p| !split.contains(p.name.as_str()));
        let mut entities = vec![base];
        for (name, choices) in &values {
            entities = entities
                .into_iter()
                .flat_map(|entity| {
                    choices.iter().map(move |value| {
                        let mut clone = entity.clone();
                        clone
                            .properties
                            .push(egstore_storage::Property::new(*name, (*value).clone()));
                        clone
                    })
                })
                .collect();
        }
        out.extend(entities.into_iter().map(|entity| EntityRecord {
            entity,
            metadata: record.metadata,
        }));
    }
    out
}

/// Runs `query` over `records`, a superset of its results.
///
/// # Errors
///
/// Returns `BadRequest` for invalid queries or cursors that do not match
/// the query.
pub fn execute(
    records: Vec<EntityRecord>,
    query: &Query,
    index_list: Vec<CompositeIndex>,
    config: &Config,
) -> CoreResult<ListCursor> {
    let plan = Plan::new(query);
    plan.check(query)?;
    let orders = guess_orders(&plan);
    let matcher = Matcher::new(query, &plan, orders);

    let records = if query.property_names.is_empty() {
        records
    } else {
        let split: BTreeSet<&str> = matcher.orders().iter().map(|o| o.property.as_str()).collect();
        split_for_projection(records, &split)
    };

    let mut results: Vec<EntityRecord> = records
        .into_iter()
        .filter(|record| matcher.matches(&record.entity))
        .collect();
    results.sort_by(|a, b| matcher.compare(&a.entity, &b.entity));
    ListCursor::new(query, matcher, index_list, results, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, props: &[(&str, i64)]) -> EntityRecord {
        let mut entity = Entity::new(Key::with_id("app", "K", id));
        for (name, value) in props {
            entity = entity.with(*name, *value);
        }
        EntityRecord::with_version(entity, 1)
    }

    fn ids(records: &[Entity]) -> Vec<i64> {
        records
            .iter()
            .filter_map(|e| e.key.last().and_then(|l| l.id()))
            .collect()
    }

    fn run(records: Vec<EntityRecord>, query: &Query) -> Vec<i64> {
        let mut cursor = execute(records, query, Vec::new(), &Config::default()).unwrap();
        let page = cursor.populate_query_result(Some(100), None, false, true).unwrap();
        ids(&page.results)
    }

    #[test]
    fn guesses_inequality_then_key_order() {
        let plan = Plan::new(&Query::new("app", "K").filter("a", FilterOp::GreaterThan, 1));
        let orders = guess_orders(&plan);
        assert_eq!(orders, vec![Order::asc("a"), Order::asc(KEY_PROPERTY)]);

        let plan = Plan::new(&Query::new("app", "K").order(Order::desc(KEY_PROPERTY)));
        assert_eq!(guess_orders(&plan), vec![Order::desc(KEY_PROPERTY)]);
    }

    #[test]
    fn normalize_drops_redundant_orders() {
        let query = Query::new("app", "K")
            .filter("a", FilterOp::Equal, 1)
            .order(Order::asc("a"))
            .order(Order::desc("b"))
            .order(Order::asc("b"))
            .order(Order::asc(KEY_PROPERTY))
            .order(Order::asc("c"));
        let plan = Plan::new(&query);
        assert_eq!(plan.orders, vec![Order::desc("b"), Order::asc(KEY_PROPERTY)]);

        let key = Key::with_id("app", "K", 1);
        let by_key = Query::new("app", "K")
            .filter(KEY_PROPERTY, FilterOp::Equal, key)
            .order(Order::asc("b"));
        assert!(Plan::new(&by_key).orders.is_empty());
    }

    #[test]
    fn projection_becomes_existence_requirement() {
        let plan = Plan::new(&Query::new("app", "K").project("b").project("a"));
        assert_eq!(plan.exists, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(
            guess_orders(&plan),
            vec![Order::asc("a"), Order::asc("b"), Order::asc(KEY_PROPERTY)]
        );
    }

    #[test]
    fn filters_and_sorts() {
        let records = vec![
            record(1, &[("a", 5)]),
            record(2, &[("a", 1)]),
            record(3, &[("a", 3)]),
            record(4, &[("b", 3)]),
        ];
        let query = Query::new("app", "K").filter("a", FilterOp::GreaterThanOrEqual, 3);
        assert_eq!(run(records.clone(), &query), vec![3, 1]);

        let query = Query::new("app", "K").order(Order::desc("a"));
        assert_eq!(run(records.clone(), &query), vec![1, 3, 2]);

        let query = Query::new("app", "K");
        assert_eq!(run(records, &query), vec![1, 2, 3, 4]);
    }

    #[test]
    fn multi_valued_sort_uses_matching_values() {
        let records = vec![
            record(1, &[("a", 1), ("a", 10)]),
            record(2, &[("a", 5)]),
        ];
        // Ascending picks the smallest value: 1 for entity 1.
        let query = Query::new("app", "K").order(Order::asc("a"));
        assert_eq!(run(records.clone(), &query), vec![1, 2]);

        // Descending picks the largest: 10 for entity 1.
        let query = Query::new("app", "K").order(Order::desc("a"));
        assert_eq!(run(records.clone(), &query), vec![1, 2]);

        // With a filter only matching values count: 10 for entity 1.
        let query = Query::new("app", "K").filter("a", FilterOp::GreaterThan, 2);
        assert_eq!(run(records, &query), vec![2, 1]);
    }

    #[test]
    fn equality_on_multi_valued_property_needs_each_value() {
        let records = vec![
            record(1, &[("tag", 1), ("tag", 2)]),
            record(2, &[("tag", 1)]),
        ];
        let query = Query::new("app", "K")
            .filter("tag", FilterOp::Equal, 1)
            .filter("tag", FilterOp::Equal, 2);
        assert_eq!(run(records, &query), vec![1]);
    }

    #[test]
    fn range_applies_to_a_single_value() {
        let records = vec![record(1, &[("a", 1), ("a", 10)]), record(2, &[("a", 5)])];
        let query = Query::new("app", "K")
            .filter("a", FilterOp::GreaterThan, 2)
            .filter("a", FilterOp::LessThan, 8);
        assert_eq!(run(records, &query), vec![2]);
    }

    #[test]
    fn ancestor_and_kind_restrict_candidates() {
        let root = Key::with_id("app", "P", 1);
        let records = vec![
            EntityRecord::new(Entity::new(root.clone())),
            EntityRecord::new(Entity::new(root.child("K", 1))),
            EntityRecord::new(Entity::new(root.child("K", 2))),
            EntityRecord::new(Entity::new(Key::with_id("app", "P", 2).child("K", 3))),
        ];
        let query = Query::new("app", "K").ancestor(root.clone());
        assert_eq!(run(records.clone(), &query), vec![1, 2]);

        let kindless = Query::kindless("app").ancestor(root);
        assert_eq!(run(records, &kindless).len(), 3);
    }

    #[test]
    fn projection_splits_multi_valued_properties() {
        let records = vec![record(1, &[("a", 2), ("a", 1), ("b", 7)])];
        let query = Query::new("app", "K").project("a");
        let mut cursor = execute(records, &query, Vec::new(), &Config::default()).unwrap();
        let page = cursor.populate_query_result(None, None, false, false).unwrap();
        let values: Vec<_> = page.results.iter().map(|e| e.get("a").cloned()).collect();
        assert_eq!(
            values,
            vec![Some(PropertyValue::Integer(1)), Some(PropertyValue::Integer(2))]
        );
        assert!(page.results.iter().all(|e| e.get("b").is_none()));
        assert!(page.versions.is_none());
    }

    #[test]
    fn validation_messages() {
        let err = Query::new("app", "K")
            .filter("a", FilterOp::GreaterThan, 1)
            .filter("b", FilterOp::LessThan, 1)
            .validate()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "bad request: Only one inequality filter per query is supported. Encountered both a and b"
        );

        let err = Query::new("app", "K")
            .filter("a", FilterOp::GreaterThan, 1)
            .order(Order::asc("b"))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("The first sort property must be the same"));

        assert!(Query::kindless("app")
            .filter("a", FilterOp::Equal, 1)
            .validate()
            .is_err());
        assert!(Query::kindless("app")
            .order(Order::desc(KEY_PROPERTY))
            .validate()
            .is_err());
        assert!(Query::new("app", "K").project("a").keys_only().validate().is_err());
        assert!(Query::new("app", "K")
            .filter(KEY_PROPERTY, FilterOp::Equal, 1)
            .validate()
            .is_err());
        assert!(Query::new("app", "K")
            .ancestor(Key::with_id("other", "P", 1))
            .validate()
            .is_err());
        assert!(Query::new("app", "K")
            .transaction(TransactionHandle {
                app: "app".into(),
                handle: 1
            })
            .validate()
            .is_err());
    }

    #[test]
    fn group_by_must_lead_the_orders() {
        let query = Query::new("app", "K")
            .group_by("a")
            .project("a")
            .project("b")
            .order(Order::asc("b"));
        assert!(query.validate().is_err());

        let query = Query::new("app", "K").group_by("a").project("a").order(Order::asc("a"));
        assert!(query.validate().is_ok());
    }
}
