//! Cursor over a materialized result list.

use crate::config::Config;
use crate::cursor::{CompiledCursor, QueryResult};
use crate::error::{CoreError, CoreResult};
use crate::index::CompositeIndex;
use crate::query::{Matcher, Query, Sortable, KEY_PROPERTY};
use crate::types::Direction;
use egstore_storage::{Entity, EntityRecord, Property, PropertyValue};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

static NEXT_CURSOR_ID: AtomicU64 = AtomicU64::new(1);

/// State shared by every cursor kind: result shaping, the persisted offset
/// and the comparator used to place compiled cursors.
#[derive(Debug)]
pub struct CursorState {
    id: u64,
    app: String,
    keys_only: bool,
    property_names: BTreeSet<String>,
    group_by: BTreeSet<String>,
    persist_offset: bool,
    persisted_offset: usize,
    persisted_count: usize,
    cursor_properties: BTreeSet<String>,
    first_direction: Direction,
    matcher: Matcher,
    index_list: Vec<CompositeIndex>,
    max_query_offset: usize,
    max_results: usize,
}

impl CursorState {
    fn new(
        query: &Query,
        matcher: Matcher,
        index_list: Vec<CompositeIndex>,
        config: &Config,
    ) -> Self {
        let group_by: BTreeSet<String> = query.group_by.iter().cloned().collect();
        let cursor_properties = if group_by.is_empty() {
            matcher
                .orders()
                .iter()
                .map(|o| o.property.clone())
                .chain(std::iter::once(KEY_PROPERTY.to_string()))
                .collect()
        } else {
            group_by.clone()
        };
        let first_direction = matcher
            .orders()
            .first()
            .map_or(Direction::Ascending, |o| o.direction);
        Self {
            id: NEXT_CURSOR_ID.fetch_add(1, AtomicOrdering::Relaxed),
            app: query.app.clone(),
            keys_only: query.keys_only,
            property_names: query.property_names.iter().cloned().collect(),
            group_by,
            persist_offset: query.persist_offset,
            persisted_offset: query.offset,
            persisted_count: query.count.or(query.limit).unwrap_or(config.batch_size),
            cursor_properties,
            first_direction,
            matcher,
            index_list,
            max_query_offset: config.max_query_offset,
            max_results: config.max_results,
        }
    }

    /// Process-wide unique id of the cursor.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// App the cursor was created for.
    #[must_use]
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Whether results carry keys only.
    #[must_use]
    pub fn keys_only(&self) -> bool {
        self.keys_only
    }

    /// Whether the query asked for its offset to carry across pages.
    #[must_use]
    pub fn persists_offset(&self) -> bool {
        self.persist_offset
    }

    /// Offset still to be skipped.
    #[must_use]
    pub fn remaining_offset(&self) -> usize {
        self.persisted_offset
    }

    fn compile(&self, entity: &Entity) -> CompiledCursor {
        CompiledCursor::after(entity, &self.cursor_properties, self.first_direction)
    }

    fn decode(&self, cursor: &CompiledCursor) -> CoreResult<CompiledCursor> {
        let cursor = cursor.clone().normalized(self.first_direction);
        cursor.check_properties(&self.cursor_properties)?;
        Ok(cursor)
    }

    /// Returns true if `record` sorts before the cursor position.
    fn is_before(&self, record: &EntityRecord, cursor: &CompiledCursor) -> bool {
        let view = CursorView {
            entity: &record.entity,
            properties: &self.cursor_properties,
            with_key: cursor.key.is_some(),
        };
        let ordering = self.matcher.compare(&view, cursor);
        if cursor.before {
            ordering == Ordering::Less
        } else {
            ordering != Ordering::Greater
        }
    }

    /// Shapes a stored record for the caller.
    fn load(&self, record: &EntityRecord) -> CoreResult<EntityRecord> {
        if !self.property_names.is_empty() {
            let mut projected = Entity::new(record.entity.key.clone());
            let mut seen = BTreeSet::new();
            for property in record.entity.properties.iter().filter(|p| p.indexed) {
                if self.property_names.contains(&property.name) {
                    if !seen.insert(property.name.as_str()) {
                        return Err(CoreError::internal(format!(
                            "projection produced several values for {}",
                            property.name
                        )));
                    }
                    projected
                        .properties
                        .push(Property::new(property.name.clone(), property.value.clone()));
                }
            }
            Ok(EntityRecord::new(projected))
        } else if self.keys_only {
            Ok(EntityRecord::new(Entity::new(record.entity.key.clone())))
        } else {
            Ok(record.clone())
        }
    }
}

/// A record seen only through the properties a cursor records.
struct CursorView<'a> {
    entity: &'a Entity,
    properties: &'a BTreeSet<String>,
    with_key: bool,
}

impl Sortable for CursorView<'_> {
    fn sort_values(&self, name: &str) -> Vec<Cow<'_, PropertyValue>> {
        if name == KEY_PROPERTY {
            if self.with_key {
                return self.entity.sort_values(name);
            }
            return Vec::new();
        }
        if self.properties.contains(name) {
            self.entity.sort_values(name)
        } else {
            Vec::new()
        }
    }
}

/// Distinct values of the group-by properties of an entity.
fn group_key(entity: &Entity, group_by: &BTreeSet<String>) -> BTreeSet<(String, PropertyValue)> {
    entity
        .properties
        .iter()
        .filter(|p| p.indexed && group_by.contains(&p.name))
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect()
}

/// A cursor over a fully materialized, sorted result list.
///
/// Start and end cursors are located by binary search with the query's own
/// comparator, so a cursor still resumes at the right place after the
/// result it was taken at has gone.
#[derive(Debug)]
pub struct ListCursor {
    state: CursorState,
    results: Vec<EntityRecord>,
    position: usize,
    last_result: Option<CompiledCursor>,
}

impl ListCursor {
    /// Builds a cursor over `results`, which must match `query` and be
    /// sorted by `matcher`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` when a start or end cursor does not match the
    /// query.
    pub(crate) fn new(
        query: &Query,
        matcher: Matcher,
        index_list: Vec<CompositeIndex>,
        mut results: Vec<EntityRecord>,
        config: &Config,
    ) -> CoreResult<Self> {
        let state = CursorState::new(query, matcher, index_list, config);

        if !state.group_by.is_empty() {
            let mut distinct = BTreeSet::new();
            results.retain(|record| distinct.insert(group_key(&record.entity, &state.group_by)));
        }

        let mut last_result = None;
        let start = match query.compiled_cursor.as_ref().filter(|c| c.has_position()) {
            Some(cursor) => {
                let cursor = state.decode(cursor)?;
                let offset = Self::offset_of(&state, &results, &cursor);
                last_result = Some(CompiledCursor {
                    before: false,
                    before_ascending: Some(state.first_direction == Direction::Descending),
                    ..cursor
                });
                offset
            }
            None => 0,
        };
        let end = match &query.end_compiled_cursor {
            Some(cursor) if cursor.has_position() => {
                Self::offset_of(&state, &results, &state.decode(cursor)?)
            }
            Some(_) => 0,
            None => results.len(),
        };

        let mut results: Vec<EntityRecord> = if start < end {
            results.drain(start..end).collect()
        } else {
            Vec::new()
        };
        if let Some(limit) = query.limit {
            results.truncate(limit.saturating_add(query.offset));
        }

        Ok(Self {
            state,
            results,
            position: 0,
            last_result,
        })
    }

    fn offset_of(state: &CursorState, results: &[EntityRecord], cursor: &CompiledCursor) -> usize {
        results.partition_point(|record| state.is_before(record, cursor))
    }

    /// Shared cursor state.
    #[must_use]
    pub fn state(&self) -> &CursorState {
        &self.state
    }

    /// Number of results after cursors and limit were applied.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if the cursor holds no results.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Produces the next page.
    ///
    /// `count` defaults to the query's count, then its limit, then the batch
    /// size. A `deprecated_offset` must repeat the offset the cursor still
    /// has to skip. At most `max_query_offset` results are skipped and at
    /// most `max_results` returned per call; a page that could not skip the
    /// whole offset returns no results. With `compile` the page carries a
    /// cursor after every result, after the skipped results and after the
    /// page. `first_result` attaches the index list.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for a mismatching `deprecated_offset`.
    pub fn populate_query_result(
        &mut self,
        count: Option<usize>,
        deprecated_offset: Option<usize>,
        compile: bool,
        first_result: bool,
    ) -> CoreResult<QueryResult> {
        let count = count.unwrap_or(self.state.persisted_count);
        if let Some(offset) = deprecated_offset {
            if offset != self.state.persisted_offset {
                return Err(CoreError::bad_request(format!(
                    "Invalid offset provided. Got {offset} expected {}.",
                    self.state.persisted_offset
                )));
            }
        }
        let mut result = QueryResult {
            keys_only: self.state.keys_only,
            ..QueryResult::default()
        };

        let offset = self
            .state
            .persisted_offset
            .min(self.results.len() - self.position);
        let skipped = offset.min(self.state.max_query_offset);
        self.position += skipped;
        result.skipped_results = skipped;
        if compile && skipped > 0 {
            result.skipped_results_compiled_cursor =
                Some(self.state.compile(&self.results[self.position - 1].entity));
        }

        if offset == skipped && count > 0 {
            let end = (self.position + count.min(self.state.max_results)).min(self.results.len());
            let page = &self.results[self.position..end];
            let mut versions = Vec::with_capacity(page.len());
            for record in page {
                let loaded = self.state.load(record)?;
                if let Some(version) = loaded.version() {
                    versions.push(version);
                }
                result.results.push(loaded.entity);
                if compile {
                    result
                        .result_compiled_cursors
                        .push(self.state.compile(&record.entity));
                }
            }
            if versions.len() == result.results.len() {
                result.versions = Some(versions);
            }
            self.position = end;
        }

        if self.position > 0 {
            self.last_result = Some(self.state.compile(&self.results[self.position - 1].entity));
        }
        result.more_results = self.position < self.results.len();
        if result.more_results {
            result.cursor_id = Some(self.state.id);
        }
        if compile {
            result.compiled_cursor = self.last_result.clone();
        }
        if first_result {
            result.index_list = self.state.index_list.clone();
        }
        self.state.persisted_offset -= skipped;
        Ok(result)
    }
}
