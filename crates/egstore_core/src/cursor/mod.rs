//! Query cursors and result pages.
//!
//! Every query execution materializes its full, sorted result list into a
//! [`ListCursor`]. Pages are cut from that list with
//! [`ListCursor::populate_query_result`], and positions inside it can be
//! handed out as [`CompiledCursor`]s that a later query resumes from.

mod compiled;
mod list;

pub use compiled::{CompiledCursor, IndexValue};
pub use list::{CursorState, ListCursor};

use crate::index::CompositeIndex;
use egstore_storage::Entity;

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Returned entities, shaped for keys-only and projection queries.
    pub results: Vec<Entity>,
    /// Versions of the returned entities, present only when every result
    /// has one.
    pub versions: Option<Vec<u64>>,
    /// Number of results skipped for the offset.
    pub skipped_results: usize,
    /// Whether more results remain after this page.
    pub more_results: bool,
    /// Whether results carry keys only.
    pub keys_only: bool,
    /// Id of the cursor to continue with, set while results remain.
    pub cursor_id: Option<u64>,
    /// Position after the last skipped or returned result, when compiling.
    pub compiled_cursor: Option<CompiledCursor>,
    /// Position after each returned result, when compiling.
    pub result_compiled_cursors: Vec<CompiledCursor>,
    /// Position after the skipped results, when compiling and skipping.
    pub skipped_results_compiled_cursor: Option<CompiledCursor>,
    /// Composite index the query used, on the first page only.
    pub index_list: Vec<CompositeIndex>,
}
