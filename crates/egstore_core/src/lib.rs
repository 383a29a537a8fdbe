//! # egstore Core
//!
//! Entity-group transaction engine for egstore.
//!
//! This crate provides:
//! - Transactions scoped to entity groups with snapshot reads and
//!   optimistic conflict detection
//! - Consistency policies simulating strong and eventually consistent
//!   replication
//! - Queries with result cursors and compiled cursors
//! - Composite index lifecycle management and write-cost accounting
//! - The [`Datastore`] facade tying it together
//!
//! ## Example
//!
//! ```rust
//! use egstore_core::{Caller, Config, Datastore, FilterOp, Query};
//! use egstore_storage::{Entity, Key};
//!
//! let datastore = Datastore::in_memory(Config::default());
//! let caller = Caller::app("app");
//! datastore
//!     .put(
//!         vec![
//!             Entity::new(Key::with_id("app", "Person", 1)).with("age", 30),
//!             Entity::new(Key::with_id("app", "Person", 2)).with("age", 12),
//!         ],
//!         None,
//!         &caller,
//!     )
//!     .unwrap();
//!
//! let query = Query::new("app", "Person").filter("age", FilterOp::GreaterThan, 18);
//! let mut cursor = datastore.get_query_cursor(&query, &caller).unwrap();
//! let page = cursor.populate_query_result(None, None, false, true).unwrap();
//! assert_eq!(page.results.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod actions;
mod clock;
mod config;
mod consistency;
mod cost;
pub mod cursor;
mod datastore;
mod error;
pub mod index;
mod pseudo;
mod query;
mod stats;
pub mod transaction;
mod types;

pub use actions::{Action, ActionSink, DiscardActions};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AutoIdPolicy, Config, RetryConfig};
pub use consistency::{
    ApplyPredicate, ConsistencyPolicy, PseudoRandomPolicy, TimeBasedPolicy,
    DEFAULT_CLASSIFICATION_MAP,
};
pub use cost::{is_noop_write, write_ops};
pub use cursor::{CompiledCursor, ListCursor, QueryResult};
pub use datastore::{Datastore, Lookup, Mutation};
pub use error::{CoreError, CoreResult};
pub use index::{CompositeIndex, IndexDefinition, IndexManager, IndexProperty, IndexState};
pub use pseudo::{EntityGroupPseudoKind, PseudoKind, ENTITY_GROUP_KIND, VERSION_PROPERTY};
pub use query::{execute, Filter, FilterOp, Order, Query, KEY_PROPERTY, MAX_QUERY_COMPONENTS};
pub use stats::{DatastoreStats, StatsSnapshot};
pub use transaction::{LiveTxn, TransactionManager, TxnState};
pub use types::{Caller, Cost, Direction, TransactionHandle};
