//! Entity-group transactions.
//!
//! egstore transactions follow the optimistic entity-group model:
//! - **Scope**: every key belongs to the entity group named by its root
//!   element; a transaction touches one group, or up to a configured number
//!   with cross-group transactions enabled
//! - **Isolation**: reads see a snapshot of each group taken on first touch
//! - **Validation**: a commit fails with a retryable conflict if any touched
//!   group was committed to since its snapshot
//! - **Visibility**: committed writes queue per group and are applied in
//!   commit order when the consistency policy says so

mod committed;
mod live;
mod manager;
mod metadata;
mod tracker;

pub(crate) use committed::CommittedTxn;
pub use live::{LiveTxn, TxnState};
pub(crate) use manager::ManagerCore;
pub use manager::{TransactionManager, MINIMUM_VERSION};
pub use metadata::{EntityGroupMetaData, Snapshot};
pub use tracker::EntityGroupTracker;
