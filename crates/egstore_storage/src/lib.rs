//! # egstore Storage
//!
//! Entity data model and storage backend trait for egstore.
//!
//! This crate provides the lowest layer of the datastore emulator: keys,
//! entities and records, plus the [`StorageBackend`] hooks that any
//! concrete store has to implement.
//!
//! ## Design Principles
//!
//! - Backends store records blindly; they never enforce consistency
//! - The transaction engine serializes access per entity group before
//!   calling into a backend
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - Records kept in process memory
//!
//! ## Example
//!
//! ```rust
//! use egstore_storage::{Entity, EntityRecord, InMemoryBackend, Key, StorageBackend};
//!
//! let backend = InMemoryBackend::new();
//! let key = Key::with_id("app", "Person", 1);
//! backend.put(EntityRecord::new(Entity::new(key.clone())), true).unwrap();
//! assert!(backend.get(&key).unwrap().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod entity;
mod error;
mod ids;
mod key;
mod memory;

pub use backend::{IdAllocation, StorageBackend};
pub use entity::{Entity, EntityMetadata, EntityRecord, Property, PropertyValue};
pub use error::{StorageError, StorageResult};
pub use ids::{
    id_to_counter, reverse_bits_u64, to_scattered_id, IdSpace, MAX_SCATTERED_COUNTER,
    MAX_SCATTERED_ID, MAX_SEQUENTIAL_ID,
};
pub use key::{EntityGroupKey, IdOrName, Key, PathElement};
pub use memory::InMemoryBackend;
