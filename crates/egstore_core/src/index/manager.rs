//! Composite index registry.

use crate::error::{CoreError, CoreResult};
use crate::index::{CompositeIndex, IndexState};
use crate::types::Caller;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Notified after every index mutation of an app.
pub trait IndexChangeListener: Send + Sync + Debug {
    /// Called once per successful create, update or delete.
    fn on_index_change(&self, app_id: &str);
}

/// Stores composite indexes per app.
///
/// Ids come from a counter with its own lock, independent of the index map
/// and of any entity group lock.
#[derive(Debug)]
pub struct IndexManager {
    indexes: RwLock<HashMap<String, Vec<CompositeIndex>>>,
    next_id: Mutex<u64>,
    listeners: RwLock<Vec<Arc<dyn IndexChangeListener>>>,
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexManager {
    /// Creates an empty manager. The first index gets id 1.
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
            next_id: Mutex::new(1),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Registers a listener for index changes.
    pub fn add_listener(&self, listener: Arc<dyn IndexChangeListener>) {
        self.listeners.write().push(listener);
    }

    fn notify(&self, app_id: &str) {
        for listener in self.listeners.read().iter() {
            listener.on_index_change(app_id);
        }
    }

    /// Creates an index and returns its new id.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the caller may not act for the index's app,
    /// the id is not 0, or the app already has an index with the same
    /// definition.
    pub fn create_index(&self, mut index: CompositeIndex, caller: &Caller) -> CoreResult<u64> {
        caller.check_app(&index.app_id)?;
        if index.id != 0 {
            return Err(CoreError::bad_request("New index id must be 0."));
        }
        {
            let mut indexes = self.indexes.write();
            let app_indexes = indexes.entry(index.app_id.clone()).or_default();
            if app_indexes
                .iter()
                .any(|stored| stored.definition == index.definition)
            {
                return Err(CoreError::bad_request("Index already exists."));
            }
            index.id = {
                let mut next_id = self.next_id.lock();
                let id = *next_id;
                *next_id += 1;
                id
            };
            app_indexes.push(index.clone());
        }
        debug!(app = %index.app_id, id = index.id, kind = %index.definition.kind, "index created");
        self.notify(&index.app_id);
        Ok(index.id)
    }

    /// Moves the stored index with `index`'s definition to `index.state`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the index does not exist or the transition
    /// is not allowed.
    pub fn update_index(&self, index: &CompositeIndex, caller: &Caller) -> CoreResult<()> {
        caller.check_app(&index.app_id)?;
        {
            let mut indexes = self.indexes.write();
            let stored = indexes
                .get_mut(&index.app_id)
                .and_then(|app| app.iter_mut().find(|s| s.definition == index.definition))
                .ok_or_else(|| CoreError::bad_request("Index does not exist."))?;
            if !stored.state.can_transition_to(index.state) {
                return Err(CoreError::bad_request(format!(
                    "cannot move index state from {} to {}",
                    stored.state, index.state
                )));
            }
            stored.state = index.state;
        }
        debug!(app = %index.app_id, state = %index.state, "index updated");
        self.notify(&index.app_id);
        Ok(())
    }

    /// Removes the stored index with `index`'s definition.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the index does not exist.
    pub fn delete_index(&self, index: &CompositeIndex, caller: &Caller) -> CoreResult<()> {
        caller.check_app(&index.app_id)?;
        {
            let mut indexes = self.indexes.write();
            let app = indexes
                .get_mut(&index.app_id)
                .ok_or_else(|| CoreError::bad_request("Index does not exist."))?;
            let position = app
                .iter()
                .position(|s| s.definition == index.definition)
                .ok_or_else(|| CoreError::bad_request("Index does not exist."))?;
            app.remove(position);
        }
        self.notify(&index.app_id);
        Ok(())
    }

    /// Returns the indexes of `app`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the caller may not read `app`'s indexes.
    pub fn get_indexes(&self, app: &str, caller: &Caller) -> CoreResult<Vec<CompositeIndex>> {
        caller.check_app(app)?;
        Ok(self.indexes.read().get(app).cloned().unwrap_or_default())
    }

    /// Returns the serving indexes of `app`.
    pub(crate) fn serving_indexes(&self, app: &str) -> Vec<CompositeIndex> {
        self.indexes
            .read()
            .get(app)
            .map(|indexes| {
                indexes
                    .iter()
                    .filter(|index| index.state == IndexState::ReadWrite)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops every index. Ids keep increasing.
    pub fn clear(&self) {
        let apps: Vec<String> = self.indexes.write().drain().map(|(app, _)| app).collect();
        for app in apps {
            self.notify(&app);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexDefinition, IndexProperty};

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl IndexChangeListener for Recorder {
        fn on_index_change(&self, app_id: &str) {
            self.0.lock().push(app_id.to_string());
        }
    }

    fn index(kind: &str) -> CompositeIndex {
        CompositeIndex::new(
            "app",
            IndexDefinition::new(kind, vec![IndexProperty::asc("a"), IndexProperty::desc("b")]),
        )
    }

    #[test]
    fn ids_increase() {
        let manager = IndexManager::new();
        let caller = Caller::app("app");
        assert_eq!(manager.create_index(index("A"), &caller).unwrap(), 1);
        assert_eq!(manager.create_index(index("B"), &caller).unwrap(), 2);
        assert_eq!(manager.get_indexes("app", &caller).unwrap().len(), 2);
    }

    #[test]
    fn create_validation() {
        let manager = IndexManager::new();
        let caller = Caller::app("app");
        let mut with_id = index("A");
        with_id.id = 3;
        assert_eq!(
            manager.create_index(with_id, &caller).unwrap_err().to_string(),
            "bad request: New index id must be 0."
        );
        manager.create_index(index("A"), &caller).unwrap();
        assert_eq!(
            manager.create_index(index("A"), &caller).unwrap_err().to_string(),
            "bad request: Index already exists."
        );
        assert!(manager
            .create_index(index("A"), &Caller::app("other"))
            .is_err());
    }

    #[test]
    fn state_machine_is_enforced() {
        let manager = IndexManager::new();
        let caller = Caller::app("app");
        manager.create_index(index("A"), &caller).unwrap();

        let deleted = index("A").with_state(IndexState::Deleted);
        manager.update_index(&deleted, &caller).unwrap();
        manager.update_index(&deleted, &caller).unwrap();

        let err = manager
            .update_index(&index("A").with_state(IndexState::ReadWrite), &caller)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "bad request: cannot move index state from DELETED to READ_WRITE"
        );
        manager
            .update_index(&index("A").with_state(IndexState::Error), &caller)
            .unwrap();
        let stored = manager.get_indexes("app", &caller).unwrap();
        assert_eq!(stored[0].state, IndexState::Error);
    }

    #[test]
    fn missing_index() {
        let manager = IndexManager::new();
        let caller = Caller::app("app");
        assert!(manager.update_index(&index("A"), &caller).is_err());
        assert!(manager.delete_index(&index("A"), &caller).is_err());
    }

    #[test]
    fn mutations_notify_listeners() {
        let manager = IndexManager::new();
        let recorder = Arc::new(Recorder::default());
        manager.add_listener(recorder.clone());
        let caller = Caller::app("app");

        manager.create_index(index("A"), &caller).unwrap();
        manager
            .update_index(&index("A").with_state(IndexState::ReadWrite), &caller)
            .unwrap();
        assert_eq!(manager.serving_indexes("app").len(), 1);
        manager.delete_index(&index("A"), &caller).unwrap();
        let _ = manager.delete_index(&index("A"), &caller);

        assert_eq!(recorder.0.lock().len(), 3);
        assert!(manager.get_indexes("app", &caller).unwrap().is_empty());
    }
}
