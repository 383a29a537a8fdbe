//! Entity keys and entity group keys.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The identifying part of a path element.
///
/// Numeric ids sort before names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IdOrName {
    /// Numeric id.
    Id(i64),
    /// String name.
    Name(String),
}

/// One `(kind, id-or-name)` step of a key path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathElement {
    /// Kind of the entity at this step.
    pub kind: String,
    /// Id or name; `None` while the key is still incomplete.
    pub id_or_name: Option<IdOrName>,
}

impl PathElement {
    /// Creates an element with a numeric id.
    pub fn with_id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id_or_name: Some(IdOrName::Id(id)),
        }
    }

    /// Creates an element with a name.
    pub fn with_name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id_or_name: Some(IdOrName::Name(name.into())),
        }
    }

    /// Creates an element whose id has not been allocated yet.
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id_or_name: None,
        }
    }

    /// Returns the numeric id, if any.
    #[must_use]
    pub fn id(&self) -> Option<i64> {
        match self.id_or_name {
            Some(IdOrName::Id(id)) => Some(id),
            _ => None,
        }
    }

    /// Returns true if the element carries an id or a name.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.id_or_name.is_some()
    }
}

/// A full entity key.
///
/// Keys order by app, namespace and then path, element by element, so a
/// parent always sorts immediately before its descendants.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    /// Owning application.
    pub app: String,
    /// Namespace inside the application (empty for the default namespace).
    pub namespace: String,
    /// Ancestor path, root first.
    pub path: Vec<PathElement>,
}

impl Key {
    /// Creates a key from an explicit path.
    pub fn new(app: impl Into<String>, path: Vec<PathElement>) -> Self {
        Self {
            app: app.into(),
            namespace: String::new(),
            path,
        }
    }

    /// Creates a root key with a numeric id.
    pub fn with_id(app: impl Into<String>, kind: impl Into<String>, id: i64) -> Self {
        Self::new(app, vec![PathElement::with_id(kind, id)])
    }

    /// Creates a root key with a name.
    pub fn with_name(
        app: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(app, vec![PathElement::with_name(kind, name)])
    }

    /// Creates a root key whose id is still to be allocated.
    pub fn incomplete(app: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::new(app, vec![PathElement::incomplete(kind)])
    }

    /// Returns a copy of this key placed in `namespace`.
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Returns the child key `self / (kind, id)`.
    #[must_use]
    pub fn child(&self, kind: impl Into<String>, id: i64) -> Self {
        let mut child = self.clone();
        child.path.push(PathElement::with_id(kind, id));
        child
    }

    /// Returns the child key `self / (kind, name)`.
    #[must_use]
    pub fn child_named(&self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.path.push(PathElement::with_name(kind, name));
        child
    }

    /// Returns an incomplete child key `self / kind`.
    #[must_use]
    pub fn incomplete_child(&self, kind: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.path.push(PathElement::incomplete(kind));
        child
    }

    /// Kind of the last path element.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.path.last().map_or("", |e| e.kind.as_str())
    }

    /// Returns the last path element.
    #[must_use]
    pub fn last(&self) -> Option<&PathElement> {
        self.path.last()
    }

    /// Mutable access to the last path element, used to fill in allocated ids.
    pub fn last_mut(&mut self) -> Option<&mut PathElement> {
        self.path.last_mut()
    }

    /// Returns true if the last element carries an id or a name.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.path.last().is_some_and(PathElement::is_complete)
    }

    /// Returns true if `self` equals `ancestor` or descends from it.
    #[must_use]
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        self.app == ancestor.app
            && self.namespace == ancestor.namespace
            && self.path.len() >= ancestor.path.len()
            && self.path[..ancestor.path.len()] == ancestor.path[..]
    }

    /// Returns the key of the entity group this key belongs to.
    ///
    /// # Errors
    ///
    /// Fails when the path is empty or the root element is incomplete.
    pub fn entity_group(&self) -> StorageResult<EntityGroupKey> {
        let root = self
            .path
            .first()
            .ok_or_else(|| StorageError::invalid_argument("key has an empty path"))?;
        if !root.is_complete() {
            return Err(StorageError::invalid_argument(format!(
                "root element of {self} has no id or name"
            )));
        }
        Ok(EntityGroupKey(Key {
            app: self.app.clone(),
            namespace: self.namespace.clone(),
            path: vec![root.clone()],
        }))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.app)?;
        if !self.namespace.is_empty() {
            write!(f, "[{}]", self.namespace)?;
        }
        for element in &self.path {
            match &element.id_or_name {
                Some(IdOrName::Id(id)) => write!(f, "/{}:{}", element.kind, id)?,
                Some(IdOrName::Name(name)) => write!(f, "/{}:'{}'", element.kind, name)?,
                None => write!(f, "/{}:?", element.kind)?,
            }
        }
        Ok(())
    }
}

/// Key of an entity group: a key truncated to its root element.
///
/// The entity group is the unit of transactional atomicity and of locking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityGroupKey(Key);

impl EntityGroupKey {
    /// The reserved group used by transactions that only carry actions.
    pub fn global(app: impl Into<String>) -> Self {
        Self(Key::with_id(app, "__global__", 1))
    }

    /// Returns the root key of the group.
    #[must_use]
    pub fn as_key(&self) -> &Key {
        &self.0
    }

    /// Returns the owning application.
    #[must_use]
    pub fn app(&self) -> &str {
        &self.0.app
    }
}

impl fmt::Display for EntityGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eg:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_group_is_root_element() {
        let key = Key::with_id("app", "Parent", 7).child("Child", 3);
        let group = key.entity_group().unwrap();
        assert_eq!(group.as_key(), &Key::with_id("app", "Parent", 7));
    }

    #[test]
    fn incomplete_root_has_no_group() {
        let key = Key::incomplete("app", "Thing");
        assert!(key.entity_group().is_err());
        assert!(Key::new("app", vec![]).entity_group().is_err());
    }

    #[test]
    fn incomplete_child_keeps_group() {
        let key = Key::with_name("app", "Root", "r").incomplete_child("Leaf");
        assert!(!key.is_complete());
        assert_eq!(
            key.entity_group().unwrap().as_key(),
            &Key::with_name("app", "Root", "r")
        );
    }

    #[test]
    fn parent_sorts_before_children() {
        let parent = Key::with_id("app", "A", 1);
        let child = parent.child("B", 1);
        let sibling = Key::with_id("app", "A", 2);
        assert!(parent < child);
        assert!(child < sibling);
    }

    #[test]
    fn ids_sort_before_names() {
        let by_id = Key::with_id("app", "A", i64::MAX);
        let by_name = Key::with_name("app", "A", "");
        assert!(by_id < by_name);
    }

    #[test]
    fn ancestor_check() {
        let root = Key::with_id("app", "A", 1);
        let child = root.child("B", 2);
        assert!(child.has_ancestor(&root));
        assert!(root.has_ancestor(&root));
        assert!(!root.has_ancestor(&child));
        assert!(!child.has_ancestor(&root.clone().in_namespace("other")));
    }

    #[test]
    fn display() {
        let key = Key::with_id("app", "A", 1).child_named("B", "x");
        assert_eq!(format!("{key}"), "app/A:1/B:'x'");
    }
}
