//! Indexed in-memory collections.
//!
//! Every collection enforces its declared unique keys on insert, maintains
//! secondary indexes for keyed lookup, and supports linear predicate scans.
//! The store is the sole source of truth for entity existence; derived
//! caches elsewhere hold read-only views only.

use std::collections::HashMap;
use std::fmt;

use crate::entity::{
    Document, DocumentId, EntityId, Job, JobId, Task, TaskId, TaskOperation, TaskTarget,
    Workspace, WorkspaceId,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// An insert or update collided with an existing unique key.
    DuplicateKey {
        collection: &'static str,
        index: &'static str,
        key: String,
    },
    /// A required lookup failed: the index and the rest of the system have
    /// drifted apart. Surfaced, never masked.
    ConsistencyViolation {
        collection: &'static str,
        key: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DuplicateKey {
                collection,
                index,
                key,
            } => write!(f, "duplicate key {key:?} for index {index} of {collection}"),
            StoreError::ConsistencyViolation { collection, key } => {
                write!(f, "missing required {collection} entry {key:?}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// An entity that can live in a [`Collection`].
pub trait Entity: Clone {
    type Id: EntityId;

    fn id(&self) -> Self::Id;
}

/// A declared index over a collection.
///
/// The extractor returns the entity's key for this index, or `None` when the
/// entity does not participate in it.
pub struct IndexSpec<T> {
    name: &'static str,
    unique: bool,
    key: fn(&T) -> Option<String>,
}

impl<T> IndexSpec<T> {
    pub fn unique(name: &'static str, key: fn(&T) -> Option<String>) -> Self {
        Self {
            name,
            unique: true,
            key,
        }
    }

    pub fn multi(name: &'static str, key: fn(&T) -> Option<String>) -> Self {
        Self {
            name,
            unique: false,
            key,
        }
    }
}

pub struct Collection<T: Entity> {
    name: &'static str,
    items: HashMap<u64, T>,
    specs: Vec<IndexSpec<T>>,
    indexes: Vec<HashMap<String, Vec<u64>>>,
    next_id: u64,
}

impl<T: Entity> Collection<T> {
    pub fn new(name: &'static str, specs: Vec<IndexSpec<T>>) -> Self {
        let indexes = specs.iter().map(|_| HashMap::new()).collect();
        Self {
            name,
            items: HashMap::new(),
            specs,
            indexes,
            next_id: 1,
        }
    }

    /// Inserts the entity produced by `build` under a freshly allocated id.
    pub fn insert(&mut self, build: impl FnOnce(T::Id) -> T) -> Result<T::Id, StoreError> {
        let id = T::Id::from_raw(self.next_id);
        let item = build(id);
        for (spec, index) in self.specs.iter().zip(&self.indexes) {
            if !spec.unique {
                continue;
            }
            if let Some(key) = (spec.key)(&item) {
                if index.contains_key(&key) {
                    return Err(StoreError::DuplicateKey {
                        collection: self.name,
                        index: spec.name,
                        key,
                    });
                }
            }
        }
        self.next_id += 1;
        self.index_item(&item);
        self.items.insert(id.raw(), item);
        Ok(id)
    }

    pub fn get(&self, id: T::Id) -> Option<&T> {
        self.items.get(&id.raw())
    }

    /// Lookup that must succeed; a miss is an index/entity desync.
    pub fn expect(&self, id: T::Id) -> Result<&T, StoreError> {
        self.get(id).ok_or_else(|| StoreError::ConsistencyViolation {
            collection: self.name,
            key: format!("{:?}", id),
        })
    }

    /// Mutates the entity in place, keeping every index current. A mutation
    /// that would collide on a unique key is rolled back.
    pub fn update<R>(
        &mut self,
        id: T::Id,
        mutate: impl FnOnce(&mut T) -> R,
    ) -> Result<R, StoreError> {
        let item = self
            .items
            .get_mut(&id.raw())
            .ok_or(StoreError::ConsistencyViolation {
                collection: self.name,
                key: format!("{:?}", id),
            })?;
        let snapshot = item.clone();
        let result = mutate(item);
        let updated = item.clone();

        for (spec, index) in self.specs.iter().zip(&self.indexes) {
            if !spec.unique {
                continue;
            }
            if let Some(key) = (spec.key)(&updated) {
                let taken = index
                    .get(&key)
                    .map(|ids| ids.iter().any(|other| *other != id.raw()))
                    .unwrap_or(false);
                if taken {
                    self.items.insert(id.raw(), snapshot);
                    return Err(StoreError::DuplicateKey {
                        collection: self.name,
                        index: spec.name,
                        key,
                    });
                }
            }
        }

        self.unindex_item(&snapshot);
        self.index_item(&updated);
        Ok(result)
    }

    pub fn remove(&mut self, id: T::Id) -> Option<T> {
        let item = self.items.remove(&id.raw())?;
        self.unindex_item(&item);
        Some(item)
    }

    /// Single entity under a unique (or first-match secondary) key.
    pub fn one_by(&self, index: &'static str, key: &str) -> Option<&T> {
        self.ids_by(index, key)
            .first()
            .and_then(|raw| self.items.get(raw))
    }

    /// Every entity under a secondary key, in insertion order.
    pub fn all_by(&self, index: &'static str, key: &str) -> Vec<&T> {
        self.ids_by(index, key)
            .iter()
            .filter_map(|raw| self.items.get(raw))
            .collect()
    }

    /// Linear predicate scan.
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Vec<&T> {
        let mut hits: Vec<&T> = self.items.values().filter(|item| pred(item)).collect();
        hits.sort_by_key(|item| item.id().raw());
        hits
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn ids_by(&self, index: &'static str, key: &str) -> Vec<u64> {
        let Some(slot) = self.specs.iter().position(|spec| spec.name == index) else {
            debug_assert!(false, "unknown index {index} on {}", self.name);
            return Vec::new();
        };
        self.indexes[slot].get(key).cloned().unwrap_or_default()
    }

    fn index_item(&mut self, item: &T) {
        let raw = item.id().raw();
        for (spec, index) in self.specs.iter().zip(&mut self.indexes) {
            if let Some(key) = (spec.key)(item) {
                index.entry(key).or_default().push(raw);
            }
        }
    }

    fn unindex_item(&mut self, item: &T) {
        let raw = item.id().raw();
        for (spec, index) in self.specs.iter().zip(&mut self.indexes) {
            if let Some(key) = (spec.key)(item) {
                if let Some(ids) = index.get_mut(&key) {
                    ids.retain(|other| *other != raw);
                    if ids.is_empty() {
                        index.remove(&key);
                    }
                }
            }
        }
    }
}

impl Entity for Workspace {
    type Id = WorkspaceId;

    fn id(&self) -> WorkspaceId {
        self.id
    }
}

impl Entity for Document {
    type Id = DocumentId;

    fn id(&self) -> DocumentId {
        self.id
    }
}

impl Entity for Task {
    type Id = TaskId;

    fn id(&self) -> TaskId {
        self.id
    }
}

impl Entity for Job {
    type Id = JobId;

    fn id(&self) -> JobId {
        self.id
    }
}

/// The four entity collections with their declared indexes.
pub struct Store {
    pub workspaces: Collection<Workspace>,
    pub documents: Collection<Document>,
    pub tasks: Collection<Task>,
    pub jobs: Collection<Job>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            workspaces: Collection::new(
                "workspaces",
                vec![IndexSpec::unique("uri", |ws: &Workspace| Some(ws.uri.clone()))],
            ),
            documents: Collection::new(
                "documents",
                vec![
                    IndexSpec::unique("uri", |doc: &Document| Some(doc.uri.clone())),
                    IndexSpec::multi("workspace", |doc: &Document| {
                        Some(doc.workspace.raw().to_string())
                    }),
                ],
            ),
            tasks: Collection::new(
                "tasks",
                vec![
                    IndexSpec::unique("signature", |task: &Task| {
                        Some(Task::signature(task.operation, task.target))
                    }),
                    IndexSpec::multi("document", |task: &Task| match task.target {
                        TaskTarget::Document(id) => Some(id.raw().to_string()),
                        TaskTarget::Workspace(_) => None,
                    }),
                ],
            ),
            jobs: Collection::new(
                "jobs",
                vec![IndexSpec::unique("task", |job: &Job| {
                    Some(job.task.raw().to_string())
                })],
            ),
        }
    }

    pub fn document_by_uri(&self, uri: &str) -> Option<&Document> {
        self.documents.one_by("uri", uri)
    }

    pub fn expect_document_by_uri(&self, uri: &str) -> Result<&Document, StoreError> {
        self.document_by_uri(uri)
            .ok_or_else(|| StoreError::ConsistencyViolation {
                collection: "documents",
                key: uri.to_string(),
            })
    }

    pub fn workspace_by_uri(&self, uri: &str) -> Option<&Workspace> {
        self.workspaces.one_by("uri", uri)
    }

    pub fn documents_in(&self, workspace: WorkspaceId) -> Vec<&Document> {
        self.documents
            .all_by("workspace", &workspace.raw().to_string())
    }

    pub fn task_for(&self, operation: TaskOperation, target: TaskTarget) -> Option<&Task> {
        self.tasks
            .one_by("signature", &Task::signature(operation, target))
    }

    pub fn job_for_task(&self, task: TaskId) -> Option<&Job> {
        self.jobs.one_by("task", &task.raw().to_string())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
