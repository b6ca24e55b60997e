//! In-memory indexed entity store for the folio language server.
//!
//! Four collections (workspaces, documents, tasks, jobs) with declared
//! unique and secondary indexes. Every component reads and writes entity
//! state through the store; cross-entity associations are id lookups, never
//! stored pointers.

pub mod entity;
pub mod store;

pub use entity::{
    Cancelled, CompletionHandle, Document, DocumentId, DocumentState, EntityId, Job, JobHandle,
    JobId, Task, TaskId, TaskOperation, TaskTarget, Workspace, WorkspaceId, WorkspaceKind,
};
pub use store::{Collection, Entity, IndexSpec, Store, StoreError};
