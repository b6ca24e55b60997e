//! Entities managed by the store.
//!
//! Associations between entities are id-valued and resolved through the
//! store; no entity holds a direct reference to another, so there are no
//! ownership cycles between workspaces, documents, tasks and jobs.

use std::fmt;

use chrono::{DateTime, Utc};
use folio_parser::TextDocument;
use tokio::sync::watch;

/// Raw-id plumbing shared by all entity id newtypes.
pub trait EntityId: Copy + Eq + std::hash::Hash + fmt::Debug {
    fn from_raw(raw: u64) -> Self;
    fn raw(self) -> u64;
}

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl EntityId for $name {
            fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(WorkspaceId);
entity_id!(DocumentId);
entity_id!(TaskId);
entity_id!(JobId);

/// Whether a workspace is rooted in a single document or a multi-file tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceKind {
    SingleFile,
    MultiFile,
}

impl WorkspaceKind {
    /// Derived from the root uri's file extension: `.fol` documents anchor
    /// multi-file workspaces, anything else stays single-file.
    pub fn from_uri(uri: &str) -> Self {
        if uri.ends_with(".fol") {
            WorkspaceKind::MultiFile
        } else {
            WorkspaceKind::SingleFile
        }
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub uri: String,
    pub kind: WorkspaceKind,
}

/// Editing: the document is open in the editor and owns live buffer state;
/// rename edits go back to the client. Indexing: the document was pulled in
/// from disk (include resolution or a workspace scan) and rename edits
/// rewrite the file directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Editing,
    Indexing,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub uri: String,
    pub workspace: WorkspaceId,
    pub state: DocumentState,
    pub buffer: TextDocument,
    pub diagnostics: Vec<lsp_types::Diagnostic>,
}

impl Document {
    pub fn version(&self) -> i32 {
        self.buffer.version()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskOperation {
    AuditDocument,
    IndexWorkspace,
}

impl TaskOperation {
    fn tag(self) -> &'static str {
        match self {
            TaskOperation::AuditDocument => "audit",
            TaskOperation::IndexWorkspace => "index",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskTarget {
    Document(DocumentId),
    Workspace(WorkspaceId),
}

impl TaskTarget {
    fn tag(self) -> String {
        match self {
            TaskTarget::Document(id) => format!("doc/{id}"),
            TaskTarget::Workspace(id) => format!("ws/{id}"),
        }
    }
}

/// A declared unit of re-analysis tied to a document or workspace.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub operation: TaskOperation,
    pub target: TaskTarget,
    pub dependencies: Vec<TaskId>,
    pub last_completed: Option<DateTime<Utc>>,
}

impl Task {
    /// Store-level uniqueness key: one task per (operation, target).
    pub fn signature(operation: TaskOperation, target: TaskTarget) -> String {
        format!("{}/{}", operation.tag(), target.tag())
    }
}

/// A live execution instance of a task.
///
/// All concurrent submitters of the same task share this job's handle; the
/// job is destroyed on completion or cancellation.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub task: TaskId,
    pub handle: JobHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobSignal {
    Pending,
    Completed,
}

/// Broadcast-once completion primitive owned by a job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    tx: watch::Sender<JobSignal>,
}

impl JobHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(JobSignal::Pending);
        Self { tx }
    }

    /// A clonable handle that settles when the job completes.
    pub fn subscribe(&self) -> CompletionHandle {
        CompletionHandle {
            rx: self.tx.subscribe(),
        }
    }

    /// Settles every subscribed handle.
    pub fn complete(&self) {
        let _ = self.tx.send(JobSignal::Completed);
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// The job backing this handle was cancelled before it ran; it will never
/// settle. Not an error condition for callers, only a signal to stop
/// waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job was cancelled before it ran")
    }
}

impl std::error::Error for Cancelled {}

/// Waits for the owning job to finish. Cloned handles settle together.
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    rx: watch::Receiver<JobSignal>,
}

impl CompletionHandle {
    /// Resolves when the job completes, or reports [`Cancelled`] when the
    /// job was dropped without completing.
    pub async fn settled(mut self) -> Result<(), Cancelled> {
        loop {
            if *self.rx.borrow_and_update() == JobSignal::Completed {
                return Ok(());
            }
            if self.rx.changed().await.is_err() {
                return Err(Cancelled);
            }
        }
    }

    /// Non-blocking probe used by tests and teardown paths.
    pub fn is_settled(&self) -> bool {
        *self.rx.borrow() == JobSignal::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_kind_from_extension() {
        assert_eq!(WorkspaceKind::from_uri("file:///a/root.fol"), WorkspaceKind::MultiFile);
        assert_eq!(WorkspaceKind::from_uri("file:///a/note.txt"), WorkspaceKind::SingleFile);
    }

    #[test]
    fn task_signatures_distinguish_operation_and_target() {
        let doc = TaskTarget::Document(DocumentId::from_raw(1));
        let ws = TaskTarget::Workspace(WorkspaceId::from_raw(1));
        assert_ne!(
            Task::signature(TaskOperation::AuditDocument, doc),
            Task::signature(TaskOperation::IndexWorkspace, doc)
        );
        assert_ne!(
            Task::signature(TaskOperation::AuditDocument, doc),
            Task::signature(TaskOperation::AuditDocument, ws)
        );
    }

    #[tokio::test]
    async fn handles_settle_together_on_completion() {
        let handle = JobHandle::new();
        let first = handle.subscribe();
        let second = handle.subscribe();
        handle.complete();
        assert!(first.settled().await.is_ok());
        assert!(second.settled().await.is_ok());
    }

    #[tokio::test]
    async fn dropped_job_reports_cancellation() {
        let handle = JobHandle::new();
        let waiter = handle.subscribe();
        drop(handle);
        assert_eq!(waiter.settled().await, Err(Cancelled));
    }
}
