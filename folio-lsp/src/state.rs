//! The shared core state threaded through server and scheduler.
//!
//! One context object owns the store and both cache layers; it is
//! constructed once at startup and handed to every component, so there are
//! no global singletons. The whole core sits behind a single async mutex
//! that is never held across a suspension point.

use std::sync::Arc;

use folio_analysis::{QueryEngine, WorkspaceIndex};
use folio_parser::TextDocument;
use folio_store::{
    Document, DocumentId, DocumentState, Store, StoreError, Task, TaskId, TaskOperation,
    TaskTarget, Workspace, WorkspaceId, WorkspaceKind,
};
use tokio::sync::Mutex;

pub type SharedCore = Arc<Mutex<Core>>;

/// Store plus derived-view caches. All mutation goes through here.
pub struct Core {
    pub store: Store,
    pub queries: QueryEngine,
    pub index: WorkspaceIndex,
}

/// Entities removed by a workspace teardown; the server cancels the listed
/// tasks with the scheduler.
#[derive(Debug, Default)]
pub struct Teardown {
    pub workspace: Option<WorkspaceId>,
    pub documents: Vec<DocumentId>,
    pub tasks: Vec<TaskId>,
}

impl Core {
    pub fn new() -> Self {
        Self {
            store: Store::new(),
            queries: QueryEngine::new(),
            index: WorkspaceIndex::new(),
        }
    }

    /// Cache invalidation after a document mutated: that document's fact
    /// lists, and every view of its workspace.
    pub fn touch_document(&mut self, doc: DocumentId) {
        self.queries.invalidate(doc);
        if let Some(document) = self.store.documents.get(doc) {
            self.index.invalidate(document.workspace);
        }
    }

    /// The workspace a document at `uri` belongs to: the multi-file
    /// workspace whose root directory most closely contains it, or a fresh
    /// workspace rooted at the document itself.
    pub fn ensure_workspace(&mut self, uri: &str) -> Result<WorkspaceId, StoreError> {
        let mut best: Option<(usize, WorkspaceId)> = None;
        for ws in self.store.workspaces.iter() {
            if ws.kind != WorkspaceKind::MultiFile {
                continue;
            }
            let root = parent_of(&ws.uri);
            if uri.starts_with(&root) && best.map(|(len, _)| root.len() > len).unwrap_or(true) {
                best = Some((root.len(), ws.id));
            }
        }
        if let Some((_, id)) = best {
            return Ok(id);
        }
        self.store.workspaces.insert(|id| Workspace {
            id,
            uri: uri.to_string(),
            kind: WorkspaceKind::from_uri(uri),
        })
    }

    /// didOpen: registers (or re-activates) the document and returns it with
    /// its audit task.
    pub fn open_document(
        &mut self,
        uri: &str,
        text: &str,
        version: i32,
    ) -> Result<(DocumentId, TaskId), StoreError> {
        if let Some(existing) = self.store.document_by_uri(uri) {
            let id = existing.id;
            self.store.documents.update(id, |doc| {
                doc.state = DocumentState::Editing;
                doc.buffer = TextDocument::new(text, version);
            })?;
            self.touch_document(id);
            let task = self.ensure_audit_task(id)?;
            return Ok((id, task));
        }

        let workspace = self.ensure_workspace(uri)?;
        let id = self.store.documents.insert(|id| Document {
            id,
            uri: uri.to_string(),
            workspace,
            state: DocumentState::Editing,
            buffer: TextDocument::new(text, version),
            diagnostics: Vec::new(),
        })?;
        self.index.invalidate(workspace);
        let task = self.ensure_audit_task(id)?;
        Ok((id, task))
    }

    /// The document's audit task, created on first need. Tasks are created
    /// alongside their owning document and carry no default dependencies.
    pub fn ensure_audit_task(&mut self, doc: DocumentId) -> Result<TaskId, StoreError> {
        if let Some(task) = self
            .store
            .task_for(TaskOperation::AuditDocument, TaskTarget::Document(doc))
        {
            return Ok(task.id);
        }
        self.store.tasks.insert(|id| Task {
            id,
            operation: TaskOperation::AuditDocument,
            target: TaskTarget::Document(doc),
            dependencies: Vec::new(),
            last_completed: None,
        })
    }

    /// didClose: single-file workspaces tear down with their document;
    /// in a multi-file workspace the document drops back to `Indexing`, and
    /// the workspace tears down once no member is open any more.
    pub fn close_document(&mut self, uri: &str) -> Result<Teardown, StoreError> {
        let (doc, workspace) = {
            let document = self.store.expect_document_by_uri(uri)?;
            (document.id, document.workspace)
        };
        let kind = self.store.workspaces.expect(workspace)?.kind;

        if kind == WorkspaceKind::SingleFile {
            return self.teardown_workspace(workspace);
        }

        self.store
            .documents
            .update(doc, |document| document.state = DocumentState::Indexing)?;
        let any_open = self
            .store
            .documents_in(workspace)
            .iter()
            .any(|document| document.state == DocumentState::Editing);
        if any_open {
            self.index.invalidate(workspace);
            Ok(Teardown::default())
        } else {
            self.teardown_workspace(workspace)
        }
    }

    /// Removes a workspace and every owned document, task and job.
    pub fn teardown_workspace(&mut self, workspace: WorkspaceId) -> Result<Teardown, StoreError> {
        let documents: Vec<DocumentId> = self
            .store
            .documents_in(workspace)
            .iter()
            .map(|document| document.id)
            .collect();

        let mut tasks = Vec::new();
        for doc in &documents {
            let owned = self
                .store
                .tasks
                .all_by("document", &folio_store::EntityId::raw(*doc).to_string());
            tasks.extend(owned.iter().map(|task| task.id));
        }
        let ws_task = self
            .store
            .task_for(TaskOperation::IndexWorkspace, TaskTarget::Workspace(workspace))
            .map(|task| task.id);
        tasks.extend(ws_task);

        for task in &tasks {
            if let Some(job) = self.store.job_for_task(*task) {
                let job_id = job.id;
                // Dropping the job abandons its handle; waiters observe
                // cancellation, never settlement.
                self.store.jobs.remove(job_id);
            }
            self.store.tasks.remove(*task);
        }
        for doc in &documents {
            self.store.documents.remove(*doc);
            self.queries.invalidate(*doc);
        }
        self.store.workspaces.remove(workspace);
        self.index.invalidate(workspace);

        Ok(Teardown {
            workspace: Some(workspace),
            documents,
            tasks,
        })
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything up to and including the last `/` of a uri.
fn parent_of(uri: &str) -> String {
    match uri.rfind('/') {
        Some(idx) => uri[..=idx].to_string(),
        None => uri.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_file_close_tears_down_workspace() {
        let mut core = Core::new();
        let (doc, _task) = core
            .open_document("file:///tmp/note.txt", "plain note", 1)
            .unwrap();
        assert!(core.store.documents.get(doc).is_some());

        let teardown = core.close_document("file:///tmp/note.txt").unwrap();
        assert_eq!(teardown.documents, vec![doc]);
        assert!(core.store.documents.get(doc).is_none());
        assert!(core.store.workspaces.is_empty());
        assert!(core.store.tasks.is_empty());
    }

    #[test]
    fn sibling_fol_documents_share_a_workspace() {
        let mut core = Core::new();
        let (a, _) = core
            .open_document("file:///book/root.fol", "= Root\n", 1)
            .unwrap();
        let (b, _) = core
            .open_document("file:///book/chapters/one.fol", "= One\n", 1)
            .unwrap();
        let ws_a = core.store.documents.get(a).unwrap().workspace;
        let ws_b = core.store.documents.get(b).unwrap().workspace;
        assert_eq!(ws_a, ws_b);
        assert_eq!(core.store.workspaces.len(), 1);
    }

    #[test]
    fn multi_file_workspace_survives_until_last_close() {
        let mut core = Core::new();
        core.open_document("file:///book/root.fol", "= Root\n", 1)
            .unwrap();
        core.open_document("file:///book/two.fol", "= Two\n", 1)
            .unwrap();

        let first = core.close_document("file:///book/two.fol").unwrap();
        assert!(first.workspace.is_none());
        // The closed member is still indexed, no longer open.
        let still_there = core.store.document_by_uri("file:///book/two.fol").unwrap();
        assert_eq!(still_there.state, DocumentState::Indexing);

        let second = core.close_document("file:///book/root.fol").unwrap();
        assert!(second.workspace.is_some());
        assert!(core.store.documents.is_empty());
        assert!(core.store.tasks.is_empty());
    }

    #[test]
    fn reopening_an_indexed_document_replaces_its_buffer() {
        let mut core = Core::new();
        let (doc, task) = core
            .open_document("file:///book/root.fol", "= Old\n", 1)
            .unwrap();
        let (again, task_again) = core
            .open_document("file:///book/root.fol", "= New\n", 2)
            .unwrap();
        assert_eq!(doc, again);
        assert_eq!(task, task_again);
        let document = core.store.documents.get(doc).unwrap();
        assert_eq!(document.buffer.text(), "= New\n");
        assert_eq!(document.version(), 2);
    }
}
