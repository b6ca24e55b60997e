//! Main language server implementation.
//!
//! The server is a thin shell: document-sync notifications keep the store
//! and caches current and drive the scheduler; requests delegate to the
//! feature modules over the core query layers. It is generic over the
//! client seam so tests can observe published diagnostics without a real
//! editor on the other end.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use folio_analysis::{KeyValidator, OfflineValidator};
use folio_config::FolioConfig;
use folio_parser::{ContentChange, Position as DocPosition, TextDocument};
use folio_store::{Document, DocumentId, DocumentState, StoreError, TaskId, Workspace, WorkspaceKind};
use ignore::WalkBuilder;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tower_lsp::jsonrpc;
use tower_lsp::lsp_types::{
    Diagnostic, DidChangeTextDocumentParams, DidChangeWorkspaceFoldersParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, DocumentSymbolParams,
    DocumentSymbolResponse, InitializeParams, InitializeResult, InitializedParams, OneOf,
    RenameParams, ServerCapabilities, ServerInfo, TextDocumentContentChangeEvent,
    TextDocumentItem, TextDocumentSyncCapability, TextDocumentSyncKind, Url,
    WorkspaceEdit, WorkspaceFolder, WorkspaceFoldersServerCapabilities,
    WorkspaceServerCapabilities,
};
use tower_lsp::{async_trait, Client};

use crate::features::{audit, file_tree, outline, references, rename, Scope};
use crate::scheduler::Scheduler;
use crate::state::{Core, SharedCore};

/// Client seam: the one capability the core needs from the editor side.
#[async_trait]
pub trait LspClient: Send + Sync + 'static {
    async fn publish_diagnostics(
        &self,
        uri: Url,
        diagnostics: Vec<Diagnostic>,
        version: Option<i32>,
    );
}

#[async_trait]
impl LspClient for Client {
    async fn publish_diagnostics(
        &self,
        uri: Url,
        diagnostics: Vec<Diagnostic>,
        version: Option<i32>,
    ) {
        Client::publish_diagnostics(self, uri, diagnostics, version).await;
    }
}

pub struct FolioLanguageServer<C = Client> {
    client: Arc<C>,
    core: SharedCore,
    scheduler: Scheduler,
    config: FolioConfig,
    /// Per-document debounce generation; a sleeper only fires if its
    /// generation is still current when it wakes.
    debounce: Arc<SyncMutex<HashMap<DocumentId, u64>>>,
}

impl FolioLanguageServer<Client> {
    pub fn new(client: Client) -> Self {
        Self::with_parts(
            client,
            FolioConfig::default_config().unwrap_or_default(),
            Arc::new(OfflineValidator),
        )
    }
}

impl<C: LspClient> FolioLanguageServer<C> {
    pub fn with_parts(client: C, config: FolioConfig, validator: Arc<dyn KeyValidator>) -> Self {
        let client = Arc::new(client);
        let core: SharedCore = Arc::new(Mutex::new(Core::new()));
        let scheduler = Scheduler::spawn(
            core.clone(),
            validator,
            client.clone() as Arc<dyn LspClient>,
            config.analysis.validate_record_keys,
        );
        Self {
            client,
            core,
            scheduler,
            config,
            debounce: Arc::new(SyncMutex::new(HashMap::new())),
        }
    }

    pub fn core(&self) -> SharedCore {
        self.core.clone()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    fn schedule_debounced_audit(&self, doc: DocumentId) {
        let generation = {
            let mut map = self.debounce.lock();
            let counter = map.entry(doc).or_insert(0);
            *counter += 1;
            *counter
        };
        let debounce = self.debounce.clone();
        let core = self.core.clone();
        let scheduler = self.scheduler.clone();
        let delay = Duration::from_millis(self.config.analysis.debounce_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if debounce.lock().get(&doc) != Some(&generation) {
                // A newer edit restarted the quiet period.
                return;
            }
            let task = {
                let mut core = core.lock().await;
                if core.store.documents.get(doc).is_none() {
                    return;
                }
                core.ensure_audit_task(doc).ok()
            };
            if let Some(task) = task {
                if let Err(error) = scheduler.submit(task).await {
                    tracing::error!(%error, "debounced audit submission failed");
                }
            }
        });
    }

    /// `folio/audit`: run (or join) the document's audit and answer with its
    /// diagnostics. A cancelled job settles nothing; the current
    /// diagnostics are returned as-is.
    pub async fn audit_request(
        &self,
        params: audit::AuditParams,
    ) -> jsonrpc::Result<audit::AuditResponse> {
        let task = {
            let mut core = self.core.lock().await;
            let doc = core
                .store
                .expect_document_by_uri(params.uri.as_str())
                .map_err(internal_error)?
                .id;
            core.ensure_audit_task(doc).map_err(internal_error)?
        };
        let handle = self.scheduler.submit(task).await.map_err(internal_error)?;
        let _ = handle.settled().await;

        let core = self.core.lock().await;
        let diagnostics = core
            .store
            .expect_document_by_uri(params.uri.as_str())
            .map_err(internal_error)?
            .diagnostics
            .clone();
        Ok(audit::AuditResponse { diagnostics })
    }

    /// `folio/outline`.
    pub async fn outline_request(
        &self,
        params: outline::OutlineParams,
    ) -> jsonrpc::Result<outline::OutlineResponse> {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        let (doc, workspace) = {
            let document = core
                .store
                .expect_document_by_uri(params.uri.as_str())
                .map_err(internal_error)?;
            (document.id, document.workspace)
        };
        let sections = match params.scope {
            Scope::Document => core
                .index
                .document_outline(&core.store, &mut core.queries, doc)
                .map_err(internal_error)?,
            Scope::Workspace => core
                .index
                .outline(&mut core.store, &mut core.queries, workspace)
                .map_err(internal_error)?
                .as_ref()
                .clone(),
        };
        Ok(outline::OutlineResponse {
            sections: outline::to_dtos(&sections),
        })
    }

    /// `folio/fileTree`.
    pub async fn file_tree_request(
        &self,
        params: file_tree::FileTreeParams,
    ) -> jsonrpc::Result<file_tree::FileTreeResponse> {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        let (doc, workspace) = {
            let document = core
                .store
                .expect_document_by_uri(params.uri.as_str())
                .map_err(internal_error)?;
            (document.id, document.workspace)
        };
        let tree = match params.scope {
            Scope::Document => core
                .index
                .document_file_tree(&mut core.store, &mut core.queries, workspace, doc)
                .map_err(internal_error)?,
            Scope::Workspace => core
                .index
                .file_tree(&mut core.store, &mut core.queries, workspace)
                .map_err(internal_error)?
                .as_ref()
                .clone(),
        };
        Ok(file_tree::FileTreeResponse {
            files: file_tree::to_dto(&tree),
        })
    }

    /// `folio/references`.
    pub async fn references_request(
        &self,
        params: references::ReferencesParams,
    ) -> jsonrpc::Result<references::ReferencesResponse> {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        let (doc, workspace) = {
            let document = core
                .store
                .expect_document_by_uri(params.uri.as_str())
                .map_err(internal_error)?;
            (document.id, document.workspace)
        };
        let members: Vec<DocumentId> = match params.scope {
            Scope::Document => vec![doc],
            Scope::Workspace => core
                .store
                .documents_in(workspace)
                .iter()
                .map(|document| document.id)
                .collect(),
        };
        let mut out = Vec::new();
        for member in members {
            let document = core.store.documents.expect(member).map_err(internal_error)?;
            for reference in core.queries.references(document).iter() {
                out.push(references::ReferenceDto {
                    key: reference.key.clone(),
                    kind: reference.kind.as_str().to_string(),
                });
            }
        }
        Ok(references::ReferencesResponse { references: out })
    }
}

fn internal_error(error: impl Display) -> jsonrpc::Error {
    let mut rpc = jsonrpc::Error::internal_error();
    rpc.message = error.to_string().into();
    rpc
}

/// Notification handlers have no response channel; a failure there means
/// client and server state have drifted apart and the process cannot
/// continue safely.
fn notification_failure(stage: &str, error: impl Display) -> ! {
    tracing::error!(stage, %error, "unrecoverable notification failure");
    std::process::exit(1);
}

fn content_change(event: TextDocumentContentChangeEvent) -> ContentChange {
    ContentChange {
        range: event.range.map(|range| {
            (
                DocPosition::new(range.start.line, range.start.character),
                DocPosition::new(range.end.line, range.end.character),
            )
        }),
        range_length: event.range_length,
        text: event.text,
    }
}

/// Registers a workspace folder: one multi-file workspace, every `.fol`
/// file under it as an `Indexing` member, one audit task per document and
/// no default dependencies.
fn register_folder(
    core: &mut Core,
    folder: &WorkspaceFolder,
    max_depth: usize,
) -> Result<Vec<TaskId>, StoreError> {
    if core.store.workspace_by_uri(folder.uri.as_str()).is_some() {
        return Ok(Vec::new());
    }
    let workspace = core.store.workspaces.insert(|id| Workspace {
        id,
        uri: folder.uri.to_string(),
        kind: WorkspaceKind::MultiFile,
    })?;

    let Ok(root) = folder.uri.to_file_path() else {
        return Ok(Vec::new());
    };
    let mut paths: Vec<PathBuf> = WalkBuilder::new(&root)
        .max_depth(Some(max_depth))
        .build()
        .flatten()
        .filter(|entry| {
            entry
                .file_type()
                .map(|file_type| file_type.is_file())
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().map(|ext| ext == "fol").unwrap_or(false))
        .collect();
    paths.sort();

    let mut tasks = Vec::new();
    for path in paths {
        let Ok(url) = Url::from_file_path(&path) else {
            continue;
        };
        if core.store.document_by_uri(url.as_str()).is_some() {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        let doc = core.store.documents.insert(|id| Document {
            id,
            uri: url.to_string(),
            workspace,
            state: DocumentState::Indexing,
            buffer: TextDocument::new(text.as_str(), 0),
            diagnostics: Vec::new(),
        })?;
        tasks.push(core.ensure_audit_task(doc)?);
    }
    Ok(tasks)
}

#[async_trait]
impl<C: LspClient> tower_lsp::LanguageServer for FolioLanguageServer<C> {
    async fn initialize(&self, _: InitializeParams) -> jsonrpc::Result<InitializeResult> {
        let capabilities = ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Kind(
                TextDocumentSyncKind::INCREMENTAL,
            )),
            document_symbol_provider: Some(OneOf::Left(true)),
            rename_provider: Some(OneOf::Left(true)),
            workspace: Some(WorkspaceServerCapabilities {
                workspace_folders: Some(WorkspaceFoldersServerCapabilities {
                    supported: Some(true),
                    change_notifications: Some(OneOf::Left(true)),
                }),
                file_operations: None,
            }),
            ..ServerCapabilities::default()
        };

        Ok(InitializeResult {
            capabilities,
            server_info: Some(ServerInfo {
                name: "folio-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {}

    async fn shutdown(&self) -> jsonrpc::Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let TextDocumentItem {
            uri, text, version, ..
        } = params.text_document;
        let task = {
            let mut core = self.core.lock().await;
            match core.open_document(uri.as_str(), &text, version) {
                Ok((_doc, task)) => task,
                Err(error) => notification_failure("textDocument/didOpen", error),
            }
        };
        if let Err(error) = self.scheduler.submit(task).await {
            tracing::error!(%error, "audit submission failed");
        }
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;
        let changes: Vec<ContentChange> = params
            .content_changes
            .into_iter()
            .map(content_change)
            .collect();

        let doc = {
            let mut core = self.core.lock().await;
            let doc = match core.store.expect_document_by_uri(uri.as_str()) {
                Ok(document) => document.id,
                Err(error) => notification_failure("textDocument/didChange", error),
            };
            let applied = core
                .store
                .documents
                .update(doc, |document| document.buffer.update(version, &changes));
            match applied {
                Ok(Ok(())) => {}
                Ok(Err(edit_error)) => {
                    notification_failure("textDocument/didChange", edit_error)
                }
                Err(store_error) => notification_failure("textDocument/didChange", store_error),
            }
            core.touch_document(doc);
            doc
        };
        self.schedule_debounced_audit(doc);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        let teardown = {
            let mut core = self.core.lock().await;
            match core.close_document(uri.as_str()) {
                Ok(teardown) => teardown,
                Err(error) => notification_failure("textDocument/didClose", error),
            }
        };
        for task in &teardown.tasks {
            self.scheduler.cancel(*task);
        }
        let mut debounce = self.debounce.lock();
        for doc in &teardown.documents {
            debounce.remove(doc);
        }
    }

    async fn did_change_workspace_folders(&self, params: DidChangeWorkspaceFoldersParams) {
        let mut submits = Vec::new();
        {
            let mut core = self.core.lock().await;
            for folder in &params.event.added {
                match register_folder(&mut core, folder, self.config.workspace.max_scan_depth) {
                    Ok(tasks) => submits.extend(tasks),
                    Err(error) => {
                        notification_failure("workspace/didChangeWorkspaceFolders", error)
                    }
                }
            }
            for folder in &params.event.removed {
                let workspace = core
                    .store
                    .workspace_by_uri(folder.uri.as_str())
                    .map(|ws| ws.id);
                if let Some(workspace) = workspace {
                    match core.teardown_workspace(workspace) {
                        Ok(teardown) => {
                            for task in &teardown.tasks {
                                self.scheduler.cancel(*task);
                            }
                        }
                        Err(error) => {
                            notification_failure("workspace/didChangeWorkspaceFolders", error)
                        }
                    }
                }
            }
        }
        for task in submits {
            if let Err(error) = self.scheduler.submit(task).await {
                tracing::error!(%error, "workspace audit submission failed");
            }
        }
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> jsonrpc::Result<Option<DocumentSymbolResponse>> {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        let Some(doc) = core
            .store
            .document_by_uri(params.text_document.uri.as_str())
            .map(|document| document.id)
        else {
            return Ok(None);
        };
        let sections = core
            .index
            .document_outline(&core.store, &mut core.queries, doc)
            .map_err(internal_error)?;
        Ok(Some(DocumentSymbolResponse::Nested(
            outline::to_document_symbols(&sections),
        )))
    }

    async fn rename(&self, params: RenameParams) -> jsonrpc::Result<Option<WorkspaceEdit>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let mut core = self.core.lock().await;
        rename::apply_rename(&mut core, uri.as_str(), position, &params.new_name)
            .map_err(internal_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_store::{TaskOperation, TaskTarget};
    use std::fs;
    use tempfile::TempDir;
    use tower_lsp::LanguageServer;

    #[derive(Default)]
    struct RecordingClient {
        published: SyncMutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl LspClient for Arc<RecordingClient> {
        async fn publish_diagnostics(
            &self,
            uri: Url,
            diagnostics: Vec<Diagnostic>,
            _version: Option<i32>,
        ) {
            self.published
                .lock()
                .push((uri.to_string(), diagnostics.len()));
        }
    }

    fn server_with_recorder() -> (FolioLanguageServer<Arc<RecordingClient>>, Arc<RecordingClient>)
    {
        let recorder = Arc::new(RecordingClient::default());
        let server = FolioLanguageServer::with_parts(
            recorder.clone(),
            FolioConfig::default_config().unwrap(),
            Arc::new(OfflineValidator),
        );
        (server, recorder)
    }

    fn open_params(uri: &Url, text: &str) -> DidOpenTextDocumentParams {
        DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: uri.clone(),
                language_id: "folio".into(),
                version: 1,
                text: text.into(),
            },
        }
    }

    fn write_file(dir: &TempDir, name: &str, text: &str) -> Url {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();
        Url::from_file_path(&path).unwrap()
    }

    #[tokio::test]
    async fn audit_reports_and_publishes_diagnostics() {
        let dir = TempDir::new().unwrap();
        let uri = write_file(&dir, "root.fol", "= Top @s1\ncites [@ghost]\n");
        let (server, recorder) = server_with_recorder();

        server
            .did_open(open_params(&uri, "= Top @s1\ncites [@ghost]\n"))
            .await;
        let response = server
            .audit_request(audit::AuditParams { uri: uri.clone() })
            .await
            .unwrap();
        assert_eq!(response.diagnostics.len(), 1);
        assert!(response.diagnostics[0].message.contains("ghost"));

        let published = recorder.published.lock();
        assert!(!published.is_empty());
        assert!(published.iter().all(|(u, count)| u == uri.as_str() && *count == 1));
    }

    #[tokio::test]
    async fn duplicate_submission_shares_one_execution() {
        let dir = TempDir::new().unwrap();
        let uri = write_file(&dir, "root.fol", "= Clean\n");
        let (server, recorder) = server_with_recorder();
        server.did_open(open_params(&uri, "= Clean\n")).await;
        // Settle the audit submitted by didOpen before probing dedupe.
        server
            .audit_request(audit::AuditParams { uri: uri.clone() })
            .await
            .unwrap();
        let baseline = recorder.published.lock().len();

        let task = {
            let core = server.core();
            let mut core = core.lock().await;
            let doc = core.store.expect_document_by_uri(uri.as_str()).unwrap().id;
            core.ensure_audit_task(doc).unwrap()
        };
        // Two submissions before the drain loop runs: one job, one
        // execution, handles settle together.
        let first = server.scheduler().submit(task).await.unwrap();
        let second = server.scheduler().submit(task).await.unwrap();
        assert!(first.settled().await.is_ok());
        assert!(second.settled().await.is_ok());
        assert_eq!(recorder.published.lock().len(), baseline + 1);
    }

    #[tokio::test]
    async fn dependency_completes_before_dependent_runs() {
        let dir = TempDir::new().unwrap();
        let uri_a = write_file(&dir, "a.fol", "= A\n");
        let uri_b = write_file(&dir, "b.fol", "= B\n");
        let (server, recorder) = server_with_recorder();
        server.did_open(open_params(&uri_a, "= A\n")).await;
        server.did_open(open_params(&uri_b, "= B\n")).await;
        // Drain the didOpen audits.
        server
            .audit_request(audit::AuditParams { uri: uri_a.clone() })
            .await
            .unwrap();
        server
            .audit_request(audit::AuditParams { uri: uri_b.clone() })
            .await
            .unwrap();
        recorder.published.lock().clear();

        let (task_a, task_b) = {
            let core = server.core();
            let mut core = core.lock().await;
            let doc_a = core.store.expect_document_by_uri(uri_a.as_str()).unwrap().id;
            let doc_b = core.store.expect_document_by_uri(uri_b.as_str()).unwrap().id;
            let task_a = core.ensure_audit_task(doc_a).unwrap();
            let task_b = core.ensure_audit_task(doc_b).unwrap();
            // Make B depend on A and reset completion stamps so both are
            // unscheduled and uncompleted.
            core.store
                .tasks
                .update(task_a, |task| task.last_completed = None)
                .unwrap();
            core.store
                .tasks
                .update(task_b, |task| {
                    task.last_completed = None;
                    task.dependencies = vec![task_a];
                })
                .unwrap();
            (task_a, task_b)
        };

        // Submitting only the dependent schedules the dependency too.
        let handle_b = server.scheduler().submit(task_b).await.unwrap();
        {
            let core = server.core();
            let core = core.lock().await;
            assert!(core.store.job_for_task(task_a).is_some());
        }
        assert!(handle_b.settled().await.is_ok());

        let core = server.core();
        let core = core.lock().await;
        let entity_a = core.store.tasks.get(task_a).unwrap();
        let entity_b = core.store.tasks.get(task_b).unwrap();
        let done_a = entity_a.last_completed.expect("dependency completed");
        let done_b = entity_b.last_completed.expect("dependent completed");
        assert!(done_a <= done_b);
        let published = recorder.published.lock();
        let order: Vec<&str> = published.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(order, vec![uri_a.as_str(), uri_b.as_str()]);
    }

    #[tokio::test]
    async fn cancel_before_pop_abandons_the_job() {
        let dir = TempDir::new().unwrap();
        let uri = write_file(&dir, "root.fol", "= Quiet\n");
        let (server, recorder) = server_with_recorder();
        server.did_open(open_params(&uri, "= Quiet\n")).await;
        server
            .audit_request(audit::AuditParams { uri: uri.clone() })
            .await
            .unwrap();
        recorder.published.lock().clear();

        let task = {
            let core = server.core();
            let mut core = core.lock().await;
            let doc = core.store.expect_document_by_uri(uri.as_str()).unwrap().id;
            core.ensure_audit_task(doc).unwrap()
        };
        let handle = server.scheduler().submit(task).await.unwrap();
        // On the current-thread test runtime nothing else can run between
        // the submit returning and this cancel, so the entry is still
        // queued.
        assert!(server.scheduler().cancel(task));

        // The handle never settles; it reports cancellation once the job is
        // dropped.
        assert!(handle.settled().await.is_err());
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert!(recorder.published.lock().is_empty());
        let core = server.core();
        let core = core.lock().await;
        assert!(core.store.job_for_task(task).is_none());
    }

    #[tokio::test]
    async fn cancel_after_completion_has_no_effect() {
        let dir = TempDir::new().unwrap();
        let uri = write_file(&dir, "root.fol", "= Done\n");
        let (server, _recorder) = server_with_recorder();
        server.did_open(open_params(&uri, "= Done\n")).await;
        server
            .audit_request(audit::AuditParams { uri: uri.clone() })
            .await
            .unwrap();

        let task = {
            let core = server.core();
            let core = core.lock().await;
            let doc = core.store.expect_document_by_uri(uri.as_str()).unwrap().id;
            core.store
                .task_for(TaskOperation::AuditDocument, TaskTarget::Document(doc))
                .unwrap()
                .id
        };
        assert!(!server.scheduler().cancel(task));
        // And the task can be audited again afterwards.
        let again = server
            .audit_request(audit::AuditParams { uri: uri.clone() })
            .await
            .unwrap();
        assert!(again.diagnostics.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn edits_debounce_into_one_audit() {
        let dir = TempDir::new().unwrap();
        let uri = write_file(&dir, "root.fol", "= Top\n");
        let (server, recorder) = server_with_recorder();
        server.did_open(open_params(&uri, "= Top\n")).await;
        server
            .audit_request(audit::AuditParams { uri: uri.clone() })
            .await
            .unwrap();
        recorder.published.lock().clear();

        let change = |version: i32, text: &str| DidChangeTextDocumentParams {
            text_document: tower_lsp::lsp_types::VersionedTextDocumentIdentifier {
                uri: uri.clone(),
                version,
            },
            content_changes: vec![TextDocumentContentChangeEvent {
                range: Some(tower_lsp::lsp_types::Range {
                    start: tower_lsp::lsp_types::Position::new(0, 2),
                    end: tower_lsp::lsp_types::Position::new(0, 5),
                }),
                range_length: None,
                text: text.into(),
            }],
        };

        server.did_change(change(2, "One")).await;
        server.did_change(change(3, "Two")).await;
        // Past the quiet period, exactly one re-audit fires for the two
        // edits.
        tokio::time::sleep(Duration::from_millis(700)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(recorder.published.lock().len(), 1);

        let core = server.core();
        let core = core.lock().await;
        let document = core.store.expect_document_by_uri(uri.as_str()).unwrap();
        assert_eq!(document.buffer.text(), "= Two\n");
        assert_eq!(document.version(), 3);
    }

    #[tokio::test]
    async fn workspace_folder_scan_creates_members_and_tasks() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "one.fol", "= One\n");
        write_file(&dir, "two.fol", "= Two\n");
        fs::write(dir.path().join("ignore.txt"), "not folio").unwrap();
        let folder_uri = Url::from_file_path(dir.path()).unwrap();
        let (server, _recorder) = server_with_recorder();

        server
            .did_change_workspace_folders(DidChangeWorkspaceFoldersParams {
                event: tower_lsp::lsp_types::WorkspaceFoldersChangeEvent {
                    added: vec![WorkspaceFolder {
                        uri: folder_uri.clone(),
                        name: "book".into(),
                    }],
                    removed: vec![],
                },
            })
            .await;

        let core = server.core();
        let core = core.lock().await;
        assert_eq!(core.store.documents.len(), 2);
        assert_eq!(core.store.tasks.len(), 2);
        for task in core.store.tasks.iter() {
            assert!(task.dependencies.is_empty());
            assert_eq!(task.operation, TaskOperation::AuditDocument);
        }
    }
}
