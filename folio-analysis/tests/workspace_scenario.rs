//! End-to-end workspace indexing over a real on-disk tree.

use std::fs;
use std::path::Path;

use folio_analysis::{
    offline_passes, InstanceRole, QueryEngine, SymbolOccurrence, WorkspaceIndex,
};
use folio_parser::{ContentChange, Position, TextDocument};
use folio_store::{
    Document, DocumentState, Store, Task, TaskOperation, TaskTarget, Workspace, WorkspaceId,
    WorkspaceKind,
};
use lsp_types::Url;
use tempfile::TempDir;

fn file_uri(path: &Path) -> String {
    Url::from_file_path(path).expect("absolute path").to_string()
}

/// Creates the workspace entity and its open root document, the way the
/// server does on didOpen.
fn open_root(store: &mut Store, root_path: &Path) -> (WorkspaceId, folio_store::DocumentId) {
    let uri = file_uri(root_path);
    let text = fs::read_to_string(root_path).expect("root file exists");
    let ws = store
        .workspaces
        .insert(|id| Workspace {
            id,
            uri: uri.clone(),
            kind: WorkspaceKind::from_uri(&uri),
        })
        .expect("fresh workspace uri");
    let doc = store
        .documents
        .insert(|id| Document {
            id,
            uri: uri.clone(),
            workspace: ws,
            state: DocumentState::Editing,
            buffer: TextDocument::new(text.as_str(), 1),
            diagnostics: Vec::new(),
        })
        .expect("fresh document uri");
    store
        .tasks
        .insert(|id| Task {
            id,
            operation: TaskOperation::AuditDocument,
            target: TaskTarget::Document(doc),
            dependencies: Vec::new(),
            last_completed: None,
        })
        .expect("fresh task signature");
    (ws, doc)
}

#[test]
fn outline_numbers_root_and_included_sections() {
    let dir = TempDir::new().unwrap();
    let root_path = dir.path().join("root.fol");
    fs::create_dir(dir.path().join("chapters")).unwrap();
    fs::write(&root_path, "= Top @s1\n\n:include: chapters/ch1.fol\n").unwrap();
    fs::write(
        dir.path().join("chapters/ch1.fol"),
        "= Chapter One @c1\n== Detail\n",
    )
    .unwrap();

    let mut store = Store::new();
    let mut queries = QueryEngine::new();
    let mut index = WorkspaceIndex::new();
    let (ws, _root) = open_root(&mut store, &root_path);

    let outline = index.outline(&mut store, &mut queries, ws).unwrap();
    assert_eq!(outline.len(), 1);
    assert_eq!(outline[0].number, "1");
    assert_eq!(outline[0].citekey.as_deref(), Some("s1"));
    assert_eq!(outline[0].children.len(), 1);
    assert_eq!(outline[0].children[0].number, "1.1");
    assert_eq!(outline[0].children[0].title, "Chapter One");
    assert_eq!(outline[0].children[0].children[0].number, "1.1.1");

    // Include resolution registered the chapter and gave every document an
    // audit task.
    assert_eq!(store.documents.len(), 2);
    assert_eq!(store.tasks.len(), 2);
    let chapter_uri = file_uri(&dir.path().join("chapters/ch1.fol"));
    let chapter = store.document_by_uri(&chapter_uri).unwrap();
    assert_eq!(chapter.state, DocumentState::Indexing);
}

#[test]
fn glob_includes_expand_in_sorted_order() {
    let dir = TempDir::new().unwrap();
    let root_path = dir.path().join("root.fol");
    fs::create_dir(dir.path().join("parts")).unwrap();
    fs::write(&root_path, "= All\n:include: parts/*.fol\n").unwrap();
    fs::write(dir.path().join("parts/b.fol"), "= Second\n").unwrap();
    fs::write(dir.path().join("parts/a.fol"), "= First\n").unwrap();

    let mut store = Store::new();
    let mut queries = QueryEngine::new();
    let mut index = WorkspaceIndex::new();
    let (ws, _root) = open_root(&mut store, &root_path);

    let outline = index.outline(&mut store, &mut queries, ws).unwrap();
    let titles: Vec<&str> = outline[0]
        .children
        .iter()
        .map(|node| node.title.as_str())
        .collect();
    assert_eq!(titles, vec!["First", "Second"]);
}

#[test]
fn views_reflect_updates_after_invalidation() {
    let dir = TempDir::new().unwrap();
    let root_path = dir.path().join("root.fol");
    fs::write(&root_path, "[alpha]: https://x.com\n").unwrap();

    let mut store = Store::new();
    let mut queries = QueryEngine::new();
    let mut index = WorkspaceIndex::new();
    let (ws, doc) = open_root(&mut store, &root_path);

    let before = index
        .references_by_citekey(&store, &mut queries, ws)
        .unwrap();
    assert!(before.contains_key("alpha"));

    // The document-sync path: buffer update, then per-document and
    // workspace invalidation.
    store
        .documents
        .update(doc, |document| {
            document
                .buffer
                .update(
                    2,
                    &[ContentChange::replace(
                        Position::new(0, 1),
                        Position::new(0, 6),
                        "omega",
                    )],
                )
                .unwrap();
        })
        .unwrap();
    queries.invalidate(doc);
    index.invalidate(ws);

    let after = index
        .references_by_citekey(&store, &mut queries, ws)
        .unwrap();
    assert!(!after.contains_key("alpha"));
    assert!(after.contains_key("omega"));
}

#[test]
fn media_instances_unify_slash_prefixed_keys() {
    let dir = TempDir::new().unwrap();
    let root_path = dir.path().join("root.fol");
    fs::write(
        &root_path,
        "[shot]: /img/a.png\n\nsee ![screen](img/a.png)\n",
    )
    .unwrap();

    let mut store = Store::new();
    let mut queries = QueryEngine::new();
    let mut index = WorkspaceIndex::new();
    let (ws, _doc) = open_root(&mut store, &root_path);

    let instances = index
        .instances(
            &store,
            &mut queries,
            ws,
            &SymbolOccurrence::Media("img/a.png".into()),
        )
        .unwrap();
    assert_eq!(instances.len(), 2);
    assert!(instances
        .iter()
        .any(|instance| instance.role == InstanceRole::Definition));
    assert!(instances
        .iter()
        .any(|instance| instance.role == InstanceRole::Mention));
}

#[test]
fn unresolved_citekey_and_empty_include_are_flagged() {
    let dir = TempDir::new().unwrap();
    let root_path = dir.path().join("root.fol");
    fs::write(
        &root_path,
        "= Top @s1\ncites [@s1, ghost]\n:include: missing/*.fol\n",
    )
    .unwrap();

    let mut store = Store::new();
    let mut queries = QueryEngine::new();
    let mut index = WorkspaceIndex::new();
    let (_ws, doc) = open_root(&mut store, &root_path);

    let report = offline_passes(&mut store, &mut queries, &mut index, doc).unwrap();
    let messages: Vec<&str> = report
        .diagnostics
        .iter()
        .map(|d| d.message.as_str())
        .collect();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("ghost"));
    assert!(messages[1].contains("missing/*.fol"));
    assert!(report.pending.is_empty());
}
