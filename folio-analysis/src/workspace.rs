//! Workspace-wide lookup tables and derived trees.
//!
//! Views are computed lazily from the concatenated facts of every member
//! document and memoized per workspace. Invalidation is coarse on purpose:
//! any member document change drops all of a workspace's views at once,
//! trading recomputation for correctness.
//!
//! Outline and file-tree construction resolve include directives against the
//! filesystem; documents pulled in this way are registered in the store as
//! `Indexing` members so later queries and renames see them.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use folio_parser::TextDocument;
use folio_store::{
    Document, DocumentId, DocumentState, Store, StoreError, Task, TaskOperation, TaskTarget,
    WorkspaceId,
};
use globset::GlobBuilder;
use ignore::WalkBuilder;
use lsp_types::Url;

use crate::facts::{RefKind, Reference, Section, SourceRef};
use crate::queries::QueryEngine;

/// A numbered section in the workspace or document outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineNode {
    pub uri: String,
    pub number: String,
    pub title: String,
    pub citekey: Option<String>,
    pub level: u8,
    pub site: SourceRef,
    pub children: Vec<OutlineNode>,
}

/// A document in the inclusion tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub uri: String,
    pub children: Vec<FileNode>,
}

/// A typed symbol occurrence, as resolved under a cursor position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolOccurrence {
    /// A media file path; slash-prefixed reference keys and unprefixed image
    /// paths naming the same file are the same symbol.
    Media(String),
    /// The citekey of a reference listing.
    RefCitekey(String),
    /// The citekey anchored to a section header.
    SectionCitekey(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceRole {
    /// The defining/listing site (reference listing, section anchor).
    Definition,
    /// A citation or usage site.
    Mention,
}

/// One structurally equivalent occurrence of a symbol somewhere in the
/// workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInstance {
    pub doc: DocumentId,
    pub uri: String,
    pub site: SourceRef,
    pub role: InstanceRole,
}

/// Memoized views for one workspace; dropped as a unit.
#[derive(Debug, Default)]
struct Views {
    references_by_key: Option<Arc<HashMap<String, Reference>>>,
    references_by_citekey: Option<Arc<HashMap<String, Reference>>>,
    sections_by_citekey: Option<Arc<HashMap<String, Section>>>,
    outline: Option<Arc<Vec<OutlineNode>>>,
    file_tree: Option<Arc<FileNode>>,
}

/// Lazily computed, wholesale-invalidated workspace views.
#[derive(Debug, Default)]
pub struct WorkspaceIndex {
    views: HashMap<WorkspaceId, Views>,
}

impl WorkspaceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every view of the workspace. Called whenever any member
    /// document mutates, joins or leaves.
    pub fn invalidate(&mut self, workspace: WorkspaceId) {
        self.views.remove(&workspace);
    }

    /// The workspace root document: the member whose uri equals the
    /// workspace uri, or the earliest-registered member as a fallback for
    /// folder-rooted workspaces.
    pub fn root_document(&self, store: &Store, workspace: WorkspaceId) -> Option<DocumentId> {
        let ws = store.workspaces.get(workspace)?;
        if let Some(doc) = store.document_by_uri(&ws.uri) {
            return Some(doc.id);
        }
        store
            .documents_in(workspace)
            .first()
            .map(|doc| doc.id)
    }

    pub fn references_by_key(
        &mut self,
        store: &Store,
        queries: &mut QueryEngine,
        workspace: WorkspaceId,
    ) -> Result<Arc<HashMap<String, Reference>>, StoreError> {
        if let Some(view) = self.views.get(&workspace).and_then(|v| v.references_by_key.clone()) {
            return Ok(view);
        }
        let mut map = HashMap::new();
        for doc in store.documents_in(workspace) {
            for reference in queries.references(doc).iter() {
                map.entry(reference.key.clone())
                    .or_insert_with(|| reference.clone());
            }
        }
        let view = Arc::new(map);
        self.views.entry(workspace).or_default().references_by_key = Some(view.clone());
        Ok(view)
    }

    pub fn references_by_citekey(
        &mut self,
        store: &Store,
        queries: &mut QueryEngine,
        workspace: WorkspaceId,
    ) -> Result<Arc<HashMap<String, Reference>>, StoreError> {
        if let Some(view) = self
            .views
            .get(&workspace)
            .and_then(|v| v.references_by_citekey.clone())
        {
            return Ok(view);
        }
        let mut map = HashMap::new();
        for doc in store.documents_in(workspace) {
            for reference in queries.references(doc).iter() {
                map.entry(reference.citekey.clone())
                    .or_insert_with(|| reference.clone());
            }
        }
        let view = Arc::new(map);
        self.views
            .entry(workspace)
            .or_default()
            .references_by_citekey = Some(view.clone());
        Ok(view)
    }

    pub fn sections_by_citekey(
        &mut self,
        store: &Store,
        queries: &mut QueryEngine,
        workspace: WorkspaceId,
    ) -> Result<Arc<HashMap<String, Section>>, StoreError> {
        if let Some(view) = self
            .views
            .get(&workspace)
            .and_then(|v| v.sections_by_citekey.clone())
        {
            return Ok(view);
        }
        let mut map = HashMap::new();
        for doc in store.documents_in(workspace) {
            for section in queries.sections(doc).iter() {
                if let Some(citekey) = &section.citekey {
                    map.entry(citekey.clone()).or_insert_with(|| section.clone());
                }
            }
        }
        let view = Arc::new(map);
        self.views.entry(workspace).or_default().sections_by_citekey = Some(view.clone());
        Ok(view)
    }

    /// The workspace outline: the root document's sections with includes
    /// spliced in and every node numbered in document order ("1.2.3").
    pub fn outline(
        &mut self,
        store: &mut Store,
        queries: &mut QueryEngine,
        workspace: WorkspaceId,
    ) -> Result<Arc<Vec<OutlineNode>>, StoreError> {
        if let Some(view) = self.views.get(&workspace).and_then(|v| v.outline.clone()) {
            return Ok(view);
        }
        let mut forest = match self.root_document(store, workspace) {
            Some(root) => {
                let mut visited = HashSet::new();
                build_outline(store, queries, workspace, root, &mut visited)?
            }
            None => Vec::new(),
        };
        number_outline(&mut forest, "");
        let view = Arc::new(forest);
        self.views.entry(workspace).or_default().outline = Some(view.clone());
        Ok(view)
    }

    /// A single document's outline, numbered from "1"; includes are not
    /// spliced.
    pub fn document_outline(
        &mut self,
        store: &Store,
        queries: &mut QueryEngine,
        doc: DocumentId,
    ) -> Result<Vec<OutlineNode>, StoreError> {
        let document = store.documents.expect(doc)?;
        let sections = queries.sections(document);
        let mut forest = fold_sections(sections.iter().map(section_node));
        number_outline(&mut forest, "");
        Ok(forest)
    }

    /// The inclusion tree from the workspace root, mirroring on-disk file
    /// nesting.
    pub fn file_tree(
        &mut self,
        store: &mut Store,
        queries: &mut QueryEngine,
        workspace: WorkspaceId,
    ) -> Result<Arc<FileNode>, StoreError> {
        if let Some(view) = self.views.get(&workspace).and_then(|v| v.file_tree.clone()) {
            return Ok(view);
        }
        let root = self
            .root_document(store, workspace)
            .ok_or(StoreError::ConsistencyViolation {
                collection: "documents",
                key: "workspace root".into(),
            })?;
        let mut visited = HashSet::new();
        let view = Arc::new(build_file_tree(store, queries, workspace, root, &mut visited)?);
        self.views.entry(workspace).or_default().file_tree = Some(view.clone());
        Ok(view)
    }

    /// The inclusion subtree rooted at one document (uncached).
    pub fn document_file_tree(
        &mut self,
        store: &mut Store,
        queries: &mut QueryEngine,
        workspace: WorkspaceId,
        doc: DocumentId,
    ) -> Result<FileNode, StoreError> {
        let mut visited = HashSet::new();
        build_file_tree(store, queries, workspace, doc, &mut visited)
    }

    /// Resolves the typed symbol under a byte offset of a document.
    pub fn occurrence_at(
        &mut self,
        store: &Store,
        queries: &mut QueryEngine,
        workspace: WorkspaceId,
        doc: DocumentId,
        offset: usize,
    ) -> Result<Option<SymbolOccurrence>, StoreError> {
        let document = store.documents.expect(doc)?;

        for reference in queries.references(document).iter() {
            if reference.citekey_site.contains(offset) {
                return Ok(Some(SymbolOccurrence::RefCitekey(reference.citekey.clone())));
            }
            if reference.key_site.contains(offset) && reference.kind == RefKind::Media {
                return Ok(Some(SymbolOccurrence::Media(reference.key.clone())));
            }
        }
        for section in queries.sections(document).iter() {
            if let (Some(citekey), Some(site)) = (&section.citekey, &section.citekey_site) {
                if site.contains(offset) {
                    return Ok(Some(SymbolOccurrence::SectionCitekey(citekey.clone())));
                }
            }
        }
        for image in queries.images(document).iter() {
            if image.path_site.contains(offset) {
                return Ok(Some(SymbolOccurrence::Media(image.path.clone())));
            }
        }
        for carousel in queries.carousels(document).iter() {
            for image in &carousel.images {
                if image.path_site.contains(offset) {
                    return Ok(Some(SymbolOccurrence::Media(image.path.clone())));
                }
            }
        }

        // A citekey inside a citation resolves through the workspace maps to
        // decide whether it names a reference or a section.
        let capture = queries.citations(document).iter().find_map(|citation| {
            citation
                .citekeys
                .iter()
                .find(|capture| capture.site.contains(offset))
                .map(|capture| capture.text.clone())
        });
        if let Some(citekey) = capture {
            if self
                .references_by_citekey(store, queries, workspace)?
                .contains_key(&citekey)
            {
                return Ok(Some(SymbolOccurrence::RefCitekey(citekey)));
            }
            if self
                .sections_by_citekey(store, queries, workspace)?
                .contains_key(&citekey)
            {
                return Ok(Some(SymbolOccurrence::SectionCitekey(citekey)));
            }
        }
        Ok(None)
    }

    /// Every structurally equivalent occurrence of the symbol across the
    /// workspace: its citation/usage sites plus its defining site.
    pub fn instances(
        &mut self,
        store: &Store,
        queries: &mut QueryEngine,
        workspace: WorkspaceId,
        occurrence: &SymbolOccurrence,
    ) -> Result<Vec<SymbolInstance>, StoreError> {
        let mut out = Vec::new();
        let member_ids: Vec<DocumentId> =
            store.documents_in(workspace).iter().map(|d| d.id).collect();

        for id in member_ids {
            let document = store.documents.expect(id)?;
            match occurrence {
                SymbolOccurrence::RefCitekey(citekey)
                | SymbolOccurrence::SectionCitekey(citekey) => {
                    for citation in queries.citations(document).iter() {
                        for capture in &citation.citekeys {
                            if capture.text == *citekey {
                                out.push(SymbolInstance {
                                    doc: id,
                                    uri: document.uri.clone(),
                                    site: capture.site.clone(),
                                    role: InstanceRole::Mention,
                                });
                            }
                        }
                    }
                    if matches!(occurrence, SymbolOccurrence::RefCitekey(_)) {
                        for reference in queries.references(document).iter() {
                            if reference.citekey == *citekey {
                                out.push(SymbolInstance {
                                    doc: id,
                                    uri: document.uri.clone(),
                                    site: reference.citekey_site.clone(),
                                    role: InstanceRole::Definition,
                                });
                            }
                        }
                    } else {
                        for section in queries.sections(document).iter() {
                            if section.citekey.as_deref() == Some(citekey.as_str()) {
                                if let Some(site) = &section.citekey_site {
                                    out.push(SymbolInstance {
                                        doc: id,
                                        uri: document.uri.clone(),
                                        site: site.clone(),
                                        role: InstanceRole::Definition,
                                    });
                                }
                            }
                        }
                    }
                }
                SymbolOccurrence::Media(path) => {
                    let stem = media_stem(path);
                    for image in queries.images(document).iter() {
                        if media_stem(&image.path) == stem {
                            out.push(SymbolInstance {
                                doc: id,
                                uri: document.uri.clone(),
                                site: image.path_site.clone(),
                                role: InstanceRole::Mention,
                            });
                        }
                    }
                    for carousel in queries.carousels(document).iter() {
                        for image in &carousel.images {
                            if media_stem(&image.path) == stem {
                                out.push(SymbolInstance {
                                    doc: id,
                                    uri: document.uri.clone(),
                                    site: image.path_site.clone(),
                                    role: InstanceRole::Mention,
                                });
                            }
                        }
                    }
                    for reference in queries.references(document).iter() {
                        if reference.kind == RefKind::Media && media_stem(&reference.key) == stem {
                            out.push(SymbolInstance {
                                doc: id,
                                uri: document.uri.clone(),
                                site: reference.key_site.clone(),
                                role: InstanceRole::Definition,
                            });
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Slash-prefixed reference keys and unprefixed image paths address the same
/// logical file.
pub fn media_stem(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn section_node(section: &Section) -> OutlineNode {
    OutlineNode {
        uri: section.uri.clone(),
        number: String::new(),
        title: section.title.clone(),
        citekey: section.citekey.clone(),
        level: section.level,
        site: section.site.clone(),
        children: Vec::new(),
    }
}

/// Folds a flat, document-ordered stream of section nodes into a forest
/// using their nesting levels.
fn fold_sections(nodes: impl Iterator<Item = OutlineNode>) -> Vec<OutlineNode> {
    let mut top = Vec::new();
    let mut stack: Vec<OutlineNode> = Vec::new();
    for node in nodes {
        while stack.last().map(|open| open.level >= node.level).unwrap_or(false) {
            close_section(&mut stack, &mut top);
        }
        stack.push(node);
    }
    while !stack.is_empty() {
        close_section(&mut stack, &mut top);
    }
    top
}

fn close_section(stack: &mut Vec<OutlineNode>, top: &mut Vec<OutlineNode>) {
    if let Some(done) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.children.push(done),
            None => top.push(done),
        }
    }
}

fn number_outline(nodes: &mut [OutlineNode], prefix: &str) {
    for (idx, node) in nodes.iter_mut().enumerate() {
        let number = if prefix.is_empty() {
            format!("{}", idx + 1)
        } else {
            format!("{prefix}.{}", idx + 1)
        };
        node.number = number.clone();
        number_outline(&mut node.children, &number);
    }
}

/// Builds the outline forest for one document, splicing included documents
/// at the include directive's position.
fn build_outline(
    store: &mut Store,
    queries: &mut QueryEngine,
    workspace: WorkspaceId,
    doc: DocumentId,
    visited: &mut HashSet<DocumentId>,
) -> Result<Vec<OutlineNode>, StoreError> {
    if !visited.insert(doc) {
        return Ok(Vec::new());
    }
    let (uri, sections, includes) = {
        let document = store.documents.expect(doc)?;
        (
            document.uri.clone(),
            queries.sections(document),
            queries.includes(document),
        )
    };

    // Sections and includes interleave in document order.
    enum Item<'a> {
        Section(&'a Section),
        Include(&'a crate::facts::Include),
    }
    let mut items: Vec<Item> = sections
        .iter()
        .map(Item::Section)
        .chain(includes.iter().map(Item::Include))
        .collect();
    items.sort_by_key(|item| match item {
        Item::Section(s) => s.site.span.start,
        Item::Include(i) => i.site.span.start,
    });

    let mut top = Vec::new();
    let mut stack: Vec<OutlineNode> = Vec::new();
    for item in items {
        match item {
            Item::Section(section) => {
                let node = section_node(section);
                while stack.last().map(|open| open.level >= node.level).unwrap_or(false) {
                    close_section(&mut stack, &mut top);
                }
                stack.push(node);
            }
            Item::Include(include) => {
                let pattern = include.pattern.clone();
                let children = resolve_include(store, workspace, &uri, &pattern)?;
                for child in children {
                    let child_forest = build_outline(store, queries, workspace, child, visited)?;
                    match stack.last_mut() {
                        Some(open) => open.children.extend(child_forest),
                        None => top.extend(child_forest),
                    }
                }
            }
        }
    }
    while !stack.is_empty() {
        close_section(&mut stack, &mut top);
    }
    Ok(top)
}

fn build_file_tree(
    store: &mut Store,
    queries: &mut QueryEngine,
    workspace: WorkspaceId,
    doc: DocumentId,
    visited: &mut HashSet<DocumentId>,
) -> Result<FileNode, StoreError> {
    let (uri, includes) = {
        let document = store.documents.expect(doc)?;
        (document.uri.clone(), queries.includes(document))
    };
    let mut node = FileNode {
        uri: uri.clone(),
        children: Vec::new(),
    };
    if !visited.insert(doc) {
        return Ok(node);
    }
    for include in includes.iter() {
        for child in resolve_include(store, workspace, &uri, &include.pattern)? {
            node.children
                .push(build_file_tree(store, queries, workspace, child, visited)?);
        }
    }
    Ok(node)
}

/// Resolves an include pattern to member documents, registering documents
/// read from disk as `Indexing` members with their own audit task.
pub fn resolve_include(
    store: &mut Store,
    workspace: WorkspaceId,
    base_uri: &str,
    pattern: &str,
) -> Result<Vec<DocumentId>, StoreError> {
    let mut ids = Vec::new();
    for path in expand_include(base_uri, pattern) {
        let Ok(url) = Url::from_file_path(&path) else {
            continue;
        };
        let uri = url.to_string();
        if let Some(existing) = store.document_by_uri(&uri) {
            ids.push(existing.id);
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        let id = store.documents.insert(|id| Document {
            id,
            uri: uri.clone(),
            workspace,
            state: DocumentState::Indexing,
            buffer: TextDocument::new(text.as_str(), 0),
            diagnostics: Vec::new(),
        })?;
        store.tasks.insert(|task_id| Task {
            id: task_id,
            operation: TaskOperation::AuditDocument,
            target: TaskTarget::Document(id),
            dependencies: Vec::new(),
            last_completed: None,
        })?;
        ids.push(id);
    }
    Ok(ids)
}

/// Expands an include key against the including document's directory.
/// Glob-style keys match files under that directory; plain keys resolve to a
/// single relative path. Unresolvable keys expand to nothing.
pub fn expand_include(base_uri: &str, pattern: &str) -> Vec<PathBuf> {
    let Some(dir) = Url::parse(base_uri)
        .ok()
        .and_then(|url| url.to_file_path().ok())
        .and_then(|path| path.parent().map(PathBuf::from))
    else {
        return Vec::new();
    };

    if pattern.contains(&['*', '?', '['][..]) {
        let Ok(glob) = GlobBuilder::new(pattern).literal_separator(true).build() else {
            return Vec::new();
        };
        let matcher = glob.compile_matcher();
        let mut hits: Vec<PathBuf> = WalkBuilder::new(&dir)
            .build()
            .flatten()
            .filter(|entry| {
                entry
                    .file_type()
                    .map(|file_type| file_type.is_file())
                    .unwrap_or(false)
            })
            .filter(|entry| {
                entry
                    .path()
                    .strip_prefix(&dir)
                    .map(|rel| matcher.is_match(rel))
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .collect();
        hits.sort();
        hits
    } else {
        let path = dir.join(pattern);
        if path.is_file() {
            vec![path]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline_leaf(level: u8, title: &str) -> OutlineNode {
        OutlineNode {
            uri: "file:///a.fol".into(),
            number: String::new(),
            title: title.into(),
            citekey: None,
            level,
            site: SourceRef {
                span: 0..0,
                start: folio_parser::Point::new(0, 0),
                end: folio_parser::Point::new(0, 0),
            },
            children: Vec::new(),
        }
    }

    #[test]
    fn sections_fold_by_level() {
        let forest = fold_sections(
            vec![
                outline_leaf(1, "a"),
                outline_leaf(2, "a.a"),
                outline_leaf(3, "a.a.a"),
                outline_leaf(2, "a.b"),
                outline_leaf(1, "b"),
            ]
            .into_iter(),
        );
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].children.len(), 2);
        assert_eq!(forest[0].children[0].children.len(), 1);
    }

    #[test]
    fn numbering_follows_document_order() {
        let mut forest = fold_sections(
            vec![
                outline_leaf(1, "a"),
                outline_leaf(2, "a.a"),
                outline_leaf(2, "a.b"),
                outline_leaf(1, "b"),
            ]
            .into_iter(),
        );
        number_outline(&mut forest, "");
        assert_eq!(forest[0].number, "1");
        assert_eq!(forest[0].children[1].number, "1.2");
        assert_eq!(forest[1].number, "2");
    }

    #[test]
    fn media_stem_unifies_slash_prefix() {
        assert_eq!(media_stem("/img/a.png"), media_stem("img/a.png"));
    }
}
