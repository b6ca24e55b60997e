//! Pattern queries over document parse trees, memoized per document.
//!
//! A fixed set of structural queries turns tree nodes into typed fact lists.
//! Results are cached in an explicit per-document slot map keyed by fact
//! kind and cleared wholesale when that document is updated or reparsed;
//! nothing here survives an edit.

use std::collections::HashMap;
use std::sync::Arc;

use folio_parser::{Node, NodeKind};
use folio_store::{Document, DocumentId};

use crate::facts::{
    classify_key, Carousel, Citation, CitekeyCapture, Directive, FactKind, ImageRef, Include,
    Reference, Section, SourceRef,
};

/// Memoized fact lists for one document. One slot per fact kind; cleared as
/// a unit.
#[derive(Debug, Default)]
struct DocumentFacts {
    sections: Option<Arc<Vec<Section>>>,
    references: Option<Arc<Vec<Reference>>>,
    citations: Option<Arc<Vec<Citation>>>,
    includes: Option<Arc<Vec<Include>>>,
    directives: Option<Arc<Vec<Directive>>>,
    images: Option<Arc<Vec<ImageRef>>>,
    carousels: Option<Arc<Vec<Carousel>>>,
}

/// Runs the query set and owns the per-document caches.
#[derive(Debug, Default)]
pub struct QueryEngine {
    cache: HashMap<DocumentId, DocumentFacts>,
}

impl QueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every cached fact list for the document. Called on each
    /// update/reparse of that document.
    pub fn invalidate(&mut self, doc: DocumentId) {
        self.cache.remove(&doc);
    }

    /// Forgets the document entirely (close/teardown path).
    pub fn forget(&mut self, doc: DocumentId) {
        self.cache.remove(&doc);
    }

    /// True when a fact list is currently memoized; test and introspection
    /// hook.
    pub fn is_cached(&self, doc: DocumentId, kind: FactKind) -> bool {
        self.cache
            .get(&doc)
            .map(|facts| match kind {
                FactKind::Sections => facts.sections.is_some(),
                FactKind::References => facts.references.is_some(),
                FactKind::Citations => facts.citations.is_some(),
                FactKind::Includes => facts.includes.is_some(),
                FactKind::Directives => facts.directives.is_some(),
                FactKind::Images => facts.images.is_some(),
                FactKind::Carousels => facts.carousels.is_some(),
            })
            .unwrap_or(false)
    }

    pub fn sections(&mut self, doc: &Document) -> Arc<Vec<Section>> {
        let slot = self.cache.entry(doc.id).or_default();
        slot.sections
            .get_or_insert_with(|| Arc::new(extract_sections(doc)))
            .clone()
    }

    pub fn references(&mut self, doc: &Document) -> Arc<Vec<Reference>> {
        let slot = self.cache.entry(doc.id).or_default();
        slot.references
            .get_or_insert_with(|| Arc::new(extract_references(doc)))
            .clone()
    }

    pub fn citations(&mut self, doc: &Document) -> Arc<Vec<Citation>> {
        let slot = self.cache.entry(doc.id).or_default();
        slot.citations
            .get_or_insert_with(|| Arc::new(extract_citations(doc)))
            .clone()
    }

    pub fn includes(&mut self, doc: &Document) -> Arc<Vec<Include>> {
        let slot = self.cache.entry(doc.id).or_default();
        slot.includes
            .get_or_insert_with(|| Arc::new(extract_includes(doc)))
            .clone()
    }

    pub fn directives(&mut self, doc: &Document) -> Arc<Vec<Directive>> {
        let slot = self.cache.entry(doc.id).or_default();
        slot.directives
            .get_or_insert_with(|| Arc::new(extract_directives(doc)))
            .clone()
    }

    pub fn images(&mut self, doc: &Document) -> Arc<Vec<ImageRef>> {
        let slot = self.cache.entry(doc.id).or_default();
        slot.images
            .get_or_insert_with(|| Arc::new(extract_images(doc)))
            .clone()
    }

    pub fn carousels(&mut self, doc: &Document) -> Arc<Vec<Carousel>> {
        let slot = self.cache.entry(doc.id).or_default();
        slot.carousels
            .get_or_insert_with(|| Arc::new(extract_carousels(doc)))
            .clone()
    }
}

fn slice(doc: &Document, node: &Node) -> String {
    doc.buffer.text()[node.span.clone()].to_string()
}

fn extract_sections(doc: &Document) -> Vec<Section> {
    doc.buffer
        .tree()
        .blocks()
        .iter()
        .filter(|block| block.kind == NodeKind::Section)
        .map(|block| {
            let title = block
                .child(NodeKind::Title)
                .map(|node| slice(doc, node))
                .unwrap_or_default();
            let citekey_node = block.child(NodeKind::Citekey);
            Section {
                uri: doc.uri.clone(),
                level: block.level,
                title,
                citekey: citekey_node.map(|node| slice(doc, node)),
                site: SourceRef::of(block),
                citekey_site: citekey_node.map(SourceRef::of),
            }
        })
        .collect()
}

fn extract_references(doc: &Document) -> Vec<Reference> {
    doc.buffer
        .tree()
        .blocks()
        .iter()
        .filter(|block| block.kind == NodeKind::ReferenceDef)
        .filter_map(|block| {
            let citekey_node = block.child(NodeKind::Citekey)?;
            let key_node = block.child(NodeKind::Key)?;
            let key = slice(doc, key_node);
            Some(Reference {
                uri: doc.uri.clone(),
                citekey: slice(doc, citekey_node),
                kind: classify_key(&key),
                key,
                site: SourceRef::of(block),
                citekey_site: SourceRef::of(citekey_node),
                key_site: SourceRef::of(key_node),
            })
        })
        .collect()
}

fn extract_citations(doc: &Document) -> Vec<Citation> {
    let mut citations = Vec::new();
    for block in doc.buffer.tree().blocks() {
        for node in block.children_of(NodeKind::Citation) {
            let citekeys = node
                .children_of(NodeKind::Citekey)
                .map(|key| CitekeyCapture {
                    text: slice(doc, key),
                    site: SourceRef::of(key),
                })
                .collect();
            citations.push(Citation {
                uri: doc.uri.clone(),
                citekeys,
                site: SourceRef::of(node),
            });
        }
    }
    citations
}

fn extract_includes(doc: &Document) -> Vec<Include> {
    doc.buffer
        .tree()
        .blocks()
        .iter()
        .filter(|block| block.kind == NodeKind::Include)
        .filter_map(|block| {
            let pattern = block.child(NodeKind::Pattern)?;
            Some(Include {
                uri: doc.uri.clone(),
                pattern: slice(doc, pattern),
                site: SourceRef::of(block),
            })
        })
        .collect()
}

fn extract_directives(doc: &Document) -> Vec<Directive> {
    doc.buffer
        .tree()
        .blocks()
        .iter()
        .filter(|block| block.kind == NodeKind::Directive)
        .filter_map(|block| {
            let name = block.child(NodeKind::Name)?;
            Some(Directive {
                uri: doc.uri.clone(),
                name: slice(doc, name),
                value: block
                    .child(NodeKind::Value)
                    .map(|node| slice(doc, node))
                    .unwrap_or_default(),
                site: SourceRef::of(block),
            })
        })
        .collect()
}

fn image_from_node(doc: &Document, node: &Node) -> Option<ImageRef> {
    let path = node.child(NodeKind::Path)?;
    Some(ImageRef {
        uri: doc.uri.clone(),
        path: slice(doc, path),
        alt: node
            .child(NodeKind::Alt)
            .map(|alt| slice(doc, alt))
            .unwrap_or_default(),
        site: SourceRef::of(node),
        path_site: SourceRef::of(path),
    })
}

fn extract_images(doc: &Document) -> Vec<ImageRef> {
    let mut images = Vec::new();
    for block in doc.buffer.tree().blocks() {
        if block.kind == NodeKind::Carousel {
            continue;
        }
        for node in block.children_of(NodeKind::Image) {
            images.extend(image_from_node(doc, node));
        }
    }
    images
}

fn extract_carousels(doc: &Document) -> Vec<Carousel> {
    doc.buffer
        .tree()
        .blocks()
        .iter()
        .filter(|block| block.kind == NodeKind::Carousel)
        .map(|block| Carousel {
            uri: doc.uri.clone(),
            images: block
                .children_of(NodeKind::Image)
                .filter_map(|node| image_from_node(doc, node))
                .collect(),
            site: SourceRef::of(block),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_parser::{ContentChange, Position, TextDocument};
    use folio_store::{DocumentState, EntityId, WorkspaceId};

    const SAMPLE: &str = "\
= Intro @s1
== Deeper
prose [@alpha, beta] and ![pic](img/p.png)

[alpha]: https://example.com
[media]: /img/p.png
[rec]: deck.note.abcd1234

:include: parts/*.fol
:author: a. writer

:::carousel
![one](img/one.png)
:::
";

    fn document(text: &str) -> Document {
        Document {
            id: DocumentId::from_raw(7),
            uri: "file:///root.fol".into(),
            workspace: WorkspaceId::from_raw(1),
            state: DocumentState::Editing,
            buffer: TextDocument::new(text, 1),
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn extracts_sections_with_levels() {
        let doc = document(SAMPLE);
        let mut engine = QueryEngine::new();
        let sections = engine.sections(&doc);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].level, 1);
        assert_eq!(sections[0].citekey.as_deref(), Some("s1"));
        assert_eq!(sections[1].level, 2);
        assert_eq!(sections[1].citekey, None);
    }

    #[test]
    fn extracts_classified_references() {
        let doc = document(SAMPLE);
        let mut engine = QueryEngine::new();
        let references = engine.references(&doc);
        let kinds: Vec<_> = references.iter().map(|r| r.kind).collect();
        use crate::facts::RefKind::*;
        assert_eq!(kinds, vec![Web, Media, Record]);
    }

    #[test]
    fn citation_captures_merge_per_node() {
        let doc = document(SAMPLE);
        let mut engine = QueryEngine::new();
        let citations = engine.citations(&doc);
        assert_eq!(citations.len(), 1);
        let texts: Vec<_> = citations[0].citekeys.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha", "beta"]);
    }

    #[test]
    fn images_exclude_carousel_frames() {
        let doc = document(SAMPLE);
        let mut engine = QueryEngine::new();
        assert_eq!(engine.images(&doc).len(), 1);
        let carousels = engine.carousels(&doc);
        assert_eq!(carousels.len(), 1);
        assert_eq!(carousels[0].images.len(), 1);
    }

    #[test]
    fn results_are_memoized_until_invalidated() {
        let doc = document(SAMPLE);
        let mut engine = QueryEngine::new();
        let first = engine.sections(&doc);
        let second = engine.sections(&doc);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(engine.is_cached(doc.id, FactKind::Sections));

        engine.invalidate(doc.id);
        assert!(!engine.is_cached(doc.id, FactKind::Sections));
    }

    #[test]
    fn update_then_query_sees_new_text() {
        let mut doc = document("= Old\n");
        let mut engine = QueryEngine::new();
        assert_eq!(engine.sections(&doc)[0].title, "Old");

        doc.buffer
            .update(
                2,
                &[ContentChange::replace(
                    Position::new(0, 2),
                    Position::new(0, 5),
                    "New",
                )],
            )
            .unwrap();
        engine.invalidate(doc.id);
        assert_eq!(engine.sections(&doc)[0].title, "New");
    }
}
