//! Workspace-wide rename.
//!
//! The symbol under the cursor is resolved to a typed occurrence, every
//! structurally equivalent instance is gathered workspace-wide, and each
//! target document is handled by state: open documents receive workspace
//! edits for the client to apply, indexed documents are rewritten on disk
//! immediately with a version bump.

use std::collections::HashMap;

use folio_analysis::{
    media_stem, to_range, InstanceRole, SymbolInstance, SymbolOccurrence,
};
use folio_parser::{ContentChange, Position};
use folio_store::{DocumentId, DocumentState, StoreError};
use lsp_types::{TextEdit, Url, WorkspaceEdit};

use crate::state::Core;

pub fn apply_rename(
    core: &mut Core,
    uri: &str,
    position: lsp_types::Position,
    new_name: &str,
) -> Result<Option<WorkspaceEdit>, StoreError> {
    let (doc_id, workspace, offset) = {
        let document = core.store.expect_document_by_uri(uri)?;
        let position = Position::new(position.line, position.character);
        (
            document.id,
            document.workspace,
            document.buffer.offset_at(position),
        )
    };

    let occurrence = match core.index.occurrence_at(
        &core.store,
        &mut core.queries,
        workspace,
        doc_id,
        offset,
    )? {
        Some(occurrence) => occurrence,
        None => return Ok(None),
    };
    let instances = core
        .index
        .instances(&core.store, &mut core.queries, workspace, &occurrence)?;
    if instances.is_empty() {
        return Ok(None);
    }

    let mut by_doc: HashMap<DocumentId, Vec<SymbolInstance>> = HashMap::new();
    for instance in instances {
        by_doc.entry(instance.doc).or_default().push(instance);
    }

    let mut changes: HashMap<Url, Vec<TextEdit>> = HashMap::new();
    let mut rewritten = Vec::new();

    for (target, mut sites) in by_doc {
        sites.sort_by_key(|instance| instance.site.span.start);
        let (state, target_uri) = {
            let document = core.store.documents.expect(target)?;
            (document.state, document.uri.clone())
        };
        match state {
            DocumentState::Editing => {
                let edits = sites
                    .iter()
                    .map(|instance| TextEdit {
                        range: to_range(&instance.site),
                        new_text: replacement(&occurrence, instance.role, new_name),
                    })
                    .collect();
                let Ok(url) = Url::parse(&target_uri) else {
                    continue;
                };
                changes.insert(url, edits);
            }
            DocumentState::Indexing => {
                rewrite_on_disk(core, target, &target_uri, &sites, &occurrence, new_name)?;
                rewritten.push(target);
            }
        }
    }
    for doc in rewritten {
        core.touch_document(doc);
    }

    Ok(Some(WorkspaceEdit {
        changes: Some(changes),
        ..WorkspaceEdit::default()
    }))
}

/// Replacement text for one instance. Media renames keep the slash
/// convention of each site: listing keys stay slash-prefixed, image paths
/// stay bare.
fn replacement(occurrence: &SymbolOccurrence, role: InstanceRole, new_name: &str) -> String {
    match occurrence {
        SymbolOccurrence::Media(_) => match role {
            InstanceRole::Definition => format!("/{}", media_stem(new_name)),
            InstanceRole::Mention => media_stem(new_name).to_string(),
        },
        SymbolOccurrence::RefCitekey(_) | SymbolOccurrence::SectionCitekey(_) => {
            new_name.to_string()
        }
    }
}

fn rewrite_on_disk(
    core: &mut Core,
    doc: DocumentId,
    uri: &str,
    sites: &[SymbolInstance],
    occurrence: &SymbolOccurrence,
    new_name: &str,
) -> Result<(), StoreError> {
    let mut text = core.store.documents.expect(doc)?.buffer.text().to_string();
    for instance in sites.iter().rev() {
        text.replace_range(
            instance.site.span.clone(),
            &replacement(occurrence, instance.role, new_name),
        );
    }

    core.store.documents.update(doc, |document| {
        let version = document.buffer.version() + 1;
        let _ = document
            .buffer
            .update(version, &[ContentChange::full(text.clone())]);
    })?;

    match Url::parse(uri)
        .map_err(|_| ())
        .and_then(|url| url.to_file_path())
    {
        Ok(path) => {
            if let Err(error) = std::fs::write(&path, &text) {
                tracing::warn!(%uri, %error, "on-disk rename rewrite failed");
            }
        }
        Err(()) => tracing::warn!(%uri, "uri has no file path, rename not written"),
    }
    Ok(())
}
