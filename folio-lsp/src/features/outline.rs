//! `folio/outline` and document symbols.

use folio_analysis::{to_range, OutlineNode};
use lsp_types::{DocumentSymbol, SymbolKind, Url};
use serde::{Deserialize, Serialize};

use super::Scope;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineParams {
    pub uri: Url,
    #[serde(default)]
    pub scope: Scope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineResponse {
    pub sections: Vec<SectionDto>,
}

/// One outline node on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionDto {
    pub number: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citekey: Option<String>,
    pub uri: String,
    pub range: lsp_types::Range,
    pub children: Vec<SectionDto>,
}

pub fn to_dtos(nodes: &[OutlineNode]) -> Vec<SectionDto> {
    nodes
        .iter()
        .map(|node| SectionDto {
            number: node.number.clone(),
            title: node.title.clone(),
            citekey: node.citekey.clone(),
            uri: node.uri.clone(),
            range: to_range(&node.site),
            children: to_dtos(&node.children),
        })
        .collect()
}

/// Nested document symbols mirroring the outline numbering.
#[allow(deprecated)]
pub fn to_document_symbols(nodes: &[OutlineNode]) -> Vec<DocumentSymbol> {
    nodes
        .iter()
        .map(|node| DocumentSymbol {
            name: format!("{} {}", node.number, node.title),
            detail: node.citekey.as_ref().map(|key| format!("@{key}")),
            kind: SymbolKind::STRING,
            tags: None,
            deprecated: None,
            range: to_range(&node.site),
            selection_range: to_range(&node.site),
            children: if node.children.is_empty() {
                None
            } else {
                Some(to_document_symbols(&node.children))
            },
        })
        .collect()
}
