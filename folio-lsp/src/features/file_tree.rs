//! `folio/fileTree`.

use folio_analysis::FileNode;
use lsp_types::Url;
use serde::{Deserialize, Serialize};

use super::Scope;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTreeParams {
    pub uri: Url,
    #[serde(default)]
    pub scope: Scope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTreeResponse {
    pub files: FileDto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDto {
    pub uri: String,
    pub children: Vec<FileDto>,
}

pub fn to_dto(node: &FileNode) -> FileDto {
    FileDto {
        uri: node.uri.clone(),
        children: node.children.iter().map(to_dto).collect(),
    }
}
