//! `folio/references`.

use lsp_types::Url;
use serde::{Deserialize, Serialize};

use super::Scope;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferencesParams {
    pub uri: Url,
    #[serde(default)]
    pub scope: Scope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferencesResponse {
    pub references: Vec<ReferenceDto>,
}

/// A reference listing with its classified key type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceDto {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
}
