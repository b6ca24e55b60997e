//! `folio/audit`.

use lsp_types::{Diagnostic, Url};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditParams {
    pub uri: Url,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResponse {
    pub diagnostics: Vec<Diagnostic>,
}
