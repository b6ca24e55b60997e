//! Multi-pass diagnostic checks.
//!
//! An audit runs a fixed sequence of passes over one document, consuming
//! the query layer and workspace views. Pass failures are isolated: a
//! failing external validation skips only that pass, and the diagnostics
//! accumulated by earlier passes still stand.
//!
//! The passes split into a synchronous offline stage and a deferred
//! external stage so the caller can drop shared state before awaiting the
//! validator.

use std::fmt;

use async_trait::async_trait;
use folio_store::{DocumentId, Store, StoreError};
use lsp_types::{Diagnostic, DiagnosticSeverity};

use crate::facts::{RefKind, SourceRef};
use crate::queries::QueryEngine;
use crate::workspace::{expand_include, WorkspaceIndex};

/// A network validation call errored or timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalServiceFailure {
    pub message: String,
}

impl ExternalServiceFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ExternalServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "external validation service failed: {}", self.message)
    }
}

impl std::error::Error for ExternalServiceFailure {}

/// Seam for the record-key validation service.
///
/// A deployment plugs in a networked implementation; the default accepts
/// every key so audits stay fully offline.
#[async_trait]
pub trait KeyValidator: Send + Sync {
    async fn validate(&self, key: &str) -> Result<bool, ExternalServiceFailure>;
}

#[derive(Debug, Default)]
pub struct OfflineValidator;

#[async_trait]
impl KeyValidator for OfflineValidator {
    async fn validate(&self, _key: &str) -> Result<bool, ExternalServiceFailure> {
        Ok(true)
    }
}

/// A record key awaiting external validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordKeyCheck {
    pub key: String,
    pub site: SourceRef,
}

/// Result of the offline passes plus the work deferred to the validator.
#[derive(Debug, Default)]
pub struct AuditReport {
    pub diagnostics: Vec<Diagnostic>,
    pub pending: Vec<RecordKeyCheck>,
}

pub fn to_range(site: &SourceRef) -> lsp_types::Range {
    lsp_types::Range {
        start: lsp_types::Position {
            line: site.start.row as u32,
            character: site.start.column as u32,
        },
        end: lsp_types::Position {
            line: site.end.row as u32,
            character: site.end.column as u32,
        },
    }
}

fn warning(site: &SourceRef, message: String) -> Diagnostic {
    Diagnostic {
        range: to_range(site),
        severity: Some(DiagnosticSeverity::WARNING),
        source: Some("folio".to_string()),
        message,
        ..Diagnostic::default()
    }
}

/// Runs the synchronous passes for one document.
///
/// The outline is materialized first so include resolution has registered
/// every reachable member before the citekey maps are built.
pub fn offline_passes(
    store: &mut Store,
    queries: &mut QueryEngine,
    index: &mut WorkspaceIndex,
    doc: DocumentId,
) -> Result<AuditReport, StoreError> {
    let workspace = store.documents.expect(doc)?.workspace;
    index.outline(store, queries, workspace)?;

    let references_by_citekey = index.references_by_citekey(store, queries, workspace)?;
    let sections_by_citekey = index.sections_by_citekey(store, queries, workspace)?;

    let document = store.documents.expect(doc)?;
    let uri = document.uri.clone();
    let citations = queries.citations(document);
    let includes = queries.includes(document);
    let references = queries.references(document);

    let mut diagnostics = Vec::new();

    // Unresolved citekeys.
    for citation in citations.iter() {
        for capture in &citation.citekeys {
            if !references_by_citekey.contains_key(&capture.text)
                && !sections_by_citekey.contains_key(&capture.text)
            {
                diagnostics.push(warning(
                    &capture.site,
                    format!("unresolved citekey `{}`", capture.text),
                ));
            }
        }
    }

    // Includes that expand to nothing.
    for include in includes.iter() {
        if expand_include(&uri, &include.pattern).is_empty() {
            diagnostics.push(warning(
                &include.site,
                format!("include `{}` matches no files", include.pattern),
            ));
        }
    }

    // Record keys are validated externally; collect them for the deferred
    // stage.
    let pending = references
        .iter()
        .filter(|reference| reference.kind == RefKind::Record)
        .map(|reference| RecordKeyCheck {
            key: reference.key.clone(),
            site: reference.key_site.clone(),
        })
        .collect();

    Ok(AuditReport {
        diagnostics,
        pending,
    })
}

/// The deferred external pass. A service failure skips the remainder of
/// this pass only; diagnostics already produced are returned as-is.
pub async fn validate_record_keys(
    validator: &dyn KeyValidator,
    pending: &[RecordKeyCheck],
) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for check in pending {
        match validator.validate(&check.key).await {
            Ok(true) => {}
            Ok(false) => diagnostics.push(warning(
                &check.site,
                format!("record key `{}` does not resolve", check.key),
            )),
            Err(error) => {
                tracing::warn!(key = %check.key, %error, "record validation unavailable, skipping pass");
                break;
            }
        }
    }
    diagnostics
}
