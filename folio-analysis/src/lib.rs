//! Query extraction, workspace indexing and diagnostics for folio.
//!
//! Layering, leaves first: `facts` defines the typed facts and the
//! reference-key classification; `queries` pattern-matches parse trees into
//! memoized per-document fact lists; `workspace` aggregates member facts
//! into workspace-wide views (citekey maps, numbered outline, inclusion
//! tree, symbol instances); `analyzer` runs the diagnostic passes on top.

pub mod analyzer;
pub mod facts;
pub mod queries;
pub mod workspace;

pub use analyzer::{
    offline_passes, to_range, validate_record_keys, AuditReport, ExternalServiceFailure,
    KeyValidator, OfflineValidator, RecordKeyCheck,
};
pub use facts::{
    classify_key, Carousel, Citation, CitekeyCapture, Directive, FactKind, ImageRef, Include,
    RefKind, Reference, Section, SourceRef,
};
pub use queries::QueryEngine;
pub use workspace::{
    expand_include, media_stem, resolve_include, FileNode, InstanceRole, OutlineNode,
    SymbolInstance, SymbolOccurrence, WorkspaceIndex,
};
