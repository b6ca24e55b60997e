//! Language server for the folio format.
//!
//! Architecture, bottom up:
//!
//! - `folio-parser` owns syntax trees and the incremental text buffer.
//! - `folio-store` is the sole source of truth for workspaces, documents,
//!   tasks and jobs.
//! - `folio-analysis` derives facts, workspace views and diagnostics.
//! - This crate adds the dependency-aware task scheduler, the shared core
//!   context, and the tower-lsp surface (document sync, rename, document
//!   symbols, and the `folio/*` custom requests).
//!
//! Concurrency model: one async mutex around the core, never held across a
//! suspension point. Suspension happens while awaiting a job's completion
//! handle, inside the per-document debounce timer, and during external
//! validation calls; the scheduler keeps draining unrelated tasks
//! throughout.

pub mod features;
pub mod scheduler;
pub mod server;
pub mod state;

pub use scheduler::Scheduler;
pub use server::{FolioLanguageServer, LspClient};
pub use state::{Core, SharedCore};
