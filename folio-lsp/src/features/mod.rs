//! Editor-facing feature handlers over the core query layers.

pub mod audit;
pub mod file_tree;
pub mod outline;
pub mod references;
pub mod rename;

use serde::{Deserialize, Serialize};

/// Whether a request answers over one document or the whole workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Document,
    Workspace,
}
