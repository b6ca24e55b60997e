//! Parser library for the folio format.
//!
//! Folio is a line-oriented structured-text dialect: sections at up to five
//! nesting levels, reference listings, inline citations, include and generic
//! directives, image references and carousels. This crate owns the syntax
//! tree, the block/inline parsers, and the incremental text buffer that
//! keeps text, line table and tree consistent under editor deltas.
//!
//! The tree intentionally stores only kinds, spans and points; consumers
//! slice the source text through the named child spans (`Title`, `Citekey`,
//! `Key`, ...) to derive typed facts.

pub mod document;
pub mod lexer;
pub mod parser;
pub mod tree;

pub use document::{ContentChange, Position, TextDocument, UpdateError};
pub use parser::parse;
pub use tree::{InputEdit, Node, NodeKind, Point, Tree};
