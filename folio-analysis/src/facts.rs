//! Typed facts derived from a document's parse tree.
//!
//! Facts are ephemeral: they are rebuilt by the query layer whenever a
//! document changes and never stored independently. Each fact keeps the
//! owning document uri plus the tree coordinates of the node it came from,
//! so rename and find-references can point back into the source.

use std::ops::Range;

use folio_parser::{Node, Point};
use once_cell::sync::Lazy;
use regex::Regex;

/// Where a fact (or one of its named captures) lives in its document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub span: Range<usize>,
    pub start: Point,
    pub end: Point,
}

impl SourceRef {
    pub fn of(node: &Node) -> Self {
        Self {
            span: node.span.clone(),
            start: node.start,
            end: node.end,
        }
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.span.start <= offset && offset < self.span.end
    }
}

/// Classification of a reference listing's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Mail,
    Media,
    Web,
    Record,
    Unknown,
}

impl RefKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RefKind::Mail => "mail",
            RefKind::Media => "media",
            RefKind::Web => "web",
            RefKind::Record => "record",
            RefKind::Unknown => "unknown",
        }
    }
}

static RECORD_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new("^[A-Za-z0-9]{8}$").expect("record token pattern is valid")
});

/// Ordered classification rules; the first match wins, and whitespace
/// anywhere in the key overrides everything else.
pub fn classify_key(key: &str) -> RefKind {
    if key.contains(char::is_whitespace) {
        return RefKind::Unknown;
    }
    if key.starts_with("mail:") {
        return RefKind::Mail;
    }
    if key.starts_with('/') {
        return RefKind::Media;
    }
    if key.starts_with("http://") || key.starts_with("https://") {
        return RefKind::Web;
    }
    if let Some(third) = key.split('.').nth(2) {
        if RECORD_TOKEN.is_match(third) {
            return RefKind::Record;
        }
    }
    RefKind::Unknown
}

/// `= Title @citekey` at one of five nesting levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub uri: String,
    pub level: u8,
    pub title: String,
    pub citekey: Option<String>,
    pub site: SourceRef,
    pub citekey_site: Option<SourceRef>,
}

/// `[citekey]: key` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub uri: String,
    pub citekey: String,
    pub key: String,
    pub kind: RefKind,
    pub site: SourceRef,
    pub citekey_site: SourceRef,
    pub key_site: SourceRef,
}

/// One citekey inside a citation, with its own span for precise edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitekeyCapture {
    pub text: String,
    pub site: SourceRef,
}

/// `[@k1, k2]` — the comma-separated citekeys merge into one capture list
/// per citation node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub uri: String,
    pub citekeys: Vec<CitekeyCapture>,
    pub site: SourceRef,
}

/// `:include: pattern`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    pub uri: String,
    pub pattern: String,
    pub site: SourceRef,
}

/// `:name: value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub uri: String,
    pub name: String,
    pub value: String,
    pub site: SourceRef,
}

/// `![alt](path)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub uri: String,
    pub path: String,
    pub alt: String,
    pub site: SourceRef,
    pub path_site: SourceRef,
}

/// `:::carousel` block and the images it frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Carousel {
    pub uri: String,
    pub images: Vec<ImageRef>,
    pub site: SourceRef,
}

/// Names of the derivable fact lists; the per-document cache is keyed by
/// this fixed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactKind {
    Sections,
    References,
    Citations,
    Includes,
    Directives,
    Images,
    Carousels,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("mail:alice@x.com", RefKind::Mail)]
    #[case("/img/a.png", RefKind::Media)]
    #[case("https://x.com", RefKind::Web)]
    #[case("http://plain.example", RefKind::Web)]
    #[case("a.b.abcdefgh", RefKind::Record)]
    #[case("deck.note.Zx9Qw7Lk", RefKind::Record)]
    #[case("a.b.seven77.c", RefKind::Unknown)]
    #[case("bare-token", RefKind::Unknown)]
    #[case("has space", RefKind::Unknown)]
    // Whitespace overrides every other rule.
    #[case("mail:with space", RefKind::Unknown)]
    #[case("/img/with space.png", RefKind::Unknown)]
    #[case("https://x.com/a b", RefKind::Unknown)]
    #[case("a.b.abcd efgh", RefKind::Unknown)]
    fn classifies_reference_keys(#[case] key: &str, #[case] expected: RefKind) {
        assert_eq!(classify_key(key), expected);
    }
}
