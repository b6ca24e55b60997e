//! Syntax tree for folio documents.
//!
//! The tree is block-oriented: the document root owns one node per block
//! (section header, reference listing, directive, carousel, paragraph), and
//! blocks own their inline nodes (citations, images) plus the named spans a
//! consumer needs to slice out of the source text (titles, citekeys, keys).
//!
//! Nodes carry byte spans and row/column points so that an edit can be folded
//! into an existing tree before reparsing: spans behind the edit are shifted,
//! spans touching it are flagged, and the parser rebuilds only flagged blocks.

use std::ops::Range;

/// A row/column coordinate. Columns are byte offsets within the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Point {
    pub row: usize,
    pub column: usize,
}

impl Point {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

/// A single text edit expressed in tree coordinates.
///
/// `start_byte..old_end_byte` is the replaced region of the previous text,
/// `start_byte..new_end_byte` the region the replacement occupies, with the
/// matching points for each endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEdit {
    pub start_byte: usize,
    pub old_end_byte: usize,
    pub new_end_byte: usize,
    pub start_point: Point,
    pub old_end_point: Point,
    pub new_end_point: Point,
}

/// Node kinds produced by the block and inline grammars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    /// `= Title @citekey` through `===== Title`.
    Section,
    Paragraph,
    /// `[citekey]: key` listing.
    ReferenceDef,
    /// `:include: pattern`.
    Include,
    /// `:name: value` for any other directive name.
    Directive,
    /// `:::carousel` fenced block of images.
    Carousel,
    /// Inline `[@k1, k2]`.
    Citation,
    /// Inline `![alt](path)`.
    Image,
    // Named child spans.
    Title,
    Citekey,
    Key,
    Name,
    Value,
    Pattern,
    Path,
    Alt,
}

/// A node in the parse tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Range<usize>,
    pub start: Point,
    pub end: Point,
    pub children: Vec<Node>,
    /// Section nesting level (1-5); zero for every other kind.
    pub level: u8,
    /// Set when an edit touched this node's span; the parser will not reuse
    /// a flagged node.
    pub edited: bool,
}

impl Node {
    pub fn new(kind: NodeKind, span: Range<usize>, start: Point, end: Point) -> Self {
        Self {
            kind,
            span,
            start,
            end,
            children: Vec::new(),
            level: 0,
            edited: false,
        }
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    /// First child of the given kind, if any.
    pub fn child(&self, kind: NodeKind) -> Option<&Node> {
        self.children.iter().find(|child| child.kind == kind)
    }

    /// All children of the given kind, in document order.
    pub fn children_of(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.children.iter().filter(move |child| child.kind == kind)
    }

    fn apply_edit(&mut self, edit: &InputEdit) {
        if self.span.end <= edit.start_byte {
            // Entirely before the edit; nothing moves.
            return;
        }
        if self.span.start >= edit.old_end_byte {
            self.span = shift_span(&self.span, edit);
            self.start = shift_point(self.start, edit);
            self.end = shift_point(self.end, edit);
            for child in &mut self.children {
                child.apply_edit(edit);
            }
            return;
        }
        // Overlapping the edited region: flag for rebuild, keep the end
        // anchored to the new coordinate space so sibling scans stay sane.
        self.edited = true;
        if self.span.end >= edit.old_end_byte {
            self.span.end = shifted(self.span.end, edit);
            self.end = shift_point(self.end, edit);
        } else {
            self.span.end = edit.new_end_byte.max(self.span.start);
            self.end = edit.new_end_point;
        }
        for child in &mut self.children {
            child.apply_edit(edit);
        }
    }
}

fn shift_span(span: &Range<usize>, edit: &InputEdit) -> Range<usize> {
    Range {
        start: shifted(span.start, edit),
        end: shifted(span.end, edit),
    }
}

fn shifted(byte: usize, edit: &InputEdit) -> usize {
    debug_assert!(byte >= edit.old_end_byte);
    byte - edit.old_end_byte + edit.new_end_byte
}

fn shift_point(point: Point, edit: &InputEdit) -> Point {
    if point < edit.old_end_point {
        return point;
    }
    if point.row == edit.old_end_point.row {
        Point {
            row: edit.new_end_point.row,
            column: edit.new_end_point.column + (point.column - edit.old_end_point.column),
        }
    } else {
        Point {
            row: point.row + edit.new_end_point.row - edit.old_end_point.row,
            column: point.column,
        }
    }
}

/// A parsed document tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    root: Node,
}

impl Tree {
    pub(crate) fn from_root(root: Node) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Top-level blocks in document order.
    pub fn blocks(&self) -> &[Node] {
        &self.root.children
    }

    /// Folds an edit into the tree so spans land in the new coordinate space.
    ///
    /// Must be called once per applied text change, before reparsing with
    /// this tree as the old tree.
    pub fn edit(&mut self, edit: &InputEdit) {
        self.root.apply_edit(edit);
    }

    /// Smallest block whose span contains the byte offset.
    pub fn block_at(&self, offset: usize) -> Option<&Node> {
        self.root
            .children
            .iter()
            .find(|block| block.span.start <= offset && offset < block.span.end)
    }
}
