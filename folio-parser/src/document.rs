//! Incremental text buffer.
//!
//! Owns the source text, the line-start offset table and the parse tree for
//! one document, and keeps all three consistent under editor deltas. Range
//! edits splice the offset table and fold a tree edit into the previous parse
//! so the reparse can adopt unaffected blocks; full-replacement edits rebuild
//! everything from scratch.

use std::fmt;

use crate::parser::parse;
use crate::tree::{InputEdit, Point, Tree};

/// Zero-based line/character position, as used on the editor wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// One element of a document update, mirroring the editor change shape.
///
/// A change with a range replaces that range; a change with neither range nor
/// `range_length` replaces the whole document. A `range_length` without a
/// range is the one remaining malformed shape and fails the update.
#[derive(Debug, Clone)]
pub struct ContentChange {
    pub range: Option<(Position, Position)>,
    pub range_length: Option<u32>,
    pub text: String,
}

impl ContentChange {
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            range_length: None,
            text: text.into(),
        }
    }

    pub fn replace(start: Position, end: Position, text: impl Into<String>) -> Self {
        Self {
            range: Some((start, end)),
            range_length: None,
            text: text.into(),
        }
    }
}

/// Error applying a document update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// The change event matches neither the incremental nor the
    /// full-replacement contract.
    UnsupportedEditShape,
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateError::UnsupportedEditShape => {
                write!(f, "unsupported edit shape: range_length without range")
            }
        }
    }
}

impl std::error::Error for UpdateError {}

/// Spliced regions larger than this trigger a full offset-table recompute
/// instead of an incremental splice.
const SPLICE_RECOMPUTE_THRESHOLD: usize = 16 * 1024;

/// Text + line-offset table + parse tree for one document.
#[derive(Debug, Clone)]
pub struct TextDocument {
    text: String,
    version: i32,
    line_offsets: Vec<usize>,
    tree: Tree,
}

impl TextDocument {
    pub fn new(text: impl Into<String>, version: i32) -> Self {
        let text = text.into();
        let line_offsets = compute_line_offsets(&text);
        let tree = parse(&text, None);
        Self {
            text,
            version,
            line_offsets,
            tree,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Applies ordered edits and re-derives the parse tree.
    ///
    /// The whole update is rejected before any change is applied if one of
    /// the changes has an unrecognized shape.
    pub fn update(&mut self, version: i32, changes: &[ContentChange]) -> Result<(), UpdateError> {
        for change in changes {
            if change.range.is_none() && change.range_length.is_some() {
                return Err(UpdateError::UnsupportedEditShape);
            }
        }

        let mut incremental = false;
        for change in changes {
            match change.range {
                Some((start, end)) => {
                    self.apply_replace(start, end, &change.text);
                    incremental = true;
                }
                None => {
                    self.text = change.text.clone();
                    self.line_offsets = compute_line_offsets(&self.text);
                    self.tree = parse(&self.text, None);
                    incremental = false;
                }
            }
        }
        if incremental {
            self.tree = parse(&self.text, Some(&self.tree));
        }
        self.version = version;
        Ok(())
    }

    /// Forces a full reparse of the current text, discarding the previous
    /// tree. Recovery path when incremental state is suspect.
    pub fn reparse(&mut self) {
        self.tree = parse(&self.text, None);
    }

    /// Position of a byte offset; out-of-range offsets clamp to the end.
    pub fn position_at(&self, offset: usize) -> Position {
        let offset = self.clamp_to_boundary(offset.min(self.text.len()));
        let line = self.line_index_of(offset);
        Position {
            line: line as u32,
            character: (offset - self.line_offsets[line]) as u32,
        }
    }

    /// Byte offset of a position; out-of-range line/character clamp to valid
    /// bounds.
    pub fn offset_at(&self, position: Position) -> usize {
        let line = position.line as usize;
        if line >= self.line_offsets.len() {
            return self.text.len();
        }
        let line_start = self.line_offsets[line];
        let line_end = match self.line_offsets.get(line + 1) {
            // Stop short of the newline so the position stays on this line.
            Some(next) => next - 1,
            None => self.text.len(),
        };
        self.clamp_to_boundary((line_start + position.character as usize).min(line_end))
    }

    fn apply_replace(&mut self, start: Position, end: Position, new_text: &str) {
        // Malformed ranges are normalized by swapping the endpoints.
        let (start, end) = if start > end { (end, start) } else { (start, end) };
        let start_offset = self.offset_at(start);
        let end_offset = self.offset_at(end);

        let start_point = self.point_of(start_offset);
        let old_end_point = self.point_of(end_offset);
        let new_end_offset = start_offset + new_text.len();
        let new_end_point = end_point_of_insert(start_point, new_text);

        let edit = InputEdit {
            start_byte: start_offset,
            old_end_byte: end_offset,
            new_end_byte: new_end_offset,
            start_point,
            old_end_point,
            new_end_point,
        };

        self.text.replace_range(start_offset..end_offset, new_text);
        self.splice_line_offsets(start_offset, end_offset, new_text);
        self.tree.edit(&edit);
    }

    /// Incrementally maintains the line-start table across one replacement.
    fn splice_line_offsets(&mut self, start_offset: usize, end_offset: usize, new_text: &str) {
        if end_offset - start_offset + new_text.len() > SPLICE_RECOMPUTE_THRESHOLD {
            self.line_offsets = compute_line_offsets(&self.text);
            return;
        }

        let start_line = self.line_index_of(start_offset);
        let end_line = self.line_index_of(end_offset);
        let delta = new_text.len() as isize - (end_offset - start_offset) as isize;

        for offset in &mut self.line_offsets[end_line + 1..] {
            *offset = (*offset as isize + delta) as usize;
        }
        let inserted: Vec<usize> = new_text
            .bytes()
            .enumerate()
            .filter(|(_, byte)| *byte == b'\n')
            .map(|(idx, _)| start_offset + idx + 1)
            .collect();
        self.line_offsets.splice(start_line + 1..end_line + 1, inserted);
    }

    /// Index of the line containing the byte offset (binary search).
    fn line_index_of(&self, offset: usize) -> usize {
        self.line_offsets.partition_point(|&start| start <= offset) - 1
    }

    fn point_of(&self, offset: usize) -> Point {
        let line = self.line_index_of(offset);
        Point::new(line, offset - self.line_offsets[line])
    }

    /// Floors an offset to the nearest char boundary so byte-based columns
    /// can never split a code point.
    fn clamp_to_boundary(&self, mut offset: usize) -> usize {
        while offset > 0 && !self.text.is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }
}

fn compute_line_offsets(text: &str) -> Vec<usize> {
    let mut offsets = vec![0];
    for (idx, byte) in text.bytes().enumerate() {
        if byte == b'\n' {
            offsets.push(idx + 1);
        }
    }
    offsets
}

fn end_point_of_insert(start: Point, inserted: &str) -> Point {
    match inserted.rfind('\n') {
        Some(last) => Point::new(
            start.row + inserted.bytes().filter(|&b| b == b'\n').count(),
            inserted.len() - last - 1,
        ),
        None => Point::new(start.row, start.column + inserted.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeKind;

    fn doc(text: &str) -> TextDocument {
        TextDocument::new(text, 1)
    }

    #[test]
    fn offsets_and_positions_round_trip() {
        let d = doc("alpha\nbeta\n\ngamma");
        for offset in 0..=d.text().len() {
            assert_eq!(d.offset_at(d.position_at(offset)), offset);
        }
    }

    #[test]
    fn offset_at_clamps_line_and_character() {
        let d = doc("ab\ncd\n");
        assert_eq!(d.offset_at(Position::new(99, 0)), d.text().len());
        // Character past the end of the line clamps to just before the newline.
        assert_eq!(d.offset_at(Position::new(0, 99)), 2);
    }

    #[test]
    fn incremental_edit_keeps_offsets_consistent() {
        let mut d = doc("= One\n\nfirst line\nsecond line\n");
        d.update(
            2,
            &[ContentChange::replace(
                Position::new(2, 0),
                Position::new(2, 5),
                "FIRST\nextra",
            )],
        )
        .unwrap();
        assert_eq!(d.text(), "= One\n\nFIRST\nextra line\nsecond line\n");
        assert_eq!(d.version(), 2);
        let fresh = compute_line_offsets(d.text());
        assert_eq!(d.line_offsets, fresh);
    }

    #[test]
    fn malformed_range_is_swapped() {
        let mut d = doc("abcdef");
        d.update(
            2,
            &[ContentChange::replace(
                Position::new(0, 4),
                Position::new(0, 1),
                "X",
            )],
        )
        .unwrap();
        assert_eq!(d.text(), "aXef");
    }

    #[test]
    fn full_change_replaces_everything() {
        let mut d = doc("old text");
        d.update(3, &[ContentChange::full("= New\n")]).unwrap();
        assert_eq!(d.text(), "= New\n");
        assert_eq!(d.tree().blocks()[0].kind, NodeKind::Section);
    }

    #[test]
    fn range_length_without_range_is_fatal() {
        let mut d = doc("stable");
        let err = d
            .update(
                2,
                &[ContentChange {
                    range: None,
                    range_length: Some(3),
                    text: "x".into(),
                }],
            )
            .unwrap_err();
        assert_eq!(err, UpdateError::UnsupportedEditShape);
        // The update is rejected wholesale.
        assert_eq!(d.text(), "stable");
        assert_eq!(d.version(), 1);
    }

    #[test]
    fn incremental_update_matches_full_reparse() {
        let mut d = doc("= Title @key\n\nbody [@a] text\n\n[a]: /img/x.png\n");
        d.update(
            2,
            &[ContentChange::replace(
                Position::new(2, 5),
                Position::new(2, 9),
                "[@a, b]",
            )],
        )
        .unwrap();
        let mut rebuilt = d.clone();
        rebuilt.reparse();
        assert_eq!(d.tree(), rebuilt.tree());
    }

    #[test]
    fn large_splice_falls_back_to_recompute() {
        let mut d = doc("short\n");
        let big = "x\n".repeat(SPLICE_RECOMPUTE_THRESHOLD);
        d.update(
            2,
            &[ContentChange::replace(
                Position::new(0, 0),
                Position::new(0, 0),
                big.as_str(),
            )],
        )
        .unwrap();
        assert_eq!(d.line_offsets, compute_line_offsets(d.text()));
    }
}
