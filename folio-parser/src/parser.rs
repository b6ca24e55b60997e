//! Line-oriented block parser for the folio format.
//!
//! Each line is classified into a block role (section header, reference
//! listing, directive, carousel fence, blank, plain), consecutive plain lines
//! group into paragraphs, and inline content is tokenized per line. When an
//! edited old tree is supplied, blocks whose shifted spans line up exactly
//! with the fresh scan are adopted wholesale instead of being rebuilt.

use std::collections::HashMap;
use std::ops::Range;

use crate::lexer::{tokenize_inline, InlineToken};
use crate::tree::{Node, NodeKind, Point, Tree};

/// Parse `text`, reusing unaffected blocks of `old_tree` when provided.
///
/// The old tree must already have had every edit folded in via
/// [`Tree::edit`], so its surviving spans refer to the new text.
pub fn parse(text: &str, old_tree: Option<&Tree>) -> Tree {
    let lines = line_spans(text);
    let reusable: HashMap<(usize, usize), &Node> = old_tree
        .map(|tree| {
            tree.blocks()
                .iter()
                .filter(|block| !block.edited)
                .map(|block| ((block.span.start, block.span.end), block))
                .collect()
        })
        .unwrap_or_default();

    let mut blocks = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];
        match classify(text, line) {
            LineClass::Blank => {
                i += 1;
            }
            LineClass::Section(level) => {
                blocks.push(adopt(&reusable, line.start, line.end, || {
                    build_section(text, line, level)
                }));
                i += 1;
            }
            LineClass::RefDef => {
                blocks.push(adopt(&reusable, line.start, line.end, || {
                    build_refdef(text, line)
                }));
                i += 1;
            }
            LineClass::Directive => {
                blocks.push(adopt(&reusable, line.start, line.end, || {
                    build_directive(text, line)
                }));
                i += 1;
            }
            LineClass::CarouselOpen => {
                let mut j = i + 1;
                while j < lines.len() && !matches!(classify(text, &lines[j]), LineClass::CarouselClose)
                {
                    j += 1;
                }
                let last = if j < lines.len() { j } else { lines.len() - 1 };
                let (start, end) = (line.start, lines[last].end);
                blocks.push(adopt(&reusable, start, end, || {
                    build_carousel(text, &lines[i..=last])
                }));
                i = last + 1;
            }
            LineClass::CarouselClose | LineClass::Plain => {
                // A stray fence line reads as plain text.
                let mut j = i + 1;
                while j < lines.len() && matches!(classify(text, &lines[j]), LineClass::Plain) {
                    j += 1;
                }
                let (start, end) = (line.start, lines[j - 1].end);
                blocks.push(adopt(&reusable, start, end, || {
                    build_paragraph(text, &lines[i..j])
                }));
                i = j;
            }
        }
    }

    let end_point = lines
        .last()
        .map(|line| Point::new(line.row, line.end - line.start))
        .unwrap_or_default();
    let root = Node::new(NodeKind::Document, 0..text.len(), Point::new(0, 0), end_point)
        .with_children(blocks);
    Tree::from_root(root)
}

/// One source line: byte range excluding the trailing newline, plus its row.
struct LineSpan {
    start: usize,
    end: usize,
    row: usize,
}

fn line_spans(text: &str) -> Vec<LineSpan> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut row = 0;
    for (idx, byte) in text.bytes().enumerate() {
        if byte == b'\n' {
            lines.push(LineSpan { start, end: idx, row });
            start = idx + 1;
            row += 1;
        }
    }
    if start < text.len() {
        lines.push(LineSpan {
            start,
            end: text.len(),
            row,
        });
    }
    lines
}

enum LineClass {
    Blank,
    Section(u8),
    RefDef,
    Directive,
    CarouselOpen,
    CarouselClose,
    Plain,
}

fn classify(text: &str, line: &LineSpan) -> LineClass {
    let s = &text[line.start..line.end];
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return LineClass::Blank;
    }
    if trimmed == ":::carousel" {
        return LineClass::CarouselOpen;
    }
    if trimmed == ":::" {
        return LineClass::CarouselClose;
    }
    if s.starts_with('=') {
        let level = s.bytes().take_while(|&b| b == b'=').count();
        if (1..=5).contains(&level) && s.as_bytes().get(level) == Some(&b' ') {
            return LineClass::Section(level as u8);
        }
        return LineClass::Plain;
    }
    if s.starts_with('[') && !s.starts_with("[@") {
        if let Some(close) = s.find("]:") {
            let citekey = &s[1..close];
            if !citekey.is_empty() && !citekey.contains(char::is_whitespace) {
                return LineClass::RefDef;
            }
        }
        return LineClass::Plain;
    }
    if s.starts_with(':') && !s.starts_with("::") {
        if let Some(second) = s[1..].find(':') {
            let name = &s[1..1 + second];
            if !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return LineClass::Directive;
            }
        }
        return LineClass::Plain;
    }
    LineClass::Plain
}

fn adopt(
    reusable: &HashMap<(usize, usize), &Node>,
    start: usize,
    end: usize,
    build: impl FnOnce() -> Node,
) -> Node {
    match reusable.get(&(start, end)) {
        Some(node) => (*node).clone(),
        None => build(),
    }
}

/// Span of `slice` with surrounding whitespace removed, in absolute bytes.
fn trimmed_span(text: &str, range: Range<usize>) -> Range<usize> {
    let slice = &text[range.clone()];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    range.start + lead..range.end - trail
}

fn span_node(kind: NodeKind, row: usize, line_start: usize, span: Range<usize>) -> Node {
    Node::new(
        kind,
        span.clone(),
        Point::new(row, span.start - line_start),
        Point::new(row, span.end - line_start),
    )
}

fn build_section(text: &str, line: &LineSpan, level: u8) -> Node {
    let rest_start = line.start + level as usize + 1;
    let rest = &text[rest_start..line.end];
    let mut children = Vec::new();
    let mut title_end = line.end;

    if let Some(at) = rest.rfind(" @") {
        let candidate = &rest[at + 2..];
        if !candidate.is_empty() && !candidate.contains(char::is_whitespace) {
            let key_start = rest_start + at + 2;
            children.push(span_node(
                NodeKind::Citekey,
                line.row,
                line.start,
                key_start..line.end,
            ));
            title_end = rest_start + at;
        }
    }

    let title = trimmed_span(text, rest_start..title_end);
    children.insert(0, span_node(NodeKind::Title, line.row, line.start, title));

    Node::new(
        NodeKind::Section,
        line.start..line.end,
        Point::new(line.row, 0),
        Point::new(line.row, line.end - line.start),
    )
    .with_level(level)
    .with_children(children)
}

fn build_refdef(text: &str, line: &LineSpan) -> Node {
    let s = &text[line.start..line.end];
    // Classification guarantees the "]:" is present.
    let close = s.find("]:").unwrap_or(s.len());
    let citekey = line.start + 1..line.start + close;
    let key = trimmed_span(text, line.start + close + 2..line.end);
    Node::new(
        NodeKind::ReferenceDef,
        line.start..line.end,
        Point::new(line.row, 0),
        Point::new(line.row, line.end - line.start),
    )
    .with_children(vec![
        span_node(NodeKind::Citekey, line.row, line.start, citekey),
        span_node(NodeKind::Key, line.row, line.start, key),
    ])
}

fn build_directive(text: &str, line: &LineSpan) -> Node {
    let s = &text[line.start..line.end];
    let second = s[1..].find(':').unwrap_or(s.len() - 1) + 1;
    let name = line.start + 1..line.start + second;
    let value = trimmed_span(text, line.start + second + 1..line.end);
    let is_include = &text[name.clone()] == "include";

    let mut children = Vec::new();
    if is_include {
        children.push(span_node(NodeKind::Pattern, line.row, line.start, value));
    } else {
        children.push(span_node(NodeKind::Name, line.row, line.start, name));
        if !value.is_empty() {
            children.push(span_node(NodeKind::Value, line.row, line.start, value));
        }
    }

    Node::new(
        if is_include {
            NodeKind::Include
        } else {
            NodeKind::Directive
        },
        line.start..line.end,
        Point::new(line.row, 0),
        Point::new(line.row, line.end - line.start),
    )
    .with_children(children)
}

fn build_carousel(text: &str, lines: &[LineSpan]) -> Node {
    let mut children = Vec::new();
    for line in &lines[1..] {
        for inline in inline_nodes(text, line) {
            if inline.kind == NodeKind::Image {
                children.push(inline);
            }
        }
    }
    let first = &lines[0];
    let last = &lines[lines.len() - 1];
    Node::new(
        NodeKind::Carousel,
        first.start..last.end,
        Point::new(first.row, 0),
        Point::new(last.row, last.end - last.start),
    )
    .with_children(children)
}

fn build_paragraph(text: &str, lines: &[LineSpan]) -> Node {
    let mut children = Vec::new();
    for line in lines {
        children.extend(inline_nodes(text, line));
    }
    let first = &lines[0];
    let last = &lines[lines.len() - 1];
    Node::new(
        NodeKind::Paragraph,
        first.start..last.end,
        Point::new(first.row, 0),
        Point::new(last.row, last.end - last.start),
    )
    .with_children(children)
}

/// Citation and image nodes on one line; plain text runs produce no nodes.
fn inline_nodes(text: &str, line: &LineSpan) -> Vec<Node> {
    let slice = &text[line.start..line.end];
    let mut nodes = Vec::new();
    for inline in tokenize_inline(slice) {
        let abs = line.start + inline.span.start..line.start + inline.span.end;
        match inline.token {
            InlineToken::Citation => {
                nodes.push(build_citation(text, line, abs));
            }
            InlineToken::Image => {
                nodes.push(build_image(text, line, abs));
            }
            InlineToken::Text | InlineToken::Stray => {}
        }
    }
    nodes
}

fn build_citation(text: &str, line: &LineSpan, span: Range<usize>) -> Node {
    // span covers "[@...]"; citekeys live between the "@" and the "]".
    let inner = span.start + 2..span.end - 1;
    let mut children = Vec::new();
    let mut cursor = inner.start;
    for piece in text[inner.clone()].split(',') {
        let piece_range = trimmed_span(text, cursor..cursor + piece.len());
        if !piece_range.is_empty() {
            children.push(span_node(NodeKind::Citekey, line.row, line.start, piece_range));
        }
        cursor += piece.len() + 1;
    }
    span_node(NodeKind::Citation, line.row, line.start, span).with_children(children)
}

fn build_image(text: &str, line: &LineSpan, span: Range<usize>) -> Node {
    let slice = &text[span.clone()];
    // Token shape "![alt](path)" is guaranteed by the lexer.
    let alt_end = slice.find(']').unwrap_or(slice.len());
    let alt = span.start + 2..span.start + alt_end;
    let path = trimmed_span(text, span.start + alt_end + 2..span.end - 1);
    let mut children = vec![span_node(NodeKind::Alt, line.row, line.start, alt)];
    children.push(span_node(NodeKind::Path, line.row, line.start, path));
    span_node(NodeKind::Image, line.row, line.start, span).with_children(children)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
= Intro @s1
Some prose citing [@alpha, beta] here.

[alpha]: https://example.com/paper
[shot]: /img/shot.png

:include: chapters/*.fol
:author: someone

:::carousel
![one](img/one.png)
![two](img/two.png)
:::
";

    fn kinds(tree: &Tree) -> Vec<NodeKind> {
        tree.blocks().iter().map(|b| b.kind).collect()
    }

    #[test]
    fn parses_block_structure() {
        let tree = parse(SAMPLE, None);
        assert_eq!(
            kinds(&tree),
            vec![
                NodeKind::Section,
                NodeKind::Paragraph,
                NodeKind::ReferenceDef,
                NodeKind::ReferenceDef,
                NodeKind::Include,
                NodeKind::Directive,
                NodeKind::Carousel,
            ]
        );
    }

    #[test]
    fn section_carries_level_title_and_citekey() {
        let tree = parse(SAMPLE, None);
        let section = &tree.blocks()[0];
        assert_eq!(section.level, 1);
        let title = section.child(NodeKind::Title).unwrap();
        assert_eq!(&SAMPLE[title.span.clone()], "Intro");
        let citekey = section.child(NodeKind::Citekey).unwrap();
        assert_eq!(&SAMPLE[citekey.span.clone()], "s1");
    }

    #[test]
    fn citation_merges_comma_separated_citekeys() {
        let tree = parse(SAMPLE, None);
        let paragraph = &tree.blocks()[1];
        let citation = paragraph.child(NodeKind::Citation).unwrap();
        let keys: Vec<&str> = citation
            .children_of(NodeKind::Citekey)
            .map(|n| &SAMPLE[n.span.clone()])
            .collect();
        assert_eq!(keys, vec!["alpha", "beta"]);
    }

    #[test]
    fn include_exposes_pattern() {
        let tree = parse(SAMPLE, None);
        let include = &tree.blocks()[4];
        let pattern = include.child(NodeKind::Pattern).unwrap();
        assert_eq!(&SAMPLE[pattern.span.clone()], "chapters/*.fol");
    }

    #[test]
    fn carousel_collects_images() {
        let tree = parse(SAMPLE, None);
        let carousel = tree.blocks().last().unwrap();
        assert_eq!(carousel.kind, NodeKind::Carousel);
        let paths: Vec<&str> = carousel
            .children
            .iter()
            .filter_map(|img| img.child(NodeKind::Path))
            .map(|n| &SAMPLE[n.span.clone()])
            .collect();
        assert_eq!(paths, vec!["img/one.png", "img/two.png"]);
    }

    #[test]
    fn six_equals_is_prose() {
        let tree = parse("====== not a section\n", None);
        assert_eq!(kinds(&tree), vec![NodeKind::Paragraph]);
    }

    #[test]
    fn deepest_section_level_is_five() {
        let tree = parse("===== Deep\n", None);
        assert_eq!(tree.blocks()[0].level, 5);
    }

    #[test]
    fn reuses_blocks_outside_the_edit() {
        let mut tree = parse(SAMPLE, None);
        // Edit inside the paragraph (row 1): replace "prose" with "text".
        let start = SAMPLE.find("prose").unwrap();
        let edit = crate::tree::InputEdit {
            start_byte: start,
            old_end_byte: start + 5,
            new_end_byte: start + 4,
            start_point: Point::new(1, start - 12),
            old_end_point: Point::new(1, start - 12 + 5),
            new_end_point: Point::new(1, start - 12 + 4),
        };
        tree.edit(&edit);
        let new_text = SAMPLE.replacen("prose", "text", 1);
        let reparsed = parse(&new_text, Some(&tree));
        assert_eq!(kinds(&reparsed), kinds(&parse(&new_text, None)));
        // Blocks before the edit keep identical spans; blocks after shift.
        assert_eq!(reparsed.blocks()[0], parse(&new_text, None).blocks()[0]);
    }
}
