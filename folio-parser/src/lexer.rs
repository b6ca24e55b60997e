//! Inline lexer for paragraph and carousel content.
//!
//! Block structure is recognized line-by-line in the parser; this lexer only
//! tokenizes the inside of a single line into citation, image and plain-text
//! runs. Anything that fails to form a complete citation or image falls back
//! to text.

use logos::Logos;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineToken {
    /// `[@k1, k2, k3]` — one citation with comma-separated citekeys.
    #[regex(r"\[@[^\]\n]*\]")]
    Citation,

    /// `![alt](path)`.
    #[regex(r"!\[[^\]\n]*\]\([^)\n]*\)")]
    Image,

    /// A run of characters that can never open a citation or image.
    #[regex(r"[^!\[\n]+")]
    Text,

    /// A `[` or `!` that did not open anything.
    #[token("[")]
    #[token("!")]
    Stray,
}

/// A lexed inline token with its byte span relative to the lexed slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineSpan {
    pub token: InlineToken,
    pub span: std::ops::Range<usize>,
}

/// Tokenize one line of inline content.
///
/// Lexing errors are folded into text runs; the inline grammar has no fatal
/// inputs.
pub fn tokenize_inline(line: &str) -> Vec<InlineSpan> {
    let mut lexer = InlineToken::lexer(line);
    let mut spans = Vec::new();
    while let Some(result) = lexer.next() {
        let token = result.unwrap_or(InlineToken::Stray);
        spans.push(InlineSpan {
            token,
            span: lexer.span(),
        });
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(line: &str) -> Vec<InlineToken> {
        tokenize_inline(line).into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn lexes_citation_between_text() {
        assert_eq!(
            kinds("see [@a, b] for details"),
            vec![InlineToken::Text, InlineToken::Citation, InlineToken::Text]
        );
    }

    #[test]
    fn lexes_image() {
        let spans = tokenize_inline("before ![logo](img/logo.png) after");
        assert_eq!(spans[1].token, InlineToken::Image);
        assert_eq!(&"before ![logo](img/logo.png) after"[spans[1].span.clone()],
            "![logo](img/logo.png)");
    }

    #[test]
    fn unclosed_citation_is_text() {
        assert!(!kinds("broken [@never closed").contains(&InlineToken::Citation));
    }

    #[test]
    fn stray_bang_is_not_an_image() {
        assert_eq!(
            kinds("just ! a bang"),
            vec![InlineToken::Text, InlineToken::Stray, InlineToken::Text]
        );
    }
}
