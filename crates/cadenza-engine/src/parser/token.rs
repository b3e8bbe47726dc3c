//! Token definitions for the Cadenza language.
//!
//! A token records its kind, where it sits in the source, and for literals
//! the value the lexer already decoded. Strings and symbols keep only their
//! source range; they are interned later, when a `ThreadContext` is around.

use std::fmt;
use std::ops::Range;

use cadenza_sdk::Slot;
use serde::Serialize;

/// Source location of a token or node.
///
/// `start`/`end` are byte offsets, `line`/`column` are 1-based and point at
/// `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
    /// Line number (1-based)
    pub line: u32,
    /// Column number (1-based)
    pub column: u32,
}

impl Span {
    /// Create a new span.
    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// Byte range covered by this span.
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Smallest span covering both `self` and `other`, located at `self`.
    pub fn combine(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: self.line,
            column: self.column,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenKind {
    /// Integer, float, char, nil, true, false, or symbol literal
    Literal,
    /// String literal; adjacent strings concatenate in the parser
    String,
    /// `_Name` primitive marker inside a method body
    Primitive,

    // Operator tokens; all of these can also act as binary operators.
    /// `+`, also introduces a class extension
    Plus,
    /// `-`, also unary negation
    Minus,
    /// `*`, also marks a class method
    Asterisk,
    /// `=`
    Assign,
    /// `<`
    LessThan,
    /// `>`
    GreaterThan,
    /// `|`
    Pipe,
    /// `<>`
    ReadWriteVar,
    /// `<-`
    LeftArrow,
    /// Any other run of operator characters
    Binop,
    /// Identifier immediately followed by `:`
    Keyword,

    // Delimiters
    /// `(`
    OpenParen,
    /// `)`
    CloseParen,
    /// `{`
    OpenCurly,
    /// `}`
    CloseCurly,
    /// `[`
    OpenSquare,
    /// `]`
    CloseSquare,
    /// `,`
    Comma,
    /// `;`
    Semicolon,
    /// `:`
    Colon,
    /// `^`
    Caret,
    /// `~`
    Tilde,
    /// `#`
    Hash,
    /// `` ` ``
    Grave,

    // Reserved words
    /// `var`
    Var,
    /// `arg`
    Arg,
    /// `const`
    Const,
    /// `classvar`
    ClassVar,
    /// `if`
    If,
    /// `while`
    While,

    /// Lowercase identifier
    Identifier,
    /// Capitalized identifier
    ClassName,
    /// `.`
    Dot,
    /// `..`
    DotDot,
    /// `...`
    Ellipses,
    /// `_` placeholder for partial application
    CurryArgument,

    /// End of input
    Eof,
}

impl TokenKind {
    /// True for tokens the parser may treat as a binary operator.
    pub fn could_be_binop(self) -> bool {
        matches!(
            self,
            TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Asterisk
                | TokenKind::Assign
                | TokenKind::LessThan
                | TokenKind::GreaterThan
                | TokenKind::Pipe
                | TokenKind::ReadWriteVar
                | TokenKind::LeftArrow
                | TokenKind::Binop
                | TokenKind::Keyword
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Literal => "literal",
            TokenKind::String => "string",
            TokenKind::Primitive => "primitive",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Asterisk => "'*'",
            TokenKind::Assign => "'='",
            TokenKind::LessThan => "'<'",
            TokenKind::GreaterThan => "'>'",
            TokenKind::Pipe => "'|'",
            TokenKind::ReadWriteVar => "'<>'",
            TokenKind::LeftArrow => "'<-'",
            TokenKind::Binop => "binary operator",
            TokenKind::Keyword => "keyword",
            TokenKind::OpenParen => "'('",
            TokenKind::CloseParen => "')'",
            TokenKind::OpenCurly => "'{'",
            TokenKind::CloseCurly => "'}'",
            TokenKind::OpenSquare => "'['",
            TokenKind::CloseSquare => "']'",
            TokenKind::Comma => "','",
            TokenKind::Semicolon => "';'",
            TokenKind::Colon => "':'",
            TokenKind::Caret => "'^'",
            TokenKind::Tilde => "'~'",
            TokenKind::Hash => "'#'",
            TokenKind::Grave => "'`'",
            TokenKind::Var => "'var'",
            TokenKind::Arg => "'arg'",
            TokenKind::Const => "'const'",
            TokenKind::ClassVar => "'classvar'",
            TokenKind::If => "'if'",
            TokenKind::While => "'while'",
            TokenKind::Identifier => "identifier",
            TokenKind::ClassName => "class name",
            TokenKind::Dot => "'.'",
            TokenKind::DotDot => "'..'",
            TokenKind::Ellipses => "'...'",
            TokenKind::CurryArgument => "'_'",
            TokenKind::Eof => "end of input",
        };
        write!(f, "{}", s)
    }
}

/// Which kind of value a literal token carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LiteralKind {
    /// Not a literal
    None,
    /// `nil`
    Nil,
    /// Integer literal
    Integer,
    /// Float literal
    Float,
    /// `true` / `false`
    Boolean,
    /// `$c`
    Char,
    /// `'sym'` or `\sym`; the value is resolved when the symbol is interned
    Symbol,
}

/// A lexed token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    /// Token kind
    pub kind: TokenKind,
    /// Full source span, including quotes and trailing colons
    pub span: Span,
    /// Decoded literal value; nil for non-literals and for strings/symbols
    pub value: Slot,
    /// Literal type when `kind` is `Literal`
    pub literal: LiteralKind,
    /// True if the parser may read this token as a binary operator
    pub could_be_binop: bool,
    /// True if a string or symbol contains at least one backslash escape
    pub has_escape: bool,
}

impl Token {
    /// Make a non-literal token.
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self {
            kind,
            span,
            value: Slot::NIL,
            literal: LiteralKind::None,
            could_be_binop: kind.could_be_binop(),
            has_escape: false,
        }
    }

    /// Make a literal token with a decoded value.
    pub fn literal(literal: LiteralKind, value: Slot, span: Span) -> Self {
        Self {
            kind: TokenKind::Literal,
            span,
            value,
            literal,
            could_be_binop: false,
            has_escape: false,
        }
    }

    /// Make a string or symbol token.
    pub fn text(kind: TokenKind, literal: LiteralKind, span: Span, has_escape: bool) -> Self {
        Self {
            kind,
            span,
            value: Slot::NIL,
            literal,
            could_be_binop: false,
            has_escape,
        }
    }

    /// The end-of-input marker.
    pub fn eof(span: Span) -> Self {
        Self::new(TokenKind::Eof, span)
    }

    /// Byte range of the token's name or contents.
    ///
    /// Strips the quotes of strings and quoted symbols, the backslash of
    /// `\symbol`, and the trailing colon of keywords.
    pub fn name_range(&self, source: &str) -> Range<usize> {
        let Span { start, end, .. } = self.span;
        match (self.kind, self.literal) {
            (TokenKind::String, _) => (start + 1)..end.saturating_sub(1).max(start + 1),
            (TokenKind::Literal, LiteralKind::Symbol) => {
                if source.as_bytes().get(start) == Some(&b'\\') {
                    (start + 1)..end
                } else {
                    (start + 1)..end.saturating_sub(1).max(start + 1)
                }
            }
            (TokenKind::Keyword, _) => start..end.saturating_sub(1).max(start),
            _ => start..end,
        }
    }

    /// Raw name or contents of the token as it appears in `source`.
    pub fn name<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.name_range(source)).unwrap_or("")
    }
}

/// Decode backslash escapes inside a string or symbol body.
///
/// `\t`, `\n`, `\r` map to control characters; a backslash before any other
/// character yields that character.
pub fn unescape(body: &str) -> String {
    let mut result = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => result.push('\t'),
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some(other) => result.push(other),
            None => break,
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binop_eligibility() {
        assert!(TokenKind::Plus.could_be_binop());
        assert!(TokenKind::Keyword.could_be_binop());
        assert!(!TokenKind::Identifier.could_be_binop());
        assert!(!TokenKind::Dot.could_be_binop());
    }

    #[test]
    fn test_name_range_strips_delimiters() {
        let source = "\"abc\" 'sym' \\quick key:";
        let string = Token::text(TokenKind::String, LiteralKind::None, Span::new(0, 5, 1, 1), false);
        assert_eq!(string.name(source), "abc");

        let quoted = Token::text(TokenKind::Literal, LiteralKind::Symbol, Span::new(6, 11, 1, 7), false);
        assert_eq!(quoted.name(source), "sym");

        let slash = Token::text(TokenKind::Literal, LiteralKind::Symbol, Span::new(12, 18, 1, 13), false);
        assert_eq!(slash.name(source), "quick");

        let keyword = Token::new(TokenKind::Keyword, Span::new(19, 23, 1, 20));
        assert_eq!(keyword.name(source), "key");
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a\\tb"), "a\tb");
        assert_eq!(unescape("\\\"quoted\\\""), "\"quoted\"");
        assert_eq!(unescape("back\\\\slash"), "back\\slash");
        assert_eq!(unescape("\\q"), "q");
    }
}
