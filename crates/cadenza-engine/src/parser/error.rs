//! Lexer and parser error types

use std::fmt;

use crate::parser::token::{Span, TokenKind};

/// The kind of lex error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LexErrorKind {
    /// A character that starts no token
    #[default]
    UnexpectedCharacter,
    /// `"` with no closing quote
    UnterminatedString,
    /// `'` with no closing quote
    UnterminatedSymbol,
    /// `$` at end of input
    UnterminatedChar,
    /// `/*` with no matching `*/`
    UnterminatedComment,
    /// Malformed or out-of-range number
    InvalidNumber,
    /// Four or more dots in a row
    TooManyDots,
}

/// A lex error with its location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    /// The kind of error that occurred
    pub kind: LexErrorKind,
    /// Source location of the error
    pub span: Span,
    /// Human-readable error message
    pub message: String,
}

impl LexError {
    /// Create an error; `found` is the first offending character.
    pub fn new(kind: LexErrorKind, span: Span, found: char) -> Self {
        let message = match kind {
            LexErrorKind::UnexpectedCharacter => format!("Unexpected character '{}'", found),
            LexErrorKind::UnterminatedString => "Unterminated string literal".to_string(),
            LexErrorKind::UnterminatedSymbol => "Unterminated symbol literal".to_string(),
            LexErrorKind::UnterminatedChar => "Character literal missing its character".to_string(),
            LexErrorKind::UnterminatedComment => "Unterminated block comment".to_string(),
            LexErrorKind::InvalidNumber => "Invalid number literal".to_string(),
            LexErrorKind::TooManyDots => "Too many consecutive dots".to_string(),
        };
        Self {
            kind,
            span,
            message,
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lex error at {}: {}", self.span, self.message)
    }
}

impl std::error::Error for LexError {}

/// The kind of parse error.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    /// Unexpected token found
    UnexpectedToken {
        /// Tokens that would have been accepted
        expected: Vec<TokenKind>,
        /// Token actually found
        found: TokenKind,
    },

    /// Unexpected end of file
    UnexpectedEof {
        /// Tokens that would have been accepted
        expected: Vec<TokenKind>,
    },

    /// Missing closing delimiter
    UnclosedDelimiter {
        /// The opening delimiter
        open: TokenKind,
        /// The delimiter that should close it
        expected_close: TokenKind,
    },

    /// Left-hand side of `=` cannot be assigned to
    InvalidAssignmentTarget,

    /// Invalid syntax
    InvalidSyntax {
        /// Why the input is rejected
        reason: String,
    },

    /// Parser exceeded iteration/depth limit
    ParserLimitExceeded {
        /// Which limit was hit
        message: String,
    },
}

/// A parse error with its location.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// The kind of error that occurred
    pub kind: ParseErrorKind,

    /// Source location of the error
    pub span: Span,

    /// Human-readable error message
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse error at {}: {}", self.span, self.message)
    }
}

impl std::error::Error for ParseError {}

fn describe(kinds: &[TokenKind]) -> String {
    kinds
        .iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ParseError {
    /// Create an "unexpected token" error.
    pub fn unexpected_token(expected: Vec<TokenKind>, found: TokenKind, span: Span) -> Self {
        let message = if expected.len() == 1 {
            format!("Expected {}, found {}", expected[0], found)
        } else {
            format!("Expected one of {}, found {}", describe(&expected), found)
        };
        Self {
            kind: ParseErrorKind::UnexpectedToken { expected, found },
            span,
            message,
        }
    }

    /// Create an "unexpected EOF" error.
    pub fn unexpected_eof(expected: Vec<TokenKind>, span: Span) -> Self {
        let message = format!("Unexpected end of input, expected {}", describe(&expected));
        Self {
            kind: ParseErrorKind::UnexpectedEof { expected },
            span,
            message,
        }
    }

    /// Create an "unclosed delimiter" error.
    pub fn unclosed_delimiter(open: TokenKind, expected_close: TokenKind, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::UnclosedDelimiter {
                open,
                expected_close,
            },
            span,
            message: format!("Unclosed {}, expected {}", open, expected_close),
        }
    }

    /// Create an "invalid assignment target" error.
    pub fn invalid_assignment_target(span: Span) -> Self {
        Self {
            kind: ParseErrorKind::InvalidAssignmentTarget,
            span,
            message: "Invalid left-hand side in assignment".to_string(),
        }
    }

    /// Create an "invalid syntax" error.
    pub fn invalid_syntax(reason: impl Into<String>, span: Span) -> Self {
        let reason = reason.into();
        Self {
            message: format!("Invalid syntax: {}", reason),
            kind: ParseErrorKind::InvalidSyntax { reason },
            span,
        }
    }

    /// Create a "parser limit exceeded" error.
    pub fn parser_limit_exceeded(message: impl Into<String>, span: Span) -> Self {
        let message = message.into();
        Self {
            kind: ParseErrorKind::ParserLimitExceeded {
                message: message.clone(),
            },
            span,
            message: format!("Parser limit exceeded: {}", message),
        }
    }
}
