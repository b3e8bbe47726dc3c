//! Lexer for the Cadenza language.
//!
//! Whitespace and comments are skipped by hand so that nested block comments
//! and the "operator run starting with `//` or `/*`" rule are easy to get
//! right; every other token is recognized by a logos automaton run on the
//! remaining input. The first error stops lexing.

use cadenza_sdk::Slot;
use logos::Logos;

use crate::parser::error::{LexError, LexErrorKind};
use crate::parser::token::{LiteralKind, Span, Token, TokenKind};

/// Decoded numeric literal.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Integer(i32),
    Float(f64),
}

/// Logos-based token enum for lexing.
///
/// Converted to [`Token`] after lexing.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexErrorKind)]
enum LogosToken {
    // Reserved words (must come before identifiers)
    #[token("var")]
    Var,

    #[token("arg")]
    Arg,

    #[token("classvar")]
    ClassVar,

    #[token("const")]
    Const,

    #[token("if")]
    If,

    #[token("while")]
    While,

    #[token("nil")]
    Nil,

    #[token("true")]
    True,

    #[token("false")]
    False,

    // Numbers
    #[regex(r"[0-9]+", parse_decimal)]
    #[regex(r"[0-9]+\.[0-9]+", parse_float)]
    #[regex(r"[0-9]+(\.[0-9]+)?[eE][+\-]?[0-9]+", parse_float)]
    #[regex(r"0x[0-9a-fA-F]+", parse_hex)]
    #[regex(r"[0-9]+r[0-9a-zA-Z]+(\.[0-9a-zA-Z]+)?", parse_radix)]
    Number(Number),

    // Names
    #[regex(r"[a-z][a-zA-Z0-9_]*")]
    Identifier,

    #[regex(r"[a-z][a-zA-Z0-9_]*:")]
    Keyword,

    #[regex(r"[A-Z][a-zA-Z0-9_]*")]
    ClassName,

    #[regex(r"_[A-Z][a-zA-Z0-9_]*")]
    Primitive,

    #[token("_")]
    CurryArgument,

    // Text
    #[regex(r#""([^"\\]|\\(.|\n))*""#, has_escape)]
    String(bool),

    #[regex(r"'([^'\\]|\\(.|\n))*'", has_escape)]
    QuotedSymbol(bool),

    #[regex(r"\\[a-zA-Z_][a-zA-Z0-9_]*")]
    SlashSymbol,

    #[regex(r"\$[^\\]", parse_char)]
    #[regex(r"\$\\(.|\n)", parse_escaped_char)]
    Char(u8),

    // Operators
    #[regex(r"[!@%&*\-+=|<>?/]+", classify_operator)]
    Operator(TokenKind),

    // Delimiters
    #[token("(")]
    OpenParen,

    #[token(")")]
    CloseParen,

    #[token("{")]
    OpenCurly,

    #[token("}")]
    CloseCurly,

    #[token("[")]
    OpenSquare,

    #[token("]")]
    CloseSquare,

    #[token(",")]
    Comma,

    #[token(";")]
    Semicolon,

    #[token(":")]
    Colon,

    #[token("^")]
    Caret,

    #[token("~")]
    Tilde,

    #[token("#")]
    Hash,

    #[token("`")]
    Grave,

    #[token(".")]
    Dot,

    #[token("..")]
    DotDot,

    #[token("...")]
    Ellipses,

    #[regex(r"\.\.\.\.+", too_many_dots)]
    TooManyDots,
}

fn parse_decimal(lex: &mut logos::Lexer<LogosToken>) -> Result<Number, LexErrorKind> {
    let slice = lex.slice();
    match slice.parse::<i32>() {
        Ok(i) => Ok(Number::Integer(i)),
        // Integers too wide for 32 bits degrade to floats.
        Err(_) => slice
            .parse::<f64>()
            .map(Number::Float)
            .map_err(|_| LexErrorKind::InvalidNumber),
    }
}

fn parse_float(lex: &mut logos::Lexer<LogosToken>) -> Result<Number, LexErrorKind> {
    lex.slice()
        .parse::<f64>()
        .map(Number::Float)
        .map_err(|_| LexErrorKind::InvalidNumber)
}

fn parse_hex(lex: &mut logos::Lexer<LogosToken>) -> Result<Number, LexErrorKind> {
    let digits = &lex.slice()[2..];
    match u64::from_str_radix(digits, 16) {
        Ok(value) if value <= u32::MAX as u64 => Ok(Number::Integer(value as u32 as i32)),
        Ok(value) => Ok(Number::Float(value as f64)),
        Err(_) => Err(LexErrorKind::InvalidNumber),
    }
}

fn radix_digit(c: u8) -> Option<u32> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as u32),
        b'a'..=b'z' => Some((c - b'a') as u32 + 10),
        b'A'..=b'Z' => Some((c - b'A') as u32 + 10),
        _ => None,
    }
}

fn parse_radix(lex: &mut logos::Lexer<LogosToken>) -> Result<Number, LexErrorKind> {
    let slice = lex.slice();
    let (base, rest) = slice.split_once('r').ok_or(LexErrorKind::InvalidNumber)?;
    let base: u32 = base.parse().map_err(|_| LexErrorKind::InvalidNumber)?;
    if !(2..=36).contains(&base) {
        return Err(LexErrorKind::InvalidNumber);
    }
    let (whole, fraction) = match rest.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (rest, None),
    };

    let mut integer: i64 = 0;
    for c in whole.bytes() {
        let digit = radix_digit(c).filter(|d| *d < base).ok_or(LexErrorKind::InvalidNumber)?;
        integer = integer
            .checked_mul(base as i64)
            .and_then(|v| v.checked_add(digit as i64))
            .ok_or(LexErrorKind::InvalidNumber)?;
    }

    match fraction {
        None => match i32::try_from(integer) {
            Ok(i) => Ok(Number::Integer(i)),
            Err(_) => Ok(Number::Float(integer as f64)),
        },
        Some(fraction) => {
            let mut value = integer as f64;
            let mut scale = 1.0 / base as f64;
            for c in fraction.bytes() {
                let digit =
                    radix_digit(c).filter(|d| *d < base).ok_or(LexErrorKind::InvalidNumber)?;
                value += digit as f64 * scale;
                scale /= base as f64;
            }
            Ok(Number::Float(value))
        }
    }
}

fn has_escape(lex: &mut logos::Lexer<LogosToken>) -> bool {
    lex.slice().contains('\\')
}

fn parse_char(lex: &mut logos::Lexer<LogosToken>) -> u8 {
    lex.slice().as_bytes()[1]
}

fn parse_escaped_char(lex: &mut logos::Lexer<LogosToken>) -> u8 {
    match lex.slice().as_bytes()[2] {
        b't' => b'\t',
        b'n' => b'\n',
        b'r' => b'\r',
        other => other,
    }
}

fn classify_operator(lex: &mut logos::Lexer<LogosToken>) -> TokenKind {
    match lex.slice() {
        "+" => TokenKind::Plus,
        "-" => TokenKind::Minus,
        "*" => TokenKind::Asterisk,
        "=" => TokenKind::Assign,
        "<" => TokenKind::LessThan,
        ">" => TokenKind::GreaterThan,
        "|" => TokenKind::Pipe,
        "<>" => TokenKind::ReadWriteVar,
        "<-" => TokenKind::LeftArrow,
        _ => TokenKind::Binop,
    }
}

fn too_many_dots(_lex: &mut logos::Lexer<LogosToken>) -> Result<(), LexErrorKind> {
    Err(LexErrorKind::TooManyDots)
}

/// Main lexer structure.
pub struct Lexer<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    /// Create a lexer over `source`.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            tokens: Vec::new(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Lex the whole input. The token list always ends with an `Eof` token.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        loop {
            self.skip_whitespace_and_comments()?;
            if self.pos >= self.source.len() {
                break;
            }

            let mut logos_lexer = LogosToken::lexer(&self.source[self.pos..]);
            let Some(result) = logos_lexer.next() else {
                break;
            };
            let range = logos_lexer.span();
            let start = self.pos + range.start;
            let end = self.pos + range.end;
            let span = Span::new(start, end, self.line, self.column);

            match result {
                Ok(logos_token) => {
                    let token = Self::convert_token(logos_token, span);
                    self.tokens.push(token);
                }
                Err(kind) => return Err(self.error_at(kind, start, span)),
            }
            self.advance_to(end);
        }

        let eof = Span::new(self.source.len(), self.source.len(), self.line, self.column);
        self.tokens.push(Token::eof(eof));
        log::trace!("lexed {} tokens", self.tokens.len());
        Ok(self.tokens)
    }

    /// Turn a logos failure into an error with a specific kind where the
    /// offending character tells us more than "unexpected".
    fn error_at(&self, kind: LexErrorKind, start: usize, span: Span) -> LexError {
        let kind = match (kind, self.source.as_bytes().get(start)) {
            (LexErrorKind::UnexpectedCharacter, Some(b'"')) => LexErrorKind::UnterminatedString,
            (LexErrorKind::UnexpectedCharacter, Some(b'\'')) => LexErrorKind::UnterminatedSymbol,
            (LexErrorKind::UnexpectedCharacter, Some(b'$')) => LexErrorKind::UnterminatedChar,
            (kind, _) => kind,
        };
        let text = self.source[start..].chars().next().unwrap_or('\0');
        LexError::new(kind, span, text)
    }

    /// Move `pos` forward, keeping line and column up to date.
    fn advance_to(&mut self, end: usize) {
        for b in self.source.as_bytes()[self.pos..end].iter() {
            if *b == b'\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.pos = end;
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        let bytes = self.source.as_bytes();
        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b' ' | b'\t' | b'\r' | b'\n' => self.advance_to(self.pos + 1),
                b'/' if bytes.get(self.pos + 1) == Some(&b'/') => {
                    let end = bytes[self.pos..]
                        .iter()
                        .position(|b| *b == b'\n')
                        .map(|offset| self.pos + offset)
                        .unwrap_or(bytes.len());
                    self.advance_to(end);
                }
                b'/' if bytes.get(self.pos + 1) == Some(&b'*') => {
                    let start = self.pos;
                    let span = Span::new(start, start + 2, self.line, self.column);
                    let mut depth = 0usize;
                    let mut i = start;
                    loop {
                        if i + 1 >= bytes.len() {
                            return Err(LexError::new(LexErrorKind::UnterminatedComment, span, '/'));
                        }
                        match (bytes[i], bytes[i + 1]) {
                            (b'/', b'*') => {
                                depth += 1;
                                i += 2;
                            }
                            (b'*', b'/') => {
                                depth -= 1;
                                i += 2;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => i += 1,
                        }
                    }
                    self.advance_to(i);
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn convert_token(logos_token: LogosToken, span: Span) -> Token {
        match logos_token {
            LogosToken::Var => Token::new(TokenKind::Var, span),
            LogosToken::Arg => Token::new(TokenKind::Arg, span),
            LogosToken::ClassVar => Token::new(TokenKind::ClassVar, span),
            LogosToken::Const => Token::new(TokenKind::Const, span),
            LogosToken::If => Token::new(TokenKind::If, span),
            LogosToken::While => Token::new(TokenKind::While, span),
            LogosToken::Nil => Token::literal(LiteralKind::Nil, Slot::NIL, span),
            LogosToken::True => Token::literal(LiteralKind::Boolean, Slot::TRUE, span),
            LogosToken::False => Token::literal(LiteralKind::Boolean, Slot::FALSE, span),
            LogosToken::Number(Number::Integer(i)) => {
                Token::literal(LiteralKind::Integer, Slot::make_int32(i), span)
            }
            LogosToken::Number(Number::Float(f)) => {
                Token::literal(LiteralKind::Float, Slot::make_float(f), span)
            }
            LogosToken::Identifier => Token::new(TokenKind::Identifier, span),
            LogosToken::Keyword => Token::new(TokenKind::Keyword, span),
            LogosToken::ClassName => Token::new(TokenKind::ClassName, span),
            LogosToken::Primitive => Token::new(TokenKind::Primitive, span),
            LogosToken::CurryArgument => Token::new(TokenKind::CurryArgument, span),
            LogosToken::String(escape) => {
                Token::text(TokenKind::String, LiteralKind::None, span, escape)
            }
            LogosToken::QuotedSymbol(escape) => {
                Token::text(TokenKind::Literal, LiteralKind::Symbol, span, escape)
            }
            LogosToken::SlashSymbol => {
                Token::text(TokenKind::Literal, LiteralKind::Symbol, span, false)
            }
            LogosToken::Char(c) => Token::literal(LiteralKind::Char, Slot::make_char(c), span),
            LogosToken::Operator(kind) => Token::new(kind, span),
            LogosToken::OpenParen => Token::new(TokenKind::OpenParen, span),
            LogosToken::CloseParen => Token::new(TokenKind::CloseParen, span),
            LogosToken::OpenCurly => Token::new(TokenKind::OpenCurly, span),
            LogosToken::CloseCurly => Token::new(TokenKind::CloseCurly, span),
            LogosToken::OpenSquare => Token::new(TokenKind::OpenSquare, span),
            LogosToken::CloseSquare => Token::new(TokenKind::CloseSquare, span),
            LogosToken::Comma => Token::new(TokenKind::Comma, span),
            LogosToken::Semicolon => Token::new(TokenKind::Semicolon, span),
            LogosToken::Colon => Token::new(TokenKind::Colon, span),
            LogosToken::Caret => Token::new(TokenKind::Caret, span),
            LogosToken::Tilde => Token::new(TokenKind::Tilde, span),
            LogosToken::Hash => Token::new(TokenKind::Hash, span),
            LogosToken::Grave => Token::new(TokenKind::Grave, span),
            LogosToken::Dot => Token::new(TokenKind::Dot, span),
            LogosToken::DotDot => Token::new(TokenKind::DotDot, span),
            LogosToken::Ellipses => Token::new(TokenKind::Ellipses, span),
            // The callback always fails, so logos never yields this variant.
            LogosToken::TooManyDots => Token::new(TokenKind::Ellipses, span),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .expect("should lex")
            .iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
        assert_eq!(kinds("   \n\t "), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_radix_integers() {
        let tokens = Lexer::new("36rZIGZAG 2r01101011 16ra9").tokenize().unwrap();
        assert_eq!(tokens[0].value.get_int32(), Some(2147341480));
        assert_eq!(tokens[1].value.get_int32(), Some(107));
        assert_eq!(tokens[2].value.get_int32(), Some(169));
    }

    #[test]
    fn test_radix_float() {
        let tokens = Lexer::new("2r1.1").tokenize().unwrap();
        assert_eq!(tokens[0].literal, LiteralKind::Float);
        assert_eq!(tokens[0].value.get_float(), Some(1.5));
    }

    #[test]
    fn test_hex_wraps_to_int32() {
        let tokens = Lexer::new("0xdeadb33f").tokenize().unwrap();
        assert_eq!(tokens[0].value.get_int32(), Some(0xdeadb33fu32 as i32));
    }

    #[test]
    fn test_float_method_call() {
        let source = "1.23.asString";
        let tokens = Lexer::new(source).tokenize().unwrap();
        assert_eq!(tokens[0].value.get_float(), Some(1.23));
        assert_eq!(tokens[1].kind, TokenKind::Dot);
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
        assert_eq!(tokens[2].name(source), "asString");
    }

    #[test]
    fn test_nested_block_comment() {
        assert_eq!(
            kinds("1 /* outer /* inner */ still */ 2"),
            vec![TokenKind::Literal, TokenKind::Literal, TokenKind::Eof]
        );
    }

    #[test]
    fn test_operator_run_is_not_comment() {
        let source = "*/* */";
        let tokens = Lexer::new(source).tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Binop);
        assert_eq!(tokens[0].name(source), "*/*");
        assert_eq!(tokens[1].kind, TokenKind::Binop);
        assert_eq!(tokens[1].name(source), "*/");
    }

    #[test]
    fn test_four_dots_is_error() {
        let err = Lexer::new("a ....").tokenize().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::TooManyDots);
    }

    #[test]
    fn test_unterminated_comment() {
        let err = Lexer::new("/* never closed").tokenize().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedComment);
    }

    #[test]
    fn test_line_and_column() {
        let tokens = Lexer::new("a\n  b").tokenize().unwrap();
        assert_eq!((tokens[0].span.line, tokens[0].span.column), (1, 1));
        assert_eq!((tokens[1].span.line, tokens[1].span.column), (2, 3));
    }
}
