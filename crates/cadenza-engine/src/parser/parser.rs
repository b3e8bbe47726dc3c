//! Recursive descent parser
//!
//! Produces a [`ParseTree`] from source text. Interpreted code parses into a
//! single `Block` node; class files parse into a chain of `Class` and
//! `ClassExt` nodes.

pub mod class;
pub mod expr;
pub mod guards;

use crate::parser::error::{LexError, ParseError};
use crate::parser::lexer::Lexer;
use crate::parser::node::{chain, Node, NodeKind};
use crate::parser::token::{Span, Token, TokenKind};

use guards::{DepthCounter, LoopGuard};

/// Tokens plus the tree built over them.
#[derive(Debug, Clone)]
pub struct ParseTree {
    /// Every token, ending with `Eof`
    pub tokens: Vec<Token>,
    /// First top-level node
    pub root: Box<Node>,
}

/// Either stage of the front end can fail.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrontEndError {
    /// Tokenization failed
    #[error("{0}")]
    Lex(#[from] LexError),
    /// Parsing failed
    #[error("{0}")]
    Parse(#[from] ParseError),
}

/// Parser state.
pub struct Parser<'a> {
    /// Source text the tokens index into
    source: &'a str,
    /// Pre-tokenized input
    tokens: Vec<Token>,
    /// Current position in token stream
    pos: usize,
    /// Recursion depth tracker
    depth: DepthCounter,
    /// Set while parsing `|a = x|` defaults, where `|` closes the list
    in_pipe_arguments: bool,
}

impl<'a> Parser<'a> {
    /// Lex `source` and create a parser over its tokens.
    pub fn new(source: &'a str) -> Result<Self, LexError> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self::from_tokens(source, tokens))
    }

    /// Create a parser over an existing token list; it must end with `Eof`.
    pub fn from_tokens(source: &'a str, mut tokens: Vec<Token>) -> Self {
        if tokens.last().map(|t| t.kind) != Some(TokenKind::Eof) {
            let end = source.len();
            tokens.push(Token::eof(Span::new(end, end, 0, 0)));
        }
        Self {
            source,
            tokens,
            pos: 0,
            depth: DepthCounter::default(),
            in_pipe_arguments: false,
        }
    }

    /// Parse interpreted code: optional variable declarations, an
    /// expression sequence, and an optional final `^return`.
    pub fn parse_interpreter(mut self) -> Result<ParseTree, ParseError> {
        let variables = self.parse_var_lists()?;
        let body = self.parse_statements(TokenKind::Eof)?;
        self.expect(TokenKind::Eof)?;
        let root = Node::new(
            0,
            NodeKind::Block {
                arguments: None,
                variables,
                primitive: None,
                body,
            },
        );
        Ok(ParseTree {
            tokens: self.tokens,
            root,
        })
    }

    /// Parse a class file: class definitions and `+ Class { }` extensions.
    pub fn parse_class(mut self) -> Result<ParseTree, ParseError> {
        let mut classes = Vec::new();
        let mut guard = LoopGuard::new("class file");
        while !self.at_eof() {
            guard.check(self.current_span())?;
            classes.push(class::parse_class_or_extension(&mut self)?);
        }
        let root = chain(classes).unwrap_or_else(|| Node::new(0, NodeKind::Empty));
        Ok(ParseTree {
            tokens: self.tokens,
            root,
        })
    }

    // ========================================================================
    // Token Management
    // ========================================================================

    /// Source text.
    #[inline]
    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Index of the current token.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get the current token.
    #[inline]
    pub fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    /// Kind of the current token.
    #[inline]
    pub fn current_kind(&self) -> TokenKind {
        self.tokens[self.pos].kind
    }

    /// Get the current token's span.
    #[inline]
    pub fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    /// Kind of the token `offset` positions ahead.
    #[inline]
    pub fn peek_kind(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    /// Token at an absolute index.
    #[inline]
    pub fn token(&self, index: usize) -> &Token {
        &self.tokens[index]
    }

    /// Advance to the next token, returning the index of the consumed one.
    pub fn advance(&mut self) -> usize {
        let index = self.pos;
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        index
    }

    /// Check if the current token matches the given kind.
    #[inline]
    pub fn check(&self, kind: TokenKind) -> bool {
        self.current_kind() == kind
    }

    /// Check if we've reached EOF.
    #[inline]
    pub fn at_eof(&self) -> bool {
        self.check(TokenKind::Eof)
    }

    /// Consume the current token if it has the given kind.
    pub fn eat(&mut self, kind: TokenKind) -> Option<usize> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    /// Consume a token of the expected kind or fail.
    pub fn expect(&mut self, kind: TokenKind) -> Result<usize, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&[kind]))
        }
    }

    /// Consume the closing delimiter matching the one at `open`.
    pub fn expect_close(&mut self, open: usize, close: TokenKind) -> Result<usize, ParseError> {
        if self.check(close) {
            return Ok(self.advance());
        }
        if self.at_eof() {
            let open_token = &self.tokens[open];
            return Err(ParseError::unclosed_delimiter(open_token.kind, close, open_token.span));
        }
        Err(self.unexpected(&[close]))
    }

    /// Error for the current token given what was acceptable.
    pub fn unexpected(&self, expected: &[TokenKind]) -> ParseError {
        if self.at_eof() {
            ParseError::unexpected_eof(expected.to_vec(), self.current_span())
        } else {
            ParseError::unexpected_token(expected.to_vec(), self.current_kind(), self.current_span())
        }
    }

    /// Enter one level of recursion.
    pub fn enter(&mut self, name: &'static str) -> Result<(), ParseError> {
        let span = self.current_span();
        self.depth.enter(name, span)
    }

    /// Leave one level of recursion.
    pub fn leave(&mut self) {
        self.depth.leave();
    }

    // ========================================================================
    // Shared productions
    // ========================================================================

    /// Parse `var a, b = 1;` lists until none remain.
    pub fn parse_var_lists(&mut self) -> Result<Option<Box<Node>>, ParseError> {
        let mut lists = Vec::new();
        let mut guard = LoopGuard::new("var lists");
        while self.check(TokenKind::Var) {
            guard.check(self.current_span())?;
            let token = self.advance();
            let definitions = self.parse_var_defs(false)?;
            self.expect(TokenKind::Semicolon)?;
            lists.push(Node::new(token, NodeKind::VarList { definitions }));
        }
        Ok(chain(lists))
    }

    /// Parse `name [= expr] {, name [= expr]}`.
    ///
    /// In pipe argument lists the initializer is a single operand so that the
    /// closing `|` is not read as an operator.
    pub fn parse_var_defs(&mut self, pipe_form: bool) -> Result<Option<Box<Node>>, ParseError> {
        let mut definitions = Vec::new();
        let mut guard = LoopGuard::new("var definitions");
        loop {
            guard.check(self.current_span())?;
            let token = self.expect(TokenKind::Identifier)?;
            let initial_value = if self.eat(TokenKind::Assign).is_some() {
                let saved = self.in_pipe_arguments;
                self.in_pipe_arguments = pipe_form;
                let value = if pipe_form {
                    expr::parse_postfix(self)
                } else {
                    expr::parse_expression(self)
                };
                self.in_pipe_arguments = saved;
                Some(value?)
            } else {
                None
            };
            definitions.push(Node::new(
                token,
                NodeKind::VarDef {
                    has_read_accessor: false,
                    has_write_accessor: false,
                    initial_value,
                },
            ));
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        Ok(chain(definitions))
    }

    /// True while parsing pipe-delimited argument defaults.
    pub fn in_pipe_arguments(&self) -> bool {
        self.in_pipe_arguments
    }

    /// Parse block arguments in either `|a, b|` or `arg a, b;` form.
    pub fn parse_arguments(&mut self) -> Result<Option<Box<Node>>, ParseError> {
        let (token, close) = match self.current_kind() {
            TokenKind::Pipe => (self.advance(), TokenKind::Pipe),
            TokenKind::Arg => (self.advance(), TokenKind::Semicolon),
            _ => return Ok(None),
        };
        let pipe_form = close == TokenKind::Pipe;

        let mut var_list = None;
        if self.check(TokenKind::Identifier) {
            let definitions = self.parse_var_defs(pipe_form)?;
            var_list = Some(Node::new(token, NodeKind::VarList { definitions }));
        }

        let mut var_args_name = None;
        if self.eat(TokenKind::Ellipses).is_some() {
            var_args_name = Some(self.expect(TokenKind::Identifier)?);
        }
        self.expect(close)?;

        Ok(Some(Node::new(
            token,
            NodeKind::ArgList {
                var_list,
                var_args_name,
            },
        )))
    }

    /// Parse the inside of `{ ... }` after the opening brace, through the
    /// closing brace.
    pub fn parse_block_body(&mut self, open: usize) -> Result<Box<Node>, ParseError> {
        self.enter("block")?;
        let arguments = self.parse_arguments()?;
        let variables = self.parse_var_lists()?;
        let primitive = match self.eat(TokenKind::Primitive) {
            Some(index) => {
                self.eat(TokenKind::Semicolon);
                Some(index)
            }
            None => None,
        };
        let body = self.parse_statements(TokenKind::CloseCurly)?;
        self.expect_close(open, TokenKind::CloseCurly)?;
        self.leave();
        Ok(Node::new(
            open,
            NodeKind::Block {
                arguments,
                variables,
                primitive,
                body,
            },
        ))
    }

    /// Parse `expr; expr; ^expr` up to (not including) `end`.
    ///
    /// Returns an `ExprSeq` node, or `None` when the sequence is empty.
    pub fn parse_statements(&mut self, end: TokenKind) -> Result<Option<Box<Node>>, ParseError> {
        let start = self.pos;
        let mut expressions = Vec::new();
        let mut guard = LoopGuard::new("statements");
        while !self.check(end) && !self.at_eof() {
            guard.check(self.current_span())?;
            if let Some(caret) = self.eat(TokenKind::Caret) {
                let value = expr::parse_expression(self)?;
                self.eat(TokenKind::Semicolon);
                expressions.push(Node::new(caret, NodeKind::Return { value: Some(value) }));
                if !self.check(end) {
                    return Err(self.unexpected(&[end]));
                }
                break;
            }
            expressions.push(expr::parse_expression(self)?);
            if self.eat(TokenKind::Semicolon).is_none() {
                break;
            }
        }
        if expressions.is_empty() {
            return Ok(None);
        }
        Ok(Some(Node::new(
            start,
            NodeKind::ExprSeq {
                expr: chain(expressions),
            },
        )))
    }
}

/// Parse interpreted code.
pub fn parse_interpreter(source: &str) -> Result<ParseTree, FrontEndError> {
    Ok(Parser::new(source)?.parse_interpreter()?)
}

/// Parse a class file.
pub fn parse_class_file(source: &str) -> Result<ParseTree, FrontEndError> {
    Ok(Parser::new(source)?.parse_class()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::node::iter_chain;

    fn body_of(tree: &ParseTree) -> Vec<&Node> {
        match &tree.root.kind {
            NodeKind::Block { body: Some(body), .. } => match &body.kind {
                NodeKind::ExprSeq { expr } => iter_chain(expr).collect(),
                _ => panic!("body is not a sequence"),
            },
            other => panic!("unexpected root {:?}", other),
        }
    }

    #[test]
    fn test_parser_advance_stops_at_eof() {
        let mut parser = Parser::new("a").unwrap();
        assert_eq!(parser.advance(), 0);
        assert!(parser.at_eof());
        assert_eq!(parser.advance(), 1);
        assert!(parser.at_eof());
    }

    #[test]
    fn test_empty_interpreter_code() {
        let tree = parse_interpreter("").unwrap();
        assert!(matches!(tree.root.kind, NodeKind::Block { body: None, .. }));
    }

    #[test]
    fn test_var_declarations() {
        let tree = parse_interpreter("var x = 2, y; x").unwrap();
        let NodeKind::Block { variables: Some(vars), .. } = &tree.root.kind else {
            panic!("expected variables");
        };
        let NodeKind::VarList { definitions } = &vars.kind else {
            panic!("expected var list");
        };
        assert_eq!(iter_chain(definitions).count(), 2);
        assert_eq!(body_of(&tree).len(), 1);
    }

    #[test]
    fn test_trailing_return() {
        let tree = parse_interpreter("1; ^2").unwrap();
        let body = body_of(&tree);
        assert_eq!(body.len(), 2);
        assert!(matches!(body[1].kind, NodeKind::Return { .. }));
    }

    #[test]
    fn test_return_must_be_last() {
        assert!(parse_interpreter("^1; 2").is_err());
    }

    #[test]
    fn test_unclosed_block() {
        let err = parse_interpreter("{ 1 + 2").unwrap_err();
        let FrontEndError::Parse(err) = err else {
            panic!("expected parse error");
        };
        assert!(matches!(err.kind, crate::parser::error::ParseErrorKind::UnclosedDelimiter { .. }));
    }

    #[test]
    fn test_block_arguments_both_forms() {
        for source in ["{ |a, b = 2| a }", "{ arg a, b = 2; a }"] {
            let tree = parse_interpreter(source).unwrap();
            let body = body_of(&tree);
            let NodeKind::Block { arguments: Some(args), .. } = &body[0].kind else {
                panic!("expected block with arguments in {}", source);
            };
            let NodeKind::ArgList { var_list: Some(list), .. } = &args.kind else {
                panic!("expected var list");
            };
            let NodeKind::VarList { definitions } = &list.kind else {
                panic!("expected definitions");
            };
            assert_eq!(iter_chain(definitions).count(), 2);
        }
    }

    #[test]
    fn test_variadic_arguments() {
        let tree = parse_interpreter("{ |a ... rest| rest }").unwrap();
        let body = body_of(&tree);
        let NodeKind::Block { arguments: Some(args), .. } = &body[0].kind else {
            panic!("expected block");
        };
        assert!(matches!(args.kind, NodeKind::ArgList { var_args_name: Some(_), .. }));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let source = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(parse_interpreter(&source).is_err());
    }
}
