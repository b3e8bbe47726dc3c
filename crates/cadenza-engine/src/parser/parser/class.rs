//! Class file parsing
//!
//! ```text
//! ClassName [ '[' slotName ']' ] [ ':' Superclass ] {
//!     classvar <a, >b = 1;
//!     var <>c;
//!     const d = 3;
//!     method { |args| body }
//!     * classMethod { body }
//! }
//! + ClassName { methods }
//! ```

use super::guards::LoopGuard;
use super::Parser;
use crate::parser::error::ParseError;
use crate::parser::node::{chain, Node, NodeKind};
use crate::parser::token::TokenKind;

/// Parse one class definition or class extension.
pub fn parse_class_or_extension(parser: &mut Parser<'_>) -> Result<Box<Node>, ParseError> {
    if parser.eat(TokenKind::Plus).is_some() {
        let name = parser.expect(TokenKind::ClassName)?;
        let open = parser.expect(TokenKind::OpenCurly)?;
        let methods = parse_methods(parser)?;
        parser.expect_close(open, TokenKind::CloseCurly)?;
        return Ok(Node::new(name, NodeKind::ClassExt { methods }));
    }

    let name = parser.expect(TokenKind::ClassName)?;

    let optional_name = match parser.eat(TokenKind::OpenSquare) {
        Some(open) => {
            let slot = parser.expect(TokenKind::Identifier)?;
            parser.expect_close(open, TokenKind::CloseSquare)?;
            Some(slot)
        }
        None => None,
    };

    let superclass = match parser.eat(TokenKind::Colon) {
        Some(_) => Some(parser.expect(TokenKind::ClassName)?),
        None => None,
    };

    let open = parser.expect(TokenKind::OpenCurly)?;
    let variables = parse_class_variables(parser)?;
    let methods = parse_methods(parser)?;
    parser.expect_close(open, TokenKind::CloseCurly)?;

    Ok(Node::new(
        name,
        NodeKind::Class {
            superclass,
            optional_name,
            variables,
            methods,
        },
    ))
}

/// Parse `classvar`, `var`, and `const` lists at the top of a class body.
fn parse_class_variables(parser: &mut Parser<'_>) -> Result<Option<Box<Node>>, ParseError> {
    let mut lists = Vec::new();
    let mut guard = LoopGuard::new("class variables");
    while matches!(
        parser.current_kind(),
        TokenKind::ClassVar | TokenKind::Var | TokenKind::Const
    ) {
        guard.check(parser.current_span())?;
        let token = parser.advance();
        let definitions = parse_class_var_defs(parser)?;
        parser.expect(TokenKind::Semicolon)?;
        lists.push(Node::new(token, NodeKind::VarList { definitions }));
    }
    Ok(chain(lists))
}

/// Parse `[<|>|<>] name [= literal] {, ...}`.
fn parse_class_var_defs(parser: &mut Parser<'_>) -> Result<Option<Box<Node>>, ParseError> {
    let mut definitions = Vec::new();
    let mut guard = LoopGuard::new("class variable definitions");
    loop {
        guard.check(parser.current_span())?;
        let (has_read_accessor, has_write_accessor) = match parser.current_kind() {
            TokenKind::LessThan => {
                parser.advance();
                (true, false)
            }
            TokenKind::GreaterThan => {
                parser.advance();
                (false, true)
            }
            TokenKind::ReadWriteVar => {
                parser.advance();
                (true, true)
            }
            _ => (false, false),
        };
        let token = parser.expect(TokenKind::Identifier)?;
        let initial_value = if parser.eat(TokenKind::Assign).is_some() {
            Some(super::expr::parse_primary(parser)?)
        } else {
            None
        };
        definitions.push(Node::new(
            token,
            NodeKind::VarDef {
                has_read_accessor,
                has_write_accessor,
                initial_value,
            },
        ));
        if parser.eat(TokenKind::Comma).is_none() {
            break;
        }
    }
    Ok(chain(definitions))
}

/// Parse methods until the closing brace of the class body.
fn parse_methods(parser: &mut Parser<'_>) -> Result<Option<Box<Node>>, ParseError> {
    let mut methods = Vec::new();
    let mut guard = LoopGuard::new("methods");
    while !parser.check(TokenKind::CloseCurly) && !parser.at_eof() {
        guard.check(parser.current_span())?;
        methods.push(parse_method(parser)?);
    }
    Ok(chain(methods))
}

/// Parse `['*'] selector { body }`.
fn parse_method(parser: &mut Parser<'_>) -> Result<Box<Node>, ParseError> {
    // `* {` is the binop method named `*`, not a class method marker.
    let is_class_method = parser.check(TokenKind::Asterisk) && parser.peek_kind(1) != TokenKind::OpenCurly;
    if is_class_method {
        parser.advance();
    }

    let selector_kind = parser.current_kind();
    let is_selector = selector_kind == TokenKind::Identifier
        || (selector_kind.could_be_binop() && selector_kind != TokenKind::Keyword);
    if !is_selector {
        return Err(parser.unexpected(&[TokenKind::Identifier, TokenKind::Binop]));
    }
    let selector = parser.advance();

    let open = parser.expect(TokenKind::OpenCurly)?;
    let mut body = parser.parse_block_body(open)?;

    // The primitive belongs to the method, not to its body block.
    let primitive = match &mut body.kind {
        NodeKind::Block { primitive, .. } => primitive.take(),
        _ => None,
    };

    Ok(Node::new(
        selector,
        NodeKind::Method {
            is_class_method,
            primitive,
            body,
        },
    ))
}
