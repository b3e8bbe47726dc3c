//! Expression parsing
//!
//! Binary operators share one precedence level and associate to the left.
//! Postfix forms (`.msg(..)`, `[i]`, `.(..)`) bind tighter than any binary
//! operator.

use cadenza_sdk::Slot;

use super::guards::LoopGuard;
use super::Parser;
use crate::parser::error::ParseError;
use crate::parser::node::{chain, Node, NodeKind};
use crate::parser::token::{LiteralKind, TokenKind};

/// Parse an expression, including assignment forms.
pub fn parse_expression(parser: &mut Parser<'_>) -> Result<Box<Node>, ParseError> {
    parser.enter("expression")?;
    let result = parse_expression_inner(parser);
    parser.leave();
    result
}

fn parse_expression_inner(parser: &mut Parser<'_>) -> Result<Box<Node>, ParseError> {
    match parser.current_kind() {
        // name = value
        TokenKind::Identifier if parser.peek_kind(1) == TokenKind::Assign => {
            let name_token = parser.advance();
            parser.advance();
            let value = parse_expression(parser)?;
            let name = Node::new(name_token, NodeKind::Name { is_global: false });
            Ok(Node::new(name_token, NodeKind::Assign { name, value }))
        }
        // ~name = value
        TokenKind::Tilde
            if parser.peek_kind(1) == TokenKind::Identifier
                && parser.peek_kind(2) == TokenKind::Assign =>
        {
            parser.advance();
            let name_token = parser.advance();
            parser.advance();
            let value = parse_expression(parser)?;
            Ok(Node::new(name_token, NodeKind::EnvironmentPut { value }))
        }
        // #a, b ... rest = value
        TokenKind::Hash if parser.peek_kind(1) == TokenKind::Identifier => {
            parse_multi_assign(parser)
        }
        TokenKind::ClassName if parser.peek_kind(1) == TokenKind::Assign => {
            Err(ParseError::invalid_assignment_target(parser.current_span()))
        }
        _ => parse_binop_expression(parser),
    }
}

fn parse_multi_assign(parser: &mut Parser<'_>) -> Result<Box<Node>, ParseError> {
    let hash = parser.expect(TokenKind::Hash)?;
    let mut targets = Vec::new();
    let mut rest = None;
    let mut guard = LoopGuard::new("multi-assign targets");
    loop {
        guard.check(parser.current_span())?;
        if parser.eat(TokenKind::Ellipses).is_some() {
            rest = Some(parser.expect(TokenKind::Identifier)?);
            break;
        }
        targets.push(parser.expect(TokenKind::Identifier)?);
        if parser.eat(TokenKind::Comma).is_none() {
            if parser.eat(TokenKind::Ellipses).is_some() {
                rest = Some(parser.expect(TokenKind::Identifier)?);
            }
            break;
        }
    }
    parser.expect(TokenKind::Assign)?;
    let value = parse_expression(parser)?;
    Ok(Node::new(
        hash,
        NodeKind::MultiAssign {
            targets,
            rest,
            value,
        },
    ))
}

/// True when the current token continues a binary operator chain.
fn at_binop(parser: &Parser<'_>) -> bool {
    match parser.current_kind() {
        // `=` only ever assigns.
        TokenKind::Assign => false,
        TokenKind::Pipe => !parser.in_pipe_arguments(),
        kind => kind.could_be_binop(),
    }
}

/// Parse `operand {op [.adverb] operand}`.
pub fn parse_binop_expression(parser: &mut Parser<'_>) -> Result<Box<Node>, ParseError> {
    let mut left = parse_postfix(parser)?;
    let mut guard = LoopGuard::new("binop chain");
    while at_binop(parser) {
        guard.check(parser.current_span())?;
        let op = parser.advance();
        let adverb = if parser.check(TokenKind::Dot)
            && matches!(parser.peek_kind(1), TokenKind::Identifier | TokenKind::Literal)
        {
            parser.advance();
            Some(parse_primary(parser)?)
        } else {
            None
        };
        let right = parse_postfix(parser)?;
        left = Node::new(op, NodeKind::BinopCall { left, right, adverb });
    }
    Ok(left)
}

/// Arguments of a call: positional chain, keyword chain, and whether the
/// last positional argument was a `*spread`.
struct CallArguments {
    arguments: Vec<Box<Node>>,
    keyword_arguments: Vec<Box<Node>>,
    spread: bool,
}

/// Parse `( args )` followed by any trailing block literals.
fn parse_call_arguments(parser: &mut Parser<'_>) -> Result<CallArguments, ParseError> {
    let mut args = CallArguments {
        arguments: Vec::new(),
        keyword_arguments: Vec::new(),
        spread: false,
    };
    if let Some(open) = parser.eat(TokenKind::OpenParen) {
        let mut guard = LoopGuard::new("call arguments");
        while !parser.check(TokenKind::CloseParen) {
            guard.check(parser.current_span())?;
            if args.spread {
                return Err(ParseError::invalid_syntax(
                    "spread argument must be last",
                    parser.current_span(),
                ));
            }
            if parser.check(TokenKind::Keyword) {
                let key_token = parser.advance();
                let value = parse_expression(parser)?;
                let key = Node::new(key_token, NodeKind::Symbol);
                args.keyword_arguments
                    .push(Node::new(key_token, NodeKind::KeyValue { key, value }));
            } else if parser.eat(TokenKind::Asterisk).is_some() {
                args.arguments.push(parse_expression(parser)?);
                args.spread = true;
            } else {
                if !args.keyword_arguments.is_empty() {
                    return Err(ParseError::invalid_syntax(
                        "positional argument after keyword argument",
                        parser.current_span(),
                    ));
                }
                args.arguments.push(parse_expression(parser)?);
            }
            if parser.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        parser.expect_close(open, TokenKind::CloseParen)?;
    }
    // Trailing blocks: `x.do { |i| ... }`
    let mut guard = LoopGuard::new("trailing blocks");
    while let Some(open) = parser.eat(TokenKind::OpenCurly) {
        guard.check(parser.current_span())?;
        args.arguments.push(parser.parse_block_body(open)?);
    }
    Ok(args)
}

/// Build the node for `target.selector(args)`, recognizing the control flow
/// forms when their arguments are block literals.
fn make_call(
    selector: usize,
    selector_kind: TokenKind,
    target: Option<Box<Node>>,
    args: CallArguments,
) -> Box<Node> {
    let CallArguments {
        mut arguments,
        keyword_arguments,
        spread,
    } = args;

    // Normalize `if(c, t, f)` into `c.if(t, f)`.
    let receiver = match target {
        Some(target) => Some(target),
        None if !arguments.is_empty() => Some(arguments.remove(0)),
        None => None,
    };

    let receiver = match (spread, receiver) {
        (true, Some(receiver)) => {
            return Node::new(
                selector,
                NodeKind::PerformList {
                    target: receiver,
                    arguments: chain(arguments),
                },
            );
        }
        (_, receiver) => receiver,
    };

    let all_blocks = arguments.iter().all(|n| n.is_block());
    if keyword_arguments.is_empty() && all_blocks {
        return match (selector_kind, receiver) {
            (TokenKind::If, Some(condition)) if (1..=2).contains(&arguments.len()) => {
                let false_block = if arguments.len() == 2 { arguments.pop() } else { None };
                let true_block = arguments.remove(0);
                Node::new(
                    selector,
                    NodeKind::If {
                        condition,
                        true_block,
                        false_block,
                    },
                )
            }
            (TokenKind::While, Some(condition)) if condition.is_block() && arguments.len() <= 1 => {
                let repeat = arguments.into_iter().next();
                Node::new(selector, NodeKind::While { condition, repeat })
            }
            (_, receiver) => Node::new(
                selector,
                NodeKind::Call {
                    target: receiver,
                    arguments: chain(arguments),
                    keyword_arguments: None,
                },
            ),
        };
    }

    Node::new(
        selector,
        NodeKind::Call {
            target: receiver,
            arguments: chain(arguments),
            keyword_arguments: chain(keyword_arguments),
        },
    )
}

/// Parse a primary expression followed by any postfix forms.
pub fn parse_postfix(parser: &mut Parser<'_>) -> Result<Box<Node>, ParseError> {
    let mut node = parse_primary(parser)?;
    let mut guard = LoopGuard::new("postfix");
    loop {
        guard.check(parser.current_span())?;
        match parser.current_kind() {
            TokenKind::Dot => match parser.peek_kind(1) {
                TokenKind::Identifier | TokenKind::If | TokenKind::While => {
                    parser.advance();
                    let selector_kind = parser.current_kind();
                    let selector = parser.advance();
                    if parser.check(TokenKind::Assign) && selector_kind == TokenKind::Identifier {
                        parser.advance();
                        let value = parse_expression(parser)?;
                        return Ok(Node::new(selector, NodeKind::Setter { target: node, value }));
                    }
                    let args = parse_call_arguments(parser)?;
                    node = make_call(selector, selector_kind, Some(node), args);
                }
                TokenKind::OpenParen => {
                    let dot = parser.advance();
                    let args = parse_call_arguments(parser)?;
                    node = Node::new(
                        dot,
                        NodeKind::Value {
                            target: node,
                            arguments: chain(args.arguments),
                            keyword_arguments: chain(args.keyword_arguments),
                        },
                    );
                }
                _ => {
                    parser.advance();
                    return Err(parser.unexpected(&[TokenKind::Identifier, TokenKind::OpenParen]));
                }
            },
            TokenKind::OpenSquare => {
                node = parse_index(parser, node)?;
                if matches!(node.kind, NodeKind::ArrayWrite { .. }) {
                    return Ok(node);
                }
            }
            _ => return Ok(node),
        }
    }
}

/// Parse `[i]`, `[i] = v`, or `[a, b..c]` after `target`.
fn parse_index(parser: &mut Parser<'_>, target: Box<Node>) -> Result<Box<Node>, ParseError> {
    let open = parser.expect(TokenKind::OpenSquare)?;

    // `[..last]` copies from the start.
    if parser.eat(TokenKind::DotDot).is_some() {
        let last = if parser.check(TokenKind::CloseSquare) {
            None
        } else {
            Some(parse_expression(parser)?)
        };
        parser.expect_close(open, TokenKind::CloseSquare)?;
        let first = Node::new(open, NodeKind::Slot(Slot::make_int32(0)));
        return Ok(Node::new(
            open,
            NodeKind::CopySeries {
                target,
                first,
                second: None,
                last,
            },
        ));
    }

    let first = parse_expression(parser)?;
    let second = if parser.eat(TokenKind::Comma).is_some() {
        Some(parse_expression(parser)?)
    } else {
        None
    };

    if parser.eat(TokenKind::DotDot).is_some() {
        let last = if parser.check(TokenKind::CloseSquare) {
            None
        } else {
            Some(parse_expression(parser)?)
        };
        parser.expect_close(open, TokenKind::CloseSquare)?;
        return Ok(Node::new(
            open,
            NodeKind::CopySeries {
                target,
                first,
                second,
                last,
            },
        ));
    }

    if second.is_some() {
        return Err(ParseError::invalid_syntax(
            "expected '..' after series step",
            parser.current_span(),
        ));
    }
    parser.expect_close(open, TokenKind::CloseSquare)?;

    if parser.eat(TokenKind::Assign).is_some() {
        let value = parse_expression(parser)?;
        return Ok(Node::new(
            open,
            NodeKind::ArrayWrite {
                target,
                index: first,
                value,
            },
        ));
    }
    Ok(Node::new(open, NodeKind::ArrayRead { target, index: first }))
}

/// Parse the elements of `[a, b, c]` after the opening bracket.
fn parse_list_elements(parser: &mut Parser<'_>, open: usize) -> Result<Option<Box<Node>>, ParseError> {
    let mut elements = Vec::new();
    let mut guard = LoopGuard::new("list elements");
    while !parser.check(TokenKind::CloseSquare) {
        guard.check(parser.current_span())?;
        elements.push(parse_expression(parser)?);
        if parser.eat(TokenKind::Comma).is_none() {
            break;
        }
    }
    parser.expect_close(open, TokenKind::CloseSquare)?;
    Ok(chain(elements))
}

/// Parse `(k: v, ...)` after the opening paren.
fn parse_event(parser: &mut Parser<'_>, open: usize) -> Result<Box<Node>, ParseError> {
    let mut elements = Vec::new();
    let mut guard = LoopGuard::new("event elements");
    while !parser.check(TokenKind::CloseParen) {
        guard.check(parser.current_span())?;
        let key_token = parser.expect(TokenKind::Keyword)?;
        let key = Node::new(key_token, NodeKind::Symbol);
        let value = parse_expression(parser)?;
        elements.push(Node::new(key_token, NodeKind::KeyValue { key, value }));
        if parser.eat(TokenKind::Comma).is_none() {
            break;
        }
    }
    parser.expect_close(open, TokenKind::CloseParen)?;
    Ok(Node::new(
        open,
        NodeKind::Event {
            elements: chain(elements),
        },
    ))
}

/// Parse a primary expression.
pub fn parse_primary(parser: &mut Parser<'_>) -> Result<Box<Node>, ParseError> {
    let index = parser.position();
    match parser.current_kind() {
        TokenKind::Literal => {
            parser.advance();
            let token = parser.token(index);
            if token.literal == LiteralKind::Symbol {
                Ok(Node::new(index, NodeKind::Symbol))
            } else {
                Ok(Node::new(index, NodeKind::Slot(token.value)))
            }
        }
        TokenKind::String => {
            let mut pieces = vec![parser.advance()];
            while let Some(piece) = parser.eat(TokenKind::String) {
                pieces.push(piece);
            }
            Ok(Node::new(index, NodeKind::String { pieces }))
        }
        TokenKind::Minus => {
            parser.advance();
            let next = parser.current().clone();
            if next.kind == TokenKind::Literal
                && matches!(next.literal, LiteralKind::Integer | LiteralKind::Float)
            {
                parser.advance();
                let negated = match (next.value.get_int32(), next.value.get_float()) {
                    (Some(i), _) => Slot::make_int32(i.wrapping_neg()),
                    (None, Some(f)) => Slot::make_float(-f),
                    (None, None) => next.value,
                };
                return Ok(Node::new(index, NodeKind::Slot(negated)));
            }
            // `-x` sends `neg` to x; the minus token names the call.
            let operand = parse_postfix(parser)?;
            Ok(Node::new(
                index,
                NodeKind::Call {
                    target: Some(operand),
                    arguments: None,
                    keyword_arguments: None,
                },
            ))
        }
        TokenKind::Identifier => {
            parser.advance();
            if parser.check(TokenKind::OpenParen) {
                let args = parse_call_arguments(parser)?;
                return Ok(make_call(index, TokenKind::Identifier, None, args));
            }
            Ok(Node::new(index, NodeKind::Name { is_global: false }))
        }
        kind @ (TokenKind::If | TokenKind::While) => {
            parser.advance();
            if !matches!(parser.current_kind(), TokenKind::OpenParen | TokenKind::OpenCurly) {
                return Err(parser.unexpected(&[TokenKind::OpenParen]));
            }
            let args = parse_call_arguments(parser)?;
            Ok(make_call(index, kind, None, args))
        }
        TokenKind::ClassName => {
            parser.advance();
            let name = Node::new(index, NodeKind::Name { is_global: false });
            match parser.current_kind() {
                TokenKind::OpenParen => {
                    let args = parse_call_arguments(parser)?;
                    Ok(Node::new(
                        index,
                        NodeKind::New {
                            target: name,
                            arguments: chain(args.arguments),
                            keyword_arguments: chain(args.keyword_arguments),
                        },
                    ))
                }
                TokenKind::OpenSquare => {
                    let open = parser.advance();
                    let elements = parse_list_elements(parser, open)?;
                    Ok(Node::new(
                        index,
                        NodeKind::LiteralList {
                            class_name: Some(name),
                            elements,
                        },
                    ))
                }
                _ => Ok(name),
            }
        }
        TokenKind::Tilde => {
            parser.advance();
            let name = parser.expect(TokenKind::Identifier)?;
            Ok(Node::new(name, NodeKind::EnvironmentAt))
        }
        TokenKind::CurryArgument => {
            parser.advance();
            Ok(Node::new(index, NodeKind::CurryArgument))
        }
        TokenKind::OpenParen => {
            let open = parser.advance();
            if matches!(parser.current_kind(), TokenKind::Keyword | TokenKind::CloseParen) {
                return parse_event(parser, open);
            }
            parser.enter("parenthesized expression")?;
            let body = parser.parse_statements(TokenKind::CloseParen);
            parser.leave();
            let body = body?;
            parser.expect_close(open, TokenKind::CloseParen)?;
            Ok(body.unwrap_or_else(|| Node::new(open, NodeKind::Empty)))
        }
        TokenKind::OpenCurly => {
            let open = parser.advance();
            parser.parse_block_body(open)
        }
        TokenKind::OpenSquare => {
            let open = parser.advance();
            let elements = parse_list_elements(parser, open)?;
            Ok(Node::new(
                open,
                NodeKind::LiteralList {
                    class_name: None,
                    elements,
                },
            ))
        }
        TokenKind::Hash => {
            // Literal arrays `#[..]` and closed functions `#{..}`.
            parser.advance();
            match parser.current_kind() {
                TokenKind::OpenSquare => {
                    let open = parser.advance();
                    let elements = parse_list_elements(parser, open)?;
                    Ok(Node::new(
                        open,
                        NodeKind::LiteralList {
                            class_name: None,
                            elements,
                        },
                    ))
                }
                TokenKind::OpenCurly => {
                    let open = parser.advance();
                    parser.parse_block_body(open)
                }
                _ => Err(parser.unexpected(&[TokenKind::OpenSquare, TokenKind::OpenCurly])),
            }
        }
        _ => Err(parser.unexpected(&[
            TokenKind::Literal,
            TokenKind::Identifier,
            TokenKind::ClassName,
            TokenKind::OpenParen,
            TokenKind::OpenCurly,
            TokenKind::OpenSquare,
        ])),
    }
}
