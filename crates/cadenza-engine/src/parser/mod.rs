//! Cadenza front end: lexer and parser.
//!
//! Source text becomes a token list and then a [`ParseTree`] of [`Node`]s.
//! Nodes keep token indices rather than copies of names; use
//! [`Token::name`] against the source to recover them.
//!
//! # Example
//!
//! ```ignore
//! use cadenza_engine::parser::{parse_interpreter, NodeKind};
//!
//! let tree = parse_interpreter("var x = 4; x + 1").unwrap();
//! assert!(matches!(tree.root.kind, NodeKind::Block { .. }));
//! ```

pub mod error;
pub mod lexer;
pub mod node;
pub mod parser;
pub mod token;

pub use error::{LexError, LexErrorKind, ParseError, ParseErrorKind};
pub use lexer::Lexer;
pub use node::{Node, NodeKind};
pub use parser::{parse_class_file, parse_interpreter, FrontEndError, ParseTree, Parser};
pub use token::{LiteralKind, Span, Token, TokenKind};
