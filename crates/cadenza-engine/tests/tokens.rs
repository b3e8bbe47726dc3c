//! Front end tests: token streams and parse trees through the public API.

use cadenza_engine::parser::node::iter_chain;
use cadenza_engine::parser::{
    parse_class_file, parse_interpreter, FrontEndError, LexErrorKind, Lexer, LiteralKind, Node, NodeKind, TokenKind,
};
use cadenza_engine::Slot;

fn kinds(source: &str) -> Vec<TokenKind> {
    Lexer::new(source)
        .tokenize()
        .expect("should lex")
        .iter()
        .map(|t| t.kind)
        .collect()
}

fn statements(source: &str) -> Vec<Node> {
    let tree = parse_interpreter(source).expect("should parse");
    match tree.root.kind {
        NodeKind::Block { body: Some(body), .. } => match body.kind {
            NodeKind::ExprSeq { expr } => iter_chain(&expr).cloned().collect(),
            other => panic!("body is not a sequence: {:?}", other),
        },
        other => panic!("unexpected root {:?}", other),
    }
}

// =============================================================================
// TOKENS
// =============================================================================

mod tokens {
    use super::*;

    #[test]
    fn test_declaration_and_message() {
        assert_eq!(
            kinds("var x = 2; x + 3"),
            vec![
                TokenKind::Var,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::Literal,
                TokenKind::Semicolon,
                TokenKind::Identifier,
                TokenKind::Plus,
                TokenKind::Literal,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_literal_values() {
        let tokens = Lexer::new("nil true false 42 $a").tokenize().unwrap();
        assert_eq!(tokens[0].value, Slot::NIL);
        assert_eq!(tokens[1].value, Slot::TRUE);
        assert_eq!(tokens[2].value, Slot::FALSE);
        assert_eq!(tokens[3].value, Slot::make_int32(42));
        assert_eq!(tokens[3].literal, LiteralKind::Integer);
        assert_eq!(tokens[4].literal, LiteralKind::Char);
    }

    #[test]
    fn test_names_and_keywords() {
        let source = "Array foo key: _Basic";
        let tokens = Lexer::new(source).tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::ClassName);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[2].kind, TokenKind::Keyword);
        assert_eq!(tokens[2].name(source), "key");
        assert_eq!(tokens[3].kind, TokenKind::Primitive);
    }

    #[test]
    fn test_symbols_and_strings() {
        let source = "\\sym 'quoted sym' \"text\"";
        let tokens = Lexer::new(source).tokenize().unwrap();
        assert_eq!(tokens[0].literal, LiteralKind::Symbol);
        assert_eq!(tokens[0].name(source), "sym");
        assert_eq!(tokens[1].name(source), "quoted sym");
        assert_eq!(tokens[2].kind, TokenKind::String);
        assert_eq!(tokens[2].name(source), "text");
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("<> <- < > | == ->"),
            vec![
                TokenKind::ReadWriteVar,
                TokenKind::LeftArrow,
                TokenKind::LessThan,
                TokenKind::GreaterThan,
                TokenKind::Pipe,
                TokenKind::Binop,
                TokenKind::Binop,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("1 // line\n/* block */ 2"),
            vec![TokenKind::Literal, TokenKind::Literal, TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("x = \"open").tokenize().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
        assert_eq!(err.span.start, 4);
    }
}

// =============================================================================
// PARSE TREES
// =============================================================================

mod parse_trees {
    use super::*;

    #[test]
    fn test_binop_call() {
        let body = statements("1 + 2");
        assert_eq!(body.len(), 1);
        assert!(matches!(body[0].kind, NodeKind::BinopCall { .. }));
    }

    #[test]
    fn test_keyword_arguments_in_call() {
        let body = statements("f.value(1, key: 2)");
        let NodeKind::Call {
            arguments,
            keyword_arguments,
            ..
        } = &body[0].kind
        else {
            panic!("expected call, got {:?}", body[0].kind);
        };
        assert_eq!(iter_chain(arguments).count(), 1);
        assert_eq!(iter_chain(keyword_arguments).count(), 1);
    }

    #[test]
    fn test_adjacent_strings_join() {
        let body = statements("\"a\" \"b\" \"c\"");
        let NodeKind::String { pieces } = &body[0].kind else {
            panic!("expected string, got {:?}", body[0].kind);
        };
        assert_eq!(pieces.len(), 3);
    }

    #[test]
    fn test_if_and_while() {
        let body = statements("if(true, {1}, {2}); while({false}, {3})");
        assert!(matches!(body[0].kind, NodeKind::If { false_block: Some(_), .. }));
        assert!(matches!(body[1].kind, NodeKind::While { repeat: Some(_), .. }));
    }

    #[test]
    fn test_perform_list_and_new() {
        let body = statements("x.perform(*args); Array(4)");
        assert!(matches!(body[0].kind, NodeKind::PerformList { .. }));
        assert!(matches!(body[1].kind, NodeKind::New { .. }));
    }

    #[test]
    fn test_parse_error_has_span() {
        let FrontEndError::Parse(err) = parse_interpreter("(1 + 2").unwrap_err() else {
            panic!("expected a parse error");
        };
        assert_eq!(err.span.line, 1);
    }

    #[test]
    fn test_lex_error_passes_through() {
        assert!(matches!(parse_interpreter("$"), Err(FrontEndError::Lex(_))));
    }

    #[test]
    fn test_class_file_chain() {
        let source = "A { foo { ^1 } } B : A { var x; bar { ^x } } + A { baz { } }";
        let tree = parse_class_file(source).unwrap();
        let nodes: Vec<&Node> = tree.root.siblings().collect();
        assert_eq!(nodes.len(), 3);
        assert!(matches!(nodes[0].kind, NodeKind::Class { superclass: None, .. }));
        assert!(matches!(nodes[1].kind, NodeKind::Class { superclass: Some(_), .. }));
        assert!(matches!(nodes[2].kind, NodeKind::ClassExt { .. }));
        assert_eq!(tree.tokens[nodes[2].token].name(source), "A");
    }
}
