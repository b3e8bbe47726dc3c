//! Parse tree to AST lowering
//!
//! Names, symbols, and string literals are interned or allocated here, so
//! the builder needs the [`ThreadContext`]. Everything else is a purely
//! structural rewrite.

use cadenza_sdk::Slot;

use crate::compiler::ast::{
    AssignAst, Ast, BlockAst, DefineAst, IfAst, MessageAst, MultiAssignAst, NameAst, WhileAst,
};
use crate::compiler::error::BuildError;
use crate::parser::node::{iter_chain, Node, NodeKind};
use crate::parser::token::{unescape, Span, Token, TokenKind};
use crate::runtime::{Symbol, ThreadContext};

/// Lowers parse tree nodes to [`Ast`].
pub struct AstBuilder<'a> {
    context: &'a mut ThreadContext,
    source: &'a str,
    tokens: &'a [Token],
    /// Synthetic argument names created for `_` placeholders in the call
    /// currently being lowered
    curry_arguments: Vec<Symbol>,
}

impl<'a> AstBuilder<'a> {
    /// Create a builder over the tokens of one parse.
    pub fn new(context: &'a mut ThreadContext, source: &'a str, tokens: &'a [Token]) -> Self {
        Self {
            context,
            source,
            tokens,
            curry_arguments: Vec::new(),
        }
    }

    /// Lower interpreted code. The result is a frame body with `this` as
    /// its only argument.
    pub fn build_interpreter(&mut self, root: &Node) -> Result<BlockAst, BuildError> {
        self.build_block(root, true)
    }

    /// Lower the body of a class method.
    pub fn build_method(&mut self, method: &Node) -> Result<BlockAst, BuildError> {
        let NodeKind::Method { primitive, body, .. } = &method.kind else {
            return Err(BuildError::invalid_syntax("expected a method", self.span(method.token)));
        };
        let mut block = self.build_block(body, true)?;
        if let Some(primitive) = primitive {
            block.primitive = Some(self.symbol(*primitive)?);
        }
        Ok(block)
    }

    /// Value of a class variable or constant initializer, which must be a
    /// literal.
    pub fn build_literal(&mut self, node: &Node) -> Result<Slot, BuildError> {
        self.literal_value(node)?
            .ok_or_else(|| BuildError::invalid_syntax("initializer must be a literal", self.span(node.token)))
    }

    // ========================================================================
    // Tokens
    // ========================================================================

    fn token(&self, index: usize) -> Option<&'a Token> {
        self.tokens.get(index)
    }

    fn span(&self, index: usize) -> Span {
        self.token(index).map(|t| t.span).unwrap_or_default()
    }

    fn text(&self, index: usize) -> String {
        match self.token(index) {
            Some(token) if token.has_escape => unescape(token.name(self.source)),
            Some(token) => token.name(self.source).to_string(),
            None => String::new(),
        }
    }

    fn symbol(&self, index: usize) -> Result<Symbol, BuildError> {
        Ok(self.context.intern(&self.text(index))?)
    }

    fn intern(&self, name: &str) -> Result<Symbol, BuildError> {
        Ok(self.context.intern(name)?)
    }

    fn string_literal(&mut self, pieces: &[usize]) -> Result<Slot, BuildError> {
        let text: String = pieces.iter().map(|&piece| self.text(piece)).collect();
        Ok(self.context.heap.allocate_string(text)?)
    }

    /// Value of a literal node, if it is one.
    fn literal_value(&mut self, node: &Node) -> Result<Option<Slot>, BuildError> {
        Ok(match &node.kind {
            NodeKind::Slot(slot) => Some(*slot),
            NodeKind::Symbol => Some(self.symbol(node.token)?.slot()),
            NodeKind::String { pieces } => Some(self.string_literal(pieces)?),
            _ => None,
        })
    }

    // ========================================================================
    // Blocks
    // ========================================================================

    /// Lower a `Block` node. Frames get `this` as their first argument;
    /// blocks inlined by `if` and `while` do not.
    fn build_block(&mut self, node: &Node, is_frame: bool) -> Result<BlockAst, BuildError> {
        let span = self.span(node.token);
        let NodeKind::Block {
            arguments,
            variables,
            primitive,
            body,
        } = &node.kind
        else {
            return Err(BuildError::invalid_syntax("expected a block literal", span));
        };

        let mut block = BlockAst {
            span,
            ..BlockAst::default()
        };
        if is_frame {
            block.argument_names.push(self.intern("this")?);
            block.argument_defaults.push(Slot::NIL);
        }

        let mut prefix = Vec::new();
        if let Some(arguments) = arguments {
            self.build_arguments(arguments, &mut block, &mut prefix)?;
        }
        if !is_frame && !block.argument_names.is_empty() {
            return Err(BuildError::invalid_syntax("inlined blocks cannot declare arguments", span));
        }

        block.statements = prefix;
        for list in iter_chain(variables) {
            let NodeKind::VarList { definitions } = &list.kind else {
                continue;
            };
            for definition in iter_chain(definitions) {
                let NodeKind::VarDef { initial_value, .. } = &definition.kind else {
                    continue;
                };
                let value = match initial_value {
                    Some(value) => self.build_expr(value)?,
                    None => Ast::Constant(Slot::NIL),
                };
                block.statements.push(Ast::Define(Box::new(DefineAst {
                    name: self.name_ast(definition.token)?,
                    value,
                })));
            }
        }

        if let Some(body) = body {
            match self.build_expr(body)? {
                Ast::Sequence(statements) => block.statements.extend(statements),
                statement => block.statements.push(statement),
            }
        }

        if let Some(primitive) = primitive {
            block.primitive = Some(self.symbol(*primitive)?);
        }
        Ok(block)
    }

    /// Lower an `ArgList`. Literal defaults go in the default list; other
    /// defaults become `if (arg.isNil) { arg = default }` prefix statements.
    fn build_arguments(
        &mut self,
        arguments: &Node,
        block: &mut BlockAst,
        prefix: &mut Vec<Ast>,
    ) -> Result<(), BuildError> {
        let NodeKind::ArgList {
            var_list,
            var_args_name,
        } = &arguments.kind
        else {
            return Ok(());
        };

        if let Some(NodeKind::VarList { definitions }) = var_list.as_deref().map(|n| &n.kind) {
            for definition in iter_chain(definitions) {
                let NodeKind::VarDef { initial_value, .. } = &definition.kind else {
                    continue;
                };
                let name = self.name_ast(definition.token)?;
                block.argument_names.push(name.name);
                let default = match initial_value {
                    Some(value) => match self.literal_value(value)? {
                        Some(literal) => literal,
                        None => {
                            prefix.push(self.default_prefix(name, value)?);
                            Slot::NIL
                        }
                    },
                    None => Slot::NIL,
                };
                block.argument_defaults.push(default);
            }
        }

        if let Some(rest) = var_args_name {
            block.argument_names.push(self.symbol(*rest)?);
            block.argument_defaults.push(Slot::NIL);
            block.has_var_args = true;
        }
        Ok(())
    }

    fn default_prefix(&mut self, name: NameAst, value: &Node) -> Result<Ast, BuildError> {
        let default = self.build_expr(value)?;
        let is_nil = self.intern("isNil")?;
        Ok(Ast::If(Box::new(IfAst {
            condition: Ast::message(is_nil, vec![Ast::Name(name)], name.span),
            true_block: BlockAst {
                statements: vec![Ast::Assign(Box::new(AssignAst { name, value: default }))],
                span: name.span,
                ..BlockAst::default()
            },
            false_block: BlockAst {
                span: name.span,
                ..BlockAst::default()
            },
        })))
    }

    fn name_ast(&self, token: usize) -> Result<NameAst, BuildError> {
        Ok(NameAst {
            name: self.symbol(token)?,
            span: self.span(token),
        })
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Lower an expression node.
    pub fn build_expr(&mut self, node: &Node) -> Result<Ast, BuildError> {
        let span = self.span(node.token);
        match &node.kind {
            NodeKind::Empty => Ok(Ast::Empty),
            NodeKind::Slot(slot) => Ok(Ast::Constant(*slot)),
            NodeKind::String { pieces } => Ok(Ast::Constant(self.string_literal(pieces)?)),
            NodeKind::Symbol => Ok(Ast::Constant(self.symbol(node.token)?.slot())),
            NodeKind::Name { .. } => Ok(Ast::Name(self.name_ast(node.token)?)),

            NodeKind::ExprSeq { expr } => {
                let mut statements = Vec::new();
                for statement in iter_chain(expr) {
                    let is_return = matches!(statement.kind, NodeKind::Return { .. });
                    statements.push(self.build_expr(statement)?);
                    if is_return {
                        break;
                    }
                }
                Ok(Ast::Sequence(statements))
            }

            NodeKind::Return { value } => {
                let value = match value {
                    Some(value) => self.build_expr(value)?,
                    None => Ast::Constant(Slot::NIL),
                };
                Ok(Ast::MethodReturn(Box::new(value)))
            }

            NodeKind::Block { .. } => Ok(Ast::Block(Box::new(self.build_block(node, true)?))),

            NodeKind::Assign { name, value } => Ok(Ast::Assign(Box::new(AssignAst {
                name: self.name_ast(name.token)?,
                value: self.build_expr(value)?,
            }))),

            NodeKind::Setter { target, value } => {
                let selector = self.intern(&format!("{}_", self.text(node.token)))?;
                self.with_curry(span, |builder| {
                    let arguments = vec![builder.build_operand(target)?, builder.build_operand(value)?];
                    Ok(Ast::message(selector, arguments, span))
                })
            }

            NodeKind::Call {
                target,
                arguments,
                keyword_arguments,
            } => {
                let selector = self.call_selector(node.token)?;
                self.with_curry(span, |builder| {
                    let receiver = match target {
                        Some(target) => builder.build_operand(target)?,
                        None => Ast::Constant(Slot::NIL),
                    };
                    builder.build_message(selector, receiver, arguments, keyword_arguments, span)
                })
            }

            NodeKind::BinopCall { left, right, adverb } => {
                let selector = self.symbol(node.token)?;
                self.with_curry(span, |builder| {
                    let mut arguments = vec![builder.build_operand(left)?, builder.build_operand(right)?];
                    if let Some(adverb) = adverb {
                        arguments.push(builder.build_operand(adverb)?);
                    }
                    Ok(Ast::message(selector, arguments, span))
                })
            }

            NodeKind::PerformList { target, arguments } => {
                let selector = self.symbol(node.token)?;
                let perform_list = self.intern("performList")?;
                self.with_curry(span, |builder| {
                    let mut operands = vec![builder.build_operand(target)?, Ast::Constant(selector.slot())];
                    for argument in iter_chain(arguments) {
                        operands.push(builder.build_operand(argument)?);
                    }
                    Ok(Ast::message(perform_list, operands, span))
                })
            }

            NodeKind::New {
                target,
                arguments,
                keyword_arguments,
            } => {
                let selector = self.intern("new")?;
                self.with_curry(span, |builder| {
                    let receiver = builder.build_expr(target)?;
                    builder.build_message(selector, receiver, arguments, keyword_arguments, span)
                })
            }

            NodeKind::Value {
                target,
                arguments,
                keyword_arguments,
            } => {
                let selector = self.intern("value")?;
                self.with_curry(span, |builder| {
                    let receiver = builder.build_operand(target)?;
                    builder.build_message(selector, receiver, arguments, keyword_arguments, span)
                })
            }

            NodeKind::ArrayRead { target, index } => {
                let selector = self.intern("at")?;
                self.with_curry(span, |builder| {
                    let arguments = vec![builder.build_operand(target)?, builder.build_operand(index)?];
                    Ok(Ast::message(selector, arguments, span))
                })
            }

            NodeKind::ArrayWrite { target, index, value } => {
                let selector = self.intern("put")?;
                self.with_curry(span, |builder| {
                    let arguments = vec![
                        builder.build_operand(target)?,
                        builder.build_operand(index)?,
                        builder.build_operand(value)?,
                    ];
                    Ok(Ast::message(selector, arguments, span))
                })
            }

            NodeKind::CopySeries {
                target,
                first,
                second,
                last,
            } => {
                let selector = self.intern("copySeries")?;
                self.with_curry(span, |builder| {
                    let mut arguments = vec![builder.build_operand(target)?, builder.build_operand(first)?];
                    for bound in [second, last] {
                        arguments.push(match bound {
                            Some(bound) => builder.build_operand(bound)?,
                            None => Ast::Constant(Slot::NIL),
                        });
                    }
                    Ok(Ast::message(selector, arguments, span))
                })
            }

            NodeKind::LiteralList { class_name, elements } => {
                let new = self.intern("new")?;
                let add = self.intern("add")?;
                let class = match class_name {
                    Some(class_name) => self.name_ast(class_name.token)?,
                    None => NameAst {
                        name: self.intern("Array")?,
                        span,
                    },
                };
                self.with_curry(span, |builder| {
                    let mut list = Ast::message(new, vec![Ast::Name(class)], span);
                    for element in iter_chain(elements) {
                        let element = builder.build_operand(element)?;
                        list = Ast::message(add, vec![list, element], span);
                    }
                    Ok(list)
                })
            }

            NodeKind::Event { elements } => {
                let new = self.intern("new")?;
                let put = self.intern("put")?;
                let event = NameAst {
                    name: self.intern("Event")?,
                    span,
                };
                self.with_curry(span, |builder| {
                    let mut event = Ast::message(new, vec![Ast::Name(event)], span);
                    for element in iter_chain(elements) {
                        let NodeKind::KeyValue { key, value } = &element.kind else {
                            continue;
                        };
                        let key = builder.build_operand(key)?;
                        let value = builder.build_operand(value)?;
                        event = Ast::message(put, vec![event, key, value], span);
                    }
                    Ok(event)
                })
            }

            NodeKind::EnvironmentAt => {
                let at = self.intern("at")?;
                let environment = self.intern("currentEnvironment")?;
                let key = self.symbol(node.token)?;
                Ok(Ast::message(
                    at,
                    vec![Ast::name(environment, span), Ast::Constant(key.slot())],
                    span,
                ))
            }

            NodeKind::EnvironmentPut { value } => {
                let put = self.intern("put")?;
                let environment = self.intern("currentEnvironment")?;
                let key = self.symbol(node.token)?;
                let value = self.build_expr(value)?;
                Ok(Ast::message(
                    put,
                    vec![Ast::name(environment, span), Ast::Constant(key.slot()), value],
                    span,
                ))
            }

            NodeKind::If {
                condition,
                true_block,
                false_block,
            } => {
                let condition = self.build_expr(condition)?;
                let true_block = self.build_block(true_block, false)?;
                let false_block = match false_block {
                    Some(block) => self.build_block(block, false)?,
                    None => BlockAst {
                        span,
                        ..BlockAst::default()
                    },
                };
                Ok(Ast::If(Box::new(IfAst {
                    condition,
                    true_block,
                    false_block,
                })))
            }

            NodeKind::While { condition, repeat } => {
                let condition_block = self.build_block(condition, false)?;
                let repeat_block = match repeat {
                    Some(block) => self.build_block(block, false)?,
                    None => BlockAst {
                        span,
                        ..BlockAst::default()
                    },
                };
                Ok(Ast::While(Box::new(WhileAst {
                    condition_block,
                    repeat_block,
                })))
            }

            NodeKind::MultiAssign { targets, rest, value } => {
                let mut names = targets
                    .iter()
                    .map(|&target| self.name_ast(target))
                    .collect::<Result<Vec<_>, _>>()?;
                if let Some(rest) = rest {
                    names.push(self.name_ast(*rest)?);
                }
                Ok(Ast::MultiAssign(Box::new(MultiAssignAst {
                    array_value: self.build_expr(value)?,
                    targets: names,
                    last_is_remain: rest.is_some(),
                })))
            }

            NodeKind::CurryArgument => Err(BuildError::invalid_syntax(
                "'_' is only allowed as an argument of a call",
                span,
            )),

            NodeKind::KeyValue { .. }
            | NodeKind::VarDef { .. }
            | NodeKind::VarList { .. }
            | NodeKind::ArgList { .. }
            | NodeKind::Method { .. }
            | NodeKind::ClassExt { .. }
            | NodeKind::Class { .. } => Err(BuildError::invalid_syntax("not an expression", span)),
        }
    }

    /// Selector named by a `Call` token. A minus token is unary negation.
    fn call_selector(&self, token: usize) -> Result<Symbol, BuildError> {
        match self.token(token).map(|t| t.kind) {
            Some(TokenKind::Minus) => self.intern("neg"),
            _ => self.symbol(token),
        }
    }

    fn build_message(
        &mut self,
        selector: Symbol,
        receiver: Ast,
        arguments: &Option<Box<Node>>,
        keyword_arguments: &Option<Box<Node>>,
        span: Span,
    ) -> Result<Ast, BuildError> {
        let mut operands = vec![receiver];
        for argument in iter_chain(arguments) {
            operands.push(self.build_operand(argument)?);
        }
        let mut keywords = Vec::new();
        for pair in iter_chain(keyword_arguments) {
            let NodeKind::KeyValue { key, value } = &pair.kind else {
                continue;
            };
            keywords.push((self.symbol(key.token)?, self.build_operand(value)?));
        }
        Ok(Ast::Message(Box::new(MessageAst {
            selector,
            arguments: operands,
            keyword_arguments: keywords,
            span,
        })))
    }

    // ========================================================================
    // Currying
    // ========================================================================

    /// Lower a direct operand of a call; `_` becomes a fresh argument of
    /// the enclosing partial application.
    fn build_operand(&mut self, node: &Node) -> Result<Ast, BuildError> {
        if matches!(node.kind, NodeKind::CurryArgument) {
            let name = self.intern(&format!("_curry{}", self.curry_arguments.len()))?;
            self.curry_arguments.push(name);
            return Ok(Ast::name(name, self.span(node.token)));
        }
        self.build_expr(node)
    }

    /// Run `build` with a fresh placeholder list. If it used any `_`
    /// operands, wrap the result in a block taking them as arguments.
    fn with_curry<F>(&mut self, span: Span, build: F) -> Result<Ast, BuildError>
    where
        F: FnOnce(&mut Self) -> Result<Ast, BuildError>,
    {
        let outer = std::mem::take(&mut self.curry_arguments);
        let result = build(self);
        let curried = std::mem::replace(&mut self.curry_arguments, outer);
        let ast = result?;
        if curried.is_empty() {
            return Ok(ast);
        }

        let mut argument_names = vec![self.intern("this")?];
        argument_names.extend(curried);
        Ok(Ast::Block(Box::new(BlockAst {
            argument_defaults: vec![Slot::NIL; argument_names.len()],
            argument_names,
            statements: vec![ast],
            span,
            ..BlockAst::default()
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_interpreter;

    fn build(source: &str) -> (ThreadContext, BlockAst) {
        let mut context = ThreadContext::new().unwrap();
        let tree = parse_interpreter(source).unwrap();
        let block = AstBuilder::new(&mut context, source, &tree.tokens)
            .build_interpreter(&tree.root)
            .unwrap();
        (context, block)
    }

    fn selector(context: &ThreadContext, ast: &Ast) -> String {
        match ast {
            Ast::Message(message) => context.name_of(message.selector),
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_interpreter_has_this() {
        let (context, block) = build("nil");
        assert_eq!(block.argument_names.len(), 1);
        assert_eq!(context.name_of(block.argument_names[0]), "this");
        assert_eq!(block.statements, vec![Ast::Constant(Slot::NIL)]);
    }

    #[test]
    fn test_variables_become_defines() {
        let (_, block) = build("var x = 2, y; x");
        assert!(matches!(&block.statements[0], Ast::Define(d) if d.value == Ast::Constant(Slot::make_int32(2))));
        assert!(matches!(&block.statements[1], Ast::Define(d) if d.value == Ast::Constant(Slot::NIL)));
        assert!(matches!(block.statements[2], Ast::Name(_)));
    }

    #[test]
    fn test_binop_and_setter() {
        let (context, block) = build("1 + 2; x.foo = 3");
        assert_eq!(selector(&context, &block.statements[0]), "+");
        assert_eq!(selector(&context, &block.statements[1]), "foo_");
    }

    #[test]
    fn test_unary_minus_is_neg() {
        let (context, block) = build("-x");
        assert_eq!(selector(&context, &block.statements[0]), "neg");
    }

    #[test]
    fn test_collections_chain_messages() {
        let (context, block) = build("[1, 2]; (a: 1)");
        let Ast::Message(add) = &block.statements[0] else {
            panic!("expected message");
        };
        assert_eq!(context.name_of(add.selector), "add");
        assert_eq!(selector(&context, &add.arguments[0]), "add");
        assert_eq!(selector(&context, &block.statements[1]), "put");
    }

    #[test]
    fn test_environment_access() {
        let (context, block) = build("~a = ~b");
        let Ast::Message(put) = &block.statements[0] else {
            panic!("expected message");
        };
        assert_eq!(context.name_of(put.selector), "put");
        assert_eq!(selector(&context, &put.arguments[2]), "at");
    }

    #[test]
    fn test_curry_wraps_call() {
        let (context, block) = build("_ + 1");
        let Ast::Block(curried) = &block.statements[0] else {
            panic!("expected block");
        };
        let names: Vec<String> = curried.argument_names.iter().map(|n| context.name_of(*n)).collect();
        assert_eq!(names, vec!["this", "_curry0"]);
        assert_eq!(selector(&context, &curried.statements[0]), "+");
    }

    #[test]
    fn test_nested_curry_stays_inner() {
        let (_, block) = build("foo(_.bar, 2)");
        let Ast::Message(outer) = &block.statements[0] else {
            panic!("expected message");
        };
        assert!(matches!(outer.arguments[0], Ast::Block(_)));
    }

    #[test]
    fn test_non_literal_default_becomes_prefix() {
        let (context, block) = build("{ |a = 1, b = (2 + 3)| a }");
        let Ast::Block(inner) = &block.statements[0] else {
            panic!("expected block");
        };
        assert_eq!(inner.argument_defaults[1], Slot::make_int32(1));
        assert_eq!(inner.argument_defaults[2], Slot::NIL);
        let Ast::If(prefix) = &inner.statements[0] else {
            panic!("expected default prefix");
        };
        assert_eq!(selector(&context, &prefix.condition), "isNil");
    }

    #[test]
    fn test_if_and_while() {
        let (_, block) = build("if(x, {1}); while({x}, {y})");
        assert!(matches!(&block.statements[0], Ast::If(i) if i.false_block.statements.is_empty()));
        assert!(matches!(&block.statements[1], Ast::While(w) if w.repeat_block.statements.len() == 1));
    }

    #[test]
    fn test_strings_are_interned_on_heap() {
        let (context, block) = build("\"ab\" \"c\"");
        let Ast::Constant(slot) = block.statements[0] else {
            panic!("expected constant");
        };
        assert_eq!(context.heap.string(slot), Some("abc"));
    }

    #[test]
    fn test_stray_curry_is_rejected() {
        let mut context = ThreadContext::new().unwrap();
        let source = "_";
        let tree = parse_interpreter(source).unwrap();
        let err = AstBuilder::new(&mut context, source, &tree.tokens)
            .build_interpreter(&tree.root)
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidSyntax { .. }));
    }
}
