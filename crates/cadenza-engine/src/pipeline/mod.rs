//! End-to-end compilation
//!
//! ```text
//! source -> parse tree -> AST -> HIR -> name saving
//!        -> LIR -> lifetimes -> allocation -> resolution -> bytecode
//! ```
//!
//! Each frame is compiled bottom up: block literals first, so that the
//! enclosing frame can load their function definitions as constants. When
//! [`PipelineConfig::validate`] is set the structural validator runs after
//! every stage.

mod config;
mod error;

pub use config::{PipelineConfig, RESERVED_REGISTERS};
pub use error::CompileError;

use cadenza_sdk::Slot;
use log::{debug, warn};
use serde::Serialize;

use crate::compiler::ast::BlockAst;
use crate::compiler::hir::{Frame, HirOpcode};
use crate::compiler::lir::LinearFrame;
use crate::compiler::validator::{
    validate_allocation, validate_frame, validate_lifetimes, validate_linear_frame, validate_resolution,
};
use crate::compiler::{save_names, serialize, AstBuilder, BlockBuilder, BuildError, NameSaverReport};
use crate::jit::{allocate_registers, analyze_lifetimes, emit_bytecode, resolve, EmitError};
use crate::parser::node::iter_chain;
use crate::parser::{parse_class_file, parse_interpreter, Node, NodeKind, Span, Token, TokenKind};
use crate::runtime::{ClassError, FunctionDef, MethodDef, Symbol, ThreadContext};

/// Name given to the frame of interpreted code.
pub const INTERPRET_SELECTOR: &str = "interpret";

/// Everything one top-level compilation produced.
#[derive(Debug, Clone, Serialize)]
pub struct BuildArtifacts {
    /// HIR after name saving, inner frames included
    pub frame: Frame,
    /// LIR of the top-level frame after allocation and resolution
    pub linear: LinearFrame,
    /// Opcode stream of the top-level frame
    pub bytecode: Vec<u8>,
    /// Pointer to the heap `FunctionDef` holding `bytecode`
    pub function_def: Slot,
    /// What name saving did across all frames
    pub names: NameSaverReport,
}

impl BuildArtifacts {
    /// Every stage's output as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// The compiler driver.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline with `config`.
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Compile interpreted code into a function taking only `this`.
    pub fn compile_code(&self, context: &mut ThreadContext, source: &str) -> Result<BuildArtifacts, CompileError> {
        let tree = parse_interpreter(source)?;
        let ast = AstBuilder::new(context, source, &tree.tokens).build_interpreter(&tree.root)?;
        let name = context.intern(INTERPRET_SELECTOR)?;
        self.compile_block(context, None, name, &ast)
    }

    /// Compile a method or interpreter body. `class` binds `this` and makes
    /// the class's variables visible.
    pub fn compile_block(
        &self,
        context: &mut ThreadContext,
        class: Option<Symbol>,
        name: Symbol,
        ast: &BlockAst,
    ) -> Result<BuildArtifacts, CompileError> {
        let mut frame = BlockBuilder::new(context, class, name)?.build_frame(ast)?;
        debug!(
            "built frame {}: {} blocks, {} values",
            context.name_of(name),
            frame.blocks.len(),
            frame.values.len()
        );

        let names = save_names(&mut frame);
        debug!(
            "saved names of {}: {} loads, {} stores, {} assigns removed",
            context.name_of(name),
            names.loads,
            names.stores,
            names.removed_assigns
        );

        let (linear, bytecode) = self.compile_frame(context, &mut frame)?;
        let function_def = context
            .heap
            .allocate_function_def(function_definition(&frame, bytecode.clone()))?;
        Ok(BuildArtifacts {
            frame,
            linear,
            bytecode,
            function_def,
            names,
        })
    }

    /// Compile a class file. Classes are registered in file order, so a
    /// superclass must come before its subclasses; extensions merge their
    /// methods into an existing class. Returns every class touched, in
    /// file order.
    pub fn compile_class_file(&self, context: &mut ThreadContext, source: &str) -> Result<Vec<Symbol>, CompileError> {
        let tree = parse_class_file(source)?;
        let nodes: Vec<&Node> = tree
            .root
            .siblings()
            .filter(|node| !matches!(node.kind, NodeKind::Empty))
            .collect();

        // Every class exists before any method body is built.
        let mut classes = Vec::with_capacity(nodes.len());
        for node in &nodes {
            classes.push(register_class(context, source, &tree.tokens, node)?);
        }

        for (node, class) in nodes.iter().zip(&classes) {
            let methods = match &node.kind {
                NodeKind::Class { methods, .. } | NodeKind::ClassExt { methods } => methods,
                _ => continue,
            };
            for method in iter_chain(methods) {
                self.compile_method(context, source, &tree.tokens, *class, method)?;
            }
        }
        debug!("compiled class file: {} classes", classes.len());
        Ok(classes)
    }

    fn compile_method(
        &self,
        context: &mut ThreadContext,
        source: &str,
        tokens: &[Token],
        class: Symbol,
        method: &Node,
    ) -> Result<(), CompileError> {
        let NodeKind::Method { is_class_method, .. } = &method.kind else {
            return Err(BuildError::invalid_syntax("expected a method", token_span(tokens, method.token)).into());
        };
        let selector = context.intern(token_text(source, tokens, method.token))?;
        let ast = AstBuilder::new(context, source, tokens).build_method(method)?;

        let definition = match ast.primitive {
            Some(primitive) => MethodDef {
                selector,
                is_class_method: *is_class_method,
                primitive: Some(primitive),
                function: None,
            },
            None => {
                let artifacts = self.compile_block(context, Some(class), selector, &ast)?;
                MethodDef {
                    selector,
                    is_class_method: *is_class_method,
                    primitive: None,
                    function: Some(artifacts.function_def),
                }
            }
        };
        context.class_library.add_method(class, definition)?;
        Ok(())
    }

    /// Compile `frame` and, first, every block literal inside it. Each inner
    /// frame's `FunctionDef` is stored on its `BlockLiteral`.
    fn compile_frame(
        &self,
        context: &mut ThreadContext,
        frame: &mut Frame,
    ) -> Result<(LinearFrame, Vec<u8>), CompileError> {
        for id in frame.inner_blocks.clone() {
            let Some(hir) = frame.hir_mut(id) else {
                continue;
            };
            if let HirOpcode::BlockLiteral {
                frame: inner,
                function_def,
                ..
            } = &mut hir.opcode
            {
                let (_, bytecode) = self.compile_frame(context, inner)?;
                let definition = function_definition(inner, bytecode);
                *function_def = Some(context.heap.allocate_function_def(definition)?);
            }
        }

        let validate = self.config.validate;
        if validate {
            validate_frame(frame).map_err(CompileError::validate("hir"))?;
        }

        let mut linear = serialize(frame)?;
        if validate {
            validate_linear_frame(&linear, frame.blocks.len()).map_err(CompileError::validate("lir"))?;
        }

        let registers = self.config.allocatable_registers();
        analyze_lifetimes(&mut linear, registers);
        if validate {
            validate_lifetimes(&linear).map_err(CompileError::validate("lifetime analysis"))?;
        }

        allocate_registers(&mut linear, registers)?;
        if validate {
            validate_allocation(&linear).map_err(CompileError::validate("register allocation"))?;
        }

        resolve(&mut linear)?;
        if validate {
            validate_resolution(&linear).map_err(CompileError::validate("resolution"))?;
        }

        let bytecode = self.emit(&linear)?;
        debug!(
            "compiled frame {}: {} instructions, {} spill slots, {} bytes",
            context.name_of(frame.name),
            linear.instructions.len(),
            linear.spill_slot_count,
            bytecode.len()
        );
        Ok((linear, bytecode))
    }

    /// Emit with the configured buffer, doubling it on overflow when allowed.
    fn emit(&self, linear: &LinearFrame) -> Result<Vec<u8>, CompileError> {
        let registers = self.config.allocatable_registers();
        let max = self.config.max_bytecode_capacity;
        let mut capacity = self.config.bytecode_capacity;
        loop {
            match emit_bytecode(linear, registers, capacity) {
                Ok(bytecode) => return Ok(bytecode),
                Err(EmitError::Overflow { .. }) if self.config.grow_on_overflow && capacity < max => {
                    let grown = capacity.saturating_mul(2).clamp(1, max);
                    warn!("bytecode buffer of {} bytes overflowed, retrying with {}", capacity, grown);
                    capacity = grown;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

fn function_definition(frame: &Frame, bytecode: Vec<u8>) -> FunctionDef {
    FunctionDef {
        name: frame.name,
        argument_names: frame.argument_names.clone(),
        default_values: frame.argument_defaults.clone(),
        variable_names: frame.variable_names.clone(),
        prototype_frame: frame.prototype_frame.clone(),
        has_var_args: frame.has_var_args,
        primitive: frame.primitive,
        bytecode,
    }
}

fn token_text<'a>(source: &'a str, tokens: &[Token], index: usize) -> &'a str {
    tokens.get(index).map(|token| token.name(source)).unwrap_or_default()
}

fn token_span(tokens: &[Token], index: usize) -> Span {
    tokens.get(index).map(|token| token.span).unwrap_or_default()
}

/// Define the class of a `Class` node, or find the class a `ClassExt`
/// extends, and declare its variables.
fn register_class(
    context: &mut ThreadContext,
    source: &str,
    tokens: &[Token],
    node: &Node,
) -> Result<Symbol, CompileError> {
    let name = token_text(source, tokens, node.token);
    let symbol = context.intern(name)?;
    match &node.kind {
        NodeKind::ClassExt { .. } => {
            if !context.class_library.contains(symbol) {
                return Err(ClassError::UnknownClass(name.to_string()).into());
            }
        }
        NodeKind::Class {
            superclass, variables, ..
        } => {
            if !context.class_library.contains(symbol) {
                let superclass = match *superclass {
                    Some(token) => Some(token_text(source, tokens, token)),
                    None if name == "Object" => None,
                    None => Some("Object"),
                };
                context
                    .class_library
                    .define_class(&context.symbols, &mut context.heap, name, superclass)?;
            }
            declare_variables(context, source, tokens, symbol, variables)?;
        }
        _ => {
            return Err(BuildError::invalid_syntax("expected a class definition", token_span(tokens, node.token)).into());
        }
    }
    Ok(symbol)
}

fn declare_variables(
    context: &mut ThreadContext,
    source: &str,
    tokens: &[Token],
    class: Symbol,
    variables: &Option<Box<Node>>,
) -> Result<(), CompileError> {
    for list in iter_chain(variables) {
        let NodeKind::VarList { definitions } = &list.kind else {
            continue;
        };
        let kind = tokens.get(list.token).map(|token| token.kind);
        for definition in iter_chain(definitions) {
            let NodeKind::VarDef { initial_value, .. } = &definition.kind else {
                continue;
            };
            let variable = context.intern(token_text(source, tokens, definition.token))?;
            let value = match initial_value {
                Some(node) => AstBuilder::new(context, source, tokens).build_literal(node)?,
                None => Slot::NIL,
            };
            match kind {
                Some(TokenKind::ClassVar) => {
                    context.class_library.add_class_variable(class, variable, value)?;
                }
                Some(TokenKind::Const) => context.class_library.add_constant(class, variable, value)?,
                _ => context.class_library.add_instance_variable(class, variable)?,
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::AllocationError;

    fn pipeline() -> Pipeline {
        Pipeline::new(PipelineConfig::default().with_validation(true))
    }

    #[test]
    fn test_compile_nil() {
        let mut context = ThreadContext::new().unwrap();
        let artifacts = pipeline().compile_code(&mut context, "nil").unwrap();
        assert!(!artifacts.bytecode.is_empty());
        let def = context.heap.function_def(artifacts.function_def).unwrap();
        assert_eq!(def.bytecode, artifacts.bytecode);
        assert_eq!(def.argument_count(), 1);
        assert_eq!(context.name_of(def.name), INTERPRET_SELECTOR);
    }

    #[test]
    fn test_artifacts_dump_as_json() {
        let mut context = ThreadContext::new().unwrap();
        let artifacts = pipeline()
            .compile_code(&mut context, "var i = 0; while({ i < 3 }, { i = i + 1 }); i")
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&artifacts.to_json().unwrap()).unwrap();
        assert!(json["frame"]["blocks"].is_array());
        assert_eq!(
            json["linear"]["block_order"].as_array().map(Vec::len),
            Some(artifacts.linear.block_order.len())
        );
        assert!(json["names"]["removed_assigns"].is_u64());
    }

    #[test]
    fn test_lex_error_stops_pipeline() {
        let mut context = ThreadContext::new().unwrap();
        let error = pipeline().compile_code(&mut context, "\"open").unwrap_err();
        assert!(matches!(error, CompileError::Lex(_)));
        assert!(error.span().is_some());
    }

    #[test]
    fn test_too_few_registers() {
        let mut context = ThreadContext::new().unwrap();
        let pipeline = Pipeline::new(PipelineConfig::default().with_registers(4));
        let error = pipeline.compile_code(&mut context, "nil").unwrap_err();
        assert_eq!(error, CompileError::Allocate(AllocationError::TooFewRegisters(1)));
    }

    #[test]
    fn test_buffer_grows_on_overflow() {
        let mut context = ThreadContext::new().unwrap();
        let pipeline = Pipeline::new(PipelineConfig::default().with_bytecode_capacity(4));
        let artifacts = pipeline.compile_code(&mut context, "var x = 2; x + 3").unwrap();
        assert!(artifacts.bytecode.len() > 4);
    }

    #[test]
    fn test_overflow_without_growth() {
        let mut context = ThreadContext::new().unwrap();
        let pipeline = Pipeline::new(
            PipelineConfig::default()
                .with_bytecode_capacity(4)
                .with_grow_on_overflow(false),
        );
        let error = pipeline.compile_code(&mut context, "nil").unwrap_err();
        assert_eq!(error, CompileError::Emit(EmitError::Overflow { capacity: 4 }));
    }

    #[test]
    fn test_block_literal_gets_function_def() {
        let mut context = ThreadContext::new().unwrap();
        let artifacts = pipeline()
            .compile_code(&mut context, "{ arg a, b; a + b }.value(4, 5)")
            .unwrap();
        let id = artifacts.frame.inner_blocks[0];
        let Some(HirOpcode::BlockLiteral { function_def, .. }) = artifacts.frame.hir(id).map(|hir| &hir.opcode) else {
            panic!("expected a block literal");
        };
        let def = context.heap.function_def(function_def.unwrap()).unwrap();
        assert_eq!(def.argument_count(), 3);
        assert!(!def.bytecode.is_empty());
    }

    #[test]
    fn test_class_file() {
        let mut context = ThreadContext::new().unwrap();
        let source = "Counter { classvar total = 1; var count; const limit = 10; \
                      count { ^count } size { _BasicSize } }";
        let classes = pipeline().compile_class_file(&mut context, source).unwrap();
        let counter = context.intern("Counter").unwrap();
        assert_eq!(classes, vec![counter]);

        let class = context.class_library.class(counter).unwrap();
        assert_eq!(class.superclass, Some(context.intern("Object").unwrap()));
        assert_eq!(class.instance_variables, vec![context.intern("count").unwrap()]);
        assert_eq!(class.constants, vec![(context.intern("limit").unwrap(), Slot::make_int32(10))]);

        let count = class.method(context.intern("count").unwrap(), false).unwrap();
        assert!(count.function.is_some());
        let size = class.method(context.intern("size").unwrap(), false).unwrap();
        assert_eq!(size.primitive, Some(context.intern("_BasicSize").unwrap()));
        assert!(size.function.is_none());
    }

    #[test]
    fn test_extension_of_unknown_class() {
        let mut context = ThreadContext::new().unwrap();
        let error = pipeline()
            .compile_class_file(&mut context, "+ Missing { foo { ^1 } }")
            .unwrap_err();
        assert!(matches!(error, CompileError::Build(BuildError::Class(ClassError::UnknownClass(_)))));
    }
}
