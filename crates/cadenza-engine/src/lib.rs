//! Cadenza Language Engine
//!
//! This crate compiles Cadenza source to register-machine bytecode:
//! - **Parser**: Lexer and recursive descent parser (`parser` module)
//! - **Compiler**: AST, SSA HIR, name saving, and LIR (`compiler` module)
//! - **JIT**: Lifetime analysis, linear-scan allocation, resolution, and
//!   emission through the virtual JIT (`jit` module)
//! - **Runtime**: Symbols, heap, classes, and the machine-state record
//!   generated code shares with the host (`runtime` module)
//! - **Pipeline**: The driver tying the stages together (`pipeline` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use cadenza_engine::{Pipeline, PipelineConfig, ThreadContext, VirtualMachine, VmOutcome};
//!
//! let mut context = ThreadContext::new().unwrap();
//! let pipeline = Pipeline::new(PipelineConfig::default());
//! let artifacts = pipeline.compile_code(&mut context, "^42").unwrap();
//!
//! let def = context.heap.function_def(artifacts.function_def).unwrap();
//! let mut vm = VirtualMachine::new();
//! let outcome = vm.run(def, &[]).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![cfg_attr(test, allow(clippy::identity_op))]
#![allow(clippy::derivable_impls)]
#![allow(clippy::needless_return)]

// ============================================================================
// Core Modules
// ============================================================================

/// Parser module: Lexer, tokens, and parse tree
pub mod parser;

/// Compiler module: AST, HIR, and LIR construction
pub mod compiler;

/// JIT module: Register allocation, code generation, and the virtual machine
pub mod jit;

/// Runtime glue shared by the compiler and generated code
pub mod runtime;

/// Compilation driver
pub mod pipeline;

/// Source-annotated error reports
pub mod diagnostics;

// ============================================================================
// Re-exports
// ============================================================================

pub use parser::{parse_class_file, parse_interpreter, FrontEndError, LexError, ParseError, ParseTree, Span};

pub use compiler::hir::Frame;
pub use compiler::lir::LinearFrame;
pub use compiler::{BuildError, ValidateError};

pub use jit::{
    disassemble, DispatchRecord, EmitError, Instruction, Jit, Reg, VirtualJit, VirtualMachine, VmError, VmOutcome,
};

pub use runtime::{FunctionDef, InterruptCode, MachineState, Symbol, ThreadContext};

pub use pipeline::{BuildArtifacts, CompileError, Pipeline, PipelineConfig};

pub use diagnostics::Diagnostics;

pub use cadenza_sdk::{Slot, TypeFlags};
