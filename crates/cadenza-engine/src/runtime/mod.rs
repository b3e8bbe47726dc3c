//! Runtime glue the compiler depends on
//!
//! Symbol interning, the host object heap, class records, and the
//! machine-state record generated code reads through the context register.

pub mod class_library;
pub mod heap;
pub mod machine_state;
pub mod symbol_table;
pub mod thread_context;

pub use class_library::{ClassDef, ClassError, ClassLibrary, MethodDef};
pub use heap::{FunctionDef, Heap, HeapError, HeapObject};
pub use machine_state::{offsets, InterruptCode, MachineState};
pub use symbol_table::{Symbol, SymbolError, SymbolTable};
pub use thread_context::ThreadContext;
