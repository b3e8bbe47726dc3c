//! The long-lived collaborator threaded through every compilation

use std::sync::Arc;

use cadenza_sdk::Slot;

use super::class_library::{ClassError, ClassLibrary};
use super::heap::{Heap, HeapObject};
use super::symbol_table::{Symbol, SymbolError, SymbolTable};

/// Heap, symbols, classes, and runtime singletons for one thread.
#[derive(Debug)]
pub struct ThreadContext {
    /// Object heap
    pub heap: Heap,
    /// Interned symbols, shared with other threads
    pub symbols: Arc<SymbolTable>,
    /// Known classes
    pub class_library: ClassLibrary,
    /// `thisProcess`
    pub this_process: Slot,
    /// `thisThread`
    pub this_thread: Slot,
    /// Set to make generated code report more
    pub debug_mode: bool,
}

impl ThreadContext {
    /// Create a context with a fresh symbol table.
    pub fn new() -> Result<Self, ClassError> {
        Self::with_symbols(Arc::new(SymbolTable::new()))
    }

    /// Create a context sharing `symbols` with other contexts.
    pub fn with_symbols(symbols: Arc<SymbolTable>) -> Result<Self, ClassError> {
        let mut heap = Heap::new();
        let class_library = ClassLibrary::bootstrap(&symbols, &mut heap)?;
        let this_process = heap.allocate(HeapObject::Instance {
            class: symbols.intern("Process")?,
            slots: Vec::new(),
        })?;
        let this_thread = heap.allocate(HeapObject::Instance {
            class: symbols.intern("Thread")?,
            slots: Vec::new(),
        })?;
        Ok(Self {
            heap,
            symbols,
            class_library,
            this_process,
            this_thread,
            debug_mode: false,
        })
    }

    /// Intern `name`.
    pub fn intern(&self, name: &str) -> Result<Symbol, SymbolError> {
        self.symbols.intern(name)
    }

    /// Name of `symbol` for messages and dumps.
    pub fn name_of(&self, symbol: Symbol) -> String {
        self.symbols.name_or_hash(symbol)
    }
}
