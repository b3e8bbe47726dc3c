//! Host-side object heap
//!
//! Objects created by the compiler (strings, literal arrays, compiled
//! function definitions, class objects) live here and are referenced from
//! generated code by pointer slots. The heap never frees; objects live as
//! long as the [`ThreadContext`](super::ThreadContext) that owns it.

use cadenza_sdk::{Slot, SlotError};
use serde::Serialize;

use super::symbol_table::Symbol;

/// A compiled method or block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDef {
    /// Selector of a method, or `value` for a block literal
    pub name: Symbol,
    /// Argument names; `this` first
    pub argument_names: Vec<Symbol>,
    /// Default argument values, parallel to `argument_names`
    pub default_values: Vec<Slot>,
    /// Local variable names
    pub variable_names: Vec<Symbol>,
    /// Initial contents of the heap frame: arguments then variables
    pub prototype_frame: Vec<Slot>,
    /// True if the last argument collects extra arguments
    pub has_var_args: bool,
    /// Runtime primitive implementing this method, if any
    pub primitive: Option<Symbol>,
    /// Opcode stream; empty for primitives
    pub bytecode: Vec<u8>,
}

impl FunctionDef {
    /// Number of declared arguments, `this` included.
    pub fn argument_count(&self) -> usize {
        self.argument_names.len()
    }

    /// Heap frame size in slots.
    pub fn frame_slots(&self) -> usize {
        self.argument_names.len() + self.variable_names.len()
    }
}

/// An object in the host heap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum HeapObject {
    /// Literal array
    Array(Vec<Slot>),
    /// String literal contents
    String(String),
    /// Compiled function definition
    FunctionDef(FunctionDef),
    /// Class object
    Class(Symbol),
    /// Instance of a class, one slot per instance variable
    Instance {
        /// Class name
        class: Symbol,
        /// Instance variable values
        slots: Vec<Slot>,
    },
}

impl HeapObject {
    /// Short type name, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            HeapObject::Array(_) => "Array",
            HeapObject::String(_) => "String",
            HeapObject::FunctionDef(_) => "FunctionDef",
            HeapObject::Class(_) => "Class",
            HeapObject::Instance { .. } => "Instance",
        }
    }
}

/// Heap errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    /// The object's address does not fit in a slot
    #[error("heap address out of range: {0}")]
    Address(#[from] SlotError),
}

/// Append-only object store.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
}

impl Heap {
    /// Address of the first object. Objects are spaced one stack slot apart.
    pub const BASE: u64 = 0x4000_0000_0000;

    const STRIDE: u64 = 16;

    /// Create an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `object`, returning a pointer slot to it.
    pub fn allocate(&mut self, object: HeapObject) -> Result<Slot, HeapError> {
        let address = Self::BASE + self.objects.len() as u64 * Self::STRIDE;
        let slot = Slot::make_pointer(address)?;
        self.objects.push(object);
        Ok(slot)
    }

    /// Store a string.
    pub fn allocate_string(&mut self, text: impl Into<String>) -> Result<Slot, HeapError> {
        self.allocate(HeapObject::String(text.into()))
    }

    /// Store an array.
    pub fn allocate_array(&mut self, elements: Vec<Slot>) -> Result<Slot, HeapError> {
        self.allocate(HeapObject::Array(elements))
    }

    /// Store a compiled function.
    pub fn allocate_function_def(&mut self, def: FunctionDef) -> Result<Slot, HeapError> {
        self.allocate(HeapObject::FunctionDef(def))
    }

    fn index_of(slot: Slot) -> Option<usize> {
        let address = slot.get_pointer()?;
        let offset = address.checked_sub(Self::BASE)?;
        if offset % Self::STRIDE != 0 {
            return None;
        }
        Some((offset / Self::STRIDE) as usize)
    }

    /// Object behind a pointer slot.
    pub fn get(&self, slot: Slot) -> Option<&HeapObject> {
        self.objects.get(Self::index_of(slot)?)
    }

    /// Mutable object behind a pointer slot.
    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut HeapObject> {
        let index = Self::index_of(slot)?;
        self.objects.get_mut(index)
    }

    /// Function definition behind a pointer slot.
    pub fn function_def(&self, slot: Slot) -> Option<&FunctionDef> {
        match self.get(slot)? {
            HeapObject::FunctionDef(def) => Some(def),
            _ => None,
        }
    }

    /// String behind a pointer slot.
    pub fn string(&self, slot: Slot) -> Option<&str> {
        match self.get(slot)? {
            HeapObject::String(text) => Some(text),
            _ => None,
        }
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if nothing was allocated.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_get() {
        let mut heap = Heap::new();
        let a = heap.allocate_string("abc").unwrap();
        let b = heap.allocate_array(vec![Slot::make_int32(1)]).unwrap();
        assert!(a.is_pointer());
        assert_ne!(a, b);
        assert_eq!(heap.string(a), Some("abc"));
        assert!(matches!(heap.get(b), Some(HeapObject::Array(v)) if v.len() == 1));
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn test_foreign_pointer_is_not_found() {
        let heap = Heap::new();
        let slot = Slot::make_pointer(0x1000).unwrap();
        assert!(heap.get(slot).is_none());
        assert!(heap.get(Slot::make_int32(4)).is_none());
    }
}
